//! Lexer for the analysis dialect: a small indentation-structured,
//! Python-like language the model is asked to emit. Tokens carry the source
//! line so parse and policy failures can point at it.

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Kw(Kw),

    Newline,
    Indent,
    Dedent,
    Eof,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
}

/// Every keyword the grammar recognizes. Several exist only so the parser can
/// produce a dedicated statement kind for the policy checker to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    If,
    Elif,
    Else,
    For,
    In,
    While,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Break,
    Continue,
    Pass,
    Import,
    From,
    Try,
    Except,
    Finally,
    With,
    As,
    Lambda,
    Global,
    Nonlocal,
    Def,
    Class,
    Return,
    Raise,
    Del,
    Assert,
    Yield,
}

fn keyword(word: &str) -> Option<Kw> {
    Some(match word {
        "if" => Kw::If,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "for" => Kw::For,
        "in" => Kw::In,
        "while" => Kw::While,
        "and" => Kw::And,
        "or" => Kw::Or,
        "not" => Kw::Not,
        "True" => Kw::True,
        "False" => Kw::False,
        "None" => Kw::None,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "pass" => Kw::Pass,
        "import" => Kw::Import,
        "from" => Kw::From,
        "try" => Kw::Try,
        "except" => Kw::Except,
        "finally" => Kw::Finally,
        "with" => Kw::With,
        "as" => Kw::As,
        "lambda" => Kw::Lambda,
        "global" => Kw::Global,
        "nonlocal" => Kw::Nonlocal,
        "def" => Kw::Def,
        "class" => Kw::Class,
        "return" => Kw::Return,
        "raise" => Kw::Raise,
        "del" => Kw::Del,
        "assert" => Kw::Assert,
        "yield" => Kw::Yield,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut depth = 0usize; // bracket nesting; newlines inside brackets are joined

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let mut chars = raw_line.chars().peekable();

        if depth == 0 {
            let mut width = 0usize;
            while let Some(&c) = chars.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width += 4,
                    _ => break,
                }
                chars.next();
            }
            // Blank and comment-only lines do not affect indentation.
            match chars.peek() {
                None | Some('#') => continue,
                _ => {}
            }
            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                tokens.push(Token { tok: Tok::Indent, line: line_no });
            } else if width < current {
                while width < *indents.last().unwrap_or(&0) {
                    indents.pop();
                    tokens.push(Token { tok: Tok::Dedent, line: line_no });
                }
                if width != *indents.last().unwrap_or(&0) {
                    return Err(LexError {
                        message: "inconsistent indentation".to_string(),
                        line: line_no,
                    });
                }
            }
        } else {
            // Continuation line inside brackets: leading whitespace is noise.
            while matches!(chars.peek(), Some(' ') | Some('\t')) {
                chars.next();
            }
        }

        let mut emitted = false;
        while let Some(&c) = chars.peek() {
            match c {
                ' ' | '\t' => {
                    chars.next();
                }
                '#' => break,
                '0'..='9' => {
                    let mut text = String::new();
                    let mut is_float = false;
                    while let Some(&d) = chars.peek() {
                        match d {
                            '0'..='9' => text.push(d),
                            '.' => {
                                if is_float {
                                    break;
                                }
                                is_float = true;
                                text.push(d);
                            }
                            'e' | 'E' => {
                                is_float = true;
                                text.push(d);
                                chars.next();
                                if let Some(&sign) = chars.peek() {
                                    if sign == '+' || sign == '-' {
                                        text.push(sign);
                                        chars.next();
                                    }
                                }
                                continue;
                            }
                            _ => break,
                        }
                        chars.next();
                    }
                    let tok = if is_float {
                        let f = text.parse::<f64>().map_err(|_| LexError {
                            message: format!("invalid number literal '{text}'"),
                            line: line_no,
                        })?;
                        Tok::Float(f)
                    } else {
                        match text.parse::<i64>() {
                            Ok(i) => Tok::Int(i),
                            Err(_) => {
                                let f = text.parse::<f64>().map_err(|_| LexError {
                                    message: format!("invalid number literal '{text}'"),
                                    line: line_no,
                                })?;
                                Tok::Float(f)
                            }
                        }
                    };
                    tokens.push(Token { tok, line: line_no });
                    emitted = true;
                }
                '"' | '\'' => {
                    let quote = c;
                    chars.next();
                    let mut s = String::new();
                    loop {
                        match chars.next() {
                            Some(ch) if ch == quote => break,
                            Some('\\') => match chars.next() {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('\\') => s.push('\\'),
                                Some('\'') => s.push('\''),
                                Some('"') => s.push('"'),
                                Some(other) => {
                                    s.push('\\');
                                    s.push(other);
                                }
                                None => {
                                    return Err(LexError {
                                        message: "unterminated string literal".to_string(),
                                        line: line_no,
                                    })
                                }
                            },
                            Some(ch) => s.push(ch),
                            None => {
                                return Err(LexError {
                                    message: "unterminated string literal".to_string(),
                                    line: line_no,
                                })
                            }
                        }
                    }
                    tokens.push(Token { tok: Tok::Str(s), line: line_no });
                    emitted = true;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut word = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_alphanumeric() || d == '_' {
                            word.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let tok = match keyword(&word) {
                        Some(kw) => Tok::Kw(kw),
                        None => Tok::Name(word),
                    };
                    tokens.push(Token { tok, line: line_no });
                    emitted = true;
                }
                _ => {
                    chars.next();
                    let tok = match c {
                        '+' => two(&mut chars, '=', Tok::PlusAssign, Tok::Plus),
                        '-' => two(&mut chars, '=', Tok::MinusAssign, Tok::Minus),
                        '*' => {
                            if chars.peek() == Some(&'*') {
                                chars.next();
                                Tok::DoubleStar
                            } else {
                                two(&mut chars, '=', Tok::StarAssign, Tok::Star)
                            }
                        }
                        '/' => {
                            if chars.peek() == Some(&'/') {
                                chars.next();
                                Tok::DoubleSlash
                            } else {
                                two(&mut chars, '=', Tok::SlashAssign, Tok::Slash)
                            }
                        }
                        '%' => Tok::Percent,
                        '=' => two(&mut chars, '=', Tok::EqEq, Tok::Assign),
                        '!' => {
                            if chars.peek() == Some(&'=') {
                                chars.next();
                                Tok::NotEq
                            } else {
                                return Err(LexError {
                                    message: "unexpected character '!'".to_string(),
                                    line: line_no,
                                });
                            }
                        }
                        '<' => two(&mut chars, '=', Tok::LtEq, Tok::Lt),
                        '>' => two(&mut chars, '=', Tok::GtEq, Tok::Gt),
                        '(' => {
                            depth += 1;
                            Tok::LParen
                        }
                        ')' => {
                            depth = depth.saturating_sub(1);
                            Tok::RParen
                        }
                        '[' => {
                            depth += 1;
                            Tok::LBracket
                        }
                        ']' => {
                            depth = depth.saturating_sub(1);
                            Tok::RBracket
                        }
                        '{' => {
                            depth += 1;
                            Tok::LBrace
                        }
                        '}' => {
                            depth = depth.saturating_sub(1);
                            Tok::RBrace
                        }
                        ',' => Tok::Comma,
                        ':' => Tok::Colon,
                        '.' => Tok::Dot,
                        other => {
                            return Err(LexError {
                                message: format!("unexpected character '{other}'"),
                                line: line_no,
                            })
                        }
                    };
                    tokens.push(Token { tok, line: line_no });
                    emitted = true;
                }
            }
        }

        if emitted && depth == 0 {
            tokens.push(Token { tok: Tok::Newline, line: line_no });
        }
    }

    let last_line = source.lines().count().max(1);
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token { tok: Tok::Dedent, line: last_line });
    }
    tokens.push(Token { tok: Tok::Eof, line: last_line });
    Ok(tokens)
}

fn two(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    next: char,
    matched: Tok,
    plain: Tok,
) -> Tok {
    if chars.peek() == Some(&next) {
        chars.next();
        matched
    } else {
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lexes_assignment_and_call() {
        let got = toks("result = df[\"age\"].mean()\n");
        assert_eq!(
            got,
            vec![
                Tok::Name("result".into()),
                Tok::Assign,
                Tok::Name("df".into()),
                Tok::LBracket,
                Tok::Str("age".into()),
                Tok::RBracket,
                Tok::Dot,
                Tok::Name("mean".into()),
                Tok::LParen,
                Tok::RParen,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let got = toks("if x:\n    y = 1\nz = 2\n");
        assert!(got.contains(&Tok::Indent));
        assert!(got.contains(&Tok::Dedent));
        let indent_pos = got.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent_pos = got.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent_pos < dedent_pos);
    }

    #[test]
    fn brackets_join_lines() {
        let got = toks("x = num.round(\n    1.5,\n    0)\n");
        assert_eq!(got.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let got = toks("# header\n\nx = 1  # trailing\n");
        assert_eq!(
            got,
            vec![
                Tok::Name("x".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(err.message.contains("indentation"));
    }

    #[test]
    fn keywords_are_distinguished_from_names() {
        let got = toks("for row in items:\n    pass\n");
        assert_eq!(got[0], Tok::Kw(Kw::For));
        assert_eq!(got[1], Tok::Name("row".into()));
        assert_eq!(got[2], Tok::Kw(Kw::In));
    }
}
