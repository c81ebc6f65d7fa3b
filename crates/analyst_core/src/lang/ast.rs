//! Syntax tree for the analysis dialect. Statement kinds the executor will
//! never run (imports, exception handling, scope escapes, definitions) still
//! get dedicated nodes: the policy checker rejects by node kind, so the
//! grammar has to be able to name them.

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: Target, value: Expr, line: usize },
    AugAssign { target: Target, op: BinOp, value: Expr, line: usize },
    Expr { value: Expr, line: usize },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt>, line: usize },
    For { var: String, iter: Expr, body: Vec<Stmt>, line: usize },
    While { cond: Expr, body: Vec<Stmt>, line: usize },
    Break { line: usize },
    Continue { line: usize },
    Pass { line: usize },

    // Recognized only to be rejected.
    Import { line: usize },
    ImportFrom { line: usize },
    Try { line: usize },
    With { line: usize },
    Global { line: usize },
    Nonlocal { line: usize },
    FuncDef { line: usize },
    ClassDef { line: usize },
    Return { line: usize },
    Raise { line: usize },
    Del { line: usize },
    Assert { line: usize },
}

impl Stmt {
    pub fn line(&self) -> usize {
        match self {
            Stmt::Assign { line, .. }
            | Stmt::AugAssign { line, .. }
            | Stmt::Expr { line, .. }
            | Stmt::If { line, .. }
            | Stmt::For { line, .. }
            | Stmt::While { line, .. }
            | Stmt::Break { line }
            | Stmt::Continue { line }
            | Stmt::Pass { line }
            | Stmt::Import { line }
            | Stmt::ImportFrom { line }
            | Stmt::Try { line }
            | Stmt::With { line }
            | Stmt::Global { line }
            | Stmt::Nonlocal { line }
            | Stmt::FuncDef { line }
            | Stmt::ClassDef { line }
            | Stmt::Return { line }
            | Stmt::Raise { line }
            | Stmt::Del { line }
            | Stmt::Assert { line } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index { obj: Expr, index: Expr },
    Attr { obj: Expr, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attr { obj: Box<Expr>, name: String },
    Index { obj: Box<Expr>, index: Box<Expr> },
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Box<Expr>, orelse: Box<Expr> },
    /// Anonymous function. Parameters and body are discarded: the policy
    /// checker rejects the node before anything could evaluate it.
    Lambda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    In,
    NotIn,
}
