//! Static policy gate over candidate code. The statement grammar is an
//! allowlist: only kinds the executor has been reasoned about survive.
//! Calls and attributes are additionally screened by name against denylists
//! covering dynamic execution, introspection, file opening, process control
//! and filesystem mutation.
//!
//! The public error stays generic on purpose: the caller reports "blocked
//! construct" without saying which check fired. The specific construct is
//! only emitted to the debug log.

use thiserror::Error;
use tracing::debug;

use super::ast::{Expr, Program, Stmt, Target};
use super::parser::parse_program;

/// Bare call targets reserved for dynamic execution, introspection, or
/// file opening.
const BANNED_CALLS: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "breakpoint",
    "input",
];

/// Attribute names associated with process control or filesystem mutation.
const BANNED_ATTRS: &[&str] = &[
    "system", "popen", "spawn", "kill", "remove", "unlink", "rmdir", "rmtree", "chmod", "chown",
];

#[derive(Debug, Error)]
pub enum PolicyViolation {
    #[error("generated code is not valid: {message} (line {line})")]
    SyntaxInvalid { message: String, line: usize },
    #[error("code contains a blocked construct")]
    Blocked,
}

/// Vet candidate code. On success the parsed program is returned so the
/// executor never re-parses (and never runs anything that was not walked).
pub fn check(code: &str) -> Result<Program, PolicyViolation> {
    let program = parse_program(code).map_err(|e| PolicyViolation::SyntaxInvalid {
        message: e.message,
        line: e.line,
    })?;
    for stmt in &program.body {
        check_stmt(stmt)?;
    }
    Ok(program)
}

fn blocked(what: &str, line: usize) -> PolicyViolation {
    debug!(construct = what, line, "policy check blocked a construct");
    PolicyViolation::Blocked
}

fn check_stmt(stmt: &Stmt) -> Result<(), PolicyViolation> {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            check_target(target, stmt.line())?;
            check_expr(value, stmt.line())
        }
        Stmt::AugAssign { target, value, .. } => {
            check_target(target, stmt.line())?;
            check_expr(value, stmt.line())
        }
        Stmt::Expr { value, .. } => check_expr(value, stmt.line()),
        Stmt::If { branches, orelse, .. } => {
            for (cond, body) in branches {
                check_expr(cond, stmt.line())?;
                for inner in body {
                    check_stmt(inner)?;
                }
            }
            for inner in orelse {
                check_stmt(inner)?;
            }
            Ok(())
        }
        Stmt::For { iter, body, .. } => {
            check_expr(iter, stmt.line())?;
            for inner in body {
                check_stmt(inner)?;
            }
            Ok(())
        }
        Stmt::While { cond, body, .. } => {
            check_expr(cond, stmt.line())?;
            for inner in body {
                check_stmt(inner)?;
            }
            Ok(())
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Pass { .. } => Ok(()),

        Stmt::Import { line } => Err(blocked("import", *line)),
        Stmt::ImportFrom { line } => Err(blocked("from-import", *line)),
        Stmt::Try { line } => Err(blocked("try", *line)),
        Stmt::With { line } => Err(blocked("with", *line)),
        Stmt::Global { line } => Err(blocked("global", *line)),
        Stmt::Nonlocal { line } => Err(blocked("nonlocal", *line)),
        Stmt::FuncDef { line } => Err(blocked("function definition", *line)),
        Stmt::ClassDef { line } => Err(blocked("class definition", *line)),
        Stmt::Return { line } => Err(blocked("return", *line)),
        Stmt::Raise { line } => Err(blocked("raise", *line)),
        Stmt::Del { line } => Err(blocked("del", *line)),
        Stmt::Assert { line } => Err(blocked("assert", *line)),
    }
}

fn check_target(target: &Target, line: usize) -> Result<(), PolicyViolation> {
    match target {
        Target::Name(_) => Ok(()),
        Target::Index { obj, index } => {
            check_expr(obj, line)?;
            check_expr(index, line)
        }
        Target::Attr { obj, name } => {
            check_attr_name(name, line)?;
            check_expr(obj, line)
        }
    }
}

fn check_attr_name(name: &str, line: usize) -> Result<(), PolicyViolation> {
    if BANNED_ATTRS.contains(&name) || name.starts_with("__") {
        return Err(blocked("attribute access", line));
    }
    Ok(())
}

fn check_expr(expr: &Expr, line: usize) -> Result<(), PolicyViolation> {
    match expr {
        Expr::Int(_)
        | Expr::Float(_)
        | Expr::Str(_)
        | Expr::Bool(_)
        | Expr::NoneLit
        | Expr::Name(_) => Ok(()),
        Expr::Lambda => Err(blocked("lambda", line)),
        Expr::List(items) => {
            for item in items {
                check_expr(item, line)?;
            }
            Ok(())
        }
        Expr::Dict(items) => {
            for (key, value) in items {
                check_expr(key, line)?;
                check_expr(value, line)?;
            }
            Ok(())
        }
        Expr::Attr { obj, name } => {
            check_attr_name(name, line)?;
            check_expr(obj, line)
        }
        Expr::Index { obj, index } => {
            check_expr(obj, line)?;
            check_expr(index, line)
        }
        Expr::Call { func, args, kwargs } => {
            if let Expr::Name(name) = func.as_ref() {
                if BANNED_CALLS.contains(&name.as_str()) {
                    return Err(blocked("call", line));
                }
            }
            check_expr(func, line)?;
            for arg in args {
                check_expr(arg, line)?;
            }
            for (_, value) in kwargs {
                check_expr(value, line)?;
            }
            Ok(())
        }
        Expr::Unary { operand, .. } => check_expr(operand, line),
        Expr::Binary { left, right, .. } => {
            check_expr(left, line)?;
            check_expr(right, line)
        }
        Expr::Ternary { cond, then, orelse } => {
            check_expr(cond, line)?;
            check_expr(then, line)?;
            check_expr(orelse, line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_blocked(code: &str) {
        match check(code) {
            Err(PolicyViolation::Blocked) => {}
            other => panic!("expected {code:?} to be blocked, got {other:?}"),
        }
    }

    #[test]
    fn imports_are_blocked_in_any_form() {
        assert_blocked("import os\nresult = 1\n");
        assert_blocked("import os.path\n");
        assert_blocked("from os import path\n");
        assert_blocked("from . import sibling\n");
        assert_blocked("if True:\n    import os\n");
    }

    #[test]
    fn exception_handling_is_blocked() {
        assert_blocked("try:\n    x = 1\nexcept Exception:\n    x = 2\n");
        assert_blocked("try:\n    x = 1\nfinally:\n    x = 2\n");
        assert_blocked("raise ValueError\n");
    }

    #[test]
    fn context_managers_are_blocked() {
        assert_blocked("with ctx() as f:\n    x = 1\n");
    }

    #[test]
    fn scope_escapes_are_blocked() {
        assert_blocked("global x\n");
        assert_blocked("nonlocal x\n");
    }

    #[test]
    fn definitions_are_blocked() {
        assert_blocked("def f(x):\n    return x\n");
        assert_blocked("class C:\n    pass\n");
        assert_blocked("f = lambda x: x\n");
        assert_blocked("result = sorted_by(key=lambda r: r)\n");
    }

    #[test]
    fn statement_kinds_outside_the_allowlist_are_blocked() {
        assert_blocked("return 1\n");
        assert_blocked("del x\n");
        assert_blocked("assert x\n");
    }

    #[test]
    fn dynamic_execution_calls_are_blocked() {
        for call in [
            "open(\"/etc/passwd\")",
            "exec(\"x = 1\")",
            "eval(\"1 + 1\")",
            "compile(\"x\", \"<s>\", \"eval\")",
            "__import__(\"os\")",
            "globals()",
            "locals()",
            "vars()",
            "getattr(df, \"columns\")",
            "setattr(df, \"x\", 1)",
            "delattr(df, \"x\")",
            "breakpoint()",
            "input()",
        ] {
            assert_blocked(&format!("result = {call}\n"));
        }
    }

    #[test]
    fn process_and_filesystem_attributes_are_blocked() {
        for attr in [
            "system", "popen", "spawn", "kill", "remove", "unlink", "rmdir", "rmtree", "chmod",
            "chown",
        ] {
            assert_blocked(&format!("result = something.{attr}(\"x\")\n"));
            assert_blocked(&format!("x = obj.{attr}\n"));
        }
    }

    #[test]
    fn dunder_attributes_are_blocked() {
        assert_blocked("x = df.__class__\n");
        assert_blocked("x = obj.__dict__\n");
    }

    #[test]
    fn banned_constructs_nested_in_allowed_statements_are_found() {
        assert_blocked("for x in items:\n    y = obj.popen(\"x\")\n");
        assert_blocked("while True:\n    from os import path\n");
        assert_blocked("result = [eval(\"1\")]\n");
        assert_blocked("result = {\"k\": obj.system(\"x\")}\n");
        assert_blocked("result = 1 if eval(\"x\") else 2\n");
    }

    #[test]
    fn parse_failure_is_a_violation() {
        match check("result = df[\n") {
            Err(PolicyViolation::SyntaxInvalid { .. }) => {}
            other => panic!("expected syntax violation, got {other:?}"),
        }
    }

    #[test]
    fn ordinary_analysis_code_passes() {
        let src = "\
high = df[df[\"income\"] > 50000]
by_city = high.groupby(\"city\")[\"income\"].mean()
result = by_city
";
        assert!(check(src).is_ok());
    }

    #[test]
    fn loops_conditionals_and_plots_pass() {
        let src = "\
total = 0
for v in df[\"age\"]:
    if v != None:
        total = total + v
plot.figure()
plot.hist(df[\"age\"], bins=20)
plot.title(\"Age distribution\")
result = total
";
        assert!(check(src).is_ok());
    }

    #[test]
    fn rejection_is_all_or_nothing() {
        // The safe prefix before the violation must not matter.
        let src = "result = df[\"age\"].mean()\nimport os\n";
        assert_blocked(src);
    }
}
