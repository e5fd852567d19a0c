//! Trace evaluator for action bodies.
//!
//! Walks the (rewritten) statement list of an action source against the
//! recording scope, classifying every cell mutation into a specialized
//! operation where the shape allows it and falling back to a compiled
//! `expr` operation otherwise. Classification is structural — it works on
//! the parsed tree, so formatting cannot flip the outcome.

use crate::compile::ExpressionCompiler;
use crate::context::ActionScope;
use crate::expr::{AssignTarget, BinaryOp, Expr, Stmt, UnaryOp};
use crate::lexer::{tokenize, TokenKind};
use crate::value::CellValue;

// ═══════════════════════════════════════════════════════════════════════════════
// ACTION SOURCE SHAPE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ActionSource {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: String,
}

/// Split an action fragment into declared parameters and body text. The
/// body is the first top-level `{ ... }`; fragments without braces are bare
/// bodies with no parameters.
pub fn parse_action_source(src: &str) -> Result<ActionSource, String> {
    let tokens = tokenize(src)?;

    let mut depth = 0i32;
    let mut open = None;
    for (index, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            TokenKind::LBrace => {
                if depth == 0 {
                    open = Some(index);
                    break;
                }
                depth += 1;
            }
            TokenKind::RBrace => depth -= 1,
            _ => {}
        }
    }

    let Some(open) = open else {
        return Ok(ActionSource {
            name: None,
            params: Vec::new(),
            body: src.to_string(),
        });
    };

    let mut depth = 1i32;
    let mut close = None;
    for index in open + 1..tokens.len() {
        match tokens[index].kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    close = Some(index);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(close) = close else {
        return Err("unbalanced braces in action source".to_string());
    };

    let header = &tokens[..open];
    let mut name = None;
    let mut params = Vec::new();
    if let Some(paren) = header.iter().position(|t| t.kind == TokenKind::LParen) {
        name = header[..paren]
            .iter()
            .rev()
            .find(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text(src).to_string());
        let mut depth = 0i32;
        for tok in &header[paren..] {
            match tok.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Ident if depth == 1 => params.push(tok.text(src).to_string()),
                _ => {}
            }
        }
    }

    Ok(ActionSource {
        name,
        params,
        body: src[tokens[open].end..tokens[close].start].to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// LITERAL REDUCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Reduce an expression to a literal-shaped value when it involves no cell
/// reads and no free identifiers. Action parameters become argument
/// placeholders; pure-literal arithmetic folds. Placeholders block folding
/// (their value only exists at call time) but may sit inside containers.
pub(crate) fn reduce_literal(expr: &Expr, params: &[String]) -> Option<CellValue> {
    match expr {
        Expr::Null => Some(CellValue::Null),
        Expr::Bool(b) => Some(CellValue::Bool(*b)),
        Expr::Number(n) => Some(CellValue::num(*n)),
        Expr::Str(s) => Some(CellValue::Str(s.clone())),
        Expr::Ident(name) => params.iter().position(|p| p == name).map(CellValue::Arg),
        Expr::Array(items) => items
            .iter()
            .map(|e| reduce_literal(e, params))
            .collect::<Option<Vec<_>>>()
            .map(CellValue::Array),
        Expr::Object(fields) => fields
            .iter()
            .map(|(k, e)| reduce_literal(e, params).map(|v| (k.clone(), v)))
            .collect::<Option<Vec<_>>>()
            .map(CellValue::Object),
        Expr::Unary(UnaryOp::Neg, inner) => match reduce_literal(inner, params)? {
            CellValue::Number(n) => n.as_f64().map(|f| CellValue::num(-f)),
            _ => None,
        },
        Expr::Unary(UnaryOp::Not, inner) => match reduce_literal(inner, params)? {
            CellValue::Arg(_) => None,
            value => Some(CellValue::Bool(!value.is_truthy())),
        },
        Expr::Binary(op, lhs, rhs) => {
            let lhs = reduce_literal(lhs, params)?;
            let rhs = reduce_literal(rhs, params)?;
            if contains_arg(&lhs) || contains_arg(&rhs) {
                return None;
            }
            fold_binary(*op, &lhs, &rhs)
        }
        _ => None,
    }
}

fn contains_arg(value: &CellValue) -> bool {
    match value {
        CellValue::Arg(_) => true,
        CellValue::Array(items) => items.iter().any(contains_arg),
        CellValue::Object(fields) => fields.iter().any(|(_, v)| contains_arg(v)),
        _ => false,
    }
}

fn fold_binary(op: BinaryOp, lhs: &CellValue, rhs: &CellValue) -> Option<CellValue> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return match op {
            BinaryOp::Add => Some(CellValue::num(a + b)),
            BinaryOp::Sub => Some(CellValue::num(a - b)),
            BinaryOp::Mul => Some(CellValue::num(a * b)),
            BinaryOp::Div if b != 0.0 => Some(CellValue::num(a / b)),
            BinaryOp::Mod if b != 0.0 => Some(CellValue::num(a % b)),
            _ => None,
        };
    }
    if op == BinaryOp::Add {
        if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
            return Some(CellValue::Str(format!("{}{}", a, b)));
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// SPECIALIZED-OPERATION DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

enum SetPattern {
    Increment(f64),
    Decrement(f64),
    Toggle,
}

/// `x.get() + n` / `n + x.get()` → increment, `x.get() - n` → decrement,
/// `!x.get()` → toggle. A bare `x` read counts the same as `x.get()`, so
/// un-rewritten shapes classify identically.
fn detect_set_pattern(rhs: &Expr, name: &str) -> Option<SetPattern> {
    match rhs {
        Expr::Binary(BinaryOp::Add, lhs, rhs) => {
            if is_self_read(lhs, name) {
                if let Expr::Number(n) = **rhs {
                    return Some(SetPattern::Increment(n));
                }
            }
            if is_self_read(rhs, name) {
                if let Expr::Number(n) = **lhs {
                    return Some(SetPattern::Increment(n));
                }
            }
            None
        }
        Expr::Binary(BinaryOp::Sub, lhs, rhs) => {
            if is_self_read(lhs, name) {
                if let Expr::Number(n) = **rhs {
                    return Some(SetPattern::Decrement(n));
                }
            }
            None
        }
        Expr::Unary(UnaryOp::Not, inner) if is_self_read(inner, name) => Some(SetPattern::Toggle),
        _ => None,
    }
}

fn is_self_read(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Ident(n) => n == name,
        Expr::MethodCall(base, method, args) => {
            method == "get" && args.is_empty() && matches!(base.as_ref(), Expr::Ident(n) if n == name)
        }
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACE EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn trace_statements(
    statements: &[Stmt],
    scope: &mut ActionScope,
    compiler: &ExpressionCompiler,
    params: &[String],
) -> Result<(), String> {
    for stmt in statements {
        trace_statement(stmt, scope, compiler, params)?;
    }
    Ok(())
}

fn trace_statement(
    stmt: &Stmt,
    scope: &mut ActionScope,
    compiler: &ExpressionCompiler,
    params: &[String],
) -> Result<(), String> {
    match stmt {
        Stmt::Expr(Expr::MethodCall(base, method, args)) => {
            if let Expr::Ident(name) = base.as_ref() {
                if scope.is_bound(name) {
                    return trace_cell_call(name, method, args, scope, compiler, params);
                }
            }
            eprintln!(
                "[VeilNative] call '{}' has no traced effect and was ignored",
                method
            );
            Ok(())
        }
        Stmt::Expr(Expr::PostIncr(name)) | Stmt::Expr(Expr::PreIncr(name)) => {
            if scope.is_bound(name) {
                scope.cell(name)?.increment(1.0);
            }
            Ok(())
        }
        Stmt::Expr(Expr::PostDecr(name)) | Stmt::Expr(Expr::PreDecr(name)) => {
            if scope.is_bound(name) {
                scope.cell(name)?.decrement(1.0);
            }
            Ok(())
        }
        Stmt::Expr(_) => Ok(()),
        Stmt::Assign { target, .. } => {
            let name = match target {
                AssignTarget::Ident(name) => name,
                AssignTarget::Key(name, _) => name,
            };
            if scope.is_bound(name) {
                return Err(format!(
                    "mutation of cell '{}' uses assignment syntax the rewriter did not transform",
                    name
                ));
            }
            eprintln!(
                "[VeilNative] assignment to unbound variable '{}' ignored during trace",
                name
            );
            Ok(())
        }
        Stmt::Append { target, value } => {
            if scope.is_bound(target) {
                return trace_cell_call(
                    target,
                    "push",
                    std::slice::from_ref(value),
                    scope,
                    compiler,
                    params,
                );
            }
            eprintln!(
                "[VeilNative] append to unbound variable '{}' ignored during trace",
                target
            );
            Ok(())
        }
    }
}

fn trace_cell_call(
    name: &str,
    method: &str,
    args: &[Expr],
    scope: &mut ActionScope,
    compiler: &ExpressionCompiler,
    params: &[String],
) -> Result<(), String> {
    let accessor = compiler.accessor(name).unwrap_or_else(|| name.to_string());
    match method {
        "get" => Ok(()),
        "set" => {
            let rhs = args
                .first()
                .ok_or_else(|| format!("set() on '{}' requires a value", name))?;
            if let Some(value) = reduce_literal(rhs, params) {
                scope.cell(name)?.set(value);
            } else if let Some(pattern) = detect_set_pattern(rhs, name) {
                let mut cell = scope.cell(name)?;
                match pattern {
                    SetPattern::Increment(step) => cell.increment(step),
                    SetPattern::Decrement(step) => cell.decrement(step),
                    SetPattern::Toggle => cell.toggle(),
                }
            } else {
                let js = compiler.compile_expr(rhs);
                scope.cell(name)?.set_expr(&js);
            }
            Ok(())
        }
        "push" => {
            let rhs = args
                .first()
                .ok_or_else(|| format!("push() on '{}' requires a value", name))?;
            if let Some(value) = reduce_literal(rhs, params) {
                scope.cell(name)?.push(value);
            } else {
                let js = compiler.compile_expr(rhs);
                scope.cell(name)?.push_expr(&js);
            }
            Ok(())
        }
        "pop" => {
            scope.cell(name)?.pop();
            Ok(())
        }
        "toggle" => {
            scope.cell(name)?.toggle();
            Ok(())
        }
        "increment" | "decrement" => {
            match args.first() {
                None => {
                    let mut cell = scope.cell(name)?;
                    if method == "increment" {
                        cell.increment(1.0);
                    } else {
                        cell.decrement(1.0);
                    }
                }
                Some(expr) => match reduce_literal(expr, params).and_then(|v| v.as_f64()) {
                    Some(step) => {
                        let mut cell = scope.cell(name)?;
                        if method == "increment" {
                            cell.increment(step);
                        } else {
                            cell.decrement(step);
                        }
                    }
                    None => {
                        // Dynamic step: degrade to a compiled expression.
                        let step_js = compiler.compile_expr(expr);
                        let op = if method == "increment" { "+" } else { "-" };
                        let js = format!("{}.get() {} ({})", accessor, op, step_js);
                        scope.cell(name)?.set_expr(&js);
                    }
                },
            }
            Ok(())
        }
        "update" => {
            let key_expr = args
                .first()
                .ok_or_else(|| format!("update() on '{}' requires a key", name))?;
            let value_expr = args
                .get(1)
                .ok_or_else(|| format!("update() on '{}' requires a value", name))?;
            let key = reduce_literal(key_expr, params).and_then(literal_key);
            let value = reduce_literal(value_expr, params);
            match (key, value) {
                (Some(key), Some(value)) => {
                    scope.cell(name)?.update(&key, value);
                }
                _ => {
                    // Rebuild the whole value on the client.
                    let key_js = compiler.compile_expr(key_expr);
                    let value_js = compiler.compile_expr(value_expr);
                    let js = format!(
                        "(() => {{ const __v = {}.get(); __v[{}] = ({}); return __v; }})()",
                        accessor, key_js, value_js
                    );
                    scope.cell(name)?.set_expr(&js);
                }
            }
            Ok(())
        }
        "remove" => {
            let key_expr = args
                .first()
                .ok_or_else(|| format!("remove() on '{}' requires a key", name))?;
            match reduce_literal(key_expr, params).and_then(literal_key) {
                Some(key) => {
                    scope.cell(name)?.remove(&key);
                }
                None => {
                    let key_js = compiler.compile_expr(key_expr);
                    let js = format!(
                        "(() => {{ const __v = {}.get(); delete __v[{}]; return __v; }})()",
                        accessor, key_js
                    );
                    scope.cell(name)?.set_expr(&js);
                }
            }
            Ok(())
        }
        "merge" => {
            let rhs = args
                .first()
                .ok_or_else(|| format!("merge() on '{}' requires a value", name))?;
            if let Some(value) = reduce_literal(rhs, params) {
                scope.cell(name)?.merge(value);
            } else {
                let value_js = compiler.compile_expr(rhs);
                let js = format!(
                    "(() => {{ const __v = {}.get(); const __m = ({}); \
                     return Array.isArray(__v) && Array.isArray(__m) ? __v.concat(__m) : Object.assign({{}}, __v, __m); }})()",
                    accessor, value_js
                );
                scope.cell(name)?.set_expr(&js);
            }
            Ok(())
        }
        other => {
            eprintln!(
                "[VeilNative] unsupported method '{}' on cell '{}' ignored during trace",
                other, name
            );
            Ok(())
        }
    }
}

fn literal_key(value: CellValue) -> Option<String> {
    match value {
        CellValue::Str(s) => Some(s),
        CellValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
