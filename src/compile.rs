//! Dual-target expression compiler.
//!
//! Turns a fragment of Veil template script into equivalent JavaScript,
//! substituting cell-bound variable reads with cell-accessor calls
//! (`state['s0'].get()`). Unbound identifiers pass through verbatim — that
//! is the signal that a sub-expression references something outside the
//! reactive model. Loose equality always compiles to strict equality; no
//! implicit coercion crosses the server/client boundary.

use lazy_static::lazy_static;
#[cfg(feature = "napi")]
use napi_derive::napi;
use regex::Regex;
use std::collections::HashMap;

use crate::expr::{self, AssignOp, AssignTarget, BinaryOp, Expr, Stmt, UnaryOp};
use crate::payload::CellId;

/// Cell-accessor methods understood by the generated client containers.
/// A call to one of these on a bound variable compiles to the accessor call
/// itself; any other method call reads the value first.
const CELL_METHODS: [&str; 11] = [
    "get",
    "set",
    "increment",
    "decrement",
    "toggle",
    "push",
    "pop",
    "update",
    "remove",
    "merge",
    "subscribe",
];

#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub code: String,
    pub used_fallback: bool,
    pub warnings: Vec<String>,
}

pub struct ExpressionCompiler {
    bindings: HashMap<String, CellId>,
    params: Vec<String>,
}

impl ExpressionCompiler {
    pub fn new(bindings: HashMap<String, CellId>) -> Self {
        ExpressionCompiler {
            bindings,
            params: Vec::new(),
        }
    }

    /// Action parameters compile to `args[i]` so the emitted text works
    /// inside the generated action function.
    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub(crate) fn accessor(&self, name: &str) -> Option<String> {
        self.bindings.get(name).map(|id| format!("state['{}']", id))
    }

    fn ident(&self, name: &str) -> String {
        if let Some(accessor) = self.accessor(name) {
            return format!("{}.get()", accessor);
        }
        if let Some(index) = self.params.iter().position(|p| p == name) {
            return format!("args[{}]", index);
        }
        name.to_string()
    }

    /// Unbound identifier in mutation position (targets, ++/--).
    fn raw_ident(&self, name: &str) -> String {
        if let Some(index) = self.params.iter().position(|p| p == name) {
            return format!("args[{}]", index);
        }
        name.to_string()
    }

    // ── expressions ───────────────────────────────────────────────────────

    pub fn compile_expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Null => "null".to_string(),
            Expr::Bool(true) => "true".to_string(),
            Expr::Bool(false) => "false".to_string(),
            Expr::Number(n) => fmt_number(*n),
            Expr::Str(s) => format!("\"{}\"", escape_js_string(s)),
            Expr::Array(items) => {
                let parts: Vec<String> = items.iter().map(|e| self.compile_expr(e)).collect();
                format!("[{}]", parts.join(", "))
            }
            Expr::Object(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {}", escape_js_string(k), self.compile_expr(v)))
                    .collect();
                format!("{{ {} }}", parts.join(", "))
            }
            Expr::Ident(name) => self.ident(name),
            Expr::RawRef(name) => self.accessor(name).unwrap_or_else(|| name.clone()),
            Expr::StaticPath(base, member) => format!("{}.{}", base, member),
            Expr::Member(base, prop) => format!("{}.{}", self.operand(base), prop),
            Expr::Index(base, index) => {
                format!("{}[{}]", self.operand(base), self.compile_expr(index))
            }
            Expr::Call(callee, args) => {
                format!("{}({})", self.operand(callee), self.compile_args(args))
            }
            Expr::MethodCall(base, method, args) => {
                if let Expr::Ident(name) = base.as_ref() {
                    if let Some(accessor) = self.accessor(name) {
                        if CELL_METHODS.contains(&method.as_str()) {
                            return format!(
                                "{}.{}({})",
                                accessor,
                                method,
                                self.compile_args(args)
                            );
                        }
                        return format!(
                            "{}.get().{}({})",
                            accessor,
                            method,
                            self.compile_args(args)
                        );
                    }
                }
                format!("{}.{}({})", self.operand(base), method, self.compile_args(args))
            }
            Expr::Unary(op, inner) => {
                let symbol = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                };
                format!("{}{}", symbol, self.operand(inner))
            }
            Expr::Binary(op, lhs, rhs) => format!(
                "{} {} {}",
                self.operand(lhs),
                js_binary_op(*op),
                self.operand(rhs)
            ),
            Expr::Ternary(cond, cons, alt) => format!(
                "{} ? {} : {}",
                self.operand(cond),
                self.operand(cons),
                self.operand(alt)
            ),
            Expr::PreIncr(name) => self.prefix_step(name, "increment", "++"),
            Expr::PreDecr(name) => self.prefix_step(name, "decrement", "--"),
            Expr::PostIncr(name) => self.postfix_step(name, "increment", "++"),
            Expr::PostDecr(name) => self.postfix_step(name, "decrement", "--"),
        }
    }

    /// Mutate, then read the new value.
    fn prefix_step(&self, name: &str, method: &str, symbol: &str) -> String {
        match self.accessor(name) {
            Some(accessor) => format!("({}.{}(1), {}.get())", accessor, method, accessor),
            None => format!("{}{}", symbol, self.raw_ident(name)),
        }
    }

    /// Read the old value, mutate, yield the old value.
    fn postfix_step(&self, name: &str, method: &str, symbol: &str) -> String {
        match self.accessor(name) {
            Some(accessor) => format!(
                "(() => {{ const __old = {}.get(); {}.{}(1); return __old; }})()",
                accessor, accessor, method
            ),
            None => format!("{}{}", self.raw_ident(name), symbol),
        }
    }

    fn compile_args(&self, args: &[Expr]) -> String {
        args.iter().map(|a| self.compile_expr(a)).collect::<Vec<_>>().join(", ")
    }

    /// Parenthesize compound children so emitted precedence never depends
    /// on the reader knowing both grammars.
    fn operand(&self, expr: &Expr) -> String {
        let code = self.compile_expr(expr);
        match expr {
            Expr::Binary(..) | Expr::Ternary(..) | Expr::Unary(..) => format!("({})", code),
            _ => code,
        }
    }

    // ── statements ────────────────────────────────────────────────────────

    pub fn compile_stmt(&self, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Expr(expr) => format!("{};", self.compile_expr(expr)),
            Stmt::Assign { target: AssignTarget::Ident(name), op, value } => {
                let value_js = self.compile_expr(value);
                match self.accessor(name) {
                    Some(accessor) => match op {
                        AssignOp::Set => format!("{}.set({});", accessor, value_js),
                        other => format!(
                            "{}.set({}.get() {} ({}));",
                            accessor,
                            accessor,
                            js_assign_op(*other),
                            value_js
                        ),
                    },
                    None => match op {
                        AssignOp::Set => format!("{} = {};", self.raw_ident(name), value_js),
                        other => format!(
                            "{} {}= ({});",
                            self.raw_ident(name),
                            js_assign_op(*other),
                            value_js
                        ),
                    },
                }
            }
            Stmt::Assign { target: AssignTarget::Key(name, key), op, value } => {
                let key_js = self.compile_expr(key);
                let value_js = self.compile_expr(value);
                match self.accessor(name) {
                    Some(accessor) => match op {
                        AssignOp::Set => {
                            format!("{}.update({}, {});", accessor, key_js, value_js)
                        }
                        other => format!(
                            "{}.update({}, ({}.get()[{}] {} ({})));",
                            accessor,
                            key_js,
                            accessor,
                            key_js,
                            js_assign_op(*other),
                            value_js
                        ),
                    },
                    None => match op {
                        AssignOp::Set => {
                            format!("{}[{}] = {};", self.raw_ident(name), key_js, value_js)
                        }
                        other => format!(
                            "{}[{}] {}= ({});",
                            self.raw_ident(name),
                            key_js,
                            js_assign_op(*other),
                            value_js
                        ),
                    },
                }
            }
            Stmt::Append { target, value } => {
                let value_js = self.compile_expr(value);
                match self.accessor(target) {
                    Some(accessor) => format!("{}.push({});", accessor, value_js),
                    None => format!("{}.push({});", self.raw_ident(target), value_js),
                }
            }
        }
    }

    // ── fragments ─────────────────────────────────────────────────────────

    /// Compile an expression or statement fragment. Structural parsing is
    /// attempted first; on failure the word-boundary textual fallback runs,
    /// and if that changes nothing for a non-trivial input, the safe inert
    /// expression for `target` is substituted instead of invalid text.
    pub fn compile_fragment(&self, src: &str, target: Option<&str>) -> CompiledExpression {
        let trimmed = src.trim();
        if trimmed.is_empty() {
            return CompiledExpression {
                code: String::new(),
                used_fallback: false,
                warnings: vec!["empty expression fragment".to_string()],
            };
        }

        if let Ok(parsed) = expr::parse_expression(trimmed) {
            return CompiledExpression {
                code: self.compile_expr(&parsed),
                used_fallback: false,
                warnings: Vec::new(),
            };
        }

        let parse_error = match expr::parse_statements(trimmed) {
            Ok(statements) if !statements.is_empty() => {
                let code = statements
                    .iter()
                    .map(|s| self.compile_stmt(s))
                    .collect::<Vec<_>>()
                    .join("\n");
                return CompiledExpression { code, used_fallback: false, warnings: Vec::new() };
            }
            Ok(_) => "fragment contains no statements".to_string(),
            Err(err) => err,
        };

        let mut warnings = vec![format!("structural parse failed: {}", parse_error)];
        let (code, changed) = self.textual_fallback(trimmed);
        if changed {
            return CompiledExpression { code, used_fallback: true, warnings };
        }

        match target.and_then(|name| self.resolve_slot(name)) {
            Some(slot) => {
                let message = format!(
                    "textual fallback changed nothing; substituting inert read of '{}'",
                    slot
                );
                eprintln!("[VeilNative] {}", message);
                warnings.push(message);
                CompiledExpression {
                    code: format!("state['{}'].get()", slot),
                    used_fallback: true,
                    warnings,
                }
            }
            None => {
                warnings.push("textual fallback changed nothing; passing fragment through".to_string());
                CompiledExpression {
                    code: trimmed.to_string(),
                    used_fallback: true,
                    warnings,
                }
            }
        }
    }

    /// `target` may be a bound variable name or already a cell id.
    fn resolve_slot(&self, target: &str) -> Option<CellId> {
        if let Some(id) = self.bindings.get(target) {
            return Some(id.clone());
        }
        if self.bindings.values().any(|id| id == target) {
            return Some(target.to_string());
        }
        None
    }

    /// Word-boundary-safe substitution of bound variable reads. Occurrences
    /// adjacent to an access operator (`.`, `[`, `::`, `(`) or the `&` sigil
    /// stay verbatim.
    fn textual_fallback(&self, src: &str) -> (String, bool) {
        lazy_static! {
            static ref IDENT_RE: Regex = Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").unwrap();
        }
        let mut out = String::new();
        let mut changed = false;
        let mut last = 0;
        for m in IDENT_RE.find_iter(src) {
            out.push_str(&src[last..m.start()]);
            last = m.end();
            let name = m.as_str();
            let replace = self.bindings.contains_key(name)
                && !is_access_adjacent(src, m.start(), m.end());
            if replace {
                let id = &self.bindings[name];
                out.push_str(&format!("state['{}'].get()", id));
                changed = true;
            } else {
                out.push_str(name);
            }
        }
        out.push_str(&src[last..]);
        (out, changed)
    }
}

fn is_access_adjacent(src: &str, start: usize, end: usize) -> bool {
    let bytes = src.as_bytes();
    if start > 0 {
        match bytes[start - 1] {
            b'&' | b'.' | b':' | b'$' => return true,
            _ => {}
        }
    }
    match bytes.get(end) {
        Some(b'.') | Some(b'[') | Some(b':') | Some(b'(') => true,
        _ => false,
    }
}

fn js_binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        // Loose equality never crosses the boundary.
        BinaryOp::Eq | BinaryOp::StrictEq => "===",
        BinaryOp::Ne | BinaryOp::StrictNe => "!==",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Coalesce => "??",
    }
}

fn js_assign_op(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Set => "=",
        AssignOp::Add | AssignOp::Concat => "+",
        AssignOp::Sub => "-",
        AssignOp::Mul => "*",
        AssignOp::Div => "/",
        AssignOp::Mod => "%",
    }
}

pub(crate) fn fmt_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub(crate) fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn compile_expression_native(
    code: String,
    bindings_json: String,
    target: Option<String>,
) -> napi::Result<String> {
    let bindings: HashMap<String, CellId> = serde_json::from_str(&bindings_json)
        .map_err(|e| napi::Error::from_reason(format!("bindings parse error: {}", e)))?;
    let compiler = ExpressionCompiler::new(bindings);
    let out = compiler.compile_fragment(&code, target.as_deref());
    serde_json::to_string(&serde_json::json!({
        "code": out.code,
        "usedFallback": out.used_fallback,
        "warnings": out.warnings,
    }))
    .map_err(|e| napi::Error::from_reason(format!("serialize error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> ExpressionCompiler {
        let mut bindings = HashMap::new();
        bindings.insert("count".to_string(), "s0".to_string());
        bindings.insert("items".to_string(), "s1".to_string());
        ExpressionCompiler::new(bindings)
    }

    #[test]
    fn test_bound_read_becomes_accessor() {
        let c = compiler();
        let out = c.compile_fragment("count + 1", None);
        assert_eq!(out.code, "state['s0'].get() + 1");
        assert!(!out.used_fallback);
    }

    #[test]
    fn test_unbound_identifier_passes_through() {
        let c = compiler();
        let out = c.compile_fragment("count.get() + y", None);
        assert_eq!(out.code, "state['s0'].get() + y");
    }

    #[test]
    fn test_loose_equality_compiles_strict() {
        let c = compiler();
        let out = c.compile_fragment("count == 3", None);
        assert_eq!(out.code, "state['s0'].get() === 3");
    }

    #[test]
    fn test_assignment_statement() {
        let c = compiler();
        let out = c.compile_fragment("count = count + 1", None);
        assert_eq!(out.code, "state['s0'].set(state['s0'].get() + 1);");
    }

    #[test]
    fn test_compound_assignment() {
        let c = compiler();
        let out = c.compile_fragment("count += 2", None);
        assert_eq!(out.code, "state['s0'].set(state['s0'].get() + (2));");
    }

    #[test]
    fn test_postfix_increment_yields_old_value() {
        let c = compiler();
        let out = c.compile_fragment("count++", None);
        assert!(out.code.contains("const __old = state['s0'].get()"));
        assert!(out.code.contains("state['s0'].increment(1)"));
        assert!(out.code.contains("return __old"));
    }

    #[test]
    fn test_prefix_increment_reads_new_value() {
        let c = compiler();
        let out = c.compile_fragment("++count", None);
        assert_eq!(out.code, "(state['s0'].increment(1), state['s0'].get())");
    }

    #[test]
    fn test_value_method_reads_first() {
        let c = compiler();
        let out = c.compile_fragment("items.filter(f)", None);
        assert_eq!(out.code, "state['s1'].get().filter(f)");
    }

    #[test]
    fn test_params_compile_to_args() {
        let c = compiler().with_params(vec!["message".to_string()]);
        let out = c.compile_fragment("message + '!'", None);
        assert_eq!(out.code, "args[0] + \"!\"");
    }

    #[test]
    fn test_static_path() {
        let c = compiler();
        let out = c.compile_fragment("Math::max(count, 10)", None);
        assert_eq!(out.code, "Math.max(state['s0'].get(), 10)");
    }

    #[test]
    fn test_textual_fallback_respects_access_contexts() {
        let c = compiler();
        // Unparseable fragment (stray '@' never reaches the tokenizer's grammar).
        let (code, changed) = c.textual_fallback("count @ items.push(1)");
        assert!(changed);
        assert!(code.starts_with("state['s0'].get()"));
        assert!(code.contains("items.push(1)"));
    }

    #[test]
    fn test_inert_substitution_when_nothing_usable() {
        let c = compiler();
        let out = c.compile_fragment("@@@", Some("count"));
        assert_eq!(out.code, "state['s0'].get()");
        assert!(out.used_fallback);
        assert!(!out.warnings.is_empty());
    }

    #[test]
    fn test_ternary_and_coalesce() {
        let c = compiler();
        let out = c.compile_fragment("count > 0 ? count : fallback ?? 0", None);
        assert_eq!(
            out.code,
            "(state['s0'].get() > 0) ? state['s0'].get() : (fallback ?? 0)"
        );
    }
}
