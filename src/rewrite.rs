//! Source rewriter for traced action bodies.
//!
//! Host source arrives with ordinary mutation syntax (`count++`,
//! `count = count + 1`, `items[] = x`) that the tracer cannot observe. This
//! pass rewrites every mutation of a cell-bound variable into an explicit
//! cell-API call (`count.increment(1)`, `count.set(count.get() + 1)`,
//! `items.push(x)`) ahead of the trace, and rewrites bare reads to `.get()`
//! unless they sit in an access context. An unchanged outcome is flagged to
//! the caller; this pass never invents behavior.

use std::collections::HashSet;

use crate::lexer::{statement_end, tokenize, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub source: String,
    pub changed: bool,
}

pub fn rewrite_source(source: &str, bound: &HashSet<String>) -> RewriteOutcome {
    let tokens = match tokenize(source) {
        Ok(tokens) => tokens,
        Err(err) => {
            eprintln!("[VeilNative] rewrite skipped, source did not tokenize: {}", err);
            return RewriteOutcome { source: source.to_string(), changed: false };
        }
    };

    let (body_start, body_end) = body_range(&tokens);
    let mut rewriter = Rewriter {
        src: source,
        tokens: &tokens,
        bound,
        out: String::new(),
        changed: false,
        copied: 0,
        statement_context: true,
    };
    rewriter.rewrite_range(body_start, body_end);
    rewriter.copy_gap(source.len());

    RewriteOutcome { source: rewriter.out, changed: rewriter.changed }
}

/// Token range (exclusive of braces) of the first top-level `{ ... }` —
/// the function body when the fragment carries a declaration header.
/// Fragments without braces are treated as bare bodies.
fn body_range(tokens: &[Token]) -> (usize, usize) {
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
        return (0, tokens.len());
    };
    let mut depth = 1i32;
    for index in open + 1..tokens.len() {
        match tokens[index].kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    return (open + 1, index);
                }
            }
            _ => {}
        }
    }
    (open + 1, tokens.len())
}

struct Rewriter<'a> {
    src: &'a str,
    tokens: &'a [Token],
    bound: &'a HashSet<String>,
    out: String,
    changed: bool,
    copied: usize,
    /// False inside extracted sub-expressions, where `x++` is a value
    /// (handled by the parser) rather than a standalone mutation.
    statement_context: bool,
}

impl Rewriter<'_> {
    fn copy_gap(&mut self, upto: usize) {
        if upto > self.copied {
            self.out.push_str(&self.src[self.copied..upto]);
            self.copied = upto;
        }
    }

    fn copy_token(&mut self, index: usize) {
        let tok = self.tokens[index];
        self.copy_gap(tok.start);
        self.out.push_str(tok.text(self.src));
        self.copied = tok.end;
    }

    /// Replace tokens `first..=last` with `text`.
    fn emit(&mut self, first: usize, last: usize, text: &str) {
        self.copy_gap(self.tokens[first].start);
        self.out.push_str(text);
        self.copied = self.tokens[last].end;
        self.changed = true;
    }

    fn kind(&self, index: usize) -> Option<TokenKind> {
        self.tokens.get(index).map(|t| t.kind)
    }

    /// Previous token kind, line breaks ignored.
    fn prev_kind(&self, index: usize, floor: usize) -> Option<TokenKind> {
        let mut i = index;
        while i > floor {
            i -= 1;
            if self.tokens[i].kind != TokenKind::Newline {
                return Some(self.tokens[i].kind);
            }
        }
        None
    }

    fn is_bound(&self, index: usize) -> bool {
        let tok = self.tokens[index];
        tok.kind == TokenKind::Ident && self.bound.contains(tok.text(self.src))
    }

    fn rewrite_range(&mut self, start: usize, end: usize) {
        let mut i = start;
        while i < end {
            let tok = self.tokens[i];
            match tok.kind {
                TokenKind::Ident if self.is_bound(i) => {
                    i = self.rewrite_bound_ident(i, start, end);
                }
                TokenKind::Incr | TokenKind::Decr => {
                    // Prefix form at statement position.
                    if self.statement_context
                        && i + 1 < end
                        && self.is_bound(i + 1)
                        && is_boundary_before(self.prev_kind(i, start))
                        && is_boundary_after(self.kind(i + 2).filter(|_| i + 2 < end))
                    {
                        let name = self.tokens[i + 1].text(self.src);
                        let method = if tok.kind == TokenKind::Incr { "increment" } else { "decrement" };
                        let text = format!("{}.{}(1)", name, method);
                        self.emit(i, i + 1, &text);
                        i += 2;
                    } else {
                        self.copy_token(i);
                        i += 1;
                    }
                }
                _ => {
                    self.copy_token(i);
                    i += 1;
                }
            }
        }
    }

    /// Returns the next token index to process.
    fn rewrite_bound_ident(&mut self, i: usize, start: usize, end: usize) -> usize {
        let name = self.tokens[i].text(self.src).to_string();
        let prev = self.prev_kind(i, start);
        let next = self.kind(i + 1).filter(|_| i + 1 < end);

        // Property names, static members, raw references, and prefix
        // increment targets outside statement position: never rewritten.
        if matches!(
            prev,
            Some(TokenKind::Dot)
                | Some(TokenKind::DoubleColon)
                | Some(TokenKind::Amp)
                | Some(TokenKind::Incr)
                | Some(TokenKind::Decr)
        ) {
            self.copy_token(i);
            return i + 1;
        }

        // Object literal keys.
        if matches!(prev, Some(TokenKind::LBrace) | Some(TokenKind::Comma))
            && next == Some(TokenKind::Colon)
        {
            self.copy_token(i);
            return i + 1;
        }

        match next {
            // Postfix increment/decrement at statement position.
            Some(TokenKind::Incr) | Some(TokenKind::Decr)
                if self.statement_context
                    && is_boundary_before(prev)
                    && is_boundary_after(self.kind(i + 2).filter(|_| i + 2 < end)) =>
            {
                let method = if next == Some(TokenKind::Incr) { "increment" } else { "decrement" };
                let text = format!("{}.{}(1)", name, method);
                self.emit(i, i + 1, &text);
                i + 2
            }
            // Expression-position ++/--: the parser handles these natively.
            Some(TokenKind::Incr) | Some(TokenKind::Decr) => {
                self.copy_token(i);
                i + 1
            }
            Some(TokenKind::Assign) => {
                let rhs_start = i + 2;
                let rhs_end = statement_end(self.tokens, rhs_start, end);
                if rhs_end <= rhs_start {
                    self.copy_token(i);
                    return i + 1;
                }
                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                let text = format!("{}.set({})", name, rhs);
                self.emit(i, rhs_end - 1, &text);
                rhs_end
            }
            Some(kind) if kind.is_assign() => {
                let rhs_start = i + 2;
                let rhs_end = statement_end(self.tokens, rhs_start, end);
                if rhs_end <= rhs_start {
                    self.copy_token(i);
                    return i + 1;
                }
                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                let op = compound_op(kind);
                let text = format!("{}.set({}.get() {} ({}))", name, name, op, rhs);
                self.emit(i, rhs_end - 1, &text);
                rhs_end
            }
            Some(TokenKind::LBracket) => self.rewrite_bracket(i, &name, end),
            // `x.prop = v` and `x.prop OP= v` are keyed updates; method
            // calls and property reads stay verbatim.
            Some(TokenKind::Dot) => {
                if self.kind(i + 2) == Some(TokenKind::Ident) {
                    if let Some(after) = self.kind(i + 3).filter(|_| i + 3 < end) {
                        if after.is_assign() {
                            let rhs_start = i + 4;
                            let rhs_end = statement_end(self.tokens, rhs_start, end);
                            if rhs_end > rhs_start {
                                let prop = self.tokens[i + 2].text(self.src).to_string();
                                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                                let text = if after == TokenKind::Assign {
                                    format!("{}.update('{}', {})", name, prop, rhs)
                                } else {
                                    format!(
                                        "{}.update('{}', {}.get().{} {} ({}))",
                                        name,
                                        prop,
                                        name,
                                        prop,
                                        compound_op(after),
                                        rhs
                                    )
                                };
                                self.emit(i, rhs_end - 1, &text);
                                return rhs_end;
                            }
                        }
                    }
                }
                self.copy_token(i);
                i + 1
            }
            // Access contexts and calls on the name: leave the read alone.
            Some(TokenKind::DoubleColon) | Some(TokenKind::LParen) => {
                self.copy_token(i);
                i + 1
            }
            _ => {
                let text = format!("{}.get()", name);
                self.emit(i, i, &text);
                i + 1
            }
        }
    }

    /// `x[] = v` → push, `x[k] = v` → update, `x[k] OP= v` → keyed compound;
    /// a plain index read stays verbatim.
    fn rewrite_bracket(&mut self, i: usize, name: &str, end: usize) -> usize {
        // Empty brackets: append form.
        if self.kind(i + 2) == Some(TokenKind::RBracket)
            && self.kind(i + 3) == Some(TokenKind::Assign)
        {
            let rhs_start = i + 4;
            let rhs_end = statement_end(self.tokens, rhs_start, end);
            if rhs_end > rhs_start {
                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                let text = format!("{}.push({})", name, rhs);
                self.emit(i, rhs_end - 1, &text);
                return rhs_end;
            }
        }

        let Some(close) = matching_bracket(self.tokens, i + 1, end) else {
            self.copy_token(i);
            return i + 1;
        };
        let after = self.kind(close + 1).filter(|_| close + 1 < end);
        match after {
            Some(TokenKind::Assign) => {
                let rhs_start = close + 2;
                let rhs_end = statement_end(self.tokens, rhs_start, end);
                if rhs_end <= rhs_start {
                    self.copy_token(i);
                    return i + 1;
                }
                let key = self.rewrite_subrange(i + 2, close);
                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                let text = format!("{}.update({}, {})", name, key, rhs);
                self.emit(i, rhs_end - 1, &text);
                rhs_end
            }
            Some(kind) if kind.is_assign() => {
                let rhs_start = close + 2;
                let rhs_end = statement_end(self.tokens, rhs_start, end);
                if rhs_end <= rhs_start {
                    self.copy_token(i);
                    return i + 1;
                }
                let key = self.rewrite_subrange(i + 2, close);
                let rhs = self.rewrite_subrange(rhs_start, rhs_end);
                let op = compound_op(kind);
                let text = format!(
                    "{}.update({}, {}.get()[{}] {} ({}))",
                    name, key, name, key, op, rhs
                );
                self.emit(i, rhs_end - 1, &text);
                rhs_end
            }
            // Plain index read: access context, untouched.
            _ => {
                self.copy_token(i);
                i + 1
            }
        }
    }

    fn rewrite_subrange(&self, start: usize, end: usize) -> String {
        if start >= end {
            return String::new();
        }
        let mut child = Rewriter {
            src: self.src,
            tokens: self.tokens,
            bound: self.bound,
            out: String::new(),
            changed: false,
            copied: self.tokens[start].start,
            statement_context: false,
        };
        child.rewrite_range(start, end);
        child.copy_gap(self.tokens[end - 1].end);
        child.out.trim().to_string()
    }
}

fn is_boundary_before(kind: Option<TokenKind>) -> bool {
    matches!(
        kind,
        None | Some(TokenKind::Semi) | Some(TokenKind::Newline) | Some(TokenKind::LBrace)
    )
}

fn is_boundary_after(kind: Option<TokenKind>) -> bool {
    matches!(
        kind,
        None | Some(TokenKind::Semi) | Some(TokenKind::Newline) | Some(TokenKind::RBrace)
    )
}

fn compound_op(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::PlusAssign | TokenKind::DotAssign => "+",
        TokenKind::MinusAssign => "-",
        TokenKind::StarAssign => "*",
        TokenKind::SlashAssign => "/",
        TokenKind::PercentAssign => "%",
        _ => "+",
    }
}

fn matching_bracket(tokens: &[Token], open: usize, end: usize) -> Option<usize> {
    let mut depth = 0i32;
    for index in open..end {
        match tokens[index].kind {
            TokenKind::LBracket => depth += 1,
            TokenKind::RBracket => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_postfix_increment() {
        let out = rewrite_source("count++", &bound(&["count"]));
        assert!(out.changed);
        assert_eq!(out.source, "count.increment(1)");
    }

    #[test]
    fn test_prefix_decrement() {
        let out = rewrite_source("--count", &bound(&["count"]));
        assert!(out.changed);
        assert_eq!(out.source, "count.decrement(1)");
    }

    #[test]
    fn test_plain_assignment_with_self_read() {
        let out = rewrite_source("count = count + 1", &bound(&["count"]));
        assert!(out.changed);
        assert_eq!(out.source, "count.set(count.get() + 1)");
    }

    #[test]
    fn test_compound_assignment() {
        let out = rewrite_source("count += step", &bound(&["count"]));
        assert_eq!(out.source, "count.set(count.get() + (step))");
    }

    #[test]
    fn test_concat_assignment_goes_through_plus() {
        let out = rewrite_source("name .= '!'", &bound(&["name"]));
        assert_eq!(out.source, "name.set(name.get() + ('!'))");
    }

    #[test]
    fn test_array_append() {
        let out = rewrite_source("items[] = 'x'", &bound(&["items"]));
        assert_eq!(out.source, "items.push('x')");
    }

    #[test]
    fn test_keyed_assignment() {
        let out = rewrite_source("user['name'] = other", &bound(&["user", "other"]));
        assert_eq!(out.source, "user.update('name', other.get())");
    }

    #[test]
    fn test_toggle_shape() {
        let out = rewrite_source("flag = !flag", &bound(&["flag"]));
        assert_eq!(out.source, "flag.set(!flag.get())");
    }

    #[test]
    fn test_method_call_is_access_context() {
        let out = rewrite_source("items.push(count)", &bound(&["items", "count"]));
        assert!(out.changed);
        assert_eq!(out.source, "items.push(count.get())");
    }

    #[test]
    fn test_raw_reference_not_rewritten() {
        let out = rewrite_source("track(&count)", &bound(&["count"]));
        assert!(!out.changed);
        assert_eq!(out.source, "track(&count)");
    }

    #[test]
    fn test_unchanged_input_is_flagged() {
        let out = rewrite_source("helper()", &bound(&["count"]));
        assert!(!out.changed);
        assert_eq!(out.source, "helper()");
    }

    #[test]
    fn test_body_isolation_keeps_header() {
        let out = rewrite_source("action inc(step) { count += step }", &bound(&["count"]));
        assert!(out.changed);
        assert_eq!(
            out.source,
            "action inc(step) { count.set(count.get() + (step)) }"
        );
    }

    #[test]
    fn test_multiple_statements_in_source_order() {
        let out = rewrite_source(
            "count++\nitems[] = count",
            &bound(&["count", "items"]),
        );
        assert_eq!(out.source, "count.increment(1)\nitems.push(count.get())");
    }

    #[test]
    fn test_index_read_is_untouched() {
        let out = rewrite_source("total = items[0]", &bound(&["total", "items"]));
        assert_eq!(out.source, "total.set(items[0])");
    }

    #[test]
    fn test_object_literal_keys_survive() {
        let out = rewrite_source("user = { count: count }", &bound(&["user", "count"]));
        assert_eq!(out.source, "user.set({ count: count.get() })");
    }
}
