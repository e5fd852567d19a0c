//! Structural parser for the Veil template script.
//!
//! Produces the tree walked by the expression compiler and the trace
//! evaluator. The grammar is expression-oriented: statements are assignment
//! forms plus bare expressions, separated by semicolons or newlines at
//! bracket depth zero. A `(`/`[` after a newline never continues the
//! previous expression; a `.` does, so method chains may wrap.

use crate::lexer::{tokenize, Token, TokenKind};

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Ident(String),
    /// `&name` — the cell itself, not its value.
    RawRef(String),
    /// `Name::member`.
    StaticPath(String, String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    PreIncr(String),
    PreDecr(String),
    PostIncr(String),
    PostDecr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `.=` string append; compiles through `+`.
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Ident(String),
    /// `x[k]`.
    Key(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign { target: AssignTarget, op: AssignOp, value: Expr },
    /// `x[] = v`.
    Append { target: String, value: Expr },
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_expression(src: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(src)?;
    parser.skip_separators();
    let expr = parser.parse_ternary()?;
    parser.skip_separators();
    if let Some(tok) = parser.peek_raw() {
        return Err(format!(
            "unexpected '{}' after expression",
            tok.text(&parser.src)
        ));
    }
    Ok(expr)
}

pub fn parse_statements(src: &str) -> Result<Vec<Stmt>, String> {
    let mut parser = Parser::new(src)?;
    let mut statements = Vec::new();
    parser.skip_separators();
    while parser.peek_raw().is_some() {
        statements.push(parser.parse_statement()?);
        match parser.peek_raw() {
            None => break,
            Some(tok) if matches!(tok.kind, TokenKind::Semi | TokenKind::Newline) => {
                parser.skip_separators()
            }
            Some(tok) => {
                return Err(format!(
                    "unexpected '{}' after statement",
                    tok.text(&parser.src)
                ));
            }
        }
    }
    Ok(statements)
}

struct Parser {
    src: String,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, String> {
        Ok(Parser {
            src: src.to_string(),
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek_raw(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek(&self) -> Option<Token> {
        let mut i = self.pos;
        while let Some(tok) = self.tokens.get(i) {
            if tok.kind != TokenKind::Newline {
                return Some(*tok);
            }
            i += 1;
        }
        None
    }

    fn bump(&mut self) -> Option<Token> {
        while let Some(tok) = self.tokens.get(self.pos) {
            self.pos += 1;
            if tok.kind != TokenKind::Newline {
                return Some(*tok);
            }
        }
        None
    }

    fn skip_separators(&mut self) {
        while let Some(tok) = self.tokens.get(self.pos) {
            if tok.kind == TokenKind::Newline || tok.kind == TokenKind::Semi {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, String> {
        match self.bump() {
            Some(tok) if tok.kind == kind => Ok(tok),
            Some(tok) => Err(format!(
                "expected {} but found '{}'",
                what,
                tok.text(&self.src)
            )),
            None => Err(format!("expected {} but reached end of input", what)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, String> {
        let tok = self.expect(TokenKind::Ident, what)?;
        Ok(tok.text(&self.src).to_string())
    }

    // ── statements ────────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        let save = self.pos;
        if let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Ident {
                let name = tok.text(&self.src).to_string();
                self.bump();
                if let Some(next) = self.peek_raw() {
                    if next.kind.is_assign() {
                        self.bump();
                        let value = self.parse_ternary()?;
                        return Ok(Stmt::Assign {
                            target: AssignTarget::Ident(name),
                            op: assign_op(next.kind),
                            value,
                        });
                    }
                    if next.kind == TokenKind::LBracket {
                        if let Some(stmt) = self.try_parse_bracket_assign(&name)? {
                            return Ok(stmt);
                        }
                    }
                }
                self.pos = save;
            }
        }
        let expr = self.parse_ternary()?;
        Ok(Stmt::Expr(expr))
    }

    /// `x[] = v` or `x[k] = v`; resets and returns None when the brackets
    /// turn out to be a plain index read.
    fn try_parse_bracket_assign(&mut self, name: &str) -> Result<Option<Stmt>, String> {
        let save = self.pos;
        self.bump(); // [
        if self.peek().map(|t| t.kind) == Some(TokenKind::RBracket) {
            self.bump();
            if self.peek_raw().map(|t| t.kind) == Some(TokenKind::Assign) {
                self.bump();
                let value = self.parse_ternary()?;
                return Ok(Some(Stmt::Append { target: name.to_string(), value }));
            }
            self.pos = save;
            return Ok(None);
        }
        let key = match self.parse_ternary() {
            Ok(expr) => expr,
            Err(_) => {
                self.pos = save;
                return Ok(None);
            }
        };
        if self.peek().map(|t| t.kind) != Some(TokenKind::RBracket) {
            self.pos = save;
            return Ok(None);
        }
        self.bump();
        if let Some(next) = self.peek_raw() {
            if next.kind.is_assign() {
                self.bump();
                let value = self.parse_ternary()?;
                return Ok(Some(Stmt::Assign {
                    target: AssignTarget::Key(name.to_string(), key),
                    op: assign_op(next.kind),
                    value,
                }));
            }
        }
        self.pos = save;
        Ok(None)
    }

    // ── expressions ───────────────────────────────────────────────────────

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let condition = self.parse_binary(0)?;
        if self.peek().map(|t| t.kind) == Some(TokenKind::Question) {
            self.bump();
            let consequent = self.parse_ternary()?;
            self.expect(TokenKind::Colon, "':' in ternary")?;
            let alternate = self.parse_ternary()?;
            return Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(consequent),
                Box::new(alternate),
            ));
        }
        Ok(condition)
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        while let Some(tok) = self.peek() {
            let (bp, op) = match tok.kind {
                TokenKind::Coalesce => (1, BinaryOp::Coalesce),
                TokenKind::OrOr => (2, BinaryOp::Or),
                TokenKind::AndAnd => (3, BinaryOp::And),
                TokenKind::EqEq => (4, BinaryOp::Eq),
                TokenKind::NotEq => (4, BinaryOp::Ne),
                TokenKind::EqEqEq => (4, BinaryOp::StrictEq),
                TokenKind::NotEqEq => (4, BinaryOp::StrictNe),
                TokenKind::Lt => (5, BinaryOp::Lt),
                TokenKind::Le => (5, BinaryOp::Le),
                TokenKind::Gt => (5, BinaryOp::Gt),
                TokenKind::Ge => (5, BinaryOp::Ge),
                TokenKind::Plus => (6, BinaryOp::Add),
                TokenKind::Minus => (6, BinaryOp::Sub),
                TokenKind::Star => (7, BinaryOp::Mul),
                TokenKind::Slash => (7, BinaryOp::Div),
                TokenKind::Percent => (7, BinaryOp::Mod),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::Not) => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Minus) => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Plus) => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Incr) => {
                self.bump();
                let name = self.expect_ident("identifier after '++'")?;
                Ok(Expr::PreIncr(name))
            }
            Some(TokenKind::Decr) => {
                self.bump();
                let name = self.expect_ident("identifier after '--'")?;
                Ok(Expr::PreDecr(name))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            let Some(tok) = self.peek_raw() else { break };
            match tok.kind {
                TokenKind::Newline => {
                    // Only a `.` continues across a line break.
                    if self.peek().map(|t| t.kind) == Some(TokenKind::Dot) {
                        self.skip_newlines_only();
                        continue;
                    }
                    break;
                }
                TokenKind::Dot => {
                    self.bump();
                    let name = self.expect_ident("property name after '.'")?;
                    if self.peek_raw().map(|t| t.kind) == Some(TokenKind::LParen) {
                        let args = self.parse_arguments()?;
                        expr = Expr::MethodCall(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                }
                TokenKind::DoubleColon => {
                    let Expr::Ident(base) = expr else {
                        return Err("'::' requires a plain name on its left".to_string());
                    };
                    self.bump();
                    let member = self.expect_ident("member name after '::'")?;
                    expr = Expr::StaticPath(base, member);
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_ternary()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                TokenKind::Incr | TokenKind::Decr => {
                    let Expr::Ident(name) = &expr else { break };
                    let name = name.clone();
                    self.bump();
                    expr = if tok.kind == TokenKind::Incr {
                        Expr::PostIncr(name)
                    } else {
                        Expr::PostDecr(name)
                    };
                    break;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn skip_newlines_only(&mut self) {
        while self.peek_raw().map(|t| t.kind) == Some(TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        loop {
            if self.peek().map(|t| t.kind) == Some(TokenKind::RParen) {
                self.bump();
                break;
            }
            args.push(self.parse_ternary()?);
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::Comma) => {
                    self.bump();
                }
                Some(TokenKind::RParen) => {
                    self.bump();
                    break;
                }
                _ => return Err("expected ',' or ')' in argument list".to_string()),
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let Some(tok) = self.peek() else {
            return Err("unexpected end of input".to_string());
        };
        match tok.kind {
            TokenKind::Number => {
                self.bump();
                let text = tok.text(&self.src);
                text.parse::<f64>()
                    .map(Expr::Number)
                    .map_err(|_| format!("invalid number '{}'", text))
            }
            TokenKind::Str => {
                self.bump();
                let raw = tok.text(&self.src);
                Ok(Expr::Str(unescape_string(&raw[1..raw.len() - 1])))
            }
            TokenKind::Ident => {
                self.bump();
                match tok.text(&self.src) {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    "null" => Ok(Expr::Null),
                    name => Ok(Expr::Ident(name.to_string())),
                }
            }
            TokenKind::Amp => {
                self.bump();
                let name = self.expect_ident("identifier after '&'")?;
                Ok(Expr::RawRef(name))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_ternary()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                loop {
                    if self.peek().map(|t| t.kind) == Some(TokenKind::RBracket) {
                        self.bump();
                        break;
                    }
                    items.push(self.parse_ternary()?);
                    match self.peek().map(|t| t.kind) {
                        Some(TokenKind::Comma) => {
                            self.bump();
                        }
                        Some(TokenKind::RBracket) => {
                            self.bump();
                            break;
                        }
                        _ => return Err("expected ',' or ']' in array literal".to_string()),
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::LBrace => {
                self.bump();
                let mut fields = Vec::new();
                loop {
                    if self.peek().map(|t| t.kind) == Some(TokenKind::RBrace) {
                        self.bump();
                        break;
                    }
                    let key_tok = self.bump().ok_or("unexpected end in object literal")?;
                    let key = match key_tok.kind {
                        TokenKind::Ident => key_tok.text(&self.src).to_string(),
                        TokenKind::Str => {
                            let raw = key_tok.text(&self.src);
                            unescape_string(&raw[1..raw.len() - 1])
                        }
                        _ => return Err("expected key in object literal".to_string()),
                    };
                    self.expect(TokenKind::Colon, "':' in object literal")?;
                    fields.push((key, self.parse_ternary()?));
                    match self.peek().map(|t| t.kind) {
                        Some(TokenKind::Comma) => {
                            self.bump();
                        }
                        Some(TokenKind::RBrace) => {
                            self.bump();
                            break;
                        }
                        _ => return Err("expected ',' or '}' in object literal".to_string()),
                    }
                }
                Ok(Expr::Object(fields))
            }
            _ => Err(format!("unexpected '{}'", tok.text(&self.src))),
        }
    }
}

fn assign_op(kind: TokenKind) -> AssignOp {
    match kind {
        TokenKind::PlusAssign => AssignOp::Add,
        TokenKind::MinusAssign => AssignOp::Sub,
        TokenKind::StarAssign => AssignOp::Mul,
        TokenKind::SlashAssign => AssignOp::Div,
        TokenKind::PercentAssign => AssignOp::Mod,
        TokenKind::DotAssign => AssignOp::Concat,
        _ => AssignOp::Set,
    }
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    result
}
