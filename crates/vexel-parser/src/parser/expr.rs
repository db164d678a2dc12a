//! Expression parsing: precedence climbing plus Vexel's sigil forms.

use vexel_common::diag::CompileError;
use vexel_common::span::Span;
use vexel_common::token::{Token, TokenKind};
use vexel_lexer::{unescape_char, unescape_string};

use crate::ast::expr::{BinOp, Expr, ExprKind, UnOp};
use crate::ast::{Stmt, StmtKind};
use crate::ast::types::{Prim, TypeAnn, TypeAnnKind};

use super::Parser;

/// Binding power of a binary operator. Higher binds tighter. Range,
/// ternary, assignment, and iteration live above this table.
fn binop_of(kind: TokenKind) -> Option<(BinOp, u8)> {
    use TokenKind::*;
    Some(match kind {
        PipePipe => (BinOp::Or, 1),
        AmpAmp => (BinOp::And, 2),
        EqEq => (BinOp::Eq, 3),
        Ne => (BinOp::Ne, 3),
        Lt => (BinOp::Lt, 3),
        Le => (BinOp::Le, 3),
        Gt => (BinOp::Gt, 3),
        Ge => (BinOp::Ge, 3),
        Pipe => (BinOp::BitOr, 4),
        CaretCaret => (BinOp::BitXor, 5),
        Amp => (BinOp::BitAnd, 6),
        Shl => (BinOp::Shl, 7),
        Shr => (BinOp::Shr, 7),
        Plus => (BinOp::Add, 8),
        Minus => (BinOp::Sub, 8),
        Star => (BinOp::Mul, 9),
        Slash => (BinOp::Div, 9),
        Percent => (BinOp::Rem, 9),
        _ => return None,
    })
}

impl<'src, 'ids> Parser<'src, 'ids> {
    pub(crate) fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_iterate(true)
    }

    /// Expression with the *top-level* ternary disabled, so a statement
    /// context can claim the `?` for a conditional statement.
    pub(crate) fn parse_expr_no_ternary(&mut self) -> Result<Expr, CompileError> {
        self.parse_iterate(false)
    }

    /// `head @ body` / `head @@ body`. Parsed as iteration; the checker
    /// reclassifies a boolean head as a repeat loop.
    fn parse_iterate(&mut self, allow_ternary: bool) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let mut expr = self.parse_assign(allow_ternary)?;
        loop {
            let sorted = match self.peek().kind {
                TokenKind::At => false,
                TokenKind::AtAt => true,
                _ => break,
            };
            self.advance();
            let body = self.parse_assign(true)?;
            let id = self.mint();
            expr = Expr::new(
                id,
                self.span_from(start),
                ExprKind::Iterate { iterable: Box::new(expr), body: Box::new(body), sorted },
            );
        }
        Ok(expr)
    }

    /// Right-associative assignment.
    fn parse_assign(&mut self, allow_ternary: bool) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let target = self.parse_ternary(allow_ternary)?;
        if !self.eat(TokenKind::Eq) {
            return Ok(target);
        }
        let value = self.parse_assign(true)?;
        let id = self.mint();
        Ok(Expr::new(
            id,
            self.span_from(start),
            ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
        ))
    }

    fn parse_ternary(&mut self, allow_ternary: bool) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let cond = self.parse_range()?;
        if !allow_ternary || !self.at(TokenKind::Question) {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_ternary(true)?;
        self.expect(TokenKind::Colon, "`:` in conditional expression")?;
        let alt = self.parse_ternary(true)?;
        let id = self.mint();
        Ok(Expr::new(
            id,
            self.span_from(start),
            ExprKind::Conditional { cond: Box::new(cond), then: Box::new(then), alt: Box::new(alt) },
        ))
    }

    /// Speculative continuation after a consumed `?`: returns the ternary
    /// expression if a `:` materializes, `None` if this is really a
    /// conditional statement. The caller rewinds on `None`.
    pub(crate) fn try_parse_ternary_tail(&mut self, cond: &Expr) -> Result<Option<Expr>, CompileError> {
        let Ok(then) = self.parse_ternary(true) else {
            return Ok(None);
        };
        if !self.eat(TokenKind::Colon) {
            return Ok(None);
        }
        let alt = self.parse_ternary(true)?;
        let id = self.mint();
        let span = cond.span.merge(alt.span);
        Ok(Some(Expr::new(
            id,
            span,
            ExprKind::Conditional {
                cond: Box::new(cond.clone()),
                then: Box::new(then),
                alt: Box::new(alt),
            },
        )))
    }

    fn parse_range(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let lo = self.parse_binary(0)?;
        if !self.eat(TokenKind::DotDot) {
            return Ok(lo);
        }
        let hi = self.parse_binary(0)?;
        let id = self.mint();
        Ok(Expr::new(
            id,
            self.span_from(start),
            ExprKind::Range { lo: Box::new(lo), hi: Box::new(hi) },
        ))
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let mut lhs = self.parse_unary()?;
        while let Some((op, bp)) = binop_of(self.peek().kind) {
            if bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(bp + 1)?;
            let id = self.mint();
            lhs = Expr::new(
                id,
                self.span_from(start),
                ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            // `%"path"`: compile-time resource embed.
            TokenKind::Percent if self.nth(1).kind == TokenKind::Str => {
                self.advance();
                let token = self.advance();
                let path = self.string_body(token)?;
                let id = self.mint();
                return Ok(Expr::new(id, self.span_from(start), ExprKind::Resource(path)));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let id = self.mint();
            return Ok(Expr::new(
                id,
                self.span_from(start),
                ExprKind::Unary { op, operand: Box::new(operand) },
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "`]` after index")?;
                let id = self.mint();
                expr = Expr::new(
                    id,
                    self.span_from(start),
                    ExprKind::Index { base: Box::new(expr), index: Box::new(index) },
                );
            } else if self.at(TokenKind::Dot) {
                self.advance();
                let field = self.expect(TokenKind::Ident, "member name")?;
                let field = self.text(field).to_string();
                if self.at(TokenKind::LParen) {
                    // Method call: the base becomes the receiver list.
                    let receivers = match expr.kind {
                        ExprKind::TupleLit(elems) => elems,
                        _ => vec![expr],
                    };
                    let args = self.parse_call_args()?;
                    let id = self.mint();
                    expr = Expr::new(
                        id,
                        self.span_from(start),
                        ExprKind::Call { callee: field, receivers, args },
                    );
                } else {
                    let id = self.mint();
                    expr = Expr::new(
                        id,
                        self.span_from(start),
                        ExprKind::Member { base: Box::new(expr), field },
                    );
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        use TokenKind::*;
        match self.peek().kind {
            Int => self.parse_int_literal(),
            Float => {
                let token = self.advance();
                let value: f64 = self
                    .text(token)
                    .parse()
                    .map_err(|_| CompileError::new("invalid float literal", token.span))?;
                let id = self.mint();
                Ok(Expr::new(id, token.span, ExprKind::Float(value)))
            }
            Str => {
                let token = self.advance();
                let body = self.string_body(token)?;
                let id = self.mint();
                Ok(Expr::new(id, token.span, ExprKind::Str(body)))
            }
            Char => {
                let token = self.advance();
                let text = self.text(token);
                let body = &text[1..text.len() - 1];
                let value = unescape_char(body)
                    .map_err(|e| CompileError::new(e.to_string(), token.span))?;
                let id = self.mint();
                Ok(Expr::new(id, token.span, ExprKind::Char(value)))
            }
            Process => {
                let token = self.advance();
                let text = self.text(token);
                let cmd = text[1..text.len() - 1].to_string();
                let id = self.mint();
                Ok(Expr::new(id, token.span, ExprKind::Process(cmd)))
            }
            Ident => {
                let token = self.advance();
                let name = self.text(token).to_string();
                if self.at(LParen) {
                    let args = self.parse_call_args()?;
                    let id = self.mint();
                    Ok(Expr::new(
                        id,
                        self.span_from(start),
                        ExprKind::Call { callee: name, receivers: Vec::new(), args },
                    ))
                } else {
                    let id = self.mint();
                    Ok(Expr::new(id, token.span, ExprKind::Ident(name)))
                }
            }
            LParen => {
                self.advance();
                let first = self.parse_expr()?;
                if self.at(Comma) {
                    let mut elems = vec![first];
                    while self.eat(Comma) {
                        elems.push(self.parse_expr()?);
                    }
                    self.expect(RParen, "`)` after tuple")?;
                    let id = self.mint();
                    Ok(Expr::new(id, self.span_from(start), ExprKind::TupleLit(elems)))
                } else {
                    self.expect(RParen, "`)` after expression")?;
                    Ok(first)
                }
            }
            LBracket => {
                self.advance();
                let mut elems = Vec::new();
                while !self.at(RBracket) {
                    elems.push(self.parse_expr()?);
                    if !self.eat(Comma) {
                        break;
                    }
                }
                self.expect(RBracket, "`]` after array literal")?;
                let id = self.mint();
                Ok(Expr::new(id, self.span_from(start), ExprKind::ArrayLit(elems)))
            }
            LBrace => self.parse_block(),
            Hash => self.parse_cast_or_namespaced_call(),
            Pipe => {
                self.advance();
                // Tight binding inside the bars so the closing `|` is not
                // mistaken for bitwise or.
                let operand = self.parse_binary(5)?;
                self.expect(Pipe, "`|` closing length expression")?;
                let id = self.mint();
                Ok(Expr::new(id, self.span_from(start), ExprKind::Length(Box::new(operand))))
            }
            Error => Err(self.error_here("unexpected character".into())),
            _ => Err(self.error_here("expected expression".into())),
        }
    }

    /// `#T::f(args)` namespaced call, or `#type(expr)` cast.
    fn parse_cast_or_namespaced_call(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        self.advance(); // `#`
        let ann = self.parse_type_ann_body()?;
        if self.at(TokenKind::ColonColon) {
            let TypeAnnKind::Named(ns) = &ann.kind else {
                return Err(self.error_here("array types have no methods".into()));
            };
            let ns = ns.clone();
            self.advance();
            let name = self.parse_func_name_token()?;
            let args = self.parse_call_args()?;
            let id = self.mint();
            return Ok(Expr::new(
                id,
                self.span_from(start),
                ExprKind::Call { callee: format!("{ns}::{name}"), receivers: Vec::new(), args },
            ));
        }
        self.expect(TokenKind::LParen, "`(` after cast target")?;
        let operand = self.parse_expr()?;
        self.expect(TokenKind::RParen, "`)` after cast operand")?;
        let id = self.mint();
        Ok(Expr::new(
            id,
            self.span_from(start),
            ExprKind::Cast { target: ann, operand: Box::new(operand) },
        ))
    }

    fn parse_func_name_token(&mut self) -> Result<String, CompileError> {
        let token = self.peek();
        if token.kind == TokenKind::Ident {
            self.advance();
            return Ok(self.text(token).to_string());
        }
        Err(self.error_here("expected function name".into()))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(TokenKind::LParen, "`(` before arguments")?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)` after arguments")?;
        Ok(args)
    }

    // ── Blocks ─────────────────────────────────────────────────────────

    /// `{ stmt* tail-expr? }`
    pub(crate) fn parse_block(&mut self) -> Result<Expr, CompileError> {
        let start = self.peek().span;
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        let mut tail = None;
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.error_here("unterminated block".into()));
            }
            if self.at_statement_start() {
                stmts.push(self.parse_statement()?);
                continue;
            }
            if let Some(stmt) = self.parse_multi_assign()? {
                stmts.push(stmt);
                continue;
            }
            let head = self.parse_expr_no_ternary()?;
            if self.at(TokenKind::Question) {
                let checkpoint = self.checkpoint();
                self.advance();
                if let Some(expr) = self.try_parse_ternary_tail(&head)? {
                    if self.eat(TokenKind::Semi) {
                        let id = self.mint();
                        stmts.push(Stmt::new(id, expr.span, StmtKind::Expr(expr)));
                        continue;
                    }
                    tail = Some(Box::new(expr));
                    break;
                }
                self.rewind(checkpoint);
                self.advance(); // `?`
                let then = self.parse_statement()?;
                let id = self.mint();
                let span = head.span.merge(then.span);
                stmts.push(Stmt::new(
                    id,
                    span,
                    StmtKind::CondStmt { cond: head, then: Box::new(then) },
                ));
                continue;
            }
            if self.eat(TokenKind::Semi) {
                let id = self.mint();
                let span = head.span;
                stmts.push(Stmt::new(id, span, StmtKind::Expr(head)));
                continue;
            }
            tail = Some(Box::new(head));
            break;
        }
        self.expect(TokenKind::RBrace, "`}` closing block")?;
        let id = self.mint();
        Ok(Expr::new(id, self.span_from(start), ExprKind::Block { stmts, tail }))
    }

    /// Tokens that unambiguously begin a non-expression statement.
    fn at_statement_start(&self) -> bool {
        use TokenKind::*;
        match self.peek().kind {
            ColonColon | FatArrow | Shl | Shr | Amp => true,
            Hash => self.nth(1).kind == Ident && self.nth(2).kind == LBrace,
            Tilde => self.nth(1).kind == Ident || self.nth(1).kind == Caret,
            Caret => self.nth(1).kind == Ident,
            Bang => self.nth(1).kind == Ident && self.nth(2).kind == Colon,
            Ident => self.nth(1).kind == Colon,
            LBracket => self.at_annotation_start(),
            _ => false,
        }
    }

    pub(crate) fn at_annotation_start(&self) -> bool {
        use TokenKind::*;
        self.at(LBracket)
            && self.nth(1).kind == LBracket
            && self.nth(2).kind == Ident
            && match self.nth(3).kind {
                LParen => true,
                RBracket => self.nth(4).kind == RBracket,
                _ => false,
            }
    }

    // ── Types ──────────────────────────────────────────────────────────

    /// `#name` or `#elem[size]…`, with the leading `#` expected.
    pub(crate) fn parse_type_ann(&mut self) -> Result<TypeAnn, CompileError> {
        self.expect(TokenKind::Hash, "`#` before type")?;
        self.parse_type_ann_body()
    }

    /// A type annotation after the `#` has been consumed.
    fn parse_type_ann_body(&mut self) -> Result<TypeAnn, CompileError> {
        let start = self.peek().span;
        let name = self.expect(TokenKind::Ident, "type name")?;
        let name = self.text(name).to_string();
        let mut ann = TypeAnn { span: start, kind: TypeAnnKind::Named(name) };
        while self.at(TokenKind::LBracket) && self.nth(1).kind != TokenKind::LBracket {
            self.advance();
            let size = self.parse_expr()?;
            self.expect(TokenKind::RBracket, "`]` after array size")?;
            ann = TypeAnn {
                span: self.span_from(start),
                kind: TypeAnnKind::Array(Box::new(ann), Box::new(size)),
            };
        }
        Ok(ann)
    }

    // ── Literal helpers ────────────────────────────────────────────────

    fn parse_int_literal(&mut self) -> Result<Expr, CompileError> {
        let token = self.advance();
        let text = self.text(token);
        let (value, suffix) = parse_int_text(text)
            .ok_or_else(|| CompileError::new(format!("invalid integer literal `{text}`"), token.span))?;
        let id = self.mint();
        Ok(Expr::new(id, token.span, ExprKind::Int { value, suffix }))
    }

    fn string_body(&self, token: Token) -> Result<String, CompileError> {
        let text = self.text(token);
        let body = &text[1..text.len() - 1];
        unescape_string(body).map_err(|e| {
            let at = token.span.start + 1 + e.offset as u32;
            CompileError::new(e.to_string(), Span::new(token.span.file, at, at + 1))
        })
    }
}

/// Split an integer literal into magnitude and optional width suffix.
/// Handles `255`, `0xFF`, `1u8`, `0xFFu16`.
fn parse_int_text(text: &str) -> Option<(u64, Option<Prim>)> {
    let (digits, radix, rest) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let end = hex.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(hex.len());
        (&hex[..end], 16, &hex[end..])
    } else {
        let end = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
        (&text[..end], 10, &text[end..])
    };
    if digits.is_empty() {
        return None;
    }
    let value = u64::from_str_radix(digits, radix).ok()?;
    if rest.is_empty() {
        return Some((value, None));
    }
    let suffix = Prim::from_name(rest)?;
    if !suffix.is_integer() || suffix.width() == 0 {
        return None;
    }
    Some((value, Some(suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_text_forms() {
        assert_eq!(parse_int_text("255"), Some((255, None)));
        assert_eq!(parse_int_text("0xFF"), Some((255, None)));
        assert_eq!(parse_int_text("1u8"), Some((1, Some(Prim::Unsigned(8)))));
        assert_eq!(parse_int_text("0x10u16"), Some((16, Some(Prim::Unsigned(16)))));
        assert_eq!(parse_int_text("3i16"), Some((3, Some(Prim::Signed(16)))));
        assert_eq!(parse_int_text("1q8"), None);
        assert_eq!(parse_int_text("1f32"), None);
    }
}
