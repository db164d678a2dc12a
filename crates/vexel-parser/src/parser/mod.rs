//! Recursive-descent parser for Vexel.
//!
//! The parser is fail-fast: the first syntax error aborts the module with a
//! located [`CompileError`], matching the pipeline's no-recovery contract.

mod expr;

use vexel_common::diag::CompileError;
use vexel_common::span::{FileId, Span};
use vexel_common::token::{Token, TokenKind};
use vexel_lexer::Lexer;

use crate::ast::stmt::{Annotation, Field, FuncDecl, Linkage, Param, TypeDecl, VarDecl};
use crate::ast::{Expr, ExprKind, Module, NodeId, NodeIds, Stmt, StmtKind};

/// Parse one source file into a [`Module`].
///
/// `ids` is the program-wide node-id source so that every node in a
/// multi-module program gets a unique id.
pub fn parse(file: FileId, source: &str, ids: &mut NodeIds) -> Result<Module, CompileError> {
    let tokens = Lexer::tokenize(file, source);
    let mut parser = Parser { tokens, pos: 0, source, file, ids };
    parser.parse_module()
}

pub(crate) struct Parser<'src, 'ids> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'src str,
    file: FileId,
    ids: &'ids mut NodeIds,
}

impl<'src, 'ids> Parser<'src, 'ids> {
    // ── Token plumbing ─────────────────────────────────────────────────

    pub(crate) fn peek(&self) -> Token {
        self.nth(0)
    }

    pub(crate) fn nth(&self, n: usize) -> Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        self.tokens[idx]
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    pub(crate) fn text(&self, token: Token) -> &'src str {
        &self.source[token.span.start as usize..token.span.end as usize]
    }

    pub(crate) fn mint(&mut self) -> NodeId {
        self.ids.mint()
    }

    pub(crate) fn error_here(&self, message: String) -> CompileError {
        let token = self.peek();
        let message = match token.kind {
            TokenKind::Eof => format!("{message}, found end of file"),
            TokenKind::Error => "unexpected character".to_string(),
            _ => format!("{message}, found `{}`", self.text(token)),
        };
        CompileError::new(message, token.span)
    }

    /// Save/restore point for the one place the grammar needs backtracking
    /// (ternary expression vs. conditional statement after `?`).
    pub(crate) fn checkpoint(&self) -> usize {
        self.pos
    }

    pub(crate) fn rewind(&mut self, checkpoint: usize) {
        self.pos = checkpoint;
    }

    pub(crate) fn span_from(&self, start: Span) -> Span {
        let end = if self.pos > 0 { self.tokens[self.pos - 1].span.end } else { start.end };
        Span::new(self.file, start.start, end.max(start.start))
    }

    // ── Module & statements ────────────────────────────────────────────

    fn parse_module(&mut self) -> Result<Module, CompileError> {
        let mut statements = Vec::new();
        while !self.at(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        Ok(Module { statements })
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        let annotations = self.parse_annotations()?;
        let mut stmt = self.parse_bare_statement()?;
        stmt.annotations = annotations;
        Ok(stmt)
    }

    fn parse_bare_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        use TokenKind::*;
        match self.peek().kind {
            ColonColon => self.parse_import(),
            FatArrow => {
                self.advance();
                let value = if self.at(Semi) { None } else { Some(self.parse_expr()?) };
                self.expect(Semi, "`;` after return")?;
                let id = self.mint();
                Ok(Stmt::new(id, self.span_from(start), StmtKind::Return(value)))
            }
            Shl => {
                self.advance();
                self.expect(Semi, "`;` after break")?;
                let id = self.mint();
                Ok(Stmt::new(id, self.span_from(start), StmtKind::Break))
            }
            Shr => {
                self.advance();
                self.expect(Semi, "`;` after continue")?;
                let id = self.mint();
                Ok(Stmt::new(id, self.span_from(start), StmtKind::Continue))
            }
            Amp => self.parse_func_decl(),
            Hash if self.nth(1).kind == Ident && self.nth(2).kind == LBrace => {
                self.parse_type_decl()
            }
            Tilde if self.nth(1).kind == Ident || self.nth(1).kind == Caret => {
                self.parse_var_decl(true)
            }
            Caret if self.nth(1).kind == Ident => self.parse_var_decl(false),
            Bang if self.nth(1).kind == Ident && self.nth(2).kind == Colon => {
                self.parse_var_decl(false)
            }
            Ident if self.nth(1).kind == Colon => self.parse_var_decl(false),
            _ => self.parse_expr_or_cond_statement(),
        }
    }

    /// `::a::b;`
    fn parse_import(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        let mut segments = Vec::new();
        while self.eat(TokenKind::ColonColon) {
            let name = self.expect(TokenKind::Ident, "module path segment")?;
            segments.push(self.text(name).to_string());
        }
        self.expect(TokenKind::Semi, "`;` after import")?;
        let id = self.mint();
        Ok(Stmt::new(id, self.span_from(start), StmtKind::Import { segments }))
    }

    /// `~`? (`^` | `!`)? name (`:` type)? (`=` init)? `;`
    fn parse_var_decl(&mut self, mutable: bool) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        if mutable {
            self.advance(); // `~`
        }
        let linkage = if self.eat(TokenKind::Caret) {
            Linkage::Exported
        } else if self.eat(TokenKind::Bang) {
            Linkage::External
        } else {
            Linkage::Normal
        };
        let name = self.expect(TokenKind::Ident, "variable name")?;
        let name = self.text(name).to_string();
        let ty = if self.eat(TokenKind::Colon) { Some(self.parse_type_ann()?) } else { None };
        let init = if self.eat(TokenKind::Eq) { Some(self.parse_expr()?) } else { None };
        self.expect(TokenKind::Semi, "`;` after declaration")?;
        let id = self.mint();
        Ok(Stmt::new(
            id,
            self.span_from(start),
            StmtKind::VarDecl(VarDecl { name, ty, init, mutable, linkage }),
        ))
    }

    /// `#Name { field: #type, … }`
    fn parse_type_decl(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.advance(); // `#`
        let name = self.expect(TokenKind::Ident, "type name")?;
        let name = self.text(name).to_string();
        self.expect(TokenKind::LBrace, "`{` after type name")?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let field_start = self.peek().span;
            let field_name = self.expect(TokenKind::Ident, "field name")?;
            let field_name = self.text(field_name).to_string();
            self.expect(TokenKind::Colon, "`:` after field name")?;
            let ty = self.parse_type_ann()?;
            let id = self.mint();
            fields.push(Field { id, span: self.span_from(field_start), name: field_name, ty });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "`}` after fields")?;
        let id = self.mint();
        Ok(Stmt::new(id, self.span_from(start), StmtKind::TypeDecl(TypeDecl { name, fields })))
    }

    /// `&` flags receivers? namespace? name `(params)` ret? (block | `;`)
    fn parse_func_decl(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;
        self.advance(); // `&`
        let exported = self.eat(TokenKind::Caret);
        let external = !exported && self.eat(TokenKind::Bang);

        let receivers = if self.at(TokenKind::LParen) {
            self.advance();
            let list = self.parse_param_list(TokenKind::RParen)?;
            self.expect(TokenKind::RParen, "`)` after receivers")?;
            list
        } else {
            Vec::new()
        };

        let type_ns = if self.eat(TokenKind::Hash) {
            let ns = self.expect(TokenKind::Ident, "type name after `#`")?;
            let ns = self.text(ns).to_string();
            self.expect(TokenKind::ColonColon, "`::` after method type")?;
            Some(ns)
        } else {
            None
        };

        let name = self.parse_func_name()?;

        self.expect(TokenKind::LParen, "`(` before parameters")?;
        let params = self.parse_param_list(TokenKind::RParen)?;
        self.expect(TokenKind::RParen, "`)` after parameters")?;

        let ret = if self.eat(TokenKind::Arrow) { Some(self.parse_return_types()?) } else { None };

        let body = if self.at(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            self.expect(TokenKind::Semi, "function body or `;`")?;
            None
        };

        let id = self.mint();
        Ok(Stmt::new(
            id,
            self.span_from(start),
            StmtKind::FuncDecl(FuncDecl {
                name,
                type_ns,
                receivers,
                params,
                ret,
                body,
                exported,
                external,
                instantiated: false,
            }),
        ))
    }

    /// A function name: identifier, overloadable operator, or `@`/`@@`.
    fn parse_func_name(&mut self) -> Result<String, CompileError> {
        use TokenKind::*;
        let token = self.peek();
        let name = match token.kind {
            Ident => self.text(token).to_string(),
            Plus | Minus | Star | Slash | Percent | EqEq | Ne | Lt | Le | Gt | Ge => {
                self.text(token).to_string()
            }
            At => "@".to_string(),
            AtAt => "@@".to_string(),
            _ => return Err(self.error_here("expected function name".into())),
        };
        self.advance();
        Ok(name)
    }

    fn parse_param_list(&mut self, terminator: TokenKind) -> Result<Vec<Param>, CompileError> {
        let mut params = Vec::new();
        while !self.at(terminator) {
            let start = self.peek().span;
            let is_expr_param = self.eat(TokenKind::Dollar);
            let name = self.expect(TokenKind::Ident, "parameter name")?;
            let name = self.text(name).to_string();
            let ty = if !is_expr_param && self.eat(TokenKind::Colon) {
                Some(self.parse_type_ann()?)
            } else {
                None
            };
            let id = self.mint();
            params.push(Param { id, span: self.span_from(start), name, ty, is_expr_param });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// `-> #t` or `-> (#a, #b, …)`.
    fn parse_return_types(&mut self) -> Result<Vec<crate::ast::TypeAnn>, CompileError> {
        if self.eat(TokenKind::LParen) {
            let mut types = Vec::new();
            loop {
                types.push(self.parse_type_ann()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "`)` after return types")?;
            Ok(types)
        } else {
            Ok(vec![self.parse_type_ann()?])
        }
    }

    /// Expression statement or `cond ? stmt`.
    ///
    /// The head expression is parsed with the top-level ternary disabled;
    /// on `?` we first try a full ternary expression (backtracking to a
    /// conditional statement when no `:` follows).
    fn parse_expr_or_cond_statement(&mut self) -> Result<Stmt, CompileError> {
        let start = self.peek().span;

        if let Some(stmt) = self.parse_multi_assign()? {
            return Ok(stmt);
        }

        let head = self.parse_expr_no_ternary()?;

        if self.at(TokenKind::Question) {
            let checkpoint = self.checkpoint();
            self.advance();
            if let Some(expr) = self.try_parse_ternary_tail(&head)? {
                self.expect(TokenKind::Semi, "`;` after expression")?;
                let id = self.mint();
                return Ok(Stmt::new(id, self.span_from(start), StmtKind::Expr(expr)));
            }
            self.rewind(checkpoint);
            self.advance(); // `?`
            let then = self.parse_statement()?;
            let id = self.mint();
            return Ok(Stmt::new(
                id,
                self.span_from(start),
                StmtKind::CondStmt { cond: head, then: Box::new(then) },
            ));
        }

        self.expect(TokenKind::Semi, "`;` after expression")?;
        let id = self.mint();
        Ok(Stmt::new(id, self.span_from(start), StmtKind::Expr(head)))
    }

    /// `a, b = f();` -- parsed into `(a, b) = f()`; the checker desugars
    /// it to a temporary plus field extraction.
    pub(crate) fn parse_multi_assign(&mut self) -> Result<Option<Stmt>, CompileError> {
        use TokenKind::*;
        if !(self.at(Ident) && self.nth(1).kind == Comma) {
            return Ok(None);
        }
        // Scan ahead: ident (, ident)+ = -- otherwise not a multi-assign.
        let mut n = 0;
        loop {
            if self.nth(n).kind != Ident {
                return Ok(None);
            }
            match self.nth(n + 1).kind {
                Comma => n += 2,
                Eq => break,
                _ => return Ok(None),
            }
        }

        let start = self.peek().span;
        let mut targets = Vec::new();
        loop {
            let token = self.expect(Ident, "assignment target")?;
            let id = self.mint();
            targets.push(Expr::new(id, token.span, ExprKind::Ident(self.text(token).to_string())));
            if !self.eat(Comma) {
                break;
            }
        }
        self.expect(Eq, "`=` in multi-assignment")?;
        let value = self.parse_expr()?;
        self.expect(Semi, "`;` after assignment")?;

        let tuple_span = self.span_from(start);
        let tuple_id = self.mint();
        let target = Expr::new(tuple_id, tuple_span, ExprKind::TupleLit(targets));
        let assign_id = self.mint();
        let assign = Expr::new(
            assign_id,
            self.span_from(start),
            ExprKind::Assign { target: Box::new(target), value: Box::new(value) },
        );
        let stmt_id = self.mint();
        Ok(Some(Stmt::new(stmt_id, self.span_from(start), StmtKind::Expr(assign))))
    }

    // ── Annotations ────────────────────────────────────────────────────

    /// Zero or more `[[name]]` / `[[name(args)]]` prefixes.
    ///
    /// Disambiguated from array-of-array literals by lookahead: `[[` must
    /// be followed by an identifier and then `(` or `]]`.
    fn parse_annotations(&mut self) -> Result<Vec<Annotation>, CompileError> {
        let mut annotations = Vec::new();
        while self.at_annotation_start() {
            let start = self.peek().span;
            self.advance(); // `[`
            self.advance(); // `[`
            let name = self.expect(TokenKind::Ident, "annotation name")?;
            let name = self.text(name).to_string();
            let args = if self.eat(TokenKind::LParen) {
                let args = self.parse_annotation_args()?;
                self.expect(TokenKind::RParen, "`)` after annotation arguments")?;
                args
            } else {
                Vec::new()
            };
            self.expect(TokenKind::RBracket, "`]]` after annotation")?;
            self.expect(TokenKind::RBracket, "`]]` after annotation")?;
            annotations.push(Annotation { name, args, span: self.span_from(start) });
        }
        Ok(annotations)
    }


    /// Annotation arguments are opaque: each argument is captured as its
    /// raw source text, split on top-level commas.
    fn parse_annotation_args(&mut self) -> Result<Vec<String>, CompileError> {
        let mut args = Vec::new();
        let mut depth = 0u32;
        let mut arg_start: Option<u32> = None;
        let mut arg_end = 0u32;
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::RParen if depth == 0 => break,
                TokenKind::Comma if depth == 0 => {
                    if let Some(start) = arg_start.take() {
                        args.push(self.source[start as usize..arg_end as usize].to_string());
                    }
                    self.advance();
                    continue;
                }
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                TokenKind::Eof => return Err(self.error_here("unterminated annotation".into())),
                _ => {}
            }
            if arg_start.is_none() {
                arg_start = Some(token.span.start);
            }
            arg_end = token.span.end;
            self.advance();
        }
        if let Some(start) = arg_start {
            args.push(self.source[start as usize..arg_end as usize].to_string());
        }
        Ok(args)
    }
}
