//! Type checking: Hindley-Milner-flavored inference with literal width
//! rules, implicit numeric widening, tuple synthesis, operator/iteration/
//! method dispatch, constexpr-aware conditional typing, and generic
//! instantiation.
//!
//! The checker never mutates the AST. Every inferred type is recorded in
//! the type table's side map (`note_expr_type`); the merged-module builder
//! stamps the types onto the cloned nodes afterwards. Dispatch decisions
//! (method rewrites, operator overloads, generic instantiations) are
//! recorded by re-binding the call/operator node in `Bindings`.

use std::collections::VecDeque;

use log::debug;
use rustc_hash::FxHashMap;

use vexel_common::diag::CompileError;
use vexel_common::options::Strictness;
use vexel_common::span::Span;
use vexel_parser::ast::expr::{BinOp, Expr, ExprKind, UnOp};
use vexel_parser::ast::remap::clone_stmt_with_new_ids;
use vexel_parser::ast::stmt::{FuncDecl, Linkage, Stmt, StmtKind, VarDecl};
use vexel_parser::ast::types::{mangle_fragment, Prim, PrimFamily, Type, TypeAnn, TypeAnnKind};

use crate::cte::{CtOutcome, CtValue, Evaluator};
use crate::program::{InstanceId, ModuleInfo};
use crate::scope::{ScopeId, SymbolId, SymbolKind};
use crate::session::{AstView, DeclLoc, Session};
use crate::types::{is_abi_safe, join_prims, literal_type, negative_literal_type, widens_to};

/// Run the checker over every instance, then sweep the noted types through
/// the unification table so later passes see resolved snapshots.
pub fn check_program(sess: &mut Session) -> Result<(), CompileError> {
    let modules = std::mem::take(&mut sess.program.modules);
    let insts = std::mem::take(&mut sess.program.instantiations);
    let mut checker = Checker {
        modules: &modules,
        sess,
        insts,
        inst_cache: FxHashMap::default(),
        pending: VecDeque::new(),
        return_types: Vec::new(),
        declared_ret: None,
        loop_depth: 0,
    };
    let result = checker.run();
    let insts = std::mem::take(&mut checker.insts);
    let pending = std::mem::take(&mut checker.pending);
    sess.program.instantiations = insts;
    sess.program.pending_instantiations = pending;
    sess.program.modules = modules;
    result?;

    sess.types.resolve_noted();
    sweep_symbol_types(sess);
    Ok(())
}

/// Resolve symbol and signature types through the table after checking.
fn sweep_symbol_types(sess: &mut Session) {
    for i in 0..sess.symbols.len() {
        let id = crate::scope::SymbolId(i as u32);
        if let Some(ty) = sess.symbols.get(id).ty.clone() {
            let resolved = sess.types.resolve(&ty);
            sess.symbols.get_mut(id).ty = Some(resolved);
        }
    }
    let keys: Vec<SymbolId> = sess.funcs.keys().copied().collect();
    for key in keys {
        let sig = &sess.funcs[&key];
        let ret = sig.ret.clone();
        let param_tys: Vec<Option<Type>> = sig
            .receivers
            .iter()
            .chain(&sig.params)
            .map(|p| p.ty.clone())
            .collect();
        let resolved_ret = ret.map(|t| sess.types.resolve(&t));
        let resolved_params: Vec<Option<Type>> = param_tys
            .into_iter()
            .map(|t| t.map(|t| sess.types.resolve(&t)))
            .collect();
        let sig = sess.funcs.get_mut(&key).expect("key collected above");
        sig.ret = resolved_ret;
        for (param, ty) in sig.receivers.iter_mut().chain(sig.params.iter_mut()).zip(resolved_params)
        {
            param.ty = ty;
        }
    }
}

struct Checker<'m, 's> {
    modules: &'m [ModuleInfo],
    sess: &'s mut Session,
    /// Monomorphized instantiations (becomes `program.instantiations`).
    insts: Vec<(InstanceId, Stmt)>,
    /// `(template, signature mangle) -> instantiation symbol`.
    inst_cache: FxHashMap<(SymbolId, String), SymbolId>,
    /// FIFO of instantiation indices for the monomorphizer pass.
    pending: VecDeque<usize>,
    /// Return types observed in the current function body.
    return_types: Vec<Type>,
    declared_ret: Option<Option<Type>>,
    loop_depth: u32,
}

type CheckResult<T> = Result<T, CompileError>;

impl<'m, 's> Checker<'m, 's> {
    fn run(&mut self) -> CheckResult<()> {
        let instance_count = self.sess.program.instances.len();

        // 1. Record types for every instance, so cross-instance named
        //    types resolve regardless of checking order.
        for i in 0..instance_count {
            self.register_record_types(InstanceId(i as u32))?;
        }
        // 2. Function signatures.
        for i in 0..instance_count {
            self.lower_signatures(InstanceId(i as u32))?;
        }
        // 3. Global declarations.
        for i in 0..instance_count {
            self.check_globals(InstanceId(i as u32))?;
        }
        // 4. Bodies and top-level statements.
        for i in 0..instance_count {
            self.check_bodies(InstanceId(i as u32))?;
        }
        debug!(
            "checked {} instance(s), {} instantiation(s)",
            instance_count,
            self.insts.len()
        );
        Ok(())
    }

    fn instance_stmts(&self, instance: InstanceId) -> (&'m [Stmt], ScopeId) {
        let info = self.sess.program.instance(instance);
        let modules = self.modules;
        let module = &modules[info.module.0 as usize];
        (&module.module.statements, info.scope)
    }

    // ── Pass 1: record types ───────────────────────────────────────────

    fn register_record_types(&mut self, instance: InstanceId) -> CheckResult<()> {
        let (stmts, scope) = self.instance_stmts(instance);
        for stmt in stmts {
            let StmtKind::TypeDecl(decl) = &stmt.kind else { continue };
            let mut fields = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                if fields.iter().any(|(n, _)| n == &field.name) {
                    return Err(CompileError::new(
                        format!("duplicate field `{}` in `{}`", field.name, decl.name),
                        field.span,
                    ));
                }
                let ty = self.lower_ann(&field.ty, instance, scope)?;
                fields.push((field.name.clone(), ty));
            }
            self.sess.record_types.insert((instance, decl.name.clone()), fields);
        }
        Ok(())
    }

    // ── Pass 2: signatures ─────────────────────────────────────────────

    fn lower_signatures(&mut self, instance: InstanceId) -> CheckResult<()> {
        let (stmts, scope) = self.instance_stmts(instance);
        for stmt in stmts {
            let StmtKind::FuncDecl(func) = &stmt.kind else { continue };
            let symbol = self
                .sess
                .bindings
                .resolve(instance, stmt.id)
                .ok_or_else(|| CompileError::internal("function without a symbol", Some(stmt.span)))?;
            self.lower_one_signature(func, stmt, symbol, instance, scope)?;
        }
        Ok(())
    }

    fn lower_one_signature(
        &mut self,
        func: &FuncDecl,
        stmt: &Stmt,
        symbol: SymbolId,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<()> {
        self.validate_special_method(func, stmt.span)?;

        let generic = func.is_generic();
        let mut receiver_types = Vec::new();
        for param in &func.receivers {
            let ty = match &param.ty {
                Some(ann) => Some(self.lower_ann(ann, instance, scope)?),
                // An unannotated receiver of a `#T::` method is a `T`.
                None => func.type_ns.as_ref().map(|ns| Type::Named(ns.clone())),
            };
            receiver_types.push(ty);
        }
        let mut param_types = Vec::new();
        for param in &func.params {
            let ty = match (&param.ty, param.is_expr_param) {
                (Some(ann), false) => Some(self.lower_ann(ann, instance, scope)?),
                _ => None,
            };
            param_types.push(ty);
        }
        let ret = match &func.ret {
            Some(anns) => {
                let mut types = Vec::with_capacity(anns.len());
                for ann in anns {
                    types.push(self.lower_ann(ann, instance, scope)?);
                }
                Some(if types.len() == 1 {
                    types.pop().expect("one return type")
                } else {
                    Type::Named(self.sess.intern_tuple(types))
                })
            }
            None => None,
        };

        // Full strictness forbids generic-by-omission parameters; the
        // implicit `#T` receiver of a method still counts as annotated.
        if self.sess.options.strictness == Strictness::Full && !func.external {
            let untyped_receiver = if func.type_ns.is_none() {
                func.receivers.iter().find(|p| p.ty.is_none())
            } else {
                None
            };
            let untyped_param =
                func.params.iter().find(|p| p.ty.is_none() && !p.is_expr_param);
            if let Some(param) = untyped_param.or(untyped_receiver) {
                return Err(CompileError::new(
                    format!(
                        "parameter `{}` of `{}` needs a type annotation",
                        param.name,
                        func.qualified_name()
                    ),
                    param.span,
                ));
            }
        }

        // ABI boundary: exported and external signatures must be ABI-safe.
        if func.exported || func.external {
            for ty in receiver_types.iter().chain(&param_types).flatten() {
                self.ensure_abi_safe(ty, instance, stmt.span)?;
            }
            if let Some(ret) = &ret {
                self.ensure_abi_safe(ret, instance, stmt.span)?;
            }
        }

        let sig = self
            .sess
            .funcs
            .get_mut(&symbol)
            .ok_or_else(|| CompileError::internal("function without a signature", Some(stmt.span)))?;
        for (param, ty) in sig.receivers.iter_mut().zip(receiver_types) {
            param.ty = ty;
        }
        for (param, ty) in sig.params.iter_mut().zip(param_types) {
            param.ty = ty;
        }
        sig.ret = ret.clone();

        let updates: Vec<(SymbolId, Option<Type>)> = {
            let sig = &self.sess.funcs[&symbol];
            sig.receivers.iter().chain(&sig.params).map(|p| (p.symbol, p.ty.clone())).collect()
        };
        for (sym, ty) in updates {
            self.sess.symbols.get_mut(sym).ty = ty;
        }
        self.sess.symbols.get_mut(symbol).ty = ret;
        Ok(())
    }

    /// Operator methods take exactly one receiver and one value parameter;
    /// iteration methods take one receiver and one expression parameter.
    fn validate_special_method(&self, func: &FuncDecl, span: Span) -> CheckResult<()> {
        let name = func.name.as_str();
        let is_operator = !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !is_operator {
            return Ok(());
        }
        if func.type_ns.is_none() {
            return Err(CompileError::new(
                format!("operator `{name}` requires a `#T::` namespace"),
                span,
            ));
        }
        if name == "@" || name == "@@" {
            let ok = func.receivers.len() == 1
                && func.params.len() == 1
                && func.params[0].is_expr_param;
            if !ok {
                return Err(CompileError::new(
                    format!(
                        "iteration method `{}` must take one receiver and one expression parameter",
                        func.qualified_name()
                    ),
                    span,
                ));
            }
        } else {
            let ok = func.receivers.len() == 1
                && func.params.len() == 1
                && !func.params[0].is_expr_param;
            if !ok {
                return Err(CompileError::new(
                    format!(
                        "operator method `{}` must take one receiver and one value parameter",
                        func.qualified_name()
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }

    // ── Pass 3: globals ────────────────────────────────────────────────

    fn check_globals(&mut self, instance: InstanceId) -> CheckResult<()> {
        let (stmts, scope) = self.instance_stmts(instance);
        for stmt in stmts {
            let StmtKind::VarDecl(decl) = &stmt.kind else { continue };
            self.check_global_decl(decl, stmt, instance, scope)?;
        }
        Ok(())
    }

    fn check_global_decl(
        &mut self,
        decl: &VarDecl,
        stmt: &'m Stmt,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<()> {
        let symbol = self
            .sess
            .bindings
            .resolve(instance, stmt.id)
            .ok_or_else(|| CompileError::internal("global without a symbol", Some(stmt.span)))?;

        let declared = match &decl.ty {
            Some(ann) => Some(self.lower_ann(ann, instance, scope)?),
            None => None,
        };
        if let Some(ty) = &declared {
            self.sess.symbols.get_mut(symbol).ty = Some(ty.clone());
        }

        if decl.linkage == Linkage::External {
            if decl.init.is_some() {
                return Err(CompileError::new(
                    format!("external `{}` may not have an initializer", decl.name),
                    stmt.span,
                ));
            }
            let Some(ty) = &declared else {
                return Err(CompileError::new(
                    format!("external `{}` requires a type", decl.name),
                    stmt.span,
                ));
            };
            return self.ensure_abi_safe(ty, instance, stmt.span);
        }

        let init_ty = match &decl.init {
            Some(init) => {
                let ty = self.check_expr(init, instance, scope, declared.as_ref())?;
                Some(ty.ok_or_else(|| {
                    CompileError::new("initializer produces no value", init.span)
                })?)
            }
            None => None,
        };
        let ty = match (&declared, init_ty) {
            (Some(declared), Some(init_ty)) => {
                self.ensure_widens(&init_ty, declared, decl.init.as_ref().map(|e| e.span).unwrap_or(stmt.span))?;
                declared.clone()
            }
            (Some(declared), None) => declared.clone(),
            (None, Some(init_ty)) => self.sess.types.resolve(&init_ty),
            (None, None) => {
                return Err(CompileError::new(
                    format!("`{}` needs a type or an initializer", decl.name),
                    stmt.span,
                ))
            }
        };
        self.sess.symbols.get_mut(symbol).ty = Some(ty.clone());

        // Exported globals must be compile-time constant and ABI-safe.
        if decl.linkage == Linkage::Exported {
            self.ensure_abi_safe(&ty, instance, stmt.span)?;
            let Some(init) = &decl.init else {
                return Err(CompileError::new(
                    format!("exported global `{}` requires an initializer", decl.name),
                    stmt.span,
                ));
            };
            if self.try_evaluate(instance, init).is_none() {
                return Err(CompileError::new(
                    format!("exported global `{}` must be compile-time constant", decl.name),
                    init.span,
                ));
            }
        }
        Ok(())
    }

    fn ensure_abi_safe(&self, ty: &Type, instance: InstanceId, span: Span) -> CheckResult<()> {
        let lookup = |name: &str| {
            self.sess
                .fields_of(instance, name)
                .map(|fields| fields.into_iter().map(|(_, t)| t).collect())
        };
        if !is_abi_safe(ty, &lookup) {
            return Err(CompileError::new(
                format!("type `{ty}` is not allowed at an exported or external boundary"),
                span,
            ));
        }
        Ok(())
    }

    // ── Pass 4: bodies ─────────────────────────────────────────────────

    fn check_bodies(&mut self, instance: InstanceId) -> CheckResult<()> {
        let (stmts, scope) = self.instance_stmts(instance);
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::FuncDecl(func) => {
                    if func.is_generic() {
                        continue; // templates are checked per instantiation
                    }
                    let symbol = self
                        .sess
                        .bindings
                        .resolve(instance, stmt.id)
                        .expect("function was predeclared");
                    if let Some(body) = &func.body {
                        self.check_function_body(symbol, body, instance)?;
                    }
                }
                StmtKind::VarDecl(_) | StmtKind::TypeDecl(_) | StmtKind::Import { .. } => {}
                _ => {
                    self.check_stmt(stmt, instance, scope)?;
                }
            }
        }
        Ok(())
    }

    fn check_function_body(
        &mut self,
        symbol: SymbolId,
        body: &Expr,
        instance: InstanceId,
    ) -> CheckResult<()> {
        let sig = self.sess.funcs[&symbol].clone();
        let saved_returns = std::mem::take(&mut self.return_types);
        let saved_declared = self.declared_ret.replace(sig.ret.clone());
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);

        let body_ty = self.check_expr(body, instance, sig.param_scope, sig.ret.as_ref())?;

        let returns = std::mem::replace(&mut self.return_types, saved_returns);
        self.declared_ret = saved_declared;
        self.loop_depth = saved_depth;

        let ret = match &sig.ret {
            Some(declared) => {
                if let Some(body_ty) = &body_ty {
                    self.ensure_widens(body_ty, declared, body.span)?;
                }
                Some(declared.clone())
            }
            None => {
                // Inferred: join the tail type with every return type.
                let mut inferred: Option<Type> = body_ty;
                for ty in returns {
                    inferred = Some(match inferred {
                        Some(current) => self.join(&current, &ty, body.span)?,
                        None => ty,
                    });
                }
                inferred.map(|t| self.sess.types.resolve(&t))
            }
        };

        let sig = self.sess.funcs.get_mut(&symbol).expect("sig exists");
        sig.ret = ret.clone();
        self.sess.symbols.get_mut(symbol).ty = ret;
        Ok(())
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn check_stmt(&mut self, stmt: &Stmt, instance: InstanceId, scope: ScopeId) -> CheckResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.check_expr(expr, instance, scope, None)?;
                Ok(())
            }
            StmtKind::Return(value) => {
                let declared = self.declared_ret.clone().flatten();
                match value {
                    Some(expr) => {
                        let ty = self
                            .check_expr(expr, instance, scope, declared.as_ref())?
                            .ok_or_else(|| {
                                CompileError::new("return value has no type", expr.span)
                            })?;
                        match &declared {
                            Some(declared) => self.ensure_widens(&ty, declared, expr.span)?,
                            None => self.return_types.push(ty),
                        }
                    }
                    None => {
                        if declared.is_some() {
                            return Err(CompileError::new(
                                "missing return value",
                                stmt.span,
                            ));
                        }
                    }
                }
                Ok(())
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(CompileError::new("break/continue outside of a loop", stmt.span));
                }
                Ok(())
            }
            StmtKind::VarDecl(decl) => self.check_local_decl(decl, stmt, instance, scope),
            StmtKind::CondStmt { cond, then } => {
                let cond_ty = self
                    .check_expr(cond, instance, scope, Some(&Type::bool()))?
                    .ok_or_else(|| CompileError::new("condition has no type", cond.span))?;
                self.ensure_bool(&cond_ty, cond.span)?;
                self.check_stmt(then, instance, scope)
            }
            StmtKind::Import { .. } => Ok(()),
            StmtKind::FuncDecl(_) | StmtKind::TypeDecl(_) => Err(CompileError::internal(
                "nested declaration survived resolution",
                Some(stmt.span),
            )),
        }
    }

    fn check_local_decl(
        &mut self,
        decl: &VarDecl,
        stmt: &Stmt,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<()> {
        let symbol = self
            .sess
            .bindings
            .resolve(instance, stmt.id)
            .ok_or_else(|| CompileError::internal("local without a symbol", Some(stmt.span)))?;
        let declared = match &decl.ty {
            Some(ann) => Some(self.lower_ann(ann, instance, scope)?),
            None => None,
        };
        let init_ty = match &decl.init {
            Some(init) => {
                let ty = self.check_expr(init, instance, scope, declared.as_ref())?;
                Some(ty.ok_or_else(|| {
                    CompileError::new("initializer produces no value", init.span)
                })?)
            }
            None => None,
        };
        let ty = match (declared, init_ty) {
            (Some(declared), Some(init_ty)) => {
                self.ensure_widens(&init_ty, &declared, stmt.span)?;
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(init_ty)) => self.sess.types.resolve(&init_ty),
            (None, None) => {
                if self.sess.options.strictness != Strictness::Relaxed {
                    return Err(CompileError::new(
                        format!("`{}` needs a type annotation or an initializer", decl.name),
                        stmt.span,
                    ));
                }
                self.sess.types.fresh()
            }
        };
        self.sess.symbols.get_mut(symbol).ty = Some(ty);
        Ok(())
    }

    // ── Expressions ────────────────────────────────────────────────────

    /// Check an expression and return its type (`None` for statement-only
    /// forms). The inferred type is recorded in the type table side map.
    fn check_expr(
        &mut self,
        expr: &Expr,
        instance: InstanceId,
        scope: ScopeId,
        expected: Option<&Type>,
    ) -> CheckResult<Option<Type>> {
        let ty = self.check_expr_inner(expr, instance, scope, expected)?;
        if let Some(ty) = &ty {
            self.sess.types.note_expr_type(expr.id, ty);
        }
        Ok(ty)
    }

    fn check_expr_inner(
        &mut self,
        expr: &Expr,
        instance: InstanceId,
        scope: ScopeId,
        expected: Option<&Type>,
    ) -> CheckResult<Option<Type>> {
        match &expr.kind {
            ExprKind::Int { value, suffix } => {
                let prim = match suffix {
                    Some(prim) => {
                        self.ensure_literal_fits(*value, *prim, expr.span)?;
                        *prim
                    }
                    None => literal_type(*value),
                };
                Ok(Some(Type::Prim(prim)))
            }
            ExprKind::Float(_) => Ok(Some(Type::Prim(Prim::F64))),
            ExprKind::Str(_) => Ok(Some(Type::str())),
            ExprKind::Char(_) => Ok(Some(Type::unsigned(8))),
            ExprKind::Ident(name) => self.check_ident(expr, name, instance, scope).map(Some),
            ExprKind::Binary { op, lhs, rhs } => {
                self.check_binary(expr, *op, lhs, rhs, instance, scope).map(Some)
            }
            ExprKind::Unary { op, operand } => {
                self.check_unary(*op, operand, instance, scope).map(Some)
            }
            ExprKind::Call { .. } => self.check_call(expr, instance, scope),
            ExprKind::Index { base, index } => {
                let base_ty = self.require_value(base, instance, scope)?;
                let index_ty = self.require_value(index, instance, scope)?;
                self.ensure_integer(&index_ty, index.span)?;
                match self.sess.types.resolve(&base_ty) {
                    Type::Array(elem, _) => Ok(Some(*elem)),
                    Type::Prim(Prim::Str) => Ok(Some(Type::unsigned(8))),
                    other => Err(CompileError::new(
                        format!("type `{other}` cannot be indexed"),
                        base.span,
                    )),
                }
            }
            ExprKind::Member { base, field } => {
                let base_ty = self.require_value(base, instance, scope)?;
                match self.sess.types.resolve(&base_ty) {
                    Type::Named(name) => {
                        let fields = self.sess.fields_of(instance, &name).ok_or_else(|| {
                            CompileError::new(format!("unknown type `{name}`"), base.span)
                        })?;
                        match fields.into_iter().find(|(n, _)| n == field) {
                            Some((_, ty)) => Ok(Some(ty)),
                            None => Err(CompileError::new(
                                format!("type `{name}` has no field `{field}`"),
                                expr.span,
                            )),
                        }
                    }
                    other => Err(CompileError::new(
                        format!("type `{other}` has no fields"),
                        base.span,
                    )),
                }
            }
            ExprKind::ArrayLit(elems) => {
                self.check_array_lit(elems, expr.span, instance, scope, expected).map(Some)
            }
            ExprKind::TupleLit(elems) => {
                // A contextual tuple type narrows the elements (so that
                // `=> (1, 2);` matches a declared `(#u8, #u16)` return).
                let expected_elems = expected
                    .map(|t| self.sess.types.resolve(t))
                    .and_then(|t| match t {
                        Type::Named(name) => self.sess.tuple_types.get(&name).cloned(),
                        _ => None,
                    })
                    .filter(|fields| fields.len() == elems.len());
                if let Some(field_types) = expected_elems {
                    for (elem, field_ty) in elems.iter().zip(&field_types) {
                        let ty = self.check_expr(elem, instance, scope, Some(field_ty))?;
                        let ty = ty.ok_or_else(|| {
                            CompileError::new("tuple element has no value", elem.span)
                        })?;
                        self.ensure_widens(&ty, field_ty, elem.span)?;
                    }
                    return Ok(Some(Type::Named(self.sess.intern_tuple(field_types))));
                }
                let mut types = Vec::with_capacity(elems.len());
                for elem in elems {
                    let ty = self.require_value(elem, instance, scope)?;
                    types.push(self.sess.types.resolve(&ty));
                }
                let name = self.sess.intern_tuple(types);
                Ok(Some(Type::Named(name)))
            }
            ExprKind::Block { stmts, tail } => {
                let block_scope = self
                    .sess
                    .node_scopes
                    .get(&(instance, expr.id))
                    .copied()
                    .unwrap_or(scope);
                for stmt in stmts {
                    self.check_stmt(stmt, instance, block_scope)?;
                }
                match tail {
                    Some(tail) => self.check_expr(tail, instance, block_scope, expected),
                    None => Ok(None),
                }
            }
            ExprKind::Conditional { cond, then, alt } => {
                self.check_conditional(cond, then, alt, instance, scope, expected)
            }
            ExprKind::Cast { target, operand } => {
                self.check_cast(target, operand, instance, scope).map(Some)
            }
            ExprKind::Assign { target, value } => {
                self.check_assign(expr, target, value, instance, scope)?;
                Ok(None)
            }
            ExprKind::Range { lo, hi } => {
                let lo_ty = self.require_value(lo, instance, scope)?;
                let hi_ty = self.require_value(hi, instance, scope)?;
                self.ensure_integer(&lo_ty, lo.span)?;
                self.ensure_integer(&hi_ty, hi.span)?;
                let elem = self.join(&lo_ty, &hi_ty, expr.span)?;
                // Compile-time-known bounds give the range a real array
                // length; runtime bounds keep length 0 (iteration only).
                let len = match (self.try_evaluate(instance, lo), self.try_evaluate(instance, hi)) {
                    (Some(lo), Some(hi)) => match (lo.as_int(), hi.as_int()) {
                        (Some(lo), Some(hi)) if hi >= lo => (hi - lo) as u64,
                        _ => 0,
                    },
                    _ => 0,
                };
                Ok(Some(Type::array(elem, len)))
            }
            ExprKind::Length(operand) => {
                let ty = self.require_value(operand, instance, scope)?;
                match self.sess.types.resolve(&ty) {
                    Type::Array(_, size) => Ok(Some(Type::Prim(fit_length(size)))),
                    Type::Prim(Prim::Str) => Ok(Some(Type::unsigned(16))),
                    other => Err(CompileError::new(
                        format!("`|x|` requires an array or string, got `{other}`"),
                        operand.span,
                    )),
                }
            }
            ExprKind::Iterate { .. } => {
                self.check_iterate(expr, instance, scope)?;
                Ok(None)
            }
            ExprKind::Repeat { cond, body } => {
                let cond_ty = self.require_value(cond, instance, scope)?;
                self.ensure_bool(&cond_ty, cond.span)?;
                self.loop_depth += 1;
                let result = self.check_expr(body, instance, scope, None);
                self.loop_depth -= 1;
                result?;
                Ok(None)
            }
            ExprKind::Resource(_) => Ok(Some(Type::str())),
            ExprKind::Process(_) => {
                if !self.sess.options.allow_process {
                    return Err(CompileError::new(
                        "process expressions require the allow-process option",
                        expr.span,
                    ));
                }
                Ok(Some(Type::str()))
            }
        }
    }

    fn require_value(
        &mut self,
        expr: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        self.check_expr(expr, instance, scope, None)?.ok_or_else(|| {
            CompileError::new("expression produces no value", expr.span)
        })
    }

    fn check_ident(
        &mut self,
        expr: &Expr,
        name: &str,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        let symbol = match self.sess.bindings.resolve(instance, expr.id) {
            Some(symbol) => symbol,
            None => {
                // Late resolution: forward references to module-level
                // entities that became visible after the resolver walked
                // this node (e.g. later imports).
                let found = self
                    .sess
                    .scopes
                    .lookup(scope, name)
                    .filter(|s| !self.sess.symbols.get(*s).is_local);
                match found {
                    Some(symbol) => {
                        self.sess.bindings.bind(instance, expr.id, symbol);
                        symbol
                    }
                    None => {
                        return Err(CompileError::new(
                            format!("undefined identifier `{name}`"),
                            expr.span,
                        ))
                    }
                }
            }
        };
        let info = self.sess.symbols.get(symbol);
        if info.expr_param {
            // An expression-parameter use is opaque until substitution.
            return Ok(self.sess.types.fresh());
        }
        match info.kind {
            SymbolKind::Function => Err(CompileError::new(
                format!("function `{name}` used as a value"),
                expr.span,
            )),
            SymbolKind::Type => Err(CompileError::new(
                format!("type `{name}` used as a value"),
                expr.span,
            )),
            _ => match &info.ty {
                Some(ty) => Ok(ty.clone()),
                None => Err(CompileError::new(
                    format!("`{name}` is used before its type is known"),
                    expr.span,
                )),
            },
        }
    }

    fn check_binary(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        let lhs_ty = self.require_value(lhs, instance, scope)?;

        // Operator overloading: a named left operand dispatches to `T::op`.
        if let Type::Named(type_name) = self.sess.types.resolve(&lhs_ty) {
            if !op.overloadable() {
                return Err(CompileError::new(
                    format!("type `{type_name}` does not support `{}`", op.symbol()),
                    expr.span,
                ));
            }
            let method = format!("{type_name}::{}", op.symbol());
            let Some(symbol) = self.sess.scopes.lookup(scope, &method) else {
                return Err(CompileError::new(
                    format!("type `{type_name}` does not overload `{}`", op.symbol()),
                    expr.span,
                ));
            };
            let sig = self.sess.funcs[&symbol].clone();
            let rhs_ty = self.require_value(rhs, instance, scope)?;
            if let Some(param_ty) = sig.params.first().and_then(|p| p.ty.clone()) {
                self.ensure_widens(&rhs_ty, &param_ty, rhs.span)?;
            }
            self.sess.bindings.bind(instance, expr.id, symbol);
            return sig.ret.clone().ok_or_else(|| {
                CompileError::new(format!("`{method}` does not return a value"), expr.span)
            });
        }

        let rhs_ty = self.require_value(rhs, instance, scope)?;

        if op.is_logical() {
            self.ensure_bool(&lhs_ty, lhs.span)?;
            self.ensure_bool(&rhs_ty, rhs.span)?;
            return Ok(Type::bool());
        }
        if op.is_comparison() {
            self.join(&lhs_ty, &rhs_ty, expr.span)?;
            return Ok(Type::bool());
        }

        let joined = self.join(&lhs_ty, &rhs_ty, expr.span)?;
        let prim = match self.sess.types.resolve(&joined) {
            Type::Prim(prim) => prim,
            other => {
                return Err(CompileError::new(
                    format!("`{}` is not defined for `{other}`", op.symbol()),
                    expr.span,
                ))
            }
        };
        if op.is_unsigned_only() {
            let widened = match prim {
                // 0/1 literals widen to the smallest real carrier.
                Prim::Bool => Prim::Unsigned(8),
                Prim::Unsigned(w) => Prim::Unsigned(w),
                other => {
                    return Err(CompileError::new(
                        format!("`{}` requires unsigned integer operands, got `{other}`", op.symbol()),
                        expr.span,
                    ))
                }
            };
            return Ok(Type::Prim(widened));
        }
        if !prim.is_numeric() && prim != Prim::Bool {
            return Err(CompileError::new(
                format!("`{}` is not defined for `{prim}`", op.symbol()),
                expr.span,
            ));
        }
        // Bool arithmetic widens to the smallest unsigned carrier.
        let prim = if prim == Prim::Bool { Prim::Unsigned(8) } else { prim };
        Ok(Type::Prim(prim))
    }

    fn check_unary(
        &mut self,
        op: UnOp,
        operand: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        // Negative literal: the smallest signed width that fits.
        if op == UnOp::Neg {
            if let ExprKind::Int { value, suffix: None } = &operand.kind {
                let prim = negative_literal_type(*value);
                let ty = Type::Prim(prim);
                self.sess.types.note_expr_type(operand.id, &ty);
                return Ok(ty);
            }
        }
        let ty = self.require_value(operand, instance, scope)?;
        let resolved = self.sess.types.resolve(&ty);
        match op {
            UnOp::Neg => match &resolved {
                Type::Prim(p) if matches!(p.family(), PrimFamily::Signed | PrimFamily::Float) => {
                    Ok(resolved)
                }
                other => Err(CompileError::new(
                    format!("cannot negate `{other}`"),
                    operand.span,
                )),
            },
            UnOp::Not => {
                self.ensure_bool(&resolved, operand.span)?;
                Ok(Type::bool())
            }
            UnOp::BitNot => match &resolved {
                Type::Prim(Prim::Unsigned(w)) if *w > 0 => Ok(resolved),
                Type::Prim(Prim::Bool) => Ok(Type::unsigned(8)),
                other => Err(CompileError::new(
                    format!("`~` requires an unsigned integer, got `{other}`"),
                    operand.span,
                )),
            },
        }
    }

    fn check_array_lit(
        &mut self,
        elems: &[Expr],
        span: Span,
        instance: InstanceId,
        scope: ScopeId,
        expected: Option<&Type>,
    ) -> CheckResult<Type> {
        let expected_elem = match expected.map(|t| self.sess.types.resolve(t)) {
            Some(Type::Array(elem, _)) => Some(*elem),
            _ => None,
        };
        if elems.is_empty() {
            return match expected_elem {
                Some(elem) => Ok(Type::array(elem, 0)),
                None => Err(CompileError::new(
                    "cannot infer the element type of an empty array",
                    span,
                )),
            };
        }
        let mut joint: Option<Type> = None;
        for elem in elems {
            let ty = self.check_expr(elem, instance, scope, expected_elem.as_ref())?;
            let ty = ty.ok_or_else(|| CompileError::new("array element has no value", elem.span))?;
            joint = Some(match joint {
                Some(current) => self.join(&current, &ty, elem.span)?,
                None => ty,
            });
        }
        let mut joint = joint.expect("non-empty array literal");
        if let Some(elem) = expected_elem {
            self.ensure_widens(&joint, &elem, span)?;
            joint = elem;
        }
        Ok(Type::array(self.sess.types.resolve(&joint), elems.len() as u64))
    }

    fn check_conditional(
        &mut self,
        cond: &Expr,
        then: &Expr,
        alt: &Expr,
        instance: InstanceId,
        scope: ScopeId,
        expected: Option<&Type>,
    ) -> CheckResult<Option<Type>> {
        let cond_ty = self.require_value(cond, instance, scope)?;
        self.ensure_bool(&cond_ty, cond.span)?;

        // A compile-time-determinable condition makes the dead branch
        // type-free: it is checked, but its type never has to agree.
        match self.ct_condition(instance, cond) {
            Some(true) => {
                let live = self.check_expr(then, instance, scope, expected)?;
                self.check_expr(alt, instance, scope, None)?;
                Ok(live)
            }
            Some(false) => {
                self.check_expr(then, instance, scope, None)?;
                self.check_expr(alt, instance, scope, expected)
            }
            None => {
                let then_ty = self.check_expr(then, instance, scope, expected)?;
                let alt_ty = self.check_expr(alt, instance, scope, expected)?;
                match (then_ty, alt_ty) {
                    (Some(a), Some(b)) => Ok(Some(self.join(&a, &b, alt.span)?)),
                    _ => Err(CompileError::new(
                        "conditional branches must produce values",
                        alt.span,
                    )),
                }
            }
        }
    }

    fn check_cast(
        &mut self,
        target: &TypeAnn,
        operand: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        let target_ty = self.lower_ann(target, instance, scope)?;
        let operand_ty = self.require_value(operand, instance, scope)?;
        let from = self.sess.types.resolve(&operand_ty);
        let ok = match (&from, &target_ty) {
            (Type::Prim(from), Type::Prim(to)) => {
                from.is_numeric() || *from == Prim::Bool || from == to
            }
            // Bool-array <-> unsigned integer, sizes matching bit widths.
            (Type::Array(elem, size), Type::Prim(Prim::Unsigned(width)))
            | (Type::Prim(Prim::Unsigned(width)), Type::Array(elem, size)) => {
                if **elem != Type::Prim(Prim::Bool) {
                    false
                } else if *size != *width as u64 {
                    return Err(CompileError::new(
                        format!("cast size mismatch: `{from}` vs `{target_ty}`"),
                        operand.span,
                    ));
                } else {
                    true
                }
            }
            (Type::Named(a), Type::Named(b)) => a == b,
            _ => false,
        };
        if !ok {
            return Err(CompileError::new(
                format!("cannot cast `{from}` to `{target_ty}`"),
                operand.span,
            ));
        }
        Ok(target_ty)
    }

    fn check_assign(
        &mut self,
        assign: &Expr,
        target: &Expr,
        value: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let symbol = self.sess.bindings.resolve(instance, target.id).ok_or_else(|| {
                    CompileError::new(format!("undefined identifier `{name}`"), target.span)
                })?;
                if name == "_" {
                    return Err(CompileError::new("loop variable `_` is read-only", target.span));
                }
                let declared = self.sess.symbols.get(symbol).ty.clone();
                let value_ty = self.check_expr(value, instance, scope, declared.as_ref())?;
                if self.sess.bindings.is_new_variable(instance, assign.id) {
                    let value_ty = value_ty.ok_or_else(|| {
                        CompileError::new("cannot assign a valueless expression", value.span)
                    })?;
                    let resolved = self.sess.types.resolve(&value_ty);
                    if self.sess.options.strictness != Strictness::Relaxed
                        && !resolved.is_concrete()
                    {
                        return Err(CompileError::new(
                            format!("`{name}` needs a type annotation"),
                            target.span,
                        ));
                    }
                    self.sess.symbols.get_mut(symbol).ty = Some(resolved.clone());
                    self.sess.types.note_expr_type(target.id, &resolved);
                    return Ok(());
                }
                let info = self.sess.symbols.get(symbol);
                if !info.mutable {
                    return Err(CompileError::new(
                        format!("cannot assign to immutable `{name}`"),
                        target.span,
                    ));
                }
                let declared = info.ty.clone().ok_or_else(|| {
                    CompileError::new(format!("`{name}` has no known type"), target.span)
                })?;
                self.sess.types.note_expr_type(target.id, &declared);
                let value_ty = value_ty.ok_or_else(|| {
                    CompileError::new("cannot assign a valueless expression", value.span)
                })?;
                self.ensure_widens(&value_ty, &declared, value.span)
            }
            ExprKind::TupleLit(elems) => {
                let value_ty = self.require_value(value, instance, scope)?;
                let resolved = self.sess.types.resolve(&value_ty);
                let Type::Named(name) = &resolved else {
                    return Err(CompileError::new(
                        format!("multi-assignment requires a tuple value, got `{resolved}`"),
                        value.span,
                    ));
                };
                let Some(fields) = self.sess.tuple_types.get(name).cloned() else {
                    return Err(CompileError::new(
                        format!("multi-assignment requires a tuple value, got `{resolved}`"),
                        value.span,
                    ));
                };
                if fields.len() != elems.len() {
                    return Err(CompileError::new(
                        format!(
                            "cannot unpack {} values into {} targets",
                            fields.len(),
                            elems.len()
                        ),
                        assign.span,
                    ));
                }
                for (elem, field_ty) in elems.iter().zip(fields) {
                    let ExprKind::Ident(elem_name) = &elem.kind else { unreachable!() };
                    let symbol =
                        self.sess.bindings.resolve(instance, elem.id).ok_or_else(|| {
                            CompileError::new(
                                format!("undefined identifier `{elem_name}`"),
                                elem.span,
                            )
                        })?;
                    if self.sess.bindings.is_new_variable(instance, elem.id) {
                        self.sess.symbols.get_mut(symbol).ty = Some(field_ty.clone());
                    } else {
                        let info = self.sess.symbols.get(symbol);
                        if !info.mutable {
                            return Err(CompileError::new(
                                format!("cannot assign to immutable `{elem_name}`"),
                                elem.span,
                            ));
                        }
                        let declared = info.ty.clone().ok_or_else(|| {
                            CompileError::new(
                                format!("`{elem_name}` has no known type"),
                                elem.span,
                            )
                        })?;
                        self.ensure_widens(&field_ty, &declared, elem.span)?;
                    }
                    self.sess.types.note_expr_type(elem.id, &field_ty);
                }
                Ok(())
            }
            ExprKind::Index { .. } | ExprKind::Member { .. } => {
                let target_ty = self.require_value(target, instance, scope)?;
                self.ensure_lvalue_root_mutable(target, instance, scope)?;
                let value_ty = self.check_expr(value, instance, scope, Some(&target_ty))?;
                let value_ty = value_ty.ok_or_else(|| {
                    CompileError::new("cannot assign a valueless expression", value.span)
                })?;
                self.ensure_widens(&value_ty, &target_ty, value.span)
            }
            _ => Err(CompileError::new("expression is not assignable", target.span)),
        }
    }

    fn ensure_lvalue_root_mutable(
        &mut self,
        target: &Expr,
        instance: InstanceId,
        _scope: ScopeId,
    ) -> CheckResult<()> {
        let mut current = target;
        loop {
            match &current.kind {
                ExprKind::Index { base, .. } | ExprKind::Member { base, .. } => current = base,
                ExprKind::Ident(name) => {
                    let Some(symbol) = self.sess.bindings.resolve(instance, current.id) else {
                        return Err(CompileError::new(
                            format!("undefined identifier `{name}`"),
                            current.span,
                        ));
                    };
                    let info = self.sess.symbols.get(symbol);
                    if !info.mutable {
                        return Err(CompileError::new(
                            format!("cannot write through immutable `{name}`"),
                            current.span,
                        ));
                    }
                    return Ok(());
                }
                _ => {
                    return Err(CompileError::new(
                        "assignment target is not addressable",
                        current.span,
                    ))
                }
            }
        }
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn check_call(
        &mut self,
        expr: &Expr,
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Option<Type>> {
        let ExprKind::Call { callee, receivers, args } = &expr.kind else { unreachable!() };

        // Receivers evaluate (and are checked) left-to-right first.
        let mut receiver_types = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            receiver_types.push(self.require_value(receiver, instance, scope)?);
        }

        let symbol = if receivers.is_empty() {
            match self.sess.bindings.resolve(instance, expr.id) {
                Some(symbol) => symbol,
                None => match self.sess.scopes.lookup(scope, callee) {
                    Some(symbol) => symbol,
                    None => {
                        return Err(CompileError::new(
                            format!("undefined function `{callee}`"),
                            expr.span,
                        ))
                    }
                },
            }
        } else {
            // Method dispatch: rewrite `recv.f(...)` to `T::f`.
            let qualified = if callee.contains("::") {
                callee.clone()
            } else {
                let recv_ty = self.sess.types.resolve(&receiver_types[0]);
                let Type::Named(type_name) = recv_ty else {
                    return Err(CompileError::new(
                        format!("method call on non-record type `{recv_ty}`"),
                        receivers[0].span,
                    ));
                };
                format!("{type_name}::{callee}")
            };
            self.sess.scopes.lookup(scope, &qualified).ok_or_else(|| {
                CompileError::new(format!("undefined method `{qualified}`"), expr.span)
            })?
        };

        // Record constructors are plain calls to the type name.
        if self.sess.symbols.get(symbol).kind == SymbolKind::Type {
            return self.check_constructor(expr, symbol, args, instance, scope).map(Some);
        }
        if self.sess.symbols.get(symbol).kind != SymbolKind::Function {
            return Err(CompileError::new(
                format!("`{callee}` is not callable"),
                expr.span,
            ));
        }

        let sig = self.sess.funcs[&symbol].clone();
        if receivers.len() != sig.receivers.len() {
            return Err(CompileError::new(
                format!(
                    "`{}` expects {} receiver(s), got {}",
                    sig.name,
                    sig.receivers.len(),
                    receivers.len()
                ),
                expr.span,
            ));
        }
        if receivers.len() > 1 {
            for receiver in receivers {
                if receiver.as_ident().is_none() {
                    return Err(CompileError::new(
                        "multi-receiver calls require bare variable receivers",
                        receiver.span,
                    ));
                }
            }
        }
        if args.len() != sig.params.len() {
            return Err(CompileError::new(
                format!(
                    "`{}` expects {} argument(s), got {}",
                    sig.name,
                    sig.params.len(),
                    args.len()
                ),
                expr.span,
            ));
        }

        if sig.generic {
            let mut arg_types = Vec::with_capacity(args.len());
            for (param, arg) in sig.params.iter().zip(args) {
                if param.is_expr_param {
                    arg_types.push(None);
                } else {
                    let ty = self.require_value(arg, instance, scope)?;
                    arg_types.push(Some(self.sess.types.resolve(&ty)));
                }
            }
            let receiver_resolved: Vec<Type> =
                receiver_types.iter().map(|t| self.sess.types.resolve(t)).collect();
            let (inst_symbol, ret) =
                self.instantiate_generic(symbol, &receiver_resolved, &arg_types, expr.span)?;
            self.sess.bindings.bind(instance, expr.id, inst_symbol);
            return Ok(ret);
        }

        for ((param, arg), receiver_ty) in
            sig.receivers.iter().zip(receivers).zip(&receiver_types)
        {
            if let Some(ty) = &param.ty {
                self.ensure_widens(receiver_ty, ty, arg.span)?;
            }
        }
        for (param, arg) in sig.params.iter().zip(args) {
            if param.is_expr_param {
                // Expression-parameter arguments stay unevaluated and
                // untyped: they are substituted at use sites.
                continue;
            }
            let expected = param.ty.clone();
            let ty = self.check_expr(arg, instance, scope, expected.as_ref())?;
            let ty = ty
                .ok_or_else(|| CompileError::new("argument has no value", arg.span))?;
            if let Some(expected) = expected {
                self.ensure_widens(&ty, &expected, arg.span)?;
            }
        }

        self.sess.bindings.bind(instance, expr.id, symbol);
        Ok(sig.ret.clone())
    }

    fn check_constructor(
        &mut self,
        expr: &Expr,
        symbol: SymbolId,
        args: &[Expr],
        instance: InstanceId,
        scope: ScopeId,
    ) -> CheckResult<Type> {
        let name = self.sess.symbols.get(symbol).name.clone();
        let fields = self
            .sess
            .fields_of(instance, &name)
            .ok_or_else(|| CompileError::new(format!("unknown type `{name}`"), expr.span))?;
        if fields.len() != args.len() {
            return Err(CompileError::new(
                format!("`{name}` has {} field(s), got {} value(s)", fields.len(), args.len()),
                expr.span,
            ));
        }
        for ((_, field_ty), arg) in fields.iter().zip(args) {
            let ty = self.check_expr(arg, instance, scope, Some(field_ty))?;
            let ty = ty.ok_or_else(|| CompileError::new("argument has no value", arg.span))?;
            self.ensure_widens(&ty, field_ty, arg.span)?;
        }
        self.sess.bindings.bind(instance, expr.id, symbol);
        Ok(Type::Named(name))
    }

    // ── Generic instantiation ──────────────────────────────────────────

    /// Materialize (or reuse) the instantiation of a generic template for
    /// the given full argument-type signature.
    fn instantiate_generic(
        &mut self,
        template: SymbolId,
        receiver_types: &[Type],
        arg_types: &[Option<Type>],
        call_span: Span,
    ) -> CheckResult<(SymbolId, Option<Type>)> {
        for ty in receiver_types.iter().chain(arg_types.iter().flatten()) {
            if !ty.is_concrete() {
                return Err(CompileError::new(
                    format!("cannot instantiate a generic with non-concrete type `{ty}`"),
                    call_span,
                ));
            }
        }

        let sig = self.sess.funcs[&template].clone();
        let mut mangled = format!("{}_G", sig.name);
        for ty in receiver_types.iter().chain(arg_types.iter().flatten()) {
            mangled.push('_');
            mangled.push_str(&mangle_fragment(ty));
        }

        if let Some(&existing) = self.inst_cache.get(&(template, mangled.clone())) {
            let ret = self.sess.funcs[&existing].ret.clone();
            return Ok((existing, ret));
        }

        // Clone the template with fresh node ids and the mangled name.
        let view = AstView { modules: self.modules, instantiations: &self.insts };
        let template_stmt = view.stmt(sig.loc).clone();
        let mut clone = clone_stmt_with_new_ids(&template_stmt, &mut self.sess.program.ids);
        let StmtKind::FuncDecl(func) = &mut clone.kind else {
            return Err(CompileError::internal("generic template is not a function", Some(call_span)));
        };
        func.name = mangled.clone();
        func.type_ns = None;
        func.instantiated = true;

        let loc = DeclLoc::Instantiation(self.insts.len());
        let plain_args: Vec<Type> = arg_types
            .iter()
            .map(|t| t.clone().unwrap_or(Type::Prim(Prim::Bool)))
            .collect();
        let inst_symbol = crate::resolver::resolve_instantiation(
            self.sess,
            sig.instance,
            &clone,
            loc,
            receiver_types,
            &plain_args,
        )?;
        // Insert before checking the body so recursive calls with the same
        // signature reuse this instantiation instead of looping.
        self.inst_cache.insert((template, mangled), inst_symbol);

        let body = match &clone.kind {
            StmtKind::FuncDecl(func) => func.body.clone(),
            _ => None,
        };
        // A template may still declare its return type; the clone keeps
        // the annotation, so lower it for the instantiation.
        let declared_ret = match &clone.kind {
            StmtKind::FuncDecl(func) => func.ret.clone(),
            _ => None,
        };
        if let Some(anns) = declared_ret {
            let scope = self.sess.program.instance(sig.instance).scope;
            let mut types = Vec::with_capacity(anns.len());
            for ann in &anns {
                types.push(self.lower_ann(ann, sig.instance, scope)?);
            }
            let ret = if types.len() == 1 {
                types.pop().expect("one return type")
            } else {
                Type::Named(self.sess.intern_tuple(types))
            };
            self.sess.funcs.get_mut(&inst_symbol).expect("sig exists").ret = Some(ret.clone());
            self.sess.symbols.get_mut(inst_symbol).ty = Some(ret);
        }

        let index = self.insts.len();
        self.insts.push((sig.instance, clone));
        self.pending.push_back(index);

        if let Some(body) = body {
            self.check_function_body(inst_symbol, &body, sig.instance)?;
        }
        let ret = self.sess.funcs[&inst_symbol].ret.clone();
        debug!("instantiated `{}`", self.sess.funcs[&inst_symbol].name);
        Ok((inst_symbol, ret))
    }

    // ── Iteration ──────────────────────────────────────────────────────

    fn check_iterate(&mut self, expr: &Expr, instance: InstanceId, scope: ScopeId) -> CheckResult<()> {
        let ExprKind::Iterate { iterable, body, sorted } = &expr.kind else { unreachable!() };
        let head_ty = self.require_value(iterable, instance, scope)?;
        let head_ty = self.sess.types.resolve(&head_ty);

        let loop_scope = self
            .sess
            .node_scopes
            .get(&(instance, expr.id))
            .copied()
            .unwrap_or(scope);
        let wildcard = self.sess.scopes.lookup_local(loop_scope, "_");

        match head_ty {
            // A boolean head is really a repeat loop; the lowerer rewrites
            // the node, the checker only types it.
            Type::Prim(Prim::Bool) => {
                if *sorted {
                    return Err(CompileError::new(
                        "`@@` requires an iterable, not a condition",
                        iterable.span,
                    ));
                }
                self.loop_depth += 1;
                let result = self.check_expr(body, instance, loop_scope, None);
                self.loop_depth -= 1;
                result?;
                Ok(())
            }
            Type::Array(elem, _) => {
                if let Some(wildcard) = wildcard {
                    self.sess.symbols.get_mut(wildcard).ty = Some((*elem).clone());
                }
                self.loop_depth += 1;
                let result = self.check_expr(body, instance, loop_scope, None);
                self.loop_depth -= 1;
                result?;
                Ok(())
            }
            Type::Named(type_name) => {
                let method = if *sorted {
                    format!("{type_name}::@@")
                } else {
                    format!("{type_name}::@")
                };
                let Some(symbol) = self.sess.scopes.lookup(scope, &method) else {
                    return Err(CompileError::new(
                        format!("type `{type_name}` is not iterable (no `{method}`)"),
                        iterable.span,
                    ));
                };
                // One receiver, one expression parameter; validated at
                // declaration time. The body argument stays opaque, but
                // `_` gets an inference variable so bindings inside the
                // body resolve.
                if let Some(wildcard) = wildcard {
                    let fresh = self.sess.types.fresh();
                    self.sess.symbols.get_mut(wildcard).ty = Some(fresh);
                }
                self.sess.bindings.bind(instance, expr.id, symbol);
                Ok(())
            }
            other => Err(CompileError::new(
                format!("type `{other}` is not iterable"),
                iterable.span,
            )),
        }
    }

    // ── Type lowering & helpers ────────────────────────────────────────

    /// Lower a syntactic type annotation, evaluating array sizes at
    /// compile time and canonicalizing them to counts.
    fn lower_ann(&mut self, ann: &TypeAnn, instance: InstanceId, scope: ScopeId) -> CheckResult<Type> {
        match &ann.kind {
            TypeAnnKind::Named(name) => {
                if let Some(prim) = Prim::from_name(name) {
                    return Ok(Type::Prim(prim));
                }
                match self.sess.scopes.lookup(scope, name) {
                    Some(symbol) if self.sess.symbols.get(symbol).kind == SymbolKind::Type => {
                        Ok(Type::Named(name.clone()))
                    }
                    _ => Err(CompileError::new(format!("unknown type `{name}`"), ann.span)),
                }
            }
            TypeAnnKind::Array(elem, size) => {
                let elem_ty = self.lower_ann(elem, instance, scope)?;
                let Some(value) = self.try_evaluate(instance, size) else {
                    return Err(CompileError::new(
                        "array size must be a compile-time constant",
                        size.span,
                    ));
                };
                let Some(count) = value.as_int().filter(|v| *v >= 0) else {
                    return Err(CompileError::new(
                        "array size must be a non-negative integer",
                        size.span,
                    ));
                };
                Ok(Type::array(elem_ty, count as u64))
            }
        }
    }

    fn join(&mut self, a: &Type, b: &Type, span: Span) -> CheckResult<Type> {
        self.sess.types.unify(a, b).map_err(|(a, b)| {
            CompileError::new(format!("type mismatch: `{a}` vs `{b}`"), span)
        })
    }

    fn ensure_widens(&mut self, from: &Type, to: &Type, span: Span) -> CheckResult<()> {
        let from_r = self.sess.types.resolve(from);
        let to_r = self.sess.types.resolve(to);
        if matches!(from_r, Type::Var(_)) || matches!(to_r, Type::Var(_)) {
            return self.join(&from_r, &to_r, span).map(|_| ());
        }
        if widens_to(&from_r, &to_r) {
            return Ok(());
        }
        Err(CompileError::new(
            format!("type mismatch: expected `{to_r}`, got `{from_r}`"),
            span,
        ))
    }

    fn ensure_bool(&mut self, ty: &Type, span: Span) -> CheckResult<()> {
        match self.sess.types.resolve(ty) {
            Type::Prim(Prim::Bool) => Ok(()),
            other => Err(CompileError::new(
                format!("expected `bool`, got `{other}`"),
                span,
            )),
        }
    }

    fn ensure_integer(&mut self, ty: &Type, span: Span) -> CheckResult<()> {
        match self.sess.types.resolve(ty) {
            Type::Prim(p) if p.is_integer() || p == Prim::Bool => Ok(()),
            other => Err(CompileError::new(
                format!("expected an integer, got `{other}`"),
                span,
            )),
        }
    }

    fn ensure_literal_fits(&self, value: u64, prim: Prim, span: Span) -> CheckResult<()> {
        let fits = match prim {
            Prim::Unsigned(w) if w < 64 => value < (1u64 << w),
            Prim::Unsigned(_) => true,
            Prim::Signed(w) if w < 64 => value < (1u64 << (w - 1)),
            Prim::Signed(_) => value <= i64::MAX as u64,
            _ => false,
        };
        if !fits {
            return Err(CompileError::new(
                format!("literal `{value}` does not fit `{prim}`"),
                span,
            ));
        }
        Ok(())
    }

    // ── Compile-time queries ───────────────────────────────────────────

    fn ct_condition(&self, instance: InstanceId, expr: &Expr) -> Option<bool> {
        let view = AstView { modules: self.modules, instantiations: &self.insts };
        let mut eval = Evaluator::new(self.sess, view);
        eval.constexpr_condition(instance, expr)
    }

    fn try_evaluate(&self, instance: InstanceId, expr: &Expr) -> Option<CtValue> {
        let view = AstView { modules: self.modules, instantiations: &self.insts };
        let mut eval = Evaluator::new(self.sess, view);
        match eval.query(instance, expr) {
            CtOutcome::Known(value) => Some(value),
            _ => None,
        }
    }
}

/// The smallest unsigned type that can hold an array length.
fn fit_length(len: u64) -> Prim {
    match literal_type(len) {
        Prim::Bool => Prim::Unsigned(8),
        other => other,
    }
}
