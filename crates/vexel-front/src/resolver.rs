//! Symbol resolution and binding.
//!
//! Walks every module instance, predeclares top-level entities, binds
//! identifiers through the scope chain, rejects shadowing, and records
//! which assignments introduce new variables. Imports instantiate modules
//! per lexical scope: every instance gets its own scope and its own symbols
//! for the module's globals.

use log::debug;
use rustc_hash::FxHashMap;

use vexel_common::diag::CompileError;
use vexel_common::span::Span;
use vexel_parser::ast::expr::{Expr, ExprKind};
use vexel_parser::ast::stmt::{FuncDecl, Linkage, Param, Stmt, StmtKind, VarDecl};
use vexel_parser::ast::types::{Type, TypeAnn, TypeAnnKind};
use vexel_parser::ast::{decl_shape_eq, Module, NodeId};

use crate::program::{InstanceId, ModuleId, ModuleInfo};
use crate::scope::{ScopeId, Symbol, SymbolId, SymbolKind};
use crate::session::{DeclLoc, FuncSig, ParamSig, Session};

/// Resolve the whole program, starting from the entry module (instance 0).
pub fn resolve_program(sess: &mut Session) -> Result<(), CompileError> {
    let modules = std::mem::take(&mut sess.program.modules);
    let mut resolver = Resolver {
        modules: &modules,
        sess,
        stack: Vec::new(),
        scope_imports: FxHashMap::default(),
        scope_import_names: FxHashMap::default(),
        write_counts: FxHashMap::default(),
    };
    let result = resolver.run();
    let write_counts = std::mem::take(&mut resolver.write_counts);
    for (symbol, count) in write_counts {
        // A local introduced by assignment is immutable by default and is
        // promoted when further write sites are observed.
        if count > 1 {
            let sym = sess.symbols.get_mut(symbol);
            if sym.is_local {
                sym.mutable = true;
            }
        }
    }
    sess.program.modules = modules;
    result
}

/// Predeclare and resolve a monomorphized clone in its template's instance
/// scope. `receiver_types`/`param_types` carry the call signature.
pub fn resolve_instantiation(
    sess: &mut Session,
    instance: InstanceId,
    stmt: &Stmt,
    loc: DeclLoc,
    receiver_types: &[Type],
    param_types: &[Type],
) -> Result<SymbolId, CompileError> {
    let mut resolver = Resolver {
        modules: &[],
        sess,
        stack: Vec::new(),
        scope_imports: FxHashMap::default(),
        scope_import_names: FxHashMap::default(),
        write_counts: FxHashMap::default(),
    };
    let StmtKind::FuncDecl(func) = &stmt.kind else {
        return Err(CompileError::internal("instantiation is not a function", Some(stmt.span)));
    };
    let scope = resolver.sess.program.instance(instance).scope;
    let module = resolver.sess.program.instance(instance).module;
    let symbol = resolver.declare_function(func, stmt, instance, module, scope)?;
    resolver.resolve_function(func, stmt, instance, scope, loc, symbol)?;

    // Stamp the signature types onto the clone's parameters and symbols.
    let sig = resolver.sess.funcs.get_mut(&symbol).expect("sig was just inserted");
    for (param, ty) in sig.receivers.iter_mut().zip(receiver_types) {
        param.ty = Some(ty.clone());
    }
    for (param, ty) in sig.params.iter_mut().zip(param_types) {
        if !param.is_expr_param {
            param.ty = Some(ty.clone());
        }
    }
    sig.generic = false;
    let updates: Vec<(SymbolId, Option<Type>)> = sig
        .receivers
        .iter()
        .chain(sig.params.iter())
        .map(|p| (p.symbol, p.ty.clone()))
        .collect();
    for (sym, ty) in updates {
        sess.symbols.get_mut(sym).ty = ty;
    }
    Ok(symbol)
}

struct Resolver<'m, 's> {
    modules: &'m [ModuleInfo],
    sess: &'s mut Session,
    /// Modules currently being instantiated, for cycle detection.
    stack: Vec<ModuleId>,
    /// `(scope, module) -> instance` so a duplicate import in the same
    /// scope reuses the instance.
    scope_imports: FxHashMap<(ScopeId, ModuleId), InstanceId>,
    /// `(scope, terminal segment) -> module` for re-import equivalence of
    /// same-named modules from different paths.
    scope_import_names: FxHashMap<(ScopeId, String), ModuleId>,
    /// Write sites per symbol, for mutability promotion.
    write_counts: FxHashMap<SymbolId, u32>,
}

impl<'m, 's> Resolver<'m, 's> {
    fn run(&mut self) -> Result<(), CompileError> {
        debug_assert!(!self.modules.is_empty(), "loader must run first");
        let entry = ModuleId(0);
        self.instantiate(entry, None, None)?;
        debug!("resolved {} instance(s)", self.sess.program.instances.len());
        Ok(())
    }

    // ── Instantiation ──────────────────────────────────────────────────

    fn instantiate(
        &mut self,
        module: ModuleId,
        parent: Option<InstanceId>,
        import_span: Option<Span>,
    ) -> Result<InstanceId, CompileError> {
        if self.stack.contains(&module) {
            let modules = self.modules;
            let path = modules[module.0 as usize].path.display().to_string();
            return Err(match import_span {
                Some(span) => CompileError::new(format!("cyclic import of `{path}`"), span),
                None => CompileError::unlocated(format!("cyclic import of `{path}`")),
            });
        }
        self.stack.push(module);

        let scope = self.sess.scopes.push(None);
        let instance = self.sess.program.add_instance(module, scope, parent);
        debug!("instantiating module {:?} as instance {:?}", module, instance);

        let modules = self.modules;
        let ast: &'m Module = &modules[module.0 as usize].module;

        // Phase 1: predeclare every top-level function, global, and type.
        for (idx, stmt) in ast.statements.iter().enumerate() {
            self.predeclare(stmt, idx, instance, module, scope)?;
        }

        // Phase 2a: process top-level imports in declaration order so that
        // bodies anywhere in the module can see imported names.
        for stmt in &ast.statements {
            if matches!(stmt.kind, StmtKind::Import { .. }) {
                self.process_import(stmt, scope, instance)?;
            }
        }

        // Phase 2b: resolve bodies and initializers.
        for (idx, stmt) in ast.statements.iter().enumerate() {
            self.resolve_top_stmt(stmt, idx, instance, scope)?;
        }

        self.stack.pop();
        Ok(instance)
    }

    fn predeclare(
        &mut self,
        stmt: &Stmt,
        _idx: usize,
        instance: InstanceId,
        module: ModuleId,
        scope: ScopeId,
    ) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::FuncDecl(func) => {
                self.declare_function(func, stmt, instance, module, scope)?;
            }
            StmtKind::VarDecl(decl) => {
                self.check_shadowing(scope, &decl.name, stmt.span)?;
                let kind = if decl.mutable { SymbolKind::Variable } else { SymbolKind::Constant };
                let symbol = self.sess.symbols.add(Symbol {
                    id: SymbolId(0),
                    kind,
                    name: decl.name.clone(),
                    ty: None,
                    mutable: decl.mutable,
                    exported: decl.linkage == Linkage::Exported,
                    external: decl.linkage == Linkage::External,
                    decl: stmt.id,
                    decl_span: stmt.span,
                    module,
                    instance,
                    scope,
                    is_local: false,
                    expr_param: false,
                });
                self.sess.scopes.define(scope, decl.name.clone(), symbol);
                self.sess.bindings.bind(instance, stmt.id, symbol);
            }
            StmtKind::TypeDecl(decl) => {
                self.check_shadowing(scope, &decl.name, stmt.span)?;
                let symbol = self.sess.symbols.add(Symbol {
                    id: SymbolId(0),
                    kind: SymbolKind::Type,
                    name: decl.name.clone(),
                    ty: Some(Type::Named(decl.name.clone())),
                    mutable: false,
                    exported: false,
                    external: false,
                    decl: stmt.id,
                    decl_span: stmt.span,
                    module,
                    instance,
                    scope,
                    is_local: false,
                    expr_param: false,
                });
                self.sess.scopes.define(scope, decl.name.clone(), symbol);
                self.sess.bindings.bind(instance, stmt.id, symbol);
            }
            _ => {}
        }
        Ok(())
    }

    fn declare_function(
        &mut self,
        func: &FuncDecl,
        stmt: &Stmt,
        instance: InstanceId,
        module: ModuleId,
        scope: ScopeId,
    ) -> Result<SymbolId, CompileError> {
        let name = func.qualified_name();
        self.check_shadowing(scope, &name, stmt.span)?;
        if func.is_generic() && (func.exported || func.external) {
            return Err(CompileError::new(
                format!("generic function `{name}` may not be exported or external"),
                stmt.span,
            ));
        }
        let symbol = self.sess.symbols.add(Symbol {
            id: SymbolId(0),
            kind: SymbolKind::Function,
            name: name.clone(),
            ty: None,
            mutable: false,
            exported: func.exported,
            external: func.external,
            decl: stmt.id,
            decl_span: stmt.span,
            module,
            instance,
            scope,
            is_local: false,
            expr_param: false,
        });
        self.sess.scopes.define(scope, name, symbol);
        self.sess.bindings.bind(instance, stmt.id, symbol);
        Ok(symbol)
    }

    fn check_shadowing(&self, scope: ScopeId, name: &str, span: Span) -> Result<(), CompileError> {
        if self.sess.scopes.would_shadow(scope, name) {
            return Err(CompileError::new(
                format!("`{name}` shadows an existing declaration"),
                span,
            ));
        }
        Ok(())
    }

    // ── Top-level statements ───────────────────────────────────────────

    fn resolve_top_stmt(
        &mut self,
        stmt: &Stmt,
        idx: usize,
        instance: InstanceId,
        scope: ScopeId,
    ) -> Result<(), CompileError> {
        let module = self.sess.program.instance(instance).module;
        match &stmt.kind {
            StmtKind::FuncDecl(func) => {
                let symbol = self
                    .sess
                    .bindings
                    .resolve(instance, stmt.id)
                    .expect("function was predeclared");
                let loc = DeclLoc::Module { module: module.0 as usize, stmt: idx };
                self.resolve_function(func, stmt, instance, scope, loc, symbol)
            }
            StmtKind::VarDecl(decl) => {
                if let Some(ty) = &decl.ty {
                    self.resolve_type_ann(ty, scope, instance)?;
                }
                if let Some(init) = &decl.init {
                    self.resolve_expr(init, scope, instance)?;
                }
                Ok(())
            }
            StmtKind::Import { .. } => Ok(()), // handled in phase 2a
            StmtKind::TypeDecl(decl) => {
                for field in &decl.fields {
                    self.resolve_type_ann(&field.ty, scope, instance)?;
                }
                Ok(())
            }
            _ => self.resolve_stmt(stmt, scope, instance),
        }
    }

    fn resolve_function(
        &mut self,
        func: &FuncDecl,
        stmt: &Stmt,
        instance: InstanceId,
        enclosing: ScopeId,
        loc: DeclLoc,
        symbol: SymbolId,
    ) -> Result<(), CompileError> {
        let module = self.sess.program.instance(instance).module;
        let param_scope = self.sess.scopes.push(Some(enclosing));
        self.sess.node_scopes.insert((instance, stmt.id), param_scope);

        let mut bind_param = |resolver: &mut Self, param: &Param, is_receiver: bool| -> Result<ParamSig, CompileError> {
            resolver.check_shadowing(param_scope, &param.name, param.span)?;
            let sym = resolver.sess.symbols.add(Symbol {
                id: SymbolId(0),
                kind: SymbolKind::Variable,
                name: param.name.clone(),
                ty: None,
                // Receiver mutability is inferred later; the resolver
                // must not reject writes through receivers.
                mutable: is_receiver,
                exported: false,
                external: false,
                decl: param.id,
                decl_span: param.span,
                module,
                instance,
                scope: param_scope,
                is_local: true,
                expr_param: param.is_expr_param,
            });
            resolver.sess.scopes.define(param_scope, param.name.clone(), sym);
            resolver.sess.bindings.bind(instance, param.id, sym);
            Ok(ParamSig {
                name: param.name.clone(),
                ty: None,
                is_expr_param: param.is_expr_param,
                node: param.id,
                symbol: sym,
            })
        };

        let mut receivers = Vec::new();
        for param in &func.receivers {
            receivers.push(bind_param(self, param, true)?);
        }
        let mut params = Vec::new();
        for param in &func.params {
            params.push(bind_param(self, param, false)?);
        }

        for ann in func.receivers.iter().chain(&func.params).filter_map(|p| p.ty.as_ref()) {
            self.resolve_type_ann(ann, param_scope, instance)?;
        }
        if let Some(ret) = &func.ret {
            for ann in ret {
                self.resolve_type_ann(ann, param_scope, instance)?;
            }
        }

        self.sess.funcs.insert(
            symbol,
            FuncSig {
                symbol,
                name: func.qualified_name(),
                instance,
                receivers,
                params,
                ret: None,
                generic: func.is_generic(),
                external: func.external,
                exported: func.exported,
                has_body: func.body.is_some(),
                loc,
                decl_node: stmt.id,
                param_scope,
            },
        );

        if let Some(body) = &func.body {
            if func.is_generic() {
                self.forbid_imports(body)?;
            }
            self.resolve_expr(body, param_scope, instance)?;
        }
        Ok(())
    }

    /// Imports inside generic bodies would need re-instantiation per clone;
    /// they are rejected up front.
    fn forbid_imports(&self, body: &Expr) -> Result<(), CompileError> {
        let mut found: Option<Span> = None;
        vexel_parser::ast::walk::for_each_stmt_in_expr(body, &mut |stmt| {
            if matches!(stmt.kind, StmtKind::Import { .. }) && found.is_none() {
                found = Some(stmt.span);
            }
        });
        match found {
            Some(span) => Err(CompileError::new(
                "imports are not allowed inside generic function bodies",
                span,
            )),
            None => Ok(()),
        }
    }

    // ── Statements & expressions ───────────────────────────────────────

    fn resolve_stmt(
        &mut self,
        stmt: &Stmt,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.resolve_expr(expr, scope, instance),
            StmtKind::Return(Some(expr)) => self.resolve_expr(expr, scope, instance),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::VarDecl(decl) => self.resolve_local_decl(decl, stmt, scope, instance),
            StmtKind::FuncDecl(_) => Err(CompileError::new(
                "function declarations are only allowed at module top level",
                stmt.span,
            )),
            StmtKind::TypeDecl(_) => Err(CompileError::new(
                "type declarations are only allowed at module top level",
                stmt.span,
            )),
            StmtKind::Import { .. } => self.process_import(stmt, scope, instance),
            StmtKind::CondStmt { cond, then } => {
                self.resolve_expr(cond, scope, instance)?;
                self.resolve_stmt(then, scope, instance)
            }
        }
    }

    fn resolve_local_decl(
        &mut self,
        decl: &VarDecl,
        stmt: &Stmt,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        if decl.linkage != Linkage::Normal {
            return Err(CompileError::new(
                "exported and external declarations are only allowed at module top level",
                stmt.span,
            ));
        }
        if let Some(ty) = &decl.ty {
            self.resolve_type_ann(ty, scope, instance)?;
        }
        if let Some(init) = &decl.init {
            self.resolve_expr(init, scope, instance)?;
        }
        self.check_shadowing(scope, &decl.name, stmt.span)?;
        let module = self.sess.program.instance(instance).module;
        let symbol = self.sess.symbols.add(Symbol {
            id: SymbolId(0),
            kind: SymbolKind::Variable,
            name: decl.name.clone(),
            ty: None,
            mutable: decl.mutable,
            exported: false,
            external: false,
            decl: stmt.id,
            decl_span: stmt.span,
            module,
            instance,
            scope,
            is_local: true,
            expr_param: false,
        });
        self.sess.scopes.define(scope, decl.name.clone(), symbol);
        self.sess.bindings.bind(instance, stmt.id, symbol);
        Ok(())
    }

    fn resolve_type_ann(
        &mut self,
        ann: &TypeAnn,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        match &ann.kind {
            TypeAnnKind::Named(_) => Ok(()),
            TypeAnnKind::Array(elem, size) => {
                self.resolve_type_ann(elem, scope, instance)?;
                self.resolve_expr(size, scope, instance)
            }
        }
    }

    fn resolve_expr(
        &mut self,
        expr: &Expr,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Int { .. }
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Char(_)
            | ExprKind::Resource(_)
            | ExprKind::Process(_) => Ok(()),
            ExprKind::Ident(name) => {
                if let Some(symbol) = self.sess.scopes.lookup(scope, name) {
                    self.sess.bindings.bind(instance, expr.id, symbol);
                }
                // Unresolved identifiers are left for the type checker:
                // they may be forward references satisfied by later
                // imports, or genuine errors reported there.
                Ok(())
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs, scope, instance)?;
                self.resolve_expr(rhs, scope, instance)
            }
            ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => {
                self.resolve_expr(operand, scope, instance)
            }
            ExprKind::Call { callee, receivers, args } => {
                for receiver in receivers {
                    self.resolve_expr(receiver, scope, instance)?;
                }
                for arg in args {
                    self.resolve_expr(arg, scope, instance)?;
                }
                // Receiver calls dispatch on the receiver's type; only
                // plain calls can be bound by name here.
                if receivers.is_empty() {
                    if let Some(symbol) = self.sess.scopes.lookup(scope, callee) {
                        self.sess.bindings.bind(instance, expr.id, symbol);
                    }
                }
                Ok(())
            }
            ExprKind::Index { base, index } => {
                self.resolve_expr(base, scope, instance)?;
                self.resolve_expr(index, scope, instance)
            }
            ExprKind::Member { base, .. } => self.resolve_expr(base, scope, instance),
            ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
                for elem in elems {
                    self.resolve_expr(elem, scope, instance)?;
                }
                Ok(())
            }
            ExprKind::Block { stmts, tail } => {
                let block_scope = self.sess.scopes.push(Some(scope));
                self.sess.node_scopes.insert((instance, expr.id), block_scope);
                for stmt in stmts {
                    self.resolve_stmt(stmt, block_scope, instance)?;
                }
                if let Some(tail) = tail {
                    self.resolve_expr(tail, block_scope, instance)?;
                }
                Ok(())
            }
            ExprKind::Conditional { cond, then, alt } => {
                self.resolve_expr(cond, scope, instance)?;
                self.resolve_expr(then, scope, instance)?;
                self.resolve_expr(alt, scope, instance)
            }
            ExprKind::Cast { target, operand } => {
                self.resolve_type_ann(target, scope, instance)?;
                self.resolve_expr(operand, scope, instance)
            }
            ExprKind::Assign { target, value } => {
                self.resolve_expr(value, scope, instance)?;
                self.resolve_assign_target(expr, target, scope, instance)
            }
            ExprKind::Range { lo, hi } => {
                self.resolve_expr(lo, scope, instance)?;
                self.resolve_expr(hi, scope, instance)
            }
            ExprKind::Iterate { iterable, body, .. } => {
                self.resolve_expr(iterable, scope, instance)?;
                let loop_scope = self.sess.scopes.push(Some(scope));
                self.sess.node_scopes.insert((instance, expr.id), loop_scope);
                let module = self.sess.program.instance(instance).module;
                let wildcard = self.sess.symbols.add(Symbol {
                    id: SymbolId(0),
                    kind: SymbolKind::Variable,
                    name: "_".into(),
                    ty: None,
                    mutable: false,
                    exported: false,
                    external: false,
                    decl: expr.id,
                    decl_span: expr.span,
                    module,
                    instance,
                    scope: loop_scope,
                    is_local: true,
                    expr_param: false,
                });
                self.sess.scopes.define(loop_scope, "_".into(), wildcard);
                self.resolve_expr(body, loop_scope, instance)
            }
            ExprKind::Repeat { cond, body } => {
                self.resolve_expr(cond, scope, instance)?;
                self.resolve_expr(body, scope, instance)
            }
        }
    }

    /// Resolve the left-hand side of an assignment. An unresolvable bare
    /// identifier introduces a new local in the current scope; this is the
    /// only declaration form for block-local variables besides `name: type`.
    fn resolve_assign_target(
        &mut self,
        assign: &Expr,
        target: &Expr,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if let Some(symbol) = self.sess.scopes.lookup(scope, name) {
                    self.sess.bindings.bind(instance, target.id, symbol);
                    *self.write_counts.entry(symbol).or_insert(0) += 1;
                } else {
                    self.introduce_local(name, target, scope, instance)?;
                    self.sess.bindings.mark_new_variable(instance, assign.id);
                }
                Ok(())
            }
            ExprKind::TupleLit(elems) => {
                // Multi-assign `a, b = f()`; each target may introduce a
                // new local independently.
                let mut any_new = false;
                for elem in elems {
                    let ExprKind::Ident(name) = &elem.kind else {
                        return Err(CompileError::new(
                            "multi-assignment targets must be identifiers",
                            elem.span,
                        ));
                    };
                    if let Some(symbol) = self.sess.scopes.lookup(scope, name) {
                        self.sess.bindings.bind(instance, elem.id, symbol);
                        *self.write_counts.entry(symbol).or_insert(0) += 1;
                    } else {
                        self.introduce_local(name, elem, scope, instance)?;
                        self.sess.bindings.mark_new_variable(instance, elem.id);
                        any_new = true;
                    }
                }
                if any_new {
                    self.sess.bindings.mark_new_variable(instance, assign.id);
                }
                Ok(())
            }
            ExprKind::Index { base, index } => {
                self.resolve_expr(index, scope, instance)?;
                self.note_root_write(base, scope, instance);
                self.resolve_expr(base, scope, instance)
            }
            ExprKind::Member { base, .. } => {
                self.note_root_write(base, scope, instance);
                self.resolve_expr(base, scope, instance)
            }
            _ => Err(CompileError::new("expression is not assignable", target.span)),
        }
    }

    fn introduce_local(
        &mut self,
        name: &str,
        target: &Expr,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        // `lookup` already failed, so this can only collide with `_`.
        self.check_shadowing(scope, name, target.span)?;
        let module = self.sess.program.instance(instance).module;
        let symbol = self.sess.symbols.add(Symbol {
            id: SymbolId(0),
            kind: SymbolKind::Variable,
            name: name.to_string(),
            ty: None,
            mutable: false,
            exported: false,
            external: false,
            decl: target.id,
            decl_span: target.span,
            module,
            instance,
            scope,
            is_local: true,
            expr_param: false,
        });
        self.sess.scopes.define(scope, name.to_string(), symbol);
        self.sess.bindings.bind(instance, target.id, symbol);
        self.write_counts.insert(symbol, 1);
        Ok(())
    }

    /// Record a write against the root identifier of an lvalue chain, so
    /// `x[0] = v` and `p.x = v` promote `x`/`p` to mutable.
    fn note_root_write(&mut self, mut base: &Expr, scope: ScopeId, _instance: InstanceId) {
        loop {
            match &base.kind {
                ExprKind::Index { base: inner, .. } | ExprKind::Member { base: inner, .. } => {
                    base = inner;
                }
                ExprKind::Ident(name) => {
                    if let Some(symbol) = self.sess.scopes.lookup(scope, name) {
                        *self.write_counts.entry(symbol).or_insert(0) += 1;
                    }
                    return;
                }
                _ => return,
            }
        }
    }

    // ── Imports ────────────────────────────────────────────────────────

    fn process_import(
        &mut self,
        stmt: &Stmt,
        scope: ScopeId,
        instance: InstanceId,
    ) -> Result<(), CompileError> {
        let StmtKind::Import { segments } = &stmt.kind else { unreachable!() };
        let display = format!("::{}", segments.join("::"));
        let Some(&target) = self.sess.import_map.get(&stmt.id) else {
            return Err(CompileError::new(format!("cannot resolve import `{display}`"), stmt.span));
        };

        // Same module already instantiated in this scope: reuse.
        if self.scope_imports.contains_key(&(scope, target)) {
            return Ok(());
        }

        // A different module with the same terminal name in this scope:
        // accept only if the two modules are declaration-equivalent.
        let terminal = segments.last().cloned().unwrap_or_default();
        if let Some(&other) = self.scope_import_names.get(&(scope, terminal.clone())) {
            if other != target {
                let modules = self.modules;
                let a = &modules[other.0 as usize].module;
                let b = &modules[target.0 as usize].module;
                if modules_equivalent(a, b) {
                    // Equivalent redefinition: keep the first instance.
                    self.scope_imports.insert((scope, target), self.scope_imports[&(scope, other)]);
                    return Ok(());
                }
                return Err(CompileError::new(
                    format!("ambiguous re-import `{display}`: declarations differ"),
                    stmt.span,
                ));
            }
        }

        let child = self.instantiate(target, Some(instance), Some(stmt.span))?;
        self.scope_imports.insert((scope, target), child);
        self.scope_import_names.insert((scope, terminal), target);
        self.sess.program.imports.push((instance, child));

        // Inject the instance's visible top-level names into the importing
        // scope: its own functions, types, and exported globals. Names the
        // instance itself received from nested imports stay private.
        let child_scope = self.sess.program.instance(child).scope;
        let mut injected: Vec<(String, SymbolId)> = self
            .sess
            .scopes
            .names_in(child_scope)
            .filter(|(_, sym)| {
                let symbol = self.sess.symbols.get(**sym);
                if symbol.instance != child {
                    return false;
                }
                match symbol.kind {
                    SymbolKind::Function | SymbolKind::Type => true,
                    SymbolKind::Variable | SymbolKind::Constant => symbol.exported,
                }
            })
            .map(|(name, sym)| (name.clone(), *sym))
            .collect();
        injected.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, symbol) in injected {
            if let Some(existing) = self.sess.scopes.lookup(scope, &name) {
                if existing != symbol {
                    return Err(CompileError::new(
                        format!("import `{display}` redefines `{name}`"),
                        stmt.span,
                    ));
                }
                continue;
            }
            self.sess.scopes.define(scope, name, symbol);
        }
        Ok(())
    }
}

/// Declaration-level equivalence of two modules, for re-imports of
/// same-named modules from different paths: functions and types must match
/// shape-for-shape; constants may instead agree after literal evaluation.
fn modules_equivalent(a: &Module, b: &Module) -> bool {
    let names = |m: &Module| -> Vec<String> {
        m.statements
            .iter()
            .filter_map(|s| decl_name(s))
            .collect()
    };
    let mut names_a = names(a);
    let mut names_b = names(b);
    names_a.sort();
    names_b.sort();
    if names_a != names_b {
        return false;
    }
    for stmt_a in &a.statements {
        let Some(name) = decl_name(stmt_a) else { continue };
        let Some(stmt_b) = b
            .statements
            .iter()
            .find(|s| decl_name(s).as_deref() == Some(name.as_str()))
        else {
            return false;
        };
        if decl_shape_eq(stmt_a, stmt_b) {
            continue;
        }
        // Constants get a second chance: evaluation equality.
        if let (StmtKind::VarDecl(da), StmtKind::VarDecl(db)) = (&stmt_a.kind, &stmt_b.kind) {
            if !da.mutable && !db.mutable {
                if let (Some(va), Some(vb)) =
                    (da.init.as_ref().and_then(literal_eval), db.init.as_ref().and_then(literal_eval))
                {
                    if va == vb {
                        continue;
                    }
                }
            }
        }
        return false;
    }
    true
}

fn decl_name(stmt: &Stmt) -> Option<String> {
    match &stmt.kind {
        StmtKind::FuncDecl(f) => Some(f.qualified_name()),
        StmtKind::VarDecl(v) => Some(v.name.clone()),
        StmtKind::TypeDecl(t) => Some(t.name.clone()),
        _ => None,
    }
}

/// Tiny integer-arithmetic evaluator used only for re-import constant
/// comparison, before types exist.
fn literal_eval(expr: &Expr) -> Option<i128> {
    use vexel_parser::ast::expr::{BinOp, UnOp};
    match &expr.kind {
        ExprKind::Int { value, .. } => Some(*value as i128),
        ExprKind::Unary { op: UnOp::Neg, operand } => Some(-literal_eval(operand)?),
        ExprKind::Binary { op, lhs, rhs } => {
            let l = literal_eval(lhs)?;
            let r = literal_eval(rhs)?;
            match op {
                BinOp::Add => Some(l + r),
                BinOp::Sub => Some(l - r),
                BinOp::Mul => Some(l * r),
                BinOp::Div => (r != 0).then(|| l / r),
                _ => None,
            }
        }
        _ => None,
    }
}
