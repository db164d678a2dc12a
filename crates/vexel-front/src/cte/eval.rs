//! The compile-time evaluator: a tree-walking interpreter over the
//! resolved, typed AST.
//!
//! The public API is three-valued: [`CtOutcome::Known`] with a value,
//! [`CtOutcome::Unknown`] when the expression is not compile-time
//! determinable (runtime inputs, mutable globals), and [`CtOutcome::Error`]
//! for hard evaluation failures (division by zero, out-of-range index,
//! writes to globals or receivers, external calls, exceeded bounds).
//! `try_evaluate` collapses Unknown and Error into absence.
//!
//! Termination is guaranteed by a recursion bound and a cumulative loop
//! iteration bound per query.

use rustc_hash::{FxHashMap, FxHashSet};

use vexel_parser::ast::expr::{BinOp, Expr, ExprKind, UnOp};
use vexel_parser::ast::stmt::{Stmt, StmtKind};
use vexel_parser::ast::types::{Prim, Type, TypeAnn, TypeAnnKind};
use vexel_parser::ast::NodeId;

use crate::cte::value::CtValue;
use crate::program::InstanceId;
use crate::scope::{SymbolId, SymbolKind};
use crate::session::{AstView, Session};

/// Maximum call depth during evaluation.
pub const RECURSION_LIMIT: u32 = 1000;
/// Maximum cumulative loop iterations per query.
pub const STEP_LIMIT: u64 = 1_000_000;

/// Result of a compile-time query.
#[derive(Debug, Clone, PartialEq)]
pub enum CtOutcome {
    Known(CtValue),
    Unknown,
    Error(String),
}

impl CtOutcome {
    pub fn known(self) -> Option<CtValue> {
        match self {
            CtOutcome::Known(v) => Some(v),
            _ => None,
        }
    }
}

/// Internal non-value outcomes, threaded through `Result::Err`.
#[derive(Debug, Clone)]
enum Stop {
    Unknown,
    Error(String),
    Return(Option<CtValue>),
    Break,
    Continue,
}

type EvalResult<T> = Result<T, Stop>;

fn err<T>(message: impl Into<String>) -> EvalResult<T> {
    Err(Stop::Error(message.into()))
}

/// An expression parameter bound at a call site: the caller-side expression
/// is substituted (re-evaluated in the caller's frame) at each use.
#[derive(Clone, Copy)]
struct ExprBinding<'a> {
    expr: &'a Expr,
    frame: usize,
    /// For iteration bodies: the caller's `_` symbol, bound to the current
    /// element before each substitution.
    wildcard: Option<SymbolId>,
}

struct Frame<'a> {
    locals: FxHashMap<SymbolId, CtValue>,
    /// Receiver parameters (and loop variables): reads fine, writes error.
    pinned: FxHashSet<SymbolId>,
    expr_params: FxHashMap<SymbolId, ExprBinding<'a>>,
    instance: InstanceId,
}

impl<'a> Frame<'a> {
    fn new(instance: InstanceId) -> Self {
        Self {
            locals: FxHashMap::default(),
            pinned: FxHashSet::default(),
            expr_params: FxHashMap::default(),
            instance,
        }
    }
}

pub struct Evaluator<'a> {
    sess: &'a Session,
    view: AstView<'a>,
    seeded: Option<&'a FxHashMap<SymbolId, CtValue>>,
    frames: Vec<Frame<'a>>,
    depth: u32,
    steps: u64,
    /// Global constants currently being evaluated (cycle detection).
    const_stack: Vec<SymbolId>,
    /// Innermost loop element, for expression-parameter substitution.
    wildcard_stack: Vec<CtValue>,
    /// When set, every successfully evaluated expression and every global
    /// symbol read is recorded for the optimizer.
    pub observe: bool,
    pub observed_values: Vec<((InstanceId, NodeId), CtValue)>,
    pub observed_reads: FxHashSet<SymbolId>,
}

impl<'a> Evaluator<'a> {
    pub fn new(sess: &'a Session, view: AstView<'a>) -> Self {
        Self {
            sess,
            view,
            seeded: None,
            frames: Vec::new(),
            depth: 0,
            steps: 0,
            const_stack: Vec::new(),
            wildcard_stack: Vec::new(),
            observe: false,
            observed_values: Vec::new(),
            observed_reads: FxHashSet::default(),
        }
    }

    /// Seed known global-constant values (promoted by the optimizer).
    pub fn with_seeds(mut self, seeded: &'a FxHashMap<SymbolId, CtValue>) -> Self {
        self.seeded = Some(seeded);
        self
    }

    // ── Public queries ─────────────────────────────────────────────────

    /// Evaluate an expression in an empty frame of the given instance.
    pub fn query(&mut self, instance: InstanceId, expr: &'a Expr) -> CtOutcome {
        self.frames.clear();
        self.frames.push(Frame::new(instance));
        self.depth = 0;
        self.steps = 0;
        self.const_stack.clear();
        self.wildcard_stack.clear();
        let result = self.eval_expr(expr, 0);
        self.finish(result)
    }

    /// Evaluate the body of a zero-parameter function (foldability probe).
    pub fn query_function_body(&mut self, instance: InstanceId, body: &'a Expr) -> CtOutcome {
        self.query(instance, body)
    }

    /// `query` collapsed to an optional value.
    pub fn try_evaluate(&mut self, instance: InstanceId, expr: &'a Expr) -> Option<CtValue> {
        match self.query(instance, expr) {
            CtOutcome::Known(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness of a compile-time-determinable condition.
    pub fn constexpr_condition(&mut self, instance: InstanceId, expr: &'a Expr) -> Option<bool> {
        self.try_evaluate(instance, expr).and_then(|v| v.truthy())
    }

    fn finish(&mut self, result: EvalResult<Option<CtValue>>) -> CtOutcome {
        match result {
            Ok(Some(value)) => CtOutcome::Known(value),
            Ok(None) => CtOutcome::Unknown,
            Err(Stop::Return(Some(value))) => CtOutcome::Known(value),
            Err(Stop::Return(None)) => CtOutcome::Unknown,
            Err(Stop::Unknown) => CtOutcome::Unknown,
            Err(Stop::Error(message)) => CtOutcome::Error(message),
            Err(Stop::Break | Stop::Continue) => {
                CtOutcome::Error("break/continue outside of a loop".into())
            }
        }
    }

    fn instance(&self, frame: usize) -> InstanceId {
        self.frames[frame].instance
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn eval_stmt(&mut self, stmt: &'a Stmt, frame: usize) -> EvalResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(expr, frame)?;
                Ok(())
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, frame)?,
                    None => None,
                };
                Err(Stop::Return(value))
            }
            StmtKind::Break => Err(Stop::Break),
            StmtKind::Continue => Err(Stop::Continue),
            StmtKind::VarDecl(decl) => {
                let instance = self.instance(frame);
                let Some(symbol) = self.sess.bindings.resolve(instance, stmt.id) else {
                    return Err(Stop::Unknown);
                };
                let mut value = match &decl.init {
                    Some(init) => self.eval_value(init, frame)?,
                    None => CtValue::Uninit,
                };
                if value != CtValue::Uninit {
                    if let Some(ty) = &self.sess.symbols.get(symbol).ty {
                        value = self.coerce(value, ty)?;
                    }
                }
                self.frames[frame].locals.insert(symbol, value);
                Ok(())
            }
            StmtKind::CondStmt { cond, then } => {
                let cond = self.eval_value(cond, frame)?;
                match cond.truthy() {
                    Some(true) => self.eval_stmt(then, frame),
                    Some(false) => Ok(()),
                    None => err("condition is not a boolean"),
                }
            }
            StmtKind::Import { .. } => Ok(()),
            StmtKind::FuncDecl(_) | StmtKind::TypeDecl(_) => Ok(()),
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    /// Evaluate an expression that must produce a value.
    fn eval_value(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<CtValue> {
        match self.eval_expr(expr, frame)? {
            Some(value) => Ok(value),
            None => Err(Stop::Unknown),
        }
    }

    fn eval_expr(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<Option<CtValue>> {
        let result = self.eval_expr_inner(expr, frame)?;
        if self.observe {
            if let Some(value) = &result {
                self.observed_values.push(((self.instance(frame), expr.id), value.clone()));
            }
        }
        Ok(result)
    }

    fn eval_expr_inner(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<Option<CtValue>> {
        match &expr.kind {
            ExprKind::Int { value, suffix } => Ok(Some(match suffix {
                Some(Prim::Signed(_)) => CtValue::Int(*value as i64),
                _ => CtValue::Uint(*value),
            })),
            ExprKind::Float(value) => Ok(Some(CtValue::Float(*value))),
            ExprKind::Str(value) => Ok(Some(CtValue::Str(value.clone()))),
            ExprKind::Char(value) => Ok(Some(CtValue::Uint(*value as u64))),
            ExprKind::Ident(_) => self.eval_ident(expr, frame).map(Some),
            ExprKind::Binary { op, lhs, rhs } => {
                self.eval_binary(expr, *op, lhs, rhs, frame).map(Some)
            }
            ExprKind::Unary { op, operand } => self.eval_unary(expr, *op, operand, frame).map(Some),
            ExprKind::Call { .. } => self.eval_call(expr, frame),
            ExprKind::Index { base, index } => {
                let base = self.eval_value(base, frame)?;
                let index = self.eval_value(index, frame)?;
                self.index_value(&base, &index).map(Some)
            }
            ExprKind::Member { base, field } => {
                let base = self.eval_value(base, frame)?;
                match &base {
                    CtValue::Composite(c) => match c.field(field) {
                        Some(value) => Ok(Some(value.clone())),
                        None => err(format!("`{}` has no field `{field}`", c.name)),
                    },
                    _ => err("member access on a non-composite value"),
                }
            }
            ExprKind::ArrayLit(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval_value(elem, frame)?);
                }
                if let Some(Type::Array(elem_ty, _)) = self.sess.types.expr_type(expr.id) {
                    let elem_ty = elem_ty.clone();
                    for value in &mut values {
                        *value = self.coerce(value.clone(), &elem_ty)?;
                    }
                }
                Ok(Some(CtValue::array(values)))
            }
            ExprKind::TupleLit(elems) => {
                let mut fields = Vec::with_capacity(elems.len());
                for (i, elem) in elems.iter().enumerate() {
                    fields.push((format!("__{i}"), self.eval_value(elem, frame)?));
                }
                let name = match self.sess.types.expr_type(expr.id) {
                    Some(Type::Named(name)) => name.clone(),
                    _ => format!("tuple{}", elems.len()),
                };
                Ok(Some(CtValue::composite(name, fields)))
            }
            ExprKind::Block { stmts, tail } => {
                for stmt in stmts {
                    self.eval_stmt(stmt, frame)?;
                }
                match tail {
                    Some(tail) => self.eval_expr(tail, frame),
                    None => Ok(None),
                }
            }
            ExprKind::Conditional { cond, then, alt } => {
                let cond = self.eval_value(cond, frame)?;
                match cond.truthy() {
                    Some(true) => self.eval_expr(then, frame),
                    Some(false) => self.eval_expr(alt, frame),
                    None => err("condition is not a boolean"),
                }
            }
            ExprKind::Cast { target, operand } => {
                let value = self.eval_value(operand, frame)?;
                self.cast_value(value, target, frame).map(Some)
            }
            ExprKind::Assign { target, value } => {
                self.eval_assign(expr, target, value, frame)?;
                Ok(None)
            }
            ExprKind::Range { lo, hi } => {
                let lo = self.eval_value(lo, frame)?;
                let hi = self.eval_value(hi, frame)?;
                let (Some(lo), Some(hi)) = (lo.as_int(), hi.as_int()) else {
                    return err("range bounds must be integers");
                };
                if hi < lo {
                    return err("range upper bound is below the lower bound");
                }
                let len = (hi - lo) as u64;
                if len > STEP_LIMIT {
                    return err("range exceeds the compile-time size bound");
                }
                let values = (lo..hi).map(|v| CtValue::Int(v as i64)).collect();
                Ok(Some(CtValue::array(values)))
            }
            ExprKind::Length(operand) => {
                let value = self.eval_value(operand, frame)?;
                match &value {
                    CtValue::Array(values) => Ok(Some(CtValue::Uint(values.len() as u64))),
                    CtValue::Str(s) => Ok(Some(CtValue::Uint(s.len() as u64))),
                    _ => err("`|x|` requires an array or string"),
                }
            }
            ExprKind::Iterate { .. } => {
                self.eval_iterate(expr, frame)?;
                Ok(None)
            }
            ExprKind::Repeat { cond, body } => {
                loop {
                    self.bump_steps()?;
                    let cond = self.eval_value(cond, frame)?;
                    match cond.truthy() {
                        Some(true) => {}
                        Some(false) => break,
                        None => return err("repeat condition is not a boolean"),
                    }
                    match self.eval_expr(body, frame) {
                        Ok(_) => {}
                        Err(Stop::Break) => break,
                        Err(Stop::Continue) => continue,
                        Err(stop) => return Err(stop),
                    }
                }
                Ok(None)
            }
            ExprKind::Resource(path) => self.eval_resource(path).map(Some),
            ExprKind::Process(cmd) => self.eval_process(cmd).map(Some),
        }
    }

    // ── Identifiers & globals ──────────────────────────────────────────

    fn eval_ident(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<CtValue> {
        let instance = self.instance(frame);
        let Some(symbol) = self.sess.bindings.resolve(instance, expr.id) else {
            return Err(Stop::Unknown);
        };

        if let Some(binding) = self.frames[frame].expr_params.get(&symbol).copied() {
            return self.eval_expr_param(binding);
        }
        if let Some(value) = self.frames[frame].locals.get(&symbol) {
            if *value == CtValue::Uninit {
                return err(format!(
                    "use of uninitialized variable `{}`",
                    self.sess.symbols.get(symbol).name
                ));
            }
            return Ok(value.clone());
        }

        let info = self.sess.symbols.get(symbol);
        if info.is_local {
            // A local of an enclosing runtime frame we know nothing about.
            return Err(Stop::Unknown);
        }

        if self.observe {
            self.observed_reads.insert(symbol);
        }
        if let Some(seeded) = self.seeded {
            if let Some(value) = seeded.get(&symbol) {
                return Ok(value.clone());
            }
        }
        match info.kind {
            SymbolKind::Constant => self.global_const_value(symbol),
            _ => Err(Stop::Unknown),
        }
    }

    /// Substitute an expression parameter: evaluate the caller-side
    /// expression in the caller's frame, first binding the caller's `_`
    /// to the current loop element if this is an iteration body.
    fn eval_expr_param(&mut self, binding: ExprBinding<'a>) -> EvalResult<CtValue> {
        if let Some(wildcard) = binding.wildcard {
            let Some(element) = self.wildcard_stack.last().cloned() else {
                return err("iteration body used outside of an element context");
            };
            self.frames[binding.frame].locals.insert(wildcard, element);
            self.frames[binding.frame].pinned.insert(wildcard);
        }
        self.eval_value(binding.expr, binding.frame)
    }

    fn global_const_value(&mut self, symbol: SymbolId) -> EvalResult<CtValue> {
        if self.const_stack.contains(&symbol) {
            return err(format!(
                "cycle through constant `{}`",
                self.sess.symbols.get(symbol).name
            ));
        }
        let info = self.sess.symbols.get(symbol);
        let instance = info.instance;
        let module = info.module;
        let decl = info.decl;
        let declared_ty = info.ty.clone();

        let view = self.view;
        let module_ast = &view.modules[module.0 as usize].module;
        let Some(init) = module_ast.statements.iter().find_map(|s| {
            if s.id != decl {
                return None;
            }
            match &s.kind {
                StmtKind::VarDecl(v) => v.init.as_ref(),
                _ => None,
            }
        }) else {
            return Err(Stop::Unknown);
        };

        self.const_stack.push(symbol);
        self.frames.push(Frame::new(instance));
        let frame = self.frames.len() - 1;
        let result = self.eval_value(init, frame);
        self.frames.pop();
        self.const_stack.pop();

        let mut value = result?;
        if let Some(ty) = &declared_ty {
            value = self.coerce(value, ty)?;
        }
        Ok(value)
    }

    // ── Operators ──────────────────────────────────────────────────────

    fn eval_binary(
        &mut self,
        expr: &'a Expr,
        op: BinOp,
        lhs: &'a Expr,
        rhs: &'a Expr,
        frame: usize,
    ) -> EvalResult<CtValue> {
        if op.is_logical() {
            let lhs = self.eval_value(lhs, frame)?;
            let Some(lhs) = lhs.truthy() else {
                return err("logical operand is not a boolean");
            };
            return match (op, lhs) {
                (BinOp::And, false) => Ok(CtValue::Bool(false)),
                (BinOp::Or, true) => Ok(CtValue::Bool(true)),
                _ => {
                    let rhs = self.eval_value(rhs, frame)?;
                    match rhs.truthy() {
                        Some(b) => Ok(CtValue::Bool(b)),
                        None => err("logical operand is not a boolean"),
                    }
                }
            };
        }

        let lv = self.eval_value(lhs, frame)?;

        // Operator overload: the checker bound this node to `T::op`.
        if matches!(lv, CtValue::Composite(_)) {
            let instance = self.instance(frame);
            if let Some(method) = self.sess.bindings.resolve(instance, expr.id) {
                let rv = self.eval_value(rhs, frame)?;
                return self.call_function(method, vec![lv], CallArgs::Values(vec![rv]), frame);
            }
        }

        let rv = self.eval_value(rhs, frame)?;
        self.apply_binary(expr, op, lv, rv)
    }

    fn apply_binary(&self, expr: &Expr, op: BinOp, lv: CtValue, rv: CtValue) -> EvalResult<CtValue> {
        use BinOp::*;

        if op.is_comparison() {
            return self.compare(op, &lv, &rv);
        }

        // Floats.
        if let (CtValue::Float(a), CtValue::Float(b)) = (&lv, &rv) {
            let value = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => {
                    if *b == 0.0 {
                        return err("division by zero");
                    }
                    a / b
                }
                _ => return err("unsupported float operator"),
            };
            return Ok(CtValue::Float(value));
        }

        let (Some(a), Some(b)) = (lv.as_int(), rv.as_int()) else {
            return err("operands are not numeric");
        };
        let value: i128 = match op {
            Add => a + b,
            Sub => a - b,
            Mul => a.checked_mul(b).ok_or(Stop::Error("integer overflow".into()))?,
            Div => {
                if b == 0 {
                    return err("division by zero");
                }
                a / b
            }
            Rem => {
                if b == 0 {
                    return err("modulo by zero");
                }
                a % b
            }
            BitAnd => a & b,
            BitOr => a | b,
            BitXor => a ^ b,
            Shl => {
                if !(0..128).contains(&b) {
                    return err("shift amount out of range");
                }
                a.checked_shl(b as u32).unwrap_or(0)
            }
            Shr => {
                if !(0..128).contains(&b) {
                    return err("shift amount out of range");
                }
                a >> b
            }
            _ => unreachable!("logical/comparison handled above"),
        };

        let signed = matches!(lv, CtValue::Int(_)) || matches!(rv, CtValue::Int(_));
        self.fit_int(expr, value, signed)
    }

    /// Wrap an integer result to the checked type of the expression when
    /// known, otherwise require it to fit the natural 64-bit carrier.
    fn fit_int(&self, expr: &Expr, value: i128, signed: bool) -> EvalResult<CtValue> {
        if let Some(Type::Prim(prim)) = self.sess.types.expr_type(expr.id) {
            match prim {
                Prim::Unsigned(w) if *w > 0 && *w < 64 => {
                    let mask = (1i128 << w) - 1;
                    return Ok(CtValue::Uint((value & mask) as u64));
                }
                Prim::Unsigned(_) => return Ok(CtValue::Uint(value as u64)),
                Prim::Signed(w) if *w > 0 && *w < 64 => {
                    let m = 1i128 << (w - 1);
                    let wrapped = ((value + m).rem_euclid(1i128 << w)) - m;
                    return Ok(CtValue::Int(wrapped as i64));
                }
                Prim::Signed(_) => return Ok(CtValue::Int(value as i64)),
                Prim::Bool => return Ok(CtValue::Bool(value != 0)),
                _ => {}
            }
        }
        if signed {
            if value < i64::MIN as i128 || value > i64::MAX as i128 {
                return err("integer overflow");
            }
            Ok(CtValue::Int(value as i64))
        } else {
            if value < 0 || value > u64::MAX as i128 {
                return err("integer overflow");
            }
            Ok(CtValue::Uint(value as u64))
        }
    }

    fn compare(&self, op: BinOp, lv: &CtValue, rv: &CtValue) -> EvalResult<CtValue> {
        use std::cmp::Ordering;
        let ord = match (lv, rv) {
            (CtValue::Str(a), CtValue::Str(b)) => a.cmp(b),
            (CtValue::Float(a), CtValue::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            _ => match (lv.as_int(), rv.as_int()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => return err("operands are not comparable"),
            },
        };
        let result = match op {
            BinOp::Eq => ord == Ordering::Equal,
            BinOp::Ne => ord != Ordering::Equal,
            BinOp::Lt => ord == Ordering::Less,
            BinOp::Le => ord != Ordering::Greater,
            BinOp::Gt => ord == Ordering::Greater,
            BinOp::Ge => ord != Ordering::Less,
            _ => unreachable!(),
        };
        Ok(CtValue::Bool(result))
    }

    fn eval_unary(
        &mut self,
        expr: &'a Expr,
        op: UnOp,
        operand: &'a Expr,
        frame: usize,
    ) -> EvalResult<CtValue> {
        let value = self.eval_value(operand, frame)?;
        match op {
            UnOp::Neg => match value {
                CtValue::Float(v) => Ok(CtValue::Float(-v)),
                _ => match value.as_int() {
                    Some(v) => self.fit_int(expr, -v, true),
                    None => err("cannot negate a non-numeric value"),
                },
            },
            UnOp::Not => match value.truthy() {
                Some(b) => Ok(CtValue::Bool(!b)),
                None => err("`!` requires a boolean"),
            },
            UnOp::BitNot => {
                let Some(Type::Prim(Prim::Unsigned(width))) =
                    self.sess.types.expr_type(expr.id)
                else {
                    return Err(Stop::Unknown);
                };
                let Some(v) = value.as_int() else {
                    return err("`~` requires an unsigned integer");
                };
                let mask: u64 = if *width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
                Ok(CtValue::Uint(!(v as u64) & mask))
            }
        }
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn eval_call(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<Option<CtValue>> {
        let ExprKind::Call { receivers, args, callee } = &expr.kind else { unreachable!() };
        let instance = self.instance(frame);
        let Some(symbol) = self.sess.bindings.resolve(instance, expr.id) else {
            return Err(Stop::Unknown);
        };

        // Record constructor: `T(field values)` builds a composite.
        if self.sess.symbols.get(symbol).kind == SymbolKind::Type {
            let name = self.sess.symbols.get(symbol).name.clone();
            let Some(fields) = self.sess.fields_of(instance, &name) else {
                return Err(Stop::Unknown);
            };
            if fields.len() != args.len() {
                return err(format!("`{name}` constructor arity mismatch"));
            }
            let mut values = Vec::with_capacity(args.len());
            for ((field_name, field_ty), arg) in fields.iter().zip(args) {
                let value = self.eval_value(arg, frame)?;
                values.push((field_name.clone(), self.coerce(value, field_ty)?));
            }
            return Ok(Some(CtValue::composite(name, values)));
        }

        let _ = callee;
        let mut receiver_values = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            receiver_values.push(self.eval_value(receiver, frame)?);
        }
        self.call_function(symbol, receiver_values, CallArgs::Exprs(args), frame)
            .map(Some)
            .or_else(|stop| match stop {
                // Void calls produce no value; surface as "no value".
                Stop::Return(None) => Ok(None),
                other => Err(other),
            })
    }

    fn call_function(
        &mut self,
        symbol: SymbolId,
        receiver_values: Vec<CtValue>,
        args: CallArgs<'a>,
        caller_frame: usize,
    ) -> EvalResult<CtValue> {
        let Some(sig) = self.sess.sig(symbol) else {
            return Err(Stop::Unknown);
        };
        if sig.external {
            return err(format!("call to external function `{}`", sig.name));
        }
        if !sig.has_body {
            return err(format!("`{}` has no body to evaluate", sig.name));
        }
        if sig.generic {
            return Err(Stop::Unknown);
        }
        if self.depth >= RECURSION_LIMIT {
            return err("compile-time recursion limit exceeded");
        }
        if receiver_values.len() != sig.receivers.len() {
            return err(format!("receiver count mismatch calling `{}`", sig.name));
        }

        let sig = sig.clone();
        let mut callee_frame = Frame::new(sig.instance);
        for (param, value) in sig.receivers.iter().zip(receiver_values) {
            let value = match &param.ty {
                Some(ty) => self.coerce(value, ty)?,
                None => value,
            };
            callee_frame.locals.insert(param.symbol, value);
            callee_frame.pinned.insert(param.symbol);
        }

        match args {
            CallArgs::Exprs(exprs) => {
                if exprs.len() != sig.params.len() {
                    return err(format!("argument count mismatch calling `{}`", sig.name));
                }
                for (param, arg) in sig.params.iter().zip(exprs) {
                    if param.is_expr_param {
                        callee_frame.expr_params.insert(
                            param.symbol,
                            ExprBinding { expr: arg, frame: caller_frame, wildcard: None },
                        );
                    } else {
                        let value = self.eval_value(arg, caller_frame)?;
                        let value = match &param.ty {
                            Some(ty) => self.coerce(value, ty)?,
                            None => value,
                        };
                        callee_frame.locals.insert(param.symbol, value);
                    }
                }
            }
            CallArgs::Values(values) => {
                if values.len() != sig.params.len() {
                    return err(format!("argument count mismatch calling `{}`", sig.name));
                }
                for (param, value) in sig.params.iter().zip(values) {
                    let value = match &param.ty {
                        Some(ty) => self.coerce(value, ty)?,
                        None => value,
                    };
                    callee_frame.locals.insert(param.symbol, value);
                }
            }
            CallArgs::IterateBody { body, wildcard } => {
                let [param] = &sig.params[..] else {
                    return err(format!("`{}` must take exactly one body parameter", sig.name));
                };
                if !param.is_expr_param {
                    return err(format!("`{}`'s body parameter must be an expression parameter", sig.name));
                }
                callee_frame.expr_params.insert(
                    param.symbol,
                    ExprBinding { expr: body, frame: caller_frame, wildcard },
                );
            }
        }

        let Some(body) = self.view.func_body(sig.loc) else {
            return err(format!("`{}` has no body to evaluate", sig.name));
        };

        self.depth += 1;
        self.frames.push(callee_frame);
        let frame = self.frames.len() - 1;
        let result = self.eval_expr(body, frame);
        self.frames.pop();
        self.depth -= 1;

        let value = match result {
            Ok(Some(value)) => Some(value),
            Ok(None) => None,
            Err(Stop::Return(value)) => value,
            Err(stop) => return Err(stop),
        };
        match value {
            Some(value) => match &sig.ret {
                Some(ty) => self.coerce(value, ty),
                None => Ok(value),
            },
            None => Err(Stop::Return(None)),
        }
    }

    // ── Loops ──────────────────────────────────────────────────────────

    fn eval_iterate(&mut self, expr: &'a Expr, frame: usize) -> EvalResult<()> {
        let ExprKind::Iterate { iterable, body, sorted } = &expr.kind else { unreachable!() };
        let instance = self.instance(frame);
        let iterable_value = self.eval_value(iterable, frame)?;

        // A boolean head is a repeat loop that the lowerer has not rewritten
        // yet (the checker types the head, the lowerer changes the node).
        if matches!(iterable_value, CtValue::Bool(_)) {
            loop {
                self.bump_steps()?;
                let cond = self.eval_value(iterable, frame)?;
                match cond.truthy() {
                    Some(true) => {}
                    Some(false) => return Ok(()),
                    None => return err("repeat condition is not a boolean"),
                }
                match self.eval_expr(body, frame) {
                    Ok(_) => {}
                    Err(Stop::Break) => return Ok(()),
                    Err(Stop::Continue) => continue,
                    Err(stop) => return Err(stop),
                }
            }
        }

        // Named iterables dispatch through `T::@` / `T::@@`; the checker
        // bound the iterate node to the method symbol.
        if matches!(iterable_value, CtValue::Composite(_)) {
            let Some(method) = self.sess.bindings.resolve(instance, expr.id) else {
                return Err(Stop::Unknown);
            };
            let wildcard = self.loop_wildcard(instance, expr.id);
            match self.call_function(
                method,
                vec![iterable_value],
                CallArgs::IterateBody { body, wildcard },
                frame,
            ) {
                Ok(_) | Err(Stop::Return(None)) => return Ok(()),
                Err(stop) => return Err(stop),
            }
        }

        let CtValue::Array(elements) = iterable_value else {
            return err("iteration requires an array, range, or iterable type");
        };
        let mut elements = elements.as_ref().clone();
        if *sorted {
            elements.sort_by(|a, b| a.lexicographic_cmp(b));
        }

        let Some(wildcard) = self.loop_wildcard(instance, expr.id) else {
            return Err(Stop::Unknown);
        };
        for element in elements {
            self.bump_steps()?;
            self.frames[frame].locals.insert(wildcard, element.clone());
            self.frames[frame].pinned.insert(wildcard);
            self.wildcard_stack.push(element);
            let result = self.eval_expr(body, frame);
            self.wildcard_stack.pop();
            match result {
                Ok(_) => {}
                Err(Stop::Break) => break,
                Err(Stop::Continue) => continue,
                Err(stop) => return Err(stop),
            }
        }
        Ok(())
    }

    /// The `_` symbol of an iterate node's loop scope.
    fn loop_wildcard(&self, instance: InstanceId, node: NodeId) -> Option<SymbolId> {
        let scope = self.sess.node_scopes.get(&(instance, node))?;
        self.sess.scopes.lookup_local(*scope, "_")
    }

    fn bump_steps(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return err("compile-time loop bound exceeded");
        }
        Ok(())
    }

    // ── Assignment ─────────────────────────────────────────────────────

    fn eval_assign(
        &mut self,
        assign: &'a Expr,
        target: &'a Expr,
        value: &'a Expr,
        frame: usize,
    ) -> EvalResult<()> {
        let new_value = self.eval_value(value, frame)?;
        let instance = self.instance(frame);

        match &target.kind {
            ExprKind::Ident(_) => {
                let Some(symbol) = self.sess.bindings.resolve(instance, target.id) else {
                    return Err(Stop::Unknown);
                };
                self.store_local(symbol, new_value, frame)
            }
            ExprKind::TupleLit(elems) => {
                let CtValue::Composite(tuple) = &new_value else {
                    return err("multi-assignment requires a tuple value");
                };
                if tuple.fields.len() != elems.len() {
                    return err("multi-assignment arity mismatch");
                }
                let fields: Vec<CtValue> =
                    tuple.fields.iter().map(|(_, v)| v.clone()).collect();
                for (elem, value) in elems.iter().zip(fields) {
                    let Some(symbol) = self.sess.bindings.resolve(instance, elem.id) else {
                        return Err(Stop::Unknown);
                    };
                    self.store_local(symbol, value, frame)?;
                }
                let _ = assign;
                Ok(())
            }
            ExprKind::Index { .. } | ExprKind::Member { .. } => {
                let (root, path) = self.lvalue_path(target, frame)?;
                let Some(symbol) = self.sess.bindings.resolve(instance, root) else {
                    return Err(Stop::Unknown);
                };
                self.check_writable(symbol, frame)?;
                let Some(slot) = self.frames[frame].locals.get_mut(&symbol) else {
                    return err(format!(
                        "write to global `{}` during compile-time evaluation",
                        self.sess.symbols.get(symbol).name
                    ));
                };
                let mut slot = std::mem::replace(slot, CtValue::Uninit);
                let result = write_path(&mut slot, &path, new_value);
                self.frames[frame].locals.insert(symbol, slot);
                result.map_err(Stop::Error)
            }
            _ => err("expression is not assignable"),
        }
    }

    fn check_writable(&self, symbol: SymbolId, frame: usize) -> EvalResult<()> {
        if self.frames[frame].pinned.contains(&symbol) {
            let info = self.sess.symbols.get(symbol);
            let what = if info.name == "_" { "loop variable" } else { "receiver" };
            return err(format!("cannot mutate {what} `{}`", info.name));
        }
        Ok(())
    }

    fn store_local(&mut self, symbol: SymbolId, value: CtValue, frame: usize) -> EvalResult<()> {
        self.check_writable(symbol, frame)?;
        let info = self.sess.symbols.get(symbol);
        if !info.is_local {
            return err(format!("write to global `{}` during compile-time evaluation", info.name));
        }
        let value = match &info.ty {
            Some(ty) => self.coerce(value, ty)?,
            None => value,
        };
        self.frames[frame].locals.insert(symbol, value);
        Ok(())
    }

    /// Flatten `x[i].f[j]` into the root identifier node and a path of
    /// evaluated steps.
    fn lvalue_path(&mut self, target: &'a Expr, frame: usize) -> EvalResult<(NodeId, Vec<PathSeg>)> {
        let mut segments = Vec::new();
        let mut current = target;
        loop {
            match &current.kind {
                ExprKind::Ident(_) => {
                    segments.reverse();
                    return Ok((current.id, segments));
                }
                ExprKind::Member { base, field } => {
                    segments.push(PathSeg::Field(field.clone()));
                    current = base;
                }
                ExprKind::Index { base, index } => {
                    let index = self.eval_value(index, frame)?;
                    let Some(index) = index.as_int() else {
                        return err("index is not an integer");
                    };
                    if index < 0 {
                        return err("index out of range");
                    }
                    segments.push(PathSeg::Index(index as usize));
                    current = base;
                }
                _ => return err("expression is not assignable"),
            }
        }
    }

    // ── Casts, indexing, resources ─────────────────────────────────────

    fn index_value(&self, base: &CtValue, index: &CtValue) -> EvalResult<CtValue> {
        let Some(i) = index.as_int() else {
            return err("index is not an integer");
        };
        match base {
            CtValue::Array(values) => {
                if i < 0 || i as usize >= values.len() {
                    return err(format!("index {i} out of range (length {})", values.len()));
                }
                Ok(values[i as usize].clone())
            }
            CtValue::Str(s) => {
                if i < 0 || i as usize >= s.len() {
                    return err(format!("index {i} out of range (length {})", s.len()));
                }
                Ok(CtValue::Uint(s.as_bytes()[i as usize] as u64))
            }
            _ => err("indexing requires an array or string"),
        }
    }

    fn cast_value(&mut self, value: CtValue, target: &'a TypeAnn, frame: usize) -> EvalResult<CtValue> {
        match &target.kind {
            TypeAnnKind::Named(name) => {
                let Some(prim) = Prim::from_name(name) else {
                    // Casting to a declared record type: identity only.
                    return match &value {
                        CtValue::Composite(c) if c.name == *name => Ok(value),
                        _ => err(format!("cannot cast to `{name}`")),
                    };
                };
                cast_to_prim(value, prim).map_err(Stop::Error)
            }
            TypeAnnKind::Array(elem, size) => {
                // Only the bool-array <-> unsigned-int cast is defined.
                let TypeAnnKind::Named(elem_name) = &elem.kind else {
                    return err("unsupported cast target");
                };
                if elem_name != "bool" {
                    return err("unsupported cast target");
                }
                let size = self.eval_value(size, frame)?;
                let Some(width) = size.as_int() else {
                    return err("array size is not an integer");
                };
                let Some(bits) = value.as_int() else {
                    return err("bool-array cast requires an unsigned integer");
                };
                let values = (0..width)
                    .map(|i| CtValue::Bool((bits >> i) & 1 == 1))
                    .collect();
                Ok(CtValue::array(values))
            }
        }
    }

    /// Resources type as `str`: files embed their contents, directories
    /// embed their sorted entry names joined by newlines.
    fn eval_resource(&mut self, path: &str) -> EvalResult<CtValue> {
        let full = self.sess.program.root.join(path);
        if full.is_dir() {
            let mut names = Vec::new();
            let entries = std::fs::read_dir(&full)
                .map_err(|e| Stop::Error(format!("cannot read `{path}`: {e}")))?;
            for entry in entries {
                let entry = entry.map_err(|e| Stop::Error(format!("cannot read `{path}`: {e}")))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            return Ok(CtValue::Str(names.join("\n")));
        }
        let text = std::fs::read_to_string(&full)
            .map_err(|e| Stop::Error(format!("cannot read `{path}`: {e}")))?;
        Ok(CtValue::Str(text))
    }

    fn eval_process(&mut self, cmd: &str) -> EvalResult<CtValue> {
        if !self.sess.options.allow_process {
            return err("process expressions require the allow-process option");
        }
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| Stop::Error(format!("cannot run `{cmd}`: {e}")))?;
        if !output.status.success() {
            return err(format!("`{cmd}` exited with {}", output.status));
        }
        Ok(CtValue::Str(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn coerce(&self, value: CtValue, ty: &Type) -> EvalResult<CtValue> {
        match ty {
            Type::Var(_) | Type::TypeOf(_) => Ok(value),
            _ => value.coerce_to(ty).map_err(Stop::Error),
        }
    }
}

enum CallArgs<'a> {
    /// Ordinary call-site argument expressions (evaluated or bound lazily
    /// per parameter kind).
    Exprs(&'a [Expr]),
    /// Pre-evaluated values (operator-overload dispatch).
    Values(Vec<CtValue>),
    /// A named-iteration body: bound as the single expression parameter.
    IterateBody { body: &'a Expr, wildcard: Option<SymbolId> },
}

#[derive(Debug, Clone)]
enum PathSeg {
    Field(String),
    Index(usize),
}

/// Write through a path of fields/indices with clone-on-unique-write.
fn write_path(slot: &mut CtValue, path: &[PathSeg], new: CtValue) -> Result<(), String> {
    let Some((head, rest)) = path.split_first() else {
        *slot = new;
        return Ok(());
    };
    match (head, slot) {
        (PathSeg::Field(name), CtValue::Composite(c)) => {
            let c = std::rc::Rc::make_mut(c);
            match c.field_mut(name) {
                Some(field) => write_path(field, rest, new),
                None => Err(format!("no field `{name}`")),
            }
        }
        (PathSeg::Index(i), CtValue::Array(values)) => {
            let values = std::rc::Rc::make_mut(values);
            match values.get_mut(*i) {
                Some(elem) => write_path(elem, rest, new),
                None => Err(format!("index {i} out of range")),
            }
        }
        _ => Err("value does not match assignment path".into()),
    }
}

fn cast_to_prim(value: CtValue, prim: Prim) -> Result<CtValue, String> {
    // Bool-array -> unsigned int (bit i is element i).
    if let (CtValue::Array(values), Prim::Unsigned(width)) = (&value, prim) {
        if values.len() as u64 != width as u64 {
            return Err(format!("bool-array length {} does not match `{prim}`", values.len()));
        }
        let mut bits: u64 = 0;
        for (i, v) in values.iter().enumerate() {
            match v {
                CtValue::Bool(true) => bits |= 1 << i,
                CtValue::Bool(false) => {}
                _ => return Err("bool-array cast requires boolean elements".into()),
            }
        }
        return Ok(CtValue::Uint(bits));
    }

    match prim {
        Prim::Unsigned(width) => {
            let v = match &value {
                CtValue::Float(f) => *f as i128,
                other => other.as_int().ok_or("cannot cast value to an integer")?,
            };
            let mask: u64 = if width == 0 || width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
            Ok(CtValue::Uint((v as u64) & mask))
        }
        Prim::Signed(width) => {
            let v = match &value {
                CtValue::Float(f) => *f as i128,
                other => other.as_int().ok_or("cannot cast value to an integer")?,
            };
            if width == 0 || width >= 64 {
                return Ok(CtValue::Int(v as i64));
            }
            let m = 1i128 << (width - 1);
            let wrapped = ((v + m).rem_euclid(1i128 << width)) - m;
            Ok(CtValue::Int(wrapped as i64))
        }
        Prim::F16 | Prim::F32 | Prim::F64 => match &value {
            CtValue::Float(f) => Ok(CtValue::Float(*f)),
            other => match other.as_int() {
                Some(v) => Ok(CtValue::Float(v as f64)),
                None => Err("cannot cast value to a float".into()),
            },
        },
        Prim::Bool => match value.truthy() {
            Some(b) => Ok(CtValue::Bool(b)),
            None => Err("cannot cast value to bool".into()),
        },
        Prim::Str => Err("cannot cast to a string".into()),
    }
}
