//! Type table: unification, resolution, numeric promotion, ABI safety.
//!
//! Wraps `ena`'s union-find over [`TyVar`] keys. All type variables created
//! during checking live in one program-wide table so that
//! `AnalyzedProgram::resolve_type` keeps working after the pipeline ends.

use ena::unify::InPlaceUnificationTable;
use rustc_hash::FxHashMap;

use vexel_parser::ast::types::{Prim, PrimFamily, TyVar, Type};
use vexel_parser::ast::NodeId;

/// The program-wide type table.
///
/// Also records, for every typed expression, its node id -> type entry so
/// that `Type::TypeOf` can be materialized during resolution.
#[derive(Default)]
pub struct TypeTable {
    table: InPlaceUnificationTable<TyVar>,
    /// Denormalized `expr id -> inferred type`, filled by the checker.
    expr_types: FxHashMap<NodeId, Type>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh unbound type variable.
    pub fn fresh(&mut self) -> Type {
        Type::Var(self.table.new_key(None))
    }

    /// Record an expression's inferred type for later `TypeOf` resolution.
    pub fn note_expr_type(&mut self, id: NodeId, ty: &Type) {
        self.expr_types.insert(id, ty.clone());
    }

    pub fn expr_type(&self, id: NodeId) -> Option<&Type> {
        self.expr_types.get(&id)
    }

    /// Resolve every noted expression type in place. Run once after
    /// checking so later passes (and the evaluator) see stable snapshots
    /// without needing mutable access to the table.
    pub fn resolve_noted(&mut self) {
        let ids: Vec<NodeId> = self.expr_types.keys().copied().collect();
        for id in ids {
            let ty = self.expr_types[&id].clone();
            let resolved = self.resolve(&ty);
            self.expr_types.insert(id, resolved);
        }
    }

    /// Resolve a type by following union-find indirection and materializing
    /// `TypeOf` entries, recursively.
    pub fn resolve(&mut self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.resolve(&inner),
                None => Type::Var(self.table.find(*v)),
            },
            Type::TypeOf(id) => match self.expr_types.get(id).cloned() {
                Some(inner) => self.resolve(&inner),
                None => ty.clone(),
            },
            Type::Array(elem, size) => Type::Array(Box::new(self.resolve(elem)), *size),
            Type::Prim(_) | Type::Named(_) => ty.clone(),
        }
    }

    /// Whether a variable occurs inside a type (infinite-type guard).
    fn occurs_in(&mut self, var: TyVar, ty: &Type) -> bool {
        match ty {
            Type::Var(v) => {
                if self.table.find(*v) == self.table.find(var) {
                    return true;
                }
                match self.table.probe_value(*v) {
                    Some(inner) => self.occurs_in(var, &inner),
                    None => false,
                }
            }
            Type::Array(elem, _) => self.occurs_in(var, elem),
            Type::Prim(_) | Type::Named(_) | Type::TypeOf(_) => false,
        }
    }

    /// Unify two types into their common type, or report the resolved pair
    /// that failed.
    ///
    /// Unlike textbook unification this "join" applies Vexel's numeric
    /// widening: primitives of the same family unify to the wider width,
    /// and `bool` sits at the bottom of both integer families (`0`/`1`
    /// literals coerce upward on demand).
    pub fn unify(&mut self, a: &Type, b: &Type) -> Result<Type, (Type, Type)> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (&a, &b) {
            (Type::Var(v1), Type::Var(v2)) => {
                if v1 != v2 {
                    self.table
                        .unify_var_var(*v1, *v2)
                        .expect("two unbound vars always unify");
                }
                Ok(a)
            }
            (Type::Var(v), other) | (other, Type::Var(v)) => {
                if self.occurs_in(*v, other) {
                    return Err((a.clone(), b));
                }
                self.table
                    .unify_var_value(*v, Some(other.clone()))
                    .expect("binding an unbound var after occurs check");
                Ok(other.clone())
            }
            (Type::Prim(p1), Type::Prim(p2)) => {
                join_prims(*p1, *p2).map(Type::Prim).ok_or((a.clone(), b.clone()))
            }
            (Type::Named(n1), Type::Named(n2)) if n1 == n2 => Ok(a),
            (Type::Array(e1, s1), Type::Array(e2, s2)) if s1 == s2 => {
                let elem = self.unify(e1, e2).map_err(|_| (a.clone(), b.clone()))?;
                Ok(Type::Array(Box::new(elem), *s1))
            }
            _ => Err((a, b)),
        }
    }
}

/// Join two primitives under the widening lattice, if they are compatible.
pub fn join_prims(a: Prim, b: Prim) -> Option<Prim> {
    if a == b {
        return Some(a);
    }
    match (a.family(), b.family()) {
        (fa, fb) if fa == fb => Some(if a.width() >= b.width() { a } else { b }),
        // Bool is the bottom of both integer families: 0/1 literals widen
        // into any integer type on demand.
        (PrimFamily::Bool, PrimFamily::Unsigned) | (PrimFamily::Bool, PrimFamily::Signed) => {
            Some(widen_from_bool(b))
        }
        (PrimFamily::Unsigned, PrimFamily::Bool) | (PrimFamily::Signed, PrimFamily::Bool) => {
            Some(widen_from_bool(a))
        }
        _ => None,
    }
}

fn widen_from_bool(target: Prim) -> Prim {
    match target {
        Prim::Unsigned(0) => Prim::Unsigned(1),
        Prim::Signed(0) => Prim::Signed(1),
        other => other,
    }
}

/// Whether `from` may be stored into a slot of type `to` without a cast:
/// identical types, or a widening within the same family (bool widening
/// into integers included).
pub fn widens_to(from: &Type, to: &Type) -> bool {
    match (from, to) {
        (Type::Prim(f), Type::Prim(t)) => {
            f == t || matches!(join_prims(*f, *t), Some(joined) if joined == *t)
        }
        (Type::Array(fe, fs), Type::Array(te, ts)) => fs == ts && widens_to(fe, te),
        (Type::Named(f), Type::Named(t)) => f == t,
        _ => false,
    }
}

/// The smallest unsigned (or bool) type fitting a non-negative literal.
pub fn literal_type(value: u64) -> Prim {
    match value {
        0 | 1 => Prim::Bool,
        _ if value <= 0xFF => Prim::Unsigned(8),
        _ if value <= 0xFFFF => Prim::Unsigned(16),
        _ if value <= 0xFFFF_FFFF => Prim::Unsigned(32),
        _ => Prim::Unsigned(64),
    }
}

/// The smallest signed type fitting a negative literal of the given
/// magnitude.
pub fn negative_literal_type(magnitude: u64) -> Prim {
    match magnitude {
        _ if magnitude <= 0x80 => Prim::Signed(8),
        _ if magnitude <= 0x8000 => Prim::Signed(16),
        _ if magnitude <= 0x8000_0000 => Prim::Signed(32),
        _ => Prim::Signed(64),
    }
}

/// ABI safety per the exported/external boundary rules: primitives,
/// fixed-size arrays of ABI-safe types, or named records recursively
/// composed of ABI-safe fields. Synthetic tuple types and inference
/// variables are rejected.
pub fn is_abi_safe(ty: &Type, field_types: &impl Fn(&str) -> Option<Vec<Type>>) -> bool {
    match ty {
        Type::Prim(p) => !p.is_unresolved(),
        Type::Array(elem, _) => is_abi_safe(elem, field_types),
        Type::Named(name) => {
            if Type::is_tuple_name(name) {
                return false;
            }
            match field_types(name) {
                Some(fields) => fields.iter().all(|f| is_abi_safe(f, field_types)),
                None => false,
            }
        }
        Type::Var(_) | Type::TypeOf(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_widths() {
        assert_eq!(literal_type(0), Prim::Bool);
        assert_eq!(literal_type(1), Prim::Bool);
        assert_eq!(literal_type(2), Prim::Unsigned(8));
        assert_eq!(literal_type(255), Prim::Unsigned(8));
        assert_eq!(literal_type(256), Prim::Unsigned(16));
        assert_eq!(literal_type(0x1_0000_0000), Prim::Unsigned(64));
        assert_eq!(negative_literal_type(1), Prim::Signed(8));
        assert_eq!(negative_literal_type(128), Prim::Signed(8));
        assert_eq!(negative_literal_type(129), Prim::Signed(16));
    }

    #[test]
    fn join_same_family_widens() {
        assert_eq!(join_prims(Prim::Unsigned(8), Prim::Unsigned(16)), Some(Prim::Unsigned(16)));
        assert_eq!(join_prims(Prim::Signed(32), Prim::Signed(8)), Some(Prim::Signed(32)));
        assert_eq!(join_prims(Prim::F32, Prim::F64), Some(Prim::F64));
    }

    #[test]
    fn join_cross_family_rejected() {
        assert_eq!(join_prims(Prim::Unsigned(8), Prim::Signed(8)), None);
        assert_eq!(join_prims(Prim::Unsigned(8), Prim::F32), None);
        assert_eq!(join_prims(Prim::Str, Prim::Unsigned(8)), None);
    }

    #[test]
    fn bool_widens_into_integers() {
        assert_eq!(join_prims(Prim::Bool, Prim::Unsigned(8)), Some(Prim::Unsigned(8)));
        assert_eq!(join_prims(Prim::Signed(16), Prim::Bool), Some(Prim::Signed(16)));
    }

    #[test]
    fn unify_var_binds() {
        let mut table = TypeTable::new();
        let v = table.fresh();
        let joined = table.unify(&v, &Type::unsigned(8)).unwrap();
        assert_eq!(joined, Type::unsigned(8));
        assert_eq!(table.resolve(&v), Type::unsigned(8));
    }

    #[test]
    fn unify_arrays_require_same_size() {
        let mut table = TypeTable::new();
        let a = Type::array(Type::unsigned(8), 3);
        let b = Type::array(Type::unsigned(8), 4);
        assert!(table.unify(&a, &b).is_err());
        let c = Type::array(Type::Prim(Prim::Bool), 3);
        assert_eq!(table.unify(&a, &c).unwrap(), Type::array(Type::unsigned(8), 3));
    }

    #[test]
    fn typeof_materializes() {
        let mut table = TypeTable::new();
        let id = NodeId(7);
        table.note_expr_type(id, &Type::signed(32));
        assert_eq!(table.resolve(&Type::TypeOf(id)), Type::signed(32));
    }

    #[test]
    fn widening_assignability() {
        assert!(widens_to(&Type::unsigned(8), &Type::unsigned(16)));
        assert!(!widens_to(&Type::unsigned(16), &Type::unsigned(8)));
        assert!(widens_to(&Type::bool(), &Type::unsigned(8)));
        assert!(!widens_to(&Type::unsigned(8), &Type::signed(16)));
        assert!(widens_to(
            &Type::array(Type::bool(), 2),
            &Type::array(Type::unsigned(8), 2)
        ));
    }

    #[test]
    fn abi_safety() {
        let no_records = |_: &str| -> Option<Vec<Type>> { None };
        assert!(is_abi_safe(&Type::unsigned(8), &no_records));
        assert!(is_abi_safe(&Type::array(Type::signed(16), 4), &no_records));
        assert!(!is_abi_safe(&Type::Named("tuple2_u8_u8".into()), &no_records));
        assert!(!is_abi_safe(&Type::Named("Point".into()), &no_records));

        let point = |name: &str| -> Option<Vec<Type>> {
            (name == "Point").then(|| vec![Type::signed(8), Type::signed(8)])
        };
        assert!(is_abi_safe(&Type::Named("Point".into()), &point));
    }
}
