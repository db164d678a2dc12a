//! Compile-time values.
//!
//! Composites and arrays are reference-counted with clone-on-unique-write:
//! a shared value is deep-cloned by `Rc::make_mut` on first mutation, so
//! sibling bindings never observe each other's writes.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use vexel_parser::ast::types::{Prim, Type};

/// A value produced by the compile-time evaluator.
#[derive(Clone, Debug, PartialEq)]
pub enum CtValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A declared-but-unassigned local. Reading one is an evaluation error.
    Uninit,
    Composite(Rc<Composite>),
    Array(Rc<Vec<CtValue>>),
}

/// A record or tuple value: type name plus ordered fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Composite {
    pub name: String,
    pub fields: Vec<(String, CtValue)>,
}

impl Composite {
    pub fn field(&self, name: &str) -> Option<&CtValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut CtValue> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl CtValue {
    pub fn composite(name: impl Into<String>, fields: Vec<(String, CtValue)>) -> CtValue {
        CtValue::Composite(Rc::new(Composite { name: name.into(), fields }))
    }

    pub fn array(elems: Vec<CtValue>) -> CtValue {
        CtValue::Array(Rc::new(elems))
    }

    /// Truthiness for conditions: numbers by non-zero, bools directly.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            CtValue::Bool(b) => Some(*b),
            CtValue::Int(v) => Some(*v != 0),
            CtValue::Uint(v) => Some(*v != 0),
            CtValue::Float(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            CtValue::Int(_) | CtValue::Uint(_) | CtValue::Float(_) | CtValue::Bool(_) | CtValue::Str(_)
        )
    }

    /// Magnitude as i128 for integer-family values (bool included).
    pub fn as_int(&self) -> Option<i128> {
        match self {
            CtValue::Int(v) => Some(*v as i128),
            CtValue::Uint(v) => Some(*v as i128),
            CtValue::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    /// Total order used by sorted iteration (`@@`): numbers by value,
    /// strings and arrays lexicographically.
    pub fn lexicographic_cmp(&self, other: &CtValue) -> Ordering {
        match (self, other) {
            (CtValue::Float(a), CtValue::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (CtValue::Str(a), CtValue::Str(b)) => a.cmp(b),
            (CtValue::Array(a), CtValue::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.lexicographic_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match (self.as_int(), other.as_int()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            },
        }
    }

    /// Store this value into a slot of declared type `ty`. Only widening
    /// conversions are implicit; narrowing needs an explicit cast.
    pub fn coerce_to(&self, ty: &Type) -> Result<CtValue, String> {
        match ty {
            Type::Prim(prim) => self.coerce_to_prim(*prim),
            Type::Array(elem, size) => match self {
                CtValue::Array(values) => {
                    if values.len() as u64 != *size {
                        return Err(format!(
                            "array of length {} does not fit `{ty}`",
                            values.len()
                        ));
                    }
                    let coerced: Result<Vec<CtValue>, String> =
                        values.iter().map(|v| v.coerce_to(elem)).collect();
                    Ok(CtValue::array(coerced?))
                }
                _ => Err(format!("value is not an array (expected `{ty}`)")),
            },
            Type::Named(name) => match self {
                CtValue::Composite(c) if c.name == *name => Ok(self.clone()),
                _ => Err(format!("value is not a `{name}`")),
            },
            Type::Var(_) | Type::TypeOf(_) => Err("slot type is not concrete".into()),
        }
    }

    fn coerce_to_prim(&self, prim: Prim) -> Result<CtValue, String> {
        let fail = || Err(format!("value does not fit `{prim}`"));
        match prim {
            Prim::Bool => match self {
                CtValue::Bool(_) => Ok(self.clone()),
                CtValue::Uint(0) | CtValue::Int(0) => Ok(CtValue::Bool(false)),
                CtValue::Uint(1) | CtValue::Int(1) => Ok(CtValue::Bool(true)),
                _ => fail(),
            },
            Prim::Unsigned(width) => {
                let v = match self {
                    CtValue::Uint(v) => *v as i128,
                    CtValue::Bool(b) => *b as i128,
                    CtValue::Int(v) if *v >= 0 => *v as i128,
                    _ => return fail(),
                };
                if width < 64 && v >= (1i128 << width) {
                    return fail();
                }
                Ok(CtValue::Uint(v as u64))
            }
            Prim::Signed(width) => {
                let v = match self {
                    CtValue::Int(v) => *v as i128,
                    CtValue::Bool(b) => *b as i128,
                    CtValue::Uint(v) => *v as i128,
                    _ => return fail(),
                };
                let bound = 1i128 << (width.min(64).saturating_sub(1));
                if width < 64 && (v >= bound || v < -bound) {
                    return fail();
                }
                if v > i64::MAX as i128 {
                    return fail();
                }
                Ok(CtValue::Int(v as i64))
            }
            Prim::F16 | Prim::F32 | Prim::F64 => match self {
                CtValue::Float(_) => Ok(self.clone()),
                _ => fail(),
            },
            Prim::Str => match self {
                CtValue::Str(_) => Ok(self.clone()),
                _ => fail(),
            },
        }
    }
}

impl fmt::Display for CtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtValue::Int(v) => write!(f, "{v}"),
            CtValue::Uint(v) => write!(f, "{v}"),
            CtValue::Float(v) => write!(f, "{v:?}"),
            CtValue::Bool(b) => write!(f, "{}", *b as u8),
            CtValue::Str(s) => write!(f, "{s:?}"),
            CtValue::Uninit => write!(f, "<uninitialized>"),
            CtValue::Composite(c) => {
                write!(f, "{}(", c.name)?;
                for (i, (_, v)) in c.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            CtValue::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_on_unique_write() {
        let shared = CtValue::array(vec![CtValue::Uint(1), CtValue::Uint(2)]);
        let mut copy = shared.clone();
        if let CtValue::Array(values) = &mut copy {
            Rc::make_mut(values)[0] = CtValue::Uint(9);
        }
        // The original must be unaffected.
        assert_eq!(shared, CtValue::array(vec![CtValue::Uint(1), CtValue::Uint(2)]));
        assert_eq!(copy, CtValue::array(vec![CtValue::Uint(9), CtValue::Uint(2)]));
    }

    #[test]
    fn widening_coercions() {
        assert_eq!(
            CtValue::Bool(true).coerce_to(&Type::unsigned(8)).unwrap(),
            CtValue::Uint(1)
        );
        assert_eq!(
            CtValue::Uint(7).coerce_to(&Type::signed(16)).unwrap(),
            CtValue::Int(7)
        );
        assert!(CtValue::Uint(256).coerce_to(&Type::unsigned(8)).is_err());
        assert!(CtValue::Int(-1).coerce_to(&Type::unsigned(8)).is_err());
        assert_eq!(
            CtValue::Uint(0).coerce_to(&Type::bool()).unwrap(),
            CtValue::Bool(false)
        );
    }

    #[test]
    fn array_coercion_checks_size() {
        let arr = CtValue::array(vec![CtValue::Uint(1), CtValue::Uint(2)]);
        assert!(arr.coerce_to(&Type::array(Type::unsigned(8), 2)).is_ok());
        assert!(arr.coerce_to(&Type::array(Type::unsigned(8), 3)).is_err());
    }

    #[test]
    fn truthiness() {
        assert_eq!(CtValue::Uint(0).truthy(), Some(false));
        assert_eq!(CtValue::Int(-3).truthy(), Some(true));
        assert_eq!(CtValue::Bool(true).truthy(), Some(true));
        assert_eq!(CtValue::Str("x".into()).truthy(), None);
    }

    #[test]
    fn lexicographic_order() {
        let a = CtValue::array(vec![CtValue::Uint(1), CtValue::Uint(5)]);
        let b = CtValue::array(vec![CtValue::Uint(2)]);
        assert_eq!(a.lexicographic_cmp(&b), Ordering::Less);
        assert_eq!(
            CtValue::Str("abc".into()).lexicographic_cmp(&CtValue::Str("abd".into())),
            Ordering::Less
        );
    }
}
