//! Object model (spec §3, §4.F).
//!
//! Grounded on `limbo_core::types::OwnedValue` (`core/types.rs`) for the
//! tagged-union shape, generalized to the composite types (tuple,
//! relation, array) this engine's algebra needs.

use crate::error::{RdbError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A type tag, sufficient for dispatch (spec §3 "Types").
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Boolean,
    Integer,
    Float,
    String,
    Binary,
    Datetime,
    /// A user scalar type with a physical representation via another
    /// scalar type (spec §3).
    UserScalar {
        name: String,
        rep: Box<Type>,
    },
    Tuple(TupleType),
    Relation(Box<TupleType>),
    Array(Box<Type>),
}

impl Type {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Type::Tuple(_) | Type::Relation(_) | Type::Array(_))
    }

    /// Unwrap a user scalar type down to its physical representation,
    /// for operator dispatch that only cares about the underlying shape.
    pub fn physical(&self) -> &Type {
        match self {
            Type::UserScalar { rep, .. } => rep.physical(),
            other => other,
        }
    }
}

/// A tuple type: attribute name -> type. Insertion order is irrelevant
/// (spec §3), so this is backed by a sorted map for deterministic
/// iteration and O(log n) lookup, rather than a `Vec` of pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleType {
    pub attrs: BTreeMap<String, Type>,
}

impl TupleType {
    pub fn new(attrs: impl IntoIterator<Item = (String, Type)>) -> Self {
        Self {
            attrs: attrs.into_iter().collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Type> {
        self.attrs.get(name)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(|s| s.as_str())
    }

    pub fn is_subset_of(&self, other: &TupleType) -> bool {
        self.attrs
            .iter()
            .all(|(k, t)| other.attrs.get(k) == Some(t))
    }

    /// Project onto the named attributes, in the order given.
    pub fn project(&self, names: &[String]) -> Result<TupleType> {
        let mut attrs = BTreeMap::new();
        for n in names {
            let t = self
                .attr(n)
                .ok_or_else(|| RdbError::Name(format!("attribute {n} does not exist")))?;
            attrs.insert(n.clone(), t.clone());
        }
        Ok(TupleType { attrs })
    }

    /// All attributes except the named ones (used by REMOVE -> PROJECT,
    /// transformer rule 15).
    pub fn remove(&self, names: &[String]) -> Result<TupleType> {
        for n in names {
            if !self.attrs.contains_key(n) {
                return Err(RdbError::Name(format!("attribute {n} does not exist")));
            }
        }
        let attrs = self
            .attrs
            .iter()
            .filter(|(k, _)| !names.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(TupleType { attrs })
    }
}

/// A binary value (length + bytes); kept as a dedicated variant per spec
/// §3's `BIN (length+bytes)` rather than folded into `Array<u8>`.
pub type Binary = Arc<Vec<u8>>;

/// A table object: either a reference to a stored record map, or a
/// virtual table defined by an expression (spec §3 "TABLE").
#[derive(Debug, Clone)]
pub enum TableRef {
    Stored(String),
    Virtual(Arc<crate::expr::Expr>),
}

/// The tagged-union value representation (spec §3 "Object").
#[derive(Debug, Clone)]
pub enum Object {
    /// Never assigned.
    Initial(Type),
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Bin(Binary),
    Tuple(BTreeMap<String, Object>),
    Table(TableRef),
    /// Sequence of objects, plus a cached length (`None` = unknown,
    /// mirroring spec §3's `-1` sentinel as an `Option` instead).
    Array(Vec<Object>, Option<usize>),
}

/// Structural equality over the scalar/composite variants (used by the
/// summarize iterator's PER-group lookup); `Table` is never structurally
/// comparable this way, so it always compares unequal.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Initial(a), Object::Initial(b)) => a == b,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Time(a), Object::Time(b)) => a == b,
            (Object::Bin(a), Object::Bin(b)) => a == b,
            (Object::Tuple(a), Object::Tuple(b)) => a == b,
            (Object::Array(a, _), Object::Array(b, _)) => a == b,
            _ => false,
        }
    }
}

impl Object {
    pub fn init(ty: Type) -> Self {
        Object::Initial(ty)
    }

    pub fn value_type(&self) -> Option<Type> {
        match self {
            Object::Initial(t) => Some(t.clone()),
            Object::Bool(_) => Some(Type::Boolean),
            Object::Int(_) => Some(Type::Integer),
            Object::Float(_) => Some(Type::Float),
            Object::Time(_) => Some(Type::Datetime),
            Object::Bin(_) => Some(Type::Binary),
            Object::Tuple(_) => None,
            Object::Table(_) => None,
            Object::Array(_, _) => None,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Bool(b) => Ok(*b),
            _ => Err(RdbError::TypeMismatch("expected BOOLEAN".into())),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Object::Int(i) => Ok(*i),
            _ => Err(RdbError::TypeMismatch("expected INTEGER".into())),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Object::Float(f) => Ok(*f),
            Object::Int(i) => Ok(*i as f64),
            _ => Err(RdbError::TypeMismatch("expected FLOAT".into())),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Object::Bin(b) => std::str::from_utf8(b)
                .map_err(|_| RdbError::TypeMismatch("binary is not valid UTF-8".into())),
            _ => Err(RdbError::TypeMismatch("expected STRING".into())),
        }
    }

    pub fn as_tuple(&self) -> Result<&BTreeMap<String, Object>> {
        match self {
            Object::Tuple(t) => Ok(t),
            _ => Err(RdbError::TypeMismatch("expected TUPLE".into())),
        }
    }

    pub fn tuple_get(&self, attr: &str) -> Result<&Object> {
        self.as_tuple()?
            .get(attr)
            .ok_or_else(|| RdbError::Name(format!("attribute {attr} not found in tuple")))
    }

    pub fn tuple_set(&mut self, attr: &str, value: Object) -> Result<()> {
        match self {
            Object::Tuple(t) => {
                t.insert(attr.to_string(), value);
                Ok(())
            }
            _ => Err(RdbError::TypeMismatch("expected TUPLE".into())),
        }
    }

    pub fn array_get(&self, idx: usize) -> Result<&Object> {
        match self {
            Object::Array(v, _) => v
                .get(idx)
                .ok_or_else(|| RdbError::InvalidArgument(format!("array index {idx} out of range"))),
            _ => Err(RdbError::TypeMismatch("expected ARRAY".into())),
        }
    }

    /// Deep copy, per spec §4.F ("copy (deep for tuple/array/table; for
    /// tables, either copy the defining expression if virtual or move
    /// all tuples if base)"). A `Stored` table reference copies as a
    /// reference (the backing record map is not duplicated); the "move
    /// all tuples" base-table case is realized by callers via
    /// `RecordMap` operations, not by this generic `deep_copy`.
    pub fn deep_copy(&self) -> Object {
        self.clone()
    }

    pub fn equals(&self, other: &Object) -> Result<bool> {
        Ok(match (self, other) {
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Int(a), Object::Float(b)) | (Object::Float(b), Object::Int(a)) => {
                *a as f64 == *b
            }
            (Object::Time(a), Object::Time(b)) => a == b,
            (Object::Bin(a), Object::Bin(b)) => a == b,
            (Object::Tuple(a), Object::Tuple(b)) => {
                a.len() == b.len() && {
                    let mut eq = true;
                    for (k, v) in a {
                        match b.get(k) {
                            Some(bv) if v.equals(bv)? => {}
                            _ => {
                                eq = false;
                                break;
                            }
                        }
                    }
                    eq
                }
            }
            (Object::Array(a, _), Object::Array(b, _)) => {
                a.len() == b.len() && {
                    let mut eq = true;
                    for (x, y) in a.iter().zip(b.iter()) {
                        if !x.equals(y)? {
                            eq = false;
                            break;
                        }
                    }
                    eq
                }
            }
            _ => return Err(RdbError::TypeMismatch("= applied to incomparable types".into())),
        })
    }
}

/// An item in a table-to-array sort specification (spec §4.F).
#[derive(Debug, Clone)]
pub struct SeqItem {
    pub attr: String,
    pub asc: bool,
}

/// Serialize a scalar `Object` to the bytes a record map field stores.
/// Integers and floats use big-endian encoding so unsigned byte
/// comparison of the encoded field matches numeric order, which the
/// index/cursor layer relies on (`cursor::seek`'s monotonicity
/// assumption).
pub fn scalar_to_bytes(o: &Object) -> Result<Vec<u8>> {
    Ok(match o {
        Object::Bool(b) => vec![*b as u8],
        Object::Int(i) => (*i as u64 ^ (1u64 << 63)).to_be_bytes().to_vec(),
        Object::Float(f) => {
            let bits = f.to_bits();
            let flipped = if *f >= 0.0 {
                bits ^ (1u64 << 63)
            } else {
                !bits
            };
            flipped.to_be_bytes().to_vec()
        }
        Object::Time(t) => t.timestamp_nanos_opt().unwrap_or(0).to_be_bytes().to_vec(),
        Object::Bin(b) => b.as_ref().clone(),
        _ => return Err(RdbError::TypeMismatch("not a scalar field value".into())),
    })
}

/// Inverse of [`scalar_to_bytes`] for a known scalar type.
pub fn scalar_from_bytes(ty: &Type, bytes: &[u8]) -> Result<Object> {
    let corrupt = || RdbError::DataCorrupted("scalar field has wrong byte length".into());
    Ok(match ty.physical() {
        Type::Boolean => Object::Bool(*bytes.first().ok_or_else(corrupt)? != 0),
        Type::Integer => {
            let raw = u64::from_be_bytes(bytes.try_into().map_err(|_| corrupt())?);
            Object::Int((raw ^ (1u64 << 63)) as i64)
        }
        Type::Float => {
            let raw = u64::from_be_bytes(bytes.try_into().map_err(|_| corrupt())?);
            let bits = if raw & (1u64 << 63) != 0 {
                raw ^ (1u64 << 63)
            } else {
                !raw
            };
            Object::Float(f64::from_bits(bits))
        }
        Type::Datetime => {
            let nanos = i64::from_be_bytes(bytes.try_into().map_err(|_| corrupt())?);
            Object::Time(
                DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
                    .unwrap_or_default(),
            )
        }
        Type::String | Type::Binary => Object::Bin(Arc::new(bytes.to_vec())),
        other => {
            return Err(RdbError::TypeMismatch(format!(
                "{other:?} is not a scalar field type"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_project_and_remove_are_inverse_complements() {
        let t = TupleType::new([
            ("a".to_string(), Type::Integer),
            ("b".to_string(), Type::String),
            ("c".to_string(), Type::Boolean),
        ]);
        let projected = t.project(&["a".to_string(), "c".to_string()]).unwrap();
        let removed = t.remove(&["b".to_string()]).unwrap();
        assert_eq!(projected, removed);
    }

    #[test]
    fn equals_promotes_int_to_float() {
        let a = Object::Int(3);
        let b = Object::Float(3.0);
        assert!(a.equals(&b).unwrap());
    }
}
