//! Catalog seam (spec §1 Non-goals: "catalog persistence" is external;
//! spec §4.M consumes it for constraint lookup).
//!
//! `Catalog` is the collaborator boundary the evaluator, optimizer, and
//! constraint engine call through rather than hard-coding a schema
//! store, mirroring how `limbo_core`'s `translate` pipeline consumes a
//! `Schema` passed in by the caller (`core/lib.rs`) instead of owning
//! persistence itself.

use crate::error::{RdbError, Result};
use crate::expr::Expr;
use crate::object::TupleType;
use crate::recmap::RecordMapOps;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A named boolean constraint over the catalog (spec §4.M).
#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub expr: Expr,
}

/// The external collaborator seam spec §1 calls out: table lookup by
/// name plus the constraint set, both read by the evaluator/optimizer
/// and the assignment/constraint engine.
pub trait Catalog {
    fn table(&self, name: &str) -> Result<Rc<RefCell<dyn RecordMapOps>>>;
    fn table_type(&self, name: &str) -> Result<TupleType>;
    fn constraints(&self) -> Result<Vec<Constraint>>;
}

/// (SUPPLEMENTED) A minimal in-memory `Catalog`, sufficient for tests
/// and for embedding without a persistent schema store — the crate's
/// Non-goal excludes an on-disk catalog *format*, not any catalog
/// implementation at all.
#[derive(Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Rc<RefCell<dyn RecordMapOps>>>,
    types: HashMap<String, TupleType>,
    constraints: Vec<Constraint>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(
        &mut self,
        name: impl Into<String>,
        ty: TupleType,
        table: Rc<RefCell<dyn RecordMapOps>>,
    ) {
        let name = name.into();
        self.types.insert(name.clone(), ty);
        self.tables.insert(name, table);
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, expr: Expr) {
        self.constraints.push(Constraint {
            name: name.into(),
            expr,
        });
    }

    pub fn remove_table(&mut self, name: &str) {
        self.tables.remove(name);
        self.types.remove(name);
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, name: &str) -> Result<Rc<RefCell<dyn RecordMapOps>>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| RdbError::Name(format!("table {name} does not exist")))
    }

    fn table_type(&self, name: &str) -> Result<TupleType> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| RdbError::Name(format!("table {name} does not exist")))
    }

    fn constraints(&self) -> Result<Vec<Constraint>> {
        Ok(self.constraints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldInfo;
    use crate::object::Type;
    use crate::recmap::tree::TreeStore;
    use crate::recmap::{RecordMap, RecordMapFlags};

    #[test]
    fn unknown_table_is_name_error() {
        let cat = InMemoryCatalog::new();
        let err = cat.table("NOPE").unwrap_err();
        assert!(matches!(err, RdbError::Name(_)));
    }

    #[test]
    fn registered_table_is_retrievable() {
        let mut cat = InMemoryCatalog::new();
        let fields = vec![FieldInfo::fixed("id", 4)];
        let m = RecordMap::create("T", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None))
            .unwrap();
        let ty = TupleType::new([("id".to_string(), Type::Integer)]);
        cat.register_table("T", ty, Rc::new(RefCell::new(m)));
        assert!(cat.table("T").is_ok());
    }
}
