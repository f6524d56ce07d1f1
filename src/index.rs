//! Secondary index (spec §4.C).
//!
//! Grounded on `original_source/duro/fdbrec/fdbindex.c`: an index is a
//! key/value store mapping the encoded projection of a parent record
//! onto a subset of fields to the parent's primary key bytes.

use crate::error::{RdbError, Result};
use crate::field::{encode, FieldInfo, HalfLayout};
use crate::recmap::OrderedStore;

/// An index over a subset of a parent record map's fields.
///
/// `fields` holds, in order, the parent field numbers the index is
/// built over; `field_layout` re-declares those fields' lengths (in the
/// same order as `fields`) so the projection can be encoded
/// independently of the parent's full record layout.
pub struct Index {
    pub name: String,
    pub fields: Vec<usize>,
    pub unique: bool,
    pub asc: Vec<bool>,
    field_layout: Vec<FieldInfo>,
    store: Box<dyn OrderedStore>,
}

impl Index {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<usize>,
        field_layout: Vec<FieldInfo>,
        asc: Vec<bool>,
        unique: bool,
        store: Box<dyn OrderedStore>,
    ) -> Self {
        assert_eq!(fields.len(), field_layout.len());
        assert_eq!(fields.len(), asc.len());
        Self {
            name: name.into(),
            fields,
            unique,
            asc,
            field_layout,
            store,
        }
    }

    fn layout(&self) -> HalfLayout<'_> {
        HalfLayout {
            fields: &self.field_layout,
            start: 0,
        }
    }

    fn index_key(&self, record_fields: &[&[u8]]) -> Result<Vec<u8>> {
        let values: Vec<&[u8]> = self.fields.iter().map(|&f| record_fields[f]).collect();
        encode(&self.layout(), &values)
    }

    /// spec §4.C "On insert": compute the encoded index key from the
    /// inserted record; if unique, probe and fail with `KeyViolation`
    /// on a duplicate, then write. `record_fields` is the full,
    /// newly-inserted parent record (by field number); `primary_key` is
    /// the parent's already-encoded primary key bytes, stored as the
    /// index entry's value.
    pub fn insert_entry(&mut self, record_fields: &[&[u8]], primary_key: &[u8]) -> Result<()> {
        let key = self.index_key(record_fields)?;
        if self.unique && self.store.contains_key(&key)? {
            return Err(RdbError::KeyViolation);
        }
        self.store.insert(&key, primary_key)
    }

    /// spec §4.C "On delete": recompute the encoded index key from the
    /// record being deleted and erase it.
    pub fn delete_entry(&mut self, record_fields: &[&[u8]]) -> Result<()> {
        let key = self.index_key(record_fields)?;
        if self.store.remove(&key)?.is_none() {
            return Err(RdbError::NotFound);
        }
        Ok(())
    }

    /// Look up the primary key for an exact index key match (used by
    /// the semijoin/minus/join iterators' index-probe path, spec §4.K).
    pub fn lookup(&self, record_fields: &[&[u8]]) -> Result<Option<Vec<u8>>> {
        let key = self.index_key(record_fields)?;
        self.store.get(&key)
    }

    /// Builds the synthetic floor key for a leading-field probe: the
    /// supplied values followed by the minimal (zero/empty) value for
    /// every remaining index field, mirroring `cursor::TableCursor`'s
    /// `seek` construction (same monotonic-encoding assumption).
    pub fn floor_key(&self, leading: &[&[u8]]) -> Result<Vec<u8>> {
        if leading.len() > self.field_layout.len() {
            return Err(RdbError::InvalidArgument(
                "index probe given more fields than the index has".into(),
            ));
        }
        let mut owned: Vec<Vec<u8>> = Vec::with_capacity(self.field_layout.len());
        for (i, info) in self.field_layout.iter().enumerate() {
            if i < leading.len() {
                owned.push(leading[i].to_vec());
            } else {
                owned.push(match info.len {
                    crate::field::FieldLen::Fixed(n) => vec![0u8; n as usize],
                    crate::field::FieldLen::Variable => Vec::new(),
                });
            }
        }
        let refs: Vec<&[u8]> = owned.iter().map(|v| v.as_slice()).collect();
        encode(&self.layout(), &refs)
    }

    /// First index entry whose key is `>= key`.
    pub fn raw_seek_ge(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        c.seek(key)?;
        Ok(c.current())
    }

    /// First index entry whose key is strictly greater than `key`.
    pub fn raw_next_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        c.seek(key)?;
        match c.current() {
            Some((k, _)) if k == key => Ok(if c.next()? { c.current() } else { None }),
            other => Ok(other),
        }
    }

    /// Extracts index-field `field_pos`'s raw bytes from an encoded
    /// index key, for checking whether a candidate still matches a
    /// leading-field probe (spec §4.K "Index probe").
    pub fn decode_key_field(&self, field_pos: usize, key_bytes: &[u8]) -> Result<Vec<u8>> {
        crate::field::get_field(&self.layout(), field_pos, key_bytes).map(|b| b.to_vec())
    }

    pub fn store(&self) -> &dyn OrderedStore {
        self.store.as_ref()
    }

    pub fn field_layout(&self) -> &[FieldInfo] {
        &self.field_layout
    }

    /// Whether `seq`, in order, is a prefix of this index's attribute
    /// sequence with matching direction — used by the optimizer's sort
    /// cost rule (spec §4.J "Sorted output").
    pub fn sorts_as(&self, field_nos_in_order: &[usize], asc: &[bool]) -> bool {
        if field_nos_in_order.len() > self.fields.len() {
            return false;
        }
        field_nos_in_order
            .iter()
            .zip(asc.iter())
            .enumerate()
            .all(|(i, (fno, a))| self.fields[i] == *fno && self.asc[i] == *a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recmap::tree::TreeStore;

    #[test]
    fn unique_index_rejects_duplicate_projection() {
        let layout = vec![FieldInfo::fixed("b", 4)];
        let mut idx = Index::new(
            "ix_b",
            vec![1],
            layout,
            vec![true],
            true,
            Box::new(TreeStore::new(None)),
        );
        let a1 = 1i32.to_be_bytes();
        let b1 = 10i32.to_be_bytes();
        let a2 = 2i32.to_be_bytes();
        idx.insert_entry(&[&a1, &b1], &a1).unwrap();
        let err = idx.insert_entry(&[&a2, &b1], &a2).unwrap_err();
        assert!(matches!(err, RdbError::KeyViolation));
    }
}
