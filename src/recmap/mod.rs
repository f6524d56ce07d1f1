//! Record map abstraction (spec §4.B).
//!
//! The "single abstract interface" backends implement (spec §4.B's
//! intro sentence) is factored at the storage primitive level —
//! [`OrderedStore`] — with one generic [`RecordMap`] built once on top
//! that does field encoding, index maintenance, and the operation table
//! from spec §4.B for *any* conforming store. This mirrors how the
//! teacher separates its `IO`/`PageIO` traits from the single generic
//! `Pager` built on top (`core/storage/pager.rs`), rather than letting
//! each backend reimplement insert/update/delete/index-maintenance
//! independently.

mod avl;
pub mod tree;

#[cfg(feature = "remote")]
pub mod remote;

use crate::error::{RdbError, Result};
use crate::field::{encode, FieldInfo, FieldLen, HalfLayout};
use crate::index::Index;
use crate::txn::Txn;
use bitflags::bitflags;
use std::cmp::Ordering;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordMapFlags: u32 {
        const UNIQUE = 0b0001;
    }
}

/// One field of the user-visible comparison order (spec §3 "Record map":
/// "optional comparison-field vector defining user-visible sort order").
#[derive(Debug, Clone, Copy)]
pub struct CmpField {
    pub field_no: usize,
    pub asc: bool,
}

/// The storage primitive a backend must supply: an ordered byte-keyed
/// key/value store with cursor support. Tree and remote-KV backends each
/// provide one implementation; [`RecordMap`] and [`Index`] are both
/// generic over it.
pub trait OrderedStore: Send {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
    fn cursor(&self) -> Box<dyn StoreCursor + '_>;
    /// Heuristic row count for the optimizer; `None` if unknown (spec
    /// §4.B `est_size`: "may be 0/unknown").
    fn est_size(&self) -> Option<u64>;
    /// Whether this store supports `prev`/`seek` (the remote-KV backend
    /// does not, spec §4.B.2).
    fn supports_backward_and_seek(&self) -> bool {
        true
    }
}

/// A cursor over raw, encoded `(key, value)` pairs. [`RecordMap`]'s
/// field-aware cursor ([`crate::cursor::RecordCursor`]) is built on top
/// of this.
pub trait StoreCursor {
    fn first(&mut self) -> Result<bool>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    fn seek(&mut self, key: &[u8]) -> Result<bool>;
    /// Current position's key/value, if positioned on a record.
    fn current(&self) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// A field-wise comparator built from a record map's `cmp_fields` (or,
/// absent one, from all key fields ascending), falling back to raw
/// memcmp of the remaining bytes once the declared comparison fields
/// are exhausted (spec §4.B.1).
pub fn cmp_fields_comparator(
    key_layout: HalfLayout<'static>,
    cmp_fields: Vec<CmpField>,
) -> impl Fn(&[u8], &[u8]) -> Ordering + Send + Sync + Clone {
    move |a: &[u8], b: &[u8]| -> Ordering {
        for cf in &cmp_fields {
            let (oa, la) = match crate::field::decode_field(&key_layout, cf.field_no, a) {
                Ok(v) => v,
                Err(_) => return a.cmp(b),
            };
            let (ob, lb) = match crate::field::decode_field(&key_layout, cf.field_no, b) {
                Ok(v) => v,
                Err(_) => return a.cmp(b),
            };
            let ord = a[oa..oa + la].cmp(&b[ob..ob + lb]);
            let ord = if cf.asc { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        // Tie-broken by raw memcmp (spec §4.B.1).
        a.cmp(b)
    }
}

/// The generic record map: field layout + index list + one backing
/// [`OrderedStore`] (spec §3 "Record map", §4.B).
pub struct RecordMap<S: OrderedStore> {
    name: String,
    fieldinfo: Vec<FieldInfo>,
    keyfieldcount: usize,
    cmp_fields: Option<Vec<CmpField>>,
    flags: RecordMapFlags,
    store: S,
    indexes: Vec<Index>,
}

impl<S: OrderedStore> RecordMap<S> {
    pub fn create(
        name: impl Into<String>,
        fieldinfo: Vec<FieldInfo>,
        keyfieldcount: usize,
        cmp_fields: Option<Vec<CmpField>>,
        flags: RecordMapFlags,
        store: S,
    ) -> Result<Self> {
        if !flags.contains(RecordMapFlags::UNIQUE) {
            return Err(RdbError::NotSupported(
                "non-unique primary record maps are not supported".into(),
            ));
        }
        if keyfieldcount == 0 || keyfieldcount > fieldinfo.len() {
            return Err(RdbError::InvalidArgument(
                "keyfieldcount must be in 1..=fieldinfo.len()".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            fieldinfo,
            keyfieldcount,
            cmp_fields,
            flags,
            store,
            indexes: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fieldinfo(&self) -> &[FieldInfo] {
        &self.fieldinfo
    }

    pub fn keyfieldcount(&self) -> usize {
        self.keyfieldcount
    }

    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut Vec<Index> {
        &mut self.indexes
    }

    pub fn add_index(&mut self, index: Index) {
        self.indexes.push(index);
    }

    /// The field layout of the key half (field numbers `0..keyfieldcount`).
    pub fn key_layout(&self) -> HalfLayout<'_> {
        HalfLayout {
            fields: &self.fieldinfo[..self.keyfieldcount],
            start: 0,
        }
    }

    /// The field layout of the value half
    /// (field numbers `keyfieldcount..fieldinfo.len()`).
    pub fn value_layout(&self) -> HalfLayout<'_> {
        HalfLayout {
            fields: &self.fieldinfo[self.keyfieldcount..],
            start: self.keyfieldcount,
        }
    }

    fn encode_key(&self, key_fields: &[&[u8]]) -> Result<Vec<u8>> {
        encode(&self.key_layout(), key_fields)
    }

    fn encode_value(&self, value_fields: &[&[u8]]) -> Result<Vec<u8>> {
        encode(&self.value_layout(), value_fields)
    }

    /// spec §4.B `insert`: fails with `KeyViolation` if the key is
    /// already present; otherwise writes the record and maintains every
    /// dependent index.
    pub fn insert(&mut self, fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()> {
        if fields.len() != self.fieldinfo.len() {
            return Err(RdbError::InvalidArgument("wrong number of fields".into()));
        }
        let key = self.encode_key(&fields[..self.keyfieldcount])?;
        let value = self.encode_value(&fields[self.keyfieldcount..])?;

        if self.store.contains_key(&key)? {
            return Err(RdbError::KeyViolation);
        }

        // Maintain indexes first so a KEY_VIOLATION on a unique index
        // leaves the primary store untouched (spec §4.C).
        let mut inserted_into: Vec<usize> = Vec::new();
        for (i, idx) in self.indexes.iter_mut().enumerate() {
            match idx.insert_entry(fields, &key) {
                Ok(()) => inserted_into.push(i),
                Err(e) => {
                    for &j in &inserted_into {
                        let _ = self.indexes[j].delete_entry(fields);
                    }
                    return Err(e);
                }
            }
        }
        self.store.insert(&key, &value)?;
        let _ = txn;
        Ok(())
    }

    /// spec §4.B `get`: fails with `NotFound` if absent.
    pub fn get(&self, key_fields: &[&[u8]], wanted_fields: &[usize]) -> Result<Vec<Vec<u8>>> {
        let key = self.encode_key(key_fields)?;
        let value = self
            .store
            .get(&key)?
            .ok_or(RdbError::NotFound)?;
        let mut out = Vec::with_capacity(wanted_fields.len());
        for &fno in wanted_fields {
            let bytes = if fno < self.keyfieldcount {
                crate::field::get_field(&self.key_layout(), fno, &key)?.to_vec()
            } else {
                crate::field::get_field(
                    &self.value_layout(),
                    fno - self.keyfieldcount,
                    &value,
                )?
                .to_vec()
            };
            out.push(bytes);
        }
        Ok(out)
    }

    /// spec §4.B `update`: rewrites affected fields; if the update
    /// touches a key field or any indexed field, this is implemented as
    /// delete + reinsert (spec §4.B, "this is handled by the backend").
    pub fn update(
        &mut self,
        key_fields: &[&[u8]],
        updates: &[(usize, Vec<u8>)],
        txn: Option<&mut Txn>,
    ) -> Result<()> {
        let key = self.encode_key(key_fields)?;
        let old_value = self.store.get(&key)?.ok_or(RdbError::NotFound)?;

        let touches_key = updates.iter().any(|(fno, _)| *fno < self.keyfieldcount);
        let touches_index = updates.iter().any(|(fno, _)| {
            self.indexes.iter().any(|ix| ix.fields.contains(fno))
        });

        // Reconstruct the full old field vector for index maintenance.
        let mut old_fields: Vec<Vec<u8>> = Vec::with_capacity(self.fieldinfo.len());
        for fno in 0..self.fieldinfo.len() {
            let bytes = if fno < self.keyfieldcount {
                crate::field::get_field(&self.key_layout(), fno, &key)?.to_vec()
            } else {
                crate::field::get_field(&self.value_layout(), fno - self.keyfieldcount, &old_value)?
                    .to_vec()
            };
            old_fields.push(bytes);
        }
        let mut new_fields = old_fields.clone();
        for (fno, v) in updates {
            new_fields[*fno] = v.clone();
        }

        if touches_key || touches_index {
            let old_refs: Vec<&[u8]> = old_fields.iter().map(|v| v.as_slice()).collect();
            let new_refs: Vec<&[u8]> = new_fields.iter().map(|v| v.as_slice()).collect();
            self.delete_raw(&old_refs)?;
            if let Err(e) = self.insert(&new_refs, None) {
                // Reinsertion failed (e.g. KEY_VIOLATION): restore the
                // original record and surface the error (spec §4.C).
                let _ = self.insert(&old_refs, None);
                return Err(e);
            }
            let _ = txn;
            return Ok(());
        }

        // In-place rewrite of the value half only.
        let mut new_value = old_value;
        for (fno, v) in updates {
            let local = *fno - self.keyfieldcount;
            crate::field::update_field_in_place(&self.value_layout(), local, &mut new_value, v)?;
        }
        self.store.insert(&key, &new_value)?;
        let _ = txn;
        Ok(())
    }

    /// spec §4.B `delete`: removes the record and dependent index
    /// entries; `NotFound` if absent.
    pub fn delete(&mut self, key_fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()> {
        let key = self.encode_key(key_fields)?;
        let value = self.store.get(&key)?.ok_or(RdbError::NotFound)?;
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(self.fieldinfo.len());
        for fno in 0..self.fieldinfo.len() {
            let bytes = if fno < self.keyfieldcount {
                crate::field::get_field(&self.key_layout(), fno, &key)?.to_vec()
            } else {
                crate::field::get_field(&self.value_layout(), fno - self.keyfieldcount, &value)?
                    .to_vec()
            };
            fields.push(bytes);
        }
        let refs: Vec<&[u8]> = fields.iter().map(|v| v.as_slice()).collect();
        self.delete_raw(&refs)?;
        let _ = txn;
        Ok(())
    }

    fn delete_raw(&mut self, fields: &[&[u8]]) -> Result<()> {
        let key = self.encode_key(&fields[..self.keyfieldcount])?;
        for idx in self.indexes.iter_mut() {
            idx.delete_entry(fields)?;
        }
        self.store.remove(&key)?.ok_or(RdbError::NotFound)?;
        Ok(())
    }

    /// spec §4.B `contains`: key must exist AND stored value bytes must
    /// equal the encoded value bytes.
    pub fn contains(&self, fields: &[&[u8]]) -> Result<bool> {
        let key = self.encode_key(&fields[..self.keyfieldcount])?;
        let value = self.encode_value(&fields[self.keyfieldcount..])?;
        Ok(match self.store.get(&key)? {
            Some(stored) => stored == value,
            None => false,
        })
    }

    pub fn est_size(&self) -> Option<u64> {
        self.store.est_size()
    }

    /// Looks the record up directly by its already-encoded primary key
    /// bytes, bypassing `encode_key` — used by the index probe iterator,
    /// which only has the primary key bytes stored as an index entry's
    /// value (spec §4.K "Index probe").
    pub fn get_by_key_bytes(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let value = self.store.get(key)?.ok_or(RdbError::NotFound)?;
        self.decode_record(key, &value)
    }

    /// Splits an encoded `(key, value)` pair back into one byte vector
    /// per field, in field-number order.
    pub fn decode_record(&self, key: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.fieldinfo.len());
        for fno in 0..self.fieldinfo.len() {
            let bytes = if fno < self.keyfieldcount {
                crate::field::get_field(&self.key_layout(), fno, key)?.to_vec()
            } else {
                crate::field::get_field(&self.value_layout(), fno - self.keyfieldcount, value)?
                    .to_vec()
            };
            out.push(bytes);
        }
        Ok(out)
    }

    pub fn supports_backward_and_seek(&self) -> bool {
        self.store.supports_backward_and_seek()
    }

    pub fn raw_first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        Ok(if c.first()? { c.current() } else { None })
    }

    pub fn raw_last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        Ok(if c.prev()? { c.current() } else { None })
    }

    /// First entry whose key is strictly greater than `key`.
    pub fn raw_next_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        c.seek(key)?;
        match c.current() {
            Some((k, _)) if k == key => Ok(if c.next()? { c.current() } else { None }),
            other => Ok(other),
        }
    }

    /// First entry whose key is strictly less than `key`.
    pub fn raw_prev_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        let landed = c.seek(key)?;
        if !landed && c.current().is_none() {
            // `key` is past the end of the store: the last entry is prev.
            return Ok(if c.prev()? { c.current() } else { None });
        }
        Ok(if c.prev()? { c.current() } else { None })
    }

    /// First entry whose key is `>= key`.
    pub fn raw_seek_ge(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut c = self.store.cursor();
        c.seek(key)?;
        Ok(c.current())
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn flags(&self) -> RecordMapFlags {
        self.flags
    }

    pub fn cmp_fields(&self) -> Option<&[CmpField]> {
        self.cmp_fields.as_deref()
    }
}

/// The object-safe seam iterators/the evaluator use to treat any
/// `RecordMap<S>` uniformly regardless of backend (spec §4.B: "The core
/// invokes only these capability points").
pub trait RecordMapOps: Send {
    fn name(&self) -> &str;
    fn fieldinfo(&self) -> &[FieldInfo];
    fn keyfieldcount(&self) -> usize;
    fn insert(&mut self, fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()>;
    fn get(&self, key_fields: &[&[u8]], wanted_fields: &[usize]) -> Result<Vec<Vec<u8>>>;
    fn update(
        &mut self,
        key_fields: &[&[u8]],
        updates: &[(usize, Vec<u8>)],
        txn: Option<&mut Txn>,
    ) -> Result<()>;
    fn delete(&mut self, key_fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()>;
    fn contains(&self, fields: &[&[u8]]) -> Result<bool>;
    fn est_size(&self) -> Option<u64>;
    fn indexes(&self) -> &[Index];
    fn decode_record(&self, key: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>>;
    fn get_by_key_bytes(&self, key: &[u8]) -> Result<Vec<Vec<u8>>>;
    fn supports_backward_and_seek(&self) -> bool;
    fn raw_first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    fn raw_last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    fn raw_next_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    fn raw_prev_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
    fn raw_seek_ge(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

impl<S: OrderedStore> RecordMapOps for RecordMap<S> {
    fn name(&self) -> &str {
        RecordMap::name(self)
    }
    fn fieldinfo(&self) -> &[FieldInfo] {
        RecordMap::fieldinfo(self)
    }
    fn keyfieldcount(&self) -> usize {
        RecordMap::keyfieldcount(self)
    }
    fn insert(&mut self, fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()> {
        RecordMap::insert(self, fields, txn)
    }
    fn get(&self, key_fields: &[&[u8]], wanted_fields: &[usize]) -> Result<Vec<Vec<u8>>> {
        RecordMap::get(self, key_fields, wanted_fields)
    }
    fn update(
        &mut self,
        key_fields: &[&[u8]],
        updates: &[(usize, Vec<u8>)],
        txn: Option<&mut Txn>,
    ) -> Result<()> {
        RecordMap::update(self, key_fields, updates, txn)
    }
    fn delete(&mut self, key_fields: &[&[u8]], txn: Option<&mut Txn>) -> Result<()> {
        RecordMap::delete(self, key_fields, txn)
    }
    fn contains(&self, fields: &[&[u8]]) -> Result<bool> {
        RecordMap::contains(self, fields)
    }
    fn est_size(&self) -> Option<u64> {
        RecordMap::est_size(self)
    }
    fn indexes(&self) -> &[Index] {
        RecordMap::indexes(self)
    }
    fn decode_record(&self, key: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>> {
        RecordMap::decode_record(self, key, value)
    }
    fn get_by_key_bytes(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        RecordMap::get_by_key_bytes(self, key)
    }
    fn supports_backward_and_seek(&self) -> bool {
        RecordMap::supports_backward_and_seek(self)
    }
    fn raw_first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        RecordMap::raw_first(self)
    }
    fn raw_last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        RecordMap::raw_last(self)
    }
    fn raw_next_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        RecordMap::raw_next_strict(self, key)
    }
    fn raw_prev_strict(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        RecordMap::raw_prev_strict(self, key)
    }
    fn raw_seek_ge(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        RecordMap::raw_seek_ge(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldInfo;
    use crate::recmap::tree::TreeStore;

    fn make_simple_map() -> RecordMap<TreeStore> {
        let fields = vec![FieldInfo::fixed("no", 4), FieldInfo::variable("name")];
        RecordMap::create(
            "E",
            fields,
            1,
            None,
            RecordMapFlags::UNIQUE,
            TreeStore::new(None),
        )
        .unwrap()
    }

    #[test]
    fn s1_insert_and_key_violation() {
        let mut m = make_simple_map();
        let one = 1i32.to_le_bytes();
        m.insert(&[&one, b"A"], None).unwrap();
        let err = m.insert(&[&one, b"B"], None).unwrap_err();
        assert!(matches!(err, RdbError::KeyViolation));

        let got = m.get(&[&one], &[1]).unwrap();
        assert_eq!(got[0], b"A");
    }

    #[test]
    fn update_touching_key_is_delete_then_insert() {
        let fields = vec![FieldInfo::fixed("id", 4), FieldInfo::fixed("v", 4)];
        let mut m = RecordMap::create(
            "K",
            fields,
            1,
            None,
            RecordMapFlags::UNIQUE,
            TreeStore::new(None),
        )
        .unwrap();
        let one = 1i32.to_le_bytes();
        let ten = 10i32.to_le_bytes();
        m.insert(&[&one, &ten], None).unwrap();

        let two = 2i32.to_le_bytes();
        m.update(&[&one], &[(0, two.to_vec())], None).unwrap();
        assert!(m.get(&[&one], &[1]).is_err());
        assert_eq!(m.get(&[&two], &[1]).unwrap()[0], ten);

        // (3, ...) already exists -> update to id=3 collides.
        let three = 3i32.to_le_bytes();
        m.insert(&[&three, &ten], None).unwrap();
        let err = m
            .update(&[&two], &[(0, three.to_vec())], None)
            .unwrap_err();
        assert!(matches!(err, RdbError::KeyViolation));
        // Original record (2, 10) must still be intact.
        assert_eq!(m.get(&[&two], &[1]).unwrap()[0], ten);
    }
}
