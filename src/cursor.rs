//! Cursor (spec §4.D).
//!
//! A cursor holds a reference to its parent record map plus the encoded
//! key of its current position; navigation re-derives the position via
//! the backend's ordered-store primitives rather than holding a live
//! borrow into the backend, per the spec §9 re-architecture note that
//! parent-pointer-style traversal state "can be recomputed during
//! traversal" — this also gives the tree and remote-KV backends the
//! same cursor shape, matching how the remote-KV backend is documented
//! to hold "a copied-out key/value buffer" (spec §4.D).

use crate::error::{RdbError, Result};
use crate::field::{encode, FieldLen, HalfLayout};
use crate::recmap::RecordMapOps;
use std::cell::RefCell;
use std::rc::Rc;

/// The operations a cursor supports (spec §4.D).
pub trait RecordCursor {
    fn first(&mut self) -> Result<bool>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    /// Positions at the first record whose leading fields equal the
    /// supplied values. The remote-KV backend does not implement
    /// `seek` or `prev` (spec §4.D).
    fn seek(&mut self, leading_fields: &[&[u8]]) -> Result<bool>;
    fn get(&self, field_no: usize) -> Result<Vec<u8>>;
    /// Updates the current record, rejecting key-field updates (spec
    /// §4.D).
    fn set(&mut self, updates: &[(usize, Vec<u8>)]) -> Result<()>;
    /// Removes the current record and refreshes the cursor to the next
    /// position, atomically with respect to index maintenance (spec
    /// §4.D).
    fn delete(&mut self) -> Result<()>;
}

/// A cursor over a stored table, shared via `Rc<RefCell<_>>` so that a
/// self-join can open two independent cursors over the same table —
/// mirroring the teacher's `Rc<RefCell<Schema>>` ownership for shared,
/// single-threaded-mutable state (`core/lib.rs`).
pub struct TableCursor {
    table: Rc<RefCell<dyn RecordMapOps>>,
    current_key: Option<Vec<u8>>,
    current_fields: Option<Vec<Vec<u8>>>,
}

impl TableCursor {
    pub fn new(table: Rc<RefCell<dyn RecordMapOps>>) -> Self {
        Self {
            table,
            current_key: None,
            current_fields: None,
        }
    }

    fn land(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>) -> Result<bool> {
        match entry {
            Some((k, v)) => {
                let fields = self.table.borrow().decode_record(&k, &v)?;
                self.current_key = Some(k);
                self.current_fields = Some(fields);
                Ok(true)
            }
            None => {
                self.current_key = None;
                self.current_fields = None;
                Ok(false)
            }
        }
    }

    fn key_layout_fields(&self) -> (Vec<crate::field::FieldInfo>, usize) {
        let t = self.table.borrow();
        let kfc = t.keyfieldcount();
        (t.fieldinfo()[..kfc].to_vec(), kfc)
    }
}

impl RecordCursor for TableCursor {
    fn first(&mut self) -> Result<bool> {
        let entry = self.table.borrow().raw_first()?;
        self.land(entry)
    }

    fn next(&mut self) -> Result<bool> {
        let entry = match &self.current_key {
            Some(k) => self.table.borrow().raw_next_strict(k)?,
            None => self.table.borrow().raw_first()?,
        };
        self.land(entry)
    }

    fn prev(&mut self) -> Result<bool> {
        if !self.table.borrow().supports_backward_and_seek() {
            return Err(RdbError::NotSupported(
                "this backend does not support prev()".into(),
            ));
        }
        let entry = match &self.current_key {
            Some(k) => self.table.borrow().raw_prev_strict(k)?,
            None => self.table.borrow().raw_last()?,
        };
        self.land(entry)
    }

    fn seek(&mut self, leading_fields: &[&[u8]]) -> Result<bool> {
        if !self.table.borrow().supports_backward_and_seek() {
            return Err(RdbError::NotSupported(
                "this backend does not support seek()".into(),
            ));
        }
        let (key_fields, kfc) = self.key_layout_fields();
        if leading_fields.len() > kfc {
            return Err(RdbError::InvalidArgument(
                "seek() given more fields than the key has".into(),
            ));
        }
        // Build a synthetic floor key: the supplied leading fields, then
        // the minimal (zero / empty) value for every remaining key
        // field, so `seek_ge` lands on the first record whose leading
        // fields are >= the supplied values. This assumes field byte
        // encodings are monotonic with the all-zero value as the
        // minimum, which callers must uphold for any field used in a
        // comparison (see `object::sort_key`).
        let mut owned: Vec<Vec<u8>> = Vec::with_capacity(kfc);
        for (i, info) in key_fields.iter().enumerate() {
            if i < leading_fields.len() {
                owned.push(leading_fields[i].to_vec());
            } else {
                owned.push(match info.len {
                    FieldLen::Fixed(n) => vec![0u8; n as usize],
                    FieldLen::Variable => Vec::new(),
                });
            }
        }
        let layout = HalfLayout {
            fields: &key_fields,
            start: 0,
        };
        let refs: Vec<&[u8]> = owned.iter().map(|v| v.as_slice()).collect();
        let floor_key = encode(&layout, &refs)?;

        let entry = self.table.borrow().raw_seek_ge(&floor_key)?;
        let matched = match &entry {
            Some((k, _)) => {
                let fields = self.table.borrow().decode_record(k, &entry.as_ref().unwrap().1)?;
                leading_fields
                    .iter()
                    .enumerate()
                    .all(|(i, v)| fields[i].as_slice() == *v)
            }
            None => false,
        };
        self.land(entry)?;
        Ok(matched)
    }

    fn get(&self, field_no: usize) -> Result<Vec<u8>> {
        let fields = self
            .current_fields
            .as_ref()
            .ok_or(RdbError::NotFound)?;
        fields
            .get(field_no)
            .cloned()
            .ok_or_else(|| RdbError::InvalidArgument(format!("no field {field_no}")))
    }

    fn set(&mut self, updates: &[(usize, Vec<u8>)]) -> Result<()> {
        let kfc = self.table.borrow().keyfieldcount();
        if updates.iter().any(|(fno, _)| *fno < kfc) {
            return Err(RdbError::InvalidArgument(
                "cursor set() cannot update a key field".into(),
            ));
        }
        let fields = self.current_fields.clone().ok_or(RdbError::NotFound)?;
        let key_refs: Vec<&[u8]> = fields[..kfc].iter().map(|v| v.as_slice()).collect();
        self.table.borrow_mut().update(&key_refs, updates, None)?;
        for (fno, v) in updates {
            self.current_fields.as_mut().unwrap()[*fno] = v.clone();
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        let fields = self.current_fields.clone().ok_or(RdbError::NotFound)?;
        let kfc = self.table.borrow().keyfieldcount();
        let key_refs: Vec<&[u8]> = fields[..kfc].iter().map(|v| v.as_slice()).collect();
        let old_key = self.current_key.clone().unwrap();

        self.table.borrow_mut().delete(&key_refs, None)?;
        let next = self.table.borrow().raw_seek_ge(&old_key)?;
        self.land(next)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldInfo;
    use crate::recmap::tree::TreeStore;
    use crate::recmap::{RecordMap, RecordMapFlags};

    fn table() -> Rc<RefCell<dyn RecordMapOps>> {
        let fields = vec![FieldInfo::fixed("no", 4), FieldInfo::variable("name")];
        let mut m = RecordMap::create(
            "E",
            fields,
            1,
            None,
            RecordMapFlags::UNIQUE,
            TreeStore::new(None),
        )
        .unwrap();
        for (n, name) in [(1i32, "a"), (2, "b"), (3, "c")] {
            let nb = n.to_be_bytes();
            m.insert(&[&nb, name.as_bytes()], None).unwrap();
        }
        Rc::new(RefCell::new(m))
    }

    #[test]
    fn scan_visits_all_records_once_in_order() {
        let t = table();
        let mut cur = TableCursor::new(t);
        let mut seen = Vec::new();
        let mut ok = cur.first().unwrap();
        while ok {
            seen.push(i32::from_be_bytes(cur.get(0).unwrap().try_into().unwrap()));
            ok = cur.next().unwrap();
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn delete_advances_to_next_record() {
        let t = table();
        let mut cur = TableCursor::new(t);
        cur.first().unwrap();
        assert_eq!(cur.get(0).unwrap(), 1i32.to_be_bytes());
        cur.delete().unwrap();
        // cursor now refreshed onto record 2.
        assert_eq!(cur.get(0).unwrap(), 2i32.to_be_bytes());
    }

    #[test]
    fn set_rejects_key_field_update() {
        let t = table();
        let mut cur = TableCursor::new(t);
        cur.first().unwrap();
        let err = cur.set(&[(0, vec![9, 9, 9, 9])]).unwrap_err();
        assert!(matches!(err, RdbError::InvalidArgument(_)));
    }
}
