//! Stored scan, index probe, and the single-child per-tuple pipeline
//! stages (where/project/rename/extend/wrap/unwrap) (spec §4.K).

use super::{project_tuple, Tuple, TupleIter};
use crate::cursor::{RecordCursor, TableCursor};
use crate::error::{RdbError, Result};
use crate::expr::{Expr, IndexSelection};
use crate::object::{scalar_from_bytes, scalar_to_bytes, Object, Type};
use crate::recmap::RecordMapOps;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// "Stored scan: wraps a cursor at first; next advances; end signaled
/// by NOT_FOUND" (spec §4.K).
pub struct StoredScan {
    cursor: TableCursor,
    attrs: Vec<(String, Type)>,
    started: bool,
}

impl StoredScan {
    pub fn new(table: Rc<RefCell<dyn RecordMapOps>>, attrs: Vec<(String, Type)>) -> Self {
        Self {
            cursor: TableCursor::new(table),
            attrs,
            started: false,
        }
    }

    fn land(&self) -> Result<Tuple> {
        let mut t = Tuple::new();
        for (i, (name, ty)) in self.attrs.iter().enumerate() {
            let bytes = self.cursor.get(i)?;
            t.insert(name.clone(), scalar_from_bytes(ty, &bytes)?);
        }
        Ok(t)
    }
}

impl TupleIter for StoredScan {
    fn next(&mut self) -> Result<Tuple> {
        let ok = if !self.started {
            self.started = true;
            self.cursor.first()?
        } else {
            self.cursor.next()?
        };
        if !ok {
            return Err(RdbError::NotFound);
        }
        self.land()
    }
}

/// "Index probe: with objpv, positions cursor at first matching prefix;
/// if all_eq and full prefix matches the unique index, yields at most
/// one tuple; otherwise iterates while the stop-expression ... remains
/// TRUE" (spec §4.K).
pub struct IndexProbe {
    table: Rc<RefCell<dyn RecordMapOps>>,
    index_no: usize,
    attrs: Vec<(String, Type)>,
    sel: IndexSelection,
    current_key: Option<Vec<u8>>,
    started: bool,
    exhausted: bool,
}

impl IndexProbe {
    pub fn new(
        table: Rc<RefCell<dyn RecordMapOps>>,
        index_no: usize,
        attrs: Vec<(String, Type)>,
        sel: IndexSelection,
    ) -> Self {
        Self {
            table,
            index_no,
            attrs,
            sel,
            current_key: None,
            started: false,
            exhausted: false,
        }
    }

    fn landed_record(&self, primary_key: &[u8]) -> Result<Tuple> {
        let fields = self.table.borrow().get_by_key_bytes(primary_key)?;
        let mut t = Tuple::new();
        for (i, (name, ty)) in self.attrs.iter().enumerate() {
            t.insert(name.clone(), scalar_from_bytes(ty, &fields[i])?);
        }
        Ok(t)
    }
}

impl TupleIter for IndexProbe {
    fn next(&mut self) -> Result<Tuple> {
        if self.exhausted {
            return Err(RdbError::NotFound);
        }
        let table = self.table.borrow();
        let idx = &table.indexes()[self.index_no];

        let probe_values: Vec<Vec<u8>> = self
            .sel
            .objpv
            .iter()
            .map(scalar_to_bytes)
            .collect::<Result<_>>()?;
        let probe_refs: Vec<&[u8]> = probe_values.iter().map(|v| v.as_slice()).collect();

        let entry = if !self.started {
            self.started = true;
            let floor = idx.floor_key(&probe_refs)?;
            idx.raw_seek_ge(&floor)?
        } else if self.sel.all_eq {
            // Unique-index point/range lookup already yielded its one
            // row (spec §4.K: "yields at most one tuple").
            None
        } else {
            match &self.current_key {
                Some(k) => idx.raw_next_strict(k)?,
                None => None,
            }
        };

        let (key, value) = match entry {
            Some(e) => e,
            None => {
                self.exhausted = true;
                return Err(RdbError::NotFound);
            }
        };

        // Every probed field but a trailing range bound must match the
        // landed entry exactly; the range field itself only bounds the
        // scan (via the seek start and `stopexp`), so a later row with
        // a larger value there is still in-range, not a mismatch.
        let eq_len = if self.sel.all_eq {
            probe_values.len()
        } else {
            probe_values.len().saturating_sub(1)
        };
        for (i, v) in probe_values.iter().enumerate().take(eq_len) {
            let actual = idx.decode_key_field(i, &key)?;
            if &actual != v {
                self.exhausted = true;
                return Err(RdbError::NotFound);
            }
        }

        self.current_key = Some(key);
        drop(table);
        let tuple = self.landed_record(&value)?;

        if let Some(stop) = &self.sel.stopexp {
            let ok = crate::eval::eval_scalar_bool_on_tuple(stop, &tuple)?;
            if !ok {
                self.exhausted = true;
                return Err(RdbError::NotFound);
            }
        }
        Ok(tuple)
    }
}

/// "Where: pulls child, evaluates predicate, yields if TRUE" (spec
/// §4.K).
pub struct WhereIter {
    child: Box<dyn TupleIter>,
    cond: Expr,
}

impl WhereIter {
    pub fn new(child: Box<dyn TupleIter>, cond: Expr) -> Self {
        Self { child, cond }
    }
}

impl TupleIter for WhereIter {
    fn next(&mut self) -> Result<Tuple> {
        loop {
            let t = self.child.next()?;
            if crate::eval::eval_scalar_bool_on_tuple(&self.cond, &t)? {
                return Ok(t);
            }
        }
    }
}

/// "Project: pulls child, projects attributes; may require duplicate
/// removal, which materializes rows into an auxiliary set for
/// membership tests" (spec §4.K).
pub struct ProjectIter {
    child: Box<dyn TupleIter>,
    attrs: Vec<String>,
    seen: Option<HashSet<Vec<u8>>>,
}

impl ProjectIter {
    pub fn new(child: Box<dyn TupleIter>, attrs: Vec<String>, dedup: bool) -> Self {
        Self {
            child,
            attrs,
            seen: dedup.then(HashSet::new),
        }
    }
}

pub(crate) fn dedup_key(t: &Tuple) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in t {
        out.extend_from_slice(k.as_bytes());
        out.push(0);
        out.extend_from_slice(&format!("{v:?}").into_bytes());
        out.push(0);
    }
    out
}

impl TupleIter for ProjectIter {
    fn next(&mut self) -> Result<Tuple> {
        loop {
            let t = self.child.next()?;
            let projected = project_tuple(&t, &self.attrs);
            match &mut self.seen {
                Some(seen) => {
                    if seen.insert(dedup_key(&projected)) {
                        return Ok(projected);
                    }
                }
                None => return Ok(projected),
            }
        }
    }
}

/// "Rename: pulls child, renames attributes in the produced tuple"
/// (spec §4.K).
pub struct RenameIter {
    child: Box<dyn TupleIter>,
    /// (from, to) pairs.
    pairs: Vec<(String, String)>,
}

impl RenameIter {
    pub fn new(child: Box<dyn TupleIter>, pairs: Vec<(String, String)>) -> Self {
        Self { child, pairs }
    }
}

impl TupleIter for RenameIter {
    fn next(&mut self) -> Result<Tuple> {
        let t = self.child.next()?;
        let renamed: BTreeMap<String, String> = self.pairs.iter().cloned().collect();
        Ok(t
            .into_iter()
            .map(|(k, v)| (renamed.get(&k).cloned().unwrap_or(k), v))
            .collect())
    }
}

/// "Extend: pulls child, evaluates added attribute expressions in the
/// scope of the tuple" (spec §4.K).
pub struct ExtendIter {
    child: Box<dyn TupleIter>,
    added: Vec<(String, Expr)>,
}

impl ExtendIter {
    pub fn new(child: Box<dyn TupleIter>, added: Vec<(String, Expr)>) -> Self {
        Self { child, added }
    }
}

impl TupleIter for ExtendIter {
    fn next(&mut self) -> Result<Tuple> {
        let mut t = self.child.next()?;
        for (name, expr) in &self.added {
            let v = crate::eval::eval_scalar_on_tuple(expr, &t)?;
            t.insert(name.clone(), v);
        }
        Ok(t)
    }
}

/// Wraps the named attributes into a nested tuple attribute
/// (`wrap`/relational operator list, spec §3).
pub struct WrapIter {
    child: Box<dyn TupleIter>,
    wrapped: Vec<String>,
    into: String,
}

impl WrapIter {
    pub fn new(child: Box<dyn TupleIter>, wrapped: Vec<String>, into: String) -> Self {
        Self {
            child,
            wrapped,
            into,
        }
    }
}

impl TupleIter for WrapIter {
    fn next(&mut self) -> Result<Tuple> {
        let mut t = self.child.next()?;
        let mut inner = BTreeMap::new();
        for name in &self.wrapped {
            if let Some(v) = t.remove(name) {
                inner.insert(name.clone(), v);
            }
        }
        t.insert(self.into.clone(), Object::Tuple(inner));
        Ok(t)
    }
}

/// Inverse of [`WrapIter`]: flattens a nested tuple attribute back into
/// the parent tuple.
pub struct UnwrapIter {
    child: Box<dyn TupleIter>,
    from: String,
}

impl UnwrapIter {
    pub fn new(child: Box<dyn TupleIter>, from: String) -> Self {
        Self { child, from }
    }
}

impl TupleIter for UnwrapIter {
    fn next(&mut self) -> Result<Tuple> {
        let mut t = self.child.next()?;
        if let Some(Object::Tuple(inner)) = t.remove(&self.from) {
            t.extend(inner);
        }
        Ok(t)
    }
}
