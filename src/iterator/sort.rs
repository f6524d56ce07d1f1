//! Sorter (spec §4.K): "external materialization into an ordered
//! index-backed transient table on the requested seq-items; iterator
//! then scans the result." Realized here as a materialize-then-sort
//! step rather than round-tripping through a transient `RecordMap` —
//! the transient table's whole purpose downstream is the sorted scan
//! order, which an in-memory sort gives directly without spending an
//! encode/decode pass through the field codec.

use super::{Tuple, TupleIter};
use crate::error::{RdbError, Result};
use crate::object::{Object, SeqItem};
use std::cmp::Ordering;

fn cmp_objects(a: &Object, b: &Object) -> Ordering {
    match (a, b) {
        (Object::Int(x), Object::Int(y)) => x.cmp(y),
        (Object::Float(x), Object::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Object::Int(x), Object::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Object::Float(x), Object::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Object::Bool(x), Object::Bool(y)) => x.cmp(y),
        (Object::Time(x), Object::Time(y)) => x.cmp(y),
        (Object::Bin(x), Object::Bin(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

pub struct SorterIter {
    rows: std::vec::IntoIter<Tuple>,
}

impl SorterIter {
    pub fn new(
        mut child: Box<dyn TupleIter>,
        seq: Vec<SeqItem>,
        limit: Option<usize>,
    ) -> Result<Self> {
        let mut rows = Vec::new();
        loop {
            match child.next() {
                Ok(t) => rows.push(t),
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        rows.sort_by(|a, b| {
            for item in &seq {
                let (va, vb) = (a.get(&item.attr), b.get(&item.attr));
                let ord = match (va, vb) {
                    (Some(x), Some(y)) => cmp_objects(x, y),
                    _ => Ordering::Equal,
                };
                let ord = if item.asc { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(n) = limit {
            rows.truncate(n);
        }
        Ok(Self {
            rows: rows.into_iter(),
        })
    }
}

impl TupleIter for SorterIter {
    fn next(&mut self) -> Result<Tuple> {
        self.rows.next().ok_or(RdbError::NotFound)
    }
}
