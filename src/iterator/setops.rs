//! Union and the second-child-membership family: semijoin, semiminus,
//! minus, intersect, divide (spec §4.K).

use super::{project_tuple, tuples_match, Tuple, TupleIter};
use crate::error::{RdbError, Result};
use std::collections::BTreeSet;

/// "Union: pulls from first child until NOT_FOUND, then second; no
/// dedup in this layer (the planner inserts a dedupping project above
/// when needed)" (spec §4.K).
pub struct UnionIter {
    first: Box<dyn TupleIter>,
    second: Box<dyn TupleIter>,
    first_done: bool,
}

impl UnionIter {
    pub fn new(first: Box<dyn TupleIter>, second: Box<dyn TupleIter>) -> Self {
        Self {
            first,
            second,
            first_done: false,
        }
    }
}

impl TupleIter for UnionIter {
    fn next(&mut self) -> Result<Tuple> {
        if !self.first_done {
            match self.first.next() {
                Ok(t) => return Ok(t),
                Err(RdbError::NotFound) => self.first_done = true,
                Err(e) => return Err(e),
            }
        }
        self.second.next()
    }
}

/// Whether to keep an outer tuple when it matches some inner tuple, or
/// when it matches none (spec §4.K: "Semijoin / semiminus / minus /
/// intersect ... inner probe checks membership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    OnMatch,
    OnNoMatch,
}

/// "Outer loop pulls first child; inner probe checks membership in
/// second child ... otherwise fall back to full scan of second child
/// for each outer tuple (the optimizer normally prevents this)" (spec
/// §4.K). This is that fallback: a fresh inner iterator is rebuilt (via
/// `make_inner`) for every outer tuple. `Semijoin`/`Intersect` use
/// `Keep::OnMatch`; `Minus`/`Semiminus` use `Keep::OnNoMatch`.
pub struct MembershipIter {
    outer: Box<dyn TupleIter>,
    /// Rebuilt per outer tuple — plain full scan unless the builder
    /// seeds an index probe from the outer tuple's values (spec §4.K:
    /// "if second child is a TABLE-REF with a covering unique index,
    /// probe by index").
    make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>>,
    keep: Keep,
}

impl MembershipIter {
    pub fn new(
        outer: Box<dyn TupleIter>,
        make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>>,
        keep: Keep,
    ) -> Self {
        Self {
            outer,
            make_inner,
            keep,
        }
    }
}

impl TupleIter for MembershipIter {
    fn next(&mut self) -> Result<Tuple> {
        loop {
            let t = self.outer.next()?;
            let mut inner = (self.make_inner)(&t)?;
            let mut matched = false;
            loop {
                match inner.next() {
                    Ok(b) => {
                        if tuples_match(&t, &b)? {
                            matched = true;
                            break;
                        }
                    }
                    Err(RdbError::NotFound) => break,
                    Err(e) => return Err(e),
                }
            }
            let keep = matched == (self.keep == Keep::OnMatch);
            if keep {
                return Ok(t);
            }
        }
    }
}

fn tuple_sort_key(t: &Tuple) -> String {
    t.iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join("\u{1}")
}

/// Binary relational division: `result = { t restricted to A\B's
/// attributes | for every tuple b of B, t ∪ b ∈ A }`. Materializing,
/// like the teacher's sorter/summarize iterators — division has no
/// streaming formulation without a covering index on the full `A`
/// schema.
pub struct DivideIter {
    results: std::vec::IntoIter<Tuple>,
}

impl DivideIter {
    pub fn new(
        mut a: Box<dyn TupleIter>,
        mut b: Box<dyn TupleIter>,
        quotient_attrs: Vec<String>,
    ) -> Result<Self> {
        let mut a_rows = Vec::new();
        loop {
            match a.next() {
                Ok(t) => a_rows.push(t),
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        let mut b_rows = Vec::new();
        loop {
            match b.next() {
                Ok(t) => b_rows.push(t),
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }

        let a_set: BTreeSet<String> = a_rows.iter().map(tuple_sort_key).collect();
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        let mut by_key: std::collections::HashMap<String, Tuple> = std::collections::HashMap::new();
        for row in &a_rows {
            let cand = project_tuple(row, &quotient_attrs);
            let key = tuple_sort_key(&cand);
            candidates.insert(key.clone());
            by_key.insert(key, cand);
        }

        let mut out = Vec::new();
        'cand: for key in candidates {
            let cand = &by_key[&key];
            for brow in &b_rows {
                let mut joined = cand.clone();
                joined.extend(brow.clone());
                if !a_set.contains(&tuple_sort_key(&joined)) {
                    continue 'cand;
                }
            }
            out.push(cand.clone());
        }
        Ok(Self {
            results: out.into_iter(),
        })
    }
}

impl TupleIter for DivideIter {
    fn next(&mut self) -> Result<Tuple> {
        self.results.next().ok_or(RdbError::NotFound)
    }
}
