//! Query result iterators (spec §4.K).
//!
//! "Uniform interface: `next(tpl) → OK | NOT_FOUND | ERROR`" (spec
//! §4.K) is realized as `Result<Tuple>` with `RdbError::NotFound`
//! carrying end-of-sequence, per the dual-duty documented on
//! [`crate::error::RdbError`]. Split into one file per data-flow shape
//! rather than one file per operator, mirroring how
//! `limbo_core::vdbe` splits `builder.rs`/`insn.rs`/`sorter.rs` by
//! concern.

pub mod group;
pub mod join;
pub mod scan;
pub mod setops;
pub mod sort;
pub mod summarize;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::object::Object;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A single result row: attribute name → value (spec §3 TUPLE).
pub type Tuple = BTreeMap<String, Object>;

/// Pull-based iterator over an expression's result (spec §4.K).
pub trait TupleIter {
    /// Advances to, and returns, the next tuple. `Err(NotFound)` signals
    /// end of sequence.
    fn next(&mut self) -> Result<Tuple>;
}

/// Construction-time context every iterator needs: the catalog, for
/// resolving table references and index probes.
#[derive(Clone)]
pub struct IterCtx {
    pub catalog: Rc<dyn Catalog>,
}

/// Two tuples "match on common attributes" (spec §4.K "Matching
/// semantics"): equal on every attribute present in both; attributes
/// present in only one are ignored.
pub fn tuples_match(a: &Tuple, b: &Tuple) -> Result<bool> {
    for (k, va) in a {
        if let Some(vb) = b.get(k) {
            if !va.equals(vb)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

pub fn project_tuple(t: &Tuple, attrs: &[String]) -> Tuple {
    attrs
        .iter()
        .filter_map(|a| t.get(a).map(|v| (a.clone(), v.clone())))
        .collect()
}
