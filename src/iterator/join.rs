//! Join (spec §4.K).
//!
//! "Nested loop or index-nested-loop; the right child may be a
//! TABLE-REF (or RENAME over one) whose index covers the common
//! attributes; for each outer tuple, seek the right side, iterate
//! matches, yield concatenation."

use super::{tuples_match, Tuple, TupleIter};
use crate::error::{RdbError, Result};

pub struct JoinIter {
    outer: Box<dyn TupleIter>,
    /// Rebuilt per outer tuple, given that tuple's values — an
    /// index-nested-loop builder seeds an `IndexProbe` from it; a plain
    /// nested loop ignores it and rescans in full.
    make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>>,
    current_outer: Option<Tuple>,
    current_inner: Option<Box<dyn TupleIter>>,
}

impl JoinIter {
    pub fn new(
        outer: Box<dyn TupleIter>,
        make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>>,
    ) -> Self {
        Self {
            outer,
            make_inner,
            current_outer: None,
            current_inner: None,
        }
    }
}

impl TupleIter for JoinIter {
    fn next(&mut self) -> Result<Tuple> {
        loop {
            if self.current_inner.is_none() {
                let t = self.outer.next()?;
                self.current_inner = Some((self.make_inner)(&t)?);
                self.current_outer = Some(t);
            }
            let inner = self.current_inner.as_mut().unwrap();
            match inner.next() {
                Ok(b) => {
                    let a = self.current_outer.as_ref().unwrap();
                    if tuples_match(a, &b)? {
                        let mut out = a.clone();
                        out.extend(b);
                        return Ok(out);
                    }
                }
                Err(RdbError::NotFound) => {
                    self.current_inner = None;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
