//! Group / ungroup, and transitive closure (spec §4.K: "Group materializes
//! nested relations; ungroup flattens.").

use super::{Tuple, TupleIter};
use crate::error::{RdbError, Result};
use crate::object::Object;

/// Materializes the child, grouping by every attribute *not* named in
/// `grouped_attrs`, and nests the grouped attributes' values (as
/// `Object::Array` of `Object::Tuple`, this engine's stand-in for a
/// relation-valued attribute) under `into`.
pub struct GroupIter {
    results: std::vec::IntoIter<Tuple>,
}

impl GroupIter {
    pub fn new(mut child: Box<dyn TupleIter>, grouped_attrs: Vec<String>, into: String) -> Result<Self> {
        let mut groups: Vec<(Tuple, Vec<Tuple>)> = Vec::new();
        loop {
            let t = match child.next() {
                Ok(t) => t,
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            };
            let mut rest = Tuple::new();
            let mut grouped = Tuple::new();
            for (k, v) in t {
                if grouped_attrs.contains(&k) {
                    grouped.insert(k, v);
                } else {
                    rest.insert(k, v);
                }
            }
            match groups.iter_mut().find(|(r, _)| *r == rest) {
                Some((_, members)) => members.push(grouped),
                None => groups.push((rest, vec![grouped])),
            }
        }

        let out: Vec<Tuple> = groups
            .into_iter()
            .map(|(mut rest, members)| {
                let nested = Object::Array(
                    members.into_iter().map(Object::Tuple).collect(),
                    None,
                );
                rest.insert(into.clone(), nested);
                rest
            })
            .collect();

        Ok(Self {
            results: out.into_iter(),
        })
    }
}

impl TupleIter for GroupIter {
    fn next(&mut self) -> Result<Tuple> {
        self.results.next().ok_or(RdbError::NotFound)
    }
}

/// Inverse of [`GroupIter`]: flattens the nested relation-valued
/// attribute `from` back into one tuple per member.
pub struct UngroupIter {
    child: Box<dyn TupleIter>,
    from: String,
    pending: std::vec::IntoIter<Tuple>,
}

impl UngroupIter {
    pub fn new(child: Box<dyn TupleIter>, from: String) -> Self {
        Self {
            child,
            from,
            pending: Vec::new().into_iter(),
        }
    }
}

impl TupleIter for UngroupIter {
    fn next(&mut self) -> Result<Tuple> {
        loop {
            if let Some(t) = self.pending.next() {
                return Ok(t);
            }
            let mut t = self.child.next()?;
            let nested = t.remove(&self.from);
            let rest = t;
            let members = match nested {
                Some(Object::Array(items, _)) => items,
                _ => return Err(RdbError::TypeMismatch(format!("{} is not a nested relation", self.from))),
            };
            let flattened: Vec<Tuple> = members
                .into_iter()
                .filter_map(|m| match m {
                    Object::Tuple(inner) => {
                        let mut row = rest.clone();
                        row.extend(inner);
                        Some(row)
                    }
                    _ => None,
                })
                .collect();
            self.pending = flattened.into_iter();
        }
    }
}

/// Transitive closure of a binary relation over attributes
/// (`from_attr`, `to_attr`) (`tclose`, spec §3 operator list). Computed
/// by materializing the base relation and repeatedly joining it with
/// itself until a fixed point is reached.
pub struct TcloseIter {
    results: std::vec::IntoIter<Tuple>,
}

impl TcloseIter {
    pub fn new(mut child: Box<dyn TupleIter>, from_attr: String, to_attr: String) -> Result<Self> {
        let mut pairs: Vec<(Object, Object)> = Vec::new();
        loop {
            let mut t = match child.next() {
                Ok(t) => t,
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            };
            let a = t
                .remove(&from_attr)
                .ok_or_else(|| RdbError::Name(format!("{from_attr} not present")))?;
            let b = t
                .remove(&to_attr)
                .ok_or_else(|| RdbError::Name(format!("{to_attr} not present")))?;
            if !pairs.iter().any(|(x, y)| *x == a && *y == b) {
                pairs.push((a, b));
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            let snapshot = pairs.clone();
            for (a, b) in &snapshot {
                for (c, d) in &snapshot {
                    if b == c && !pairs.iter().any(|(x, y)| x == a && y == d) {
                        pairs.push((a.clone(), d.clone()));
                        changed = true;
                    }
                }
            }
        }

        let out: Vec<Tuple> = pairs
            .into_iter()
            .map(|(a, b)| {
                let mut row = Tuple::new();
                row.insert(from_attr.clone(), a);
                row.insert(to_attr.clone(), b);
                row
            })
            .collect();

        Ok(Self {
            results: out.into_iter(),
        })
    }
}

impl TupleIter for TcloseIter {
    fn next(&mut self) -> Result<Tuple> {
        self.results.next().ok_or(RdbError::NotFound)
    }
}
