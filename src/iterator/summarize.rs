//! Summarize (spec §4.K): "materializes the PER relation, then scans
//! the summand relation updating aggregate accumulators keyed by the
//! per-tuple; emits accumulated results."

use super::{project_tuple, Tuple, TupleIter};
use crate::error::{RdbError, Result};
use crate::expr::Expr;
use crate::object::Object;

/// One summarize output attribute's aggregate kind, paired with the
/// per-tuple expression it reduces (spec §4.H "Aggregates").
#[derive(Debug, Clone)]
pub enum AggSpec {
    Count,
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    All(Expr),
    Any(Expr),
}

#[derive(Default)]
struct Acc {
    count: i64,
    sum_int: i64,
    sum_float: f64,
    saw_float: bool,
    min: Option<Object>,
    max: Option<Object>,
    all: bool,
    any: bool,
}

pub struct SummarizeIter {
    results: std::vec::IntoIter<Tuple>,
}

impl SummarizeIter {
    pub fn new(
        mut summand: Box<dyn TupleIter>,
        per_rows: Vec<Tuple>,
        per_attrs: Vec<String>,
        aggs: Vec<(String, AggSpec)>,
    ) -> Result<Self> {
        let mut accs: Vec<Acc> = per_rows.iter().map(|_| Acc::default()).collect();
        // One accumulator set per aggregate attribute, per group.
        let mut per_attr_accs: Vec<Vec<Acc>> = aggs
            .iter()
            .map(|_| per_rows.iter().map(|_| Acc::default()).collect())
            .collect();
        let _ = &mut accs;

        loop {
            let t = match summand.next() {
                Ok(t) => t,
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            };
            let key = project_tuple(&t, &per_attrs);
            let group_idx = match per_rows.iter().position(|p| *p == key) {
                Some(i) => i,
                None => continue, // no matching PER tuple; row contributes nothing.
            };
            for (ai, (_, spec)) in aggs.iter().enumerate() {
                let acc = &mut per_attr_accs[ai][group_idx];
                update_acc(acc, spec, &t)?;
            }
        }

        let mut out = Vec::with_capacity(per_rows.len());
        for (gi, per_row) in per_rows.into_iter().enumerate() {
            let mut row = per_row;
            for (ai, (name, spec)) in aggs.iter().enumerate() {
                let acc = &per_attr_accs[ai][gi];
                row.insert(name.clone(), finish_acc(acc, spec)?);
            }
            out.push(row);
        }

        Ok(Self {
            results: out.into_iter(),
        })
    }
}

fn update_acc(acc: &mut Acc, spec: &AggSpec, t: &Tuple) -> Result<()> {
    acc.count += 1;
    let operand = |e: &Expr| crate::eval::eval_scalar_on_tuple(e, t);
    match spec {
        AggSpec::Count => {}
        AggSpec::Sum(e) | AggSpec::Avg(e) => {
            let v = operand(e)?;
            match v {
                Object::Int(i) => {
                    acc.sum_int = acc
                        .sum_int
                        .checked_add(i)
                        .ok_or_else(|| RdbError::TypeConstraintViolation("sum overflow".into()))?;
                }
                Object::Float(f) => {
                    acc.saw_float = true;
                    acc.sum_float += f;
                }
                _ => return Err(crate::error::RdbError::TypeMismatch("sum/avg needs a number".into())),
            }
        }
        AggSpec::Min(e) => {
            let v = operand(e)?;
            acc.min = Some(match &acc.min {
                None => v,
                Some(cur) => {
                    if numeric_lt(&v, cur)? {
                        v
                    } else {
                        cur.clone()
                    }
                }
            });
        }
        AggSpec::Max(e) => {
            let v = operand(e)?;
            acc.max = Some(match &acc.max {
                None => v,
                Some(cur) => {
                    if numeric_lt(cur, &v)? {
                        v
                    } else {
                        cur.clone()
                    }
                }
            });
        }
        AggSpec::All(e) => {
            let v = operand(e)?.as_bool()?;
            if acc.count == 1 {
                acc.all = true;
            }
            acc.all &= v;
        }
        AggSpec::Any(e) => {
            let v = operand(e)?.as_bool()?;
            acc.any |= v;
        }
    }
    Ok(())
}

fn numeric_lt(a: &Object, b: &Object) -> Result<bool> {
    Ok(a.as_float()? < b.as_float()?)
}

fn finish_acc(acc: &Acc, spec: &AggSpec) -> Result<Object> {
    Ok(match spec {
        AggSpec::Count => Object::Int(acc.count),
        AggSpec::Sum(_) => {
            if acc.saw_float {
                Object::Float(acc.sum_float + acc.sum_int as f64)
            } else {
                Object::Int(acc.sum_int)
            }
        }
        AggSpec::Avg(_) => {
            if acc.count == 0 {
                return Err(RdbError::AggregateUndefined);
            }
            let total = acc.sum_float + acc.sum_int as f64;
            Object::Float(total / acc.count as f64)
        }
        AggSpec::Min(_) => acc.min.clone().ok_or(RdbError::AggregateUndefined)?,
        AggSpec::Max(_) => acc.max.clone().ok_or(RdbError::AggregateUndefined)?,
        AggSpec::All(_) => Object::Bool(acc.count > 0 && acc.all),
        AggSpec::Any(_) => Object::Bool(acc.any),
    })
}

impl TupleIter for SummarizeIter {
    fn next(&mut self) -> Result<Tuple> {
        self.results.next().ok_or(RdbError::NotFound)
    }
}
