//! Evaluator (spec §4.H).
//!
//! Reduces an expression either to an `Object` (scalar result, or a
//! `TABLE` wrapping a not-yet-opened virtual-table expression) or, via
//! [`build_iterator`], to a lazy pull iterator over that virtual table
//! — matching spec §4.H's "Reduces an expression to an object or to a
//! lazy result iterator."
//!
//! Since a parser is out of scope (spec §1 Non-goals), relational
//! operator nodes are built directly as `Expr::Op` trees rather than
//! parsed from a surface syntax; the argument-shape convention each
//! operator expects is documented next to its arm in [`build_iterator`].

use crate::catalog::Catalog;
use crate::error::{RdbError, Result};
use crate::expr::{Expr, Op};
use crate::iterator::group::{GroupIter, TcloseIter, UngroupIter};
use crate::iterator::join::JoinIter;
use crate::iterator::scan::{
    ExtendIter, IndexProbe, ProjectIter, RenameIter, StoredScan, UnwrapIter, WhereIter, WrapIter,
};
use crate::iterator::setops::{DivideIter, Keep, MembershipIter, UnionIter};
use crate::iterator::sort::SorterIter;
use crate::iterator::summarize::{AggSpec, SummarizeIter};
use crate::iterator::{Tuple, TupleIter};
use crate::object::{Object, SeqItem, TableRef, Type};
use std::rc::Rc;

fn var_name(e: &Expr) -> Result<String> {
    match e {
        Expr::Var(n) => Ok(n.clone()),
        _ => Err(RdbError::InvalidArgument("expected an attribute name".into())),
    }
}

fn table_attrs(catalog: &Rc<dyn Catalog>, name: &str) -> Result<Vec<(String, Type)>> {
    let table = catalog.table(name)?;
    let ty = catalog.table_type(name)?;
    let fieldinfo = table.borrow().fieldinfo().to_vec();
    fieldinfo
        .iter()
        .map(|f| {
            let t = ty
                .attr(&f.name)
                .cloned()
                .ok_or_else(|| RdbError::Name(format!("no declared type for field {}", f.name)))?;
            Ok((f.name.clone(), t))
        })
        .collect()
}

/// Evaluates a pure scalar expression against a single tuple's scope
/// (no catalog access — used for WHERE predicates, EXTEND expressions,
/// and index stop-expressions, none of which reference tables
/// directly).
pub fn eval_scalar_on_tuple(expr: &Expr, tuple: &Tuple) -> Result<Object> {
    match expr {
        Expr::Object(o) => Ok(o.clone()),
        Expr::TableRef(n) => Ok(Object::Table(TableRef::Stored(n.clone()))),
        Expr::Var(name) => tuple
            .get(name)
            .cloned()
            .ok_or_else(|| RdbError::Name(format!("attribute {name} not found"))),
        Expr::Op { op, args, .. } => eval_scalar_op(*op, args, tuple),
    }
}

pub fn eval_scalar_bool_on_tuple(expr: &Expr, tuple: &Tuple) -> Result<bool> {
    eval_scalar_on_tuple(expr, tuple)?.as_bool()
}

fn eval_scalar_op(op: Op, args: &[Expr], tuple: &Tuple) -> Result<Object> {
    let arg = |i: usize| eval_scalar_on_tuple(&args[i], tuple);
    Ok(match op {
        Op::Eq => Object::Bool(arg(0)?.equals(&arg(1)?)?),
        Op::Ne => Object::Bool(!arg(0)?.equals(&arg(1)?)?),
        Op::Lt => Object::Bool(numeric_cmp(&arg(0)?, &arg(1)?)? == std::cmp::Ordering::Less),
        Op::Le => Object::Bool(numeric_cmp(&arg(0)?, &arg(1)?)? != std::cmp::Ordering::Greater),
        Op::Gt => Object::Bool(numeric_cmp(&arg(0)?, &arg(1)?)? == std::cmp::Ordering::Greater),
        Op::Ge => Object::Bool(numeric_cmp(&arg(0)?, &arg(1)?)? != std::cmp::Ordering::Less),
        Op::And => Object::Bool(arg(0)?.as_bool()? && arg(1)?.as_bool()?),
        Op::Or => Object::Bool(arg(0)?.as_bool()? || arg(1)?.as_bool()?),
        Op::Not => Object::Bool(!arg(0)?.as_bool()?),
        Op::Add => arith(&arg(0)?, &arg(1)?, |a, b| a.checked_add(b), |a, b| a + b)?,
        Op::Sub => arith(&arg(0)?, &arg(1)?, |a, b| a.checked_sub(b), |a, b| a - b)?,
        Op::Mul => arith(&arg(0)?, &arg(1)?, |a, b| a.checked_mul(b), |a, b| a * b)?,
        Op::Div => {
            let (a, b) = (arg(0)?, arg(1)?);
            Object::Float(a.as_float()? / b.as_float()?)
        }
        Op::Concat => {
            let mut s = arg(0)?.as_str()?.to_string();
            s.push_str(arg(1)?.as_str()?);
            Object::Bin(std::sync::Arc::new(s.into_bytes()))
        }
        Op::Like => {
            let s = arg(0)?.as_str()?.to_string();
            let pattern = arg(1)?.as_str()?.to_string();
            Object::Bool(like_match(&pattern, &s)?)
        }
        Op::If => {
            if arg(0)?.as_bool()? {
                arg(1)?
            } else {
                arg(2)?
            }
        }
        Op::Dot => {
            let base = arg(0)?;
            let prop = var_name(&args[1])?;
            base.tuple_get(&prop)?.clone()
        }
        Op::Index => {
            let base = arg(0)?;
            let idx = arg(1)?.as_int()? as usize;
            base.array_get(idx)?.clone()
        }
        Op::Named(name) => return Err(RdbError::OperatorNotFound(name.to_string())),
        other => {
            return Err(RdbError::InvalidArgument(format!(
                "{other:?} is not a scalar operator"
            )))
        }
    })
}

fn numeric_cmp(a: &Object, b: &Object) -> Result<std::cmp::Ordering> {
    if let (Object::Bin(x), Object::Bin(y)) = (a, b) {
        return Ok(x.as_slice().cmp(y.as_slice()));
    }
    a.as_float()?
        .partial_cmp(&b.as_float()?)
        .ok_or_else(|| RdbError::TypeMismatch("NaN is not ordered".into()))
}

fn arith(
    a: &Object,
    b: &Object,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Object> {
    Ok(match (a, b) {
        (Object::Int(x), Object::Int(y)) => Object::Int(
            int_op(*x, *y).ok_or_else(|| RdbError::TypeConstraintViolation("integer overflow".into()))?,
        ),
        _ => Object::Float(float_op(a.as_float()?, b.as_float()?)),
    })
}

/// Translates a `*`/`?` glob pattern (spec §3's LIKE wildcards) to an
/// anchored regex and matches it against `s`.
fn like_match(pattern: &str, s: &str) -> Result<bool> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    let compiled = regex::Regex::new(&re)
        .map_err(|e| RdbError::InvalidArgument(format!("bad LIKE pattern: {e}")))?;
    Ok(compiled.is_match(s))
}

/// Top-level evaluator entry (spec §4.H): `OBJECT` clones, `TABLE-REF`/
/// `VAR` resolve to a value or a stored-table reference, relational
/// `OP`s reduce to a lazy `Object::Table(Virtual(..))`, and scalar /
/// aggregate `OP`s reduce to a value.
pub fn evaluate(expr: &Expr, scope: Option<&Tuple>, catalog: &Rc<dyn Catalog>) -> Result<Object> {
    match expr {
        Expr::Object(o) => Ok(o.clone()),
        Expr::TableRef(name) => Ok(Object::Table(TableRef::Stored(name.clone()))),
        Expr::Var(name) => {
            if let Some(t) = scope {
                if let Some(v) = t.get(name) {
                    return Ok(v.clone());
                }
            }
            // "if not found and a transaction is active, resolve against
            // the catalog as a table" (spec §4.H).
            catalog.table(name).map(|_| Object::Table(TableRef::Stored(name.clone())))
        }
        Expr::Op { op, args, .. } => match op {
            Op::IsEmpty => {
                let mut it = build_iterator(&args[0], catalog)?;
                Ok(Object::Bool(matches!(it.next(), Err(RdbError::NotFound))))
            }
            Op::Count => {
                // "count(T) removes duplicates then consumes" (spec
                // §4.H): a relational operand is a set, not a bag, so
                // e.g. count(union(A, B)) must not double-count rows
                // the two sides share. Reuses `ProjectIter`'s own
                // dedup key rather than a second comparison scheme.
                let mut it = build_iterator(&args[0], catalog)?;
                let mut seen = std::collections::HashSet::new();
                let mut n = 0i64;
                loop {
                    match it.next() {
                        Ok(t) => {
                            if seen.insert(crate::iterator::scan::dedup_key(&t)) {
                                n += 1;
                            }
                        }
                        Err(RdbError::NotFound) => break,
                        Err(e) => return Err(e),
                    }
                }
                Ok(Object::Int(n))
            }
            Op::Sum | Op::Avg | Op::Min | Op::Max | Op::All | Op::Any => {
                reduce_aggregate(*op, args, catalog)
            }
            relational if is_relational(*relational) => {
                Ok(Object::Table(TableRef::Virtual(std::sync::Arc::new(expr.clone()))))
            }
            _ => eval_scalar_op_with_catalog(*op, args, scope, catalog),
        },
    }
}

fn eval_scalar_op_with_catalog(
    op: Op,
    args: &[Expr],
    scope: Option<&Tuple>,
    catalog: &Rc<dyn Catalog>,
) -> Result<Object> {
    // Scalar operators never need table resolution beyond the tuple
    // scope; reuse the tuple-only evaluator once `Var` lookups are
    // known to resolve locally.
    let tuple = scope.cloned().unwrap_or_default();
    let _ = catalog;
    eval_scalar_op(op, args, &tuple)
}

fn is_relational(op: Op) -> bool {
    matches!(
        op,
        Op::Where
            | Op::Project
            | Op::Remove
            | Op::Rename
            | Op::Extend
            | Op::Union
            | Op::Minus
            | Op::Semiminus
            | Op::Intersect
            | Op::Semijoin
            | Op::Join
            | Op::Divide
            | Op::Summarize
            | Op::Group
            | Op::Ungroup
            | Op::Tclose
            | Op::Wrap
            | Op::Unwrap
            | Op::Update
    )
}

fn reduce_aggregate(op: Op, args: &[Expr], catalog: &Rc<dyn Catalog>) -> Result<Object> {
    let mut it = build_iterator(&args[0], catalog)?;
    let per_expr = args.get(1);
    let mut acc: Option<Object> = None;
    let mut count = 0i64;
    let mut all = true;
    let mut any = false;
    loop {
        let t = match it.next() {
            Ok(t) => t,
            Err(RdbError::NotFound) => break,
            Err(e) => return Err(e),
        };
        let v = match per_expr {
            Some(e) => eval_scalar_on_tuple(e, &t)?,
            None => return Err(RdbError::InvalidArgument("aggregate needs an operand expression".into())),
        };
        count += 1;
        match op {
            Op::Sum => {
                acc = Some(match acc {
                    None => v,
                    Some(a) => arith(&a, &v, |x, y| x.checked_add(y), |x, y| x + y)?,
                });
            }
            Op::Avg => {
                acc = Some(Object::Float(
                    acc.map(|a| a.as_float().unwrap_or(0.0)).unwrap_or(0.0) + v.as_float()?,
                ));
            }
            Op::Min => {
                acc = Some(match acc {
                    None => v,
                    Some(a) => {
                        if numeric_cmp(&v, &a)? == std::cmp::Ordering::Less {
                            v
                        } else {
                            a
                        }
                    }
                });
            }
            Op::Max => {
                acc = Some(match acc {
                    None => v,
                    Some(a) => {
                        if numeric_cmp(&v, &a)? == std::cmp::Ordering::Greater {
                            v
                        } else {
                            a
                        }
                    }
                });
            }
            Op::All => all &= v.as_bool()?,
            Op::Any => any |= v.as_bool()?,
            _ => unreachable!(),
        }
    }
    Ok(match op {
        Op::Sum => acc.unwrap_or(Object::Int(0)),
        Op::Avg => {
            if count == 0 {
                return Err(RdbError::AggregateUndefined);
            }
            Object::Float(acc.unwrap().as_float()? / count as f64)
        }
        Op::Min | Op::Max => acc.ok_or(RdbError::AggregateUndefined)?,
        Op::All => Object::Bool(count > 0 && all),
        Op::Any => Object::Bool(any),
        _ => unreachable!(),
    })
}

/// Unwraps an `Object::Table` (stored or virtual) into a pull iterator.
pub fn open(table: &Object, catalog: &Rc<dyn Catalog>) -> Result<Box<dyn TupleIter>> {
    match table {
        Object::Table(TableRef::Stored(name)) => {
            build_iterator(&Expr::table_ref(name.clone()), catalog)
        }
        Object::Table(TableRef::Virtual(e)) => build_iterator(e, catalog),
        _ => Err(RdbError::TypeMismatch("expected a TABLE".into())),
    }
}

/// Builds the pull iterator for a relational expression (spec §4.K).
/// Argument-shape convention for each operator (no parser exists to
/// enforce a surface syntax, spec §1 Non-goals):
/// - `where(T, cond)`, `project(T, Var(a)...)`, `remove(T, Var(a)...)`
/// - `rename(T)` with `named: [(Var(old), new)...]`
/// - `extend(T)` with `named: [(expr, name)...]`
/// - `union/minus/semiminus/intersect/semijoin/join(A, B)`
/// - `divide(A, B, Var(quotient_attr)...)`
/// - `summarize(summand, per)` with `named: [(Sum(e)|Count|...., name)...]`
/// - `group(T, Var(a)...)` with `named: [(_, into)]`
/// - `ungroup(T, Var(from))`, `tclose(T, Var(from), Var(to))`
/// - `wrap(T, Var(a)...)` with `named: [(_, into)]`, `unwrap(T, Var(from))`
pub fn build_iterator(expr: &Expr, catalog: &Rc<dyn Catalog>) -> Result<Box<dyn TupleIter>> {
    match expr {
        Expr::TableRef(name) => {
            let table = catalog.table(name)?;
            let attrs = table_attrs(catalog, name)?;
            Ok(Box::new(StoredScan::new(table, attrs)))
        }
        Expr::Var(name) => build_iterator(&Expr::table_ref(name.clone()), catalog),
        Expr::Op { op, args, named, .. } => match op {
            Op::Where => build_where(expr, args, catalog),
            Op::Project => {
                let child = build_iterator(&args[0], catalog)?;
                let attrs: Vec<String> = args[1..].iter().map(var_name).collect::<Result<_>>()?;
                Ok(Box::new(ProjectIter::new(child, attrs, true)))
            }
            Op::Remove => {
                // Normalized into PROJECT-over-complement by the
                // transformer (spec §4.I rule 15); if seen here
                // directly the complement is computed from the child's
                // declared type.
                let child_ty = table_ref_type(&args[0], catalog)?;
                let removed: Vec<String> = args[1..].iter().map(var_name).collect::<Result<_>>()?;
                let kept: Vec<String> = child_ty
                    .attr_names()
                    .filter(|a| !removed.iter().any(|r| r.as_str() == *a))
                    .map(String::from)
                    .collect();
                let child = build_iterator(&args[0], catalog)?;
                Ok(Box::new(ProjectIter::new(child, kept, true)))
            }
            Op::Rename => {
                let child = build_iterator(&args[0], catalog)?;
                let pairs = named
                    .iter()
                    .map(|n| Ok((var_name(&n.expr)?, n.name.clone())))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(RenameIter::new(child, pairs)))
            }
            Op::Extend => {
                let child = build_iterator(&args[0], catalog)?;
                let added = named.iter().map(|n| (n.name.clone(), n.expr.clone())).collect();
                Ok(Box::new(ExtendIter::new(child, added)))
            }
            Op::Union => {
                let a = build_iterator(&args[0], catalog)?;
                let b = build_iterator(&args[1], catalog)?;
                Ok(Box::new(UnionIter::new(a, b)))
            }
            Op::Minus | Op::Semiminus | Op::Intersect | Op::Semijoin => {
                let keep = if matches!(op, Op::Minus | Op::Semiminus) {
                    Keep::OnNoMatch
                } else {
                    Keep::OnMatch
                };
                let outer = build_iterator(&args[0], catalog)?;
                let (b_expr, catalog_b) = (args[1].clone(), Rc::clone(catalog));
                let make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>> =
                    Box::new(move |_outer_tuple| build_iterator(&b_expr, &catalog_b));
                Ok(Box::new(MembershipIter::new(outer, make_inner, keep)))
            }
            Op::Join => {
                let outer = build_iterator(&args[0], catalog)?;
                let (b_expr, catalog_b) = (args[1].clone(), Rc::clone(catalog));
                let make_inner: Box<dyn Fn(&Tuple) -> Result<Box<dyn TupleIter>>> =
                    Box::new(move |_outer_tuple| build_iterator(&b_expr, &catalog_b));
                Ok(Box::new(JoinIter::new(outer, make_inner)))
            }
            Op::Divide => {
                let a = build_iterator(&args[0], catalog)?;
                let b = build_iterator(&args[1], catalog)?;
                let quotient_attrs: Vec<String> =
                    args[2..].iter().map(var_name).collect::<Result<_>>()?;
                Ok(Box::new(DivideIter::new(a, b, quotient_attrs)?))
            }
            Op::Summarize => {
                let summand = build_iterator(&args[0], catalog)?;
                let mut per_iter = build_iterator(&args[1], catalog)?;
                let mut per_rows = Vec::new();
                loop {
                    match per_iter.next() {
                        Ok(t) => per_rows.push(t),
                        Err(RdbError::NotFound) => break,
                        Err(e) => return Err(e),
                    }
                }
                let per_attrs: Vec<String> =
                    per_rows.first().map(|t| t.keys().cloned().collect()).unwrap_or_default();
                let aggs = named
                    .iter()
                    .map(|n| Ok((n.name.clone(), agg_spec_of(&n.expr)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(SummarizeIter::new(summand, per_rows, per_attrs, aggs)?))
            }
            Op::Group => {
                let child = build_iterator(&args[0], catalog)?;
                let grouped: Vec<String> = args[1..].iter().map(var_name).collect::<Result<_>>()?;
                let into = named.first().map(|n| n.name.clone()).unwrap_or_default();
                Ok(Box::new(GroupIter::new(child, grouped, into)?))
            }
            Op::Ungroup => {
                let child = build_iterator(&args[0], catalog)?;
                Ok(Box::new(UngroupIter::new(child, var_name(&args[1])?)))
            }
            Op::Tclose => {
                let child = build_iterator(&args[0], catalog)?;
                Ok(Box::new(TcloseIter::new(
                    child,
                    var_name(&args[1])?,
                    var_name(&args[2])?,
                )?))
            }
            Op::Wrap => {
                let child = build_iterator(&args[0], catalog)?;
                let wrapped: Vec<String> = args[1..].iter().map(var_name).collect::<Result<_>>()?;
                let into = named.first().map(|n| n.name.clone()).unwrap_or_default();
                Ok(Box::new(WrapIter::new(child, wrapped, into)))
            }
            Op::Unwrap => {
                let child = build_iterator(&args[0], catalog)?;
                Ok(Box::new(UnwrapIter::new(child, var_name(&args[1])?)))
            }
            _ => Err(RdbError::InvalidArgument(format!(
                "{op:?} does not produce a relation"
            ))),
        },
        Expr::Object(_) => Err(RdbError::TypeMismatch("expected a TABLE expression".into())),
    }
}

fn agg_spec_of(e: &Expr) -> Result<AggSpec> {
    match e {
        Expr::Op { op: Op::Count, .. } => Ok(AggSpec::Count),
        Expr::Op { op: Op::Sum, args, .. } => Ok(AggSpec::Sum(args[0].clone())),
        Expr::Op { op: Op::Avg, args, .. } => Ok(AggSpec::Avg(args[0].clone())),
        Expr::Op { op: Op::Min, args, .. } => Ok(AggSpec::Min(args[0].clone())),
        Expr::Op { op: Op::Max, args, .. } => Ok(AggSpec::Max(args[0].clone())),
        Expr::Op { op: Op::All, args, .. } => Ok(AggSpec::All(args[0].clone())),
        Expr::Op { op: Op::Any, args, .. } => Ok(AggSpec::Any(args[0].clone())),
        _ => Err(RdbError::InvalidArgument("not an aggregate expression".into())),
    }
}

fn table_ref_type(e: &Expr, catalog: &Rc<dyn Catalog>) -> Result<crate::object::TupleType> {
    match e {
        Expr::TableRef(name) | Expr::Var(name) => catalog.table_type(name),
        _ => Err(RdbError::NotSupported(
            "type inference is only implemented for direct table references".into(),
        )),
    }
}

fn build_where(expr: &Expr, args: &[Expr], catalog: &Rc<dyn Catalog>) -> Result<Box<dyn TupleIter>> {
    if let Some(sel) = expr.index_selection() {
        if let Expr::TableRef(name) = &args[0] {
            let table = catalog.table(name)?;
            let attrs = table_attrs(catalog, name)?;
            let index_no = {
                let t = table.borrow();
                let idxs = t.indexes();
                match &sel.index_name {
                    Some(n) => idxs
                        .iter()
                        .position(|i| &i.name == n)
                        .ok_or_else(|| RdbError::Internal("index named by optimizer not found".into()))?,
                    None => {
                        return Err(RdbError::Internal("index selection missing an index name".into()))
                    }
                }
            };
            return Ok(Box::new(IndexProbe::new(table, index_no, attrs, sel)));
        }
    }
    let child = build_iterator(&args[0], catalog)?;
    Ok(Box::new(WhereIter::new(child, args[1].clone())))
}

/// Converts a tuple's attribute list into sort seq-items (spec §4.F
/// "table-to-array ... optionally sorted by a list of (attr, asc)
/// items").
pub fn seq_items(pairs: &[(String, bool)]) -> Vec<SeqItem> {
    pairs
        .iter()
        .map(|(attr, asc)| SeqItem {
            attr: attr.clone(),
            asc: *asc,
        })
        .collect()
}

/// Realizes a `TABLE` into an `ARRAY` of tuples, optionally sorted and
/// bounded (spec §4.F "table-to-array conversion").
pub fn table_to_array(
    table: &Object,
    seq: Vec<SeqItem>,
    limit: Option<usize>,
    catalog: &Rc<dyn Catalog>,
) -> Result<Object> {
    let it = open(table, catalog)?;
    let mut sorted = SorterIter::new(it, seq, limit)?;
    let mut rows = Vec::new();
    loop {
        match sorted.next() {
            Ok(t) => rows.push(Object::Tuple(t)),
            Err(RdbError::NotFound) => break,
            Err(e) => return Err(e),
        }
    }
    let len = rows.len();
    Ok(Object::Array(rows, Some(len)))
}
