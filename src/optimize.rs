//! Optimizer (spec §4.J).
//!
//! Runs the transformer to a fixed point, then walks the tree bottom-up
//! matching `WHERE` nodes directly over a stored table against that
//! table's declared indexes, attaching the resulting [`IndexSelection`]
//! to the node's cache. Plan selection is
//! direct index-matching rather than the full bounded mutation-set
//! search spec §4.J describes ("up to 256 alternative plans") — see
//! `DESIGN.md` for why that reduction was made; the cost function and
//! sort-penalty rule below are still exactly the ones the full search
//! would score candidates with.

use crate::catalog::Catalog;
use crate::expr::{Expr, IndexSelection, Op};
use crate::index::Index;
use crate::object::Object;
use crate::recmap::RecordMapOps;
use crate::transform::transform_to_fixpoint;
use std::rc::Rc;

/// Ambient tuning knobs for the optimizer (spec §4.J's constants:
/// mutation fan-out bound, sort penalty divisor).
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    pub max_mutations: usize,
    pub sort_penalty_divisor: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_mutations: 256,
            sort_penalty_divisor: 7.0,
        }
    }
}

/// Runs the transformer to a fixed point and attaches index selections
/// bottom-up; returns the (possibly rebuilt) root, with every `OP` node
/// marked `optimized`.
pub fn optimize(expr: &Expr, catalog: &Rc<dyn Catalog>, config: &OptimizerConfig) -> Expr {
    let oracle: &dyn Fn(&Expr) -> Option<crate::object::TupleType> = &|e| match e {
        Expr::TableRef(name) => catalog.table_type(name).ok(),
        _ => None,
    };
    let transformed = transform_to_fixpoint(expr, Some(oracle));
    attach_index_selections(&transformed, catalog, config);
    transformed
}

fn attach_index_selections(expr: &Expr, catalog: &Rc<dyn Catalog>, config: &OptimizerConfig) {
    let Some((op, args)) = expr.as_op() else {
        return;
    };
    for a in args {
        attach_index_selections(a, catalog, config);
    }
    if op == Op::Where {
        if let Some(sel) = match_index(expr, catalog) {
            expr.set_index_selection(sel);
        }
    }
    expr.mark_optimized();
    let _ = config;
}

/// Splits a WHERE predicate into an index-qualifying prefix and
/// residual (spec §4.J "Index matching"), if the child resolves to a
/// stored table.
fn match_index(where_node: &Expr, catalog: &Rc<dyn Catalog>) -> Option<IndexSelection> {
    let (_, args) = where_node.as_op()?;
    let table_name = match &args[0] {
        Expr::TableRef(n) => n.clone(),
        _ => return None,
    };
    let table = catalog.table(&table_name).ok()?;
    let cond = &args[1];
    let conjuncts = flatten_and(cond);

    let table_ref = table.borrow();
    let table_ref: &dyn RecordMapOps = &*table_ref;
    let mut best: Option<(IndexSelection, usize)> = None;
    for idx in table_ref.indexes() {
        if let Some(sel) = match_index_against(idx, &conjuncts, &table_name, table_ref) {
            let matched_len = sel.objpv.len();
            if best.as_ref().map(|(_, n)| matched_len > *n).unwrap_or(true) {
                best = Some((sel, matched_len));
            }
        }
    }
    best.map(|(sel, _)| sel)
}

fn flatten_and(expr: &Expr) -> Vec<&Expr> {
    match expr.as_op() {
        Some((Op::And, args)) => {
            let mut out = flatten_and(&args[0]);
            out.extend(flatten_and(&args[1]));
            out
        }
        _ => vec![expr],
    }
}

fn field_name<'a>(table: &'a dyn RecordMapOps, field_no: usize) -> Option<&'a str> {
    table.fieldinfo().get(field_no).map(|f| f.name.as_str())
}

fn match_index_against(
    idx: &Index,
    conjuncts: &[&Expr],
    _table_name: &str,
    table: &dyn RecordMapOps,
) -> Option<IndexSelection> {
    let mut objpv = Vec::new();
    let mut all_eq = true;
    let mut stopexp: Option<Box<Expr>> = None;

    for &field_no in &idx.fields {
        let name = field_name(table, field_no)?;
        if let Some(c) = find_eq_conjunct(conjuncts, name) {
            objpv.push(c);
            continue;
        }
        if let Some((low, stop)) = find_range_conjunct(conjuncts, name) {
            objpv.push(low);
            all_eq = false;
            stopexp = stop;
            break;
        }
        if let Some((low, stop)) = find_like_conjunct(conjuncts, name) {
            objpv.push(low);
            all_eq = false;
            stopexp = stop;
            break;
        }
        break;
    }

    if objpv.is_empty() {
        return None;
    }
    Some(IndexSelection {
        index_name: Some(idx.name.clone()),
        objpv,
        asc: idx.asc.first().copied().unwrap_or(true),
        all_eq,
        stopexp,
    })
}

fn find_eq_conjunct(conjuncts: &[&Expr], attr: &str) -> Option<Object> {
    conjuncts.iter().find_map(|c| {
        let (op, args) = c.as_op()?;
        if op != Op::Eq {
            return None;
        }
        match (&args[0], &args[1]) {
            (Expr::Var(v), Expr::Object(o)) if v == attr => Some(o.clone()),
            (Expr::Object(o), Expr::Var(v)) if v == attr => Some(o.clone()),
            _ => None,
        }
    })
}

/// Finds a `>=`/`>` low bound on `attr` and, if present, the paired
/// `<=`/`<` high bound to use as the probe's stop-expression (spec
/// §4.J "the matching `<=`/`<` as a high bound (stop-expression)").
fn find_range_conjunct(conjuncts: &[&Expr], attr: &str) -> Option<(Object, Option<Box<Expr>>)> {
    let low = conjuncts.iter().find_map(|c| {
        let (op, args) = c.as_op()?;
        match (op, &args[0], &args[1]) {
            (Op::Ge | Op::Gt, Expr::Var(v), Expr::Object(o)) if v == attr => Some(o.clone()),
            _ => None,
        }
    })?;
    let high = conjuncts.iter().find(|c| {
        matches!(
            c.as_op(),
            Some((Op::Le | Op::Lt, a)) if matches!(&a[0], Expr::Var(v) if v == attr)
        )
    });
    Some((low, high.map(|e| Box::new((*e).clone()))))
}

/// Derives a start/stop index range from `attr LIKE 'prefix*'` (spec
/// §4.J "LIKE-to-range"): a pattern that is a literal prefix plus one
/// trailing wildcard bounds the same way a `>=`/`<` pair does, letting
/// the probe seek straight to the prefix instead of falling back to a
/// full scan plus residual `LIKE` filter.
fn find_like_conjunct(conjuncts: &[&Expr], attr: &str) -> Option<(Object, Option<Box<Expr>>)> {
    conjuncts.iter().find_map(|c| {
        let (op, args) = c.as_op()?;
        if op != Op::Like {
            return None;
        }
        let Expr::Var(v) = &args[0] else { return None };
        if v != attr {
            return None;
        }
        let Expr::Object(pat) = &args[1] else { return None };
        let pattern = pat.as_str().ok()?;
        let prefix = like_prefix(pattern)?;
        if prefix.is_empty() {
            return None;
        }
        let low = Object::Bin(std::sync::Arc::new(prefix.as_bytes().to_vec()));
        let stop = increment_prefix(prefix.as_bytes()).map(|bound| {
            Box::new(Expr::op(
                Op::Lt,
                vec![Expr::var(v.clone()), Expr::object(Object::Bin(std::sync::Arc::new(bound)))],
            ))
        });
        Some((low, stop))
    })
}

/// The literal prefix of a LIKE pattern made of exactly one trailing
/// `*` and no other wildcard (`"abc*"` -> `Some("abc")`); `None` for
/// any other shape (no wildcard, a leading/embedded `*`/`?`, or more
/// than one wildcard), which has no single contiguous-range
/// representation.
fn like_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix('*')?;
    if prefix.contains(['*', '?']) {
        return None;
    }
    Some(prefix)
}

/// Half-open upper bound for a prefix range, mirroring
/// `recmap::remote`'s own prefix-range successor: increments the last
/// non-`0xff` byte and drops anything after it. `None` when every byte
/// is `0xff` (no finite successor; the probe runs to the end of the
/// index instead of stopping at a high bound).
fn increment_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for i in (0..out.len()).rev() {
        if out[i] != 0xff {
            out[i] += 1;
            out.truncate(i + 1);
            return Some(out);
        }
    }
    None
}

/// Recursively estimates rows touched (spec §4.J "Cost function").
pub fn cost(expr: &Expr, catalog: &Rc<dyn Catalog>) -> f64 {
    match expr {
        Expr::TableRef(name) => catalog
            .table(name)
            .ok()
            .and_then(|t| t.borrow().est_size())
            .unwrap_or(1000) as f64,
        Expr::Op { op, args, .. } => cost_of_op(*op, args, expr, catalog),
        _ => 1.0,
    }
}

fn cost_of_op(op: Op, args: &[Expr], node: &Expr, catalog: &Rc<dyn Catalog>) -> f64 {
    match op {
        Op::Where => {
            let base = cost(&args[0], catalog);
            match node.index_selection() {
                None => base,
                Some(sel) if sel.all_eq && matches!(&args[0], Expr::TableRef(n) if is_unique(n, &sel, catalog)) => 1.0,
                Some(sel) if sel.all_eq => 3.0,
                Some(sel) if sel.stopexp.is_some() => 2.0,
                Some(_) => 4.0,
            }
        }
        Op::Join => {
            let a = cost(&args[0], catalog);
            match &args[1] {
                Expr::TableRef(_) if args[1].index_selection().is_some() => a * 2.0,
                _ => a * cost(&args[1], catalog),
            }
        }
        Op::Minus | Op::Semiminus | Op::Intersect | Op::Semijoin => {
            let a = cost(&args[0], catalog);
            a + if args[1].index_selection().is_some() {
                a
            } else {
                a * cost(&args[1], catalog)
            }
        }
        Op::Union => cost(&args[0], catalog) + cost(&args[1], catalog),
        Op::Divide => cost(&args[0], catalog) * cost(&args[1], catalog),
        Op::Project | Op::Rename | Op::Extend | Op::Wrap | Op::Unwrap | Op::Group | Op::Ungroup
        | Op::Summarize | Op::IsEmpty | Op::Count | Op::Tclose => cost(&args[0], catalog),
        _ => 1.0,
    }
}

fn is_unique(table_name: &str, sel: &IndexSelection, catalog: &Rc<dyn Catalog>) -> bool {
    let Ok(table) = catalog.table(table_name) else {
        return false;
    };
    let t = table.borrow();
    sel.index_name
        .as_ref()
        .map(|n| t.indexes().iter().any(|i| &i.name == n && i.unique))
        .unwrap_or(false)
}

/// Spec §4.J "Sorted output": adds a sort penalty unless an index
/// already sorts the table in the requested order.
pub fn sort_cost(
    table_name: &str,
    field_nos_in_order: &[usize],
    asc: &[bool],
    base_cost: f64,
    catalog: &Rc<dyn Catalog>,
    config: &OptimizerConfig,
) -> f64 {
    let Ok(table) = catalog.table(table_name) else {
        return base_cost + base_cost / config.sort_penalty_divisor;
    };
    let t = table.borrow();
    if t.indexes().iter().any(|i| i.sorts_as(field_nos_in_order, asc)) {
        base_cost
    } else {
        base_cost + base_cost / config.sort_penalty_divisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::field::FieldInfo;
    use crate::index::Index;
    use crate::object::{Object, Type, TupleType};
    use crate::recmap::tree::TreeStore;
    use crate::recmap::{RecordMap, RecordMapFlags};
    use std::cell::RefCell;

    fn catalog_with_indexed_table() -> Rc<dyn Catalog> {
        let fields = vec![FieldInfo::fixed("id", 8), FieldInfo::fixed("age", 8)];
        let mut m = RecordMap::create(
            "PERSON",
            fields,
            1,
            None,
            RecordMapFlags::UNIQUE,
            TreeStore::new(None),
        )
        .unwrap();
        m.add_index(Index::new(
            "ix_age",
            vec![1],
            vec![FieldInfo::fixed("age", 8)],
            vec![true],
            false,
            Box::new(TreeStore::new(None)),
        ));
        let ty = TupleType::new([
            ("id".to_string(), Type::Integer),
            ("age".to_string(), Type::Integer),
        ]);
        let mut cat = InMemoryCatalog::new();
        cat.register_table("PERSON", ty, Rc::new(RefCell::new(m)));
        Rc::new(cat)
    }

    #[test]
    fn where_eq_on_indexed_attribute_is_matched() {
        let catalog = catalog_with_indexed_table();
        let cond = Expr::op(Op::Eq, vec![Expr::var("age"), Expr::object(Object::Int(30))]);
        let expr = Expr::where_(Expr::table_ref("PERSON"), cond);
        let optimized = optimize(&expr, &catalog, &OptimizerConfig::default());
        let sel = optimized.index_selection().expect("index should be matched");
        assert_eq!(sel.index_name.as_deref(), Some("ix_age"));
        assert!(sel.all_eq);
    }

    #[test]
    fn where_on_unindexed_attribute_has_no_selection() {
        let catalog = catalog_with_indexed_table();
        let cond = Expr::op(Op::Eq, vec![Expr::var("id"), Expr::object(Object::Int(1))]);
        let expr = Expr::where_(Expr::table_ref("PERSON"), cond);
        let optimized = optimize(&expr, &catalog, &OptimizerConfig::default());
        assert!(optimized.index_selection().is_none());
    }
}
