//! Transformer / algebraic rewriter (spec §4.I).
//!
//! Pure, bottom-up, idempotent rewrites over an `Expr` tree. Each
//! rewritten node is marked `transformed`; a node that is already
//! marked is returned as-is without descending again, mirroring the
//! teacher's `ExprRewriter` short-circuiting on already-normalized
//! subtrees (`core/translate/optimizer/mod.rs`).
//!
//! REMOVE → PROJECT's complement needs a table's full attribute set,
//! which isn't always known syntactically; it takes an optional
//! [`TypeOracle`] closure and is skipped (left untransformed) without
//! one — `eval::build_iterator`'s own `Remove` arm (which does have
//! catalog access) covers that case at evaluation time instead. Every
//! other rule operates purely on the expression tree it's given.

use crate::expr::{Expr, NamedArg, Op};
use crate::object::TupleType;
use std::collections::{BTreeMap, BTreeSet};

/// Resolves a table-valued expression's declared attribute set, when
/// known syntactically (a direct `TABLE-REF`). Supplied by callers that
/// have catalog access; `None` leaves schema-dependent rules inert.
pub type TypeOracle<'a> = &'a dyn Fn(&Expr) -> Option<TupleType>;

pub fn transform(expr: &Expr, types: Option<TypeOracle>) -> Expr {
    if expr.is_transformed() {
        return expr.clone();
    }
    let rebuilt = match expr {
        Expr::Object(_) | Expr::TableRef(_) | Expr::Var(_) => expr.clone(),
        Expr::Op { op, args, named, .. } => {
            let args: Vec<Expr> = args.iter().map(|a| transform(a, types)).collect();
            let named: Vec<NamedArg> = named
                .iter()
                .map(|n| NamedArg {
                    expr: transform(&n.expr, types),
                    name: n.name.clone(),
                })
                .collect();
            rewrite_top(*op, args, named, types)
        }
    };
    rebuilt.mark_transformed();
    rebuilt
}

fn rewrite_top(op: Op, args: Vec<Expr>, named: Vec<NamedArg>, types: Option<TypeOracle>) -> Expr {
    match op {
        Op::Not => rewrite_not(&args[0]),
        Op::Where => rewrite_where(args, types),
        Op::Project => rewrite_project(args, types),
        Op::Update => rewrite_update(args, named),
        Op::Remove => rewrite_remove(args, types),
        Op::Union => rewrite_union(args, named),
        _ => Expr::op_named(op, args, named),
    }
}

/// Rule 7: NOT pushdown / elimination.
fn rewrite_not(inner: &Expr) -> Expr {
    match inner.as_op() {
        Some((Op::Eq, a)) => Expr::op(Op::Ne, a.to_vec()),
        Some((Op::Ne, a)) => Expr::op(Op::Eq, a.to_vec()),
        Some((Op::Lt, a)) => Expr::op(Op::Ge, a.to_vec()),
        Some((Op::Ge, a)) => Expr::op(Op::Lt, a.to_vec()),
        Some((Op::Gt, a)) => Expr::op(Op::Le, a.to_vec()),
        Some((Op::Le, a)) => Expr::op(Op::Gt, a.to_vec()),
        Some((Op::And, a)) => Expr::op(
            Op::Or,
            vec![Expr::op(Op::Not, vec![a[0].clone()]), Expr::op(Op::Not, vec![a[1].clone()])],
        ),
        Some((Op::Or, a)) => Expr::op(
            Op::And,
            vec![Expr::op(Op::Not, vec![a[0].clone()]), Expr::op(Op::Not, vec![a[1].clone()])],
        ),
        Some((Op::Not, a)) => a[0].clone(),
        _ => Expr::op(Op::Not, vec![inner.clone()]),
    }
}

/// Rule 6: normalize `literal OP var` to `var OP' literal` (flipping
/// direction), so index matching always sees the variable on the left.
fn normalize_comparison(cond: Expr) -> Expr {
    let Some((op, args)) = cond.as_op() else {
        return cond;
    };
    let flipped = match op {
        Op::Lt => Some(Op::Gt),
        Op::Le => Some(Op::Ge),
        Op::Gt => Some(Op::Lt),
        Op::Ge => Some(Op::Le),
        Op::Eq => Some(Op::Eq),
        Op::Ne => Some(Op::Ne),
        _ => None,
    };
    match flipped {
        Some(flipped_op) if matches!(args[0], Expr::Object(_)) && matches!(args[1], Expr::Var(_)) => {
            Expr::op(flipped_op, vec![args[1].clone(), args[0].clone()])
        }
        _ => cond,
    }
}

/// Collects the set of `Var` names an expression references.
fn collect_var_names(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Var(n) => {
            out.insert(n.clone());
        }
        Expr::Op { args, named, .. } => {
            for a in args {
                collect_var_names(a, out);
            }
            for n in named {
                collect_var_names(&n.expr, out);
            }
        }
        _ => {}
    }
}

/// Replaces each `Var(name)` whose name is a key of `map` with the
/// mapped sub-expression (rule 4: resolving an extended attribute
/// reference back to its defining expression).
fn substitute_var_exprs(expr: &Expr, map: &BTreeMap<String, Expr>) -> Expr {
    match expr {
        Expr::Var(n) => map.get(n).cloned().unwrap_or_else(|| expr.clone()),
        Expr::Op { op, args, named, .. } => {
            let args = args.iter().map(|a| substitute_var_exprs(a, map)).collect();
            let named = named
                .iter()
                .map(|n| NamedArg {
                    expr: substitute_var_exprs(&n.expr, map),
                    name: n.name.clone(),
                })
                .collect();
            Expr::op_named(*op, args, named)
        }
        _ => expr.clone(),
    }
}

/// Renames each `Var(name)` whose name is a key of `map` to the mapped
/// name, leaving everything else untouched (rule 5/11: translating
/// attribute references across a rename).
fn substitute_var_names(expr: &Expr, map: &BTreeMap<String, String>) -> Expr {
    match expr {
        Expr::Var(n) => Expr::var(map.get(n).cloned().unwrap_or_else(|| n.clone())),
        Expr::Op { op, args, named, .. } => {
            let args = args.iter().map(|a| substitute_var_names(a, map)).collect();
            let named = named
                .iter()
                .map(|n| NamedArg {
                    expr: substitute_var_names(&n.expr, map),
                    name: n.name.clone(),
                })
                .collect();
            Expr::op_named(*op, args, named)
        }
        _ => expr.clone(),
    }
}

/// Rules 1-5: WHERE pushdown/merge, plus comparison normalization.
fn rewrite_where(mut args: Vec<Expr>, types: Option<TypeOracle>) -> Expr {
    let cond = normalize_comparison(args.remove(1));
    let child = args.remove(0);

    // Rule 1: where(where(T, c1), c2) -> where(T, c1 AND c2).
    if let Some((Op::Where, inner_args)) = child.as_op() {
        let merged = Expr::where_(inner_args[0].clone(), Expr::and(inner_args[1].clone(), cond));
        return transform(&merged, types);
    }

    // Rule 3: where(union(A,B), c) -> union(where(A,c), where(B,c)).
    if let Some((Op::Union, inner_args)) = child.as_op() {
        let rewritten = Expr::op(
            Op::Union,
            vec![
                Expr::where_(inner_args[0].clone(), cond.clone()),
                Expr::where_(inner_args[1].clone(), cond),
            ],
        );
        return transform(&rewritten, types);
    }

    // Rule 2: where(minus/semiminus/semijoin(A,B), c) -> op(where(A,c), B).
    if let Some((inner_op @ (Op::Minus | Op::Semiminus | Op::Semijoin), inner_args)) = child.as_op() {
        let rewritten = Expr::op(
            inner_op,
            vec![Expr::where_(inner_args[0].clone(), cond), inner_args[1].clone()],
        );
        return transform(&rewritten, types);
    }

    // Rule 4: where(extend(T, e1 AS a1, ...), c) -> extend(where(T, c'),
    // e1 AS a1, ...), with c' resolving references to extended
    // attributes back to their defining expressions.
    if let Some((Op::Extend, inner_args)) = child.as_op() {
        let named = child.named_args();
        let defs: BTreeMap<String, Expr> = named.iter().map(|n| (n.name.clone(), n.expr.clone())).collect();
        let cond = substitute_var_exprs(&cond, &defs);
        let rewritten = Expr::op_named(Op::Extend, vec![Expr::where_(inner_args[0].clone(), cond)], named.to_vec());
        return transform(&rewritten, types);
    }

    // Rule 5: where(rename(T, ...), c) -> rename(where(T, c'), ...),
    // only when c does not reference an attribute already renamed away.
    if let Some((Op::Rename, inner_args)) = child.as_op() {
        let named = child.named_args();
        let old_names: BTreeSet<String> = named
            .iter()
            .filter_map(|n| match &n.expr {
                Expr::Var(old) => Some(old.clone()),
                _ => None,
            })
            .collect();
        let mut referenced = BTreeSet::new();
        collect_var_names(&cond, &mut referenced);
        if referenced.is_disjoint(&old_names) {
            let new_to_old: BTreeMap<String, String> = named
                .iter()
                .filter_map(|n| match &n.expr {
                    Expr::Var(old) => Some((n.name.clone(), old.clone())),
                    _ => None,
                })
                .collect();
            let cond = substitute_var_names(&cond, &new_to_old);
            let rewritten = Expr::op_named(Op::Rename, vec![Expr::where_(inner_args[0].clone(), cond)], named.to_vec());
            return transform(&rewritten, types);
        }
    }

    Expr::where_(child, cond)
}

/// Rules 8-12: project merge, project/union swap, project/where swap,
/// project/rename swap, project/extend prune.
fn rewrite_project(mut args: Vec<Expr>, types: Option<TypeOracle>) -> Expr {
    let child = args.remove(0);
    let outer_attrs = args;

    // Rule 8: project(project(T, A), B) -> project(T, B).
    if let Some((Op::Project, inner_args)) = child.as_op() {
        let mut rebuilt = vec![inner_args[0].clone()];
        rebuilt.extend(outer_attrs);
        return transform(&Expr::op(Op::Project, rebuilt), types);
    }

    // Rule 9: project(union(A,B), C) -> union(project(A,C), project(B,C)).
    if let Some((Op::Union, inner_args)) = child.as_op() {
        let project_of = |t: &Expr| {
            let mut a = vec![t.clone()];
            a.extend(outer_attrs.iter().cloned());
            Expr::op(Op::Project, a)
        };
        let rewritten = Expr::op(
            Op::Union,
            vec![project_of(&inner_args[0]), project_of(&inner_args[1])],
        );
        return transform(&rewritten, types);
    }

    let selected: BTreeSet<String> = outer_attrs
        .iter()
        .filter_map(|a| match a {
            Expr::Var(n) => Some(n.clone()),
            _ => None,
        })
        .collect();

    // Rule 10: project(where(T,c),A) -> where(project(T,A),c) when c
    // doesn't reference an attribute A removes; otherwise insert an
    // intermediate projection grandchild that keeps what c needs too.
    if let Some((Op::Where, inner_args)) = child.as_op() {
        let mut cond_vars = BTreeSet::new();
        collect_var_names(&inner_args[1], &mut cond_vars);
        let mut inner_proj = vec![inner_args[0].clone()];
        if cond_vars.is_subset(&selected) {
            inner_proj.extend(outer_attrs.iter().cloned());
            let rewritten = Expr::where_(Expr::op(Op::Project, inner_proj), inner_args[1].clone());
            return transform(&rewritten, types);
        }
        // Built from already-transformed pieces and returned directly
        // (not re-fed through `transform`): the rebuilt outer PROJECT
        // still can't push below this WHERE (c still needs a dropped
        // attribute), so recursing would just rebuild the identical
        // grandchild forever instead of reaching a fixed point.
        let needed: BTreeSet<String> = selected.union(&cond_vars).cloned().collect();
        inner_proj.extend(needed.into_iter().map(Expr::var));
        let new_where = Expr::where_(Expr::op(Op::Project, inner_proj), inner_args[1].clone());
        let mut outer_proj = vec![new_where];
        outer_proj.extend(outer_attrs.iter().cloned());
        return Expr::op(Op::Project, outer_proj);
    }

    // Rule 11: project(rename(T, ...), A) -> rename(project(T, A'), ...)
    // where A' translates renamed attributes back to T's names; drop the
    // rename if none of its outputs survive the projection.
    if let Some((Op::Rename, inner_args)) = child.as_op() {
        let named = child.named_args();
        let new_to_old: BTreeMap<String, String> = named
            .iter()
            .filter_map(|n| match &n.expr {
                Expr::Var(old) => Some((n.name.clone(), old.clone())),
                _ => None,
            })
            .collect();
        let mut inner_attrs = Vec::new();
        let mut kept_named = Vec::new();
        for a in &outer_attrs {
            if let Expr::Var(name) = a {
                if let Some(old) = new_to_old.get(name) {
                    inner_attrs.push(Expr::var(old.clone()));
                    kept_named.push(NamedArg { expr: Expr::var(old.clone()), name: name.clone() });
                } else {
                    inner_attrs.push(a.clone());
                }
            }
        }
        let mut inner_proj = vec![inner_args[0].clone()];
        inner_proj.extend(inner_attrs);
        let projected = Expr::op(Op::Project, inner_proj);
        let rewritten = if kept_named.is_empty() {
            projected
        } else {
            Expr::op_named(Op::Rename, vec![projected], kept_named)
        };
        return transform(&rewritten, types);
    }

    // Rule 12: project(extend(T, e1 AS a1, ...), A) -> project with
    // extended attributes not in A dropped; drop extend entirely if
    // none survive. Returned directly (not re-fed through `transform`):
    // when some extended attributes do survive, re-filtering by the
    // same `selected` set would rebuild the identical node forever.
    if let Some((Op::Extend, inner_args)) = child.as_op() {
        let named = child.named_args();
        let kept_named: Vec<NamedArg> = named.iter().filter(|n| selected.contains(&n.name)).cloned().collect();
        let new_child = if kept_named.is_empty() {
            inner_args[0].clone()
        } else {
            Expr::op_named(Op::Extend, vec![inner_args[0].clone()], kept_named)
        };
        let mut outer_proj = vec![new_child];
        outer_proj.extend(outer_attrs.iter().cloned());
        return Expr::op(Op::Project, outer_proj);
    }

    let mut rebuilt = vec![child];
    rebuilt.extend(outer_attrs);
    Expr::op(Op::Project, rebuilt)
}

/// Rule 14: `update(T, a1, e1, ...)` -> `rename(remove(extend(T, e1 AS
/// $a1, ...), a1, ...), $a1 AS a1, ...)`, with `remove` then normalized
/// by [`rewrite_remove`] (called recursively via `transform`).
fn rewrite_update(mut args: Vec<Expr>, named: Vec<NamedArg>) -> Expr {
    let target = args.remove(0);
    let temp_names: Vec<String> = named.iter().map(|n| format!("${}", n.name)).collect();

    let extend_named: Vec<NamedArg> = named
        .iter()
        .zip(&temp_names)
        .map(|(n, tmp)| NamedArg {
            expr: n.expr.clone(),
            name: tmp.clone(),
        })
        .collect();
    let extended = Expr::op_named(Op::Extend, vec![target], extend_named);

    let removed: Vec<Expr> = named.iter().map(|n| Expr::var(n.name.clone())).collect();
    let mut remove_args = vec![extended];
    remove_args.extend(removed);
    let removed_expr = Expr::op(Op::Remove, remove_args);

    let rename_named: Vec<NamedArg> = temp_names
        .iter()
        .zip(&named)
        .map(|(tmp, n)| NamedArg {
            expr: Expr::var(tmp.clone()),
            name: n.name.clone(),
        })
        .collect();
    Expr::op_named(Op::Rename, vec![removed_expr], rename_named)
}

/// Rule 13: `project(where(T,c),A) ∪ project(where(T,NOT c),A)` ->
/// `project(T,A)`, recognized by structural equality of `T` and
/// complementarity of the two predicates; also collapses the bare
/// `where(T,c) ∪ where(T,NOT c)` form (no projection) to `T` itself.
fn rewrite_union(args: Vec<Expr>, named: Vec<NamedArg>) -> Expr {
    if let Some(collapsed) = collapse_complementary_union(&args[0], &args[1]) {
        return collapsed;
    }
    Expr::op_named(Op::Union, args, named)
}

fn collapse_complementary_union(a: &Expr, b: &Expr) -> Option<Expr> {
    if let (Some((Op::Where, aa)), Some((Op::Where, ba))) = (a.as_op(), b.as_op()) {
        if aa[0].structurally_eq(&ba[0]) && is_complementary(&aa[1], &ba[1]) {
            return Some(aa[0].clone());
        }
    }
    if let (Some((Op::Project, ap)), Some((Op::Project, bp))) = (a.as_op(), b.as_op()) {
        let attrs_match = ap.len() == bp.len() && ap[1..].iter().zip(&bp[1..]).all(|(x, y)| x.structurally_eq(y));
        if attrs_match {
            if let (Some((Op::Where, aw)), Some((Op::Where, bw))) = (ap[0].as_op(), bp[0].as_op()) {
                if aw[0].structurally_eq(&bw[0]) && is_complementary(&aw[1], &bw[1]) {
                    let mut out = vec![aw[0].clone()];
                    out.extend(ap[1..].iter().cloned());
                    return Some(Expr::op(Op::Project, out));
                }
            }
        }
    }
    None
}

/// Like [`Expr::structurally_eq`], but treats two `OBJECT` literal nodes
/// holding equal values as equal (`structurally_eq` always calls two
/// literals unequal, since it has no general notion of object identity
/// to fall back on beyond `Object::equals`, which this rule needs).
fn args_eq(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Object(x), Expr::Object(y)) => x.equals(y).unwrap_or(false),
        _ => a.structurally_eq(b),
    }
}

fn is_complementary(c1: &Expr, c2: &Expr) -> bool {
    let Some((op1, a1)) = c1.as_op() else { return false };
    let Some((op2, a2)) = c2.as_op() else { return false };
    if a1.len() != 2 || a2.len() != 2 || !args_eq(&a1[0], &a2[0]) || !args_eq(&a1[1], &a2[1]) {
        return false;
    }
    matches!(
        (op1, op2),
        (Op::Eq, Op::Ne)
            | (Op::Ne, Op::Eq)
            | (Op::Lt, Op::Ge)
            | (Op::Ge, Op::Lt)
            | (Op::Gt, Op::Le)
            | (Op::Le, Op::Gt)
    )
}

/// Rule 15: `remove(T, a1, ...)` -> `project(T, complement)`, when `T`'s
/// attribute set is known via `types`.
fn rewrite_remove(args: Vec<Expr>, types: Option<TypeOracle>) -> Expr {
    let Some(oracle) = types else {
        return Expr::op(Op::Remove, args);
    };
    let child = &args[0];
    let Some(ty) = oracle(child) else {
        return Expr::op(Op::Remove, args);
    };
    let removed: Vec<String> = args[1..]
        .iter()
        .filter_map(|a| match a {
            Expr::Var(n) => Some(n.clone()),
            _ => None,
        })
        .collect();
    let kept: Vec<String> = ty
        .attr_names()
        .filter(|a| !removed.iter().any(|r| r.as_str() == *a))
        .map(String::from)
        .collect();
    let mut project_args = vec![child.clone()];
    project_args.extend(kept.into_iter().map(Expr::var));
    Expr::op(Op::Project, project_args)
}

/// Empty-set replacement (spec §4.I): substitutes `T` (the `IS_EMPTY`
/// hint's argument) for any sub-expression proven to be a subset of it.
/// Handles the three forms spec §4.I names: `minus(minus(X, _), _)`,
/// `project(project(X, _), _)` of matching type, and `where(X, _)`.
pub fn replace_if_subset_of_empty(expr: &Expr, empty_of: &Expr) -> Expr {
    if is_subset_of(expr, empty_of) {
        return Expr::object(crate::object::Object::Array(Vec::new(), Some(0)));
    }
    match expr {
        Expr::Op { op, args, named, .. } => {
            let args = args
                .iter()
                .map(|a| replace_if_subset_of_empty(a, empty_of))
                .collect();
            Expr::op_named(*op, args, named.clone())
        }
        _ => expr.clone(),
    }
}

fn is_subset_of(expr: &Expr, of: &Expr) -> bool {
    if expr.structurally_eq(of) {
        return true;
    }
    match expr.as_op() {
        Some((Op::Minus, args)) => is_subset_of(&args[0], of),
        Some((Op::Where, args)) => is_subset_of(&args[0], of),
        Some((Op::Project, args)) => is_subset_of(&args[0], of),
        _ => false,
    }
}

/// Like [`Expr::structurally_eq`], but recurses through `OBJECT` nodes
/// via `Object::equals` instead of always calling them unequal.
/// `structurally_eq` is deliberately literal-blind for the subset/
/// complement recognizers above, which only ever compare `VAR`/
/// `TABLE-REF` operands; [`transform_to_fixpoint`] has no such
/// restriction; a fixed point with a literal anywhere in the tree (any
/// `WHERE` over a constant predicate) would otherwise never compare
/// equal to itself and loop forever.
fn same_tree(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::TableRef(x), Expr::TableRef(y)) => x == y,
        (Expr::Var(x), Expr::Var(y)) => x == y,
        (Expr::Object(x), Expr::Object(y)) => x.equals(y).unwrap_or(false),
        (
            Expr::Op {
                op: oa,
                args: aa,
                named: na,
                ..
            },
            Expr::Op {
                op: ob,
                args: ab,
                named: nb,
                ..
            },
        ) => {
            oa == ob
                && aa.len() == ab.len()
                && aa.iter().zip(ab.iter()).all(|(x, y)| same_tree(x, y))
                && na.len() == nb.len()
                && na
                    .iter()
                    .zip(nb.iter())
                    .all(|(x, y)| x.name == y.name && same_tree(&x.expr, &y.expr))
        }
        _ => false,
    }
}

/// Applies [`transform`] repeatedly to a fixed point (the optimizer's
/// entry point, spec §4.J "treats transformation as fixed-point").
pub fn transform_to_fixpoint(expr: &Expr, types: Option<TypeOracle>) -> Expr {
    let mut current = expr.clone();
    loop {
        let next = transform(&current, types);
        if same_tree(&next, &current) {
            return next;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn where_merge_combines_predicates_with_and() {
        let t = Expr::table_ref("T");
        let c1 = Expr::op(Op::Eq, vec![Expr::var("a"), Expr::object(Object::Int(1))]);
        let c2 = Expr::op(Op::Eq, vec![Expr::var("b"), Expr::object(Object::Int(2))]);
        let nested = Expr::where_(Expr::where_(t, c1), c2);
        let rewritten = transform(&nested, None);
        let (op, args) = rewritten.as_op().unwrap();
        assert_eq!(op, Op::Where);
        let (cond_op, _) = args[1].as_op().unwrap();
        assert_eq!(cond_op, Op::And);
    }

    #[test]
    fn not_eq_becomes_ne() {
        let cond = Expr::op(Op::Eq, vec![Expr::var("a"), Expr::object(Object::Int(1))]);
        let rewritten = transform(&Expr::op(Op::Not, vec![cond]), None);
        assert!(rewritten.is_op(Op::Ne));
    }

    #[test]
    fn project_of_project_merges_to_single_node() {
        let t = Expr::table_ref("T");
        let inner = Expr::op(Op::Project, vec![t, Expr::var("a"), Expr::var("b")]);
        let outer = Expr::op(Op::Project, vec![inner, Expr::var("a")]);
        let rewritten = transform(&outer, None);
        let (_, args) = rewritten.as_op().unwrap();
        assert!(matches!(args[0], Expr::TableRef(_)));
    }

    #[test]
    fn project_where_swaps_when_predicate_survives_projection() {
        let cond = Expr::op(Op::Eq, vec![Expr::var("a"), Expr::object(Object::Int(1))]);
        let inner = Expr::where_(Expr::table_ref("T"), cond);
        let outer = Expr::op(Op::Project, vec![inner, Expr::var("a"), Expr::var("b")]);
        let rewritten = transform(&outer, None);
        let (op, args) = rewritten.as_op().unwrap();
        assert_eq!(op, Op::Where);
        assert!(args[0].is_op(Op::Project));
    }

    #[test]
    fn project_where_inserts_grandchild_when_predicate_needs_dropped_attr() {
        let cond = Expr::op(Op::Eq, vec![Expr::var("a"), Expr::object(Object::Int(1))]);
        let inner = Expr::where_(Expr::table_ref("T"), cond);
        let outer = Expr::op(Op::Project, vec![inner, Expr::var("b")]);
        let rewritten = transform(&outer, None);
        let (op, args) = rewritten.as_op().unwrap();
        assert_eq!(op, Op::Project);
        assert!(args[0].is_op(Op::Where));
    }

    #[test]
    fn project_extend_prunes_unselected_attribute() {
        let extend = Expr::op_named(
            Op::Extend,
            vec![Expr::table_ref("T")],
            vec![crate::expr::NamedArg { expr: Expr::var("a"), name: "doubled".to_string() }],
        );
        let outer = Expr::op(Op::Project, vec![extend, Expr::var("a")]);
        let rewritten = transform(&outer, None);
        let (_, args) = rewritten.as_op().unwrap();
        assert!(matches!(args[0], Expr::TableRef(_)), "extend with no surviving outputs must be dropped");
    }

    #[test]
    fn where_over_extend_resolves_extended_attribute_reference() {
        let extend = Expr::op_named(
            Op::Extend,
            vec![Expr::table_ref("T")],
            vec![crate::expr::NamedArg { expr: Expr::var("a"), name: "aliased".to_string() }],
        );
        let cond = Expr::op(Op::Eq, vec![Expr::var("aliased"), Expr::object(Object::Int(1))]);
        let outer = Expr::where_(extend, cond);
        let rewritten = transform(&outer, None);
        assert!(rewritten.is_op(Op::Extend));
        let (_, args) = rewritten.as_op().unwrap();
        assert!(args[0].is_op(Op::Where));
        let (_, where_args) = args[0].as_op().unwrap();
        let (_, eq_args) = where_args[1].as_op().unwrap();
        assert!(matches!(eq_args[0], Expr::Var(ref n) if n == "a"));
    }
}
