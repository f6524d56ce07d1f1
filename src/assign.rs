//! Assignment engine (spec §4.L).
//!
//! Grounded on `original_source/duro/rel/assign.c`'s multi-target
//! `RDB_multi_assign` — one batch of inserts/updates/deletes/copies
//! resolved down to base-table operations, constraint-checked, and run
//! under a subtransaction when the batch has more than one effective
//! operation.

use crate::catalog::Catalog;
use crate::constraint;
use crate::error::{RdbError, Result};
use crate::eval;
use crate::expr::{Expr, NamedArg, Op};
use crate::field::FieldInfo;
use crate::iterator::Tuple;
use crate::object::{scalar_to_bytes, Object};
use crate::recmap::RecordMapOps;
use crate::txn::Txn;
use std::collections::HashSet;
use std::rc::Rc;

/// An insert into `target` (a stored table or a virtual-table chain
/// resolved recursively, spec §4.L step 3) of `tuple`.
pub struct InsertOp {
    pub target: Expr,
    pub tuple: Object,
}

/// An update over `target`, optionally restricted by `cond`, applying
/// `updates` (attribute name -> new-value expression, evaluated in the
/// scope of the matched tuple).
pub struct UpdateOp {
    pub target: Expr,
    pub cond: Option<Expr>,
    pub updates: Vec<(String, Expr)>,
}

pub struct DeleteOp {
    pub target: Expr,
    pub cond: Option<Expr>,
}

/// Copies every tuple of `src` into `dst` (spec §4.L "copies {dstp,
/// srcp}"). `dst` must already be a registered base table — allocating
/// a fresh destination table is outside this catalog's scope (spec §1
/// Non-goals: catalog persistence).
pub struct CopyOp {
    pub dst: Expr,
    pub src: Expr,
}

#[derive(Default)]
pub struct AssignRequest {
    pub inserts: Vec<InsertOp>,
    pub updates: Vec<UpdateOp>,
    pub deletes: Vec<DeleteOp>,
    pub copies: Vec<CopyOp>,
}

struct ResolvedInsert {
    table: String,
    tuple: Object,
}

struct ResolvedUpdate {
    table: String,
    cond: Option<Expr>,
    updates: Vec<(String, Expr)>,
}

struct ResolvedDelete {
    table: String,
    cond: Option<Expr>,
}

struct ResolvedCopy {
    dst: String,
    src: Expr,
}

/// Runs the 8-step assignment procedure (spec §4.L) over one batch.
pub fn assign(req: AssignRequest, catalog: &Rc<dyn Catalog>, txn: Option<&mut Txn>) -> Result<()> {
    let any_target = !req.inserts.is_empty()
        || !req.updates.is_empty()
        || !req.deletes.is_empty()
        || !req.copies.is_empty();
    if any_target && txn.is_none() {
        return Err(RdbError::NoRunningTx);
    }

    let resolved_inserts = req
        .inserts
        .iter()
        .map(|op| resolve_insert(&op.target, op.tuple.clone()))
        .collect::<Result<Vec<_>>>()?;
    for r in &resolved_inserts {
        typecheck_insert(&r.table, &r.tuple, catalog)?;
    }

    let resolved_updates = req
        .updates
        .iter()
        .map(|op| {
            let (table, cond) = resolve_mutation(&op.target, op.cond.clone())?;
            Ok(ResolvedUpdate {
                table,
                cond,
                updates: op.updates.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let resolved_deletes = req
        .deletes
        .iter()
        .map(|op| {
            let (table, cond) = resolve_mutation(&op.target, op.cond.clone())?;
            Ok(ResolvedDelete { table, cond })
        })
        .collect::<Result<Vec<_>>>()?;

    let resolved_copies = req
        .copies
        .iter()
        .map(|op| match &op.dst {
            Expr::TableRef(n) | Expr::Var(n) => Ok(ResolvedCopy {
                dst: n.clone(),
                src: op.src.clone(),
            }),
            _ => Err(RdbError::NotSupported(
                "copy destination must be a base table".into(),
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    reject_double_targeting(&resolved_inserts, &resolved_updates, &resolved_deletes, &resolved_copies)?;

    constraint::check_constraints(
        &resolved_inserts
            .iter()
            .map(|r| (r.table.as_str(), &r.tuple))
            .collect::<Vec<_>>(),
        &resolved_updates
            .iter()
            .map(|r| (r.table.as_str(), r.cond.as_ref(), r.updates.as_slice()))
            .collect::<Vec<_>>(),
        &resolved_deletes
            .iter()
            .map(|r| (r.table.as_str(), r.cond.as_ref()))
            .collect::<Vec<_>>(),
        &resolved_copies
            .iter()
            .map(|r| (r.dst.as_str(), &r.src))
            .collect::<Vec<_>>(),
        catalog,
    )?;

    let effective_ops =
        resolved_inserts.len() + resolved_updates.len() + resolved_deletes.len() + resolved_copies.len();
    let single_insert_multi_index = resolved_inserts.len() == 1
        && effective_ops == 1
        && catalog
            .table(&resolved_inserts[0].table)
            .map(|t| t.borrow().indexes().len() >= 2)
            .unwrap_or(false);
    let needs_subtx = effective_ops > 1 || single_insert_multi_index;

    // `txn` only gates the presence check above and names the subtransaction's
    // database; table mutations below always pass `None` since `RecordMapOps`
    // ignores its own `txn` argument on every backend this crate ships.
    let sub_db = match &txn {
        Some(t) => t.database().to_string(),
        None => "default".to_string(),
    };

    let outcome = execute(&resolved_inserts, &resolved_updates, &resolved_deletes, &resolved_copies, catalog);

    if needs_subtx {
        let sub = Txn::begin(sub_db, None)?;
        match outcome {
            Ok(()) => {
                sub.commit()?;
                Ok(())
            }
            Err(e) => {
                let _ = sub.rollback();
                Err(e)
            }
        }
    } else {
        outcome
    }
}

fn reject_double_targeting(
    inserts: &[ResolvedInsert],
    updates: &[ResolvedUpdate],
    deletes: &[ResolvedDelete],
    copies: &[ResolvedCopy],
) -> Result<()> {
    let mut seen = HashSet::new();
    let all_targets = inserts
        .iter()
        .map(|r| r.table.as_str())
        .chain(updates.iter().map(|r| r.table.as_str()))
        .chain(deletes.iter().map(|r| r.table.as_str()))
        .chain(copies.iter().map(|r| r.dst.as_str()));
    for t in all_targets {
        if !seen.insert(t) {
            return Err(RdbError::InvalidArgument(format!(
                "table {t} targeted more than once in one assignment"
            )));
        }
    }
    Ok(())
}

/// Rewrites every free `Var` in `expr` for which `f` returns a
/// replacement — used to invert RENAME and resolve EXTEND-introduced
/// names when pushing a condition down through a virtual target (spec
/// §4.L "condition rewritten via inverse-rename / resolve-extend-names").
fn rewrite_vars(expr: &Expr, f: &impl Fn(&str) -> Option<Expr>) -> Expr {
    match expr {
        Expr::Var(name) => f(name).unwrap_or_else(|| expr.clone()),
        Expr::Op { op, args, named, .. } => {
            let args = args.iter().map(|a| rewrite_vars(a, f)).collect();
            let named = named
                .iter()
                .map(|n| NamedArg {
                    expr: rewrite_vars(&n.expr, f),
                    name: n.name.clone(),
                })
                .collect();
            Expr::op_named(*op, args, named)
        }
        _ => expr.clone(),
    }
}

fn substitute_named(expr: &Expr, named: &[NamedArg]) -> Expr {
    rewrite_vars(expr, &|name| named.iter().find(|n| n.name == name).map(|n| n.expr.clone()))
}

/// Spec §4.L step 3, insert resolution.
fn resolve_insert(target: &Expr, tuple: Object) -> Result<ResolvedInsert> {
    match target {
        Expr::TableRef(name) | Expr::Var(name) => Ok(ResolvedInsert {
            table: name.clone(),
            tuple,
        }),
        Expr::Op { op, args, named, .. } => match op {
            Op::Where => {
                let t = tuple.as_tuple()?.clone();
                if !eval::eval_scalar_bool_on_tuple(&args[1], &t)? {
                    return Err(RdbError::predicate_violation("insert-where"));
                }
                resolve_insert(&args[0], tuple)
            }
            Op::Project => resolve_insert(&args[0], tuple),
            Op::Rename => {
                let t = tuple.as_tuple()?.clone();
                let mut translated = Tuple::new();
                for (k, v) in t.iter() {
                    match named.iter().find(|n| &n.name == k) {
                        Some(pair) => {
                            let old = match &pair.expr {
                                Expr::Var(n) => n.clone(),
                                _ => k.clone(),
                            };
                            translated.insert(old, v.clone());
                        }
                        None => {
                            translated.insert(k.clone(), v.clone());
                        }
                    }
                }
                resolve_insert(&args[0], Object::Tuple(translated))
            }
            Op::Extend => {
                let mut t = tuple.as_tuple()?.clone();
                for n in named {
                    t.remove(&n.name);
                }
                resolve_insert(&args[0], Object::Tuple(t))
            }
            Op::Wrap => {
                let into = named.first().map(|n| n.name.clone()).unwrap_or_default();
                let mut t = tuple.as_tuple()?.clone();
                if let Some(nested) = t.remove(&into) {
                    t.extend(nested.as_tuple()?.clone());
                }
                resolve_insert(&args[0], Object::Tuple(t))
            }
            _ => Err(RdbError::NotSupported(format!(
                "insert through {op:?} is not supported"
            ))),
        },
        _ => Err(RdbError::NotSupported(
            "insert target must be a table expression".into(),
        )),
    }
}

/// Spec §4.L step 3, update/delete resolution.
fn resolve_mutation(target: &Expr, cond: Option<Expr>) -> Result<(String, Option<Expr>)> {
    match target {
        Expr::TableRef(name) | Expr::Var(name) => Ok((name.clone(), cond)),
        Expr::Op { op, args, named, .. } => match op {
            Op::Where => {
                let c0 = args[1].clone();
                let merged = match cond {
                    Some(c) => Expr::and(c0, c),
                    None => c0,
                };
                resolve_mutation(&args[0], Some(merged))
            }
            Op::Project => resolve_mutation(&args[0], cond),
            Op::Rename => {
                let new_cond = cond.map(|c| substitute_named(&c, named));
                resolve_mutation(&args[0], new_cond)
            }
            Op::Extend => {
                let new_cond = cond.map(|c| substitute_named(&c, named));
                resolve_mutation(&args[0], new_cond)
            }
            _ => Err(RdbError::NotSupported(format!(
                "update/delete through {op:?} is not supported"
            ))),
        },
        _ => Err(RdbError::NotSupported(
            "update/delete target must be a table expression".into(),
        )),
    }
}

fn typecheck_insert(table_name: &str, tuple: &Object, catalog: &Rc<dyn Catalog>) -> Result<()> {
    let ty = catalog.table_type(table_name)?;
    let t = tuple.as_tuple()?;
    for name in ty.attr_names() {
        let declared = ty.attr(name).unwrap();
        let v = t
            .get(name)
            .ok_or_else(|| RdbError::Name(format!("missing attribute {name} in inserted tuple")))?;
        if let Some(actual) = v.value_type() {
            if &actual != declared.physical() && declared.physical().is_scalar() {
                return Err(RdbError::TypeMismatch(format!(
                    "attribute {name}: expected {declared:?}, got {actual:?}"
                )));
            }
        }
    }
    Ok(())
}

fn field_index(fieldinfo: &[FieldInfo], name: &str) -> Result<usize> {
    fieldinfo
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| RdbError::Name(format!("no such field {name}")))
}

fn encode_fields(fieldinfo: &[FieldInfo], tuple: &Tuple) -> Result<Vec<Vec<u8>>> {
    fieldinfo
        .iter()
        .map(|f| {
            let v = tuple
                .get(&f.name)
                .ok_or_else(|| RdbError::Name(format!("missing attribute {}", f.name)))?;
            scalar_to_bytes(v)
        })
        .collect()
}

fn matching_tuples(table_name: &str, cond: &Option<Expr>, catalog: &Rc<dyn Catalog>) -> Result<Vec<Tuple>> {
    let base = Expr::table_ref(table_name.to_string());
    let plan = match cond {
        Some(c) => Expr::where_(base, c.clone()),
        None => base,
    };
    let mut it = eval::build_iterator(&plan, catalog)?;
    let mut rows = Vec::new();
    loop {
        match it.next() {
            Ok(t) => rows.push(t),
            Err(RdbError::NotFound) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(rows)
}

fn execute(
    inserts: &[ResolvedInsert],
    updates: &[ResolvedUpdate],
    deletes: &[ResolvedDelete],
    copies: &[ResolvedCopy],
    catalog: &Rc<dyn Catalog>,
) -> Result<()> {
    for r in inserts {
        let table = catalog.table(&r.table)?;
        let tuple = r.tuple.as_tuple()?;
        let fieldinfo = table.borrow().fieldinfo().to_vec();
        let fields = encode_fields(&fieldinfo, tuple)?;
        let refs: Vec<&[u8]> = fields.iter().map(|v| v.as_slice()).collect();
        table.borrow_mut().insert(&refs, None)?;
    }

    for r in updates {
        let table = catalog.table(&r.table)?;
        let rows = matching_tuples(&r.table, &r.cond, catalog)?;
        let fieldinfo = table.borrow().fieldinfo().to_vec();
        let kfc = table.borrow().keyfieldcount();
        for row in &rows {
            let key_fields = encode_fields(&fieldinfo[..kfc], row)?;
            let key_refs: Vec<&[u8]> = key_fields.iter().map(|v| v.as_slice()).collect();
            let mut field_updates = Vec::with_capacity(r.updates.len());
            for (attr, expr) in &r.updates {
                let new_value = eval::eval_scalar_on_tuple(expr, row)?;
                let fno = field_index(&fieldinfo, attr)?;
                field_updates.push((fno, scalar_to_bytes(&new_value)?));
            }
            table.borrow_mut().update(&key_refs, &field_updates, None)?;
        }
    }

    for r in deletes {
        let table = catalog.table(&r.table)?;
        let rows = matching_tuples(&r.table, &r.cond, catalog)?;
        let fieldinfo = table.borrow().fieldinfo().to_vec();
        let kfc = table.borrow().keyfieldcount();
        for row in &rows {
            let key_fields = encode_fields(&fieldinfo[..kfc], row)?;
            let key_refs: Vec<&[u8]> = key_fields.iter().map(|v| v.as_slice()).collect();
            table.borrow_mut().delete(&key_refs, None)?;
        }
    }

    for r in copies {
        let value = eval::evaluate(&r.src, None, catalog)?;
        let mut it = eval::open(&value, catalog)?;
        let table = catalog.table(&r.dst)?;
        let fieldinfo = table.borrow().fieldinfo().to_vec();
        loop {
            let row = match it.next() {
                Ok(t) => t,
                Err(RdbError::NotFound) => break,
                Err(e) => return Err(e),
            };
            let fields = encode_fields(&fieldinfo, &row)?;
            let refs: Vec<&[u8]> = fields.iter().map(|v| v.as_slice()).collect();
            table.borrow_mut().insert(&refs, None)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::object::{Type, TupleType};
    use crate::recmap::tree::TreeStore;
    use crate::recmap::{RecordMap, RecordMapFlags};
    use std::cell::RefCell;

    fn catalog_with_person() -> Rc<dyn Catalog> {
        let fields = vec![FieldInfo::fixed("id", 8), FieldInfo::fixed("age", 8)];
        let m = RecordMap::create("PERSON", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
        let ty = TupleType::new([
            ("id".to_string(), Type::Integer),
            ("age".to_string(), Type::Integer),
        ]);
        let mut cat = InMemoryCatalog::new();
        cat.register_table("PERSON", ty, Rc::new(RefCell::new(m)));
        Rc::new(cat)
    }

    fn tuple(id: i64, age: i64) -> Object {
        let mut t = Tuple::new();
        t.insert("id".to_string(), Object::Int(id));
        t.insert("age".to_string(), Object::Int(age));
        Object::Tuple(t)
    }

    #[test]
    fn insert_without_transaction_is_rejected() {
        let catalog = catalog_with_person();
        let req = AssignRequest {
            inserts: vec![InsertOp {
                target: Expr::table_ref("PERSON"),
                tuple: tuple(1, 30),
            }],
            ..Default::default()
        };
        let err = assign(req, &catalog, None).unwrap_err();
        assert!(matches!(err, RdbError::NoRunningTx));
    }

    #[test]
    fn insert_then_delete_round_trips() {
        let catalog = catalog_with_person();
        let mut txn = Txn::begin("db", None).unwrap();
        let req = AssignRequest {
            inserts: vec![InsertOp {
                target: Expr::table_ref("PERSON"),
                tuple: tuple(1, 30),
            }],
            ..Default::default()
        };
        assign(req, &catalog, Some(&mut txn)).unwrap();

        let rows = matching_tuples("PERSON", &None, &catalog).unwrap();
        assert_eq!(rows.len(), 1);

        let del_cond = Expr::op(Op::Eq, vec![Expr::var("id"), Expr::object(Object::Int(1))]);
        let req = AssignRequest {
            deletes: vec![DeleteOp {
                target: Expr::table_ref("PERSON"),
                cond: Some(del_cond),
            }],
            ..Default::default()
        };
        assign(req, &catalog, Some(&mut txn)).unwrap();
        let rows = matching_tuples("PERSON", &None, &catalog).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn double_targeting_same_table_is_rejected() {
        let catalog = catalog_with_person();
        let mut txn = Txn::begin("db", None).unwrap();
        let req = AssignRequest {
            inserts: vec![InsertOp {
                target: Expr::table_ref("PERSON"),
                tuple: tuple(1, 30),
            }],
            deletes: vec![DeleteOp {
                target: Expr::table_ref("PERSON"),
                cond: None,
            }],
            ..Default::default()
        };
        let err = assign(req, &catalog, Some(&mut txn)).unwrap_err();
        assert!(matches!(err, RdbError::InvalidArgument(_)));
    }
}
