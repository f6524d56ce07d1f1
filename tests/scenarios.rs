//! Integration tests for the engine-level scenarios S1-S6.

use reldb_core::field::FieldInfo;
use reldb_core::index::Index;
use reldb_core::object::{Object, Type, TupleType};
use reldb_core::recmap::tree::TreeStore;
use reldb_core::recmap::{RecordMap, RecordMapFlags, RecordMapOps};
use reldb_core::optimize::OptimizerConfig;
use reldb_core::{assign, Catalog, Expr, InMemoryCatalog, Op, Txn};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

fn bin(s: &str) -> Object {
    Object::Bin(Arc::new(s.as_bytes().to_vec()))
}

fn drain_names(catalog: &Rc<dyn Catalog>, expr: &Expr) -> Vec<Object> {
    let mut it = reldb_core::eval::build_iterator(expr, catalog).unwrap();
    let mut out = Vec::new();
    loop {
        match it.next() {
            Ok(t) => out.push(Object::Tuple(t)),
            Err(reldb_core::RdbError::NotFound) => break,
            Err(e) => panic!("unexpected error draining iterator: {e}"),
        }
    }
    out
}

/// S1. Insert + key violation.
#[test]
fn s1_insert_and_key_violation_scenario() {
    let fields = vec![FieldInfo::fixed("no", 8), FieldInfo::variable("name")];
    let m = RecordMap::create("E", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    let ty = TupleType::new([("no".to_string(), Type::Integer), ("name".to_string(), Type::String)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("E", ty, Rc::new(RefCell::new(m)));
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let table = catalog.table("E").unwrap();
    let one = reldb_core::object::scalar_to_bytes(&Object::Int(1)).unwrap();
    table.borrow_mut().insert(&[&one, b"A"], None).unwrap();
    let err = table.borrow_mut().insert(&[&one, b"B"], None).unwrap_err();
    assert!(matches!(err, reldb_core::RdbError::KeyViolation));

    let rows = drain_names(&catalog, &Expr::table_ref("E"));
    assert_eq!(rows.len(), 1);
    let t = rows[0].as_tuple().unwrap();
    assert_eq!(t.get("no"), Some(&Object::Int(1)));
}

/// S2. Projection duplicate removal.
#[test]
fn s2_projection_dedups_on_single_attribute() {
    let fields = vec![FieldInfo::fixed("a", 8), FieldInfo::fixed("b", 8)];
    let mut m = RecordMap::create("P", fields, 2, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    for (a, b) in [(1i64, 10i64), (1, 20), (2, 10)] {
        let ab = reldb_core::object::scalar_to_bytes(&Object::Int(a)).unwrap();
        let bb = reldb_core::object::scalar_to_bytes(&Object::Int(b)).unwrap();
        m.insert(&[&ab, &bb], None).unwrap();
    }
    let ty = TupleType::new([("a".to_string(), Type::Integer), ("b".to_string(), Type::Integer)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("P", ty, Rc::new(RefCell::new(m)));
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let projected = Expr::op(Op::Project, vec![Expr::table_ref("P"), Expr::var("b")]);
    let rows = drain_names(&catalog, &projected);
    let got: BTreeSet<i64> = rows
        .iter()
        .map(|o| o.as_tuple().unwrap().get("b").unwrap().as_int().unwrap())
        .collect();
    assert_eq!(rows.len(), 2, "duplicate b=10 rows must collapse to one");
    assert_eq!(got, BTreeSet::from([10, 20]));
}

/// S3. WHERE-over-union + complementary union collapse.
#[test]
fn s3_complementary_union_collapses_to_scan() {
    let fields = vec![FieldInfo::fixed("x", 8)];
    let mut m = RecordMap::create("T", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    for x in [1i64, 2, 3] {
        let xb = reldb_core::object::scalar_to_bytes(&Object::Int(x)).unwrap();
        m.insert(&[&xb], None).unwrap();
    }
    let ty = TupleType::new([("x".to_string(), Type::Integer)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("T", ty, Rc::new(RefCell::new(m)));
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let eq1 = Expr::op(Op::Eq, vec![Expr::var("x"), Expr::object(Object::Int(1))]);
    let ne1 = Expr::op(Op::Ne, vec![Expr::var("x"), Expr::object(Object::Int(1))]);
    let expr = Expr::op(
        Op::Union,
        vec![
            Expr::where_(Expr::table_ref("T"), eq1),
            Expr::where_(Expr::table_ref("T"), ne1),
        ],
    );

    let optimized = reldb_core::optimize::optimize(&expr, &catalog, &OptimizerConfig::default());
    match &optimized {
        Expr::TableRef(name) => assert_eq!(name, "T"),
        other => panic!("expected the union to collapse to a bare scan of T, got {other:?}"),
    }

    let rows = drain_names(&catalog, &optimized);
    let got: BTreeSet<i64> = rows
        .iter()
        .map(|o| o.as_tuple().unwrap().get("x").unwrap().as_int().unwrap())
        .collect();
    assert_eq!(got, BTreeSet::from([1, 2, 3]));
}

/// S4. Index range with LIKE.
#[test]
fn s4_like_over_indexed_attribute() {
    let fields = vec![FieldInfo::variable("name")];
    let mut m = RecordMap::create("S", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    m.add_index(Index::new(
        "ix_name",
        vec![0],
        vec![FieldInfo::variable("name")],
        vec![true],
        true,
        Box::new(TreeStore::new(None)),
    ));
    for name in ["ant", "apple", "banana"] {
        m.insert(&[name.as_bytes()], None).unwrap();
    }
    let ty = TupleType::new([("name".to_string(), Type::String)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("S", ty, Rc::new(RefCell::new(m)));
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let pattern = Expr::op(Op::Like, vec![Expr::var("name"), Expr::object(bin("a*"))]);
    let expr = Expr::where_(Expr::table_ref("S"), pattern);

    let optimized = reldb_core::optimize::optimize(&expr, &catalog, &OptimizerConfig::default());
    let sel = optimized
        .index_selection()
        .expect("LIKE 'a*' should derive an index-range selection");
    assert_eq!(sel.index_name.as_deref(), Some("ix_name"));
    assert!(!sel.all_eq);

    let rows = drain_names(&catalog, &optimized);
    let got: BTreeSet<String> = rows
        .iter()
        .map(|o| o.as_tuple().unwrap().get("name").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(got, BTreeSet::from(["ant".to_string(), "apple".to_string()]));
}

/// S5. Assignment with PREDICATE_VIOLATION.
#[test]
fn s5_insert_violating_declared_constraint_is_rejected() {
    let fields = vec![FieldInfo::fixed("x", 8)];
    let m = RecordMap::create("T", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    let ty = TupleType::new([("x".to_string(), Type::Integer)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("T", ty, Rc::new(RefCell::new(m)));
    let cond = Expr::op(Op::Lt, vec![Expr::var("x"), Expr::object(Object::Int(0))]);
    let is_empty = Expr::op(Op::IsEmpty, vec![Expr::where_(Expr::table_ref("T"), cond)]);
    cat.add_constraint("no_negatives", is_empty);
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let mut txn = Txn::begin("default", None).unwrap();
    let mut tuple = std::collections::BTreeMap::new();
    tuple.insert("x".to_string(), Object::Int(-1));
    let req = assign::AssignRequest {
        inserts: vec![assign::InsertOp {
            target: Expr::table_ref("T"),
            tuple: Object::Tuple(tuple),
        }],
        ..Default::default()
    };
    let err = assign::assign(req, &catalog, Some(&mut txn)).unwrap_err();
    assert!(matches!(err, reldb_core::RdbError::PredicateViolation { .. }));

    let rows = drain_names(&catalog, &Expr::table_ref("T"));
    assert!(rows.is_empty(), "rejected insert must leave T unchanged");
}

/// S6. Update touching key.
#[test]
fn s6_update_touching_key_is_delete_then_insert() {
    let fields = vec![FieldInfo::fixed("id", 8), FieldInfo::fixed("v", 8)];
    let m = RecordMap::create("K", fields, 1, None, RecordMapFlags::UNIQUE, TreeStore::new(None)).unwrap();
    let ty = TupleType::new([("id".to_string(), Type::Integer), ("v".to_string(), Type::Integer)]);
    let mut cat = InMemoryCatalog::new();
    cat.register_table("K", ty, Rc::new(RefCell::new(m)));
    let catalog: Rc<dyn Catalog> = Rc::new(cat);

    let table = catalog.table("K").unwrap();
    let one = reldb_core::object::scalar_to_bytes(&Object::Int(1)).unwrap();
    let ten = reldb_core::object::scalar_to_bytes(&Object::Int(10)).unwrap();
    table.borrow_mut().insert(&[&one, &ten], None).unwrap();

    let mut txn = Txn::begin("default", None).unwrap();
    let cond = Expr::op(Op::Eq, vec![Expr::var("id"), Expr::object(Object::Int(1))]);
    let req = assign::AssignRequest {
        updates: vec![assign::UpdateOp {
            target: Expr::table_ref("K"),
            cond: Some(cond),
            updates: vec![("id".to_string(), Expr::object(Object::Int(2)))],
        }],
        ..Default::default()
    };
    assign::assign(req, &catalog, Some(&mut txn)).unwrap();

    let rows = drain_names(&catalog, &Expr::table_ref("K"));
    assert_eq!(rows.len(), 1);
    let t = rows[0].as_tuple().unwrap();
    assert_eq!(t.get("id"), Some(&Object::Int(2)));
    assert_eq!(t.get("v"), Some(&Object::Int(10)));

    // Insert a colliding row, then try (and fail) to update id=2 -> id=3.
    let three = reldb_core::object::scalar_to_bytes(&Object::Int(3)).unwrap();
    table.borrow_mut().insert(&[&three, &ten], None).unwrap();

    let mut txn2 = Txn::begin("default", None).unwrap();
    let cond2 = Expr::op(Op::Eq, vec![Expr::var("id"), Expr::object(Object::Int(2))]);
    let req2 = assign::AssignRequest {
        updates: vec![assign::UpdateOp {
            target: Expr::table_ref("K"),
            cond: Some(cond2),
            updates: vec![("id".to_string(), Expr::object(Object::Int(3)))],
        }],
        ..Default::default()
    };
    let err = assign::assign(req2, &catalog, Some(&mut txn2)).unwrap_err();
    assert!(matches!(err, reldb_core::RdbError::KeyViolation));

    // (2, 10) must still be intact.
    let still_there = table.borrow().get(&[&reldb_core::object::scalar_to_bytes(&Object::Int(2)).unwrap()], &[1]).unwrap();
    assert_eq!(still_there[0], ten);
}
