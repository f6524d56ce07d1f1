//! Expression model (spec §3 "Expression", §4.G).
//!
//! Grounded on `limbo_core::parser::expression`'s `Expr` enum shape
//! (operator + ordered args), generalized from a SQL-shaped AST to the
//! relational-algebra tree this engine evaluates, plus the per-node
//! caches (`transformed`, `optimized`, resolved type, index-selection
//! payload) spec §3/§4.G/§4.J ask for.

use crate::object::{Object, Type};
use std::cell::RefCell;

/// Scalar and relational operator names (spec §3 "Operator names").
/// `Update` is never seen past the transformer: it is normalized into
/// `Rename(Remove(Extend(...)))` before planning (spec §4.I rule 14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Relational
    Where,
    Project,
    Remove,
    Rename,
    Extend,
    Union,
    Minus,
    Semiminus,
    Intersect,
    Semijoin,
    Join,
    Divide,
    Summarize,
    Group,
    Ungroup,
    Tclose,
    Wrap,
    Unwrap,
    Tuple,
    Array,
    Relation,
    Update,
    Index,
    Dot,
    If,
    IsEmpty,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    All,
    Any,
    // Scalar
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Like,
    /// A user-defined or system-generated operator looked up by name
    /// (spec §4.H "."'s "system-generated getter or a user-defined
    /// getter operator looked up by name").
    Named(&'static str),
}

/// One argument slot used by `extend`/`summarize`/`wrap`/`rename` style
/// operators that pair a sub-expression with a name (spec §3 OP args:
/// "ordered arg list").
#[derive(Debug, Clone)]
pub struct NamedArg {
    pub expr: Expr,
    pub name: String,
}

/// The low/high bound an optimizer-selected index probe uses to seed a
/// stored scan (spec §3 OP: "optional index-selection payload (objpv,
/// objpc, asc, all_eq, stopexp)").
#[derive(Debug, Clone)]
pub struct IndexSelection {
    pub index_name: Option<String>,
    /// Values to seed the probe, one per matched leading index field.
    pub objpv: Vec<Object>,
    pub asc: bool,
    /// True when every matched attribute was an `=` bound (point or
    /// unique lookup); false when the last bound is a range.
    pub all_eq: bool,
    /// The residual stop condition evaluated against each candidate
    /// tuple while the range bound holds (spec §4.K "Index probe").
    pub stopexp: Option<Box<Expr>>,
}

/// A node in the expression tree (spec §3 "Expression").
#[derive(Debug, Clone)]
pub enum Expr {
    Object(Object),
    TableRef(String),
    Var(String),
    Op {
        op: Op,
        args: Vec<Expr>,
        named: Vec<NamedArg>,
        cache: RefCell<NodeCache>,
    },
}

/// Per-node memoized state (spec §4.G "memoized on the node", §4.I
/// "`transformed` flag set on the node after rewriting").
#[derive(Debug, Clone, Default)]
pub struct NodeCache {
    pub result_type: Option<Type>,
    pub transformed: bool,
    pub optimized: bool,
    pub index_selection: Option<IndexSelection>,
}

impl Expr {
    pub fn object(o: Object) -> Self {
        Expr::Object(o)
    }

    pub fn table_ref(name: impl Into<String>) -> Self {
        Expr::TableRef(name.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn op(op: Op, args: Vec<Expr>) -> Self {
        Expr::Op {
            op,
            args,
            named: Vec::new(),
            cache: RefCell::new(NodeCache::default()),
        }
    }

    pub fn op_named(op: Op, args: Vec<Expr>, named: Vec<NamedArg>) -> Self {
        Expr::Op {
            op,
            args,
            named,
            cache: RefCell::new(NodeCache::default()),
        }
    }

    pub fn where_(t: Expr, cond: Expr) -> Self {
        Expr::op(Op::Where, vec![t, cond])
    }

    pub fn and(a: Expr, b: Expr) -> Self {
        Expr::op(Op::And, vec![a, b])
    }

    pub fn is_op(&self, op: Op) -> bool {
        matches!(self, Expr::Op { op: o, .. } if *o == op)
    }

    pub fn as_op(&self) -> Option<(Op, &[Expr])> {
        match self {
            Expr::Op { op, args, .. } => Some((*op, args.as_slice())),
            _ => None,
        }
    }

    pub fn named_args(&self) -> &[NamedArg] {
        match self {
            Expr::Op { named, .. } => named,
            _ => &[],
        }
    }

    pub fn is_transformed(&self) -> bool {
        match self {
            Expr::Op { cache, .. } => cache.borrow().transformed,
            _ => true,
        }
    }

    pub fn mark_transformed(&self) {
        if let Expr::Op { cache, .. } = self {
            cache.borrow_mut().transformed = true;
        }
    }

    pub fn is_optimized(&self) -> bool {
        match self {
            Expr::Op { cache, .. } => cache.borrow().optimized,
            _ => true,
        }
    }

    pub fn mark_optimized(&self) {
        if let Expr::Op { cache, .. } = self {
            cache.borrow_mut().optimized = true;
        }
    }

    pub fn cached_type(&self) -> Option<Type> {
        match self {
            Expr::Op { cache, .. } => cache.borrow().result_type.clone(),
            _ => None,
        }
    }

    pub fn set_cached_type(&self, ty: Type) {
        if let Expr::Op { cache, .. } = self {
            cache.borrow_mut().result_type = Some(ty);
        }
    }

    pub fn index_selection(&self) -> Option<IndexSelection> {
        match self {
            Expr::Op { cache, .. } => cache.borrow().index_selection.clone(),
            _ => None,
        }
    }

    pub fn set_index_selection(&self, sel: IndexSelection) {
        if let Expr::Op { cache, .. } = self {
            cache.borrow_mut().index_selection = Some(sel);
        }
    }

    /// Structural equality ignoring caches — used by the transformer's
    /// subset/complement recognizers (spec §4.I "Empty-set replacement"
    /// and rule 13, "Union of complementary selections").
    pub fn structurally_eq(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::TableRef(a), Expr::TableRef(b)) => a == b,
            (Expr::Var(a), Expr::Var(b)) => a == b,
            (Expr::Object(_), Expr::Object(_)) => false,
            (
                Expr::Op {
                    op: oa, args: aa, ..
                },
                Expr::Op {
                    op: ob, args: ab, ..
                },
            ) => {
                oa == ob
                    && aa.len() == ab.len()
                    && aa.iter().zip(ab.iter()).all(|(x, y)| x.structurally_eq(y))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_candidates_detected_structurally() {
        let t = Expr::table_ref("T");
        let c1 = Expr::var("a");
        let c2 = Expr::var("a");
        let lhs = Expr::where_(Expr::where_(t.clone(), c1), c2);
        assert!(matches!(lhs, Expr::Op { op: Op::Where, .. }));
        let (_, args) = lhs.as_op().unwrap();
        assert!(args[0].structurally_eq(&Expr::where_(t, Expr::var("a"))));
    }

    #[test]
    fn caches_are_per_node_not_shared() {
        let a = Expr::op(Op::Count, vec![Expr::table_ref("T")]);
        let b = Expr::op(Op::Count, vec![Expr::table_ref("T")]);
        a.mark_transformed();
        assert!(a.is_transformed());
        assert!(!b.is_transformed());
    }
}
