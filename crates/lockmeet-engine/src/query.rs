//! Invariant query evaluation over a thread context.

use std::fmt;

use serde::Serialize;

use lockmeet_ir::domain::ValueDomain;
use lockmeet_ir::program::{Expr, Predicate};

use crate::context::ThreadContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Holds,
    Violated,
    Unknown,
}

impl Verdict {
    fn from_truth(truth: Option<bool>) -> Self {
        match truth {
            Some(true) => Verdict::Holds,
            Some(false) => Verdict::Violated,
            None => Verdict::Unknown,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Holds => "holds",
            Verdict::Violated => "violated",
            Verdict::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Decide `predicate` in `ctx`. Incomplete paths are always `Unknown`.
pub fn check<D: ValueDomain>(predicate: &Predicate, ctx: &ThreadContext<D>) -> Verdict {
    if ctx.incomplete {
        return Verdict::Unknown;
    }
    Verdict::from_truth(truth(predicate, ctx))
}

/// Three-valued truth of `predicate` (Kleene connectives).
fn truth<D: ValueDomain>(predicate: &Predicate, ctx: &ThreadContext<D>) -> Option<bool> {
    match predicate {
        Predicate::Cmp { lhs, op, rhs } => {
            let (l, r) = (ctx.eval(lhs), ctx.eval(rhs));
            if l.is_bottom() || r.is_bottom() {
                return None;
            }
            if let (Expr::Var(a), Expr::Var(b)) = (lhs, rhs) {
                if ctx.same(*a, *b) {
                    return Some(op.reflexive());
                }
            }
            l.compare(*op, &r)
        }
        Predicate::And(l, r) => match (truth(l, ctx), truth(r, ctx)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Predicate::Or(l, r) => match (truth(l, ctx), truth(r, ctx)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Predicate::Not(inner) => truth(inner, ctx).map(|b| !b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockmeet_ir::domain::Interval;
    use lockmeet_ir::program::{CmpOp, Var};

    const G: Var = Var::Global(0);
    const H: Var = Var::Global(1);

    fn cmp(lhs: Expr, op: CmpOp, rhs: Expr) -> Predicate {
        Predicate::Cmp { lhs, op, rhs }
    }

    fn ctx() -> ThreadContext<Interval> {
        let mut ctx = ThreadContext::spawned(0);
        ctx.assign(G, &Expr::Nondet);
        ctx.assign(H, &Expr::Var(G));
        ctx
    }

    #[test]
    fn equal_classes_decide_comparisons() {
        let ctx = ctx();
        assert_eq!(check(&cmp(Expr::Var(G), CmpOp::Eq, Expr::Var(H)), &ctx), Verdict::Holds);
        assert_eq!(check(&cmp(Expr::Var(G), CmpOp::Lt, Expr::Var(H)), &ctx), Verdict::Violated);
        assert_eq!(check(&cmp(Expr::Var(G), CmpOp::Ge, Expr::Var(H)), &ctx), Verdict::Holds);
    }

    #[test]
    fn values_decide_when_unrelated() {
        let mut ctx = ctx();
        ctx.assign(G, &Expr::Const(3));
        let p = cmp(Expr::Var(G), CmpOp::Eq, Expr::Var(H));
        assert_eq!(check(&p, &ctx), Verdict::Unknown);
        assert_eq!(check(&cmp(Expr::Var(G), CmpOp::Gt, Expr::Const(2)), &ctx), Verdict::Holds);
        assert_eq!(check(&cmp(Expr::Var(G), CmpOp::Eq, Expr::Const(2)), &ctx), Verdict::Violated);
    }

    #[test]
    fn kleene_connectives() {
        let ctx = ctx();
        let unknown = cmp(Expr::Var(G), CmpOp::Eq, Expr::Const(0));
        let truth = cmp(Expr::Const(1), CmpOp::Lt, Expr::Const(2));
        let falsity = cmp(Expr::Const(1), CmpOp::Gt, Expr::Const(2));
        let and = |a: &Predicate, b: &Predicate| Predicate::And(Box::new(a.clone()), Box::new(b.clone()));
        let or = |a: &Predicate, b: &Predicate| Predicate::Or(Box::new(a.clone()), Box::new(b.clone()));
        assert_eq!(check(&and(&unknown, &falsity), &ctx), Verdict::Violated);
        assert_eq!(check(&and(&unknown, &truth), &ctx), Verdict::Unknown);
        assert_eq!(check(&or(&unknown, &truth), &ctx), Verdict::Holds);
        assert_eq!(check(&or(&unknown, &falsity), &ctx), Verdict::Unknown);
        assert_eq!(
            check(&Predicate::Not(Box::new(falsity)), &ctx),
            Verdict::Holds
        );
    }

    #[test]
    fn incomplete_path_is_unknown() {
        let mut ctx = ctx();
        ctx.incomplete = true;
        let p = cmp(Expr::Const(1), CmpOp::Eq, Expr::Const(1));
        assert_eq!(check(&p, &ctx), Verdict::Unknown);
    }

    #[test]
    fn bottom_operands_are_unknown() {
        let mut ctx = ctx();
        ctx.set_unrelated(G, Interval::Bottom);
        let p = cmp(Expr::Var(G), CmpOp::Eq, Expr::Const(1));
        assert_eq!(check(&p, &ctx), Verdict::Unknown);
    }
}
