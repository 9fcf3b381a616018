//! Abstract value domains for single variables.
//!
//! The privatization engine treats values as an opaque lattice through
//! [`ValueDomain`]. Two domains ship with the crate: [`Interval`] (the
//! default, widened to infinity on unstable bounds) and [`Constant`]
//! (flat constant propagation, finite height).

use std::cmp::Ordering;
use std::fmt;

use crate::program::CmpOp;

/// Lattice of abstract values for one integer variable.
///
/// `join` must be commutative and associative; `widen(old, new)` must be an
/// upper bound of both arguments and must stabilize every ascending chain.
pub trait ValueDomain: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync {
    fn bottom() -> Self;
    fn top() -> Self;
    fn constant(value: i64) -> Self;

    fn is_bottom(&self) -> bool;
    fn is_top(&self) -> bool;

    /// Lattice order: `self` describes a subset of `other`.
    fn leq(&self, other: &Self) -> bool;
    fn join(&self, other: &Self) -> Self;
    fn meet(&self, other: &Self) -> Self;

    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }

    /// The single concrete value, if the element describes exactly one.
    fn as_constant(&self) -> Option<i64>;

    fn add(&self, other: &Self) -> Self;
    fn sub(&self, other: &Self) -> Self;

    /// Decide `self op other` for every pair of concrete values:
    /// `Some(true)` if it always holds, `Some(false)` if it never holds,
    /// `None` otherwise (including bottom operands).
    fn compare(&self, op: CmpOp, other: &Self) -> Option<bool>;
}

/// Integer interval; `None` bounds are infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Bottom,
    Range { lo: Option<i64>, hi: Option<i64> },
}

impl Interval {
    /// `[lo, hi]`; bottom when `lo > hi`.
    pub fn new(lo: i64, hi: i64) -> Self {
        Self::from_bounds(Some(lo), Some(hi))
    }

    pub fn from_bounds(lo: Option<i64>, hi: Option<i64>) -> Self {
        match (lo, hi) {
            (Some(l), Some(h)) if l > h => Interval::Bottom,
            _ => Interval::Range { lo, hi },
        }
    }

    fn bounds(&self) -> Option<(Option<i64>, Option<i64>)> {
        match *self {
            Interval::Bottom => None,
            Interval::Range { lo, hi } => Some((lo, hi)),
        }
    }
}

// Lower bounds: None is -inf. Upper bounds: None is +inf.
fn min_lo(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    Some(a?.min(b?))
}

fn max_hi(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    Some(a?.max(b?))
}

fn max_lo(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) | (None, x) => x,
    }
}

fn min_hi(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) | (None, x) => x,
    }
}

/// `a <= b` for a finite-or-(-inf) lower bound against another.
fn lo_le(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(x), Some(y)) => x <= y,
    }
}

fn hi_ge(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(x), Some(y)) => x >= y,
    }
}

impl ValueDomain for Interval {
    fn bottom() -> Self {
        Interval::Bottom
    }

    fn top() -> Self {
        Interval::Range { lo: None, hi: None }
    }

    fn constant(value: i64) -> Self {
        Interval::new(value, value)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Interval::Bottom)
    }

    fn is_top(&self) -> bool {
        matches!(self, Interval::Range { lo: None, hi: None })
    }

    fn leq(&self, other: &Self) -> bool {
        match (self.bounds(), other.bounds()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((l1, h1)), Some((l2, h2))) => lo_le(l2, l1) && hi_ge(h2, h1),
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (self.bounds(), other.bounds()) {
            (None, _) => *other,
            (_, None) => *self,
            (Some((l1, h1)), Some((l2, h2))) => Interval::Range {
                lo: min_lo(l1, l2),
                hi: max_hi(h1, h2),
            },
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self.bounds(), other.bounds()) {
            (None, _) | (_, None) => Interval::Bottom,
            (Some((l1, h1)), Some((l2, h2))) => {
                Interval::from_bounds(max_lo(l1, l2), min_hi(h1, h2))
            }
        }
    }

    fn widen(&self, other: &Self) -> Self {
        match (self.bounds(), other.bounds()) {
            (None, _) => *other,
            (_, None) => *self,
            (Some((l1, h1)), Some((l2, h2))) => Interval::Range {
                lo: if lo_le(l1, l2) { l1 } else { None },
                hi: if hi_ge(h1, h2) { h1 } else { None },
            },
        }
    }

    fn as_constant(&self) -> Option<i64> {
        match *self {
            Interval::Range {
                lo: Some(l),
                hi: Some(h),
            } if l == h => Some(l),
            _ => None,
        }
    }

    fn add(&self, other: &Self) -> Self {
        match (self.bounds(), other.bounds()) {
            (None, _) | (_, None) => Interval::Bottom,
            (Some((l1, h1)), Some((l2, h2))) => Interval::Range {
                lo: l1.zip(l2).and_then(|(a, b)| a.checked_add(b)),
                hi: h1.zip(h2).and_then(|(a, b)| a.checked_add(b)),
            },
        }
    }

    fn sub(&self, other: &Self) -> Self {
        match (self.bounds(), other.bounds()) {
            (None, _) | (_, None) => Interval::Bottom,
            (Some((l1, h1)), Some((l2, h2))) => Interval::Range {
                lo: l1.zip(h2).and_then(|(a, b)| a.checked_sub(b)),
                hi: h1.zip(l2).and_then(|(a, b)| a.checked_sub(b)),
            },
        }
    }

    fn compare(&self, op: CmpOp, other: &Self) -> Option<bool> {
        let (l1, h1) = self.bounds()?;
        let (l2, h2) = other.bounds()?;
        // strictly_below(a_hi, b_lo): every value of a < every value of b.
        let strictly_below = |hi: Option<i64>, lo: Option<i64>| match (hi, lo) {
            (Some(h), Some(l)) => h < l,
            _ => false,
        };
        let at_most = |hi: Option<i64>, lo: Option<i64>| match (hi, lo) {
            (Some(h), Some(l)) => h <= l,
            _ => false,
        };
        match op {
            CmpOp::Eq => {
                if let (Some(a), Some(b)) = (self.as_constant(), other.as_constant()) {
                    Some(a == b)
                } else if strictly_below(h1, l2) || strictly_below(h2, l1) {
                    Some(false)
                } else {
                    None
                }
            }
            CmpOp::Ne => self.compare(CmpOp::Eq, other).map(|b| !b),
            CmpOp::Lt => {
                if strictly_below(h1, l2) {
                    Some(true)
                } else if at_most(h2, l1) {
                    Some(false)
                } else {
                    None
                }
            }
            CmpOp::Le => {
                if at_most(h1, l2) {
                    Some(true)
                } else if strictly_below(h2, l1) {
                    Some(false)
                } else {
                    None
                }
            }
            CmpOp::Gt | CmpOp::Ge => other.compare(op.flip(), self),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Interval::Bottom => f.write_str("bot"),
            Interval::Range { lo, hi } => {
                match lo {
                    Some(l) => write!(f, "[{l}, ")?,
                    None => f.write_str("[-inf, ")?,
                }
                match hi {
                    Some(h) => write!(f, "{h}]"),
                    None => f.write_str("+inf]"),
                }
            }
        }
    }
}

/// Flat constant-propagation lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Bottom,
    Value(i64),
    Top,
}

impl ValueDomain for Constant {
    fn bottom() -> Self {
        Constant::Bottom
    }

    fn top() -> Self {
        Constant::Top
    }

    fn constant(value: i64) -> Self {
        Constant::Value(value)
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Constant::Bottom)
    }

    fn is_top(&self) -> bool {
        matches!(self, Constant::Top)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Bottom, _) | (_, Constant::Top) => true,
            (Constant::Value(a), Constant::Value(b)) => a == b,
            _ => false,
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Constant::Bottom, x) | (x, Constant::Bottom) => *x,
            (Constant::Value(a), Constant::Value(b)) if a == b => *self,
            _ => Constant::Top,
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Constant::Top, x) | (x, Constant::Top) => *x,
            (Constant::Value(a), Constant::Value(b)) if a == b => *self,
            _ => Constant::Bottom,
        }
    }

    fn as_constant(&self) -> Option<i64> {
        match self {
            Constant::Value(v) => Some(*v),
            _ => None,
        }
    }

    fn add(&self, other: &Self) -> Self {
        lift(self, other, i64::checked_add)
    }

    fn sub(&self, other: &Self) -> Self {
        lift(self, other, i64::checked_sub)
    }

    fn compare(&self, op: CmpOp, other: &Self) -> Option<bool> {
        let (a, b) = (self.as_constant()?, other.as_constant()?);
        let ord = a.cmp(&b);
        Some(match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        })
    }
}

fn lift(a: &Constant, b: &Constant, f: fn(i64, i64) -> Option<i64>) -> Constant {
    match (a, b) {
        (Constant::Bottom, _) | (_, Constant::Bottom) => Constant::Bottom,
        (Constant::Value(x), Constant::Value(y)) => f(*x, *y).map_or(Constant::Top, Constant::Value),
        _ => Constant::Top,
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bottom => f.write_str("bot"),
            Constant::Value(v) => write!(f, "{v}"),
            Constant::Top => f.write_str("top"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_join_and_meet() {
        let a = Interval::new(0, 10);
        let b = Interval::new(5, 15);
        assert_eq!(a.join(&b), Interval::new(0, 15));
        assert_eq!(a.meet(&b), Interval::new(5, 10));
        assert_eq!(
            Interval::new(0, 1).meet(&Interval::new(3, 4)),
            Interval::Bottom
        );
        assert_eq!(Interval::Bottom.join(&a), a);
        assert!(Interval::top().meet(&a) == a);
    }

    #[test]
    fn interval_order() {
        assert!(Interval::new(2, 3).leq(&Interval::new(0, 5)));
        assert!(!Interval::new(0, 5).leq(&Interval::new(2, 3)));
        assert!(Interval::Bottom.leq(&Interval::new(1, 1)));
        assert!(Interval::new(-7, 7).leq(&Interval::top()));
        assert!(!Interval::top().leq(&Interval::new(0, i64::MAX)));
    }

    #[test]
    fn interval_widening_jumps_unstable_bounds() {
        let old = Interval::new(0, 1);
        let new = Interval::new(0, 2);
        assert_eq!(
            old.widen(&new),
            Interval::Range {
                lo: Some(0),
                hi: None
            }
        );
        assert_eq!(old.widen(&Interval::new(0, 1)), old);
        assert_eq!(
            old.widen(&Interval::new(-1, 1)),
            Interval::Range {
                lo: None,
                hi: Some(1)
            }
        );
    }

    #[test]
    fn interval_arithmetic_saturates_to_infinity() {
        let a = Interval::new(1, 2);
        let b = Interval::new(10, 20);
        assert_eq!(a.add(&b), Interval::new(11, 22));
        assert_eq!(a.sub(&b), Interval::new(-19, -8));
        let big = Interval::new(i64::MAX - 1, i64::MAX);
        assert_eq!(
            big.add(&a),
            Interval::Range {
                lo: Some(i64::MAX),
                hi: None
            }
        );
    }

    #[test]
    fn interval_compare_is_three_valued() {
        let five = Interval::constant(5);
        let range = Interval::new(0, 10);
        assert_eq!(five.compare(CmpOp::Eq, &Interval::constant(5)), Some(true));
        assert_eq!(five.compare(CmpOp::Eq, &Interval::constant(6)), Some(false));
        assert_eq!(five.compare(CmpOp::Eq, &range), None);
        assert_eq!(
            Interval::new(0, 3).compare(CmpOp::Lt, &Interval::new(4, 9)),
            Some(true)
        );
        assert_eq!(
            Interval::new(4, 9).compare(CmpOp::Lt, &Interval::new(0, 4)),
            Some(false)
        );
        assert_eq!(
            Interval::new(4, 9).compare(CmpOp::Ge, &Interval::new(0, 4)),
            Some(true)
        );
        assert_eq!(range.compare(CmpOp::Ne, &Interval::new(20, 30)), Some(true));
        assert_eq!(Interval::top().compare(CmpOp::Eq, &Interval::top()), None);
        assert_eq!(Interval::Bottom.compare(CmpOp::Eq, &five), None);
    }

    #[test]
    fn constant_lattice() {
        let one = Constant::Value(1);
        let two = Constant::Value(2);
        assert_eq!(one.join(&two), Constant::Top);
        assert_eq!(one.join(&one), one);
        assert_eq!(one.meet(&two), Constant::Bottom);
        assert_eq!(Constant::Top.meet(&two), two);
        assert!(one.leq(&Constant::Top));
        assert!(!one.leq(&two));
        assert_eq!(one.add(&two), Constant::Value(3));
        assert_eq!(Constant::Value(i64::MAX).add(&one), Constant::Top);
        assert_eq!(one.compare(CmpOp::Lt, &two), Some(true));
        assert_eq!(one.compare(CmpOp::Eq, &Constant::Top), None);
    }

    #[test]
    fn display_renders_infinite_bounds() {
        assert_eq!(Interval::top().to_string(), "[-inf, +inf]");
        assert_eq!(Interval::new(-1, 4).to_string(), "[-1, 4]");
        assert_eq!(Interval::Bottom.to_string(), "bot");
        assert_eq!(Constant::Value(3).to_string(), "3");
    }
}
