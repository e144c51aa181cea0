//! Symbolic numbers and shapes
//!
//! A minimal algebra over possibly-unknown integers (`ExpNum`) and shape vectors
//! (`ExpShape`). Constructors fold constant operands; everything else is kept as
//! a tree so that an external solver can rebuild the constraints from it.

use std::fmt;
use std::rc::Rc;

use crate::common::IdSource;

/// A named unknown integer
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymInt {
    pub id: u64,
    pub name: String,
    /// Inclusive lower bound known at creation time
    pub lower_bound: Option<i64>,
}

impl SymInt {
    /// Create a fresh symbol named `<prefix><id>`
    pub fn fresh(ids: &IdSource, prefix: &str, lower_bound: Option<i64>) -> Self {
        let id = ids.next_symbol_id();
        SymInt {
            id,
            name: format!("{}{}", prefix, id),
            lower_bound,
        }
    }
}

/// A named unknown shape of a given rank
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymShape {
    pub id: u64,
    pub name: String,
    pub rank: ExpNum,
}

impl SymShape {
    pub fn fresh(ids: &IdSource, prefix: &str, rank: ExpNum) -> Self {
        let id = ids.next_symbol_id();
        SymShape {
            id,
            name: format!("{}{}", prefix, id),
            rank,
        }
    }
}

/// Tag of an `ExpNum`, enough for a solver to rebuild the constraint kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumOpType {
    Const,
    Symbol,
    Bop,
    Index,
    Numel,
}

/// Binary operator of a symbolic number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumBopType {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
}

impl NumBopType {
    pub fn symbol(self) -> &'static str {
        match self {
            NumBopType::Add => "+",
            NumBopType::Sub => "-",
            NumBopType::Mul => "*",
            NumBopType::TrueDiv => "/",
            NumBopType::FloorDiv => "//",
            NumBopType::Mod => "%",
        }
    }

    /// Fold two constants. Returns `None` when the result is not an integer,
    /// the divisor is zero or the result does not fit in an `i64`.
    fn fold(self, left: i64, right: i64) -> Option<i64> {
        match self {
            NumBopType::Add => left.checked_add(right),
            NumBopType::Sub => left.checked_sub(right),
            NumBopType::Mul => left.checked_mul(right),
            NumBopType::TrueDiv => match left.checked_rem(right)? {
                0 => left.checked_div(right),
                _ => None,
            },
            NumBopType::FloorDiv => floor_div(left, right),
            NumBopType::Mod => {
                let r = left.checked_rem(right)?;
                if r != 0 && ((r < 0) != (right < 0)) {
                    r.checked_add(right)
                } else {
                    Some(r)
                }
            }
        }
    }
}

/// Division rounding toward negative infinity
fn floor_div(left: i64, right: i64) -> Option<i64> {
    let q = left.checked_div(right)?;
    if left.checked_rem(right)? != 0 && ((left < 0) != (right < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// A possibly-unknown integer
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExpNum {
    Const(i64),
    Symbol(Rc<SymInt>),
    Bop {
        op: NumBopType,
        left: Rc<ExpNum>,
        right: Rc<ExpNum>,
    },
    /// `shape[index]`
    Index {
        shape: Rc<ExpShape>,
        index: Rc<ExpNum>,
    },
    /// Product of every dimension of a shape
    Numel(Rc<ExpShape>),
}

impl ExpNum {
    pub fn constant(value: i64) -> Self {
        ExpNum::Const(value)
    }

    pub fn symbol(sym: SymInt) -> Self {
        ExpNum::Symbol(Rc::new(sym))
    }

    pub fn bop(op: NumBopType, left: ExpNum, right: ExpNum) -> Self {
        if let (ExpNum::Const(l), ExpNum::Const(r)) = (&left, &right)
            && let Some(folded) = op.fold(*l, *r)
        {
            return ExpNum::Const(folded);
        }
        ExpNum::Bop {
            op,
            left: Rc::new(left),
            right: Rc::new(right),
        }
    }

    pub fn index(shape: ExpShape, index: ExpNum) -> Self {
        if let (ExpShape::Const(dims), ExpNum::Const(i)) = (&shape, &index) {
            let rank = dims.len() as i64;
            let i = if *i < 0 { *i + rank } else { *i };
            if (0..rank).contains(&i) {
                return dims[i as usize].clone();
            }
        }
        ExpNum::Index {
            shape: Rc::new(shape),
            index: Rc::new(index),
        }
    }

    pub fn numel(shape: ExpShape) -> Self {
        if let Some(dims) = shape.as_concrete() {
            if let Some(n) = dims.iter().try_fold(1i64, |acc, d| acc.checked_mul(*d)) {
                return ExpNum::Const(n);
            }
        }
        ExpNum::Numel(Rc::new(shape))
    }

    pub fn op_type(&self) -> NumOpType {
        match self {
            ExpNum::Const(_) => NumOpType::Const,
            ExpNum::Symbol(_) => NumOpType::Symbol,
            ExpNum::Bop { .. } => NumOpType::Bop,
            ExpNum::Index { .. } => NumOpType::Index,
            ExpNum::Numel(_) => NumOpType::Numel,
        }
    }

    /// The value of a constant-kind expression
    pub fn as_const(&self) -> Option<i64> {
        match self {
            ExpNum::Const(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<i64> for ExpNum {
    fn from(value: i64) -> Self {
        ExpNum::Const(value)
    }
}

impl fmt::Display for ExpNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpNum::Const(n) => write!(f, "{}", n),
            ExpNum::Symbol(s) => write!(f, "{}", s.name),
            ExpNum::Bop { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            ExpNum::Index { shape, index } => write!(f, "{}[{}]", shape, index),
            ExpNum::Numel(shape) => write!(f, "numel({})", shape),
        }
    }
}

/// A possibly-unknown shape vector
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExpShape {
    /// Known rank; each dimension may still be symbolic
    Const(Vec<ExpNum>),
    /// Unknown shape with a (possibly symbolic) rank
    Symbol(Rc<SymShape>),
}

impl ExpShape {
    pub fn from_const(dims: Vec<ExpNum>) -> Self {
        ExpShape::Const(dims)
    }

    pub fn from_concrete(dims: &[i64]) -> Self {
        ExpShape::Const(dims.iter().map(|d| ExpNum::Const(*d)).collect())
    }

    pub fn from_symbol(sym: SymShape) -> Self {
        ExpShape::Symbol(Rc::new(sym))
    }

    pub fn rank(&self) -> ExpNum {
        match self {
            ExpShape::Const(dims) => ExpNum::Const(dims.len() as i64),
            ExpShape::Symbol(s) => s.rank.clone(),
        }
    }

    /// Every dimension, when all of them are constants
    pub fn as_concrete(&self) -> Option<Vec<i64>> {
        match self {
            ExpShape::Const(dims) => dims.iter().map(ExpNum::as_const).collect(),
            ExpShape::Symbol(_) => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        self.as_concrete().is_some()
    }
}

impl fmt::Display for ExpShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpShape::Const(dims) => {
                write!(f, "[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "]")
            }
            ExpShape::Symbol(s) => write!(f, "{}", s.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let e = ExpNum::bop(NumBopType::Mul, 3.into(), 4.into());
        assert_eq!(e, ExpNum::Const(12));

        let e = ExpNum::bop(NumBopType::FloorDiv, (-7).into(), 2.into());
        assert_eq!(e, ExpNum::Const(-4));

        let e = ExpNum::bop(NumBopType::Mod, (-7).into(), 2.into());
        assert_eq!(e, ExpNum::Const(1));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let e = ExpNum::bop(NumBopType::FloorDiv, 1.into(), 0.into());
        assert_eq!(e.op_type(), NumOpType::Bop);
        assert_eq!(e.to_string(), "(1 // 0)");
    }

    #[test]
    fn test_overflowing_division_is_not_folded() {
        for op in [NumBopType::FloorDiv, NumBopType::Mod, NumBopType::TrueDiv] {
            let e = ExpNum::bop(op, i64::MIN.into(), (-1).into());
            assert_eq!(e.op_type(), NumOpType::Bop, "{:?}", op);
        }
        assert_eq!(NumBopType::FloorDiv.fold(i64::MIN, 1), Some(i64::MIN));
        assert_eq!(NumBopType::Mod.fold(i64::MIN, i64::MAX), Some(i64::MAX - 1));
    }

    #[test]
    fn test_symbolic_display() {
        let ids = IdSource::new();
        let n = ExpNum::symbol(SymInt::fresh(&ids, "n", Some(0)));
        let e = ExpNum::bop(NumBopType::Add, n, 1.into());
        assert_eq!(e.to_string(), "(n0 + 1)");
        assert!(e.as_const().is_none());
    }

    #[test]
    fn test_shape_index_and_numel() {
        let shape = ExpShape::from_concrete(&[2, 3, 4]);
        assert_eq!(ExpNum::index(shape.clone(), (-1).into()), ExpNum::Const(4));
        assert_eq!(ExpNum::numel(shape.clone()), ExpNum::Const(24));
        assert_eq!(shape.rank(), ExpNum::Const(3));
        assert_eq!(shape.to_string(), "[2, 3, 4]");
    }

    #[test]
    fn test_symbolic_shape() {
        let ids = IdSource::new();
        let rank = ExpNum::symbol(SymInt::fresh(&ids, "tempRank", Some(0)));
        let shape = ExpShape::from_symbol(SymShape::fresh(&ids, "tempShape", rank.clone()));
        assert_eq!(shape.rank(), rank);
        assert!(!shape.is_concrete());
        assert_eq!(shape.to_string(), "tempShape1");
        assert_eq!(ExpNum::numel(shape).op_type(), NumOpType::Numel);
    }
}
