//! Symbolic tensor-operation graph
//!
//! An `HExpr` records the chain of tensor operations that produced a tensor.
//! Constructors are total and never check shapes; the library call layer does
//! that before building a node. The printer is deterministic so graphs can be
//! compared as text.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::symbolic::ExpShape;
use crate::common::{CodeSource, IdSource};
use crate::diagnostics::AnalysisError;

const INDENT: &str = "    ";

/// Provenance tag of a tensor placeholder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorKind {
    Plain,
    /// Origin could not be resolved to a source binding
    Cipher,
}

/// Element-wise binary tensor operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BopType {
    Add,
    Sub,
    Mul,
    Max,
}

impl BopType {
    pub fn keyword(self) -> &'static str {
        match self {
            BopType::Add => "+",
            BopType::Sub => "-",
            BopType::Mul => "*",
            BopType::Max => "maxt",
        }
    }
}

/// Element-wise unary tensor map
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UopType {
    Relu,
    Sigmoid,
    Rtangent,
}

impl UopType {
    pub fn keyword(self) -> &'static str {
        match self {
            UopType::Relu => "relu",
            UopType::Sigmoid => "sigmoid",
            UopType::Rtangent => "rtangent",
        }
    }
}

/// Pooling flavour
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolType {
    Max,
    MaxPadded,
    Average,
    AveragePadded,
}

impl PoolType {
    pub fn keyword(self) -> &'static str {
        match self {
            PoolType::Max => "maxpool",
            PoolType::MaxPadded => "maxpoolp",
            PoolType::Average => "avgpool",
            PoolType::AveragePadded => "avgpoolp",
        }
    }
}

/// Tensor operators
#[derive(Clone, Debug, PartialEq)]
pub enum Top {
    Bop {
        op: BopType,
        left: Rc<HExpr>,
        right: Rc<HExpr>,
    },
    Matmul {
        left: Rc<HExpr>,
        right: Rc<HExpr>,
    },
    Concat {
        left: Rc<HExpr>,
        axis: i64,
        right: Rc<HExpr>,
    },
    Reshape {
        base: Rc<HExpr>,
        shape: ExpShape,
    },
    Transpose {
        base: Rc<HExpr>,
        dim0: i64,
        dim1: i64,
    },
    /// Global maximum
    Max { base: Rc<HExpr> },
    Maxr { base: Rc<HExpr>, axis: i64 },
    Argmaxr { base: Rc<HExpr>, axis: i64 },
    Sumr { base: Rc<HExpr>, axis: i64 },
    Convol {
        fmap: Rc<HExpr>,
        kernel: Rc<HExpr>,
    },
    /// Padded convolution
    Convolp {
        fmap: Rc<HExpr>,
        kernel: Rc<HExpr>,
    },
    Pool {
        op: PoolType,
        base: Rc<HExpr>,
        height: i64,
        width: i64,
    },
    Map { op: UopType, base: Rc<HExpr> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum HExprKind {
    Nat(i64),
    Var(String),
    VarTensor {
        kind: TensorKind,
        name: String,
        shape: ExpShape,
    },
    /// Literal tensor constant; the payload is not modelled yet
    ConstTensor { shape: ExpShape },
    Let {
        bindings: Vec<(String, Rc<HExpr>)>,
        scope: Rc<HExpr>,
    },
    Top(Top),
}

/// Graph node with the location of the operation that built it
#[derive(Clone, Debug, PartialEq)]
pub struct HExpr {
    pub kind: HExprKind,
    pub source: Option<CodeSource>,
}

impl HExpr {
    fn new(kind: HExprKind, source: Option<CodeSource>) -> Self {
        HExpr { kind, source }
    }

    fn top(top: Top, source: Option<CodeSource>) -> Self {
        HExpr::new(HExprKind::Top(top), source)
    }

    pub fn nat(value: i64, source: Option<CodeSource>) -> Self {
        HExpr::new(HExprKind::Nat(value), source)
    }

    pub fn var(ident: impl Into<String>, source: Option<CodeSource>) -> Self {
        HExpr::new(HExprKind::Var(ident.into()), source)
    }

    /// Fresh plain placeholder named `tempPlain<N>`
    pub fn plain(ids: &IdSource, shape: ExpShape, source: Option<CodeSource>) -> Self {
        HExpr::new(
            HExprKind::VarTensor {
                kind: TensorKind::Plain,
                name: ids.next_plain_name(),
                shape,
            },
            source,
        )
    }

    /// Fresh cipher placeholder named `tempCipher<N>`
    pub fn cipher(ids: &IdSource, shape: ExpShape, source: Option<CodeSource>) -> Self {
        HExpr::new(
            HExprKind::VarTensor {
                kind: TensorKind::Cipher,
                name: ids.next_cipher_name(),
                shape,
            },
            source,
        )
    }

    pub fn const_tensor(shape: ExpShape, source: Option<CodeSource>) -> Self {
        HExpr::new(HExprKind::ConstTensor { shape }, source)
    }

    pub fn let_in(
        bindings: Vec<(String, Rc<HExpr>)>,
        scope: impl Into<Rc<HExpr>>,
        source: Option<CodeSource>,
    ) -> Self {
        HExpr::new(
            HExprKind::Let {
                bindings,
                scope: scope.into(),
            },
            source,
        )
    }

    pub fn bop(
        op: BopType,
        left: impl Into<Rc<HExpr>>,
        right: impl Into<Rc<HExpr>>,
        source: Option<CodeSource>,
    ) -> Self {
        HExpr::top(
            Top::Bop {
                op,
                left: left.into(),
                right: right.into(),
            },
            source,
        )
    }

    pub fn matmul(left: impl Into<Rc<HExpr>>, right: impl Into<Rc<HExpr>>, source: Option<CodeSource>) -> Self {
        HExpr::top(
            Top::Matmul {
                left: left.into(),
                right: right.into(),
            },
            source,
        )
    }

    pub fn concat(
        left: impl Into<Rc<HExpr>>,
        axis: i64,
        right: impl Into<Rc<HExpr>>,
        source: Option<CodeSource>,
    ) -> Self {
        HExpr::top(
            Top::Concat {
                left: left.into(),
                axis,
                right: right.into(),
            },
            source,
        )
    }

    pub fn reshape(base: impl Into<Rc<HExpr>>, shape: ExpShape, source: Option<CodeSource>) -> Self {
        HExpr::top(
            Top::Reshape {
                base: base.into(),
                shape,
            },
            source,
        )
    }

    pub fn transpose(base: impl Into<Rc<HExpr>>, dim0: i64, dim1: i64, source: Option<CodeSource>) -> Self {
        HExpr::top(
            Top::Transpose {
                base: base.into(),
                dim0,
                dim1,
            },
            source,
        )
    }

    pub fn max(base: impl Into<Rc<HExpr>>, source: Option<CodeSource>) -> Self {
        HExpr::top(Top::Max { base: base.into() }, source)
    }

    pub fn maxr(base: impl Into<Rc<HExpr>>, axis: i64, source: Option<CodeSource>) -> Self {
        HExpr::top(Top::Maxr { base: base.into(), axis }, source)
    }

    pub fn argmaxr(base: impl Into<Rc<HExpr>>, axis: i64, source: Option<CodeSource>) -> Self {
        HExpr::top(Top::Argmaxr { base: base.into(), axis }, source)
    }

    pub fn sumr(base: impl Into<Rc<HExpr>>, axis: i64, source: Option<CodeSource>) -> Self {
        HExpr::top(Top::Sumr { base: base.into(), axis }, source)
    }

    pub fn convol(fmap: impl Into<Rc<HExpr>>, kernel: impl Into<Rc<HExpr>>, source: Option<CodeSource>) -> Self {
        HExpr::top(
            Top::Convol {
                fmap: fmap.into(),
                kernel: kernel.into(),
            },
            source,
        )
    }

    pub fn convolp(fmap: impl Into<Rc<HExpr>>, kernel: impl Into<Rc<HExpr>>, source: Option<CodeSource>) -> Self {
        HExpr::top(
            Top::Convolp {
                fmap: fmap.into(),
                kernel: kernel.into(),
            },
            source,
        )
    }

    pub fn pool(
        op: PoolType,
        base: impl Into<Rc<HExpr>>,
        height: i64,
        width: i64,
        source: Option<CodeSource>,
    ) -> Self {
        HExpr::top(
            Top::Pool {
                op,
                base: base.into(),
                height,
                width,
            },
            source,
        )
    }

    pub fn map(op: UopType, base: impl Into<Rc<HExpr>>, source: Option<CodeSource>) -> Self {
        HExpr::top(Top::Map { op, base: base.into() }, source)
    }

    /// Shape of a tensor placeholder or constant
    pub fn shape(&self) -> Option<&ExpShape> {
        match &self.kind {
            HExprKind::VarTensor { shape, .. } | HExprKind::ConstTensor { shape } => Some(shape),
            _ => None,
        }
    }

    /// Contents of a constant tensor. Constant payloads are not modelled, so
    /// this always reports the stub.
    pub fn const_payload(&self) -> Result<Vec<f64>, AnalysisError> {
        match &self.kind {
            HExprKind::ConstTensor { .. } => Err(AnalysisError::NotImplemented("constant tensor payload".to_string())),
            _ => Err(AnalysisError::NotATensorConstant(self.to_string())),
        }
    }

    /// Rename tensor placeholders through `name2path`.
    ///
    /// A placeholder whose name is mapped takes the qualified path and keeps its
    /// kind; any other placeholder becomes a cipher with a fresh name. Returns a
    /// new graph.
    pub fn name_resolve(&self, name2path: &FxHashMap<String, String>, ids: &IdSource) -> HExpr {
        let kind = match &self.kind {
            HExprKind::VarTensor { kind, name, shape } => match name2path.get(name) {
                Some(path) => HExprKind::VarTensor {
                    kind: *kind,
                    name: path.clone(),
                    shape: shape.clone(),
                },
                None => HExprKind::VarTensor {
                    kind: TensorKind::Cipher,
                    name: ids.next_cipher_name(),
                    shape: shape.clone(),
                },
            },
            HExprKind::Let { bindings, scope } => HExprKind::Let {
                bindings: bindings
                    .iter()
                    .map(|(name, e)| (name.clone(), Rc::new(e.name_resolve(name2path, ids))))
                    .collect(),
                scope: Rc::new(scope.name_resolve(name2path, ids)),
            },
            HExprKind::Top(top) => HExprKind::Top(top.name_resolve(name2path, ids)),
            HExprKind::Nat(_) | HExprKind::Var(_) | HExprKind::ConstTensor { .. } => self.kind.clone(),
        };
        HExpr::new(kind, self.source.clone())
    }

    /// Printed form, one entry per line
    pub fn to_lines(&self) -> Vec<String> {
        match &self.kind {
            HExprKind::Nat(n) => vec![n.to_string()],
            HExprKind::Var(ident) => vec![ident.clone()],
            HExprKind::VarTensor { kind, name, shape } => {
                let kind = match kind {
                    TensorKind::Plain => "plain",
                    TensorKind::Cipher => "cipher",
                };
                vec![format!("{} {}:{}", kind, name, shape)]
            }
            HExprKind::ConstTensor { shape } => vec![format!("const {}", shape)],
            HExprKind::Let { bindings, scope } => {
                let mut operands = Vec::new();
                for (name, e) in bindings {
                    operands.push(format!("{} =", name));
                    operands.extend(indent(e.to_lines()));
                }
                let mut lines = prefix("let", operands);
                lines.extend(prefix("in", scope.to_lines()));
                lines
            }
            HExprKind::Top(top) => top.to_lines(),
        }
    }
}

impl Top {
    fn name_resolve(&self, name2path: &FxHashMap<String, String>, ids: &IdSource) -> Top {
        let r = |e: &Rc<HExpr>| Rc::new(e.name_resolve(name2path, ids));
        match self {
            Top::Bop { op, left, right } => Top::Bop {
                op: *op,
                left: r(left),
                right: r(right),
            },
            Top::Matmul { left, right } => Top::Matmul {
                left: r(left),
                right: r(right),
            },
            Top::Concat { left, axis, right } => Top::Concat {
                left: r(left),
                axis: *axis,
                right: r(right),
            },
            Top::Reshape { base, shape } => Top::Reshape {
                base: r(base),
                shape: shape.clone(),
            },
            Top::Transpose { base, dim0, dim1 } => Top::Transpose {
                base: r(base),
                dim0: *dim0,
                dim1: *dim1,
            },
            Top::Max { base } => Top::Max { base: r(base) },
            Top::Maxr { base, axis } => Top::Maxr {
                base: r(base),
                axis: *axis,
            },
            Top::Argmaxr { base, axis } => Top::Argmaxr {
                base: r(base),
                axis: *axis,
            },
            Top::Sumr { base, axis } => Top::Sumr {
                base: r(base),
                axis: *axis,
            },
            Top::Convol { fmap, kernel } => Top::Convol {
                fmap: r(fmap),
                kernel: r(kernel),
            },
            Top::Convolp { fmap, kernel } => Top::Convolp {
                fmap: r(fmap),
                kernel: r(kernel),
            },
            Top::Pool {
                op,
                base,
                height,
                width,
            } => Top::Pool {
                op: *op,
                base: r(base),
                height: *height,
                width: *width,
            },
            Top::Map { op, base } => Top::Map { op: *op, base: r(base) },
        }
    }

    fn to_lines(&self) -> Vec<String> {
        let mut operands = Vec::new();
        let keyword = match self {
            Top::Bop { op, left, right } => {
                let mut lines = left.to_lines();
                lines.push(op.keyword().to_string());
                lines.extend(right.to_lines());
                return lines;
            }
            Top::Matmul { left, right } => {
                operands.extend(left.to_lines());
                operands.extend(right.to_lines());
                "matmul"
            }
            Top::Concat { left, axis, right } => {
                operands.extend(left.to_lines());
                operands.push(axis.to_string());
                operands.extend(right.to_lines());
                "concat"
            }
            Top::Reshape { base, shape } => {
                operands.extend(base.to_lines());
                operands.push(shape.to_string());
                "reshape"
            }
            Top::Transpose { base, dim0, dim1 } => {
                operands.extend(base.to_lines());
                operands.push(dim0.to_string());
                operands.push(dim1.to_string());
                "transpose"
            }
            Top::Max { base } => {
                operands.extend(base.to_lines());
                "max"
            }
            Top::Maxr { base, axis } => {
                operands.extend(base.to_lines());
                operands.push(axis.to_string());
                "maxr"
            }
            Top::Argmaxr { base, axis } => {
                operands.extend(base.to_lines());
                operands.push(axis.to_string());
                "argmaxr"
            }
            Top::Sumr { base, axis } => {
                operands.extend(base.to_lines());
                operands.push(axis.to_string());
                "sumr"
            }
            Top::Convol { fmap, kernel } => {
                operands.extend(fmap.to_lines());
                operands.extend(kernel.to_lines());
                "convol"
            }
            Top::Convolp { fmap, kernel } => {
                operands.extend(fmap.to_lines());
                operands.extend(kernel.to_lines());
                "convolp"
            }
            Top::Pool {
                op,
                base,
                height,
                width,
            } => {
                operands.extend(base.to_lines());
                operands.push(height.to_string());
                operands.push(width.to_string());
                op.keyword()
            }
            Top::Map { op, base } => {
                operands.extend(base.to_lines());
                op.keyword()
            }
        };
        prefix(keyword, operands)
    }
}

fn indent(lines: Vec<String>) -> Vec<String> {
    lines.into_iter().map(|l| format!("{}{}", INDENT, l)).collect()
}

fn prefix(keyword: &str, operands: Vec<String>) -> Vec<String> {
    let mut lines = vec![keyword.to_string()];
    lines.extend(indent(operands));
    lines
}

impl fmt::Display for HExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lines().join("\n"))
    }
}
