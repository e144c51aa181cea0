//! `h` library: tensor-operation graph construction
//!
//! Each call checks its operands and appends one node to the operation graph
//! of its tensor arguments. A wrong number of arguments degrades the result to
//! a tensor of unknown shape with a warning; an operand of the wrong kind fails
//! the path.

use std::rc::Rc;

use super::{ExplicitParams, LibCallRegistry};
use crate::common::CodeSource;
use crate::interp::context::{Context, ContextSet};
use crate::interp::hexpr::{BopType, HExpr, PoolType, UopType};
use crate::interp::heap::Heap;
use crate::interp::symbolic::ExpShape;
use crate::interp::value::{FloatValue, LENGTH_ATTR, Value, fetch_addr};

/// Register every `h` operation as `h.<name>`
pub fn register(registry: &mut LibCallRegistry) {
    registry.register("h.plain", plain);
    registry.register("h.matmul", matmul);
    registry.register("h.add", add);
    registry.register("h.sub", sub);
    registry.register("h.mul", mul);
    registry.register("h.maxt", maxt);
    registry.register("h.concat", concat);
    registry.register("h.reshape", reshape);
    registry.register("h.transpose", transpose);
    registry.register("h.max", max);
    registry.register("h.maxr", maxr);
    registry.register("h.argmaxr", argmaxr);
    registry.register("h.sumr", sumr);
    registry.register("h.convol", convol);
    registry.register("h.convolp", convolp);
    registry.register("h.maxpool", maxpool);
    registry.register("h.maxpoolp", maxpoolp);
    registry.register("h.averagepool", averagepool);
    registry.register("h.averagepoolp", averagepoolp);
    registry.register("h.relu", relu);
    registry.register("h.sigmoid", sigmoid);
    registry.register("h.rtangent", rtangent);
}

/// Early exit of an operand check: the already-failed path
type Checked<T> = Result<T, ContextSet<Value>>;

/// Operand checks of one library call
struct Operands<'a> {
    name: &'static str,
    ctx: &'a Context<ExplicitParams>,
    source: &'a Option<CodeSource>,
}

impl Operands<'_> {
    fn heap(&self) -> &Heap {
        self.ctx.heap()
    }

    fn fail(&self, message: String) -> ContextSet<Value> {
        self.ctx
            .clone()
            .fail_with_msg(format!("from 'LibCall.h.{}': {}", self.name, message), self.source.clone())
            .to_set()
    }

    /// Graph of a tensor operand
    fn tensor(&self, param: &Value) -> Checked<Rc<HExpr>> {
        match fetch_addr(param, self.heap()) {
            Value::Tensor(t) => t.graph.ok_or_else(|| self.fail("got invalid tensor".to_string())),
            _ => Err(self.fail(format!("got invalid tensor: {}", param))),
        }
    }

    /// Right operand of an element-wise op: a tensor or a known number
    fn operand(&self, param: &Value) -> Checked<Rc<HExpr>> {
        let invalid = || self.fail(format!("got invalid number: {}", param));
        match fetch_addr(param, self.heap()) {
            Value::Tensor(t) => t.graph.ok_or_else(|| self.fail("got invalid argument".to_string())),
            Value::Int(n) => n
                .as_const()
                .map(|n| Rc::new(HExpr::nat(n, self.source.clone())))
                .ok_or_else(invalid),
            Value::Float(FloatValue::Lit(f)) if f.fract() == 0.0 => {
                Ok(Rc::new(HExpr::nat(f as i64, self.source.clone())))
            }
            Value::Float(_) => Err(invalid()),
            _ => Err(self.fail(format!("got invalid tensor: {}", param))),
        }
    }

    /// Constant integer operand; `what` names it in the failure message
    fn int(&self, param: &Value, what: &str) -> Checked<i64> {
        match fetch_addr(param, self.heap()) {
            Value::Int(n) => n.as_const().ok_or_else(|| self.fail(format!("got invalid {}", what))),
            _ => Err(self.fail(format!("got invalid {}: {}", what, param))),
        }
    }

    /// Target shape of a reshape: a shaped object or one with a shaped `shape`
    fn shape(&self, param: &Value) -> Checked<ExpShape> {
        shaped_arg(param, self.heap()).ok_or_else(|| self.fail(format!("got invalid shape: {}", param)))
    }
}

/// Check the argument count, then build the result graph with `build`
fn graph_call(
    name: &'static str,
    arity: usize,
    ctx: Context<ExplicitParams>,
    source: Option<CodeSource>,
    build: impl FnOnce(&Operands<'_>, &[Value]) -> Checked<HExpr>,
) -> ContextSet<Value> {
    let params = ctx.ret_val().params.clone();
    if params.len() != arity {
        return ctx
            .warn_tensor_with_msg(
                format!("from 'LibCall.h.{}': got insufficient number of argument: {}", name, params.len()),
                source,
            )
            .to_set();
    }

    let operands = Operands {
        name,
        ctx: &ctx,
        source: &source,
    };
    match build(&operands, &params) {
        Ok(graph) => {
            let value = Value::tensor(graph, source.clone());
            ctx.set_ret_val(value).to_set()
        }
        Err(failed) => failed,
    }
}

/// Fresh plain tensor.
///
/// The single parameter is the argument tuple of a tensor constructor. Its
/// first element may carry a shape, or be a nested list of numbers whose
/// structure gives the shape; otherwise the arguments are read as a size.
pub fn plain(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    let params = ctx.ret_val().params.clone();
    let [args] = params.as_slice() else {
        return ctx
            .warn_tensor_with_msg(
                format!("from 'LibCall.h.plain': got insufficient number of argument: {}", params.len()),
                source,
            )
            .to_set();
    };

    let heap = ctx.heap();
    let first = fetch_addr(args, heap).as_object().and_then(|obj| obj.get_indice(0).cloned());
    if let Some(shape) = first.and_then(|first| shaped_arg(&first, heap).or_else(|| nested_shape(&first, heap))) {
        let graph = HExpr::plain(ctx.ids(), shape, source.clone());
        return ctx.set_ret_val(Value::tensor(graph, source)).to_set();
    }

    ctx.parse_size(&params).map(|ctx| match ctx.ret_val().clone() {
        Ok(shape) => {
            let graph = HExpr::plain(ctx.ids(), shape, source.clone());
            ctx.set_ret_val(Value::tensor(graph, source.clone()))
        }
        Err(message) => ctx.warn_tensor_with_msg(message, source.clone()),
    })
}

/// Shape carried by an object itself or by its `shape` attribute
fn shaped_arg(arg: &Value, heap: &Heap) -> Option<ExpShape> {
    let fetched = fetch_addr(arg, heap);
    let obj = fetched.as_object()?;
    if let Some(shape) = &obj.shape {
        return Some(shape.clone());
    }
    let attr = fetch_addr(obj.get_attr("shape")?, heap);
    attr.as_object()?.shape.clone()
}

/// Shape of a nested list of numbers, read along the first element of each level
fn nested_shape(arg: &Value, heap: &Heap) -> Option<ExpShape> {
    let mut dims = Vec::new();
    let mut current = fetch_addr(arg, heap);
    while let Value::Object(obj) = current {
        match fetch_addr(obj.get_attr(LENGTH_ATTR)?, heap) {
            Value::Int(len) => dims.push(len.to_exp()),
            _ => return None,
        }
        current = fetch_addr(obj.get_indice(0)?, heap);
    }
    match current {
        Value::Int(_) | Value::Float(_) if !dims.is_empty() => Some(ExpShape::from_const(dims)),
        _ => None,
    }
}

fn elementwise(
    name: &'static str,
    op: BopType,
    ctx: Context<ExplicitParams>,
    source: Option<CodeSource>,
) -> ContextSet<Value> {
    graph_call(name, 2, ctx, source, |o, p| {
        Ok(HExpr::bop(op, o.tensor(&p[0])?, o.operand(&p[1])?, o.source.clone()))
    })
}

pub fn add(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    elementwise("add", BopType::Add, ctx, source)
}

pub fn sub(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    elementwise("sub", BopType::Sub, ctx, source)
}

pub fn mul(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    elementwise("mul", BopType::Mul, ctx, source)
}

/// Element-wise maximum of two tensors
pub fn maxt(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("maxt", 2, ctx, source, |o, p| {
        Ok(HExpr::bop(BopType::Max, o.tensor(&p[0])?, o.tensor(&p[1])?, o.source.clone()))
    })
}

pub fn matmul(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("matmul", 2, ctx, source, |o, p| {
        Ok(HExpr::matmul(o.tensor(&p[0])?, o.tensor(&p[1])?, o.source.clone()))
    })
}

/// Parameters: left tensor, axis, right tensor
pub fn concat(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("concat", 3, ctx, source, |o, p| {
        let left = o.tensor(&p[0])?;
        let axis = o.int(&p[1], "axis")?;
        let right = o.tensor(&p[2])?;
        Ok(HExpr::concat(left, axis, right, o.source.clone()))
    })
}

/// The element count of the target shape is not checked
pub fn reshape(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("reshape", 2, ctx, source, |o, p| {
        let base = o.tensor(&p[0])?;
        let shape = o.shape(&p[1])?;
        Ok(HExpr::reshape(base, shape, o.source.clone()))
    })
}

pub fn transpose(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("transpose", 3, ctx, source, |o, p| {
        let base = o.tensor(&p[0])?;
        let dim0 = o.int(&p[1], "axis")?;
        let dim1 = o.int(&p[2], "axis")?;
        Ok(HExpr::transpose(base, dim0, dim1, o.source.clone()))
    })
}

pub fn max(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("max", 1, ctx, source, |o, p| Ok(HExpr::max(o.tensor(&p[0])?, o.source.clone())))
}

fn reduction(
    name: &'static str,
    ctx: Context<ExplicitParams>,
    source: Option<CodeSource>,
    build: fn(Rc<HExpr>, i64, Option<CodeSource>) -> HExpr,
) -> ContextSet<Value> {
    graph_call(name, 2, ctx, source, |o, p| {
        let base = o.tensor(&p[0])?;
        let axis = o.int(&p[1], "axis")?;
        Ok(build(base, axis, o.source.clone()))
    })
}

pub fn maxr(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    reduction("maxr", ctx, source, HExpr::maxr)
}

pub fn argmaxr(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    reduction("argmaxr", ctx, source, HExpr::argmaxr)
}

pub fn sumr(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    reduction("sumr", ctx, source, HExpr::sumr)
}

/// Parameters: feature map, kernel
pub fn convol(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("convol", 2, ctx, source, |o, p| {
        Ok(HExpr::convol(o.tensor(&p[0])?, o.tensor(&p[1])?, o.source.clone()))
    })
}

/// Padded convolution
pub fn convolp(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call("convolp", 2, ctx, source, |o, p| {
        Ok(HExpr::convolp(o.tensor(&p[0])?, o.tensor(&p[1])?, o.source.clone()))
    })
}

/// Parameters: feature map, kernel height, kernel width
fn pool(
    name: &'static str,
    op: PoolType,
    ctx: Context<ExplicitParams>,
    source: Option<CodeSource>,
) -> ContextSet<Value> {
    graph_call(name, 3, ctx, source, |o, p| {
        let base = o.tensor(&p[0])?;
        let height = o.int(&p[1], "kernel height")?;
        let width = o.int(&p[2], "kernel width")?;
        Ok(HExpr::pool(op, base, height, width, o.source.clone()))
    })
}

pub fn maxpool(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    pool("maxpool", PoolType::Max, ctx, source)
}

pub fn maxpoolp(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    pool("maxpoolp", PoolType::MaxPadded, ctx, source)
}

pub fn averagepool(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    pool("averagepool", PoolType::Average, ctx, source)
}

pub fn averagepoolp(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    pool("averagepoolp", PoolType::AveragePadded, ctx, source)
}

fn map(name: &'static str, op: UopType, ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    graph_call(name, 1, ctx, source, |o, p| Ok(HExpr::map(op, o.tensor(&p[0])?, o.source.clone())))
}

pub fn relu(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    map("relu", UopType::Relu, ctx, source)
}

pub fn sigmoid(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    map("sigmoid", UopType::Sigmoid, ctx, source)
}

/// Hyperbolic tangent
pub fn rtangent(ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
    map("rtangent", UopType::Rtangent, ctx, source)
}
