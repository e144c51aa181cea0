//! Path-sensitive interpreter over the statement IR
//!
//! Statements run on a `ContextSet<Flow>` and expressions yield a
//! `ContextSet<Value>`. A condition that cannot be decided forks the path into
//! both branches; every other statement maps paths one to one.

use std::rc::Rc;

use tracing::debug;

use super::context::{CallFrame, Context, ContextSet};
use super::heap::{Address, Heap};
use super::ir::{ConstValue, LibCallType, TEBopType, TEUopType, ThExpr, ThExprKind, ThStmt, ThStmtKind};
use super::libcall::{ExplicitParams, LibCallRegistry};
use super::symbolic::{ExpNum, NumBopType};
use super::value::{FloatValue, Func, IntValue, LENGTH_ATTR, MRO_ATTR, Object, Value, fetch_addr};
use crate::common::CodeSource;

/// Control-flow state of a path after a statement
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    Run,
    Continue,
    Break,
    Return(Value),
}

/// Longest string a repetition may build
const MAX_STRING_LEN: usize = 1 << 20;

/// Outcome of an operator that did not produce a value
enum OpError {
    /// Fails the path
    Invalid(String),
    /// Warns and answers `Undef`
    Unknown(String),
}

/// Tree-walking interpreter over context sets
pub struct Interpreter {
    libcalls: LibCallRegistry,
}

impl Interpreter {
    /// Create an interpreter with every standard library call
    pub fn new() -> Self {
        Interpreter {
            libcalls: LibCallRegistry::new(),
        }
    }

    pub fn with_registry(libcalls: LibCallRegistry) -> Self {
        Interpreter { libcalls }
    }

    pub fn registry(&self) -> &LibCallRegistry {
        &self.libcalls
    }

    /// Run a program. Each path answers its returned value, or `None`.
    pub fn run<T>(&self, ctx: Context<T>, stmt: &ThStmt) -> ContextSet<Value> {
        self.run_stmt(ctx.set_ret_val(Flow::Run), stmt).map(|ctx| {
            let value = match ctx.ret_val() {
                Flow::Return(value) => value.clone(),
                _ => Value::None(stmt.source.clone()),
            };
            ctx.set_ret_val(value)
        })
    }

    /// Execute a statement
    pub fn run_stmt(&self, ctx: Context<Flow>, stmt: &ThStmt) -> ContextSet<Flow> {
        let source = stmt.source.clone();
        match &stmt.kind {
            ThStmtKind::Pass => ctx.set_ret_val(Flow::Run).to_set(),

            ThStmtKind::Expr(expr) => self.eval_expr(ctx, expr).set_ret_val(Flow::Run),

            ThStmtKind::Seq(first, rest) => self.run_stmt(ctx, first).flat_map(|ctx| match ctx.ret_val() {
                Flow::Run => self.run_stmt(ctx, rest),
                _ => ctx.to_set(),
            }),

            ThStmtKind::Assign { target, value } => self
                .eval_expr(ctx, value)
                .flat_map(|ctx| self.assign(ctx, target))
                .set_ret_val(Flow::Run),

            ThStmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.eval_expr(ctx, cond).flat_map(|ctx| match truthy(ctx.ret_val(), ctx.heap()) {
                Some(true) => self.run_stmt(ctx.set_ret_val(Flow::Run), then_branch),
                Some(false) => self.run_stmt(ctx.set_ret_val(Flow::Run), else_branch),
                None => {
                    debug!(cond = %ctx.ret_val(), "forking on unknown condition");
                    let ctx = ctx
                        .add_log(format!("unknown condition: {}", cond), source.clone())
                        .set_ret_val(Flow::Run);
                    self.run_stmt(ctx.clone(), then_branch)
                        .join(self.run_stmt(ctx, else_branch))
                }
            }),

            ThStmtKind::ForIn { ident, iter, body } => self
                .eval_expr(ctx, iter)
                .flat_map(|ctx| self.run_loop(ctx, ident, body, source.clone())),

            ThStmtKind::Return(expr) => self.eval_expr(ctx, expr).map(|ctx| {
                let value = ctx.ret_val().clone();
                ctx.set_ret_val(Flow::Return(value))
            }),

            ThStmtKind::Continue => ctx.set_ret_val(Flow::Continue).to_set(),

            ThStmtKind::Break => ctx.set_ret_val(Flow::Break).to_set(),

            ThStmtKind::Let { name, value, scope } => {
                let bound = match value {
                    Some(value) => self.eval_expr(ctx, value),
                    None => ctx.set_ret_val(Value::Undef(source.clone())).to_set(),
                };
                bound.flat_map(|ctx| {
                    let value = ctx.ret_val().clone();
                    let (addr, heap) = ctx.heap().alloc(value, source.as_ref());
                    let env = ctx.env().set(name.clone(), addr);
                    self.run_stmt(ctx.set_heap(heap).set_env(env).set_ret_val(Flow::Run), scope)
                })
            }

            ThStmtKind::FunDef {
                name,
                params,
                body,
                scope,
            } => {
                // bound before the closure is built so that the body can recurse;
                // a declared name keeps its slot so earlier closures see the function
                let (addr, heap, env) = match ctx.env().get(name) {
                    Some(addr) => (addr, ctx.heap().clone(), ctx.env().clone()),
                    None => {
                        let (addr, heap) = ctx.heap().malloc(source.as_ref());
                        (addr, heap, ctx.env().set(name.clone(), addr))
                    }
                };
                let func = Func::new(
                    ctx.ids(),
                    name.clone(),
                    params.clone(),
                    Some(body.clone()),
                    Some(env.clone()),
                    source,
                );
                let heap = heap.set_val(addr, Value::Func(Rc::new(func)));
                self.run_stmt(ctx.set_heap(heap).set_env(env), scope)
            }
        }
    }

    /// Iterate over the object in the current result. Only a concrete length
    /// can be unrolled.
    fn run_loop(&self, ctx: Context<Value>, ident: &str, body: &ThStmt, source: Option<CodeSource>) -> ContextSet<Flow> {
        let iterable = ctx.ret_val().clone();
        let fetched = fetch_addr(&iterable, ctx.heap());
        if fetched.is_error() {
            return ctx.set_ret_val(Flow::Run).to_set();
        }
        let Some(len) = fetched.as_object().and_then(|obj| obj.length()) else {
            return ctx
                .warn_with_msg(
                    format!("cannot iterate over {} of unknown length", fetched.type_name()),
                    source,
                )
                .set_ret_val(Flow::Run)
                .to_set();
        };

        let mut running = ctx.set_ret_val(Flow::Run).to_set();
        let mut finished = ContextSet::empty();
        for i in 0..len {
            let step = running.flat_map(|ctx| {
                let item = ctx.get_indice_deep(&iterable, i, source.clone()).into_ret_val();
                self.run_stmt(bind_name(ctx, ident, item, source.as_ref()), body)
            });
            let (exited, rest) = step.partition(|ctx| matches!(ctx.ret_val(), Flow::Break | Flow::Return(_)));
            finished = finished.join(exited.map(|ctx| match ctx.ret_val() {
                Flow::Break => ctx.set_ret_val(Flow::Run),
                _ => ctx,
            }));
            running = rest.set_ret_val(Flow::Run);
            if running.live().is_empty() {
                break;
            }
        }
        finished.join(running)
    }

    /// Store the current result into `target`
    fn assign(&self, ctx: Context<Value>, target: &ThExpr) -> ContextSet<Value> {
        let value = ctx.ret_val().clone();
        let source = target.source.clone();
        match &target.kind {
            ThExprKind::Name(ident) => bind_name(ctx, ident, value, source.as_ref()).to_set(),

            ThExprKind::Attr { base, attr } => self.eval_expr(ctx, base).map(|ctx| {
                match fetch_addr(ctx.ret_val(), ctx.heap()) {
                    Value::Object(obj) => {
                        let obj = obj.set_attr(attr.clone(), value.clone());
                        let heap = ctx.heap().set_val(obj.addr, Value::Object(Rc::new(obj)));
                        ctx.set_heap(heap).set_ret_val(Value::None(source.clone()))
                    }
                    other => ctx.fail_with_msg(
                        format!("cannot set attribute '{}' of {}", attr, other.type_name()),
                        source.clone(),
                    ),
                }
            }),

            ThExprKind::Subscr { base, index } => self.eval_pair(ctx, base, index).map(|ctx| {
                let (base, index) = ctx.ret_val().clone();
                let heap = ctx.heap();
                let obj = match fetch_addr(&base, heap) {
                    Value::Object(obj) => obj,
                    other => {
                        return ctx.fail_with_msg(
                            format!("{} does not support item assignment", other.type_name()),
                            source.clone(),
                        );
                    }
                };
                let updated = match fetch_addr(&index, heap) {
                    Value::Int(n) => match n.as_const() {
                        Some(i) => obj.set_indice(normalize_index(&obj, i), value.clone()),
                        None => {
                            return ctx
                                .warn_with_msg(format!("assignment through symbolic index {}", n.to_exp()), source.clone());
                        }
                    },
                    Value::String(key) => obj.set_key_val(key, value.clone()),
                    other => {
                        return ctx.fail_with_msg(
                            format!("invalid subscript of type {} in assignment", other.type_name()),
                            source.clone(),
                        );
                    }
                };
                let heap = heap.set_val(updated.addr, Value::Object(Rc::new(updated)));
                ctx.set_heap(heap).set_ret_val(Value::None(source.clone()))
            }),

            _ => ctx.fail_with_msg("invalid assignment target", source).to_set(),
        }
    }

    /// Evaluate an expression
    pub fn eval_expr<T: Clone>(&self, ctx: Context<T>, expr: &ThExpr) -> ContextSet<Value> {
        let source = expr.source.clone();
        match &expr.kind {
            ThExprKind::Const(value) => ctx.set_ret_val(const_value(value, source)).to_set(),

            ThExprKind::Object => {
                let (_, addr, heap) = Object::create(ctx.ids(), ctx.heap(), source);
                ctx.set_heap(heap).set_ret_val(Value::Addr(addr)).to_set()
            }

            ThExprKind::Tuple(items) => self.eval_all(ctx, items.iter()).map(|ctx| {
                let values = ctx.ret_val().clone();
                let (_, addr, ctx) = ctx.gen_tuple(values, source.clone());
                ctx.set_ret_val(Value::Addr(addr))
            }),

            ThExprKind::Name(ident) => match ctx.env().get(ident) {
                Some(addr) => {
                    let value = ctx.heap().get_val(addr);
                    ctx.set_ret_val(value).to_set()
                }
                None => ctx
                    .fail_with_msg(format!("name '{}' is not defined", ident), source)
                    .to_set(),
            },

            ThExprKind::Attr { base, attr } => self.eval_expr(ctx, base).map(|ctx| {
                let base = ctx.ret_val().clone();
                if base.is_error() {
                    return ctx;
                }
                let found = ctx.get_attr_deep(&base, attr, source.clone());
                if let Value::Undef(_) = found.ret_val() {
                    let kind = fetch_addr(&base, found.heap()).type_name();
                    return found.fail_with_msg(format!("{} has no attribute '{}'", kind, attr), source.clone());
                }
                found
            }),

            ThExprKind::Subscr { base, index } => self.eval_pair(ctx, base, index).map(|ctx| {
                let (base, index) = ctx.ret_val().clone();
                subscript(ctx, &base, &index, source.clone())
            }),

            ThExprKind::Call { func, args } => self.eval_expr(ctx, func).flat_map(|ctx| {
                let callee = ctx.ret_val().clone();
                self.eval_all(ctx, args.iter()).flat_map(|ctx| {
                    let args = ctx.ret_val().clone();
                    self.call_value(ctx, &callee, args, source.clone())
                })
            }),

            ThExprKind::LibCall { kind, params } => self
                .eval_all(ctx, params.iter().map(|(_, param)| param))
                .flat_map(|ctx| self.libcall(ctx, *kind, params, source.clone())),

            ThExprKind::BinOp {
                op: op @ (TEBopType::And | TEBopType::Or),
                left,
                right,
            } => self.eval_short_circuit(ctx, *op, left, right, source),

            ThExprKind::BinOp { op, left, right } => self.eval_pair(ctx, left, right).map(|ctx| {
                let (left, right) = ctx.ret_val().clone();
                binop(ctx, *op, left, right, source.clone())
            }),

            ThExprKind::UnaryOp { op, base } => self.eval_expr(ctx, base).map(|ctx| {
                let value = ctx.ret_val().clone();
                unop(ctx, *op, value, source.clone())
            }),
        }
    }

    /// Evaluate expressions left to right, collecting their values
    fn eval_all<'e, T: Clone>(
        &self,
        ctx: Context<T>,
        exprs: impl IntoIterator<Item = &'e ThExpr>,
    ) -> ContextSet<Vec<Value>> {
        let mut set = ctx.set_ret_val(Vec::new()).to_set();
        for expr in exprs {
            set = set.flat_map(|ctx| {
                let done: Vec<Value> = ctx.ret_val().clone();
                self.eval_expr(ctx, expr).map(|ctx| {
                    let mut values = done.clone();
                    values.push(ctx.ret_val().clone());
                    ctx.set_ret_val(values)
                })
            });
        }
        set
    }

    fn eval_pair<T: Clone>(&self, ctx: Context<T>, left: &ThExpr, right: &ThExpr) -> ContextSet<(Value, Value)> {
        self.eval_expr(ctx, left).flat_map(|ctx| {
            let left = ctx.ret_val().clone();
            self.eval_expr(ctx, right).map(|ctx| {
                let right = ctx.ret_val().clone();
                ctx.set_ret_val((left.clone(), right))
            })
        })
    }

    /// `and` stops on a falsy left operand and `or` on a truthy one; only
    /// otherwise is the right operand evaluated. An undecidable left operand
    /// forks, continuing paths first for `and`.
    fn eval_short_circuit<T: Clone>(
        &self,
        ctx: Context<T>,
        op: TEBopType,
        left: &ThExpr,
        right: &ThExpr,
        source: Option<CodeSource>,
    ) -> ContextSet<Value> {
        let stops_on = op == TEBopType::Or;
        self.eval_expr(ctx, left).flat_map(|ctx| {
            if fetch_addr(ctx.ret_val(), ctx.heap()).is_error() {
                return ctx.to_set();
            }
            match truthy(ctx.ret_val(), ctx.heap()) {
                Some(decides) if decides == stops_on => ctx.to_set(),
                Some(_) => self.eval_expr(ctx, right),
                None => {
                    debug!(cond = %left, "forking on unknown operand of {}", op.symbol());
                    let ctx = ctx.add_log(format!("unknown condition: {}", left), source.clone());
                    let stopped = ctx.clone().to_set();
                    let continued = self.eval_expr(ctx, right);
                    match op {
                        TEBopType::And => continued.join(stopped),
                        _ => stopped.join(continued),
                    }
                }
            }
        })
    }

    /// Call a function, a class, or an object with `__call__`
    pub fn call_value<T: Clone>(
        &self,
        ctx: Context<T>,
        callee: &Value,
        args: Vec<Value>,
        source: Option<CodeSource>,
    ) -> ContextSet<Value> {
        match fetch_addr(callee, ctx.heap()) {
            Value::Func(func) => self.call_func(ctx, func, args, source),
            Value::Object(obj) if is_class(&obj, ctx.heap()) => self.instantiate(ctx, &obj, args, source),
            Value::Object(obj) => {
                let method = ctx
                    .get_attr_deep(&Value::Addr(obj.addr), "__call__", source.clone())
                    .into_ret_val();
                match fetch_addr(&method, ctx.heap()) {
                    Value::Func(func) => self.call_func(ctx, func, args, source),
                    _ => ctx.fail_with_msg("object is not callable", source).to_set(),
                }
            }
            error @ Value::Error(_) => ctx.set_ret_val(error).to_set(),
            other => ctx
                .fail_with_msg(format!("{} is not callable", other.type_name()), source)
                .to_set(),
        }
    }

    fn call_func<T: Clone>(
        &self,
        ctx: Context<T>,
        func: Rc<Func>,
        args: Vec<Value>,
        source: Option<CodeSource>,
    ) -> ContextSet<Value> {
        let depth = ctx
            .call_stack()
            .iter()
            .filter(|(frame, _)| matches!(frame, CallFrame::Func(_)))
            .count();
        if depth >= ctx.session().config().max_call_depth {
            return ctx
                .fail_with_msg(
                    format!("maximum call depth {} exceeded calling '{}'", depth, func.name),
                    source,
                )
                .to_set();
        }
        let Some(body) = func.body.clone() else {
            let reason = format!("function '{}' has no body", func.name);
            return ctx
                .warn_with_msg(reason.clone(), source.clone())
                .set_ret_val(Value::not_impl(reason, source))
                .to_set();
        };

        let positional = func.params.len() - func.key_only_num.min(func.params.len());
        if args.len() > positional && func.varargs_param.is_none() {
            return ctx
                .fail_with_msg(
                    format!(
                        "{}() takes {} positional arguments but {} were given",
                        func.name,
                        positional,
                        args.len()
                    ),
                    source,
                )
                .to_set();
        }

        let caller_env = ctx.env().clone();
        let mut env = func.env.clone().unwrap_or_default();
        let mut heap = ctx.heap().clone();
        let mut slots: Vec<Address> = Vec::new();
        let mut args = args.into_iter();
        for (i, param) in func.params.iter().enumerate() {
            let arg = if i < positional { args.next() } else { None };
            let Some(value) = arg.or_else(|| func.defaults.get(param).cloned()) else {
                return ctx
                    .fail_with_msg(format!("{}() missing required argument '{}'", func.name, param), source)
                    .to_set();
            };
            let (addr, next) = heap.alloc(value, source.as_ref());
            heap = next;
            env = env.set(param.clone(), addr);
            slots.push(addr);
        }

        let mut ctx = ctx.set_heap(heap);
        if let Some(name) = &func.varargs_param {
            let (_, tuple, next) = ctx.gen_tuple(args.collect(), source.clone());
            let (slot, heap) = next.heap().alloc(Value::Addr(tuple), source.as_ref());
            ctx = next.set_heap(heap);
            env = env.set(name.clone(), slot);
            slots.push(slot);
        }
        if let Some(name) = &func.kwargs_param {
            let (_, dict, next) = ctx.gen_dict(Vec::new(), source.clone());
            let (slot, heap) = next.heap().alloc(Value::Addr(dict), source.as_ref());
            ctx = next.set_heap(heap);
            env = env.set(name.clone(), slot);
            slots.push(slot);
        }

        let ctx = ctx
            .push_call_stack(CallFrame::Func(func.clone()), source.clone())
            .set_env(env)
            .set_ret_val(Flow::Run);
        self.run_stmt(ctx, &body).map(|ctx| {
            let value = match ctx.ret_val() {
                Flow::Return(value) => value.clone(),
                _ => Value::None(source.clone()),
            };
            let mut ctx = ctx.pop_call_stack().set_env(caller_env.clone());
            // parameter slots are unreachable once no closure captured them
            if !func.has_closure {
                let heap = slots.iter().fold(ctx.heap().clone(), |heap, addr| heap.free(*addr));
                ctx = ctx.set_heap(heap);
            }
            ctx.set_ret_val(value)
        })
    }

    /// Create an instance of `class` and run its `__init__`, if any
    fn instantiate<T: Clone>(
        &self,
        ctx: Context<T>,
        class: &Object,
        args: Vec<Value>,
        source: Option<CodeSource>,
    ) -> ContextSet<Value> {
        let (inst, inst_addr, heap) = Object::create(ctx.ids(), ctx.heap(), source.clone());
        let inst = match class.get_attr(MRO_ATTR) {
            Some(mro) => inst.set_attr(MRO_ATTR, mro.clone()),
            None => inst,
        };
        let heap = heap.set_val(inst_addr, Value::Object(Rc::new(inst)));
        let ctx = ctx.set_heap(heap);

        let init = ctx
            .get_attr_deep(&Value::Addr(inst_addr), "__init__", source.clone())
            .into_ret_val();
        match fetch_addr(&init, ctx.heap()) {
            Value::Func(func) => self
                .call_func(ctx, func, args, source)
                .map(|ctx| ctx.set_ret_val(Value::Addr(inst_addr))),
            _ => ctx.set_ret_val(Value::Addr(inst_addr)).to_set(),
        }
    }

    fn libcall(
        &self,
        ctx: Context<Vec<Value>>,
        kind: LibCallType,
        params: &[(Option<String>, ThExpr)],
        source: Option<CodeSource>,
    ) -> ContextSet<Value> {
        let values = ctx.ret_val().clone();
        match kind {
            LibCallType::Explicit => {
                let Some((Value::String(name), rest)) = values.split_first() else {
                    return ctx
                        .fail_with_msg("explicit library call without an implementation name", source)
                        .to_set();
                };
                let ctx = ctx
                    .push_call_stack(CallFrame::LibCall(name.clone()), source.clone())
                    .set_ret_val(ExplicitParams::new(rest.to_vec()));
                self.libcalls.call(name, ctx, source).map(Context::pop_call_stack)
            }

            LibCallType::GenList => {
                let (_, addr, ctx) = ctx.gen_list(values, source);
                ctx.set_ret_val(Value::Addr(addr)).to_set()
            }

            LibCallType::GenDict => {
                // keyed entries only
                let entries = params
                    .iter()
                    .zip(values)
                    .filter_map(|((key, _), value)| key.clone().map(|key| (key, value)))
                    .collect();
                let (_, addr, ctx) = ctx.gen_dict(entries, source);
                ctx.set_ret_val(Value::Addr(addr)).to_set()
            }

            LibCallType::Debug => {
                let printed: Vec<String> = values.iter().map(|v| fetch_addr(v, ctx.heap()).to_string()).collect();
                ctx.add_log(format!("DEBUG: {}", printed.join(", ")), source.clone())
                    .set_ret_val(Value::None(source))
                    .to_set()
            }

            LibCallType::Raise => {
                let message = match values.first().map(|v| fetch_addr(v, ctx.heap())) {
                    Some(Value::String(message)) => message,
                    Some(other) => format!("raised {}", other),
                    None => "exception raised".to_string(),
                };
                ctx.fail_with_msg(message, source).to_set()
            }

            LibCallType::ObjectClass => {
                // a class is its own first `__mro__` entry
                let (class, addr, heap) = Object::create(ctx.ids(), ctx.heap(), source.clone());
                let ctx = ctx.set_heap(heap);
                let (_, mro, ctx) = ctx.gen_tuple(vec![Value::Addr(addr)], source.clone());
                let mut class = class.set_attr(MRO_ATTR, Value::Addr(mro));
                if let Some(Value::String(name)) = values.first() {
                    class = class.set_attr("__name__", Value::string(name.clone()));
                }
                let heap = ctx.heap().set_val(addr, Value::Object(Rc::new(class)));
                ctx.set_heap(heap).set_ret_val(Value::Addr(addr)).to_set()
            }

            LibCallType::ExportGlobal => {
                let [Value::String(name), value] = values.as_slice() else {
                    return ctx
                        .fail_with_msg("exportGlobal expects a name and a value", source)
                        .to_set();
                };
                let (slot, heap) = ctx.heap().alloc(value.clone(), source.as_ref());
                let imported = ctx.imported().set(name.clone(), slot);
                ctx.set_heap(heap)
                    .set_imported(imported)
                    .set_ret_val(Value::None(source))
                    .to_set()
            }

            LibCallType::Import | LibCallType::SetDefault | LibCallType::CallKV => {
                let reason = format!("library call '{}' is not supported by the interpreter", kind.name());
                ctx.warn_with_msg(reason.clone(), source.clone())
                    .set_ret_val(Value::not_impl(reason, source))
                    .to_set()
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Store `value` under `name`, reusing the slot of an existing binding
fn bind_name<T>(ctx: Context<T>, name: &str, value: Value, source: Option<&CodeSource>) -> Context<T> {
    match ctx.env().get(name) {
        Some(addr) => {
            let heap = ctx.heap().set_val(addr, value);
            ctx.set_heap(heap)
        }
        None => {
            let (addr, heap) = ctx.heap().alloc(value, source);
            let env = ctx.env().set(name, addr);
            ctx.set_heap(heap).set_env(env)
        }
    }
}

fn const_value(value: &ConstValue, source: Option<CodeSource>) -> Value {
    match value {
        ConstValue::Int(n) => Value::int(*n),
        ConstValue::Float(f) => Value::float(*f),
        ConstValue::String(s) => Value::string(s.clone()),
        ConstValue::Bool(b) => Value::Bool(*b),
        ConstValue::None => Value::None(source),
    }
}

/// A class object lists itself first in its `__mro__`
fn is_class(obj: &Object, heap: &Heap) -> bool {
    let Some(mro) = obj.get_attr(MRO_ATTR) else {
        return false;
    };
    let mro = fetch_addr(mro, heap);
    matches!(
        mro.as_object().and_then(|mro| mro.get_indice(0)),
        Some(Value::Addr(first)) if *first == obj.addr
    )
}

fn normalize_index(obj: &Object, index: i64) -> i64 {
    match obj.length() {
        Some(len) if index < 0 => index + len,
        _ => index,
    }
}

/// Truth value of a condition, if it can be decided
fn truthy(value: &Value, heap: &Heap) -> Option<bool> {
    match fetch_addr(value, heap) {
        Value::Bool(b) => Some(b),
        Value::Int(n) => n.as_const().map(|n| n != 0),
        Value::Float(f) => f.as_const().map(|f| f != 0.0),
        Value::String(s) => Some(!s.is_empty()),
        Value::None(_) => Some(false),
        Value::Func(_) => Some(true),
        Value::Object(obj) => match obj.get_attr(LENGTH_ATTR) {
            None => Some(true),
            Some(Value::Int(len)) => len.as_const().map(|len| len > 0),
            Some(_) => None,
        },
        Value::Addr(_) | Value::Tensor(_) | Value::Undef(_) | Value::NotImpl { .. } | Value::Error(_) => None,
    }
}

fn subscript(ctx: Context<(Value, Value)>, base: &Value, index: &Value, source: Option<CodeSource>) -> Context<Value> {
    let target = fetch_addr(base, ctx.heap());
    let key = fetch_addr(index, ctx.heap());
    if target.is_error() {
        return ctx.set_ret_val(target);
    }
    if key.is_error() {
        return ctx.set_ret_val(key);
    }
    if let Value::Tensor(_) = target {
        return ctx.warn_tensor_with_msg("tensor indexing is not modelled", source);
    }

    let found = match &key {
        Value::Int(n) => match n.as_const() {
            Some(i) => ctx.get_indice_deep(base, i, source.clone()),
            None => {
                return ctx
                    .warn_with_msg(format!("subscript with symbolic index {}", n.to_exp()), source.clone())
                    .set_ret_val(Value::Undef(source));
            }
        },
        Value::String(k) => ctx.get_key_val_deep(base, k, source.clone()),
        other => {
            return ctx.fail_with_msg(format!("invalid subscript of type {}", other.type_name()), source);
        }
    };
    if let Value::Undef(_) = found.ret_val() {
        return found.fail_with_msg(format!("subscript {} is out of range", key), source);
    }
    found
}

fn binop<T>(ctx: Context<T>, op: TEBopType, left: Value, right: Value, source: Option<CodeSource>) -> Context<Value> {
    let l = fetch_addr(&left, ctx.heap());
    let r = fetch_addr(&right, ctx.heap());
    if l.is_error() {
        return ctx.set_ret_val(l);
    }
    if r.is_error() {
        return ctx.set_ret_val(r);
    }

    let result = match op {
        TEBopType::Add
        | TEBopType::Sub
        | TEBopType::Mul
        | TEBopType::Pow
        | TEBopType::TrueDiv
        | TEBopType::FloorDiv
        | TEBopType::Mod => arith(op, &l, &r),
        TEBopType::Lt | TEBopType::Lte => compare(op, &l, &r),
        TEBopType::Eq | TEBopType::Is => Ok(known_bool(equals(&l, &r), &source)),
        TEBopType::Neq | TEBopType::IsNot => Ok(known_bool(equals(&l, &r).map(|b| !b), &source)),
        TEBopType::And => Ok(match truthy(&l, ctx.heap()) {
            Some(true) => right,
            Some(false) => left,
            None => Value::Undef(source.clone()),
        }),
        TEBopType::Or => Ok(match truthy(&l, ctx.heap()) {
            Some(true) => left,
            Some(false) => right,
            None => Value::Undef(source.clone()),
        }),
        TEBopType::In => contains(&r, &l, ctx.heap()).map(|found| known_bool(found, &source)),
        TEBopType::NotIn => contains(&r, &l, ctx.heap()).map(|found| known_bool(found.map(|b| !b), &source)),
    };

    match result {
        Ok(value) => ctx.set_ret_val(value),
        Err(OpError::Invalid(message)) => ctx.fail_with_msg(message, source),
        Err(OpError::Unknown(message)) => ctx
            .warn_with_msg(message, source.clone())
            .set_ret_val(Value::Undef(source)),
    }
}

fn known_bool(value: Option<bool>, source: &Option<CodeSource>) -> Value {
    value.map_or_else(|| Value::Undef(source.clone()), Value::Bool)
}

fn unsupported(op: TEBopType, l: &Value, r: &Value) -> OpError {
    OpError::Invalid(format!(
        "unsupported operand types for {}: {} and {}",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}

/// Booleans take part in arithmetic as 0 and 1
fn as_number(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::int(*b as i64),
        other => other.clone(),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => n.as_const().map(|n| n as f64),
        Value::Float(f) => f.as_const(),
        _ => None,
    }
}

fn arith(op: TEBopType, l: &Value, r: &Value) -> Result<Value, OpError> {
    match (as_number(l), as_number(r)) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, &a, &b),
        (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => float_arith(op, &a, &b),
        (Value::String(a), Value::String(b)) if op == TEBopType::Add => Ok(Value::string(format!("{}{}", a, b))),
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) if op == TEBopType::Mul => {
            let Some(times) = n.as_const() else {
                return Err(OpError::Unknown(format!("string repeated {} times", n.to_exp())));
            };
            let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
            match s.len().checked_mul(times) {
                Some(len) if len <= MAX_STRING_LEN => Ok(Value::string(s.repeat(times))),
                _ => Err(OpError::Unknown(format!("string repeated {} times is too long", times))),
            }
        }
        _ => Err(unsupported(op, l, r)),
    }
}

fn int_arith(op: TEBopType, a: &IntValue, b: &IntValue) -> Result<Value, OpError> {
    let num_op = match op {
        TEBopType::Add => NumBopType::Add,
        TEBopType::Sub => NumBopType::Sub,
        TEBopType::Mul => NumBopType::Mul,
        TEBopType::FloorDiv => NumBopType::FloorDiv,
        TEBopType::Mod => NumBopType::Mod,
        TEBopType::TrueDiv => {
            return match (a.as_const(), b.as_const()) {
                (_, Some(0)) => Err(OpError::Invalid("division by zero".to_string())),
                (Some(x), Some(y)) => Ok(Value::float(x as f64 / y as f64)),
                _ => Ok(Value::Float(FloatValue::Sym(ExpNum::bop(
                    NumBopType::TrueDiv,
                    a.to_exp(),
                    b.to_exp(),
                )))),
            };
        }
        TEBopType::Pow => {
            return match (a.as_const(), b.as_const()) {
                (Some(x), Some(y)) if y >= 0 => u32::try_from(y)
                    .ok()
                    .and_then(|y| x.checked_pow(y))
                    .map(Value::int)
                    .ok_or_else(|| OpError::Unknown(format!("{} ** {} overflows", x, y))),
                (Some(x), Some(y)) => Ok(Value::float((x as f64).powf(y as f64))),
                _ => Err(OpError::Unknown(format!("symbolic power {} ** {}", a.to_exp(), b.to_exp()))),
            };
        }
        _ => return Err(OpError::Invalid(format!("{} is not an arithmetic operator", op.symbol()))),
    };
    if matches!(num_op, NumBopType::FloorDiv | NumBopType::Mod) && b.as_const() == Some(0) {
        return Err(OpError::Invalid("integer division or modulo by zero".to_string()));
    }
    let result = ExpNum::bop(num_op, a.to_exp(), b.to_exp());
    match (result.as_const(), a.as_const(), b.as_const()) {
        (Some(n), _, _) => Ok(Value::int(n)),
        (None, Some(x), Some(y)) => Err(OpError::Unknown(format!("{} {} {} overflows", x, op.symbol(), y))),
        _ => Ok(Value::Int(IntValue::Sym(result))),
    }
}

fn float_arith(op: TEBopType, a: &Value, b: &Value) -> Result<Value, OpError> {
    let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) else {
        return Err(OpError::Unknown(format!("symbolic float arithmetic {} {} {}", a, op.symbol(), b)));
    };
    let value = match op {
        TEBopType::Add => x + y,
        TEBopType::Sub => x - y,
        TEBopType::Mul => x * y,
        TEBopType::Pow => x.powf(y),
        TEBopType::TrueDiv | TEBopType::FloorDiv | TEBopType::Mod if y == 0.0 => {
            return Err(OpError::Invalid("float division by zero".to_string()));
        }
        TEBopType::TrueDiv => x / y,
        TEBopType::FloorDiv => (x / y).floor(),
        TEBopType::Mod => x - y * (x / y).floor(),
        _ => return Err(unsupported(op, a, b)),
    };
    Ok(Value::float(value))
}

fn compare(op: TEBopType, l: &Value, r: &Value) -> Result<Value, OpError> {
    let holds = |ord: std::cmp::Ordering| match op {
        TEBopType::Lt => ord.is_lt(),
        _ => ord.is_le(),
    };
    match (as_number(l), as_number(r)) {
        (Value::String(a), Value::String(b)) => Ok(Value::Bool(holds(a.cmp(&b)))),
        (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
            match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => Ok(x
                    .partial_cmp(&y)
                    .map_or(Value::Bool(false), |ord| Value::Bool(holds(ord)))),
                // decided by the external solver, not here
                _ => Ok(Value::Undef(None)),
            }
        }
        _ => Err(unsupported(op, l, r)),
    }
}

/// Equality of two fetched values; `None` when it depends on unknowns
fn equals(l: &Value, r: &Value) -> Option<bool> {
    match (as_number(l), as_number(r)) {
        (Value::Int(a), Value::Int(b)) => match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Some(x == y),
            _ if a == b => Some(true),
            _ => None,
        },
        (a @ (Value::Int(_) | Value::Float(_)), b @ (Value::Int(_) | Value::Float(_))) => {
            Some(as_f64(&a)? == as_f64(&b)?)
        }
        (Value::String(a), Value::String(b)) => Some(a == b),
        (Value::None(_), Value::None(_)) => Some(true),
        (Value::Object(a), Value::Object(b)) => Some(a.addr == b.addr),
        (Value::Func(a), Value::Func(b)) => Some(a.id == b.id),
        (Value::Tensor(_) | Value::Undef(_) | Value::NotImpl { .. }, _)
        | (_, Value::Tensor(_) | Value::Undef(_) | Value::NotImpl { .. }) => None,
        _ => Some(false),
    }
}

/// Membership of `item` in `container`
fn contains(container: &Value, item: &Value, heap: &Heap) -> Result<Option<bool>, OpError> {
    match container {
        Value::String(s) => match item {
            Value::String(sub) => Ok(Some(s.contains(sub.as_str()))),
            other => Err(OpError::Invalid(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Object(obj) => {
            if let Value::String(key) = item
                && obj.get_key_val(key).is_some()
            {
                return Ok(Some(true));
            }
            let mut unknown = obj.length().is_none() && obj.get_attr(LENGTH_ATTR).is_some();
            for element in obj.indices.values() {
                match equals(&fetch_addr(element, heap), item) {
                    Some(true) => return Ok(Some(true)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            Ok(if unknown { None } else { Some(false) })
        }
        Value::Tensor(_) | Value::Undef(_) | Value::NotImpl { .. } => Ok(None),
        other => Err(OpError::Invalid(format!("{} is not a container", other.type_name()))),
    }
}

fn unop<T>(ctx: Context<T>, op: TEUopType, value: Value, source: Option<CodeSource>) -> Context<Value> {
    let fetched = fetch_addr(&value, ctx.heap());
    if fetched.is_error() {
        return ctx.set_ret_val(fetched);
    }
    match op {
        TEUopType::Not => {
            let result = known_bool(truthy(&fetched, ctx.heap()).map(|b| !b), &source);
            ctx.set_ret_val(result)
        }
        TEUopType::Neg => match as_number(&fetched) {
            Value::Int(n) => {
                let negated = ExpNum::bop(NumBopType::Sub, ExpNum::Const(0), n.to_exp());
                let result = match negated.as_const() {
                    Some(n) => Value::int(n),
                    None => Value::Int(IntValue::Sym(negated)),
                };
                ctx.set_ret_val(result)
            }
            Value::Float(FloatValue::Lit(f)) => ctx.set_ret_val(Value::float(-f)),
            Value::Float(FloatValue::Sym(e)) => ctx.set_ret_val(Value::Float(FloatValue::Sym(ExpNum::bop(
                NumBopType::Sub,
                ExpNum::Const(0),
                e,
            )))),
            other => ctx.fail_with_msg(format!("bad operand type for unary -: {}", other.type_name()), source),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalyzerConfig, Session};
    use crate::interp::symbolic::SymInt;
    use crate::interp::value::ErrorLevel;

    fn root() -> Context<()> {
        Context::new(Session::with_defaults().unwrap())
    }

    fn run(stmt: &ThStmt) -> ContextSet<Value> {
        Interpreter::new().run(root(), stmt)
    }

    fn returned(set: &ContextSet<Value>) -> Vec<Value> {
        set.live().iter().map(|ctx| ctx.ret_val().clone()).collect()
    }

    fn add(l: ThExpr, r: ThExpr) -> ThExpr {
        ThExpr::binop(TEBopType::Add, l, r)
    }

    #[test]
    fn test_assign_and_read() {
        let program = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("x"), ThExpr::int(2)),
            ThStmt::assign(ThExpr::name("x"), add(ThExpr::name("x"), ThExpr::int(3))),
            ThStmt::ret(ThExpr::name("x")),
        ]);
        assert_eq!(returned(&run(&program)), vec![Value::int(5)]);
    }

    #[test]
    fn test_undefined_name_fails() {
        let set = run(&ThStmt::ret(ThExpr::name("nope")));
        assert!(set.live().is_empty());
        assert_eq!(set.failed()[0].failed().unwrap().reason, "name 'nope' is not defined");
    }

    #[test]
    fn test_concrete_condition_takes_one_branch() {
        let program = ThStmt::if_else(
            ThExpr::binop(TEBopType::Lt, ThExpr::int(1), ThExpr::int(2)),
            ThStmt::ret(ThExpr::string("then")),
            ThStmt::ret(ThExpr::string("else")),
        );
        assert_eq!(returned(&run(&program)), vec![Value::string("then")]);
    }

    #[test]
    fn test_unknown_condition_forks() {
        let ctx = root();
        let n = Value::Int(IntValue::Sym(ExpNum::symbol(SymInt::fresh(ctx.ids(), "n", Some(0)))));
        let (addr, heap) = ctx.heap().alloc(n, None);
        let env = ctx.env().set("n", addr);
        let ctx = ctx.set_heap(heap).set_env(env);

        let program = ThStmt::if_else(
            ThExpr::binop(TEBopType::Lt, ThExpr::name("n"), ThExpr::int(3)),
            ThStmt::ret(ThExpr::int(1)),
            ThStmt::ret(ThExpr::int(2)),
        );
        let set = Interpreter::new().run(ctx, &program);
        assert_eq!(returned(&set), vec![Value::int(1), Value::int(2)]);
        assert!(set.live().iter().all(|ctx| ctx.logs().len() == 1));
    }

    #[test]
    fn test_for_loop_with_break() {
        // total = 0; for x in [1, 2, 3, 4]: if x == 3: break; total = total + x
        let body = ThStmt::seq(vec![
            ThStmt::if_else(
                ThExpr::binop(TEBopType::Eq, ThExpr::name("x"), ThExpr::int(3)),
                ThStmt::brk(),
                ThStmt::pass(),
            ),
            ThStmt::assign(ThExpr::name("total"), add(ThExpr::name("total"), ThExpr::name("x"))),
        ]);
        let items = ThExpr::libcall(
            LibCallType::GenList,
            vec![ThExpr::int(1), ThExpr::int(2), ThExpr::int(3), ThExpr::int(4)],
        );
        let program = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("total"), ThExpr::int(0)),
            ThStmt::for_in("x", items, body),
            ThStmt::ret(ThExpr::name("total")),
        ]);
        assert_eq!(returned(&run(&program)), vec![Value::int(3)]);
    }

    #[test]
    fn test_loop_over_unknown_length_warns() {
        let program = ThStmt::seq(vec![
            ThStmt::for_in("x", ThExpr::int(4), ThStmt::pass()),
            ThStmt::ret(ThExpr::none()),
        ]);
        let set = run(&program);
        assert_eq!(set.live().len(), 1);
        assert_eq!(set.live()[0].logs()[0].reason, "cannot iterate over int of unknown length");
    }

    #[test]
    fn test_function_call_with_defaults_and_varargs() {
        // def f(a, b=10, *rest): return a + b
        let ctx = root();
        let body = Rc::new(ThStmt::ret(add(ThExpr::name("a"), ThExpr::name("b"))));
        let func = Func::new(ctx.ids(), "f", vec!["a".into(), "b".into()], Some(body), None, None)
            .with_defaults([("b".to_string(), Value::int(10))].into_iter().collect())
            .with_varargs_param("rest");
        let (addr, heap) = ctx.heap().alloc(Value::Func(Rc::new(func)), None);
        let env = ctx.env().set("f", addr);
        let ctx = ctx.set_heap(heap).set_env(env);
        let interp = Interpreter::new();

        let call = |args: Vec<ThExpr>| ThStmt::ret(ThExpr::call(ThExpr::name("f"), args));
        let set = interp.run(ctx.clone(), &call(vec![ThExpr::int(1)]));
        assert_eq!(returned(&set), vec![Value::int(11)]);

        let set = interp.run(ctx.clone(), &call(vec![ThExpr::int(1), ThExpr::int(2), ThExpr::int(3)]));
        assert_eq!(returned(&set), vec![Value::int(3)]);
        // parameter slots are released after the call
        assert_eq!(set.live()[0].heap().len(), ctx.heap().len() + 1);

        let set = interp.run(ctx, &call(vec![]));
        assert_eq!(set.failed()[0].failed().unwrap().reason, "f() missing required argument 'a'");
    }

    #[test]
    fn test_recursion_depth_is_bounded() {
        let config = AnalyzerConfig {
            max_call_depth: 8,
            ..AnalyzerConfig::default()
        };
        let ctx = Context::new(Session::new(config).unwrap());
        // def loop(): return loop()
        let program = ThStmt::fundef(
            "loop",
            vec![],
            ThStmt::ret(ThExpr::call(ThExpr::name("loop"), vec![])),
            ThStmt::ret(ThExpr::call(ThExpr::name("loop"), vec![])),
        );
        let set = Interpreter::new().run(ctx, &program);
        assert!(set.live().is_empty());
        let failed = &set.failed()[0];
        assert_eq!(
            failed.failed().unwrap().reason,
            "maximum call depth 8 exceeded calling 'loop'"
        );
    }

    #[test]
    fn test_class_instantiation_and_method_call() {
        // C = objectClass("C"); C.__init__ = init; c = C(4); return c.size
        let init_body = ThStmt::assign(ThExpr::attr(ThExpr::name("self"), "size"), ThExpr::name("n"));
        let program = ThStmt::seq(vec![
            ThStmt::assign(
                ThExpr::name("C"),
                ThExpr::libcall(LibCallType::ObjectClass, vec![ThExpr::string("C")]),
            ),
            ThStmt::fundef(
                "init",
                vec!["self".into(), "n".into()],
                init_body,
                ThStmt::seq(vec![
                    ThStmt::assign(ThExpr::attr(ThExpr::name("C"), "__init__"), ThExpr::name("init")),
                    ThStmt::assign(ThExpr::name("c"), ThExpr::call(ThExpr::name("C"), vec![ThExpr::int(4)])),
                    ThStmt::ret(ThExpr::attr(ThExpr::name("c"), "size")),
                ]),
            ),
        ]);
        assert_eq!(returned(&run(&program)), vec![Value::int(4)]);
    }

    #[test]
    fn test_explicit_libcall_builds_graph() {
        let plain = |dims: Vec<ThExpr>| {
            ThExpr::explicit(
                "h.plain",
                vec![ThExpr::libcall(LibCallType::GenList, dims)],
            )
        };
        let program = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("x"), plain(vec![ThExpr::int(2), ThExpr::int(3)])),
            ThStmt::assign(ThExpr::name("w"), plain(vec![ThExpr::int(3), ThExpr::int(4)])),
            ThStmt::ret(ThExpr::explicit("h.matmul", vec![ThExpr::name("x"), ThExpr::name("w")])),
        ]);
        let set = run(&program);
        let Value::Tensor(t) = &returned(&set)[0] else {
            panic!("expected a tensor");
        };
        assert_eq!(
            t.graph.as_ref().unwrap().to_lines(),
            vec!["matmul", "    plain tempPlain0:[2, 3]", "    plain tempPlain1:[3, 4]"]
        );
        // library frames are popped again
        assert!(set.live()[0].call_stack().is_empty());
    }

    #[test]
    fn test_raise_fails_path() {
        let program = ThStmt::expr(ThExpr::libcall(LibCallType::Raise, vec![ThExpr::string("boom")]));
        let set = run(&program);
        assert_eq!(set.failed().len(), 1);
        assert_eq!(set.failed()[0].failed().unwrap().reason, "boom");
    }

    #[test]
    fn test_front_end_libcalls_degrade() {
        let program = ThStmt::ret(ThExpr::libcall(LibCallType::Import, vec![ThExpr::string("torch")]));
        let set = run(&program);
        assert!(matches!(returned(&set)[0], Value::NotImpl { .. }));
        assert_eq!(set.live()[0].logs().len(), 1);
    }

    #[test]
    fn test_arithmetic_folding() {
        let cases = [
            (TEBopType::FloorDiv, ThExpr::int(-7), ThExpr::int(2), Value::int(-4)),
            (TEBopType::Mod, ThExpr::int(-7), ThExpr::int(2), Value::int(1)),
            (TEBopType::TrueDiv, ThExpr::int(7), ThExpr::int(2), Value::float(3.5)),
            (TEBopType::Pow, ThExpr::int(2), ThExpr::int(10), Value::int(1024)),
            (TEBopType::Add, ThExpr::string("a"), ThExpr::string("b"), Value::string("ab")),
            (TEBopType::Add, ThExpr::int(1), ThExpr::float(0.5), Value::float(1.5)),
        ];
        for (op, l, r, expected) in cases {
            let set = run(&ThStmt::ret(ThExpr::binop(op, l, r)));
            assert_eq!(returned(&set), vec![expected], "{:?}", op);
        }
    }

    #[test]
    fn test_division_by_zero_fails() {
        let set = run(&ThStmt::ret(ThExpr::binop(TEBopType::FloorDiv, ThExpr::int(1), ThExpr::int(0))));
        assert_eq!(set.failed()[0].failed().unwrap().reason, "integer division or modulo by zero");
    }

    #[test]
    fn test_symbolic_arithmetic_stays_symbolic() {
        let ctx = root();
        let n = Value::Int(IntValue::Sym(ExpNum::symbol(SymInt::fresh(ctx.ids(), "n", None))));
        let (addr, heap) = ctx.heap().alloc(n, None);
        let env = ctx.env().set("n", addr);
        let ctx = ctx.set_heap(heap).set_env(env);

        let program = ThStmt::ret(ThExpr::binop(
            TEBopType::Mul,
            add(ThExpr::name("n"), ThExpr::int(1)),
            ThExpr::int(2),
        ));
        let set = Interpreter::new().run(ctx, &program);
        assert_eq!(returned(&set)[0].to_string(), "((n0 + 1) * 2)");
    }

    #[test]
    fn test_subscript_and_membership() {
        let items = ThExpr::libcall(LibCallType::GenList, vec![ThExpr::int(5), ThExpr::int(6)]);
        let program = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("xs"), items),
            ThStmt::assign(ThExpr::subscr(ThExpr::name("xs"), ThExpr::int(-1)), ThExpr::int(9)),
            ThStmt::if_else(
                ThExpr::binop(TEBopType::In, ThExpr::int(9), ThExpr::name("xs")),
                ThStmt::ret(ThExpr::subscr(ThExpr::name("xs"), ThExpr::int(1))),
                ThStmt::ret(ThExpr::none()),
            ),
        ]);
        assert_eq!(returned(&run(&program)), vec![Value::int(9)]);

        let set = run(&ThStmt::ret(ThExpr::subscr(
            ThExpr::libcall(LibCallType::GenList, vec![]),
            ThExpr::int(0),
        )));
        assert_eq!(set.failed()[0].failed().unwrap().reason, "subscript 0 is out of range");
    }

    #[test]
    fn test_integer_overflow_degrades_to_unknown() {
        let min = ThExpr::binop(TEBopType::Sub, ThExpr::int(-i64::MAX), ThExpr::int(1));
        for op in [TEBopType::FloorDiv, TEBopType::Mod] {
            let set = run(&ThStmt::ret(ThExpr::binop(op, min.clone(), ThExpr::int(-1))));
            assert_eq!(set.live().len(), 1, "{:?}", op);
            assert!(matches!(returned(&set)[0], Value::Undef(_)));
            assert_eq!(set.live()[0].logs()[0].level, ErrorLevel::Warning);
        }
        let set = run(&ThStmt::ret(ThExpr::binop(TEBopType::Mul, ThExpr::int(i64::MAX), ThExpr::int(2))));
        assert_eq!(
            set.live()[0].logs()[0].reason,
            format!("{} * 2 overflows", i64::MAX)
        );
    }

    #[test]
    fn test_huge_string_repetition_is_not_built() {
        let set = run(&ThStmt::ret(ThExpr::binop(
            TEBopType::Mul,
            ThExpr::string("ab"),
            ThExpr::int(1_000_000_000_000_000_000),
        )));
        assert!(matches!(returned(&set)[0], Value::Undef(_)));
        assert_eq!(set.live()[0].logs().len(), 1);

        let set = run(&ThStmt::ret(ThExpr::binop(TEBopType::Mul, ThExpr::int(3), ThExpr::string("ab"))));
        assert_eq!(returned(&set), vec![Value::string("ababab")]);
    }

    #[test]
    fn test_callee_does_not_see_caller_locals() {
        // def f(): return y
        // def g(): y = 5; return f()
        let program = ThStmt::fundef(
            "f",
            vec![],
            ThStmt::ret(ThExpr::name("y")),
            ThStmt::fundef(
                "g",
                vec![],
                ThStmt::seq(vec![
                    ThStmt::assign(ThExpr::name("y"), ThExpr::int(5)),
                    ThStmt::ret(ThExpr::call(ThExpr::name("f"), vec![])),
                ]),
                ThStmt::ret(ThExpr::call(ThExpr::name("g"), vec![])),
            ),
        );
        let set = run(&program);
        assert!(set.live().is_empty());
        assert_eq!(set.failed()[0].failed().unwrap().reason, "name 'y' is not defined");

        let program = ThStmt::fundef(
            "f",
            vec![],
            ThStmt::ret(ThExpr::name("y")),
            ThStmt::let_in("y", Some(ThExpr::int(5)), ThStmt::ret(ThExpr::call(ThExpr::name("f"), vec![]))),
        );
        assert_eq!(run(&program).failed().len(), 1);
    }

    #[test]
    fn test_callee_cannot_overwrite_caller_local() {
        // def f(): x = 1; return x
        // x = 7; f(); return x
        let program = ThStmt::fundef(
            "f",
            vec![],
            ThStmt::seq(vec![
                ThStmt::assign(ThExpr::name("x"), ThExpr::int(1)),
                ThStmt::ret(ThExpr::name("x")),
            ]),
            ThStmt::seq(vec![
                ThStmt::assign(ThExpr::name("x"), ThExpr::int(7)),
                ThStmt::expr(ThExpr::call(ThExpr::name("f"), vec![])),
                ThStmt::ret(ThExpr::name("x")),
            ]),
        );
        assert_eq!(returned(&run(&program)), vec![Value::int(7)]);
    }

    #[test]
    fn test_declared_name_allows_forward_reference() {
        // g is declared first, so f's closure sees the later definition
        let program = ThStmt::let_in(
            "g",
            None,
            ThStmt::fundef(
                "f",
                vec![],
                ThStmt::ret(ThExpr::call(ThExpr::name("g"), vec![])),
                ThStmt::fundef(
                    "g",
                    vec![],
                    ThStmt::ret(ThExpr::int(42)),
                    ThStmt::ret(ThExpr::call(ThExpr::name("f"), vec![])),
                ),
            ),
        );
        assert_eq!(returned(&run(&program)), vec![Value::int(42)]);
    }

    #[test]
    fn test_and_or_short_circuit() {
        // x = None; return x is not None and x.shape
        let guard = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("x"), ThExpr::none()),
            ThStmt::ret(ThExpr::binop(
                TEBopType::And,
                ThExpr::binop(TEBopType::IsNot, ThExpr::name("x"), ThExpr::none()),
                ThExpr::attr(ThExpr::name("x"), "shape"),
            )),
        ]);
        let set = run(&guard);
        assert!(set.failed().is_empty());
        assert_eq!(returned(&set), vec![Value::Bool(false)]);

        let set = run(&ThStmt::ret(ThExpr::binop(TEBopType::Or, ThExpr::int(3), ThExpr::name("missing"))));
        assert_eq!(returned(&set), vec![Value::int(3)]);

        let set = run(&ThStmt::ret(ThExpr::binop(TEBopType::And, ThExpr::int(3), ThExpr::string("s"))));
        assert_eq!(returned(&set), vec![Value::string("s")]);
    }

    #[test]
    fn test_unknown_and_operand_forks() {
        let ctx = root();
        let n = Value::Int(IntValue::Sym(ExpNum::symbol(SymInt::fresh(ctx.ids(), "n", None))));
        let (addr, heap) = ctx.heap().alloc(n, None);
        let env = ctx.env().set("n", addr);
        let ctx = ctx.set_heap(heap).set_env(env);

        let program = ThStmt::ret(ThExpr::binop(
            TEBopType::And,
            ThExpr::binop(TEBopType::Lt, ThExpr::name("n"), ThExpr::int(2)),
            ThExpr::string("small"),
        ));
        let set = Interpreter::new().run(ctx, &program);
        let values = returned(&set);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], Value::string("small"));
        assert!(matches!(values[1], Value::Undef(_)));
        assert!(set.live().iter().all(|ctx| ctx.logs().len() == 1));
    }

    #[test]
    fn test_item_assignment() {
        let program = ThStmt::seq(vec![
            ThStmt::assign(ThExpr::name("d"), ThExpr::libcall(LibCallType::GenDict, vec![])),
            ThStmt::assign(ThExpr::subscr(ThExpr::name("d"), ThExpr::string("k")), ThExpr::int(1)),
            ThStmt::assign(ThExpr::name("xs"), ThExpr::libcall(LibCallType::GenList, vec![ThExpr::int(0)])),
            ThStmt::assign(
                ThExpr::subscr(ThExpr::name("xs"), ThExpr::int(0)),
                ThExpr::subscr(ThExpr::name("d"), ThExpr::string("k")),
            ),
            ThStmt::ret(ThExpr::subscr(ThExpr::name("xs"), ThExpr::int(0))),
        ]);
        let set = run(&program);
        assert!(set.failed().is_empty());
        assert_eq!(returned(&set), vec![Value::int(1)]);

        let set = run(&ThStmt::seq(vec![
            ThStmt::assign(ThExpr::subscr(ThExpr::int(3), ThExpr::int(0)), ThExpr::int(1)),
            ThStmt::ret(ThExpr::none()),
        ]));
        assert_eq!(
            set.failed()[0].failed().unwrap().reason,
            "int does not support item assignment"
        );
    }

    #[test]
    fn test_export_global() {
        let program = ThStmt::expr(ThExpr::libcall(
            LibCallType::ExportGlobal,
            vec![ThExpr::string("torch.pi"), ThExpr::float(3.0)],
        ));
        let set = run(&program);
        let ctx = &set.live()[0];
        let slot = ctx.imported().get("torch.pi").unwrap();
        assert_eq!(ctx.heap().get_val(slot), Value::float(3.0));
    }
}
