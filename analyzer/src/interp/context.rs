//! Execution state of one analysis path and the path-set combinators
//!
//! A `Context` is an immutable snapshot: every operation consumes it and returns
//! a new one. Branching produces a `ContextSet`, which keeps live and failed
//! paths in two order-preserving sequences.

use std::fmt;
use std::rc::Rc;

use im_rc::Vector;
use tracing::{debug, trace};

use super::env::Env;
use super::heap::{Address, Heap};
use super::hexpr::HExpr;
use super::symbolic::{ExpNum, ExpShape, SymInt, SymShape};
use super::value::{ErrorLevel, ErrorValue, Func, IntValue, LENGTH_ATTR, MRO_ATTR, Object, Value, fetch_addr};
use crate::common::{CodeSource, IdSource};
use crate::config::Session;

/// Callee recorded on the call stack
#[derive(Clone, Debug, PartialEq)]
pub enum CallFrame {
    Func(Rc<Func>),
    /// Library call by implementation name
    LibCall(String),
}

impl CallFrame {
    pub fn name(&self) -> &str {
        match self {
            CallFrame::Func(func) => &func.name,
            CallFrame::LibCall(name) => name,
        }
    }
}

/// State of one path
#[derive(Clone, Debug)]
pub struct Context<T> {
    fail_id: Option<u64>,
    env: Env,
    heap: Heap,
    ret_val: T,
    call_stack: Vector<(CallFrame, Option<CodeSource>)>,
    logs: Vector<Rc<ErrorValue>>,
    /// Qualified module path to module object address
    imported: Env,
    rel_path: String,
    failed: Option<Rc<ErrorValue>>,
    session: Rc<Session>,
}

impl Context<()> {
    /// Root context of an analysis
    pub fn new(session: Rc<Session>) -> Self {
        Context {
            fail_id: None,
            env: Env::new(),
            heap: Heap::new(),
            ret_val: (),
            call_stack: Vector::new(),
            logs: Vector::new(),
            imported: Env::new(),
            rel_path: session.config().entry_rel_path.clone(),
            failed: None,
            session,
        }
    }
}

impl<T> Context<T> {
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn ret_val(&self) -> &T {
        &self.ret_val
    }

    pub fn into_ret_val(self) -> T {
        self.ret_val
    }

    pub fn call_stack(&self) -> &Vector<(CallFrame, Option<CodeSource>)> {
        &self.call_stack
    }

    pub fn logs(&self) -> &Vector<Rc<ErrorValue>> {
        &self.logs
    }

    pub fn imported(&self) -> &Env {
        &self.imported
    }

    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    pub fn failed(&self) -> Option<&Rc<ErrorValue>> {
        self.failed.as_ref()
    }

    pub fn fail_id(&self) -> Option<u64> {
        self.fail_id
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    pub fn ids(&self) -> &IdSource {
        self.session.ids()
    }

    pub fn set_env(self, env: Env) -> Self {
        Context { env, ..self }
    }

    pub fn set_heap(self, heap: Heap) -> Self {
        Context { heap, ..self }
    }

    pub fn set_ret_val<U>(self, ret_val: U) -> Context<U> {
        Context {
            fail_id: self.fail_id,
            env: self.env,
            heap: self.heap,
            ret_val,
            call_stack: self.call_stack,
            logs: self.logs,
            imported: self.imported,
            rel_path: self.rel_path,
            failed: self.failed,
            session: self.session,
        }
    }

    pub fn set_rel_path(self, rel_path: impl Into<String>) -> Self {
        Context {
            rel_path: rel_path.into(),
            ..self
        }
    }

    pub fn set_imported(self, imported: Env) -> Self {
        Context { imported, ..self }
    }

    /// Attribute a location inside internal library code to the nearest user
    /// call site on the call stack. Falls back to `source` when every frame is
    /// internal.
    pub fn rewrite_source(&self, source: Option<CodeSource>) -> Option<CodeSource> {
        let Some(src) = source else {
            return None;
        };
        if !self.session.is_internal(&src) {
            return Some(src);
        }
        for (_, frame_src) in self.call_stack.iter().rev() {
            if let Some(frame_src @ CodeSource::Node { .. }) = frame_src
                && !self.session.is_internal(frame_src)
            {
                return Some(frame_src.clone());
            }
        }
        Some(src)
    }

    pub fn add_log(self, message: impl Into<String>, source: Option<CodeSource>) -> Self {
        let source = self.rewrite_source(source);
        self.add_log_value(Rc::new(ErrorValue::new(message, ErrorLevel::Log, source)))
    }

    pub fn add_log_value(mut self, log: Rc<ErrorValue>) -> Self {
        self.logs.push_back(log);
        self
    }

    pub fn push_call_stack(mut self, frame: CallFrame, source: Option<CodeSource>) -> Self {
        trace!(callee = frame.name(), depth = self.call_stack.len() + 1, "push call stack");
        self.call_stack.push_back((frame, source));
        self
    }

    pub fn pop_call_stack(mut self) -> Self {
        self.call_stack.pop_back();
        self
    }

    /// Record a warning and return it as the current result. The path goes on.
    pub fn warn(self, mut warning: ErrorValue) -> Context<Value> {
        warning.level = ErrorLevel::Warning;
        trace!(reason = %warning.reason, "warning");
        let warning = Rc::new(warning);
        self.add_log_value(warning.clone()).set_ret_val(Value::Error(warning))
    }

    pub fn warn_with_msg(self, message: impl Into<String>, source: Option<CodeSource>) -> Context<Value> {
        let source = self.rewrite_source(source);
        self.warn(ErrorValue::new(message, ErrorLevel::Warning, source))
    }

    /// Terminate the path.
    ///
    /// The first failure sets the marker and draws a fresh failure id; later
    /// failures are logged and returned but leave the marker untouched.
    pub fn fail(self, mut error: ErrorValue) -> Context<Value> {
        error.level = ErrorLevel::Error;
        let error = Rc::new(error);
        let mut ctx = self.add_log_value(error.clone());
        if ctx.failed.is_none() {
            let id = ctx.ids().next_failure_id();
            debug!(fail_id = id, reason = %error.reason, "path failed");
            ctx.failed = Some(error.clone());
            ctx.fail_id = Some(id);
        }
        ctx.set_ret_val(Value::Error(error))
    }

    pub fn fail_with_msg(self, message: impl Into<String>, source: Option<CodeSource>) -> Context<Value> {
        let source = self.rewrite_source(source);
        self.fail(ErrorValue::new(message, ErrorLevel::Error, source))
    }

    /// Warn, then answer a fresh plain tensor of unknown shape
    pub fn warn_tensor_with_msg(self, message: impl Into<String>, source: Option<CodeSource>) -> Context<Value> {
        let ctx = self.warn_with_msg(message, source.clone());
        let rank = ctx.gen_int_gte("tempRank", 0);
        let shape = ctx.gen_sym_shape("tempShape", rank);
        let graph = HExpr::plain(ctx.ids(), shape, source.clone());
        ctx.set_ret_val(Value::tensor(graph, source))
    }

    /// Warn, then answer the address of a fresh size object of unknown shape
    pub fn warn_size_with_msg(self, message: impl Into<String>, source: Option<CodeSource>) -> Context<Value> {
        let ctx = self.warn_with_msg(message, source.clone());
        let rank = ctx.gen_int_gte("tempRank", 0);
        let shape = ctx.gen_sym_shape("tempShape", rank.clone());
        let (obj, addr, heap) = Object::create(ctx.ids(), &ctx.heap, source);
        let obj = obj
            .with_shape(shape)
            .set_attr(LENGTH_ATTR, Value::Int(IntValue::Sym(rank)));
        let heap = heap.set_val(addr, Value::Object(Rc::new(obj)));
        ctx.set_heap(heap).set_ret_val(Value::Addr(addr))
    }

    /// Fresh integer symbol known to be at least `lower`
    pub fn gen_int_gte(&self, prefix: &str, lower: i64) -> ExpNum {
        ExpNum::symbol(SymInt::fresh(self.ids(), prefix, Some(lower)))
    }

    /// Fresh shape symbol of the given rank
    pub fn gen_sym_shape(&self, prefix: &str, rank: ExpNum) -> ExpShape {
        ExpShape::from_symbol(SymShape::fresh(self.ids(), prefix, rank))
    }

    /// Move every address into the negative library range
    pub fn as_default(self) -> Self {
        let offset = -self.heap.addr_max() - 1;
        let env = self.env.add_offset(offset);
        let heap = self.heap.add_offset(offset);
        self.set_env(env).set_heap(heap)
    }

    pub fn gen_list(self, values: Vec<Value>, source: Option<CodeSource>) -> (Rc<Object>, Address, Self) {
        self.gen_sequence("list", values, source)
    }

    pub fn gen_tuple(self, values: Vec<Value>, source: Option<CodeSource>) -> (Rc<Object>, Address, Self) {
        self.gen_sequence("tuple", values, source)
    }

    pub fn gen_dict(self, entries: Vec<(String, Value)>, source: Option<CodeSource>) -> (Rc<Object>, Address, Self) {
        let mro = self.class_mro("dict");
        let (mut obj, addr, heap) = Object::create(self.ids(), &self.heap, source);
        let len = entries.len() as i64;
        for (key, value) in entries {
            obj = obj.set_key_val(key, value);
        }
        obj = obj.set_attr(LENGTH_ATTR, Value::int(len));
        if let Some(mro) = mro {
            obj = obj.set_attr(MRO_ATTR, mro);
        }
        let obj = Rc::new(obj);
        let heap = heap.set_val(addr, Value::Object(obj.clone()));
        (obj, addr, self.set_heap(heap))
    }

    fn gen_sequence(self, class: &str, values: Vec<Value>, source: Option<CodeSource>) -> (Rc<Object>, Address, Self) {
        let mro = self.class_mro(class);
        let (mut obj, addr, heap) = Object::create(self.ids(), &self.heap, source);
        let len = values.len() as i64;
        for (i, value) in values.into_iter().enumerate() {
            obj = obj.set_indice(i as i64, value);
        }
        obj = obj.set_attr(LENGTH_ATTR, Value::int(len));
        if let Some(mro) = mro {
            obj = obj.set_attr(MRO_ATTR, mro);
        }
        let obj = Rc::new(obj);
        let heap = heap.set_val(addr, Value::Object(obj.clone()));
        (obj, addr, self.set_heap(heap))
    }

    /// `__mro__` of the class bound to `class` in the environment, if any
    fn class_mro(&self, class: &str) -> Option<Value> {
        let addr = self.env.get(class)?;
        let class_obj = fetch_addr(&Value::Addr(addr), &self.heap);
        class_obj.as_object()?.get_attr(MRO_ATTR).cloned()
    }

    fn lookup_attr(&self, value: &Value, attr: &str) -> Option<Value> {
        let receiver = value.as_addr();
        let fetched = fetch_addr(value, &self.heap);
        let obj = fetched.as_object()?;
        if let Some(found) = obj.get_attr(attr) {
            return Some(found.clone());
        }

        let mro = fetch_addr(obj.get_attr(MRO_ATTR)?, &self.heap);
        let mro = mro.as_object()?;
        for i in 0..mro.length().unwrap_or(0) {
            let Some(class) = mro.get_indice(i) else {
                continue;
            };
            let class = fetch_addr(class, &self.heap);
            let Some(found) = class.as_object().and_then(|c| c.get_attr(attr)) else {
                continue;
            };
            if let (Value::Func(func), Some(recv)) = (fetch_addr(found, &self.heap), receiver) {
                return Some(Value::Func(Rc::new(func.bound(recv))));
            }
            return Some(found.clone());
        }
        None
    }

    /// Attribute lookup through addresses and the `__mro__` chain. Methods
    /// found on a class are bound to the receiver. Missing attributes answer
    /// `Undef`.
    pub fn get_attr_deep(&self, value: &Value, attr: &str, source: Option<CodeSource>) -> Context<Value>
    where
        T: Clone,
    {
        let found = self.lookup_attr(value, attr).unwrap_or(Value::Undef(source));
        self.clone().set_ret_val(found)
    }

    /// Indexed element lookup; negative indices count from a known length
    pub fn get_indice_deep(&self, value: &Value, index: i64, source: Option<CodeSource>) -> Context<Value>
    where
        T: Clone,
    {
        let fetched = fetch_addr(value, &self.heap);
        let found = fetched.as_object().and_then(|obj| {
            let index = match obj.length() {
                Some(len) if index < 0 => index + len,
                _ => index,
            };
            obj.get_indice(index).cloned()
        });
        self.clone().set_ret_val(found.unwrap_or(Value::Undef(source)))
    }

    pub fn get_key_val_deep(&self, value: &Value, key: &str, source: Option<CodeSource>) -> Context<Value>
    where
        T: Clone,
    {
        let fetched = fetch_addr(value, &self.heap);
        let found = fetched.as_object().and_then(|obj| obj.get_key_val(key).cloned());
        self.clone().set_ret_val(found.unwrap_or(Value::Undef(source)))
    }

    /// Read a size argument.
    ///
    /// A single argument that is a shaped object answers its shape; a single
    /// list or tuple is read element-wise; otherwise the arguments themselves are
    /// the dimensions. Every dimension must be an int.
    pub fn parse_size(&self, args: &[Value]) -> ContextSet<Result<ExpShape, String>>
    where
        T: Clone,
    {
        let result = self.parse_size_inner(args);
        self.clone().set_ret_val(result).to_set()
    }

    fn parse_size_inner(&self, args: &[Value]) -> Result<ExpShape, String> {
        if let [single] = args
            && let Value::Object(obj) = fetch_addr(single, &self.heap)
        {
            if let Some(shape) = &obj.shape {
                return Ok(shape.clone());
            }
            let Some(len) = obj.length() else {
                return Err(format!("parse_size: length of {} is not known", single));
            };
            let elems: Vec<Value> = (0..len)
                .map(|i| obj.get_indice(i).cloned().unwrap_or(Value::Undef(None)))
                .collect();
            return self.parse_dims(&elems);
        }
        self.parse_dims(args)
    }

    fn parse_dims(&self, elems: &[Value]) -> Result<ExpShape, String> {
        elems
            .iter()
            .map(|e| match fetch_addr(e, &self.heap) {
                Value::Int(n) => Ok(n.to_exp()),
                other => Err(format!("parse_size: expected an int dimension, got {}", other.type_name())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ExpShape::from_const)
    }

    /// Wrap into a set, routing a failed context to the failed side
    pub fn to_set(self) -> ContextSet<T>
    where
        T: Clone,
    {
        let mut set = ContextSet::empty();
        set.push(self);
        set
    }
}

impl<T: fmt::Display> fmt::Display for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.failed, self.fail_id) {
            (Some(err), Some(id)) => writeln!(f, "FAILED #{}: {}", id, err)?,
            _ => writeln!(f, "RUNNING")?,
        }
        writeln!(f, "retVal: {}", self.ret_val)?;
        writeln!(f, "env: {}", self.env)?;
        let stack: Vec<&str> = self.call_stack.iter().map(|(frame, _)| frame.name()).collect();
        writeln!(f, "callStack: [{}]", stack.join(", "))?;
        write!(f, "logs: {}", self.logs.len())
    }
}

/// Simultaneously possible paths after branching
#[derive(Clone, Debug)]
pub struct ContextSet<T: Clone> {
    live: Vector<Context<T>>,
    failed: Vector<Context<Value>>,
}

impl<T: Clone> ContextSet<T> {
    pub fn empty() -> Self {
        ContextSet {
            live: Vector::new(),
            failed: Vector::new(),
        }
    }

    /// Set holding one failed path
    pub fn failure(ctx: Context<Value>) -> Self {
        let mut set = ContextSet::empty();
        set.failed.push_back(ctx);
        set
    }

    pub fn from_contexts(contexts: impl IntoIterator<Item = Context<T>>) -> Self {
        let mut set = ContextSet::empty();
        for ctx in contexts {
            set.push(ctx);
        }
        set
    }

    /// A failed path's result becomes the latest failure recorded on it,
    /// which is the error `fail` answered last.
    fn push(&mut self, ctx: Context<T>) {
        let Some(first) = ctx.failed.clone() else {
            self.live.push_back(ctx);
            return;
        };
        let latest = ctx
            .logs
            .iter()
            .rev()
            .find(|log| log.level == ErrorLevel::Error)
            .cloned()
            .unwrap_or(first);
        self.failed.push_back(ctx.set_ret_val(Value::Error(latest)));
    }

    pub fn live(&self) -> &Vector<Context<T>> {
        &self.live
    }

    pub fn failed(&self) -> &Vector<Context<Value>> {
        &self.failed
    }

    pub fn into_parts(self) -> (Vector<Context<T>>, Vector<Context<Value>>) {
        (self.live, self.failed)
    }

    /// Number of paths, live and failed
    pub fn len(&self) -> usize {
        self.live.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.failed.is_empty()
    }

    /// Apply `f` to every live path
    pub fn map<U: Clone>(self, mut f: impl FnMut(Context<T>) -> Context<U>) -> ContextSet<U> {
        let mut out = ContextSet {
            live: Vector::new(),
            failed: self.failed,
        };
        for ctx in self.live {
            out.push(f(ctx));
        }
        out
    }

    /// Apply `f` to every live path and concatenate the resulting sets in order.
    /// Failed paths are carried over untouched.
    pub fn flat_map<U: Clone>(self, mut f: impl FnMut(Context<T>) -> ContextSet<U>) -> ContextSet<U> {
        let mut out = ContextSet {
            live: Vector::new(),
            failed: self.failed,
        };
        for ctx in self.live {
            let next = f(ctx);
            out.live.append(next.live);
            out.failed.append(next.failed);
        }
        out
    }

    pub fn join(mut self, other: ContextSet<T>) -> Self {
        self.live.append(other.live);
        self.failed.append(other.failed);
        self
    }

    /// Keep the live paths satisfying `pred`
    pub fn filter(self, mut pred: impl FnMut(&Context<T>) -> bool) -> Self {
        ContextSet {
            live: self.live.into_iter().filter(|ctx| pred(ctx)).collect(),
            failed: self.failed,
        }
    }

    /// Split the live paths by `pred`. Failed paths stay with the matching half.
    pub fn partition(self, mut pred: impl FnMut(&Context<T>) -> bool) -> (Self, Self) {
        let (matching, rest): (Vector<_>, Vector<_>) = self.live.into_iter().partition(|ctx| pred(ctx));
        (
            ContextSet {
                live: matching,
                failed: self.failed,
            },
            ContextSet {
                live: rest,
                failed: Vector::new(),
            },
        )
    }

    pub fn set_ret_val<U: Clone>(self, ret_val: U) -> ContextSet<U> {
        self.map(|ctx| ctx.set_ret_val(ret_val.clone()))
    }
}
