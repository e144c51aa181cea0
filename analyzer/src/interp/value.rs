//! Runtime values for the interpreter

use std::fmt;
use std::rc::Rc;

use im_rc::OrdMap;

use super::env::Env;
use super::heap::{Address, Heap};
use super::hexpr::HExpr;
use super::ir::{ThStmt, find_closure};
use super::symbolic::{ExpNum, ExpShape};
use crate::common::{CodeSource, IdSource};

/// Attribute holding the element count of list, tuple and dict objects
pub const LENGTH_ATTR: &str = "$length";
/// Attribute holding the method resolution order of a class object
pub const MRO_ATTR: &str = "__mro__";

/// Integer payload: a literal or a symbolic expression
#[derive(Clone, Debug, PartialEq)]
pub enum IntValue {
    Lit(i64),
    Sym(ExpNum),
}

impl IntValue {
    /// Lift to a symbolic number (constants stay constants)
    pub fn to_exp(&self) -> ExpNum {
        match self {
            IntValue::Lit(n) => ExpNum::Const(*n),
            IntValue::Sym(e) => e.clone(),
        }
    }

    /// Concrete value, if the payload is a literal or a constant expression
    pub fn as_const(&self) -> Option<i64> {
        match self {
            IntValue::Lit(n) => Some(*n),
            IntValue::Sym(e) => e.as_const(),
        }
    }
}

/// Float payload: a literal or a symbolic expression
#[derive(Clone, Debug, PartialEq)]
pub enum FloatValue {
    Lit(f64),
    Sym(ExpNum),
}

impl FloatValue {
    pub fn as_const(&self) -> Option<f64> {
        match self {
            FloatValue::Lit(v) => Some(*v),
            FloatValue::Sym(e) => e.as_const().map(|n| n as f64),
        }
    }
}

/// Severity of a diagnostic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorLevel {
    Error,
    Warning,
    Log,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::Error => write!(f, "Error"),
            ErrorLevel::Warning => write!(f, "Warning"),
            ErrorLevel::Log => write!(f, "Log"),
        }
    }
}

/// A diagnostic that is also a result value
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub reason: String,
    pub level: ErrorLevel,
    pub source: Option<CodeSource>,
}

impl ErrorValue {
    pub fn new(reason: impl Into<String>, level: ErrorLevel, source: Option<CodeSource>) -> Self {
        ErrorValue {
            reason: reason.into(),
            level,
            source,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SVError<{}: \"{}\">", self.level, self.reason)
    }
}

/// Heap-resident structural record.
///
/// Attributes, indexed elements and keyed entries are three independent slots.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub id: u64,
    pub addr: Address,
    pub attrs: OrdMap<String, Value>,
    pub indices: OrdMap<i64, Value>,
    pub key_values: OrdMap<String, Value>,
    /// Set for size-like objects that are themselves a shape
    pub shape: Option<ExpShape>,
    pub source: Option<CodeSource>,
}

impl Object {
    pub fn new(ids: &IdSource, addr: Address, source: Option<CodeSource>) -> Self {
        Object {
            id: ids.next_value_id(),
            addr,
            attrs: OrdMap::new(),
            indices: OrdMap::new(),
            key_values: OrdMap::new(),
            shape: None,
            source,
        }
    }

    /// Allocate a fresh empty object. The returned heap already binds it.
    pub fn create(ids: &IdSource, heap: &Heap, source: Option<CodeSource>) -> (Object, Address, Heap) {
        let (addr, heap) = heap.malloc(source.as_ref());
        let obj = Object::new(ids, addr, source);
        let heap = heap.set_val(addr, Value::Object(Rc::new(obj.clone())));
        (obj, addr, heap)
    }

    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn get_indice(&self, index: i64) -> Option<&Value> {
        self.indices.get(&index)
    }

    pub fn get_key_val(&self, key: &str) -> Option<&Value> {
        self.key_values.get(key)
    }

    pub fn set_attr(&self, name: impl Into<String>, value: Value) -> Object {
        let mut obj = self.clone();
        obj.attrs.insert(name.into(), value);
        obj
    }

    pub fn set_indice(&self, index: i64, value: Value) -> Object {
        let mut obj = self.clone();
        obj.indices.insert(index, value);
        obj
    }

    pub fn set_key_val(&self, key: impl Into<String>, value: Value) -> Object {
        let mut obj = self.clone();
        obj.key_values.insert(key.into(), value);
        obj
    }

    pub fn with_shape(&self, shape: ExpShape) -> Object {
        let mut obj = self.clone();
        obj.shape = Some(shape);
        obj
    }

    /// Concrete `$length`, if set
    pub fn length(&self) -> Option<i64> {
        match self.get_attr(LENGTH_ATTR) {
            Some(Value::Int(n)) => n.as_const(),
            _ => None,
        }
    }

    /// Copy into a fresh slot with a fresh identity
    pub fn clone_at(&self, ids: &IdSource, heap: &Heap, source: Option<CodeSource>) -> (Object, Address, Heap) {
        let (addr, heap) = heap.malloc(source.as_ref());
        let mut obj = self.clone();
        obj.id = ids.next_value_id();
        obj.addr = addr;
        obj.source = source;
        let heap = heap.set_val(addr, Value::Object(Rc::new(obj.clone())));
        (obj, addr, heap)
    }

    fn add_offset(&self, offset: i64) -> Object {
        Object {
            id: self.id,
            addr: self.addr.add_offset(offset),
            attrs: self.attrs.iter().map(|(k, v)| (k.clone(), v.add_offset(offset))).collect(),
            indices: self.indices.iter().map(|(k, v)| (*k, v.add_offset(offset))).collect(),
            key_values: self
                .key_values
                .iter()
                .map(|(k, v)| (k.clone(), v.add_offset(offset)))
                .collect(),
            shape: self.shape.clone(),
            source: self.source.clone(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{{ ", self.addr.0)?;
        write_slot(f, self.attrs.iter().map(|(k, v)| (k.to_string(), v)))?;
        write!(f, ", ")?;
        write_slot(f, self.indices.iter().map(|(k, v)| (k.to_string(), v)))?;
        write!(f, ", ")?;
        write_slot(f, self.key_values.iter().map(|(k, v)| (format!("\"{}\"", k), v)))?;
        if let Some(shape) = &self.shape {
            write!(f, ", shape: {}", shape)?;
        }
        write!(f, " }}")
    }
}

fn write_slot<'a>(f: &mut fmt::Formatter<'_>, entries: impl Iterator<Item = (String, &'a Value)>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in entries.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", k, v)?;
    }
    write!(f, "}}")
}

/// Function value with its captured environment
#[derive(Clone, Debug, PartialEq)]
pub struct Func {
    pub id: u64,
    pub name: String,
    pub params: Vec<String>,
    pub defaults: OrdMap<String, Value>,
    /// `None` for library stand-ins without an interpretable body
    pub body: Option<Rc<ThStmt>>,
    /// Whether the body defines nested functions
    pub has_closure: bool,
    pub env: Option<Env>,
    pub varargs_param: Option<String>,
    pub kwargs_param: Option<String>,
    pub key_only_num: usize,
    pub source: Option<CodeSource>,
}

impl Func {
    pub fn new(
        ids: &IdSource,
        name: impl Into<String>,
        params: Vec<String>,
        body: Option<Rc<ThStmt>>,
        env: Option<Env>,
        source: Option<CodeSource>,
    ) -> Self {
        let has_closure = body.as_deref().map(find_closure).unwrap_or(false);
        Func {
            id: ids.next_value_id(),
            name: name.into(),
            params,
            defaults: OrdMap::new(),
            body,
            has_closure,
            env,
            varargs_param: None,
            kwargs_param: None,
            key_only_num: 0,
            source,
        }
    }

    pub fn with_defaults(mut self, defaults: OrdMap<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_varargs_param(mut self, name: impl Into<String>) -> Self {
        self.varargs_param = Some(name.into());
        self
    }

    pub fn with_kwargs_param(mut self, name: impl Into<String>) -> Self {
        self.kwargs_param = Some(name.into());
        self
    }

    pub fn with_key_only_num(mut self, num: usize) -> Self {
        self.key_only_num = num;
        self
    }

    /// Bind the first parameter to `self_addr`, producing a method bound to its receiver
    pub fn bound(&self, self_addr: Address) -> Func {
        let mut func = self.clone();
        if let Some((first, rest)) = self.params.split_first() {
            let env = self.env.clone().unwrap_or_default();
            func.env = Some(env.set(first.clone(), self_addr));
            func.params = rest.to_vec();
        }
        func
    }

    fn add_offset(&self, offset: i64) -> Func {
        let mut func = self.clone();
        func.defaults = self
            .defaults
            .iter()
            .map(|(k, v)| (k.clone(), v.add_offset(offset)))
            .collect();
        func.env = self.env.as_ref().map(|env| env.add_offset(offset));
        func
    }
}

/// Symbolic tensor value
#[derive(Clone, Debug, PartialEq)]
pub struct TensorGraph {
    /// Operation chain that produced this tensor, if known
    pub graph: Option<Rc<HExpr>>,
    pub source: Option<CodeSource>,
}

/// Runtime value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Reference to a heap slot
    Addr(Address),
    Int(IntValue),
    Float(FloatValue),
    String(String),
    Bool(bool),
    Object(Rc<Object>),
    Func(Rc<Func>),
    None(Option<CodeSource>),
    NotImpl {
        reason: Option<String>,
        source: Option<CodeSource>,
    },
    Undef(Option<CodeSource>),
    Tensor(TensorGraph),
    Error(Rc<ErrorValue>),
}

impl Value {
    pub fn int(value: i64) -> Value {
        Value::Int(IntValue::Lit(value))
    }

    pub fn float(value: f64) -> Value {
        Value::Float(FloatValue::Lit(value))
    }

    pub fn string(value: impl Into<String>) -> Value {
        Value::String(value.into())
    }

    pub fn not_impl(reason: impl Into<String>, source: Option<CodeSource>) -> Value {
        Value::NotImpl {
            reason: Some(reason.into()),
            source,
        }
    }

    pub fn tensor(graph: HExpr, source: Option<CodeSource>) -> Value {
        Value::Tensor(TensorGraph {
            graph: Some(Rc::new(graph)),
            source,
        })
    }

    pub fn error(error: ErrorValue) -> Value {
        Value::Error(Rc::new(error))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Addr(_) => "addr",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Object(_) => "object",
            Value::Func(_) => "func",
            Value::None(_) => "none",
            Value::NotImpl { .. } => "notimpl",
            Value::Undef(_) => "undef",
            Value::Tensor(_) => "tensor",
            Value::Error(_) => "error",
        }
    }

    pub fn as_addr(&self) -> Option<Address> {
        match self {
            Value::Addr(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Rc<ErrorValue>> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Shift every address reachable from this value. Only non-negative
    /// addresses move.
    pub fn add_offset(&self, offset: i64) -> Value {
        match self {
            Value::Addr(addr) => Value::Addr(addr.add_offset(offset)),
            Value::Object(obj) => Value::Object(Rc::new(obj.add_offset(offset))),
            Value::Func(func) => Value::Func(Rc::new(func.add_offset(offset))),
            _ => self.clone(),
        }
    }
}

/// Follow address references until a non-address value is reached.
///
/// A cycle of addresses or a dangling address yields `Undef`.
pub fn fetch_addr(value: &Value, heap: &Heap) -> Value {
    let mut current = value.clone();
    let mut hops = 0;
    while let Value::Addr(addr) = current {
        if hops > heap.len() {
            return Value::Undef(None);
        }
        current = match heap.try_get(addr) {
            Some(next) => next.clone(),
            None => return Value::Undef(None),
        };
        hops += 1;
    }
    current
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Addr(addr) => write!(f, "{}", addr),
            Value::Int(IntValue::Lit(n)) => write!(f, "{}", n),
            Value::Int(IntValue::Sym(e)) => write!(f, "{}", e),
            Value::Float(FloatValue::Lit(v)) => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Float(FloatValue::Sym(e)) => write!(f, "{}", e),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Object(obj) => write!(f, "{}", obj),
            Value::Func(func) => write!(f, "{}({})", func.name, func.params.join(", ")),
            Value::None(_) => write!(f, "None"),
            Value::NotImpl { reason: Some(r), .. } => write!(f, "NotImpl({})", r),
            Value::NotImpl { reason: None, .. } => write!(f, "NotImpl"),
            Value::Undef(_) => write!(f, "UNDEF"),
            Value::Tensor(TensorGraph { graph: Some(g), .. }) => {
                write!(f, "Tensor<{}>", g.to_string().split('\n').map(str::trim).collect::<Vec<_>>().join(" "))
            }
            Value::Tensor(TensorGraph { graph: None, .. }) => write!(f, "Tensor<?>"),
            Value::Error(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::hexpr::{BopType, HExpr};

    #[test]
    fn test_object_slots_are_independent() {
        let ids = IdSource::new();
        let (obj, addr, _) = Object::create(&ids, &Heap::new(), None);
        let obj = obj
            .set_attr("shape", Value::int(1))
            .set_indice(0, Value::int(2))
            .set_key_val("shape", Value::int(3));
        assert_eq!(addr, Address(0));
        assert_eq!(obj.get_attr("shape"), Some(&Value::int(1)));
        assert_eq!(obj.get_indice(0), Some(&Value::int(2)));
        assert_eq!(obj.get_key_val("shape"), Some(&Value::int(3)));
        assert!(obj.get_indice(1).is_none());
    }

    #[test]
    fn test_object_prints_in_sorted_order() {
        let ids = IdSource::new();
        let base = Object::new(&ids, Address(4), None);
        let a = base.set_attr("b", Value::int(2)).set_attr("a", Value::int(1));
        let b = base.set_attr("a", Value::int(1)).set_attr("b", Value::int(2));
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "[4]{ {a: 1, b: 2}, {}, {} }");
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(Value::float(2.0).to_string(), "2.0");
        assert_eq!(Value::float(2.5).to_string(), "2.5");
        assert_eq!(Value::Addr(Address(3)).to_string(), "Loc(3)");
        let err = ErrorValue::new("bad", ErrorLevel::Warning, None);
        assert_eq!(Value::error(err).to_string(), "SVError<Warning: \"bad\">");
        assert_eq!(Value::Undef(None).to_string(), "UNDEF");
    }

    #[test]
    fn test_tensor_display_is_single_line() {
        let g = HExpr::bop(BopType::Add, HExpr::nat(1, None), HExpr::nat(2, None), None);
        assert_eq!(Value::tensor(g, None).to_string(), "Tensor<1 + 2>");
    }

    #[test]
    fn test_add_offset_shifts_nested_addresses() {
        let ids = IdSource::new();
        let obj = Object::new(&ids, Address(1), None).set_indice(0, Value::Addr(Address(2)));
        let func = Func::new(&ids, "f", vec![], None, Some(Env::new().set("x", Address(0))), None)
            .with_defaults(OrdMap::unit("y".to_string(), Value::Addr(Address(3))));

        let shifted = Value::Object(Rc::new(obj)).add_offset(-10);
        let obj = shifted.as_object().unwrap();
        assert_eq!(obj.addr, Address(-9));
        assert_eq!(obj.get_indice(0), Some(&Value::Addr(Address(-8))));

        let Value::Func(func) = Value::Func(Rc::new(func)).add_offset(-10) else {
            panic!("expected function");
        };
        assert_eq!(func.env.as_ref().unwrap().get("x"), Some(Address(-10)));
        assert_eq!(func.defaults.get("y"), Some(&Value::Addr(Address(-7))));
    }

    #[test]
    fn test_bound_method_drops_receiver() {
        let ids = IdSource::new();
        let func = Func::new(&ids, "m", vec!["self".into(), "x".into()], None, None, None);
        let bound = func.bound(Address(5));
        assert_eq!(bound.params, vec!["x".to_string()]);
        assert_eq!(bound.env.unwrap().get("self"), Some(Address(5)));
    }

    #[test]
    fn test_fetch_addr_follows_chain() {
        let (a, heap) = Heap::new().alloc(Value::int(9), None);
        let (b, heap) = heap.alloc(Value::Addr(a), None);
        assert_eq!(fetch_addr(&Value::Addr(b), &heap), Value::int(9));
    }
}
