//! Statement and expression IR consumed by the interpreter
//!
//! The front end lowers source programs into this small language. Every node
//! carries the location of the syntax it was lowered from.

use std::fmt;
use std::rc::Rc;

use crate::common::CodeSource;

const INDENT_WIDTH: usize = 2;

/// Binary operator of the IR
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TEBopType {
    // numeric
    Add,
    Sub,
    Mul,
    Pow,
    TrueDiv,
    FloorDiv,
    Mod,
    // comparison
    Lt,
    Lte,
    Eq,
    Neq,
    // boolean
    And,
    Or,
    Is,
    IsNot,
    // membership
    In,
    NotIn,
}

impl TEBopType {
    pub fn symbol(self) -> &'static str {
        match self {
            TEBopType::Add => "+",
            TEBopType::Sub => "-",
            TEBopType::Mul => "*",
            TEBopType::Pow => "**",
            TEBopType::TrueDiv => "/",
            TEBopType::FloorDiv => "//",
            TEBopType::Mod => "%",
            TEBopType::Lt => "<",
            TEBopType::Lte => "<=",
            TEBopType::Eq => "==",
            TEBopType::Neq => "!=",
            TEBopType::And => "and",
            TEBopType::Or => "or",
            TEBopType::Is => "is",
            TEBopType::IsNot => "is not",
            TEBopType::In => "in",
            TEBopType::NotIn => "not in",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TEUopType {
    Not,
    Neg,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    None,
}

/// Routing tag of a library call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LibCallType {
    Debug,
    Import,
    GenList,
    GenDict,
    SetDefault,
    CallKV,
    ObjectClass,
    ExportGlobal,
    Raise,
    Explicit,
}

impl LibCallType {
    pub fn name(self) -> &'static str {
        match self {
            LibCallType::Debug => "DEBUG",
            LibCallType::Import => "import",
            LibCallType::GenList => "genList",
            LibCallType::GenDict => "genDict",
            LibCallType::SetDefault => "setDefault",
            LibCallType::CallKV => "callKV",
            LibCallType::ObjectClass => "objectClass",
            LibCallType::ExportGlobal => "exportGlobal",
            LibCallType::Raise => "raise",
            LibCallType::Explicit => "explicit",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThExprKind {
    Const(ConstValue),
    /// Fresh empty object
    Object,
    Tuple(Vec<ThExpr>),
    Call {
        func: Box<ThExpr>,
        args: Vec<ThExpr>,
    },
    /// Parameters are optionally named
    LibCall {
        kind: LibCallType,
        params: Vec<(Option<String>, ThExpr)>,
    },
    BinOp {
        op: TEBopType,
        left: Box<ThExpr>,
        right: Box<ThExpr>,
    },
    UnaryOp {
        op: TEUopType,
        base: Box<ThExpr>,
    },
    Name(String),
    Attr {
        base: Box<ThExpr>,
        attr: String,
    },
    Subscr {
        base: Box<ThExpr>,
        index: Box<ThExpr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThExpr {
    pub kind: ThExprKind,
    pub source: Option<CodeSource>,
}

impl ThExpr {
    pub fn new(kind: ThExprKind) -> Self {
        ThExpr { kind, source: None }
    }

    pub fn with_source(mut self, source: CodeSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn int(value: i64) -> Self {
        ThExpr::new(ThExprKind::Const(ConstValue::Int(value)))
    }

    pub fn float(value: f64) -> Self {
        ThExpr::new(ThExprKind::Const(ConstValue::Float(value)))
    }

    pub fn string(value: impl Into<String>) -> Self {
        ThExpr::new(ThExprKind::Const(ConstValue::String(value.into())))
    }

    pub fn bool(value: bool) -> Self {
        ThExpr::new(ThExprKind::Const(ConstValue::Bool(value)))
    }

    pub fn none() -> Self {
        ThExpr::new(ThExprKind::Const(ConstValue::None))
    }

    pub fn object() -> Self {
        ThExpr::new(ThExprKind::Object)
    }

    pub fn tuple(values: Vec<ThExpr>) -> Self {
        ThExpr::new(ThExprKind::Tuple(values))
    }

    pub fn name(ident: impl Into<String>) -> Self {
        ThExpr::new(ThExprKind::Name(ident.into()))
    }

    pub fn call(func: ThExpr, args: Vec<ThExpr>) -> Self {
        ThExpr::new(ThExprKind::Call {
            func: Box::new(func),
            args,
        })
    }

    /// Library call with positional parameters
    pub fn libcall(kind: LibCallType, args: Vec<ThExpr>) -> Self {
        ThExpr::new(ThExprKind::LibCall {
            kind,
            params: args.into_iter().map(|a| (None, a)).collect(),
        })
    }

    /// Explicit call of the library implementation `name`, e.g. `h.add`
    pub fn explicit(name: impl Into<String>, mut args: Vec<ThExpr>) -> Self {
        args.insert(0, ThExpr::string(name));
        ThExpr::libcall(LibCallType::Explicit, args)
    }

    pub fn binop(op: TEBopType, left: ThExpr, right: ThExpr) -> Self {
        ThExpr::new(ThExprKind::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unop(op: TEUopType, base: ThExpr) -> Self {
        ThExpr::new(ThExprKind::UnaryOp {
            op,
            base: Box::new(base),
        })
    }

    pub fn attr(base: ThExpr, attr: impl Into<String>) -> Self {
        ThExpr::new(ThExprKind::Attr {
            base: Box::new(base),
            attr: attr.into(),
        })
    }

    pub fn subscr(base: ThExpr, index: ThExpr) -> Self {
        ThExpr::new(ThExprKind::Subscr {
            base: Box::new(base),
            index: Box::new(index),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThStmtKind {
    Pass,
    Expr(ThExpr),
    Seq(Rc<ThStmt>, Rc<ThStmt>),
    /// Target is a name, attribute or subscript expression
    Assign { target: ThExpr, value: ThExpr },
    If {
        cond: ThExpr,
        then_branch: Rc<ThStmt>,
        else_branch: Rc<ThStmt>,
    },
    ForIn {
        ident: String,
        iter: ThExpr,
        body: Rc<ThStmt>,
    },
    Return(ThExpr),
    Continue,
    Break,
    /// `name` is bound (to `value`, or undefined) inside `scope`
    Let {
        name: String,
        value: Option<ThExpr>,
        scope: Rc<ThStmt>,
    },
    /// `name` is bound to the function inside `scope`
    FunDef {
        name: String,
        params: Vec<String>,
        body: Rc<ThStmt>,
        scope: Rc<ThStmt>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThStmt {
    pub kind: ThStmtKind,
    pub source: Option<CodeSource>,
}

impl ThStmt {
    pub fn new(kind: ThStmtKind) -> Self {
        ThStmt { kind, source: None }
    }

    pub fn with_source(mut self, source: CodeSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn pass() -> Self {
        ThStmt::new(ThStmtKind::Pass)
    }

    pub fn expr(expr: ThExpr) -> Self {
        ThStmt::new(ThStmtKind::Expr(expr))
    }

    /// Fold a list of statements into nested sequences
    pub fn seq(stmts: Vec<ThStmt>) -> Self {
        let mut iter = stmts.into_iter().rev();
        let Some(last) = iter.next() else {
            return ThStmt::pass();
        };
        iter.fold(last, |acc, stmt| {
            ThStmt::new(ThStmtKind::Seq(Rc::new(stmt), Rc::new(acc)))
        })
    }

    pub fn assign(target: ThExpr, value: ThExpr) -> Self {
        ThStmt::new(ThStmtKind::Assign { target, value })
    }

    pub fn if_else(cond: ThExpr, then_branch: ThStmt, else_branch: ThStmt) -> Self {
        ThStmt::new(ThStmtKind::If {
            cond,
            then_branch: Rc::new(then_branch),
            else_branch: Rc::new(else_branch),
        })
    }

    pub fn for_in(ident: impl Into<String>, iter: ThExpr, body: ThStmt) -> Self {
        ThStmt::new(ThStmtKind::ForIn {
            ident: ident.into(),
            iter,
            body: Rc::new(body),
        })
    }

    pub fn ret(expr: ThExpr) -> Self {
        ThStmt::new(ThStmtKind::Return(expr))
    }

    pub fn cont() -> Self {
        ThStmt::new(ThStmtKind::Continue)
    }

    pub fn brk() -> Self {
        ThStmt::new(ThStmtKind::Break)
    }

    pub fn let_in(name: impl Into<String>, value: Option<ThExpr>, scope: ThStmt) -> Self {
        ThStmt::new(ThStmtKind::Let {
            name: name.into(),
            value,
            scope: Rc::new(scope),
        })
    }

    pub fn fundef(name: impl Into<String>, params: Vec<String>, body: ThStmt, scope: ThStmt) -> Self {
        ThStmt::new(ThStmtKind::FunDef {
            name: name.into(),
            params,
            body: Rc::new(body),
            scope: Rc::new(scope),
        })
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let sp = " ".repeat(indent);
        let inner = indent + INDENT_WIDTH;
        match &self.kind {
            ThStmtKind::Pass => write!(f, "{}pass", sp),
            ThStmtKind::Expr(e) => write!(f, "{}{}", sp, e),
            ThStmtKind::Seq(left, right) => {
                left.write_indented(f, indent)?;
                writeln!(f, ";")?;
                right.write_indented(f, indent)
            }
            ThStmtKind::Assign { target, value } => write!(f, "{}{} = {}", sp, target, value),
            ThStmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                writeln!(f, "{}if {} then {{", sp, cond)?;
                then_branch.write_indented(f, inner)?;
                writeln!(f)?;
                writeln!(f, "{}}} else {{", sp)?;
                else_branch.write_indented(f, inner)?;
                write!(f, "\n{}}}", sp)
            }
            ThStmtKind::ForIn { ident, iter, body } => {
                writeln!(f, "{}for {} in {} {{", sp, ident, iter)?;
                body.write_indented(f, inner)?;
                write!(f, "\n{}}}", sp)
            }
            ThStmtKind::Return(e) => write!(f, "{}return {}", sp, e),
            ThStmtKind::Continue => write!(f, "{}continue", sp),
            ThStmtKind::Break => write!(f, "{}break", sp),
            ThStmtKind::Let { name, value, scope } => {
                match value {
                    Some(v) => writeln!(f, "{}{} := {} in", sp, name, v)?,
                    None => writeln!(f, "{}{} := undef in", sp, name)?,
                }
                scope.write_indented(f, inner)
            }
            ThStmtKind::FunDef {
                name,
                params,
                body,
                scope,
            } => {
                writeln!(f, "{}def {}({}) {{", sp, name, params.join(", "))?;
                body.write_indented(f, inner)?;
                writeln!(f, "\n{}}}", sp)?;
                scope.write_indented(f, indent)
            }
        }
    }
}

/// Whether `stmt` defines a function anywhere inside it
pub fn find_closure(stmt: &ThStmt) -> bool {
    match &stmt.kind {
        ThStmtKind::FunDef { .. } => true,
        ThStmtKind::Seq(left, right) => find_closure(left) || find_closure(right),
        ThStmtKind::Let { scope, .. } => find_closure(scope),
        ThStmtKind::If {
            then_branch,
            else_branch,
            ..
        } => find_closure(then_branch) || find_closure(else_branch),
        ThStmtKind::ForIn { body, .. } => find_closure(body),
        _ => false,
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(n) => write!(f, "{}", n),
            ConstValue::Float(v) => write!(f, "{:?}", v),
            ConstValue::String(s) => write!(f, "\"{}\"", s),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::None => write!(f, "None"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[ThExpr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for ThExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ThExprKind::Const(c) => write!(f, "{}", c),
            ThExprKind::Object => write!(f, "{{}}"),
            ThExprKind::Tuple(values) => {
                write!(f, "(")?;
                write_list(f, values)?;
                write!(f, ")")
            }
            ThExprKind::Call { func, args } => {
                write!(f, "{}(", func)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ThExprKind::LibCall { kind, params } => {
                write!(f, "LibCall.{}(", kind.name())?;
                for (i, (name, e)) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match name {
                        Some(n) => write!(f, "{}={}", n, e)?,
                        None => write!(f, "{}", e)?,
                    }
                }
                write!(f, ")")
            }
            ThExprKind::BinOp { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            ThExprKind::UnaryOp { op, base } => match op {
                TEUopType::Not => write!(f, "(not {})", base),
                TEUopType::Neg => write!(f, "(-{})", base),
            },
            ThExprKind::Name(ident) => write!(f, "{}", ident),
            ThExprKind::Attr { base, attr } => write!(f, "{}.{}", base, attr),
            ThExprKind::Subscr { base, index } => write!(f, "{}[{}]", base, index),
        }
    }
}

impl fmt::Display for ThStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_closure() {
        let flat = ThStmt::seq(vec![ThStmt::pass(), ThStmt::ret(ThExpr::int(1))]);
        assert!(!find_closure(&flat));

        let nested = ThStmt::let_in(
            "x",
            None,
            ThStmt::if_else(
                ThExpr::bool(true),
                ThStmt::fundef("g", vec![], ThStmt::pass(), ThStmt::pass()),
                ThStmt::pass(),
            ),
        );
        assert!(find_closure(&nested));
    }

    #[test]
    fn test_display() {
        let stmt = ThStmt::seq(vec![
            ThStmt::assign(
                ThExpr::name("y"),
                ThExpr::explicit("h.add", vec![ThExpr::name("x"), ThExpr::int(1)]),
            ),
            ThStmt::ret(ThExpr::binop(TEBopType::Mul, ThExpr::name("y"), ThExpr::float(2.0))),
        ]);
        assert_eq!(
            stmt.to_string(),
            "y = LibCall.explicit(\"h.add\", x, 1);\nreturn (y * 2.0)"
        );
    }

    #[test]
    fn test_empty_seq_is_pass() {
        assert_eq!(ThStmt::seq(vec![]).kind, ThStmtKind::Pass);
    }
}
