//! Path-sensitive interpreter for the statement IR
//!
//! Runs lowered programs over immutable execution contexts, forking on
//! undecidable conditions and building symbolic tensor graphs through the
//! library call registry.

pub mod context;
pub mod env;
pub mod eval;
pub mod heap;
pub mod hexpr;
pub mod ir;
pub mod libcall;
pub mod symbolic;
pub mod value;

pub use context::{CallFrame, Context, ContextSet};
pub use env::Env;
pub use eval::{Flow, Interpreter};
pub use heap::{Address, Heap};
pub use hexpr::HExpr;
pub use ir::{ThExpr, ThStmt};
pub use libcall::{ExplicitParams, LibCallRegistry};
pub use symbolic::{ExpNum, ExpShape};
pub use value::Value;
