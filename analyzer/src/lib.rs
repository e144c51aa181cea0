//! Symbolic tensor-shape analyzer
//!
//! Interprets programs lowered to a small statement IR with symbolic values,
//! tracking every feasible path and the tensor operation graph each path builds.
//!
//! # Architecture
//!
//! ```text
//! ThStmt IR → Interpreter → ContextSet (live + failed paths) → PathReport
//!                 │
//!                 └── LibCallRegistry (h.*) → HExpr tensor graphs
//! ```
//!
//! # Example
//!
//! ```
//! use symtensor::config::Session;
//! use symtensor::interp::ir::{LibCallType, ThExpr, ThStmt};
//! use symtensor::interp::{Context, Interpreter};
//!
//! let dims = ThExpr::libcall(LibCallType::GenList, vec![ThExpr::int(2), ThExpr::int(3)]);
//! let program = ThStmt::ret(ThExpr::explicit("h.plain", vec![dims]));
//!
//! let session = Session::with_defaults().unwrap();
//! let paths = Interpreter::new().run(Context::new(session), &program);
//! assert_eq!(paths.live().len(), 1);
//! ```

pub mod common;
pub mod config;
pub mod diagnostics;
pub mod interp;

pub use config::{AnalyzerConfig, Session};
pub use diagnostics::{AnalysisError, PathReport, collect_reports};
pub use interp::{Context, ContextSet, Interpreter};
