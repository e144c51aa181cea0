//! Library call registry
//!
//! Native semantics of library operations. The interpreter routes explicit
//! library calls here by implementation name (`h.add`, `h.matmul`, ...).

pub mod h;

use rustc_hash::FxHashMap;
use tracing::trace;

use super::context::{Context, ContextSet};
use super::value::Value;
use crate::common::CodeSource;

/// Evaluated arguments of an explicit library call
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ExplicitParams {
    pub params: Vec<Value>,
}

impl ExplicitParams {
    pub fn new(params: Vec<Value>) -> Self {
        ExplicitParams { params }
    }
}

/// Type alias for a library call implementation
pub type LibCallImpl = fn(Context<ExplicitParams>, Option<CodeSource>) -> ContextSet<Value>;

/// Registry of library call implementations
pub struct LibCallRegistry {
    /// Map from qualified implementation name to handler
    impls: FxHashMap<String, LibCallImpl>,
}

impl LibCallRegistry {
    /// Create a registry with every standard library module
    pub fn new() -> Self {
        let mut registry = LibCallRegistry::empty();
        h::register(&mut registry);
        registry
    }

    pub fn empty() -> Self {
        LibCallRegistry {
            impls: FxHashMap::default(),
        }
    }

    /// Register an implementation under its qualified name
    pub fn register(&mut self, name: &str, handler: LibCallImpl) {
        self.impls.insert(name.to_string(), handler);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.impls.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<LibCallImpl> {
        self.impls.get(name).copied()
    }

    /// Call an implementation. An unknown name fails the path.
    pub fn call(&self, name: &str, ctx: Context<ExplicitParams>, source: Option<CodeSource>) -> ContextSet<Value> {
        match self.impls.get(name) {
            Some(handler) => {
                trace!(name, argc = ctx.ret_val().params.len(), "library call");
                handler(ctx, source)
            }
            None => ctx
                .fail_with_msg(format!("unknown library call: {}", name), source)
                .to_set(),
        }
    }

    /// Get all registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.impls.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for LibCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Session;

    #[test]
    fn test_registry_creation() {
        let registry = LibCallRegistry::new();
        for name in ["h.plain", "h.add", "h.concat", "h.transpose", "h.averagepoolp", "h.rtangent"] {
            assert!(registry.is_registered(name), "{} missing", name);
        }
        assert!(!registry.is_registered("h.conv3d"));
        assert_eq!(registry.names().len(), 22);
    }

    #[test]
    fn test_unknown_call_fails() {
        let registry = LibCallRegistry::new();
        let ctx = Context::new(Session::with_defaults().unwrap()).set_ret_val(ExplicitParams::default());
        let set = registry.call("h.nope", ctx, None);
        assert_eq!(set.live().len(), 0);
        assert_eq!(set.failed().len(), 1);
        assert_eq!(
            set.failed()[0].failed().unwrap().reason,
            "unknown library call: h.nope"
        );
    }
}
