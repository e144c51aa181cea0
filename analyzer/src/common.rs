//! Common types and utilities used throughout the analyzer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source span (byte offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Location of the syntax that produced a value, an operation or a diagnostic.
///
/// The front end hands these out opaquely. `Node` sources belong to a module file
/// and can be attributed back to a user call site; `Range` sources are raw ranges
/// indexed by a file id and are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodeSource {
    /// A located syntax node inside the module file at `path`
    Node { path: Rc<str>, span: Span },
    /// A raw code range in the file registered under `file_id`
    Range { file_id: u32, span: Span },
}

impl CodeSource {
    pub fn node(path: impl Into<Rc<str>>, span: Span) -> Self {
        CodeSource::Node {
            path: path.into(),
            span,
        }
    }

    pub fn range(file_id: u32, span: Span) -> Self {
        CodeSource::Range { file_id, span }
    }

    /// Module path of a node source
    pub fn path(&self) -> Option<&str> {
        match self {
            CodeSource::Node { path, .. } => Some(path),
            CodeSource::Range { .. } => None,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CodeSource::Node { span, .. } | CodeSource::Range { span, .. } => *span,
        }
    }
}

impl fmt::Display for CodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeSource::Node { path, span } => write!(f, "{}:{}", path, span),
            CodeSource::Range { file_id, span } => write!(f, "<file {}>:{}", file_id, span),
        }
    }
}

/// Monotonic counters shared by every path of one analysis.
///
/// Each counter is collision-free across all contexts that share this source.
/// Counters are independent of each other.
#[derive(Debug)]
pub struct IdSource {
    value: AtomicU64,
    plain: AtomicU64,
    cipher: AtomicU64,
    symbol: AtomicU64,
    failure: AtomicU64,
}

impl IdSource {
    pub fn new() -> Self {
        IdSource {
            value: AtomicU64::new(1),
            plain: AtomicU64::new(0),
            cipher: AtomicU64::new(0),
            symbol: AtomicU64::new(0),
            failure: AtomicU64::new(1),
        }
    }

    /// Identity of a freshly created object or function value
    pub fn next_value_id(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Name for a fresh plain tensor placeholder (`tempPlain<N>`)
    pub fn next_plain_name(&self) -> String {
        format!("tempPlain{}", self.plain.fetch_add(1, Ordering::SeqCst))
    }

    /// Name for a fresh cipher tensor placeholder (`tempCipher<N>`)
    pub fn next_cipher_name(&self) -> String {
        format!("tempCipher{}", self.cipher.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_symbol_id(&self) -> u64 {
        self.symbol.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_failure_id(&self) -> u64 {
        self.failure.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let merged = Span::new(4, 8).merge(Span::new(2, 5));
        assert_eq!(merged, Span::new(2, 8));
        assert_eq!(merged.len(), 6);
    }

    #[test]
    fn test_id_source_counters_are_independent() {
        let ids = IdSource::new();
        assert_eq!(ids.next_plain_name(), "tempPlain0");
        assert_eq!(ids.next_plain_name(), "tempPlain1");
        assert_eq!(ids.next_cipher_name(), "tempCipher0");
        assert_eq!(ids.next_failure_id(), 1);
        assert_eq!(ids.next_failure_id(), 2);
        assert_eq!(ids.next_value_id(), 1);
    }

    #[test]
    fn test_range_source_has_no_path() {
        let src = CodeSource::range(3, Span::new(0, 1));
        assert!(src.path().is_none());
        assert_eq!(src.to_string(), "<file 3>:0..1");
    }
}
