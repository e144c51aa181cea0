//! Diagnostic reporting with source locations
//!
//! Analysis findings live on each path as logged error values. This module turns
//! them into `miette` diagnostics and per-path reports for a rendering layer.

use std::fmt;
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, Severity, SourceCode, SourceSpan};
use thiserror::Error;

use crate::common::{CodeSource, Span};
use crate::config::ConfigError;
use crate::interp::context::{Context, ContextSet};
use crate::interp::value::{ErrorLevel, ErrorValue};

/// Convert our Span to miette's SourceSpan
impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.len())
    }
}

/// Host-level failure of the analyzer itself
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum AnalysisError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Not implemented: {0}")]
    #[diagnostic(code(analysis::not_implemented))]
    NotImplemented(String),

    #[error("Expected a constant tensor, found:\n{0}")]
    #[diagnostic(code(analysis::not_a_constant))]
    NotATensorConstant(String),
}

/// One logged diagnostic of a path
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct DiagnosticRecord {
    pub reason: String,
    pub level: ErrorLevel,
    pub location: Option<CodeSource>,
    source_code: Option<Arc<NamedSource<String>>>,
}

impl DiagnosticRecord {
    pub fn new(error: &ErrorValue) -> Self {
        DiagnosticRecord {
            reason: error.reason.clone(),
            level: error.level,
            location: error.source.clone(),
            source_code: None,
        }
    }

    /// Attach the contents of the file the location points into, so that the
    /// location can be rendered as a labelled snippet.
    pub fn with_source_code(mut self, name: impl AsRef<str>, content: impl Into<String>) -> Self {
        self.source_code = Some(Arc::new(NamedSource::new(name, content.into())));
        self
    }
}

impl Diagnostic for DiagnosticRecord {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code = match self.level {
            ErrorLevel::Error => "analysis::error",
            ErrorLevel::Warning => "analysis::warning",
            ErrorLevel::Log => "analysis::log",
        };
        Some(Box::new(code))
    }

    fn severity(&self) -> Option<Severity> {
        Some(match self.level {
            ErrorLevel::Error => Severity::Error,
            ErrorLevel::Warning => Severity::Warning,
            ErrorLevel::Log => Severity::Advice,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.location
            .as_ref()
            .map(|loc| Box::new(format!("at {}", loc)) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.source_code.as_deref().map(|s| s as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        self.source_code.as_ref()?;
        let span = self.location.as_ref()?.span();
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some(self.level.to_string().to_lowercase()),
            SourceSpan::from(span),
        ))))
    }
}

/// Diagnostics of one explored path
#[derive(Debug, Clone)]
pub struct PathReport {
    /// Set when the path terminated
    pub failure_id: Option<u64>,
    /// Logged diagnostics in insertion order
    pub records: Vec<DiagnosticRecord>,
}

impl PathReport {
    pub fn from_context<T>(ctx: &Context<T>) -> Self {
        PathReport {
            failure_id: ctx.fail_id(),
            records: ctx.logs().iter().map(|e| DiagnosticRecord::new(e)).collect(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure_id.is_some()
    }

    pub fn count(&self, level: ErrorLevel) -> usize {
        self.records.iter().filter(|r| r.level == level).count()
    }
}

impl fmt::Display for PathReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure_id {
            Some(id) => writeln!(f, "failed path #{}", id)?,
            None => writeln!(f, "live path")?,
        }
        for record in &self.records {
            write!(f, "  [{}] {}", record.level, record.reason)?;
            if let Some(loc) = &record.location {
                write!(f, " ({})", loc)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Reports for every path of `set`: live paths first, then failed ones, each
/// in set order.
pub fn collect_reports<T: Clone>(set: &ContextSet<T>) -> Vec<PathReport> {
    set.live()
        .iter()
        .map(PathReport::from_context)
        .chain(set.failed().iter().map(PathReport::from_context))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        let err = ErrorValue::new("bad shape", ErrorLevel::Error, None);
        let warn = ErrorValue::new("odd shape", ErrorLevel::Warning, None);
        let log = ErrorValue::new("note", ErrorLevel::Log, None);
        assert_eq!(DiagnosticRecord::new(&err).severity(), Some(Severity::Error));
        assert_eq!(DiagnosticRecord::new(&warn).severity(), Some(Severity::Warning));
        assert_eq!(DiagnosticRecord::new(&log).severity(), Some(Severity::Advice));
    }

    #[test]
    fn test_labels_need_source_code() {
        let loc = CodeSource::node("model.py", Span::new(4, 9));
        let err = ErrorValue::new("bad shape", ErrorLevel::Error, Some(loc));
        let record = DiagnosticRecord::new(&err);
        assert!(record.labels().is_none());
        assert_eq!(record.help().unwrap().to_string(), "at model.py:4..9");

        let record = record.with_source_code("model.py", "y = x @ w\n");
        let labels: Vec<_> = record.labels().unwrap().collect();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].offset(), 4);
        assert_eq!(labels[0].len(), 5);
    }

    #[test]
    fn test_not_implemented_message() {
        let err = AnalysisError::NotImplemented("constant tensor payload".into());
        assert_eq!(err.to_string(), "Not implemented: constant tensor payload");
    }
}
