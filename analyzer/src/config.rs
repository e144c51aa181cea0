//! Analyzer configuration
//!
//! Supports loading from symtensor.toml or a JSON file

use std::path::Path;
use std::rc::Rc;

use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{CodeSource, IdSource};

/// Name of the configuration file searched for by [`AnalyzerConfig::find_config`]
pub const CONFIG_FILE_NAME: &str = "symtensor.toml";

/// Analyzer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Source paths matching this pattern are internal standard-library stand-ins.
    /// Diagnostics located there are attributed to the nearest user call site.
    #[serde(default = "default_internal_library_pattern")]
    pub internal_library_pattern: String,

    /// Maximum nesting of user-function calls on one path
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Relative path of the entry module
    #[serde(default = "default_entry_rel_path")]
    pub entry_rel_path: String,
}

fn default_internal_library_pattern() -> String {
    r"pylib.*(tensor|functional|builtins|linear|module|loss|math)\.py$".to_string()
}
fn default_max_call_depth() -> usize {
    256
}
fn default_entry_rel_path() -> String {
    ".".to_string()
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            internal_library_pattern: default_internal_library_pattern(),
            max_call_depth: default_max_call_depth(),
            entry_rel_path: default_entry_rel_path(),
        }
    }
}

impl AnalyzerConfig {
    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        if path.extension().map(|e| e == "toml").unwrap_or(false) {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnknownFormat(path.display().to_string()))
        }
    }

    /// Find config file in directory hierarchy
    pub fn find_config(start: &Path) -> Option<Self> {
        let mut dir = if start.is_file() {
            start.parent()?.to_path_buf()
        } else {
            start.to_path_buf()
        };

        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.exists()
                && let Ok(config) = Self::from_file(&candidate)
            {
                return Some(config);
            }

            if !dir.pop() {
                break;
            }
        }

        None
    }
}

/// Configuration error
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    #[diagnostic(code(config::io))]
    Io(String),

    #[error("Parse error: {0}")]
    #[diagnostic(code(config::parse))]
    Parse(String),

    #[error("Unknown config file format: {0}")]
    #[diagnostic(code(config::format), help("use a .toml or .json file"))]
    UnknownFormat(String),

    #[error("Invalid internal library pattern `{pattern}`: {message}")]
    #[diagnostic(code(config::pattern))]
    InvalidPattern { pattern: String, message: String },
}

/// Shared state of one analysis run.
///
/// Every context forked from the same root holds the same session, so counters
/// and configuration are shared by all paths.
#[derive(Debug)]
pub struct Session {
    config: AnalyzerConfig,
    internal_library: Regex,
    ids: IdSource,
}

impl Session {
    pub fn new(config: AnalyzerConfig) -> Result<Rc<Self>, ConfigError> {
        let internal_library =
            Regex::new(&config.internal_library_pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: config.internal_library_pattern.clone(),
                message: e.to_string(),
            })?;
        Ok(Rc::new(Session {
            config,
            internal_library,
            ids: IdSource::new(),
        }))
    }

    /// Session with the default configuration
    pub fn with_defaults() -> Result<Rc<Self>, ConfigError> {
        Self::new(AnalyzerConfig::default())
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn ids(&self) -> &IdSource {
        &self.ids
    }

    /// Whether a source location lies inside an internal library file.
    /// Raw ranges are never internal.
    pub fn is_internal(&self, source: &CodeSource) -> bool {
        match source.path() {
            Some(path) => self.internal_library.is_match(path),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Span;

    #[test]
    fn test_default_pattern_matches_library_files() {
        let session = Session::with_defaults().unwrap();
        let internal = CodeSource::node("/opt/pylib/torch/functional.py", Span::dummy());
        let user = CodeSource::node("/home/me/model.py", Span::dummy());
        assert!(session.is_internal(&internal));
        assert!(!session.is_internal(&user));
        assert!(!session.is_internal(&CodeSource::range(0, Span::dummy())));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = AnalyzerConfig {
            internal_library_pattern: "(unclosed".to_string(),
            ..AnalyzerConfig::default()
        };
        let err = Session::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AnalyzerConfig = toml::from_str("max_call_depth = 8").unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.entry_rel_path, ".");
    }
}
