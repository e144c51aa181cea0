//! Configuration loading from files

use std::fs;

use symtensor::config::{AnalyzerConfig, CONFIG_FILE_NAME, ConfigError, Session};
use symtensor::interp::Context;
use tempfile::TempDir;

#[test]
fn test_load_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("analysis.toml");
    fs::write(&path, "max_call_depth = 32\nentry_rel_path = \"models/resnet\"\n").unwrap();

    let config = AnalyzerConfig::from_file(&path).unwrap();
    assert_eq!(config.max_call_depth, 32);
    assert_eq!(config.entry_rel_path, "models/resnet");
    assert_eq!(
        config.internal_library_pattern,
        AnalyzerConfig::default().internal_library_pattern
    );
}

#[test]
fn test_load_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("analysis.json");
    fs::write(&path, r#"{ "internal_library_pattern": "stubs/.*\\.py$" }"#).unwrap();

    let config = AnalyzerConfig::from_file(&path).unwrap();
    assert_eq!(config.internal_library_pattern, r"stubs/.*\.py$");
    assert_eq!(config.max_call_depth, AnalyzerConfig::default().max_call_depth);
}

#[test]
fn test_bad_files() {
    let dir = TempDir::new().unwrap();

    let yaml = dir.path().join("analysis.yaml");
    fs::write(&yaml, "max_call_depth: 3").unwrap();
    assert!(matches!(
        AnalyzerConfig::from_file(&yaml),
        Err(ConfigError::UnknownFormat(_))
    ));

    let broken = dir.path().join("analysis.toml");
    fs::write(&broken, "max_call_depth = \"deep\"").unwrap();
    assert!(matches!(AnalyzerConfig::from_file(&broken), Err(ConfigError::Parse(_))));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(AnalyzerConfig::from_file(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn test_find_config_walks_up() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(CONFIG_FILE_NAME), "max_call_depth = 5").unwrap();
    let nested = dir.path().join("src").join("models");
    fs::create_dir_all(&nested).unwrap();
    let module = nested.join("net.py");
    fs::write(&module, "").unwrap();

    let config = AnalyzerConfig::find_config(&module).unwrap();
    assert_eq!(config.max_call_depth, 5);
}

#[test]
fn test_session_carries_entry_path() {
    let config = AnalyzerConfig {
        entry_rel_path: "pkg/main".to_string(),
        ..AnalyzerConfig::default()
    };
    let ctx = Context::new(Session::new(config).unwrap());
    assert_eq!(ctx.rel_path(), "pkg/main");
    assert_eq!(ctx.session().config().entry_rel_path, "pkg/main");
}
