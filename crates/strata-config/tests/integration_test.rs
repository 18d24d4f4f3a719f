//! Integration tests for strata-config
//!
//! These tests verify the config loading pipeline with real file system operations.

use strata_config::{Config, LogLevel};
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let strata_dir = temp.path().join(".strata");
    std::fs::create_dir_all(&strata_dir).unwrap();

    let config_content = r#"
[extract]
ignore_chown_errors = true
use_hardlinks = false

[log]
level = "trace"
"#;
    let path = strata_dir.join("config.toml");
    std::fs::write(&path, config_content).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert!(config.extract.ignore_chown_errors);
    assert!(!config.extract.use_hardlinks);
    assert_eq!(config.log.level(), LogLevel::Trace);
}

/// Test a malformed file surfaces a TOML error instead of defaults
#[test]
fn test_malformed_config_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[extract\nignore_chown_errors = maybe").unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, strata_config::ConfigError::Toml(_)));
}

/// Test environment overrides win over file contents
#[test]
fn test_env_override_integration() {
    let mut config: Config = toml::from_str("[extract]\nignore_chown_errors = false\n").unwrap();

    std::env::set_var("STRATA_IGNORE_CHOWN_ERRORS", "yes");
    std::env::set_var("STRATA_USE_HARDLINKS", "0");
    config.apply_env_overrides();
    std::env::remove_var("STRATA_IGNORE_CHOWN_ERRORS");
    std::env::remove_var("STRATA_USE_HARDLINKS");

    assert!(config.extract.ignore_chown_errors);
    assert!(!config.extract.use_hardlinks);
}

/// Test complete config serialization/deserialization cycle
#[test]
fn test_config_file_roundtrip() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, Config::default_toml().unwrap()).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.extract, Config::default().extract);
    assert_eq!(loaded.log.level, Config::default().log.level);
}

/// Test a project file that only sets the log level keeps global extract keys
#[test]
fn test_project_layer_keeps_global_extract_keys() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let project = temp.path().join("project.toml");
    std::fs::write(&global, "[extract]\nignore_chown_errors = true\n").unwrap();
    std::fs::write(&project, "[log]\nlevel = \"debug\"\n").unwrap();

    let config = Config::load_layers(Some(&global), Some(&project)).unwrap();
    assert!(config.extract.ignore_chown_errors);
    assert!(config.extract.use_hardlinks);
    assert_eq!(config.log.level(), LogLevel::Debug);
}

/// Test the project file still wins for keys it sets
#[test]
fn test_project_layer_overrides_global_key() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let project = temp.path().join("project.toml");
    let global_toml = "[extract]\nignore_chown_errors = true\nuse_hardlinks = false\n";
    std::fs::write(&global, global_toml).unwrap();
    std::fs::write(&project, "[extract]\nignore_chown_errors = false\n").unwrap();

    let config = Config::load_layers(Some(&global), Some(&project)).unwrap();
    assert!(!config.extract.ignore_chown_errors);
    assert!(!config.extract.use_hardlinks);
}

/// Test missing files fall back to defaults
#[test]
fn test_missing_layers_give_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_layers(Some(&temp.path().join("nope.toml")), None).unwrap();
    assert_eq!(config.extract, Config::default().extract);
}
