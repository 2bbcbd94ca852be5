mod common;

use std::io::Write;

use common::{registry, seed};
use entigraph::config::{EngineConfig, StoreMode};
use entigraph::{EntigraphError, Session};

fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn a_toml_file_overrides_the_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "entigraph.toml",
        r#"
[cache]
enabled = false
pressure_ratio = 0.8
page_size_bytes = 16384

[persistence]
default_depth = 2
modified_column = "modified_at"

[encryption.scopes]
accounts = "hunter2"

[store]
mode = "sqlite_memory"
"#,
    );
    let config = EngineConfig::load(Some(&path)).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.pressure_ratio, 0.8);
    assert_eq!(config.cache.page_size_bytes, 16384);
    assert_eq!(config.persistence.default_depth, 2);
    assert_eq!(config.persistence.created_column, None);
    assert_eq!(config.persistence.modified_column.as_deref(), Some("modified_at"));
    assert_eq!(config.encryption.scopes.get("accounts").map(String::as_str), Some("hunter2"));
    assert_eq!(config.store.mode, StoreMode::SqliteMemory);
}

#[test]
fn a_missing_file_falls_back_to_the_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn a_malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "broken.toml", "[cache]\nenabled = \"sometimes\"\n");
    assert!(matches!(EngineConfig::load(Some(&path)), Err(EntigraphError::Config(_))));
}

#[test]
fn loaded_configuration_drives_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "session.toml",
        "[persistence]\ndefault_depth = 0\n\n[store]\nmode = \"sqlite_memory\"\n",
    );
    let config = EngineConfig::load(Some(&path)).unwrap();
    let mut s = Session::builder(registry()).config(config).build().unwrap();
    assert_eq!(s.config().persistence.default_depth, 0);

    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron).unwrap().unwrap();
    let executions = s.get_object(cron, "executions").unwrap().unwrap();
    assert_eq!(s.graph().elements(executions).len(), 2);
}

#[test]
fn pressure_ratios_outside_the_unit_interval_are_rejected() {
    let mut config = EngineConfig::default();
    config.cache.pressure_ratio = 1.5;
    let result = Session::builder(registry()).config(config).build();
    assert!(matches!(result, Err(EntigraphError::Config(_))));
}

#[test]
fn a_zero_page_size_is_rejected() {
    let mut config = EngineConfig::default();
    config.cache.page_size_bytes = 0;
    let result = Session::builder(registry()).config(config).build();
    assert!(matches!(result, Err(EntigraphError::Config(_))));
}
