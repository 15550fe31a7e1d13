use std::fs;

use jobsup_config::{SupervisorConfig, apply_guard_rails};
use jobsup_core::catalog::{Bucket, QueryName};
use tempfile::TempDir;

#[test]
fn toml_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobsup.toml");
    fs::write(
        &path,
        r#"
instance = "worker-3"
locator = "manta"

[store]
url = "tcp://moray.local:2020"
index_url = "tcp://electric-moray.local:2020"

[buckets]
task = "marlin_tasks_v2"

[tunables]
time_poll_ms = 1500
"#,
    )
    .unwrap();

    let config = SupervisorConfig::load_from_file(&path).unwrap();
    assert_eq!(config.instance, "worker-3");
    assert_eq!(config.store.locator_url(), "tcp://electric-moray.local:2020");
    assert_eq!(config.bucket(Bucket::Task), "marlin_tasks_v2");
    assert_eq!(config.bucket(Bucket::Job), "job");
    assert_eq!(config.tunables.time_poll_ms, 1500);
    assert_eq!(config.tunables.time_storage_poll_ms, 360_000);

    let warnings = apply_guard_rails(&config).unwrap();
    assert!(warnings.is_empty());

    let reconcile = config.reconcile();
    let options = QueryName::TasksDone
        .descriptor()
        .options(&reconcile.tunables);
    assert_eq!(options.cadence, Some(std::time::Duration::from_millis(1500)));
}

#[test]
fn json_file_is_detected_by_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobsup.json");
    fs::write(&path, r#"{ "instance": "json-worker", "locator": "" }"#).unwrap();

    let config = SupervisorConfig::load_from_file(&path).unwrap();
    assert_eq!(config.instance, "json-worker");
    assert!(config.locator_kind().is_ok());
}

#[test]
fn unknown_extension_tries_toml_then_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("supervisor.conf");
    fs::write(&path, r#"{ "log_filter": "debug" }"#).unwrap();

    let config = SupervisorConfig::load_from_file(&path).unwrap();
    assert_eq!(config.log_filter, "debug");
}

#[test]
fn unreadable_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    let err = SupervisorConfig::load_from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("missing.toml"));
}

#[test]
fn malformed_toml_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobsup.toml");
    fs::write(&path, "instance = [").unwrap();
    assert!(SupervisorConfig::load_from_file(&path).is_err());
}
