//! Configuration loading from files and the environment

use std::io::Write;

use serial_test::serial;
use tempfile::NamedTempFile;

use polycast::config::Config;
use polycast::models::Language;

const ENV_KEYS: &[&str] = &[
    "POLYCAST_PORT",
    "POLYCAST_VIRAL_THRESHOLD",
    "POLYCAST_MAINTENANCE_HOUR",
    "POLYCAST_LLM_ENABLED",
    "OLLAMA_MODEL",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    std::env::set_var("POLYCAST_PORT", "9191");
    std::env::set_var("POLYCAST_VIRAL_THRESHOLD", "60.5");
    std::env::set_var("POLYCAST_LLM_ENABLED", "false");
    std::env::set_var("OLLAMA_MODEL", "llama3.1:8b");

    let config = Config::load(None).unwrap();
    assert_eq!(config.server.port, 9191);
    assert_eq!(config.planner.viral_threshold, 60.5);
    assert!(!config.llm.enabled);
    assert_eq!(config.llm.model, "llama3.1:8b");
    clear_env();
}

#[test]
#[serial]
fn test_unparsable_environment_value_keeps_default() {
    clear_env();
    std::env::set_var("POLYCAST_PORT", "not-a-port");

    let config = Config::load(None).unwrap();
    assert_eq!(config.server.port, 8080);
    clear_env();
}

#[test]
#[serial]
fn test_invalid_environment_value_fails_validation() {
    clear_env();
    std::env::set_var("POLYCAST_MAINTENANCE_HOUR", "25");

    let err = Config::load(None).unwrap_err();
    assert!(err.to_string().contains("maintenance_hour"));
    clear_env();
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
        [planner]
        viral_threshold = 80.0

        [executor.breaker]
        failure_threshold = 3
        reset_timeout_ms = 1000

        [[languages]]
        code = "de"
        utc_offset_minutes = 60
        peak_hours = [7, 12, 19]
        daily_limit = 4
        "#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.planner.viral_threshold, 80.0);
    assert_eq!(config.executor.breaker.failure_threshold, 3);
    assert_eq!(config.executor.breaker.reset_timeout_ms, 1000);
    assert_eq!(config.languages.len(), 1);

    let de = config.language(&Language::new("de")).unwrap();
    assert_eq!(de.daily_limit, 4);
    assert_eq!(config.orchestrator.maintenance_hour, 3);
}

#[test]
fn test_invalid_weights_rejected() {
    let file = write_config(
        r#"
        [scoring]
        content_weight = 0.9
        trend_weight = 0.9
        "#,
    );
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("scoring weights"));
}

#[test]
fn test_missing_file_reported() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/polycast.toml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_toml_round_trip_of_defaults() {
    let rendered = Config::default().to_toml().unwrap();
    let file = write_config(&rendered);
    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.languages.len(), Config::default().languages.len());
    assert_eq!(config.orchestrator, Config::default().orchestrator);
}
