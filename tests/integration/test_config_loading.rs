use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;
use toolgate::core::{ConfigLoader, ConfigValidator, ErrorCategory, ProcessSupervisor};

const OVERRIDES: &[&str] = &[
    "TOOLGATE_DEFAULT_TIMEOUT_MS",
    "TOOLGATE_MAX_CONCURRENCY",
    "TOOLGATE_CIRCUIT_BREAKER_THRESHOLD",
    "TOOLGATE_CIRCUIT_BREAKER_RESET_MS",
    "TOOLGATE_MAX_OUTPUT_BYTES",
    "TOOLGATE_GIT_BIN",
    "TOOLGATE_GH_BIN",
    "TOOLGATE_CAPABILITIES_TTL_MS",
];

fn clear_toolgate_env() {
    for v in OVERRIDES {
        env::remove_var(v);
    }
}

/// File values apply, then environment variables win
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_toolgate_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[supervisor]
default_timeout_ms = 10000
max_concurrency = 2
circuit_breaker_threshold = 3

[tools]
git = "/usr/bin/git"

[capabilities]
cache_ttl_ms = 1000
"#;
    fs::write(workspace_path.join("toolgate.toml"), config_content).unwrap();

    env::set_var("TOOLGATE_MAX_CONCURRENCY", "6");
    env::set_var("TOOLGATE_GH_BIN", "/opt/gh/bin/gh");

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();
    clear_toolgate_env();

    assert_eq!(config.supervisor.default_timeout_ms, 10_000);
    assert_eq!(config.supervisor.max_concurrency, 6);
    assert_eq!(config.supervisor.circuit_breaker_threshold, 3);
    assert_eq!(config.supervisor.circuit_breaker_reset_ms, 60_000);
    assert_eq!(config.tools.git, "/usr/bin/git");
    assert_eq!(config.tools.gh, "/opt/gh/bin/gh");
    assert_eq!(config.capabilities.cache_ttl_ms, 1_000);
    assert!(ConfigValidator::validate(&config).is_ok());
    assert!(ProcessSupervisor::from_config(&config).is_ok());
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_toolgate_env();
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();

    assert_eq!(config, Default::default());
}

#[test]
#[serial]
fn test_unparseable_env_override_is_ignored() {
    clear_toolgate_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("TOOLGATE_DEFAULT_TIMEOUT_MS", "soon");
    env::set_var("TOOLGATE_CIRCUIT_BREAKER_RESET_MS", " 1500 ");

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_toolgate_env();

    assert_eq!(config.supervisor.default_timeout_ms, 30_000);
    assert_eq!(config.supervisor.circuit_breaker_reset_ms, 1_500);
}

#[test]
#[serial]
fn test_malformed_file_is_a_validation_error() {
    clear_toolgate_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("toolgate.toml"),
        "[supervisor]\nmax_concurrency = \"four\"\n",
    )
    .unwrap();

    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();

    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(err.code, "CFG-002");
    assert!(err.message.contains("toolgate.toml"));
}

#[test]
#[serial]
fn test_zero_concurrency_is_rejected_by_supervisor() {
    clear_toolgate_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("TOOLGATE_MAX_CONCURRENCY", "0");

    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_toolgate_env();

    let err = ProcessSupervisor::from_config(&config).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert!(err.message.contains("max_concurrency"));
}

#[test]
fn test_env_documentation_covers_every_override() {
    let docs = ConfigLoader::env_var_documentation();
    assert_eq!(docs.len(), OVERRIDES.len());
    for name in OVERRIDES {
        assert!(
            docs.iter().any(|line| line.starts_with(name)),
            "{name} is undocumented"
        );
    }
}
