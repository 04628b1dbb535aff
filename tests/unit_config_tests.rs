//! Matrix loading and validation.

mod common;

use common::*;
use verif_matrix::config::load;
use verif_matrix::core::error::ConfigError;
use verif_matrix::models::{Backend, JobStatus, RuntimeClass};

const UART: &str = r#"
[axes]
baud = ["9600", "115200"]
corner = ["rtl", "gl"]

[[tests]]
name = "uart_tx"
path = "dv/uart"
backends = ["icarus", "verilator"]
parameters = { baud = ["9600", "115200"], corner = ["rtl"] }
runtime = "slow"
tags = ["uart", "nightly"]
timeout_secs = 120
env = { UART_MODE = "tx" }
"#;

#[test]
fn test_full_descriptor_is_loaded() {
    let dir = setup_test_environment();
    let path = write_matrix(dir.path(), "TestMatrix.toml", UART);
    let config = load(&path).unwrap();

    let uart = &config.descriptors[0];
    assert_eq!(uart.name, "uart_tx");
    assert_eq!(uart.path, dir.path().join("dv/uart"));
    assert!(uart.backends.contains(&Backend::Icarus));
    assert!(uart.backends.contains(&Backend::Verilator));
    assert_eq!(uart.parameters["baud"], vec!["9600", "115200"]);
    assert_eq!(uart.runtime, RuntimeClass::Slow);
    assert!(uart.tags.contains("nightly"));
    assert_eq!(uart.timeout_secs, Some(120));
    assert_eq!(uart.env["UART_MODE"], "tx");
}

#[test]
fn test_settings_and_backend_overrides() {
    let dir = setup_test_environment();
    let content = format!(
        r#"
[settings]
concurrency = 8
retries = 2
retry_on = ["TIMEOUT", "ERROR"]
seed = 42

[settings.container]
image = "efabless/dv:latest"

[backends.verilator]
command = "make SIM=verilator TESTCASE={{name}}"
{UART}"#
    );
    let path = write_matrix(dir.path(), "TestMatrix.toml", &content);
    let config = load(&path).unwrap();

    assert_eq!(config.settings.concurrency, Some(8));
    assert_eq!(config.settings.retries, Some(2));
    assert_eq!(config.settings.retry_on, Some(vec![JobStatus::Timeout, JobStatus::Error]));
    assert_eq!(config.settings.seed, Some(42));
    let container = config.settings.container.as_ref().unwrap();
    assert_eq!(container.engine, "docker");
    assert!(config.backends[&Backend::Verilator].command.contains("{name}"));
}

#[test]
fn test_duplicate_names_across_files_are_rejected() {
    let dir = setup_test_environment();
    write_matrix(dir.path(), "a.toml", UART);
    write_matrix(
        dir.path(),
        "b.json",
        r#"{"tests": [{"name": "uart_tx", "path": "other", "backends": ["vcs"]}]}"#,
    );
    let err = load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedDescriptor { ref test, .. } if test == "uart_tx"));
}

#[test]
fn test_directory_sources_are_merged() {
    let dir = setup_test_environment();
    write_matrix(dir.path(), "a.toml", UART);
    write_matrix(
        dir.path(),
        "b.json",
        r#"{"tests": [{"name": "alu", "path": "dv/alu", "backends": ["cvc64"]}]}"#,
    );
    write_matrix(dir.path(), "notes.txt", "not a matrix");
    let config = load(dir.path()).unwrap();
    let names: Vec<_> = config.descriptors.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["alu", "uart_tx"]);
    assert!(config.descriptors[0].backends.contains(&Backend::Cvc));
}

#[test]
fn test_settings_may_only_be_defined_once() {
    let dir = setup_test_environment();
    write_matrix(dir.path(), "a.toml", "[settings]\nconcurrency = 1\n");
    write_matrix(dir.path(), "b.toml", "[settings]\nconcurrency = 2\n");
    assert!(matches!(load(dir.path()), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_undefined_axis_is_malformed() {
    let dir = setup_test_environment();
    let path = write_matrix(
        dir.path(),
        "m.toml",
        r#"
[[tests]]
name = "dma"
path = "dv/dma"
backends = ["icarus"]
parameters = { burst = ["4"] }
"#,
    );
    assert!(matches!(load(&path), Err(ConfigError::MalformedDescriptor { .. })));
}

#[test]
fn test_missing_backends_is_malformed() {
    let dir = setup_test_environment();
    let path = write_matrix(
        dir.path(),
        "m.toml",
        "[[tests]]\nname = \"dma\"\npath = \"dv/dma\"\nbackends = []\n",
    );
    assert!(matches!(load(&path), Err(ConfigError::MalformedDescriptor { .. })));
}

#[test]
fn test_unknown_backend_in_descriptor_is_malformed() {
    let dir = setup_test_environment();
    let path = write_matrix(
        dir.path(),
        "m.toml",
        "[[tests]]\nname = \"dma\"\npath = \"dv/dma\"\nbackends = [\"modelsim\"]\n",
    );
    let err = load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedDescriptor { .. }));
    assert!(err.to_string().contains("modelsim"));
}

#[test]
fn test_unknown_backend_override_is_rejected() {
    let dir = setup_test_environment();
    let path = write_matrix(dir.path(), "m.toml", "[backends.questa]\ncommand = \"vsim\"\n");
    assert!(matches!(load(&path), Err(ConfigError::UnknownBackend(_))));
}

#[test]
fn test_unknown_fields_are_parse_errors() {
    let dir = setup_test_environment();
    let path = write_matrix(
        dir.path(),
        "m.toml",
        "[[tests]]\nname = \"dma\"\npath = \"dv/dma\"\nbackends = [\"icarus\"]\nflaky = true\n",
    );
    assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_missing_source_is_io_error() {
    let dir = setup_test_environment();
    assert!(matches!(
        load(&dir.path().join("absent.toml")),
        Err(ConfigError::Io { .. })
    ));
}
