// tests/config_loading.rs

use std::io::Write;

use forkpool::config::load_and_validate;
use forkpool::engine::OrchestratorOptions;
use forkpool::errors::ForkpoolError;
use forkpool::types::JoinMode;
use tempfile::NamedTempFile;

#[test]
fn full_config_maps_to_orchestrator_options() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[engine]
pid_file = "/tmp/forkpool-test/app.pid"
shm_namespace = "app"

[pool]
size = 4
mode = "join"
"#
    )
    .unwrap();

    let cfg = load_and_validate(file.path()).unwrap();
    let options = OrchestratorOptions::from(&cfg);

    assert_eq!(options.pid_file.to_str(), Some("/tmp/forkpool-test/app.pid"));
    assert_eq!(options.shm_namespace, "app");
    let pool = options.pool.unwrap();
    assert_eq!(pool.size, 4);
    assert_eq!(pool.mode, JoinMode::Join);
}

#[test]
fn invalid_values_return_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[engine]
shm_namespace = ""
"#
    )
    .unwrap();

    match load_and_validate(file.path()) {
        Err(ForkpoolError::Config(msg)) => assert!(msg.contains("shm_namespace")),
        Err(e) => panic!("Expected Config error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn malformed_toml_returns_toml_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[pool\nsize = ").unwrap();

    assert!(matches!(
        load_and_validate(file.path()),
        Err(ForkpoolError::Toml(_))
    ));
}

#[test]
fn missing_file_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_and_validate(dir.path().join("absent.toml")),
        Err(ForkpoolError::Io(_))
    ));
}
