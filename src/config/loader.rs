// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Config file location: `FORKPOOL_CONFIG`, else `Forkpool.toml` in the
/// current working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("FORKPOOL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Forkpool.toml"))
}

/// Pid file location: `FORKPOOL_PID_FILE`, else
/// `<temp dir>/forkpool/forkpool.pid`.
pub fn default_pid_file() -> PathBuf {
    std::env::var_os("FORKPOOL_PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("forkpool").join("forkpool.pid"))
}
