// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::channel::DEFAULT_NAMESPACE;
use crate::config::loader::default_pid_file;
use crate::engine::{OrchestratorOptions, PoolOptions};
use crate::types::JoinMode;

/// Configuration exactly as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// pid_file = "/tmp/forkpool/forkpool.pid"
/// shm_namespace = "forkpool"
///
/// [pool]
/// size = 4
/// mode = "join"
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub pool: Option<PoolSection>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub pool: Option<PoolSection>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(engine: EngineSection, pool: Option<PoolSection>) -> Self {
        Self { engine, pool }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Pid registry file. Defaults to `FORKPOOL_PID_FILE` or
    /// `$TMPDIR/forkpool/forkpool.pid`.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Prefix of shared slot names.
    #[serde(default = "default_shm_namespace")]
    pub shm_namespace: String,
}

fn default_shm_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            shm_namespace: default_shm_namespace(),
        }
    }
}

/// `[pool]` section: run and wait whenever `size` tasks are buffered.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    pub size: usize,

    #[serde(default)]
    pub mode: JoinMode,
}

impl From<&ConfigFile> for OrchestratorOptions {
    fn from(cfg: &ConfigFile) -> Self {
        OrchestratorOptions {
            pid_file: cfg.engine.pid_file.clone(),
            shm_namespace: cfg.engine.shm_namespace.clone(),
            pool: cfg.pool.map(|p| PoolOptions {
                size: p.size,
                mode: p.mode,
            }),
            reset_environment: true,
        }
    }
}
