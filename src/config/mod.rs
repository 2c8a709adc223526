// src/config/mod.rs

//! Configuration loading and validation for forkpool.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, default_pid_file, load_and_validate, load_from_path};
pub use model::{ConfigFile, EngineSection, PoolSection, RawConfigFile};
pub use validate::validate_config;
