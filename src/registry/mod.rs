// src/registry/mod.rs

//! Tracking of the process ids the engine spawned.
//!
//! - [`pid_registry`] holds the persisted id set for one pid file.
//! - [`RegistryTable`] hands out one shared registry per distinct path.

pub mod pid_registry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::cell::RefCell;

use crate::errors::Result;

pub use pid_registry::{PidRegistry, RegistryHandle};

/// Explicit table of registries keyed by pid file path.
///
/// Repeated lookups of the same path return the same handle. The table is
/// owned by whoever wires the engine together and passed down explicitly.
#[derive(Debug, Default)]
pub struct RegistryTable {
    registries: HashMap<PathBuf, RegistryHandle>,
}

impl RegistryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the registry for `path`, creating it on first use.
    pub fn lookup(&mut self, path: impl AsRef<Path>) -> Result<RegistryHandle> {
        let path = path.as_ref();
        if let Some(existing) = self.registries.get(path) {
            return Ok(Rc::clone(existing));
        }

        let registry = Rc::new(RefCell::new(PidRegistry::create(path)?));
        self.registries
            .insert(path.to_path_buf(), Rc::clone(&registry));
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}
