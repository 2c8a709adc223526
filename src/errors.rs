// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForkpoolError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error(
        "Cannot proceed: permission denied for {user} to {} with rights 0{mode:o}",
        path.display()
    )]
    FsPermission {
        path: PathBuf,
        mode: u32,
        user: String,
    },

    #[error("Shared slot not found for id {0}")]
    SlotMissing(u32),

    #[error("Corrupt shared slot for id {id}: {reason}")]
    CorruptSlot { id: u32, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForkpoolError {
    /// Build a [`ForkpoolError::FsPermission`] for the current user.
    pub fn fs_permission(path: impl Into<PathBuf>, mode: u32) -> Self {
        let user = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| nix::unistd::getuid().to_string());

        ForkpoolError::FsPermission {
            path: path.into(),
            mode,
            user,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ForkpoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_permission_message_names_path_and_mode() {
        let err = ForkpoolError::FsPermission {
            path: PathBuf::from("/var/run/forkpool"),
            mode: 0o755,
            user: "nobody".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nobody"));
        assert!(msg.contains("/var/run/forkpool"));
        assert!(msg.contains("0755"));
    }
}
