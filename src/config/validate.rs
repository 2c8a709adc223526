// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ForkpoolError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ForkpoolError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.engine, raw.pool))
    }
}

pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_pool(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let ns = &cfg.engine.shm_namespace;
    if ns.is_empty() {
        return Err(ForkpoolError::Config(
            "[engine].shm_namespace must not be empty".to_string(),
        ));
    }
    if ns.contains('/') || ns.contains('\0') {
        return Err(ForkpoolError::Config(format!(
            "[engine].shm_namespace must not contain '/' or NUL (got {ns:?})"
        )));
    }

    if cfg.engine.pid_file.as_os_str().is_empty() {
        return Err(ForkpoolError::Config(
            "[engine].pid_file must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_pool(cfg: &RawConfigFile) -> Result<()> {
    if let Some(pool) = cfg.pool {
        if pool.size == 0 {
            return Err(ForkpoolError::Config(
                "[pool].size must be >= 1 (got 0)".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JoinMode;

    fn parse(src: &str) -> RawConfigFile {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = ConfigFile::try_from(parse("")).unwrap();
        assert_eq!(cfg.engine.shm_namespace, "forkpool");
        assert!(cfg.pool.is_none());
    }

    #[test]
    fn pool_section_is_parsed() {
        let cfg = ConfigFile::try_from(parse(
            r#"
            [pool]
            size = 3
            mode = "join"
            "#,
        ))
        .unwrap();
        let pool = cfg.pool.unwrap();
        assert_eq!(pool.size, 3);
        assert_eq!(pool.mode, JoinMode::Join);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = ConfigFile::try_from(parse("[pool]\nsize = 0\n")).unwrap_err();
        assert!(matches!(err, ForkpoolError::Config(_)));
    }

    #[test]
    fn namespace_with_slash_is_rejected() {
        let err = ConfigFile::try_from(parse("[engine]\nshm_namespace = \"a/b\"\n")).unwrap_err();
        assert!(matches!(err, ForkpoolError::Config(_)));
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        assert!(toml::from_str::<RawConfigFile>("[engine]\nbogus = 1\n").is_err());
        assert!(toml::from_str::<RawConfigFile>("[pool]\nsize = 2\nmode = \"later\"\n").is_err());
    }
}
