use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How a plain run group hands results back.
///
/// - `Join`: the child writes its result to a shared slot and the parent
///   runs the task's continuation during `wait`.
/// - `Detach`: the child runs the continuation itself; the parent never sees
///   the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    Join,
    #[default]
    Detach,
}

impl JoinMode {
    pub fn is_join(self) -> bool {
        self == JoinMode::Join
    }
}

impl From<bool> for JoinMode {
    fn from(join: bool) -> Self {
        if join { JoinMode::Join } else { JoinMode::Detach }
    }
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinMode::Join => f.write_str("join"),
            JoinMode::Detach => f.write_str("detach"),
        }
    }
}

impl FromStr for JoinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "join" => Ok(JoinMode::Join),
            "detach" => Ok(JoinMode::Detach),
            other => Err(format!(
                "invalid pool mode: {other} (expected \"join\" or \"detach\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" JOIN ".parse::<JoinMode>(), Ok(JoinMode::Join));
        assert_eq!("detach".parse::<JoinMode>(), Ok(JoinMode::Detach));
        assert!("both".parse::<JoinMode>().is_err());
    }

    #[test]
    fn bool_conversion() {
        assert!(JoinMode::from(true).is_join());
        assert_eq!(JoinMode::default(), JoinMode::Detach);
    }
}
