//! Security levels and the immutable policy snapshot derived from them.
//!
//! A policy is resolved exactly once: start from the named preset, apply only
//! the overrides the caller actually set, validate the merged result, and
//! never touch it again.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Named policy preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Strict,
    #[default]
    Standard,
    Permissive,
}

impl SecurityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Permissive => "permissive",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "standard" => Ok(Self::Standard),
            "permissive" => Ok(Self::Permissive),
            other => Err(PolicyError::UnknownLevel(other.to_string())),
        }
    }
}

/// Commands the strict preset allows out of the box. None of them runs
/// another command from its arguments.
const STRICT_ALLOWED: &[&str] = &[
    "ls", "pwd", "echo", "cat", "head", "tail", "grep", "wc", "whoami", "date", "cd", "clear",
    "uname", "which", "stat", "df", "du", "ps",
];

/// Immutable policy snapshot consulted by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityLevelConfig {
    pub level: SecurityLevel,
    pub allow_shell_operators: bool,
    pub allow_redirection: bool,
    pub allow_pipes: bool,
    pub allow_command_substitution: bool,
    pub allow_background: bool,
    pub allow_path_traversal: bool,
    /// Permitted base commands; only consulted when `enforce_allowlist` is set.
    pub allowed_commands: Option<BTreeSet<String>>,
    /// Base commands that are always refused.
    pub blocked_commands: BTreeSet<String>,
    pub enforce_allowlist: bool,
    /// Maximum command length in characters.
    pub max_command_length: usize,
}

impl SecurityLevelConfig {
    /// The canonical preset for `level`.
    pub fn preset(level: SecurityLevel) -> Self {
        match level {
            SecurityLevel::Strict => Self {
                level,
                allow_shell_operators: false,
                allow_redirection: false,
                allow_pipes: false,
                allow_command_substitution: false,
                allow_background: false,
                allow_path_traversal: false,
                allowed_commands: Some(STRICT_ALLOWED.iter().map(|c| c.to_string()).collect()),
                blocked_commands: BTreeSet::new(),
                enforce_allowlist: true,
                max_command_length: 256,
            },
            SecurityLevel::Standard => Self {
                level,
                allow_shell_operators: false,
                allow_redirection: false,
                allow_pipes: false,
                allow_command_substitution: false,
                allow_background: false,
                allow_path_traversal: false,
                allowed_commands: None,
                blocked_commands: BTreeSet::new(),
                enforce_allowlist: false,
                max_command_length: 1024,
            },
            SecurityLevel::Permissive => Self {
                level,
                allow_shell_operators: true,
                allow_redirection: true,
                allow_pipes: true,
                allow_command_substitution: true,
                allow_background: true,
                allow_path_traversal: true,
                allowed_commands: None,
                blocked_commands: BTreeSet::new(),
                enforce_allowlist: false,
                max_command_length: 4096,
            },
        }
    }

    /// Merge `overrides` onto the preset for `level` and validate the result.
    pub fn resolve(level: SecurityLevel, overrides: &SecurityOverrides) -> Result<Self, PolicyError> {
        let mut config = Self::preset(level);

        if let Some(v) = overrides.allow_shell_operators {
            config.allow_shell_operators = v;
        }
        if let Some(v) = overrides.allow_redirection {
            config.allow_redirection = v;
        }
        if let Some(v) = overrides.allow_pipes {
            config.allow_pipes = v;
        }
        if let Some(v) = overrides.allow_command_substitution {
            config.allow_command_substitution = v;
        }
        if let Some(v) = overrides.allow_background {
            config.allow_background = v;
        }
        if let Some(v) = overrides.allow_path_traversal {
            config.allow_path_traversal = v;
        }
        if let Some(cmds) = &overrides.allowed_commands {
            config.allowed_commands = Some(normalize(cmds));
        }
        if let Some(cmds) = &overrides.blocked_commands {
            config.blocked_commands = normalize(cmds);
        }
        if let Some(v) = overrides.enforce_allowlist {
            config.enforce_allowlist = v;
        }
        if let Some(v) = overrides.max_command_length {
            config.max_command_length = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.max_command_length == 0 {
            return Err(PolicyError::Invalid(
                "max_command_length must be > 0".to_string(),
            ));
        }
        if self.enforce_allowlist
            && self.allowed_commands.as_ref().map_or(true, BTreeSet::is_empty)
        {
            return Err(PolicyError::Invalid(
                "enforce_allowlist requires a non-empty allowed_commands set".to_string(),
            ));
        }
        if let Some(allowed) = &self.allowed_commands {
            if let Some(both) = allowed.intersection(&self.blocked_commands).next() {
                return Err(PolicyError::Invalid(format!(
                    "command `{both}` is both allowed and blocked"
                )));
            }
        }
        Ok(())
    }
}

fn normalize(cmds: &[String]) -> BTreeSet<String> {
    cmds.iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Caller-specified deviations from a preset. `None` keeps the preset value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityOverrides {
    pub allow_shell_operators: Option<bool>,
    pub allow_redirection: Option<bool>,
    pub allow_pipes: Option<bool>,
    pub allow_command_substitution: Option<bool>,
    pub allow_background: Option<bool>,
    pub allow_path_traversal: Option<bool>,
    pub allowed_commands: Option<Vec<String>>,
    pub blocked_commands: Option<Vec<String>>,
    pub enforce_allowlist: Option<bool>,
    pub max_command_length: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_str() {
        for level in [SecurityLevel::Strict, SecurityLevel::Standard, SecurityLevel::Permissive] {
            assert_eq!(level.as_str().parse::<SecurityLevel>().unwrap(), level);
        }
        assert_eq!(" STRICT ".parse::<SecurityLevel>().unwrap(), SecurityLevel::Strict);
        assert!(matches!(
            "paranoid".parse::<SecurityLevel>(),
            Err(PolicyError::UnknownLevel(_))
        ));
    }

    #[test]
    fn strict_preset_has_no_command_runners() {
        let allowed = SecurityLevelConfig::preset(SecurityLevel::Strict)
            .allowed_commands
            .unwrap();
        for runner in ["env", "xargs", "sudo", "nohup", "timeout", "exec", "sh", "bash"] {
            assert!(!allowed.contains(runner), "{runner} is allowlisted");
        }
    }

    #[test]
    fn overrides_only_touch_set_fields() {
        let overrides = SecurityOverrides {
            allow_pipes: Some(true),
            max_command_length: Some(64),
            ..Default::default()
        };
        let config = SecurityLevelConfig::resolve(SecurityLevel::Standard, &overrides).unwrap();
        let preset = SecurityLevelConfig::preset(SecurityLevel::Standard);

        assert!(config.allow_pipes);
        assert_eq!(config.max_command_length, 64);
        assert_eq!(config.allow_redirection, preset.allow_redirection);
        assert_eq!(config.allow_shell_operators, preset.allow_shell_operators);
        assert_eq!(config.enforce_allowlist, preset.enforce_allowlist);
    }

    #[test]
    fn zero_length_limit_is_invalid() {
        let overrides = SecurityOverrides {
            max_command_length: Some(0),
            ..Default::default()
        };
        assert!(SecurityLevelConfig::resolve(SecurityLevel::Permissive, &overrides).is_err());
    }

    #[test]
    fn enforced_allowlist_must_not_be_empty() {
        let overrides = SecurityOverrides {
            enforce_allowlist: Some(true),
            ..Default::default()
        };
        assert!(SecurityLevelConfig::resolve(SecurityLevel::Standard, &overrides).is_err());

        let overrides = SecurityOverrides {
            enforce_allowlist: Some(true),
            allowed_commands: Some(vec!["ls".into(), "  ".into()]),
            ..Default::default()
        };
        let config = SecurityLevelConfig::resolve(SecurityLevel::Standard, &overrides).unwrap();
        assert_eq!(config.allowed_commands.unwrap().len(), 1);
    }

    #[test]
    fn allowed_and_blocked_must_not_overlap() {
        let overrides = SecurityOverrides {
            allowed_commands: Some(vec!["ls".into()]),
            blocked_commands: Some(vec!["ls".into()]),
            ..Default::default()
        };
        assert!(SecurityLevelConfig::resolve(SecurityLevel::Standard, &overrides).is_err());
    }

    #[test]
    fn overrides_deserialize_with_missing_fields() {
        let overrides: SecurityOverrides =
            serde_json::from_str(r#"{"allow_pipes": true, "blocked_commands": ["nc"]}"#).unwrap();
        assert_eq!(overrides.allow_pipes, Some(true));
        assert_eq!(overrides.blocked_commands, Some(vec!["nc".to_string()]));
        assert_eq!(overrides.allow_redirection, None);
    }
}
