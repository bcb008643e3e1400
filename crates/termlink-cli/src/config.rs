//! Client configuration at `~/.termlink/config.toml`.
//!
//! The file holds a [`TransportConfig`]. A missing file means defaults;
//! CLI flags override whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use termlink_client::TransportConfig;
use tracing::debug;

/// `~/.termlink/config.toml`.
pub fn default_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_default();
    home.join(".termlink").join("config.toml")
}

/// Load configuration from a TOML file, returning defaults if the file
/// does not exist.
pub fn load(path: &Path) -> Result<TransportConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(TransportConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config = TransportConfig::from_toml(&content)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;

    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Save the configuration to a TOML file, creating parent directories.
pub fn save(path: &Path, config: &TransportConfig) -> Result<()> {
    let content = config.to_toml().context("failed to serialize config")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write config to {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use termlink_client::SecurityLevel;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("nope.toml")).unwrap();
        assert!(config.url.is_empty());
        assert_eq!(config.reconnect.max_attempts, Some(5));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TransportConfig::new("wss://host.example/pty");
        config.security.level = SecurityLevel::Strict;
        config.security.overrides.max_command_length = Some(64);
        save(&path, &config).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.url, "wss://host.example/pty");
        assert_eq!(loaded.security.level, SecurityLevel::Strict);
        assert_eq!(loaded.security.overrides.max_command_length, Some(64));
    }

    #[test]
    fn broken_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "url = [").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
