//! `termlink init [url]`: write a starter config file.

use std::path::Path;

use anyhow::Result;
use termlink_client::TransportConfig;
use tracing::info;

use crate::config;

pub fn run(path: &Path, url: Option<String>, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let mut cfg = TransportConfig::default();
    if let Some(url) = url {
        cfg.url = url;
        cfg.validate()?;
    }
    config::save(path, &cfg)?;

    info!(path = %path.display(), "config written");
    println!("wrote {}", path.display());
    Ok(())
}
