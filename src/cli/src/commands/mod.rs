//! Subcommand implementations.

pub mod events;
pub mod insights;
pub mod state;
pub mod tasks;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use planwright_core::config::{Config, StoreConfig};
use planwright_core::engine::AuditEngine;

/// Resolved configuration shared by every command.
pub struct Context {
    pub config: Config,
}

impl Context {
    /// Load configuration from `--config`, else the user config file, else
    /// the environment alone. `--root` overrides both store locations.
    pub fn resolve(config_file: Option<&Path>, root: Option<&Path>) -> Result<Self> {
        let mut config = match config_file.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => Config::from_file(&path.to_string_lossy())
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load().context("Failed to load config from environment")?,
        };
        if let Some(root) = root {
            config.store = StoreConfig::rooted_at(root);
        }
        Ok(Self { config })
    }

    /// Open the engine, replaying the log into every projection.
    pub fn engine(&self) -> Result<AuditEngine> {
        self.engine_with(|_| {})
    }

    /// Open the engine with a per-command tweak to the loaded configuration.
    pub fn engine_with(&self, tweak: impl FnOnce(&mut Config)) -> Result<AuditEngine> {
        let mut config = self.config.clone();
        tweak(&mut config);
        AuditEngine::open(&config).with_context(|| {
            format!("Failed to open event log {}", config.store.events_path.display())
        })
    }
}

/// `<config dir>/planwright/config.toml`, when it exists.
fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("planwright").join("config.toml");
    path.exists().then_some(path)
}
