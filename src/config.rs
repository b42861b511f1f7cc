//! Configuration management for stackctl
//!
//! Handles loading, saving, and default configuration values.
//! Config file location: ~/.config/stackctl/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Report mutations instead of running them
    pub dry_run: bool,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
    /// Deadline for every external command
    pub command_timeout_secs: u64,
    /// Let profile switches proceed without a snapshot facility
    pub allow_unguarded: bool,
    pub catalog: CatalogOptions,
    pub apps: AppOptions,
    pub health: HealthOptions,
    pub updates: UpdateOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: false,
            log_level: "info".to_string(),
            command_timeout_secs: 900,
            allow_unguarded: false,
            catalog: CatalogOptions::default(),
            apps: AppOptions::default(),
            health: HealthOptions::default(),
            updates: UpdateOptions::default(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("stackctl");
        Ok(config_dir.join("config.toml"))
    }

    /// Load config from the default location, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load config from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// Profile bundle discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogOptions {
    pub bundle_prefix: String,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            bundle_prefix: "ctxos-".to_string(),
        }
    }
}

/// Sandboxed app settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    pub remote: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            remote: "flathub".to_string(),
        }
    }
}

/// Post-migration health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthOptions {
    pub services: Vec<String>,
    pub reachability_host: String,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            services: vec!["dbus".into(), "polkit".into(), "networking".into()],
            reachability_host: "deb.debian.org".to_string(),
        }
    }
}

/// Background update monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    pub enabled: bool,
    pub interval_secs: u64,
    pub queue_capacity: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1800,
            queue_capacity: 16,
        }
    }
}

impl UpdateOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
