//! Application configuration management.
//!
//! This module handles loading and saving the configuration: where the
//! admin API lives, how the admin area is laid out, session timing, and the
//! last email used to log in.
//!
//! Configuration is stored at `~/.config/hallpass/config.json`. The API URL
//! can be overridden with `HALLPASS_API_URL`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::AdminRoutes;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "hallpass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session storage file name in the cache directory
const SESSION_FILE: &str = "session.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "HALLPASS_API_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub admin_prefix: String,
    pub login_path: String,
    pub sweep_interval_secs: u64,
    /// 30s allows for slow API responses while failing fast enough for good UX.
    pub request_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            admin_prefix: "/admin".to_string(),
            login_path: "/admin/login".to_string(),
            sweep_interval_secs: 5 * 60,
            request_timeout_secs: 30,
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Missing file means defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides looked up by variable name. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Where the file-backed session store keeps its keys
    pub fn session_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join(SESSION_FILE))
    }

    pub fn admin_routes(&self) -> AdminRoutes {
        AdminRoutes::new(&self.admin_prefix, &self.login_path)
    }

    /// Never zero, so the sweep timer stays valid
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
