//! Odoomon configuration.
//!
//! Config file: /etc/odoomon/config.toml (overridable via $ODOOMON_CONFIG
//! or an explicit path). Loaded once at startup into an immutable
//! `MonitorConfig` that callers pass by reference into each component;
//! there is no process-wide mutable cache.

use crate::error::MonitorError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default system config location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/odoomon/config.toml";

/// Identity the addon directories are expected to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Expected owning user (e.g. "odoo")
    #[serde(default = "default_identity_name")]
    pub user: String,

    /// Expected owning group (e.g. "odoo")
    #[serde(default = "default_identity_name")]
    pub group: String,
}

fn default_identity_name() -> String {
    "odoo".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: default_identity_name(),
            group: default_identity_name(),
        }
    }
}

/// Addon directory discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Explicitly listed addon directories
    #[serde(default)]
    pub addons_dirs: Vec<PathBuf>,

    /// Odoo server config whose `addons_path` entry is merged in
    #[serde(default)]
    pub odoo_config: Option<PathBuf>,
}

/// One logical service in the registry.
///
/// A plain entry maps its key to a single unit. A multi-instance family
/// (e.g. PostgreSQL clusters) fans out into `{unit}@{instance}` units,
/// with instances taken from the config and, when `auto_discover` is set,
/// unioned with the instances currently registered with systemd.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Logical name used by callers (e.g. "postgres")
    pub key: String,

    /// Concrete unit name, or the template prefix for a family
    pub unit: String,

    /// Whether this entry fans out into `{unit}@{instance}` units
    #[serde(default)]
    pub multi_instance: bool,

    /// Explicitly configured instance suffixes (e.g. "14-main")
    #[serde(default)]
    pub instances: Vec<String>,

    /// Discover running instances at poll time
    #[serde(default)]
    pub auto_discover: bool,
}

/// Daemon loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between poll/audit ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Top-level Odoomon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default = "default_services")]
    pub services: Vec<ServiceEntry>,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

fn default_services() -> Vec<ServiceEntry> {
    vec![
        ServiceEntry {
            key: "odoo".to_string(),
            unit: "odoo".to_string(),
            multi_instance: false,
            instances: vec![],
            auto_discover: false,
        },
        ServiceEntry {
            key: "postgres".to_string(),
            unit: "postgresql".to_string(),
            multi_instance: true,
            instances: vec![],
            auto_discover: true,
        },
    ]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            modules: ModulesConfig::default(),
            services: default_services(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file.
    ///
    /// Priority:
    /// 1. Explicit path argument
    /// 2. $ODOOMON_CONFIG
    /// 3. /etc/odoomon/config.toml
    /// 4. Defaults (missing file is not an error)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("ODOOMON_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(SYSTEM_CONFIG_PATH)),
        };

        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: MonitorConfig = toml::from_str(&contents)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;

        info!(
            "Loaded config from {} ({} services)",
            path.display(),
            config.services.len()
        );
        Ok(config)
    }

    /// Addon directories to audit: explicitly configured ones plus the
    /// `addons_path` entries of the Odoo server config, deduplicated.
    pub fn module_directories(&self) -> Vec<PathBuf> {
        let mut dirs = self.modules.addons_dirs.clone();

        if let Some(odoo_config) = &self.modules.odoo_config {
            match fs::read_to_string(odoo_config) {
                Ok(contents) => {
                    for dir in parse_addons_path(&contents) {
                        if !dirs.contains(&dir) {
                            dirs.push(dir);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not read Odoo config {}: {}",
                        odoo_config.display(),
                        e
                    );
                }
            }
        }

        dirs
    }
}

/// Extract the comma-separated `addons_path` value from the `[options]`
/// section of an Odoo server config.
fn parse_addons_path(contents: &str) -> Vec<PathBuf> {
    let mut in_options = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            in_options = line == "[options]";
            continue;
        }
        if !in_options {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "addons_path" {
                return value
                    .split(',')
                    .map(|p| PathBuf::from(p.trim()))
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect();
            }
        }
    }

    vec![]
}
