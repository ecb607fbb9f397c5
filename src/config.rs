use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{MemLimit, parse_mem};
use crate::error::SjqError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub daemon: DaemonConfig,
    pub resources: ResourcesConfig,
    pub defaults: DefaultsConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub db_path: PathBuf,
}

fn sjq_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".sjq")
}

/// Socket path used when none is configured
pub fn default_socket_path() -> PathBuf {
    sjq_home().join("sjq.sock")
}

/// Database path used when none is configured
pub fn default_db_path() -> PathBuf {
    sjq_home().join("sjq.db")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            db_path: default_db_path(),
        }
    }
}

/// Global resource budget shared by all running jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub max_procs: u32,
    /// Memory quantity such as `"16G"`; `None` leaves memory unconstrained
    pub max_mem: Option<String>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            max_procs: cpus as u32,
            max_mem: None,
        }
    }
}

/// Values applied to submissions that leave resources unspecified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub procs: u32,
    pub mem: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self { procs: 1, mem: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub idle_timeout_secs: u64,
    /// Mark jobs that cannot be launched as Failed instead of leaving them Queued
    pub fail_on_launch_error: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 10,
            fail_on_launch_error: false,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            daemon: DaemonConfig::default(),
            resources: ResourcesConfig::default(),
            defaults: DefaultsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.limits().context("Invalid resource settings")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve the resource settings into numeric limits.
    pub fn limits(&self) -> crate::error::Result<Limits> {
        let max_mem = match &self.resources.max_mem {
            Some(s) => MemLimit::Bytes(parse_mem(s).map_err(|e| SjqError::Config(e.to_string()))?),
            None => MemLimit::Unlimited,
        };
        let default_mem = match &self.defaults.mem {
            Some(s) => Some(parse_mem(s).map_err(|e| SjqError::Config(e.to_string()))?),
            None => None,
        };
        if self.resources.max_procs == 0 {
            return Err(SjqError::Config("resources.max_procs must be at least 1".to_string()));
        }
        Ok(Limits {
            max_procs: self.resources.max_procs,
            max_mem,
            default_procs: self.defaults.procs,
            default_mem,
        })
    }
}

/// Numeric resource limits and submission defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_procs: u32,
    pub max_mem: MemLimit,
    pub default_procs: u32,
    pub default_mem: Option<u64>,
}

impl Limits {
    /// Limits with the given slot count, unconstrained memory, one slot per job by default.
    pub fn slots(max_procs: u32) -> Self {
        Self {
            max_procs,
            max_mem: MemLimit::Unlimited,
            default_procs: 1,
            default_mem: None,
        }
    }

    pub fn with_max_mem(mut self, bytes: u64) -> Self {
        self.max_mem = MemLimit::Bytes(bytes);
        self
    }

    pub fn with_default_mem(mut self, bytes: u64) -> Self {
        self.default_mem = Some(bytes);
        self
    }
}
