use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Paths and knobs shared by every component. Built once at startup and
/// handed to each component by reference; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    #[serde(default = "default_ingest_root")]
    pub ingest_root: PathBuf,
    #[serde(default = "default_auto_scan_flag")]
    pub auto_scan_flag: PathBuf,
    #[serde(default = "default_control_program")]
    pub control_program: PathBuf,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Kernel name prefix of removable disks, e.g. `sd` for `sda`, `sdb`.
    #[serde(default = "default_removable_prefix")]
    pub removable_prefix: String,
    #[serde(default = "default_lsblk_program")]
    pub lsblk_program: PathBuf,
    #[serde(default = "default_control_timeout_secs")]
    pub control_timeout_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_status_file() -> PathBuf {
    PathBuf::from("/var/run/ingest/current.json")
}

fn default_ingest_root() -> PathBuf {
    PathBuf::from("/mnt/ingest")
}

fn default_auto_scan_flag() -> PathBuf {
    PathBuf::from("/var/run/ingest/auto_scan_enabled")
}

fn default_control_program() -> PathBuf {
    PathBuf::from("/usr/local/bin/ingest-control.sh")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("/etc/ingest/dashboard.htpasswd")
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_removable_prefix() -> String {
    "sd".to_string()
}

fn default_lsblk_program() -> PathBuf {
    PathBuf::from("lsblk")
}

fn default_control_timeout_secs() -> u64 {
    60
}

fn default_listen_addr() -> String {
    "0.0.0.0:4666".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_file: default_status_file(),
            ingest_root: default_ingest_root(),
            auto_scan_flag: default_auto_scan_flag(),
            control_program: default_control_program(),
            credentials_file: default_credentials_file(),
            history_limit: default_history_limit(),
            removable_prefix: default_removable_prefix(),
            lsblk_program: default_lsblk_program(),
            control_timeout_secs: default_control_timeout_secs(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl MonitorConfig {
    /// Loads the config file when one is given, otherwise returns defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let data = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str::<Self>(&data)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit must be greater than zero"));
        }
        if self.control_timeout_secs == 0 {
            return Err(anyhow!("control_timeout_secs must be greater than zero"));
        }
        if self.removable_prefix.trim().is_empty() {
            return Err(anyhow!("removable_prefix must not be empty"));
        }
        Ok(())
    }

    /// Caller-requested history length; zero or absent means the configured limit.
    pub fn history_limit_or_default(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|limit| *limit > 0)
            .unwrap_or(self.history_limit)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn auto_scan_enabled(&self) -> bool {
        self.auto_scan_flag.exists()
    }
}
