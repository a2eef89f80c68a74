//! Configuration types for sectortrace
//!
//! Every section has a `Default` so a missing or partial configuration file
//! still yields a usable setup. CLI flags override file values.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Size of the address unit used by every layer below the filesystem
pub const SECTOR_SIZE: u64 = 512;

/// Root configuration for sectortrace
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub scrub: ScrubConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that would make the arithmetic meaningless
    pub fn validate(&self) -> Result<()> {
        if self.trace.sector_size == 0 {
            return Err(Error::Configuration("trace.sector_size must be nonzero".into()));
        }
        if self.trace.fs_block_size == 0 {
            return Err(Error::Configuration("trace.fs_block_size must be nonzero".into()));
        }
        if self.trace.max_hops == 0 {
            return Err(Error::Configuration("trace.max_hops must be at least 1".into()));
        }
        Ok(())
    }
}

/// Translation loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Bytes per sector
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    /// Filesystem block size (not discovered from the filesystem)
    #[serde(default = "default_fs_block_size")]
    pub fs_block_size: u64,
    /// Upper bound on hops before giving up
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            sector_size: default_sector_size(),
            fs_block_size: default_fs_block_size(),
            max_hops: default_max_hops(),
        }
    }
}

/// Scrub loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrubConfig {
    /// Seconds between progress polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Root of the per-array md control directories
    #[serde(default = "default_sysfs_block")]
    pub sysfs_block: PathBuf,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            sysfs_block: default_sysfs_block(),
        }
    }
}

/// External tool locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_blkid")]
    pub blkid: String,
    #[serde(default = "default_sfdisk")]
    pub sfdisk: String,
    #[serde(default = "default_pvdisplay")]
    pub pvdisplay: String,
    #[serde(default = "default_pvs")]
    pub pvs: String,
    #[serde(default = "default_debugfs")]
    pub debugfs: String,
    /// Kernel RAID status table
    #[serde(default = "default_mdstat")]
    pub mdstat: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            blkid: default_blkid(),
            sfdisk: default_sfdisk(),
            pvdisplay: default_pvdisplay(),
            pvs: default_pvs(),
            debugfs: default_debugfs(),
            mdstat: default_mdstat(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_sector_size() -> u64 {
    SECTOR_SIZE
}

fn default_fs_block_size() -> u64 {
    4096
}

fn default_max_hops() -> usize {
    16
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_sysfs_block() -> PathBuf {
    PathBuf::from("/sys/block")
}

fn default_blkid() -> String {
    "blkid".to_string()
}

fn default_sfdisk() -> String {
    "sfdisk".to_string()
}

fn default_pvdisplay() -> String {
    "pvdisplay".to_string()
}

fn default_pvs() -> String {
    "pvs".to_string()
}

fn default_debugfs() -> String {
    "debugfs".to_string()
}

fn default_mdstat() -> PathBuf {
    PathBuf::from("/proc/mdstat")
}

fn default_log_level() -> String {
    "warn".to_string()
}
