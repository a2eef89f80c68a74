//! Error types for sectortrace
//!
//! This module defines the common error types used by every layer of the
//! translation pipeline and the scrub loop.

use thiserror::Error;

/// Common result type for sectortrace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for sectortrace
#[derive(Debug, Error)]
pub enum Error {
    // Collaborator errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected {tool} output at line {line}: {reason}")]
    Parse {
        tool: &'static str,
        line: usize,
        reason: String,
    },

    // Translation errors
    #[error("{device}: sector {sector} lies outside any partition")]
    OutsidePartitions { device: String, sector: u64 },

    #[error("{device}: no physical extent map (not a physical volume?)")]
    NotPhysicalVolume { device: String },

    #[error("{device}: sector {sector} is beyond the addressable range")]
    SectorOutOfRange { device: String, sector: u64 },

    #[error("{device}: invalid block {block}")]
    InvalidBlock { device: String, block: u64 },

    #[error("inconsistent extent map for {device}: {reason}")]
    InconsistentMap { device: String, reason: String },

    // Scrub errors
    #[error("{array}: {file}: {source}")]
    Control {
        array: String,
        file: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{array}: {action} in progress")]
    Busy { array: String, action: String },

    #[error("{array}: no segments of {volume} on this array")]
    VolumeNotFound { array: String, volume: String },

    #[error("{array}: scrub interrupted")]
    Interrupted { array: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a parse error for a tool's output
    pub fn parse(tool: &'static str, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            tool,
            line,
            reason: reason.into(),
        }
    }

    /// Create an inconsistent map error
    pub fn inconsistent_map(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentMap {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error only affects one scrub segment
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Process exit code for the CLI
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            _ => 1,
        }
    }
}
