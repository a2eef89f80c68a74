//! md redundancy check control surface
//!
//! Each array exposes `sync_action`, `sync_min`, `sync_max`, `sync_completed`
//! and `mismatch_cnt` under `/sys/block/<md>/md/`. The surface is shared by
//! everything on the host; nothing here locks it.

use sectortrace_common::{Error, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Action value of an array with no sync running
pub const ACTION_IDLE: &str = "idle";
/// Action value that starts a read-only redundancy check
pub const ACTION_CHECK: &str = "check";

/// Upper bound of a sync window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncLimit {
    /// End of the array
    Max,
    /// Exclusive sector bound
    Sector(u64),
}

impl fmt::Display for SyncLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Sector(sector) => write!(f, "{sector}"),
        }
    }
}

/// Read/write access to one array's check controls
pub trait CheckControl {
    /// Array device the controls belong to
    fn array(&self) -> &str;

    /// Current sync action (`idle`, `check`, `resync`, ...)
    fn action(&self) -> Result<String>;

    fn set_action(&self, action: &str) -> Result<()>;

    fn set_sync_min(&self, sector: u64) -> Result<()>;

    fn set_sync_max(&self, limit: SyncLimit) -> Result<()>;

    /// Sectors completed by the running sync, `None` when none is running
    fn sync_completed(&self) -> Result<Option<u64>>;

    /// Mismatches found by the last check
    fn mismatch_count(&self) -> Result<u64>;
}

/// Controls backed by the md sysfs directory
#[derive(Clone, Debug)]
pub struct SysfsControl {
    array: String,
    dir: PathBuf,
}

impl SysfsControl {
    /// Controls of `array` (`/dev/md0`) under `sysfs_block` (`/sys/block`)
    pub fn new(sysfs_block: &Path, array: &str) -> Result<Self> {
        let name = Path::new(array)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Configuration(format!("not an array device: {array}")))?;
        Ok(Self {
            array: array.to_string(),
            dir: sysfs_block.join(name).join("md"),
        })
    }

    /// Directory holding the control files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self, file: &'static str) -> Result<String> {
        let value = fs::read_to_string(self.dir.join(file)).map_err(|source| Error::Control {
            array: self.array.clone(),
            file,
            source,
        })?;
        Ok(value.trim().to_string())
    }

    fn write(&self, file: &'static str, value: &str) -> Result<()> {
        debug!("{}: {} <- {}", self.array, file, value);
        fs::write(self.dir.join(file), value).map_err(|source| self.write_error(file, source))
    }

    /// md refuses control writes with EBUSY while another sync owns the array
    fn write_error(&self, file: &'static str, source: io::Error) -> Error {
        if source.kind() != io::ErrorKind::ResourceBusy {
            return Error::Control {
                array: self.array.clone(),
                file,
                source,
            };
        }
        let action = self.read("sync_action").unwrap_or_else(|_| "sync".to_string());
        Error::Busy {
            array: self.array.clone(),
            action,
        }
    }

    fn read_u64(&self, file: &str, text: &str) -> Result<u64> {
        text.trim()
            .parse()
            .map_err(|_| Error::parse("md sysfs", 1, format!("{file}: expected integer, got {text:?}")))
    }
}

impl CheckControl for SysfsControl {
    fn array(&self) -> &str {
        &self.array
    }

    fn action(&self) -> Result<String> {
        self.read("sync_action")
    }

    fn set_action(&self, action: &str) -> Result<()> {
        self.write("sync_action", action)
    }

    fn set_sync_min(&self, sector: u64) -> Result<()> {
        self.write("sync_min", &sector.to_string())
    }

    fn set_sync_max(&self, limit: SyncLimit) -> Result<()> {
        self.write("sync_max", &limit.to_string())
    }

    fn sync_completed(&self) -> Result<Option<u64>> {
        // "<done> / <total>" while running, "none" otherwise
        let text = self.read("sync_completed")?;
        if text == "none" {
            return Ok(None);
        }
        let done = text.split('/').next().unwrap_or_default();
        self.read_u64("sync_completed", done).map(Some)
    }

    fn mismatch_count(&self) -> Result<u64> {
        let text = self.read("mismatch_cnt")?;
        self.read_u64("mismatch_cnt", &text)
    }
}
