//! ext filesystem layer
//!
//! Converts a sector to a filesystem block and asks the filesystem which
//! inode owns it and what that inode is called. Always the last hop.

use crate::resolver::{Hop, Resolver};
use sectortrace_common::config::TraceConfig;
use sectortrace_common::{DeviceAttributes, Error, Layer, ResolutionStep, Result};
use sectortrace_probe::DeviceProbe;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Filesystem families `debugfs` can answer for
const EXT_FAMILY: &str = "ext";

/// ext3/ext4 journal inode
pub const JOURNAL_INODE: u64 = 8;

/// Owner of a filesystem block
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockOwner {
    /// Unallocated block
    Free,
    /// Allocated to an inode; `path` is its first link, if any
    File { inode: u64, path: Option<String> },
}

impl fmt::Display for BlockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("<free space>"),
            Self::File { inode, path } => {
                let name = match path {
                    Some(path) => path.as_str(),
                    None if *inode == JOURNAL_INODE => "<journal>",
                    None => "<no name>",
                };
                write!(f, "file={name} inum={inode}")
            }
        }
    }
}

/// Resolver for ext filesystems
pub struct FilesystemResolver {
    probe: Arc<dyn DeviceProbe>,
    sector_size: u64,
    block_size: u64,
}

impl FilesystemResolver {
    pub fn new(probe: Arc<dyn DeviceProbe>, config: &TraceConfig) -> Self {
        Self {
            probe,
            sector_size: config.sector_size,
            block_size: config.fs_block_size,
        }
    }

    /// Filesystem block holding a sector of `device`
    pub fn block_of(&self, device: &str, sector: u64) -> Result<u64> {
        sector
            .checked_mul(self.sector_size)
            .map(|byte| byte / self.block_size)
            .ok_or_else(|| Error::SectorOutOfRange {
                device: device.to_string(),
                sector,
            })
    }

    /// Find the owner of the block holding `sector`
    ///
    /// A free block ends the lookup without asking for a name. A block the
    /// filesystem has no record of is an `InvalidBlock` error.
    pub fn lookup(&self, device: &str, sector: u64) -> Result<BlockOwner> {
        let block = self.block_of(device, sector)?;
        let inode = self
            .probe
            .block_inode(device, block)?
            .ok_or_else(|| Error::InvalidBlock {
                device: device.to_string(),
                block,
            })?;
        if inode == 0 {
            debug!("{}: block {} is free", device, block);
            return Ok(BlockOwner::Free);
        }
        let path = self.probe.inode_path(device, inode)?;
        Ok(BlockOwner::File { inode, path })
    }
}

impl Resolver for FilesystemResolver {
    fn layer(&self) -> Layer {
        Layer::Filesystem
    }

    fn matches(&self, attrs: &DeviceAttributes) -> bool {
        attrs
            .content_type()
            .is_some_and(|kind| kind.starts_with(EXT_FAMILY))
    }

    fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>> {
        let block = self.block_of(device, sector)?;
        let owner = self.lookup(device, sector)?;
        Ok(Some(Hop::stop(ResolutionStep::new(
            device,
            sector,
            format!("block={block} {owner}"),
        ))))
    }
}
