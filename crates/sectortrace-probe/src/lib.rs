//! sectortrace Probe - Live storage state
//!
//! This crate provides the read-only view of the storage stack that the
//! resolvers work from:
//! - `DeviceProbe`, the injectable query capability
//! - `SystemProbe`, which runs the system tools and parses their output
//! - `MemoryProbe`, a fixture-backed probe for tests and offline replay

pub mod memory;
pub mod parse;
pub mod system;

use sectortrace_common::{DeviceAttributes, PartitionEntry, PvSegmentReport, RaidMember, Result};

pub use memory::MemoryProbe;
pub use system::SystemProbe;

/// Read-only queries against the storage stack
///
/// Every call reflects live state at the time of the call; nothing is cached
/// between invocations.
pub trait DeviceProbe: Send + Sync {
    /// Attribute map of a block device (`PTTYPE`, `TYPE`, ...)
    fn attributes(&self, device: &str) -> Result<DeviceAttributes>;

    /// Partition table records in table order
    fn partition_table(&self, device: &str) -> Result<Vec<PartitionEntry>>;

    /// Segment allocation report of a physical volume, `None` if it has none
    fn pv_segments(&self, pv: &str) -> Result<Option<PvSegmentReport>>;

    /// Sectors reserved ahead of the first physical extent
    fn pe_start(&self, pv: &str) -> Result<Option<u64>>;

    /// Software RAID membership table
    fn raid_arrays(&self) -> Result<Vec<RaidMember>>;

    /// Inode owning a filesystem block
    ///
    /// `Some(0)` for a free block, `None` when the filesystem has no record
    /// of the block at all.
    fn block_inode(&self, fs: &str, block: u64) -> Result<Option<u64>>;

    /// First path linked to an inode
    fn inode_path(&self, fs: &str, inode: u64) -> Result<Option<String>>;
}
