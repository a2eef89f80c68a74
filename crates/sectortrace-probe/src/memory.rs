//! In-memory probe
//!
//! Holds a snapshot of storage state and answers queries from it. Every query
//! is recorded so callers can assert which collaborators were consulted.

use crate::DeviceProbe;
use parking_lot::Mutex;
use sectortrace_common::{
    DeviceAttributes, Error, PartitionEntry, PvSegmentReport, RaidMember, Result,
};
use std::collections::HashMap;

/// Probe answering from captured storage state
#[derive(Debug, Default)]
pub struct MemoryProbe {
    attributes: HashMap<String, DeviceAttributes>,
    partitions: HashMap<String, Vec<PartitionEntry>>,
    pv_segments: HashMap<String, PvSegmentReport>,
    pe_starts: HashMap<String, u64>,
    arrays: Vec<RaidMember>,
    inodes: HashMap<(String, u64), u64>,
    paths: HashMap<(String, u64), String>,
    calls: Mutex<Vec<String>>,
}

impl MemoryProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set device attributes from `(key, value)` pairs
    #[must_use]
    pub fn with_attributes(mut self, device: &str, attrs: &[(&str, &str)]) -> Self {
        self.attributes
            .insert(device.to_string(), attrs.iter().copied().collect());
        self
    }

    #[must_use]
    pub fn with_partitions(mut self, device: &str, entries: Vec<PartitionEntry>) -> Self {
        self.partitions.insert(device.to_string(), entries);
        self
    }

    #[must_use]
    pub fn with_pv(mut self, pv: &str, report: PvSegmentReport, pe_start: u64) -> Self {
        self.pv_segments.insert(pv.to_string(), report);
        self.pe_starts.insert(pv.to_string(), pe_start);
        self
    }

    #[must_use]
    pub fn with_array(mut self, array: RaidMember) -> Self {
        self.arrays.push(array);
        self
    }

    /// Record the inode owning a block (0 for free)
    #[must_use]
    pub fn with_block(mut self, fs: &str, block: u64, inode: u64) -> Self {
        self.inodes.insert((fs.to_string(), block), inode);
        self
    }

    #[must_use]
    pub fn with_path(mut self, fs: &str, inode: u64, path: &str) -> Self {
        self.paths.insert((fs.to_string(), inode), path.to_string());
        self
    }

    /// Queries made so far, as `"<query> <args>"`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl DeviceProbe for MemoryProbe {
    fn attributes(&self, device: &str) -> Result<DeviceAttributes> {
        self.record(format!("attributes {device}"));
        Ok(self.attributes.get(device).cloned().unwrap_or_default())
    }

    fn partition_table(&self, device: &str) -> Result<Vec<PartitionEntry>> {
        self.record(format!("partition_table {device}"));
        self.partitions
            .get(device)
            .cloned()
            .ok_or_else(|| Error::CommandFailed {
                command: format!("sfdisk -d {device}"),
                status: "exit status: 1".into(),
                stderr: format!("{device}: does not contain a recognized partition table"),
            })
    }

    fn pv_segments(&self, pv: &str) -> Result<Option<PvSegmentReport>> {
        self.record(format!("pv_segments {pv}"));
        Ok(self.pv_segments.get(pv).cloned())
    }

    fn pe_start(&self, pv: &str) -> Result<Option<u64>> {
        self.record(format!("pe_start {pv}"));
        Ok(self.pe_starts.get(pv).copied())
    }

    fn raid_arrays(&self) -> Result<Vec<RaidMember>> {
        self.record("raid_arrays".to_string());
        Ok(self.arrays.clone())
    }

    fn block_inode(&self, fs: &str, block: u64) -> Result<Option<u64>> {
        self.record(format!("block_inode {fs} {block}"));
        Ok(self.inodes.get(&(fs.to_string(), block)).copied())
    }

    fn inode_path(&self, fs: &str, inode: u64) -> Result<Option<String>> {
        self.record(format!("inode_path {fs} {inode}"));
        Ok(self.paths.get(&(fs.to_string(), inode)).cloned())
    }
}
