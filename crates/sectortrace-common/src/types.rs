//! Core type definitions for sectortrace
//!
//! This module defines the values passed between pipeline stages and the
//! extent layout model of a physical volume.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Attribute key carrying the partition table type (`dos`, `gpt`)
pub const ATTR_PARTITION_TABLE: &str = "PTTYPE";
/// Attribute key carrying the content type (`LVM2_member`, `ext4`, ...)
pub const ATTR_CONTENT_TYPE: &str = "TYPE";

/// Storage abstraction a resolver understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    #[display("partition table")]
    Partition,
    #[display("logical volume")]
    LogicalVolume,
    #[display("raid")]
    Raid,
    #[display("filesystem")]
    Filesystem,
}

/// One hop of a translation: where the address landed and what it is
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStep {
    /// Device (or volume group name for markers that are not devices)
    pub device: String,
    /// Sector offset within `device`
    pub sector: u64,
    /// Human readable description of the hop
    pub label: String,
}

impl ResolutionStep {
    pub fn new(device: impl Into<String>, sector: u64, label: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            sector,
            label: label.into(),
        }
    }
}

impl fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.device, self.sector, self.label)
    }
}

/// Block device attributes as reported by the attribute probe
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttributes(BTreeMap<String, String>);

impl DeviceAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Partition table type, present only on devices carrying a table
    #[must_use]
    pub fn partition_table_type(&self) -> Option<&str> {
        self.get(ATTR_PARTITION_TABLE)
    }

    /// Content type of the device
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get(ATTR_CONTENT_TYPE)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Partition type identifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionType {
    /// Legacy MBR system id
    Code(u8),
    /// GPT partition type GUID (stored upper case)
    Guid(String),
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code:#x}"),
            Self::Guid(guid) => f.write_str(guid),
        }
    }
}

/// One record of a partition table dump
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Partition device path
    pub device: String,
    /// First sector
    pub start: u64,
    /// Length in sectors
    pub size: u64,
    pub kind: PartitionType,
}

impl PartitionEntry {
    /// Check if the partition covers an absolute sector
    #[must_use]
    pub const fn contains(&self, sector: u64) -> bool {
        sector >= self.start && sector - self.start < self.size
    }
}

/// Membership record of one software RAID array
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidMember {
    /// Array name (`md0`)
    pub array: String,
    /// Array state (`active`, `active (auto-read-only)`, `inactive`)
    pub status: String,
    /// Redundancy level (`raid1`, `raid5`, ...); empty when unknown
    pub level: String,
    /// Member device names in table order (`sda1`)
    pub devices: Vec<String>,
}

impl RaidMember {
    /// Check if a device path or bare name is one of the members
    #[must_use]
    pub fn has_member(&self, device: &str) -> bool {
        let name = device.strip_prefix("/dev/").unwrap_or(device);
        self.devices.iter().any(|d| d == name)
    }

    /// Device path of the assembled array
    #[must_use]
    pub fn array_device(&self) -> String {
        format!("/dev/{}", self.array)
    }
}

/// Owner of a run of physical extents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentOwner {
    /// Allocatable free extents
    Free,
    /// Logical volume path (`/dev/vg0/root`)
    Volume(String),
}

impl SegmentOwner {
    /// Check if the owner is the named volume (exact path or `/<name>` suffix)
    #[must_use]
    pub fn is_volume(&self, name: &str) -> bool {
        match self {
            Self::Free => false,
            Self::Volume(path) => {
                path == name
                    || path
                        .strip_suffix(name)
                        .is_some_and(|head| head.ends_with('/'))
            }
        }
    }
}

impl fmt::Display for SegmentOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("FREE"),
            Self::Volume(path) => f.write_str(path),
        }
    }
}

/// Segment as reported by the volume manager, before free-space numbering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegment {
    pub pe_first: u64,
    pub pe_last: u64,
    pub owner: SegmentOwner,
    /// Inclusive logical extent range; absent for FREE segments
    pub le: Option<(u64, u64)>,
}

/// Per-segment allocation report of one physical volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvSegmentReport {
    pub vg_name: String,
    /// Extent size in sectors
    pub pe_size: u64,
    /// Total extents on the PV, when reported
    pub total_pe: Option<u64>,
    /// Segments in report (PE ascending) order
    pub segments: Vec<RawSegment>,
}

/// A run of physical extents mapped to a run of logical extents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub pe_first: u64,
    pub pe_last: u64,
    pub owner: SegmentOwner,
    pub le_first: u64,
    pub le_last: u64,
}

impl Segment {
    #[must_use]
    pub const fn contains_pe(&self, pe: u64) -> bool {
        self.pe_first <= pe && pe <= self.pe_last
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.owner, SegmentOwner::Free)
    }

    /// Sector range `[sync_min, sync_max)` the segment occupies on the PV
    #[must_use]
    pub const fn sector_range(&self, pe_size: u64, pe_start: u64) -> Range<u64> {
        (self.pe_first * pe_size + pe_start)..((self.pe_last + 1) * pe_size + pe_start)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Seg:{}-{}:{}:{}-{}",
            self.pe_first, self.pe_last, self.owner, self.le_first, self.le_last
        )
    }
}

/// Extent layout of one physical volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolumeMap {
    pub vg_name: String,
    /// Extent size in sectors
    pub pe_size: u64,
    /// First sector of extent 0 (metadata lives below it)
    pub pe_start: u64,
    /// Total extents on the PV, when reported
    pub total_pe: Option<u64>,
    /// Segments sorted by `pe_first`
    pub segments: Vec<Segment>,
}

impl PhysicalVolumeMap {
    /// Segment containing a physical extent
    #[must_use]
    pub fn segment_for_pe(&self, pe: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains_pe(pe))
    }

    /// Segments owned by a logical volume, matched by path or name
    pub fn volume_segments<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.owner.is_volume(name))
    }

    /// Check that segments are ordered, disjoint and gap-free from extent 0
    ///
    /// When the total extent count is known the segments must also end
    /// exactly at it.
    pub fn check_contiguous(&self) -> std::result::Result<(), String> {
        let mut next = 0u64;
        for seg in &self.segments {
            if seg.pe_last < seg.pe_first {
                return Err(format!("{seg}: last extent before first"));
            }
            if seg.pe_first < next {
                return Err(format!("{seg}: overlaps previous segment"));
            }
            if seg.pe_first > next {
                return Err(format!("{seg}: gap at extent {next}"));
            }
            next = seg.pe_last + 1;
        }
        match self.total_pe {
            Some(total) if total != next => Err(format!(
                "segments cover {next} extents, volume has {total}"
            )),
            _ => Ok(()),
        }
    }
}
