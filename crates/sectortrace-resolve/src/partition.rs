//! Partition table layer
//!
//! Maps an absolute sector on a whole disk to the partition holding it.

use crate::resolver::{Hop, Resolver};
use sectortrace_common::{
    DeviceAttributes, Layer, PartitionEntry, PartitionType, ResolutionStep, Result,
};
use sectortrace_probe::DeviceProbe;
use std::sync::Arc;
use tracing::debug;

/// MBR system ids
const ID_EXTENDED: u8 = 0x05;
const ID_EXTENDED_LBA: u8 = 0x0f;
const ID_EXTENDED_LINUX: u8 = 0x85;
const ID_LINUX: u8 = 0x83;
const ID_LVM: u8 = 0x8e;
const ID_RAID: u8 = 0xfd;

/// GPT partition type GUIDs
const GUID_LINUX: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
const GUID_LVM: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
const GUID_RAID: &str = "A19D880F-05FC-4D3B-A006-743F0F84911E";

/// Human name of a partition type, or the raw code
#[must_use]
pub fn type_name(kind: &PartitionType) -> String {
    let name = match kind {
        PartitionType::Code(ID_LVM) => "Linux LVM",
        PartitionType::Code(ID_LINUX) => "Linux Filesystem",
        PartitionType::Code(ID_RAID) => "Software RAID",
        PartitionType::Code(ID_EXTENDED | ID_EXTENDED_LBA | ID_EXTENDED_LINUX) => {
            "Extended Partition"
        }
        PartitionType::Guid(guid) => match guid.as_str() {
            GUID_LVM => "Linux LVM",
            GUID_LINUX => "Linux Filesystem",
            GUID_RAID => "Software RAID",
            _ => return kind.to_string(),
        },
        PartitionType::Code(_) => return kind.to_string(),
    };
    name.to_string()
}

/// Check if a partition only contains other partitions
#[must_use]
pub const fn is_container(kind: &PartitionType) -> bool {
    matches!(
        kind,
        PartitionType::Code(ID_EXTENDED | ID_EXTENDED_LBA | ID_EXTENDED_LINUX)
    )
}

/// First leaf partition holding `sector`
#[must_use]
pub fn find_partition(table: &[PartitionEntry], sector: u64) -> Option<&PartitionEntry> {
    table
        .iter()
        .filter(|p| !is_container(&p.kind))
        .find(|p| p.contains(sector))
}

/// Resolver for devices carrying a partition table
pub struct PartitionResolver {
    probe: Arc<dyn DeviceProbe>,
}

impl PartitionResolver {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self { probe }
    }
}

impl Resolver for PartitionResolver {
    fn layer(&self) -> Layer {
        Layer::Partition
    }

    fn matches(&self, attrs: &DeviceAttributes) -> bool {
        attrs.partition_table_type().is_some()
    }

    fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>> {
        let table = self.probe.partition_table(device)?;
        let Some(part) = find_partition(&table, sector) else {
            debug!("{}: sector {} outside all {} partitions", device, sector, table.len());
            return Ok(None);
        };
        Ok(Some(Hop::descend(ResolutionStep::new(
            part.device.clone(),
            sector - part.start,
            type_name(&part.kind),
        ))))
    }
}
