//! Software RAID layer
//!
//! Only mirrors are translated: a raid1 member's address space is identical
//! to the array's, so the sector passes through unchanged. The md superblock
//! offset at the start of a member is not modeled. Other levels are reported
//! and translation stops there.

use crate::resolver::{Hop, Resolver};
use sectortrace_common::{DeviceAttributes, Layer, ResolutionStep, Result};
use sectortrace_probe::DeviceProbe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Content type blkid reports for md members
pub const RAID_MEMBER: &str = "linux_raid_member";

/// The only level whose members map one to one onto the array
pub const MIRROR_LEVEL: &str = "raid1";

/// Resolver for md array members
pub struct RaidResolver {
    probe: Arc<dyn DeviceProbe>,
}

impl RaidResolver {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self { probe }
    }
}

impl Resolver for RaidResolver {
    fn layer(&self) -> Layer {
        Layer::Raid
    }

    fn matches(&self, attrs: &DeviceAttributes) -> bool {
        attrs.content_type() == Some(RAID_MEMBER)
    }

    fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>> {
        let arrays = self.probe.raid_arrays()?;
        let Some(md) = arrays.iter().find(|md| md.has_member(device)) else {
            debug!("{}: not a member of any running array", device);
            return Ok(None);
        };

        let array = md.array_device();
        if md.level != MIRROR_LEVEL {
            let level = if md.level.is_empty() { "unknown level" } else { md.level.as_str() };
            warn!("{}: member of {} ({}), not descending", device, array, level);
            return Ok(Some(Hop::stop(ResolutionStep::new(
                array,
                sector,
                format!("{level} not supported"),
            ))));
        }

        Ok(Some(Hop::descend(ResolutionStep::new(
            array,
            sector,
            format!("{} {}", md.status, md.level),
        ))))
    }
}
