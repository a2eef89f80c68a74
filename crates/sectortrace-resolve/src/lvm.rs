//! LVM physical volume layer
//!
//! Builds the extent map of a physical volume from the segment report and
//! translates PV sectors into logical volume sectors.
//!
//! FREE segments carry no logical extent numbers in the report. They are
//! numbered from a running cursor in report order so that every segment has
//! an LE range, which keeps the map uniform for callers that walk it.

use crate::resolver::{Hop, Resolver};
use sectortrace_common::{
    DeviceAttributes, Error, Layer, PhysicalVolumeMap, PvSegmentReport, ResolutionStep, Result,
    Segment, SegmentOwner,
};
use sectortrace_probe::DeviceProbe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Content type blkid reports for LVM physical volumes
pub const LVM_MEMBER: &str = "LVM2_member";

pub const LABEL_METADATA: &str = "metadata area";
pub const LABEL_FREE: &str = "FREE";
pub const LABEL_VOLUME: &str = "Logical Volume";
pub const LABEL_UNACCOUNTED: &str = "free space";

/// Where a PV sector falls in the extent map
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtentLocation<'a> {
    /// Below `pe_start`, in the on-disk metadata header
    MetadataArea,
    /// In an allocatable FREE segment
    Free(&'a Segment),
    /// In a logical volume, at `sector` of that volume
    Volume { segment: &'a Segment, sector: u64 },
    /// Past every reported segment
    Unaccounted,
}

/// Build a physical volume map, numbering FREE segments
///
/// Segments must arrive in ascending, non-overlapping PE order. Gaps in the
/// coverage are tolerated and logged: sectors in them translate as
/// unaccounted space.
pub fn build_pv_map(pv: &str, report: PvSegmentReport, pe_start: u64) -> Result<PhysicalVolumeMap> {
    if report.pe_size == 0 {
        return Err(Error::inconsistent_map(pv, "extent size is zero"));
    }

    let mut segments = Vec::with_capacity(report.segments.len());
    let mut free_cursor = 0u64;
    let mut next_pe = 0u64;
    for raw in report.segments {
        if raw.pe_last < raw.pe_first {
            return Err(Error::inconsistent_map(
                pv,
                format!("segment {}-{} is reversed", raw.pe_first, raw.pe_last),
            ));
        }
        if raw.pe_first < next_pe {
            return Err(Error::inconsistent_map(
                pv,
                format!("segment {}-{} overlaps or is out of order", raw.pe_first, raw.pe_last),
            ));
        }
        next_pe = raw.pe_last + 1;

        let count = raw.pe_last - raw.pe_first + 1;
        let (le_first, le_last) = match (&raw.owner, raw.le) {
            (_, Some(le)) => le,
            (SegmentOwner::Free, None) => {
                let le = (free_cursor, free_cursor + count - 1);
                free_cursor += count;
                le
            }
            (SegmentOwner::Volume(path), None) => {
                return Err(Error::inconsistent_map(
                    pv,
                    format!("{path} segment {}-{} has no logical extents", raw.pe_first, raw.pe_last),
                ));
            }
        };

        segments.push(Segment {
            pe_first: raw.pe_first,
            pe_last: raw.pe_last,
            owner: raw.owner,
            le_first,
            le_last,
        });
    }

    let map = PhysicalVolumeMap {
        vg_name: report.vg_name,
        pe_size: report.pe_size,
        pe_start,
        total_pe: report.total_pe,
        segments,
    };
    if let Err(reason) = map.check_contiguous() {
        warn!("{}: {}", pv, reason);
    }
    Ok(map)
}

/// Query the probe for a physical volume's map
///
/// Returns `None` when the device reports no segments.
pub fn load_pv_map(probe: &dyn DeviceProbe, pv: &str) -> Result<Option<PhysicalVolumeMap>> {
    let Some(report) = probe.pv_segments(pv)? else {
        return Ok(None);
    };
    let pe_start = probe
        .pe_start(pv)?
        .ok_or_else(|| Error::inconsistent_map(pv, "no PE start reported"))?;
    let map = build_pv_map(pv, report, pe_start)?;
    debug!(
        "{}: vg={} pe_size={} pe_start={} segments={}",
        pv,
        map.vg_name,
        map.pe_size,
        map.pe_start,
        map.segments.len()
    );
    Ok(Some(map))
}

/// Locate an absolute PV sector in the extent map
#[must_use]
pub fn locate(map: &PhysicalVolumeMap, sector: u64) -> ExtentLocation<'_> {
    if sector < map.pe_start {
        return ExtentLocation::MetadataArea;
    }
    let pe = (sector - map.pe_start) / map.pe_size;
    match map.segment_for_pe(pe) {
        None => ExtentLocation::Unaccounted,
        Some(segment) if segment.is_free() => ExtentLocation::Free(segment),
        Some(segment) => {
            let pe_offset = sector - (pe * map.pe_size + map.pe_start);
            let le = segment.le_first + (pe - segment.pe_first);
            ExtentLocation::Volume {
                segment,
                sector: le * map.pe_size + pe_offset,
            }
        }
    }
}

/// Map a logical volume sector back to the PV through one segment
///
/// Returns `None` if the sector is not in the segment's LE range.
#[must_use]
pub fn pv_sector(map: &PhysicalVolumeMap, segment: &Segment, lv_sector: u64) -> Option<u64> {
    let le = lv_sector / map.pe_size;
    if le < segment.le_first || le > segment.le_last {
        return None;
    }
    let pe = segment.pe_first + (le - segment.le_first);
    Some(pe * map.pe_size + map.pe_start + lv_sector % map.pe_size)
}

/// Resolver for LVM physical volumes
pub struct LogicalVolumeResolver {
    probe: Arc<dyn DeviceProbe>,
}

impl LogicalVolumeResolver {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self { probe }
    }
}

impl Resolver for LogicalVolumeResolver {
    fn layer(&self) -> Layer {
        Layer::LogicalVolume
    }

    fn matches(&self, attrs: &DeviceAttributes) -> bool {
        attrs.content_type() == Some(LVM_MEMBER)
    }

    fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>> {
        let Some(map) = load_pv_map(self.probe.as_ref(), device)? else {
            debug!("{}: no segments reported", device);
            return Ok(None);
        };

        let vg = map.vg_name.as_str();
        let hop = match locate(&map, sector) {
            ExtentLocation::MetadataArea => Hop::stop(ResolutionStep::new(vg, sector, LABEL_METADATA)),
            ExtentLocation::Free(_) => Hop::stop(ResolutionStep::new(vg, sector, LABEL_FREE)),
            ExtentLocation::Unaccounted => {
                Hop::stop(ResolutionStep::new(vg, sector, LABEL_UNACCOUNTED))
            }
            ExtentLocation::Volume { segment, sector } => {
                Hop::descend(ResolutionStep::new(segment.owner.to_string(), sector, LABEL_VOLUME))
            }
        };
        Ok(Some(hop))
    }
}
