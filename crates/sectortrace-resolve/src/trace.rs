//! Translation loop
//!
//! Repeats chain dispatches from a whole-disk sector until a layer stops the
//! descent, no layer claims the device, or the hop limit is hit.

use crate::chain::{Dispatch, ResolverChain};
use crate::resolver::Next;
use sectortrace_common::config::TraceConfig;
use sectortrace_common::{Error, Layer, ResolutionStep, Result};
use sectortrace_probe::DeviceProbe;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Label of the first line of every trace
pub const LABEL_ROOT: &str = "Whole Disk";

/// Why a trace ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEnd {
    /// The filesystem named the owner of the sector
    Resolved,
    /// A layer reported a terminal state (marker or unsupported layout)
    Halted(Layer),
    /// No layer claims the last device
    Unclaimed,
    /// The claiming layer holds nothing at the address
    Missed(Layer),
    /// Gave up after the configured number of hops
    HopLimit,
}

/// Full path of one sector through the stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub root: ResolutionStep,
    pub hops: Vec<ResolutionStep>,
    pub end: TraceEnd,
}

impl Trace {
    /// Root line followed by every hop
    pub fn steps(&self) -> impl Iterator<Item = &ResolutionStep> {
        std::iter::once(&self.root).chain(self.hops.iter())
    }

    /// Check if the root sector lies outside every partition
    #[must_use]
    pub fn outside_partitions(&self) -> bool {
        self.hops.is_empty() && self.end == TraceEnd::Missed(Layer::Partition)
    }

    /// Turn a root-level partition miss into an error
    pub fn check(&self) -> Result<()> {
        if self.outside_partitions() {
            return Err(Error::OutsidePartitions {
                device: self.root.device.clone(),
                sector: self.root.sector,
            });
        }
        Ok(())
    }
}

/// Drives the resolver chain hop by hop
pub struct Tracer {
    chain: ResolverChain,
    max_hops: usize,
}

impl Tracer {
    pub fn new(probe: Arc<dyn DeviceProbe>, config: &TraceConfig) -> Self {
        Self {
            chain: ResolverChain::new(probe, config),
            max_hops: config.max_hops,
        }
    }

    /// Trace `sector` of `device` down the stack
    pub fn trace(&self, device: &str, sector: u64) -> Result<Trace> {
        let root = ResolutionStep::new(device, sector, LABEL_ROOT);
        let mut hops: Vec<ResolutionStep> = Vec::new();
        let mut current = (device.to_string(), sector);

        for _ in 0..self.max_hops {
            let (dev, sect) = (&current.0, current.1);
            let end = match self.chain.dispatch(dev, sect)? {
                Dispatch::Unclaimed => Some(TraceEnd::Unclaimed),
                Dispatch::Miss(layer) => Some(TraceEnd::Missed(layer)),
                Dispatch::Hop(layer, hop) => {
                    debug!("{} {} -> {}", dev, sect, hop.step);
                    let next = (hop.step.device.clone(), hop.step.sector);
                    hops.push(hop.step);
                    match (hop.next, layer) {
                        (Next::Stop, Layer::Filesystem) => Some(TraceEnd::Resolved),
                        (Next::Stop, layer) => Some(TraceEnd::Halted(layer)),
                        (Next::Descend, _) => {
                            current = next;
                            None
                        }
                    }
                }
            };
            if let Some(end) = end {
                return Ok(Trace { root, hops, end });
            }
        }

        warn!("{} {}: gave up after {} hops", device, sector, self.max_hops);
        Ok(Trace {
            root,
            hops,
            end: TraceEnd::HopLimit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use sectortrace_probe::MemoryProbe;

    fn tracer(probe: MemoryProbe) -> Tracer {
        Tracer::new(Arc::new(probe), &TraceConfig::default())
    }

    fn lines(trace: &Trace) -> Vec<String> {
        trace.steps().map(ToString::to_string).collect()
    }

    #[test]
    fn test_whole_disk_pv_to_file() {
        let trace = tracer(fixture::stack()).trace("/dev/sdc", 1031).unwrap();
        assert_eq!(
            lines(&trace),
            vec![
                "/dev/sdc 1031 Whole Disk",
                "/dev/vg2/root 647 Logical Volume",
                "/dev/vg2/root 647 block=80 file=/etc/passwd inum=12",
            ]
        );
        assert_eq!(trace.end, TraceEnd::Resolved);
        assert!(trace.check().is_ok());
    }

    #[test]
    fn test_partition_mirror_pv_to_file() {
        // sda3 starts at 1206848; md0 is a PV with pe_start 384, pe_size 128
        let sector = 1_206_848 + 384 + 8;
        let trace = tracer(fixture::stack()).trace("/dev/sda", sector).unwrap();
        assert_eq!(
            lines(&trace),
            vec![
                format!("/dev/sda {sector} Whole Disk"),
                "/dev/sda3 392 Software RAID".to_string(),
                "/dev/md0 392 active raid1".to_string(),
                "/dev/vg1/root 8 Logical Volume".to_string(),
                "/dev/vg1/root 8 block=1 file=/srv/data.bin inum=14".to_string(),
            ]
        );
        assert_eq!(trace.end, TraceEnd::Resolved);
    }

    #[test]
    fn test_free_extent_halts() {
        let sector = 206_848 + 2048 + 60 * 8192;
        let trace = tracer(fixture::stack()).trace("/dev/sda", sector).unwrap();
        assert_eq!(trace.hops.len(), 2);
        assert_eq!(trace.hops[1], ResolutionStep::new("vg0", 2048 + 60 * 8192, "FREE"));
        assert_eq!(trace.end, TraceEnd::Halted(Layer::LogicalVolume));
    }

    #[test]
    fn test_outside_partitions() {
        let trace = tracer(fixture::stack()).trace("/dev/sda", 12).unwrap();
        assert!(trace.outside_partitions());
        assert_eq!(lines(&trace), vec!["/dev/sda 12 Whole Disk"]);
        assert!(matches!(
            trace.check(),
            Err(Error::OutsidePartitions { sector: 12, .. })
        ));
    }

    #[test]
    fn test_unclaimed_after_hop() {
        // vg0/root has no attributes in the fixture
        let trace = tracer(fixture::stack()).trace("/dev/sda", 206_848 + 4096).unwrap();
        assert_eq!(trace.hops.last().unwrap().device, "/dev/vg0/root");
        assert_eq!(trace.end, TraceEnd::Unclaimed);
        assert!(!trace.outside_partitions());
    }

    #[test]
    fn test_hop_limit() {
        // A mirror whose array is a member of itself loops forever
        let probe = MemoryProbe::new()
            .with_attributes("/dev/md9", &[("TYPE", "linux_raid_member")])
            .with_array(sectortrace_common::RaidMember {
                array: "md9".into(),
                status: "active".into(),
                level: "raid1".into(),
                devices: vec!["md9".into()],
            });
        let config = TraceConfig {
            max_hops: 3,
            ..Default::default()
        };
        let trace = Tracer::new(Arc::new(probe), &config).trace("/dev/md9", 5).unwrap();
        assert_eq!(trace.hops.len(), 3);
        assert_eq!(trace.end, TraceEnd::HopLimit);
    }

    #[test]
    fn test_invalid_block_propagates() {
        let probe = fixture::stack();
        let err = tracer(probe).trace("/dev/sdc", 384 + 9 * 128).unwrap_err();
        assert!(matches!(err, Error::InvalidBlock { .. }));
    }

    #[test]
    fn test_serializes_for_json_output() {
        let trace = tracer(fixture::stack()).trace("/dev/sdd1", 3).unwrap();
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["end"]["halted"], "raid");
        assert_eq!(json["hops"][0]["label"], "raid5 not supported");
    }
}
