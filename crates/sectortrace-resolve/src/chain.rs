//! Resolver chain
//!
//! Holds the layer resolvers in a fixed order and runs the first one whose
//! `matches` accepts the device attributes (first match wins). A whole-disk
//! PV has no partition table and falls through to the LVM layer; a RAID
//! member reaches the filesystem only through its assembled array.

use crate::filesystem::FilesystemResolver;
use crate::lvm::LogicalVolumeResolver;
use crate::partition::PartitionResolver;
use crate::raid::RaidResolver;
use crate::resolver::{Hop, Resolver};
use sectortrace_common::config::TraceConfig;
use sectortrace_common::{Layer, Result};
use sectortrace_probe::DeviceProbe;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one dispatch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// No resolver applies to the device
    Unclaimed,
    /// The claiming layer holds nothing at the address
    Miss(Layer),
    /// The claiming layer translated the address
    Hop(Layer, Hop),
}

/// Ordered chain of layer resolvers
pub struct ResolverChain {
    probe: Arc<dyn DeviceProbe>,
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    /// Create the chain: partition, logical volume, RAID, filesystem
    pub fn new(probe: Arc<dyn DeviceProbe>, config: &TraceConfig) -> Self {
        let resolvers: Vec<Box<dyn Resolver>> = vec![
            Box::new(PartitionResolver::new(probe.clone())),
            Box::new(LogicalVolumeResolver::new(probe.clone())),
            Box::new(RaidResolver::new(probe.clone())),
            Box::new(FilesystemResolver::new(probe.clone(), config)),
        ];
        Self { probe, resolvers }
    }

    /// Layers in dispatch order
    pub fn layers(&self) -> Vec<Layer> {
        self.resolvers.iter().map(|r| r.layer()).collect()
    }

    /// Run the first applicable resolver on `device`
    pub fn dispatch(&self, device: &str, sector: u64) -> Result<Dispatch> {
        let attrs = self.probe.attributes(device)?;
        let Some(resolver) = self.resolvers.iter().find(|r| r.matches(&attrs)) else {
            debug!("{}: no layer claims device ({:?})", device, attrs);
            return Ok(Dispatch::Unclaimed);
        };

        let layer = resolver.layer();
        debug!("{}: resolving sector {} as {}", device, sector, layer);
        Ok(match resolver.resolve(device, sector)? {
            Some(hop) => Dispatch::Hop(layer, hop),
            None => Dispatch::Miss(layer),
        })
    }

    /// Translate one hop, `None` if no layer claims or holds the address
    pub fn resolve(&self, device: &str, sector: u64) -> Result<Option<Hop>> {
        Ok(match self.dispatch(device, sector)? {
            Dispatch::Hop(_, hop) => Some(hop),
            Dispatch::Unclaimed | Dispatch::Miss(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use sectortrace_common::ResolutionStep;
    use sectortrace_probe::MemoryProbe;

    fn chain(probe: Arc<MemoryProbe>) -> ResolverChain {
        ResolverChain::new(probe, &TraceConfig::default())
    }

    #[test]
    fn test_fixed_order() {
        let chain = chain(Arc::new(MemoryProbe::new()));
        assert_eq!(
            chain.layers(),
            vec![Layer::Partition, Layer::LogicalVolume, Layer::Raid, Layer::Filesystem]
        );
    }

    #[test]
    fn test_whole_disk_pv_skips_partition_layer() {
        let probe = Arc::new(fixture::stack());
        let chain = chain(probe.clone());
        let dispatch = chain.dispatch("/dev/sdc", 1031).unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Hop(
                Layer::LogicalVolume,
                Hop::descend(ResolutionStep::new("/dev/vg2/root", 647, "Logical Volume"))
            )
        );
        let calls = probe.calls();
        assert!(!calls.iter().any(|c| c.starts_with("partition_table")));
    }

    #[test]
    fn test_one_resolver_per_hop() {
        let probe = Arc::new(fixture::stack());
        let chain = chain(probe.clone());
        chain.resolve("/dev/sda", 2048).unwrap().unwrap();
        assert_eq!(probe.calls(), vec!["attributes /dev/sda", "partition_table /dev/sda"]);
    }

    #[test]
    fn test_miss_and_unclaimed() {
        let chain = chain(Arc::new(fixture::stack()));
        assert_eq!(chain.dispatch("/dev/sda", 10).unwrap(), Dispatch::Miss(Layer::Partition));
        assert_eq!(chain.dispatch("/dev/loop9", 10).unwrap(), Dispatch::Unclaimed);
        assert!(chain.resolve("/dev/sda", 10).unwrap().is_none());
        assert!(chain.resolve("/dev/loop9", 10).unwrap().is_none());
    }

    #[test]
    fn test_parity_member_halts() {
        let chain = chain(Arc::new(fixture::stack()));
        let hop = chain.resolve("/dev/sdd1", 500).unwrap().unwrap();
        assert_eq!(hop.step, ResolutionStep::new("/dev/md1", 500, "raid5 not supported"));
        assert!(hop.is_final());
    }
}
