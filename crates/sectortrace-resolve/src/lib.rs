//! sectortrace Resolve - Layered address translation
//!
//! This crate maps a (device, sector) pair down through the storage stack:
//! - Partition tables
//! - LVM physical volume extent maps
//! - Software RAID mirrors
//! - ext filesystems (block to inode to path)
//!
//! Each layer is a `Resolver`; `ResolverChain` dispatches one hop at a time
//! and `Tracer` repeats hops until no layer claims the address.

pub mod chain;
pub mod filesystem;
pub mod lvm;
pub mod partition;
pub mod raid;
pub mod resolver;
pub mod trace;

#[cfg(test)]
mod fixture;

pub use chain::{Dispatch, ResolverChain};
pub use filesystem::{BlockOwner, FilesystemResolver};
pub use lvm::{ExtentLocation, LogicalVolumeResolver, build_pv_map, load_pv_map, locate};
pub use partition::PartitionResolver;
pub use raid::RaidResolver;
pub use resolver::{Hop, Next, Resolver};
pub use trace::{Trace, TraceEnd, Tracer};
