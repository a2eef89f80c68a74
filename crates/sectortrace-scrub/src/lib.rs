//! Scrub loop for sectortrace
//!
//! Runs the md `check` action over the sectors one logical volume occupies on
//! a RAID1 array, segment by segment, and collects the mismatch counts.

pub mod control;
pub mod scrub;

pub use control::{ACTION_CHECK, ACTION_IDLE, CheckControl, SyncLimit, SysfsControl};
pub use scrub::{ScrubEvent, ScrubReport, Scrubber, SegmentOutcome, SegmentScrub};
