//! Redundancy check of one logical volume's extents on a mirror
//!
//! For every segment of the volume on the array's PV map, the array's check
//! window is narrowed to the segment's sectors, a `check` is run to
//! completion, and the mismatch counter is collected. The action is put back
//! to `idle` and the window reset to the whole array on every way out,
//! including errors and interruption.

use crate::control::{ACTION_CHECK, ACTION_IDLE, CheckControl, SyncLimit};
use sectortrace_common::config::ScrubConfig;
use sectortrace_common::{Error, Result, Segment};
use sectortrace_probe::DeviceProbe;
use sectortrace_resolve::load_pv_map;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest uninterrupted sleep while waiting for the next poll
const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

/// Progress notifications emitted while scrubbing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScrubEvent {
    /// Map of the array's PV was loaded
    Map {
        vg_name: String,
        pe_start: u64,
        pe_size: u64,
    },
    /// A segment is about to be checked
    SegmentStart { segment: Segment, range: Range<u64> },
    /// Poll of a running check
    Progress { done: u64, max: u64, percent: u64 },
    /// The segment was skipped because another sync is running
    Skipped { segment: Segment, action: String },
    /// The segment's check completed
    SegmentDone { segment: Segment, mismatches: u64 },
}

/// Result of checking one segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    Checked { mismatches: u64 },
    Skipped { action: String },
}

/// Per-segment record of a scrub run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentScrub {
    pub segment: Segment,
    pub range: Range<u64>,
    pub outcome: SegmentOutcome,
}

/// Summary of a scrub run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrubReport {
    pub array: String,
    pub volume: String,
    pub segments: Vec<SegmentScrub>,
    /// Sum of mismatch counters over checked segments
    pub total_mismatches: u64,
}

impl ScrubReport {
    /// Number of segments skipped as busy
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s.outcome, SegmentOutcome::Skipped { .. }))
            .count()
    }
}

/// Runs checks against one array's control surface
pub struct Scrubber<'a> {
    probe: &'a dyn DeviceProbe,
    control: &'a dyn CheckControl,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl<'a> Scrubber<'a> {
    pub fn new(probe: &'a dyn DeviceProbe, control: &'a dyn CheckControl, config: &ScrubConfig) -> Self {
        Self {
            probe,
            control,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Share a flag that aborts the run when set
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Check every segment of `volume` on the array
    pub fn scrub(&self, volume: &str, on_event: &mut dyn FnMut(ScrubEvent)) -> Result<ScrubReport> {
        let array = self.control.array().to_string();
        let map = load_pv_map(self.probe, &array)?.ok_or_else(|| Error::NotPhysicalVolume {
            device: array.clone(),
        })?;
        on_event(ScrubEvent::Map {
            vg_name: map.vg_name.clone(),
            pe_start: map.pe_start,
            pe_size: map.pe_size,
        });

        let segments: Vec<&Segment> = map.volume_segments(volume).collect();
        if segments.is_empty() {
            return Err(Error::VolumeNotFound {
                array,
                volume: volume.to_string(),
            });
        }

        let mut window = WindowReset::new(self.control);
        let mut report = ScrubReport {
            array: array.clone(),
            volume: volume.to_string(),
            segments: Vec::with_capacity(segments.len()),
            total_mismatches: 0,
        };

        for segment in segments {
            let range = segment.sector_range(map.pe_size, map.pe_start);
            on_event(ScrubEvent::SegmentStart {
                segment: segment.clone(),
                range: range.clone(),
            });

            let outcome = match self.check_range(&range, &mut window, on_event) {
                Ok(mismatches) => {
                    report.total_mismatches += mismatches;
                    on_event(ScrubEvent::SegmentDone {
                        segment: segment.clone(),
                        mismatches,
                    });
                    SegmentOutcome::Checked { mismatches }
                }
                Err(e) if e.is_skippable() => {
                    warn!("{}, skipping {}", e, segment);
                    let action = match e {
                        Error::Busy { action, .. } => action,
                        other => other.to_string(),
                    };
                    on_event(ScrubEvent::Skipped {
                        segment: segment.clone(),
                        action: action.clone(),
                    });
                    SegmentOutcome::Skipped { action }
                }
                Err(e) => return Err(e),
            };
            report.segments.push(SegmentScrub {
                segment: segment.clone(),
                range,
                outcome,
            });
        }

        window.finish()?;
        info!(
            "{}: {} mismatches over {} segments of {}",
            array,
            report.total_mismatches,
            report.segments.len(),
            volume
        );
        Ok(report)
    }

    /// Run one check over `range` and return its mismatch count
    fn check_range(
        &self,
        range: &Range<u64>,
        window: &mut WindowReset<'_>,
        on_event: &mut dyn FnMut(ScrubEvent),
    ) -> Result<u64> {
        let action = self.control.action()?;
        if action != ACTION_IDLE {
            return Err(Error::Busy {
                array: self.control.array().to_string(),
                action,
            });
        }

        // sync_min may not exceed the current sync_max, so open the window first
        window.touch();
        self.control.set_sync_max(SyncLimit::Max)?;
        self.control.set_sync_min(range.start)?;
        self.control.set_sync_max(SyncLimit::Sector(range.end))?;

        let running = RunningCheck::start(self.control)?;
        loop {
            if !self.wait() {
                return Err(Error::Interrupted {
                    array: self.control.array().to_string(),
                });
            }
            let Some(done) = self.control.sync_completed()? else {
                debug!("{}: check no longer running", self.control.array());
                break;
            };
            let span = range.end - range.start;
            let percent = done.saturating_sub(range.start).min(span) * 100 / span;
            on_event(ScrubEvent::Progress {
                done,
                max: range.end,
                percent,
            });
            if done >= range.end {
                break;
            }
        }

        let mismatches = self.control.mismatch_count()?;
        running.finish()?;
        Ok(mismatches)
    }

    /// Sleep one poll interval; `false` if the stop flag was raised
    fn wait(&self) -> bool {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
        }
    }
}

/// Returns the action to idle unless the check was finished explicitly
struct RunningCheck<'a> {
    control: &'a dyn CheckControl,
    armed: bool,
}

impl<'a> RunningCheck<'a> {
    fn start(control: &'a dyn CheckControl) -> Result<Self> {
        // Armed before the write: a failed write may still have started a check
        let mut guard = Self {
            control,
            armed: true,
        };
        if let Err(e) = control.set_action(ACTION_CHECK) {
            // A busy refusal means another sync owns the action; leave it running
            guard.armed = !e.is_skippable();
            return Err(e);
        }
        Ok(guard)
    }

    fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.control.set_action(ACTION_IDLE)
    }
}

impl Drop for RunningCheck<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.control.set_action(ACTION_IDLE) {
                warn!("{}: failed to stop check: {}", self.control.array(), e);
            }
        }
    }
}

/// Resets the sync window to the whole array once it has been narrowed
///
/// A window never touched by this run is left alone so a sync started by
/// someone else keeps its bounds.
struct WindowReset<'a> {
    control: &'a dyn CheckControl,
    touched: bool,
}

impl<'a> WindowReset<'a> {
    const fn new(control: &'a dyn CheckControl) -> Self {
        Self {
            control,
            touched: false,
        }
    }

    fn touch(&mut self) {
        self.touched = true;
    }

    fn reset(&self) -> Result<()> {
        self.control.set_sync_max(SyncLimit::Max)?;
        self.control.set_sync_min(0)
    }

    fn finish(mut self) -> Result<()> {
        if !self.touched {
            return Ok(());
        }
        self.touched = false;
        match self.reset() {
            Err(e) if e.is_skippable() => {
                warn!("{}, sync range left as is", e);
                Ok(())
            }
            other => other,
        }
    }
}

impl Drop for WindowReset<'_> {
    fn drop(&mut self) {
        if self.touched {
            if let Err(e) = self.reset() {
                warn!("{}: failed to reset sync range: {}", self.control.array(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sectortrace_common::{PvSegmentReport, RawSegment, SegmentOwner};
    use sectortrace_probe::MemoryProbe;

    /// md controls simulated in memory
    ///
    /// A running check advances by `step` sectors per completion poll.
    struct FakeControl {
        state: Mutex<FakeState>,
        step: u64,
        /// Mismatches reported for successive checks
        mismatches: Vec<u64>,
        /// Action reported as busy for the n-th action read
        busy_on_read: Option<usize>,
        /// The n-th `check` start is refused as if a sync raced in
        refuse_check: Option<usize>,
    }

    #[derive(Default)]
    struct FakeState {
        action: String,
        min: u64,
        max: Option<u64>,
        done: u64,
        checks: usize,
        action_reads: usize,
        check_starts: usize,
        polls: usize,
        log: Vec<String>,
    }

    impl FakeControl {
        fn new(step: u64, mismatches: Vec<u64>) -> Self {
            Self {
                state: Mutex::new(FakeState {
                    action: ACTION_IDLE.into(),
                    ..Default::default()
                }),
                step,
                mismatches,
                busy_on_read: None,
                refuse_check: None,
            }
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().log.clone()
        }
    }

    impl CheckControl for FakeControl {
        fn array(&self) -> &str {
            "/dev/md0"
        }

        fn action(&self) -> Result<String> {
            let mut state = self.state.lock();
            let read = state.action_reads;
            state.action_reads += 1;
            if self.busy_on_read == Some(read) {
                return Ok("resync".into());
            }
            Ok(state.action.clone())
        }

        fn set_action(&self, action: &str) -> Result<()> {
            let mut state = self.state.lock();
            if action == ACTION_CHECK {
                let start = state.check_starts;
                state.check_starts += 1;
                if self.refuse_check == Some(start) {
                    return Err(Error::Busy {
                        array: "/dev/md0".into(),
                        action: "recover".into(),
                    });
                }
            }
            state.log.push(format!("action={action}"));
            if action == ACTION_CHECK {
                state.done = state.min;
                state.checks += 1;
            }
            state.action = action.to_string();
            Ok(())
        }

        fn set_sync_min(&self, sector: u64) -> Result<()> {
            let mut state = self.state.lock();
            if state.max.is_some_and(|max| sector > max) {
                return Err(Error::Configuration("sync_min above sync_max".into()));
            }
            state.log.push(format!("sync_min={sector}"));
            state.min = sector;
            Ok(())
        }

        fn set_sync_max(&self, limit: SyncLimit) -> Result<()> {
            let mut state = self.state.lock();
            state.log.push(format!("sync_max={limit}"));
            state.max = match limit {
                SyncLimit::Max => None,
                SyncLimit::Sector(sector) => Some(sector),
            };
            Ok(())
        }

        fn sync_completed(&self) -> Result<Option<u64>> {
            let mut state = self.state.lock();
            state.polls += 1;
            if state.action != ACTION_CHECK {
                return Ok(None);
            }
            let max = state.max.unwrap_or(u64::MAX);
            state.done = (state.done + self.step).min(max);
            Ok(Some(state.done))
        }

        fn mismatch_count(&self) -> Result<u64> {
            let state = self.state.lock();
            Ok(self.mismatches.get(state.checks - 1).copied().unwrap_or(0))
        }
    }

    fn volume(pe_first: u64, pe_last: u64, lv: &str, le_first: u64) -> RawSegment {
        RawSegment {
            pe_first,
            pe_last,
            owner: SegmentOwner::Volume(lv.into()),
            le: Some((le_first, le_first + pe_last - pe_first)),
        }
    }

    /// md0 PV: data on PE 0-9 and 20-24, FREE on 10-19
    fn probe() -> MemoryProbe {
        MemoryProbe::new().with_pv(
            "/dev/md0",
            PvSegmentReport {
                vg_name: "vg1".into(),
                pe_size: 128,
                total_pe: Some(25),
                segments: vec![
                    volume(0, 9, "/dev/vg1/data", 0),
                    RawSegment {
                        pe_first: 10,
                        pe_last: 19,
                        owner: SegmentOwner::Free,
                        le: None,
                    },
                    volume(20, 24, "/dev/vg1/data", 10),
                ],
            },
            384,
        )
    }

    fn scrubber<'a>(probe: &'a MemoryProbe, control: &'a FakeControl) -> Scrubber<'a> {
        Scrubber::new(probe, control, &ScrubConfig::default()).with_poll_interval(Duration::ZERO)
    }

    #[test]
    fn test_checks_every_segment_and_sums_mismatches() {
        let probe = probe();
        let control = FakeControl::new(640, vec![3, 4]);
        let mut events = Vec::new();
        let report = scrubber(&probe, &control)
            .scrub("data", &mut |e| events.push(e))
            .unwrap();

        assert_eq!(report.total_mismatches, 7);
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.segments[0].range, 384..1664);
        assert_eq!(report.segments[1].range, 2944..3584);
        assert_eq!(report.skipped(), 0);
        assert_eq!(
            events[0],
            ScrubEvent::Map {
                vg_name: "vg1".into(),
                pe_start: 384,
                pe_size: 128
            }
        );
        assert!(events.contains(&ScrubEvent::Progress {
            done: 1024,
            max: 1664,
            percent: 50
        }));
        assert!(events.contains(&ScrubEvent::Progress {
            done: 1664,
            max: 1664,
            percent: 100
        }));
    }

    #[test]
    fn test_window_order_and_cleanup() {
        let probe = probe();
        let control = FakeControl::new(10_000, vec![0]);
        scrubber(&probe, &control).scrub("/dev/vg1/data", &mut |_| {}).unwrap();

        assert_eq!(
            control.log(),
            vec![
                "sync_max=max",
                "sync_min=384",
                "sync_max=1664",
                "action=check",
                "action=idle",
                "sync_max=max",
                "sync_min=2944",
                "sync_max=3584",
                "action=check",
                "action=idle",
                "sync_max=max",
                "sync_min=0",
            ]
        );
    }

    #[test]
    fn test_busy_segment_is_skipped() {
        let probe = probe();
        let mut control = FakeControl::new(10_000, vec![5]);
        control.busy_on_read = Some(0);
        let report = scrubber(&probe, &control).scrub("data", &mut |_| {}).unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(
            report.segments[0].outcome,
            SegmentOutcome::Skipped {
                action: "resync".into()
            }
        );
        assert_eq!(report.segments[1].outcome, SegmentOutcome::Checked { mismatches: 5 });
        assert_eq!(report.total_mismatches, 5);
        // The window was narrowed for the second segment, so it is reset
        assert_eq!(control.log().last().unwrap(), "sync_min=0");
    }

    #[test]
    fn test_sync_racing_in_before_check_skips_segment() {
        let probe = probe();
        let mut control = FakeControl::new(10_000, vec![5]);
        control.refuse_check = Some(0);
        let report = scrubber(&probe, &control).scrub("data", &mut |_| {}).unwrap();

        assert_eq!(
            report.segments[0].outcome,
            SegmentOutcome::Skipped {
                action: "recover".into()
            }
        );
        assert_eq!(report.segments[1].outcome, SegmentOutcome::Checked { mismatches: 5 });
        assert_eq!(report.total_mismatches, 5);
        // The refused start is not answered with idle, which would stop the other sync
        assert_eq!(
            control.log(),
            vec![
                "sync_max=max",
                "sync_min=384",
                "sync_max=1664",
                "sync_max=max",
                "sync_min=2944",
                "sync_max=3584",
                "action=check",
                "action=idle",
                "sync_max=max",
                "sync_min=0",
            ]
        );
    }

    #[test]
    fn test_untouched_window_is_left_alone() {
        let probe = MemoryProbe::new().with_pv(
            "/dev/md0",
            PvSegmentReport {
                vg_name: "vg1".into(),
                pe_size: 128,
                total_pe: None,
                segments: vec![volume(0, 9, "/dev/vg1/data", 0)],
            },
            384,
        );
        let mut control = FakeControl::new(10_000, vec![]);
        control.busy_on_read = Some(0);
        let report = scrubber(&probe, &control).scrub("data", &mut |_| {}).unwrap();
        assert_eq!(report.skipped(), 1);
        assert!(control.log().is_empty());
    }

    #[test]
    fn test_interrupt_restores_idle_and_window() {
        let probe = probe();
        let control = FakeControl::new(1, vec![]);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let result = scrubber(&probe, &control)
            .with_stop_flag(stop)
            .scrub("data", &mut |e| {
                if matches!(e, ScrubEvent::Progress { .. }) {
                    flag.store(true, Ordering::Relaxed);
                }
            });

        assert!(matches!(result, Err(Error::Interrupted { .. })));
        let log = control.log();
        assert_eq!(
            &log[log.len() - 3..],
            &["action=idle", "sync_max=max", "sync_min=0"]
        );
        assert_eq!(control.state.lock().action, ACTION_IDLE);
    }

    #[test]
    fn test_check_ending_early_stops_polling() {
        struct Vanishing(FakeControl);

        impl CheckControl for Vanishing {
            fn array(&self) -> &str {
                self.0.array()
            }
            fn action(&self) -> Result<String> {
                self.0.action()
            }
            fn set_action(&self, action: &str) -> Result<()> {
                self.0.set_action(action)
            }
            fn set_sync_min(&self, sector: u64) -> Result<()> {
                self.0.set_sync_min(sector)
            }
            fn set_sync_max(&self, limit: SyncLimit) -> Result<()> {
                self.0.set_sync_max(limit)
            }
            fn sync_completed(&self) -> Result<Option<u64>> {
                Ok(None)
            }
            fn mismatch_count(&self) -> Result<u64> {
                self.0.mismatch_count()
            }
        }

        let probe = probe();
        let control = Vanishing(FakeControl::new(1, vec![2, 2]));
        let probe_ref: &dyn DeviceProbe = &probe;
        let report = Scrubber::new(probe_ref, &control, &ScrubConfig::default())
            .with_poll_interval(Duration::ZERO)
            .scrub("data", &mut |_| {})
            .unwrap();
        assert_eq!(report.total_mismatches, 4);
    }

    #[test]
    fn test_unknown_volume() {
        let probe = probe();
        let control = FakeControl::new(1, vec![]);
        assert!(matches!(
            scrubber(&probe, &control).scrub("home", &mut |_| {}),
            Err(Error::VolumeNotFound { .. })
        ));
        assert!(control.log().is_empty());
    }

    #[test]
    fn test_array_without_pv() {
        let probe = MemoryProbe::new();
        let control = FakeControl::new(1, vec![]);
        assert!(matches!(
            scrubber(&probe, &control).scrub("data", &mut |_| {}),
            Err(Error::NotPhysicalVolume { .. })
        ));
    }
}
