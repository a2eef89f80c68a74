//! sectortrace
//!
//! Maps a sector of a disk to the file that owns it, walking partitions, LVM
//! physical volumes and md mirrors, and runs md checks over the extents of a
//! logical volume.
//!
//! Usage:
//!   sectortrace trace /dev/sda 123456789
//!   sectortrace scrub /dev/md0 root --interval 10

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sectortrace_common::{Config, Error};
use sectortrace_probe::{DeviceProbe, SystemProbe};
use sectortrace_resolve::{Trace, TraceEnd, Tracer};
use sectortrace_scrub::{ScrubEvent, ScrubReport, Scrubber, SysfsControl};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sectortrace")]
#[command(about = "Trace disk sectors through the storage stack to files")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sectortrace.toml")]
    config: String,

    /// Log level (overrides the configuration file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log every hop and tool invocation
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the device and offset of a sector at every layer
    Trace {
        /// Whole disk (or any block device) to start from
        device: String,

        /// Sector number in 512-byte units
        sector: u64,

        /// Print the trace as JSON
        #[arg(long)]
        json: bool,

        /// Filesystem block size in bytes
        #[arg(long)]
        block_size: Option<u64>,
    },

    /// Run an md check over the extents of one logical volume
    Scrub {
        /// RAID1 array holding the physical volume
        array: String,

        /// Logical volume name or path
        lv: String,

        /// Seconds between progress polls
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(e.downcast_ref::<Error>().map_or(1, Error::exit_code))
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = load_config(Path::new(&args.config))?;

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.clone().unwrap_or_else(|| config.logging.level.clone())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    debug!("Config file: {}", args.config);

    match args.command {
        Commands::Trace {
            device,
            sector,
            json,
            block_size,
        } => {
            if let Some(block_size) = block_size {
                config.trace.fs_block_size = block_size;
            }
            config.validate()?;
            run_trace(&config, &device, sector, json)
        }
        Commands::Scrub { array, lv, interval } => {
            if let Some(interval) = interval {
                config.scrub.poll_interval_secs = interval;
            }
            config.validate()?;
            run_scrub(config, array, lv).await
        }
    }
}

/// Load the configuration file, falling back to defaults when it is absent
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&text)
        .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
    Ok(config)
}

fn run_trace(config: &Config, device: &str, sector: u64, json: bool) -> Result<ExitCode> {
    let probe: Arc<dyn DeviceProbe> = Arc::new(SystemProbe::new(config.tools.clone()));
    let trace = Tracer::new(probe, &config.trace)
        .trace(device, sector)
        .with_context(|| format!("Failed to trace {device} sector {sector}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    } else {
        print!("{}", render_trace(&trace));
    }

    match trace.end {
        TraceEnd::Unclaimed => info!("No layer claims the last device"),
        TraceEnd::HopLimit => warn!("Trace stopped after {} hops", config.trace.max_hops),
        _ => {}
    }

    if let Err(e) = trace.check() {
        eprintln!("{e}");
        return Ok(ExitCode::from(e.exit_code()));
    }
    Ok(ExitCode::SUCCESS)
}

/// One `<device> <sector> <label>` line per step
fn render_trace(trace: &Trace) -> String {
    trace.steps().map(|step| format!("{step}\n")).collect()
}

async fn run_scrub(config: Config, array: String, volume: String) -> Result<ExitCode> {
    // Installed before the check starts so no signal ends the process mid-check
    let mut signals = StopSignals::new().context("Failed to install signal handlers")?;
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let listener = tokio::spawn(async move {
        let name = signals.recv().await;
        warn!("{} received, stopping check", name);
        flag.store(true, Ordering::Relaxed);
    });

    let worker = tokio::task::spawn_blocking(move || scrub(&config, &array, &volume, stop)).await;
    listener.abort();

    let report = worker.context("Scrub worker failed")??;
    if report.skipped() > 0 {
        warn!("{} segments skipped, array busy", report.skipped());
    }
    println!("mismatch_cnt = {}", report.total_mismatches);
    Ok(ExitCode::SUCCESS)
}

/// Signals that stop a running scrub and let it restore the array
#[cfg(unix)]
struct StopSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

#[cfg(unix)]
impl StopSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next stop signal and return its name
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[cfg(not(unix))]
struct StopSignals;

#[cfg(not(unix))]
impl StopSignals {
    #[allow(clippy::unnecessary_wraps)]
    const fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}

fn scrub(
    config: &Config,
    array: &str,
    volume: &str,
    stop: Arc<AtomicBool>,
) -> sectortrace_common::Result<ScrubReport> {
    let probe = SystemProbe::new(config.tools.clone());
    let control = SysfsControl::new(&config.scrub.sysfs_block, array)?;
    Scrubber::new(&probe, &control, &config.scrub)
        .with_stop_flag(stop)
        .scrub(volume, &mut |event| {
            if let Some(line) = render_event(&event) {
                println!("{line}");
            }
        })
}

/// Progress line for a scrub event, `None` for events only logged
fn render_event(event: &ScrubEvent) -> Option<String> {
    match event {
        ScrubEvent::Map {
            vg_name,
            pe_start,
            pe_size,
        } => Some(format!("{vg_name} {pe_start} {pe_size}")),
        ScrubEvent::SegmentStart { segment, range } => {
            Some(format!("{segment}\n    {} {}", range.start, range.end))
        }
        ScrubEvent::Progress { done, max, percent } => Some(format!("{done} / {max} {percent}%")),
        ScrubEvent::Skipped { action, .. } => Some(format!("    skipped: {action} in progress")),
        ScrubEvent::SegmentDone { segment, mismatches } => {
            debug!("{}: {} mismatches", segment, mismatches);
            None
        }
    }
}
