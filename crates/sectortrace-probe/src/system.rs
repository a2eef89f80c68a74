//! Probe backed by the system storage tools
//!
//! Runs `blkid`, `sfdisk`, `pvdisplay`, `pvs` and `debugfs` and reads the
//! kernel RAID status table. Each call spawns a fresh process.

use crate::parse;
use crate::DeviceProbe;
use sectortrace_common::config::ToolsConfig;
use sectortrace_common::{
    DeviceAttributes, Error, PartitionEntry, PvSegmentReport, RaidMember, Result,
};
use std::fs;
use std::process::Command;
use tracing::debug;

/// `blkid` exit status when the device has no recognizable signature
const BLKID_NOTHING_FOUND: i32 = 2;

/// Probe that queries the live system
#[derive(Clone, Debug, Default)]
pub struct SystemProbe {
    tools: ToolsConfig,
}

impl SystemProbe {
    /// Create a probe using the given tool locations
    #[must_use]
    pub const fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    /// Run a tool and return its stdout
    ///
    /// Exit statuses listed in `accept` are treated as success.
    fn run(&self, program: &str, args: &[&str], accept: &[i32]) -> Result<String> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| Error::Spawn {
                command: command.clone(),
                source,
            })?;

        let accepted = output.status.success()
            || output.status.code().is_some_and(|code| accept.contains(&code));
        if !accepted {
            return Err(Error::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn debugfs(&self, fs: &str, request: &str) -> Result<String> {
        self.run(&self.tools.debugfs, &["-R", request, fs], &[])
    }
}

impl DeviceProbe for SystemProbe {
    fn attributes(&self, device: &str) -> Result<DeviceAttributes> {
        let out = self.run(
            &self.tools.blkid,
            &["-o", "export", device],
            &[BLKID_NOTHING_FOUND],
        )?;
        parse::parse_blkid_export(&out)
    }

    fn partition_table(&self, device: &str) -> Result<Vec<PartitionEntry>> {
        let out = self.run(&self.tools.sfdisk, &["-d", device], &[])?;
        parse::parse_sfdisk_dump(&out)
    }

    fn pv_segments(&self, pv: &str) -> Result<Option<PvSegmentReport>> {
        let out = self.run(&self.tools.pvdisplay, &["--units", "k", "-m", pv], &[])?;
        parse::parse_pvdisplay_map(&out)
    }

    fn pe_start(&self, pv: &str) -> Result<Option<u64>> {
        let out = self.run(&self.tools.pvs, &["--units", "k", "-o+pe_start", pv], &[])?;
        parse::parse_pvs_pe_start(&out, pv)
    }

    fn raid_arrays(&self) -> Result<Vec<RaidMember>> {
        match fs::read_to_string(&self.tools.mdstat) {
            Ok(text) => parse::parse_mdstat(&text),
            // No md driver loaded: no arrays
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not present", self.tools.mdstat.display());
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn block_inode(&self, fs: &str, block: u64) -> Result<Option<u64>> {
        let out = self.debugfs(fs, &format!("icheck {block}"))?;
        parse::parse_icheck(&out, block)
    }

    fn inode_path(&self, fs: &str, inode: u64) -> Result<Option<String>> {
        let out = self.debugfs(fs, &format!("ncheck {inode}"))?;
        parse::parse_ncheck(&out, inode)
    }
}
