//! Storage stacks used across the resolver tests

use sectortrace_common::{
    PartitionEntry, PartitionType, PvSegmentReport, RaidMember, RawSegment, SegmentOwner,
};
use sectortrace_probe::MemoryProbe;

pub fn partition(device: &str, start: u64, size: u64, code: u8) -> PartitionEntry {
    PartitionEntry {
        device: device.to_string(),
        start,
        size,
        kind: PartitionType::Code(code),
    }
}

pub fn volume(pe_first: u64, pe_last: u64, lv: &str, le_first: u64) -> RawSegment {
    RawSegment {
        pe_first,
        pe_last,
        owner: SegmentOwner::Volume(lv.to_string()),
        le: Some((le_first, le_first + (pe_last - pe_first))),
    }
}

pub fn free(pe_first: u64, pe_last: u64) -> RawSegment {
    RawSegment {
        pe_first,
        pe_last,
        owner: SegmentOwner::Free,
        le: None,
    }
}

/// `pe_size=128`, `pe_start=384`: root on PE 0-9, FREE on PE 10-19
pub fn small_pv_report(vg: &str) -> PvSegmentReport {
    PvSegmentReport {
        vg_name: vg.to_string(),
        pe_size: 128,
        total_pe: Some(20),
        segments: vec![volume(0, 9, &format!("/dev/{vg}/root"), 0), free(10, 19)],
    }
}

/// A disk with every layer kind:
///
/// - `/dev/sda1` ext4, `/dev/sda2` LVM PV of `vg0`, `/dev/sda3` raid1 member
///   of `md0` which is a PV of `vg1`, `/dev/sda4` extended holding `/dev/sda5`
/// - `/dev/sdc` whole-disk PV of `vg2`
/// - `/dev/sdd1` raid5 member of `md1`
pub fn stack() -> MemoryProbe {
    MemoryProbe::new()
        .with_attributes("/dev/sda", &[("PTTYPE", "dos")])
        .with_partitions(
            "/dev/sda",
            vec![
                partition("/dev/sda1", 2048, 204_800, 0x83),
                partition("/dev/sda2", 206_848, 1_000_000, 0x8e),
                partition("/dev/sda3", 1_206_848, 2_000_000, 0xfd),
                partition("/dev/sda4", 3_206_848, 100_000, 0x05),
                partition("/dev/sda5", 3_208_896, 90_000, 0x83),
            ],
        )
        .with_attributes("/dev/sda1", &[("TYPE", "ext4")])
        .with_attributes("/dev/sda2", &[("TYPE", "LVM2_member")])
        .with_pv(
            "/dev/sda2",
            PvSegmentReport {
                vg_name: "vg0".into(),
                pe_size: 8192,
                total_pe: Some(121),
                segments: vec![
                    volume(0, 49, "/dev/vg0/root", 0),
                    free(50, 79),
                    volume(80, 99, "/dev/vg0/home", 0),
                    volume(100, 120, "/dev/vg0/root", 50),
                ],
            },
            2048,
        )
        .with_attributes("/dev/sda3", &[("TYPE", "linux_raid_member")])
        .with_array(RaidMember {
            array: "md0".into(),
            status: "active".into(),
            level: "raid1".into(),
            devices: vec!["sdb3".into(), "sda3".into()],
        })
        .with_attributes("/dev/md0", &[("TYPE", "LVM2_member")])
        .with_pv("/dev/md0", small_pv_report("vg1"), 384)
        .with_attributes("/dev/sda5", &[("TYPE", "ext4")])
        .with_attributes("/dev/sdc", &[("TYPE", "LVM2_member")])
        .with_pv("/dev/sdc", small_pv_report("vg2"), 384)
        .with_attributes("/dev/vg2/root", &[("TYPE", "ext4")])
        .with_block("/dev/vg2/root", 80, 12)
        .with_path("/dev/vg2/root", 12, "/etc/passwd")
        .with_block("/dev/vg2/root", 81, 0)
        .with_block("/dev/vg2/root", 82, 8)
        .with_block("/dev/vg2/root", 83, 20)
        .with_attributes("/dev/vg1/root", &[("TYPE", "ext4")])
        .with_block("/dev/vg1/root", 1, 14)
        .with_path("/dev/vg1/root", 14, "/srv/data.bin")
        .with_attributes("/dev/sdd1", &[("TYPE", "linux_raid_member")])
        .with_array(RaidMember {
            array: "md1".into(),
            status: "active".into(),
            level: "raid5".into(),
            devices: vec!["sdd1".into(), "sde1".into(), "sdf1".into()],
        })
        .with_attributes("/dev/md1", &[("TYPE", "ext4")])
}
