//! Parsers for the text emitted by the storage tools
//!
//! Each parser accepts exactly the line shapes listed in its doc comment and
//! returns `Error::Parse` (tool name plus 1-based line number) for anything
//! else that appears where a record is expected. Header and decoration lines
//! are skipped.

use sectortrace_common::{
    DeviceAttributes, Error, PartitionEntry, PartitionType, PvSegmentReport, RaidMember,
    RawSegment, Result, SegmentOwner,
};

/// Parse `blkid -o export <dev>`
///
/// ```text
/// DEVNAME=/dev/sda2
/// TYPE=LVM2_member
/// ```
pub fn parse_blkid_export(text: &str) -> Result<DeviceAttributes> {
    let mut attrs = DeviceAttributes::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::parse("blkid", idx + 1, format!("expected KEY=VALUE, got {line:?}")))?;
        attrs.insert(key.trim(), value.trim());
    }
    Ok(attrs)
}

/// Parse `sfdisk -d <disk>`
///
/// ```text
/// label: dos
/// device: /dev/sda
///
/// /dev/sda1 : start=        2048, size=      204800, type=83, bootable
/// /dev/sda2 : start=      206848, size=    41736192, Id=8e
/// /dev/sda3 : start=    41943040, size=     2097152, type=0FC63DAF-8483-4772-8E79-3D69D8477DE4, name="data, old"
/// ```
///
/// Both the legacy `Id=` and current `type=` keys are accepted.
pub fn parse_sfdisk_dump(text: &str) -> Result<Vec<PartitionEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if !line.starts_with('/') {
            continue;
        }
        let (device, desc) = line
            .split_once(':')
            .ok_or_else(|| Error::parse("sfdisk", line_no, "partition line without ':'"))?;

        let mut start = None;
        let mut size = None;
        let mut kind = None;
        for field in split_unquoted(desc, ',') {
            let Some((key, value)) = field.split_once('=') else {
                // Bare flags such as `bootable`
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "start" => start = Some(parse_u64("sfdisk", line_no, value)?),
                "size" => size = Some(parse_u64("sfdisk", line_no, value)?),
                "Id" | "type" => kind = Some(parse_partition_type(line_no, value)?),
                _ => {}
            }
        }

        let missing = |what: &str| Error::parse("sfdisk", line_no, format!("{device}: missing {what}"));
        entries.push(PartitionEntry {
            device: device.trim().to_string(),
            start: start.ok_or_else(|| missing("start"))?,
            size: size.ok_or_else(|| missing("size"))?,
            kind: kind.ok_or_else(|| missing("type"))?,
        });
    }
    Ok(entries)
}

fn parse_partition_type(line_no: usize, value: &str) -> Result<PartitionType> {
    if value.contains('-') {
        return Ok(PartitionType::Guid(value.to_ascii_uppercase()));
    }
    let hex = value.trim_start_matches("0x");
    u8::from_str_radix(hex, 16)
        .map(PartitionType::Code)
        .map_err(|_| Error::parse("sfdisk", line_no, format!("bad partition type {value:?}")))
}

/// Parse `pvdisplay --units k -m <pv>`
///
/// ```text
///   VG Name               vg0
///   PE Size               4096.00 KiB
///   Total PE              20
///   --- Physical Segments ---
///   Physical extent 0 to 9:
///     Logical volume	/dev/vg0/root
///     Logical extents	0 to 9
///   Physical extent 10 to 19:
///     FREE
/// ```
///
/// Older releases print `PE Size (KByte)    4096`. Returns `None` when the
/// output lists no segments.
pub fn parse_pvdisplay_map(text: &str) -> Result<Option<PvSegmentReport>> {
    let mut vg_name = None;
    let mut pe_size = None;
    let mut total_pe = None;
    let mut segments: Vec<RawSegment> = Vec::new();
    // Segment opened by `Physical extent` and not yet given an owner
    let mut open: Option<(u64, u64, usize)> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["VG", "Name", name, ..] => vg_name = Some((*name).to_string()),
            ["PE", "Size", "(KByte)", kib, ..] => {
                pe_size = Some(parse_u64("pvdisplay", line_no, kib)? * 2);
            }
            ["PE", "Size", amount, unit, ..] => {
                pe_size = Some(size_to_sectors("pvdisplay", line_no, amount, unit)?);
            }
            ["Total", "PE", total, ..] => total_pe = Some(parse_u64("pvdisplay", line_no, total)?),
            ["Physical", "extent", first, "to", last] if last.ends_with(':') => {
                if let Some((_, _, at)) = open {
                    return Err(Error::parse("pvdisplay", at, "segment without owner"));
                }
                let first = parse_u64("pvdisplay", line_no, first)?;
                let last = parse_u64("pvdisplay", line_no, last.trim_end_matches(':'))?;
                open = Some((first, last, line_no));
            }
            ["FREE"] => {
                let (pe_first, pe_last, _) = open
                    .take()
                    .ok_or_else(|| Error::parse("pvdisplay", line_no, "FREE outside a segment"))?;
                segments.push(RawSegment {
                    pe_first,
                    pe_last,
                    owner: SegmentOwner::Free,
                    le: None,
                });
            }
            ["Logical", "volume", path] => {
                let (pe_first, pe_last, _) = open
                    .take()
                    .ok_or_else(|| Error::parse("pvdisplay", line_no, "volume outside a segment"))?;
                segments.push(RawSegment {
                    pe_first,
                    pe_last,
                    owner: SegmentOwner::Volume((*path).to_string()),
                    le: None,
                });
            }
            ["Logical", "extents", first, "to", last] => {
                let seg = segments
                    .last_mut()
                    .filter(|s| !matches!(s.owner, SegmentOwner::Free) && s.le.is_none())
                    .ok_or_else(|| Error::parse("pvdisplay", line_no, "extents without a volume"))?;
                seg.le = Some((
                    parse_u64("pvdisplay", line_no, first)?,
                    parse_u64("pvdisplay", line_no, last)?,
                ));
            }
            _ => {}
        }
    }

    if let Some((_, _, at)) = open {
        return Err(Error::parse("pvdisplay", at, "segment without owner"));
    }
    if segments.is_empty() {
        return Ok(None);
    }
    if let Some(seg) = segments.iter().find(|s| !matches!(s.owner, SegmentOwner::Free) && s.le.is_none()) {
        return Err(Error::parse(
            "pvdisplay",
            0,
            format!("segment {}-{} has no logical extents", seg.pe_first, seg.pe_last),
        ));
    }

    Ok(Some(PvSegmentReport {
        vg_name: vg_name.ok_or_else(|| Error::parse("pvdisplay", 0, "missing VG Name"))?,
        pe_size: pe_size.ok_or_else(|| Error::parse("pvdisplay", 0, "missing PE Size"))?,
        total_pe,
        segments,
    }))
}

/// Parse `pvs --units k -o+pe_start <pv>` and return the PE start in sectors
///
/// ```text
///   PV         VG   Fmt  Attr PSize     PFree     1st PE
///   /dev/sda2  vg0  lvm2 a--  81916.00k 40956.00k 192.00k
/// ```
///
/// The PE start is the last column of the row whose first column is `pv`.
pub fn parse_pvs_pe_start(text: &str, pv: &str) -> Result<Option<u64>> {
    for (idx, line) in text.lines().enumerate() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.first() != Some(&pv) {
            continue;
        }
        let last = words
            .last()
            .filter(|_| words.len() > 1)
            .ok_or_else(|| Error::parse("pvs", idx + 1, "row without columns"))?;
        let split = last
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| Error::parse("pvs", idx + 1, format!("PE start {last:?} has no unit")))?;
        let (amount, unit) = last.split_at(split);
        return size_to_sectors("pvs", idx + 1, amount, unit).map(Some);
    }
    Ok(None)
}

/// Parse `/proc/mdstat`
///
/// ```text
/// Personalities : [raid1] [raid6] [raid5] [raid4]
/// md0 : active raid1 sdb1[1] sda1[0]
///       1048512 blocks [2/2] [UU]
/// md1 : active (auto-read-only) raid5 sdc1[0] sdd1[1] sde1[3](F)
/// md127 : inactive sdf1[0](S)
/// ```
pub fn parse_mdstat(text: &str) -> Result<Vec<RaidMember>> {
    let mut arrays = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if !line.starts_with("md") {
            continue;
        }
        let (array, desc) = line
            .split_once(':')
            .ok_or_else(|| Error::parse("mdstat", idx + 1, "array line without ':'"))?;
        let mut words = desc.split_whitespace().peekable();
        let mut status = words
            .next()
            .ok_or_else(|| Error::parse("mdstat", idx + 1, "missing array state"))?
            .to_string();
        while let Some(qualifier) = words.next_if(|w| w.starts_with('(')) {
            status.push(' ');
            status.push_str(qualifier);
        }
        let level = match words.peek() {
            Some(w) if !w.contains('[') => words.next().unwrap_or_default().to_string(),
            _ => String::new(),
        };
        let devices = words
            .map(|w| w.split('[').next().unwrap_or(w).to_string())
            .collect();
        arrays.push(RaidMember {
            array: array.trim().to_string(),
            status,
            level,
            devices,
        });
    }
    Ok(arrays)
}

/// Parse `debugfs -R 'icheck <block>'`
///
/// ```text
/// Block	Inode number
/// 80	12
/// 81	<block not found>
/// ```
///
/// `Some(0)` marks an unused block; `None` means no row for `block` at all.
pub fn parse_icheck(text: &str, block: u64) -> Result<Option<u64>> {
    for (idx, line) in text.lines().enumerate() {
        let Some((first, rest)) = split_numeric_row(line) else {
            continue;
        };
        if parse_u64("debugfs icheck", idx + 1, first)? != block {
            continue;
        }
        if rest.starts_with('<') {
            return Ok(Some(0));
        }
        return parse_u64("debugfs icheck", idx + 1, rest).map(Some);
    }
    Ok(None)
}

/// Parse `debugfs -R 'ncheck <inode>'`
///
/// ```text
/// Inode	Pathname
/// 12	/etc/passwd
/// ```
///
/// Returns the first path linked to `inode`.
pub fn parse_ncheck(text: &str, inode: u64) -> Result<Option<String>> {
    for (idx, line) in text.lines().enumerate() {
        let Some((first, rest)) = split_numeric_row(line) else {
            continue;
        };
        if parse_u64("debugfs ncheck", idx + 1, first)? == inode {
            return Ok(Some(rest.to_string()));
        }
    }
    Ok(None)
}

/// Split `<digits> <rest>` rows; header and banner lines yield `None`
fn split_numeric_row(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (first, rest) = line.split_once(char::is_whitespace)?;
    if !first.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((first, rest.trim()))
}

fn parse_u64(tool: &'static str, line: usize, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::parse(tool, line, format!("expected integer, got {value:?}")))
}

/// Convert an LVM size with unit to 512-byte sectors
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn size_to_sectors(tool: &'static str, line: usize, amount: &str, unit: &str) -> Result<u64> {
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| Error::parse(tool, line, format!("expected size, got {amount:?}")))?;
    let per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "s" => 1.0,
        "k" | "kib" => 2.0,
        "m" | "mib" => 2048.0,
        "g" | "gib" => 2048.0 * 1024.0,
        other => return Err(Error::parse(tool, line, format!("unknown unit {other:?}"))),
    };
    Ok((amount.trunc() * per_unit) as u64)
}

/// Split on `sep` outside double quotes
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut begin = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(&s[begin..i]);
            begin = i + c.len_utf8();
        }
    }
    parts.push(&s[begin..]);
    parts
}
