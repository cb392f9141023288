/*!
 * Live mount table.
 *
 * Reads `/proc/self/mountinfo` (or a `/proc/mounts` style file) on every
 * query, so accessibility always reflects the current state.
 */
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// One mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount source as listed, e.g. "/dev/sdb1"
    pub source: String,
    /// Where the filesystem is mounted
    pub mount_point: PathBuf,
    /// Filesystem type
    pub fs_type: String,
}

impl MountEntry {
    /// Whether this mount comes from `device`, directly or through a symlink
    pub fn is_from(&self, device: &str) -> bool {
        if device.is_empty() {
            return false;
        }
        if self.source == device {
            return true;
        }
        self.source.starts_with('/')
            && fs::canonicalize(&self.source)
                .map(|real| real == Path::new(device))
                .unwrap_or(false)
    }
}

/// Mount table reader
#[derive(Debug, Clone)]
pub struct MountTable {
    path: PathBuf,
}

impl MountTable {
    /// Read mounts from `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The mount table of the current process
    pub fn system() -> Self {
        Self::new("/proc/self/mountinfo")
    }

    /// Current entries; empty when the table cannot be read
    pub fn entries(&self) -> Vec<MountEntry> {
        match fs::read_to_string(&self.path) {
            Ok(text) => parse_mount_table(&text),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read mount table");
                Vec::new()
            }
        }
    }

    /// Mount point of the first device path in `candidates` that is mounted
    ///
    /// Candidates are tried in order; each is checked against every entry.
    pub fn find_mount_point<'a, I>(&self, candidates: I) -> Option<PathBuf>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = self.entries();
        candidates.into_iter().find_map(|device| {
            entries
                .iter()
                .find(|entry| entry.is_from(device))
                .map(|entry| entry.mount_point.clone())
        })
    }
}

/// Parse a mount table in either `mountinfo` or `/proc/mounts` format
///
/// Malformed lines are skipped.
pub fn parse_mount_table(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let entry = match line.split_once(" - ") {
                Some((left, right)) => parse_mountinfo_line(left, right),
                None => parse_mounts_line(line),
            };
            if entry.is_none() {
                debug!(line, "skipping malformed mount table line");
            }
            entry
        })
        .collect()
}

fn parse_mountinfo_line(left: &str, right: &str) -> Option<MountEntry> {
    let mount_point = left.split_whitespace().nth(4)?;
    let mut right = right.split_whitespace();
    let fs_type = right.next()?;
    let source = right.next()?;
    Some(MountEntry {
        source: unescape_octal(source),
        mount_point: PathBuf::from(unescape_octal(mount_point)),
        fs_type: fs_type.to_string(),
    })
}

fn parse_mounts_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let source = fields.next()?;
    let mount_point = fields.next()?;
    let fs_type = fields.next()?;
    Some(MountEntry {
        source: unescape_octal(source),
        mount_point: PathBuf::from(unescape_octal(mount_point)),
        fs_type: fs_type.to_string(),
    })
}

/// Decode the `\040`-style escapes the kernel uses for blanks in paths
fn unescape_octal(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 4 <= bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let decoded = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(decoded) {
                    output.push(byte);
                    index += 4;
                    continue;
                }
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MOUNTINFO: &str = "\
22 1 8:2 / / rw,relatime shared:1 - ext4 /dev/sda2 rw
36 22 8:17 / /media/USB\\040STICK rw,nosuid shared:20 - vfat /dev/sdb1 rw,uid=1000
40 22 0:5 / /dev rw,nosuid shared:2 - devtmpfs udev rw
";

    #[test]
    fn test_parse_mountinfo() {
        let entries = parse_mount_table(MOUNTINFO);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].source, "/dev/sdb1");
        assert_eq!(entries[1].mount_point, PathBuf::from("/media/USB STICK"));
        assert_eq!(entries[1].fs_type, "vfat");
        assert_eq!(entries[2].source, "udev");
    }

    #[test]
    fn test_parse_proc_mounts_format() {
        let entries = parse_mount_table("/dev/sdb1 /media/x ext4 rw,relatime 0 0\n\nbroken\n");
        assert_eq!(
            entries,
            vec![MountEntry {
                source: "/dev/sdb1".into(),
                mount_point: "/media/x".into(),
                fs_type: "ext4".into(),
            }]
        );
    }

    #[test]
    fn test_unescape_at_end_of_field() {
        assert_eq!(unescape_octal("/mnt/a\\040"), "/mnt/a ");
        assert_eq!(unescape_octal("/mnt/back\\slash"), "/mnt/back\\slash");
        assert_eq!(unescape_octal("\\"), "\\");
    }

    #[test]
    fn test_find_mount_point_in_candidate_order() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "/dev/disk/by-uuid/abc /media/by-link ext4 rw 0 0\n/dev/sdc1 /media/direct ext4 rw 0 0\n")
            .expect("write");
        let table = MountTable::new(file.path());

        assert_eq!(
            table.find_mount_point(["/dev/sdc1", "/dev/disk/by-uuid/abc"]),
            Some(PathBuf::from("/media/direct"))
        );
        assert_eq!(
            table.find_mount_point(["/dev/sdz9", "/dev/disk/by-uuid/abc"]),
            Some(PathBuf::from("/media/by-link"))
        );
        assert_eq!(table.find_mount_point(["", "/dev/sdz9"]), None);
    }

    #[test]
    fn test_missing_table_is_empty() {
        assert!(MountTable::new("/nonexistent/mountinfo").entries().is_empty());
    }
}
