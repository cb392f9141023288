/*!
 * CPU description text.
 *
 * [`CpuInfo`] owns the process-wide view of `/proc/cpuinfo`: the text is
 * read on first use and kept, and the `flags` line is extracted once and
 * shared by every processor view.
 */
use std::fs;
use std::path::PathBuf;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tracing::warn;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("constant cpuinfo pattern")
}

/// `vendor_id` line of a CPU block
pub static VENDOR_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"vendor_id\s+:\s+(\S.+)"));
/// `model name` line of a CPU block
pub static MODEL_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"model name\s+:\s+(\S.+)"));
static FLAGS_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"flags\s+:\s+(\S.+)"));
static PROCESSOR_PATTERN: Lazy<Regex> = Lazy::new(|| pattern(r"^processor\s*:\s*(\d+)"));

/// Lazily loaded CPU description
#[derive(Debug)]
pub struct CpuInfo {
    path: PathBuf,
    text: OnceCell<String>,
    flags: OnceCell<Vec<String>>,
}

impl CpuInfo {
    /// Describe the CPUs listed in `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            text: OnceCell::new(),
            flags: OnceCell::new(),
        }
    }

    /// The running system's `/proc/cpuinfo`
    pub fn system() -> Self {
        Self::new("/proc/cpuinfo")
    }

    fn text(&self) -> &str {
        self.text.get_or_init(|| {
            fs::read_to_string(&self.path).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "cannot read CPU information");
                String::new()
            })
        })
    }

    /// First capture group of `pattern` within the block of CPU `cpu`
    ///
    /// Returns an empty string when the CPU or the line is not found. Text
    /// without `processor` separators is treated as one block.
    pub fn extract_line(&self, cpu: u32, pattern: &Regex) -> String {
        let mut current: Option<u32> = None;
        for line in self.text().lines() {
            if let Some(caps) = PROCESSOR_PATTERN.captures(line) {
                current = caps[1].parse().ok();
                continue;
            }
            if current.is_some() && current != Some(cpu) {
                continue;
            }
            if let Some(value) = pattern.captures(line).and_then(|caps| caps.get(1)) {
                return value.as_str().trim().to_string();
            }
        }
        String::new()
    }

    /// Feature flags of the first CPU asked about, cached for the process
    pub fn flags(&self, cpu: u32) -> &[String] {
        self.flags.get_or_init(|| {
            self.extract_line(cpu, &FLAGS_PATTERN)
                .split_whitespace()
                .map(str::to_string)
                .collect()
        })
    }
}
