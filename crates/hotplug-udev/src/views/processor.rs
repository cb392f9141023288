//! CPU view.

use std::cell::Cell;

use bitflags::bitflags;

use crate::record::parse_int;

use super::ViewBase;

bitflags! {
    /// Instruction set extensions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstructionSets: u32 {
        /// Intel MMX
        const MMX = 0x01;
        /// Intel SSE
        const SSE = 0x02;
        /// Intel SSE2
        const SSE2 = 0x04;
        /// Intel SSE3
        const SSE3 = 0x08;
        /// Intel SSE4
        const SSE4 = 0x10;
        /// AMD 3DNow!
        const AMD_3DNOW = 0x20;
        /// PowerPC AltiVec
        const ALTIVEC = 0x40;
    }
}

/// `/proc/cpuinfo` flags mapped to the extension they indicate
const FLAG_TABLE: [(&str, InstructionSets); 11] = [
    ("mmx", InstructionSets::MMX),
    ("sse", InstructionSets::SSE),
    ("sse2", InstructionSets::SSE2),
    ("pni", InstructionSets::SSE3),
    ("ssse3", InstructionSets::SSE3),
    ("sse4", InstructionSets::SSE4),
    ("sse4_1", InstructionSets::SSE4),
    ("sse4_2", InstructionSets::SSE4),
    ("3dnow", InstructionSets::AMD_3DNOW),
    ("3dnowext", InstructionSets::AMD_3DNOW),
    ("altivec", InstructionSets::ALTIVEC),
];

impl InstructionSets {
    /// Extensions indicated by a list of cpuinfo flags
    pub fn from_cpu_flags<S: AsRef<str>>(flags: &[S]) -> Self {
        flags
            .iter()
            .filter_map(|flag| FLAG_TABLE.iter().find(|(name, _)| *name == flag.as_ref()))
            .fold(Self::empty(), |sets, (_, set)| sets | *set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrequencyCheck {
    NotChecked,
    Can,
    Cannot,
}

/// Processor properties
///
/// Cached values live in this instance only.
#[derive(Debug, Clone)]
pub struct Processor {
    base: ViewBase,
    max_speed: Cell<Option<u64>>,
    frequency_check: Cell<FrequencyCheck>,
}

view_common!(Processor);

impl Processor {
    fn from_base(base: ViewBase) -> Self {
        Self {
            base,
            max_speed: Cell::new(None),
            frequency_check: Cell::new(FrequencyCheck::NotChecked),
        }
    }

    /// Index of the CPU, from the device name suffix
    pub fn number(&self) -> Option<u32> {
        self.base.record.sysnum()
    }

    /// Older kernels nest cpufreq below `sysdev`
    fn cpufreq_file(&self, name: &str) -> String {
        let prefix = if self.base.record.sysfs_path_exists("sysdev") {
            "sysdev/"
        } else {
            ""
        };
        format!("{}cpufreq/{}", prefix, name)
    }

    fn read_khz(&self, name: &str) -> Option<i64> {
        let text = self.base.record.sysfs_attribute(&self.cpufreq_file(name));
        if text.is_empty() {
            return None;
        }
        Some(parse_int(&text))
    }

    /// Maximum clock in MHz, or `None` when cpufreq is not available
    pub fn max_speed(&self) -> Option<u64> {
        if let Some(speed) = self.max_speed.get() {
            return Some(speed);
        }
        let khz = self.read_khz("cpuinfo_max_freq")?;
        let speed = u64::try_from(khz / 1000).unwrap_or(0);
        self.max_speed.set(Some(speed));
        Some(speed)
    }

    /// Whether frequency scaling has a usable range
    pub fn can_change_frequency(&self) -> bool {
        if self.frequency_check.get() == FrequencyCheck::NotChecked {
            let check = match (self.read_khz("cpuinfo_min_freq"), self.read_khz("cpuinfo_max_freq")) {
                (Some(min), Some(max)) if min > 0 && max > min => FrequencyCheck::Can,
                _ => FrequencyCheck::Cannot,
            };
            self.frequency_check.set(check);
        }
        self.frequency_check.get() == FrequencyCheck::Can
    }

    /// Extensions listed in the cpuinfo `flags` line
    pub fn instruction_sets(&self) -> InstructionSets {
        let flags = self.base.context.cpuinfo().flags(self.number().unwrap_or(0));
        InstructionSets::from_cpu_flags(flags)
    }
}
