/*!
 * Capability classification.
 *
 * Two predicates live here and are deliberately kept apart:
 *
 * - [`supports`] / [`classify`] answer "which capability views can be built
 *   over this record", and are used once a device is known.
 * - [`is_of_interest`] is the coarser filter deciding whether a device is
 *   surfaced to consumers at all. It drops unformatted block devices, empty
 *   processor slots and internal sound cards, which [`supports`] accepts.
 *
 * Both only look at data already on the record; no sysfs reads happen here.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::DeviceRecord;
use crate::sysfs::PROCESSOR_EVIDENCE;

/// A role a device can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    /// Fallback view over the raw property bag
    GenericInterface,
    /// Mountable storage
    StorageAccess,
    /// Physical storage drive
    StorageDrive,
    /// Partition or filesystem container
    StorageVolume,
    /// Block device node
    Block,
    /// CD/DVD drive
    OpticalDrive,
    /// Disc in an optical drive
    OpticalDisc,
    /// Mains adapter
    AcAdapter,
    /// Battery
    Battery,
    /// CPU
    Processor,
    /// Digital camera (gphoto2)
    Camera,
    /// Portable media player
    PortableMediaPlayer,
    /// DVB adapter device
    DvbInterface,
    /// Video4Linux device
    Video,
    /// Sound card
    AudioInterface,
    /// Network interface
    NetworkInterface,
    /// Serial port
    SerialInterface,
    /// Key or switch input device
    Button,
}

impl CapabilityKind {
    /// Every kind, in declaration order
    pub const ALL: [CapabilityKind; 18] = [
        Self::GenericInterface,
        Self::StorageAccess,
        Self::StorageDrive,
        Self::StorageVolume,
        Self::Block,
        Self::OpticalDrive,
        Self::OpticalDisc,
        Self::AcAdapter,
        Self::Battery,
        Self::Processor,
        Self::Camera,
        Self::PortableMediaPlayer,
        Self::DvbInterface,
        Self::Video,
        Self::AudioInterface,
        Self::NetworkInterface,
        Self::SerialInterface,
        Self::Button,
    ];

    /// Kebab-case name, e.g. "storage-access"
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenericInterface => "generic-interface",
            Self::StorageAccess => "storage-access",
            Self::StorageDrive => "storage-drive",
            Self::StorageVolume => "storage-volume",
            Self::Block => "block",
            Self::OpticalDrive => "optical-drive",
            Self::OpticalDisc => "optical-disc",
            Self::AcAdapter => "ac-adapter",
            Self::Battery => "battery",
            Self::Processor => "processor",
            Self::Camera => "camera",
            Self::PortableMediaPlayer => "portable-media-player",
            Self::DvbInterface => "dvb-interface",
            Self::Video => "video",
            Self::AudioInterface => "audio-interface",
            Self::NetworkInterface => "network-interface",
            Self::SerialInterface => "serial-interface",
            Self::Button => "button",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised capability name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability kind: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for CapabilityKind {
    type Err = UnknownCapability;

    /// Accepts "storage-access", "storage_access" and "StorageAccess"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('-', "") == wanted)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

fn is_cdrom(record: &DeviceRecord) -> bool {
    record.property_int("ID_CDROM") == 1
}

fn is_serial_port(record: &DeviceRecord) -> bool {
    record.subsystem() == "tty"
        && record.sysname().starts_with("tty")
        && !record.syspath().contains("/devices/virtual/tty/")
}

fn is_button(record: &DeviceRecord) -> bool {
    record.subsystem() == "input"
        && record.property_int("ID_INPUT_KEY") == 1
        && (record.has_property("KEY") || record.has_property("SW"))
}

/// Whether a `kind` view can be built over `record`
pub fn supports(record: &DeviceRecord, kind: CapabilityKind) -> bool {
    match kind {
        CapabilityKind::GenericInterface => true,
        CapabilityKind::StorageAccess
        | CapabilityKind::StorageDrive
        | CapabilityKind::StorageVolume
        | CapabilityKind::Block => record.subsystem() == "block",
        CapabilityKind::OpticalDrive | CapabilityKind::OpticalDisc => {
            cfg!(feature = "cdrom") && is_cdrom(record)
        }
        CapabilityKind::AcAdapter | CapabilityKind::Battery => record.subsystem() == "power_supply",
        CapabilityKind::Processor => record.driver() == "processor",
        CapabilityKind::Camera => record.property_int("ID_GPHOTO2") == 1,
        CapabilityKind::PortableMediaPlayer => !record.property("ID_MEDIA_PLAYER").is_empty(),
        CapabilityKind::DvbInterface => record.subsystem() == "dvb",
        CapabilityKind::Video => record.subsystem() == "video4linux",
        CapabilityKind::AudioInterface => record.subsystem() == "sound",
        CapabilityKind::NetworkInterface => record.subsystem() == "net",
        CapabilityKind::SerialInterface => is_serial_port(record),
        CapabilityKind::Button => is_button(record),
    }
}

/// Every capability kind `record` supports, including the generic fallback
pub fn classify(record: &DeviceRecord) -> BTreeSet<CapabilityKind> {
    CapabilityKind::ALL
        .into_iter()
        .filter(|kind| supports(record, *kind))
        .collect()
}

/// Whether `record` should be surfaced to consumers
pub fn is_of_interest(record: &DeviceRecord) -> bool {
    match record.subsystem() {
        // Unformatted disks and partitions are not interesting.
        "block" => return !record.property("ID_FS_TYPE").is_empty(),
        "power_supply" => return true,
        _ => {}
    }

    if record.driver() == "processor" {
        // Empty ACPI processor slots have none of these.
        return PROCESSOR_EVIDENCE.iter().any(|p| record.has_subpath(p));
    }

    if record.subsystem() == "sound" && record.property("SOUND_FORM_FACTOR") != "internal" {
        return true;
    }

    if record.subsystem() == "input" {
        return is_button(record);
    }

    [
        CapabilityKind::Video,
        CapabilityKind::NetworkInterface,
        CapabilityKind::DvbInterface,
        CapabilityKind::SerialInterface,
        CapabilityKind::PortableMediaPlayer,
    ]
    .into_iter()
    .any(|kind| supports(record, kind))
        || is_camera_root(record)
}

/// Camera whose parent is not itself tagged as one
///
/// udev tags both the USB device and its interfaces; only the outermost
/// tagged device is surfaced.
fn is_camera_root(record: &DeviceRecord) -> bool {
    supports(record, CapabilityKind::Camera)
        && record
            .parent()
            .map_or(true, |parent| parent.property_int("ID_GPHOTO2") != 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(subsystem: &str, props: &[(&str, &str)]) -> DeviceRecord {
        DeviceRecord::builder(format!("/sys/devices/test/{}0", subsystem))
            .subsystem(subsystem)
            .properties(props.iter().copied())
            .build()
    }

    #[test]
    fn test_block_interest_requires_filesystem() {
        let raw = rec("block", &[("DEVTYPE", "disk")]);
        let formatted = rec("block", &[("ID_FS_TYPE", "ext4")]);

        assert!(!is_of_interest(&raw));
        assert!(is_of_interest(&formatted));
        for record in [&raw, &formatted] {
            let kinds = classify(record);
            assert!(kinds.contains(&CapabilityKind::StorageAccess));
            assert!(kinds.contains(&CapabilityKind::StorageDrive));
            assert!(kinds.contains(&CapabilityKind::StorageVolume));
        }
    }

    #[test]
    fn test_power_supply_always_interesting() {
        let ac = rec("power_supply", &[("POWER_SUPPLY_ONLINE", "1")]);
        assert!(is_of_interest(&ac));
        assert!(supports(&ac, CapabilityKind::AcAdapter));
        assert!(supports(&ac, CapabilityKind::Battery));
        assert!(!supports(&ac, CapabilityKind::Processor));
    }

    #[test]
    fn test_processor_slot_evidence() {
        let empty_slot = DeviceRecord::builder("/sys/devices/LNXSYSTM:00/ACPI0007:00")
            .subsystem("acpi")
            .driver("processor")
            .build();
        let populated = DeviceRecord::builder("/sys/devices/system/cpu/cpu0")
            .subsystem("cpu")
            .driver("processor")
            .subpath("topology/core_id")
            .build();

        assert!(supports(&empty_slot, CapabilityKind::Processor));
        assert!(!is_of_interest(&empty_slot));
        assert!(is_of_interest(&populated));
    }

    #[test]
    fn test_internal_sound_card_asymmetry() {
        let internal = rec("sound", &[("SOUND_FORM_FACTOR", "internal")]);
        let usb = rec("sound", &[("SOUND_FORM_FACTOR", "headset")]);

        assert!(supports(&internal, CapabilityKind::AudioInterface));
        assert!(!is_of_interest(&internal));
        assert!(is_of_interest(&usb));
    }

    #[test]
    fn test_button_rule() {
        let lid = rec("input", &[("ID_INPUT_KEY", "1"), ("SW", "1")]);
        let keyless = rec("input", &[("ID_INPUT_KEY", "1")]);
        let mouse = rec("input", &[("ID_INPUT_MOUSE", "1"), ("KEY", "1f0000 0 0")]);

        assert!(supports(&lid, CapabilityKind::Button));
        assert!(is_of_interest(&lid));
        assert!(!supports(&keyless, CapabilityKind::Button));
        assert!(!is_of_interest(&keyless));
        assert!(!is_of_interest(&mouse));
    }

    #[test]
    fn test_serial_ports() {
        let uart = DeviceRecord::builder("/sys/devices/pnp0/00:05/tty/ttyS0").subsystem("tty").build();
        let virt = DeviceRecord::builder("/sys/devices/virtual/tty/tty1").subsystem("tty").build();
        let console = DeviceRecord::builder("/sys/devices/virtual/tty/console").subsystem("tty").build();

        assert!(supports(&uart, CapabilityKind::SerialInterface));
        assert!(is_of_interest(&uart));
        assert!(!supports(&virt, CapabilityKind::SerialInterface));
        assert!(!is_of_interest(&console));
    }

    #[test]
    fn test_property_driven_kinds() {
        let camera = rec("usb", &[("ID_GPHOTO2", "1")]);
        let player = rec("usb", &[("ID_MEDIA_PLAYER", "sandisk_sansa-clip")]);
        let hub = rec("usb", &[("ID_MODEL", "hub")]);

        assert!(is_of_interest(&camera));
        assert!(classify(&camera).contains(&CapabilityKind::Camera));
        assert!(is_of_interest(&player));
        assert!(!is_of_interest(&hub));
        assert_eq!(classify(&hub), BTreeSet::from([CapabilityKind::GenericInterface]));
    }

    #[test]
    fn test_camera_interface_below_tagged_parent() {
        let fake = crate::testutil::FakeSysfs::new();
        let sysfs = fake.sysfs();
        let usb = fake.add_device(
            "devices/pci0000:00/0000:00:14.0/usb1/1-2",
            "usb",
            None,
            &[("DEVTYPE", "usb_device"), ("ID_GPHOTO2", "1")],
        );
        let iface = fake.add_device(
            "devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0",
            "usb",
            None,
            &[("DEVTYPE", "usb_interface"), ("ID_GPHOTO2", "1")],
        );

        let parent = sysfs.device(&usb).expect("parent record");
        let child = sysfs.device(&iface).expect("child record");

        assert_eq!(child.parent().as_ref(), Some(&parent));
        assert!(is_of_interest(&parent));
        assert!(supports(&child, CapabilityKind::Camera));
        assert!(!is_of_interest(&child));
    }

    #[test]
    fn test_simple_subsystems() {
        for (subsystem, kind) in [
            ("net", CapabilityKind::NetworkInterface),
            ("video4linux", CapabilityKind::Video),
            ("dvb", CapabilityKind::DvbInterface),
        ] {
            let r = rec(subsystem, &[]);
            assert!(is_of_interest(&r), "{subsystem}");
            assert!(supports(&r, kind));
        }
    }

    #[cfg(feature = "cdrom")]
    #[test]
    fn test_cdrom_flag() {
        let drive = rec("block", &[("ID_CDROM", "1")]);
        assert!(supports(&drive, CapabilityKind::OpticalDrive));
        assert!(supports(&drive, CapabilityKind::OpticalDisc));
        // An empty drive carries no filesystem type.
        assert!(!is_of_interest(&drive));
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in CapabilityKind::ALL {
            assert_eq!(kind.as_str().parse::<CapabilityKind>(), Ok(kind));
        }
        assert_eq!("StorageAccess".parse(), Ok(CapabilityKind::StorageAccess));
        assert_eq!("ac_adapter".parse(), Ok(CapabilityKind::AcAdapter));
        assert!("toaster".parse::<CapabilityKind>().is_err());
    }
}
