/*!
 * Storage drives, volumes and block nodes.
 */
use std::fs;

use serde::Serialize;

use hotplug_core::types::Udi;

use super::ViewBase;

/// Bytes per `ID_PART_ENTRY_SIZE` unit, computed as `size / 2 * 1024`
fn partition_bytes(sectors: i64) -> u64 {
    u64::try_from(sectors).unwrap_or(0) / 2 * 1024
}

/// Bus a drive is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum StorageBus {
    Ide,
    Usb,
    Ieee1394,
    Scsi,
    Sata,
    Platform,
}

/// Kind of drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum DriveType {
    HardDisk,
    CdromDrive,
    Floppy,
    Tape,
    CompactFlash,
    MemoryStick,
    SmartMedia,
    SdMmc,
    Xd,
}

/// What a volume holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum UsageType {
    Other,
    Unused,
    FileSystem,
    PartitionTable,
    Raid,
    Encrypted,
}

/// Physical drive properties
#[derive(Debug, Clone)]
pub struct StorageDrive {
    base: ViewBase,
}

view_common!(StorageDrive);

impl StorageDrive {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        partition_bytes(self.base.record.property_int("ID_PART_ENTRY_SIZE"))
    }

    /// Attachment bus, from `ID_BUS` and `ID_ATA_SATA`
    pub fn bus(&self) -> StorageBus {
        let record = &self.base.record;
        match record.property("ID_BUS") {
            "ata" if record.property_int("ID_ATA_SATA") == 1 => StorageBus::Sata,
            "ata" => StorageBus::Ide,
            "usb" => StorageBus::Usb,
            "ieee1394" => StorageBus::Ieee1394,
            "scsi" => StorageBus::Scsi,
            _ => StorageBus::Platform,
        }
    }

    /// USB and FireWire drives can be hot plugged
    pub fn is_hotpluggable(&self) -> bool {
        matches!(self.bus(), StorageBus::Usb | StorageBus::Ieee1394)
    }

    /// USB drives are removable
    pub fn is_removable(&self) -> bool {
        self.bus() == StorageBus::Usb
    }

    /// Drive type
    ///
    /// Any USB drive that is neither an optical drive nor a floppy is
    /// reported as `CompactFlash`.
    pub fn drive_type(&self) -> DriveType {
        let record = &self.base.record;
        if record.property("ID_TYPE") == "cd"
            || record.property_int("ID_CDROM_MEDIA_CD") == 1
            || record.property_int("ID_CDROM") == 1
        {
            DriveType::CdromDrive
        } else if record.property_int("ID_DRIVE_FLOPPY") == 1 {
            DriveType::Floppy
        } else if record.property("ID_BUS") == "usb" {
            DriveType::CompactFlash
        } else {
            DriveType::HardDisk
        }
    }
}

/// Partition or filesystem container
#[derive(Debug, Clone)]
pub struct StorageVolume {
    base: ViewBase,
}

view_common!(StorageVolume);

impl StorageVolume {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        partition_bytes(self.base.record.property_int("ID_PART_ENTRY_SIZE"))
    }

    /// Filesystem UUID
    pub fn uuid(&self) -> &str {
        self.base.record.property("ID_FS_UUID")
    }

    /// Filesystem label
    pub fn label(&self) -> &str {
        self.base.record.property("ID_FS_LABEL")
    }

    /// Filesystem type, e.g. "ext4"
    pub fn fs_type(&self) -> &str {
        self.base.record.property("ID_FS_TYPE")
    }

    /// Usage from `ID_FS_USAGE`, falling back to `DEVTYPE`
    pub fn usage(&self) -> UsageType {
        let record = &self.base.record;
        match record.property("ID_FS_USAGE") {
            "crypto" => UsageType::Encrypted,
            "other" => UsageType::Other,
            "raid" => UsageType::Raid,
            "filesystem" => UsageType::FileSystem,
            _ if record.devtype() == "partition" => UsageType::PartitionTable,
            _ => UsageType::Unused,
        }
    }

    /// Whether the volume should be hidden
    ///
    /// True unless the usage is a filesystem or encrypted container; whole
    /// disks are hidden too, except optical media.
    pub fn is_ignored(&self) -> bool {
        let record = &self.base.record;
        let usage = record.property("ID_FS_USAGE");
        (usage != "filesystem" && usage != "crypto")
            || (record.devtype() == "disk" && record.property_int("ID_CDROM") != 1)
    }

    /// Identifier of the block device a device-mapper volume decrypts
    pub fn encrypted_container_udi(&self) -> Option<Udi> {
        let record = &self.base.record;
        if record.property("DM_NAME").is_empty() {
            return None;
        }
        let mut slaves: Vec<_> = fs::read_dir(record.sysfs_path("slaves"))
            .ok()?
            .filter_map(|entry| entry.ok())
            .collect();
        slaves.sort_by_key(|entry| entry.file_name());
        let slave = fs::canonicalize(slaves.first()?.path()).ok()?;
        Some(Udi::from_syspath(self.base.context.udi_prefix(), &slave.to_string_lossy()))
    }
}

/// Block device node numbers
#[derive(Debug, Clone)]
pub struct Block {
    base: ViewBase,
}

view_common!(Block);

impl Block {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Major device number
    pub fn major(&self) -> u32 {
        u32::try_from(self.base.record.property_int("MAJOR")).unwrap_or(0)
    }

    /// Minor device number
    pub fn minor(&self) -> u32 {
        u32::try_from(self.base.record.property_int("MINOR")).unwrap_or(0)
    }

    /// Device node path
    pub fn device(&self) -> &str {
        self.base.record.devname()
    }
}
