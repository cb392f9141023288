//! Mountable storage.

use crate::action::ActionResult;

use super::ViewBase;

/// Mount state and mount/unmount requests for a block device
#[derive(Debug, Clone)]
pub struct StorageAccess {
    base: ViewBase,
}

view_common!(StorageAccess);

impl StorageAccess {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Device paths under which the volume may appear in the mount table
    fn sources(&self) -> Vec<String> {
        let record = &self.base.record;
        let mut sources = Vec::with_capacity(record.devlinks().len() + 2);
        let devname = record.devname();
        if !devname.is_empty() {
            sources.push(devname.to_string());
        }
        sources.extend(record.devlinks().iter().cloned());
        if record.property("ID_FS_USAGE") == "crypto" {
            let uuid = record.property("ID_FS_UUID");
            if !uuid.is_empty() {
                sources.push(format!("/dev/mapper/{}", uuid));
            }
        }
        sources
    }

    /// Whether the volume is currently mounted
    pub fn is_accessible(&self) -> bool {
        !self.file_path().is_empty()
    }

    /// Current mount point, or an empty string when not mounted
    pub fn file_path(&self) -> String {
        let sources = self.sources();
        self.base
            .context
            .mounts()
            .find_mount_point(sources.iter().map(String::as_str))
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }

    /// Whether the device should be hidden from mount user interfaces
    pub fn is_ignored(&self) -> bool {
        self.base.record.devtype() != "partition"
    }

    /// Mount point this view would use for a new mount
    pub fn planned_mount_point(&self) -> String {
        self.base
            .context
            .actions()
            .mount_point_for(&self.base.record)
            .display()
            .to_string()
    }

    /// Mount the volume
    ///
    /// Already mounted volumes succeed immediately. Otherwise the privileged
    /// helper runs and `ActionRequested`/`ActionDone` are broadcast around it.
    pub async fn setup(&self) -> ActionResult {
        self.base.context.actions().setup(self).await
    }

    /// Unmount the volume
    ///
    /// Fails immediately, without broadcasting, when the volume is not mounted.
    pub async fn teardown(&self) -> ActionResult {
        self.base.context.actions().teardown(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Harness;

    fn partition(h: &Harness, props: &[(&str, &str)]) -> StorageAccess {
        let path = h.fake.add_device("devices/pci0000:00/usb1/1-1/host6/block/sdb/sdb1", "block", None, props);
        h.storage_access(&path)
    }

    #[test]
    fn test_accessible_via_devname() {
        let h = Harness::new();
        let access = partition(&h, &[("DEVNAME", "/dev/sdb1"), ("ID_FS_TYPE", "ext4"), ("DEVTYPE", "partition")]);
        assert!(!access.is_accessible());
        assert_eq!(access.file_path(), "");

        h.set_mounts(&[("/dev/sdb1", "/media/x")]);
        assert!(access.is_accessible());
        assert_eq!(access.file_path(), "/media/x");
        assert!(!access.is_ignored());
    }

    #[test]
    fn test_accessible_via_devlink() {
        let h = Harness::new();
        let access = partition(
            &h,
            &[
                ("DEVNAME", "/dev/sdb1"),
                ("DEVLINKS", "/dev/disk/by-uuid/77aa /dev/disk/by-label/STICK"),
                ("ID_FS_TYPE", "vfat"),
            ],
        );
        h.set_mounts(&[("/dev/disk/by-label/STICK", "/media/stick")]);
        assert_eq!(access.file_path(), "/media/stick");
    }

    #[test]
    fn test_crypto_volume_mapper_path() {
        let h = Harness::new();
        let access = partition(
            &h,
            &[("DEVNAME", "/dev/sdb1"), ("ID_FS_USAGE", "crypto"), ("ID_FS_UUID", "c0ffee"), ("ID_FS_TYPE", "crypto_LUKS")],
        );
        h.set_mounts(&[("/dev/mapper/c0ffee", "/home/secret")]);
        assert_eq!(access.file_path(), "/home/secret");
    }

    #[test]
    fn test_whole_disk_is_ignored() {
        let h = Harness::new();
        let access = partition(&h, &[("DEVTYPE", "disk"), ("ID_FS_TYPE", "iso9660")]);
        assert!(access.is_ignored());
    }

    #[test]
    fn test_planned_mount_point_uses_uuid() {
        let h = Harness::new();
        let access = partition(&h, &[("DEVNAME", "/dev/sdb1"), ("ID_FS_UUID", "1234-5678")]);
        assert_eq!(access.planned_mount_point(), h.media_dir().join("1234-5678").display().to_string());
    }
}
