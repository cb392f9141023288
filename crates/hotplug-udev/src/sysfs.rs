/*!
 * Sysfs and udev database access.
 *
 * Loads [`DeviceRecord`]s from a sysfs tree: the `uevent` file provides the
 * kernel properties, the `subsystem` and `driver` symlinks name the
 * subsystem and driver, and the udev database entry of the device adds the
 * properties and device links udevd computed.
 */
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use hotplug_core::config::UdevConfig;
use hotplug_core::types::PropertyMap;

use crate::record::DeviceRecord;

/// Subpaths whose presence shows that a processor slot is populated
pub const PROCESSOR_EVIDENCE: [&str; 3] = ["sysdev", "cpufreq", "topology/core_id"];

#[derive(Debug)]
struct SysfsPaths {
    root: PathBuf,
    udev_db: PathBuf,
}

/// Handle on a sysfs tree and the udev database that describes it
#[derive(Debug, Clone)]
pub struct Sysfs(Arc<SysfsPaths>);

impl Sysfs {
    /// Create a handle; the root is canonicalized when possible
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(root: P, udev_db: Q) -> Self {
        let root = fs::canonicalize(root.as_ref()).unwrap_or_else(|_| root.as_ref().to_path_buf());
        Self(Arc::new(SysfsPaths {
            root,
            udev_db: udev_db.as_ref().to_path_buf(),
        }))
    }

    /// Create a handle from the `[udev]` configuration section
    pub fn from_config(config: &UdevConfig) -> Self {
        Self::new(&config.sysfs_root, &config.udev_db)
    }

    /// Root of the sysfs tree
    pub fn root(&self) -> &Path {
        &self.0.root
    }

    /// udev database directory
    pub fn udev_db(&self) -> &Path {
        &self.0.udev_db
    }

    /// Absolute sysfs path of a kernel `DEVPATH`
    pub fn syspath_of(&self, devpath: &str) -> PathBuf {
        self.0.root.join(devpath.trim_start_matches('/'))
    }

    /// Load the device at `syspath`
    ///
    /// Returns `None` when the directory is not a device or cannot be read.
    pub fn device(&self, syspath: &Path) -> Option<DeviceRecord> {
        let uevent = match fs::read_to_string(syspath.join("uevent")) {
            Ok(text) => text,
            Err(e) => {
                trace!(path = %syspath.display(), error = %e, "skipping unreadable device");
                return None;
            }
        };

        let mut properties = parse_key_values(&uevent);
        let subsystem = link_name(&syspath.join("subsystem"))
            .or_else(|| properties.get("SUBSYSTEM").cloned())
            .unwrap_or_default();
        let driver = link_name(&syspath.join("driver"))
            .or_else(|| properties.get("DRIVER").cloned())
            .unwrap_or_default();

        properties.insert("SUBSYSTEM".to_string(), subsystem.clone());
        if !driver.is_empty() {
            properties.insert("DRIVER".to_string(), driver.clone());
        }
        if let Ok(devpath) = syspath.strip_prefix(&self.0.root) {
            properties.insert("DEVPATH".to_string(), format!("/{}", devpath.display()));
        }

        Some(self.finish(syspath, subsystem, driver, properties, true))
    }

    /// Build a record from the properties of a received uevent
    ///
    /// `merge_db` adds the udev database entry, for messages that did not
    /// pass through udevd.
    pub fn device_from_uevent(&self, properties: PropertyMap, merge_db: bool) -> Option<DeviceRecord> {
        let devpath = properties.get("DEVPATH")?.clone();
        let syspath = self.syspath_of(&devpath);
        let subsystem = properties.get("SUBSYSTEM").cloned().unwrap_or_default();
        let driver = properties.get("DRIVER").cloned().unwrap_or_default();
        Some(self.finish(&syspath, subsystem, driver, properties, merge_db))
    }

    fn finish(
        &self,
        syspath: &Path,
        subsystem: String,
        driver: String,
        mut properties: PropertyMap,
        merge_db: bool,
    ) -> DeviceRecord {
        if let Some(devname) = properties.get_mut("DEVNAME") {
            if !devname.starts_with('/') {
                *devname = format!("/dev/{}", devname);
            }
        }

        let mut devlinks: Vec<String> = properties
            .get("DEVLINKS")
            .map(|links| links.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        if merge_db {
            let sysname = syspath
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = database_id(&properties, &subsystem, &sysname);
            self.merge_database(&id, &mut properties, &mut devlinks);
        }

        let mut builder = DeviceRecord::builder(syspath.to_string_lossy().into_owned())
            .subsystem(subsystem)
            .driver(driver.as_str())
            .sysfs(self.clone());
        if driver == "processor" {
            for evidence in PROCESSOR_EVIDENCE {
                if syspath.join(evidence).exists() {
                    builder = builder.subpath(evidence);
                }
            }
        }
        for link in devlinks {
            builder = builder.devlink(link);
        }
        builder.properties(properties).build()
    }

    fn merge_database(&self, id: &str, properties: &mut PropertyMap, devlinks: &mut Vec<String>) {
        let path = self.0.udev_db.join(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return,
        };
        for line in text.lines() {
            if let Some(entry) = line.strip_prefix("E:") {
                if let Some((key, value)) = entry.split_once('=') {
                    properties.insert(key.to_string(), value.to_string());
                }
            } else if let Some(link) = line.strip_prefix("S:") {
                let link = format!("/dev/{}", link);
                if !devlinks.contains(&link) {
                    devlinks.push(link);
                }
            }
        }
        if !devlinks.is_empty() {
            properties.insert("DEVLINKS".to_string(), devlinks.join(" "));
        }
    }

    /// Read a sysfs attribute file, trimmed of trailing whitespace
    pub fn read_attribute(&self, syspath: &Path, name: &str) -> Option<String> {
        let bytes = fs::read(syspath.join(name)).ok()?;
        Some(String::from_utf8_lossy(&bytes).trim_end().to_string())
    }

    /// Nearest ancestor of `record` that is itself a device
    pub fn parent_of(&self, record: &DeviceRecord) -> Option<DeviceRecord> {
        let root = self.root();
        let mut current = Path::new(record.syspath()).parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            if dir.join("uevent").is_file() {
                return self.device(dir);
            }
            current = dir.parent();
        }
        None
    }
}

/// File name of the udev database entry describing a device
fn database_id(properties: &PropertyMap, subsystem: &str, sysname: &str) -> String {
    let major = properties.get("MAJOR").filter(|m| !m.is_empty() && *m != "0");
    if let (Some(major), Some(minor)) = (major, properties.get("MINOR")) {
        let kind = if subsystem == "block" { 'b' } else { 'c' };
        return format!("{}{}:{}", kind, major, minor);
    }
    if let Some(ifindex) = properties.get("IFINDEX").filter(|_| subsystem == "net") {
        return format!("n{}", ifindex);
    }
    format!("+{}:{}", subsystem, sysname)
}

/// Parse `KEY=VALUE` lines
pub(crate) fn parse_key_values(text: &str) -> PropertyMap {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn link_name(path: &Path) -> Option<String> {
    let target = fs::read_link(path).ok()?;
    Some(target.file_name()?.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeSysfs;

    #[test]
    fn test_load_device_from_uevent_file() {
        let fake = FakeSysfs::new();
        let syspath = fake.add_device(
            "devices/pci0000:00/0000:00:1f.2/ata1/host0/target0:0:0/0:0:0:0/block/sda/sda1",
            "block",
            None,
            &[("MAJOR", "8"), ("MINOR", "1"), ("DEVNAME", "sda1"), ("DEVTYPE", "partition")],
        );
        fake.write_udev_db("b8:1", &["E:ID_FS_TYPE=ext4", "E:ID_FS_UUID=1234-abcd", "S:disk/by-uuid/1234-abcd", "G:ignored"]);

        let record = fake.sysfs().device(&syspath).expect("device loads");
        assert_eq!(record.subsystem(), "block");
        assert_eq!(record.devname(), "/dev/sda1");
        assert_eq!(record.devtype(), "partition");
        assert_eq!(record.property("ID_FS_TYPE"), "ext4");
        assert_eq!(record.devlinks(), &["/dev/disk/by-uuid/1234-abcd".to_string()]);
        assert_eq!(record.property("SUBSYSTEM"), "block");
        assert!(record.property("DEVPATH").starts_with("/devices/pci0000:00"));
    }

    #[test]
    fn test_unreadable_device_is_skipped() {
        let fake = FakeSysfs::new();
        assert!(fake.sysfs().device(&fake.root().join("devices/nothing")).is_none());
    }

    #[test]
    fn test_driver_link_and_processor_evidence() {
        let fake = FakeSysfs::new();
        let cpu = fake.add_device("devices/system/cpu/cpu0", "cpu", Some("processor"), &[]);
        fake.touch(&cpu, "cpufreq/cpuinfo_max_freq", "2400000");
        let empty_slot = fake.add_device("devices/LNXSYSTM:00/ACPI0007:03", "acpi", Some("processor"), &[]);

        let record = fake.sysfs().device(&cpu).expect("cpu loads");
        assert_eq!(record.driver(), "processor");
        assert!(record.has_subpath("cpufreq"));
        assert!(!record.has_subpath("sysdev"));

        let slot = fake.sysfs().device(&empty_slot).expect("slot loads");
        assert!(PROCESSOR_EVIDENCE.iter().all(|p| !slot.has_subpath(p)));
    }

    #[test]
    fn test_parent_walks_up_to_nearest_device() {
        let fake = FakeSysfs::new();
        let disk = fake.add_device("devices/platform/host/block/sdb", "block", None, &[("DEVTYPE", "disk")]);
        let part = fake.add_device("devices/platform/host/block/sdb/sdb1", "block", None, &[("DEVTYPE", "partition")]);

        let record = fake.sysfs().device(&part).expect("partition loads");
        let parent = record.parent().expect("has parent");
        assert_eq!(Path::new(parent.syspath()), disk);
        assert!(parent.parent().is_none());
    }

    #[test]
    fn test_record_from_uevent_properties() {
        let fake = FakeSysfs::new();
        fake.write_udev_db("n2", &["E:ID_NET_NAME_PATH=enp0s25"]);
        let props: PropertyMap = [
            ("ACTION", "add"),
            ("DEVPATH", "/devices/pci0000:00/0000:00:19.0/net/eth0"),
            ("SUBSYSTEM", "net"),
            ("INTERFACE", "eth0"),
            ("IFINDEX", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let merged = fake.sysfs().device_from_uevent(props.clone(), true).expect("record");
        assert_eq!(merged.property("ID_NET_NAME_PATH"), "enp0s25");
        assert!(merged.syspath().ends_with("/devices/pci0000:00/0000:00:19.0/net/eth0"));

        let plain = fake.sysfs().device_from_uevent(props, false).expect("record");
        assert_eq!(plain.property("ID_NET_NAME_PATH"), "");
    }

    #[test]
    fn test_database_id_forms() {
        let mut props = PropertyMap::new();
        assert_eq!(database_id(&props, "power_supply", "BAT0"), "+power_supply:BAT0");
        props.insert("MAJOR".into(), "4".into());
        props.insert("MINOR".into(), "64".into());
        assert_eq!(database_id(&props, "tty", "ttyS0"), "c4:64");
        assert_eq!(database_id(&props, "block", "x"), "b4:64");
    }

    #[test]
    fn test_read_attribute_trims() {
        let fake = FakeSysfs::new();
        let bat = fake.add_device("devices/LNXSYSTM:00/PNP0C0A:00/power_supply/BAT0", "power_supply", None, &[]);
        fake.touch(&bat, "manufacturer", "ACME\n");
        assert_eq!(fake.sysfs().read_attribute(&bat, "manufacturer").as_deref(), Some("ACME"));
        assert!(fake.sysfs().read_attribute(&bat, "absent").is_none());
    }
}
