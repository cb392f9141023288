/*!
 * Device records.
 *
 * A [`DeviceRecord`] is a snapshot of one kernel device: its sysfs path,
 * subsystem, driver and property bag. Records are cheap to clone and share
 * their data; a change event produces a new record rather than mutating an
 * old one.
 */
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotplug_core::types::{PropertyMap, Udi};

use crate::sysfs::Sysfs;

#[derive(Debug)]
struct RecordData {
    syspath: String,
    subsystem: String,
    driver: String,
    properties: PropertyMap,
    devlinks: Vec<String>,
    subpaths: BTreeSet<String>,
    sysfs: Option<Sysfs>,
}

/// Snapshot of a kernel device
///
/// Two records are equal iff their sysfs paths are equal.
#[derive(Clone)]
pub struct DeviceRecord(Arc<RecordData>);

impl DeviceRecord {
    /// Start building a record for the device at `syspath`
    pub fn builder<S: Into<String>>(syspath: S) -> DeviceRecordBuilder {
        DeviceRecordBuilder::new(syspath)
    }

    /// Absolute sysfs path of the device
    pub fn syspath(&self) -> &str {
        &self.0.syspath
    }

    /// Subsystem tag, e.g. "block" or "power_supply"
    pub fn subsystem(&self) -> &str {
        &self.0.subsystem
    }

    /// Bound driver; empty when unbound
    pub fn driver(&self) -> &str {
        &self.0.driver
    }

    /// Kernel device type (`DEVTYPE`), e.g. "disk" or "partition"
    pub fn devtype(&self) -> &str {
        self.property("DEVTYPE")
    }

    /// Device node, e.g. "/dev/sdb1"
    pub fn devname(&self) -> &str {
        self.property("DEVNAME")
    }

    /// Last component of the sysfs path
    pub fn sysname(&self) -> &str {
        self.0
            .syspath
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Trailing decimal number of the sysname (`cpu3` -> 3)
    pub fn sysnum(&self) -> Option<u32> {
        let name = self.sysname();
        let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        name[name.len() - digits..].parse().ok()
    }

    /// Device property; empty when absent
    pub fn property(&self, key: &str) -> &str {
        self.0.properties.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Device property as an integer; 0 when absent or not a number
    pub fn property_int(&self, key: &str) -> i64 {
        parse_int(self.property(key))
    }

    /// Whether the property key is present at all, even with an empty value
    pub fn has_property(&self, key: &str) -> bool {
        self.0.properties.contains_key(key)
    }

    /// All device properties
    pub fn properties(&self) -> &PropertyMap {
        &self.0.properties
    }

    /// Alternate device node paths (`DEVLINKS`)
    pub fn devlinks(&self) -> &[String] {
        &self.0.devlinks
    }

    /// Whether the loader saw `subpath` under the device directory
    pub fn has_subpath(&self, subpath: &str) -> bool {
        self.0.subpaths.contains(subpath)
    }

    /// Read a sysfs attribute file of the device; empty when unreadable
    pub fn sysfs_attribute(&self, name: &str) -> String {
        self.0
            .sysfs
            .as_ref()
            .and_then(|sysfs| sysfs.read_attribute(Path::new(&self.0.syspath), name))
            .unwrap_or_default()
    }

    /// Device property, falling back to the sysfs attribute of the same name
    pub fn value(&self, name: &str) -> String {
        let property = self.property(name);
        if property.is_empty() {
            self.sysfs_attribute(name)
        } else {
            property.to_string()
        }
    }

    /// [`value`](Self::value) parsed as an integer; 0 when absent
    pub fn value_int(&self, name: &str) -> i64 {
        parse_int(&self.value(name))
    }

    /// Path below the device directory
    pub fn sysfs_path(&self, relative: &str) -> PathBuf {
        Path::new(&self.0.syspath).join(relative.trim_start_matches('/'))
    }

    /// Whether a path below the device directory exists
    pub fn sysfs_path_exists(&self, relative: &str) -> bool {
        self.0.sysfs.is_some() && self.sysfs_path(relative).exists()
    }

    /// The sysfs this record was loaded from, if any
    pub fn sysfs(&self) -> Option<&Sysfs> {
        self.0.sysfs.as_ref()
    }

    /// Nearest ancestor device, looked up by walking up the sysfs tree
    pub fn parent(&self) -> Option<DeviceRecord> {
        self.0.sysfs.as_ref()?.parent_of(self)
    }

    /// Identifier of this device under `prefix`
    pub fn udi(&self, prefix: &str) -> Udi {
        Udi::from_syspath(prefix, &self.0.syspath)
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.0.syspath == other.0.syspath
    }
}

impl Eq for DeviceRecord {}

impl Hash for DeviceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.syspath.hash(state);
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("syspath", &self.0.syspath)
            .field("subsystem", &self.0.subsystem)
            .field("driver", &self.0.driver)
            .field("properties", &self.0.properties.len())
            .finish()
    }
}

/// Qt-style integer parse: surrounding whitespace is ignored, failure is 0
pub(crate) fn parse_int(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

/// Builder for [`DeviceRecord`]
#[derive(Debug, Default)]
pub struct DeviceRecordBuilder {
    syspath: String,
    subsystem: Option<String>,
    driver: Option<String>,
    properties: PropertyMap,
    devlinks: Vec<String>,
    subpaths: BTreeSet<String>,
    sysfs: Option<Sysfs>,
}

impl DeviceRecordBuilder {
    fn new<S: Into<String>>(syspath: S) -> Self {
        Self {
            syspath: syspath.into(),
            ..Self::default()
        }
    }

    /// Set the subsystem; defaults to the `SUBSYSTEM` property
    pub fn subsystem<S: Into<String>>(mut self, subsystem: S) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    /// Set the driver; defaults to the `DRIVER` property
    pub fn driver<S: Into<String>>(mut self, driver: S) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Add one property
    pub fn property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add many properties
    pub fn properties<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add an alternate device node path
    pub fn devlink<S: Into<String>>(mut self, link: S) -> Self {
        self.devlinks.push(link.into());
        self
    }

    /// Record that `subpath` exists below the device directory
    pub fn subpath<S: Into<String>>(mut self, subpath: S) -> Self {
        self.subpaths.insert(subpath.into());
        self
    }

    /// Attach the sysfs the record lives in
    pub fn sysfs(mut self, sysfs: Sysfs) -> Self {
        self.sysfs = Some(sysfs);
        self
    }

    /// Finish the record
    pub fn build(mut self) -> DeviceRecord {
        let subsystem = self
            .subsystem
            .take()
            .unwrap_or_else(|| self.properties.get("SUBSYSTEM").cloned().unwrap_or_default());
        let driver = self
            .driver
            .take()
            .unwrap_or_else(|| self.properties.get("DRIVER").cloned().unwrap_or_default());

        if self.devlinks.is_empty() {
            if let Some(links) = self.properties.get("DEVLINKS") {
                self.devlinks = links.split_whitespace().map(str::to_string).collect();
            }
        } else if !self.properties.contains_key("DEVLINKS") {
            self.properties
                .insert("DEVLINKS".to_string(), self.devlinks.join(" "));
        }

        DeviceRecord(Arc::new(RecordData {
            syspath: self.syspath,
            subsystem,
            driver,
            properties: self.properties,
            devlinks: self.devlinks,
            subpaths: self.subpaths,
            sysfs: self.sysfs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(path: &str) -> DeviceRecord {
        DeviceRecord::builder(path).subsystem("block").build()
    }

    #[test]
    fn test_equality_follows_syspath() {
        let a = record("/sys/devices/a");
        let a_again = DeviceRecord::builder("/sys/devices/a")
            .subsystem("net")
            .property("INTERFACE", "eth0")
            .build();
        let b = record("/sys/devices/b");

        assert_eq!(a, a);
        assert_eq!(a, a_again);
        assert_eq!(a_again, a);
        assert_ne!(a, b);

        let set: HashSet<_> = [a.clone(), a_again, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_missing_property_defaults() {
        let r = record("/sys/devices/x");
        assert_eq!(r.property("ID_FS_TYPE"), "");
        assert_eq!(r.property_int("POWER_SUPPLY_ONLINE"), 0);
        assert!(!r.has_property("ID_FS_TYPE"));
        assert_eq!(r.sysfs_attribute("size"), "");
        assert_eq!(r.value("size"), "");
        assert!(r.parent().is_none());
    }

    #[test]
    fn test_sysname_and_sysnum() {
        let r = record("/sys/devices/system/cpu/cpu12");
        assert_eq!(r.sysname(), "cpu12");
        assert_eq!(r.sysnum(), Some(12));
        assert_eq!(record("/sys/devices/virtual/net/lo").sysnum(), None);
    }

    #[test]
    fn test_builder_defaults_from_properties() {
        let r = DeviceRecord::builder("/sys/devices/pci0/host/sdb/sdb1")
            .property("SUBSYSTEM", "block")
            .property("DRIVER", "sd")
            .property("DEVLINKS", "/dev/disk/by-uuid/abc /dev/disk/by-label/DATA")
            .property("ID_ATA_SATA", " 1 ")
            .build();
        assert_eq!(r.subsystem(), "block");
        assert_eq!(r.driver(), "sd");
        assert_eq!(r.devlinks().len(), 2);
        assert_eq!(r.property_int("ID_ATA_SATA"), 1);
    }

    #[test]
    fn test_builder_devlinks_fill_property() {
        let r = DeviceRecord::builder("/sys/devices/x")
            .devlink("/dev/cdrom")
            .devlink("/dev/dvd")
            .build();
        assert_eq!(r.property("DEVLINKS"), "/dev/cdrom /dev/dvd");
    }
}
