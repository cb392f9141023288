/*!
 * Point-in-time device enumeration.
 *
 * Devices are found through `class/<subsystem>` and `bus/<subsystem>/devices`
 * links, the same places libudev scans. Links are resolved to their real
 * device directories and de-duplicated; a device that cannot be read is
 * skipped.
 */
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::record::DeviceRecord;
use crate::sysfs::Sysfs;

/// Snapshot source for the devices present in sysfs
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    sysfs: Sysfs,
    subsystems: Vec<String>,
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            trace!(dir = %dir.display(), error = %e, "not listable");
            Vec::new()
        }
    }
}

impl DeviceEnumerator {
    /// Enumerate `subsystems` below `sysfs`; an empty list means every subsystem
    pub fn new(sysfs: Sysfs, subsystems: Vec<String>) -> Self {
        Self { sysfs, subsystems }
    }

    /// The sysfs handle devices are loaded from
    pub fn sysfs(&self) -> &Sysfs {
        &self.sysfs
    }

    /// Subsystems scanned
    pub fn subsystems(&self) -> &[String] {
        &self.subsystems
    }

    fn subsystem_dirs(&self) -> Vec<PathBuf> {
        let root = self.sysfs.root();
        let mut dirs = Vec::new();
        if self.subsystems.is_empty() {
            dirs.extend(list_dir(&root.join("class")));
            dirs.extend(
                list_dir(&root.join("bus"))
                    .into_iter()
                    .map(|bus| bus.join("devices")),
            );
        } else {
            for subsystem in &self.subsystems {
                dirs.push(root.join("class").join(subsystem));
                dirs.push(root.join("bus").join(subsystem).join("devices"));
            }
        }
        dirs
    }

    /// Real device directories, sorted and without duplicates
    fn device_paths(&self) -> BTreeSet<PathBuf> {
        self.subsystem_dirs()
            .iter()
            .flat_map(|dir| list_dir(dir))
            .filter_map(|link| fs::canonicalize(link).ok())
            .filter(|path| path.join("uevent").is_file())
            .collect()
    }

    /// All devices currently present
    ///
    /// Blocking and restartable; every call reads sysfs afresh.
    pub fn enumerate(&self) -> Vec<DeviceRecord> {
        let records: Vec<DeviceRecord> = self
            .device_paths()
            .iter()
            .filter_map(|path| self.sysfs.device(path))
            .filter(|record| {
                self.subsystems.is_empty() || self.subsystems.iter().any(|s| s == record.subsystem())
            })
            .collect();
        debug!(count = records.len(), "enumerated devices");
        records
    }

    /// Load one device by its absolute sysfs path
    ///
    /// Links and `..` are resolved first; paths that leave the sysfs root are
    /// rejected.
    pub fn device_by_syspath(&self, syspath: &str) -> Option<DeviceRecord> {
        let path = fs::canonicalize(syspath).ok()?;
        if !path.starts_with(self.sysfs.root()) {
            trace!(syspath, "path outside sysfs");
            return None;
        }
        self.sysfs.device(&path)
    }
}
