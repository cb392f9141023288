//! Synthetic sysfs trees and fake collaborators for unit tests.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

use crate::action::ActionCoordinator;
use crate::cdrom::{DiscDriver, MediumTypes};
use crate::classify::CapabilityKind;
use crate::cpuinfo::CpuInfo;
use crate::helper::{HelperOutput, PrivilegedHelper};
use crate::mounts::MountTable;
use crate::notification::DeviceNotification;
use crate::record::DeviceRecord;
use crate::sysfs::Sysfs;
use crate::views::{create_view, CapabilityView, DeviceInterface, StorageAccess, ViewContext};

/// A sysfs tree, udev database and mount table under a temporary directory
pub(crate) struct FakeSysfs {
    dir: TempDir,
    root: PathBuf,
    sysfs: Sysfs,
}

impl FakeSysfs {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("sys/devices")).expect("sys");
        fs::create_dir_all(dir.path().join("udev")).expect("udev db");
        let root = fs::canonicalize(dir.path().join("sys")).expect("canonical root");
        let sysfs = Sysfs::new(&root, dir.path().join("udev"));
        Self { dir, root, sysfs }
    }

    pub(crate) fn sysfs(&self) -> Sysfs {
        self.sysfs.clone()
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Create a device directory with a `uevent` file and class links
    pub(crate) fn add_device(
        &self,
        devpath: &str,
        subsystem: &str,
        driver: Option<&str>,
        properties: &[(&str, &str)],
    ) -> PathBuf {
        let syspath = self.root.join(devpath);
        fs::create_dir_all(&syspath).expect("device dir");

        let uevent: String = properties
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();
        fs::write(syspath.join("uevent"), uevent).expect("uevent");

        let class_dir = self.root.join("class").join(subsystem);
        fs::create_dir_all(&class_dir).expect("class dir");
        symlink(&class_dir, syspath.join("subsystem")).expect("subsystem link");
        let name = syspath.file_name().expect("device name");
        let _ = symlink(&syspath, class_dir.join(name));

        if let Some(driver) = driver {
            let driver_dir = self.root.join("bus/platform/drivers").join(driver);
            fs::create_dir_all(&driver_dir).expect("driver dir");
            symlink(&driver_dir, syspath.join("driver")).expect("driver link");
        }
        syspath
    }

    /// Write a file below a device directory, creating parents
    pub(crate) fn touch(&self, syspath: &Path, relative: &str, contents: &str) {
        let path = syspath.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(path, contents).expect("attribute");
    }

    pub(crate) fn write_udev_db(&self, id: &str, lines: &[&str]) {
        let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        fs::write(self.dir.path().join("udev").join(id), text).expect("udev db entry");
    }

    /// Write a `/proc/mounts` style table and return its path
    pub(crate) fn write_mounts(&self, entries: &[(&str, &str)]) -> PathBuf {
        let path = self.dir.path().join("mounts");
        let text: String = entries
            .iter()
            .map(|(source, target)| format!("{} {} ext4 rw,relatime 0 0\n", source, target))
            .collect();
        fs::write(&path, text).expect("mounts");
        path
    }

    pub(crate) fn write_cpuinfo(&self, text: &str) -> PathBuf {
        let path = self.dir.path().join("cpuinfo");
        fs::write(&path, text).expect("cpuinfo");
        path
    }
}

/// One recorded helper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HelperCall {
    Mount(String, PathBuf),
    Unmount(PathBuf),
}

/// Privileged helper that edits a mounts file instead of mounting
#[derive(Debug)]
pub(crate) struct FakeHelper {
    mounts: PathBuf,
    calls: Mutex<Vec<HelperCall>>,
    failure: Option<(i32, String)>,
    pub(crate) started: Notify,
    pub(crate) release: Option<Notify>,
}

impl FakeHelper {
    pub(crate) fn new(mounts: PathBuf) -> Self {
        Self {
            mounts,
            calls: Mutex::new(Vec::new()),
            failure: None,
            started: Notify::new(),
            release: None,
        }
    }

    /// Exit with `status` and print `stderr` instead of succeeding
    pub(crate) fn failing(mut self, status: i32, stderr: &str) -> Self {
        self.failure = Some((status, stderr.to_string()));
        self
    }

    /// Block each call until `release` is notified
    pub(crate) fn gated(mut self) -> Self {
        self.release = Some(Notify::new());
        self
    }

    pub(crate) fn calls(&self) -> Vec<HelperCall> {
        self.calls.lock().expect("calls").clone()
    }

    async fn run(&self, call: HelperCall) -> io::Result<HelperOutput> {
        self.calls.lock().expect("calls").push(call.clone());
        self.started.notify_one();
        if let Some(release) = &self.release {
            release.notified().await;
        }
        if let Some((status, stderr)) = &self.failure {
            return Ok(HelperOutput {
                status: Some(*status),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        let table = fs::read_to_string(&self.mounts).unwrap_or_default();
        let table = match call {
            HelperCall::Mount(source, target) => {
                format!("{}{} {} ext4 rw 0 0\n", table, source, target.display())
            }
            HelperCall::Unmount(target) => {
                let target = target.display().to_string();
                table
                    .lines()
                    .filter(|line| line.split_whitespace().nth(1) != Some(target.as_str()))
                    .map(|line| format!("{}\n", line))
                    .collect()
            }
        };
        fs::write(&self.mounts, table)?;
        Ok(HelperOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl PrivilegedHelper for FakeHelper {
    async fn mount(&self, source: &str, target: &Path) -> io::Result<HelperOutput> {
        self.run(HelperCall::Mount(source.to_string(), target.to_path_buf())).await
    }

    async fn unmount(&self, target: &Path) -> io::Result<HelperOutput> {
        self.run(HelperCall::Unmount(target.to_path_buf())).await
    }
}

/// Disc driver with canned capabilities and eject outcome
#[derive(Debug, Default)]
pub(crate) struct FakeDisc {
    pub(crate) media: Option<MediumTypes>,
    pub(crate) eject_error: Option<i32>,
    pub(crate) ejects: AtomicUsize,
}

impl FakeDisc {
    pub(crate) fn ejects(&self) -> usize {
        self.ejects.load(Ordering::SeqCst)
    }
}

impl DiscDriver for FakeDisc {
    fn supported_media(&self, _device: &str) -> io::Result<MediumTypes> {
        self.media
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn eject(&self, _device: &str) -> io::Result<()> {
        self.ejects.fetch_add(1, Ordering::SeqCst);
        match self.eject_error {
            Some(code) => Err(io::Error::from_raw_os_error(code)),
            None => Ok(()),
        }
    }
}

pub(crate) const TEST_PREFIX: &str = "/org/kde/solid/udev";

/// A view context over a [`FakeSysfs`], with fake helper and disc driver
pub(crate) struct Harness {
    pub(crate) fake: FakeSysfs,
    pub(crate) helper: Arc<FakeHelper>,
    pub(crate) disc: Arc<FakeDisc>,
    pub(crate) context: Arc<ViewContext>,
    pub(crate) notifications: broadcast::Receiver<DeviceNotification>,
    pub(crate) sender: broadcast::Sender<DeviceNotification>,
    mounts: PathBuf,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with(FakeHelper::new, FakeDisc::default())
    }

    pub(crate) fn with_helper<F>(helper: F) -> Self
    where
        F: FnOnce(PathBuf) -> FakeHelper,
    {
        Self::with(helper, FakeDisc::default())
    }

    pub(crate) fn with<F>(helper: F, disc: FakeDisc) -> Self
    where
        F: FnOnce(PathBuf) -> FakeHelper,
    {
        let fake = FakeSysfs::new();
        let mounts = fake.write_mounts(&[]);
        let cpuinfo = fake.base().join("cpuinfo");
        let helper = Arc::new(helper(mounts.clone()));
        let disc = Arc::new(disc);
        let (sender, notifications) = broadcast::channel(64);
        let actions = Arc::new(ActionCoordinator::new(
            helper.clone(),
            disc.clone(),
            sender.clone(),
            fake.base().join("media"),
        ));
        let context = Arc::new(ViewContext::new(
            TEST_PREFIX,
            MountTable::new(&mounts),
            Arc::new(CpuInfo::new(cpuinfo)),
            actions,
        ));
        Self {
            fake,
            helper,
            disc,
            context,
            notifications,
            sender,
            mounts,
        }
    }

    pub(crate) fn media_dir(&self) -> PathBuf {
        self.fake.base().join("media")
    }

    pub(crate) fn set_mounts(&self, entries: &[(&str, &str)]) {
        let written = self.fake.write_mounts(entries);
        debug_assert_eq!(written, self.mounts);
    }

    pub(crate) fn record(&self, syspath: &Path) -> DeviceRecord {
        self.fake.sysfs().device(syspath).expect("device loads")
    }

    pub(crate) fn view(&self, syspath: &Path, kind: CapabilityKind) -> Option<CapabilityView> {
        create_view(&self.record(syspath), kind, &self.context)
    }

    pub(crate) fn storage_access(&self, syspath: &Path) -> StorageAccess {
        self.view(syspath, CapabilityKind::StorageAccess)
            .and_then(StorageAccess::from_view)
            .expect("storage access view")
    }
}
