/*!
 * Mount, unmount and eject coordination.
 *
 * The [`ActionCoordinator`] turns a capability view's request into an
 * external helper run (or a native eject), keeps at most one request in
 * flight per device and action, and reports the outcome both to the caller
 * and on the notification channel.
 */
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hotplug_core::config::ActionConfig;
use hotplug_core::types::Udi;

use crate::cdrom::DiscDriver;
use crate::helper::{HelperOutput, PrivilegedHelper};
use crate::notification::DeviceNotification;
use crate::record::DeviceRecord;
use crate::views::StorageAccess;

#[cfg(feature = "cdrom")]
use crate::views::OpticalDrive;

/// Kind of device action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Mount
    Setup,
    /// Unmount
    Teardown,
    /// Open the tray
    Eject,
}

impl ActionKind {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
            Self::Eject => "eject",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    /// Success
    NoError,
    /// Not authorized, or authorization failed
    UnauthorizedOperation,
    /// Another request for the same device and action is running
    DeviceBusy,
    /// The helper or driver reported a failure
    OperationFailed,
    /// The user dismissed the authorization prompt
    UserCanceled,
    /// The request cannot be expressed for this device
    InvalidOption,
    /// The helper program is not installed
    MissingDriver,
}

impl ErrorType {
    /// Short human readable description
    pub fn description(self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::UnauthorizedOperation => "you are not authorized to perform this operation",
            Self::DeviceBusy => "the device is currently busy",
            Self::OperationFailed => "the requested operation has failed",
            Self::UserCanceled => "the requested operation has been canceled",
            Self::InvalidOption => "invalid or unknown option has been provided",
            Self::MissingDriver => "a required driver is missing",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A failed action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ActionError {
    /// Classification
    pub kind: ErrorType,
    /// Helper output or error text
    pub message: String,
}

impl ActionError {
    /// Create an action error
    pub fn new<S: Into<String>>(kind: ErrorType, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of an action
pub type ActionResult = std::result::Result<(), ActionError>;

/// Map a finished helper run to an action result
///
/// Status 126 and 127 follow the `pkexec` convention for a dismissed
/// dialog and a refused authorization.
pub fn helper_result(output: &HelperOutput) -> ActionResult {
    if output.success() {
        return Ok(());
    }
    let mut message = output.message();
    if message.is_empty() {
        message = match output.status {
            Some(code) => format!("helper exited with status {}", code),
            None => "helper was terminated by a signal".to_string(),
        };
    }
    let kind = match output.status {
        Some(126) => ErrorType::UserCanceled,
        Some(127) => ErrorType::UnauthorizedOperation,
        _ => ErrorType::OperationFailed,
    };
    Err(ActionError::new(kind, message))
}

fn spawn_error(err: io::Error) -> ActionError {
    let kind = if err.kind() == io::ErrorKind::NotFound {
        ErrorType::MissingDriver
    } else {
        ErrorType::OperationFailed
    };
    ActionError::new(kind, err.to_string())
}

/// Default base directory for mount points
pub fn media_dir_from_config(config: &ActionConfig) -> PathBuf {
    match &config.media_dir {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("hotplug")
            .join("media"),
    }
}

type RequestKey = (Udi, ActionKind);

/// Tracks in-flight actions and runs them
#[derive(Debug)]
pub struct ActionCoordinator {
    in_flight: Mutex<HashSet<RequestKey>>,
    helper: Arc<dyn PrivilegedHelper>,
    disc: Arc<dyn DiscDriver>,
    notifications: broadcast::Sender<DeviceNotification>,
    media_dir: PathBuf,
}

/// Releases the in-flight slot when dropped
struct InFlight<'a> {
    coordinator: &'a ActionCoordinator,
    key: RequestKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.coordinator
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ActionCoordinator {
    /// Create a coordinator publishing on `notifications`
    pub fn new(
        helper: Arc<dyn PrivilegedHelper>,
        disc: Arc<dyn DiscDriver>,
        notifications: broadcast::Sender<DeviceNotification>,
        media_dir: PathBuf,
    ) -> Self {
        Self {
            in_flight: Mutex::new(HashSet::new()),
            helper,
            disc,
            notifications,
            media_dir,
        }
    }

    /// Native optical drive access
    pub fn disc(&self) -> &Arc<dyn DiscDriver> {
        &self.disc
    }

    /// Base directory for mount points
    pub fn media_dir(&self) -> &PathBuf {
        &self.media_dir
    }

    /// Whether `action` is running for `udi`
    pub fn is_pending(&self, udi: &Udi, action: ActionKind) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(udi.clone(), action))
    }

    fn begin(&self, udi: &Udi, action: ActionKind) -> Result<InFlight<'_>, ActionError> {
        let key = (udi.clone(), action);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            debug!(udi = %udi, %action, "rejecting overlapping request");
            return Err(ActionError::new(
                ErrorType::DeviceBusy,
                format!("{} already in progress for {}", action, udi),
            ));
        }
        Ok(InFlight {
            coordinator: self,
            key,
        })
    }

    fn publish(&self, notification: DeviceNotification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn finish(&self, udi: &Udi, action: ActionKind, result: &ActionResult, accessible: Option<bool>) {
        if let (Ok(()), Some(accessible)) = (result, accessible) {
            self.publish(DeviceNotification::AccessibilityChanged {
                udi: udi.clone(),
                accessible,
            });
        }
        let (error, message) = match result {
            Ok(()) => (ErrorType::NoError, String::new()),
            Err(e) => (e.kind, e.message.clone()),
        };
        match &result {
            Ok(()) => info!(udi = %udi, %action, "action completed"),
            Err(e) => warn!(udi = %udi, %action, error = %e, "action failed"),
        }
        self.publish(DeviceNotification::ActionDone {
            udi: udi.clone(),
            action,
            error,
            message,
        });
    }

    /// Mount point used for `record`: the media directory plus the filesystem UUID
    pub fn mount_point_for(&self, record: &DeviceRecord) -> PathBuf {
        let uuid = record.property("ID_FS_UUID");
        let name = if uuid.is_empty() { record.sysname() } else { uuid };
        self.media_dir.join(name)
    }

    /// Mount the volume behind `access`
    ///
    /// Succeeds at once, without notifications, if it is already mounted.
    pub async fn setup(&self, access: &StorageAccess) -> ActionResult {
        if access.is_accessible() {
            return Ok(());
        }
        let udi = access.udi().clone();
        let _slot = self.begin(&udi, ActionKind::Setup)?;
        self.publish(DeviceNotification::ActionRequested {
            udi: udi.clone(),
            action: ActionKind::Setup,
        });

        let result = self.mount(access.record()).await;
        self.finish(&udi, ActionKind::Setup, &result, Some(true));
        result
    }

    async fn mount(&self, record: &DeviceRecord) -> ActionResult {
        let source = record.devname();
        if source.is_empty() {
            return Err(ActionError::new(ErrorType::InvalidOption, "device has no device node"));
        }
        let target = self.mount_point_for(record);
        tokio::fs::create_dir_all(&target).await.map_err(|e| {
            ActionError::new(
                ErrorType::OperationFailed,
                format!("cannot create mount point {}: {}", target.display(), e),
            )
        })?;
        let output = self.helper.mount(source, &target).await.map_err(spawn_error)?;
        helper_result(&output)
    }

    /// Unmount the volume behind `access`
    ///
    /// Fails at once, without notifications, if it is not mounted.
    pub async fn teardown(&self, access: &StorageAccess) -> ActionResult {
        let mount_point = access.file_path();
        if mount_point.is_empty() {
            return Err(ActionError::new(ErrorType::OperationFailed, "device is not mounted"));
        }
        let udi = access.udi().clone();
        let _slot = self.begin(&udi, ActionKind::Teardown)?;
        self.publish(DeviceNotification::ActionRequested {
            udi: udi.clone(),
            action: ActionKind::Teardown,
        });

        let result = match self.helper.unmount(&PathBuf::from(mount_point)).await {
            Ok(output) => helper_result(&output),
            Err(e) => Err(spawn_error(e)),
        };
        self.finish(&udi, ActionKind::Teardown, &result, Some(false));
        result
    }

    /// Open the tray of `drive`
    ///
    /// Every driver failure is reported as `UnauthorizedOperation`.
    #[cfg(feature = "cdrom")]
    pub async fn eject(&self, drive: &OpticalDrive) -> ActionResult {
        let udi = drive.udi().clone();
        let _slot = self.begin(&udi, ActionKind::Eject)?;
        self.publish(DeviceNotification::ActionRequested {
            udi: udi.clone(),
            action: ActionKind::Eject,
        });

        let device = drive.record().devname().to_string();
        let disc = Arc::clone(&self.disc);
        let result = match tokio::task::spawn_blocking(move || disc.eject(&device)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ActionError::new(ErrorType::UnauthorizedOperation, e.to_string())),
            Err(e) => Err(ActionError::new(ErrorType::OperationFailed, e.to_string())),
        };
        self.finish(&udi, ActionKind::Eject, &result, None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeHelper, Harness, HelperCall};
    use tokio::sync::broadcast::error::TryRecvError;

    fn usb_partition(h: &Harness) -> StorageAccess {
        let path = h.fake.add_device(
            "devices/pci0000:00/usb1/1-1/host6/block/sdb/sdb1",
            "block",
            None,
            &[
                ("DEVNAME", "/dev/sdb1"),
                ("DEVTYPE", "partition"),
                ("ID_FS_TYPE", "ext4"),
                ("ID_FS_UUID", "0f3c-77aa"),
            ],
        );
        h.storage_access(&path)
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceNotification>) -> Vec<DeviceNotification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[test]
    fn test_helper_result_mapping() {
        let out = |status, stderr: &str| HelperOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        };
        assert_eq!(helper_result(&out(Some(0), "")), Ok(()));
        assert_eq!(
            helper_result(&out(Some(32), "mount: bad superblock")),
            Err(ActionError::new(ErrorType::OperationFailed, "mount: bad superblock"))
        );
        assert_eq!(helper_result(&out(Some(126), "dismissed")).unwrap_err().kind, ErrorType::UserCanceled);
        assert_eq!(helper_result(&out(Some(127), "")).unwrap_err().kind, ErrorType::UnauthorizedOperation);
        assert_eq!(helper_result(&out(None, "")).unwrap_err().message, "helper was terminated by a signal");
    }

    #[test]
    fn test_media_dir_defaults() {
        let configured = ActionConfig {
            media_dir: Some("/run/media/me".into()),
            ..ActionConfig::default()
        };
        assert_eq!(media_dir_from_config(&configured), PathBuf::from("/run/media/me"));
        assert!(media_dir_from_config(&ActionConfig::default()).ends_with("hotplug/media"));
    }

    #[tokio::test]
    async fn test_setup_mounts_and_broadcasts() {
        let mut h = Harness::new();
        let access = usb_partition(&h);
        assert!(!access.is_accessible());

        tokio_test::assert_ok!(access.setup().await);

        let target = h.media_dir().join("0f3c-77aa");
        assert!(target.is_dir());
        assert_eq!(h.helper.calls(), vec![HelperCall::Mount("/dev/sdb1".into(), target.clone())]);
        assert!(access.is_accessible());
        assert_eq!(access.file_path(), target.display().to_string());

        let udi = access.udi().clone();
        assert_eq!(
            drain(&mut h.notifications),
            vec![
                DeviceNotification::ActionRequested { udi: udi.clone(), action: ActionKind::Setup },
                DeviceNotification::AccessibilityChanged { udi: udi.clone(), accessible: true },
                DeviceNotification::ActionDone {
                    udi,
                    action: ActionKind::Setup,
                    error: ErrorType::NoError,
                    message: String::new(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_is_idempotent_when_mounted() {
        let mut h = Harness::new();
        let access = usb_partition(&h);
        h.set_mounts(&[("/dev/sdb1", "/media/x")]);

        tokio_test::assert_ok!(access.setup().await);
        tokio_test::assert_ok!(access.setup().await);

        assert!(h.helper.calls().is_empty());
        assert!(matches!(h.notifications.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_setup_failure_reports_helper_text() {
        let mut h = Harness::with_helper(|mounts| FakeHelper::new(mounts).failing(32, "mount: /media/x: unknown filesystem type 'exfat'.\n"));
        let access = usb_partition(&h);

        let err = access.setup().await.expect_err("helper fails");
        assert_eq!(err.kind, ErrorType::OperationFailed);
        assert_eq!(err.message, "mount: /media/x: unknown filesystem type 'exfat'.");

        let events = drain(&mut h.notifications);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            DeviceNotification::ActionDone { error: ErrorType::OperationFailed, message, .. }
                if message.contains("exfat")
        ));
        assert!(!access.is_accessible());
    }

    #[tokio::test]
    async fn test_teardown_when_not_mounted_does_nothing() {
        let mut h = Harness::new();
        let access = usb_partition(&h);

        let err = access.teardown().await.expect_err("not mounted");
        assert_eq!(err.kind, ErrorType::OperationFailed);
        assert!(h.helper.calls().is_empty());
        assert!(matches!(h.notifications.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_teardown_unmounts() {
        let mut h = Harness::new();
        let access = usb_partition(&h);
        h.set_mounts(&[("/dev/sdb1", "/media/x")]);

        tokio_test::assert_ok!(access.teardown().await);

        assert_eq!(h.helper.calls(), vec![HelperCall::Unmount(PathBuf::from("/media/x"))]);
        assert!(!access.is_accessible());
        let events = drain(&mut h.notifications);
        assert!(events.contains(&DeviceNotification::AccessibilityChanged {
            udi: access.udi().clone(),
            accessible: false,
        }));
    }

    #[tokio::test]
    async fn test_overlapping_setup_is_rejected_as_busy() {
        let h = Harness::with_helper(|mounts| FakeHelper::new(mounts).gated());
        let access = usb_partition(&h);
        let helper = Arc::clone(&h.helper);

        let (first, second) = tokio::join!(access.setup(), async {
            helper.started.notified().await;
            assert!(h.context.actions().is_pending(access.udi(), ActionKind::Setup));
            let second = access.setup().await;
            if let Some(release) = &helper.release {
                release.notify_one();
            }
            second
        });

        tokio_test::assert_ok!(first);
        assert_eq!(second.expect_err("busy").kind, ErrorType::DeviceBusy);
        assert_eq!(h.helper.calls().len(), 1);
        assert!(!h.context.actions().is_pending(access.udi(), ActionKind::Setup));
    }

    #[tokio::test]
    async fn test_missing_device_node_is_invalid_option() {
        let h = Harness::new();
        let path = h.fake.add_device("devices/virtual/block/loop0", "block", None, &[("ID_FS_TYPE", "squashfs")]);
        let access = h.storage_access(&path);

        let err = access.setup().await.expect_err("no node");
        assert_eq!(err.kind, ErrorType::InvalidOption);
    }
}
