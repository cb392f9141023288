/*!
 * hotplug udev
 *
 * Device discovery and tracking over sysfs and the kernel uevent netlink
 * socket. Devices are classified into capability kinds and exposed through
 * typed views; a [`DeviceManager`] tracks the devices of interest and
 * publishes their lifecycle as [`DeviceNotification`]s.
 *
 * ```no_run
 * use std::sync::Arc;
 * use hotplug_core::config::Config;
 * use hotplug_udev::{CapabilityKind, DeviceManager};
 *
 * # async fn demo() -> hotplug_udev::Result<()> {
 * let manager = Arc::new(DeviceManager::new(&Config::default()));
 * for udi in manager.devices_from_query(None, Some(CapabilityKind::Battery)) {
 *     println!("{}", manager.device(&udi)?.description());
 * }
 * let mut notifications = manager.subscribe();
 * manager.spawn();
 * while let Ok(notification) = notifications.recv().await {
 *     println!("{:?}", notification);
 * }
 * # Ok(())
 * # }
 * ```
 */

#![warn(missing_docs)]

pub mod action;
pub mod cdrom;
pub mod classify;
pub mod cpuinfo;
pub mod device;
pub mod enumerate;
pub mod error;
pub mod helper;
pub mod manager;
pub mod monitor;
pub mod mounts;
pub mod notification;
pub mod record;
pub mod sysfs;
pub mod uevent;
pub mod views;

#[cfg(test)]
mod testutil;

pub use action::{ActionCoordinator, ActionError, ActionKind, ActionResult, ErrorType};
pub use classify::{classify, is_of_interest, supports, CapabilityKind};
pub use device::{Device, DeviceSummary};
pub use enumerate::DeviceEnumerator;
pub use error::{MonitorInitError, Result, UdevError};
pub use manager::{DeviceManager, DeviceManagerBuilder};
pub use monitor::{MonitorOptions, NetlinkMonitor};
pub use notification::DeviceNotification;
pub use record::DeviceRecord;
pub use uevent::{Action, UEvent};
pub use views::{create_view, CapabilityView, DeviceInterface};

/// hotplug udev crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging and report the crate version
pub fn init() -> std::result::Result<(), hotplug_core::error::Error> {
    hotplug_core::init()?;
    tracing::info!("hotplug udev {} initialized", VERSION);
    Ok(())
}

/// Whether optical drive support was compiled in
pub fn has_cdrom_support() -> bool {
    cfg!(feature = "cdrom")
}
