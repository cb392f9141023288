/*!
 * Error types for the device layer.
 */
use std::io;

use thiserror::Error;

use hotplug_core::error::Error as CoreError;

/// The kernel event channel could not be opened
///
/// Non-fatal: the manager keeps working from enumeration snapshots.
#[derive(Error, Debug)]
#[error("unable to open the uevent netlink socket: {source}")]
pub struct MonitorInitError {
    #[from]
    source: io::Error,
}

impl MonitorInitError {
    /// The underlying OS error
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

/// Error type for device layer operations
#[derive(Error, Debug)]
pub enum UdevError {
    /// The monitor could not be started
    #[error(transparent)]
    MonitorInit(#[from] MonitorInitError),

    /// Receiving from the netlink socket failed
    #[error("uevent receive failed: {0}")]
    Receive(#[source] io::Error),

    /// No device behind an identifier
    #[error("no such device: {0}")]
    DeviceNotFound(String),

    /// The device does not support the requested capability
    #[error("device {udi} does not support {capability}")]
    UnsupportedCapability {
        /// The device identifier
        udi: String,
        /// The requested capability
        capability: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device layer operations
pub type Result<T> = std::result::Result<T, UdevError>;
