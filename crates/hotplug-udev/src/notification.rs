/*!
 * Notifications broadcast by the device manager and its actions.
 */
use serde::Serialize;

use hotplug_core::types::Udi;

use crate::action::{ActionKind, ErrorType};

/// Something observable happened to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DeviceNotification {
    /// A device of interest appeared
    DeviceAdded {
        /// The device
        udi: Udi,
    },
    /// A tracked device went away
    DeviceRemoved {
        /// The device
        udi: Udi,
    },
    /// A tracked block device changed content
    ContentChanged {
        /// The device
        udi: Udi,
        /// Whether it now carries a filesystem or an encrypted container
        has_filesystem: bool,
    },
    /// A setup, teardown or eject was started
    ActionRequested {
        /// The device
        udi: Udi,
        /// Which action
        action: ActionKind,
    },
    /// A setup, teardown or eject finished
    ActionDone {
        /// The device
        udi: Udi,
        /// Which action
        action: ActionKind,
        /// Outcome
        error: ErrorType,
        /// Helper output or error text; empty on success
        message: String,
    },
    /// A storage device was mounted or unmounted
    AccessibilityChanged {
        /// The device
        udi: Udi,
        /// Whether it is mounted now
        accessible: bool,
    },
}

impl DeviceNotification {
    /// The device this notification is about
    pub fn udi(&self) -> &Udi {
        match self {
            Self::DeviceAdded { udi }
            | Self::DeviceRemoved { udi }
            | Self::ContentChanged { udi, .. }
            | Self::ActionRequested { udi, .. }
            | Self::ActionDone { udi, .. }
            | Self::AccessibilityChanged { udi, .. } => udi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udi_accessor() {
        let n = DeviceNotification::ActionDone {
            udi: Udi::from("/x/sys/a"),
            action: ActionKind::Eject,
            error: ErrorType::UnauthorizedOperation,
            message: "denied".into(),
        };
        assert_eq!(n.udi().as_str(), "/x/sys/a");
    }
}
