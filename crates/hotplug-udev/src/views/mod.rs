/*!
 * Capability views.
 *
 * A view is a typed projection of one [`CapabilityKind`] over a
 * [`DeviceRecord`]. Views are built on demand by [`create_view`], which
 * returns `None` when the classifier says the record does not support the
 * requested kind. Every accessor degrades to a typed default (zero, empty,
 * `Unknown`) when the property it reads is absent.
 */
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use hotplug_core::types::Udi;

use crate::action::ActionCoordinator;
use crate::classify::{supports, CapabilityKind};
use crate::cpuinfo::CpuInfo;
use crate::mounts::MountTable;
use crate::record::DeviceRecord;

pub use interfaces::{
    AudioDeviceType, AudioInterface, Button, ButtonType, Camera, DvbInterface, DvbType,
    GenericInterface, NetworkInterface, PortableMediaPlayer, SerialInterface, SerialType,
    SoundcardType, Video,
};
#[cfg(feature = "cdrom")]
pub use optical::{ContentTypes, DiscType, OpticalDisc, OpticalDrive};
pub use power::{AcAdapter, AcAdapterChange, Battery, BatteryChange, BatteryType, ChargeState};
pub use processor::{InstructionSets, Processor};
pub use storage::{Block, DriveType, StorageBus, StorageDrive, StorageVolume, UsageType};
pub use storage_access::StorageAccess;

/// Collaborators shared by every view a manager hands out
pub struct ViewContext {
    udi_prefix: String,
    mounts: MountTable,
    cpuinfo: Arc<CpuInfo>,
    actions: Arc<ActionCoordinator>,
}

impl ViewContext {
    /// Create a context
    pub fn new<S: Into<String>>(
        udi_prefix: S,
        mounts: MountTable,
        cpuinfo: Arc<CpuInfo>,
        actions: Arc<ActionCoordinator>,
    ) -> Self {
        Self {
            udi_prefix: udi_prefix.into(),
            mounts,
            cpuinfo,
            actions,
        }
    }

    /// Identifier prefix
    pub fn udi_prefix(&self) -> &str {
        &self.udi_prefix
    }

    /// Identifier of `record`
    pub fn udi(&self, record: &DeviceRecord) -> Udi {
        record.udi(&self.udi_prefix)
    }

    /// Live mount table
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Process-wide CPU description
    pub fn cpuinfo(&self) -> &CpuInfo {
        &self.cpuinfo
    }

    /// Action coordinator for setup, teardown and eject
    pub fn actions(&self) -> &Arc<ActionCoordinator> {
        &self.actions
    }
}

impl fmt::Debug for ViewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewContext")
            .field("udi_prefix", &self.udi_prefix)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

/// Record, identifier and context every view carries
#[derive(Debug, Clone)]
pub(crate) struct ViewBase {
    pub(crate) record: DeviceRecord,
    pub(crate) udi: Udi,
    pub(crate) context: Arc<ViewContext>,
}

impl ViewBase {
    pub(crate) fn new(record: &DeviceRecord, context: &Arc<ViewContext>) -> Self {
        Self {
            udi: context.udi(record),
            record: record.clone(),
            context: Arc::clone(context),
        }
    }
}

/// Generates the constructor and the identity accessors shared by all views
macro_rules! view_common {
    ($view:ident) => {
        impl $view {
            /// Build the view over `record`
            ///
            /// No support check happens here; use [`create_view`](crate::views::create_view)
            /// for a checked construction.
            pub fn new(record: &$crate::record::DeviceRecord, context: &std::sync::Arc<$crate::views::ViewContext>) -> Self {
                Self::from_base($crate::views::ViewBase::new(record, context))
            }

            /// Identifier of the device
            pub fn udi(&self) -> &hotplug_core::types::Udi {
                &self.base.udi
            }

            /// The underlying record
            pub fn record(&self) -> &$crate::record::DeviceRecord {
                &self.base.record
            }
        }
    };
}
pub(crate) use view_common;

mod interfaces;
#[cfg(feature = "cdrom")]
mod optical;
mod power;
mod processor;
mod storage;
mod storage_access;

/// A view of one capability kind
#[derive(Debug)]
#[allow(missing_docs)]
pub enum CapabilityView {
    GenericInterface(GenericInterface),
    StorageAccess(StorageAccess),
    StorageDrive(StorageDrive),
    StorageVolume(StorageVolume),
    Block(Block),
    #[cfg(feature = "cdrom")]
    OpticalDrive(OpticalDrive),
    #[cfg(feature = "cdrom")]
    OpticalDisc(OpticalDisc),
    AcAdapter(AcAdapter),
    Battery(Battery),
    Processor(Processor),
    Camera(Camera),
    PortableMediaPlayer(PortableMediaPlayer),
    DvbInterface(DvbInterface),
    Video(Video),
    AudioInterface(AudioInterface),
    NetworkInterface(NetworkInterface),
    SerialInterface(SerialInterface),
    Button(Button),
}

/// Build a `kind` view over `record`, or `None` if the record does not support it
pub fn create_view(record: &DeviceRecord, kind: CapabilityKind, context: &Arc<ViewContext>) -> Option<CapabilityView> {
    if !supports(record, kind) {
        debug!(syspath = record.syspath(), %kind, "capability not supported");
        return None;
    }
    let view = match kind {
        CapabilityKind::GenericInterface => CapabilityView::GenericInterface(GenericInterface::new(record, context)),
        CapabilityKind::StorageAccess => CapabilityView::StorageAccess(StorageAccess::new(record, context)),
        CapabilityKind::StorageDrive => CapabilityView::StorageDrive(StorageDrive::new(record, context)),
        CapabilityKind::StorageVolume => CapabilityView::StorageVolume(StorageVolume::new(record, context)),
        CapabilityKind::Block => CapabilityView::Block(Block::new(record, context)),
        #[cfg(feature = "cdrom")]
        CapabilityKind::OpticalDrive => CapabilityView::OpticalDrive(OpticalDrive::new(record, context)),
        #[cfg(feature = "cdrom")]
        CapabilityKind::OpticalDisc => CapabilityView::OpticalDisc(OpticalDisc::new(record, context)),
        #[cfg(not(feature = "cdrom"))]
        CapabilityKind::OpticalDrive | CapabilityKind::OpticalDisc => return None,
        CapabilityKind::AcAdapter => CapabilityView::AcAdapter(AcAdapter::new(record, context)),
        CapabilityKind::Battery => CapabilityView::Battery(Battery::new(record, context)),
        CapabilityKind::Processor => CapabilityView::Processor(Processor::new(record, context)),
        CapabilityKind::Camera => CapabilityView::Camera(Camera::new(record, context)),
        CapabilityKind::PortableMediaPlayer => {
            CapabilityView::PortableMediaPlayer(PortableMediaPlayer::new(record, context))
        }
        CapabilityKind::DvbInterface => CapabilityView::DvbInterface(DvbInterface::new(record, context)),
        CapabilityKind::Video => CapabilityView::Video(Video::new(record, context)),
        CapabilityKind::AudioInterface => CapabilityView::AudioInterface(AudioInterface::new(record, context)),
        CapabilityKind::NetworkInterface => CapabilityView::NetworkInterface(NetworkInterface::new(record, context)),
        CapabilityKind::SerialInterface => CapabilityView::SerialInterface(SerialInterface::new(record, context)),
        CapabilityKind::Button => CapabilityView::Button(Button::new(record, context)),
    };
    Some(view)
}

impl CapabilityView {
    /// Kind of this view
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::GenericInterface(_) => CapabilityKind::GenericInterface,
            Self::StorageAccess(_) => CapabilityKind::StorageAccess,
            Self::StorageDrive(_) => CapabilityKind::StorageDrive,
            Self::StorageVolume(_) => CapabilityKind::StorageVolume,
            Self::Block(_) => CapabilityKind::Block,
            #[cfg(feature = "cdrom")]
            Self::OpticalDrive(_) => CapabilityKind::OpticalDrive,
            #[cfg(feature = "cdrom")]
            Self::OpticalDisc(_) => CapabilityKind::OpticalDisc,
            Self::AcAdapter(_) => CapabilityKind::AcAdapter,
            Self::Battery(_) => CapabilityKind::Battery,
            Self::Processor(_) => CapabilityKind::Processor,
            Self::Camera(_) => CapabilityKind::Camera,
            Self::PortableMediaPlayer(_) => CapabilityKind::PortableMediaPlayer,
            Self::DvbInterface(_) => CapabilityKind::DvbInterface,
            Self::Video(_) => CapabilityKind::Video,
            Self::AudioInterface(_) => CapabilityKind::AudioInterface,
            Self::NetworkInterface(_) => CapabilityKind::NetworkInterface,
            Self::SerialInterface(_) => CapabilityKind::SerialInterface,
            Self::Button(_) => CapabilityKind::Button,
        }
    }

    /// Accessor names and current values, for display
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::GenericInterface(v) => vec![("property_count", v.properties().len().to_string())],
            Self::StorageAccess(v) => vec![
                ("accessible", v.is_accessible().to_string()),
                ("file_path", v.file_path()),
                ("ignored", v.is_ignored().to_string()),
            ],
            Self::StorageDrive(v) => vec![
                ("bus", format!("{:?}", v.bus())),
                ("drive_type", format!("{:?}", v.drive_type())),
                ("size", v.size().to_string()),
                ("hotpluggable", v.is_hotpluggable().to_string()),
                ("removable", v.is_removable().to_string()),
            ],
            Self::StorageVolume(v) => vec![
                ("fs_type", v.fs_type().to_string()),
                ("label", v.label().to_string()),
                ("uuid", v.uuid().to_string()),
                ("usage", format!("{:?}", v.usage())),
                ("size", v.size().to_string()),
                ("ignored", v.is_ignored().to_string()),
                ("encrypted_container", v.encrypted_container_udi().map(|u| u.to_string()).unwrap_or_default()),
            ],
            Self::Block(v) => vec![
                ("device", v.device().to_string()),
                ("major", v.major().to_string()),
                ("minor", v.minor().to_string()),
            ],
            #[cfg(feature = "cdrom")]
            Self::OpticalDrive(v) => vec![("supported_media", format!("{:?}", v.supported_media()))],
            #[cfg(feature = "cdrom")]
            Self::OpticalDisc(v) => vec![
                ("disc_type", format!("{:?}", v.disc_type())),
                ("content", format!("{:?}", v.available_content())),
                ("capacity", v.capacity().to_string()),
                ("blank", v.is_blank().to_string()),
                ("appendable", v.is_appendable().to_string()),
                ("rewritable", v.is_rewritable().to_string()),
            ],
            Self::AcAdapter(v) => vec![("plugged", v.is_plugged().to_string())],
            Self::Battery(v) => vec![
                ("type", format!("{:?}", v.battery_type())),
                ("charge_percent", v.charge_percent().to_string()),
                ("capacity", v.capacity().to_string()),
                ("charge_state", format!("{:?}", v.charge_state())),
                ("rechargeable", v.is_rechargeable().to_string()),
                ("power_supply", v.is_power_supply().to_string()),
                ("plugged", v.is_plugged().to_string()),
            ],
            Self::Processor(v) => vec![
                ("number", v.number().map(|n| n.to_string()).unwrap_or_default()),
                ("max_speed", v.max_speed().map(|s| s.to_string()).unwrap_or_default()),
                ("can_change_frequency", v.can_change_frequency().to_string()),
                ("instruction_sets", format!("{:?}", v.instruction_sets())),
            ],
            Self::Camera(v) => vec![
                ("supported_protocols", v.supported_protocols().join(",")),
                ("supported_drivers", v.supported_drivers().join(",")),
            ],
            Self::PortableMediaPlayer(v) => vec![
                ("supported_protocols", v.supported_protocols().join(",")),
                ("supported_drivers", v.supported_drivers().join(",")),
            ],
            Self::DvbInterface(v) => vec![
                ("adapter", v.device_adapter().map(|n| n.to_string()).unwrap_or_default()),
                ("type", format!("{:?}", v.device_type())),
                ("index", v.device_index().map(|n| n.to_string()).unwrap_or_default()),
            ],
            Self::Video(v) => vec![("product", v.product().to_string()), ("capabilities", v.capabilities().join(","))],
            Self::AudioInterface(v) => vec![
                ("name", v.name()),
                ("soundcard_type", format!("{:?}", v.soundcard_type())),
                ("device_type", format!("{:?}", v.device_type())),
            ],
            Self::NetworkInterface(v) => vec![
                ("iface_name", v.iface_name().to_string()),
                ("hw_address", v.hw_address()),
                ("wireless", v.is_wireless().to_string()),
                ("loopback", v.is_loopback().to_string()),
            ],
            Self::SerialInterface(v) => vec![
                ("serial_type", format!("{:?}", v.serial_type())),
                ("port", v.port().map(|n| n.to_string()).unwrap_or_default()),
            ],
            Self::Button(v) => vec![
                ("type", format!("{:?}", v.button_type())),
                ("has_state", v.has_state().to_string()),
            ],
        }
    }
}

/// Typed access to one variant of [`CapabilityView`]
pub trait DeviceInterface: Sized {
    /// Kind this type views
    const KIND: CapabilityKind;

    /// Unwrap the matching variant
    fn from_view(view: CapabilityView) -> Option<Self>;
}

macro_rules! device_interface {
    ($($(#[$meta:meta])* $view:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            impl DeviceInterface for $view {
                const KIND: CapabilityKind = CapabilityKind::$view;

                fn from_view(view: CapabilityView) -> Option<Self> {
                    match view {
                        CapabilityView::$view(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )+
    };
}

device_interface!(
    GenericInterface,
    StorageAccess,
    StorageDrive,
    StorageVolume,
    Block,
    #[cfg(feature = "cdrom")]
    OpticalDrive,
    #[cfg(feature = "cdrom")]
    OpticalDisc,
    AcAdapter,
    Battery,
    Processor,
    Camera,
    PortableMediaPlayer,
    DvbInterface,
    Video,
    AudioInterface,
    NetworkInterface,
    SerialInterface,
    Button,
);
