/*!
 * Optical drives and discs.
 *
 * The drive capabilities come from the native driver, queried once when
 * the view is built. Disc information is read from the `ID_CDROM_MEDIA_*`
 * properties udev's cdrom_id helper attaches to the drive.
 */
use bitflags::bitflags;
use serde::Serialize;
use tracing::warn;

use crate::action::ActionResult;
use crate::cdrom::MediumTypes;

use super::ViewBase;

/// Optical drive
#[derive(Debug, Clone)]
pub struct OpticalDrive {
    base: ViewBase,
    supported_media: MediumTypes,
}

view_common!(OpticalDrive);

impl OpticalDrive {
    fn from_base(base: ViewBase) -> Self {
        let device = base.record.devname();
        let supported_media = match base.context.actions().disc().supported_media(device) {
            Ok(media) => media,
            Err(e) => {
                warn!(device, error = %e, "could not open optical drive");
                MediumTypes::empty()
            }
        };
        Self { base, supported_media }
    }

    /// Media the drive can read or write
    pub fn supported_media(&self) -> MediumTypes {
        self.supported_media
    }

    /// Open the tray
    ///
    /// Broadcasts `ActionRequested` and `ActionDone` like storage actions do.
    pub async fn eject(&self) -> ActionResult {
        self.base.context.actions().eject(self).await
    }
}

/// Kind of disc in a drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum DiscType {
    UnknownDiscType,
    CdRom,
    CdRecordable,
    CdRewritable,
    DvdRom,
    DvdRam,
    DvdRecordable,
    DvdRewritable,
    DvdPlusRecordable,
    DvdPlusRewritable,
    DvdPlusRecordableDuallayer,
    DvdPlusRewritableDuallayer,
    BluRayRom,
    BluRayRecordable,
    BluRayRewritable,
    HdDvdRom,
    HdDvdRecordable,
    HdDvdRewritable,
}

bitflags! {
    /// Content found on a disc
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContentTypes: u32 {
        /// Audio tracks
        const AUDIO = 0x01;
        /// Data tracks
        const DATA = 0x02;
        /// Video CD
        const VIDEO_CD = 0x04;
        /// Super Video CD
        const SUPER_VIDEO_CD = 0x08;
        /// Video DVD
        const VIDEO_DVD = 0x10;
        /// Video Blu-ray
        const VIDEO_BLURAY = 0x20;
    }
}

/// Most specific media property first
const MEDIA_TABLE: [(&str, DiscType); 17] = [
    ("ID_CDROM_MEDIA_BD_RE", DiscType::BluRayRewritable),
    ("ID_CDROM_MEDIA_BD_R", DiscType::BluRayRecordable),
    ("ID_CDROM_MEDIA_BD", DiscType::BluRayRom),
    ("ID_CDROM_MEDIA_HDDVD_RW", DiscType::HdDvdRewritable),
    ("ID_CDROM_MEDIA_HDDVD_R", DiscType::HdDvdRecordable),
    ("ID_CDROM_MEDIA_HDDVD", DiscType::HdDvdRom),
    ("ID_CDROM_MEDIA_DVD_PLUS_RW_DL", DiscType::DvdPlusRewritableDuallayer),
    ("ID_CDROM_MEDIA_DVD_PLUS_R_DL", DiscType::DvdPlusRecordableDuallayer),
    ("ID_CDROM_MEDIA_DVD_PLUS_RW", DiscType::DvdPlusRewritable),
    ("ID_CDROM_MEDIA_DVD_PLUS_R", DiscType::DvdPlusRecordable),
    ("ID_CDROM_MEDIA_DVD_RAM", DiscType::DvdRam),
    ("ID_CDROM_MEDIA_DVD_RW", DiscType::DvdRewritable),
    ("ID_CDROM_MEDIA_DVD_R", DiscType::DvdRecordable),
    ("ID_CDROM_MEDIA_DVD", DiscType::DvdRom),
    ("ID_CDROM_MEDIA_CD_RW", DiscType::CdRewritable),
    ("ID_CDROM_MEDIA_CD_R", DiscType::CdRecordable),
    ("ID_CDROM_MEDIA_CD", DiscType::CdRom),
];

const MIB: u64 = 1024 * 1024;

/// Disc currently in a drive
#[derive(Debug, Clone)]
pub struct OpticalDisc {
    base: ViewBase,
}

view_common!(OpticalDisc);

impl OpticalDisc {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Disc type; `UnknownDiscType` when no medium is reported
    pub fn disc_type(&self) -> DiscType {
        let record = &self.base.record;
        if record.property_int("ID_CDROM_MEDIA") != 1 {
            return DiscType::UnknownDiscType;
        }
        MEDIA_TABLE
            .iter()
            .find(|(key, _)| record.property_int(key) == 1)
            .map(|(_, disc)| *disc)
            .unwrap_or(DiscType::UnknownDiscType)
    }

    /// Content types, from the track counts
    pub fn available_content(&self) -> ContentTypes {
        let record = &self.base.record;
        let mut content = ContentTypes::empty();
        if record.property_int("ID_CDROM_MEDIA_TRACK_COUNT_AUDIO") > 0 {
            content |= ContentTypes::AUDIO;
        }
        if record.property_int("ID_CDROM_MEDIA_TRACK_COUNT_DATA") > 0 {
            content |= ContentTypes::DATA;
        }
        content
    }

    /// Nominal capacity in bytes for the disc type
    pub fn capacity(&self) -> u64 {
        match self.disc_type() {
            DiscType::CdRom | DiscType::CdRecordable | DiscType::CdRewritable => 700 * MIB,
            DiscType::DvdRom
            | DiscType::DvdRam
            | DiscType::DvdRecordable
            | DiscType::DvdRewritable
            | DiscType::DvdPlusRecordable
            | DiscType::DvdPlusRewritable => 4700 * MIB,
            DiscType::DvdPlusRecordableDuallayer | DiscType::DvdPlusRewritableDuallayer => 9400 * MIB,
            DiscType::HdDvdRom | DiscType::HdDvdRecordable | DiscType::HdDvdRewritable => 15000 * MIB,
            DiscType::BluRayRom | DiscType::BluRayRecordable | DiscType::BluRayRewritable => 25000 * MIB,
            DiscType::UnknownDiscType => 0,
        }
    }

    /// Whether the disc can be erased and rewritten
    pub fn is_rewritable(&self) -> bool {
        matches!(
            self.disc_type(),
            DiscType::CdRewritable
                | DiscType::BluRayRewritable
                | DiscType::HdDvdRewritable
                | DiscType::DvdRewritable
                | DiscType::DvdPlusRewritable
                | DiscType::DvdPlusRewritableDuallayer
        )
    }

    /// Whether the disc has no content
    pub fn is_blank(&self) -> bool {
        self.available_content().is_empty()
    }

    /// Whether more sessions can be appended
    pub fn is_appendable(&self) -> bool {
        matches!(
            self.disc_type(),
            DiscType::DvdPlusRecordable
                | DiscType::DvdPlusRewritable
                | DiscType::DvdPlusRewritableDuallayer
                | DiscType::DvdPlusRecordableDuallayer
        )
    }
}
