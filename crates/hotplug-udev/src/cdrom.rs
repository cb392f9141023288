/*!
 * Native optical drive access.
 *
 * Uses the Linux cdrom ioctls on the device node. The [`DiscDriver`] trait
 * is the seam optical views go through, so drives can be replaced by a fake
 * in tests.
 */
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use bitflags::bitflags;
use nix::{ioctl_none_bad, ioctl_write_int_bad};

const CDROMEJECT: u32 = 0x5309;
const CDROM_LOCKDOOR: u32 = 0x5329;
const CDROM_GET_CAPABILITY: u32 = 0x5331;

const CDC_CD_R: libc::c_int = 0x2000;
const CDC_CD_RW: libc::c_int = 0x4000;
const CDC_DVD: libc::c_int = 0x8000;
const CDC_DVD_R: libc::c_int = 0x10000;
const CDC_DVD_RAM: libc::c_int = 0x20000;

bitflags! {
    /// Media an optical drive can handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MediumTypes: u32 {
        /// CD-R
        const CDR = 0x0001;
        /// CD-RW
        const CDRW = 0x0002;
        /// DVD-ROM
        const DVD = 0x0004;
        /// DVD-R
        const DVDR = 0x0008;
        /// DVD-RW
        const DVDRW = 0x0010;
        /// DVD-RAM
        const DVDRAM = 0x0020;
        /// DVD+R
        const DVDPLUSR = 0x0040;
        /// DVD+RW
        const DVDPLUSRW = 0x0080;
        /// DVD+R dual layer
        const DVDPLUSDL = 0x0100;
        /// DVD+RW dual layer
        const DVDPLUSDLRW = 0x0200;
        /// BD-ROM
        const BD = 0x0400;
        /// BD-R
        const BDR = 0x0800;
        /// BD-RE
        const BDRE = 0x1000;
        /// HD DVD-ROM
        const HDDVD = 0x2000;
        /// HD DVD-R
        const HDDVDR = 0x4000;
        /// HD DVD-RW
        const HDDVDRW = 0x8000;
    }
}

/// Access to optical drive hardware
pub trait DiscDriver: Send + Sync + Debug {
    /// Query the media the drive at `device` supports
    fn supported_media(&self, device: &str) -> io::Result<MediumTypes>;

    /// Open the tray of the drive at `device`
    fn eject(&self, device: &str) -> io::Result<()>;
}

/// [`DiscDriver`] backed by the kernel cdrom driver
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxCdrom;

impl LinuxCdrom {
    fn open(device: &str) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
    }
}

ioctl_none_bad!(
    /// Open the tray
    cdrom_eject,
    CDROMEJECT
);
ioctl_write_int_bad!(
    /// Lock (1) or unlock (0) the tray
    cdrom_lock_door,
    CDROM_LOCKDOOR
);
ioctl_none_bad!(
    /// `CDC_*` capability mask of the drive
    cdrom_get_capability,
    CDROM_GET_CAPABILITY
);

/// Translate kernel `CDC_*` capability bits
pub fn media_from_capabilities(capabilities: libc::c_int) -> MediumTypes {
    let mut media = MediumTypes::empty();
    if capabilities & CDC_CD_R != 0 {
        media |= MediumTypes::CDR;
    }
    if capabilities & CDC_CD_RW != 0 {
        media |= MediumTypes::CDRW;
    }
    if capabilities & CDC_DVD != 0 {
        media |= MediumTypes::DVD;
    }
    if capabilities & CDC_DVD_R != 0 {
        media |= MediumTypes::DVDR;
    }
    if capabilities & CDC_DVD_RAM != 0 {
        media |= MediumTypes::DVDRAM;
    }
    media
}

impl DiscDriver for LinuxCdrom {
    fn supported_media(&self, device: &str) -> io::Result<MediumTypes> {
        let file = Self::open(device)?;
        // SAFETY: CDROM_GET_CAPABILITY takes no argument and returns the mask.
        let capabilities = unsafe { cdrom_get_capability(file.as_raw_fd()) }?;
        Ok(media_from_capabilities(capabilities))
    }

    fn eject(&self, device: &str) -> io::Result<()> {
        let file = Self::open(device)?;
        // Unlocking can fail on drives without a lock; ejecting still may work.
        // SAFETY: both requests take an integer argument, never a pointer.
        let _ = unsafe { cdrom_lock_door(file.as_raw_fd(), 0) };
        unsafe { cdrom_eject(file.as_raw_fd()) }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_from_capabilities() {
        let media = media_from_capabilities(0x1 | 0x2 | CDC_CD_R | CDC_CD_RW | CDC_DVD);
        assert_eq!(media, MediumTypes::CDR | MediumTypes::CDRW | MediumTypes::DVD);
        assert!(media_from_capabilities(0).is_empty());
        assert!(media_from_capabilities(CDC_DVD_RAM).contains(MediumTypes::DVDRAM));
        // Mount Rainier writing says nothing about DVD+RW.
        assert!(media_from_capabilities(0x100000).is_empty());
    }

    #[test]
    fn test_missing_device_node_is_an_error() {
        let err = LinuxCdrom
            .supported_media("/nonexistent/sr9")
            .expect_err("no device");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
