/*!
 * Interface views for non-storage devices.
 */
use serde::Serialize;

use hotplug_core::types::PropertyMap;

use super::ViewBase;

/// Trailing decimal number of `name` after `prefix`
fn number_after(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.parse().ok()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ';' || c == ',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Raw access to the property bag
#[derive(Debug, Clone)]
pub struct GenericInterface {
    base: ViewBase,
}

view_common!(GenericInterface);

impl GenericInterface {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// All properties
    pub fn properties(&self) -> &PropertyMap {
        self.base.record.properties()
    }

    /// One property, or the sysfs attribute of the same name
    pub fn property(&self, key: &str) -> String {
        self.base.record.value(key)
    }

    /// Whether the property key is present
    pub fn property_exists(&self, key: &str) -> bool {
        self.base.record.has_property(key)
    }
}

/// Network interface
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    base: ViewBase,
}

view_common!(NetworkInterface);

/// `ARPHRD_LOOPBACK`
const LOOPBACK_TYPE: i64 = 772;

impl NetworkInterface {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Interface name, e.g. "eth0"
    pub fn iface_name(&self) -> &str {
        let name = self.base.record.property("INTERFACE");
        if name.is_empty() {
            self.base.record.sysname()
        } else {
            name
        }
    }

    /// Hardware address as printed by the kernel
    pub fn hw_address(&self) -> String {
        self.base.record.sysfs_attribute("address")
    }

    /// Hardware address as a number; 0 when unknown
    pub fn mac_address(&self) -> u64 {
        let hex: String = self.hw_address().chars().filter(|c| *c != ':').collect();
        u64::from_str_radix(&hex, 16).unwrap_or(0)
    }

    /// Whether the interface is a WLAN device
    pub fn is_wireless(&self) -> bool {
        let record = &self.base.record;
        record.devtype() == "wlan" || record.sysfs_path_exists("wireless") || record.sysfs_path_exists("phy80211")
    }

    /// Whether the interface is a loopback device
    pub fn is_loopback(&self) -> bool {
        self.base.record.value_int("type") == LOOPBACK_TYPE || self.iface_name() == "lo"
    }
}

/// Form factor of a sound card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum SoundcardType {
    InternalSoundcard,
    UsbSoundcard,
    FirewireSoundcard,
    Headset,
    Modem,
}

/// Role of an ALSA device node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum AudioDeviceType {
    UnknownAudioDevice,
    AudioControl,
    AudioInput,
    AudioOutput,
}

/// ALSA sound device
#[derive(Debug, Clone)]
pub struct AudioInterface {
    base: ViewBase,
}

view_common!(AudioInterface);

impl AudioInterface {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Card name
    ///
    /// The card `id` attribute, then the hardware database model, then the
    /// device name.
    pub fn name(&self) -> String {
        let record = &self.base.record;
        let id = record.sysfs_attribute("id");
        if !id.is_empty() {
            return id;
        }
        let model = record.property("ID_MODEL_FROM_DATABASE");
        if !model.is_empty() {
            return model.to_string();
        }
        record.sysname().to_string()
    }

    /// Form factor, from `SOUND_FORM_FACTOR` and the bus
    pub fn soundcard_type(&self) -> SoundcardType {
        let record = &self.base.record;
        match record.property("SOUND_FORM_FACTOR") {
            "headset" | "headphone" | "handset" => return SoundcardType::Headset,
            "modem" => return SoundcardType::Modem,
            "internal" => return SoundcardType::InternalSoundcard,
            _ => {}
        }
        match record.property("ID_BUS") {
            "usb" => SoundcardType::UsbSoundcard,
            "ieee1394" | "firewire" => SoundcardType::FirewireSoundcard,
            _ if record.syspath().contains("/usb") => SoundcardType::UsbSoundcard,
            _ => SoundcardType::InternalSoundcard,
        }
    }

    /// Node role from the ALSA naming scheme (`controlC0`, `pcmC0D0p`, ...)
    pub fn device_type(&self) -> AudioDeviceType {
        let name = self.base.record.sysname();
        if name.starts_with("control") || name.starts_with("card") {
            AudioDeviceType::AudioControl
        } else if name.starts_with("pcm") && name.ends_with('p') {
            AudioDeviceType::AudioOutput
        } else if name.starts_with("pcm") && name.ends_with('c') {
            AudioDeviceType::AudioInput
        } else {
            AudioDeviceType::UnknownAudioDevice
        }
    }
}

/// Kind of serial port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum SerialType {
    Platform,
    Pci,
    Usb,
}

/// Serial port
#[derive(Debug, Clone)]
pub struct SerialInterface {
    base: ViewBase,
}

view_common!(SerialInterface);

impl SerialInterface {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Kind of port, from `ID_BUS` and the device name
    pub fn serial_type(&self) -> SerialType {
        let record = &self.base.record;
        match record.property("ID_BUS") {
            "usb" => SerialType::Usb,
            "pci" => SerialType::Pci,
            _ if record.syspath().contains("ttyUSB") => SerialType::Usb,
            _ => SerialType::Platform,
        }
    }

    /// Port number of `ttyS<N>` and `ttyUSB<N>` devices
    pub fn port(&self) -> Option<u32> {
        let name = self.base.record.sysname();
        number_after(name, "ttyUSB").or_else(|| number_after(name, "ttyS"))
    }

    /// Device node
    pub fn device_node(&self) -> &str {
        self.base.record.devname()
    }
}

/// Kind of button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum ButtonType {
    LidButton,
    PowerButton,
    SleepButton,
    TabletButton,
    UnknownButtonType,
}

/// Key or switch input device
#[derive(Debug, Clone)]
pub struct Button {
    base: ViewBase,
}

view_common!(Button);

impl Button {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Input device name without the quotes udev adds
    pub fn name(&self) -> String {
        self.base.record.value("NAME").trim_matches('"').to_string()
    }

    /// Kind of button, from the input device name
    pub fn button_type(&self) -> ButtonType {
        let name = self.name().to_lowercase();
        if name.contains("lid") {
            ButtonType::LidButton
        } else if name.contains("power") {
            ButtonType::PowerButton
        } else if name.contains("sleep") {
            ButtonType::SleepButton
        } else if name.contains("tablet") {
            ButtonType::TabletButton
        } else {
            ButtonType::UnknownButtonType
        }
    }

    /// Switches keep a state, keys do not
    pub fn has_state(&self) -> bool {
        self.base.record.has_property("SW")
    }
}

/// gphoto2 camera
#[derive(Debug, Clone)]
pub struct Camera {
    base: ViewBase,
}

view_common!(Camera);

impl Camera {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Access protocols
    pub fn supported_protocols(&self) -> Vec<String> {
        if self.base.record.property_int("ID_GPHOTO2") == 1 {
            vec!["ptp".to_string()]
        } else {
            Vec::new()
        }
    }

    /// Userspace drivers able to talk to the camera
    pub fn supported_drivers(&self) -> Vec<String> {
        vec!["gphoto".to_string()]
    }
}

/// Media player recognised by media-player-info
#[derive(Debug, Clone)]
pub struct PortableMediaPlayer {
    base: ViewBase,
}

view_common!(PortableMediaPlayer);

impl PortableMediaPlayer {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// media-player-info identifier
    pub fn player_id(&self) -> &str {
        self.base.record.property("ID_MEDIA_PLAYER")
    }

    /// Access protocols, e.g. "mtp"
    pub fn supported_protocols(&self) -> Vec<String> {
        let record = &self.base.record;
        let listed = split_list(record.property("ID_MEDIA_PLAYER_PROTOCOLS"));
        if !listed.is_empty() {
            return listed;
        }
        if record.property_int("ID_MTP_DEVICE") == 1 {
            return vec!["mtp".to_string()];
        }
        vec!["storage".to_string()]
    }

    /// Drivers able to talk to the player
    pub fn supported_drivers(&self) -> Vec<String> {
        let listed = split_list(self.base.record.property("ID_MEDIA_PLAYER_DRIVERS"));
        if listed.is_empty() {
            vec!["usb".to_string()]
        } else {
            listed
        }
    }
}

/// Video4Linux device
#[derive(Debug, Clone)]
pub struct Video {
    base: ViewBase,
}

view_common!(Video);

impl Video {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    /// Product name reported by v4l_id
    pub fn product(&self) -> &str {
        self.base.record.property("ID_V4L_PRODUCT")
    }

    /// Capabilities reported by v4l_id, e.g. "capture"
    pub fn capabilities(&self) -> Vec<String> {
        self.base
            .record
            .property("ID_V4L_CAPABILITIES")
            .split(':')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Device node
    pub fn device_node(&self) -> &str {
        self.base.record.devname()
    }
}

/// Kind of DVB device node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum DvbType {
    DvbUnknown,
    DvbAudio,
    DvbCa,
    DvbDemux,
    DvbDvr,
    DvbFrontend,
    DvbNet,
    DvbOsd,
    DvbSec,
    DvbVideo,
}

/// DVB adapter node, named `dvb<adapter>.<type><index>`
#[derive(Debug, Clone)]
pub struct DvbInterface {
    base: ViewBase,
}

view_common!(DvbInterface);

impl DvbInterface {
    fn from_base(base: ViewBase) -> Self {
        Self { base }
    }

    fn parts(&self) -> Option<(&str, &str)> {
        self.base.record.sysname().strip_prefix("dvb")?.split_once('.')
    }

    /// Device node
    pub fn device(&self) -> &str {
        self.base.record.devname()
    }

    /// Adapter number
    pub fn device_adapter(&self) -> Option<u32> {
        self.parts()?.0.parse().ok()
    }

    /// Node kind
    pub fn device_type(&self) -> DvbType {
        let Some((_, node)) = self.parts() else {
            return DvbType::DvbUnknown;
        };
        match node.trim_end_matches(|c: char| c.is_ascii_digit()) {
            "audio" => DvbType::DvbAudio,
            "ca" => DvbType::DvbCa,
            "demux" => DvbType::DvbDemux,
            "dvr" => DvbType::DvbDvr,
            "frontend" => DvbType::DvbFrontend,
            "net" => DvbType::DvbNet,
            "osd" => DvbType::DvbOsd,
            "sec" => DvbType::DvbSec,
            "video" => DvbType::DvbVideo,
            _ => DvbType::DvbUnknown,
        }
    }

    /// Index of the node within its kind
    pub fn device_index(&self) -> Option<u32> {
        let (_, node) = self.parts()?;
        let digits = node.trim_start_matches(|c: char| !c.is_ascii_digit());
        digits.parse().ok()
    }
}
