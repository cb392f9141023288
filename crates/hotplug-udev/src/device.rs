/*!
 * Device objects.
 *
 * A [`Device`] pairs an identifier with the record it was loaded from and
 * answers the questions every consumer asks first: what is this, who made
 * it, which icon should represent it. Capability access goes through
 * [`Device::interface`] and [`Device::as_interface`].
 */
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use hotplug_core::types::Udi;

use crate::classify::{classify, supports, CapabilityKind};
use crate::cpuinfo::{MODEL_PATTERN, VENDOR_PATTERN};
use crate::record::DeviceRecord;
use crate::views::{
    create_view, AudioInterface, Button, ButtonType, CapabilityView, DeviceInterface,
    NetworkInterface, PortableMediaPlayer, Processor, SoundcardType, StorageVolume, UsageType,
    ViewContext,
};


/// A device known to the manager, or the synthetic root
#[derive(Debug, Clone)]
pub struct Device {
    udi: Udi,
    parent_udi: Option<Udi>,
    record: Option<DeviceRecord>,
    context: Arc<ViewContext>,
}

/// Everything [`Device`] can say about itself, in one serializable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    /// Identifier
    pub udi: Udi,
    /// Parent identifier; absent for the root
    pub parent_udi: Option<Udi>,
    /// Manufacturer
    pub vendor: String,
    /// Model
    pub product: String,
    /// Icon name
    pub icon: String,
    /// Human readable description
    pub description: String,
    /// Supported capability kinds
    pub capabilities: Vec<CapabilityKind>,
}

impl Device {
    /// The synthetic device standing for the whole machine
    pub(crate) fn root(context: Arc<ViewContext>) -> Self {
        Self {
            udi: Udi::new(context.udi_prefix()),
            parent_udi: None,
            record: None,
            context,
        }
    }

    pub(crate) fn new(record: DeviceRecord, parent_udi: Udi, context: Arc<ViewContext>) -> Self {
        Self {
            udi: context.udi(&record),
            parent_udi: Some(parent_udi),
            record: Some(record),
            context,
        }
    }

    /// Identifier
    pub fn udi(&self) -> &Udi {
        &self.udi
    }

    /// Parent identifier; `None` only for the root
    pub fn parent_udi(&self) -> Option<&Udi> {
        self.parent_udi.as_ref()
    }

    /// Whether this is the synthetic root device
    pub fn is_root(&self) -> bool {
        self.record.is_none()
    }

    /// The record behind this device; `None` for the root
    pub fn record(&self) -> Option<&DeviceRecord> {
        self.record.as_ref()
    }

    /// Every capability kind this device supports
    pub fn capabilities(&self) -> BTreeSet<CapabilityKind> {
        self.record.as_ref().map(classify).unwrap_or_default()
    }

    /// Whether a `kind` view can be built
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        self.record.as_ref().is_some_and(|r| supports(r, kind))
    }

    /// Build a `kind` view, or `None` if unsupported
    pub fn interface(&self, kind: CapabilityKind) -> Option<CapabilityView> {
        create_view(self.record.as_ref()?, kind, &self.context)
    }

    /// Typed variant of [`interface`](Self::interface)
    ///
    /// ```ignore
    /// if let Some(battery) = device.as_interface::<Battery>() {
    ///     println!("{}%", battery.charge_percent());
    /// }
    /// ```
    pub fn as_interface<T: DeviceInterface>(&self) -> Option<T> {
        self.interface(T::KIND).and_then(T::from_view)
    }

    /// Manufacturer name, or empty
    pub fn vendor(&self) -> String {
        let Some(record) = &self.record else {
            return String::new();
        };

        let mut vendor = record.sysfs_attribute("manufacturer");
        if vendor.is_empty() {
            if let Some(processor) = self.as_interface::<Processor>() {
                // sysfs has nothing useful for CPUs
                vendor = processor
                    .number()
                    .map(|n| self.context.cpuinfo().extract_line(n, &VENDOR_PATTERN))
                    .unwrap_or_default();
            } else if self.supports(CapabilityKind::AudioInterface) {
                vendor = record
                    .parent()
                    .map(|p| p.property("ID_VENDOR_FROM_DATABASE").to_string())
                    .unwrap_or_default();
            }
        }
        first_non_empty(vendor, record, &["ID_VENDOR_FROM_DATABASE", "ID_VENDOR"])
    }

    /// Model name, or empty
    pub fn product(&self) -> String {
        let Some(record) = &self.record else {
            return "Devices".to_string();
        };

        let mut product = record.sysfs_attribute("product");
        if product.is_empty() {
            if let Some(processor) = self.as_interface::<Processor>() {
                product = processor
                    .number()
                    .map(|n| self.context.cpuinfo().extract_line(n, &MODEL_PATTERN))
                    .unwrap_or_default();
            } else if self.supports(CapabilityKind::Video) {
                product = record.property("ID_V4L_PRODUCT").to_string();
            } else if let Some(audio) = self.as_interface::<AudioInterface>() {
                product = audio.name();
            } else if let Some(net) = self.as_interface::<NetworkInterface>() {
                if net.is_loopback() {
                    product = "Loopback device Interface".to_string();
                }
            }
        }
        first_non_empty(product, record, &["ID_MODEL_FROM_DATABASE", "ID_MODEL"])
    }

    /// Icon name, or empty if nothing fits
    pub fn icon(&self) -> String {
        let Some(record) = &self.record else {
            return "computer".to_string();
        };

        let icon = if record.subsystem() == "power_supply" {
            if is_mains(record) {
                "preferences-system-power-management"
            } else {
                "battery"
            }
        } else if self.supports(CapabilityKind::Processor) {
            "cpu"
        } else if self.supports(CapabilityKind::OpticalDrive) {
            "drive-optical"
        } else if record.subsystem() == "block" {
            match record.property("ID_BUS") {
                "usb" => "drive-removable-media-usb",
                _ if record.property("ID_FS_USAGE") == "crypto" => "drive-encrypted",
                _ => "drive-harddisk",
            }
        } else if self.supports(CapabilityKind::PortableMediaPlayer) {
            "multimedia-player"
        } else if self.supports(CapabilityKind::Camera) {
            "camera-photo"
        } else if self.supports(CapabilityKind::Video) {
            "camera-web"
        } else if let Some(audio) = self.as_interface::<AudioInterface>() {
            match audio.soundcard_type() {
                SoundcardType::InternalSoundcard => "audio-card",
                SoundcardType::UsbSoundcard => "audio-card-usb",
                SoundcardType::FirewireSoundcard => "audio-card-firewire",
                SoundcardType::Headset => {
                    let usb = |s: &str| s.to_ascii_lowercase().contains("usb");
                    if usb(self.udi.as_str()) || usb(&audio.name()) {
                        "audio-headset-usb"
                    } else {
                        "audio-headset"
                    }
                }
                SoundcardType::Modem => "modem",
            }
        } else if let Some(net) = self.as_interface::<NetworkInterface>() {
            if net.is_wireless() {
                "network-wireless"
            } else {
                "network-wired"
            }
        } else if self.supports(CapabilityKind::Button) {
            "insert-button"
        } else {
            ""
        };
        icon.to_string()
    }

    /// Human readable description, or empty if nothing fits
    pub fn description(&self) -> String {
        let Some(record) = &self.record else {
            return "Computer".to_string();
        };

        if record.subsystem() == "power_supply" {
            if is_mains(record) {
                return "A/C Adapter".to_string();
            }
            return battery_description(record.property("POWER_SUPPLY_TECHNOLOGY")).to_string();
        }
        if self.supports(CapabilityKind::Processor) {
            return "Processor".to_string();
        }
        if self.supports(CapabilityKind::OpticalDrive) {
            return "Optical Drive".to_string();
        }
        if let Some(volume) = self.as_interface::<StorageVolume>() {
            if record.devtype() == "disk" {
                return "Storage Drive".to_string();
            }
            return match volume.usage() {
                UsageType::Encrypted => "Encrypted Container".to_string(),
                _ if !volume.label().is_empty() => volume.label().to_string(),
                _ => "Storage Volume".to_string(),
            };
        }
        if let Some(player) = self.as_interface::<PortableMediaPlayer>() {
            // MTP players name themselves better than any generic text.
            if player.supported_protocols().iter().any(|p| p == "mtp") {
                return self.product();
            }
            return "Portable Media Player".to_string();
        }
        if self.supports(CapabilityKind::Camera) {
            return "Camera".to_string();
        }
        if self.supports(CapabilityKind::Video) || self.supports(CapabilityKind::AudioInterface) {
            return self.product();
        }
        if let Some(net) = self.as_interface::<NetworkInterface>() {
            return if net.is_wireless() {
                "WLAN Interface".to_string()
            } else {
                "Networking Interface".to_string()
            };
        }
        if self.supports(CapabilityKind::SerialInterface) {
            return "Serial Port".to_string();
        }
        if self.supports(CapabilityKind::DvbInterface) {
            return "DVB Device".to_string();
        }
        if let Some(button) = self.as_interface::<Button>() {
            let text = match button.button_type() {
                ButtonType::LidButton => "Lid Switch",
                ButtonType::PowerButton => "Power Button",
                ButtonType::SleepButton => "Sleep Button",
                ButtonType::TabletButton => "Tablet Button",
                ButtonType::UnknownButtonType => "Unknown Button",
            };
            return text.to_string();
        }
        String::new()
    }

    /// Snapshot of the descriptive accessors
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            udi: self.udi.clone(),
            parent_udi: self.parent_udi.clone(),
            vendor: self.vendor(),
            product: self.product(),
            icon: self.icon(),
            description: self.description(),
            capabilities: self.capabilities().into_iter().collect(),
        }
    }
}

fn is_mains(record: &DeviceRecord) -> bool {
    record.property("POWER_SUPPLY_TYPE").eq_ignore_ascii_case("mains")
}

fn battery_description(technology: &str) -> &'static str {
    match technology {
        "NiMH" => "Nickel Metal Hydride Battery",
        "Li-ion" => "Lithium Ion Battery",
        "Li-poly" => "Lithium Polymer Battery",
        "LiFe" => "Lithium Iron Disulfide Battery",
        "NiCd" => "Nickel Cadmium Battery",
        "LiMn" => "Lithium Manganese Dioxide Battery",
        _ => "Unknown Battery",
    }
}

fn first_non_empty(value: String, record: &DeviceRecord, fallbacks: &[&str]) -> String {
    if !value.is_empty() {
        return value;
    }
    fallbacks
        .iter()
        .map(|key| record.property(key))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Harness, TEST_PREFIX};
    use crate::views::Battery;

    fn device(h: &Harness, path: &std::path::Path) -> Device {
        let record = h.record(path);
        Device::new(record, Udi::new(TEST_PREFIX), h.context.clone())
    }

    #[test]
    fn test_root_device() {
        let h = Harness::new();
        let root = Device::root(h.context.clone());

        assert!(root.is_root());
        assert!(root.udi().is_root(TEST_PREFIX));
        assert_eq!(root.parent_udi(), None);
        assert_eq!(root.product(), "Devices");
        assert_eq!(root.description(), "Computer");
        assert_eq!(root.icon(), "computer");
        assert!(root.capabilities().is_empty());
        assert!(root.interface(CapabilityKind::GenericInterface).is_none());
    }

    #[test]
    fn test_battery_description_and_typed_access() {
        let h = Harness::new();
        let path = h.fake.add_device(
            "devices/LNXSYSTM:00/PNP0C0A:00/power_supply/BAT0",
            "power_supply",
            None,
            &[
                ("POWER_SUPPLY_TYPE", "Battery"),
                ("POWER_SUPPLY_TECHNOLOGY", "Li-ion"),
                ("POWER_SUPPLY_CAPACITY", "81"),
                ("POWER_SUPPLY_MANUFACTURER", "ACME"),
            ],
        );
        let dev = device(&h, &path);

        assert_eq!(dev.icon(), "battery");
        assert_eq!(dev.description(), "Lithium Ion Battery");
        let battery = dev.as_interface::<Battery>().expect("battery view");
        assert_eq!(battery.charge_percent(), 81);
        assert!(dev.as_interface::<NetworkInterface>().is_none());
    }

    #[test]
    fn test_mains_supply_is_an_adapter() {
        let h = Harness::new();
        let path = h.fake.add_device(
            "devices/LNXSYSTM:00/ACPI0003:00/power_supply/AC",
            "power_supply",
            None,
            &[("POWER_SUPPLY_TYPE", "Mains"), ("POWER_SUPPLY_ONLINE", "1")],
        );
        let dev = device(&h, &path);

        assert_eq!(dev.icon(), "preferences-system-power-management");
        assert_eq!(dev.description(), "A/C Adapter");
    }

    #[test]
    fn test_vendor_and_product_fall_back_to_properties() {
        let h = Harness::new();
        let path = h.fake.add_device(
            "devices/pci0000:00/0000:00:1f.2/ata1/host0/target0:0:0/0:0:0:0/block/sda",
            "block",
            None,
            &[
                ("DEVTYPE", "disk"),
                ("DEVNAME", "/dev/sda"),
                ("ID_VENDOR", "ATA"),
                ("ID_MODEL", "SSD_860"),
                ("ID_MODEL_FROM_DATABASE", "Samsung SSD 860"),
            ],
        );
        let dev = device(&h, &path);

        assert_eq!(dev.vendor(), "ATA");
        assert_eq!(dev.product(), "Samsung SSD 860");
        assert_eq!(dev.icon(), "drive-harddisk");
        assert_eq!(dev.description(), "Storage Drive");
    }

    #[test]
    fn test_sysfs_manufacturer_wins() {
        let h = Harness::new();
        let path = h.fake.add_device(
            "devices/pci0000:00/0000:00:14.0/usb1/1-1",
            "usb",
            None,
            &[("ID_VENDOR", "fallback")],
        );
        h.fake.touch(&path, "manufacturer", "Logitech\n");
        h.fake.touch(&path, "product", "USB Receiver\n");
        let dev = device(&h, &path);

        assert_eq!(dev.vendor(), "Logitech");
        assert_eq!(dev.product(), "USB Receiver");
    }

    #[test]
    fn test_processor_names_come_from_cpuinfo() {
        let h = Harness::new();
        h.fake.write_cpuinfo(
            "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\n\n\
             processor\t: 1\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\n",
        );
        let path = h.fake.add_device("devices/system/cpu/cpu1", "cpu", Some("processor"), &[]);
        let dev = device(&h, &path);

        assert_eq!(dev.vendor(), "GenuineIntel");
        assert_eq!(dev.product(), "Intel(R) Core(TM) i7");
        assert_eq!(dev.icon(), "cpu");
        assert_eq!(dev.description(), "Processor");
    }

    #[test]
    fn test_network_descriptions() {
        let h = Harness::new();
        let lo = h.fake.add_device("devices/virtual/net/lo", "net", None, &[("INTERFACE", "lo")]);
        let wlan = h.fake.add_device(
            "devices/pci0000:00/0000:03:00.0/net/wlan0",
            "net",
            None,
            &[("INTERFACE", "wlan0"), ("DEVTYPE", "wlan")],
        );

        let lo = device(&h, &lo);
        assert_eq!(lo.product(), "Loopback device Interface");
        assert_eq!(lo.description(), "Networking Interface");

        let wlan = device(&h, &wlan);
        assert_eq!(wlan.icon(), "network-wireless");
        assert_eq!(wlan.description(), "WLAN Interface");
    }

    #[test]
    fn test_summary_serializes() {
        let h = Harness::new();
        let path = h.fake.add_device(
            "devices/LNXSYSTM:00/LNXPWRBN:00/input/input3",
            "input",
            None,
            &[("ID_INPUT_KEY", "1"), ("KEY", "10000000000000 0"), ("NAME", "\"Power Button\"")],
        );
        let summary = device(&h, &path).summary();

        assert_eq!(summary.icon, "insert-button");
        assert!(summary.capabilities.contains(&CapabilityKind::Button));
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["parent_udi"], TEST_PREFIX);
    }
}
