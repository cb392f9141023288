/*!
 * Batteries and mains adapters.
 *
 * Both views remember the values they last reported. Feeding each change
 * event of the device to [`Battery::apply`] or [`AcAdapter::apply`] swaps
 * in the new record and returns the quantities that moved, so the same view
 * instance must be kept for the lifetime of the device.
 */
use serde::Serialize;

use crate::record::DeviceRecord;
use crate::uevent::UEvent;

use super::ViewBase;

/// Kind of battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryType {
    /// Type string not in the table
    Unknown,
    /// System battery
    Primary,
    /// Uninterruptible power supply
    Ups,
    /// USB power delivery
    Usb,
    /// Wireless keyboard or mouse
    KeyboardMouse,
    /// Display
    Monitor,
    /// Phone
    Phone,
}

/// Charging direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeState {
    /// Idle, full or unknown
    NoCharge,
    /// Being charged
    Charging,
    /// Powering the system
    Discharging,
}

/// A battery quantity that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "quantity", content = "value", rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum BatteryChange {
    ChargePercent(i64),
    Capacity(i64),
    ChargeState(ChargeState),
    PowerSupplyState(bool),
    PlugState(bool),
}

/// An adapter quantity that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "quantity", content = "value", rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum AcAdapterChange {
    PlugState(bool),
}

const RECHARGEABLE: [&str; 5] = ["NiMH", "Li-ion", "Li-poly", "LiFe", "NiCd"];

fn is_plugged(record: &DeviceRecord) -> bool {
    record.value_int("POWER_SUPPLY_ONLINE") == 1
}

/// Whether `event` carries a newer snapshot of `current`
fn newer_snapshot<'a>(current: &DeviceRecord, event: &'a UEvent) -> Option<&'a DeviceRecord> {
    (event.record == *current).then_some(&event.record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatterySnapshot {
    charge_percent: i64,
    capacity: i64,
    charge_state: ChargeState,
    power_supply: bool,
    plugged: bool,
}

/// Battery state
#[derive(Debug, Clone)]
pub struct Battery {
    base: ViewBase,
    reported: BatterySnapshot,
}

view_common!(Battery);

impl Battery {
    fn from_base(base: ViewBase) -> Self {
        let mut battery = Self {
            base,
            reported: BatterySnapshot {
                charge_percent: 0,
                capacity: 0,
                charge_state: ChargeState::NoCharge,
                power_supply: false,
                plugged: false,
            },
        };
        battery.reported = battery.snapshot();
        battery
    }

    fn snapshot(&self) -> BatterySnapshot {
        BatterySnapshot {
            charge_percent: self.charge_percent(),
            capacity: self.capacity(),
            charge_state: self.charge_state(),
            power_supply: self.is_power_supply(),
            plugged: self.is_plugged(),
        }
    }

    /// Whether the supply is online
    pub fn is_plugged(&self) -> bool {
        is_plugged(&self.base.record)
    }

    /// Kind of battery, from `POWER_SUPPLY_TYPE`
    pub fn battery_type(&self) -> BatteryType {
        let kind = self.base.record.value("POWER_SUPPLY_TYPE").to_lowercase();
        match kind.as_str() {
            "battery" | "mains" => BatteryType::Primary,
            "ups" => BatteryType::Ups,
            "keyboard" | "mouse" => BatteryType::KeyboardMouse,
            "monitor" => BatteryType::Monitor,
            "phone" => BatteryType::Phone,
            k if k.contains("usb") => BatteryType::Usb,
            _ => BatteryType::Unknown,
        }
    }

    /// Charge level in percent (`POWER_SUPPLY_CAPACITY`)
    pub fn charge_percent(&self) -> i64 {
        self.base.record.value_int("POWER_SUPPLY_CAPACITY")
    }

    /// Design maximum voltage divided by the current voltage
    ///
    /// 0 when either voltage is missing or not positive.
    pub fn capacity(&self) -> i64 {
        let record = &self.base.record;
        let max = record.value_int("POWER_SUPPLY_VOLTAGE_MAX_DESIGN");
        let now = record.value_int("POWER_SUPPLY_VOLTAGE_NOW");
        if max <= 0 || now <= 0 {
            return 0;
        }
        max / now
    }

    /// Whether the chemistry is a rechargeable one
    pub fn is_rechargeable(&self) -> bool {
        let technology = self.base.record.value("POWER_SUPPLY_TECHNOLOGY");
        RECHARGEABLE.contains(&technology.as_str())
    }

    /// Whether the battery is currently powering the system
    pub fn is_power_supply(&self) -> bool {
        self.charge_state() == ChargeState::Discharging
    }

    /// Charging direction, from `POWER_SUPPLY_STATUS`
    pub fn charge_state(&self) -> ChargeState {
        match self.base.record.value("POWER_SUPPLY_STATUS").to_lowercase().as_str() {
            "charging" => ChargeState::Charging,
            "discharging" => ChargeState::Discharging,
            _ => ChargeState::NoCharge,
        }
    }

    /// Chemistry string, e.g. "Li-ion"
    pub fn technology(&self) -> String {
        self.base.record.value("POWER_SUPPLY_TECHNOLOGY")
    }

    /// Take the record of a change event and report what moved
    ///
    /// Events for other devices are ignored.
    pub fn apply(&mut self, event: &UEvent) -> Vec<BatteryChange> {
        let Some(record) = newer_snapshot(&self.base.record, event) else {
            return Vec::new();
        };
        self.base.record = record.clone();

        let previous = self.reported;
        let current = self.snapshot();
        self.reported = current;

        let mut changes = Vec::new();
        if previous.charge_percent != current.charge_percent {
            changes.push(BatteryChange::ChargePercent(current.charge_percent));
        }
        if previous.capacity != current.capacity {
            changes.push(BatteryChange::Capacity(current.capacity));
        }
        if previous.charge_state != current.charge_state {
            changes.push(BatteryChange::ChargeState(current.charge_state));
        }
        if previous.power_supply != current.power_supply {
            changes.push(BatteryChange::PowerSupplyState(current.power_supply));
        }
        if previous.plugged != current.plugged {
            changes.push(BatteryChange::PlugState(current.plugged));
        }
        changes
    }
}

/// Mains adapter state
#[derive(Debug, Clone)]
pub struct AcAdapter {
    base: ViewBase,
    reported_plugged: bool,
}

view_common!(AcAdapter);

impl AcAdapter {
    fn from_base(base: ViewBase) -> Self {
        let reported_plugged = is_plugged(&base.record);
        Self { base, reported_plugged }
    }

    /// Whether the adapter is online (`POWER_SUPPLY_ONLINE` == 1)
    pub fn is_plugged(&self) -> bool {
        is_plugged(&self.base.record)
    }

    /// Take the record of a change event and report what moved
    pub fn apply(&mut self, event: &UEvent) -> Vec<AcAdapterChange> {
        let Some(record) = newer_snapshot(&self.base.record, event) else {
            return Vec::new();
        };
        self.base.record = record.clone();

        let plugged = self.is_plugged();
        if plugged == self.reported_plugged {
            return Vec::new();
        }
        self.reported_plugged = plugged;
        vec![AcAdapterChange::PlugState(plugged)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CapabilityKind;
    use crate::testutil::Harness;
    use crate::uevent::Action;
    use crate::views::DeviceInterface;
    use std::path::Path;

    const BAT0: &str = "devices/LNXSYSTM:00/device:00/PNP0C0A:00/power_supply/BAT0";

    fn battery(h: &Harness, props: &[(&str, &str)]) -> Battery {
        let path = h.fake.add_device(BAT0, "power_supply", None, props);
        h.view(&path, CapabilityKind::Battery).and_then(Battery::from_view).expect("battery view")
    }

    fn change(h: &Harness, syspath: &str, props: &[(&str, &str)]) -> UEvent {
        let record = DeviceRecord::builder(syspath)
            .subsystem("power_supply")
            .properties(props.iter().copied())
            .sysfs(h.fake.sysfs())
            .build();
        UEvent::new(Action::Change, record)
    }

    #[test]
    fn test_scenario_ac_adapter_plugged() {
        let h = Harness::new();
        let path = h.fake.add_device("devices/LNXSYSTM:00/ACPI0003:00/power_supply/AC", "power_supply", None, &[("POWER_SUPPLY_ONLINE", "1")]);
        let ac = h.view(&path, AcAdapter::KIND).and_then(AcAdapter::from_view).expect("ac view");
        assert!(ac.is_plugged());
    }

    #[test]
    fn test_battery_accessors() {
        let h = Harness::new();
        let bat = battery(
            &h,
            &[
                ("POWER_SUPPLY_TYPE", "Battery"),
                ("POWER_SUPPLY_STATUS", "Discharging"),
                ("POWER_SUPPLY_CAPACITY", "87"),
                ("POWER_SUPPLY_TECHNOLOGY", "Li-ion"),
                ("POWER_SUPPLY_VOLTAGE_MAX_DESIGN", "12600000"),
                ("POWER_SUPPLY_VOLTAGE_NOW", "6300000"),
            ],
        );
        assert_eq!(bat.battery_type(), BatteryType::Primary);
        assert_eq!(bat.charge_state(), ChargeState::Discharging);
        assert!(bat.is_power_supply());
        assert_eq!(bat.charge_percent(), 87);
        assert_eq!(bat.capacity(), 2);
        assert!(bat.is_rechargeable());
        assert!(!bat.is_plugged());
    }

    #[test]
    fn test_battery_defaults_on_missing_properties() {
        let h = Harness::new();
        let bat = battery(&h, &[("POWER_SUPPLY_VOLTAGE_MAX_DESIGN", "12600000"), ("POWER_SUPPLY_VOLTAGE_NOW", "0")]);
        assert_eq!(bat.capacity(), 0);
        assert_eq!(bat.charge_percent(), 0);
        assert_eq!(bat.battery_type(), BatteryType::Unknown);
        assert_eq!(bat.charge_state(), ChargeState::NoCharge);
        assert!(!bat.is_rechargeable());
    }

    #[test]
    fn test_battery_type_table() {
        let h = Harness::new();
        for (raw, expected) in [
            ("UPS", BatteryType::Ups),
            ("USB_PD", BatteryType::Usb),
            ("Mains", BatteryType::Primary),
            ("Wireless", BatteryType::Unknown),
        ] {
            let record = DeviceRecord::builder(format!("/sys/{}", raw)).subsystem("power_supply").property("POWER_SUPPLY_TYPE", raw).build();
            assert_eq!(Battery::new(&record, &h.context).battery_type(), expected, "{raw}");
        }
    }

    #[test]
    fn test_charge_state_unknown_strings() {
        let h = Harness::new();
        for status in ["Full", "Not charging", "Unknown", "stable"] {
            let record = DeviceRecord::builder("/sys/x/BAT1").subsystem("power_supply").property("POWER_SUPPLY_STATUS", status).build();
            assert_eq!(Battery::new(&record, &h.context).charge_state(), ChargeState::NoCharge);
        }
    }

    #[test]
    fn test_battery_apply_reports_deltas() {
        let h = Harness::new();
        let mut bat = battery(&h, &[("POWER_SUPPLY_CAPACITY", "50"), ("POWER_SUPPLY_STATUS", "Charging"), ("POWER_SUPPLY_ONLINE", "1")]);
        let syspath = bat.record().syspath().to_string();

        let unchanged = change(&h, &syspath, &[("POWER_SUPPLY_CAPACITY", "50"), ("POWER_SUPPLY_STATUS", "Charging"), ("POWER_SUPPLY_ONLINE", "1")]);
        assert!(bat.apply(&unchanged).is_empty());

        let unplugged = change(&h, &syspath, &[("POWER_SUPPLY_CAPACITY", "49"), ("POWER_SUPPLY_STATUS", "Discharging"), ("POWER_SUPPLY_ONLINE", "0")]);
        assert_eq!(
            bat.apply(&unplugged),
            vec![
                BatteryChange::ChargePercent(49),
                BatteryChange::ChargeState(ChargeState::Discharging),
                BatteryChange::PowerSupplyState(true),
                BatteryChange::PlugState(false),
            ]
        );
        assert_eq!(bat.charge_percent(), 49);

        let other = change(&h, "/sys/devices/other/BAT1", &[("POWER_SUPPLY_CAPACITY", "10")]);
        assert!(bat.apply(&other).is_empty());
        assert_eq!(bat.charge_percent(), 49);
    }

    #[test]
    fn test_ac_adapter_apply() {
        let h = Harness::new();
        let path = h.fake.add_device("devices/LNXSYSTM:00/ACPI0003:00/power_supply/AC", "power_supply", None, &[("POWER_SUPPLY_ONLINE", "0")]);
        let mut ac = h.view(Path::new(&path), CapabilityKind::AcAdapter).and_then(AcAdapter::from_view).expect("ac");
        let syspath = ac.record().syspath().to_string();

        assert_eq!(ac.apply(&change(&h, &syspath, &[("POWER_SUPPLY_ONLINE", "1")])), vec![AcAdapterChange::PlugState(true)]);
        assert!(ac.apply(&change(&h, &syspath, &[("POWER_SUPPLY_ONLINE", "1")])).is_empty());
        assert!(ac.is_plugged());
    }
}
