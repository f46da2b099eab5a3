use std::collections::HashMap;
use std::time::Instant;

use crate::reconcile::Keyed;
use crate::signal::{RssiSmoother, SignalConverter};
use crate::Uuid;

/// A platform-specific device identifier (a MAC address on most platforms, a UUID on Apple platforms).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    /// The identifier as reported by the platform.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId::new(id)
    }
}

/// Manufacturer specific data included in Bluetooth advertisements. See the Bluetooth Core Specification Supplement
/// §A.1.4 for details.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManufacturerData {
    /// Company identifier (defined [here](https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers/))
    pub company_id: u16,
    /// Manufacturer specific data
    pub data: Vec<u8>,
}

/// Data included in a Bluetooth advertisement or scan reponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementData {
    /// The (possibly shortened) local name of the device (CSS §A.1.2)
    pub local_name: Option<String>,
    /// Manufacturer specific data (CSS §A.1.4)
    pub manufacturer_data: Option<ManufacturerData>,
    /// Advertised GATT service UUIDs (CSS §A.1.1)
    pub services: Vec<Uuid>,
    /// Service associated data (CSS §A.1.11)
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Transmitted power level (CSS §A.1.5)
    pub tx_power_level: Option<i16>,
    /// Set to true for connectable advertising packets
    pub is_connectable: bool,
}

/// One advertisement packet as surfaced by the native scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// The source of the advertisement
    pub device: DeviceId,
    /// The advertisement data
    pub data: AdvertisementData,
    /// The signal strength in dBm of the received packet
    pub rssi: i16,
}

/// A remote device observed by the scanner.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    name: Option<String>,
    raw_rssi: i16,
    smoothed_rssi: f64,
    signal_strength: f64,
    last_seen: Instant,
    manufacturer_data: Option<ManufacturerData>,
    services: Vec<Uuid>,
    is_connectable: bool,
    smoother: RssiSmoother,
}

impl Device {
    /// Creates a device from its first advertisement.
    pub(crate) fn from_advertisement(
        adv: &Advertisement,
        smoothing: f64,
        converter: &mut SignalConverter,
        now: Instant,
    ) -> Self {
        let mut device = Device {
            id: adv.device.clone(),
            name: None,
            raw_rssi: adv.rssi,
            smoothed_rssi: f64::from(adv.rssi),
            signal_strength: 0.0,
            last_seen: now,
            manufacturer_data: None,
            services: Vec::new(),
            is_connectable: false,
            smoother: RssiSmoother::new(smoothing),
        };
        device.observe(adv, converter, now);
        device
    }

    /// Folds a later advertisement into this device.
    ///
    /// Fields missing from the new packet (name, manufacturer data) keep their previous values since scan
    /// responses and advertisements often carry different subsets.
    pub(crate) fn observe(&mut self, adv: &Advertisement, converter: &mut SignalConverter, now: Instant) {
        self.raw_rssi = adv.rssi;
        self.smoothed_rssi = self.smoother.update(adv.rssi);
        self.signal_strength = converter.convert(self.smoothed_rssi);
        self.last_seen = now;
        if let Some(name) = adv.data.local_name.as_ref().filter(|n| !n.is_empty()) {
            self.name = Some(name.clone());
        }
        if adv.data.manufacturer_data.is_some() {
            self.manufacturer_data = adv.data.manufacturer_data.clone();
        }
        for service in &adv.data.services {
            if !self.services.contains(service) {
                self.services.push(*service);
            }
        }
        self.is_connectable = adv.data.is_connectable;
    }

    /// Re-derives the signal strength after the converter's bounds moved.
    pub(crate) fn rescale(&mut self, converter: &mut SignalConverter) {
        self.signal_strength = converter.convert(self.smoothed_rssi);
    }

    /// This device's unique identifier
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// The advertised local name, if any advertisement carried one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// RSSI of the most recent advertisement in dBm
    pub fn raw_rssi(&self) -> i16 {
        self.raw_rssi
    }

    /// Smoothed RSSI in dBm
    pub fn smoothed_rssi(&self) -> f64 {
        self.smoothed_rssi
    }

    /// Normalized signal strength in `[0, 1]`
    pub fn signal_strength(&self) -> f64 {
        self.signal_strength
    }

    /// When the device last advertised
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// The most recent manufacturer data
    pub fn manufacturer_data(&self) -> Option<&ManufacturerData> {
        self.manufacturer_data.as_ref()
    }

    /// Every service UUID the device has advertised
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }

    /// Whether the last advertisement was connectable
    pub fn is_connectable(&self) -> bool {
        self.is_connectable
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.raw_rssi == other.raw_rssi
            && self.smoothed_rssi == other.smoothed_rssi
            && self.manufacturer_data == other.manufacturer_data
            && self.services == other.services
            && self.is_connectable == other.is_connectable
    }
}

impl Keyed for Device {
    type Key = DeviceId;

    fn key(&self) -> DeviceId {
        self.id.clone()
    }
}

/// A central connected to the local broadcaster.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Client {
    /// The central's identifier
    pub id: DeviceId,
    /// The negotiated ATT MTU, if known
    pub mtu: Option<u16>,
}

impl Keyed for Client {
    type Key = DeviceId;

    fn key(&self) -> DeviceId {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(name: Option<&str>, rssi: i16) -> Advertisement {
        Advertisement {
            device: DeviceId::new("11:22:33:44:55:66"),
            data: AdvertisementData {
                local_name: name.map(str::to_owned),
                ..Default::default()
            },
            rssi,
        }
    }

    #[test]
    fn keeps_name_from_earlier_packet() {
        let mut conv = SignalConverter::default();
        let now = Instant::now();
        let mut device = Device::from_advertisement(&adv(Some("thermo"), -70), 0.5, &mut conv, now);
        device.observe(&adv(None, -50), &mut conv, now);
        assert_eq!(device.name(), Some("thermo"));
        assert_eq!(device.raw_rssi(), -50);
        assert_eq!(device.smoothed_rssi(), -60.0);
        assert!((device.signal_strength() - 40.0 / 70.0).abs() < 1e-9);
    }
}
