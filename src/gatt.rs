//! GATT handles and the native transport capability consumed by characteristic access.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{DeviceId, Result, Uuid};

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expands a 16-bit SIG-assigned number into a full Bluetooth UUID.
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// GATT characteristic properties as defined in the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
#[allow(missing_docs)]
#[non_exhaustive]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Decodes the properties octet of a characteristic declaration.
    pub fn from_bits(bits: u8) -> Self {
        let bit = |n: u8| bits & (1 << n) != 0;
        CharacteristicProperties {
            broadcast: bit(0),
            read: bit(1),
            write_without_response: bit(2),
            write: bit(3),
            notify: bit(4),
            indicate: bit(5),
            authenticated_signed_writes: bit(6),
            extended_properties: bit(7),
        }
    }

    /// Encodes the properties octet of a characteristic declaration.
    pub fn to_bits(self) -> u8 {
        u8::from(self.broadcast)
            | (u8::from(self.read) << 1)
            | (u8::from(self.write_without_response) << 2)
            | (u8::from(self.write) << 3)
            | (u8::from(self.notify) << 4)
            | (u8::from(self.indicate) << 5)
            | (u8::from(self.authenticated_signed_writes) << 6)
            | (u8::from(self.extended_properties) << 7)
    }

    /// Whether values can be pushed by the remote (notify or indicate).
    pub fn can_subscribe(self) -> bool {
        self.notify || self.indicate
    }

    /// The write procedure to use, preferring acknowledged writes. `None` if the characteristic is not writable.
    pub fn write_kind(self) -> Option<WriteKind> {
        if self.write {
            Some(WriteKind::WithResponse)
        } else if self.write_without_response {
            Some(WriteKind::WithoutResponse)
        } else {
            None
        }
    }
}

/// How a value is written to a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Acknowledged write; completes once the remote confirms
    WithResponse,
    /// Fire-and-forget write command
    WithoutResponse,
}

/// An opaque reference to a characteristic resolved by the native layer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// The service that owns the characteristic
    pub service: Uuid,
    /// The characteristic type
    pub uuid: Uuid,
    /// Capability flags
    pub properties: CharacteristicProperties,
}

impl crate::reconcile::Keyed for CharacteristicHandle {
    type Key = Uuid;

    fn key(&self) -> Uuid {
        self.uuid
    }
}

/// The platform GATT client.
///
/// Every method receives a [`CancellationToken`]. Callers race each operation against a timeout and drop the
/// future of the loser; implementations should additionally stop any platform work once the token fires.
#[async_trait]
pub trait NativeGatt: Send + Sync {
    /// Looks up a characteristic by type on a connected device, whichever service it lives in.
    ///
    /// Returns `Ok(None)` when the device does not expose it.
    async fn find_characteristic(
        &self,
        device: &DeviceId,
        characteristic: Uuid,
        cancel: CancellationToken,
    ) -> Result<Option<CharacteristicHandle>>;

    /// Lists the characteristics of `service` on a connected device.
    async fn discover_characteristics(
        &self,
        device: &DeviceId,
        service: Uuid,
        cancel: CancellationToken,
    ) -> Result<Vec<CharacteristicHandle>>;

    /// Reads the current value of a characteristic from the device.
    async fn read(&self, device: &DeviceId, handle: &CharacteristicHandle, cancel: CancellationToken)
        -> Result<Vec<u8>>;

    /// Writes `value` using the given procedure.
    async fn write(
        &self,
        device: &DeviceId,
        handle: &CharacteristicHandle,
        value: &[u8],
        kind: WriteKind,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Enables or disables notifications/indications.
    async fn set_notify(
        &self,
        device: &DeviceId,
        handle: &CharacteristicHandle,
        enabled: bool,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bits_round_trip() {
        let props = CharacteristicProperties::from_bits(0b0001_1010);
        assert!(props.read && props.write && props.notify);
        assert!(!props.write_without_response);
        assert_eq!(props.to_bits(), 0b0001_1010);
        assert_eq!(props.write_kind(), Some(WriteKind::WithResponse));
        assert!(props.can_subscribe());
    }

    #[test]
    fn write_kind_falls_back_to_command() {
        let props = CharacteristicProperties::from_bits(0b0000_0100);
        assert_eq!(props.write_kind(), Some(WriteKind::WithoutResponse));
        assert_eq!(CharacteristicProperties::default().write_kind(), None);
    }

    #[test]
    fn short_uuid_expands() {
        assert_eq!(uuid16(0x2a19).to_string(), "00002a19-0000-1000-8000-00805f9b34fb");
    }
}
