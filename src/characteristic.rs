//! Typed, concurrency-controlled access to one characteristic across many devices.
//!
//! A [`CharacteristicAccess`] pairs a characteristic type (and the service it is expected in) with a [`Codec`].
//! Operations are keyed by device; each key has its own gate, so work on different devices runs in parallel while
//! work on the same device is serialized. At most one read per key is ever in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::AccessConfig;
use crate::error::{CharacteristicErrorKind, ErrorKind};
use crate::events::{CharacteristicEvent, EventHub};
use crate::gatt::{CharacteristicHandle, NativeGatt};
use crate::util::{defer, lock, race, Race};
use crate::{DeviceId, Error, Result, Uuid};

/// Converts between characteristic values and their byte representation.
pub trait Codec: Send + Sync + 'static {
    /// The type produced by reads and notifications
    type Read: Clone + Send + Sync + 'static;
    /// The type accepted by writes
    type Write: ?Sized + Sync;

    /// Serializes a value for writing.
    fn encode(&self, value: &Self::Write) -> Result<Vec<u8>>;

    /// Parses a value read from the device.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Read>;
}

fn decode_error(message: String) -> Error {
    Error::new(ErrorKind::Characteristic(CharacteristicErrorKind::Decode), message)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| decode_error(format!("expected {N} bytes, got {}", bytes.len())))
}

/// Passes bytes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBytes;

impl Codec for RawBytes {
    type Read = Vec<u8>;
    type Write = [u8];

    fn encode(&self, value: &[u8]) -> Result<Vec<u8>> {
        Ok(value.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings, such as the Device Name characteristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8;

impl Codec for Utf8 {
    type Read = String;
    type Write = str;

    fn encode(&self, value: &str) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|err| Error::with_source(ErrorKind::Characteristic(CharacteristicErrorKind::Decode), err))
    }
}

/// A single octet, such as the Battery Level characteristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct U8;

impl Codec for U8 {
    type Read = u8;
    type Write = u8;

    fn encode(&self, value: &u8) -> Result<Vec<u8>> {
        Ok(vec![*value])
    }

    fn decode(&self, bytes: &[u8]) -> Result<u8> {
        fixed::<1>(bytes).map(|[b]| b)
    }
}

/// A little-endian `u16`, the byte order used by GATT.
#[derive(Debug, Default, Clone, Copy)]
pub struct U16Le;

impl Codec for U16Le {
    type Read = u16;
    type Write = u16;

    fn encode(&self, value: &u16) -> Result<Vec<u8>> {
        Ok(value.to_le_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<u16> {
        fixed::<2>(bytes).map(u16::from_le_bytes)
    }
}

/// A point-in-time view of the access state for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicAccessSession<T> {
    /// The remote device
    pub device: DeviceId,
    /// The expected service
    pub service: Uuid,
    /// The characteristic type
    pub characteristic: Uuid,
    /// Whether a read is currently in flight
    pub in_flight_read: bool,
    /// The most recently read or notified value
    pub last_value: Option<T>,
    /// When `last_value` was received
    pub last_read_at: Option<Instant>,
    /// Whether notifications are enabled
    pub subscribed: bool,
}

struct SlotState<T> {
    in_flight_read: bool,
    last_value: Option<T>,
    last_read_at: Option<Instant>,
    subscribed: bool,
    handle: Option<CharacteristicHandle>,
}

struct Slot<T> {
    gate: async_lock::Mutex<()>,
    state: Mutex<SlotState<T>>,
}

/// Reads, writes and subscribes to one characteristic type on any number of devices.
pub struct CharacteristicAccess<C: Codec> {
    gatt: Arc<dyn NativeGatt>,
    service: Uuid,
    characteristic: Uuid,
    codec: C,
    config: AccessConfig,
    slots: Mutex<HashMap<DeviceId, Arc<Slot<C::Read>>>>,
    events: EventHub<CharacteristicEvent<C::Read>>,
}

impl<C: Codec> std::fmt::Debug for CharacteristicAccess<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacteristicAccess")
            .field("service", &self.service)
            .field("characteristic", &self.characteristic)
            .field("devices", &lock(&self.slots).len())
            .finish()
    }
}

impl<C: Codec> CharacteristicAccess<C> {
    /// Creates access to `characteristic`, which is expected to live in `service`.
    pub fn new(gatt: Arc<dyn NativeGatt>, service: Uuid, characteristic: Uuid, codec: C, config: AccessConfig) -> Self {
        CharacteristicAccess {
            gatt,
            service,
            characteristic,
            codec,
            events: EventHub::new(config.event_capacity),
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The expected service
    pub fn service(&self) -> Uuid {
        self.service
    }

    /// The characteristic type
    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// A stream of subscription and value notifications for every device.
    pub fn events(&self) -> impl Stream<Item = CharacteristicEvent<C::Read>> + Send + Unpin + 'static {
        self.events.subscribe()
    }

    /// Returns `true` if the device exposes the characteristic.
    ///
    /// Never fails: lookup errors, timeouts and cancellation all yield `false`. A characteristic found under an
    /// unexpected service still counts as present; [`get_characteristic`][Self::get_characteristic] reports the
    /// mismatch.
    pub async fn has_characteristic(&self, device: &DeviceId, timeout: Duration, cancel: &CancellationToken) -> bool {
        let native_cancel = cancel.child_token();
        let outcome = race(
            self.gatt
                .find_characteristic(device, self.characteristic, native_cancel.clone()),
            timeout,
            cancel,
        )
        .await;
        native_cancel.cancel();
        match outcome {
            Race::Completed(Ok(found)) => found.is_some(),
            Race::Completed(Err(err)) => {
                debug!(%device, characteristic = %self.characteristic, error = %err, "presence probe failed");
                false
            }
            Race::TimedOut | Race::Cancelled => {
                debug!(%device, characteristic = %self.characteristic, "presence probe did not complete");
                false
            }
        }
    }

    /// Resolves the characteristic on `device`.
    ///
    /// # Errors
    ///
    /// [`NotFound`][CharacteristicErrorKind::NotFound] if the device does not expose it,
    /// [`FoundInWrongService`][CharacteristicErrorKind::FoundInWrongService] if it lives under a different service.
    pub async fn get_characteristic(
        &self,
        device: &DeviceId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CharacteristicHandle> {
        let native_cancel = cancel.child_token();
        let outcome = race(self.lookup(device, native_cancel.clone()), timeout, cancel).await;
        if matches!(outcome, Race::TimedOut) {
            native_cancel.cancel();
        }
        let handle = outcome
            .into_result()
            .and_then(|x| x)
            .map_err(|err| self.annotate(err, device))?;
        lock(&self.slot(device).state).handle = Some(handle.clone());
        Ok(handle)
    }

    /// Returns `true` if the characteristic exists and is readable. Never fails.
    pub async fn can_read(&self, device: &DeviceId) -> bool {
        self.probe(device, |handle| handle.properties.read).await
    }

    /// Returns `true` if the characteristic exists and is writable. Never fails.
    pub async fn can_write(&self, device: &DeviceId) -> bool {
        self.probe(device, |handle| handle.properties.write_kind().is_some())
            .await
    }

    /// Reads and decodes the value.
    ///
    /// With `use_cached`, a previously read or notified value is returned without touching the device.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`AlreadyReading`][CharacteristicErrorKind::AlreadyReading] if another read of the
    /// same device is in flight.
    pub async fn read(
        &self,
        device: &DeviceId,
        use_cached: bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<C::Read> {
        let slot = self.slot(device);
        {
            let mut state = lock(&slot.state);
            if use_cached {
                if let Some(value) = &state.last_value {
                    trace!(%device, characteristic = %self.characteristic, "returning cached value");
                    return Ok(value.clone());
                }
            }
            if state.in_flight_read {
                return Err(self.annotate(CharacteristicErrorKind::AlreadyReading.into(), device));
            }
            state.in_flight_read = true;
        }
        let _in_flight = defer(|| lock(&slot.state).in_flight_read = false);

        let native_cancel = cancel.child_token();
        let outcome = race(
            async {
                let _gate = slot.gate.lock().await;
                let handle = self.resolve(device, &slot, native_cancel.clone()).await?;
                if !handle.properties.read {
                    return Err(Error::new(ErrorKind::NotSupported, "characteristic is not readable"));
                }
                self.gatt.read(device, &handle, native_cancel.clone()).await
            },
            timeout,
            cancel,
        )
        .await;
        if matches!(outcome, Race::TimedOut) {
            native_cancel.cancel();
        }
        let bytes = outcome
            .into_result()
            .and_then(|x| x)
            .map_err(|err| self.annotate(err, device))?;

        let value = self.codec.decode(&bytes).map_err(|err| self.annotate(err, device))?;
        let mut state = lock(&slot.state);
        state.last_value = Some(value.clone());
        state.last_read_at = Some(Instant::now());
        Ok(value)
    }

    /// Encodes and writes `value`.
    ///
    /// Uses an acknowledged write when the characteristic supports one and a write command otherwise. Writes to the
    /// same device queue behind each other and behind any read in progress.
    pub async fn write(
        &self,
        device: &DeviceId,
        value: &C::Write,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bytes = self.codec.encode(value).map_err(|err| self.annotate(err, device))?;
        let slot = self.slot(device);

        let native_cancel = cancel.child_token();
        let outcome = race(
            async {
                let _gate = slot.gate.lock().await;
                let handle = self.resolve(device, &slot, native_cancel.clone()).await?;
                let kind = handle
                    .properties
                    .write_kind()
                    .ok_or_else(|| Error::new(ErrorKind::NotSupported, "characteristic is not writable"))?;
                trace!(%device, characteristic = %self.characteristic, ?kind, len = bytes.len(), "writing");
                self.gatt
                    .write(device, &handle, &bytes, kind, native_cancel.clone())
                    .await
            },
            timeout,
            cancel,
        )
        .await;
        if matches!(outcome, Race::TimedOut) {
            native_cancel.cancel();
        }
        outcome
            .into_result()
            .and_then(|x| x)
            .map_err(|err| self.annotate(err, device))
    }

    /// Enables notifications or indications from `device`.
    ///
    /// Does nothing if already subscribed.
    pub async fn subscribe(&self, device: &DeviceId, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        self.set_subscribed(device, true, timeout, cancel).await
    }

    /// Disables notifications or indications from `device`.
    pub async fn unsubscribe(&self, device: &DeviceId, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        self.set_subscribed(device, false, timeout, cancel).await
    }

    /// Native callback for a value pushed by the device or delivered for a pending read.
    ///
    /// The value is accepted only while subscribed or while a read is in flight; it is then cached and published as
    /// [`CharacteristicEvent::ValueChanged`].
    ///
    /// # Errors
    ///
    /// [`UnexpectedRead`][CharacteristicErrorKind::UnexpectedRead] for values nobody asked for.
    pub fn handle_notification(&self, device: &DeviceId, bytes: &[u8]) -> Result<C::Read> {
        let slot = lock(&self.slots).get(device).cloned();
        let expected = slot.as_ref().map_or(false, |slot| {
            let state = lock(&slot.state);
            state.subscribed || state.in_flight_read
        });
        let slot = match slot {
            Some(slot) if expected => slot,
            _ => {
                debug!(%device, characteristic = %self.characteristic, "dropping unsolicited value");
                return Err(self.annotate(CharacteristicErrorKind::UnexpectedRead.into(), device));
            }
        };

        let value = self.codec.decode(bytes).map_err(|err| self.annotate(err, device))?;
        {
            let mut state = lock(&slot.state);
            state.last_value = Some(value.clone());
            state.last_read_at = Some(Instant::now());
        }
        self.events.emit(CharacteristicEvent::ValueChanged {
            device: device.clone(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// The access state for `device`, or `None` if it has never been accessed.
    pub fn session(&self, device: &DeviceId) -> Option<CharacteristicAccessSession<C::Read>> {
        let slot = lock(&self.slots).get(device).cloned()?;
        let state = lock(&slot.state);
        Some(CharacteristicAccessSession {
            device: device.clone(),
            service: self.service,
            characteristic: self.characteristic,
            in_flight_read: state.in_flight_read,
            last_value: state.last_value.clone(),
            last_read_at: state.last_read_at,
            subscribed: state.subscribed,
        })
    }

    /// Drops the cached value and resolved handle for `device`, e.g. after it disconnects.
    ///
    /// The device is forgotten entirely unless it is subscribed or an operation on it is still running.
    pub fn invalidate(&self, device: &DeviceId) {
        let mut slots = lock(&self.slots);
        let forget = match slots.get(device) {
            Some(slot) => {
                let mut state = lock(&slot.state);
                state.last_value = None;
                state.last_read_at = None;
                state.handle = None;
                // operations in progress hold their own reference to the slot
                !state.in_flight_read && !state.subscribed && Arc::strong_count(slot) == 1
            }
            None => false,
        };
        if forget {
            slots.remove(device);
        }
    }

    async fn set_subscribed(
        &self,
        device: &DeviceId,
        enabled: bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let slot = self.slot(device);
        let native_cancel = cancel.child_token();
        let outcome = race(
            async {
                let _gate = slot.gate.lock().await;
                if lock(&slot.state).subscribed == enabled {
                    return Ok(false);
                }
                let handle = self.resolve(device, &slot, native_cancel.clone()).await?;
                if !handle.properties.can_subscribe() {
                    return Err(Error::new(
                        ErrorKind::NotSupported,
                        "characteristic supports neither notify nor indicate",
                    ));
                }
                self.gatt
                    .set_notify(device, &handle, enabled, native_cancel.clone())
                    .await?;
                lock(&slot.state).subscribed = enabled;
                Ok::<_, Error>(true)
            },
            timeout,
            cancel,
        )
        .await;
        if matches!(outcome, Race::TimedOut) {
            native_cancel.cancel();
        }
        let changed = outcome
            .into_result()
            .and_then(|x| x)
            .map_err(|err| self.annotate(err, device))?;
        if changed {
            debug!(%device, characteristic = %self.characteristic, subscribed = enabled, "subscription changed");
            self.events.emit(CharacteristicEvent::SubscriptionChanged {
                device: device.clone(),
                subscribed: enabled,
            });
        }
        Ok(())
    }

    async fn probe(&self, device: &DeviceId, check: impl FnOnce(&CharacteristicHandle) -> bool) -> bool {
        match self
            .get_characteristic(device, self.config.probe_timeout, &CancellationToken::new())
            .await
        {
            Ok(handle) => check(&handle),
            Err(err) => {
                debug!(%device, characteristic = %self.characteristic, error = %err, "capability probe failed");
                false
            }
        }
    }

    async fn resolve(
        &self,
        device: &DeviceId,
        slot: &Slot<C::Read>,
        cancel: CancellationToken,
    ) -> Result<CharacteristicHandle> {
        let cached = lock(&slot.state).handle.clone();
        if let Some(handle) = cached {
            return Ok(handle);
        }
        let handle = self.lookup(device, cancel).await?;
        lock(&slot.state).handle = Some(handle.clone());
        Ok(handle)
    }

    async fn lookup(&self, device: &DeviceId, cancel: CancellationToken) -> Result<CharacteristicHandle> {
        let handle = self
            .gatt
            .find_characteristic(device, self.characteristic, cancel)
            .await?
            .ok_or_else(|| Error::from(CharacteristicErrorKind::NotFound))?;
        if handle.service != self.service {
            return Err(Error::new(
                ErrorKind::Characteristic(CharacteristicErrorKind::FoundInWrongService),
                format!("found under service {}", handle.service),
            ));
        }
        Ok(handle)
    }

    fn slot(&self, device: &DeviceId) -> Arc<Slot<C::Read>> {
        lock(&self.slots)
            .entry(device.clone())
            .or_insert_with(|| {
                Arc::new(Slot {
                    gate: async_lock::Mutex::new(()),
                    state: Mutex::new(SlotState {
                        in_flight_read: false,
                        last_value: None,
                        last_read_at: None,
                        subscribed: false,
                        handle: None,
                    }),
                })
            })
            .clone()
    }

    fn annotate(&self, err: Error, device: &DeviceId) -> Error {
        err.for_device(device)
            .for_characteristic(self.service, self.characteristic)
    }
}
