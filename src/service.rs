use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use crate::config::AccessConfig;
use crate::events::{EventHub, ServiceEvent};
use crate::gatt::{CharacteristicHandle, NativeGatt};
use crate::reconcile::{Reconciler, ReconciliationReport};
use crate::util::{lock, race, Race};
use crate::{DeviceId, Result, Uuid};

/// A GATT service on a remote device and the characteristics discovered in it
pub struct Service {
    device: DeviceId,
    uuid: Uuid,
    characteristics: Mutex<Reconciler<CharacteristicHandle>>,
    events: EventHub<ServiceEvent>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("device", &self.device)
            .field("uuid", &self.uuid)
            .field("characteristics", &self.characteristics().len())
            .finish()
    }
}

impl Service {
    /// Creates a service with no known characteristics.
    ///
    /// Only `config.event_capacity` applies to a service.
    pub fn new(device: DeviceId, uuid: Uuid, config: &AccessConfig) -> Self {
        Service {
            device,
            uuid,
            // handles reported under another service never show up here
            characteristics: Mutex::new(Reconciler::new(move |handle: &CharacteristicHandle| {
                handle.service == uuid
            })),
            events: EventHub::new(config.event_capacity),
        }
    }

    /// The device this service belongs to
    #[inline]
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The [`Uuid`] identifying the type of this GATT service
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Get previously discovered characteristics, in discovery order.
    pub fn characteristics(&self) -> Arc<[CharacteristicHandle]> {
        lock(&self.characteristics).snapshot()
    }

    /// Get a previously discovered characteristic by type.
    pub fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicHandle> {
        self.characteristics().iter().find(|h| h.uuid == uuid).cloned()
    }

    /// A stream of characteristic list changes.
    pub fn events(&self) -> impl Stream<Item = ServiceEvent> + Send + Unpin + 'static {
        self.events.subscribe()
    }

    /// Discover all characteristics associated with this service.
    pub async fn discover(
        &self,
        gatt: &dyn NativeGatt,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport<CharacteristicHandle>> {
        let native_cancel = cancel.child_token();
        let outcome = race(
            gatt.discover_characteristics(&self.device, self.uuid, native_cancel.clone()),
            timeout,
            cancel,
        )
        .await;
        if matches!(outcome, Race::TimedOut) {
            native_cancel.cancel();
        }
        let handles = outcome
            .into_result()
            .and_then(|x| x)
            .map_err(|err| err.for_device(&self.device))?;
        Ok(self.refresh(handles))
    }

    /// Replaces the known characteristics with a snapshot reported by the platform.
    pub fn refresh(&self, handles: Vec<CharacteristicHandle>) -> ReconciliationReport<CharacteristicHandle> {
        let mut characteristics = lock(&self.characteristics);
        let report = characteristics.reconcile(handles);
        if !report.added.is_empty() {
            self.events.emit(ServiceEvent::CharacteristicsAdded(report.added.clone()));
        }
        if !report.removed.is_empty() {
            self.events
                .emit(ServiceEvent::CharacteristicsRemoved(report.removed.clone()));
        }
        tracing::debug!(
            device = %self.device,
            service = %self.uuid,
            total = report.retained_order.len(),
            "characteristics refreshed"
        );
        report
    }
}
