//! The peripheral role: an advertising [`Activity`] and the centrals connected to it.

use std::sync::{Arc, Mutex};

use futures_core::Stream;

use crate::activity::{Activity, ActivityKind, NativeActivity};
use crate::config::BroadcasterConfig;
use crate::device::{Client, DeviceId, ManufacturerData};
use crate::events::{ClientListChanged, EventHub};
use crate::permission::PermissionManager;
use crate::reconcile::{Reconciler, ReconciliationReport};
use crate::util::lock;
use crate::Uuid;

/// What the local device advertises.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertiseOptions {
    /// The local name
    pub local_name: Option<String>,
    /// Manufacturer specific data
    pub manufacturer_data: Option<ManufacturerData>,
    /// Service UUIDs to advertise
    pub services: Vec<Uuid>,
    /// Accept connections from centrals
    pub connectable: bool,
    /// Include the transmit power level
    pub include_tx_power: bool,
}

/// Advertises the local device and tracks the centrals connected to it.
pub struct Broadcaster {
    activity: Activity<AdvertiseOptions>,
    clients: Mutex<Reconciler<Client>>,
    events: EventHub<ClientListChanged>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("activity", &self.activity)
            .field("clients", &self.clients().len())
            .finish()
    }
}

impl Broadcaster {
    /// Creates an idle broadcaster.
    pub fn new(
        native: Arc<dyn NativeActivity<AdvertiseOptions>>,
        permissions: Arc<dyn PermissionManager>,
        config: BroadcasterConfig,
    ) -> Self {
        Broadcaster {
            events: EventHub::new(config.activity.event_capacity),
            activity: Activity::new(ActivityKind::Broadcaster, native, permissions, config.activity),
            clients: Mutex::new(Reconciler::default()),
        }
    }

    /// The advertising lifecycle
    pub fn activity(&self) -> &Activity<AdvertiseOptions> {
        &self.activity
    }

    /// Connected centrals in connection order
    pub fn clients(&self) -> Arc<[Client]> {
        lock(&self.clients).snapshot()
    }

    /// Returns `true` if `id` is currently connected.
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.clients().iter().any(|c| &c.id == id)
    }

    /// A stream of client list changes, starting from the next pass.
    pub fn client_events(&self) -> impl Stream<Item = ClientListChanged> + Send + Unpin + 'static {
        self.events.subscribe()
    }

    /// Native callback carrying the full set of connected centrals.
    pub fn on_clients_changed(&self, clients: Vec<Client>) -> ReconciliationReport<Client> {
        let mut reconciler = lock(&self.clients);
        let report = reconciler.reconcile(clients);
        if !report.is_empty() {
            tracing::debug!(
                connected = report.added.len(),
                disconnected = report.removed.len(),
                "client list changed"
            );
            self.events.emit(ClientListChanged(report.clone()));
        }
        report
    }
}
