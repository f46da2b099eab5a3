//! The central role: a scanning [`Activity`] plus the list of devices it has seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_core::Stream;
use tracing::{debug, trace};

use crate::activity::{Activity, ActivityKind, NativeActivity};
use crate::config::{DeviceFilter, ScannerConfig};
use crate::device::{Advertisement, Device, DeviceId};
use crate::events::{DeviceListChanged, EventHub};
use crate::permission::PermissionManager;
use crate::reconcile::{Reconciler, ReconciliationReport};
use crate::signal::SignalConverter;
use crate::util::lock;
use crate::{Result, Uuid};

/// Scan duty cycle requested from the platform.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// Long intervals between scan windows
    LowPower,
    /// The platform default
    #[default]
    Balanced,
    /// Scan continuously
    LowLatency,
}

/// Options passed to the native scanner on start.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only report devices advertising one of these services. Empty reports every device.
    pub services: Vec<Uuid>,
    /// Scan duty cycle
    pub mode: ScanMode,
}

struct Registry {
    candidates: Vec<Device>,
    index: HashMap<DeviceId, usize>,
    converter: SignalConverter,
    filter: DeviceFilter,
    reconciler: Reconciler<Device>,
}

impl Registry {
    fn reindex(&mut self) {
        self.index = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, device)| (device.id().clone(), i))
            .collect();
    }
}

/// Scans for advertisements and keeps a filtered, ordered list of nearby devices.
///
/// The platform layer drives a `Scanner` by forwarding advertisements to
/// [`on_advertisements`][Scanner::on_advertisements]. Each call is one reconciliation pass and publishes at most
/// one [`DeviceListChanged`] event.
pub struct Scanner {
    activity: Activity<ScanOptions>,
    smoothing: f64,
    stale_after: Duration,
    registry: Mutex<Registry>,
    events: EventHub<DeviceListChanged>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("Scanner")
            .field("activity", &self.activity)
            .field("candidates", &registry.candidates.len())
            .field("filter", &registry.filter)
            .finish()
    }
}

impl Scanner {
    /// Creates a scanner. Fails if the configured signal strategy is invalid.
    pub fn new(
        native: Arc<dyn NativeActivity<ScanOptions>>,
        permissions: Arc<dyn PermissionManager>,
        config: ScannerConfig,
    ) -> Result<Self> {
        let converter = SignalConverter::new(config.signal.clone())?;
        let filter = config.filter.clone();
        let predicate = filter.clone();
        Ok(Scanner {
            events: EventHub::new(config.activity.event_capacity),
            activity: Activity::new(ActivityKind::Scanner, native, permissions, config.activity),
            smoothing: config.rssi_smoothing,
            stale_after: config.stale_after,
            registry: Mutex::new(Registry {
                candidates: Vec::new(),
                index: HashMap::new(),
                converter,
                filter,
                reconciler: Reconciler::new(move |device: &Device| predicate.matches(device)),
            }),
        })
    }

    /// The scanning lifecycle
    pub fn activity(&self) -> &Activity<ScanOptions> {
        &self.activity
    }

    /// The devices currently passing the filter, in the order they first became visible.
    pub fn devices(&self) -> Arc<[Device]> {
        lock(&self.registry).reconciler.snapshot()
    }

    /// Looks up a visible device.
    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.devices().iter().find(|d| d.id() == id).cloned()
    }

    /// The active device filter
    pub fn filter(&self) -> DeviceFilter {
        lock(&self.registry).filter.clone()
    }

    /// The current `(min, max)` RSSI bounds of a linear signal strategy.
    pub fn signal_bounds(&self) -> Option<(f64, f64)> {
        lock(&self.registry).converter.bounds()
    }

    /// A stream of device list changes, starting from the next pass.
    pub fn device_events(&self) -> impl Stream<Item = DeviceListChanged> + Send + Unpin + 'static {
        self.events.subscribe()
    }

    /// Native callback for a single advertisement.
    pub fn on_advertisement(&self, advertisement: Advertisement) -> ReconciliationReport<Device> {
        self.on_advertisements(std::iter::once(advertisement))
    }

    /// Native callback for a burst of advertisements. The whole batch is folded in before a single pass runs.
    pub fn on_advertisements(
        &self,
        batch: impl IntoIterator<Item = Advertisement>,
    ) -> ReconciliationReport<Device> {
        let now = Instant::now();
        let mut guard = lock(&self.registry);
        let registry = &mut *guard;
        let bounds = registry.converter.bounds();
        for adv in batch {
            match registry.index.get(&adv.device) {
                Some(&i) => registry.candidates[i].observe(&adv, &mut registry.converter, now),
                None => {
                    trace!(device = %adv.device, rssi = adv.rssi, "discovered");
                    let device = Device::from_advertisement(&adv, self.smoothing, &mut registry.converter, now);
                    registry.index.insert(adv.device, registry.candidates.len());
                    registry.candidates.push(device);
                }
            }
        }
        // strengths are only comparable when taken against the same bounds
        if registry.converter.bounds() != bounds {
            debug!(bounds = ?registry.converter.bounds(), "signal range widened, rescaling devices");
            for device in &mut registry.candidates {
                device.rescale(&mut registry.converter);
            }
        }
        let candidates = registry.candidates.clone();
        let report = registry.reconciler.reconcile(candidates);
        self.publish(&report);
        report
    }

    /// Replaces the filter and re-runs the pass over the devices already seen.
    pub fn set_filter(&self, filter: DeviceFilter) -> ReconciliationReport<Device> {
        let mut registry = lock(&self.registry);
        registry.filter = filter.clone();
        let report = registry
            .reconciler
            .set_predicate(move |device: &Device| filter.matches(device));
        self.publish(&report);
        report
    }

    /// Shows or hides devices that never advertised a name.
    pub fn set_include_unnamed(&self, include: bool) -> ReconciliationReport<Device> {
        let filter = DeviceFilter {
            include_unnamed: include,
            ..self.filter()
        };
        self.set_filter(filter)
    }

    /// Forgets devices not heard from within `max_age`.
    pub fn forget_stale(&self, max_age: Duration) -> ReconciliationReport<Device> {
        let now = Instant::now();
        let mut registry = lock(&self.registry);
        let before = registry.candidates.len();
        registry
            .candidates
            .retain(|device| now.saturating_duration_since(device.last_seen()) <= max_age);
        if registry.candidates.len() != before {
            trace!(forgotten = before - registry.candidates.len(), "forgetting stale devices");
            registry.reindex();
        }
        let candidates = registry.candidates.clone();
        let report = registry.reconciler.reconcile(candidates);
        self.publish(&report);
        report
    }

    /// [`forget_stale`][Self::forget_stale] with the configured age.
    pub fn prune(&self) -> ReconciliationReport<Device> {
        self.forget_stale(self.stale_after)
    }

    /// Forgets every device, e.g. before a fresh scan.
    pub fn clear(&self) -> ReconciliationReport<Device> {
        let mut registry = lock(&self.registry);
        registry.candidates.clear();
        registry.index.clear();
        let report = registry.reconciler.reconcile(Vec::new());
        self.publish(&report);
        report
    }

    fn publish(&self, report: &ReconciliationReport<Device>) {
        if !report.is_empty() {
            self.events.emit(DeviceListChanged(report.clone()));
        }
    }
}
