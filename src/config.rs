//! Tunables for activities, the scanner's device list and characteristic access.
//!
//! Everything has a sensible [`Default`]. With the `serde` feature enabled these types can be loaded from any
//! serde-compatible configuration format.

use std::time::Duration;

use crate::signal::SignalStrategy;
use crate::Uuid;

/// Timeouts and channel sizing shared by scanner and broadcaster activities.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityConfig {
    /// Bound used by [`Activity::start_default`][crate::Activity::start_default]
    pub start_timeout: Duration,
    /// Bound used by [`Activity::stop_default`][crate::Activity::stop_default] and teardown
    pub stop_timeout: Duration,
    /// Number of undelivered events kept per subscriber before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        ActivityConfig {
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

impl ActivityConfig {
    /// Sets the default start timeout.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the default stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Which discovered devices the scanner shows.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFilter {
    /// Show devices that have not advertised a local name
    pub include_unnamed: bool,
    /// Only show devices whose name starts with this prefix
    pub name_prefix: Option<String>,
    /// Only show devices at or above this normalized signal strength
    pub min_signal_strength: Option<f64>,
    /// Only show devices advertising at least one of these services (empty accepts all)
    pub services: Vec<Uuid>,
}

impl DeviceFilter {
    /// A filter that accepts every device.
    pub fn all() -> Self {
        DeviceFilter {
            include_unnamed: true,
            ..Default::default()
        }
    }

    /// Returns `true` if `device` should be listed.
    pub fn matches(&self, device: &crate::Device) -> bool {
        match (device.name(), &self.name_prefix) {
            (None, _) if !self.include_unnamed => return false,
            (None, Some(_)) => return false,
            (Some(name), Some(prefix)) if !name.starts_with(prefix.as_str()) => return false,
            _ => {}
        }
        if let Some(min) = self.min_signal_strength {
            if device.signal_strength() < min {
                return false;
            }
        }
        self.services.is_empty() || self.services.iter().any(|s| device.services().contains(s))
    }
}

/// Scanner behaviour.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    /// Lifecycle tunables
    pub activity: ActivityConfig,
    /// Weight of each new RSSI sample in the moving average, in `(0, 1]`
    pub rssi_smoothing: f64,
    /// How smoothed RSSI is mapped to signal strength
    pub signal: SignalStrategy,
    /// The initial device filter
    pub filter: DeviceFilter,
    /// Devices not heard from for this long are dropped by [`Scanner::prune`][crate::Scanner::prune]
    pub stale_after: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            activity: ActivityConfig::default(),
            rssi_smoothing: 0.3,
            signal: SignalStrategy::default(),
            filter: DeviceFilter::default(),
            stale_after: Duration::from_secs(30),
        }
    }
}

impl ScannerConfig {
    /// Sets the initial device filter.
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the signal strength strategy.
    pub fn with_signal(mut self, signal: SignalStrategy) -> Self {
        self.signal = signal;
        self
    }

    /// Sets the RSSI smoothing factor.
    pub fn with_rssi_smoothing(mut self, alpha: f64) -> Self {
        self.rssi_smoothing = alpha;
        self
    }
}

/// Broadcaster behaviour.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcasterConfig {
    /// Lifecycle tunables
    pub activity: ActivityConfig,
}

/// Characteristic access behaviour.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct AccessConfig {
    /// Bound applied by the probes ([`can_read`][crate::CharacteristicAccess::can_read] and
    /// [`can_write`][crate::CharacteristicAccess::can_write]), which take no timeout of their own
    pub probe_timeout: Duration,
    /// Number of undelivered events kept per subscriber
    pub event_capacity: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        AccessConfig {
            probe_timeout: Duration::from_secs(5),
            event_capacity: 32,
        }
    }
}
