#![warn(missing_docs)]

//! A platform-neutral orchestration layer for [Bluetooth Low Energy] scanning, broadcasting and characteristic access.
//!
//! The crate does not talk to a radio itself. Each platform supplies small capability objects (a
//! [`NativeActivity`] to turn scanning or advertising on and off, a [`NativeGatt`] for characteristic I/O and a
//! [`PermissionManager`] for runtime permissions) and this crate provides the logic above them: lifecycle
//! sequencing, device list maintenance, signal strength normalization and typed, concurrency-controlled
//! characteristic access.
//!
//! [Bluetooth Low Energy]: https://www.bluetooth.com/specifications/specs/
//!
//! # Usage
//!
//! ```rust,no_run
//!# use std::sync::Arc;
//!# use ble_activity::{GrantAll, NativeActivity, ScanOptions, Scanner, ScannerConfig};
//!# use futures_lite::StreamExt;
//!# async fn run(native: Arc<dyn NativeActivity<ScanOptions>>) -> Result<(), Box<dyn std::error::Error>> {
//!let scanner = Scanner::new(native, Arc::new(GrantAll), ScannerConfig::default())?;
//!let mut changes = scanner.device_events();
//!scanner.activity().start_default(&ScanOptions::default()).await?;
//!
//!while let Some(change) = changes.next().await {
//!    for device in change.0.added {
//!        println!("{}: {:.0}%", device.name().unwrap_or("(unknown)"), device.signal_strength() * 100.0);
//!    }
//!}
//!#
//!#    Ok(())
//!# }
//! ```
//!
//! # Overview
//!
//! - Lifecycle: an [`Activity`] moves between [`ActivityState`]s, checks permissions before every start, bounds every
//!   native call by a timeout and a [`CancellationToken`], and serializes all starts and stops.
//!   [`Scanner`] and [`Broadcaster`] each wrap one.
//! - Lists: a [`Reconciler`] diffs a fresh snapshot against the list already shown and reports the change as a single
//!   [`ReconciliationReport`]. The scanner's devices, a broadcaster's clients and a [`Service`]'s characteristics are
//!   all maintained this way.
//! - Signal: advertisements are smoothed by an [`RssiSmoother`] and mapped onto `[0, 1]` by a [`SignalConverter`].
//! - Characteristics: a [`CharacteristicAccess`] reads, writes and subscribes through a [`Codec`], allowing at most
//!   one read in flight per device.
//!
//! # Events
//!
//! Every component publishes its changes as a [`Stream`][futures_core::Stream] of events in addition to returning
//! them. Subscribers that fall behind lose the oldest events rather than slowing the publisher down.
//!
//! # Asynchronous runtimes
//!
//! The crate works with any asynchronous runtime. Timeouts use `futures-timer` and cancellation uses
//! `tokio-util`'s runtime-independent [`CancellationToken`].
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing configuration, identifiers and options.

pub mod activity;
pub mod broadcaster;
pub mod characteristic;
pub mod config;
mod device;
pub mod error;
pub mod events;
pub mod gatt;
pub mod permission;
pub mod reconcile;
pub mod scanner;
mod service;
pub mod signal;
mod util;

pub use activity::{Activity, ActivityKind, ActivityState, NativeActivity};
pub use broadcaster::{AdvertiseOptions, Broadcaster};
pub use characteristic::{CharacteristicAccess, CharacteristicAccessSession, Codec};
pub use config::{AccessConfig, ActivityConfig, BroadcasterConfig, DeviceFilter, ScannerConfig};
pub use device::{Advertisement, AdvertisementData, Client, Device, DeviceId, ManufacturerData};
pub use error::Error;
pub use events::{ActivityEvent, CharacteristicEvent, ClientListChanged, DeviceListChanged, ServiceEvent};
pub use gatt::{CharacteristicHandle, CharacteristicProperties, NativeGatt, WriteKind};
pub use permission::{GrantAll, PermissionManager, PermissionScope};
pub use reconcile::{Keyed, Reconciler, ReconciliationReport};
pub use scanner::{ScanMode, ScanOptions, Scanner};
pub use service::Service;
pub use signal::{RssiSmoother, SignalConverter, SignalStrategy};
pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;
