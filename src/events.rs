//! Outbound events consumed by the presentation layer.

use async_broadcast::{InactiveReceiver, Receiver, Sender};

use crate::activity::ActivityState;
use crate::device::{Client, Device, DeviceId};
use crate::gatt::CharacteristicHandle;
use crate::reconcile::ReconciliationReport;
use crate::Error;

/// Lifecycle notifications published by an [`Activity`][crate::Activity].
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    /// The activity moved from one state to another
    StateChanged {
        /// The previous state
        from: ActivityState,
        /// The new state
        to: ActivityState,
    },
    /// A start request finished and the activity is running
    StartSucceeded,
    /// A start request failed, or a running activity failed underneath us
    StartFailed(Error),
}

/// The scanner's device list changed.
#[derive(Debug, Clone)]
pub struct DeviceListChanged(pub ReconciliationReport<Device>);

/// The broadcaster's connected client list changed.
#[derive(Debug, Clone)]
pub struct ClientListChanged(pub ReconciliationReport<Client>);

/// Changes to the characteristics known for a GATT service.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// New characteristics appeared, in discovery order
    CharacteristicsAdded(Vec<CharacteristicHandle>),
    /// Characteristics disappeared from the service
    CharacteristicsRemoved(Vec<CharacteristicHandle>),
}

/// Notifications published by a [`CharacteristicAccess`][crate::CharacteristicAccess].
#[derive(Debug, Clone)]
pub enum CharacteristicEvent<T> {
    /// Value notifications were enabled or disabled for a device
    SubscriptionChanged {
        /// The remote device
        device: DeviceId,
        /// `true` if notifications are now enabled
        subscribed: bool,
    },
    /// A new value was received through a notification or indication
    ValueChanged {
        /// The remote device
        device: DeviceId,
        /// The decoded value
        value: T,
    },
}

/// An ordered fan-out of events to any number of subscribers.
///
/// Slow subscribers lose the oldest events rather than blocking the publisher.
pub(crate) struct EventHub<T> {
    sender: Sender<T>,
    // keeps the channel open while nobody is subscribed
    _idle: InactiveReceiver<T>,
}

impl<T> std::fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl<T: Clone> EventHub<T> {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        EventHub {
            sender,
            _idle: receiver.deactivate(),
        }
    }

    pub fn emit(&self, event: T) {
        // Inactive just means there are no subscribers right now.
        let _ = self.sender.try_broadcast(event);
    }

    pub fn subscribe(&self) -> Receiver<T> {
        self.sender.new_receiver()
    }
}
