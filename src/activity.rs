//! The lifecycle shared by the scanning and broadcasting roles.
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Running ──stop──▶ Stopping ──▶ Idle
//!   ▲               │  │             │
//!   └────stop───────┘  └──fail──▶ Failed ◀──fail──┘
//!                                   │
//!                                   └──start──▶ Starting
//! ```
//!
//! All lifecycle operations on one [`Activity`] are serialized. A `start` that arrives while another start is in
//! flight does not issue a second native start; it waits for and returns the outcome of the first one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ActivityConfig;
use crate::error::ErrorKind;
use crate::events::{ActivityEvent, EventHub};
use crate::permission::{self, PermissionManager, PermissionScope};
use crate::util::{defer, lock, race, until_cancelled, Race};
use crate::{Error, Result};

/// The role an activity plays.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActivityKind {
    /// scanner
    Scanner,
    /// broadcaster
    Broadcaster,
}

impl ActivityKind {
    /// The role-specific permission checked before each start, in addition to [`PermissionScope::Bluetooth`].
    pub fn permission_scope(self) -> PermissionScope {
        match self {
            ActivityKind::Scanner => PermissionScope::Scanner,
            ActivityKind::Broadcaster => PermissionScope::Broadcaster,
        }
    }
}

/// Lifecycle state of an [`Activity`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityState {
    /// idle
    Idle,
    /// starting
    Starting,
    /// running
    Running,
    /// stopping
    Stopping,
    /// failed
    Failed,
}

impl ActivityState {
    /// Returns `true` if the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: ActivityState) -> bool {
        use ActivityState::*;

        matches!(
            (self, next),
            (Idle, Starting)
                | (Failed, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Idle)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Idle)
        )
    }
}

/// The platform half of an activity: turns scanning or advertising on and off.
///
/// Implementations receive a [`CancellationToken`] that fires when the caller gives up, the operation times out or
/// a stop supersedes a pending start. The state machine drops the returned future in those cases, so any platform
/// work should be torn down when the token fires.
#[async_trait]
pub trait NativeActivity<O>: Send + Sync {
    /// Starts the platform activity with `options`.
    async fn start(&self, options: &O, timeout: Duration, cancel: CancellationToken) -> Result<()>;

    /// Stops the platform activity.
    async fn stop(&self, timeout: Duration, cancel: CancellationToken) -> Result<()>;

    /// Asks the platform whether the activity is actually running.
    async fn refresh_running_state(&self) -> Result<bool>;
}

struct PendingStart {
    generation: u64,
    abort: CancellationToken,
    stop_requested: bool,
}

struct Shared {
    state: ActivityState,
    last_error: Option<Error>,
    pending: Option<PendingStart>,
    generation: u64,
    last_outcome: Option<(u64, Result<()>)>,
}

enum StartOutcome {
    Started,
    Denied(PermissionScope),
    Failed(Error),
    TimedOut,
    Cancelled,
}

/// A scanner or broadcaster lifecycle.
///
/// The platform specifics are injected as a [`NativeActivity`] and a [`PermissionManager`]. State changes are
/// published on [`events`][Activity::events] as well as returned to the caller of the operation that caused them.
pub struct Activity<O> {
    kind: ActivityKind,
    native: Arc<dyn NativeActivity<O>>,
    permissions: Arc<dyn PermissionManager>,
    config: ActivityConfig,
    shared: Mutex<Shared>,
    lifecycle: async_lock::Mutex<()>,
    events: EventHub<ActivityEvent>,
}

impl<O> std::fmt::Debug for Activity<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = lock(&self.shared);
        f.debug_struct("Activity")
            .field("kind", &self.kind)
            .field("state", &shared.state)
            .field("last_error", &shared.last_error)
            .finish()
    }
}

impl<O: Sync> Activity<O> {
    /// Creates an idle activity.
    pub fn new(
        kind: ActivityKind,
        native: Arc<dyn NativeActivity<O>>,
        permissions: Arc<dyn PermissionManager>,
        config: ActivityConfig,
    ) -> Self {
        Activity {
            kind,
            native,
            permissions,
            events: EventHub::new(config.event_capacity),
            config,
            shared: Mutex::new(Shared {
                state: ActivityState::Idle,
                last_error: None,
                pending: None,
                generation: 0,
                last_outcome: None,
            }),
            lifecycle: async_lock::Mutex::new(()),
        }
    }

    /// The role of this activity
    pub fn kind(&self) -> ActivityKind {
        self.kind
    }

    /// The current lifecycle state
    pub fn state(&self) -> ActivityState {
        lock(&self.shared).state
    }

    /// The error that last moved this activity to [`ActivityState::Failed`]
    pub fn last_error(&self) -> Option<Error> {
        lock(&self.shared).last_error.clone()
    }

    /// The configuration this activity was created with
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// A stream of lifecycle events, starting from the next state change.
    pub fn events(&self) -> impl Stream<Item = ActivityEvent> + Send + Unpin + 'static {
        self.events.subscribe()
    }

    /// Starts the activity.
    ///
    /// Returns immediately if the activity is already running. If another start is in flight, waits for it and
    /// returns its outcome instead of starting again. Otherwise checks (and if necessary requests) permissions, then
    /// races the native start against `timeout` and `cancel`.
    ///
    /// On failure the activity is left [`Failed`][ActivityState::Failed] and the error is also published as
    /// [`ActivityEvent::StartFailed`]. Cancellation restores the state the activity had before the call.
    pub async fn start(&self, options: &O, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let joined = {
            let shared = lock(&self.shared);
            match (shared.state, &shared.pending) {
                (ActivityState::Running, _) => {
                    trace!(activity = %self.kind, "already running");
                    return Ok(());
                }
                (ActivityState::Starting, Some(pending)) => Some(pending.generation),
                _ => None,
            }
        };
        if let Some(generation) = joined {
            return self.join_start(generation, timeout, cancel).await;
        }

        let _lifecycle = race(self.lifecycle.lock(), timeout, cancel)
            .await
            .into_result()
            .map_err(|err| err.for_activity(self.kind))?;

        let (generation, previous, abort) = {
            let mut shared = lock(&self.shared);
            let previous = shared.state;
            match previous {
                ActivityState::Running => return Ok(()),
                ActivityState::Idle | ActivityState::Failed => {}
                state => {
                    return Err(Error::new(ErrorKind::Internal, format!("cannot start while {state}"))
                        .for_activity(self.kind))
                }
            }
            shared.generation += 1;
            let generation = shared.generation;
            let abort = cancel.child_token();
            shared.pending = Some(PendingStart {
                generation,
                abort: abort.clone(),
                stop_requested: false,
            });
            self.transition(&mut shared, ActivityState::Starting);
            (generation, previous, abort)
        };
        // Undoes the start if this future is dropped before it records an outcome.
        let abandoned = abort.clone();
        let _abandon = defer(move || self.abandon_start(generation, previous, &abandoned));

        let outcome = self.run_start(options, timeout, &abort).await;
        if matches!(outcome, StartOutcome::TimedOut) {
            abort.cancel();
        }

        {
            let mut shared = lock(&self.shared);
            let stop_requested = shared.pending.as_ref().map_or(false, |p| p.stop_requested);
            match outcome {
                StartOutcome::Started if stop_requested => {}
                StartOutcome::Started => {
                    shared.last_error = None;
                    self.transition(&mut shared, ActivityState::Running);
                    self.events.emit(ActivityEvent::StartSucceeded);
                    debug!(activity = %self.kind, "started");
                    return self.complete(&mut shared, generation, Ok(()));
                }
                _ if stop_requested => {
                    self.transition(&mut shared, ActivityState::Idle);
                    return self.complete(&mut shared, generation, Err(self.stopped_while_starting()));
                }
                StartOutcome::Cancelled => {
                    debug!(activity = %self.kind, "start cancelled");
                    self.transition(&mut shared, previous);
                    let err = Error::new(ErrorKind::Cancelled, "start was cancelled").for_activity(self.kind);
                    return self.complete(&mut shared, generation, Err(err));
                }
                StartOutcome::Denied(scope) => {
                    let err = Error::new(ErrorKind::PermissionDenied(scope), "permission was not granted");
                    return self.fail(&mut shared, generation, err);
                }
                StartOutcome::Failed(err) => return self.fail(&mut shared, generation, err),
                StartOutcome::TimedOut => {
                    let err = Error::new(ErrorKind::Timeout, format!("native start took longer than {timeout:?}"));
                    return self.fail(&mut shared, generation, err);
                }
            }
        }

        // The platform came up after a stop was requested; take it back down before anyone sees it running.
        debug!(activity = %self.kind, "start completed after stop was requested, stopping again");
        self.native_stop_best_effort(self.config.stop_timeout, &CancellationToken::new())
            .await;
        let mut shared = lock(&self.shared);
        self.transition(&mut shared, ActivityState::Idle);
        self.complete(&mut shared, generation, Err(self.stopped_while_starting()))
    }

    /// [`start`][Self::start] using the configured timeout and no external cancellation.
    pub async fn start_default(&self, options: &O) -> Result<()> {
        self.start(options, self.config.start_timeout, &CancellationToken::new())
            .await
    }

    /// Stops the activity.
    ///
    /// A pending start is cancelled and the activity returns to [`Idle`][ActivityState::Idle] without ever being
    /// `Running`. A running activity is stopped through the native layer and ends `Idle` whatever the native outcome
    /// was; native stop failures are logged, not returned. Stopping an idle or failed activity does nothing.
    ///
    /// Fails only if `cancel` has already fired, or if `timeout` or `cancel` fire while waiting for another lifecycle
    /// operation to finish. A stop that reached a pending start succeeds even when it cannot wait for that start to
    /// wind down.
    pub async fn stop(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Cancelled, "stop was cancelled").for_activity(self.kind));
        }

        let requested = {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            match shared.pending.as_mut() {
                Some(pending) if shared.state == ActivityState::Starting => {
                    debug!(activity = %self.kind, "stop requested while starting");
                    pending.stop_requested = true;
                    pending.abort.cancel();
                    true
                }
                _ => false,
            }
        };

        let _lifecycle = match race(self.lifecycle.lock(), timeout, cancel).await.into_result() {
            Ok(guard) => guard,
            // the pending start has already been told to wind down to idle
            Err(err) if requested => {
                debug!(activity = %self.kind, error = %err, "stop recorded while starting, not waiting for it");
                return Ok(());
            }
            Err(err) => return Err(err.for_activity(self.kind)),
        };

        let running = {
            let mut shared = lock(&self.shared);
            if shared.state == ActivityState::Running {
                self.transition(&mut shared, ActivityState::Stopping);
                true
            } else {
                false
            }
        };
        if !running {
            trace!(activity = %self.kind, state = %self.state(), "nothing to stop");
            return Ok(());
        }

        let _settle = defer(|| {
            let mut shared = lock(&self.shared);
            if shared.state == ActivityState::Stopping {
                self.transition(&mut shared, ActivityState::Idle);
            }
        });
        self.native_stop_best_effort(timeout, cancel).await;
        let mut shared = lock(&self.shared);
        self.transition(&mut shared, ActivityState::Idle);
        debug!(activity = %self.kind, "stopped");
        Ok(())
    }

    /// [`stop`][Self::stop] using the configured timeout and no external cancellation.
    pub async fn stop_default(&self) -> Result<()> {
        self.stop(self.config.stop_timeout, &CancellationToken::new()).await
    }

    /// Unconditionally stops the activity at teardown.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop_default().await {
            warn!(activity = %self.kind, error = %err, "shutdown did not complete");
        }
    }

    /// Re-synchronizes with the platform's view of the activity.
    ///
    /// If the platform stopped a running activity behind our back, the activity becomes
    /// [`Failed`][ActivityState::Failed].
    pub async fn refresh_state(&self) -> Result<ActivityState> {
        let running = self
            .native
            .refresh_running_state()
            .await
            .map_err(|err| err.for_activity(self.kind))?;
        match self.state() {
            ActivityState::Running if !running => self.report_failure(Error::new(
                ErrorKind::ActivityConfiguration,
                "the platform stopped the activity unexpectedly",
            )),
            ActivityState::Idle | ActivityState::Failed if running => {
                warn!(activity = %self.kind, "platform reports running although no start was issued here")
            }
            _ => {}
        }
        Ok(self.state())
    }

    /// Reports an asynchronous platform failure of a running activity.
    ///
    /// Ignored unless the activity is currently [`Running`][ActivityState::Running].
    pub fn report_failure(&self, error: Error) {
        let mut shared = lock(&self.shared);
        if shared.state != ActivityState::Running {
            debug!(activity = %self.kind, state = %shared.state, error = %error, "ignoring native failure");
            return;
        }
        let err = error.for_activity(self.kind);
        warn!(activity = %self.kind, error = %err, "activity failed while running");
        shared.last_error = Some(err.clone());
        self.transition(&mut shared, ActivityState::Failed);
        self.events.emit(ActivityEvent::StartFailed(err));
    }

    async fn run_start(&self, options: &O, timeout: Duration, abort: &CancellationToken) -> StartOutcome {
        let scopes = [PermissionScope::Bluetooth, self.kind.permission_scope()];
        match until_cancelled(permission::ensure(&*self.permissions, &scopes), abort).await {
            Race::Completed(Ok(())) => {}
            Race::Completed(Err(scope)) => return StartOutcome::Denied(scope),
            Race::TimedOut | Race::Cancelled => return StartOutcome::Cancelled,
        }

        trace!(activity = %self.kind, ?timeout, "invoking native start");
        match race(self.native.start(options, timeout, abort.clone()), timeout, abort).await {
            Race::Completed(Ok(())) => StartOutcome::Started,
            Race::Completed(Err(err)) => StartOutcome::Failed(err),
            Race::TimedOut => StartOutcome::TimedOut,
            Race::Cancelled => StartOutcome::Cancelled,
        }
    }

    async fn join_start(&self, generation: u64, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        debug!(activity = %self.kind, generation, "joining start in progress");
        let _lifecycle = race(self.lifecycle.lock(), timeout, cancel)
            .await
            .into_result()
            .map_err(|err| err.for_activity(self.kind))?;
        let shared = lock(&self.shared);
        match &shared.last_outcome {
            Some((finished, outcome)) if *finished == generation => outcome.clone(),
            _ if shared.state == ActivityState::Running => Ok(()),
            _ => Err(Error::new(ErrorKind::ActivityConfiguration, "the joined start did not complete").for_activity(self.kind)),
        }
    }

    async fn native_stop_best_effort(&self, timeout: Duration, cancel: &CancellationToken) {
        let native_cancel = cancel.child_token();
        match race(self.native.stop(timeout, native_cancel.clone()), timeout, cancel).await {
            Race::Completed(Ok(())) => trace!(activity = %self.kind, "native stop completed"),
            Race::Completed(Err(err)) => {
                warn!(activity = %self.kind, error = %err, "native stop failed, treating the activity as stopped")
            }
            Race::TimedOut => {
                native_cancel.cancel();
                warn!(activity = %self.kind, ?timeout, "native stop timed out, treating the activity as stopped")
            }
            Race::Cancelled => debug!(activity = %self.kind, "native stop cancelled, treating the activity as stopped"),
        }
    }

    fn abandon_start(&self, generation: u64, previous: ActivityState, abort: &CancellationToken) {
        let mut shared = lock(&self.shared);
        let stop_requested = match &shared.pending {
            Some(pending) if pending.generation == generation => pending.stop_requested,
            _ => return,
        };
        abort.cancel();
        debug!(activity = %self.kind, generation, "start abandoned before completing");
        let to = if stop_requested { ActivityState::Idle } else { previous };
        self.transition(&mut shared, to);
        let err = Error::new(ErrorKind::Cancelled, "start was abandoned").for_activity(self.kind);
        let _ = self.complete(&mut shared, generation, Err(err));
    }

    fn stopped_while_starting(&self) -> Error {
        Error::new(ErrorKind::Cancelled, "stopped while starting").for_activity(self.kind)
    }

    fn fail(&self, shared: &mut Shared, generation: u64, err: Error) -> Result<()> {
        let err = err.for_activity(self.kind);
        warn!(activity = %self.kind, error = %err, "start failed");
        shared.last_error = Some(err.clone());
        self.transition(shared, ActivityState::Failed);
        self.events.emit(ActivityEvent::StartFailed(err.clone()));
        self.complete(shared, generation, Err(err))
    }

    fn complete(&self, shared: &mut Shared, generation: u64, outcome: Result<()>) -> Result<()> {
        shared.pending = None;
        shared.last_outcome = Some((generation, outcome.clone()));
        outcome
    }

    fn transition(&self, shared: &mut Shared, to: ActivityState) {
        let from = shared.state;
        if from == to {
            return;
        }
        debug_assert!(from.can_transition_to(to), "invalid transition {from} -> {to}");
        shared.state = to;
        debug!(activity = %self.kind, %from, %to, "state changed");
        self.events.emit(ActivityEvent::StateChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_is_only_entered_from_starting() {
        use ActivityState::*;

        let all = [Idle, Starting, Running, Stopping, Failed];
        for from in all {
            assert_eq!(from.can_transition_to(Running), from == Starting);
            assert_eq!(from.can_transition_to(Failed), matches!(from, Starting | Running));
        }
        assert!(Failed.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Idle));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn each_role_has_its_own_scope() {
        assert_eq!(ActivityKind::Scanner.permission_scope(), PermissionScope::Scanner);
        assert_eq!(ActivityKind::Broadcaster.permission_scope(), PermissionScope::Broadcaster);
    }
}
