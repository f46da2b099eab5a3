#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ble_activity::error::ErrorKind;
use ble_activity::*;
use futures_core::Stream;
use futures_lite::future::poll_once;
use futures_lite::StreamExt;
use tokio::sync::Semaphore;

pub const SHORT: Duration = Duration::from_millis(50);
pub const LONG: Duration = Duration::from_secs(5);

/// Collects every event already published without waiting for more.
pub async fn drain<T>(events: &mut (impl Stream<Item = T> + Unpin)) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(Some(event)) = poll_once(events.next()).await {
        out.push(event);
    }
    out
}

#[derive(Clone)]
pub enum StartBehaviour {
    Succeed,
    Fail(ErrorKind),
    /// Never completes on its own
    Hang,
    /// Completes once a permit is released, ignoring cancellation
    Gate(Arc<Semaphore>),
}

pub struct MockNative {
    behaviour: Mutex<StartBehaviour>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_stop: AtomicBool,
    pub running: AtomicBool,
    pub last_token: Mutex<Option<CancellationToken>>,
}

impl MockNative {
    pub fn new(behaviour: StartBehaviour) -> Arc<Self> {
        Arc::new(MockNative {
            behaviour: Mutex::new(behaviour),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            fail_stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_token: Mutex::new(None),
        })
    }

    pub fn set_behaviour(&self, behaviour: StartBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn token_cancelled(&self) -> bool {
        self.last_token
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, CancellationToken::is_cancelled)
    }
}

#[async_trait]
impl<O: Send + Sync> NativeActivity<O> for MockNative {
    async fn start(&self, _options: &O, _timeout: Duration, cancel: CancellationToken) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = Some(cancel.clone());
        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            StartBehaviour::Succeed => {}
            StartBehaviour::Fail(kind) => return Err(Error::new(kind, "mock start failure")),
            StartBehaviour::Hang => {
                cancel.cancelled().await;
                return Err(ErrorKind::Cancelled.into());
            }
            StartBehaviour::Gate(gate) => {
                gate.acquire().await.unwrap().forget();
            }
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _timeout: Duration, _cancel: CancellationToken) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::ActivityConfiguration, "mock stop failure"));
        }
        Ok(())
    }

    async fn refresh_running_state(&self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }
}

/// Grants everything except one scope.
pub struct Deny(pub PermissionScope);

#[async_trait]
impl PermissionManager for Deny {
    async fn has_permission(&self, scope: PermissionScope) -> bool {
        scope != self.0
    }
}

/// Has nothing up front and answers every prompt with `granted`.
pub struct Prompt {
    pub granted: bool,
    pub requests: AtomicUsize,
}

#[async_trait]
impl PermissionManager for Prompt {
    async fn has_permission(&self, _scope: PermissionScope) -> bool {
        false
    }

    async fn request_permission(&self, _scope: PermissionScope) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.granted
    }
}

pub struct MockGatt {
    pub handles: Mutex<Vec<CharacteristicHandle>>,
    pub value: Mutex<Vec<u8>>,
    pub read_gate: Mutex<Option<Arc<Semaphore>>>,
    pub fail_find: AtomicBool,
    pub finds: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: Mutex<Vec<(Vec<u8>, WriteKind)>>,
    pub notify_calls: Mutex<Vec<bool>>,
}

impl MockGatt {
    pub fn new(handles: Vec<CharacteristicHandle>, value: &[u8]) -> Arc<Self> {
        Arc::new(MockGatt {
            handles: Mutex::new(handles),
            value: Mutex::new(value.to_vec()),
            read_gate: Mutex::new(None),
            fail_find: AtomicBool::new(false),
            finds: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            notify_calls: Mutex::new(Vec::new()),
        })
    }

    /// Makes reads wait for a permit on the returned semaphore.
    pub fn gate_reads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.read_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeGatt for MockGatt {
    async fn find_characteristic(
        &self,
        _device: &DeviceId,
        characteristic: Uuid,
        _cancel: CancellationToken,
    ) -> Result<Option<CharacteristicHandle>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Service, "mock lookup failure"));
        }
        let handles = self.handles.lock().unwrap();
        Ok(handles.iter().find(|h| h.uuid == characteristic).cloned())
    }

    async fn discover_characteristics(
        &self,
        _device: &DeviceId,
        _service: Uuid,
        _cancel: CancellationToken,
    ) -> Result<Vec<CharacteristicHandle>> {
        Ok(self.handles.lock().unwrap().clone())
    }

    async fn read(
        &self,
        _device: &DeviceId,
        _handle: &CharacteristicHandle,
        _cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let gate = self.read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write(
        &self,
        _device: &DeviceId,
        _handle: &CharacteristicHandle,
        value: &[u8],
        kind: WriteKind,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.writes.lock().unwrap().push((value.to_vec(), kind));
        Ok(())
    }

    async fn set_notify(
        &self,
        _device: &DeviceId,
        _handle: &CharacteristicHandle,
        enabled: bool,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.notify_calls.lock().unwrap().push(enabled);
        Ok(())
    }
}

pub fn handle(service: Uuid, uuid: Uuid, properties: u8) -> CharacteristicHandle {
    CharacteristicHandle {
        service,
        uuid,
        properties: CharacteristicProperties::from_bits(properties),
    }
}

pub fn advertisement(id: &str, name: Option<&str>, rssi: i16) -> Advertisement {
    Advertisement {
        device: DeviceId::new(id),
        data: AdvertisementData {
            local_name: name.map(str::to_owned),
            ..Default::default()
        },
        rssi,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
