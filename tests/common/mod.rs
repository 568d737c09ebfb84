#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::{channel, unbounded, Receiver, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use assistive_link::device::connection::{spawn_link, LinkConfig, PeripheralLink};
use assistive_link::device::permission::PermissionGate;
use assistive_link::device::transport::{Transport, TransportEvent};
use assistive_link::device::types::{LinkEvent, LinkState, PeripheralAddress};
use assistive_link::error::LinkError;
use assistive_link::store::MemoryStore;

pub const TARGET: &str = "AA:BB:CC:DD:EE:FF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    Discover(String),
    Disconnect(String),
}

#[derive(Default)]
struct RadioState {
    events: Mutex<Option<UnboundedSender<TransportEvent>>>,
    calls: Mutex<Vec<Call>>,
    writes: Mutex<Vec<String>>,
    connect_failures: Mutex<VecDeque<LinkError>>,
    discover_failures: Mutex<VecDeque<LinkError>>,
    scan_failures: Mutex<VecDeque<LinkError>>,
    events_failure: Mutex<Option<LinkError>>,
    reject_writes: AtomicBool,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    discover_gate: Mutex<Option<Arc<Notify>>>,
}

async fn pass(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

/// Test-side controls of a [`MockTransport`].
#[derive(Clone)]
pub struct MockRadio {
    state: Arc<RadioState>,
}

impl MockRadio {
    pub fn advertise(&self, address: &str, name: Option<&str>) {
        self.push(TransportEvent::Discovered {
            address: PeripheralAddress::parse(address).unwrap(),
            name: name.map(str::to_string),
        });
    }

    pub fn drop_connection(&self, address: &str) {
        self.push(TransportEvent::Disconnected {
            address: PeripheralAddress::parse(address).unwrap(),
        });
    }

    fn push(&self, event: TransportEvent) {
        let events = self.state.events.lock().unwrap();
        events.as_ref().expect("link has not subscribed to events").unbounded_send(event).unwrap();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn fail_next_connect(&self, err: LinkError) {
        self.state.connect_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_discover(&self, err: LinkError) {
        self.state.discover_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_scan(&self, err: LinkError) {
        self.state.scan_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_events(&self, err: LinkError) {
        *self.state.events_failure.lock().unwrap() = Some(err);
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Makes `connect` wait until the returned gate is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Makes `discover_channel` wait until the returned gate is notified.
    pub fn hold_discover(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.discover_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

pub struct MockTransport {
    state: Arc<RadioState>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, MockRadio) {
        let state = Arc::new(RadioState::default());
        (MockTransport { state: state.clone() }, MockRadio { state })
    }

    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Channel = PeripheralAddress;

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, LinkError> {
        if let Some(err) = self.state.events_failure.lock().unwrap().take() {
            return Err(err);
        }

        let (tx, rx) = unbounded();
        *self.state.events.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    async fn start_scan(&self) -> Result<(), LinkError> {
        self.record(Call::StartScan);
        match self.state.scan_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, address: &PeripheralAddress) -> Result<(), LinkError> {
        self.record(Call::Connect(address.to_string()));
        pass(&self.state.connect_gate).await;
        match self.state.connect_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn discover_channel(&self, address: &PeripheralAddress) -> Result<PeripheralAddress, LinkError> {
        self.record(Call::Discover(address.to_string()));
        pass(&self.state.discover_gate).await;
        match self.state.discover_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(address.clone()),
        }
    }

    fn begin_write(&self, _channel: &PeripheralAddress, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.state.reject_writes.load(Ordering::SeqCst) {
            return Err(LinkError::MissingCharacteristic);
        }

        self.state.writes.lock().unwrap().push(String::from_utf8(payload).unwrap());
        Ok(())
    }

    async fn disconnect(&self, address: &PeripheralAddress) -> Result<(), LinkError> {
        self.record(Call::Disconnect(address.to_string()));
        Ok(())
    }
}

/// Permission answers that tests can flip; counts how often they were asked.
#[derive(Debug)]
pub struct TogglePermissions {
    pub scan: AtomicBool,
    pub connect: AtomicBool,
    pub scan_checks: AtomicUsize,
    pub connect_checks: AtomicUsize,
}

impl Default for TogglePermissions {
    fn default() -> Self {
        TogglePermissions {
            scan: AtomicBool::new(true),
            connect: AtomicBool::new(true),
            scan_checks: AtomicUsize::new(0),
            connect_checks: AtomicUsize::new(0),
        }
    }
}

impl PermissionGate for TogglePermissions {
    fn can_scan(&self) -> bool {
        self.scan_checks.fetch_add(1, Ordering::SeqCst);
        self.scan.load(Ordering::SeqCst)
    }

    fn can_connect(&self) -> bool {
        self.connect_checks.fetch_add(1, Ordering::SeqCst);
        self.connect.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub link: PeripheralLink<MockTransport>,
    pub radio: MockRadio,
    pub store: Arc<MemoryStore>,
    pub permissions: Arc<TogglePermissions>,
    pub events: Receiver<LinkEvent>,
    pub handle: JoinHandle<()>,
    pub cancel: CancellationToken,
}

pub fn start() -> Harness {
    start_with(LinkConfig::default(), |_| {})
}

pub fn start_with(config: LinkConfig, setup: impl FnOnce(&MockRadio)) -> Harness {
    let (transport, radio) = MockTransport::new();
    setup(&radio);

    let store = Arc::new(MemoryStore::new());
    let permissions = Arc::new(TogglePermissions::default());
    let cancel = CancellationToken::new();
    let (sender, events) = channel(64);

    let (link, handle) = spawn_link(
        transport,
        store.clone(),
        permissions.clone(),
        config,
        cancel.clone(),
        vec![sender],
    );

    Harness { link, radio, store, permissions, events, handle, cancel }
}

impl Harness {
    pub async fn wait_for(&self, wanted: LinkState) {
        let mut state = self.link.subscribe_state();
        timeout(Duration::from_secs(60), state.wait_for(|state| *state == wanted))
            .await
            .unwrap_or_else(|_| panic!("link never reached {:?}", wanted))
            .unwrap();
    }

    /// Events received so far, without waiting for more.
    pub fn drain_events(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.events.try_next() {
            events.push(event);
        }
        events
    }

    pub fn state_changes(&mut self) -> Vec<LinkState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                LinkEvent::StateChange(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Lets the link task process everything that is already queued.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
