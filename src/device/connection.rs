use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use futures::channel::mpsc::Sender;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::constants::ASSISTIVE_DEVICE_KEY;
use crate::device::permission::PermissionGate;
use crate::device::scan::ScanCycle;
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{LinkEvent, LinkState, PeripheralAddress};
use crate::error::{FailureKind, LinkError};
use crate::store::PairedDeviceStore;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub target_name: String,
    pub scan_timeout: Duration,
    pub retry_backoff: Duration,
    /// Written once after every successful connection.
    pub greeting: Option<String>,
}

impl From<&Config> for LinkConfig {
    fn from(config: &Config) -> Self {
        LinkConfig {
            target_name: config.target_name.clone(),
            scan_timeout: config.scan_timeout(),
            retry_backoff: config.retry_backoff(),
            greeting: config.greeting.clone(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::from(&Config::default())
    }
}

/// Lock-free view of whether the link is connected.
#[derive(Debug, Clone)]
pub struct ConnectedSignal(Arc<AtomicBool>);

impl ConnectedSignal {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
enum Command {
    Connect(Option<String>),
    StartDiscovery,
    Disconnect,
}

enum Message<C> {
    Command(Command),
    ScanTimeout(u64),
    Retry,
    ServiceDiscovery(u64),
    AttemptFinished(u64, Result<C, LinkError>),
}

// The canonical state. Connected carries the resolved channel, so there is no connected state
// without something to write to.
enum Connection<C> {
    Disconnected,
    Scanning {
        cycle: ScanCycle,
    },
    Connecting {
        address: PeripheralAddress,
    },
    ServiceDiscovery {
        address: PeripheralAddress,
    },
    Connected {
        address: PeripheralAddress,
        channel: C,
    },
}

impl<C> Connection<C> {
    fn link_state(&self) -> LinkState {
        match self {
            Connection::Disconnected => LinkState::Disconnected,
            Connection::Scanning { .. } => LinkState::Scanning,
            Connection::Connecting { .. } => LinkState::Connecting,
            Connection::ServiceDiscovery { .. } => LinkState::ServiceDiscovery,
            Connection::Connected { .. } => LinkState::Connected,
        }
    }

    fn address(&self) -> Option<&PeripheralAddress> {
        match self {
            Connection::Connecting { address }
            | Connection::ServiceDiscovery { address }
            | Connection::Connected { address, .. } => Some(address),
            Connection::Disconnected | Connection::Scanning { .. } => None,
        }
    }
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    connected: Arc<AtomicBool>,
    channel: Mutex<Option<T::Channel>>,
    unavailable: AtomicBool,
}

/// Handle to the connection task. Every method returns immediately; requests are processed in
/// order by the task, which is the only writer of the link state.
pub struct PeripheralLink<T: Transport> {
    shared: Arc<Shared<T>>,
    commands: UnboundedSender<Message<T::Channel>>,
    state: watch::Receiver<LinkState>,
    cancel: CancellationToken,
}

impl<T: Transport> Clone for PeripheralLink<T> {
    fn clone(&self) -> Self {
        PeripheralLink {
            shared: self.shared.clone(),
            commands: self.commands.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Transport> PeripheralLink<T> {
    /// Connects to `explicit_address` (remembering it), or else to the remembered peripheral, or
    /// else to whatever discovery finds. No-op while connected or connecting.
    pub fn connect(&self, explicit_address: Option<&str>) {
        self.command(Command::Connect(explicit_address.map(str::to_string)));
    }

    /// Starts a scan cycle unless one is already running or a connection exists.
    pub fn start_discovery_loop(&self) {
        self.command(Command::StartDiscovery);
    }

    /// Closes the connection and stops scanning. Automatic reconnects stay off until the next
    /// `connect` or `start_discovery_loop`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Starts a single write of `text`. Returns whether the write was started, not whether the
    /// peripheral received it.
    pub fn send(&self, text: &str) -> bool {
        if !self.shared.connected.load(Ordering::Acquire) {
            return false;
        }

        let channel = match self.shared.channel.lock() {
            Ok(channel) => channel.clone(),
            Err(_) => None,
        };

        let Some(channel) = channel else {
            return false;
        };

        match self.shared.transport.begin_write(&channel, text.as_bytes().to_vec()) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to start write to peripheral: {}", err);
                false
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn connected_signal(&self) -> ConnectedSignal {
        ConnectedSignal(self.shared.connected.clone())
    }

    /// True once the radio turned out to be missing; the link then ignores every request.
    pub fn is_unavailable(&self) -> bool {
        self.shared.unavailable.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// Stops the connection task for good. Pending timers are cancelled and the connection is
    /// closed before the task's handle resolves.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, command: Command) {
        if self.is_unavailable() {
            debug!("Bluetooth is unavailable; ignoring {:?}", command);
            return;
        }

        if self.commands.send(Message::Command(command)).is_err() {
            debug!("Connection task is not running");
        }
    }
}

struct LinkTask<T: Transport> {
    shared: Arc<Shared<T>>,
    store: Arc<dyn PairedDeviceStore>,
    permissions: Arc<dyn PermissionGate>,
    config: LinkConfig,
    cancel: CancellationToken,
    messages: UnboundedSender<Message<T::Channel>>,
    state: Connection<T::Channel>,
    state_sender: watch::Sender<LinkState>,
    senders: Vec<Sender<LinkEvent>>,
    scan_id: u64,
    generation: u64,
    attempt_cancel: Option<CancellationToken>,
    retry_cancel: Option<CancellationToken>,
    auto_reconnect: bool,
}

impl<T: Transport> LinkTask<T> {
    fn transport(&self) -> Arc<T> {
        self.shared.transport.clone()
    }

    fn emit(&mut self, event: LinkEvent) {
        for sender in &mut self.senders {
            if let Err(err) = sender.try_send(event.clone()) {
                if !err.is_disconnected() {
                    warn!("Dropping link event {:?}: receiver is full", event);
                }
            }
        }
    }

    fn transition(&mut self, next: Connection<T::Channel>) -> Connection<T::Channel> {
        let previous_state = self.state.link_state();
        let next_state = next.link_state();

        if let Connection::Connected { channel, .. } = &next {
            if let Ok(mut slot) = self.shared.channel.lock() {
                *slot = Some(channel.clone());
            }
            self.shared.connected.store(true, Ordering::Release);
        }
        else {
            self.shared.connected.store(false, Ordering::Release);
            if let Ok(mut slot) = self.shared.channel.lock() {
                *slot = None;
            }
        }

        let previous = std::mem::replace(&mut self.state, next);

        if previous_state != next_state {
            info!("Link state {} -> {}", previous_state, next_state);
            self.state_sender.send_replace(next_state);
            self.emit(LinkEvent::StateChange(next_state));
        }

        previous
    }

    async fn run(mut self, mut messages: UnboundedReceiver<Message<T::Channel>>) {
        let mut events = match self.transport().events().await {
            Ok(events) => events,
            Err(err) => {
                error!("Failed to subscribe to adapter events: {}; bluetooth is disabled until restart", err);
                self.shared.unavailable.store(true, Ordering::Release);
                stream::pending().boxed()
            },
        };

        'mainloop: loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(message) = messages.recv() => {
                    self.handle_message(message).await;
                },
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Adapter event stream ended");
                        events = stream::pending().boxed();
                    },
                },
            }
        }

        info!("Stopping connection task");
        self.teardown().await;
    }

    async fn handle_message(&mut self, message: Message<T::Channel>) {
        if self.shared.unavailable.load(Ordering::Acquire) {
            return;
        }

        match message {
            Message::Command(Command::Connect(explicit)) => self.connect(explicit).await,
            Message::Command(Command::StartDiscovery) => {
                self.auto_reconnect = true;
                self.start_discovery().await;
            },
            Message::Command(Command::Disconnect) => {
                self.auto_reconnect = false;
                self.teardown().await;
            },
            Message::ScanTimeout(id) => {
                let current = matches!(&self.state, Connection::Scanning { cycle } if cycle.id() == id);
                if current {
                    info!("Scan finished without finding {}", self.config.target_name);
                    self.finish_scan().await;
                    self.schedule_retry(self.config.retry_backoff);
                }
            },
            Message::Retry => {
                self.retry_cancel = None;
                if self.auto_reconnect {
                    self.start_discovery().await;
                }
            },
            Message::ServiceDiscovery(generation) => {
                if generation != self.generation {
                    return;
                }
                if let Connection::Connecting { address } = &self.state {
                    let address = address.clone();
                    self.transition(Connection::ServiceDiscovery { address });
                }
            },
            Message::AttemptFinished(generation, result) => {
                if generation != self.generation {
                    debug!("Ignoring result of an abandoned connection attempt");
                    return;
                }
                self.attempt_cancel = None;
                self.finish_attempt(result).await;
            },
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        if self.shared.unavailable.load(Ordering::Acquire) {
            return;
        }

        match event {
            TransportEvent::Discovered { address, name } => {
                let matched = match &mut self.state {
                    Connection::Scanning { cycle } => cycle.observe(&address, name.as_deref()),
                    _ => false,
                };

                if !matched {
                    return;
                }

                info!("{} found at {}", self.config.target_name, address);
                self.emit(LinkEvent::PeripheralMatched(address.clone()));

                if !self.permissions.can_connect() {
                    warn!("Permission to connect was not granted; not connecting to {}", address);
                    self.finish_scan().await;
                    return;
                }

                self.store.set(ASSISTIVE_DEVICE_KEY, address.as_str());
                self.begin_attempt(address).await;
            },
            TransportEvent::Disconnected { address } => {
                if self.state.address() != Some(&address) {
                    return;
                }

                let was_connected = self.state.link_state() == LinkState::Connected;
                self.abandon_attempt();
                self.transition(Connection::Disconnected);

                if was_connected {
                    warn!("Connection to {} lost", address);
                    if self.auto_reconnect {
                        self.start_discovery().await;
                    }
                }
                else {
                    warn!("{} disconnected while connecting", address);
                    self.schedule_retry(self.config.retry_backoff);
                }
            },
        }
    }

    async fn connect(&mut self, explicit: Option<String>) {
        let state = self.state.link_state();
        if state == LinkState::Connected || state.is_attempting() {
            debug!("Already {}; ignoring connect request", state);
            return;
        }

        if !self.permissions.can_connect() {
            warn!("Permission to connect was not granted");
            return;
        }

        self.auto_reconnect = true;

        let target = match explicit {
            Some(raw) => match PeripheralAddress::parse(&raw) {
                Ok(address) => {
                    self.store.set(ASSISTIVE_DEVICE_KEY, address.as_str());
                    Some(address)
                },
                Err(err) => {
                    warn!("{}; falling back to discovery", err);
                    None
                },
            },
            None => {
                let stored = self.store.get(ASSISTIVE_DEVICE_KEY);
                if stored.is_empty() {
                    None
                }
                else {
                    match PeripheralAddress::parse(&stored) {
                        Ok(address) => Some(address),
                        Err(err) => {
                            warn!("Ignoring remembered peripheral: {}; falling back to discovery", err);
                            None
                        },
                    }
                }
            },
        };

        match target {
            Some(address) => {
                self.cancel_retry();
                self.begin_attempt(address).await;
            },
            None => self.start_discovery().await,
        }
    }

    async fn start_discovery(&mut self) {
        if !matches!(self.state, Connection::Disconnected) {
            debug!("Link is {}; not starting another scan", self.state.link_state());
            return;
        }

        if !self.permissions.can_scan() {
            warn!("Permission to scan was not granted");
            return;
        }

        self.cancel_retry();

        if let Err(err) = self.transport().start_scan().await {
            self.fail(err);
            return;
        }

        self.scan_id += 1;
        debug!("Starting scan cycle {}", self.scan_id);
        let cycle = ScanCycle::start(
            self.scan_id,
            &self.config.target_name,
            &self.cancel,
            self.config.scan_timeout,
            self.messages.clone(),
            Message::ScanTimeout,
        );
        self.transition(Connection::Scanning { cycle });
    }

    // Ends the current scan cycle, if any. Dropping the cycle cancels its timeout.
    async fn finish_scan(&mut self) {
        if !matches!(self.state, Connection::Scanning { .. }) {
            return;
        }

        let previous = self.transition(Connection::Disconnected);
        drop(previous);

        if let Err(err) = self.transport().stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }
    }

    // Moves straight from scanning (if any) to connecting, then connects in the background.
    async fn begin_attempt(&mut self, address: PeripheralAddress) {
        self.abandon_attempt();
        self.generation += 1;

        let generation = self.generation;
        let attempt_cancel = self.cancel.child_token();
        self.attempt_cancel = Some(attempt_cancel.clone());

        info!("Connecting to {}", address);
        let previous = self.transition(Connection::Connecting { address: address.clone() });
        if let Connection::Scanning { cycle } = previous {
            drop(cycle);
            if let Err(err) = self.transport().stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }

        let transport = self.transport();
        let messages = self.messages.clone();

        spawn(async move {
            let attempt = async {
                transport.connect(&address).await?;
                let _ = messages.send(Message::ServiceDiscovery(generation));
                transport.discover_channel(&address).await
            };

            tokio::select! {
                _ = attempt_cancel.cancelled() => {},
                result = attempt => {
                    let _ = messages.send(Message::AttemptFinished(generation, result));
                },
            }
        });
    }

    fn abandon_attempt(&mut self) {
        if let Some(attempt_cancel) = self.attempt_cancel.take() {
            attempt_cancel.cancel();
            self.generation += 1;
        }
    }

    async fn finish_attempt(&mut self, result: Result<T::Channel, LinkError>) {
        let Some(address) = self.state.address().cloned() else {
            return;
        };

        match result {
            Ok(channel) => {
                info!("Peripheral {} ready", address);
                if let Some(greeting) = &self.config.greeting {
                    if let Err(err) = self.shared.transport.begin_write(&channel, greeting.as_bytes().to_vec()) {
                        warn!("Failed to greet peripheral: {}", err);
                    }
                }
                self.transition(Connection::Connected { address, channel });
            },
            Err(err) => {
                warn!("Connecting to {} failed: {}", address, err);
                if let Err(err) = self.transport().disconnect(&address).await {
                    debug!("Cleanup after failed connect: {}", err);
                }
                self.transition(Connection::Disconnected);
                self.fail(err);
            },
        }
    }

    // Applies the failure policy once the link is back in a resting state.
    fn fail(&mut self, err: LinkError) {
        match err.kind() {
            FailureKind::PermissionDenied => {
                warn!("{}; waiting for the next connect request", err);
            },
            FailureKind::TransportUnavailable => {
                error!("{}; bluetooth is disabled until restart", err);
                self.shared.unavailable.store(true, Ordering::Release);
                self.cancel_retry();
            },
            FailureKind::Transient | FailureKind::MalformedTarget => {
                warn!("{}; retrying", err);
                self.schedule_retry(self.config.retry_backoff);
            },
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        if !self.auto_reconnect || self.shared.unavailable.load(Ordering::Acquire) {
            return;
        }

        self.cancel_retry();
        let retry_cancel = self.cancel.child_token();
        self.retry_cancel = Some(retry_cancel.clone());
        let messages = self.messages.clone();

        debug!("Scanning again in {:?}", delay);
        spawn(async move {
            tokio::select! {
                _ = retry_cancel.cancelled() => {},
                _ = sleep(delay) => {
                    let _ = messages.send(Message::Retry);
                },
            }
        });
    }

    fn cancel_retry(&mut self) {
        if let Some(retry_cancel) = self.retry_cancel.take() {
            retry_cancel.cancel();
        }
    }

    // Stops scanning, cancels timers and attempts, and closes the connection.
    async fn teardown(&mut self) {
        self.cancel_retry();
        self.abandon_attempt();

        let previous = self.transition(Connection::Disconnected);
        match previous {
            Connection::Disconnected => {},
            Connection::Scanning { cycle } => {
                drop(cycle);
                if let Err(err) = self.transport().stop_scan().await {
                    warn!("Failed to stop scanning: {}", err);
                }
            },
            Connection::Connecting { address }
            | Connection::ServiceDiscovery { address }
            | Connection::Connected { address, .. } => {
                info!("Disconnecting from {}", address);
                if let Err(err) = self.transport().disconnect(&address).await {
                    warn!("Failed to disconnect from {}: {}", address, err);
                }
            },
        }
    }
}

/// Starts the connection task. The task runs until `cancel` (or [`PeripheralLink::shutdown`])
/// fires; it does not scan or connect until asked to.
pub fn spawn_link<T: Transport>(
    transport: T,
    store: Arc<dyn PairedDeviceStore>,
    permissions: Arc<dyn PermissionGate>,
    config: LinkConfig,
    cancel: CancellationToken,
    senders: Vec<Sender<LinkEvent>>,
) -> (PeripheralLink<T>, JoinHandle<()>) {
    let (messages_tx, messages_rx) = unbounded_channel();
    let (state_sender, state_receiver) = watch::channel(LinkState::Disconnected);

    let shared = Arc::new(Shared {
        transport: Arc::new(transport),
        connected: Arc::new(AtomicBool::new(false)),
        channel: Mutex::new(None),
        unavailable: AtomicBool::new(false),
    });

    let task = LinkTask {
        shared: shared.clone(),
        store,
        permissions,
        config,
        cancel: cancel.clone(),
        messages: messages_tx.clone(),
        state: Connection::Disconnected,
        state_sender,
        senders,
        scan_id: 0,
        generation: 0,
        attempt_cancel: None,
        retry_cancel: None,
        auto_reconnect: false,
    };

    let handle = spawn(task.run(messages_rx));

    let link = PeripheralLink {
        shared,
        commands: messages_tx,
        state: state_receiver,
        cancel,
    };

    return (link, handle);
}
