//! Traffic accounting. [`StatsClient`] and [`StatsServer`] count bytes that
//! cross them and measure round-trip latency with probe messages when the
//! wrapped transport cannot report it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::NetworkError;
use super::message::{
    ClientId, MessageEnvelope, MessageSender, MessageSenderExt, NetworkMessage,
    UNASSIGNED_CLIENT_ID,
};
use super::protocol::{LATENCY_PROBE_TYPE, LatencyProbe};
use super::transport::{
    ClientDelegate, ClientDelegateRef, ClientDelegates, MessageReceiver, NetworkClient,
    NetworkServer, ReceiverRef, ServerDelegate, ServerDelegateRef, ServerDelegates,
    deliver_to_client, deliver_to_server,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub probe_interval_secs: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub latency_min: i64,
    pub latency_avg: i64,
    pub latency_max: i64,
    pub latency_samples: usize,
}

/// Round-trip samples kept sorted, so min/max/average are O(1) reads.
#[derive(Debug, Clone, Default)]
pub struct LatencySamples {
    samples: Vec<i64>,
    sum: i64,
}

impl LatencySamples {
    pub fn insert(&mut self, sample: i64) {
        let pos = self.samples.partition_point(|&s| s <= sample);
        self.samples.insert(pos, sample);
        self.sum += sample;
    }

    pub fn min(&self) -> Option<i64> {
        self.samples.first().copied()
    }

    pub fn max(&self) -> Option<i64> {
        self.samples.last().copied()
    }

    pub fn average(&self) -> Option<i64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as i64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Traffic {
    bytes_sent: u64,
    bytes_received: u64,
    messages_sent: u64,
    messages_received: u64,
}

impl Traffic {
    fn record_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.messages_sent += 1;
    }

    fn record_received(&mut self, len: usize) {
        self.bytes_received += len as u64;
        self.messages_received += 1;
    }

    fn snapshot(&self, latency: &LatencySamples) -> NetworkStats {
        NetworkStats {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            latency_min: latency.min().unwrap_or(0),
            latency_avg: latency.average().unwrap_or(0),
            latency_max: latency.max().unwrap_or(0),
            latency_samples: latency.len(),
        }
    }
}

struct ClientShared<C> {
    inner: C,
    probe_interval: Duration,
    since_probe: Cell<Duration>,
    traffic: RefCell<Traffic>,
    latency: RefCell<LatencySamples>,
    delegates: RefCell<ClientDelegates>,
    receiver: RefCell<Option<ReceiverRef>>,
}

impl<C: NetworkClient> ClientShared<C> {
    fn delegates(&self) -> ClientDelegates {
        self.delegates.borrow().clone()
    }

    fn reset(&self) {
        *self.traffic.borrow_mut() = Traffic::default();
        self.latency.borrow_mut().clear();
        self.since_probe.set(Duration::ZERO);
    }

    fn handle_probe(&self, envelope: &MessageEnvelope, body: &[u8]) {
        if envelope.origin().is_some() {
            log::trace!("swallowing probe relayed from client {:?}", envelope.origin());
            return;
        }
        match LatencyProbe::decode(body) {
            Ok(probe) => {
                let rtt = self.inner.delay(probe.timestamp);
                log::trace!("latency sample {} ms", rtt);
                self.latency.borrow_mut().insert(rtt);
            }
            Err(err) => log::warn!("dropping malformed latency probe: {}", err),
        }
    }
}

struct ClientListener<C> {
    shared: Weak<ClientShared<C>>,
}

impl<C: NetworkClient> ClientDelegate for ClientListener<C> {
    fn on_client_connected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().connected();
        }
    }

    fn on_client_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().disconnected();
        }
    }

    fn on_network_error(&self, error: &NetworkError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().network_error(error);
        }
    }
}

impl<C: NetworkClient> MessageReceiver for ClientListener<C> {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if envelope.kind == LATENCY_PROBE_TYPE {
            shared.handle_probe(envelope, &body);
            return;
        }
        shared.traffic.borrow_mut().record_received(body.len());
        let receiver = shared.receiver.borrow().clone();
        deliver_to_client(receiver.as_ref(), &shared.delegates(), envelope, body);
    }
}

pub struct StatsClient<C: NetworkClient + Clone + 'static> {
    shared: Rc<ClientShared<C>>,
    listener: Rc<ClientListener<C>>,
}

impl<C: NetworkClient + Clone + 'static> StatsClient<C> {
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, StatsConfig::default())
    }

    pub fn with_config(inner: C, config: StatsConfig) -> Self {
        let shared = Rc::new(ClientShared {
            inner,
            probe_interval: Duration::try_from_secs_f64(config.probe_interval_secs.max(0.0))
                .unwrap_or(Duration::MAX),
            since_probe: Cell::new(Duration::ZERO),
            traffic: RefCell::new(Traffic::default()),
            latency: RefCell::new(LatencySamples::default()),
            delegates: RefCell::new(ClientDelegates::default()),
            receiver: RefCell::new(None),
        });
        let listener = Rc::new(ClientListener {
            shared: Rc::downgrade(&shared),
        });
        shared.inner.add_delegate(listener.clone());
        shared.inner.register_receiver(Some(listener.clone()));
        Self { shared, listener }
    }

    pub fn inner(&self) -> &C {
        &self.shared.inner
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared
            .traffic
            .borrow()
            .snapshot(&self.shared.latency.borrow())
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.traffic.borrow().bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.traffic.borrow().bytes_received
    }

    pub fn latency_samples(&self) -> LatencySamples {
        self.shared.latency.borrow().clone()
    }

    /// Drives latency probing when the wrapped client has no native latency.
    pub fn update(&self, dt: Duration) {
        let inner = &self.shared.inner;
        if inner.latency_supported() || !inner.connected() {
            return;
        }
        let elapsed = self.shared.since_probe.get().saturating_add(dt);
        if elapsed < self.shared.probe_interval {
            self.shared.since_probe.set(elapsed);
            return;
        }
        self.shared.since_probe.set(Duration::ZERO);
        self.send_probe();
    }

    /// Sends one probe immediately. Addressed to no client, so only the
    /// server sees it.
    pub fn send_probe(&self) {
        let inner = &self.shared.inner;
        let probe = LatencyProbe {
            timestamp: inner.timestamp(),
        };
        let envelope = MessageEnvelope::reliable(LATENCY_PROBE_TYPE).to([UNASSIGNED_CLIENT_ID]);
        if let Err(err) = inner.send_shareable(envelope, &probe) {
            log::warn!("failed to send latency probe: {}", err);
        }
    }
}

impl<C: NetworkClient + Clone + 'static> Clone for StatsClient<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            listener: Rc::clone(&self.listener),
        }
    }
}

impl<C: NetworkClient + Clone + 'static> MessageSender for StatsClient<C> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        if !self.shared.inner.connected() {
            return NetworkMessage::inert(envelope);
        }
        let shared = Rc::clone(&self.shared);
        NetworkMessage::new(envelope, move |envelope, body| {
            shared.traffic.borrow_mut().record_sent(body.len());
            shared.inner.send_bytes(envelope, &body);
        })
    }
}

impl<C: NetworkClient + Clone + 'static> NetworkClient for StatsClient<C> {
    fn connected(&self) -> bool {
        self.shared.inner.connected()
    }

    fn connect(&self) -> Result<(), NetworkError> {
        self.shared.reset();
        self.shared.inner.connect()
    }

    fn disconnect(&self) {
        self.shared.inner.disconnect();
    }

    fn add_delegate(&self, delegate: ClientDelegateRef) {
        self.shared.delegates.borrow_mut().add(Rc::clone(&delegate));
        if self.shared.inner.connected() {
            delegate.on_client_connected();
        }
    }

    fn remove_delegate(&self, delegate: &ClientDelegateRef) {
        self.shared.delegates.borrow_mut().remove(delegate);
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        *self.shared.receiver.borrow_mut() = receiver;
    }

    fn latency_supported(&self) -> bool {
        true
    }

    fn latency(&self) -> i64 {
        if self.shared.inner.latency_supported() {
            self.shared.inner.latency()
        } else {
            self.shared.latency.borrow().average().unwrap_or(0)
        }
    }

    fn timestamp(&self) -> i64 {
        self.shared.inner.timestamp()
    }

    fn delay(&self, remote_timestamp: i64) -> i64 {
        self.shared.inner.delay(remote_timestamp)
    }
}

impl<C: NetworkClient + Clone + 'static> Drop for StatsClient<C> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.shared) == 1 {
            let listener: ClientDelegateRef = self.listener.clone();
            self.shared.inner.remove_delegate(&listener);
            self.shared.inner.register_receiver(None);
        }
    }
}

struct ServerShared<S> {
    inner: S,
    traffic: RefCell<Traffic>,
    delegates: RefCell<ServerDelegates>,
    receiver: RefCell<Option<ReceiverRef>>,
}

impl<S: NetworkServer> ServerShared<S> {
    fn delegates(&self) -> ServerDelegates {
        self.delegates.borrow().clone()
    }

    fn echo_probe(&self, origin: Option<ClientId>, body: &[u8]) {
        match origin {
            Some(client_id) => self
                .inner
                .send_bytes(MessageEnvelope::reliable(LATENCY_PROBE_TYPE).to([client_id]), body),
            None => log::trace!("dropping probe without origin"),
        }
    }
}

struct ServerListener<S> {
    shared: Weak<ServerShared<S>>,
}

impl<S: NetworkServer> ServerDelegate for ServerListener<S> {
    fn on_server_started(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().started();
        }
    }

    fn on_server_stopped(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().stopped();
        }
    }

    fn on_client_connected(&self, client_id: ClientId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().client_connected(client_id);
        }
    }

    fn on_client_disconnected(&self, client_id: ClientId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().client_disconnected(client_id);
        }
    }

    fn on_network_error(&self, error: &NetworkError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().network_error(error);
        }
    }
}

impl<S: NetworkServer> MessageReceiver for ServerListener<S> {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if envelope.kind == LATENCY_PROBE_TYPE {
            shared.echo_probe(envelope.origin(), &body);
            return;
        }
        shared.traffic.borrow_mut().record_received(body.len());
        let receiver = shared.receiver.borrow().clone();
        deliver_to_server(receiver.as_ref(), &shared.delegates(), envelope, body);
    }
}

/// Server-side counters are never reset; a server outlives its clients.
pub struct StatsServer<S: NetworkServer + Clone + 'static> {
    shared: Rc<ServerShared<S>>,
    listener: Rc<ServerListener<S>>,
}

impl<S: NetworkServer + Clone + 'static> StatsServer<S> {
    pub fn new(inner: S) -> Self {
        let shared = Rc::new(ServerShared {
            inner,
            traffic: RefCell::new(Traffic::default()),
            delegates: RefCell::new(ServerDelegates::default()),
            receiver: RefCell::new(None),
        });
        let listener = Rc::new(ServerListener {
            shared: Rc::downgrade(&shared),
        });
        shared.inner.add_delegate(listener.clone());
        shared.inner.register_receiver(Some(listener.clone()));
        Self { shared, listener }
    }

    pub fn inner(&self) -> &S {
        &self.shared.inner
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared
            .traffic
            .borrow()
            .snapshot(&LatencySamples::default())
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.traffic.borrow().bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.traffic.borrow().bytes_received
    }
}

impl<S: NetworkServer + Clone + 'static> Clone for StatsServer<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
            listener: Rc::clone(&self.listener),
        }
    }
}

impl<S: NetworkServer + Clone + 'static> MessageSender for StatsServer<S> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        let shared = Rc::clone(&self.shared);
        NetworkMessage::new(envelope, move |envelope, body| {
            shared.traffic.borrow_mut().record_sent(body.len());
            shared.inner.send_bytes(envelope, &body);
        })
    }
}

impl<S: NetworkServer + Clone + 'static> NetworkServer for StatsServer<S> {
    fn running(&self) -> bool {
        self.shared.inner.running()
    }

    fn id(&self) -> String {
        self.shared.inner.id()
    }

    fn start(&self) {
        self.shared.inner.start();
    }

    fn stop(&self) {
        self.shared.inner.stop();
    }

    fn fail(&self, error: NetworkError) {
        self.shared.inner.fail(error);
    }

    fn add_delegate(&self, delegate: ServerDelegateRef) {
        self.shared.delegates.borrow_mut().add(Rc::clone(&delegate));
        if self.shared.inner.running() {
            delegate.on_server_started();
        }
    }

    fn remove_delegate(&self, delegate: &ServerDelegateRef) {
        self.shared.delegates.borrow_mut().remove(delegate);
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        *self.shared.receiver.borrow_mut() = receiver;
    }

    fn timestamp(&self) -> i64 {
        self.shared.inner.timestamp()
    }
}

impl<S: NetworkServer + Clone + 'static> Drop for StatsServer<S> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.shared) == 1 {
            let listener: ServerDelegateRef = self.listener.clone();
            self.shared.inner.remove_delegate(&listener);
            self.shared.inner.register_receiver(None);
        }
    }
}
