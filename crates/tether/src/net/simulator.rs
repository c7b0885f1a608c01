//! Network impairment. [`SimulateClient`] and [`SimulateServer`] wrap any
//! transport and hold traffic in per-direction queues until the driver's
//! clock says it is due.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::NetworkError;
use super::message::{ClientId, MessageEnvelope, MessageSender, MessageSenderExt, NetworkMessage};
use super::transport::{
    ClientDelegate, ClientDelegateRef, ClientDelegates, MessageReceiver, NetworkClient,
    NetworkServer, ReceiverRef, ServerDelegate, ServerDelegateRef, ServerDelegates,
    deliver_to_client, deliver_to_server,
};

/// Delays in seconds. A sampled delay is `max(0, mean + uniform(-variance, variance))`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub reception_delay_mean: f64,
    pub reception_delay_variance: f64,
    pub emission_delay_mean: f64,
    pub emission_delay_variance: f64,
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn symmetric(mean: f64, variance: f64) -> Self {
        Self {
            reception_delay_mean: mean,
            reception_delay_variance: variance,
            emission_delay_mean: mean,
            emission_delay_variance: variance,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Emission,
    Reception,
}

#[derive(Debug)]
struct DelayedMessage {
    deliver_at: Duration,
    envelope: MessageEnvelope,
    body: Bytes,
}

#[derive(Debug, Default)]
struct DirectionQueue {
    entries: VecDeque<DelayedMessage>,
    reliable_watermark: Duration,
    blocked: bool,
    flushing: bool,
}

impl DirectionQueue {
    fn take_due(&mut self, now: Duration) -> Vec<DelayedMessage> {
        if self.blocked {
            return Vec::new();
        }
        let (due, pending): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.deliver_at <= now);
        self.entries = pending;
        let mut due = Vec::from(due);
        // stable: ties keep queue order
        due.sort_by_key(|entry| entry.deliver_at);
        due
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.reliable_watermark = Duration::ZERO;
    }
}

/// The queueing engine shared by both decorator variants.
pub struct SimulationQueues {
    config: SimulationConfig,
    rng: StdRng,
    now: Duration,
    emission: DirectionQueue,
    reception: DirectionQueue,
}

impl SimulationQueues {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng,
            now: Duration::ZERO,
            emission: DirectionQueue::default(),
            reception: DirectionQueue::default(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SimulationConfig) {
        if let Some(seed) = config.seed {
            if self.config.seed != Some(seed) {
                self.rng = StdRng::seed_from_u64(seed);
            }
        }
        self.config = config;
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn pending(&self, direction: Direction) -> usize {
        self.queue(direction).entries.len()
    }

    pub fn blocked(&self, direction: Direction) -> bool {
        self.queue(direction).blocked
    }

    pub fn set_blocked(&mut self, direction: Direction, blocked: bool) {
        self.queue_mut(direction).blocked = blocked;
    }

    pub fn advance_clock(&mut self, dt: Duration) {
        self.now = self.now.saturating_add(dt);
    }

    pub fn clear(&mut self) {
        self.emission.clear();
        self.reception.clear();
    }

    fn queue(&self, direction: Direction) -> &DirectionQueue {
        match direction {
            Direction::Emission => &self.emission,
            Direction::Reception => &self.reception,
        }
    }

    fn queue_mut(&mut self, direction: Direction) -> &mut DirectionQueue {
        match direction {
            Direction::Emission => &mut self.emission,
            Direction::Reception => &mut self.reception,
        }
    }

    fn sample_delay(&mut self, direction: Direction) -> Duration {
        let (mean, variance) = match direction {
            Direction::Emission => (
                self.config.emission_delay_mean,
                self.config.emission_delay_variance,
            ),
            Direction::Reception => (
                self.config.reception_delay_mean,
                self.config.reception_delay_variance,
            ),
        };
        let jitter = if variance > 0.0 {
            // the sampled range width must stay finite
            let variance = variance.min(f64::MAX / 4.0);
            self.rng.gen_range(-variance..=variance)
        } else {
            0.0
        };
        Duration::try_from_secs_f64((mean + jitter).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Queues a message, or hands it straight back when it may pass through now.
    pub fn schedule(
        &mut self,
        direction: Direction,
        envelope: MessageEnvelope,
        body: Bytes,
    ) -> Option<(MessageEnvelope, Bytes)> {
        let delay = self.sample_delay(direction);
        let now = self.now;
        let queue = self.queue_mut(direction);

        let mut deliver_at = now.saturating_add(delay);
        if envelope.reliable {
            deliver_at = deliver_at.max(queue.reliable_watermark);
            queue.reliable_watermark = deliver_at;
        }

        if !queue.blocked && !queue.flushing && deliver_at <= now {
            return Some((envelope, body));
        }
        queue.entries.push_back(DelayedMessage {
            deliver_at,
            envelope,
            body,
        });
        None
    }

    /// Delivers everything due in one direction. Messages scheduled by the
    /// deliveries themselves are picked up before returning.
    pub fn flush(
        queues: &RefCell<Self>,
        direction: Direction,
        mut deliver: impl FnMut(MessageEnvelope, Bytes),
    ) {
        {
            let mut queues = queues.borrow_mut();
            let queue = queues.queue_mut(direction);
            if queue.flushing {
                return;
            }
            queue.flushing = true;
        }

        loop {
            let due = {
                let mut queues = queues.borrow_mut();
                let now = queues.now;
                queues.queue_mut(direction).take_due(now)
            };
            if due.is_empty() {
                break;
            }
            for entry in due {
                deliver(entry.envelope, entry.body);
            }
        }

        queues.borrow_mut().queue_mut(direction).flushing = false;
    }
}

struct ClientShared {
    queues: RefCell<SimulationQueues>,
    delegates: RefCell<ClientDelegates>,
    receiver: RefCell<Option<ReceiverRef>>,
}

impl ClientShared {
    fn receive_now(&self, envelope: MessageEnvelope, body: Bytes) {
        let receiver = self.receiver.borrow().clone();
        let delegates = self.delegates.borrow().clone();
        deliver_to_client(receiver.as_ref(), &delegates, &envelope, body);
    }

    fn delegates(&self) -> ClientDelegates {
        self.delegates.borrow().clone()
    }
}

/// Registered on the wrapped client in place of the decorator's own listeners.
struct ClientListener {
    shared: Weak<ClientShared>,
}

impl ClientDelegate for ClientListener {
    fn on_client_connected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().connected();
        }
    }

    fn on_client_disconnected(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.queues.borrow_mut().clear();
            shared.delegates().disconnected();
        }
    }

    fn on_network_error(&self, error: &NetworkError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().network_error(error);
        }
    }
}

impl MessageReceiver for ClientListener {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let ready = shared
            .queues
            .borrow_mut()
            .schedule(Direction::Reception, envelope.clone(), body);
        if let Some((envelope, body)) = ready {
            shared.receive_now(envelope, body);
        }
    }
}

pub struct SimulateClient<C: NetworkClient + Clone + 'static> {
    inner: C,
    shared: Rc<ClientShared>,
    listener: Rc<ClientListener>,
}

impl<C: NetworkClient + Clone + 'static> SimulateClient<C> {
    pub fn new(inner: C, config: SimulationConfig) -> Self {
        let shared = Rc::new(ClientShared {
            queues: RefCell::new(SimulationQueues::new(config)),
            delegates: RefCell::new(ClientDelegates::default()),
            receiver: RefCell::new(None),
        });
        let listener = Rc::new(ClientListener {
            shared: Rc::downgrade(&shared),
        });
        inner.add_delegate(listener.clone());
        inner.register_receiver(Some(listener.clone()));
        Self {
            inner,
            shared,
            listener,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn config(&self) -> SimulationConfig {
        self.shared.queues.borrow().config().clone()
    }

    pub fn set_config(&self, config: SimulationConfig) {
        self.shared.queues.borrow_mut().set_config(config);
    }

    pub fn now(&self) -> Duration {
        self.shared.queues.borrow().now()
    }

    pub fn pending_emission(&self) -> usize {
        self.shared.queues.borrow().pending(Direction::Emission)
    }

    pub fn pending_reception(&self) -> usize {
        self.shared.queues.borrow().pending(Direction::Reception)
    }

    pub fn advance(&self, dt: Duration) {
        self.shared.queues.borrow_mut().advance_clock(dt);
        self.flush(Direction::Emission);
        self.flush(Direction::Reception);
    }

    pub fn block_emission(&self) -> bool {
        self.shared.queues.borrow().blocked(Direction::Emission)
    }

    pub fn set_block_emission(&self, blocked: bool) {
        self.set_blocked(Direction::Emission, blocked);
    }

    pub fn block_reception(&self) -> bool {
        self.shared.queues.borrow().blocked(Direction::Reception)
    }

    pub fn set_block_reception(&self, blocked: bool) {
        self.set_blocked(Direction::Reception, blocked);
    }

    pub fn clear_simulation_data(&self) {
        self.shared.queues.borrow_mut().clear();
    }

    fn set_blocked(&self, direction: Direction, blocked: bool) {
        self.shared.queues.borrow_mut().set_blocked(direction, blocked);
        if !blocked {
            self.flush(direction);
        }
    }

    fn flush(&self, direction: Direction) {
        match direction {
            Direction::Emission => {
                SimulationQueues::flush(&self.shared.queues, direction, |envelope, body| {
                    self.inner.send_bytes(envelope, &body)
                })
            }
            Direction::Reception => {
                SimulationQueues::flush(&self.shared.queues, direction, |envelope, body| {
                    self.shared.receive_now(envelope, body)
                })
            }
        }
    }
}

impl<C: NetworkClient + Clone + 'static> Clone for SimulateClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: Rc::clone(&self.shared),
            listener: Rc::clone(&self.listener),
        }
    }
}

impl<C: NetworkClient + Clone + 'static> MessageSender for SimulateClient<C> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        if !self.inner.connected() {
            return NetworkMessage::inert(envelope);
        }
        let inner = self.inner.clone();
        let shared = Rc::clone(&self.shared);
        NetworkMessage::new(envelope, move |envelope, body| {
            let ready = shared
                .queues
                .borrow_mut()
                .schedule(Direction::Emission, envelope, body);
            if let Some((envelope, body)) = ready {
                inner.send_bytes(envelope, &body);
            }
        })
    }
}

impl<C: NetworkClient + Clone + 'static> NetworkClient for SimulateClient<C> {
    fn connected(&self) -> bool {
        self.inner.connected()
    }

    fn connect(&self) -> Result<(), NetworkError> {
        self.clear_simulation_data();
        self.inner.connect()
    }

    fn disconnect(&self) {
        self.inner.disconnect();
        self.clear_simulation_data();
    }

    fn add_delegate(&self, delegate: ClientDelegateRef) {
        self.shared.delegates.borrow_mut().add(Rc::clone(&delegate));
        if self.inner.connected() {
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
        self.inner.latency_supported()
    }

    fn latency(&self) -> i64 {
        self.inner.latency()
    }

    fn timestamp(&self) -> i64 {
        self.inner.timestamp()
    }

    fn delay(&self, remote_timestamp: i64) -> i64 {
        self.inner.delay(remote_timestamp)
    }
}

impl<C: NetworkClient + Clone + 'static> Drop for SimulateClient<C> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.shared) == 1 {
            let listener: ClientDelegateRef = self.listener.clone();
            self.inner.remove_delegate(&listener);
            self.inner.register_receiver(None);
        }
    }
}

struct ServerShared {
    queues: RefCell<SimulationQueues>,
    delegates: RefCell<ServerDelegates>,
    receiver: RefCell<Option<ReceiverRef>>,
    /// Clients seen connecting through the inner server, in connection order.
    clients: RefCell<Vec<ClientId>>,
}

impl ServerShared {
    fn receive_now(&self, envelope: MessageEnvelope, body: Bytes) {
        let receiver = self.receiver.borrow().clone();
        let delegates = self.delegates.borrow().clone();
        deliver_to_server(receiver.as_ref(), &delegates, &envelope, body);
    }

    fn delegates(&self) -> ServerDelegates {
        self.delegates.borrow().clone()
    }
}

struct ServerListener {
    shared: Weak<ServerShared>,
}

impl ServerDelegate for ServerListener {
    fn on_server_started(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.queues.borrow_mut().clear();
            shared.delegates().started();
        }
    }

    fn on_server_stopped(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.queues.borrow_mut().clear();
            shared.clients.borrow_mut().clear();
            shared.delegates().stopped();
        }
    }

    fn on_client_connected(&self, client_id: ClientId) {
        if let Some(shared) = self.shared.upgrade() {
            {
                let mut clients = shared.clients.borrow_mut();
                if !clients.contains(&client_id) {
                    clients.push(client_id);
                }
            }
            shared.delegates().client_connected(client_id);
        }
    }

    fn on_client_disconnected(&self, client_id: ClientId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.clients.borrow_mut().retain(|&id| id != client_id);
            shared.delegates().client_disconnected(client_id);
        }
    }

    fn on_network_error(&self, error: &NetworkError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.delegates().network_error(error);
        }
    }
}

impl MessageReceiver for ServerListener {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let ready = shared
            .queues
            .borrow_mut()
            .schedule(Direction::Reception, envelope.clone(), body);
        if let Some((envelope, body)) = ready {
            shared.receive_now(envelope, body);
        }
    }
}

/// Server side impairment. A broadcast is addressed when it is sent, to the
/// clients that connected through this decorator, so a client connecting while
/// the message is queued does not receive it. Wrap the server before starting it.
pub struct SimulateServer<S: NetworkServer + Clone + 'static> {
    inner: S,
    shared: Rc<ServerShared>,
    listener: Rc<ServerListener>,
}

impl<S: NetworkServer + Clone + 'static> SimulateServer<S> {
    pub fn new(inner: S, config: SimulationConfig) -> Self {
        let shared = Rc::new(ServerShared {
            queues: RefCell::new(SimulationQueues::new(config)),
            delegates: RefCell::new(ServerDelegates::default()),
            receiver: RefCell::new(None),
            clients: RefCell::new(Vec::new()),
        });
        let listener = Rc::new(ServerListener {
            shared: Rc::downgrade(&shared),
        });
        inner.add_delegate(listener.clone());
        inner.register_receiver(Some(listener.clone()));
        Self {
            inner,
            shared,
            listener,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn config(&self) -> SimulationConfig {
        self.shared.queues.borrow().config().clone()
    }

    pub fn set_config(&self, config: SimulationConfig) {
        self.shared.queues.borrow_mut().set_config(config);
    }

    pub fn now(&self) -> Duration {
        self.shared.queues.borrow().now()
    }

    pub fn pending_emission(&self) -> usize {
        self.shared.queues.borrow().pending(Direction::Emission)
    }

    pub fn pending_reception(&self) -> usize {
        self.shared.queues.borrow().pending(Direction::Reception)
    }

    pub fn advance(&self, dt: Duration) {
        self.shared.queues.borrow_mut().advance_clock(dt);
        self.flush(Direction::Emission);
        self.flush(Direction::Reception);
    }

    pub fn block_emission(&self) -> bool {
        self.shared.queues.borrow().blocked(Direction::Emission)
    }

    pub fn set_block_emission(&self, blocked: bool) {
        self.set_blocked(Direction::Emission, blocked);
    }

    pub fn block_reception(&self) -> bool {
        self.shared.queues.borrow().blocked(Direction::Reception)
    }

    pub fn set_block_reception(&self, blocked: bool) {
        self.set_blocked(Direction::Reception, blocked);
    }

    pub fn clear_simulation_data(&self) {
        self.shared.queues.borrow_mut().clear();
    }

    fn set_blocked(&self, direction: Direction, blocked: bool) {
        self.shared.queues.borrow_mut().set_blocked(direction, blocked);
        if !blocked {
            self.flush(direction);
        }
    }

    fn flush(&self, direction: Direction) {
        match direction {
            Direction::Emission => {
                SimulationQueues::flush(&self.shared.queues, direction, |envelope, body| {
                    self.inner.send_bytes(envelope, &body)
                })
            }
            Direction::Reception => {
                SimulationQueues::flush(&self.shared.queues, direction, |envelope, body| {
                    self.shared.receive_now(envelope, body)
                })
            }
        }
    }
}

impl<S: NetworkServer + Clone + 'static> Clone for SimulateServer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: Rc::clone(&self.shared),
            listener: Rc::clone(&self.listener),
        }
    }
}

impl<S: NetworkServer + Clone + 'static> MessageSender for SimulateServer<S> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        let inner = self.inner.clone();
        let shared = Rc::clone(&self.shared);
        NetworkMessage::new(envelope, move |mut envelope, body| {
            if envelope.is_broadcast() {
                let clients = shared.clients.borrow().clone();
                if clients.is_empty() {
                    log::trace!("no clients connected, dropping broadcast of type {}", envelope.kind);
                    return;
                }
                envelope.recipients = clients;
            }
            let ready = shared
                .queues
                .borrow_mut()
                .schedule(Direction::Emission, envelope, body);
            if let Some((envelope, body)) = ready {
                inner.send_bytes(envelope, &body);
            }
        })
    }
}

impl<S: NetworkServer + Clone + 'static> NetworkServer for SimulateServer<S> {
    fn running(&self) -> bool {
        self.inner.running()
    }

    fn id(&self) -> String {
        self.inner.id()
    }

    fn start(&self) {
        self.clear_simulation_data();
        self.inner.start();
    }

    fn stop(&self) {
        self.inner.stop();
        self.clear_simulation_data();
    }

    fn fail(&self, error: NetworkError) {
        self.inner.fail(error);
    }

    fn add_delegate(&self, delegate: ServerDelegateRef) {
        self.shared.delegates.borrow_mut().add(Rc::clone(&delegate));
        if self.inner.running() {
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
        self.inner.timestamp()
    }
}

impl<S: NetworkServer + Clone + 'static> Drop for SimulateServer<S> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.shared) == 1 {
            let listener: ServerDelegateRef = self.listener.clone();
            self.inner.remove_delegate(&listener);
            self.inner.register_receiver(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues(mean: f64, variance: f64) -> SimulationQueues {
        SimulationQueues::new(SimulationConfig {
            seed: Some(7),
            ..SimulationConfig::symmetric(mean, variance)
        })
    }

    fn drain(queues: &RefCell<SimulationQueues>, direction: Direction) -> Vec<u8> {
        let mut kinds = Vec::new();
        SimulationQueues::flush(queues, direction, |envelope, _| kinds.push(envelope.kind));
        kinds
    }

    #[test]
    fn test_zero_delay_passes_through() {
        let mut queues = queues(0.0, 0.0);
        let ready = queues.schedule(Direction::Emission, MessageEnvelope::new(1), Bytes::new());
        assert!(ready.is_some());
        assert_eq!(queues.pending(Direction::Emission), 0);
    }

    #[test]
    fn test_zero_delay_is_held_while_blocked() {
        let queues = RefCell::new(queues(0.0, 0.0));
        queues.borrow_mut().set_blocked(Direction::Reception, true);
        let ready = queues
            .borrow_mut()
            .schedule(Direction::Reception, MessageEnvelope::new(1), Bytes::new());
        assert!(ready.is_none());
        assert!(drain(&queues, Direction::Reception).is_empty());

        queues.borrow_mut().set_blocked(Direction::Reception, false);
        assert_eq!(drain(&queues, Direction::Reception), vec![1]);
    }

    #[test]
    fn test_unrepresentable_delay_stays_pending() {
        for (mean, variance) in [(1e20, 0.0), (f64::INFINITY, 0.0), (1.0, f64::INFINITY)] {
            let queues = RefCell::new(queues(mean, variance));
            let ready = queues
                .borrow_mut()
                .schedule(Direction::Emission, MessageEnvelope::reliable(1), Bytes::new());
            if variance == 0.0 {
                assert!(ready.is_none());
            }

            queues.borrow_mut().advance_clock(Duration::from_secs(3600));
            queues.borrow_mut().advance_clock(Duration::MAX);
            let delivered = drain(&queues, Direction::Emission);
            assert_eq!(delivered.len() + usize::from(ready.is_some()), 1);
        }
    }

    #[test]
    fn test_delivery_exactly_at_deadline() {
        let queues = RefCell::new(queues(0.1, 0.0));
        queues
            .borrow_mut()
            .schedule(Direction::Emission, MessageEnvelope::new(1), Bytes::new());

        queues.borrow_mut().advance_clock(Duration::from_millis(99));
        assert!(drain(&queues, Direction::Emission).is_empty());

        queues.borrow_mut().advance_clock(Duration::from_millis(1));
        assert_eq!(drain(&queues, Direction::Emission), vec![1]);
    }

    #[test]
    fn test_reliable_messages_never_overtake() {
        let queues = RefCell::new(queues(0.0, 0.0));
        for kind in 0..20u8 {
            let mut q = queues.borrow_mut();
            q.set_config(SimulationConfig {
                emission_delay_mean: 0.05 * f64::from(20 - kind),
                seed: Some(7),
                ..Default::default()
            });
            q.schedule(Direction::Emission, MessageEnvelope::reliable(kind), Bytes::new());
            q.advance_clock(Duration::from_millis(10));
        }
        queues.borrow_mut().advance_clock(Duration::from_secs(5));
        assert_eq!(drain(&queues, Direction::Emission), (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_reliable_order_survives_jitter() {
        let queues = RefCell::new(queues(0.3, 0.2));
        for kind in 0..50u8 {
            let mut q = queues.borrow_mut();
            q.schedule(Direction::Reception, MessageEnvelope::reliable(kind), Bytes::new());
            q.advance_clock(Duration::from_millis(5));
        }
        let mut delivered = Vec::new();
        for _ in 0..100 {
            queues.borrow_mut().advance_clock(Duration::from_millis(10));
            delivered.extend(drain(&queues, Direction::Reception));
        }
        assert_eq!(delivered, (0..50).collect::<Vec<u8>>());
    }

    #[test]
    fn test_unreliable_may_overtake() {
        let queues = RefCell::new(queues(0.0, 0.0));
        {
            let mut q = queues.borrow_mut();
            q.set_config(SimulationConfig {
                emission_delay_mean: 0.5,
                ..Default::default()
            });
            q.schedule(Direction::Emission, MessageEnvelope::new(1), Bytes::new());
            q.set_config(SimulationConfig {
                emission_delay_mean: 0.1,
                ..Default::default()
            });
            q.schedule(Direction::Emission, MessageEnvelope::new(2), Bytes::new());
            q.advance_clock(Duration::from_secs(1));
        }
        assert_eq!(drain(&queues, Direction::Emission), vec![2, 1]);
    }

    #[test]
    fn test_clear_resets_watermark() {
        let mut queues = queues(0.0, 0.0);
        queues.set_config(SimulationConfig {
            emission_delay_mean: 1.0,
            ..Default::default()
        });
        queues.schedule(Direction::Emission, MessageEnvelope::reliable(1), Bytes::new());
        queues.clear();
        assert_eq!(queues.pending(Direction::Emission), 0);

        queues.set_config(SimulationConfig::default());
        let ready = queues.schedule(Direction::Emission, MessageEnvelope::reliable(2), Bytes::new());
        assert!(ready.is_some());
    }
}
