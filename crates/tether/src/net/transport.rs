use std::rc::Rc;

use bytes::Bytes;

use super::error::NetworkError;
use super::message::{ClientId, MessageEnvelope, MessageSender};

/// Receives message bodies. An endpoint holds at most one.
pub trait MessageReceiver {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes);
}

pub trait ClientDelegate {
    fn on_client_connected(&self) {}
    fn on_client_disconnected(&self) {}
    fn on_message_received(&self, _envelope: &MessageEnvelope) {}
    fn on_network_error(&self, _error: &NetworkError) {}
}

pub trait ServerDelegate {
    fn on_server_started(&self) {}
    fn on_server_stopped(&self) {}
    fn on_client_connected(&self, _client_id: ClientId) {}
    fn on_client_disconnected(&self, _client_id: ClientId) {}
    fn on_message_received(&self, _envelope: &MessageEnvelope) {}
    fn on_network_error(&self, _error: &NetworkError) {}
}

pub type ClientDelegateRef = Rc<dyn ClientDelegate>;
pub type ServerDelegateRef = Rc<dyn ServerDelegate>;
pub type ReceiverRef = Rc<dyn MessageReceiver>;

pub trait NetworkClient: MessageSender {
    fn connected(&self) -> bool;
    fn connect(&self) -> Result<(), NetworkError>;
    fn disconnect(&self);
    fn add_delegate(&self, delegate: ClientDelegateRef);
    fn remove_delegate(&self, delegate: &ClientDelegateRef);
    fn register_receiver(&self, receiver: Option<ReceiverRef>);

    fn latency_supported(&self) -> bool;
    /// Round-trip latency in milliseconds.
    fn latency(&self) -> i64;
    /// The transport's view of the server clock, in milliseconds.
    fn timestamp(&self) -> i64;

    fn delay(&self, remote_timestamp: i64) -> i64 {
        self.timestamp() - remote_timestamp
    }
}

pub trait NetworkServer: MessageSender {
    fn running(&self) -> bool;
    fn id(&self) -> String;
    fn start(&self);
    fn stop(&self);
    fn fail(&self, error: NetworkError);
    fn add_delegate(&self, delegate: ServerDelegateRef);
    fn remove_delegate(&self, delegate: &ServerDelegateRef);
    fn register_receiver(&self, receiver: Option<ReceiverRef>);
    fn timestamp(&self) -> i64;
}

/// Ordered listener list. Clone it out of any `RefCell` before notifying so
/// listeners are free to call back into the endpoint.
#[derive(Clone, Default)]
pub struct ClientDelegates(Vec<ClientDelegateRef>);

impl ClientDelegates {
    pub fn add(&mut self, delegate: ClientDelegateRef) {
        self.0.push(delegate);
    }

    pub fn remove(&mut self, delegate: &ClientDelegateRef) -> bool {
        let before = self.0.len();
        self.0.retain(|d| !Rc::ptr_eq(d, delegate));
        self.0.len() != before
    }

    pub fn connected(&self) {
        for delegate in &self.0 {
            delegate.on_client_connected();
        }
    }

    pub fn disconnected(&self) {
        for delegate in &self.0 {
            delegate.on_client_disconnected();
        }
    }

    pub fn message_received(&self, envelope: &MessageEnvelope) {
        for delegate in &self.0 {
            delegate.on_message_received(envelope);
        }
    }

    pub fn network_error(&self, error: &NetworkError) {
        for delegate in &self.0 {
            delegate.on_network_error(error);
        }
    }
}

#[derive(Clone, Default)]
pub struct ServerDelegates(Vec<ServerDelegateRef>);

impl ServerDelegates {
    pub fn add(&mut self, delegate: ServerDelegateRef) {
        self.0.push(delegate);
    }

    pub fn remove(&mut self, delegate: &ServerDelegateRef) -> bool {
        let before = self.0.len();
        self.0.retain(|d| !Rc::ptr_eq(d, delegate));
        self.0.len() != before
    }

    pub fn started(&self) {
        for delegate in &self.0 {
            delegate.on_server_started();
        }
    }

    pub fn stopped(&self) {
        for delegate in &self.0 {
            delegate.on_server_stopped();
        }
    }

    pub fn client_connected(&self, client_id: ClientId) {
        for delegate in &self.0 {
            delegate.on_client_connected(client_id);
        }
    }

    pub fn client_disconnected(&self, client_id: ClientId) {
        for delegate in &self.0 {
            delegate.on_client_disconnected(client_id);
        }
    }

    pub fn message_received(&self, envelope: &MessageEnvelope) {
        for delegate in &self.0 {
            delegate.on_message_received(envelope);
        }
    }

    pub fn network_error(&self, error: &NetworkError) {
        for delegate in &self.0 {
            delegate.on_network_error(error);
        }
    }
}

/// Hands a message to an optional receiver and then to every delegate.
pub(crate) fn deliver_to_client(
    receiver: Option<&ReceiverRef>,
    delegates: &ClientDelegates,
    envelope: &MessageEnvelope,
    body: Bytes,
) {
    if let Some(receiver) = receiver {
        receiver.on_message_received(envelope, body);
    }
    delegates.message_received(envelope);
}

pub(crate) fn deliver_to_server(
    receiver: Option<&ReceiverRef>,
    delegates: &ServerDelegates,
    envelope: &MessageEnvelope,
    body: Bytes,
) {
    if let Some(receiver) = receiver {
        receiver.on_message_received(envelope, body);
    }
    delegates.message_received(envelope);
}
