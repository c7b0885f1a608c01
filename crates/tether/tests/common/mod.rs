#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use tether::net::{ClientDelegateRef, ReceiverRef, ServerDelegateRef};
use tether::{
    ClientId, LocalClient, LocalServer, MessageEnvelope, MessageReceiver, MessageSender,
    NetworkClient, NetworkError, NetworkMessage, NetworkServer,
};

#[derive(Default)]
pub struct Inbox {
    messages: RefCell<Vec<(MessageEnvelope, Bytes)>>,
}

impl Inbox {
    pub fn attach(client: &impl NetworkClient) -> Rc<Self> {
        let inbox = Rc::new(Self::default());
        client.register_receiver(Some(inbox.clone()));
        inbox
    }

    pub fn attach_server(server: &impl NetworkServer) -> Rc<Self> {
        let inbox = Rc::new(Self::default());
        server.register_receiver(Some(inbox.clone()));
        inbox
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn kinds(&self) -> Vec<u8> {
        self.messages.borrow().iter().map(|(e, _)| e.kind).collect()
    }

    pub fn of_kind(&self, kind: u8) -> Vec<(MessageEnvelope, Bytes)> {
        self.messages
            .borrow()
            .iter()
            .filter(|(e, _)| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl MessageReceiver for Inbox {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        self.messages.borrow_mut().push((envelope.clone(), body));
    }
}

pub fn connected_clients(server: &LocalServer, count: usize) -> Vec<LocalClient> {
    (0..count)
        .map(|_| {
            let client = LocalClient::new(server);
            client.connect().unwrap();
            client
        })
        .collect()
}

pub fn id_of(client: &LocalClient) -> ClientId {
    client.client_id().unwrap()
}

/// Forwards to a wrapped endpoint while counting the listeners registered on it.
#[derive(Clone)]
pub struct Observed<T> {
    inner: T,
    delegates: Rc<Cell<usize>>,
    receiver: Rc<Cell<bool>>,
}

impl<T> Observed<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            delegates: Rc::new(Cell::new(0)),
            receiver: Rc::new(Cell::new(false)),
        }
    }

    pub fn delegate_count(&self) -> usize {
        self.delegates.get()
    }

    pub fn has_receiver(&self) -> bool {
        self.receiver.get()
    }

    fn added(&self) {
        self.delegates.set(self.delegates.get() + 1);
    }

    fn removed(&self) {
        self.delegates.set(self.delegates.get().saturating_sub(1));
    }
}

impl<T: MessageSender> MessageSender for Observed<T> {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        self.inner.create_message(envelope)
    }
}

impl<T: NetworkClient> NetworkClient for Observed<T> {
    fn connected(&self) -> bool {
        self.inner.connected()
    }

    fn connect(&self) -> Result<(), NetworkError> {
        self.inner.connect()
    }

    fn disconnect(&self) {
        self.inner.disconnect()
    }

    fn add_delegate(&self, delegate: ClientDelegateRef) {
        self.added();
        self.inner.add_delegate(delegate)
    }

    fn remove_delegate(&self, delegate: &ClientDelegateRef) {
        self.removed();
        self.inner.remove_delegate(delegate)
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        self.receiver.set(receiver.is_some());
        self.inner.register_receiver(receiver)
    }

    fn latency_supported(&self) -> bool {
        self.inner.latency_supported()
    }

    fn latency(&self) -> i64 {
        self.inner.latency()
    }

    fn timestamp(&self) -> i64 {
        NetworkClient::timestamp(&self.inner)
    }
}

impl<T: NetworkServer> NetworkServer for Observed<T> {
    fn running(&self) -> bool {
        self.inner.running()
    }

    fn id(&self) -> String {
        self.inner.id()
    }

    fn start(&self) {
        self.inner.start()
    }

    fn stop(&self) {
        self.inner.stop()
    }

    fn fail(&self, error: NetworkError) {
        self.inner.fail(error)
    }

    fn add_delegate(&self, delegate: ServerDelegateRef) {
        self.added();
        self.inner.add_delegate(delegate)
    }

    fn remove_delegate(&self, delegate: &ServerDelegateRef) {
        self.removed();
        self.inner.remove_delegate(delegate)
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        self.receiver.set(receiver.is_some());
        self.inner.register_receiver(receiver)
    }

    fn timestamp(&self) -> i64 {
        NetworkServer::timestamp(&self.inner)
    }
}
