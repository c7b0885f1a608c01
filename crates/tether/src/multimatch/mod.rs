//! Hosts many independent matches on one physical server. Clients pick a
//! match by sending a join message; everything else they send is routed to
//! the handler of the match they belong to.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use bytes::Bytes;

use crate::net::{
    ClientId, MatchJoin, MessageEnvelope, MessageReceiver, MessageSender, NetworkError,
    NetworkMessage, NetworkServer, ReceiverRef, ServerDelegate, ServerDelegateRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Unborn,
    Active,
    Closed,
}

/// What a factory hands back for a new match. Either half may be absent.
#[derive(Clone, Default)]
pub struct MatchHandler {
    pub delegate: Option<ServerDelegateRef>,
    pub receiver: Option<ReceiverRef>,
}

impl MatchHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// One object acting as both delegate and receiver.
    pub fn listener<T: ServerDelegate + MessageReceiver + 'static>(listener: Rc<T>) -> Self {
        Self {
            delegate: Some(listener.clone()),
            receiver: Some(listener),
        }
    }

    pub fn with_delegate(mut self, delegate: ServerDelegateRef) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_receiver(mut self, receiver: ReceiverRef) -> Self {
        self.receiver = Some(receiver);
        self
    }
}

pub trait MatchHandlerFactory {
    /// `None` yields a match that tracks membership but swallows traffic.
    fn create(&self, match_id: &str, sender: MatchSender) -> Option<MatchHandler>;
}

impl<F> MatchHandlerFactory for F
where
    F: Fn(&str, MatchSender) -> Option<MatchHandler>,
{
    fn create(&self, match_id: &str, sender: MatchSender) -> Option<MatchHandler> {
        self(match_id, sender)
    }
}

#[derive(Debug)]
struct MatchRecord {
    id: String,
    state: MatchState,
    members: Vec<ClientId>,
}

/// Sender scoped to one match. An empty recipient list means the match's
/// members, never the whole server.
#[derive(Clone)]
pub struct MatchSender {
    server: Rc<dyn MessageSender>,
    record: Rc<RefCell<MatchRecord>>,
}

impl MatchSender {
    pub fn match_id(&self) -> String {
        self.record.borrow().id.clone()
    }

    pub fn state(&self) -> MatchState {
        self.record.borrow().state
    }

    pub fn members(&self) -> Vec<ClientId> {
        self.record.borrow().members.clone()
    }
}

impl MessageSender for MatchSender {
    fn create_message(&self, mut envelope: MessageEnvelope) -> NetworkMessage {
        {
            let record = self.record.borrow();
            if record.state != MatchState::Active {
                log::trace!("match {} is closed, message is inert", record.id);
                return NetworkMessage::inert(envelope);
            }
            if envelope.is_broadcast() {
                if record.members.is_empty() {
                    return NetworkMessage::inert(envelope);
                }
                envelope.recipients = record.members.clone();
            }
        }
        self.server.create_message(envelope)
    }
}

struct Match {
    record: Rc<RefCell<MatchRecord>>,
    handler: MatchHandler,
}

struct ControllerShared {
    server: Rc<dyn MessageSender>,
    factory: Box<dyn MatchHandlerFactory>,
    join_type: u8,
    matches: RefCell<BTreeMap<String, Match>>,
    clients: RefCell<HashMap<ClientId, String>>,
}

impl ControllerShared {
    fn handler_of(&self, client_id: ClientId) -> Option<MatchHandler> {
        let clients = self.clients.borrow();
        let match_id = clients.get(&client_id)?;
        self.matches
            .borrow()
            .get(match_id)
            .map(|m| m.handler.clone())
    }

    fn handlers(&self) -> Vec<MatchHandler> {
        self.matches
            .borrow()
            .values()
            .map(|m| m.handler.clone())
            .collect()
    }

    fn join(&self, client_id: ClientId, match_id: String) {
        if self.clients.borrow().get(&client_id) == Some(&match_id) {
            return;
        }
        self.leave(client_id);

        let existing = self
            .matches
            .borrow()
            .get(&match_id)
            .map(|m| (Rc::clone(&m.record), m.handler.clone()));
        let (record, handler) = match existing {
            Some(found) => found,
            None => self.open(&match_id),
        };

        record.borrow_mut().members.push(client_id);
        self.clients.borrow_mut().insert(client_id, match_id);
        if let Some(delegate) = &handler.delegate {
            delegate.on_client_connected(client_id);
        }
    }

    fn open(&self, match_id: &str) -> (Rc<RefCell<MatchRecord>>, MatchHandler) {
        let record = Rc::new(RefCell::new(MatchRecord {
            id: match_id.to_owned(),
            state: MatchState::Unborn,
            members: Vec::new(),
        }));
        let sender = MatchSender {
            server: Rc::clone(&self.server),
            record: Rc::clone(&record),
        };
        let handler = self.factory.create(match_id, sender).unwrap_or_else(|| {
            log::debug!("no handler for match {}, traffic will be dropped", match_id);
            MatchHandler::default()
        });

        record.borrow_mut().state = MatchState::Active;
        self.matches.borrow_mut().insert(
            match_id.to_owned(),
            Match {
                record: Rc::clone(&record),
                handler: handler.clone(),
            },
        );
        log::debug!("match {} opened", match_id);

        if let Some(delegate) = &handler.delegate {
            delegate.on_server_started();
        }
        (record, handler)
    }

    fn leave(&self, client_id: ClientId) {
        let Some(match_id) = self.clients.borrow_mut().remove(&client_id) else {
            return;
        };
        let Some((record, handler)) = self
            .matches
            .borrow()
            .get(&match_id)
            .map(|m| (Rc::clone(&m.record), m.handler.clone()))
        else {
            return;
        };

        let now_empty = {
            let mut record = record.borrow_mut();
            record.members.retain(|&id| id != client_id);
            record.members.is_empty()
        };
        if let Some(delegate) = &handler.delegate {
            delegate.on_client_disconnected(client_id);
        }
        if now_empty {
            self.close(&match_id);
        }
    }

    fn close(&self, match_id: &str) {
        let Some(closed) = self.matches.borrow_mut().remove(match_id) else {
            return;
        };
        closed.record.borrow_mut().state = MatchState::Closed;
        log::debug!("match {} closed", match_id);
        if let Some(delegate) = &closed.handler.delegate {
            delegate.on_server_stopped();
        }
    }

    fn close_all(&self) {
        let closed = std::mem::take(&mut *self.matches.borrow_mut());
        self.clients.borrow_mut().clear();
        for (match_id, closed) in closed {
            {
                let mut record = closed.record.borrow_mut();
                record.state = MatchState::Closed;
                record.members.clear();
            }
            log::debug!("match {} closed by server stop", match_id);
            if let Some(delegate) = &closed.handler.delegate {
                delegate.on_server_stopped();
            }
        }
    }
}

struct ControllerListener {
    shared: Weak<ControllerShared>,
}

impl ServerDelegate for ControllerListener {
    fn on_server_stopped(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.close_all();
        }
    }

    fn on_client_disconnected(&self, client_id: ClientId) {
        if let Some(shared) = self.shared.upgrade() {
            shared.leave(client_id);
        }
    }

    fn on_network_error(&self, error: &NetworkError) {
        if let Some(shared) = self.shared.upgrade() {
            for handler in shared.handlers() {
                if let Some(delegate) = &handler.delegate {
                    delegate.on_network_error(error);
                }
            }
        }
    }
}

impl MessageReceiver for ControllerListener {
    fn on_message_received(&self, envelope: &MessageEnvelope, body: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(client_id) = envelope.origin() else {
            log::trace!("dropping message of type {} without origin", envelope.kind);
            return;
        };

        if envelope.kind == shared.join_type {
            match MatchJoin::decode(&body) {
                Ok(join) => shared.join(client_id, join.match_id),
                Err(err) => log::warn!("dropping malformed join from client {}: {}", client_id, err),
            }
            return;
        }

        let Some(handler) = shared.handler_of(client_id) else {
            log::trace!("dropping message from unmatched client {}", client_id);
            return;
        };
        if let Some(receiver) = &handler.receiver {
            receiver.on_message_received(envelope, body);
        }
        if let Some(delegate) = &handler.delegate {
            delegate.on_message_received(envelope);
        }
    }
}

pub struct MatchController<S: NetworkServer + Clone + 'static> {
    server: S,
    shared: Rc<ControllerShared>,
    listener: Rc<ControllerListener>,
}

impl<S: NetworkServer + Clone + 'static> MatchController<S> {
    /// Takes over the server's receiver slot.
    pub fn new(server: S, factory: impl MatchHandlerFactory + 'static, join_type: u8) -> Self {
        let shared = Rc::new(ControllerShared {
            server: Rc::new(server.clone()),
            factory: Box::new(factory),
            join_type,
            matches: RefCell::new(BTreeMap::new()),
            clients: RefCell::new(HashMap::new()),
        });
        let listener = Rc::new(ControllerListener {
            shared: Rc::downgrade(&shared),
        });
        server.add_delegate(listener.clone());
        server.register_receiver(Some(listener.clone()));
        Self {
            server,
            shared,
            listener,
        }
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn join_type(&self) -> u8 {
        self.shared.join_type
    }

    pub fn match_ids(&self) -> Vec<String> {
        self.shared.matches.borrow().keys().cloned().collect()
    }

    pub fn members(&self, match_id: &str) -> Vec<ClientId> {
        self.shared
            .matches
            .borrow()
            .get(match_id)
            .map(|m| m.record.borrow().members.clone())
            .unwrap_or_default()
    }

    pub fn match_of(&self, client_id: ClientId) -> Option<String> {
        self.shared.clients.borrow().get(&client_id).cloned()
    }

    pub fn state(&self, match_id: &str) -> MatchState {
        self.shared
            .matches
            .borrow()
            .get(match_id)
            .map_or(MatchState::Unborn, |m| m.record.borrow().state)
    }

    pub fn len(&self) -> usize {
        self.shared.matches.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.matches.borrow().is_empty()
    }
}

impl<S: NetworkServer + Clone + 'static> Drop for MatchController<S> {
    fn drop(&mut self) {
        let listener: ServerDelegateRef = self.listener.clone();
        self.server.remove_delegate(&listener);
        self.server.register_receiver(None);
    }
}
