//! In-process transport. A [`LocalServer`] and any number of [`LocalClient`]s
//! route messages synchronously, without touching a socket.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::connection::{ConnectionManager, ConnectionState, DEFAULT_MAX_CLIENTS};
use super::error::NetworkError;
use super::message::{ClientId, MessageEnvelope, MessageSender, NetworkMessage, UNASSIGNED_CLIENT_ID};
use super::transport::{
    ClientDelegateRef, ClientDelegates, NetworkClient, NetworkServer, ReceiverRef,
    ServerDelegateRef, ServerDelegates, deliver_to_client, deliver_to_server,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalServerConfig {
    pub id: String,
    pub max_clients: usize,
}

impl Default for LocalServerConfig {
    fn default() -> Self {
        Self {
            id: String::from("local"),
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

struct ServerState {
    id: String,
    running: bool,
    elapsed: Duration,
    delegates: ServerDelegates,
    receiver: Option<ReceiverRef>,
    connections: ConnectionManager<Weak<RefCell<ClientState>>>,
}

#[derive(Clone)]
pub struct LocalServer {
    state: Rc<RefCell<ServerState>>,
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalServer {
    pub fn new() -> Self {
        Self::with_config(LocalServerConfig::default())
    }

    pub fn with_config(config: LocalServerConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(ServerState {
                id: config.id,
                running: false,
                elapsed: Duration::ZERO,
                delegates: ServerDelegates::default(),
                receiver: None,
                connections: ConnectionManager::new(config.max_clients),
            })),
        }
    }

    /// Moves the clock behind [`NetworkServer::timestamp`].
    pub fn advance(&self, dt: Duration) {
        self.state.borrow_mut().elapsed += dt;
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().connections.capacity()
    }

    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.state
            .borrow()
            .connections
            .ids_in(ConnectionState::Connected)
    }

    fn attach(
        &self,
        client: Weak<RefCell<ClientState>>,
    ) -> Result<(ClientId, bool, ServerDelegates), NetworkError> {
        let mut state = self.state.borrow_mut();
        let client_id = state.connections.reserve(client)?;
        let running = state.running;
        if running {
            if let Some(connection) = state.connections.get_mut(client_id) {
                connection.state = ConnectionState::Connected;
            }
        }
        Ok((client_id, running, state.delegates.clone()))
    }

    fn detach(&self, client_id: ClientId) -> ServerDelegates {
        let mut state = self.state.borrow_mut();
        state.connections.remove(client_id);
        state.delegates.clone()
    }

    fn resolve(&self, recipients: &[ClientId], sender: Option<ClientId>) -> Vec<ClientId> {
        let state = self.state.borrow();
        let mut targets = if recipients.is_empty() {
            state.connections.ids_in(ConnectionState::Connected)
        } else {
            let mut targets = Vec::with_capacity(recipients.len());
            for &id in recipients {
                if !state.connections.is_connected(id) {
                    log::trace!("dropping unknown recipient {}", id);
                } else if !targets.contains(&id) {
                    targets.push(id);
                }
            }
            targets
        };
        if let Some(sender) = sender {
            targets.retain(|&id| id != sender);
        }
        targets
    }

    fn live_clients(&self, targets: &[ClientId]) -> Vec<LocalClientRef> {
        let state = self.state.borrow();
        targets
            .iter()
            .filter(|&&id| state.connections.is_connected(id))
            .filter_map(|&id| state.connections.get(id))
            .filter_map(|c| c.handle.upgrade())
            .map(|state| LocalClientRef { state })
            .collect()
    }

    fn deliver_from_server(&self, targets: &[ClientId], envelope: MessageEnvelope, body: Bytes) {
        let envelope = MessageEnvelope {
            recipients: Vec::new(),
            ..envelope
        };
        for client in self.live_clients(targets) {
            client.receive(&envelope, body.clone());
        }
    }

    fn deliver_from_client(
        &self,
        sender: ClientId,
        targets: &[ClientId],
        envelope: MessageEnvelope,
        body: Bytes,
    ) {
        let (receiver, delegates) = {
            let state = self.state.borrow();
            if !state.connections.is_connected(sender) {
                log::trace!("dropping message from detached client {}", sender);
                return;
            }
            (state.receiver.clone(), state.delegates.clone())
        };

        let envelope = MessageEnvelope {
            recipients: vec![sender],
            ..envelope
        };
        for client in self.live_clients(targets) {
            client.receive(&envelope, body.clone());
        }
        deliver_to_server(receiver.as_ref(), &delegates, &envelope, body);
    }

    fn detach_all(&self) -> (Vec<(ClientId, Option<LocalClientRef>)>, ServerDelegates) {
        let mut state = self.state.borrow_mut();
        let ids: Vec<ClientId> = state.connections.iter().map(|c| c.client_id).collect();
        let detached = ids
            .into_iter()
            .filter_map(|id| state.connections.remove(id))
            .map(|c| {
                let client = c.handle.upgrade().map(|state| LocalClientRef { state });
                (c.client_id, client)
            })
            .collect();
        (detached, state.delegates.clone())
    }
}

impl MessageSender for LocalServer {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        let targets = self.resolve(&envelope.recipients, None);
        let server = self.clone();
        NetworkMessage::new(envelope, move |envelope, body| {
            server.deliver_from_server(&targets, envelope, body)
        })
    }
}

impl NetworkServer for LocalServer {
    fn running(&self) -> bool {
        self.state.borrow().running
    }

    fn id(&self) -> String {
        self.state.borrow().id.clone()
    }

    fn start(&self) {
        let (pending, delegates) = {
            let mut state = self.state.borrow_mut();
            if state.running {
                return;
            }
            state.running = true;
            let pending = state.connections.ids_in(ConnectionState::Pending);
            let mut clients = Vec::with_capacity(pending.len());
            for id in pending {
                if let Some(connection) = state.connections.get_mut(id) {
                    connection.state = ConnectionState::Connected;
                    clients.push((id, connection.handle.upgrade()));
                }
            }
            (clients, state.delegates.clone())
        };

        log::debug!("local server {} started", self.id());
        delegates.started();

        for (client_id, client) in pending {
            if let Some(state) = client {
                LocalClientRef { state }.mark_connected();
            }
            delegates.client_connected(client_id);
        }
    }

    fn stop(&self) {
        {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return;
            }
            state.running = false;
        }

        let (detached, delegates) = self.detach_all();
        log::debug!(
            "local server {} stopped, detaching {} clients",
            self.id(),
            detached.len()
        );

        for (client_id, _) in &detached {
            delegates.client_disconnected(*client_id);
        }
        delegates.stopped();
        for client in detached.into_iter().filter_map(|(_, client)| client) {
            client.mark_detached();
        }
    }

    fn fail(&self, error: NetworkError) {
        let (clients, delegates) = {
            let state = self.state.borrow();
            let clients: Vec<LocalClientRef> = state
                .connections
                .iter()
                .filter(|c| c.state == ConnectionState::Connected)
                .filter_map(|c| c.handle.upgrade())
                .map(|state| LocalClientRef { state })
                .collect();
            (clients, state.delegates.clone())
        };

        log::debug!("local server {} failed: {}", self.id(), error);
        delegates.network_error(&error);
        for client in clients {
            client.delegates().network_error(&error);
        }
        self.stop();
    }

    fn add_delegate(&self, delegate: ServerDelegateRef) {
        let running = {
            let mut state = self.state.borrow_mut();
            state.delegates.add(Rc::clone(&delegate));
            state.running
        };
        if running {
            delegate.on_server_started();
        }
    }

    fn remove_delegate(&self, delegate: &ServerDelegateRef) {
        self.state.borrow_mut().delegates.remove(delegate);
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        self.state.borrow_mut().receiver = receiver;
    }

    fn timestamp(&self) -> i64 {
        self.state.borrow().elapsed.as_millis() as i64
    }
}

struct ClientState {
    client_id: ClientId,
    connected: bool,
    delegates: ClientDelegates,
    receiver: Option<ReceiverRef>,
}

/// Server-side view of a client, used to push events into it.
struct LocalClientRef {
    state: Rc<RefCell<ClientState>>,
}

impl LocalClientRef {
    fn delegates(&self) -> ClientDelegates {
        self.state.borrow().delegates.clone()
    }

    fn receive(&self, envelope: &MessageEnvelope, body: Bytes) {
        let (receiver, delegates) = {
            let state = self.state.borrow();
            (state.receiver.clone(), state.delegates.clone())
        };
        deliver_to_client(receiver.as_ref(), &delegates, envelope, body);
    }

    fn mark_connected(&self) {
        let delegates = {
            let mut state = self.state.borrow_mut();
            state.connected = true;
            state.delegates.clone()
        };
        delegates.connected();
    }

    fn mark_detached(&self) {
        let (was_connected, delegates) = {
            let mut state = self.state.borrow_mut();
            let was_connected = state.connected;
            state.client_id = UNASSIGNED_CLIENT_ID;
            state.connected = false;
            (was_connected, state.delegates.clone())
        };
        if was_connected {
            delegates.disconnected();
        }
    }
}

#[derive(Clone)]
pub struct LocalClient {
    server: LocalServer,
    state: Rc<RefCell<ClientState>>,
}

impl LocalClient {
    pub fn new(server: &LocalServer) -> Self {
        Self {
            server: server.clone(),
            state: Rc::new(RefCell::new(ClientState {
                client_id: UNASSIGNED_CLIENT_ID,
                connected: false,
                delegates: ClientDelegates::default(),
                receiver: None,
            })),
        }
    }

    /// The id assigned by the server, also while waiting for it to start.
    pub fn client_id(&self) -> Option<ClientId> {
        match self.state.borrow().client_id {
            UNASSIGNED_CLIENT_ID => None,
            id => Some(id),
        }
    }

    pub fn server(&self) -> &LocalServer {
        &self.server
    }
}

impl MessageSender for LocalClient {
    fn create_message(&self, envelope: MessageEnvelope) -> NetworkMessage {
        let (client_id, connected) = {
            let state = self.state.borrow();
            (state.client_id, state.connected)
        };
        if !connected {
            log::trace!("client not connected, message of type {} is inert", envelope.kind);
            return NetworkMessage::inert(envelope);
        }

        let targets = self.server.resolve(&envelope.recipients, Some(client_id));
        let server = self.server.clone();
        NetworkMessage::new(envelope, move |envelope, body| {
            server.deliver_from_client(client_id, &targets, envelope, body)
        })
    }
}

impl NetworkClient for LocalClient {
    fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn connect(&self) -> Result<(), NetworkError> {
        if self.state.borrow().client_id != UNASSIGNED_CLIENT_ID {
            return Ok(());
        }

        let (client_id, running, server_delegates) = self.server.attach(Rc::downgrade(&self.state))?;
        let delegates = {
            let mut state = self.state.borrow_mut();
            state.client_id = client_id;
            state.connected = running;
            state.delegates.clone()
        };

        if running {
            log::debug!("local client {} connected", client_id);
            delegates.connected();
            server_delegates.client_connected(client_id);
        } else {
            log::debug!("local client {} waiting for server start", client_id);
        }
        Ok(())
    }

    fn disconnect(&self) {
        let (client_id, was_connected, delegates) = {
            let mut state = self.state.borrow_mut();
            let client_id = state.client_id;
            let was_connected = state.connected;
            state.client_id = UNASSIGNED_CLIENT_ID;
            state.connected = false;
            (client_id, was_connected, state.delegates.clone())
        };
        if client_id == UNASSIGNED_CLIENT_ID {
            return;
        }

        let server_delegates = self.server.detach(client_id);
        if was_connected {
            log::debug!("local client {} disconnected", client_id);
            delegates.disconnected();
            server_delegates.client_disconnected(client_id);
        }
    }

    fn add_delegate(&self, delegate: ClientDelegateRef) {
        let connected = {
            let mut state = self.state.borrow_mut();
            state.delegates.add(Rc::clone(&delegate));
            state.connected
        };
        if connected {
            delegate.on_client_connected();
        }
    }

    fn remove_delegate(&self, delegate: &ClientDelegateRef) {
        self.state.borrow_mut().delegates.remove(delegate);
    }

    fn register_receiver(&self, receiver: Option<ReceiverRef>) {
        self.state.borrow_mut().receiver = receiver;
    }

    fn latency_supported(&self) -> bool {
        false
    }

    fn latency(&self) -> i64 {
        0
    }

    fn timestamp(&self) -> i64 {
        self.server.timestamp()
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        if Rc::strong_count(&self.state) == 1 {
            self.disconnect();
        }
    }
}
