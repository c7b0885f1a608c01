use std::collections::BTreeMap;

use super::error::NetworkError;
use super::message::ClientId;

pub const DEFAULT_MAX_CLIENTS: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Id reserved, waiting for the server to run.
    Pending,
    Connected,
}

#[derive(Debug)]
pub struct ClientConnection<T> {
    pub client_id: ClientId,
    pub state: ConnectionState,
    pub handle: T,
}

/// Owns a server's id space. Ids are handed out lowest-free-first from
/// `1..=max_clients`; `0` is never issued.
#[derive(Debug)]
pub struct ConnectionManager<T> {
    clients: BTreeMap<ClientId, ClientConnection<T>>,
    max_clients: usize,
}

impl<T> ConnectionManager<T> {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            max_clients: max_clients.min(ClientId::MAX as usize),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    pub fn reserve(&mut self, handle: T) -> Result<ClientId, NetworkError> {
        let client_id = (1..=self.max_clients)
            .map(|id| id as ClientId)
            .find(|id| !self.clients.contains_key(id))
            .ok_or(NetworkError::ServerFull {
                capacity: self.max_clients,
            })?;

        self.clients.insert(
            client_id,
            ClientConnection {
                client_id,
                state: ConnectionState::Pending,
                handle,
            },
        );
        Ok(client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ClientConnection<T>> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut ClientConnection<T>> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<ClientConnection<T>> {
        self.clients.remove(&client_id)
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.clients
            .get(&client_id)
            .is_some_and(|c| c.state == ConnectionState::Connected)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection<T>> {
        self.clients.values()
    }

    pub fn ids_in(&self, state: ConnectionState) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.state == state)
            .map(|c| c.client_id)
            .collect()
    }
}
