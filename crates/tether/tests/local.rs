mod common;

use std::collections::HashSet;

use common::{Inbox, connected_clients, id_of};
use tether::{
    LocalClient, LocalServer, LocalServerConfig, MessageEnvelope, MessageSenderExt,
    NetworkClient, NetworkError, NetworkServer,
};

#[test]
fn test_ids_are_unique_among_connected_clients() {
    let server = LocalServer::new();
    server.start();
    let mut clients = connected_clients(&server, 10);

    let ids: HashSet<_> = clients.iter().map(id_of).collect();
    assert_eq!(ids.len(), 10);
    assert!(!ids.contains(&0));

    clients[2].disconnect();
    let late = LocalClient::new(&server);
    late.connect().unwrap();
    assert_eq!(id_of(&late), 3);
    clients.push(late);

    let mut live: Vec<_> = clients.iter().filter_map(|c| c.client_id()).collect();
    live.sort_unstable();
    live.dedup();
    assert_eq!(live.len(), 10);
}

#[test]
fn test_broadcast_reaches_every_other_client_once() {
    let server = LocalServer::new();
    let server_inbox = Inbox::attach_server(&server);
    server.start();
    let clients = connected_clients(&server, 5);
    let inboxes: Vec<_> = clients.iter().map(Inbox::attach).collect();

    let sender = &clients[1];
    sender.send_bytes(MessageEnvelope::new(12), &[7u8; 10]);

    for (client, inbox) in clients.iter().zip(&inboxes) {
        if id_of(client) == id_of(sender) {
            assert_eq!(inbox.len(), 0);
        } else {
            let received = inbox.of_kind(12);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0.recipients, vec![id_of(sender)]);
            assert_eq!(received[0].1.len(), 10);
        }
    }
    assert_eq!(server_inbox.kinds(), vec![12]);
}

#[test]
fn test_server_broadcast_skips_unconnected_clients() {
    let server = LocalServer::new();
    let early = LocalClient::new(&server);
    early.connect().unwrap();
    server.start();

    let unconnected = LocalClient::new(&server);
    let early_inbox = Inbox::attach(&early);
    let unconnected_inbox = Inbox::attach(&unconnected);

    server.send_bytes(MessageEnvelope::reliable(2), b"state");

    assert_eq!(early_inbox.kinds(), vec![2]);
    assert_eq!(unconnected_inbox.len(), 0);
}

#[test]
fn test_server_full_is_reported_by_connect() {
    let server = LocalServer::with_config(LocalServerConfig {
        max_clients: 3,
        ..Default::default()
    });
    server.start();
    let _clients = connected_clients(&server, 3);

    let extra = LocalClient::new(&server);
    assert_eq!(extra.connect(), Err(NetworkError::ServerFull { capacity: 3 }));
    assert!(!extra.connected());
}

#[test]
fn test_clients_reconnect_after_server_restart() {
    let server = LocalServer::new();
    server.start();
    let clients = connected_clients(&server, 2);

    server.stop();
    assert!(clients.iter().all(|c| !c.connected()));

    server.start();
    for client in &clients {
        client.connect().unwrap();
    }
    assert_eq!(server.connected_clients(), vec![1, 2]);
}
