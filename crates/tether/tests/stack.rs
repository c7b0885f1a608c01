mod common;

use std::time::Duration;

use common::{Inbox, Observed, id_of};
use tether::{
    LocalClient, LocalServer, MessageEnvelope, MessageSenderExt, NetworkClient, NetworkServer,
    SimulateClient, SimulateServer, SimulationConfig, StatsClient, StatsConfig, StatsServer,
};

const TICK: Duration = Duration::from_millis(10);

#[test]
fn test_relayed_broadcast_is_counted_by_server_stats() {
    let server = LocalServer::new();
    let stats = StatsServer::new(server.clone());
    let server_inbox = Inbox::attach_server(&stats);
    stats.start();

    let x = LocalClient::new(&server);
    let y = LocalClient::new(&server);
    x.connect().unwrap();
    y.connect().unwrap();
    let y_inbox = Inbox::attach(&y);

    x.send_bytes(MessageEnvelope::new(3), &[1u8; 10]);

    let received = y_inbox.of_kind(3);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.recipients, vec![id_of(&x)]);
    assert_eq!(server_inbox.kinds(), vec![3]);
    assert_eq!(stats.bytes_received(), 10);
    assert_eq!(stats.stats().messages_received, 1);
}

#[test]
fn test_client_stats_count_both_directions() {
    let server = LocalServer::new();
    server.start();
    let client = StatsClient::new(LocalClient::new(&server));
    let _inbox = Inbox::attach(&client);
    client.connect().unwrap();

    client.send_bytes(MessageEnvelope::reliable(4), b"hello");
    server.send_bytes(MessageEnvelope::new(4), b"abc");

    let stats = client.stats();
    assert_eq!(stats.bytes_sent, 5);
    assert_eq!(stats.bytes_received, 3);

    client.disconnect();
    client.connect().unwrap();
    assert_eq!(client.bytes_sent(), 0);
}

#[test]
fn test_fixed_delay_holds_until_deadline() {
    let server = LocalServer::new();
    let simulated = SimulateServer::new(
        server.clone(),
        SimulationConfig {
            emission_delay_mean: 0.1,
            ..Default::default()
        },
    );
    simulated.start();
    let client = LocalClient::new(&server);
    client.connect().unwrap();
    let inbox = Inbox::attach(&client);

    simulated.send_bytes(MessageEnvelope::reliable(1), b"late");
    assert_eq!(simulated.pending_emission(), 1);

    simulated.advance(Duration::from_millis(99));
    assert_eq!(inbox.len(), 0);

    simulated.advance(Duration::from_millis(1));
    assert_eq!(inbox.kinds(), vec![1]);
    assert_eq!(simulated.pending_emission(), 0);
}

#[test]
fn test_unblocking_emission_flushes_in_order() {
    let server = LocalServer::new();
    let server_inbox = Inbox::attach_server(&server);
    server.start();
    let client = SimulateClient::new(LocalClient::new(&server), SimulationConfig::default());
    client.connect().unwrap();

    client.set_block_emission(true);
    for kind in 1..=3 {
        client.send_bytes(MessageEnvelope::reliable(kind), b"queued");
    }
    assert_eq!(client.pending_emission(), 3);
    assert_eq!(server_inbox.len(), 0);

    client.set_block_emission(false);
    assert_eq!(server_inbox.kinds(), vec![1, 2, 3]);
}

#[test]
fn test_disconnect_discards_simulated_traffic() {
    let server = LocalServer::new();
    server.start();
    let client = SimulateClient::new(
        LocalClient::new(&server),
        SimulationConfig::symmetric(0.5, 0.0),
    );
    client.connect().unwrap();

    client.send_bytes(MessageEnvelope::reliable(1), b"never");
    server.send_bytes(MessageEnvelope::reliable(2), b"never");
    assert_eq!(client.pending_emission(), 1);
    assert_eq!(client.pending_reception(), 1);

    client.disconnect();
    assert_eq!(client.pending_emission(), 0);
    assert_eq!(client.pending_reception(), 0);
}

#[test]
fn test_probe_measures_simulated_round_trip() {
    let server = LocalServer::new();
    let server_stats = StatsServer::new(server.clone());
    let server_inbox = Inbox::attach_server(&server_stats);
    server_stats.start();

    let simulated = SimulateClient::new(
        LocalClient::new(&server),
        SimulationConfig::symmetric(0.05, 0.0),
    );
    let client = StatsClient::with_config(
        simulated.clone(),
        StatsConfig {
            probe_interval_secs: 1.0,
        },
    );
    let client_inbox = Inbox::attach(&client);
    client.connect().unwrap();
    assert!(client.latency_supported());
    assert_eq!(client.latency(), 0);

    for _ in 0..150 {
        server.advance(TICK);
        simulated.advance(TICK);
        client.update(TICK);
    }

    let samples = client.latency_samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(client.latency(), 100);
    assert_eq!(client.stats().latency_max, 100);

    assert_eq!(client_inbox.len(), 0);
    assert_eq!(server_inbox.len(), 0);
    assert_eq!(client.bytes_sent(), 0);
    assert_eq!(server_stats.bytes_received(), 0);
}

#[test]
fn test_dropped_decorators_release_inner_client() {
    let server = LocalServer::new();
    server.start();
    let local = Observed::new(LocalClient::new(&server));

    let simulated = SimulateClient::new(local.clone(), SimulationConfig::default());
    let handle = simulated.clone();
    assert_eq!(local.delegate_count(), 1);
    assert!(local.has_receiver());

    drop(simulated);
    assert_eq!(local.delegate_count(), 1);
    drop(handle);
    assert_eq!(local.delegate_count(), 0);
    assert!(!local.has_receiver());

    let stats = StatsClient::new(local.clone());
    assert_eq!(local.delegate_count(), 1);
    drop(stats);
    assert_eq!(local.delegate_count(), 0);
    assert!(!local.has_receiver());

    let inbox = Inbox::attach(&local);
    local.connect().unwrap();
    server.send_bytes(MessageEnvelope::new(1), b"direct");
    assert_eq!(inbox.kinds(), vec![1]);
}

#[test]
fn test_dropped_decorators_release_inner_server() {
    let local = LocalServer::new();
    let server = Observed::new(local.clone());

    let simulated = SimulateServer::new(server.clone(), SimulationConfig::default());
    let stats = StatsServer::new(server.clone());
    assert_eq!(server.delegate_count(), 2);

    drop(simulated);
    drop(stats);
    assert_eq!(server.delegate_count(), 0);
    assert!(!server.has_receiver());

    let inbox = Inbox::attach_server(&server);
    server.start();
    let client = LocalClient::new(&local);
    client.connect().unwrap();
    client.send_bytes(MessageEnvelope::new(2), b"direct");
    assert_eq!(inbox.kinds(), vec![2]);
}

#[test]
fn test_server_reception_delay_and_block() {
    let server = LocalServer::new();
    let simulated = SimulateServer::new(
        server.clone(),
        SimulationConfig {
            reception_delay_mean: 0.05,
            ..Default::default()
        },
    );
    let inbox = Inbox::attach_server(&simulated);
    simulated.start();
    let client = LocalClient::new(&server);
    client.connect().unwrap();

    client.send_bytes(MessageEnvelope::reliable(1), b"up");
    assert_eq!(simulated.pending_reception(), 1);
    simulated.advance(Duration::from_millis(49));
    assert_eq!(inbox.len(), 0);
    simulated.advance(Duration::from_millis(1));
    assert_eq!(inbox.kinds(), vec![1]);

    simulated.set_config(SimulationConfig::default());
    simulated.set_block_reception(true);
    client.send_bytes(MessageEnvelope::reliable(2), b"held");
    client.send_bytes(MessageEnvelope::reliable(3), b"held");
    simulated.advance(Duration::from_secs(1));
    assert_eq!(simulated.pending_reception(), 2);
    assert_eq!(inbox.kinds(), vec![1]);

    simulated.set_block_reception(false);
    assert_eq!(inbox.kinds(), vec![1, 2, 3]);
    assert_eq!(simulated.pending_reception(), 0);
}

#[test]
fn test_server_stop_discards_queued_traffic() {
    let server = LocalServer::new();
    let simulated = SimulateServer::new(server.clone(), SimulationConfig::symmetric(0.5, 0.0));
    let server_inbox = Inbox::attach_server(&simulated);
    simulated.start();
    let client = LocalClient::new(&server);
    client.connect().unwrap();
    let client_inbox = Inbox::attach(&client);

    client.send_bytes(MessageEnvelope::reliable(1), b"up");
    simulated.send_bytes(MessageEnvelope::reliable(2), b"down");
    assert_eq!(simulated.pending_reception(), 1);
    assert_eq!(simulated.pending_emission(), 1);

    simulated.stop();
    assert_eq!(simulated.pending_reception(), 0);
    assert_eq!(simulated.pending_emission(), 0);

    simulated.start();
    client.connect().unwrap();
    assert_eq!(simulated.pending_emission(), 0);
    simulated.advance(Duration::from_secs(1));
    assert_eq!(server_inbox.len(), 0);
    assert_eq!(client_inbox.len(), 0);
}

#[test]
fn test_queued_broadcast_skips_late_joiners() {
    let server = LocalServer::new();
    let simulated = SimulateServer::new(
        server.clone(),
        SimulationConfig {
            emission_delay_mean: 0.1,
            ..Default::default()
        },
    );
    simulated.start();
    let early = LocalClient::new(&server);
    early.connect().unwrap();
    let early_inbox = Inbox::attach(&early);

    simulated.send_bytes(MessageEnvelope::reliable(1), b"before");
    let late = LocalClient::new(&server);
    late.connect().unwrap();
    let late_inbox = Inbox::attach(&late);

    simulated.advance(Duration::from_millis(100));
    assert_eq!(early_inbox.kinds(), vec![1]);
    assert_eq!(late_inbox.len(), 0);

    simulated.send_bytes(MessageEnvelope::reliable(2), b"after");
    simulated.advance(Duration::from_millis(100));
    assert_eq!(early_inbox.kinds(), vec![1, 2]);
    assert_eq!(late_inbox.kinds(), vec![2]);
}

#[test]
fn test_unbounded_probe_interval_never_probes() {
    let server = LocalServer::new();
    let server_stats = StatsServer::new(server.clone());
    server_stats.start();

    for interval in [1e20, f64::INFINITY] {
        let simulated = SimulateClient::new(LocalClient::new(&server), SimulationConfig::default());
        let client = StatsClient::with_config(
            simulated.clone(),
            StatsConfig {
                probe_interval_secs: interval,
            },
        );
        client.connect().unwrap();
        for _ in 0..10 {
            client.update(Duration::from_secs(3600));
        }
        assert!(client.latency_samples().is_empty());
        client.disconnect();
    }
}
