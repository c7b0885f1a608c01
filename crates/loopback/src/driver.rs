use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes};
use tether::net::{MATCH_JOIN_TYPE, MatchJoin, UNASSIGNED_CLIENT_ID};
use tether::{
    ClientId, LocalClient, LocalServer, MatchController, MatchHandler, MatchSender,
    MessageEnvelope, MessageReceiver, MessageSender, MessageSenderExt, NetworkClient,
    NetworkServer, ServerDelegate, SimulateClient, SimulateServer, StatsClient, StatsServer,
};

use crate::config::LoopbackConfig;

pub const MOVE_TYPE: u8 = 1;
pub const STATE_TYPE: u8 = 2;

type ServerStack = StatsServer<SimulateServer<LocalServer>>;
type ClientStack = StatsClient<SimulateClient<LocalClient>>;

pub struct FixedTimestep {
    dt: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            dt: Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64),
            accumulator: Duration::ZERO,
        }
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(Duration::from_millis(250));
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }
}

/// Match logic: every member move is rebroadcast to the match as a state update.
struct Relay {
    match_id: String,
    sender: MatchSender,
    moves: Cell<u64>,
}

impl ServerDelegate for Relay {
    fn on_server_started(&self) {
        log::info!("match {} started", self.match_id);
    }

    fn on_server_stopped(&self) {
        log::info!("match {} closed after {} moves", self.match_id, self.moves.get());
    }

    fn on_client_connected(&self, client_id: ClientId) {
        log::debug!("client {} joined match {}", client_id, self.match_id);
    }

    fn on_client_disconnected(&self, client_id: ClientId) {
        log::debug!("client {} left match {}", client_id, self.match_id);
    }
}

impl MessageReceiver for Relay {
    fn on_message_received(&self, envelope: &MessageEnvelope, mut body: Bytes) {
        if envelope.kind != MOVE_TYPE || body.remaining() < 4 {
            return;
        }
        let tick = body.get_u32();
        self.moves.set(self.moves.get() + 1);

        let mut message = self.sender.create_message(MessageEnvelope::new(STATE_TYPE));
        let writer = message.writer();
        writer.put_u8(envelope.origin().unwrap_or_default());
        writer.put_u32(tick);
        message.send();
    }
}

#[derive(Default)]
struct Tally {
    states: Cell<u64>,
    /// Moves relayed from other clients; the server should be their only reader.
    stray_moves: Cell<u64>,
}

impl MessageReceiver for Tally {
    fn on_message_received(&self, envelope: &MessageEnvelope, _body: Bytes) {
        match envelope.kind {
            STATE_TYPE => self.states.set(self.states.get() + 1),
            MOVE_TYPE => self.stray_moves.set(self.stray_moves.get() + 1),
            _ => {}
        }
    }
}

struct Player {
    local: LocalClient,
    simulated: SimulateClient<LocalClient>,
    client: ClientStack,
    tally: Rc<Tally>,
}

/// An in-process server plus a set of simulated players, all decorated with
/// impairment and stats, driven by one clock.
pub struct Loopback {
    config: LoopbackConfig,
    local: LocalServer,
    simulated: SimulateServer<LocalServer>,
    server: ServerStack,
    controller: MatchController<ServerStack>,
    players: Vec<Player>,
    tick: u32,
    since_report: Duration,
}

impl Loopback {
    pub fn new(config: LoopbackConfig) -> Result<Self> {
        let local = LocalServer::with_config(config.server.clone());
        let simulated = SimulateServer::new(local.clone(), config.server_simulation.clone());
        let server = StatsServer::new(simulated.clone());
        let controller = MatchController::new(
            server.clone(),
            |match_id: &str, sender: MatchSender| -> Option<MatchHandler> {
                Some(MatchHandler::listener(Rc::new(Relay {
                    match_id: match_id.to_owned(),
                    sender,
                    moves: Cell::new(0),
                })))
            },
            MATCH_JOIN_TYPE,
        );
        server.start();
        log::info!(
            "server {} started, capacity {}",
            server.id(),
            local.capacity()
        );

        let matches = config.matches.max(1);
        let mut players = Vec::with_capacity(config.clients);
        for index in 0..config.clients {
            let local_client = LocalClient::new(&local);
            let simulated_client =
                SimulateClient::new(local_client.clone(), config.client_simulation(index));
            let client = StatsClient::with_config(simulated_client.clone(), config.stats.clone());
            let tally = Rc::new(Tally::default());
            client.register_receiver(Some(tally.clone()));

            client
                .connect()
                .with_context(|| format!("connecting client {}", index))?;
            let join = MatchJoin::new(format!("match-{}", index % matches));
            client
                .send_shareable(MessageEnvelope::reliable(MATCH_JOIN_TYPE), &join)
                .context("encoding match join")?;

            players.push(Player {
                local: local_client,
                simulated: simulated_client,
                client,
                tally,
            });
        }

        Ok(Self {
            config,
            local,
            simulated,
            server,
            controller,
            players,
            tick: 0,
            since_report: Duration::ZERO,
        })
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn match_count(&self) -> usize {
        self.controller.len()
    }

    pub fn states_received(&self) -> Vec<u64> {
        self.players.iter().map(|p| p.tally.states.get()).collect()
    }

    pub fn stray_moves(&self) -> u64 {
        self.players.iter().map(|p| p.tally.stray_moves.get()).sum()
    }

    pub fn step(&mut self, dt: Duration) {
        self.tick += 1;
        self.local.advance(dt);
        self.simulated.advance(dt);

        for player in &self.players {
            player.simulated.advance(dt);
            player.client.update(dt);

            let envelope = MessageEnvelope::new(MOVE_TYPE).to([UNASSIGNED_CLIENT_ID]);
            let mut message = player.client.create_message(envelope);
            message.writer().put_u32(self.tick);
            message.send();
        }

        self.since_report += dt;
        if self.since_report.as_secs_f64() >= self.config.report_interval_secs {
            self.since_report = Duration::ZERO;
            self.report();
        }
    }

    /// Runs for the configured duration. Without `realtime` the clock is
    /// purely simulated and the run finishes as fast as it can.
    pub fn run(&mut self, realtime: bool) {
        let mut timestep = FixedTimestep::new(self.config.tick_rate);
        let dt = timestep.dt();
        let total = (self.config.duration_secs * self.config.tick_rate as f64).round() as u64;
        log::info!(
            "running {} ticks of {:?} ({})",
            total,
            dt,
            if realtime { "realtime" } else { "simulated" }
        );

        let mut ticks = 0;
        if realtime {
            let mut last = Instant::now();
            while ticks < total {
                let now = Instant::now();
                timestep.accumulate(now - last);
                last = now;
                while ticks < total && timestep.consume_tick() {
                    self.step(dt);
                    ticks += 1;
                }
                thread::sleep(Duration::from_millis(1));
            }
        } else {
            while ticks < total {
                self.step(dt);
                ticks += 1;
            }
        }

        self.report();
        self.shutdown();
    }

    fn report(&self) {
        let stats = self.server.stats();
        log::info!(
            "tick {}: server in {} msgs / {} B, out {} msgs / {} B, {} matches",
            self.tick,
            stats.messages_received,
            stats.bytes_received,
            stats.messages_sent,
            stats.bytes_sent,
            self.match_count()
        );
        for player in &self.players {
            let stats = player.client.stats();
            log::info!(
                "  client {:?}: latency {} ms (min {}, max {}, {} samples), up {} B, down {} B, {} states",
                player.local.client_id(),
                player.client.latency(),
                stats.latency_min,
                stats.latency_max,
                stats.latency_samples,
                stats.bytes_sent,
                stats.bytes_received,
                player.tally.states.get()
            );
        }
    }

    fn shutdown(&self) {
        for player in &self.players {
            player.client.disconnect();
        }
        self.server.stop();
        log::info!("server stopped, {} matches left", self.controller.len());
    }
}
