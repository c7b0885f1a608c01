mod connection;
mod error;
mod local;
mod message;
mod protocol;
mod simulator;
mod stats;
mod transport;

pub use connection::{ClientConnection, ConnectionManager, ConnectionState, DEFAULT_MAX_CLIENTS};
pub use error::{CodecError, NetworkError};
pub use local::{LocalClient, LocalServer, LocalServerConfig};
pub use message::{
    ClientId, MessageEnvelope, MessageSender, MessageSenderExt, NetworkMessage, NetworkShareable,
    UNASSIGNED_CLIENT_ID,
};
pub use protocol::{LATENCY_PROBE_TYPE, LatencyProbe, MATCH_JOIN_TYPE, MatchJoin};
pub use simulator::{
    Direction, SimulateClient, SimulateServer, SimulationConfig, SimulationQueues,
};
pub use stats::{LatencySamples, NetworkStats, StatsClient, StatsConfig, StatsServer};
pub use transport::{
    ClientDelegate, ClientDelegateRef, ClientDelegates, MessageReceiver, NetworkClient,
    NetworkServer, ReceiverRef, ServerDelegate, ServerDelegateRef, ServerDelegates,
};
