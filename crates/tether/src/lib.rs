pub mod multimatch;
pub mod net;

pub use multimatch::{MatchController, MatchHandler, MatchHandlerFactory, MatchSender, MatchState};
pub use net::{
    ClientDelegate, ClientId, CodecError, LocalClient, LocalServer, LocalServerConfig,
    MessageEnvelope, MessageReceiver, MessageSender, MessageSenderExt, NetworkClient,
    NetworkError, NetworkMessage, NetworkServer, NetworkShareable, NetworkStats, ServerDelegate,
    SimulateClient, SimulateServer, SimulationConfig, StatsClient, StatsConfig, StatsServer,
};
