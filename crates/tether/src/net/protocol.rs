use bytes::Bytes;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::error::CodecError;
use super::message::NetworkShareable;

/// Consumed by the stats decorators, never surfaced to receivers.
pub const LATENCY_PROBE_TYPE: u8 = 254;
pub const MATCH_JOIN_TYPE: u8 = 253;

fn aligned(body: &[u8]) -> AlignedVec<16> {
    let mut aligned = AlignedVec::<16>::with_capacity(body.len());
    aligned.extend_from_slice(body);
    aligned
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MatchJoin {
    pub match_id: String,
}

impl MatchJoin {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(body)).map_err(CodecError::Decode)
    }
}

impl NetworkShareable for MatchJoin {
    fn encode(&self) -> Result<Bytes, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| Bytes::from(aligned.into_vec()))
            .map_err(CodecError::Encode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct LatencyProbe {
    /// Sender's timestamp, echoed back unchanged.
    pub timestamp: i64,
}

impl LatencyProbe {
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(&aligned(body)).map_err(CodecError::Decode)
    }
}

impl NetworkShareable for LatencyProbe {
    fn encode(&self) -> Result<Bytes, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| Bytes::from(aligned.into_vec()))
            .map_err(CodecError::Encode)
    }
}
