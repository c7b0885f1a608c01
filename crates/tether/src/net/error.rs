use rkyv::rancor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("server full ({capacity} clients)")]
    ServerFull { capacity: usize },
    #[error("network failure {code}: {reason}")]
    Failure { code: i32, reason: String },
}

impl NetworkError {
    pub fn failure(code: i32, reason: impl Into<String>) -> Self {
        Self::Failure {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(rancor::Error),
    #[error("decoding failed: {0}")]
    Decode(rancor::Error),
}
