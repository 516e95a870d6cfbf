use thiserror::Error;
use warden_keychain::StoreError;
use warden_ssh::{ProtocolError, SignatureError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(u8),
    #[error("no secret matches the requested key")]
    NoMatchingSecret,
    #[error("signing objected to: {0}")]
    Objected(String),
    #[error("backend signing failed: {0}")]
    BackendSigningFailure(#[from] StoreError),
    #[error("signature conversion failed: {0}")]
    Signature(#[from] SignatureError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for AgentError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(err) => AgentError::Io(err),
            other => AgentError::MalformedMessage(other.to_string()),
        }
    }
}
