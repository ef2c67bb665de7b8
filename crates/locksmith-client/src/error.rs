//! Client error types for the Locksmith client

use locksmith_api::ProtocolError;

/// Error type for lock client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timeout")]
    Timeout,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
