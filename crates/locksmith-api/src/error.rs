//! Protocol error types

/// A request or reply that cannot be decoded
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing {0}")]
    MissingArgument(&'static str),

    #[error("{0} unexpected trailing argument(s)")]
    TrailingArguments(usize),

    #[error("invalid lock mode '{0}', expected READ or WRITE")]
    InvalidMode(String),

    #[error("invalid {field} '{value}': must be non-empty and contain no whitespace")]
    InvalidToken { field: &'static str, value: String },

    #[error("unknown reply '{0}'")]
    UnknownReply(String),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
