//! Error types for the protocol layer

use thiserror::Error;

use crate::transport::TransportError;

/// Errors from building or parsing topics
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("wrong topic structure: '{topic}' has {depth} segments, expected 3")]
    WrongDepth { topic: String, depth: usize },

    #[error("unknown message type: '{0}'")]
    UnknownMessageType(String),

    #[error("empty {0} name")]
    EmptySegment(&'static str),

    #[error("invalid {kind} name: '{value}'")]
    InvalidSegment { kind: &'static str, value: String },
}

/// Errors surfaced by a protocol endpoint
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid registration or settings, detected before any traffic
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller misuse, e.g. sending before start()
    #[error("usage error: {0}")]
    Usage(String),

    #[error("topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Error type returned by user handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
