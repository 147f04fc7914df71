//! Bus I/O errors

use thiserror::Error;

use crate::error::CanError;

#[derive(Debug, Error)]
pub enum BusError {
    /// No frame arrived within the receive timeout
    #[error("no frame received within the timeout")]
    Timeout,

    /// Receive interrupted by a signal
    #[error("receive interrupted")]
    Interrupted,

    #[error("bus I/O error: {0}")]
    Io(String),

    #[error("bus closed")]
    Closed,

    #[error("unknown frame: 0x{0:03X}")]
    UnknownFrame(u32),

    #[error("unknown signal: '{0}'")]
    UnknownSignal(String),

    /// Signals to send do not belong to one frame sent by this node
    #[error("cannot send signals {signals:?}: {reason}")]
    NotSendable { signals: Vec<String>, reason: String },

    #[error("invalid bus configuration: {0}")]
    InvalidConfig(String),

    #[error("bus not supported: {0}")]
    Unsupported(String),

    #[error("codec error: {0}")]
    Codec(#[from] CanError),
}

impl BusError {
    /// Idle conditions of a receive loop, not failures
    pub fn is_idle(&self) -> bool {
        matches!(self, BusError::Timeout | BusError::Interrupted)
    }
}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::Interrupted => BusError::Interrupted,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => BusError::Timeout,
            _ => BusError::Io(e.to_string()),
        }
    }
}
