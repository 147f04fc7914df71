//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("No connection: {0}")]
    NoConnection(String),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Errors worth a reconnect attempt
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost(_)
                | TransportError::NoConnection(_)
                | TransportError::Refused(_)
        )
    }

    /// Errors after which the session cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(TransportError::ConnectionLost("eof".into()).is_recoverable());
        assert!(TransportError::Refused("bad".into()).is_recoverable());
        assert!(!TransportError::Closed.is_recoverable());
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::Other("x".into()).is_fatal());
        assert!(!TransportError::Other("x".into()).is_recoverable());
    }
}
