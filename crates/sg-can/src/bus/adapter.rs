//! Frame I/O trait and frame type

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::BusError;
use crate::error::{format_frame_id, MAX_STANDARD_ID};

/// Raw CAN frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
    /// 29-bit identifier
    pub extended: bool,
}

impl CanFrame {
    /// Frame with the id format implied by the id value
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
            extended: id > MAX_STANDARD_ID,
        }
    }

    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", format_frame_id(self.id))?;
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        f.write_str("]")
    }
}

/// Raw frame access to a CAN interface
#[async_trait]
pub trait FrameIo: Send + Sync {
    /// Wait for the next frame, failing with [`BusError::Timeout`]
    async fn recv(&self, timeout: Duration) -> Result<CanFrame, BusError>;

    async fn send(&self, frame: &CanFrame) -> Result<(), BusError>;

    /// Interface name, for logging
    fn interface(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_display() {
        let frame = CanFrame::new(9, vec![0x03, 0x31, 0x00]);
        assert_eq!(frame.to_string(), "0x009 [03 31 00]");
    }
}
