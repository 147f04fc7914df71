//! Error types for bus descriptions and signal packing

use thiserror::Error;

/// Errors from loading a bus description or converting signal values
#[derive(Debug, Error)]
pub enum CanError {
    /// Frame id not parseable or outside the 29-bit range
    #[error("invalid frame id: {0}")]
    InvalidFrameId(String),

    /// Bus name not present in the description
    #[error("unknown bus: '{0}'")]
    UnknownBus(String),

    /// Description without any bus
    #[error("the bus description does not define any bus")]
    NoBuses,

    /// Frame definition is inconsistent
    #[error("invalid frame {id}: {reason}")]
    InvalidFrame { id: String, reason: String },

    /// Signal layout is inconsistent
    #[error("invalid signal '{signal}': {reason}")]
    InvalidSignal { signal: String, reason: String },

    /// Frame id not in the description
    #[error("unknown frame: 0x{0:03X}")]
    UnknownFrame(u32),

    /// Signal name not in the frame or bus
    #[error("unknown signal: '{0}'")]
    UnknownSignal(String),

    /// Frame payload shorter than the signal layout needs
    #[error("data too short: expected {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },

    /// Physical value cannot be represented by the signal
    #[error("value out of range for '{signal}': {value} not in [{min}, {max}]")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for bus description and codec operations
pub type CanResult<T> = Result<T, CanError>;

/// Largest 29-bit extended frame id
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Largest 11-bit standard frame id
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Parse a frame id given in decimal or hex
///
/// Accepts formats: "256", "0x100", "0X100"
pub fn parse_frame_id(s: &str) -> CanResult<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    match parsed {
        Ok(id) if id <= MAX_EXTENDED_ID => Ok(id),
        _ => Err(CanError::InvalidFrameId(s.to_string())),
    }
}

/// Format a frame id as hex, e.g. `0x104`
pub fn format_frame_id(id: u32) -> String {
    format!("0x{:03X}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_id() {
        assert_eq!(parse_frame_id("8").unwrap(), 8);
        assert_eq!(parse_frame_id("0x104").unwrap(), 0x104);
        assert_eq!(parse_frame_id("0X1FFFFFFF").unwrap(), MAX_EXTENDED_ID);
        assert_eq!(parse_frame_id("  0x9  ").unwrap(), 9);
        assert!(parse_frame_id("0x20000000").is_err());
        assert!(parse_frame_id("frame").is_err());
        assert!(parse_frame_id("-1").is_err());
    }

    #[test]
    fn test_format_frame_id() {
        assert_eq!(format_frame_id(0x104), "0x104");
        assert_eq!(format_frame_id(8), "0x008");
        assert_eq!(format_frame_id(0x18FF0001), "0x18FF0001");
    }
}
