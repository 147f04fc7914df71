//! Core types for CAN signal handling

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical signal values keyed by signal name
pub type SignalValues = BTreeMap<String, f64>;

/// Bit numbering of a signal inside its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel layout, `start_bit` is the least significant bit
    #[default]
    Little,
    /// Motorola layout, `start_bit` is the most significant bit (DBC numbering)
    Big,
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        })
    }
}

/// Direction of a frame as seen from the ego node(s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Produced by another node, received here
    Inbound,
    /// Produced by one of the ego nodes, sent from here
    Outbound,
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameDirection::Inbound => "inbound",
            FrameDirection::Outbound => "outbound",
        })
    }
}
