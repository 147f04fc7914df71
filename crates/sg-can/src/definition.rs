//! Frame and signal definitions
//!
//! A frame carries up to 64 bytes of payload. Each signal occupies a run of
//! bits in that payload:
//!
//! - `little`: `start_bit` is the least significant bit, following bits
//!   count upwards (`byte * 8 + bit`)
//! - `big`: `start_bit` is the most significant bit in DBC numbering, the
//!   walk continues downwards inside a byte and wraps to the top bit of the
//!   next byte
//!
//! `physical = raw * scale + offset`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{format_frame_id, CanError, CanResult, MAX_STANDARD_ID};
use crate::types::{ByteOrder, FrameDirection, SignalValues};
use crate::{decode, encode};

/// Bit layout and scaling of one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Signal name (set from the map key when loading a description)
    #[serde(skip)]
    pub name: String,

    /// Position of the first bit, see the module documentation
    pub start_bit: u16,

    /// Number of bits (1..=64)
    pub length: u8,

    #[serde(default)]
    pub byte_order: ByteOrder,

    /// Two's complement raw value
    #[serde(default)]
    pub signed: bool,

    /// Scale factor: physical = raw * scale + offset
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset: physical = raw * scale + offset
    #[serde(default)]
    pub offset: f64,

    /// Minimum valid physical value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum valid physical value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Physical value sent when no value was given for this signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn default_scale() -> f64 {
    1.0
}

impl SignalDefinition {
    /// Unsigned little-endian signal without scaling
    pub fn new(name: impl Into<String>, start_bit: u16, length: u8) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::Little,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            default: None,
            unit: None,
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.byte_order = ByteOrder::Big;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn scaled(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Bit positions of the raw value, least significant bit first
    pub fn bit_positions(&self) -> Vec<u16> {
        let length = self.length as u16;
        match self.byte_order {
            ByteOrder::Little => (0..length)
                .map(|i| self.start_bit.saturating_add(i))
                .collect(),
            ByteOrder::Big => {
                let mut positions = Vec::with_capacity(length as usize);
                let mut position = self.start_bit;
                for i in 0..length {
                    positions.push(position);
                    if i + 1 == length {
                        break;
                    }
                    position = if position % 8 == 0 {
                        position.saturating_add(15)
                    } else {
                        position - 1
                    };
                }
                positions.reverse();
                positions
            }
        }
    }

    /// Number of payload bytes the layout reaches into
    pub fn required_bytes(&self) -> usize {
        self.bit_positions()
            .iter()
            .max()
            .map(|&p| p as usize / 8 + 1)
            .unwrap_or(0)
    }

    /// Smallest and largest raw value the bit width holds
    pub fn raw_limits(&self) -> (i128, i128) {
        let bits = self.length.min(64) as u32;
        if bits == 0 {
            return (0, 0);
        }
        if self.signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    /// Check the layout against a frame length
    pub fn validate(&self, dlc: usize) -> CanResult<()> {
        let invalid = |reason: String| CanError::InvalidSignal {
            signal: self.name.clone(),
            reason,
        };

        if self.length == 0 || self.length > 64 {
            return Err(invalid(format!(
                "length must be 1..=64 bits, got {}",
                self.length
            )));
        }
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(invalid(format!("invalid scale {}", self.scale)));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(invalid(format!("min {} is above max {}", min, max)));
            }
        }
        if self.byte_order == ByteOrder::Big && self.start_bit as usize >= dlc * 8 {
            return Err(invalid(format!(
                "start bit {} outside a {} byte frame",
                self.start_bit, dlc
            )));
        }
        let required = self.required_bytes();
        if required > dlc {
            return Err(invalid(format!(
                "needs {} bytes, frame has {}",
                required, dlc
            )));
        }
        Ok(())
    }
}

/// One frame on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDefinition {
    /// Frame id (set from the map key when loading a description)
    #[serde(skip)]
    pub id: u32,

    #[serde(default)]
    pub name: String,

    /// Payload length in bytes
    #[serde(default = "default_dlc")]
    pub dlc: usize,

    /// Node ids that transmit this frame
    #[serde(default)]
    pub producers: Vec<String>,

    /// 29-bit identifier. Defaults to true for ids above 0x7FF
    #[serde(default)]
    pub extended: bool,

    /// Minimum interval between two received frames, shorter gaps are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_ms: Option<u64>,

    /// Signals keyed by name
    #[serde(default)]
    pub signals: BTreeMap<String, SignalDefinition>,
}

fn default_dlc() -> usize {
    8
}

impl FrameDefinition {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            dlc: default_dlc(),
            producers: Vec::new(),
            extended: id > MAX_STANDARD_ID,
            throttle_ms: None,
            signals: BTreeMap::new(),
        }
    }

    pub fn with_dlc(mut self, dlc: usize) -> Self {
        self.dlc = dlc;
        self
    }

    pub fn with_producer(mut self, node_id: impl Into<String>) -> Self {
        self.producers.push(node_id.into());
        self
    }

    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.insert(signal.name.clone(), signal);
        self
    }

    /// True if one of the ego nodes produces this frame
    pub fn is_outbound(&self, ego_node_ids: &[String]) -> bool {
        self.producers.iter().any(|p| ego_node_ids.contains(p))
    }

    pub fn direction(&self, ego_node_ids: &[String]) -> FrameDirection {
        if self.is_outbound(ego_node_ids) {
            FrameDirection::Outbound
        } else {
            FrameDirection::Inbound
        }
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.get(name)
    }

    /// Decode every signal of the frame
    pub fn unpack(&self, data: &[u8]) -> CanResult<SignalValues> {
        decode::unpack(self, data)
    }

    /// Encode signal values into a payload.
    ///
    /// Signals without a value keep their bits from `previous` when given,
    /// otherwise they get their default value.
    pub fn pack(&self, values: &SignalValues, previous: Option<&[u8]>) -> CanResult<Vec<u8>> {
        encode::pack(self, values, previous)
    }

    /// Check the frame and all its signal layouts
    pub fn validate(&self) -> CanResult<()> {
        let invalid = |reason: String| CanError::InvalidFrame {
            id: format_frame_id(self.id),
            reason,
        };
        if self.dlc == 0 || self.dlc > 64 {
            return Err(invalid(format!("dlc must be 1..=64, got {}", self.dlc)));
        }
        if !self.extended && self.id > MAX_STANDARD_ID {
            return Err(invalid("id needs an extended frame".to_string()));
        }
        for signal in self.signals.values() {
            signal.validate(self.dlc)?;
        }
        Ok(())
    }
}
