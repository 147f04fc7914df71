//! Decoding frame payloads to physical values

use crate::definition::{FrameDefinition, SignalDefinition};
use crate::error::{CanError, CanResult};
use crate::precision::round_for_scale;
use crate::types::SignalValues;

/// Decode every signal of a frame
pub fn unpack(frame: &FrameDefinition, data: &[u8]) -> CanResult<SignalValues> {
    frame
        .signals
        .iter()
        .map(|(name, signal)| Ok((name.clone(), decode_signal(signal, data)?)))
        .collect()
}

/// Decode one signal to its physical value
pub fn decode_signal(signal: &SignalDefinition, data: &[u8]) -> CanResult<f64> {
    let raw = read_raw_value(signal, data)?;
    let physical = raw as f64 * signal.scale + signal.offset;
    Ok(round_for_scale(physical, signal.scale))
}

/// Read the raw value of a signal, sign-extended for signed signals
pub fn read_raw_value(signal: &SignalDefinition, data: &[u8]) -> CanResult<i128> {
    let positions = signal.bit_positions();
    check_length(data, signal.required_bytes())?;

    let mut raw: u64 = 0;
    for (i, &position) in positions.iter().enumerate() {
        let byte = data[position as usize / 8];
        if (byte >> (position % 8)) & 1 == 1 {
            raw |= 1u64 << i;
        }
    }

    let bits = positions.len() as u32;
    if signal.signed && bits > 0 && (raw >> (bits - 1)) & 1 == 1 {
        // Two's complement: subtract 2^bits
        Ok(raw as i128 - (1i128 << bits))
    } else {
        Ok(raw as i128)
    }
}

fn check_length(data: &[u8], expected: usize) -> CanResult<()> {
    if data.len() < expected {
        return Err(CanError::DataTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
