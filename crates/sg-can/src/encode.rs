//! Encoding physical values into frame payloads

use crate::definition::{FrameDefinition, SignalDefinition};
use crate::error::{CanError, CanResult};
use crate::types::SignalValues;

/// Encode signal values into a frame payload.
///
/// Starts from `previous` when given (signals without a value keep their
/// last sent bits), otherwise from a zeroed payload with every signal
/// default applied.
pub fn pack(
    frame: &FrameDefinition,
    values: &SignalValues,
    previous: Option<&[u8]>,
) -> CanResult<Vec<u8>> {
    if let Some(unknown) = values.keys().find(|name| !frame.signals.contains_key(*name)) {
        return Err(CanError::UnknownSignal(unknown.clone()));
    }

    let mut data = vec![0u8; frame.dlc];
    match previous {
        Some(previous) => {
            let n = previous.len().min(frame.dlc);
            data[..n].copy_from_slice(&previous[..n]);
        }
        None => {
            for signal in frame.signals.values() {
                if let Some(default) = signal.default {
                    encode_signal(signal, default, &mut data)?;
                }
            }
        }
    }

    for (name, &physical) in values {
        if let Some(signal) = frame.signal(name) {
            encode_signal(signal, physical, &mut data)?;
        }
    }
    Ok(data)
}

/// Write one physical value into a payload
pub fn encode_signal(signal: &SignalDefinition, physical: f64, data: &mut [u8]) -> CanResult<()> {
    let out_of_range = |min: f64, max: f64| CanError::ValueOutOfRange {
        signal: signal.name.clone(),
        value: physical,
        min,
        max,
    };

    if !physical.is_finite() {
        return Err(out_of_range(f64::MIN, f64::MAX));
    }
    if let Some(min) = signal.min {
        if physical < min {
            return Err(out_of_range(min, signal.max.unwrap_or(f64::MAX)));
        }
    }
    if let Some(max) = signal.max {
        if physical > max {
            return Err(out_of_range(signal.min.unwrap_or(f64::MIN), max));
        }
    }

    // Reverse the scale/offset: raw = (physical - offset) / scale
    let raw = ((physical - signal.offset) / signal.scale).round();
    let (raw_min, raw_max) = signal.raw_limits();
    if raw < raw_min as f64 || raw > raw_max as f64 {
        let a = raw_min as f64 * signal.scale + signal.offset;
        let b = raw_max as f64 * signal.scale + signal.offset;
        return Err(out_of_range(a.min(b), a.max(b)));
    }

    write_raw_value(signal, raw as i128, data)
}

/// Write a raw value into the signal's bits, two's complement for negatives
pub fn write_raw_value(signal: &SignalDefinition, raw: i128, data: &mut [u8]) -> CanResult<()> {
    let required = signal.required_bytes();
    if data.len() < required {
        return Err(CanError::DataTooShort {
            expected: required,
            actual: data.len(),
        });
    }

    let bits = raw as u64;
    for (i, &position) in signal.bit_positions().iter().enumerate() {
        let byte = &mut data[position as usize / 8];
        let mask = 1u8 << (position % 8);
        if (bits >> i) & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
    Ok(())
}
