//! Rounding of decoded values to the resolution of their scale
//!
//! A raw 5293 with scale 0.01 reads 52.93, not 52.930000000000007.

/// Most decimals a scale can ask for
const MAX_DECIMALS: u8 = 6;

/// Decimals needed to show every multiple of `scale` exactly
pub fn decimals_for_scale(scale: f64) -> u8 {
    let step = scale.abs();
    if step == 0.0 || !step.is_finite() {
        return MAX_DECIMALS;
    }
    (0..MAX_DECIMALS)
        .find(|&decimals| {
            let shifted = step * 10_f64.powi(i32::from(decimals));
            (shifted - shifted.round()).abs() < 1e-9
        })
        .unwrap_or(MAX_DECIMALS)
}

pub fn round_for_scale(value: f64, scale: f64) -> f64 {
    let factor = 10_f64.powi(i32::from(decimals_for_scale(scale)));
    (value * factor).round() / factor
}
