//! Pure quantity and P&L arithmetic. Nothing in here touches storage.

pub mod allocator;
pub mod pnl;

use crate::errors::CoreError;

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Money and P&L values are kept at 3 decimals.
pub fn round3(value: f64) -> f64 {
    round_to(value, 3)
}

/// Percentages (APY) are kept at 2 decimals.
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// Reject zero, negative, NaN and infinite inputs for prices and quantities.
pub fn ensure_positive(field: &str, value: f64) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::ValidationError(format!(
            "{field} must be a positive number, got {value}"
        )));
    }
    Ok(())
}
