//! Fixed-point amount utilities.
//!
//! ## Overview
//!
//! All balances, prices, and fees in the kernel use fixed-point
//! representation to avoid floating-point errors. Values are stored as
//! `u64` scaled by 10^8. Decimal strings are the external encoding
//! (deposit/withdraw amounts arrive as strings from the bridge).
//!
//! ## Why Fixed-Point?
//!
//! Floating-point arithmetic can produce different results on different
//! hardware, breaking replay determinism. Fixed-point ensures identical
//! results everywhere.
//!
//! ## Examples
//!
//! ```
//! use zkledger::types::amount::{to_fixed, from_fixed, mul_by_price};
//!
//! let amount = to_fixed("1000").unwrap();
//! assert_eq!(amount, 100_000_000_000);
//! assert_eq!(from_fixed(amount), "1000.00000000");
//!
//! // 50 units at price 100.0 -> 5000.0 of the right asset
//! let right = mul_by_price(to_fixed("50").unwrap(), to_fixed("100").unwrap()).unwrap();
//! assert_eq!(right, to_fixed("5000").unwrap());
//! ```

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::{KernelError, Result};

/// Fixed-point amount, scaled by [`SCALE`].
pub type Amount = u64;

/// Scaling factor for fixed-point arithmetic: 10^8.
pub const SCALE: u64 = 100_000_000;

/// Maximum whole-unit value that can be represented.
pub const MAX_VALUE: u64 = u64::MAX / SCALE;

// ============================================================================
// Conversion
// ============================================================================

/// Convert a decimal string to a fixed-point amount.
///
/// Returns `None` on malformed input, negative values, or out-of-range
/// values. Use [`parse_amount`] for the error-returning form.
pub fn to_fixed(s: &str) -> Option<Amount> {
    let decimal = Decimal::from_str(s).ok()?;
    decimal_to_fixed(decimal)
}

/// Convert a Decimal to a fixed-point amount.
pub fn decimal_to_fixed(d: Decimal) -> Option<Amount> {
    if d.is_sign_negative() {
        return None;
    }
    let scaled = d.checked_mul(Decimal::from(SCALE))?;
    scaled.round_dp(0).to_u64()
}

/// Convert a fixed-point amount to a Decimal.
pub fn fixed_to_decimal(value: Amount) -> Decimal {
    Decimal::from(value) / Decimal::from(SCALE)
}

/// Convert a fixed-point amount to a string with 8 decimal places.
pub fn from_fixed(value: Amount) -> String {
    format!("{:.8}", fixed_to_decimal(value))
}

/// Parse a decimal-string amount, rejecting zero.
///
/// This is the validation entry for operation amounts: empty, malformed,
/// negative, and zero inputs are all `InvalidAmount`.
pub fn parse_amount(s: &str) -> Result<Amount> {
    let value = to_fixed(s).ok_or_else(|| KernelError::InvalidAmount(s.to_string()))?;
    if value == 0 {
        return Err(KernelError::InvalidAmount(s.to_string()));
    }
    Ok(value)
}

// ============================================================================
// Arithmetic
// ============================================================================

/// `left_amount * price / SCALE` with a widened intermediate.
///
/// This is the settlement formula: the quantity of the right asset owed
/// for `amount` of the left asset at `price`.
pub fn mul_by_price(amount: Amount, price: Amount) -> Result<Amount> {
    let wide = (amount as u128) * (price as u128) / (SCALE as u128);
    u64::try_from(wide).map_err(|_| KernelError::AmountOverflow("mul_by_price"))
}

/// `amount * rate / SCALE`, where a rate of `SCALE` means 100%.
///
/// Fee legs are computed with this; rates are per-order snapshots.
pub fn apply_rate(amount: Amount, rate: Amount) -> Result<Amount> {
    let wide = (amount as u128) * (rate as u128) / (SCALE as u128);
    u64::try_from(wide).map_err(|_| KernelError::AmountOverflow("apply_rate"))
}

/// Checked addition.
pub fn checked_add(a: Amount, b: Amount) -> Result<Amount> {
    a.checked_add(b)
        .ok_or(KernelError::AmountOverflow("checked_add"))
}

/// Checked subtraction. Underflow is reported by the caller with account
/// context, so this returns the bare overflow error.
pub fn checked_sub(a: Amount, b: Amount) -> Result<Amount> {
    a.checked_sub(b)
        .ok_or(KernelError::AmountOverflow("checked_sub"))
}

// ============================================================================
// Unit Tests
// ============================================================================
