//! Fixed-point token amount formatting and parsing on top of
//! `alloy_primitives::utils`.

use alloy_primitives::utils;
use alloy_primitives::U256;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("invalid amount: {0:?}")]
    Invalid(String),
    #[error("too many decimal places: {got} > {max}")]
    TooPrecise { got: usize, max: u8 },
    #[error("amount out of range: {0}")]
    Range(String),
}

/// Render `value / 10^decimals` without trailing fractional zeros.
pub fn format_units(value: U256, decimals: u8) -> String {
    match utils::format_units(value, decimals) {
        Ok(s) if s.contains('.') => s.trim_end_matches('0').trim_end_matches('.').to_string(),
        Ok(s) => s,
        Err(_) => value.to_string(),
    }
}

/// Like [`format_units`] but rounded half-up to at most `max_frac`
/// fractional digits.
///
/// A non-zero amount that would round to zero renders as `<0.000001`
/// (for `max_frac == 6`) so dust approvals stay visible.
pub fn format_units_trimmed(value: U256, decimals: u8, max_frac: usize) -> String {
    let kept = decimals.min(u8::try_from(max_frac).unwrap_or(u8::MAX));
    let dropped = decimals - kept;
    let rounded = if dropped == 0 {
        value
    } else {
        match U256::from(10u64).checked_pow(U256::from(dropped)) {
            Some(div) => value.saturating_add(div / U256::from(2u64)) / div,
            None => U256::ZERO,
        }
    };
    if rounded.is_zero() && !value.is_zero() && max_frac > 0 {
        return format!("<0.{}1", "0".repeat(max_frac - 1));
    }
    format_units(rounded, kept)
}

/// Parse a decimal amount such as `"12.5"` into base units.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256, UnitsError> {
    let amount = amount.trim();
    let (int, frac) = amount.split_once('.').unwrap_or((amount, ""));
    let valid = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !valid(int) || !valid(frac) {
        return Err(UnitsError::Invalid(amount.to_string()));
    }
    // alloy truncates extra places silently
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            got: frac.len(),
            max: decimals,
        });
    }
    let normalized = if int.is_empty() {
        format!("0{amount}")
    } else {
        amount.to_string()
    };
    utils::parse_units(&normalized, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|e| UnitsError::Range(e.to_string()))
}
