//! Field validators.
//!
//! Pattern and range checks applied at the RPC boundary before any ledger
//! access. Each predicate returns the offending field inside
//! [`BillingError::Validation`].

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{BillingError, Result};

static USER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").unwrap());
static MODEL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{2,64}$").unwrap());
static RESERVATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^res:[A-Za-z0-9_-]{3,64}:[A-Za-z0-9_-]{3,64}:\d+$").unwrap()
});
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]{3}$").unwrap());

/// Largest amount accepted for charges and adjustments, exclusive.
pub const MAX_AMOUNT: Decimal = dec!(1_000_000);

/// `user_id`: 3-64 chars of `[A-Za-z0-9_-]`.
pub fn user_id(value: &str) -> Result<()> {
    if USER_ID.is_match(value) {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "user_id",
            format!("{value:?} does not match ^[A-Za-z0-9_-]{{3,64}}$"),
        ))
    }
}

/// `model`: 2-64 chars of `[A-Za-z0-9_.-]`.
pub fn model_id(value: &str) -> Result<()> {
    if MODEL_ID.is_match(value) {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "model",
            format!("{value:?} does not match ^[A-Za-z0-9_.\\-]{{2,64}}$"),
        ))
    }
}

/// `reservation_id`: `res:<user>:<request>:<epoch>`.
pub fn reservation_id(value: &str) -> Result<()> {
    if RESERVATION_ID.is_match(value) {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "reservation_id",
            format!("{value:?} is not a reservation id"),
        ))
    }
}

/// Caller-supplied `request_id`: same shape as a user id (it becomes the
/// middle segment of the reservation id).
pub fn request_id(value: &str) -> Result<()> {
    if USER_ID.is_match(value) {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "request_id",
            format!("{value:?} does not match ^[A-Za-z0-9_-]{{3,64}}$"),
        ))
    }
}

/// Charge/adjustment amount magnitude: `0 < amount < 1_000_000`.
///
/// Adjustments are signed; the range applies to the absolute value.
pub fn amount(value: Decimal) -> Result<()> {
    let magnitude = value.abs();
    if magnitude > Decimal::ZERO && magnitude < MAX_AMOUNT {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "amount",
            format!("{value} is outside (0, 1000000)"),
        ))
    }
}

/// Token counts that must be strictly positive (`tokens_used`, `input_tokens`).
pub fn positive_tokens(field: &'static str, value: u64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(BillingError::invalid(field, "must be strictly positive"))
    }
}

/// Currency code: exactly three alphabetic characters.
pub fn currency(value: &str) -> Result<()> {
    if CURRENCY.is_match(value) {
        Ok(())
    } else {
        Err(BillingError::invalid(
            "currency",
            format!("{value:?} is not a three-letter code"),
        ))
    }
}
