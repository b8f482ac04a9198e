//! Decimal money arithmetic.
//!
//! All monetary quantities are [`Decimal`]; binary floating point never
//! touches ledger math. Unit prices are expressed per 1,000,000 tokens and
//! kept at full precision until the final cost is quantized to the ledger
//! quantum of 10^-5 USD with half-up rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Fractional digits carried by every ledger amount.
pub const LEDGER_SCALE: u32 = 5;

/// Tokens per pricing unit: prices are quoted per million tokens.
pub const TOKENS_PER_UNIT: Decimal = dec!(1_000_000);

/// Round a monetary value to the ledger quantum (5 fractional digits,
/// half-up: `0.000005` becomes `0.00001`).
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Cost of a chat call: separate input and output unit prices.
pub fn chat_cost(
    input_per_m: Decimal,
    output_per_m: Decimal,
    input_tokens: u64,
    output_tokens: u64,
) -> Decimal {
    let raw = (Decimal::from(input_tokens) * input_per_m
        + Decimal::from(output_tokens) * output_per_m)
        / TOKENS_PER_UNIT;
    quantize(raw)
}

/// Cost of an embedding call: a single unit price.
pub fn embed_cost(embed_per_m: Decimal, tokens: u64) -> Decimal {
    quantize(Decimal::from(tokens) * embed_per_m / TOKENS_PER_UNIT)
}

/// Convert a quantized amount to integer micro-USD (the substrate's balance
/// representation). Returns `None` if the value carries sub-quantum precision
/// or does not fit in `i64`.
pub fn to_micros(amount: Decimal) -> Option<i64> {
    let scaled = amount.checked_mul(dec!(100_000))?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    scaled.trunc().to_i64()
}

/// Convert integer micro-USD back to a [`Decimal`] amount.
pub fn from_micros(micros: i64) -> Decimal {
    Decimal::new(micros, LEDGER_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_half_up() {
        assert_eq!(quantize(dec!(0.000005)), dec!(0.00001));
        assert_eq!(quantize(dec!(0.000004)), dec!(0.00000));
        assert_eq!(quantize(dec!(0.012345678)), dec!(0.01235));
        assert_eq!(quantize(dec!(1.0)), dec!(1.0));
    }

    #[test]
    fn quantize_is_at_most_five_digits() {
        let q = quantize(dec!(3.14159265358979));
        assert!(q.scale() <= LEDGER_SCALE);
    }

    #[test]
    fn chat_cost_gpt4o_example() {
        // in 5.00/M, out 15.00/M: 1000 in + 500 out = 0.0125
        assert_eq!(chat_cost(dec!(5.00), dec!(15.00), 1000, 500), dec!(0.0125));
        // 950 in + 480 out = 0.01195
        assert_eq!(chat_cost(dec!(5.00), dec!(15.00), 950, 480), dec!(0.01195));
    }

    #[test]
    fn embed_cost_full_million() {
        assert_eq!(embed_cost(dec!(0.13), 1_000_000), dec!(0.13));
        assert_eq!(embed_cost(dec!(0.13), 500_000), dec!(0.065));
    }

    #[test]
    fn cost_is_deterministic() {
        let a = chat_cost(dec!(2.50), dec!(10.00), 123_456, 7_890);
        let b = chat_cost(dec!(2.50), dec!(10.00), 123_456, 7_890);
        assert_eq!(a, b);
    }

    #[test]
    fn sub_quantum_cost_rounds() {
        // 1 token at 0.13/M = 0.00000013, rounds to zero
        assert_eq!(embed_cost(dec!(0.13), 1), dec!(0.00000));
        // 40 tokens at 0.13/M = 0.0000052, rounds to 0.00001
        assert_eq!(embed_cost(dec!(0.13), 40), dec!(0.00001));
    }

    #[test]
    fn micros_round_trip() {
        assert_eq!(to_micros(dec!(10.00)), Some(1_000_000));
        assert_eq!(to_micros(dec!(0.01235)), Some(1235));
        assert_eq!(to_micros(dec!(0)), Some(0));
        assert_eq!(from_micros(1_000_000), dec!(10.00000));
        assert_eq!(from_micros(1235), dec!(0.01235));
    }

    #[test]
    fn micros_rejects_sub_quantum() {
        assert_eq!(to_micros(dec!(0.000001)), None);
    }
}
