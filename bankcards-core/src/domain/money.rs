//! Fixed-point money helpers

use rust_decimal::{Decimal, RoundingStrategy};

/// Every amount and balance is held at two decimal places
pub const MONEY_SCALE: u32 = 2;

/// Round an amount to [`MONEY_SCALE`] places, half-up.
///
/// This is the only place rounding happens. Balance arithmetic afterwards is
/// exact addition/subtraction at the same scale.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    // round_dp never widens the scale, so 5 stays "5" instead of "5.00"
    rounded.rescale(MONEY_SCALE);
    rounded
}
