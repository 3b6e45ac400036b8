use rust_decimal::{Decimal, RoundingStrategy};

use super::DateRange;

/// Rounds half-up to cents and pins the scale to exactly two fractional digits.
pub fn to_fixed2(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Truncates to cents. Capacity shown as available must never exceed what is free.
pub fn floor2(value: Decimal) -> Decimal {
    let mut truncated = value.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    truncated.rescale(2);
    truncated
}

/// `days × capacity × rate`, computed once when a booking is created.
pub fn price(capacity_required: Decimal, range: DateRange, price_per_unit_day: Decimal) -> Decimal {
    let days = Decimal::from(range.days());
    to_fixed2(days * capacity_required * price_per_unit_day)
}
