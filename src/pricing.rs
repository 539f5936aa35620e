use crate::model::{Category, Money};

/// Multiplier applied to the base price, in percent.
pub fn category_percent(category: Category) -> u64 {
    match category {
        Category::Discount => 80,
        Category::Standard => 100,
        Category::Premium => 120,
    }
}

/// Per-seat price for a screening. Rounds half-up to the cent.
pub fn unit_price(base: Money, category: Category) -> Money {
    let scaled = base.cents() as u128 * category_percent(category) as u128;
    Money::from_cents(u64::try_from((scaled + 50) / 100).unwrap_or(u64::MAX))
}

/// `None` only on overflow, which the base-price limit rules out in practice.
pub fn total_price(base: Money, category: Category, seats: usize) -> Option<Money> {
    unit_price(base, category).checked_mul(seats as u64)
}
