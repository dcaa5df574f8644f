//! Deterministic placeholder history for products without any recorded sales.

use chrono::{Duration, NaiveDate};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::domain::{ProductId, RawSale};

/// Mean daily demand of the generated series.
pub const SYNTHETIC_BASE_LEVEL: f64 = 10.0;

/// Catalogue price assumed for a product that has neither sales nor a catalogue entry.
pub fn placeholder_price(product_id: ProductId) -> f64 {
    20.0 + (product_id.get().rem_euclid(7) as f64) * 5.0
}

/// Generate `days` daily sales ending at `end` (inclusive).
///
/// The series is a level of ten units with a weekly and a monthly cycle plus
/// gaussian noise, seeded by the product id so the same product always gets
/// the same history.
pub fn generate(product_id: ProductId, days: u32, end: NaiveDate, base_price: f64) -> Vec<RawSale> {
    let mut rng = StdRng::seed_from_u64(product_id.get() as u64);
    let days = days.max(1) as i64;
    let start = end - Duration::days(days - 1);

    (0..days)
        .map(|i| {
            let t = i as f64;
            let weekly = 2.0 * (2.0 * PI * t / 7.0).sin();
            let monthly = 1.5 * (2.0 * PI * t / 30.0).sin();
            let noise: f64 = rng.sample(StandardNormal);
            let quantity = (SYNTHETIC_BASE_LEVEL + weekly + monthly + 1.5 * noise)
                .max(0.0)
                .round();
            let price_jitter: f64 = rng.gen_range(-0.05..0.05);
            RawSale {
                date: start + Duration::days(i),
                product_id,
                quantity,
                unit_price: (base_price * (1.0 + price_jitter) * 100.0).round() / 100.0,
            }
        })
        .collect()
}
