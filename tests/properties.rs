//! Property tests
//!
//! History-derived features must only look at earlier days, validation folds
//! must never train on the future, and forecasts are never negative.

mod common;

use chrono::Duration;
use proptest::prelude::*;
use tempfile::TempDir;

use common::{config_in, date, store_with};
use microanalytics_forecast::{
    api::AppState,
    domain::{ProductId, RawSale},
    forecast::{
        features::{build_feature_table, ColumnKind, ProductContext},
        metrics::TimeSeriesSplit,
        DataOrigin, FeatureColumn, FeatureTable,
    },
};

fn history_columns() -> Vec<FeatureColumn> {
    FeatureColumn::all()
        .into_iter()
        .filter(|c| {
            c.kind() == ColumnKind::Rolling
                || matches!(
                    c,
                    FeatureColumn::PurchaseFrequency
                        | FeatureColumn::SeasonalityIndex
                        | FeatureColumn::PriceElasticity
                        | FeatureColumn::Turnover
                )
        })
        .collect()
}

fn sales_from(quantities: &[f64], prices: &[f64]) -> Vec<RawSale> {
    let start = date(2024, 1, 1);
    quantities
        .iter()
        .zip(prices)
        .enumerate()
        .map(|(i, (q, p))| RawSale {
            date: start + Duration::days(i as i64),
            product_id: ProductId(1),
            quantity: *q,
            unit_price: *p,
        })
        .collect()
}

fn table(sales: &[RawSale]) -> FeatureTable {
    let context = ProductContext::new(20.0, None, Vec::new());
    build_feature_table(ProductId(1), DataOrigin::Observed, sales, &context)
}

fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

fn series() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, usize)> {
    (10usize..120).prop_flat_map(|len| {
        (
            prop::collection::vec(0.0f64..50.0, len),
            prop::collection::vec(5.0f64..40.0, len),
            0..len,
        )
    })
}

proptest! {
    #[test]
    fn prop_future_rows_do_not_change_history_features((quantities, prices, k) in series()) {
        let full = table(&sales_from(&quantities, &prices));
        let prefix = table(&sales_from(&quantities[..=k], &prices[..=k]));

        for col in history_columns() {
            let a = full.column(col).unwrap()[k];
            let b = prefix.column(col).unwrap()[k];
            prop_assert!(same(a, b), "{} differs at row {}: {} vs {}", col, k, a, b);
        }
    }

    #[test]
    fn prop_own_quantity_does_not_leak((quantities, prices, k) in series(), bump in 1.0f64..500.0) {
        let base = table(&sales_from(&quantities, &prices));
        let mut changed_q = quantities.clone();
        changed_q[k] += bump;
        let changed = table(&sales_from(&changed_q, &prices));

        for col in history_columns() {
            let a = base.column(col).unwrap()[k];
            let b = changed.column(col).unwrap()[k];
            prop_assert!(same(a, b), "{} leaked the current row at {}", col, k);
        }
    }

    #[test]
    fn prop_folds_train_only_on_the_past(len in 0usize..400, folds in 1usize..10) {
        let split = TimeSeriesSplit::new(folds);
        let produced = split.split(len);
        prop_assert_eq!(produced.len(), split.effective_splits(len));
        for (train, test) in produced {
            prop_assert!(!train.is_empty());
            prop_assert!(!test.is_empty());
            prop_assert!(train.iter().max() < test.iter().min());
            prop_assert!(test.iter().all(|i| *i < len));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn prop_forecasts_are_never_negative(
        quantities in prop::collection::vec(prop_oneof![Just(0.0f64), 0.0f64..40.0], 20..70),
        days in 1u32..30,
    ) {
        let dir = TempDir::new().unwrap();
        let prices = vec![25.0; quantities.len()];
        let store = store_with(1, sales_from(&quantities, &prices));
        let state = AppState::build(&config_in(&dir), store).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let forecast = runtime
            .block_on(state.forecaster.predict(ProductId(1), days, false))
            .unwrap();
        prop_assert_eq!(forecast.predictions.len(), days as usize);
        prop_assert!(forecast.predictions.iter().all(|p| p.is_finite() && *p >= 0.0));
    }
}
