//! Demand forecasting pipeline: feature enrichment, data quality, metrics and
//! the prediction facade.

pub mod engine;
pub mod features;
pub mod metrics;
pub mod quality;
pub mod synthetic;

pub use engine::{DemandForecaster, ForecastResponse, ForecastStatus};
pub use features::{DataOrigin, FeatureColumn, FeatureEnricher, FeatureTable};
pub use quality::{DataCleaner, DataValidator, IssueReport};
