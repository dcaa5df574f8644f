//! MicroAnalytics demand forecasting core.
//!
//! Raw sales history is enriched into a per-product feature table, checked and
//! repaired, fed to a family of regression trainers that are cross-validated
//! and ranked, and the winner is cached and used to forecast future demand.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod repo;
pub mod telemetry;

pub use error::{ForecastError, Result};
