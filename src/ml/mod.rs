//! Machine Learning Module
//!
//! Regression models for per-product demand forecasting:
//! - Linear and ridge regression over standardized features
//! - Polynomial ridge regression with named interaction terms
//! - Expanding-window cross-validation and composite-score model selection
//! - Compressed, versioned model and prediction cache
//!
//! # Architecture
//! - `training` fits a [`TrainedModel`](models::TrainedModel) per variant
//! - `registry` maps variant names to trainers
//! - `cache` persists fitted models and predictions
//! - `comparison` ranks variants and picks the one the facade uses

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::{
    error::{ForecastError, Result},
    forecast::features::{FeatureColumn, FeatureTable},
};

pub mod cache;
pub mod comparison;
pub mod linear;
pub mod models;
pub mod polynomial;
pub mod regression;
pub mod registry;
pub mod scaler;
pub mod training;

/// Regression family a variant belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    Polynomial,
}

/// A concrete, selectable model configuration.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelVariant {
    /// Plain least squares or ridge, whichever cross-validates better.
    LinearAuto,
    LinearRidge,
    #[serde(rename = "polynomial_2")]
    #[strum(serialize = "polynomial_2")]
    Polynomial2,
    #[serde(rename = "polynomial_3")]
    #[strum(serialize = "polynomial_3")]
    Polynomial3,
    /// Degree chosen by grid search.
    PolynomialAuto,
}

/// Static characteristics of a variant used by the comparator.
///
/// These are fixed heuristics per variant, not measured properties of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantProfile {
    pub interpretability: f64,
    pub robustness: f64,
    pub complexity: f64,
    /// Rough training cost in seconds for 1000 rows.
    pub base_training_secs: f64,
}

impl ModelVariant {
    pub fn all() -> Vec<ModelVariant> {
        ModelVariant::iter().collect()
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            ModelVariant::LinearAuto | ModelVariant::LinearRidge => ModelFamily::Linear,
            _ => ModelFamily::Polynomial,
        }
    }

    /// Candidate polynomial degrees; empty for linear variants.
    pub fn degrees(&self) -> &'static [usize] {
        match self {
            ModelVariant::LinearAuto | ModelVariant::LinearRidge => &[],
            ModelVariant::Polynomial2 => &[2],
            ModelVariant::Polynomial3 => &[3],
            ModelVariant::PolynomialAuto => &[2, 3],
        }
    }

    pub fn profile(&self) -> VariantProfile {
        let (interpretability, robustness, complexity, base_training_secs) = match self {
            ModelVariant::LinearAuto => (0.9, 0.3, 0.2, 0.1),
            // the penalty makes ridge the more robust linear variant
            ModelVariant::LinearRidge => (0.9, 0.7, 0.2, 0.1),
            ModelVariant::Polynomial2 => (0.7, 0.2, 0.5, 0.5),
            ModelVariant::Polynomial3 => (0.5, 0.2, 0.7, 2.0),
            ModelVariant::PolynomialAuto => (0.4, 0.2, 0.8, 5.0),
        };
        VariantProfile {
            interpretability,
            robustness,
            complexity,
            base_training_secs,
        }
    }

    /// Estimated training time in seconds for `rows` rows.
    pub fn estimated_training_secs(&self, rows: usize) -> f64 {
        self.profile().base_training_secs * (rows as f64 / 1000.0).max(1.0)
    }
}

/// Identity and provenance of a fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub product_id: i64,
    pub variant: ModelVariant,
    pub version: String,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub validation_metrics: ValidationMetrics,
    pub feature_columns: Vec<FeatureColumn>,
    /// Trained on generated cold-start data.
    pub synthetic_data: bool,
}

/// Mean cross-validated metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub mape: f64, // Mean Absolute Percentage Error
    pub r2: f64,   // R-squared
}

impl ValidationMetrics {
    pub fn new(mae: f64, rmse: f64, mape: f64, r2: f64) -> Self {
        Self { mae, rmse, mape, r2 }
    }
}

/// Feature Vector for ML models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub features: Vec<f64>,
    pub feature_columns: Vec<FeatureColumn>,
}

impl FeatureVector {
    pub fn new(features: Vec<f64>, feature_columns: Vec<FeatureColumn>) -> Result<Self> {
        if features.len() != feature_columns.len() {
            return Err(ForecastError::prediction(format!(
                "Feature count mismatch: {} features, {} names",
                features.len(),
                feature_columns.len()
            )));
        }
        Ok(Self {
            features,
            feature_columns,
        })
    }

    /// Pull the given columns of one table row.
    pub fn from_table(table: &FeatureTable, row: usize, columns: &[FeatureColumn]) -> Result<Self> {
        let features = columns
            .iter()
            .map(|c| {
                table
                    .column(*c)
                    .and_then(|v| v.get(row).copied())
                    .ok_or_else(|| ForecastError::prediction(format!("missing {c} at row {row}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(features, columns.to_vec())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
