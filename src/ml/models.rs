//! ML Model Definitions
//!
//! Fitted regressors bundled with the scaler and metadata they need at inference time.

use serde::{Deserialize, Serialize};

use super::{
    regression::{LinearCoefficients, PolynomialExpansion},
    scaler::StandardScaler,
    FeatureVector, ModelMetadata, ModelVariant,
};
use crate::{
    error::{ForecastError, Result},
    forecast::features::FeatureTable,
};

/// Trait for demand models
pub trait DemandModel: Send + Sync {
    /// Predict one value per row of `table`
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>>;

    /// Model name reported to callers
    fn name(&self) -> String;
}

/// The estimator inside a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Regressor {
    Linear(LinearCoefficients),
    Polynomial {
        expansion: PolynomialExpansion,
        coefficients: LinearCoefficients,
    },
}

impl Regressor {
    /// Predict from one already standardized row.
    pub fn predict_scaled(&self, row: &[f64]) -> f64 {
        match self {
            Regressor::Linear(c) => c.predict_row(row),
            Regressor::Polynomial {
                expansion,
                coefficients,
            } => coefficients.predict_row(&expansion.transform_row(row)),
        }
    }
}

/// A fitted model: regressor, the scaler fitted with it, and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub metadata: ModelMetadata,
    pub scaler: StandardScaler,
    pub regressor: Regressor,
}

impl TrainedModel {
    pub fn variant(&self) -> ModelVariant {
        self.metadata.variant
    }

    /// Raw (unclamped) prediction for one feature vector.
    pub fn predict_vector(&self, features: &FeatureVector) -> Result<f64> {
        if features.feature_columns != self.metadata.feature_columns {
            return Err(ForecastError::prediction(format!(
                "Feature columns do not match model {}",
                self.metadata.model_id
            )));
        }
        let scaled = self.scaler.transform_clamped(&features.features)?;
        let value = self.regressor.predict_scaled(&scaled);
        if !value.is_finite() {
            return Err(ForecastError::prediction("model produced a non-finite value"));
        }
        Ok(value)
    }
}

impl DemandModel for TrainedModel {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        (0..table.len())
            .map(|i| {
                let fv = FeatureVector::from_table(table, i, &self.metadata.feature_columns)?;
                self.predict_vector(&fv)
            })
            .collect()
    }

    fn name(&self) -> String {
        self.metadata.variant.to_string()
    }
}

/// Baseline forecaster: mean of the most recent observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveMeanModel {
    pub window_size: usize,
    pub historical_values: Vec<f64>,
}

impl NaiveMeanModel {
    pub const NAME: &'static str = "naive_mean";

    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            historical_values: Vec::new(),
        }
    }

    /// Keep the last `window_size` finite values of `history`.
    pub fn from_history(window_size: usize, history: &[f64]) -> Self {
        let mut model = Self::new(window_size);
        for v in history.iter().filter(|v| v.is_finite()) {
            model.add_value(*v);
        }
        model
    }

    /// Add a new historical value
    pub fn add_value(&mut self, value: f64) {
        self.historical_values.push(value);
        if self.historical_values.len() > self.window_size {
            self.historical_values.remove(0);
        }
    }

    /// Get the moving average
    pub fn get_average(&self) -> Option<f64> {
        if self.historical_values.is_empty() {
            return None;
        }

        let sum: f64 = self.historical_values.iter().sum();
        Some(sum / self.historical_values.len() as f64)
    }
}

impl DemandModel for NaiveMeanModel {
    fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        let avg = self.get_average().unwrap_or(0.0);
        Ok(vec![avg; table.len()])
    }

    fn name(&self) -> String {
        Self::NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::ProductId,
        forecast::features::{DataOrigin, FeatureColumn},
        ml::ValidationMetrics,
    };
    use chrono::NaiveDate;

    fn linear_model() -> TrainedModel {
        let columns = vec![FeatureColumn::DayOfWeek];
        TrainedModel {
            metadata: ModelMetadata {
                model_id: "linear_auto_1".into(),
                product_id: 1,
                variant: ModelVariant::LinearAuto,
                version: "v1".into(),
                trained_at: chrono::Utc::now(),
                training_samples: 2,
                validation_metrics: ValidationMetrics::new(0.0, 0.0, 0.0, 1.0),
                feature_columns: columns,
                synthetic_data: false,
            },
            scaler: StandardScaler::fit(&[vec![0.0], vec![6.0]]).unwrap(),
            regressor: Regressor::Linear(LinearCoefficients {
                intercept: 10.0,
                weights: vec![2.0],
                alpha: 0.0,
            }),
        }
    }

    #[test]
    fn test_trained_model_predicts_rows() {
        let dates: Vec<NaiveDate> = (1..=3)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
            .collect();
        let mut table = FeatureTable::with_dates(ProductId(1), DataOrigin::Observed, dates);
        table
            .insert_column(FeatureColumn::DayOfWeek, vec![0.0, 3.0, 6.0])
            .unwrap();

        let preds = linear_model().predict(&table).unwrap();
        assert_eq!(preds, vec![8.0, 10.0, 12.0]);
    }

    #[test]
    fn test_missing_column_is_prediction_error() {
        let table = FeatureTable::with_dates(
            ProductId(1),
            DataOrigin::Observed,
            vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()],
        );
        let err = linear_model().predict(&table).unwrap_err();
        assert!(matches!(err, ForecastError::Prediction(_)));
    }

    #[test]
    fn test_naive_mean_uses_window() {
        let model = NaiveMeanModel::from_history(2, &[100.0, 4.0, 6.0, f64::NAN]);
        assert_eq!(model.get_average(), Some(5.0));
        assert_eq!(model.name(), "naive_mean");
        assert_eq!(NaiveMeanModel::new(3).get_average(), None);
    }
}
