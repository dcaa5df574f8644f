//! Polynomial ridge regression over a standardized, optionally reduced feature set.

use super::{
    training::{
        Candidate, CrossValidationSummary, Trainer, TrainingOptions, TrainingOutcome, TrainingPlan, ALPHA_GRID,
        DEFAULT_ALPHA,
    },
    ModelVariant,
};
use crate::{
    error::Result,
    forecast::features::{FeatureColumn, FeatureTable},
};

pub const POLYNOMIAL_FEATURES: [FeatureColumn; 11] = [
    FeatureColumn::DayOfWeek,
    FeatureColumn::Month,
    FeatureColumn::BasePrice,
    FeatureColumn::StockLevel,
    FeatureColumn::SupplierPrice,
    FeatureColumn::Sales7dSum,
    FeatureColumn::Sales30dSum,
    FeatureColumn::Margin,
    FeatureColumn::PriceVariation,
    FeatureColumn::Trend30d,
    FeatureColumn::SeasonalityIndex,
];

/// Inputs kept before expansion.
pub const SELECT_K: usize = 8;

#[derive(Debug, Clone)]
pub struct PolynomialTrainer {
    plan: TrainingPlan,
}

impl PolynomialTrainer {
    pub fn new(variant: ModelVariant) -> Self {
        let degrees = match variant.degrees() {
            [] => &[2][..],
            d => d,
        };
        // default: lowest degree, alpha 1; the rest only under grid search
        let mut candidates = vec![Candidate {
            degree: Some(degrees[0]),
            alpha: DEFAULT_ALPHA,
        }];
        for degree in degrees {
            for alpha in ALPHA_GRID {
                let candidate = Candidate {
                    degree: Some(*degree),
                    alpha,
                };
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
        Self {
            plan: TrainingPlan {
                variant,
                columns: &POLYNOMIAL_FEATURES,
                select_k: Some(SELECT_K),
                candidates,
            },
        }
    }
}

impl Trainer for PolynomialTrainer {
    fn variant(&self) -> ModelVariant {
        self.plan.variant
    }

    fn train(&self, table: &FeatureTable, options: &TrainingOptions) -> Result<TrainingOutcome> {
        self.plan.train(table, options)
    }

    fn cross_validate(&self, table: &FeatureTable, folds: usize) -> Result<Option<CrossValidationSummary>> {
        self.plan.cross_validate(table, folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::training::fixture_table;

    #[test]
    fn test_candidates_per_variant() {
        let fixed = PolynomialTrainer::new(ModelVariant::Polynomial3);
        assert_eq!(fixed.plan.candidates[0].degree, Some(3));
        assert_eq!(fixed.plan.candidates.len(), ALPHA_GRID.len());

        let auto = PolynomialTrainer::new(ModelVariant::PolynomialAuto);
        assert_eq!(auto.plan.candidates[0], Candidate { degree: Some(2), alpha: DEFAULT_ALPHA });
        assert_eq!(auto.plan.candidates.len(), 2 * ALPHA_GRID.len());
    }

    #[test]
    fn test_selects_features_and_reports_terms() {
        let table = fixture_table(6, 60);
        let report = PolynomialTrainer::new(ModelVariant::Polynomial2)
            .train(&table, &TrainingOptions::default())
            .unwrap()
            .into_report()
            .unwrap();

        assert_eq!(report.hyperparameters.selected_features.len(), SELECT_K);
        assert_eq!(report.hyperparameters.degree, Some(2));
        assert_eq!(report.feature_importance.len(), 20);
        assert!(report
            .feature_importance
            .windows(2)
            .all(|w| w[0].importance >= w[1].importance));
        assert!(report.model.metadata.validation_metrics.rmse.is_finite());
    }

    #[test]
    fn test_cross_validate_only() {
        let table = fixture_table(7, 30);
        let summary = PolynomialTrainer::new(ModelVariant::Polynomial2)
            .cross_validate(&table, 3)
            .unwrap()
            .unwrap();
        assert_eq!(summary.folds, 3);
        assert_eq!(summary.r2.scores.len(), 3);
    }
}
