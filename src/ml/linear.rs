//! Linear demand regression.

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

/// Inputs of the linear family.
pub const LINEAR_FEATURES: [FeatureColumn; 9] = [
    FeatureColumn::DayOfWeek,
    FeatureColumn::Month,
    FeatureColumn::BasePrice,
    FeatureColumn::StockLevel,
    FeatureColumn::Sales7dSum,
    FeatureColumn::Sales30dSum,
    FeatureColumn::Margin,
    FeatureColumn::PriceVariation,
    FeatureColumn::IsWeekend,
];

/// Ordinary least squares (`linear_auto`) or ridge (`linear_ridge`).
#[derive(Debug, Clone)]
pub struct LinearTrainer {
    plan: TrainingPlan,
}

impl LinearTrainer {
    pub fn new(variant: ModelVariant) -> Self {
        let ridge = ALPHA_GRID.iter().map(|alpha| Candidate {
            degree: None,
            alpha: *alpha,
        });
        let candidates = match variant {
            // plain least squares first; ridge penalties compete only under grid search
            ModelVariant::LinearAuto => std::iter::once(Candidate {
                degree: None,
                alpha: 0.0,
            })
            .chain(ridge)
            .collect(),
            _ => std::iter::once(Candidate {
                degree: None,
                alpha: DEFAULT_ALPHA,
            })
            .chain(ridge.filter(|c| c.alpha != DEFAULT_ALPHA))
            .collect(),
        };
        Self {
            plan: TrainingPlan {
                variant,
                columns: &LINEAR_FEATURES,
                select_k: None,
                candidates,
            },
        }
    }

    pub fn auto() -> Self {
        Self::new(ModelVariant::LinearAuto)
    }

    pub fn ridge() -> Self {
        Self::new(ModelVariant::LinearRidge)
    }
}

impl Trainer for LinearTrainer {
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
    use crate::ml::{models::DemandModel, training::fixture_table};

    #[test]
    fn test_small_table_uses_plain_least_squares() {
        let table = fixture_table(3, 40);
        let report = LinearTrainer::auto()
            .train(&table, &TrainingOptions::default())
            .unwrap()
            .into_report()
            .unwrap();

        assert_eq!(report.hyperparameters.alpha, 0.0);
        assert!(!report.hyperparameters.grid_searched);
        assert_eq!(report.cross_validation.folds, 5);
        assert_eq!(report.model.metadata.feature_columns, LINEAR_FEATURES.to_vec());
        assert_eq!(report.feature_importance.len(), LINEAR_FEATURES.len());
        assert!(report.model.metadata.model_id.starts_with("linear_auto_3_"));
    }

    #[test]
    fn test_ridge_searches_alpha_on_long_history() {
        let table = fixture_table(4, 120);
        let options = TrainingOptions {
            cv_folds: 5,
            version: Some("v1".into()),
        };
        let report = LinearTrainer::ridge().train(&table, &options).unwrap().into_report().unwrap();

        assert!(report.hyperparameters.grid_searched);
        assert!(ALPHA_GRID.contains(&report.hyperparameters.alpha));
        assert_eq!(report.model.metadata.model_id, "linear_ridge_4_v1");
        let preds = report.model.predict(&table).unwrap();
        assert_eq!(preds.len(), table.len());
        assert!(preds.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_tiny_tables() {
        let trainer = LinearTrainer::auto();
        let empty = fixture_table(5, 40);
        let mut none = empty.clone();
        none.retain_rows(&vec![false; none.len()]);
        assert!(!trainer.train(&none, &TrainingOptions::default()).unwrap().is_trained());
        assert!(trainer.cross_validate(&none, 5).unwrap().is_none());

        let mut two = empty;
        let keep: Vec<bool> = (0..two.len()).map(|i| i < 2).collect();
        two.retain_rows(&keep);
        let report = trainer.train(&two, &TrainingOptions::default()).unwrap().into_report().unwrap();
        assert_eq!(report.cross_validation.folds, 1);
    }
}
