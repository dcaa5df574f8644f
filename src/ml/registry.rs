//! Lookup of trainers by variant name.

use std::{collections::BTreeMap, sync::Arc};

use super::{
    linear::LinearTrainer, polynomial::PolynomialTrainer, training::Trainer, ModelFamily, ModelVariant,
};

/// Trainers keyed by variant name, iterated in name order.
#[derive(Clone, Default)]
pub struct TrainerRegistry {
    trainers: BTreeMap<String, Arc<dyn Trainer>>,
}

impl TrainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in variant.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for variant in ModelVariant::all() {
            let trainer: Arc<dyn Trainer> = match variant.family() {
                ModelFamily::Linear => Arc::new(LinearTrainer::new(variant)),
                ModelFamily::Polynomial => Arc::new(PolynomialTrainer::new(variant)),
            };
            registry.register(trainer);
        }
        registry
    }

    /// Add or replace the trainer for its variant.
    pub fn register(&mut self, trainer: Arc<dyn Trainer>) {
        self.trainers.insert(trainer.variant().to_string(), trainer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Trainer>> {
        self.trainers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.trainers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Trainer>)> {
        self.trainers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.trainers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trainers.is_empty()
    }
}

impl std::fmt::Debug for TrainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerRegistry").field("trainers", &self.names()).finish()
    }
}
