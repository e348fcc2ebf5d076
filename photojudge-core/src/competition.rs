/// Competition configuration: the criteria photos are judged on.
///
/// The JSON form of this struct is what the checkpoint's config hash covers,
/// so any edit to a criterion, weight or description invalidates an
/// in-progress batch.
use crate::checkpoint::compute_config_hash;
use crate::constants::{DEFAULT_INDIVIDUAL_WEIGHT, DEFAULT_MAX_SETS_TO_EVALUATE, DEFAULT_SET_WEIGHT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CompetitionError {
    #[error("competition has no criteria")]
    NoCriteria,
    #[error("criterion weights must sum to 100, got {0}")]
    WeightSum(f64),
    #[error("duplicate criterion name: {0}")]
    DuplicateCriterion(String),
    #[error("set mode: {0}")]
    SetMode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    /// Percentage, 0 to 100.
    pub weight: f64,
    #[serde(default)]
    pub description: String,
}

/// Exhibition-set judging parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetModeConfig {
    pub set_size: usize,
    #[serde(default = "default_max_sets")]
    pub max_sets_to_evaluate: usize,
    #[serde(default = "default_individual_weight")]
    pub individual_weight: f64,
    #[serde(default = "default_set_weight")]
    pub set_weight: f64,
    /// Criteria the set as a whole is judged on (cohesion, sequencing, ...).
    #[serde(default)]
    pub set_criteria: Vec<Criterion>,
}

fn default_max_sets() -> usize {
    DEFAULT_MAX_SETS_TO_EVALUATE
}

fn default_individual_weight() -> f64 {
    DEFAULT_INDIVIDUAL_WEIGHT
}

fn default_set_weight() -> f64 {
    DEFAULT_SET_WEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_mode: Option<SetModeConfig>,
}

impl CompetitionConfig {
    pub fn validate(&self) -> Result<(), CompetitionError> {
        check_criteria(&self.criteria)?;
        if let Some(set_mode) = &self.set_mode {
            if set_mode.set_size < 2 {
                return Err(CompetitionError::SetMode(format!(
                    "set_size must be at least 2, got {}",
                    set_mode.set_size
                )));
            }
            let total = set_mode.individual_weight + set_mode.set_weight;
            if (total - 100.0).abs() > 0.01 {
                return Err(CompetitionError::SetMode(format!(
                    "individual_weight + set_weight must be 100, got {total}"
                )));
            }
            if !set_mode.set_criteria.is_empty() {
                check_criteria(&set_mode.set_criteria)?;
            }
        }
        Ok(())
    }

    /// JSON form used for hashing and for storing alongside results.
    pub fn to_json(&self) -> serde_json::Value {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn config_hash(&self) -> String {
        compute_config_hash(&self.to_json())
    }

    pub fn weight_of(&self, criterion: &str) -> Option<f64> {
        self.criteria.iter().find(|c| c.name == criterion).map(|c| c.weight)
    }
}

fn check_criteria(criteria: &[Criterion]) -> Result<(), CompetitionError> {
    if criteria.is_empty() {
        return Err(CompetitionError::NoCriteria);
    }
    let mut seen = std::collections::HashSet::new();
    for c in criteria {
        if !seen.insert(c.name.as_str()) {
            return Err(CompetitionError::DuplicateCriterion(c.name.clone()));
        }
    }
    let total: f64 = criteria.iter().map(|c| c.weight).sum();
    if (total - 100.0).abs() > 0.01 {
        return Err(CompetitionError::WeightSum(total));
    }
    Ok(())
}
