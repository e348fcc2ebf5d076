use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One criterion's score as returned by the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// 1.0 to 10.0 on the competition's scale.
    pub score: f64,
    /// Percentage weight of this criterion, 0 to 100.
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub weighted_average: f64,
}

/// Scorer output for a single photo. Persisted verbatim in the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoEvaluation {
    /// Criterion name -> score. A `BTreeMap` so serialization order is stable.
    pub individual: BTreeMap<String, CriterionScore>,
    pub summary: ScoreSummary,
    /// Free-text critique, if the model wrote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl PhotoEvaluation {
    /// Weighted mean of the individual criteria. Zero when there are no
    /// criteria or all weights are zero.
    pub fn compute_weighted_average(individual: &BTreeMap<String, CriterionScore>) -> f64 {
        weighted_mean(individual.values())
    }
}

/// Scorer output for a whole candidate set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetEvaluation {
    pub criteria: BTreeMap<String, CriterionScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// A scored photo as seen by aggregation. Built from the checkpoint's
/// results map; aggregation only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoScoreRecord {
    pub filename: String,
    pub individual_scores: BTreeMap<String, CriterionScore>,
    pub weighted_average: f64,
}

impl PhotoScoreRecord {
    pub fn from_evaluation(filename: impl Into<String>, evaluation: &PhotoEvaluation) -> Self {
        PhotoScoreRecord {
            filename: filename.into(),
            individual_scores: evaluation.individual.clone(),
            weighted_average: evaluation.summary.weighted_average,
        }
    }
}

/// Weighted mean of criterion scores; 0.0 for empty input or zero total weight.
pub(crate) fn weighted_mean<'a>(scores: impl IntoIterator<Item = &'a CriterionScore>) -> f64 {
    let (sum, total_weight) = scores
        .into_iter()
        .fold((0.0, 0.0), |(sum, w), c| (sum + c.score * c.weight, w + c.weight));
    if total_weight > 0.0 {
        sum / total_weight
    } else {
        0.0
    }
}

/// Arithmetic mean; 0.0 for empty input.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(pairs: &[(&str, f64, f64)]) -> BTreeMap<String, CriterionScore> {
        pairs
            .iter()
            .map(|(name, score, weight)| (name.to_string(), CriterionScore { score: *score, weight: *weight }))
            .collect()
    }

    #[test]
    fn test_weighted_average() {
        let individual = criteria(&[("composition", 8.0, 50.0), ("lighting", 6.0, 50.0)]);
        assert_eq!(PhotoEvaluation::compute_weighted_average(&individual), 7.0);

        let skewed = criteria(&[("composition", 10.0, 75.0), ("lighting", 2.0, 25.0)]);
        assert_eq!(PhotoEvaluation::compute_weighted_average(&skewed), 8.0);
    }

    #[test]
    fn test_weighted_average_empty_or_weightless() {
        assert_eq!(PhotoEvaluation::compute_weighted_average(&BTreeMap::new()), 0.0);
        let weightless = criteria(&[("composition", 9.0, 0.0)]);
        assert_eq!(PhotoEvaluation::compute_weighted_average(&weightless), 0.0);
    }

    #[test]
    fn test_evaluation_json_shape() {
        let eval = PhotoEvaluation {
            individual: criteria(&[("impact", 7.5, 100.0)]),
            summary: ScoreSummary { weighted_average: 7.5 },
            analysis: None,
        };
        let json = serde_json::to_value(&eval).unwrap();
        assert_eq!(json["summary"]["weightedAverage"], 7.5);
        assert_eq!(json["individual"]["impact"]["weight"], 100.0);
        assert!(json.get("analysis").is_none());
    }
}
