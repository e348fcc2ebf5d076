/// Composite scoring, ranking and comparison of evaluated exhibition sets.
use crate::constants::{DEFAULT_INDIVIDUAL_WEIGHT, DEFAULT_SET_WEIGHT};
use crate::tiering::{generate_statistics, Statistics};
use crate::types::{mean, weighted_mean, SetEvaluation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Percent weights of the individual and set-level components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub individual: f64,
    pub set: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        CompositeWeights { individual: DEFAULT_INDIVIDUAL_WEIGHT, set: DEFAULT_SET_WEIGHT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    /// Mean of the member photos' weighted averages.
    pub individual_mean: f64,
    /// Weighted mean of the set-level criteria.
    pub set_score: f64,
    pub composite: f64,
}

/// `(w_i * mean(individual) + w_s * weighted_mean(set criteria)) / 100`.
/// Either component is 0 when its input is empty.
pub fn aggregate_set_scores(
    individual_scores: &[f64],
    set_level: &SetEvaluation,
    weights: CompositeWeights,
) -> CompositeResult {
    let individual_mean = mean(individual_scores);
    let set_score = weighted_mean(set_level.criteria.values());
    CompositeResult {
        individual_mean,
        set_score,
        composite: (weights.individual * individual_mean + weights.set * set_score) / 100.0,
    }
}

/// A fully evaluated candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResult {
    pub set_id: String,
    pub photos: Vec<String>,
    pub evaluation: SetEvaluation,
    pub score: CompositeResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSet {
    pub rank: usize,
    #[serde(flatten)]
    pub result: SetResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetRanking {
    pub ranking: Vec<RankedSet>,
    /// Over composite scores.
    pub statistics: Statistics,
}

/// Stable sort by composite descending; ranks start at 1.
pub fn rank_sets(mut results: Vec<SetResult>) -> SetRanking {
    results.sort_by(|a, b| b.score.composite.total_cmp(&a.score.composite));
    let composites: Vec<f64> = results.iter().map(|r| r.score.composite).collect();
    SetRanking {
        statistics: generate_statistics(&composites),
        ranking: results
            .into_iter()
            .enumerate()
            .map(|(i, result)| RankedSet { rank: i + 1, result })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    First,
    Second,
    Tie,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetComparison {
    pub winner: Winner,
    /// `a.composite - b.composite`.
    pub score_delta: f64,
    /// `a - b` per set-level criterion; a criterion missing on one side counts as 0.
    pub per_criterion_diffs: BTreeMap<String, f64>,
}

pub fn compare_sets(a: &SetResult, b: &SetResult) -> SetComparison {
    let score_delta = a.score.composite - b.score.composite;
    let winner = if score_delta > 0.0 {
        Winner::First
    } else if score_delta < 0.0 {
        Winner::Second
    } else {
        Winner::Tie
    };

    let names: BTreeSet<&String> = a.evaluation.criteria.keys().chain(b.evaluation.criteria.keys()).collect();
    let score_of = |eval: &SetEvaluation, name: &str| eval.criteria.get(name).map(|c| c.score).unwrap_or(0.0);
    let per_criterion_diffs = names
        .into_iter()
        .map(|name| (name.clone(), score_of(&a.evaluation, name) - score_of(&b.evaluation, name)))
        .collect();

    SetComparison { winner, score_delta, per_criterion_diffs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CriterionScore;

    fn evaluation(pairs: &[(&str, f64, f64)]) -> SetEvaluation {
        SetEvaluation {
            criteria: pairs
                .iter()
                .map(|(n, s, w)| (n.to_string(), CriterionScore { score: *s, weight: *w }))
                .collect(),
            analysis: None,
        }
    }

    fn result(id: &str, composite: f64, eval: SetEvaluation) -> SetResult {
        SetResult {
            set_id: id.to_string(),
            photos: vec![],
            evaluation: eval,
            score: CompositeResult { individual_mean: 0.0, set_score: 0.0, composite },
        }
    }

    #[test]
    fn test_composite_default_weights() {
        let eval = evaluation(&[("cohesion", 9.0, 50.0), ("flow", 7.0, 50.0)]);
        let r = aggregate_set_scores(&[7.0, 8.0, 9.0], &eval, CompositeWeights::default());
        assert_eq!(r.individual_mean, 8.0);
        assert_eq!(r.set_score, 8.0);
        assert!((r.composite - 8.0).abs() < 1e-9);

        let r = aggregate_set_scores(&[10.0], &evaluation(&[("cohesion", 5.0, 100.0)]), CompositeWeights::default());
        assert!((r.composite - 7.0).abs() < 1e-9); // 0.4 * 10 + 0.6 * 5
    }

    #[test]
    fn test_composite_empty_inputs() {
        let r = aggregate_set_scores(&[], &SetEvaluation::default(), CompositeWeights::default());
        assert_eq!(r, CompositeResult { individual_mean: 0.0, set_score: 0.0, composite: 0.0 });

        let r = aggregate_set_scores(&[6.0], &SetEvaluation::default(), CompositeWeights { individual: 50.0, set: 50.0 });
        assert_eq!(r.composite, 3.0);
    }

    #[test]
    fn test_rank_sets_stable() {
        let ranking = rank_sets(vec![
            result("s1", 7.0, SetEvaluation::default()),
            result("s2", 9.0, SetEvaluation::default()),
            result("s3", 7.0, SetEvaluation::default()),
        ]);
        let order: Vec<(usize, &str)> = ranking.ranking.iter().map(|r| (r.rank, r.result.set_id.as_str())).collect();
        assert_eq!(order, vec![(1, "s2"), (2, "s1"), (3, "s3")]);
        assert_eq!(ranking.statistics.max, 9.0);
        assert_eq!(ranking.statistics.min, 7.0);
        assert_eq!(ranking.statistics.median, 7.0);
        assert!((ranking.statistics.mean - 23.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_sets() {
        let a = result("a", 8.0, evaluation(&[("cohesion", 9.0, 50.0), ("flow", 6.0, 50.0)]));
        let b = result("b", 7.5, evaluation(&[("cohesion", 7.0, 50.0), ("variety", 8.0, 50.0)]));

        let cmp = compare_sets(&a, &b);
        assert_eq!(cmp.winner, Winner::First);
        assert_eq!(cmp.score_delta, 0.5);
        assert_eq!(cmp.per_criterion_diffs["cohesion"], 2.0);
        assert_eq!(cmp.per_criterion_diffs["flow"], 6.0);
        assert_eq!(cmp.per_criterion_diffs["variety"], -8.0);

        assert_eq!(compare_sets(&b, &a).winner, Winner::Second);
    }

    #[test]
    fn test_exact_tie_reported() {
        let a = result("a", 7.25, SetEvaluation::default());
        let b = result("b", 7.25, SetEvaluation::default());
        let cmp = compare_sets(&a, &b);
        assert_eq!(cmp.winner, Winner::Tie);
        assert_eq!(cmp.score_delta, 0.0);
    }
}
