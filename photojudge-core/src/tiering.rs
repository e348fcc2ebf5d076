/// Tiering and summary statistics over per-photo scores.
///
/// Pure functions over read-only snapshots. Output order never depends on
/// input order: everything is sorted by score descending, then filename.
use crate::constants::{
    FIXED_HIGH_THRESHOLD, FIXED_MEDIUM_THRESHOLD, HIGH_PERCENTILE, MAX_SCORE, MEDIUM_PERCENTILE, MIN_SCORE,
};
use crate::types::PhotoScoreRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMethod {
    #[default]
    Percentile,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
}

impl Thresholds {
    pub const FIXED: Thresholds = Thresholds { high: FIXED_HIGH_THRESHOLD, medium: FIXED_MEDIUM_THRESHOLD };

    pub fn classify(&self, score: f64) -> Tier {
        if score > self.high {
            Tier::Tier1
        } else if score > self.medium {
            Tier::Tier2
        } else {
            Tier::Tier3
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

/// A photo placed in a tier, with its clamped score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TieredPhoto {
    pub filename: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub q1: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub thresholds: Thresholds,
    pub tier1_count: usize,
    pub tier2_count: usize,
    pub tier3_count: usize,
    /// Photos whose score was not a finite number. Left out of every tier.
    pub dropped_invalid: usize,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierReport {
    pub tier1: Vec<TieredPhoto>,
    pub tier2: Vec<TieredPhoto>,
    pub tier3: Vec<TieredPhoto>,
    pub summary: TierSummary,
}

/// One line of the final ranking handed to the reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub photo: String,
    pub overall_score: f64,
    pub tier: Tier,
}

/// Tier thresholds for a set of scores.
///
/// Percentiles index into the ascending sort at `floor(p * (n - 1))`; no
/// interpolation. Empty input falls back to the fixed thresholds.
pub fn calculate_boundaries(scores: &[f64], method: BoundaryMethod) -> Thresholds {
    let mut sorted: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    if method == BoundaryMethod::Fixed || sorted.is_empty() {
        return Thresholds::FIXED;
    }
    sorted.sort_by(f64::total_cmp);
    let at = |p: f64| sorted[((p * (sorted.len() - 1) as f64).floor() as usize).min(sorted.len() - 1)];
    Thresholds { high: at(HIGH_PERCENTILE), medium: at(MEDIUM_PERCENTILE) }
}

/// Split photos into tiers.
///
/// Non-finite weighted averages are dropped and counted; the rest are
/// clamped into [1, 10]. When `thresholds` is `None` they are derived from
/// the clamped scores with the percentile method.
pub fn generate_tiers(photos: &[PhotoScoreRecord], thresholds: Option<Thresholds>) -> TierReport {
    let mut valid: Vec<TieredPhoto> = Vec::with_capacity(photos.len());
    let mut dropped_invalid = 0;
    for photo in photos {
        if photo.weighted_average.is_finite() {
            valid.push(TieredPhoto {
                filename: photo.filename.clone(),
                score: photo.weighted_average.clamp(MIN_SCORE, MAX_SCORE),
            });
        } else {
            dropped_invalid += 1;
        }
    }
    valid.sort_by(compare_tiered);

    let scores: Vec<f64> = valid.iter().map(|p| p.score).collect();
    let thresholds = thresholds.unwrap_or_else(|| calculate_boundaries(&scores, BoundaryMethod::Percentile));

    let (mut tier1, mut tier2, mut tier3) = (Vec::new(), Vec::new(), Vec::new());
    for photo in valid {
        match thresholds.classify(photo.score) {
            Tier::Tier1 => tier1.push(photo),
            Tier::Tier2 => tier2.push(photo),
            Tier::Tier3 => tier3.push(photo),
        }
    }

    TierReport {
        summary: TierSummary {
            thresholds,
            tier1_count: tier1.len(),
            tier2_count: tier2.len(),
            tier3_count: tier3.len(),
            dropped_invalid,
            statistics: generate_statistics(&scores),
        },
        tier1,
        tier2,
        tier3,
    }
}

/// Score descending, then filename ascending.
fn compare_tiered(a: &TieredPhoto, b: &TieredPhoto) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.filename.cmp(&b.filename))
}

/// Count, mean, median, extremes, population standard deviation and
/// quartiles. Median and quartiles pick by truncated index, no interpolation.
pub fn generate_statistics(scores: &[f64]) -> Statistics {
    if scores.is_empty() {
        return Statistics::default();
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;

    Statistics {
        count: n,
        mean,
        median: sorted[n / 2],
        min: sorted[0],
        max: sorted[n - 1],
        std_dev: variance.sqrt(),
        q1: sorted[n / 4],
        q3: sorted[(3 * n) / 4],
    }
}

/// Flatten a tier report into the ranked list consumed by reports.
pub fn build_ranking(report: &TierReport) -> Vec<RankingEntry> {
    let mut all: Vec<(&TieredPhoto, Tier)> = report
        .tier1
        .iter()
        .map(|p| (p, Tier::Tier1))
        .chain(report.tier2.iter().map(|p| (p, Tier::Tier2)))
        .chain(report.tier3.iter().map(|p| (p, Tier::Tier3)))
        .collect();
    all.sort_by(|(a, _), (b, _)| compare_tiered(a, b));

    all.into_iter()
        .enumerate()
        .map(|(i, (photo, tier))| RankingEntry {
            rank: i + 1,
            photo: photo.filename.clone(),
            overall_score: photo.score,
            tier,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(name: &str, score: f64) -> PhotoScoreRecord {
        PhotoScoreRecord {
            filename: name.to_string(),
            individual_scores: BTreeMap::new(),
            weighted_average: score,
        }
    }

    fn scores_of(tier: &[TieredPhoto]) -> Vec<f64> {
        tier.iter().map(|p| p.score).collect()
    }

    #[test]
    fn test_boundary_semantics() {
        let photos: Vec<PhotoScoreRecord> = [9.5, 8.0, 8.0, 6.5, 6.4, 3.0]
            .iter()
            .enumerate()
            .map(|(i, s)| record(&format!("p{i}.jpg"), *s))
            .collect();
        let report = generate_tiers(&photos, Some(Thresholds { high: 8.0, medium: 6.5 }));

        assert_eq!(scores_of(&report.tier1), vec![9.5]);
        assert_eq!(scores_of(&report.tier2), vec![8.0, 8.0]);
        assert_eq!(scores_of(&report.tier3), vec![6.5, 6.4, 3.0]);
    }

    #[test]
    fn test_percentile_boundaries() {
        let t = calculate_boundaries(&[9.5, 8.0, 8.0, 6.5, 6.4, 3.0], BoundaryMethod::Percentile);
        assert_eq!(t, Thresholds { high: 8.0, medium: 6.5 });

        let t = calculate_boundaries(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 10.0], BoundaryMethod::Percentile);
        assert_eq!(t, Thresholds { high: 9.0, medium: 6.0 });
    }

    #[test]
    fn test_fixed_and_empty_boundaries() {
        assert_eq!(calculate_boundaries(&[1.0, 2.0], BoundaryMethod::Fixed), Thresholds::FIXED);
        assert_eq!(calculate_boundaries(&[], BoundaryMethod::Percentile), Thresholds { high: 8.0, medium: 6.5 });
    }

    #[test]
    fn test_invalid_scores_dropped_and_counted() {
        let photos = vec![
            record("a.jpg", f64::NAN),
            record("b.jpg", 12.0),
            record("c.jpg", -3.0),
            record("d.jpg", f64::INFINITY),
        ];
        let report = generate_tiers(&photos, None);
        assert_eq!(report.summary.dropped_invalid, 2);
        let all: Vec<f64> = [&report.tier1, &report.tier2, &report.tier3]
            .iter()
            .flat_map(|t| t.iter().map(|p| p.score))
            .collect();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&10.0));
        assert!(all.contains(&1.0));
    }

    #[test]
    fn test_partition_and_determinism() {
        let base: Vec<PhotoScoreRecord> = (0..37)
            .map(|i| record(&format!("img_{:02}.jpg", (i * 13) % 37), 1.0 + ((i * 7) % 19) as f64 * 0.5))
            .collect();
        let mut reversed = base.clone();
        reversed.reverse();

        let a = generate_tiers(&base, None);
        let b = generate_tiers(&reversed, None);
        assert_eq!(a, b);

        let total = a.tier1.len() + a.tier2.len() + a.tier3.len();
        assert_eq!(total, base.len());
        let mut names: Vec<&str> = [&a.tier1, &a.tier2, &a.tier3]
            .iter()
            .flat_map(|t| t.iter().map(|p| p.filename.as_str()))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), base.len());
    }

    #[test]
    fn test_ties_broken_by_filename() {
        let photos = vec![record("c.jpg", 7.0), record("a.jpg", 7.0), record("b.jpg", 9.0)];
        let report = generate_tiers(&photos, Some(Thresholds::FIXED));
        let ranking = build_ranking(&report);
        let order: Vec<&str> = ranking.iter().map(|r| r.photo.as_str()).collect();
        assert_eq!(order, vec!["b.jpg", "a.jpg", "c.jpg"]);
        assert_eq!(ranking[0].rank, 1);
        assert_eq!(ranking[0].tier, Tier::Tier1);
        assert_eq!(ranking[2].tier, Tier::Tier2);
    }

    #[test]
    fn test_statistics() {
        let stats = generate_statistics(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std_dev, 2.0); // population, not sample
        assert_eq!(stats.median, 5.0); // sorted[4]
        assert_eq!(stats.q1, 4.0); // sorted[2]
        assert_eq!(stats.q3, 7.0); // sorted[6]
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);

        assert_eq!(generate_statistics(&[]), Statistics::default());
    }
}
