/// Combination enumeration and candidate-set selection.
///
/// Selection is two-phase: a cheap pre-score (sum of individual scores plus a
/// diversity bonus) ranks every k-subset of the best photos, and only the top
/// few are handed to the vision model for set-level evaluation.
use crate::constants::{
    DEFAULT_MAX_COMBINATIONS, DEFAULT_MAX_SETS_TO_EVALUATE, DEFAULT_PRE_FILTER_TOP_N, DIVERSITY_BONUS_WEIGHT,
    MAX_AXIS_DISTANCE,
};
use crate::types::PhotoScoreRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("set size {set_size} is not possible with {pool} candidate photos")]
    InvalidSetSize { set_size: usize, pool: usize },
    #[error(
        "C({pool}, {set_size}) = {count} combinations exceeds the limit of {max}; \
         lower the pre-filter size or the set size"
    )]
    TooManyCombinations { count: u128, pool: usize, set_size: usize, max: u128 },
}

// ---------------------------------------------------------------------------
// Counting and enumeration
// ---------------------------------------------------------------------------

/// C(n, k) via the symmetric multiplicative formula. Zero when `k > n`;
/// saturates at `u128::MAX`.
pub fn count_combinations(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        // result * (n - i) is always divisible by (i + 1) at this point.
        result = match result.checked_mul((n - i) as u128) {
            Some(v) => v / (i as u128 + 1),
            None => return u128::MAX,
        };
    }
    result
}

/// Lazy k-combinations of a slice in lexicographic index order.
///
/// Cloning the iterator restarts from the clone's position, so a fresh
/// `generate_combinations` (or a clone taken before iterating) can be walked
/// again.
#[derive(Debug, Clone)]
pub struct Combinations<'a, T> {
    items: &'a [T],
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

pub fn generate_combinations<T>(items: &[T], k: usize) -> Combinations<'_, T> {
    Combinations {
        items,
        indices: (0..k).collect(),
        started: false,
        done: k > items.len(),
    }
}

impl<'a, T> Combinations<'a, T> {
    fn current(&self) -> Vec<&'a T> {
        self.indices.iter().map(|&i| &self.items[i]).collect()
    }

    /// Advance the rightmost index that can still move, reset the ones after it.
    fn advance(&mut self) -> bool {
        let n = self.items.len();
        let k = self.indices.len();
        let Some(i) = (0..k).rev().find(|&i| self.indices[i] < i + n - k) else {
            return false;
        };
        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        true
    }
}

impl<'a, T> Iterator for Combinations<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.current());
        }
        if self.advance() {
            Some(self.current())
        } else {
            self.done = true;
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Diversity and selection
// ---------------------------------------------------------------------------

/// Mean pairwise distance between the photos' criterion vectors, in [0, 1].
///
/// Each pair's distance is the Euclidean distance over the criteria both
/// photos share, divided by the square root of the shared count (i.e. the RMS
/// per-axis difference), then scaled by the largest possible per-axis
/// distance. Fewer than two photos have no diversity.
pub fn calculate_diversity(photos: &[&PhotoScoreRecord]) -> f64 {
    if photos.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in photos.iter().enumerate() {
        for b in &photos[i + 1..] {
            let diffs: Vec<f64> = a
                .individual_scores
                .iter()
                .filter_map(|(name, sa)| b.individual_scores.get(name).map(|sb| sa.score - sb.score))
                .collect();
            if !diffs.is_empty() {
                let sq: f64 = diffs.iter().map(|d| d * d).sum();
                total += (sq / diffs.len() as f64).sqrt();
            }
            pairs += 1;
        }
    }
    (total / pairs as f64 / MAX_AXIS_DISTANCE).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionOptions {
    /// Only the best `pre_filter_top_n` photos are combined.
    pub pre_filter_top_n: usize,
    /// Upper bound on C(pool, set_size).
    pub max_combinations: u128,
    pub max_sets_to_evaluate: usize,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        SelectionOptions {
            pre_filter_top_n: DEFAULT_PRE_FILTER_TOP_N,
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            max_sets_to_evaluate: DEFAULT_MAX_SETS_TO_EVALUATE,
        }
    }
}

/// A proposed set of photos. `set_id` is assigned once the set is promoted
/// to full evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSet<'a> {
    pub photos: Vec<&'a PhotoScoreRecord>,
    pub pre_score: f64,
    pub diversity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_id: Option<String>,
}

impl<'a> CandidateSet<'a> {
    pub fn promote(mut self, set_id: impl Into<String>) -> Self {
        self.set_id = Some(set_id.into());
        self
    }

    pub fn filenames(&self) -> Vec<&'a str> {
        self.photos.iter().map(|p| p.filename.as_str()).collect()
    }
}

/// Best `set_size`-photo candidate sets, by pre-score descending.
///
/// Photos with a non-finite weighted average are never candidates. Ties in
/// pre-score keep enumeration order.
pub fn select_candidate_sets<'a>(
    ranked: &'a [PhotoScoreRecord],
    set_size: usize,
    options: &SelectionOptions,
) -> Result<Vec<CandidateSet<'a>>, SelectionError> {
    let mut pool: Vec<&PhotoScoreRecord> = ranked.iter().filter(|p| p.weighted_average.is_finite()).collect();
    pool.sort_by(|a, b| {
        b.weighted_average
            .total_cmp(&a.weighted_average)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    pool.truncate(options.pre_filter_top_n);

    if set_size == 0 || set_size > pool.len() {
        return Err(SelectionError::InvalidSetSize { set_size, pool: pool.len() });
    }

    let count = count_combinations(pool.len(), set_size);
    if count > options.max_combinations {
        return Err(SelectionError::TooManyCombinations {
            count,
            pool: pool.len(),
            set_size,
            max: options.max_combinations,
        });
    }
    debug!(pool = pool.len(), set_size, count, "Enumerating candidate sets");

    let mut candidates: Vec<CandidateSet<'a>> = generate_combinations(&pool, set_size)
        .map(|combo| {
            let photos: Vec<&'a PhotoScoreRecord> = combo.into_iter().copied().collect();
            let diversity = calculate_diversity(&photos);
            let individual: f64 = photos.iter().map(|p| p.weighted_average).sum();
            CandidateSet {
                pre_score: individual + DIVERSITY_BONUS_WEIGHT * diversity,
                diversity,
                photos,
                set_id: None,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.pre_score.total_cmp(&a.pre_score));
    candidates.truncate(options.max_sets_to_evaluate);
    Ok(candidates)
}
