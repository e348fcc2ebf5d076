/// photojudge-core: resumable batch judging of competition photos.
///
/// Score a directory of photos with a vision model → tier and rank them →
/// pick and evaluate exhibition sets. The vision model is behind the
/// [`Scorer`] / [`SetScorer`] traits; bring your own client.
///
/// - [`BatchDriver`] runs the batch: checkpointed every N photos, resumable
///   after a crash or a backend outage, bounded by an adaptive
///   [`ConcurrencyController`].
/// - [`tiering`] turns scores into tiers, statistics and a ranking.
/// - [`combinations`] and [`sets`] pick candidate sets and aggregate their
///   set-level evaluations.
///
/// # Quick start
///
/// ```rust
/// use photojudge_core::{build_ranking, generate_tiers, PhotoScoreRecord, Thresholds, Tier};
/// use std::collections::BTreeMap;
///
/// let photos: Vec<PhotoScoreRecord> = [("dawn.jpg", 9.1), ("dusk.jpg", 7.0), ("noon.jpg", 4.2)]
///     .iter()
///     .map(|(name, score)| PhotoScoreRecord {
///         filename: name.to_string(),
///         individual_scores: BTreeMap::new(),
///         weighted_average: *score,
///     })
///     .collect();
///
/// let report = generate_tiers(&photos, Some(Thresholds::FIXED));
/// let ranking = build_ranking(&report);
///
/// assert_eq!(ranking[0].photo, "dawn.jpg");
/// assert_eq!(ranking[0].tier, Tier::Tier1);
/// assert_eq!(ranking[2].tier, Tier::Tier3);
/// ```

pub mod batch;
pub mod checkpoint;
pub mod classifier;
pub mod combinations;
pub mod competition;
pub mod concurrency;
pub mod constants;
pub mod photos;
pub mod scorer;
pub mod sets;
pub mod tiering;
pub mod types;

// Re-export primary public API at crate root.
pub use batch::{BatchDriver, BatchError, BatchOptions, BatchOutcome, BatchPhase, FailedPhoto};
pub use checkpoint::Checkpoint;
pub use classifier::{classify, ErrorClassification, ErrorKind};
pub use combinations::{
    calculate_diversity, count_combinations, generate_combinations, select_candidate_sets, CandidateSet,
    SelectionError, SelectionOptions,
};
pub use competition::{CompetitionConfig, CompetitionError, Criterion, SetModeConfig};
pub use concurrency::{ConcurrencyController, ControllerConfig, ControllerStats, MemoryProbe, Slot};
pub use photos::{list_photos, photo_name, SignatureValidator};
pub use scorer::{PhotoMetadata, PhotoValidator, Scorer, ScorerError, SetScorer, ValidationFailure, ValidationReport};
pub use sets::{aggregate_set_scores, compare_sets, rank_sets, CompositeWeights, SetComparison, SetRanking, SetResult, Winner};
pub use tiering::{
    build_ranking, calculate_boundaries, generate_statistics, generate_tiers, BoundaryMethod, RankingEntry,
    Statistics, Thresholds, Tier, TierReport,
};
pub use types::{CriterionScore, PhotoEvaluation, PhotoScoreRecord, ScoreSummary, SetEvaluation};
