/// Current checkpoint schema version. Checkpoints written with any other
/// version (after migration) are discarded on load.
pub const CHECKPOINT_VERSION: &str = "1.1";

/// Hidden file inside the project directory that holds the in-progress batch.
/// Its presence means "a batch was interrupted"; its absence means "never
/// started" or "finished cleanly".
pub const CHECKPOINT_FILENAME: &str = ".photojudge-checkpoint.json";

/// Checkpoints older than this are considered stale and the batch restarts.
pub const MAX_CHECKPOINT_AGE_DAYS: i64 = 7;

/// Resolved photos between checkpoint saves.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;
pub const MIN_CHECKPOINT_INTERVAL: usize = 1;
pub const MAX_CHECKPOINT_INTERVAL: usize = 50;

/// Wall-clock budget for a single scorer call, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Concurrent scorer calls when the caller does not choose.
pub const DEFAULT_PARALLEL: usize = 3;

/// Upper bound the auto-scaler may grow to.
pub const DEFAULT_MAX_PARALLEL: usize = 6;

/// Resident memory above which the controller collapses to a single slot.
pub const DEFAULT_MEMORY_THRESHOLD_MB: f64 = 400.0;

/// Number of completed operations averaged into the latency baseline, and the
/// size of the rolling window compared against it.
pub const LATENCY_WINDOW: usize = 3;

/// Recent average above `baseline * SCALE_DOWN_RATIO` drops one slot.
pub const SCALE_DOWN_RATIO: f64 = 2.0;

/// Recent average below `baseline * SCALE_UP_RATIO` adds one slot.
pub const SCALE_UP_RATIO: f64 = 1.2;

/// Score range every criterion and weighted average is clamped into.
pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

/// Fixed tier thresholds, also used when there is nothing to take percentiles of.
pub const FIXED_HIGH_THRESHOLD: f64 = 8.0;
pub const FIXED_MEDIUM_THRESHOLD: f64 = 6.5;

/// Percentiles for the percentile boundary method (top 20% / top 45%).
pub const HIGH_PERCENTILE: f64 = 0.80;
pub const MEDIUM_PERCENTILE: f64 = 0.55;

/// Candidate selection keeps only this many individually best photos before
/// enumerating combinations.
pub const DEFAULT_PRE_FILTER_TOP_N: usize = 12;

/// Hard ceiling on C(pool, k). Exceeding it is an error, never a truncation.
pub const DEFAULT_MAX_COMBINATIONS: u128 = 10_000;

/// Candidate sets handed to the (expensive) vision-model set evaluation.
pub const DEFAULT_MAX_SETS_TO_EVALUATE: usize = 10;

/// Largest per-axis distance between two criterion scores on the 1-10 scale,
/// used to normalize diversity into [0, 1].
pub const MAX_AXIS_DISTANCE: f64 = 10.0;

/// Diversity contributes up to this many points to a candidate's pre-score.
pub const DIVERSITY_BONUS_WEIGHT: f64 = 2.0;

/// Composite weights for set ranking, in percent.
pub const DEFAULT_INDIVIDUAL_WEIGHT: f64 = 40.0;
pub const DEFAULT_SET_WEIGHT: f64 = 60.0;
