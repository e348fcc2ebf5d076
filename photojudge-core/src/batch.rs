/// Batch driver: scores every photo in a directory, resumably.
///
/// One control loop owns the checkpoint. Photos are queued in filename order,
/// each one a future in a single `FuturesUnordered` that acquires a slot from
/// the concurrency controller, passes the validator and is scored under a
/// wall-clock timeout, so the controller alone limits how many run at once.
/// Every `checkpoint_interval` resolved photos the loop folds them into the
/// checkpoint and saves it; the remainder is folded once the queue drains.
///
/// A backend outage stops the run: photos still waiting for a slot are never
/// dispatched, the checkpoint is saved and `BatchError::BackendUnreachable`
/// tells the caller the batch can be resumed.
use crate::checkpoint::{self, BatchMetadata, BatchStatus, Checkpoint};
use crate::classifier::{classify_scorer_error, ErrorKind};
use crate::competition::CompetitionConfig;
use crate::concurrency::{ConcurrencyController, ControllerStats};
use crate::constants::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_TIMEOUT_SECS, MAX_CHECKPOINT_INTERVAL, MAX_TIMEOUT_SECS,
    MIN_CHECKPOINT_INTERVAL, MIN_TIMEOUT_SECS,
};
use crate::photos::{list_photos, photo_name};
use crate::scorer::{PhotoValidator, Scorer};
use crate::types::{PhotoEvaluation, PhotoScoreRecord};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no photos found in {}", .0.display())]
    NoPhotos(PathBuf),

    #[error("cannot read photo directory {}", path.display())]
    PhotoDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run stopped early. Re-running the same batch resumes it.
    #[error("scoring backend unreachable while analyzing {photo}: {message}")]
    BackendUnreachable {
        photo: String,
        message: String,
        checkpoint_saved: bool,
        processed: usize,
        remaining: usize,
    },
}

impl BatchError {
    pub fn is_resumable(&self) -> bool {
        matches!(self, BatchError::BackendUnreachable { checkpoint_saved: true, .. })
    }
}

/// Lifecycle of one batch run, as it appears in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    NotStarted,
    Resuming,
    Running,
    Completed,
    AbortedRecoverable,
    AbortedFatal,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchPhase::NotStarted => "not-started",
            BatchPhase::Resuming => "resuming",
            BatchPhase::Running => "running",
            BatchPhase::Completed => "completed",
            BatchPhase::AbortedRecoverable => "aborted-recoverable",
            BatchPhase::AbortedFatal => "aborted-fatal",
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Where the checkpoint lives.
    pub project_dir: PathBuf,
    pub photo_dir: PathBuf,
    /// Resolved photos per checkpoint save; clamped to [1, 50].
    pub checkpoint_interval: usize,
    /// Per-photo scorer budget; clamped to [30 s, 300 s].
    pub timeout: Duration,
    /// Ignore and remove any existing checkpoint.
    pub fresh: bool,
}

impl BatchOptions {
    pub fn new(project_dir: impl Into<PathBuf>, photo_dir: impl Into<PathBuf>) -> Self {
        BatchOptions {
            project_dir: project_dir.into(),
            photo_dir: photo_dir.into(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            fresh: false,
        }
    }

    /// Clamp out-of-range settings, warning about each one.
    pub fn normalized(mut self) -> Self {
        let interval = self.checkpoint_interval.clamp(MIN_CHECKPOINT_INTERVAL, MAX_CHECKPOINT_INTERVAL);
        if interval != self.checkpoint_interval {
            warn!(
                requested = self.checkpoint_interval,
                using = interval,
                "Checkpoint interval out of range [{MIN_CHECKPOINT_INTERVAL}, {MAX_CHECKPOINT_INTERVAL}]"
            );
            self.checkpoint_interval = interval;
        }

        let timeout = self
            .timeout
            .clamp(Duration::from_secs(MIN_TIMEOUT_SECS), Duration::from_secs(MAX_TIMEOUT_SECS));
        if timeout != self.timeout {
            warn!(
                requested_secs = self.timeout.as_secs_f64(),
                using_secs = timeout.as_secs(),
                "Timeout out of range [{MIN_TIMEOUT_SECS}s, {MAX_TIMEOUT_SECS}s]"
            );
            self.timeout = timeout;
        }
        self
    }
}

/// A photo that was skipped, with what to do about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPhoto {
    pub filename: String,
    pub kind: ErrorKind,
    pub reason: &'static str,
    pub message: String,
    pub remedy: &'static str,
}

impl FailedPhoto {
    fn new(filename: String, kind: ErrorKind, message: impl Into<String>) -> Self {
        FailedPhoto {
            filename,
            kind,
            reason: kind.reason(),
            message: message.into(),
            remedy: kind.remedy(),
        }
    }
}

/// Result of a batch that ran to the end of its queue.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Every scored photo, resumed and new, sorted by filename.
    pub scores: Vec<PhotoScoreRecord>,
    /// Photos skipped in this run.
    pub failed: Vec<FailedPhoto>,
    /// Photo files found in the directory.
    pub total_photos: usize,
    /// Scored photos carried over from a checkpoint.
    pub resumed: usize,
    /// Photos scored in this run.
    pub processed_this_run: usize,
    /// Checkpointed photos whose files have since disappeared.
    pub pruned_missing: Vec<String>,
    pub stats: ControllerStats,
}

impl BatchOutcome {
    /// Scored plus skipped accounts for every photo.
    pub fn is_reconciled(&self) -> bool {
        self.scores.len() + self.failed.len() == self.total_photos
    }
}

/// Results resolved since the last save point.
#[derive(Default)]
struct PendingUpdate {
    scored_names: Vec<String>,
    scores: BTreeMap<String, PhotoEvaluation>,
    failed_names: Vec<String>,
}

impl PendingUpdate {
    fn scored(&mut self, name: String, evaluation: PhotoEvaluation) {
        self.scored_names.push(name.clone());
        self.scores.insert(name, evaluation);
    }

    fn len(&self) -> usize {
        self.scored_names.len() + self.failed_names.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fold_into(&mut self, cp: &mut Checkpoint, save_point: usize) {
        let update = std::mem::take(self);
        checkpoint::update(cp, &update.scored_names, update.scores, &update.failed_names);
        debug!(
            save_point,
            scored = update.scored_names.len(),
            failed = update.failed_names.len(),
            total_done = cp.progress.count,
            "Checkpoint updated"
        );
    }
}

enum PhotoOutcome {
    Scored(String, PhotoEvaluation),
    Skipped(FailedPhoto),
    BackendDown { photo: String, message: String },
    /// Never started because the run was halting.
    NotDispatched,
}

pub struct BatchDriver {
    scorer: Arc<dyn Scorer>,
    validator: Arc<dyn PhotoValidator>,
    controller: ConcurrencyController,
}

impl BatchDriver {
    pub fn new(scorer: Arc<dyn Scorer>, validator: Arc<dyn PhotoValidator>, controller: ConcurrencyController) -> Self {
        BatchDriver { scorer, validator, controller }
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    /// Score every photo in `options.photo_dir` against `criteria_prompt`,
    /// resuming from a compatible checkpoint when there is one.
    pub async fn run(
        &self,
        competition: &CompetitionConfig,
        criteria_prompt: &str,
        options: BatchOptions,
    ) -> Result<BatchOutcome, BatchError> {
        let options = options.normalized();
        let project_dir = options.project_dir.as_path();
        let config_json = competition.to_json();
        info!(phase = %BatchPhase::NotStarted, photos = %options.photo_dir.display(), "Starting batch");

        let existing = if options.fresh {
            checkpoint::delete(project_dir);
            None
        } else {
            self.load_compatible(project_dir, &config_json)
        };

        let photos = list_photos(&options.photo_dir).map_err(|source| {
            info!(phase = %BatchPhase::AbortedFatal, "Photo directory unreadable");
            BatchError::PhotoDirectory { path: options.photo_dir.clone(), source }
        })?;
        if photos.is_empty() {
            info!(phase = %BatchPhase::AbortedFatal, "No photos to analyze");
            return Err(BatchError::NoPhotos(options.photo_dir.clone()));
        }
        let names: HashSet<String> = photos.iter().map(|p| photo_name(p)).collect();

        let (mut cp, pruned_missing) = match existing {
            Some(mut cp) => {
                checkpoint::mark_resumed(&mut cp);
                let pruned = checkpoint::retain_present(&mut cp, &names);
                if !pruned.is_empty() {
                    info!(count = pruned.len(), "Dropped checkpointed photos that are no longer on disk");
                }
                if cp.batch_metadata.photo_directory != options.photo_dir {
                    warn!(
                        checkpoint = %cp.batch_metadata.photo_directory.display(),
                        current = %options.photo_dir.display(),
                        "Photo directory differs from the checkpoint's"
                    );
                }
                info!(
                    phase = %BatchPhase::Resuming,
                    done = cp.progress.count,
                    remaining = photos.len() - cp.progress.count,
                    previously_failed = cp.progress.failed_photo_names.len(),
                    "Resuming from checkpoint"
                );
                (cp, pruned)
            }
            None => {
                let cp = checkpoint::initialize(
                    &competition.config_hash(),
                    criteria_prompt,
                    BatchMetadata {
                        parallel_setting: self.controller.max_slots(),
                        checkpoint_interval_photos: options.checkpoint_interval,
                        total_photos_in_batch: photos.len(),
                        photo_directory: options.photo_dir.clone(),
                    },
                );
                (cp, Vec::new())
            }
        };
        cp.batch_metadata.total_photos_in_batch = photos.len();
        cp.batch_metadata.checkpoint_interval_photos = options.checkpoint_interval;
        checkpoint::save(&cp, project_dir);

        // A resumed batch keeps judging against the prompt it started with.
        let prompt = cp.criteria_prompt.clone();
        let resumed = cp.progress.count;
        let done: HashSet<&str> = cp.progress.analyzed_photo_names.iter().map(String::as_str).collect();
        let queue: Vec<&PathBuf> = photos.iter().filter(|p| !done.contains(photo_name(p).as_str())).collect();
        drop(done);

        info!(
            phase = %BatchPhase::Running,
            queued = queue.len(),
            interval = options.checkpoint_interval,
            timeout_secs = options.timeout.as_secs(),
            slots = self.controller.max_slots(),
            "Analyzing photos"
        );

        let halt = AtomicBool::new(false);
        let mut failed: Vec<FailedPhoto> = Vec::new();
        let mut pending = PendingUpdate::default();
        let mut backend_down = None;
        let mut save_point = 0usize;

        let mut in_flight: FuturesUnordered<_> = queue
            .iter()
            .map(|path| self.process_photo(path, &prompt, options.timeout, &halt))
            .collect();

        while let Some(outcome) = in_flight.next().await {
            match outcome {
                PhotoOutcome::Scored(name, evaluation) => pending.scored(name, evaluation),
                PhotoOutcome::Skipped(failure) => {
                    pending.failed_names.push(failure.filename.clone());
                    failed.push(failure);
                }
                PhotoOutcome::BackendDown { photo, message } => {
                    backend_down.get_or_insert((photo, message));
                }
                PhotoOutcome::NotDispatched => {}
            }

            if backend_down.is_none() && pending.len() >= options.checkpoint_interval {
                save_point += 1;
                pending.fold_into(&mut cp, save_point);
                checkpoint::save(&cp, project_dir);
            }
        }
        drop(in_flight);

        if !pending.is_empty() {
            save_point += 1;
            pending.fold_into(&mut cp, save_point);
        }

        if let Some((photo, message)) = backend_down {
            cp.progress.status = BatchStatus::Abandoned;
            let checkpoint_saved = checkpoint::save(&cp, project_dir);
            let processed = cp.progress.count;
            let phase = if checkpoint_saved {
                BatchPhase::AbortedRecoverable
            } else {
                BatchPhase::AbortedFatal
            };
            warn!(phase = %phase, %photo, processed, "Scoring backend unreachable, stopping batch");
            return Err(BatchError::BackendUnreachable {
                photo,
                message,
                checkpoint_saved,
                processed,
                remaining: photos.len().saturating_sub(processed),
            });
        }
        checkpoint::save(&cp, project_dir);

        cp.progress.status = BatchStatus::Completed;
        checkpoint::delete(project_dir);

        let mut scores: Vec<PhotoScoreRecord> = cp
            .results
            .scores_by_photo
            .iter()
            .map(|(name, evaluation)| PhotoScoreRecord::from_evaluation(name.as_str(), evaluation))
            .collect();
        scores.sort_by(|a, b| a.filename.cmp(&b.filename));
        failed.sort_by(|a, b| a.filename.cmp(&b.filename));

        let outcome = BatchOutcome {
            total_photos: photos.len(),
            resumed,
            processed_this_run: cp.progress.count - resumed,
            scores,
            failed,
            pruned_missing,
            stats: self.controller.stats(),
        };
        info!(
            phase = %BatchPhase::Completed,
            scored = outcome.scores.len(),
            failed = outcome.failed.len(),
            this_run = outcome.processed_this_run,
            "Batch complete"
        );
        Ok(outcome)
    }

    /// Load the project's checkpoint if it may be resumed; otherwise remove it.
    fn load_compatible(&self, project_dir: &Path, config_json: &serde_json::Value) -> Option<Checkpoint> {
        let cp = checkpoint::load(project_dir)?;
        let validation = checkpoint::validate(&cp, config_json);
        match validation.reason {
            None => Some(cp),
            Some(reason) => {
                info!(%reason, "Discarding checkpoint, starting fresh");
                checkpoint::delete(project_dir);
                None
            }
        }
    }

    async fn process_photo(&self, path: &Path, prompt: &str, timeout: Duration, halt: &AtomicBool) -> PhotoOutcome {
        let slot = self.controller.acquire_slot().await;
        if halt.load(Ordering::SeqCst) {
            self.controller.release_slot(&slot);
            return PhotoOutcome::NotDispatched;
        }

        let name = photo_name(path);
        let started = Instant::now();
        let outcome = self.score_photo(path, name, prompt, timeout).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &outcome {
            PhotoOutcome::BackendDown { .. } => halt.store(true, Ordering::SeqCst),
            PhotoOutcome::Scored(..) => self.controller.report_latency(&slot, elapsed_ms),
            PhotoOutcome::Skipped(f) if f.kind == ErrorKind::Timeout => {
                self.controller.report_latency(&slot, elapsed_ms)
            }
            _ => {}
        }
        self.controller.release_slot(&slot);
        outcome
    }

    async fn score_photo(&self, path: &Path, name: String, prompt: &str, timeout: Duration) -> PhotoOutcome {
        let report = self.validator.validate(path).await;
        if !report.valid {
            let (kind, message) = match report.error {
                Some(e) => (e.kind, e.message),
                None => (ErrorKind::InvalidFormat, "rejected by validator".to_string()),
            };
            debug!(photo = %name, %kind, %message, "Photo failed validation");
            return PhotoOutcome::Skipped(FailedPhoto::new(name, kind, message));
        }
        if let Some(warning) = &report.warning {
            warn!(photo = %name, "{warning}");
        }

        match tokio::time::timeout(timeout, self.scorer.analyze(path, prompt, timeout)).await {
            Ok(Ok(evaluation)) => {
                debug!(photo = %name, score = evaluation.summary.weighted_average, "Photo scored");
                PhotoOutcome::Scored(name, evaluation)
            }
            Err(_) => {
                debug!(photo = %name, timeout_secs = timeout.as_secs(), "Scorer timed out");
                let message = format!("no response within {}s", timeout.as_secs());
                PhotoOutcome::Skipped(FailedPhoto::new(name, ErrorKind::Timeout, message))
            }
            Ok(Err(e)) => {
                let classification = classify_scorer_error(&e);
                if classification.kind.is_fatal() {
                    return PhotoOutcome::BackendDown { photo: name, message: classification.message };
                }
                debug!(photo = %name, kind = %classification.kind, error = %classification.message, "Scorer failed");
                PhotoOutcome::Skipped(FailedPhoto::new(name, classification.kind, classification.message))
            }
        }
    }
}
