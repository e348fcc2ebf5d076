use async_trait::async_trait;
use photojudge_core::checkpoint::{self, BatchStatus, InvalidReason};
use photojudge_core::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PROMPT: &str = "Score impact and composition from 1 to 10.";

#[derive(Clone, Copy)]
enum Behavior {
    Unreachable,
    Hang,
    Garbage,
}

/// Scores every photo by its index, except the ones it is told to break on.
#[derive(Default)]
struct ScriptedScorer {
    script: BTreeMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedScorer {
    fn healthy() -> Arc<Self> {
        Arc::new(ScriptedScorer::default())
    }

    fn with(script: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(ScriptedScorer {
            script: script.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scorer for ScriptedScorer {
    async fn analyze(&self, photo: &Path, _prompt: &str, _timeout: Duration) -> Result<PhotoEvaluation, ScorerError> {
        let name = photo_name(photo);
        self.calls.lock().unwrap().push(name.clone());
        match self.script.get(&name) {
            Some(Behavior::Unreachable) => return Err(ScorerError::Unreachable("connection refused".into())),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            Some(Behavior::Garbage) => return Err(ScorerError::failed("model returned malformed JSON")),
            None => {}
        }
        let index: f64 = name.trim_start_matches("photo_").trim_end_matches(".jpg").parse().unwrap_or(0.0);
        Ok(evaluation(4.0 + (index % 6.0)))
    }
}

fn evaluation(score: f64) -> PhotoEvaluation {
    let mut individual = BTreeMap::new();
    individual.insert("impact".to_string(), CriterionScore { score, weight: 100.0 });
    PhotoEvaluation {
        individual,
        summary: ScoreSummary { weighted_average: score },
        analysis: None,
    }
}

/// Takes a second per photo and records the most calls seen at once.
#[derive(Default)]
struct SlowScorer {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Scorer for SlowScorer {
    async fn analyze(&self, _photo: &Path, _prompt: &str, _timeout: Duration) -> Result<PhotoEvaluation, ScorerError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(evaluation(7.0))
    }
}

/// Creates `dir` while scoring `trigger`, then defers to `inner`.
struct CreatesDirScorer {
    dir: PathBuf,
    trigger: &'static str,
    inner: Arc<ScriptedScorer>,
}

#[async_trait]
impl Scorer for CreatesDirScorer {
    async fn analyze(&self, photo: &Path, prompt: &str, timeout: Duration) -> Result<PhotoEvaluation, ScorerError> {
        if photo_name(photo) == self.trigger {
            fs::create_dir_all(&self.dir).unwrap();
        }
        self.inner.analyze(photo, prompt, timeout).await
    }
}

/// Accepts everything except the named files.
struct RejectNamed(HashSet<String>);

#[async_trait]
impl PhotoValidator for RejectNamed {
    async fn validate(&self, photo: &Path) -> ValidationReport {
        if self.0.contains(&photo_name(photo)) {
            ValidationReport::rejected(ErrorKind::InvalidFormat, "unsupported format image/heif")
        } else {
            ValidationReport::ok(PhotoMetadata { mime_type: "image/jpeg".into(), size_bytes: 1 })
        }
    }
}

fn accept_all() -> Arc<RejectNamed> {
    Arc::new(RejectNamed(HashSet::new()))
}

struct Project {
    _dir: TempDir,
    root: PathBuf,
    photos: PathBuf,
}

fn project(photo_count: usize) -> Project {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let photos = root.join("photos");
    fs::create_dir(&photos).unwrap();
    for i in 1..=photo_count {
        fs::write(photos.join(format!("photo_{i:02}.jpg")), b"jpeg").unwrap();
    }
    Project { _dir: dir, root, photos }
}

fn competition() -> CompetitionConfig {
    CompetitionConfig {
        name: "Autumn open".into(),
        theme: None,
        criteria: vec![
            Criterion { name: "impact".into(), weight: 60.0, description: "first impression".into() },
            Criterion { name: "composition".into(), weight: 40.0, description: String::new() },
        ],
        set_mode: None,
    }
}

fn driver(scorer: Arc<dyn Scorer>, validator: Arc<dyn PhotoValidator>, slots: usize) -> BatchDriver {
    let controller = ConcurrencyController::new(ControllerConfig {
        initial_slots: slots,
        max_slots: slots,
        auto_scale: false,
        ..ControllerConfig::default()
    });
    BatchDriver::new(scorer, validator, controller)
}

fn options(p: &Project, interval: usize) -> BatchOptions {
    let mut options = BatchOptions::new(&p.root, &p.photos);
    options.checkpoint_interval = interval;
    options
}

fn names(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("photo_{i:02}.jpg")).collect()
}

#[tokio::test]
async fn test_resume_after_interruption() {
    let p = project(20);
    let broken = ScriptedScorer::with(&[("photo_13.jpg", Behavior::Unreachable)]);

    let err = driver(broken.clone(), accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 5))
        .await
        .unwrap_err();
    match &err {
        BatchError::BackendUnreachable { processed, remaining, checkpoint_saved, photo, .. } => {
            assert_eq!(*processed, 12);
            assert_eq!(*remaining, 8);
            assert!(*checkpoint_saved);
            assert_eq!(photo, "photo_13.jpg");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(broken.calls(), names(1..=13));

    let saved = checkpoint::load(&p.root).unwrap();
    assert_eq!(saved.progress.count, 12);
    assert_eq!(saved.progress.status, BatchStatus::Abandoned);

    let healthy = ScriptedScorer::healthy();
    let outcome = driver(healthy.clone(), accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 5))
        .await
        .unwrap();

    assert_eq!(healthy.calls(), names(13..=20));
    assert_eq!(outcome.resumed, 12);
    assert_eq!(outcome.processed_this_run, 8);
    assert_eq!(outcome.scores.len(), 20);
    assert!(outcome.failed.is_empty());
    assert!(outcome.is_reconciled());
    assert!(!checkpoint::checkpoint_path(&p.root).exists());

    let report = generate_tiers(&outcome.scores, None);
    assert_eq!(report.tier1.len() + report.tier2.len() + report.tier3.len(), 20);
}

#[tokio::test]
async fn test_config_change_restarts_from_scratch() {
    let p = project(6);
    let broken = ScriptedScorer::with(&[("photo_04.jpg", Behavior::Unreachable)]);
    let _ = driver(broken, accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 1))
        .await
        .unwrap_err();
    assert_eq!(checkpoint::load(&p.root).unwrap().progress.count, 3);

    let mut changed = competition();
    changed.criteria[0].weight = 70.0;
    changed.criteria[1].weight = 30.0;

    let validation = checkpoint::validate(&checkpoint::load(&p.root).unwrap(), &changed.to_json());
    assert!(!validation.valid);
    assert_eq!(validation.reason, Some(InvalidReason::ConfigChanged));

    let healthy = ScriptedScorer::healthy();
    let outcome = driver(healthy.clone(), accept_all(), 2)
        .run(&changed, PROMPT, options(&p, 1))
        .await
        .unwrap();
    assert_eq!(outcome.resumed, 0);
    assert_eq!(outcome.processed_this_run, 6);
    assert_eq!(healthy.calls().len(), 6);
}

#[tokio::test]
async fn test_backend_outage_halts_and_saves() {
    let p = project(10);
    let broken = ScriptedScorer::with(&[("photo_06.jpg", Behavior::Unreachable)]);

    let err = driver(broken.clone(), accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 10))
        .await
        .unwrap_err();

    assert!(err.is_resumable());
    assert_eq!(broken.calls(), names(1..=6), "photo 7 must never be sent");

    let saved = checkpoint::load(&p.root).unwrap();
    assert_eq!(saved.progress.analyzed_photo_names, names(1..=5));
    assert_eq!(saved.results.scores_by_photo.len(), 5);
    assert!(saved.progress.failed_photo_names.is_empty());
}

#[tokio::test]
async fn test_no_photos_is_an_error_without_checkpoint() {
    let p = project(0);
    fs::write(p.photos.join("readme.txt"), b"not a photo").unwrap();

    let err = driver(ScriptedScorer::healthy(), accept_all(), 3)
        .run(&competition(), PROMPT, options(&p, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::NoPhotos(_)));
    assert!(!checkpoint::checkpoint_path(&p.root).exists());
}

#[tokio::test(start_paused = true)]
async fn test_per_photo_failures_are_reported() {
    let p = project(6);
    let scorer = ScriptedScorer::with(&[("photo_03.jpg", Behavior::Hang), ("photo_04.jpg", Behavior::Garbage)]);
    let validator = Arc::new(RejectNamed(["photo_02.jpg".to_string()].into_iter().collect()));

    let mut opts = options(&p, 2);
    opts.timeout = Duration::from_secs(30);
    let outcome = driver(scorer.clone(), validator, 3)
        .run(&competition(), PROMPT, opts)
        .await
        .unwrap();

    assert_eq!(outcome.scores.len(), 3);
    assert!(outcome.is_reconciled());
    assert!(!scorer.calls().contains(&"photo_02.jpg".to_string()), "invalid photos never reach the scorer");

    let failed: Vec<(&str, ErrorKind, &str)> =
        outcome.failed.iter().map(|f| (f.filename.as_str(), f.kind, f.reason)).collect();
    assert_eq!(
        failed,
        vec![
            ("photo_02.jpg", ErrorKind::InvalidFormat, "invalid format"),
            ("photo_03.jpg", ErrorKind::Timeout, "timeout"),
            ("photo_04.jpg", ErrorKind::Unknown, "unknown error"),
        ]
    );
    assert!(outcome.failed.iter().all(|f| !f.remedy.is_empty()));
    assert!(!checkpoint::checkpoint_path(&p.root).exists());
}

#[tokio::test]
async fn test_failed_photos_retried_on_resume() {
    let p = project(6);
    let broken = ScriptedScorer::with(&[("photo_02.jpg", Behavior::Garbage), ("photo_05.jpg", Behavior::Unreachable)]);
    let _ = driver(broken, accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 2))
        .await
        .unwrap_err();

    let saved = checkpoint::load(&p.root).unwrap();
    assert_eq!(saved.progress.analyzed_photo_names, vec!["photo_01.jpg", "photo_03.jpg", "photo_04.jpg"]);
    assert!(saved.progress.failed_photo_names.contains("photo_02.jpg"));

    let healthy = ScriptedScorer::healthy();
    let outcome = driver(healthy.clone(), accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 2))
        .await
        .unwrap();
    assert_eq!(healthy.calls(), vec!["photo_02.jpg", "photo_05.jpg", "photo_06.jpg"]);
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.scores.len(), 6);
}

#[tokio::test]
async fn test_missing_files_dropped_on_resume() {
    let p = project(6);
    let broken = ScriptedScorer::with(&[("photo_05.jpg", Behavior::Unreachable)]);
    let _ = driver(broken, accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 2))
        .await
        .unwrap_err();

    fs::remove_file(p.photos.join("photo_01.jpg")).unwrap();
    fs::write(p.photos.join("photo_07.jpg"), b"jpeg").unwrap();

    let healthy = ScriptedScorer::healthy();
    let outcome = driver(healthy.clone(), accept_all(), 2)
        .run(&competition(), PROMPT, options(&p, 2))
        .await
        .unwrap();

    assert_eq!(outcome.pruned_missing, vec!["photo_01.jpg"]);
    assert_eq!(outcome.resumed, 3);
    assert_eq!(outcome.total_photos, 6);
    assert!(outcome.is_reconciled());
    let mut calls = healthy.calls();
    calls.sort();
    assert_eq!(calls, vec!["photo_05.jpg", "photo_06.jpg", "photo_07.jpg"]);
}

#[tokio::test]
async fn test_fresh_discards_checkpoint() {
    let p = project(4);
    let broken = ScriptedScorer::with(&[("photo_03.jpg", Behavior::Unreachable)]);
    let _ = driver(broken, accept_all(), 1)
        .run(&competition(), PROMPT, options(&p, 1))
        .await
        .unwrap_err();

    let healthy = ScriptedScorer::healthy();
    let mut opts = options(&p, 1);
    opts.fresh = true;
    let outcome = driver(healthy.clone(), accept_all(), 1)
        .run(&competition(), PROMPT, opts)
        .await
        .unwrap();
    assert_eq!(outcome.resumed, 0);
    assert_eq!(healthy.calls(), names(1..=4));
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_interval_does_not_limit_parallelism() {
    let p = project(6);
    let scorer = Arc::new(SlowScorer::default());
    let started = tokio::time::Instant::now();

    let outcome = driver(scorer.clone(), accept_all(), 3)
        .run(&competition(), PROMPT, options(&p, 1))
        .await
        .unwrap();

    assert_eq!(outcome.scores.len(), 6);
    assert_eq!(scorer.peak.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(!checkpoint::checkpoint_path(&p.root).exists());
}

#[tokio::test]
async fn test_unwritable_checkpoint_does_not_stop_batch() {
    let p = project(5);
    let missing = p.root.join("not-created");
    let mut opts = BatchOptions::new(&missing, &p.photos);
    opts.checkpoint_interval = 2;

    let outcome = driver(ScriptedScorer::healthy(), accept_all(), 2)
        .run(&competition(), PROMPT, opts)
        .await
        .unwrap();

    assert_eq!(outcome.scores.len(), 5);
    assert!(outcome.failed.is_empty());
    assert!(outcome.is_reconciled());
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_checkpoint_save_retried_at_next_save_point() {
    let p = project(5);
    let project_dir = p.root.join("late");
    let scorer = Arc::new(CreatesDirScorer {
        dir: project_dir.clone(),
        trigger: "photo_03.jpg",
        inner: ScriptedScorer::with(&[("photo_05.jpg", Behavior::Unreachable)]),
    });
    let mut opts = BatchOptions::new(&project_dir, &p.photos);
    opts.checkpoint_interval = 1;

    // Saves after photos 1 and 2 fail; the directory exists from photo 3 on.
    let err = driver(scorer, accept_all(), 1)
        .run(&competition(), PROMPT, opts)
        .await
        .unwrap_err();

    assert!(err.is_resumable());
    let saved = checkpoint::load(&project_dir).unwrap();
    assert_eq!(saved.progress.analyzed_photo_names, names(1..=4));
    assert_eq!(saved.progress.status, BatchStatus::Abandoned);
}
