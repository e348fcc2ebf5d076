/// Checkpoint store: durable state for one in-progress batch.
///
/// One JSON file per project directory. Writes go to a sibling temp file and
/// are renamed into place, so a crash mid-write leaves the previous checkpoint
/// intact. Reads never fail loudly: anything unreadable is treated as "no
/// checkpoint" and the batch starts over.
use crate::constants::{CHECKPOINT_FILENAME, CHECKPOINT_VERSION, MAX_CHECKPOINT_AGE_DAYS};
use crate::types::PhotoEvaluation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub parallel_setting: usize,
    pub checkpoint_interval_photos: usize,
    pub total_photos_in_batch: usize,
    pub photo_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Insertion-ordered, no duplicates.
    pub analyzed_photo_names: Vec<String>,
    /// Always `analyzed_photo_names.len()`.
    pub count: usize,
    pub failed_photo_names: BTreeSet<String>,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub scores_by_photo: BTreeMap<String, PhotoEvaluation>,
    pub last_update_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: String,
    pub config_hash: String,
    /// Frozen for the lifetime of the batch; a resumed run reuses it verbatim.
    pub criteria_prompt: String,
    pub batch_metadata: BatchMetadata,
    pub progress: Progress,
    pub results: Results,
    pub created_at: DateTime<Utc>,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub resume_count: u32,
}

/// Why a loaded checkpoint cannot be resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    VersionMismatch { found: String, expected: &'static str },
    MissingField(&'static str),
    ConfigChanged,
    Expired { age_days: i64 },
    CountMismatch { count: usize, actual: usize },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::VersionMismatch { found, expected } => {
                write!(f, "checkpoint version {found} does not match expected {expected}")
            }
            InvalidReason::MissingField(field) => write!(f, "checkpoint is missing required field {field}"),
            InvalidReason::ConfigChanged => {
                write!(f, "config changed since the checkpoint was created")
            }
            InvalidReason::Expired { age_days } => write!(
                f,
                "checkpoint is {age_days} days old (limit {MAX_CHECKPOINT_AGE_DAYS} days)"
            ),
            InvalidReason::CountMismatch { count, actual } => write!(
                f,
                "progress count {count} does not match {actual} analyzed photo names"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<InvalidReason>,
}

impl Validation {
    fn ok() -> Self {
        Validation { valid: true, reason: None }
    }

    fn invalid(reason: InvalidReason) -> Self {
        Validation { valid: false, reason: Some(reason) }
    }
}

pub fn checkpoint_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CHECKPOINT_FILENAME)
}

/// SHA-256 over a canonical rendering of `config` with object keys sorted at
/// every level, so two configs that differ only in key order hash the same.
pub fn compute_config_hash(config: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(config, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Build a fresh checkpoint for a batch that has not started yet.
pub fn initialize(config_hash: &str, criteria_prompt: &str, metadata: BatchMetadata) -> Checkpoint {
    let now = Utc::now();
    Checkpoint {
        version: CHECKPOINT_VERSION.to_string(),
        config_hash: config_hash.to_string(),
        criteria_prompt: criteria_prompt.to_string(),
        batch_metadata: metadata,
        progress: Progress {
            analyzed_photo_names: Vec::new(),
            count: 0,
            failed_photo_names: BTreeSet::new(),
            status: BatchStatus::InProgress,
        },
        results: Results {
            scores_by_photo: BTreeMap::new(),
            last_update_timestamp: now,
        },
        created_at: now,
        last_resumed_at: None,
        resume_count: 0,
    }
}

/// Load the checkpoint for `project_dir`. `None` when there is none or it
/// cannot be read or parsed; never an error.
pub fn load(project_dir: &Path) -> Option<Checkpoint> {
    let path = checkpoint_path(project_dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No checkpoint found");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read checkpoint, ignoring it");
            return None;
        }
    };

    let raw: Value = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Checkpoint is not valid JSON, ignoring it");
            return None;
        }
    };

    match migrate(raw) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Checkpoint does not match the schema, ignoring it");
            None
        }
    }
}

/// Bring an older on-disk schema up to the current one, then deserialize.
/// Unknown versions are deserialized as-is and rejected later by `validate`.
pub fn migrate(mut raw: Value) -> Result<Checkpoint, serde_json::Error> {
    let version = raw.get("version").and_then(Value::as_str).map(str::to_owned);
    if version.as_deref() == Some("1.0") {
        migrate_v1_0(&mut raw);
        info!("Migrated checkpoint from schema 1.0 to {CHECKPOINT_VERSION}");
    }
    serde_json::from_value(raw)
}

/// 1.0 did not track failures or resumes.
fn migrate_v1_0(raw: &mut Value) {
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("version".into(), Value::String("1.1".into()));
        obj.entry("lastResumedAt").or_insert(Value::Null);
        obj.entry("resumeCount").or_insert(Value::from(0));
        if let Some(progress) = obj.get_mut("progress").and_then(Value::as_object_mut) {
            progress.entry("failedPhotoNames").or_insert(Value::Array(Vec::new()));
        }
    }
}

/// Atomically persist `checkpoint`. Returns `false` (and logs) on failure;
/// the caller's batch keeps running either way.
pub fn save(checkpoint: &Checkpoint, project_dir: &Path) -> bool {
    let path = checkpoint_path(project_dir);
    let tmp_path = project_dir.join(format!("{CHECKPOINT_FILENAME}.tmp-{}", std::process::id()));

    match write_atomically(checkpoint, &tmp_path, &path) {
        Ok(()) => {
            debug!(
                path = %path.display(),
                analyzed = checkpoint.progress.count,
                failed = checkpoint.progress.failed_photo_names.len(),
                "Checkpoint saved"
            );
            true
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            warn!(path = %path.display(), error = %e, "Failed to save checkpoint, continuing without it");
            false
        }
    }
}

fn write_atomically(checkpoint: &Checkpoint, tmp_path: &Path, path: &Path) -> io::Result<()> {
    let data = serde_json::to_vec_pretty(checkpoint).map_err(io::Error::other)?;
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(&data)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)
}

/// Check whether `checkpoint` may be resumed under `current_config`.
pub fn validate(checkpoint: &Checkpoint, current_config: &Value) -> Validation {
    validate_at(checkpoint, current_config, Utc::now())
}

pub fn validate_at(checkpoint: &Checkpoint, current_config: &Value, now: DateTime<Utc>) -> Validation {
    if checkpoint.version != CHECKPOINT_VERSION {
        return Validation::invalid(InvalidReason::VersionMismatch {
            found: checkpoint.version.clone(),
            expected: CHECKPOINT_VERSION,
        });
    }

    let required = [
        ("configHash", checkpoint.config_hash.is_empty()),
        ("criteriaPrompt", checkpoint.criteria_prompt.trim().is_empty()),
        ("batchMetadata.photoDirectory", checkpoint.batch_metadata.photo_directory.as_os_str().is_empty()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
        return Validation::invalid(InvalidReason::MissingField(*field));
    }

    if checkpoint.config_hash != compute_config_hash(current_config) {
        return Validation::invalid(InvalidReason::ConfigChanged);
    }

    let age_days = (now - checkpoint.created_at).num_days();
    if now - checkpoint.created_at > chrono::Duration::days(MAX_CHECKPOINT_AGE_DAYS) {
        return Validation::invalid(InvalidReason::Expired { age_days });
    }

    let actual = checkpoint.progress.analyzed_photo_names.len();
    if checkpoint.progress.count != actual {
        return Validation::invalid(InvalidReason::CountMismatch {
            count: checkpoint.progress.count,
            actual,
        });
    }

    Validation::ok()
}

/// Fold the photos resolved since the last save point into the checkpoint.
///
/// Analyzed and failed names are appended, never replaced. A photo that
/// succeeds after failing in an earlier run leaves the failed set. Empty
/// deltas leave `count` and the score map untouched.
pub fn update(
    checkpoint: &mut Checkpoint,
    new_photo_names: &[String],
    new_scores: BTreeMap<String, PhotoEvaluation>,
    failed_photo_names: &[String],
) {
    let progress = &mut checkpoint.progress;
    let mut seen: HashSet<String> = progress.analyzed_photo_names.iter().cloned().collect();
    for name in new_photo_names {
        if seen.insert(name.clone()) {
            progress.analyzed_photo_names.push(name.clone());
        }
        progress.failed_photo_names.remove(name);
    }
    for name in failed_photo_names {
        if !seen.contains(name) {
            progress.failed_photo_names.insert(name.clone());
        }
    }
    progress.count = progress.analyzed_photo_names.len();

    checkpoint.results.scores_by_photo.extend(new_scores);
    checkpoint.results.last_update_timestamp = Utc::now();
    checkpoint.resume_count += 1;
}

/// Drop analyzed names (and their scores) whose files are gone. Returns the
/// dropped names.
pub fn retain_present(checkpoint: &mut Checkpoint, present: &HashSet<String>) -> Vec<String> {
    let mut dropped = Vec::new();
    checkpoint.progress.analyzed_photo_names.retain(|name| {
        let keep = present.contains(name);
        if !keep {
            dropped.push(name.clone());
        }
        keep
    });
    for name in &dropped {
        checkpoint.results.scores_by_photo.remove(name);
    }
    checkpoint.progress.failed_photo_names.retain(|name| present.contains(name));
    checkpoint.progress.count = checkpoint.progress.analyzed_photo_names.len();
    dropped
}

/// Stamp a resume: back to in-progress, `lastResumedAt = now`.
pub fn mark_resumed(checkpoint: &mut Checkpoint) {
    checkpoint.progress.status = BatchStatus::InProgress;
    checkpoint.last_resumed_at = Some(Utc::now());
}

/// Remove the checkpoint file. Already gone counts as success.
pub fn delete(project_dir: &Path) -> bool {
    let path = checkpoint_path(project_dir);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "Checkpoint deleted");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete checkpoint");
            false
        }
    }
}
