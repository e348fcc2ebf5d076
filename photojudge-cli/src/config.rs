/// Config file loading and creation for the photojudge CLI.
///
/// Defaults live at ~/.config/photojudge/config.toml; every field is optional
/// and CLI flags override it. The competition itself (criteria and weights)
/// lives next to the photos, in `<project>/competition.toml`.
use photojudge_core::CompetitionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bail;

pub const COMPETITION_FILENAME: &str = "competition.toml";

#[derive(Deserialize, Default)]
pub struct PhotojudgeConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub parallel: Option<usize>,
    pub max_parallel: Option<usize>,
    pub auto_scale: Option<bool>,
    pub memory_threshold_mb: Option<f64>,
    pub checkpoint_interval: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f64>,
    pub retries: Option<usize>,
}

const DEFAULT_CONFIG_TEMPLATE: &str = "\
# photojudge configuration
# All values here can be overridden by CLI flags.

# OpenAI-compatible API endpoint serving a vision model
# endpoint = \"http://localhost:8000\"

# Model ID
# model = \"Qwen/Qwen2.5-VL-7B-Instruct\"

# API key: use OPENAI_API_KEY env var or --api-key flag (not stored in config)

# Concurrent scoring requests at start, and the ceiling for --auto-scale
# parallel = 3
# max_parallel = 6

# Adapt concurrency to observed latency and memory use
# auto_scale = false
# memory_threshold_mb = 400

# Photos per checkpoint save (1-50)
# checkpoint_interval = 10

# Per-photo timeout in seconds (30-300)
# timeout_secs = 60

# Sampling temperature
# temperature = 0.2

# Max retries per request on HTTP errors. Set to 0 to disable.
# retries = 2
";

const COMPETITION_TEMPLATE: &str = "\
name = \"My competition\"
# theme = \"Light and shadow\"

# Weights are percentages and must add up to 100.
[[criteria]]
name = \"impact\"
weight = 40
description = \"Emotional or visual punch at first sight\"

[[criteria]]
name = \"composition\"
weight = 35
description = \"Arrangement, balance, use of space\"

[[criteria]]
name = \"technique\"
weight = 25
description = \"Exposure, focus, processing\"

# Optional exhibition-set judging (photojudge sets)
# [set_mode]
# set_size = 4
# max_sets_to_evaluate = 10
# individual_weight = 40
# set_weight = 60
#
# [[set_mode.set_criteria]]
# name = \"cohesion\"
# weight = 60
# description = \"Do the photos belong together?\"
#
# [[set_mode.set_criteria]]
# name = \"variety\"
# weight = 40
# description = \"Do they avoid repeating each other?\"
";

/// Returns the default config path: ~/.config/photojudge/config.toml
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| bail("HOME environment variable not set"));
    PathBuf::from(home).join(".config").join("photojudge").join("config.toml")
}

/// Load config from a file path. Returns default (all None) if file doesn't exist.
pub fn load_config(path: &Path) -> PhotojudgeConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)
            .unwrap_or_else(|e| bail(format!("Failed to parse config at {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PhotojudgeConfig::default(),
        Err(e) => bail(format!("Failed to read config at {}: {e}", path.display())),
    }
}

/// Create the default config file. Errors if it already exists.
pub fn create_default_config() -> PathBuf {
    let path = config_path();
    write_new(&path, DEFAULT_CONFIG_TEMPLATE);
    path
}

/// Write a starter competition.toml into `project_dir`.
pub fn create_competition_template(project_dir: &Path) -> PathBuf {
    let path = project_dir.join(COMPETITION_FILENAME);
    write_new(&path, COMPETITION_TEMPLATE);
    path
}

fn write_new(path: &Path, content: &str) {
    if path.exists() {
        bail(format!("File already exists at {}", path.display()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .unwrap_or_else(|e| bail(format!("Failed to create directory {}: {e}", parent.display())));
    }
    std::fs::write(path, content).unwrap_or_else(|e| bail(format!("Failed to write {}: {e}", path.display())));
}

/// Parse and validate a competition definition.
pub fn parse_competition(content: &str) -> Result<CompetitionConfig, String> {
    let competition: CompetitionConfig = toml::from_str(content).map_err(|e| e.to_string())?;
    competition.validate().map_err(|e| e.to_string())?;
    Ok(competition)
}

pub fn load_competition(path: &Path) -> CompetitionConfig {
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
        bail(format!(
            "Failed to read competition config at {}: {e}\nRun `photojudge init --project <dir>` to create one.",
            path.display()
        ))
    });
    parse_competition(&content).unwrap_or_else(|e| bail(format!("Invalid competition config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_competition_template_is_valid() {
        let competition = parse_competition(COMPETITION_TEMPLATE).unwrap();
        assert_eq!(competition.criteria.len(), 3);
        assert!(competition.set_mode.is_none());
    }

    #[test]
    fn test_competition_with_set_mode() {
        let content = r#"
name = "Salon"

[[criteria]]
name = "impact"
weight = 100

[set_mode]
set_size = 3

[[set_mode.set_criteria]]
name = "cohesion"
weight = 100
"#;
        let competition = parse_competition(content).unwrap();
        let set_mode = competition.set_mode.unwrap();
        assert_eq!(set_mode.set_size, 3);
        assert_eq!(set_mode.individual_weight, 40.0);
        assert_eq!(set_mode.set_criteria[0].name, "cohesion");
    }

    #[test]
    fn test_bad_weights_rejected() {
        let content = "name = \"x\"\n[[criteria]]\nname = \"impact\"\nweight = 90\n";
        let err = parse_competition(content).unwrap_err();
        assert!(err.contains("sum to 100"), "{err}");
    }

    #[test]
    fn test_default_config_template_parses() {
        let cfg: PhotojudgeConfig = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert!(cfg.endpoint.is_none());
        let cfg: PhotojudgeConfig = toml::from_str("parallel = 4\nauto_scale = true\ntimeout_secs = 90").unwrap();
        assert_eq!(cfg.parallel, Some(4));
        assert_eq!(cfg.auto_scale, Some(true));
        assert_eq!(cfg.timeout_secs, Some(90));
    }
}
