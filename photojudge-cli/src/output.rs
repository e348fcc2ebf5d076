/// Output formatting: terminal tables, JSON and the results file.
use photojudge_core::tiering::TierSummary;
use photojudge_core::{
    BatchOutcome, FailedPhoto, PhotoScoreRecord, RankingEntry, SetComparison, SetRanking, Tier, Winner,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bail;

pub const RESULTS_FILENAME: &str = "results.json";

/// Everything `analyze` produces. Also the input of `sets`.
#[derive(Serialize)]
pub struct AnalysisResults<'a> {
    pub competition: &'a str,
    pub photo_dir: &'a Path,
    pub total_photos: usize,
    pub summary: &'a TierSummary,
    pub ranking: &'a [RankingEntry],
    pub photos: &'a [PhotoScoreRecord],
    pub failed: &'a [FailedPhoto],
}

/// The part of results.json that `sets` reads back.
#[derive(Deserialize)]
pub struct StoredResults {
    pub competition: String,
    pub photo_dir: PathBuf,
    pub photos: Vec<PhotoScoreRecord>,
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Tier1 => "1",
        Tier::Tier2 => "2",
        Tier::Tier3 => "3",
    }
}

/// Print the ranking as a formatted terminal table.
pub fn print_table(ranking: &[RankingEntry], summary: &TierSummary, outcome: &BatchOutcome) {
    let name_width = ranking.iter().map(|r| r.photo.len()).max().unwrap_or(5).max(5); // at least "Photo"

    println!("  # | {:<name_width$} | Score | Tier", "Photo");
    println!("----|-{}-|-------|-----", "-".repeat(name_width));
    for r in ranking {
        println!("{:>3} | {:<name_width$} | {:>5.2} | {:>4}", r.rank, r.photo, r.overall_score, tier_label(r.tier));
    }

    let s = &summary.statistics;
    println!(
        "\n{} photos ranked: tier 1 = {}, tier 2 = {}, tier 3 = {} (thresholds {:.2} / {:.2})",
        ranking.len(),
        summary.tier1_count,
        summary.tier2_count,
        summary.tier3_count,
        summary.thresholds.high,
        summary.thresholds.medium,
    );
    println!(
        "Scores: mean {:.2}, median {:.2}, std dev {:.2}, range {:.2}-{:.2}, quartiles {:.2} / {:.2}",
        s.mean, s.median, s.std_dev, s.min, s.max, s.q1, s.q3,
    );
    if summary.dropped_invalid > 0 {
        println!("{} photo(s) had no usable score and were left out of the tiers", summary.dropped_invalid);
    }
    if outcome.resumed > 0 {
        println!("Resumed {} photo(s) from a checkpoint, scored {} this run", outcome.resumed, outcome.processed_this_run);
    }
    print_failed(&outcome.failed);
}

/// Print the failed-items report. Silent when nothing failed.
pub fn print_failed(failed: &[FailedPhoto]) {
    if failed.is_empty() {
        return;
    }
    println!("\n{} photo(s) skipped:", failed.len());
    for f in failed {
        println!("  {} - {}: {}", f.filename, f.reason, f.message);
        println!("      fix: {}", f.remedy);
    }
}

pub fn print_json(results: &AnalysisResults) {
    match serde_json::to_string_pretty(results) {
        Ok(json) => println!("{json}"),
        Err(e) => bail(format!("Failed to serialize results: {e}")),
    }
}

pub fn write_results(path: &Path, results: &AnalysisResults) {
    let json = serde_json::to_string_pretty(results).unwrap_or_else(|e| bail(format!("Failed to serialize results: {e}")));
    std::fs::write(path, json + "\n").unwrap_or_else(|e| bail(format!("Failed to write {}: {e}", path.display())));
}

pub fn load_results(path: &Path) -> StoredResults {
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
        bail(format!("Failed to read {}: {e}\nRun `photojudge analyze` first.", path.display()))
    });
    serde_json::from_str(&content).unwrap_or_else(|e| bail(format!("Failed to parse {}: {e}", path.display())))
}

/// Print evaluated sets, best first.
pub fn print_set_ranking(ranking: &SetRanking) {
    for ranked in &ranking.ranking {
        let r = &ranked.result;
        println!(
            "#{} {} composite {:.2} (individual {:.2}, set {:.2})",
            ranked.rank, r.set_id, r.score.composite, r.score.individual_mean, r.score.set_score,
        );
        println!("    {}", r.photos.join(", "));
        if let Some(analysis) = &r.evaluation.analysis {
            println!("    {analysis}");
        }
    }
    let s = &ranking.statistics;
    println!(
        "\n{} sets evaluated: mean {:.2}, median {:.2}, range {:.2}-{:.2}",
        s.count, s.mean, s.median, s.min, s.max,
    );
}

pub fn print_comparison(comparison: &SetComparison, first: &str, second: &str) {
    let verdict = match comparison.winner {
        Winner::First => format!("{first} beats {second}"),
        Winner::Second => format!("{second} beats {first}"),
        Winner::Tie => format!("{first} and {second} tie"),
    };
    println!("\n{verdict} by {:.2}", comparison.score_delta.abs());
    for (criterion, diff) in &comparison.per_criterion_diffs {
        println!("  {criterion:<16} {diff:+.2}");
    }
}

pub fn print_sets_json(ranking: &SetRanking, comparison: Option<&SetComparison>) {
    let output = serde_json::json!({ "sets": ranking, "comparison": comparison });
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => bail(format!("Failed to serialize set results: {e}")),
    }
}
