/// Reply parsing: pull the JSON object out of a model reply and turn it into
/// evaluations.
///
/// Models wrap the object in prose or a ```json fence often enough that we
/// never assume the reply is bare JSON.
use photojudge_core::{CriterionScore, PhotoEvaluation, ScoreSummary, SetEvaluation};
use photojudge_core::constants::{MAX_SCORE, MIN_SCORE};
use photojudge_core::Criterion;
use serde_json::Value;
use std::collections::BTreeMap;

/// Find the JSON object in `text`: a fenced block if there is one, otherwise
/// the span from the first `{` to its matching `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Some(obj) = balanced_object(&body[..end]) {
                return Some(obj);
            }
        }
    }
    balanced_object(text)
}

/// First balanced `{...}` in `text`, skipping braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A score given either as a bare number, a numeric string, or `{"score": n}`.
fn score_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("score").and_then(score_value),
        _ => None,
    }
}

fn scores_object(reply: &Value) -> Option<&serde_json::Map<String, Value>> {
    reply
        .get("scores")
        .or_else(|| reply.get("individual"))
        .or_else(|| reply.get("criteria"))
        .and_then(Value::as_object)
}

fn analysis(reply: &Value) -> Option<String> {
    reply
        .get("analysis")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map reply scores onto `criteria`. Names match case-insensitively; weights
/// always come from `criteria`; scores are clamped into [1, 10].
fn criterion_scores(reply: &Value, criteria: &[Criterion]) -> Result<BTreeMap<String, CriterionScore>, String> {
    let scores = scores_object(reply).ok_or("reply has no \"scores\" object")?;
    let mut out = BTreeMap::new();
    for criterion in criteria {
        let value = scores
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(&criterion.name))
            .map(|(_, v)| v)
            .ok_or_else(|| format!("reply has no score for \"{}\"", criterion.name))?;
        let score = score_value(value)
            .filter(|s| s.is_finite())
            .ok_or_else(|| format!("score for \"{}\" is not a number: {value}", criterion.name))?;
        out.insert(
            criterion.name.clone(),
            CriterionScore { score: score.clamp(MIN_SCORE, MAX_SCORE), weight: criterion.weight },
        );
    }
    Ok(out)
}

fn parse_reply(text: &str) -> Result<Value, String> {
    let json = extract_json_object(text).ok_or("no JSON object in model reply")?;
    serde_json::from_str(json).map_err(|e| format!("malformed JSON in model reply: {e}"))
}

/// Parse a per-photo reply. The weighted average is always recomputed from
/// the criterion scores.
pub fn parse_photo_evaluation(text: &str, criteria: &[Criterion]) -> Result<PhotoEvaluation, String> {
    let reply = parse_reply(text)?;
    let individual = criterion_scores(&reply, criteria)?;
    let weighted_average = PhotoEvaluation::compute_weighted_average(&individual);
    Ok(PhotoEvaluation {
        individual,
        summary: ScoreSummary { weighted_average },
        analysis: analysis(&reply),
    })
}

/// Parse a set-level reply against the set criteria.
pub fn parse_set_evaluation(text: &str, set_criteria: &[Criterion]) -> Result<SetEvaluation, String> {
    let reply = parse_reply(text)?;
    Ok(SetEvaluation {
        criteria: criterion_scores(&reply, set_criteria)?,
        analysis: analysis(&reply),
    })
}
