/// Prompt building for photo and set evaluation.
///
/// Both prompts ask for a single JSON object so `parse.rs` can pull scores
/// out of whatever prose the model wraps around it.
use photojudge_core::{CompetitionConfig, Criterion};

fn criteria_block(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .map(|c| {
            if c.description.is_empty() {
                format!("- {} ({}%)", c.name, c.weight)
            } else {
                format!("- {} ({}%): {}", c.name, c.weight, c.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn json_shape(criteria: &[Criterion]) -> String {
    let fields = criteria
        .iter()
        .map(|c| format!("\"{}\": <1-10>", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{\"scores\": {{{fields}}}, \"analysis\": \"<2-4 sentences>\"}}")
}

/// Build the per-photo prompt. Frozen into the checkpoint when a batch
/// starts, so a resumed batch judges with exactly the same wording.
pub fn build_criteria_prompt(competition: &CompetitionConfig) -> String {
    let theme = competition
        .theme
        .as_deref()
        .map(|t| format!("The theme is \"{t}\".\n"))
        .unwrap_or_default();
    format!(
        "You are a judge for the photography competition \"{name}\".\n\
         {theme}\n\
         Score the attached photo on each criterion from 1 (poor) to 10 (exceptional). \
         Decimals are allowed.\n\n\
         Criteria (weight):\n{criteria}\n\n\
         Reply with only this JSON object:\n{shape}\n",
        name = competition.name,
        criteria = criteria_block(&competition.criteria),
        shape = json_shape(&competition.criteria),
    )
}

/// Build the prompt for judging `set_size` photos as one exhibition set.
pub fn build_set_prompt(competition: &CompetitionConfig, set_criteria: &[Criterion], set_size: usize) -> String {
    format!(
        "You are curating an exhibition set of {set_size} photos for \"{name}\". \
         The {set_size} attached photos are one candidate set, in display order.\n\n\
         Judge the set as a whole, not the individual photos. \
         Score each criterion from 1 (poor) to 10 (exceptional).\n\n\
         Criteria (weight):\n{criteria}\n\n\
         Reply with only this JSON object:\n{shape}\n",
        name = competition.name,
        criteria = criteria_block(set_criteria),
        shape = json_shape(set_criteria),
    )
}

/// Set criteria used when the competition does not define any.
pub fn default_set_criteria() -> Vec<Criterion> {
    vec![
        Criterion {
            name: "cohesion".to_string(),
            weight: 50.0,
            description: "Do the photos read as one body of work?".to_string(),
        },
        Criterion {
            name: "variety".to_string(),
            weight: 25.0,
            description: "Do they avoid repeating the same subject or framing?".to_string(),
        },
        Criterion {
            name: "sequencing".to_string(),
            weight: 25.0,
            description: "Does the order build and resolve?".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn competition() -> CompetitionConfig {
        CompetitionConfig {
            name: "Harbour Lights".to_string(),
            theme: Some("Night".to_string()),
            criteria: vec![
                Criterion { name: "impact".to_string(), weight: 60.0, description: "first look".to_string() },
                Criterion { name: "technique".to_string(), weight: 40.0, description: String::new() },
            ],
            set_mode: None,
        }
    }

    #[test]
    fn test_criteria_prompt_contains_all_parts() {
        let prompt = build_criteria_prompt(&competition());
        assert!(prompt.contains("\"Harbour Lights\""));
        assert!(prompt.contains("The theme is \"Night\""));
        assert!(prompt.contains("- impact (60%): first look"));
        assert!(prompt.contains("- technique (40%)"));
        assert!(prompt.contains("{\"scores\": {\"impact\": <1-10>, \"technique\": <1-10>}"));
    }

    #[test]
    fn test_criteria_prompt_is_stable() {
        assert_eq!(build_criteria_prompt(&competition()), build_criteria_prompt(&competition()));
    }

    #[test]
    fn test_set_prompt() {
        let prompt = build_set_prompt(&competition(), &default_set_criteria(), 4);
        assert!(prompt.contains("exhibition set of 4 photos"));
        assert!(prompt.contains("- cohesion (50%)"));
        assert!(prompt.contains("\"sequencing\": <1-10>"));
    }
}
