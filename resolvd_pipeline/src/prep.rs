//! Triage stages: urgency scoring, keyword extraction, and category
//! classification.
//!
//! These run before retrieval and are deterministic and cheap — the
//! heuristics only shape the retrieval request (keywords, category hint),
//! they never decide the ticket's fate.

use std::collections::HashMap;

use resolvd_retrieval::query_terms;

use crate::ticket::Ticket;

/// Tokens too generic to be useful retrieval keywords.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "has", "have", "this", "that", "with", "from", "they", "been", "were", "when",
    "will", "would", "there", "their", "what", "about", "which", "into", "after", "before",
    "because", "please", "help", "hello", "thanks", "does", "doesn", "cannot", "still", "just",
    "getting", "trying",
];

/// Configuration for the triage stages.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Maximum keywords extracted per ticket.
    pub max_keywords: usize,
    /// Terms marking a ticket as urgent.
    pub urgency_keywords: Vec<String>,
    /// Category name → trigger keywords.
    pub categories: HashMap<String, Vec<String>>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        let pipeline = resolvd_config::PipelineConfig::default();
        Self {
            max_keywords: pipeline.max_keywords,
            urgency_keywords: pipeline.urgency_keywords,
            categories: pipeline.categories,
        }
    }
}

impl From<&resolvd_config::PipelineConfig> for TriageConfig {
    fn from(pipeline: &resolvd_config::PipelineConfig) -> Self {
        Self {
            max_keywords: pipeline.max_keywords,
            urgency_keywords: pipeline.urgency_keywords.clone(),
            categories: pipeline.categories.clone(),
        }
    }
}

/// Urgency score in `[0, 1]`: each configured urgency term contributes
/// fully when it appears in the subject, half when only in the
/// description.
pub fn score_urgency(ticket: &Ticket, config: &TriageConfig) -> f32 {
    if config.urgency_keywords.is_empty() {
        return 0.0;
    }
    let subject = ticket.subject.to_lowercase();
    let description = ticket.description.to_lowercase();
    let mut score = 0.0;
    for term in &config.urgency_keywords {
        let term = term.to_lowercase();
        if subject.contains(&term) {
            score += 1.0;
        } else if description.contains(&term) {
            score += 0.5;
        }
    }
    (score / config.urgency_keywords.len() as f32).clamp(0.0, 1.0)
}

/// Extract retrieval keywords from a ticket: significant terms of subject
/// and description, stopword-filtered, capped at `max_keywords`.
pub fn extract_keywords(ticket: &Ticket, config: &TriageConfig) -> Vec<String> {
    query_terms(&ticket.full_text())
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .take(config.max_keywords)
        .collect()
}

/// Pick the category whose trigger keywords overlap the ticket's keywords
/// the most. `None` when nothing matches. Ties resolve alphabetically so
/// classification is deterministic.
pub fn classify(keywords: &[String], config: &TriageConfig) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    let mut names: Vec<&String> = config.categories.keys().collect();
    names.sort();
    for name in names {
        let triggers = &config.categories[name];
        let hits = triggers
            .iter()
            .filter(|t| {
                let t = t.to_lowercase();
                keywords.iter().any(|k| *k == t)
            })
            .count();
        if hits > 0 && best.map(|(h, _)| hits > h).unwrap_or(true) {
            best = Some((hits, name));
        }
    }
    best.map(|(_, name)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(subject: &str, description: &str) -> Ticket {
        Ticket {
            id: "t-1".into(),
            subject: subject.into(),
            description: description.into(),
        }
    }

    fn config_with_categories() -> TriageConfig {
        let mut categories = HashMap::new();
        categories.insert(
            "billing".to_string(),
            vec!["invoice".to_string(), "refund".to_string()],
        );
        categories.insert(
            "networking".to_string(),
            vec!["vpn".to_string(), "timeout".to_string()],
        );
        TriageConfig {
            categories,
            ..TriageConfig::default()
        }
    }

    #[test]
    fn urgency_weighs_subject_over_description() {
        let config = TriageConfig::default();
        let in_subject = score_urgency(&ticket("URGENT: login broken", "no details"), &config);
        let in_body = score_urgency(&ticket("login broken", "this is urgent"), &config);
        assert!(in_subject > in_body);
        assert!(in_body > 0.0);
    }

    #[test]
    fn urgency_is_zero_without_matches() {
        let config = TriageConfig::default();
        assert_eq!(
            score_urgency(&ticket("question", "how do I export data"), &config),
            0.0
        );
    }

    #[test]
    fn keywords_are_stopword_filtered_and_capped() {
        let config = TriageConfig {
            max_keywords: 3,
            ..TriageConfig::default()
        };
        let kw = extract_keywords(
            &ticket("Cannot reset password", "I have been trying to reset my password"),
            &config,
        );
        assert!(kw.len() <= 3);
        assert!(kw.contains(&"reset".to_string()));
        assert!(!kw.contains(&"have".to_string()));
    }

    #[test]
    fn classification_picks_best_overlap() {
        let config = config_with_categories();
        let keywords = vec!["refund".to_string(), "invoice".to_string(), "vpn".to_string()];
        assert_eq!(classify(&keywords, &config), Some("billing".to_string()));
    }

    #[test]
    fn classification_is_none_without_overlap() {
        let config = config_with_categories();
        let keywords = vec!["printer".to_string()];
        assert_eq!(classify(&keywords, &config), None);
    }

    #[test]
    fn classification_ties_resolve_alphabetically() {
        let config = config_with_categories();
        let keywords = vec!["invoice".to_string(), "vpn".to_string()];
        assert_eq!(classify(&keywords, &config), Some("billing".to_string()));
    }
}
