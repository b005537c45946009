use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Distance metric used by a vector index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity; scores are reported as-is in `[-1, 1]`.
    #[default]
    Cosine,
    /// Euclidean (L2) distance; scores are reported as `1 / (1 + distance)`.
    Euclidean,
    /// Raw dot product.
    #[serde(rename = "dotproduct")]
    DotProduct,
}

impl DistanceMetric {
    /// Name used by managed vector stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dotproduct",
        }
    }

    /// Convert an L2 distance into a similarity score where higher is closer.
    pub fn similarity_from_distance(distance: f64) -> f64 {
        1.0 / (1.0 + distance.max(0.0))
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "dotproduct" | "dot_product" | "dot" => Ok(DistanceMetric::DotProduct),
            other => Err(format!("unknown distance metric '{}'", other)),
        }
    }
}

// =============================================================================
// Agent cards
// =============================================================================

/// Organization that publishes an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProvider {
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A capability an agent exposes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// The canonical description of a registered agent.
///
/// `id` is assigned by the registry owner and keys the vector index;
/// `description` is the primary embedding source and must be non-empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<Skill>,
    /// Scheme name to scheme-specific configuration. Opaque here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_schemes: BTreeMap<String, serde_json::Value>,
    /// Index of the agent in an external on-chain registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erc8004_index: Option<u64>,
}

impl AgentCard {
    /// Check the invariants the indexer relies on.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("'id' must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err(format!("agent '{}' has an empty 'description'", self.id));
        }
        Ok(())
    }

    /// Default input modes followed by any skill-specific modes, deduplicated.
    pub fn all_input_modes(&self) -> Vec<String> {
        collect_modes(
            &self.default_input_modes,
            self.skills.iter().map(|s| &s.input_modes),
        )
    }

    /// Default output modes followed by any skill-specific modes, deduplicated.
    pub fn all_output_modes(&self) -> Vec<String> {
        collect_modes(
            &self.default_output_modes,
            self.skills.iter().map(|s| &s.output_modes),
        )
    }
}

fn collect_modes<'a>(
    defaults: &'a [String],
    per_skill: impl Iterator<Item = &'a Vec<String>>,
) -> Vec<String> {
    let mut modes: Vec<String> = Vec::new();
    for mode in defaults.iter().chain(per_skill.flatten()) {
        if !modes.contains(mode) {
            modes.push(mode.clone());
        }
    }
    modes
}

// =============================================================================
// Search
// =============================================================================

/// Query-time constraints.
///
/// `capabilities` is match-any: a result passes when it carries at least one
/// of the requested capabilities. Modes must appear verbatim in the agent's
/// default or skill modes. `min_score` is inclusive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

impl SearchFilters {
    /// True when no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
            && self.input_mode.is_none()
            && self.output_mode.is_none()
            && self.min_score.is_none()
    }

    /// Whether an agent with these capabilities and modes passes the
    /// capability and mode constraints. `min_score` is checked separately.
    pub fn matches_agent<S: AsRef<str>>(
        &self,
        capabilities: &[S],
        input_modes: &[S],
        output_modes: &[S],
    ) -> bool {
        if !self.capabilities.is_empty()
            && !capabilities
                .iter()
                .any(|c| self.capabilities.contains(c.as_ref()))
        {
            return false;
        }
        if let Some(ref mode) = self.input_mode {
            if !input_modes.iter().any(|m| m.as_ref() == mode) {
                return false;
            }
        }
        if let Some(ref mode) = self.output_mode {
            if !output_modes.iter().any(|m| m.as_ref() == mode) {
                return false;
            }
        }
        true
    }

    /// Whether `score` clears the inclusive `min_score` bound.
    pub fn accepts_score(&self, score: f64) -> bool {
        self.min_score.map_or(true, |min| score >= min)
    }
}

/// A ranked match returned from a query. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// 1-based position in the returned sequence.
    pub rank: usize,
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    pub match_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erc8004_index: Option<u64>,
}

/// Envelope returned by a search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Count of matches after filtering, before truncation to `top_k`.
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time statistics about a vector index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub vector_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<DistanceMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_card() -> AgentCard {
        AgentCard {
            id: "weather-bot".to_string(),
            name: "Weather Bot".to_string(),
            description: "Forecasts and severe weather alerts".to_string(),
            url: "https://weather.example.com/a2a".to_string(),
            capabilities: ["streaming".to_string()].into_iter().collect(),
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills: vec![Skill {
                id: "forecast".to_string(),
                name: "Forecast".to_string(),
                description: "Seven day forecast".to_string(),
                input_modes: vec!["text".to_string(), "audio".to_string()],
                output_modes: vec!["image".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_agent_card_camel_case_json() {
        let json = serde_json::json!({
            "id": "a1",
            "name": "Translator",
            "description": "Translates text",
            "url": "https://t.example.com",
            "defaultInputModes": ["text"],
            "defaultOutputModes": ["text"],
            "skills": [{
                "id": "translate",
                "name": "Translate",
                "description": "Translate between languages",
                "tags": ["i18n", "language"],
                "inputModes": ["text"]
            }],
            "securitySchemes": {"bearer": {"type": "http", "scheme": "bearer"}},
            "erc8004Index": 42
        });
        let card: AgentCard = serde_json::from_value(json).unwrap();
        assert_eq!(card.default_input_modes, vec!["text"]);
        assert_eq!(card.skills[0].tags.len(), 2);
        assert!(card.capabilities.is_empty());
        assert_eq!(card.erc8004_index, Some(42));
        assert!(card.security_schemes.contains_key("bearer"));

        let back = serde_json::to_value(&card).unwrap();
        assert_eq!(back["erc8004Index"], 42);
        assert!(back.get("version").is_none());
    }

    #[test]
    fn test_validate_rejects_empty_description() {
        let mut card = sample_card();
        card.description = "   ".to_string();
        assert!(card.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut card = sample_card();
        card.id = String::new();
        assert!(card.validate().is_err());
        assert!(sample_card().validate().is_ok());
    }

    #[test]
    fn test_all_modes_union_skill_modes() {
        let card = sample_card();
        assert_eq!(card.all_input_modes(), vec!["text", "audio"]);
        assert_eq!(card.all_output_modes(), vec!["text", "image"]);
    }

    #[test]
    fn test_filters_capabilities_match_any() {
        let filters = SearchFilters {
            capabilities: ["streaming", "push"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let text = ["text"];
        assert!(filters.matches_agent(&["push"], &text, &text));
        assert!(!filters.matches_agent(&["batch"], &text, &text));
        let none: [&str; 0] = [];
        assert!(!filters.matches_agent(&none, &text, &text));
    }

    #[test]
    fn test_filters_modes_exact() {
        let filters = SearchFilters {
            input_mode: Some("audio".to_string()),
            output_mode: Some("text".to_string()),
            ..Default::default()
        };
        let caps: [&str; 0] = [];
        assert!(filters.matches_agent(&caps, &["text", "audio"], &["text"]));
        assert!(!filters.matches_agent(&caps, &["Audio"], &["text"]));
        assert!(!filters.matches_agent(&caps, &["audio"], &["image"]));
    }

    #[test]
    fn test_min_score_inclusive() {
        let filters = SearchFilters {
            min_score: Some(0.5),
            ..Default::default()
        };
        assert!(filters.accepts_score(0.5));
        assert!(!filters.accepts_score(0.4999));
        assert!(SearchFilters::default().accepts_score(-1.0));
    }

    #[test]
    fn test_filters_default_is_empty() {
        assert!(SearchFilters::default().is_empty());
        let parsed: SearchFilters = serde_json::from_str(r#"{"minScore": 0.2}"#).unwrap();
        assert_eq!(parsed.min_score, Some(0.2));
        assert!(!parsed.is_empty());
    }

    #[test]
    fn test_distance_metric_parse_and_display() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("L2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!(DistanceMetric::DotProduct.to_string(), "dotproduct");
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_similarity_from_distance() {
        assert_eq!(DistanceMetric::similarity_from_distance(0.0), 1.0);
        assert!((DistanceMetric::similarity_from_distance(1.0) - 0.5).abs() < f64::EPSILON);
        assert_eq!(DistanceMetric::similarity_from_distance(-3.0), 1.0);
    }

    #[test]
    fn test_search_response_timestamp_is_rfc3339() {
        let ts = "2026-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();
        let response = SearchResponse {
            query: "weather".to_string(),
            results: vec![],
            total: 0,
            timestamp: ts,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["timestamp"], "2026-01-02T03:04:05Z");
        assert_eq!(json["total"], 0);
    }
}
