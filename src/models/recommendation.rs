use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Item, PreferenceCategory, ScoringWeights};

/// Five bounded values in [0, 100]. `overall` is always derived from the
/// other four through a weighting profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RecommendationScore {
    pub overall: f64,
    pub relevance: f64,
    pub popularity: f64,
    pub personalization: f64,
    pub timeliness: f64,
}

impl RecommendationScore {
    pub fn new(relevance: f64, personalization: f64, popularity: f64, timeliness: f64, weights: &ScoringWeights) -> Self {
        let relevance = clamp_score(relevance);
        let personalization = clamp_score(personalization);
        let popularity = clamp_score(popularity);
        let timeliness = clamp_score(timeliness);
        Self {
            overall: weights.combine(relevance, personalization, popularity, timeliness),
            relevance,
            popularity,
            personalization,
            timeliness,
        }
    }
}

pub(crate) fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    CategoryMatch,
    SimilarInterests,
    Popular,
    TimeBased,
    SkillMatch,
    LocationBased,
    ColdStart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReason {
    #[serde(rename = "type")]
    pub reason_type: ReasonType,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item: Item,
    pub score: RecommendationScore,
    pub reasons: Vec<RecommendationReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Fresh,
    Cached,
    ColdStart,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    NoCandidates,
    NoMatchingType,
}

/// What the presentation layer receives. An empty `items` list always comes
/// with an `empty_reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationList {
    pub user_id: String,
    pub items: Vec<RecommendationItem>,
    pub source: RecommendationSource,
    pub empty_reason: Option<EmptyReason>,
    pub generated_at: DateTime<Utc>,
}

impl RecommendationList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMass {
    pub category: PreferenceCategory,
    pub mass: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationStats {
    pub total_recommendations: usize,
    pub average_score: f64,
    pub top_categories: Vec<CategoryMass>,
    pub interactions: u64,
    pub recommendations_shown: u64,
    pub interaction_rate: f64,
}
