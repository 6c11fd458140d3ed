use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RecommendationError;
use crate::models::ItemType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Click,
    Bookmark,
    Register,
    Rate,
    Complete,
    Skip,
}

impl InteractionType {
    pub const ALL: [InteractionType; 7] = [
        InteractionType::View,
        InteractionType::Click,
        InteractionType::Bookmark,
        InteractionType::Register,
        InteractionType::Rate,
        InteractionType::Complete,
        InteractionType::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "view",
            InteractionType::Click => "click",
            InteractionType::Bookmark => "bookmark",
            InteractionType::Register => "register",
            InteractionType::Rate => "rate",
            InteractionType::Complete => "complete",
            InteractionType::Skip => "skip",
        }
    }

    /// Interactions that count as "liked it" for the similar-items signal.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            InteractionType::Click | InteractionType::Bookmark | InteractionType::Register
        )
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = RecommendationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        InteractionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| RecommendationError::Validation(format!("unknown interaction type '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InteractionMetadata {
    /// Star rating in 1..=5, only meaningful on `rate` interactions.
    pub rating: Option<f64>,
    pub duration_seconds: Option<u32>,
    pub source: Option<String>,
}

/// An interaction as submitted by a caller, before the log accepts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewInteraction {
    pub user_id: String,
    pub item_id: String,
    pub item_type: ItemType,
    pub interaction_type: InteractionType,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<InteractionMetadata>,
}

impl NewInteraction {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        item_type: ItemType,
        interaction_type: InteractionType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            item_type,
            interaction_type,
            timestamp: None,
            metadata: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        let metadata = self.metadata.get_or_insert_with(InteractionMetadata::default);
        metadata.rating = Some(rating);
        self
    }
}

/// An accepted, immutable interaction fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: Uuid,
    #[serde(default)]
    pub sequence: u64,
    pub user_id: String,
    pub item_id: String,
    pub item_type: ItemType,
    pub interaction_type: InteractionType,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<InteractionMetadata>,
}

impl Interaction {
    pub fn rating(&self) -> Option<f64> {
        self.metadata.as_ref().and_then(|m| m.rating)
    }
}

/// Selection criteria for reading the interaction log. Unset fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionFilter {
    pub user_id: Option<String>,
    pub item_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl InteractionFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn for_item(item_id: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            ..Default::default()
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, interaction: &Interaction) -> bool {
        self.user_id.as_deref().map_or(true, |u| u == interaction.user_id)
            && self.item_id.as_deref().map_or(true, |i| i == interaction.item_id)
            && self.since.map_or(true, |s| interaction.timestamp >= s)
    }
}
