use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RecommendationError;

/// Closed set of preference categories an item can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    Academic,
    Arts,
    Career,
    Cultural,
    Gaming,
    Health,
    Music,
    Outdoor,
    Social,
    Sports,
    Technology,
    Volunteer,
}

impl PreferenceCategory {
    pub const ALL: [PreferenceCategory; 12] = [
        PreferenceCategory::Academic,
        PreferenceCategory::Arts,
        PreferenceCategory::Career,
        PreferenceCategory::Cultural,
        PreferenceCategory::Gaming,
        PreferenceCategory::Health,
        PreferenceCategory::Music,
        PreferenceCategory::Outdoor,
        PreferenceCategory::Social,
        PreferenceCategory::Sports,
        PreferenceCategory::Technology,
        PreferenceCategory::Volunteer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceCategory::Academic => "academic",
            PreferenceCategory::Arts => "arts",
            PreferenceCategory::Career => "career",
            PreferenceCategory::Cultural => "cultural",
            PreferenceCategory::Gaming => "gaming",
            PreferenceCategory::Health => "health",
            PreferenceCategory::Music => "music",
            PreferenceCategory::Outdoor => "outdoor",
            PreferenceCategory::Social => "social",
            PreferenceCategory::Sports => "sports",
            PreferenceCategory::Technology => "technology",
            PreferenceCategory::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for PreferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceCategory {
    type Err = RecommendationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        PreferenceCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| RecommendationError::Validation(format!("unknown category '{}'", s)))
    }
}
