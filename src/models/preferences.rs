use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::PreferenceCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
            SkillLevel::Expert => "expert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    OnCampus,
    OffCampus,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupSize {
    Small,
    Medium,
    Large,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetClass {
    Free,
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Availability {
    pub mornings: bool,
    pub afternoons: bool,
    pub evenings: bool,
    pub weekdays: bool,
    pub weekends: bool,
}

impl Default for Availability {
    fn default() -> Self {
        Self {
            mornings: true,
            afternoons: true,
            evenings: true,
            weekdays: true,
            weekends: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationPreferences {
    pub on_campus: bool,
    pub off_campus: bool,
    #[serde(rename = "virtual")]
    pub virtual_: bool,
}

impl Default for LocationPreferences {
    fn default() -> Self {
        Self {
            on_campus: true,
            off_campus: false,
            virtual_: false,
        }
    }
}

impl LocationPreferences {
    pub fn accepts(&self, mode: LocationMode) -> bool {
        match mode {
            LocationMode::OnCampus => self.on_campus,
            LocationMode::OffCampus => self.off_campus,
            LocationMode::Virtual => self.virtual_,
        }
    }
}

/// Declared preferences for one user. Read-only to the scoring pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserPreferences {
    #[serde(default)]
    pub categories: BTreeSet<PreferenceCategory>,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub location: LocationPreferences,
    #[serde(default)]
    pub skill_level: SkillLevel,
    #[serde(default)]
    pub group_size: GroupSize,
    #[serde(default)]
    pub budget: BudgetClass,
}

impl UserPreferences {
    pub fn with_categories(categories: impl IntoIterator<Item = PreferenceCategory>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            ..Default::default()
        }
    }
}
