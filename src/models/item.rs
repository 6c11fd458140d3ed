use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::RecommendationError;
use crate::models::{LocationMode, PreferenceCategory, SkillLevel};

/// The kind of thing being recommended. Doubles as the `type` filter on
/// recommendation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Event,
    Club,
    Activity,
    Course,
    Social,
}

pub type RecommendationType = ItemType;

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::Event,
        ItemType::Club,
        ItemType::Activity,
        ItemType::Course,
        ItemType::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Event => "event",
            ItemType::Club => "club",
            ItemType::Activity => "activity",
            ItemType::Course => "course",
            ItemType::Social => "social",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = RecommendationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        ItemType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| RecommendationError::Validation(format!("unknown item type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ItemMetadata {
    pub duration_minutes: Option<u32>,
    pub capacity: Option<u32>,
    pub cost: Option<f64>,
    pub location: Option<String>,
    pub location_mode: Option<LocationMode>,
    pub skill_level: Option<SkillLevel>,
}

/// Aggregate interaction counters. The values stored with an item are the
/// baseline supplied by the persistence store; logged interactions are
/// replayed on top of them by the feature extractor.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ItemCounters {
    pub views: u64,
    pub clicks: u64,
    pub bookmarks: u64,
    pub registrations: u64,
    pub rating_mean: f64,
    pub rating_count: u64,
}

impl ItemCounters {
    /// Fold one more rating into the running mean.
    pub fn add_rating(&mut self, rating: f64) {
        let total = self.rating_mean * self.rating_count as f64 + rating;
        self.rating_count += 1;
        self.rating_mean = total / self.rating_count as f64;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub item_type: ItemType,
    pub title: String,
    pub categories: BTreeSet<PreferenceCategory>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub counters: ItemCounters,
    #[serde(default)]
    pub status: ItemStatus,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<String>, item_type: ItemType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type,
            title: title.into(),
            categories: BTreeSet::new(),
            tags: BTreeSet::new(),
            metadata: ItemMetadata::default(),
            counters: ItemCounters::default(),
            status: ItemStatus::Active,
            starts_at: None,
            ends_at: None,
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = PreferenceCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(|t| t.into().to_lowercase()));
        self
    }

    pub fn with_schedule(mut self, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    /// The first category in the ordered set; used for diversity accounting.
    pub fn primary_category(&self) -> Option<PreferenceCategory> {
        self.categories.iter().next().copied()
    }

    /// Effective end of the item's date window. Items with only a start time
    /// are treated as ending when they start.
    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        self.ends_at.or(self.starts_at)
    }

    pub fn validate(&self) -> Result<(), RecommendationError> {
        if self.id.trim().is_empty() {
            return Err(RecommendationError::Validation("item id must not be empty".to_string()));
        }
        if self.categories.is_empty() {
            return Err(RecommendationError::Validation(format!(
                "item '{}' must carry at least one category",
                self.id
            )));
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            if end < start {
                return Err(RecommendationError::Validation(format!(
                    "item '{}' ends before it starts",
                    self.id
                )));
            }
        }
        if let Some(cost) = self.metadata.cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(RecommendationError::Validation(format!(
                    "item '{}' has an invalid cost",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Read-only item catalog keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: HashMap<String, Item>,
}

impl Catalog {
    pub fn new(items: impl IntoIterator<Item = Item>) -> Result<Self, RecommendationError> {
        let mut map = HashMap::new();
        for item in items {
            item.validate()?;
            map.insert(item.id.clone(), item);
        }
        Ok(Self { items: map })
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rating_mean_accumulates() {
        let mut counters = ItemCounters {
            rating_mean: 4.0,
            rating_count: 2,
            ..Default::default()
        };
        counters.add_rating(1.0);
        assert_eq!(counters.rating_count, 3);
        assert!((counters.rating_mean - 3.0).abs() < 1e-9);
    }

    #[test]
    fn catalog_rejects_uncategorized_items() {
        let item = Item::new("e1", ItemType::Event, "Hack night");
        assert!(Catalog::new(vec![item]).is_err());
    }

    #[test]
    fn catalog_rejects_inverted_schedule() {
        let now = Utc::now();
        let item = Item::new("e1", ItemType::Event, "Hack night")
            .with_categories([PreferenceCategory::Technology])
            .with_schedule(Some(now), Some(now - Duration::hours(1)));
        assert!(Catalog::new(vec![item]).is_err());
    }

    #[test]
    fn primary_category_is_first_in_order() {
        let item = Item::new("c1", ItemType::Club, "Climbing club")
            .with_categories([PreferenceCategory::Sports, PreferenceCategory::Outdoor]);
        assert_eq!(item.primary_category(), Some(PreferenceCategory::Outdoor));
    }

    #[test]
    fn item_type_parses_case_insensitively() {
        assert_eq!("Course".parse::<ItemType>().unwrap(), ItemType::Course);
        assert!("lecture".parse::<ItemType>().is_err());
    }
}
