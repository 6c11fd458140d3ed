use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::models::{
    Catalog, Interaction, InteractionType, Item, ItemCounters, ItemStatus, PreferenceCategory, UserPreferences,
};

// Items starting within this window count as fully timely.
const SOON_WINDOW_HOURS: i64 = 48;
// Timeliness falls to 0 this long after an item's window closes.
const AFTER_END_DECAY_DAYS: i64 = 14;
// Far-future items ramp from 1.0 at SOON_WINDOW_HOURS down to neutral here.
const FAR_FUTURE_DAYS: i64 = 30;
const NEUTRAL_TIMELINESS: f64 = 0.5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// An item the user engaged with positively, kept for tag overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct LikedItem {
    pub item_id: String,
    pub tags: BTreeSet<String>,
}

/// Everything the scorer needs to know about one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFeatures {
    pub user_id: String,
    /// Normalized affinity per category, each in [0, 1].
    pub affinities: HashMap<PreferenceCategory, f64>,
    /// Decayed positive interaction mass per category, before normalization.
    pub category_mass: HashMap<PreferenceCategory, f64>,
    pub liked: Vec<LikedItem>,
    pub interaction_count: usize,
    pub declared_categories: usize,
}

impl UserFeatures {
    pub fn affinity(&self, category: PreferenceCategory) -> f64 {
        self.affinities.get(&category).copied().unwrap_or(0.0)
    }

    /// No history and nothing declared: there is no signal to personalize on.
    pub fn is_cold_start(&self) -> bool {
        self.interaction_count == 0 && self.declared_categories == 0
    }

    /// Distinct liked items, other than `item`, sharing at least one tag with it.
    pub fn liked_items_sharing_tags(&self, item: &Item) -> usize {
        self.liked
            .iter()
            .filter(|liked| liked.item_id != item.id && !liked.tags.is_disjoint(&item.tags))
            .count()
    }
}

/// Turns the catalog and interaction history into numeric scoring inputs.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    half_life_days: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(14.0)
    }
}

impl FeatureExtractor {
    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    /// Strength of one interaction. Skips and low ratings pull affinity down.
    pub fn interaction_weight(interaction: &Interaction) -> f64 {
        match interaction.interaction_type {
            InteractionType::Register => 5.0,
            InteractionType::Complete => 4.0,
            InteractionType::Bookmark => 3.0,
            InteractionType::Click => 2.0,
            InteractionType::View => 1.0,
            InteractionType::Skip => -1.5,
            InteractionType::Rate => match interaction.rating() {
                Some(rating) => (rating - 2.5) * 1.5,
                None => 2.0,
            },
        }
    }

    /// Exponential half-life decay. Interactions stamped in the future count fully.
    pub fn decay(&self, age: Duration) -> f64 {
        let age_days = (age.num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0);
        0.5f64.powf(age_days / self.half_life_days)
    }

    /// Build the feature vector for one user from their own history, oldest first.
    pub fn user_features(
        &self,
        user_id: &str,
        history: &[Interaction],
        catalog: &Catalog,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> UserFeatures {
        let mut raw: HashMap<PreferenceCategory, f64> = HashMap::new();
        let mut liked: HashMap<&str, &Item> = HashMap::new();
        let mut interaction_count = 0;

        for interaction in history.iter().filter(|i| i.user_id == user_id) {
            interaction_count += 1;
            let Some(item) = catalog.get(&interaction.item_id) else {
                continue;
            };
            let contribution = Self::interaction_weight(interaction) * self.decay(now - interaction.timestamp);
            for category in &item.categories {
                *raw.entry(*category).or_insert(0.0) += contribution;
            }
            if interaction.interaction_type.is_positive() {
                liked.insert(item.id.as_str(), item);
            }
        }

        let category_mass: HashMap<PreferenceCategory, f64> = raw
            .into_iter()
            .filter(|(_, mass)| *mass > 0.0)
            .collect();
        let total: f64 = category_mass.values().sum();

        let affinities = if total > 0.0 {
            category_mass.iter().map(|(c, mass)| (*c, mass / total)).collect()
        } else if !preferences.categories.is_empty() {
            let share = 1.0 / preferences.categories.len() as f64;
            preferences.categories.iter().map(|c| (*c, share)).collect()
        } else {
            HashMap::new()
        };

        let mut liked: Vec<LikedItem> = liked
            .into_values()
            .map(|item| LikedItem {
                item_id: item.id.clone(),
                tags: item.tags.clone(),
            })
            .collect();
        liked.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        UserFeatures {
            user_id: user_id.to_string(),
            affinities,
            category_mass,
            liked,
            interaction_count,
            declared_categories: preferences.categories.len(),
        }
    }

    /// Affinity of one user for one category, in [0, 1].
    pub fn user_affinity(
        &self,
        user_id: &str,
        category: PreferenceCategory,
        history: &[Interaction],
        catalog: &Catalog,
        preferences: &UserPreferences,
        now: DateTime<Utc>,
    ) -> f64 {
        self.user_features(user_id, history, catalog, preferences, now)
            .affinity(category)
    }

    /// Baseline counters plus everything the log recorded for this item.
    pub fn replay_counters<'a>(item: &Item, interactions: impl IntoIterator<Item = &'a Interaction>) -> ItemCounters {
        let mut counters = item.counters.clone();
        for interaction in interactions.into_iter().filter(|i| i.item_id == item.id) {
            match interaction.interaction_type {
                InteractionType::View => counters.views += 1,
                InteractionType::Click => counters.clicks += 1,
                InteractionType::Bookmark => counters.bookmarks += 1,
                InteractionType::Register => counters.registrations += 1,
                InteractionType::Rate => {
                    if let Some(rating) = interaction.rating() {
                        counters.add_rating(rating);
                    }
                }
                InteractionType::Complete | InteractionType::Skip => {}
            }
        }
        counters
    }

    /// Popularity in [0, 1] from click-through, bookmark rate and rating.
    pub fn item_popularity(counters: &ItemCounters) -> f64 {
        let per_view = |count: u64| {
            if counters.views == 0 {
                0.0
            } else {
                (count as f64 / counters.views as f64).clamp(0.0, 1.0)
            }
        };
        let click_through = per_view(counters.clicks);
        let bookmark_rate = per_view(counters.bookmarks);
        let rating = if counters.rating_count > 0 {
            ((counters.rating_mean - 1.0) / 4.0).clamp(0.0, 1.0)
        } else {
            0.0
        };

        0.4 * click_through + 0.3 * bookmark_rate + 0.3 * rating
    }

    /// How well the item's date window fits `now`, in [0, 1].
    pub fn timeliness(item: &Item, now: DateTime<Utc>) -> f64 {
        let Some(end) = item.window_end() else {
            return NEUTRAL_TIMELINESS;
        };
        let start = item.starts_at.unwrap_or(end);

        if start <= now && now <= end {
            return 1.0;
        }

        if now < start {
            let lead = start - now;
            let soon = Duration::hours(SOON_WINDOW_HOURS);
            if lead <= soon {
                return 1.0;
            }
            let ramp = (Duration::days(FAR_FUTURE_DAYS) - soon).num_seconds() as f64;
            let progress = (lead - soon).num_seconds() as f64 / ramp;
            return (1.0 - (1.0 - NEUTRAL_TIMELINESS) * progress).clamp(NEUTRAL_TIMELINESS, 1.0);
        }

        let past = (now - end).num_seconds() as f64;
        let horizon = Duration::days(AFTER_END_DECAY_DAYS).num_seconds() as f64;
        (1.0 - past / horizon).max(0.0)
    }

    /// Active items whose window has not fully decayed.
    pub fn is_live(item: &Item, now: DateTime<Utc>) -> bool {
        item.status == ItemStatus::Active
            && item
                .window_end()
                .map_or(true, |end| now <= end + Duration::days(AFTER_END_DECAY_DAYS))
    }
}
