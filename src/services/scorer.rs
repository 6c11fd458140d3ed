use chrono::{DateTime, Utc};

use crate::models::{
    Item, ItemCounters, RecommendationItem, RecommendationReason, RecommendationScore, ReasonType, ScoringWeights,
    UserPreferences,
};
use crate::services::feature_extractor::{FeatureExtractor, UserFeatures};

const SKILL_MATCH_BOOST: f64 = 1.2;
const LOCATION_MATCH_BOOST: f64 = 1.1;
const SIMILAR_ITEM_BONUS: f64 = 5.0;
const MAX_SIMILARITY_BONUS: f64 = 20.0;
const MAX_REASONS: usize = 4;

/// Intermediate signals for one (user, item) pair, before blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    pub relevance: f64,
    pub personalization: f64,
    pub popularity: f64,
    pub timeliness: f64,
    pub skill_match: bool,
    pub location_match: bool,
    pub similar_items: usize,
}

impl Signals {
    pub fn similarity_bonus(&self) -> f64 {
        (self.similar_items as f64 * SIMILAR_ITEM_BONUS).min(MAX_SIMILARITY_BONUS)
    }
}

#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ScoringWeights,
    reason_threshold: f64,
}

impl Scorer {
    pub fn new(weights: ScoringWeights, reason_threshold: f64) -> Self {
        Self {
            weights,
            reason_threshold,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn signals(
        &self,
        user: &UserFeatures,
        preferences: &UserPreferences,
        item: &Item,
        counters: &ItemCounters,
        now: DateTime<Utc>,
    ) -> Signals {
        let skill_match = item.metadata.skill_level == Some(preferences.skill_level);
        let location_match = item
            .metadata
            .location_mode
            .map_or(false, |mode| preferences.location.accepts(mode));

        let mut match_weight = 1.0;
        if skill_match {
            match_weight *= SKILL_MATCH_BOOST;
        }
        if location_match {
            match_weight *= LOCATION_MATCH_BOOST;
        }

        let affinity_sum: f64 = item
            .categories
            .iter()
            .map(|category| user.affinity(*category) * match_weight)
            .sum();
        let relevance = (affinity_sum / item.categories.len().max(1) as f64 * 100.0).min(100.0);

        let similar_items = user.liked_items_sharing_tags(item);
        let bonus = (similar_items as f64 * SIMILAR_ITEM_BONUS).min(MAX_SIMILARITY_BONUS);

        Signals {
            relevance,
            personalization: (relevance + bonus).min(100.0),
            popularity: FeatureExtractor::item_popularity(counters) * 100.0,
            timeliness: FeatureExtractor::timeliness(item, now) * 100.0,
            skill_match,
            location_match,
            similar_items,
        }
    }

    /// Score one candidate. Reasons are attached only when `explain` is set.
    pub fn score(
        &self,
        user: &UserFeatures,
        preferences: &UserPreferences,
        item: &Item,
        counters: &ItemCounters,
        now: DateTime<Utc>,
        explain: bool,
    ) -> RecommendationItem {
        let signals = self.signals(user, preferences, item, counters, now);
        let score = RecommendationScore::new(
            signals.relevance,
            signals.personalization,
            signals.popularity,
            signals.timeliness,
            &self.weights,
        );
        let reasons = if explain {
            self.reasons(user, preferences, item, &signals, &score, now)
        } else {
            Vec::new()
        };

        RecommendationItem {
            item: item.clone(),
            score,
            reasons,
        }
    }

    fn reasons(
        &self,
        user: &UserFeatures,
        preferences: &UserPreferences,
        item: &Item,
        signals: &Signals,
        score: &RecommendationScore,
        now: DateTime<Utc>,
    ) -> Vec<RecommendationReason> {
        if score.overall <= 0.0 {
            return Vec::new();
        }
        let share = |contribution: f64| (contribution / score.overall * 100.0).clamp(0.0, 100.0);
        let relevance_share = share(self.weights.relevance * score.relevance);
        let personalization_share = share(self.weights.personalization * score.personalization);
        let popularity_share = share(self.weights.popularity * score.popularity);
        let timeliness_share = share(self.weights.timeliness * score.timeliness);

        let mut reasons = Vec::new();
        let mut push = |reason_type, description: String, confidence: f64| {
            if confidence > self.reason_threshold {
                reasons.push(RecommendationReason {
                    reason_type,
                    description,
                    confidence,
                });
            }
        };

        if let Some(category) = item
            .categories
            .iter()
            .copied()
            .filter(|c| user.affinity(*c) > 0.0)
            .max_by(|a, b| user.affinity(*a).total_cmp(&user.affinity(*b)))
        {
            push(
                ReasonType::CategoryMatch,
                format!("Matches your interest in {}", category),
                relevance_share,
            );
        }
        if signals.relevance > 0.0 && signals.skill_match {
            push(
                ReasonType::SkillMatch,
                format!("Suited to your {} skill level", preferences.skill_level.as_str()),
                relevance_share,
            );
        }
        if signals.relevance > 0.0 && signals.location_match {
            push(
                ReasonType::LocationBased,
                "Held where you prefer to take part".to_string(),
                relevance_share,
            );
        }
        if signals.similar_items > 0 {
            let noun = if signals.similar_items == 1 { "item" } else { "items" };
            push(
                ReasonType::SimilarInterests,
                format!("Similar to {} {} you engaged with", signals.similar_items, noun),
                personalization_share,
            );
        }
        push(
            ReasonType::Popular,
            "Popular with other students".to_string(),
            popularity_share,
        );
        // Undated items score neutral timeliness; there is no schedule to cite.
        if item.window_end().is_some() {
            let timing = match item.starts_at {
                Some(start) if start <= now => "Happening now",
                _ => "Coming up soon",
            };
            push(ReasonType::TimeBased, timing.to_string(), timeliness_share);
        }

        reasons.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut seen = Vec::with_capacity(MAX_REASONS);
        reasons.retain(|r| {
            if seen.contains(&r.reason_type) {
                false
            } else {
                seen.push(r.reason_type);
                true
            }
        });
        reasons.truncate(MAX_REASONS);
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Catalog, Interaction, InteractionType, ItemType, LocationMode, PreferenceCategory, SkillLevel};
    use chrono::Duration;
    use uuid::Uuid;

    fn tech_item(id: &str) -> Item {
        Item::new(id, ItemType::Event, "Compiler workshop")
            .with_categories([PreferenceCategory::Technology])
            .with_tags(["rust"])
    }

    fn features_for(history: &[(&str, InteractionType)], catalog: &Catalog, now: DateTime<Utc>) -> UserFeatures {
        let history: Vec<Interaction> = history
            .iter()
            .map(|(item, kind)| Interaction {
                id: Uuid::new_v4(),
                sequence: 0,
                user_id: "u1".into(),
                item_id: (*item).into(),
                item_type: ItemType::Event,
                interaction_type: *kind,
                timestamp: now,
                metadata: None,
            })
            .collect();
        FeatureExtractor::default().user_features("u1", &history, catalog, &UserPreferences::default(), now)
    }

    #[test]
    fn overall_is_the_weighted_blend() {
        let now = Utc::now();
        let catalog = Catalog::new(vec![tech_item("liked"), tech_item("candidate")]).unwrap();
        let user = features_for(&[("liked", InteractionType::Click)], &catalog, now);
        let scorer = Scorer::new(ScoringWeights::default(), 15.0);
        let counters = ItemCounters {
            views: 10,
            clicks: 5,
            ..Default::default()
        };

        let scored = scorer.score(&user, &UserPreferences::default(), catalog.get("candidate").unwrap(), &counters, now, true);
        let s = scored.score;
        assert_eq!(s.relevance, 100.0);
        assert_eq!(s.personalization, 100.0);
        assert!((s.popularity - 20.0).abs() < 1e-9);
        assert_eq!(s.timeliness, 50.0);
        let expected = (0.35 * s.relevance + 0.30 * s.personalization + 0.20 * s.popularity + 0.15 * s.timeliness).round();
        assert_eq!(s.overall, expected);
    }

    #[test]
    fn boosts_apply_for_skill_and_location_matches() {
        let now = Utc::now();
        let catalog = Catalog::new(vec![
            tech_item("liked"),
            Item::new("other", ItemType::Event, "Sketching").with_categories([PreferenceCategory::Arts]),
        ])
        .unwrap();
        let user = features_for(
            &[("liked", InteractionType::Click), ("other", InteractionType::Click)],
            &catalog,
            now,
        );
        let prefs = UserPreferences {
            skill_level: SkillLevel::Advanced,
            ..Default::default()
        };
        let scorer = Scorer::new(ScoringWeights::default(), 15.0);

        let plain = Item::new("plain", ItemType::Course, "Systems").with_categories([PreferenceCategory::Technology]);
        let mut matched = plain.clone();
        matched.id = "matched".into();
        matched.metadata.skill_level = Some(SkillLevel::Advanced);
        matched.metadata.location_mode = Some(LocationMode::OnCampus);

        let base = scorer.signals(&user, &prefs, &plain, &ItemCounters::default(), now);
        let boosted = scorer.signals(&user, &prefs, &matched, &ItemCounters::default(), now);
        assert!((base.relevance - 50.0).abs() < 1e-9);
        assert!((boosted.relevance - 50.0 * 1.2 * 1.1).abs() < 1e-9);
        assert!(boosted.skill_match && boosted.location_match);
    }

    #[test]
    fn similarity_bonus_is_capped() {
        let now = Utc::now();
        let liked: Vec<Item> = (0..6).map(|i| tech_item(&format!("liked-{}", i))).collect();
        let catalog = Catalog::new(liked.clone()).unwrap();
        let history: Vec<(String, InteractionType)> = liked
            .iter()
            .map(|i| (i.id.clone(), InteractionType::Bookmark))
            .collect();
        let history: Vec<(&str, InteractionType)> = history.iter().map(|(id, k)| (id.as_str(), *k)).collect();
        let user = features_for(&history, &catalog, now);

        let candidate = Item::new("c", ItemType::Club, "Rust club")
            .with_categories([PreferenceCategory::Career])
            .with_tags(["rust"]);
        let signals = Scorer::new(ScoringWeights::default(), 15.0).signals(
            &user,
            &UserPreferences::default(),
            &candidate,
            &ItemCounters::default(),
            now,
        );
        assert_eq!(signals.relevance, 0.0);
        assert_eq!(signals.similar_items, 6);
        assert_eq!(signals.similarity_bonus(), 20.0);
        assert_eq!(signals.personalization, 20.0);
    }

    #[test]
    fn reasons_are_thresholded_sorted_and_capped() {
        let now = Utc::now();
        let catalog = Catalog::new(vec![tech_item("liked"), tech_item("candidate")]).unwrap();
        let user = features_for(&[("liked", InteractionType::Register)], &catalog, now);
        let mut candidate = catalog.get("candidate").unwrap().clone();
        candidate.starts_at = Some(now + Duration::hours(3));
        candidate.metadata.skill_level = Some(SkillLevel::Beginner);
        candidate.metadata.location_mode = Some(LocationMode::OnCampus);
        let counters = ItemCounters {
            views: 10,
            clicks: 10,
            bookmarks: 10,
            rating_mean: 5.0,
            rating_count: 4,
            ..Default::default()
        };

        let scored = Scorer::new(ScoringWeights::default(), 15.0).score(
            &user,
            &UserPreferences::default(),
            &candidate,
            &counters,
            now,
            true,
        );
        assert!(scored.reasons.len() <= 4);
        assert!(scored.reasons.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(scored.reasons.iter().all(|r| r.confidence > 15.0 && r.confidence <= 100.0));
        assert!(scored
            .reasons
            .iter()
            .any(|r| r.reason_type == ReasonType::CategoryMatch));
    }

    #[test]
    fn explanations_can_be_disabled() {
        let now = Utc::now();
        let catalog = Catalog::new(vec![tech_item("liked"), tech_item("candidate")]).unwrap();
        let user = features_for(&[("liked", InteractionType::Click)], &catalog, now);
        let scored = Scorer::new(ScoringWeights::default(), 15.0).score(
            &user,
            &UserPreferences::default(),
            catalog.get("candidate").unwrap(),
            &ItemCounters::default(),
            now,
            false,
        );
        assert!(scored.reasons.is_empty());
        assert!(scored.score.overall > 0.0);
    }

    #[test]
    fn custom_weights_change_the_blend() {
        let now = Utc::now();
        let catalog = Catalog::new(vec![tech_item("candidate")]).unwrap();
        let user = features_for(&[], &catalog, now);
        let weights = ScoringWeights {
            relevance: 0.0,
            personalization: 0.0,
            popularity: 0.0,
            timeliness: 1.0,
        };
        let scored = Scorer::new(weights, 15.0).score(
            &user,
            &UserPreferences::default(),
            catalog.get("candidate").unwrap(),
            &ItemCounters::default(),
            now,
            true,
        );
        assert_eq!(scored.score.overall, 50.0);
        assert!(scored.reasons.is_empty());
    }

    #[test]
    fn only_scheduled_items_get_a_time_reason() {
        let now = Utc::now();
        let mut scheduled = tech_item("scheduled");
        scheduled.starts_at = Some(now + Duration::hours(3));
        let catalog = Catalog::new(vec![tech_item("undated"), scheduled]).unwrap();
        let user = features_for(&[], &catalog, now);
        let weights = ScoringWeights {
            relevance: 0.0,
            personalization: 0.0,
            popularity: 0.0,
            timeliness: 1.0,
        };
        let scorer = Scorer::new(weights, 15.0);
        let reasons_for = |id: &str| {
            scorer
                .score(&user, &UserPreferences::default(), catalog.get(id).unwrap(), &ItemCounters::default(), now, true)
                .reasons
        };

        assert!(reasons_for("undated")
            .iter()
            .all(|r| r.reason_type != ReasonType::TimeBased));
        let scheduled = reasons_for("scheduled");
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].reason_type, ReasonType::TimeBased);
        assert_eq!(scheduled[0].description, "Coming up soon");
    }
}
