use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{PreferenceCategory, RecommendationItem};

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Highest `overall` first, then most timely, then item id ascending.
pub fn compare_candidates(a: &RecommendationItem, b: &RecommendationItem) -> Ordering {
    b.score
        .overall
        .total_cmp(&a.score.overall)
        .then_with(|| b.score.timeliness.total_cmp(&a.score.timeliness))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

/// How many items of one primary category the primary pass accepts.
/// A factor of 1 allows one per category before any repeat; 0 imposes no limit.
pub fn category_cap(diversity_factor: f64, max_recommendations: usize) -> usize {
    let allowance = ((1.0 - diversity_factor.clamp(0.0, 1.0)) * max_recommendations as f64).ceil() as usize;
    allowance.max(1)
}

#[derive(Debug, Clone)]
pub struct Ranker {
    diversity_factor: f64,
    exploration_rate: f64,
}

impl Ranker {
    pub fn new(diversity_factor: f64, exploration_rate: f64) -> Self {
        Self {
            diversity_factor: diversity_factor.clamp(0.0, 1.0),
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
        }
    }

    /// Order, diversify, explore and truncate to `limit`.
    pub fn rank<R: Rng + ?Sized>(
        &self,
        mut candidates: Vec<RecommendationItem>,
        limit: usize,
        rng: &mut R,
    ) -> Vec<RecommendationItem> {
        candidates.sort_by(compare_candidates);
        let mut ranked = self.diversify(candidates, limit);
        self.explore(&mut ranked, rng);
        ranked.truncate(limit);
        ranked
    }

    /// Defers (never drops) candidates whose primary category is already at
    /// its cap. Deferred candidates go through the same capped pass again, round
    /// after round, so the tail stays diversified too.
    pub fn diversify(&self, sorted: Vec<RecommendationItem>, limit: usize) -> Vec<RecommendationItem> {
        let cap = category_cap(self.diversity_factor, limit);
        let mut accepted = Vec::with_capacity(sorted.len());
        let mut remaining = sorted;

        // Every round accepts at least its first candidate.
        while !remaining.is_empty() {
            let mut counts: HashMap<Option<PreferenceCategory>, usize> = HashMap::new();
            let mut deferred = Vec::new();
            for candidate in remaining {
                let count = counts.entry(candidate.item.primary_category()).or_insert(0);
                if *count < cap {
                    *count += 1;
                    accepted.push(candidate);
                } else {
                    deferred.push(candidate);
                }
            }
            remaining = deferred;
        }
        accepted
    }

    /// Per slot, with probability `exploration_rate`, replace a repeat-category
    /// candidate with the next candidate from a category not yet shown.
    pub fn explore<R: Rng + ?Sized>(&self, ranked: &mut Vec<RecommendationItem>, rng: &mut R) {
        if self.exploration_rate <= 0.0 {
            return;
        }
        let mut seen: HashSet<Option<PreferenceCategory>> = HashSet::new();

        for slot in 0..ranked.len() {
            let category = ranked[slot].item.primary_category();
            if seen.contains(&category) && rng.gen_bool(self.exploration_rate) {
                let unexplored = (slot + 1..ranked.len())
                    .find(|&j| !seen.contains(&ranked[j].item.primary_category()));
                if let Some(j) = unexplored {
                    let pulled = ranked.remove(j);
                    ranked.insert(slot, pulled);
                }
            }
            seen.insert(ranked[slot].item.primary_category());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, ItemType, RecommendationScore};
    use proptest::prelude::*;

    fn candidate(id: &str, category: PreferenceCategory, overall: f64, timeliness: f64) -> RecommendationItem {
        RecommendationItem {
            item: Item::new(id, ItemType::Event, id).with_categories([category]),
            score: RecommendationScore {
                overall,
                timeliness,
                ..Default::default()
            },
            reasons: Vec::new(),
        }
    }

    fn ids(items: &[RecommendationItem]) -> Vec<&str> {
        items.iter().map(|c| c.item.id.as_str()).collect()
    }

    #[test]
    fn ties_break_on_timeliness_then_id() {
        let ranker = Ranker::new(0.0, 0.0);
        let ranked = ranker.rank(
            vec![
                candidate("b", PreferenceCategory::Arts, 70.0, 50.0),
                candidate("a", PreferenceCategory::Arts, 70.0, 50.0),
                candidate("c", PreferenceCategory::Arts, 70.0, 90.0),
                candidate("d", PreferenceCategory::Arts, 80.0, 0.0),
            ],
            10,
            &mut seeded_rng(1),
        );
        assert_eq!(ids(&ranked), vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn cap_follows_diversity_factor() {
        assert_eq!(category_cap(1.0, 10), 1);
        assert_eq!(category_cap(0.0, 10), 10);
        assert_eq!(category_cap(0.5, 5), 3);
        assert_eq!(category_cap(0.99, 5), 1);
    }

    #[test]
    fn full_diversity_defers_repeats_without_dropping() {
        let ranker = Ranker::new(1.0, 0.0);
        let ranked = ranker.rank(
            vec![
                candidate("t1", PreferenceCategory::Technology, 90.0, 0.0),
                candidate("t2", PreferenceCategory::Technology, 85.0, 0.0),
                candidate("t3", PreferenceCategory::Technology, 80.0, 0.0),
                candidate("s1", PreferenceCategory::Sports, 40.0, 0.0),
                candidate("m1", PreferenceCategory::Music, 30.0, 0.0),
            ],
            4,
            &mut seeded_rng(7),
        );
        assert_eq!(ids(&ranked), vec!["t1", "s1", "m1", "t2"]);
    }

    #[test]
    fn deferred_tail_is_diversified_too() {
        let ranker = Ranker::new(1.0, 0.0);
        let ranked = ranker.rank(
            vec![
                candidate("t1", PreferenceCategory::Technology, 90.0, 0.0),
                candidate("t2", PreferenceCategory::Technology, 85.0, 0.0),
                candidate("t3", PreferenceCategory::Technology, 80.0, 0.0),
                candidate("s1", PreferenceCategory::Sports, 70.0, 0.0),
                candidate("s2", PreferenceCategory::Sports, 60.0, 0.0),
                candidate("s3", PreferenceCategory::Sports, 50.0, 0.0),
                candidate("m1", PreferenceCategory::Music, 30.0, 0.0),
            ],
            7,
            &mut seeded_rng(7),
        );
        assert_eq!(ids(&ranked), vec!["t1", "s1", "m1", "t2", "s2", "t3", "s3"]);
    }

    #[test]
    fn zero_exploration_keeps_score_order() {
        let ranker = Ranker::new(0.0, 0.0);
        let input = vec![
            candidate("t1", PreferenceCategory::Technology, 90.0, 0.0),
            candidate("t2", PreferenceCategory::Technology, 85.0, 0.0),
            candidate("s1", PreferenceCategory::Sports, 40.0, 0.0),
        ];
        let ranked = ranker.rank(input, 3, &mut seeded_rng(3));
        assert_eq!(ids(&ranked), vec!["t1", "t2", "s1"]);
    }

    #[test]
    fn full_exploration_pulls_unexplored_category_forward() {
        let ranker = Ranker::new(0.0, 1.0);
        let input = vec![
            candidate("t1", PreferenceCategory::Technology, 90.0, 0.0),
            candidate("t2", PreferenceCategory::Technology, 85.0, 0.0),
            candidate("t3", PreferenceCategory::Technology, 84.0, 0.0),
            candidate("s1", PreferenceCategory::Sports, 40.0, 0.0),
        ];
        let ranked = ranker.rank(input, 3, &mut seeded_rng(3));
        assert_eq!(ids(&ranked), vec!["t1", "s1", "t2"]);
    }

    fn arb_candidates() -> impl Strategy<Value = Vec<RecommendationItem>> {
        prop::collection::vec((0usize..12, 0u32..100, 0u32..100), 1..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (cat, overall, timeliness))| {
                    candidate(
                        &format!("item-{:03}", i),
                        PreferenceCategory::ALL[cat],
                        overall as f64,
                        timeliness as f64,
                    )
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn same_seed_same_order(
            candidates in arb_candidates(),
            seed in any::<u64>(),
            diversity in 0.0f64..=1.0,
            exploration in 0.0f64..=1.0,
            limit in 1usize..20,
        ) {
            let ranker = Ranker::new(diversity, exploration);
            let first = ranker.rank(candidates.clone(), limit, &mut seeded_rng(seed));
            let second = ranker.rank(candidates, limit, &mut seeded_rng(seed));
            prop_assert_eq!(ids(&first), ids(&second));
        }

        #[test]
        fn diversity_only_reorders(
            candidates in arb_candidates(),
            diversity in 0.0f64..=1.0,
            limit in 1usize..20,
        ) {
            let ranker = Ranker::new(diversity, 0.0);
            let ranked = ranker.rank(candidates.clone(), limit, &mut seeded_rng(0));
            prop_assert_eq!(ranked.len(), limit.min(candidates.len()));
        }

        #[test]
        fn full_diversity_covers_every_category_before_repeats(
            candidates in arb_candidates(),
            seed in any::<u64>(),
        ) {
            let categories: HashSet<_> = candidates.iter().map(|c| c.item.primary_category()).collect();
            let limit = categories.len().max(12);
            let ranker = Ranker::new(1.0, 0.3);
            let ranked = ranker.rank(candidates, limit, &mut seeded_rng(seed));

            let head: HashSet<_> = ranked
                .iter()
                .take(categories.len())
                .map(|c| c.item.primary_category())
                .collect();
            prop_assert_eq!(head.len(), categories.len());
        }

        #[test]
        fn full_diversity_never_repeats_ahead_of_a_round(candidates in arb_candidates()) {
            let limit = candidates.len();
            let ranked = Ranker::new(1.0, 0.0).rank(candidates, limit, &mut seeded_rng(0));
            prop_assert_eq!(ranked.len(), limit);

            let mut seen: HashMap<Option<PreferenceCategory>, usize> = HashMap::new();
            let mut round = 0;
            for candidate in &ranked {
                let occurrence = seen.entry(candidate.item.primary_category()).or_insert(0);
                *occurrence += 1;
                prop_assert!(*occurrence >= round);
                round = *occurrence;
            }
        }
    }
}
