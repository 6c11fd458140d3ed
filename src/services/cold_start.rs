use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::models::{ColdStartStrategy, PreferenceCategory, ReasonType, RecommendationItem, RecommendationReason};
use crate::services::ranker::compare_candidates;

fn by_popularity(a: &RecommendationItem, b: &RecommendationItem) -> std::cmp::Ordering {
    b.score
        .popularity
        .total_cmp(&a.score.popularity)
        .then_with(|| compare_candidates(a, b))
}

/// Order candidates for a user with no signal at all. Output length is
/// `min(limit, candidates.len())`.
pub fn order_cold_start<R: Rng + ?Sized>(
    strategy: ColdStartStrategy,
    mut candidates: Vec<RecommendationItem>,
    limit: usize,
    explain: bool,
    rng: &mut R,
) -> Vec<RecommendationItem> {
    candidates.sort_by(by_popularity);

    let mut ordered = match strategy {
        ColdStartStrategy::Popular => candidates,
        ColdStartStrategy::Random => {
            candidates.sort_by(|a, b| a.item.id.cmp(&b.item.id));
            candidates.shuffle(rng);
            candidates
        }
        ColdStartStrategy::Diverse => round_robin(candidates, rng),
        ColdStartStrategy::CategoryBased => one_per_category(candidates),
    };
    ordered.truncate(limit);

    for candidate in &mut ordered {
        candidate.reasons.clear();
        if explain {
            candidate.reasons.push(cold_start_reason(strategy, candidate));
        }
    }
    ordered
}

fn group_by_category(candidates: Vec<RecommendationItem>) -> BTreeMap<Option<PreferenceCategory>, Vec<RecommendationItem>> {
    let mut groups: BTreeMap<Option<PreferenceCategory>, Vec<RecommendationItem>> = BTreeMap::new();
    for candidate in candidates {
        groups.entry(candidate.item.primary_category()).or_default().push(candidate);
    }
    groups
}

/// Visit categories in a random order, taking the most popular remaining item
/// from each in turn.
fn round_robin<R: Rng + ?Sized>(candidates: Vec<RecommendationItem>, rng: &mut R) -> Vec<RecommendationItem> {
    let mut queues: Vec<std::vec::IntoIter<RecommendationItem>> = group_by_category(candidates)
        .into_values()
        .map(|group| group.into_iter())
        .collect();
    queues.shuffle(rng);

    let mut ordered = Vec::new();
    loop {
        let before = ordered.len();
        for queue in queues.iter_mut() {
            if let Some(next) = queue.next() {
                ordered.push(next);
            }
        }
        if ordered.len() == before {
            break;
        }
    }
    ordered
}

/// The most popular item of every category first, then everything else by popularity.
fn one_per_category(candidates: Vec<RecommendationItem>) -> Vec<RecommendationItem> {
    let mut leaders = Vec::new();
    let mut rest = Vec::new();
    for (_, group) in group_by_category(candidates) {
        let mut group = group.into_iter();
        if let Some(leader) = group.next() {
            leaders.push(leader);
        }
        rest.extend(group);
    }
    leaders.sort_by(by_popularity);
    rest.sort_by(by_popularity);
    leaders.extend(rest);
    leaders
}

fn cold_start_reason(strategy: ColdStartStrategy, candidate: &RecommendationItem) -> RecommendationReason {
    let (description, confidence) = match strategy {
        ColdStartStrategy::Popular => ("Popular with other students", candidate.score.popularity),
        ColdStartStrategy::CategoryBased => ("A top pick in its category", candidate.score.popularity),
        ColdStartStrategy::Diverse => ("Something different to explore", 50.0),
        ColdStartStrategy::Random => ("A random pick to get you started", 50.0),
    };
    RecommendationReason {
        reason_type: ReasonType::ColdStart,
        description: description.to_string(),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, ItemType, RecommendationScore};
    use crate::services::ranker::seeded_rng;
    use std::collections::HashSet;

    fn candidate(id: &str, category: PreferenceCategory, popularity: f64) -> RecommendationItem {
        RecommendationItem {
            item: Item::new(id, ItemType::Club, id).with_categories([category]),
            score: RecommendationScore {
                popularity,
                ..Default::default()
            },
            reasons: Vec::new(),
        }
    }

    fn pool() -> Vec<RecommendationItem> {
        vec![
            candidate("t1", PreferenceCategory::Technology, 90.0),
            candidate("t2", PreferenceCategory::Technology, 80.0),
            candidate("t3", PreferenceCategory::Technology, 70.0),
            candidate("s1", PreferenceCategory::Sports, 60.0),
            candidate("s2", PreferenceCategory::Sports, 50.0),
            candidate("m1", PreferenceCategory::Music, 10.0),
        ]
    }

    fn ids(items: &[RecommendationItem]) -> Vec<&str> {
        items.iter().map(|c| c.item.id.as_str()).collect()
    }

    #[test]
    fn popular_orders_by_popularity_alone() {
        let ordered = order_cold_start(ColdStartStrategy::Popular, pool(), 4, true, &mut seeded_rng(1));
        assert_eq!(ids(&ordered), vec!["t1", "t2", "t3", "s1"]);
        assert!(ordered.iter().all(|c| c.reasons.len() == 1 && c.reasons[0].reason_type == ReasonType::ColdStart));
    }

    #[test]
    fn category_based_leads_with_one_per_category() {
        let ordered = order_cold_start(ColdStartStrategy::CategoryBased, pool(), 5, false, &mut seeded_rng(1));
        assert_eq!(ids(&ordered), vec!["t1", "s1", "m1", "t2", "t3"]);
        assert!(ordered.iter().all(|c| c.reasons.is_empty()));
    }

    #[test]
    fn diverse_covers_categories_first() {
        let ordered = order_cold_start(ColdStartStrategy::Diverse, pool(), 6, true, &mut seeded_rng(9));
        let head: HashSet<_> = ordered.iter().take(3).map(|c| c.item.primary_category()).collect();
        assert_eq!(head.len(), 3);
        assert_eq!(ordered.len(), 6);
    }

    #[test]
    fn random_is_reproducible_per_seed() {
        let a = order_cold_start(ColdStartStrategy::Random, pool(), 6, true, &mut seeded_rng(42));
        let b = order_cold_start(ColdStartStrategy::Random, pool(), 6, true, &mut seeded_rng(42));
        assert_eq!(ids(&a), ids(&b));
        let unique: HashSet<_> = ids(&a).into_iter().collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn never_returns_more_than_available() {
        for strategy in [
            ColdStartStrategy::Popular,
            ColdStartStrategy::Diverse,
            ColdStartStrategy::Random,
            ColdStartStrategy::CategoryBased,
        ] {
            let ordered = order_cold_start(strategy, pool(), 50, true, &mut seeded_rng(5));
            assert_eq!(ordered.len(), 6);
            let ordered = order_cold_start(strategy, pool(), 2, true, &mut seeded_rng(5));
            assert_eq!(ordered.len(), 2);
        }
    }
}
