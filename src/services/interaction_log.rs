use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RecommendationError, Result};
use crate::models::{Catalog, Interaction, InteractionFilter, InteractionType, NewInteraction};

/// Durable backing for the log. Appends are made durable before the log
/// exposes them to readers.
pub trait InteractionStore: Send + Sync {
    fn append(&self, interaction: &Interaction) -> anyhow::Result<()>;
    fn load(&self, filter: &InteractionFilter) -> anyhow::Result<Vec<Interaction>>;
}

/// Append-only interaction log, sharded by item. Appends to one item are
/// serialized by that item's shard; appends to different items proceed
/// independently.
pub struct InteractionLog {
    by_item: DashMap<String, Vec<Interaction>>,
    next_sequence: AtomicU64,
    store: Option<Arc<dyn InteractionStore>>,
}

impl Default for InteractionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionLog {
    pub fn new() -> Self {
        Self {
            by_item: DashMap::new(),
            next_sequence: AtomicU64::new(1),
            store: None,
        }
    }

    /// Open a log over `store`, replaying everything it already holds.
    pub fn with_store(store: Arc<dyn InteractionStore>) -> Result<Self> {
        let history = store.load(&InteractionFilter::default())?;
        let replayed = Self {
            by_item: DashMap::new(),
            next_sequence: AtomicU64::new(1),
            store: Some(store),
        };

        let mut max_sequence = 0;
        for interaction in history {
            max_sequence = max_sequence.max(interaction.sequence);
            replayed
                .by_item
                .entry(interaction.item_id.clone())
                .or_default()
                .push(interaction);
        }
        replayed.next_sequence.store(max_sequence + 1, Ordering::SeqCst);
        log::info!("Interaction log replayed {} interactions", replayed.len());

        Ok(replayed)
    }

    /// Validate and append one interaction. `now` is used when the caller did
    /// not supply a timestamp.
    pub fn record(&self, new: NewInteraction, catalog: &Catalog, now: DateTime<Utc>) -> Result<Interaction> {
        validate(&new, catalog)?;

        let mut entry = self.by_item.entry(new.item_id.clone()).or_default();
        let interaction = Interaction {
            id: Uuid::new_v4(),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            user_id: new.user_id,
            item_id: new.item_id,
            item_type: new.item_type,
            interaction_type: new.interaction_type,
            timestamp: new.timestamp.unwrap_or(now),
            metadata: new.metadata,
        };

        if let Some(store) = &self.store {
            store.append(&interaction)?;
        }
        entry.push(interaction.clone());

        Ok(interaction)
    }

    /// Matching interactions ordered by timestamp, oldest first. Each call
    /// reads a fresh snapshot, so the same stored state always yields the
    /// same sequence.
    pub fn query(&self, filter: &InteractionFilter) -> impl Iterator<Item = Interaction> {
        let mut matched: Vec<Interaction> = match &filter.item_id {
            Some(item_id) => self
                .by_item
                .get(item_id)
                .map(|entries| entries.iter().filter(|i| filter.matches(i)).cloned().collect())
                .unwrap_or_default(),
            None => self
                .by_item
                .iter()
                .flat_map(|entries| {
                    entries
                        .value()
                        .iter()
                        .filter(|i| filter.matches(i))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.sequence.cmp(&b.sequence)));
        matched.into_iter()
    }

    pub fn len(&self) -> usize {
        self.by_item.iter().map(|entries| entries.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate(new: &NewInteraction, catalog: &Catalog) -> Result<()> {
    if new.user_id.trim().is_empty() {
        return Err(RecommendationError::Validation("user id must not be empty".to_string()));
    }

    let item = catalog
        .get(&new.item_id)
        .ok_or_else(|| RecommendationError::UnknownItem(new.item_id.clone()))?;

    if item.item_type != new.item_type {
        return Err(RecommendationError::Validation(format!(
            "item '{}' is a {}, not a {}",
            item.id, item.item_type, new.item_type
        )));
    }

    if let Some(rating) = new.metadata.as_ref().and_then(|m| m.rating) {
        if new.interaction_type != InteractionType::Rate {
            return Err(RecommendationError::Validation(
                "only rate interactions may carry a rating".to_string(),
            ));
        }
        if !(1.0..=5.0).contains(&rating) {
            return Err(RecommendationError::Validation(format!(
                "rating {} is outside 1..=5",
                rating
            )));
        }
    }

    Ok(())
}
