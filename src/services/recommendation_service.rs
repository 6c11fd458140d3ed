use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::database::SqliteStore;
use crate::error::{RecommendationError, Result};
use crate::models::{
    Catalog, CategoryMass, EmptyReason, EngineConfig, Interaction, InteractionFilter, Item, ItemType, NewInteraction,
    RecommendationItem, RecommendationList, RecommendationSettings, RecommendationSource, RecommendationStats,
    UserPreferences,
};
use crate::services::cold_start::order_cold_start;
use crate::services::feature_extractor::FeatureExtractor;
use crate::services::interaction_log::{InteractionLog, InteractionStore};
use crate::services::ranker::{seeded_rng, Ranker};
use crate::services::scorer::Scorer;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::{hash_string, interaction_key};

// Past this many dedup entries, `record_interaction` prunes expired ones itself.
pub(crate) const DEDUP_PRUNE_THRESHOLD: usize = 1024;

/// Every live candidate scored for one user at one session epoch. Ranking,
/// type filtering and truncation happen per request on top of this.
#[derive(Debug)]
pub(crate) struct ScoredSnapshot {
    epoch: u64,
    computed_at: DateTime<Utc>,
    cold_start: bool,
    candidates: Vec<RecommendationItem>,
}

type RefreshOutcome = std::result::Result<Arc<ScoredSnapshot>, Arc<RecommendationError>>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    epoch: u64,
    ticket: u64,
    future: SharedRefresh,
}

struct Session {
    preferences: UserPreferences,
    settings: RecommendationSettings,
    /// Replaced by a fresh generation on every preference, settings, catalog
    /// or interaction change.
    epoch: u64,
    /// Generation of the most recently started computation, or of the session
    /// itself before any computation started.
    ticket: u64,
    snapshot: Option<Arc<ScoredSnapshot>>,
    inflight: Option<InFlight>,
    last_served: Vec<f64>,
    recommendations_shown: u64,
    interactions: u64,
}

impl Session {
    /// Epoch and ticket both start at `generation`, so any computation begun
    /// for a session this one replaces is already superseded.
    fn new(preferences: UserPreferences, settings: RecommendationSettings, generation: u64) -> Self {
        Self {
            preferences,
            settings,
            epoch: generation,
            ticket: generation,
            snapshot: None,
            inflight: None,
            last_served: Vec::new(),
            recommendations_shown: 0,
            interactions: 0,
        }
    }

    fn is_current(&self, snapshot: &ScoredSnapshot) -> bool {
        snapshot.epoch == self.epoch
    }

    /// A snapshot is due when it belongs to an older epoch or has outlived the
    /// refresh interval. An interval of 0 means manual refresh only.
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match &self.snapshot {
            None => true,
            Some(snapshot) if !self.is_current(snapshot) => true,
            Some(snapshot) => {
                let interval = self.settings.refresh_interval_minutes;
                interval > 0 && now - snapshot.computed_at >= Duration::minutes(interval as i64)
            }
        }
    }
}

enum Settled {
    Done,
    Superseded,
}

struct Inner {
    catalog: RwLock<Arc<Catalog>>,
    log: Arc<InteractionLog>,
    store: Option<Arc<SqliteStore>>,
    config: EngineConfig,
    extractor: FeatureExtractor,
    scorer: Scorer,
    clock: Arc<dyn Clock>,
    sessions: DashMap<String, Session>,
    recent: DashMap<u64, DateTime<Utc>>,
    /// Service-wide source of session epochs and refresh tickets.
    generation: AtomicU64,
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst)
    }

    fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn compute_snapshot(
        &self,
        user_id: &str,
        preferences: &UserPreferences,
        settings: &RecommendationSettings,
        epoch: u64,
    ) -> ScoredSnapshot {
        let now = self.clock.now();
        let catalog = self.catalog();
        let history: Vec<Interaction> = self.log.query(&InteractionFilter::for_user(user_id)).collect();
        let features = self
            .extractor
            .user_features(user_id, &history, &catalog, preferences, now);

        let mut by_item: HashMap<String, Vec<Interaction>> = HashMap::new();
        for interaction in self.log.query(&InteractionFilter::default()) {
            by_item.entry(interaction.item_id.clone()).or_default().push(interaction);
        }

        let mut live: Vec<&Item> = catalog
            .iter()
            .filter(|item| FeatureExtractor::is_live(item, now))
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        let max_candidates = self.config.limits.max_candidates;
        if live.len() > max_candidates {
            log::debug!(
                "Candidate set for {} capped at {} of {} live items",
                user_id,
                max_candidates,
                live.len()
            );
            live.truncate(max_candidates);
        }

        let candidates = live
            .into_iter()
            .map(|item| {
                let counters = FeatureExtractor::replay_counters(item, by_item.get(&item.id).into_iter().flatten());
                self.scorer
                    .score(&features, preferences, item, &counters, now, settings.enable_explanations)
            })
            .collect();

        ScoredSnapshot {
            epoch,
            computed_at: now,
            cold_start: features.is_cold_start(),
            candidates,
        }
    }
}

/// The entry point callers use. Cheap to clone; clones share sessions, the
/// catalog and the interaction log.
#[derive(Clone)]
pub struct RecommendationService {
    inner: Arc<Inner>,
}

impl RecommendationService {
    /// In-memory service over `catalog` with the system clock.
    pub fn new(catalog: Catalog, config: EngineConfig) -> Result<Self> {
        Self::from_parts(catalog, Arc::new(InteractionLog::new()), None, config, Arc::new(SystemClock))
    }

    /// Service backed by `store`: the catalog is loaded from it and the
    /// interaction log replays its history.
    pub fn open(store: Arc<SqliteStore>, config: EngineConfig) -> Result<Self> {
        let catalog = Catalog::new(store.load_items()?)?;
        let backing: Arc<dyn InteractionStore> = store.clone();
        let log = Arc::new(InteractionLog::with_store(backing)?);
        Self::from_parts(catalog, log, Some(store), config, Arc::new(SystemClock))
    }

    pub fn from_parts(
        catalog: Catalog,
        log: Arc<InteractionLog>,
        store: Option<Arc<SqliteStore>>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new(config.scoring.half_life_days);
        let scorer = Scorer::new(config.scoring.weights, config.scoring.reason_threshold);
        log::info!("Recommendation service ready with {} catalog items", catalog.len());

        Ok(Self {
            inner: Arc::new(Inner {
                catalog: RwLock::new(Arc::new(catalog)),
                log,
                store,
                config,
                extractor,
                scorer,
                clock,
                sessions: DashMap::new(),
                recent: DashMap::new(),
                generation: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.catalog()
    }

    pub fn interaction_log(&self) -> &Arc<InteractionLog> {
        &self.inner.log
    }

    /// Start (or restart) a session. Any previous session state for the user
    /// is discarded.
    pub fn load_session(
        &self,
        user_id: &str,
        preferences: UserPreferences,
        settings: RecommendationSettings,
    ) -> Result<()> {
        validate_user(user_id)?;
        settings.validate()?;
        if let Some(store) = &self.inner.store {
            store.save_preferences(user_id, &preferences)?;
            store.save_settings(user_id, &settings)?;
        }
        let session = Session::new(preferences, settings, self.inner.next_generation());
        self.inner.sessions.insert(user_id.to_string(), session);
        log::info!("Session loaded for {}", user_id);
        Ok(())
    }

    /// Start a session from persisted preferences and settings, falling back
    /// to defaults for whatever the store does not hold.
    pub fn load_session_from_store(&self, user_id: &str) -> Result<()> {
        validate_user(user_id)?;
        let (preferences, settings) = match &self.inner.store {
            Some(store) => (store.load_preferences(user_id)?, store.load_settings(user_id)?),
            None => (None, None),
        };
        let preferences = preferences.unwrap_or_default();
        let settings = settings.unwrap_or_else(|| self.inner.config.defaults.clone());
        settings.validate()?;

        let session = Session::new(preferences, settings, self.inner.next_generation());
        self.inner.sessions.insert(user_id.to_string(), session);
        log::info!("Session loaded from store for {}", user_id);
        Ok(())
    }

    pub fn update_preferences(&self, user_id: &str, preferences: UserPreferences) -> Result<()> {
        let mut session = self.session_mut(user_id)?;
        if let Some(store) = &self.inner.store {
            store.save_preferences(user_id, &preferences)?;
        }
        session.preferences = preferences;
        session.epoch = self.inner.next_generation();
        Ok(())
    }

    /// Rejected settings leave the session untouched.
    pub fn update_settings(&self, user_id: &str, settings: RecommendationSettings) -> Result<()> {
        settings.validate()?;
        let mut session = self.session_mut(user_id)?;
        if let Some(store) = &self.inner.store {
            store.save_settings(user_id, &settings)?;
        }
        session.settings = settings;
        session.epoch = self.inner.next_generation();
        Ok(())
    }

    /// Returns false when no session was loaded.
    pub fn end_session(&self, user_id: &str) -> bool {
        let ended = self.inner.sessions.remove(user_id).is_some();
        if ended {
            log::info!("Session ended for {}", user_id);
        }
        ended
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.inner.sessions.contains_key(user_id)
    }

    pub fn preferences(&self, user_id: &str) -> Result<UserPreferences> {
        Ok(self.session(user_id)?.preferences.clone())
    }

    pub fn settings(&self, user_id: &str) -> Result<RecommendationSettings> {
        Ok(self.session(user_id)?.settings.clone())
    }

    /// Swap the item catalog. Every session's snapshot becomes stale.
    pub fn replace_catalog(&self, items: Vec<Item>) -> Result<()> {
        if let Some(store) = &self.inner.store {
            store.upsert_items(&items)?;
        }
        let catalog = Catalog::new(items)?;
        let count = catalog.len();
        *self.inner.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);

        for mut session in self.inner.sessions.iter_mut() {
            session.epoch = self.inner.next_generation();
        }
        log::info!("Catalog replaced with {} items", count);
        Ok(())
    }

    /// Ranked recommendations for a loaded session, optionally restricted to
    /// one item type. `limit` defaults to the session's `max_recommendations`.
    pub async fn get_recommendations(
        &self,
        user_id: &str,
        item_type: Option<ItemType>,
        limit: Option<usize>,
    ) -> Result<RecommendationList> {
        if limit == Some(0) {
            return Err(RecommendationError::Validation("limit must be at least 1".to_string()));
        }

        let now = self.inner.clock.now();
        let due = self.session(user_id)?.needs_refresh(now);
        if due {
            self.refresh_recommendations(user_id).await?;
        }

        let (snapshot, settings, current) = {
            let session = self.session(user_id)?;
            let current = session
                .snapshot
                .as_ref()
                .map_or(false, |snapshot| session.is_current(snapshot));
            (session.snapshot.clone(), session.settings.clone(), current)
        };

        let Some(snapshot) = snapshot else {
            return Ok(empty_list(user_id, EmptyReason::NoCandidates, now));
        };

        // A cached snapshot may predate the catalog; judge liveness on the current copy.
        let catalog = self.inner.catalog();
        let live: Vec<&RecommendationItem> = snapshot
            .candidates
            .iter()
            .filter(|candidate| {
                catalog
                    .get(&candidate.item.id)
                    .map_or(false, |item| FeatureExtractor::is_live(item, now))
            })
            .collect();
        if live.is_empty() {
            return Ok(empty_list(user_id, EmptyReason::NoCandidates, now));
        }
        let candidates: Vec<RecommendationItem> = live
            .into_iter()
            .filter(|candidate| item_type.map_or(true, |wanted| candidate.item.item_type == wanted))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(empty_list(user_id, EmptyReason::NoMatchingType, now));
        }

        let limit = limit.unwrap_or(settings.max_recommendations);
        let seed = settings.random_seed.unwrap_or_else(|| hash_string(user_id));
        let mut rng = seeded_rng(seed);

        let items = if snapshot.cold_start {
            order_cold_start(
                settings.cold_start_strategy,
                candidates,
                limit,
                settings.enable_explanations,
                &mut rng,
            )
        } else {
            Ranker::new(settings.diversity_factor, settings.exploration_rate).rank(candidates, limit, &mut rng)
        };

        let source = if !current {
            RecommendationSource::Cached
        } else if snapshot.cold_start {
            RecommendationSource::ColdStart
        } else {
            RecommendationSource::Fresh
        };

        if let Some(mut session) = self.inner.sessions.get_mut(user_id) {
            session.recommendations_shown += items.len() as u64;
            session.last_served = items.iter().map(|item| item.score.overall).collect();
        }

        Ok(RecommendationList {
            user_id: user_id.to_string(),
            items,
            source,
            empty_reason: None,
            generated_at: now,
        })
    }

    /// Recompute the user's snapshot. Concurrent calls for the same epoch
    /// share one computation; a call for a newer epoch supersedes it and the
    /// older result is discarded. Timeouts keep the previous snapshot.
    pub async fn refresh_recommendations(&self, user_id: &str) -> Result<()> {
        let mut rejoining = false;
        loop {
            let (ticket, pending) = {
                let mut session = self.session_mut(user_id)?;
                if rejoining
                    && session
                        .snapshot
                        .as_ref()
                        .map_or(false, |snapshot| session.is_current(snapshot))
                {
                    return Ok(());
                }
                let joinable = session
                    .inflight
                    .as_ref()
                    .filter(|inflight| inflight.epoch == session.epoch)
                    .map(|inflight| (inflight.ticket, inflight.future.clone()));
                match joinable {
                    Some(pending) => pending,
                    None => self.start_refresh(user_id, &mut session),
                }
            };

            let outcome = pending.await;
            match self.settle(user_id, ticket, outcome) {
                Settled::Done => return Ok(()),
                Settled::Superseded => rejoining = true,
            }
        }
    }

    fn start_refresh(&self, user_id: &str, session: &mut Session) -> (u64, SharedRefresh) {
        session.ticket = self.inner.next_generation();
        let ticket = session.ticket;
        let epoch = session.epoch;
        let preferences = session.preferences.clone();
        let settings = session.settings.clone();

        let inner = Arc::clone(&self.inner);
        let user = user_id.to_string();
        let deadline_ms = self.inner.config.limits.compute_deadline_ms;

        let future = async move {
            let task_user = user.clone();
            let task = tokio::task::spawn_blocking(move || {
                inner.compute_snapshot(&task_user, &preferences, &settings, epoch)
            });
            match tokio::time::timeout(std::time::Duration::from_millis(deadline_ms), task).await {
                Ok(Ok(snapshot)) => Ok(Arc::new(snapshot)),
                Ok(Err(e)) => Err(Arc::new(RecommendationError::Join(e.to_string()))),
                Err(_) => Err(Arc::new(RecommendationError::ComputationTimeout {
                    user_id: user,
                    deadline_ms,
                })),
            }
        }
        .boxed()
        .shared();

        session.inflight = Some(InFlight {
            epoch,
            ticket,
            future: future.clone(),
        });
        (ticket, future)
    }

    /// Apply a finished computation. Only the latest ticket may install its
    /// snapshot; older tickets are dropped and their callers rejoin.
    fn settle(&self, user_id: &str, ticket: u64, outcome: RefreshOutcome) -> Settled {
        let Some(mut session) = self.inner.sessions.get_mut(user_id) else {
            return Settled::Done;
        };

        if ticket < session.ticket {
            log::debug!("{}", RecommendationError::StaleRequestSuperseded(user_id.to_string()));
            return Settled::Superseded;
        }

        let first_to_settle = session
            .inflight
            .as_ref()
            .map_or(false, |inflight| inflight.ticket == ticket);
        if first_to_settle {
            session.inflight = None;
        }

        match outcome {
            Ok(snapshot) => {
                let already_installed = session
                    .snapshot
                    .as_ref()
                    .map_or(false, |installed| Arc::ptr_eq(installed, &snapshot));
                if !already_installed {
                    session.snapshot = Some(snapshot);
                }
            }
            Err(e) if first_to_settle => {
                if session.snapshot.is_some() {
                    log::warn!("{}; serving previous recommendations", e);
                } else {
                    log::warn!("{}; no previous recommendations to fall back on", e);
                }
            }
            Err(_) => {}
        }
        Settled::Done
    }

    /// Users whose snapshot is missing, stale or older than their refresh
    /// interval. Sessions in manual mode (interval 0) are never listed.
    pub fn sessions_due_for_refresh(&self) -> Vec<String> {
        let now = self.inner.clock.now();
        let mut due: Vec<String> = self
            .inner
            .sessions
            .iter()
            .filter(|session| session.settings.refresh_interval_minutes > 0 && session.needs_refresh(now))
            .map(|session| session.key().clone())
            .collect();
        due.sort();
        due
    }

    /// Record one interaction. A repeat of the same user, item and type
    /// within the dedup window is collapsed and `Ok(None)` is returned.
    pub fn record_interaction(&self, new: NewInteraction) -> Result<Option<Interaction>> {
        let now = self.inner.clock.now();
        let timestamp = new.timestamp.unwrap_or(now);
        let key = interaction_key(&new.user_id, &new.item_id, new.interaction_type.as_str());
        let window_ms = self.inner.config.interactions.dedup_window_ms as i64;
        let catalog = self.inner.catalog();

        let recorded = match self.inner.recent.entry(key) {
            Entry::Occupied(mut last) => {
                if (timestamp - *last.get()).num_milliseconds().abs() < window_ms {
                    log::debug!(
                        "Collapsed repeated {} by {} on {}",
                        new.interaction_type,
                        new.user_id,
                        new.item_id
                    );
                    return Ok(None);
                }
                let recorded = self.inner.log.record(new, &catalog, now)?;
                last.insert(timestamp);
                recorded
            }
            Entry::Vacant(slot) => {
                let recorded = self.inner.log.record(new, &catalog, now)?;
                slot.insert(timestamp);
                recorded
            }
        };

        if let Some(mut session) = self.inner.sessions.get_mut(&recorded.user_id) {
            session.epoch = self.inner.next_generation();
            session.interactions += 1;
        }
        if self.inner.recent.len() > DEDUP_PRUNE_THRESHOLD {
            let pruned = self.prune_recent_interactions();
            log::debug!("Pruned {} expired dedup entries", pruned);
        }
        Ok(Some(recorded))
    }

    /// Drop dedup entries older than the window. Returns how many were removed.
    pub fn prune_recent_interactions(&self) -> usize {
        let cutoff = self.inner.clock.now()
            - Duration::milliseconds(self.inner.config.interactions.dedup_window_ms as i64);
        let before = self.inner.recent.len();
        self.inner.recent.retain(|_, last| *last >= cutoff);
        before - self.inner.recent.len()
    }

    pub fn get_stats(&self, user_id: &str) -> Result<RecommendationStats> {
        let session = self.session(user_id)?;
        let now = self.inner.clock.now();
        let catalog = self.inner.catalog();
        let history: Vec<Interaction> = self.inner.log.query(&InteractionFilter::for_user(user_id)).collect();
        let features = self
            .inner
            .extractor
            .user_features(user_id, &history, &catalog, &session.preferences, now);

        let mut top_categories: Vec<CategoryMass> = features
            .category_mass
            .iter()
            .map(|(category, mass)| CategoryMass {
                category: *category,
                mass: *mass,
            })
            .collect();
        top_categories.sort_by(|a, b| b.mass.total_cmp(&a.mass).then(a.category.cmp(&b.category)));

        let total_recommendations = session.last_served.len();
        let average_score = if total_recommendations == 0 {
            0.0
        } else {
            session.last_served.iter().sum::<f64>() / total_recommendations as f64
        };
        let interaction_rate = if session.recommendations_shown == 0 {
            0.0
        } else {
            session.interactions as f64 / session.recommendations_shown as f64
        };

        Ok(RecommendationStats {
            total_recommendations,
            average_score,
            top_categories,
            interactions: session.interactions,
            recommendations_shown: session.recommendations_shown,
            interaction_rate,
        })
    }

    fn session(&self, user_id: &str) -> Result<dashmap::mapref::one::Ref<'_, String, Session>> {
        self.inner
            .sessions
            .get(user_id)
            .ok_or_else(|| no_session(user_id))
    }

    fn session_mut(&self, user_id: &str) -> Result<dashmap::mapref::one::RefMut<'_, String, Session>> {
        self.inner
            .sessions
            .get_mut(user_id)
            .ok_or_else(|| no_session(user_id))
    }
}

fn validate_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(RecommendationError::Validation("user id must not be empty".to_string()));
    }
    Ok(())
}

fn no_session(user_id: &str) -> RecommendationError {
    RecommendationError::Validation(format!("no session loaded for user '{}'", user_id))
}

fn empty_list(user_id: &str, reason: EmptyReason, now: DateTime<Utc>) -> RecommendationList {
    RecommendationList {
        user_id: user_id.to_string(),
        items: Vec::new(),
        source: RecommendationSource::Empty,
        empty_reason: Some(reason),
        generated_at: now,
    }
}
