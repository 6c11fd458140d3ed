use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::database::queries;
use crate::models::{Interaction, InteractionFilter, Item, RecommendationSettings, StorageStats, UserPreferences};
use crate::services::interaction_log::InteractionStore;

/// SQLite-backed persistence for the catalog, the interaction log and
/// per-user preferences/settings.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::from_connection(super::init_database(db_path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(super::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    pub fn upsert_items(&self, items: &[Item]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for item in items {
            queries::upsert_item(&tx, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_items(&self) -> Result<Vec<Item>> {
        queries::load_items(&*self.conn()?)
    }

    pub fn save_preferences(&self, user_id: &str, preferences: &UserPreferences) -> Result<()> {
        queries::save_preferences(&*self.conn()?, user_id, preferences)
    }

    pub fn load_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        queries::load_preferences(&*self.conn()?, user_id)
    }

    pub fn save_settings(&self, user_id: &str, settings: &RecommendationSettings) -> Result<()> {
        queries::save_settings(&*self.conn()?, user_id, settings)
    }

    pub fn load_settings(&self, user_id: &str) -> Result<Option<RecommendationSettings>> {
        queries::load_settings(&*self.conn()?, user_id)
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        queries::get_storage_stats(&*self.conn()?)
    }
}

impl InteractionStore for SqliteStore {
    fn append(&self, interaction: &Interaction) -> Result<()> {
        queries::insert_interaction(&*self.conn()?, interaction)?;
        Ok(())
    }

    fn load(&self, filter: &InteractionFilter) -> Result<Vec<Interaction>> {
        queries::load_interactions(&*self.conn()?, filter)
    }
}
