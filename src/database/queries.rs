use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::{
    Interaction, InteractionFilter, InteractionMetadata, Item, ItemCounters, ItemMetadata, ItemStatus,
    RecommendationSettings, StorageStats, UserPreferences,
};

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} is out of range", ms))
}

fn status_str(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Active => "active",
        ItemStatus::Cancelled => "cancelled",
    }
}

fn settings_key(user_id: &str) -> String {
    format!("recommendation_settings:{}", user_id)
}

pub fn upsert_item(conn: &Connection, item: &Item) -> Result<()> {
    let categories = serde_json::to_string(&item.categories)?;
    let tags = serde_json::to_string(&item.tags)?;
    let metadata_blob = serde_json::to_vec(&item.metadata)?;

    conn.execute(
        "INSERT INTO items
         (id, item_type, title, categories, tags, metadata, views, clicks, bookmarks,
          registrations, rating_mean, rating_count, status, starts_at, ends_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
             item_type = excluded.item_type,
             title = excluded.title,
             categories = excluded.categories,
             tags = excluded.tags,
             metadata = excluded.metadata,
             views = excluded.views,
             clicks = excluded.clicks,
             bookmarks = excluded.bookmarks,
             registrations = excluded.registrations,
             rating_mean = excluded.rating_mean,
             rating_count = excluded.rating_count,
             status = excluded.status,
             starts_at = excluded.starts_at,
             ends_at = excluded.ends_at,
             updated_at = excluded.updated_at",
        rusqlite::params![
            &item.id,
            item.item_type.as_str(),
            &item.title,
            &categories,
            &tags,
            &metadata_blob,
            item.counters.views as i64,
            item.counters.clicks as i64,
            item.counters.bookmarks as i64,
            item.counters.registrations as i64,
            item.counters.rating_mean,
            item.counters.rating_count as i64,
            status_str(item.status),
            item.starts_at.map(to_millis),
            item.ends_at.map(to_millis),
            Utc::now().timestamp_millis(),
        ],
    )?;

    Ok(())
}

struct ItemRow {
    id: String,
    item_type: String,
    title: String,
    categories: String,
    tags: Option<String>,
    metadata: Option<Vec<u8>>,
    counters: (i64, i64, i64, i64, f64, i64),
    status: String,
    starts_at: Option<i64>,
    ends_at: Option<i64>,
}

impl ItemRow {
    fn into_item(self) -> Result<Item> {
        let status = match self.status.as_str() {
            "active" => ItemStatus::Active,
            "cancelled" => ItemStatus::Cancelled,
            other => return Err(anyhow!("item '{}' has unknown status '{}'", self.id, other)),
        };
        let (views, clicks, bookmarks, registrations, rating_mean, rating_count) = self.counters;

        Ok(Item {
            item_type: self.item_type.parse()?,
            title: self.title,
            categories: serde_json::from_str(&self.categories)?,
            tags: self
                .tags
                .map(|t| serde_json::from_str(&t))
                .transpose()?
                .unwrap_or_default(),
            metadata: self
                .metadata
                .map(|b| serde_json::from_slice::<ItemMetadata>(&b))
                .transpose()?
                .unwrap_or_default(),
            counters: ItemCounters {
                views: views.max(0) as u64,
                clicks: clicks.max(0) as u64,
                bookmarks: bookmarks.max(0) as u64,
                registrations: registrations.max(0) as u64,
                rating_mean,
                rating_count: rating_count.max(0) as u64,
            },
            status,
            starts_at: self.starts_at.map(from_millis).transpose()?,
            ends_at: self.ends_at.map(from_millis).transpose()?,
            id: self.id,
        })
    }
}

pub fn load_items(conn: &Connection) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_type, title, categories, tags, metadata, views, clicks, bookmarks,
                registrations, rating_mean, rating_count, status, starts_at, ends_at
         FROM items
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ItemRow {
                id: row.get(0)?,
                item_type: row.get(1)?,
                title: row.get(2)?,
                categories: row.get(3)?,
                tags: row.get(4)?,
                metadata: row.get(5)?,
                counters: (
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                ),
                status: row.get(12)?,
                starts_at: row.get(13)?,
                ends_at: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(ItemRow::into_item).collect()
}

pub fn insert_interaction(conn: &Connection, interaction: &Interaction) -> Result<i64> {
    let metadata_blob = interaction
        .metadata
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()?;

    conn.execute(
        "INSERT INTO interactions
         (uuid, sequence, user_id, item_id, item_type, interaction_type, timestamp, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            interaction.id.to_string(),
            interaction.sequence as i64,
            &interaction.user_id,
            &interaction.item_id,
            interaction.item_type.as_str(),
            interaction.interaction_type.as_str(),
            to_millis(interaction.timestamp),
            &metadata_blob,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

struct InteractionRow {
    uuid: String,
    sequence: i64,
    user_id: String,
    item_id: String,
    item_type: String,
    interaction_type: String,
    timestamp: i64,
    metadata: Option<Vec<u8>>,
}

impl InteractionRow {
    fn into_interaction(self) -> Result<Interaction> {
        Ok(Interaction {
            id: Uuid::parse_str(&self.uuid)?,
            sequence: self.sequence.max(0) as u64,
            user_id: self.user_id,
            item_id: self.item_id,
            item_type: self.item_type.parse()?,
            interaction_type: self.interaction_type.parse()?,
            timestamp: from_millis(self.timestamp)?,
            metadata: self
                .metadata
                .map(|b| serde_json::from_slice::<InteractionMetadata>(&b))
                .transpose()?,
        })
    }
}

/// Interactions matching `filter`, oldest first.
pub fn load_interactions(conn: &Connection, filter: &InteractionFilter) -> Result<Vec<Interaction>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(user_id) = &filter.user_id {
        params.push(Box::new(user_id.clone()));
        conditions.push(format!("user_id = ?{}", params.len()));
    }
    if let Some(item_id) = &filter.item_id {
        params.push(Box::new(item_id.clone()));
        conditions.push(format!("item_id = ?{}", params.len()));
    }
    if let Some(since) = filter.since {
        params.push(Box::new(to_millis(since)));
        conditions.push(format!("timestamp >= ?{}", params.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT uuid, sequence, user_id, item_id, item_type, interaction_type, timestamp, metadata
         FROM interactions
         {}
         ORDER BY timestamp ASC, sequence ASC",
        where_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(InteractionRow {
                uuid: row.get(0)?,
                sequence: row.get(1)?,
                user_id: row.get(2)?,
                item_id: row.get(3)?,
                item_type: row.get(4)?,
                interaction_type: row.get(5)?,
                timestamp: row.get(6)?,
                metadata: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(InteractionRow::into_interaction).collect()
}

pub fn save_preferences(conn: &Connection, user_id: &str, preferences: &UserPreferences) -> Result<()> {
    let value = serde_json::to_vec(preferences)?;
    conn.execute(
        "INSERT INTO user_preferences (user_id, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        rusqlite::params![user_id, value, Utc::now().timestamp()],
    )?;
    Ok(())
}

pub fn load_preferences(conn: &Connection, user_id: &str) -> Result<Option<UserPreferences>> {
    let value: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM user_preferences WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.map(|v| serde_json::from_slice(&v)).transpose()?)
}

pub fn save_settings(conn: &Connection, user_id: &str, settings: &RecommendationSettings) -> Result<()> {
    let value = serde_json::to_vec(settings)?;
    conn.execute(
        "INSERT INTO settings (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        rusqlite::params![settings_key(user_id), value, Utc::now().timestamp()],
    )?;
    Ok(())
}

pub fn load_settings(conn: &Connection, user_id: &str) -> Result<Option<RecommendationSettings>> {
    let value: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [settings_key(user_id)],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value.map(|v| serde_json::from_slice(&v)).transpose()?)
}

pub fn get_storage_stats(conn: &Connection) -> Result<StorageStats> {
    let items_count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;

    let (interactions_count, users_count, oldest, newest): (i64, i64, Option<i64>, Option<i64>) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT user_id), MIN(timestamp), MAX(timestamp) FROM interactions",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    Ok(StorageStats {
        items_count,
        interactions_count,
        users_count,
        oldest_interaction: oldest.map(from_millis).transpose()?,
        newest_interaction: newest.map(from_millis).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InteractionType, ItemType, PreferenceCategory, SkillLevel};
    use chrono::Duration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::database::schema::create_tables(&conn).unwrap();
        conn
    }

    fn interaction(user: &str, item: &str, kind: InteractionType, at: DateTime<Utc>, sequence: u64) -> Interaction {
        Interaction {
            id: Uuid::new_v4(),
            sequence,
            user_id: user.into(),
            item_id: item.into(),
            item_type: ItemType::Event,
            interaction_type: kind,
            timestamp: at,
            metadata: None,
        }
    }

    #[test]
    fn items_survive_a_round_trip_through_sqlite() {
        let conn = conn();
        let start = Utc.timestamp_millis_opt(1_760_000_000_000).unwrap();
        let mut item = Item::new("e1", ItemType::Event, "Robotics demo")
            .with_categories([PreferenceCategory::Technology, PreferenceCategory::Academic])
            .with_tags(["robots", "demo"])
            .with_schedule(Some(start), Some(start + Duration::hours(2)));
        item.metadata.skill_level = Some(SkillLevel::Intermediate);
        item.counters.views = 12;
        item.counters.add_rating(4.0);

        upsert_item(&conn, &item).unwrap();
        let loaded = load_items(&conn).unwrap();
        assert_eq!(loaded, vec![item.clone()]);

        item.status = ItemStatus::Cancelled;
        upsert_item(&conn, &item).unwrap();
        assert_eq!(load_items(&conn).unwrap()[0].status, ItemStatus::Cancelled);
    }

    #[test]
    fn interactions_filter_and_order_by_time() {
        let conn = conn();
        let t0 = Utc.timestamp_millis_opt(1_760_000_000_000).unwrap();
        insert_interaction(&conn, &interaction("u1", "b", InteractionType::Click, t0 + Duration::seconds(10), 2)).unwrap();
        insert_interaction(&conn, &interaction("u1", "a", InteractionType::View, t0, 1)).unwrap();
        insert_interaction(&conn, &interaction("u2", "a", InteractionType::Skip, t0 + Duration::seconds(5), 3)).unwrap();

        let all = load_interactions(&conn, &InteractionFilter::default()).unwrap();
        let sequences: Vec<u64> = all.iter().map(|i| i.sequence).collect();
        assert_eq!(sequences, vec![1, 3, 2]);

        let user = load_interactions(&conn, &InteractionFilter::for_user("u1")).unwrap();
        assert_eq!(user.len(), 2);

        let recent = load_interactions(
            &conn,
            &InteractionFilter::for_item("a").since(t0 + Duration::seconds(1)),
        )
        .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "u2");
    }

    #[test]
    fn preferences_and_settings_are_keyed_per_user() {
        let conn = conn();
        assert!(load_preferences(&conn, "u1").unwrap().is_none());

        let prefs = UserPreferences::with_categories([PreferenceCategory::Music]);
        save_preferences(&conn, "u1", &prefs).unwrap();
        assert_eq!(load_preferences(&conn, "u1").unwrap(), Some(prefs));
        assert!(load_preferences(&conn, "u2").unwrap().is_none());

        let mut settings = RecommendationSettings::default();
        settings.max_recommendations = 3;
        save_settings(&conn, "u1", &settings).unwrap();
        settings.max_recommendations = 5;
        save_settings(&conn, "u1", &settings).unwrap();
        assert_eq!(load_settings(&conn, "u1").unwrap().unwrap().max_recommendations, 5);
    }

    #[test]
    fn storage_stats_count_distinct_users() {
        let conn = conn();
        let t0 = Utc.timestamp_millis_opt(1_760_000_000_000).unwrap();
        insert_interaction(&conn, &interaction("u1", "a", InteractionType::View, t0, 1)).unwrap();
        insert_interaction(&conn, &interaction("u1", "a", InteractionType::Click, t0 + Duration::seconds(3), 2)).unwrap();
        insert_interaction(&conn, &interaction("u2", "a", InteractionType::View, t0 + Duration::seconds(9), 3)).unwrap();

        let stats = get_storage_stats(&conn).unwrap();
        assert_eq!(stats.interactions_count, 3);
        assert_eq!(stats.users_count, 2);
        assert_eq!(stats.oldest_interaction, Some(t0));
        assert_eq!(stats.newest_interaction, Some(t0 + Duration::seconds(9)));
    }
}
