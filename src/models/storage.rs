use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageStats {
    pub items_count: i64,
    pub interactions_count: i64,
    pub users_count: i64,
    pub oldest_interaction: Option<DateTime<Utc>>,
    pub newest_interaction: Option<DateTime<Utc>>,
}
