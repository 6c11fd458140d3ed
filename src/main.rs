use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use campusrec::database::SqliteStore;
use campusrec::utils::config;
use campusrec::RecommendationService;

const DEFAULT_CONFIG_FILE: &str = "campusrec.json";

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: campusrec <db-path> <user-id> [limit]");
    }
    let db_path = Path::new(&args[0]);
    let user_id = args[1].as_str();
    let limit = args
        .get(2)
        .map(|raw| raw.parse::<usize>().with_context(|| format!("invalid limit '{}'", raw)))
        .transpose()?;

    let config_path = std::env::var("CAMPUSREC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let engine_config = config::load_config(Some(&config_path))?;

    let store = Arc::new(
        SqliteStore::open(db_path).with_context(|| format!("failed to open {}", db_path.display()))?,
    );
    let stats = store.storage_stats()?;
    log::info!(
        "Opened {} ({} items, {} interactions, {} users)",
        db_path.display(),
        stats.items_count,
        stats.interactions_count,
        stats.users_count
    );

    let service = RecommendationService::open(store, engine_config)?;
    service.load_session_from_store(user_id)?;
    let list = service.get_recommendations(user_id, None, limit).await?;

    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}
