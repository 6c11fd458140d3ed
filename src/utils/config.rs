use std::path::Path;

use crate::error::{RecommendationError, Result};
use crate::models::EngineConfig;

const ENV_HALF_LIFE_DAYS: &str = "CAMPUSREC_HALF_LIFE_DAYS";
const ENV_MAX_CANDIDATES: &str = "CAMPUSREC_MAX_CANDIDATES";
const ENV_COMPUTE_DEADLINE_MS: &str = "CAMPUSREC_COMPUTE_DEADLINE_MS";
const ENV_DEDUP_WINDOW_MS: &str = "CAMPUSREC_DEDUP_WINDOW_MS";

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Load engine configuration: `.env`, then the JSON file (if it exists), then
/// `CAMPUSREC_*` overrides. The result is validated before it is returned.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    load_dotenv();

    let mut config = match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(p)
                .map_err(|e| RecommendationError::Storage(anyhow::anyhow!("{}: {}", p.display(), e)))?;
            serde_json::from_str(&content)?
        }
        _ => EngineConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    config.validate()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| RecommendationError::Storage(e.into()))?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| RecommendationError::Storage(e.into()))?;
    Ok(())
}

pub fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env_value::<f64, _>(&lookup, ENV_HALF_LIFE_DAYS)? {
        config.scoring.half_life_days = v;
    }
    if let Some(v) = env_value::<usize, _>(&lookup, ENV_MAX_CANDIDATES)? {
        config.limits.max_candidates = v;
    }
    if let Some(v) = env_value::<u64, _>(&lookup, ENV_COMPUTE_DEADLINE_MS)? {
        config.limits.compute_deadline_ms = v;
    }
    if let Some(v) = env_value::<u64, _>(&lookup, ENV_DEDUP_WINDOW_MS)? {
        config.interactions.dedup_window_ms = v;
    }
    Ok(())
}

fn env_value<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw,
        None => return Ok(None),
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| RecommendationError::Validation(format!("{} has an invalid value '{}'", key, raw)))
}
