use std::time::Duration;
use tokio::task::JoinHandle;

use crate::services::recommendation_service::RecommendationService;

// Sessions are checked once a minute; each session's own interval decides
// whether it is actually recomputed.
const REFRESH_TICK_SECS: u64 = 60;

/// Spawn the timer that keeps session snapshots within their refresh
/// interval. Abort the returned handle to stop it.
pub fn start_refresh_engine(service: RecommendationService) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("Refresh engine started (checks every {}s)", REFRESH_TICK_SECS);

        loop {
            tokio::time::sleep(Duration::from_secs(REFRESH_TICK_SECS)).await;
            let refreshed = run_refresh_pass(&service).await;
            if refreshed > 0 {
                log::debug!("Refresh pass recomputed {} sessions", refreshed);
            }
        }
    })
}

/// One pass over every loaded session. Returns how many were refreshed.
pub async fn run_refresh_pass(service: &RecommendationService) -> usize {
    let pruned = service.prune_recent_interactions();
    if pruned > 0 {
        log::debug!("Pruned {} expired dedup entries", pruned);
    }

    let mut refreshed = 0;
    for user_id in service.sessions_due_for_refresh() {
        match service.refresh_recommendations(&user_id).await {
            Ok(()) => refreshed += 1,
            Err(e) => log::error!("Background refresh failed for {}: {}", user_id, e),
        }
    }
    refreshed
}
