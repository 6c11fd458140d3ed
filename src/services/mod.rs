pub mod cold_start;
pub mod feature_extractor;
pub mod interaction_log;
pub mod ranker;
pub mod recommendation_service;
pub mod refresh_engine;
pub mod scorer;

pub use interaction_log::{InteractionLog, InteractionStore};
pub use recommendation_service::RecommendationService;
pub use refresh_engine::start_refresh_engine;
