use serde::{Deserialize, Serialize};

use crate::error::RecommendationError;

/// Process-wide engine configuration, loaded from `campusrec.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub version: String,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub limits: ComputeLimits,
    #[serde(default)]
    pub interactions: InteractionSettings,
    #[serde(default)]
    pub defaults: RecommendationSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            scoring: ScoringConfig::default(),
            limits: ComputeLimits::default(),
            interactions: InteractionSettings::default(),
            defaults: RecommendationSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), RecommendationError> {
        self.scoring.validate()?;
        self.limits.validate()?;
        self.defaults.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    #[serde(default = "default_reason_threshold")]
    pub reason_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            half_life_days: default_half_life_days(),
            reason_threshold: default_reason_threshold(),
        }
    }
}

fn default_half_life_days() -> f64 {
    14.0
}

fn default_reason_threshold() -> f64 {
    15.0
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), RecommendationError> {
        self.weights.validate()?;
        if !self.half_life_days.is_finite() || self.half_life_days <= 0.0 {
            return Err(RecommendationError::Validation(
                "half_life_days must be a positive number".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.reason_threshold) {
            return Err(RecommendationError::Validation(
                "reason_threshold must be within [0, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// The four blending weights behind `overall`. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    pub relevance: f64,
    pub personalization: f64,
    pub popularity: f64,
    pub timeliness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            relevance: 0.35,
            personalization: 0.30,
            popularity: 0.20,
            timeliness: 0.15,
        }
    }
}

impl ScoringWeights {
    const SUM_TOLERANCE: f64 = 1e-6;

    pub fn validate(&self) -> Result<(), RecommendationError> {
        let parts = [self.relevance, self.personalization, self.popularity, self.timeliness];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RecommendationError::Validation(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(RecommendationError::Validation(format!(
                "scoring weights must sum to 1.0 (got {:.6})",
                sum
            )));
        }
        Ok(())
    }

    /// Weighted blend of the four signals, rounded to a whole score.
    pub fn combine(&self, relevance: f64, personalization: f64, popularity: f64, timeliness: f64) -> f64 {
        (self.relevance * relevance
            + self.personalization * personalization
            + self.popularity * popularity
            + self.timeliness * timeliness)
            .round()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeLimits {
    pub max_candidates: usize,
    pub compute_deadline_ms: u64,
}

impl Default for ComputeLimits {
    fn default() -> Self {
        Self {
            max_candidates: 5000,
            compute_deadline_ms: 2000,
        }
    }
}

impl ComputeLimits {
    pub fn validate(&self) -> Result<(), RecommendationError> {
        if self.max_candidates == 0 {
            return Err(RecommendationError::Validation(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        if self.compute_deadline_ms == 0 {
            return Err(RecommendationError::Validation(
                "compute_deadline_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionSettings {
    pub dedup_window_ms: u64,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self { dedup_window_ms: 1000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartStrategy {
    #[default]
    Popular,
    Diverse,
    Random,
    CategoryBased,
}

/// Per-user (or per-deployment) recommendation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationSettings {
    pub max_recommendations: usize,
    pub refresh_interval_minutes: u64,
    pub enable_explanations: bool,
    pub diversity_factor: f64,
    pub exploration_rate: f64,
    #[serde(default)]
    pub cold_start_strategy: ColdStartStrategy,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            max_recommendations: 10,
            refresh_interval_minutes: 30,
            enable_explanations: true,
            diversity_factor: 0.3,
            exploration_rate: 0.1,
            cold_start_strategy: ColdStartStrategy::Popular,
            random_seed: None,
        }
    }
}

impl RecommendationSettings {
    pub fn validate(&self) -> Result<(), RecommendationError> {
        if self.max_recommendations == 0 {
            return Err(RecommendationError::Validation(
                "max_recommendations must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.diversity_factor) {
            return Err(RecommendationError::Validation(
                "diversity_factor must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(RecommendationError::Validation(
                "exploration_rate must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn weights_must_sum_to_one() {
        let weights = ScoringWeights {
            relevance: 0.5,
            personalization: 0.5,
            popularity: 0.5,
            timeliness: 0.0,
        };
        assert!(weights.validate().is_err());

        let negative = ScoringWeights {
            relevance: 1.2,
            personalization: -0.2,
            popularity: 0.0,
            timeliness: 0.0,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn combine_uses_default_profile() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.combine(80.0, 90.0, 50.0, 100.0), 80.0);
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let mut settings = RecommendationSettings::default();
        settings.diversity_factor = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = RecommendationSettings::default();
        settings.max_recommendations = 0;
        assert!(settings.validate().is_err());

        let mut settings = RecommendationSettings::default();
        settings.exploration_rate = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"version":"1.0.0","scoring":{"half_life_days":7.0}}"#).unwrap();
        assert_eq!(config.scoring.half_life_days, 7.0);
        assert_eq!(config.scoring.reason_threshold, 15.0);
        assert_eq!(config.limits, ComputeLimits::default());
    }
}
