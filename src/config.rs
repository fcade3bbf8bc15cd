use serde::{Deserialize, Serialize};

use crate::types::InteractionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityParams {
    /// Item budget for a fully rested learner at a neutral hour.
    pub base_capacity: u32,
    /// Lower bound applied to every modifier curve.
    pub modifier_floor: f64,
    /// Upper bound applied to every modifier curve.
    pub modifier_ceiling: f64,
    /// Hours of sleep below which the sleep modifier bottoms out.
    pub sleep_floor_hours: f64,
    /// Sleep band treated as fully rested (modifier peaks here).
    pub sleep_optimal_hours: f64,
    /// Capacity penalty per recent session in the fatigue counter.
    pub fatigue_per_session: f64,
    /// percentage_used at or above this is a high warning.
    pub high_warning_threshold: f64,
    /// percentage_used at or above this is a moderate warning.
    pub moderate_warning_threshold: f64,
    /// percentage_used at or above this disables new-concept intake.
    pub new_item_cutoff: f64,
}

impl Default for CapacityParams {
    fn default() -> Self {
        Self {
            base_capacity: 12,
            modifier_floor: 0.6,
            modifier_ceiling: 1.2,
            sleep_floor_hours: 4.0,
            sleep_optimal_hours: 7.5,
            fatigue_per_session: 0.08,
            high_warning_threshold: 0.9,
            moderate_warning_threshold: 0.7,
            new_item_cutoff: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingParams {
    /// Canonical-answer tokens this short are treated as stop words and
    /// discarded before the overlap check.
    pub stop_token_max_len: usize,
    /// Fraction of the kept tokens the learner's answer must contain.
    pub min_token_overlap: f64,
    /// Attempt count beyond which a pass still rates Again.
    pub max_attempts_before_again: u32,
    /// Hints beyond this many rate Hard.
    pub max_hints_before_hard: u32,
    /// time_ratio above this rates Hard.
    pub slow_time_ratio: f64,
    /// time_ratio below this (with no hints) rates Easy.
    pub fast_time_ratio: f64,
    /// Baseline for plain quiz questions, in milliseconds.
    pub quiz_baseline_ms: i64,
    /// Fixed component of a sandbox baseline, per interaction type.
    pub sandbox_base_ms: SandboxBaselines,
    /// Additional milliseconds per interactive element.
    pub sandbox_per_element_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxBaselines {
    pub matching: i64,
    pub sequencing: i64,
    pub fill_in_blank: i64,
    pub free_text: i64,
}

impl SandboxBaselines {
    pub fn for_interaction(&self, interaction: InteractionType) -> i64 {
        match interaction {
            InteractionType::Matching => self.matching,
            InteractionType::Sequencing => self.sequencing,
            InteractionType::FillInBlank => self.fill_in_blank,
            InteractionType::FreeText => self.free_text,
        }
    }
}

impl Default for GradingParams {
    fn default() -> Self {
        Self {
            stop_token_max_len: 3,
            min_token_overlap: 0.5,
            max_attempts_before_again: 3,
            max_hints_before_hard: 1,
            slow_time_ratio: 2.0,
            fast_time_ratio: 0.8,
            quiz_baseline_ms: 12_000,
            sandbox_base_ms: SandboxBaselines {
                matching: 20_000,
                sequencing: 25_000,
                fill_in_blank: 18_000,
                free_text: 45_000,
            },
            sandbox_per_element_ms: 6_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentParams {
    /// Pretest percentage at or above which the learner may proceed.
    pub proceed_threshold: f64,
    /// Pretest percentage at or above which review is suggested (below the
    /// proceed threshold); anything lower makes review required.
    pub review_suggested_threshold: f64,
}

impl Default for AssessmentParams {
    fn default() -> Self {
        Self {
            proceed_threshold: 0.8,
            review_suggested_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderParams {
    /// Question items each new concept contributes after its intro.
    pub questions_per_new_concept: usize,
}

impl Default for BuilderParams {
    fn default() -> Self {
        Self {
            questions_per_new_concept: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisParams {
    /// Inclusive bounds of the jittered chapter interval.
    pub min_interval: u32,
    pub max_interval: u32,
    /// Synthesis connects at least this many concepts; windows with fewer
    /// available are skipped, not forced.
    pub min_concepts: usize,
    /// At most this many concepts are forwarded to the prompt generator.
    pub max_concepts: usize,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            min_interval: 5,
            max_interval: 6,
            min_concepts: 3,
            max_concepts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxParams {
    /// Collaborator decisions below this confidence fall back to the
    /// deterministic rule.
    pub confidence_floor: f64,
    pub min_per_session: usize,
    pub max_per_session: usize,
    /// Effective capacity below this defers sandbox placement entirely.
    pub min_capacity: u32,
    /// Default pass threshold for generated sandbox specs.
    pub default_min_correct_percentage: f64,
}

impl Default for SandboxParams {
    fn default() -> Self {
        Self {
            confidence_floor: 0.6,
            min_per_session: 1,
            max_per_session: 3,
            min_capacity: 4,
            default_min_correct_percentage: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsefulnessParams {
    /// Weight of normalized retention lift in the composite score.
    pub retention_weight: f64,
    /// Weight of the engagement composite.
    pub engagement_weight: f64,
}

impl Default for UsefulnessParams {
    fn default() -> Self {
        Self {
            retention_weight: 0.6,
            engagement_weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub capacity: CapacityParams,
    pub grading: GradingParams,
    pub assessment: AssessmentParams,
    pub builder: BuilderParams,
    pub synthesis: SynthesisParams,
    pub sandbox: SandboxParams,
    pub usefulness: UsefulnessParams,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u32>("LEARNLOOP_BASE_CAPACITY") {
            config.capacity.base_capacity = val.max(1);
        }
        if let Some(val) = env_parse::<f64>("LEARNLOOP_MIN_TOKEN_OVERLAP") {
            config.grading.min_token_overlap = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<usize>("LEARNLOOP_STOP_TOKEN_MAX_LEN") {
            config.grading.stop_token_max_len = val;
        }
        if let Some(val) = env_parse::<f64>("LEARNLOOP_SANDBOX_CONFIDENCE_FLOOR") {
            config.sandbox.confidence_floor = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<u32>("LEARNLOOP_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = val.max(1);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = EngineConfig::default();
        assert!(config.capacity.modifier_floor < config.capacity.modifier_ceiling);
        assert!(
            config.capacity.moderate_warning_threshold < config.capacity.high_warning_threshold
        );
        assert!(config.synthesis.min_interval <= config.synthesis.max_interval);
        assert!(config.synthesis.min_concepts <= config.synthesis.max_concepts);
        assert!(config.sandbox.min_per_session <= config.sandbox.max_per_session);
        let w = &config.usefulness;
        assert!((w.retention_weight + w.engagement_weight - 1.0).abs() < 1e-9);
    }
}
