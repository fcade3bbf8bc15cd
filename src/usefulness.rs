use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::UsefulnessParams;
use crate::types::{CognitiveType, InteractionType, SandboxResult};

pub type UsefulnessKey = (InteractionType, CognitiveType);

/// Numerically stable incremental mean; no raw history is retained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingMean {
    count: u64,
    mean: f64,
}

impl StreamingMean {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Per-(interaction, cognitive) aggregate, updated online after every
/// sandbox result and every later review of an exposed concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionUsefulness {
    pub interaction: InteractionType,
    pub cognitive: CognitiveType,
    pub attempts: u64,
    pub completions: u64,
    completion_rate: StreamingMean,
    time_ratio: StreamingMean,
    hint_rate: StreamingMean,
    retry_rate: StreamingMean,
    /// Recall outcomes on later reviews of sandbox-exposed concepts.
    retention: StreamingMean,
}

impl InteractionUsefulness {
    fn new(interaction: InteractionType, cognitive: CognitiveType) -> Self {
        Self {
            interaction,
            cognitive,
            attempts: 0,
            completions: 0,
            completion_rate: StreamingMean::default(),
            time_ratio: StreamingMean::default(),
            hint_rate: StreamingMean::default(),
            retry_rate: StreamingMean::default(),
            retention: StreamingMean::default(),
        }
    }

    fn record(&mut self, result: &SandboxResult) {
        self.attempts += 1;
        if result.completed {
            self.completions += 1;
        }
        self.completion_rate
            .push(if result.completed { 1.0 } else { 0.0 });
        self.time_ratio.push(result.time_ratio.max(0.0));
        self.hint_rate
            .push(if result.hints_used > 0 { 1.0 } else { 0.0 });
        self.retry_rate
            .push(if result.attempt_count > 1 { 1.0 } else { 0.0 });
    }

    /// Composite of the engagement sub-metrics, in [0, 1].
    pub fn engagement_score(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        let time_component = (2.0 - self.time_ratio.mean()).clamp(0.0, 1.0);
        let score = 0.4 * self.completion_rate.mean()
            + 0.2 * time_component
            + 0.2 * (1.0 - self.hint_rate.mean())
            + 0.2 * (1.0 - self.retry_rate.mean());
        score.clamp(0.0, 1.0)
    }

    /// sandbox-exposed retention minus the quiz-only baseline, in [-1, 1].
    /// Zero until at least one later review of an exposed concept occurred.
    pub fn retention_lift(&self, quiz_only_baseline: f64) -> f64 {
        if self.retention.count() == 0 {
            return 0.0;
        }
        (self.retention.mean() - quiz_only_baseline).clamp(-1.0, 1.0)
    }

    pub fn sample_size(&self) -> u64 {
        self.attempts
    }
}

/// One row of the snapshot handed to placement. `sample_size` is exposed so
/// callers can treat thin aggregates as exploration candidates; the tracker
/// does not apply that policy itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsefulnessSnapshot {
    pub interaction: InteractionType,
    pub cognitive: CognitiveType,
    pub retention_lift: f64,
    pub engagement_score: f64,
    pub usefulness_score: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone)]
pub struct UsefulnessTracker {
    params: UsefulnessParams,
    by_key: HashMap<UsefulnessKey, InteractionUsefulness>,
    quiz_only_retention: StreamingMean,
    /// Concept id -> the sandbox key it was last exercised through.
    exposed: HashMap<String, UsefulnessKey>,
}

impl UsefulnessTracker {
    pub fn new(params: UsefulnessParams) -> Self {
        Self {
            params,
            by_key: HashMap::new(),
            quiz_only_retention: StreamingMean::default(),
            exposed: HashMap::new(),
        }
    }

    pub fn record_result(&mut self, result: &SandboxResult) {
        let key = (result.interaction, result.cognitive);
        self.by_key
            .entry(key)
            .or_insert_with(|| InteractionUsefulness::new(key.0, key.1))
            .record(result);

        for concept_id in &result.concept_ids {
            self.exposed.insert(concept_id.clone(), key);
        }
    }

    /// Attributes a later review of `concept_id` either to the sandbox that
    /// exercised it or to the quiz-only baseline.
    pub fn record_review_outcome(&mut self, concept_id: &str, recalled: bool) {
        let value = if recalled { 1.0 } else { 0.0 };
        match self.exposed.get(concept_id) {
            Some(key) => {
                if let Some(aggregate) = self.by_key.get_mut(key) {
                    aggregate.retention.push(value);
                }
            }
            None => self.quiz_only_retention.push(value),
        }
    }

    pub fn usefulness_score(&self, aggregate: &InteractionUsefulness) -> f64 {
        let lift = aggregate.retention_lift(self.quiz_only_retention.mean());
        let normalized_lift = (lift + 1.0) / 2.0;
        self.params.retention_weight * normalized_lift
            + self.params.engagement_weight * aggregate.engagement_score()
    }

    pub fn get(&self, interaction: InteractionType, cognitive: CognitiveType) -> Option<&InteractionUsefulness> {
        self.by_key.get(&(interaction, cognitive))
    }

    /// `(attempts, completions)` across every interaction type.
    pub fn totals(&self) -> (u64, u64) {
        self.by_key.values().fold((0, 0), |(attempts, completions), aggregate| {
            (attempts + aggregate.attempts, completions + aggregate.completions)
        })
    }

    pub fn snapshot(&self) -> Vec<UsefulnessSnapshot> {
        let baseline = self.quiz_only_retention.mean();
        let mut rows: Vec<UsefulnessSnapshot> = self
            .by_key
            .values()
            .map(|aggregate| UsefulnessSnapshot {
                interaction: aggregate.interaction,
                cognitive: aggregate.cognitive,
                retention_lift: aggregate.retention_lift(baseline),
                engagement_score: aggregate.engagement_score(),
                usefulness_score: self.usefulness_score(aggregate),
                sample_size: aggregate.sample_size(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.usefulness_score
                .partial_cmp(&a.usefulness_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }
}
