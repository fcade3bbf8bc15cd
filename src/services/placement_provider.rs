use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EngineError;
use crate::services::llm_provider::{generate_structured, GenerateOptions, TextGenerator};
use crate::types::{CognitiveType, ConceptTier, InteractionType, MasteryState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoveredConcept {
    pub id: String,
    pub name: String,
    pub tier: ConceptTier,
    pub mastery: MasteryState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPreference {
    pub interaction: InteractionType,
    pub cognitive: CognitiveType,
    pub usefulness_score: f64,
    pub sample_size: u64,
}

/// Everything the placement collaborator sees when deciding where and what
/// sandbox exercises to insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementContext {
    pub covered_concepts: Vec<CoveredConcept>,
    pub sequence_len: usize,
    pub last_synthesis_index: Option<usize>,
    pub prior_sandbox_attempts: u32,
    pub prior_sandbox_completions: u32,
    pub preferences: Vec<InteractionPreference>,
    pub min_count: usize,
    pub max_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDecision {
    pub insert_after_index: usize,
    pub concept_ids: Vec<String>,
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub cognitive_type: CognitiveType,
    pub confidence: f64,
}

/// Distinct capability from the plain text generator so hosts can swap or
/// disable it independently.
#[async_trait]
pub trait PlacementProvider: Send + Sync {
    async fn decide_placements(
        &self,
        context: &PlacementContext,
    ) -> Result<Vec<PlacementDecision>, EngineError>;
}

const PLACEMENT_SYSTEM_PROMPT: &str = "You place interactive sandbox exercises inside a learning session. \
Given the covered concepts, mastery states, prior sandbox performance and per-interaction usefulness weights, \
respond with a JSON array of decisions: \
[{\"insertAfterIndex\": number, \"conceptIds\": [string], \"interactionType\": \"matching\"|\"sequencing\"|\"fillInBlank\"|\"freeText\", \
\"cognitiveType\": \"recall\"|\"application\"|\"analysis\", \"confidence\": number}]. \
Prefer interaction types with high usefulness scores, but treat small sample sizes as exploration candidates. \
Respond with JSON only.";

pub struct LlmPlacementProvider {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
}

impl LlmPlacementProvider {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            options: GenerateOptions {
                temperature: 0.3,
                ..Default::default()
            },
        }
    }

    pub fn with_options(generator: Arc<dyn TextGenerator>, options: GenerateOptions) -> Self {
        Self { generator, options }
    }
}

#[async_trait]
impl PlacementProvider for LlmPlacementProvider {
    async fn decide_placements(
        &self,
        context: &PlacementContext,
    ) -> Result<Vec<PlacementDecision>, EngineError> {
        let user_message = serde_json::to_string(context)
            .map_err(|e| EngineError::collaborator(e.into()))?;

        let decisions: Vec<PlacementDecision> = generate_structured(
            self.generator.as_ref(),
            PLACEMENT_SYSTEM_PROMPT,
            &user_message,
            &self.options,
        )
        .await
        .map_err(EngineError::collaborator)?;

        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_provider::parse_structured;

    #[test]
    fn decision_deserializes_from_collaborator_json() {
        let raw = r#"[{"insertAfterIndex": 4, "conceptIds": ["c1", "c2"], "interactionType": "sequencing", "cognitiveType": "application", "confidence": 0.82}]"#;
        let decisions: Vec<PlacementDecision> = parse_structured(raw).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].insert_after_index, 4);
        assert_eq!(decisions[0].interaction_type, InteractionType::Sequencing);
        assert!((decisions[0].confidence - 0.82).abs() < 1e-9);
    }

    #[test]
    fn cognitive_type_defaults_when_absent() {
        let raw = r#"[{"insertAfterIndex": 0, "conceptIds": ["c1"], "interactionType": "matching", "confidence": 0.9}]"#;
        let decisions: Vec<PlacementDecision> = parse_structured(raw).unwrap();
        assert_eq!(decisions[0].cognitive_type, CognitiveType::Recall);
    }
}
