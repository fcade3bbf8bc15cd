use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SandboxParams;
use crate::services::placement_provider::PlacementDecision;
use crate::types::{
    CognitiveType, Concept, InteractionType, SandboxElement, SandboxSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlacementSource {
    Collaborator,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSandbox {
    /// Position in the pre-insertion sequence the sandbox follows.
    pub insert_after_index: usize,
    pub spec: SandboxSpec,
    pub source: PlacementSource,
}

/// Outcome of sandbox planning for one session. Deferral is a first-class
/// value so callers can surface it — a deferred sandbox is never dropped
/// silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SandboxPlacementOutcome {
    Placed(Vec<PlannedSandbox>),
    /// Effective capacity is below the sandbox minimum; placement is pushed
    /// to a later session.
    Deferred { effective_capacity: u32 },
    /// No sandbox-eligible concept was covered this session.
    NotEligible,
}

impl SandboxPlacementOutcome {
    pub fn placed(&self) -> &[PlannedSandbox] {
        match self {
            Self::Placed(planned) => planned,
            _ => &[],
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Applies collaborator decisions with the deterministic fallback mandated
/// for low confidence or collaborator failure. `covered` is in coverage
/// order (earliest first). The minimum-one invariant holds through either
/// path: any session covering at least one concept gets at least one
/// sandbox, unless capacity defers it.
pub fn plan_sandboxes(
    covered: &[&Concept],
    decisions: Option<&[PlacementDecision]>,
    last_synthesis_index: Option<usize>,
    sequence_len: usize,
    effective_capacity: u32,
    params: &SandboxParams,
) -> SandboxPlacementOutcome {
    if covered.is_empty() || sequence_len == 0 {
        return SandboxPlacementOutcome::NotEligible;
    }

    if effective_capacity < params.min_capacity {
        warn!(
            effective_capacity,
            min_capacity = params.min_capacity,
            "sandbox placement deferred: capacity below minimum"
        );
        return SandboxPlacementOutcome::Deferred { effective_capacity };
    }

    let accepted = decisions
        .map(|decisions| accept_decisions(decisions, covered, sequence_len, params))
        .unwrap_or_default();

    if !accepted.is_empty() {
        return SandboxPlacementOutcome::Placed(accepted);
    }

    SandboxPlacementOutcome::Placed(vec![fallback_sandbox(
        covered,
        last_synthesis_index,
        sequence_len,
        params,
    )])
}

fn accept_decisions(
    decisions: &[PlacementDecision],
    covered: &[&Concept],
    sequence_len: usize,
    params: &SandboxParams,
) -> Vec<PlannedSandbox> {
    decisions
        .iter()
        .filter(|d| d.confidence >= params.confidence_floor)
        .filter(|d| !d.concept_ids.is_empty())
        .filter(|d| {
            d.concept_ids
                .iter()
                .all(|id| covered.iter().any(|c| &c.id == id))
        })
        .take(params.max_per_session)
        .map(|d| {
            let targets: Vec<&Concept> = covered
                .iter()
                .filter(|c| d.concept_ids.contains(&c.id))
                .copied()
                .collect();
            PlannedSandbox {
                insert_after_index: d.insert_after_index.min(sequence_len - 1),
                spec: build_spec(&targets, d.interaction_type, d.cognitive_type, params),
                source: PlacementSource::Collaborator,
            }
        })
        .collect()
}

/// Deterministic fallback: exactly one sandbox after the last synthesis
/// phase (or at the sequence end when none ran), targeting the single most
/// complex concept covered, defaulting to matching.
fn fallback_sandbox(
    covered: &[&Concept],
    last_synthesis_index: Option<usize>,
    sequence_len: usize,
    params: &SandboxParams,
) -> PlannedSandbox {
    // Highest tier wins; ties go to the most recently covered.
    let target = covered
        .iter()
        .enumerate()
        .max_by_key(|(position, c)| (c.tier, *position))
        .map(|(_, c)| *c)
        .expect("covered is non-empty");

    PlannedSandbox {
        insert_after_index: last_synthesis_index.unwrap_or(sequence_len - 1),
        spec: build_spec(
            &[target],
            InteractionType::Matching,
            CognitiveType::Recall,
            params,
        ),
        source: PlacementSource::Fallback,
    }
}

fn build_spec(
    targets: &[&Concept],
    interaction: InteractionType,
    cognitive: CognitiveType,
    params: &SandboxParams,
) -> SandboxSpec {
    let elements = if targets.len() > 1 {
        // Cross-concept exercise: one element per concept, term -> definition.
        targets
            .iter()
            .map(|c| SandboxElement {
                id: c.id.clone(),
                label: c.name.clone(),
                expected: c.definition.clone(),
            })
            .collect()
    } else {
        let concept = targets[0];
        if concept.questions.is_empty() {
            vec![SandboxElement {
                id: concept.id.clone(),
                label: concept.name.clone(),
                expected: concept.definition.clone(),
            }]
        } else {
            concept
                .questions
                .iter()
                .take(4)
                .map(|q| SandboxElement {
                    id: q.id.clone(),
                    label: q.prompt.clone(),
                    expected: q.answer.clone(),
                })
                .collect()
        }
    };

    let names = targets
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let prompt = match interaction {
        InteractionType::Matching => format!("Match each prompt about {names} to its answer."),
        InteractionType::Sequencing => format!("Put the steps of {names} in order."),
        InteractionType::FillInBlank => format!("Fill in the blanks about {names}."),
        InteractionType::FreeText => format!("Explain {names} in your own words."),
    };

    SandboxSpec {
        concept_ids: targets.iter().map(|c| c.id.clone()).collect(),
        interaction,
        cognitive,
        prompt,
        elements,
        min_correct_percentage: params.default_min_correct_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConceptTier;

    fn concept(id: &str, tier: ConceptTier) -> Concept {
        Concept {
            id: id.into(),
            name: format!("concept {id}"),
            definition: format!("definition of {id}"),
            tier,
            prerequisite_ids: vec![],
            questions: vec![],
        }
    }

    fn decision(after: usize, ids: &[&str], confidence: f64) -> PlacementDecision {
        PlacementDecision {
            insert_after_index: after,
            concept_ids: ids.iter().map(|s| s.to_string()).collect(),
            interaction_type: InteractionType::Sequencing,
            cognitive_type: CognitiveType::Application,
            confidence,
        }
    }

    #[test]
    fn confident_decisions_are_accepted() {
        let params = SandboxParams::default();
        let c1 = concept("c1", ConceptTier::Core);
        let c2 = concept("c2", ConceptTier::Supporting);
        let decisions = vec![decision(3, &["c1"], 0.8), decision(5, &["c2"], 0.75)];

        let outcome = plan_sandboxes(&[&c1, &c2], Some(&decisions), Some(4), 8, 10, &params);
        let placed = outcome.placed();
        assert_eq!(placed.len(), 2);
        assert!(placed
            .iter()
            .all(|p| p.source == PlacementSource::Collaborator));
    }

    #[test]
    fn low_confidence_falls_back_to_deterministic_rule() {
        let params = SandboxParams::default();
        let c1 = concept("c1", ConceptTier::Enrichment);
        let c2 = concept("c2", ConceptTier::Core);
        let decisions = vec![decision(3, &["c1"], 0.4)];

        let outcome = plan_sandboxes(&[&c1, &c2], Some(&decisions), Some(4), 8, 10, &params);
        let placed = outcome.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].source, PlacementSource::Fallback);
        assert_eq!(placed[0].insert_after_index, 4);
        assert_eq!(placed[0].spec.concept_ids, vec!["c2".to_string()]);
        assert_eq!(placed[0].spec.interaction, InteractionType::Matching);
    }

    #[test]
    fn collaborator_failure_still_places_one_sandbox() {
        let params = SandboxParams::default();
        let c1 = concept("c1", ConceptTier::Supporting);

        let outcome = plan_sandboxes(&[&c1], None, None, 6, 10, &params);
        let placed = outcome.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].source, PlacementSource::Fallback);
        assert_eq!(placed[0].insert_after_index, 5);
    }

    #[test]
    fn low_capacity_defers_observably() {
        let params = SandboxParams::default();
        let c1 = concept("c1", ConceptTier::Core);

        let outcome = plan_sandboxes(&[&c1], None, None, 3, 2, &params);
        assert!(outcome.is_deferred());
        assert!(outcome.placed().is_empty());
    }

    #[test]
    fn no_covered_concepts_is_not_eligible() {
        let params = SandboxParams::default();
        let outcome = plan_sandboxes(&[], None, None, 0, 10, &params);
        assert!(matches!(outcome, SandboxPlacementOutcome::NotEligible));
    }

    #[test]
    fn decisions_are_capped_at_max_per_session() {
        let params = SandboxParams::default();
        let concepts: Vec<Concept> = (0..5)
            .map(|i| concept(&format!("c{i}"), ConceptTier::Supporting))
            .collect();
        let refs: Vec<&Concept> = concepts.iter().collect();
        let decisions: Vec<PlacementDecision> = (0..5)
            .map(|i| PlacementDecision {
                insert_after_index: i,
                concept_ids: vec![format!("c{i}")],
                interaction_type: InteractionType::Matching,
                cognitive_type: CognitiveType::Recall,
                confidence: 0.9,
            })
            .collect();

        let outcome = plan_sandboxes(&refs, Some(&decisions), None, 10, 10, &params);
        assert_eq!(outcome.placed().len(), params.max_per_session);
    }

    #[test]
    fn unknown_concept_ids_are_rejected() {
        let params = SandboxParams::default();
        let c1 = concept("c1", ConceptTier::Supporting);
        let decisions = vec![decision(0, &["ghost"], 0.95)];

        let outcome = plan_sandboxes(&[&c1], Some(&decisions), None, 4, 10, &params);
        let placed = outcome.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].source, PlacementSource::Fallback);
    }
}
