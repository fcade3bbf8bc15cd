use serde::{Deserialize, Serialize};

use crate::config::BuilderParams;
use crate::types::{Concept, Question, SessionItem};

/// A due review ready to be placed: the concept plus the question chosen for
/// this pass over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    pub concept_id: String,
    pub question: Question,
}

impl ReviewCandidate {
    pub fn from_concept(concept: &Concept, pass_index: usize) -> Self {
        let question = if concept.questions.is_empty() {
            Question::definition_probe(concept)
        } else {
            concept.questions[pass_index % concept.questions.len()].clone()
        };
        Self {
            concept_id: concept.id.clone(),
            question,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseSequence {
    pub items: Vec<SessionItem>,
    pub review_count: usize,
    /// New concepts that contributed at least one item, in placement order.
    pub new_concept_ids: Vec<String>,
}

/// Both pools empty is a distinct "nothing to learn" outcome (everything
/// mastered), not an initialization failure.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Built(BaseSequence),
    NothingToLearn,
}

/// Interleaves due reviews and new concepts under the capacity budget.
/// Reviews are never starved: they take up to `min(|review_pool|, capacity)`
/// slots first, and new items only fill whatever budget remains. Each new
/// concept contributes an intro item plus question items drawn round-robin
/// from its bank (indices wrap modulo the bank length, so banks of any size
/// are reusable without exhaustion).
pub fn build_base_sequence(
    review_pool: &[ReviewCandidate],
    new_pool: &[Concept],
    capacity: u32,
    params: &BuilderParams,
) -> BuildOutcome {
    if review_pool.is_empty() && new_pool.is_empty() {
        return BuildOutcome::NothingToLearn;
    }

    let capacity = capacity.max(1) as usize;
    let review_take = review_pool.len().min(capacity);
    let mut items: Vec<SessionItem> = review_pool[..review_take]
        .iter()
        .map(|candidate| SessionItem::Review {
            concept_id: candidate.concept_id.clone(),
            question: candidate.question.clone(),
        })
        .collect();

    // Budget fully consumed by reviews leaves the new list empty; expected,
    // not an error.
    let mut budget = capacity - review_take;
    let mut new_concept_ids = Vec::new();

    'concepts: for concept in new_pool {
        if budget == 0 {
            break;
        }

        items.push(SessionItem::New {
            concept_id: concept.id.clone(),
            question: Question::definition_probe(concept),
            is_intro: true,
        });
        new_concept_ids.push(concept.id.clone());
        budget -= 1;

        if concept.questions.is_empty() {
            continue;
        }
        for question_index in 0..params.questions_per_new_concept {
            if budget == 0 {
                break 'concepts;
            }
            let question = &concept.questions[question_index % concept.questions.len()];
            items.push(SessionItem::New {
                concept_id: concept.id.clone(),
                question: question.clone(),
                is_intro: false,
            });
            budget -= 1;
        }
    }

    BuildOutcome::Built(BaseSequence {
        items,
        review_count: review_take,
        new_concept_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConceptTier, QuestionKind};

    fn question(id: &str, concept_id: &str) -> Question {
        Question {
            id: id.into(),
            concept_id: concept_id.into(),
            kind: QuestionKind::MultipleChoice,
            prompt: format!("prompt {id}"),
            answer: "a".into(),
            options: vec!["a".into(), "b".into()],
        }
    }

    fn concept(id: &str, bank_size: usize) -> Concept {
        Concept {
            id: id.into(),
            name: format!("concept {id}"),
            definition: format!("definition of {id}"),
            tier: ConceptTier::Supporting,
            prerequisite_ids: vec![],
            questions: (0..bank_size)
                .map(|i| question(&format!("{id}-q{i}"), id))
                .collect(),
        }
    }

    fn reviews(n: usize) -> Vec<ReviewCandidate> {
        (0..n)
            .map(|i| ReviewCandidate::from_concept(&concept(&format!("r{i}"), 2), 0))
            .collect()
    }

    #[test]
    fn reviews_take_priority_over_new() {
        let review_pool = reviews(3);
        let new_pool = vec![concept("n0", 3), concept("n1", 3)];
        let BuildOutcome::Built(sequence) =
            build_base_sequence(&review_pool, &new_pool, 4, &BuilderParams::default())
        else {
            panic!("expected a built sequence");
        };

        assert_eq!(sequence.review_count, 3);
        assert_eq!(sequence.items.len(), 4);
        assert!(matches!(sequence.items[0], SessionItem::Review { .. }));
        assert!(matches!(sequence.items[1], SessionItem::Review { .. }));
        assert!(matches!(sequence.items[2], SessionItem::Review { .. }));
        assert!(
            matches!(&sequence.items[3], SessionItem::New { is_intro, .. } if *is_intro)
        );
        assert_eq!(sequence.new_concept_ids, vec!["n0".to_string()]);
    }

    #[test]
    fn overfull_review_queue_drops_new_items_never_reviews() {
        let review_pool = reviews(10);
        let new_pool = vec![concept("n0", 3)];
        let BuildOutcome::Built(sequence) =
            build_base_sequence(&review_pool, &new_pool, 6, &BuilderParams::default())
        else {
            panic!("expected a built sequence");
        };

        assert_eq!(sequence.review_count, 6);
        assert_eq!(sequence.items.len(), 6);
        assert!(sequence.new_concept_ids.is_empty());
    }

    #[test]
    fn review_count_law_holds_when_queue_is_small() {
        let review_pool = reviews(2);
        let BuildOutcome::Built(sequence) =
            build_base_sequence(&review_pool, &[], 8, &BuilderParams::default())
        else {
            panic!("expected a built sequence");
        };
        assert_eq!(sequence.review_count, 2);
        assert_eq!(sequence.items.len(), 2);
    }

    #[test]
    fn question_bank_wraps_round_robin() {
        let mut params = BuilderParams::default();
        params.questions_per_new_concept = 3;
        let new_pool = vec![concept("n0", 2)];

        let BuildOutcome::Built(sequence) =
            build_base_sequence(&[], &new_pool, 10, &params)
        else {
            panic!("expected a built sequence");
        };

        // Intro + 3 questions; the bank of 2 wraps back to question 0.
        assert_eq!(sequence.items.len(), 4);
        let question_ids: Vec<&str> = sequence
            .items
            .iter()
            .filter_map(|item| match item {
                SessionItem::New {
                    question, is_intro, ..
                } if !is_intro => Some(question.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(question_ids, vec!["n0-q0", "n0-q1", "n0-q0"]);
    }

    #[test]
    fn empty_pools_are_nothing_to_learn() {
        assert!(matches!(
            build_base_sequence(&[], &[], 5, &BuilderParams::default()),
            BuildOutcome::NothingToLearn
        ));
    }

    #[test]
    fn empty_bank_concept_contributes_only_intro() {
        let new_pool = vec![concept("n0", 0), concept("n1", 1)];
        let BuildOutcome::Built(sequence) =
            build_base_sequence(&[], &new_pool, 10, &BuilderParams::default())
        else {
            panic!("expected a built sequence");
        };
        assert_eq!(sequence.new_concept_ids.len(), 2);
        // n0: intro only; n1: intro + its single question repeated per config.
        assert!(sequence.items.len() >= 3);
    }
}
