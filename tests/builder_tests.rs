//! Cross-module scenario tests for the session builder and the placement
//! invariants it feeds.

use learnloop::config::{BuilderParams, SandboxParams, SynthesisParams};
use learnloop::placement::sandbox::{plan_sandboxes, SandboxPlacementOutcome};
use learnloop::placement::synthesis::SynthesisScheduler;
use learnloop::session::builder::{build_base_sequence, BuildOutcome, ReviewCandidate};
use learnloop::types::{Concept, ConceptTier, Question, QuestionKind, SessionItem};

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

fn concept(id: &str, tier: ConceptTier, bank_size: usize) -> Concept {
    Concept {
        id: id.into(),
        name: format!("concept {id}"),
        definition: format!("definition of {id}"),
        tier,
        prerequisite_ids: vec![],
        questions: (0..bank_size)
            .map(|i| question(&format!("{id}-q{i}"), id))
            .collect(),
    }
}

fn review_pool(n: usize) -> Vec<ReviewCandidate> {
    (0..n)
        .map(|i| {
            ReviewCandidate::from_concept(&concept(&format!("r{i}"), ConceptTier::Supporting, 2), 0)
        })
        .collect()
}

#[test]
fn three_reviews_ten_new_capacity_four() {
    let reviews = review_pool(3);
    let new_pool: Vec<Concept> = (0..10)
        .map(|i| concept(&format!("n{i}"), ConceptTier::Supporting, 3))
        .collect();

    let BuildOutcome::Built(sequence) =
        build_base_sequence(&reviews, &new_pool, 4, &BuilderParams::default())
    else {
        panic!("expected a built sequence");
    };

    let review_items = sequence
        .items
        .iter()
        .filter(|i| matches!(i, SessionItem::Review { .. }))
        .count();
    let new_items = sequence
        .items
        .iter()
        .filter(|i| matches!(i, SessionItem::New { .. }))
        .count();
    assert_eq!(review_items, 3);
    assert_eq!(new_items, 1);
    // Reviews come first, new items after.
    assert!(matches!(sequence.items[0], SessionItem::Review { .. }));
    assert!(matches!(sequence.items[3], SessionItem::New { .. }));
}

#[test]
fn review_queue_at_capacity_yields_no_new_items() {
    let reviews = review_pool(8);
    let new_pool = vec![concept("n0", ConceptTier::Core, 2)];

    let BuildOutcome::Built(sequence) =
        build_base_sequence(&reviews, &new_pool, 8, &BuilderParams::default())
    else {
        panic!("expected a built sequence");
    };
    assert_eq!(sequence.review_count, 8);
    assert!(sequence.new_concept_ids.is_empty());
}

#[test]
fn scheduler_randomness_is_non_degenerate() {
    let mut scheduler = SynthesisScheduler::new(SynthesisParams::default());
    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        let interval = scheduler.current_interval();
        assert!((5..=6).contains(&interval));
        seen.insert(interval);
        // Trigger to force a redraw.
        assert!(scheduler.should_insert(interval as i64, 0));
    }
    assert!(seen.contains(&5), "interval 5 never drawn over 200 trials");
    assert!(seen.contains(&6), "interval 6 never drawn over 200 trials");
}

#[test]
fn minimum_one_sandbox_through_the_fallback_path() {
    let params = SandboxParams::default();
    let c1 = concept("c1", ConceptTier::Enrichment, 2);
    let c2 = concept("c2", ConceptTier::Core, 2);
    let covered = vec![&c1, &c2];

    // No collaborator decisions at all: the deterministic fallback must
    // still place exactly one sandbox on the most complex concept.
    let outcome = plan_sandboxes(&covered, None, Some(3), 6, 10, &params);
    let placed = outcome.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].spec.concept_ids, vec!["c2".to_string()]);
    assert_eq!(placed[0].insert_after_index, 3);
}

#[test]
fn deferral_is_observable_not_silent() {
    let params = SandboxParams::default();
    let c1 = concept("c1", ConceptTier::Core, 2);

    let outcome = plan_sandboxes(&[&c1], None, None, 4, params.min_capacity - 1, &params);
    match outcome {
        SandboxPlacementOutcome::Deferred { effective_capacity } => {
            assert_eq!(effective_capacity, params.min_capacity - 1);
        }
        other => panic!("expected deferral, got {other:?}"),
    }
}

#[test]
fn post_insertion_overhead_is_bounded() {
    // Base sequence at capacity, then the documented overhead: at most one
    // synthesis per interval window plus the sandbox cap.
    let reviews = review_pool(12);
    let BuildOutcome::Built(sequence) =
        build_base_sequence(&reviews, &[], 12, &BuilderParams::default())
    else {
        panic!("expected a built sequence");
    };
    let params = SandboxParams::default();
    let concepts: Vec<Concept> = (0..12)
        .map(|i| concept(&format!("r{i}"), ConceptTier::Supporting, 2))
        .collect();
    let covered: Vec<&Concept> = concepts.iter().collect();

    let decisions = vec![];
    let outcome = plan_sandboxes(
        &covered,
        Some(&decisions),
        None,
        sequence.items.len(),
        12,
        &params,
    );
    assert!(outcome.placed().len() <= params.max_per_session);

    let max_synthesis_windows = sequence.items.len() / 5;
    let bound = sequence.items.len() + max_synthesis_windows + params.max_per_session;
    assert!(sequence.items.len() + outcome.placed().len() + max_synthesis_windows <= bound);
}
