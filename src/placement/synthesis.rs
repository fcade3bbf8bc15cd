use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::SynthesisParams;
use crate::error::EngineError;
use crate::types::Concept;

/// Interval-based synthesis timing with jitter. The interval is redrawn
/// uniformly from `[min_interval, max_interval]` after every trigger so the
/// learner cannot anticipate synthesis placement.
///
/// Takes an injectable random source; tests force both interval values
/// deterministically.
pub struct SynthesisScheduler {
    params: SynthesisParams,
    rng: Box<dyn RngCore + Send>,
    current_interval: u32,
}

impl SynthesisScheduler {
    pub fn new(params: SynthesisParams) -> Self {
        Self::with_rng(params, Box::new(StdRng::from_os_rng()))
    }

    pub fn with_rng(params: SynthesisParams, rng: Box<dyn RngCore + Send>) -> Self {
        let mut scheduler = Self {
            params,
            rng,
            current_interval: 0,
        };
        scheduler.current_interval = scheduler.draw_interval();
        scheduler
    }

    pub fn current_interval(&self) -> u32 {
        self.current_interval
    }

    /// True iff enough progress units have elapsed since the last synthesis.
    /// Non-positive progress never triggers. On trigger, the interval for
    /// the next window is redrawn as a side effect.
    pub fn should_insert(&mut self, progress_count: i64, last_synthesis_at: i64) -> bool {
        if progress_count <= 0 {
            return false;
        }
        if progress_count - last_synthesis_at >= self.current_interval as i64 {
            self.current_interval = self.draw_interval();
            return true;
        }
        false
    }

    fn draw_interval(&mut self) -> u32 {
        let min = self.params.min_interval;
        let max = self.params.max_interval.max(min);
        (&mut *self.rng).random_range(min..=max)
    }
}

/// The outgoing request for one synthesis prompt, ready for the
/// text-generation collaborator.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub concept_ids: Vec<String>,
    pub system_prompt: String,
    pub user_message: String,
}

const SYNTHESIS_SYSTEM_PROMPT: &str = "You write short synthesis prompts for a learning session. \
Given several concepts the learner just covered, produce one open question that asks the learner \
to connect them. One or two sentences, no preamble.";

/// Builds the synthesis request from the most recently covered concepts
/// (most recent first). Rejects fewer than `min_concepts` before any
/// collaborator call is made; forwards at most `max_concepts`.
pub fn build_synthesis_request(
    concepts: &[&Concept],
    params: &SynthesisParams,
) -> Result<SynthesisRequest, EngineError> {
    if concepts.len() < params.min_concepts {
        return Err(EngineError::validation(
            "SYNTHESIS_TOO_FEW_CONCEPTS",
            format!(
                "synthesis needs at least {} concepts, got {}",
                params.min_concepts,
                concepts.len()
            ),
        ));
    }

    let forwarded = &concepts[..concepts.len().min(params.max_concepts)];
    let listing = forwarded
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.definition))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(SynthesisRequest {
        concept_ids: forwarded.iter().map(|c| c.id.clone()).collect(),
        system_prompt: SYNTHESIS_SYSTEM_PROMPT.to_string(),
        user_message: format!("Concepts just covered:\n{listing}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConceptTier;

    /// RngCore stub returning a constant word, driving random_range to a
    /// fixed end of the interval.
    struct ConstRng(u64);

    impl RngCore for ConstRng {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for chunk in dest.chunks_mut(8) {
                let bytes = self.0.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    fn concept(id: &str) -> Concept {
        Concept {
            id: id.into(),
            name: format!("concept {id}"),
            definition: format!("definition of {id}"),
            tier: ConceptTier::Supporting,
            prerequisite_ids: vec![],
            questions: vec![],
        }
    }

    #[test]
    fn interval_is_always_within_bounds() {
        let mut scheduler = SynthesisScheduler::new(SynthesisParams::default());
        for _ in 0..50 {
            let interval = scheduler.current_interval();
            assert!((5..=6).contains(&interval));
            // Force a trigger to redraw.
            assert!(scheduler.should_insert(interval as i64, 0));
        }
    }

    #[test]
    fn injectable_rng_forces_both_branches() {
        let low = SynthesisScheduler::with_rng(SynthesisParams::default(), Box::new(ConstRng(0)));
        assert_eq!(low.current_interval(), 5);

        let high =
            SynthesisScheduler::with_rng(SynthesisParams::default(), Box::new(ConstRng(u64::MAX)));
        assert_eq!(high.current_interval(), 6);
    }

    #[test]
    fn non_positive_progress_never_triggers() {
        let mut scheduler =
            SynthesisScheduler::with_rng(SynthesisParams::default(), Box::new(ConstRng(0)));
        assert!(!scheduler.should_insert(0, 0));
        assert!(!scheduler.should_insert(-3, -10));
    }

    #[test]
    fn gap_of_six_always_triggers() {
        for word in [0, u64::MAX] {
            let mut scheduler =
                SynthesisScheduler::with_rng(SynthesisParams::default(), Box::new(ConstRng(word)));
            assert!(scheduler.should_insert(6, 0));
        }
    }

    #[test]
    fn progress_behind_last_synthesis_never_triggers() {
        let mut scheduler =
            SynthesisScheduler::with_rng(SynthesisParams::default(), Box::new(ConstRng(0)));
        assert!(!scheduler.should_insert(4, 4));
        assert!(!scheduler.should_insert(3, 8));
    }

    #[test]
    fn too_few_concepts_rejected_before_any_call() {
        let params = SynthesisParams::default();
        let c1 = concept("c1");
        let c2 = concept("c2");
        let err = build_synthesis_request(&[&c1, &c2], &params).unwrap_err();
        assert_eq!(err.code(), "SYNTHESIS_TOO_FEW_CONCEPTS");
    }

    #[test]
    fn at_most_five_concepts_forwarded() {
        let params = SynthesisParams::default();
        let concepts: Vec<Concept> = (0..7).map(|i| concept(&format!("c{i}"))).collect();
        let refs: Vec<&Concept> = concepts.iter().collect();
        let request = build_synthesis_request(&refs, &params).unwrap();
        assert_eq!(request.concept_ids.len(), 5);
        assert!(!request.concept_ids.contains(&"c5".to_string()));
        assert!(!request.user_message.contains("concept c5"));
        assert!(!request.user_message.contains("concept c6"));
    }
}
