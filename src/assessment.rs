use serde::{Deserialize, Serialize};

use crate::config::AssessmentParams;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssessmentPhase {
    Checking,
    Offer,
    Pretest,
    Gaps,
    MiniLesson,
    Learning,
}

impl AssessmentPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Offer => "offer",
            Self::Pretest => "pretest",
            Self::Gaps => "gaps",
            Self::MiniLesson => "miniLesson",
            Self::Learning => "learning",
        }
    }
}

/// External events driving the machine. Each transition is triggered by
/// exactly one of these; all suspension lives in the event producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum AssessmentEvent {
    PrerequisitesLoaded { prerequisite_ids: Vec<String> },
    /// The prerequisite-check collaborator failed; non-fatal, the learner
    /// proceeds straight to learning.
    PrerequisiteCheckFailed { reason: String },
    OfferAccepted,
    OfferDeclined,
    PretestCompleted { analysis: PrerequisiteGapAnalysis },
    PretestSkipped,
    GapLessonStarted { prerequisite_id: String },
    LessonFinished,
    ProceedToLearning,
}

impl AssessmentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrerequisitesLoaded { .. } => "prerequisitesLoaded",
            Self::PrerequisiteCheckFailed { .. } => "prerequisiteCheckFailed",
            Self::OfferAccepted => "offerAccepted",
            Self::OfferDeclined => "offerDeclined",
            Self::PretestCompleted { .. } => "pretestCompleted",
            Self::PretestSkipped => "pretestSkipped",
            Self::GapLessonStarted { .. } => "gapLessonStarted",
            Self::LessonFinished => "lessonFinished",
            Self::ProceedToLearning => "proceedToLearning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapRecommendation {
    Proceed,
    ReviewSuggested,
    ReviewRequired,
}

impl GapRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::ReviewSuggested => "review_suggested",
            Self::ReviewRequired => "review_required",
        }
    }
}

/// Derived once after pretest completion; immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteGapAnalysis {
    pub total_prerequisites: usize,
    pub correct_count: usize,
    pub percentage: f64,
    pub recommendation: GapRecommendation,
    /// Prerequisite ids answered incorrectly.
    pub gaps: Vec<String>,
}

pub fn analyze_gaps(
    answers: &[(String, bool)],
    params: &AssessmentParams,
) -> PrerequisiteGapAnalysis {
    let total_prerequisites = answers.len();
    let correct_count = answers.iter().filter(|(_, correct)| *correct).count();
    let percentage = if total_prerequisites == 0 {
        1.0
    } else {
        correct_count as f64 / total_prerequisites as f64
    };
    let gaps: Vec<String> = answers
        .iter()
        .filter(|(_, correct)| !correct)
        .map(|(id, _)| id.clone())
        .collect();

    let recommendation = if percentage >= params.proceed_threshold {
        GapRecommendation::Proceed
    } else if percentage >= params.review_suggested_threshold {
        GapRecommendation::ReviewSuggested
    } else {
        GapRecommendation::ReviewRequired
    };

    PrerequisiteGapAnalysis {
        total_prerequisites,
        correct_count,
        percentage,
        recommendation,
        gaps,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTransition {
    pub from: AssessmentPhase,
    pub to: AssessmentPhase,
    pub trigger: String,
    pub timestamp_ms: i64,
}

/// Pure transition function: `(phase, event) -> next phase`, or `None` when
/// the event is not legal in the phase. `Learning` is terminal.
pub fn next_phase(phase: AssessmentPhase, event: &AssessmentEvent) -> Option<AssessmentPhase> {
    use AssessmentEvent as E;
    use AssessmentPhase as P;

    match (phase, event) {
        (P::Checking, E::PrerequisitesLoaded { prerequisite_ids }) => {
            if prerequisite_ids.is_empty() {
                Some(P::Learning)
            } else {
                Some(P::Offer)
            }
        }
        (P::Checking, E::PrerequisiteCheckFailed { .. }) => Some(P::Learning),
        (P::Offer, E::OfferAccepted) => Some(P::Pretest),
        (P::Offer, E::OfferDeclined) => Some(P::Learning),
        (P::Pretest, E::PretestCompleted { analysis }) => {
            if analysis.gaps.is_empty() {
                Some(P::Learning)
            } else {
                Some(P::Gaps)
            }
        }
        (P::Pretest, E::PretestSkipped) => Some(P::Learning),
        (P::Gaps, E::GapLessonStarted { .. }) => Some(P::MiniLesson),
        (P::Gaps, E::ProceedToLearning) => Some(P::Learning),
        (P::MiniLesson, E::LessonFinished) => Some(P::Gaps),
        _ => None,
    }
}

const HISTORY_LIMIT: usize = 64;

/// Wraps the phase value with transition history and the durable flags the
/// rest of the session reads.
#[derive(Debug, Clone)]
pub struct AssessmentMachine {
    phase: AssessmentPhase,
    history: Vec<PhaseTransition>,
    prerequisite_ids: Vec<String>,
    analysis: Option<PrerequisiteGapAnalysis>,
    did_skip_pretest: bool,
}

impl AssessmentMachine {
    pub fn new() -> Self {
        Self {
            phase: AssessmentPhase::Checking,
            history: Vec::new(),
            prerequisite_ids: Vec::new(),
            analysis: None,
            did_skip_pretest: false,
        }
    }

    pub fn phase(&self) -> AssessmentPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn prerequisite_ids(&self) -> &[String] {
        &self.prerequisite_ids
    }

    /// Gap analysis from the completed pretest, if one ran.
    pub fn analysis(&self) -> Option<&PrerequisiteGapAnalysis> {
        self.analysis.as_ref()
    }

    /// Durable for the rest of the session once set; surfaced to the
    /// learning UI, never silently dropped.
    pub fn did_skip_pretest(&self) -> bool {
        self.did_skip_pretest
    }

    pub fn apply(&mut self, event: AssessmentEvent) -> Result<PhaseTransition, EngineError> {
        let Some(to) = next_phase(self.phase, &event) else {
            return Err(EngineError::state(
                "INVALID_ASSESSMENT_TRANSITION",
                format!(
                    "event {} is not valid in phase {}",
                    event.name(),
                    self.phase.as_str()
                ),
            ));
        };

        match &event {
            AssessmentEvent::PrerequisitesLoaded { prerequisite_ids } => {
                self.prerequisite_ids = prerequisite_ids.clone();
            }
            AssessmentEvent::PrerequisiteCheckFailed { reason } => {
                tracing::warn!(reason = %reason, "prerequisite check failed, defaulting to learning");
            }
            AssessmentEvent::PretestCompleted { analysis } => {
                self.analysis = Some(analysis.clone());
            }
            AssessmentEvent::PretestSkipped | AssessmentEvent::OfferDeclined => {
                self.did_skip_pretest = true;
            }
            _ => {}
        }

        let transition = PhaseTransition {
            from: self.phase,
            to,
            trigger: event.name().to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.phase = to;
        self.history.push(transition.clone());
        if self.history.len() > HISTORY_LIMIT {
            let extra = self.history.len() - HISTORY_LIMIT;
            self.history.drain(0..extra);
        }

        Ok(transition)
    }
}

impl Default for AssessmentMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_with_gaps(gaps: &[&str]) -> PrerequisiteGapAnalysis {
        let answers: Vec<(String, bool)> = gaps
            .iter()
            .map(|id| (id.to_string(), false))
            .chain(std::iter::once(("known".to_string(), true)))
            .collect();
        analyze_gaps(&answers, &AssessmentParams::default())
    }

    #[test]
    fn empty_prerequisites_short_circuit_to_learning() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisitesLoaded {
                prerequisite_ids: vec![],
            })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Learning);
    }

    #[test]
    fn full_remediation_loop() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisitesLoaded {
                prerequisite_ids: vec!["p1".into(), "p2".into()],
            })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Offer);

        machine.apply(AssessmentEvent::OfferAccepted).unwrap();
        machine
            .apply(AssessmentEvent::PretestCompleted {
                analysis: analysis_with_gaps(&["p1"]),
            })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Gaps);

        machine
            .apply(AssessmentEvent::GapLessonStarted {
                prerequisite_id: "p1".into(),
            })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::MiniLesson);

        machine.apply(AssessmentEvent::LessonFinished).unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Gaps);

        machine.apply(AssessmentEvent::ProceedToLearning).unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Learning);
        assert!(!machine.did_skip_pretest());
    }

    #[test]
    fn clean_pretest_bypasses_gaps() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisitesLoaded {
                prerequisite_ids: vec!["p1".into()],
            })
            .unwrap();
        machine.apply(AssessmentEvent::OfferAccepted).unwrap();
        let analysis = analyze_gaps(&[("p1".into(), true)], &AssessmentParams::default());
        machine
            .apply(AssessmentEvent::PretestCompleted { analysis })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Learning);
    }

    #[test]
    fn skipping_pretest_sets_durable_flag_and_never_enters_gaps() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisitesLoaded {
                prerequisite_ids: vec!["p1".into()],
            })
            .unwrap();
        machine.apply(AssessmentEvent::OfferAccepted).unwrap();
        machine.apply(AssessmentEvent::PretestSkipped).unwrap();

        assert_eq!(machine.phase(), AssessmentPhase::Learning);
        assert!(machine.did_skip_pretest());
        assert!(machine
            .history()
            .iter()
            .all(|t| t.to != AssessmentPhase::Gaps));
    }

    #[test]
    fn collaborator_failure_is_non_fatal() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisiteCheckFailed {
                reason: "network unreachable".into(),
            })
            .unwrap();
        assert_eq!(machine.phase(), AssessmentPhase::Learning);
    }

    #[test]
    fn learning_is_terminal() {
        let mut machine = AssessmentMachine::new();
        machine
            .apply(AssessmentEvent::PrerequisitesLoaded {
                prerequisite_ids: vec![],
            })
            .unwrap();
        let err = machine.apply(AssessmentEvent::OfferAccepted).unwrap_err();
        assert_eq!(err.code(), "INVALID_ASSESSMENT_TRANSITION");
    }

    #[test]
    fn gap_analysis_thresholds() {
        let params = AssessmentParams::default();
        let answers: Vec<(String, bool)> = (0..10)
            .map(|i| (format!("p{i}"), i < 9))
            .collect();
        let analysis = analyze_gaps(&answers, &params);
        assert_eq!(analysis.recommendation, GapRecommendation::Proceed);
        assert_eq!(analysis.gaps, vec!["p9".to_string()]);

        let answers: Vec<(String, bool)> = (0..10).map(|i| (format!("p{i}"), i < 6)).collect();
        let analysis = analyze_gaps(&answers, &params);
        assert_eq!(analysis.recommendation, GapRecommendation::ReviewSuggested);

        let answers: Vec<(String, bool)> = (0..10).map(|i| (format!("p{i}"), i < 2)).collect();
        let analysis = analyze_gaps(&answers, &params);
        assert_eq!(analysis.recommendation, GapRecommendation::ReviewRequired);
    }
}
