use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assessment::{
    analyze_gaps, AssessmentEvent, AssessmentMachine, AssessmentPhase, PhaseTransition,
};
use crate::capacity::{compute_capacity, CapacitySignals, CognitiveCapacity};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grading::{baseline_ms, derive_rating, grade_answer, score_sandbox, RetrievalOutcome};
use crate::placement::sandbox::plan_sandboxes;
use crate::placement::synthesis::{build_synthesis_request, SynthesisRequest, SynthesisScheduler};
use crate::services::llm_provider::{
    generate_structured, GenerateOptions, TextGenerator,
};
use crate::services::placement_provider::{
    CoveredConcept, InteractionPreference, PlacementContext, PlacementDecision, PlacementProvider,
};
use crate::services::store::ConceptStore;
use crate::session::builder::{build_base_sequence, BuildOutcome, ReviewCandidate};
use crate::types::{
    Concept, GradedAnswer, MasteryRecord, MasteryState, Question, Rating, RatingEvent,
    SandboxResponse, SessionItem,
};
use crate::usefulness::UsefulnessTracker;

/// Learner response to the current item.
#[derive(Debug, Clone)]
pub enum AnswerPayload {
    Text(String),
    Sandbox {
        response: SandboxResponse,
        attempt_count: u32,
        hints_used: u32,
    },
}

#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub session_id: String,
    pub items: Vec<SessionItem>,
    pub capacity: CognitiveCapacity,
    pub synthesis_count: usize,
    pub sandbox_count: usize,
    /// True when the minimum-one sandbox was deferred for low capacity; the
    /// host surfaces this to the learner.
    pub sandbox_deferred: bool,
    pub did_skip_pretest: bool,
}

/// Distinguishes "everything mastered" from an initialization failure, which
/// surfaces as an `Err` instead.
#[derive(Debug, Clone)]
pub enum BuildResult {
    Built(SessionPlan),
    NothingToLearn,
}

#[derive(Debug, Clone)]
pub enum Progress {
    NextItem(SessionItem),
    SessionComplete,
}

#[derive(Deserialize)]
struct SemanticJudgment {
    accuracy: f64,
}

const SEMANTIC_SYSTEM_PROMPT: &str = "You judge the semantic accuracy of a learner's free-text \
answer against the expected points. Respond with JSON only: {\"accuracy\": number between 0 and 1}.";

struct ActiveSession {
    id: String,
    items: Vec<SessionItem>,
    cursor: usize,
    capacity: CognitiveCapacity,
    sandbox_deferred: bool,
}

struct EngineState {
    assessment: AssessmentMachine,
    usefulness: UsefulnessTracker,
    scheduler: SynthesisScheduler,
    concepts: HashMap<String, Concept>,
    mastery: HashMap<String, MasteryRecord>,
    pretest_answers: Vec<(String, bool)>,
    session: Option<ActiveSession>,
    building: bool,
    epoch: u64,
}

/// Per-learner session engine. All state is scoped to this instance; public
/// operations are invoked by discrete host events and suspend only on
/// collaborator calls. Collaborators are injected — the engine never
/// constructs its own backends.
pub struct SessionEngine {
    config: EngineConfig,
    project_id: String,
    user_id: String,
    store: Arc<dyn ConceptStore>,
    generator: Arc<dyn TextGenerator>,
    placement: Option<Arc<dyn PlacementProvider>>,
    state: Mutex<EngineState>,
}

impl SessionEngine {
    pub fn new(
        config: EngineConfig,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        store: Arc<dyn ConceptStore>,
        generator: Arc<dyn TextGenerator>,
        placement: Option<Arc<dyn PlacementProvider>>,
    ) -> Self {
        let scheduler = SynthesisScheduler::new(config.synthesis.clone());
        let usefulness = UsefulnessTracker::new(config.usefulness.clone());
        Self {
            config,
            project_id: project_id.into(),
            user_id: user_id.into(),
            store,
            generator,
            placement,
            state: Mutex::new(EngineState {
                assessment: AssessmentMachine::new(),
                usefulness,
                scheduler,
                concepts: HashMap::new(),
                mastery: HashMap::new(),
                pretest_answers: Vec::new(),
                session: None,
                building: false,
                epoch: 0,
            }),
        }
    }

    /// Replaces the synthesis random source; tests use this to force both
    /// interval branches.
    pub fn with_synthesis_rng(self, rng: Box<dyn rand::RngCore + Send>) -> Self {
        {
            let mut state = self.state.lock();
            state.scheduler = SynthesisScheduler::with_rng(self.config.synthesis.clone(), rng);
        }
        self
    }

    pub fn assessment_phase(&self) -> AssessmentPhase {
        self.state.lock().assessment.phase()
    }

    pub fn did_skip_pretest(&self) -> bool {
        self.state.lock().assessment.did_skip_pretest()
    }

    /// The "already active" query backing the idempotent build guard.
    pub fn is_building(&self) -> bool {
        self.state.lock().building
    }

    // ------------------------------------------------------------------
    // Prerequisite assessment flow
    // ------------------------------------------------------------------

    /// Runs the prerequisite check against the store and drives the
    /// assessment machine. A store failure is non-fatal here: the machine
    /// defaults to learning rather than blocking the learner.
    pub async fn check_prerequisites(&self) -> Result<Vec<PhaseTransition>, EngineError> {
        let loaded = self.load_pools().await;

        let mut state = self.state.lock();
        let mut transitions = Vec::new();
        match loaded {
            Ok((concepts, mastery)) => {
                let prerequisite_ids = unmastered_prerequisites(&concepts, &mastery);
                state.concepts = concepts.into_iter().map(|c| (c.id.clone(), c)).collect();
                state.mastery = mastery;
                transitions.push(
                    state
                        .assessment
                        .apply(AssessmentEvent::PrerequisitesLoaded { prerequisite_ids })?,
                );
            }
            Err(err) => {
                transitions.push(state.assessment.apply(
                    AssessmentEvent::PrerequisiteCheckFailed {
                        reason: err.to_string(),
                    },
                )?);
            }
        }
        Ok(transitions)
    }

    /// Learner accepted the pretest offer; returns the pretest items, one
    /// question per unmastered prerequisite.
    pub fn begin_pretest(&self) -> Result<Vec<SessionItem>, EngineError> {
        let mut state = self.state.lock();
        state.assessment.apply(AssessmentEvent::OfferAccepted)?;
        state.pretest_answers.clear();

        let items = state
            .assessment
            .prerequisite_ids()
            .iter()
            .map(|id| {
                let question = state
                    .concepts
                    .get(id)
                    .map(probe_question)
                    .unwrap_or_else(|| placeholder_probe(id));
                SessionItem::Pretest {
                    prerequisite_id: id.clone(),
                    question,
                }
            })
            .collect();
        Ok(items)
    }

    pub fn decline_pretest(&self) -> Result<PhaseTransition, EngineError> {
        self.state.lock().assessment.apply(AssessmentEvent::OfferDeclined)
    }

    pub fn skip_pretest(&self) -> Result<PhaseTransition, EngineError> {
        self.state.lock().assessment.apply(AssessmentEvent::PretestSkipped)
    }

    /// Grades one pretest answer. Once every prerequisite is answered, the
    /// gap analysis is computed and the machine advances — to `gaps` when at
    /// least one gap exists, straight to `learning` otherwise.
    pub fn submit_pretest_answer(
        &self,
        prerequisite_id: &str,
        raw_answer: &str,
        elapsed_ms: i64,
    ) -> Result<GradedAnswer, EngineError> {
        let mut state = self.state.lock();
        if state.assessment.phase() != AssessmentPhase::Pretest {
            debug_assert!(false, "pretest answer outside pretest phase");
            return Err(EngineError::state(
                "NOT_IN_PRETEST",
                "pretest answer submitted outside the pretest phase",
            ));
        }

        let question = state
            .concepts
            .get(prerequisite_id)
            .map(probe_question)
            .unwrap_or_else(|| placeholder_probe(prerequisite_id));
        let graded = grade_answer(&question, raw_answer, elapsed_ms, &self.config.grading);
        state
            .pretest_answers
            .push((prerequisite_id.to_string(), graded.is_correct));

        if state.pretest_answers.len() >= state.assessment.prerequisite_ids().len() {
            let analysis = analyze_gaps(&state.pretest_answers, &self.config.assessment);
            state
                .assessment
                .apply(AssessmentEvent::PretestCompleted { analysis })?;
        }
        Ok(graded)
    }

    pub fn start_gap_lesson(&self, prerequisite_id: &str) -> Result<PhaseTransition, EngineError> {
        self.state.lock().assessment.apply(AssessmentEvent::GapLessonStarted {
            prerequisite_id: prerequisite_id.to_string(),
        })
    }

    pub fn finish_gap_lesson(&self) -> Result<PhaseTransition, EngineError> {
        self.state.lock().assessment.apply(AssessmentEvent::LessonFinished)
    }

    pub fn proceed_to_learning(&self) -> Result<PhaseTransition, EngineError> {
        self.state.lock().assessment.apply(AssessmentEvent::ProceedToLearning)
    }

    // ------------------------------------------------------------------
    // Session build
    // ------------------------------------------------------------------

    /// Builds the session feed: capacity-bounded review/new interleave, then
    /// synthesis and sandbox post-processing. Idempotent-guarded — a
    /// re-entrant call while a build is in flight fails with
    /// `BUILD_IN_FLIGHT` and changes nothing.
    pub async fn build_session(
        &self,
        signals: &CapacitySignals,
    ) -> Result<BuildResult, EngineError> {
        let epoch = {
            let mut state = self.state.lock();
            if state.building {
                return Err(EngineError::state(
                    "BUILD_IN_FLIGHT",
                    "a session build is already in flight",
                ));
            }
            state.building = true;
            state.epoch
        };
        let _guard = BuildingFlag { state: &self.state };

        let (concepts, mastery) = self.load_pools().await?;
        let capacity = compute_capacity(signals, &self.config.capacity);

        // Phase A (sync): pools, base sequence and synthesis slots.
        let planned = {
            let mut guard = self.state.lock();
            if guard.epoch != epoch {
                return Err(cancelled());
            }
            guard.concepts = concepts.iter().map(|c| (c.id.clone(), c.clone())).collect();
            guard.mastery = mastery.clone();

            let (review_pool, new_pool) = split_pools(&concepts, &mastery, capacity.can_learn_new);
            let base = match build_base_sequence(
                &review_pool,
                &new_pool,
                capacity.effective_capacity,
                &self.config.builder,
            ) {
                BuildOutcome::Built(base) => base,
                BuildOutcome::NothingToLearn => {
                    info!(project_id = %self.project_id, "nothing to learn: all concepts mastered");
                    return Ok(BuildResult::NothingToLearn);
                }
            };

            let state = &mut *guard;
            let synthesis_slots = plan_synthesis_slots(
                &base.items,
                &state.concepts,
                &mut state.scheduler,
                &self.config,
            );
            let preferences = state
                .usefulness
                .snapshot()
                .into_iter()
                .map(|row| InteractionPreference {
                    interaction: row.interaction,
                    cognitive: row.cognitive,
                    usefulness_score: row.usefulness_score,
                    sample_size: row.sample_size,
                })
                .collect::<Vec<_>>();
            let sandbox_totals = state.usefulness.totals();
            (base, synthesis_slots, preferences, sandbox_totals)
        };
        let (base, synthesis_slots, preferences, sandbox_totals) = planned;

        // Phase B (async): generate synthesis prompts; a failed generation
        // degrades to omitting that slot, logged, never retried beyond the
        // provider's own bounded policy.
        let mut synthesis_items: Vec<(usize, SessionItem)> = Vec::new();
        for (after_index, request) in synthesis_slots {
            match self
                .generator
                .generate(&request.system_prompt, &request.user_message, &GenerateOptions::default())
                .await
            {
                Ok(completion) => synthesis_items.push((
                    after_index,
                    SessionItem::Synthesis {
                        concept_ids: request.concept_ids.clone(),
                        prompt: completion.content.trim().to_string(),
                    },
                )),
                Err(err) => {
                    warn!(error = %err, "synthesis generation failed, omitting slot");
                }
            }
        }

        let mut items = base.items.clone();
        let mut last_synthesis_index = None;
        for (after_index, item) in synthesis_items.into_iter().rev() {
            items.insert(after_index + 1, item);
        }
        for (index, item) in items.iter().enumerate() {
            if matches!(item, SessionItem::Synthesis { .. }) {
                last_synthesis_index = Some(index);
            }
        }
        let synthesis_count = items
            .iter()
            .filter(|i| matches!(i, SessionItem::Synthesis { .. }))
            .count();

        // Sandbox placement: collaborator decisions with deterministic
        // fallback.
        let covered_ids = covered_concept_ids(&items);
        let covered: Vec<&Concept> = covered_ids
            .iter()
            .filter_map(|id| concepts.iter().find(|c| &c.id == id))
            .collect();
        let decisions = self
            .request_placements(
                &covered,
                &mastery,
                &preferences,
                sandbox_totals,
                items.len(),
                last_synthesis_index,
            )
            .await;

        let outcome = plan_sandboxes(
            &covered,
            decisions.as_deref(),
            last_synthesis_index,
            items.len(),
            capacity.effective_capacity,
            &self.config.sandbox,
        );
        let sandbox_deferred = outcome.is_deferred();
        let mut planned_sandboxes = outcome.placed().to_vec();
        planned_sandboxes.sort_by_key(|p| p.insert_after_index);
        for planned in planned_sandboxes.iter().rev() {
            items.insert(
                planned.insert_after_index + 1,
                SessionItem::Sandbox {
                    spec: planned.spec.clone(),
                },
            );
        }
        let sandbox_count = planned_sandboxes.len();

        // Phase C (sync): commit, unless the session was cancelled while the
        // collaborators were in flight.
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!("discarding session build completed after cancellation");
            return Err(cancelled());
        }

        let session_id = Uuid::new_v4().to_string();
        let plan = SessionPlan {
            session_id: session_id.clone(),
            items: items.clone(),
            capacity: capacity.clone(),
            synthesis_count,
            sandbox_count,
            sandbox_deferred,
            did_skip_pretest: state.assessment.did_skip_pretest(),
        };
        state.session = Some(ActiveSession {
            id: session_id,
            items,
            cursor: 0,
            capacity,
            sandbox_deferred,
        });
        info!(
            session_id = %plan.session_id,
            item_count = plan.items.len(),
            synthesis_count,
            sandbox_count,
            sandbox_deferred,
            "session built"
        );
        Ok(BuildResult::Built(plan))
    }

    async fn request_placements(
        &self,
        covered: &[&Concept],
        mastery: &HashMap<String, MasteryRecord>,
        preferences: &[InteractionPreference],
        sandbox_totals: (u64, u64),
        sequence_len: usize,
        last_synthesis_index: Option<usize>,
    ) -> Option<Vec<PlacementDecision>> {
        let provider = self.placement.as_ref()?;
        if covered.is_empty() {
            return None;
        }

        let context = PlacementContext {
            covered_concepts: covered
                .iter()
                .map(|c| CoveredConcept {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    tier: c.tier,
                    mastery: mastery
                        .get(&c.id)
                        .map(|r| r.state)
                        .unwrap_or(MasteryState::Unseen),
                })
                .collect(),
            sequence_len,
            last_synthesis_index,
            prior_sandbox_attempts: sandbox_totals.0 as u32,
            prior_sandbox_completions: sandbox_totals.1 as u32,
            preferences: preferences.to_vec(),
            min_count: self.config.sandbox.min_per_session,
            max_count: self.config.sandbox.max_per_session,
        };

        match provider.decide_placements(&context).await {
            Ok(decisions) => Some(decisions),
            Err(err) => {
                warn!(error = %err, "placement collaborator failed, using deterministic fallback");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Answering and advancing
    // ------------------------------------------------------------------

    pub fn current_item(&self) -> Option<SessionItem> {
        let state = self.state.lock();
        let session = state.session.as_ref()?;
        session.items.get(session.cursor).cloned()
    }

    /// Grades the current item, forwards the rating to the store, and feeds
    /// the usefulness loop for sandbox items. Does not advance the cursor.
    pub async fn submit_answer(
        &self,
        payload: AnswerPayload,
        elapsed_ms: i64,
    ) -> Result<GradedAnswer, EngineError> {
        let (item, epoch) = {
            let state = self.state.lock();
            let Some(session) = state.session.as_ref() else {
                debug_assert!(false, "answer submitted with no active session");
                return Err(EngineError::state(
                    "NO_ACTIVE_ITEM",
                    "no active session to answer",
                ));
            };
            let Some(item) = session.items.get(session.cursor).cloned() else {
                debug_assert!(false, "answer submitted past the end of the session");
                return Err(EngineError::state(
                    "NO_ACTIVE_ITEM",
                    "the session is already complete",
                ));
            };
            (item, state.epoch)
        };

        match (&item, payload) {
            (SessionItem::Review { concept_id, question }, AnswerPayload::Text(raw)) => {
                let graded = grade_answer(question, &raw, elapsed_ms, &self.config.grading);
                {
                    let mut state = self.state.lock();
                    if state.epoch != epoch {
                        return Err(cancelled());
                    }
                    let concept_id = concept_id.clone();
                    state
                        .usefulness
                        .record_review_outcome(&concept_id, graded.is_correct);
                }
                self.forward_rating(concept_id, Some(&question.id), &graded, elapsed_ms)
                    .await;
                Ok(graded)
            }
            (SessionItem::New { concept_id, question, .. }, AnswerPayload::Text(raw)) => {
                let graded = grade_answer(question, &raw, elapsed_ms, &self.config.grading);
                self.forward_rating(concept_id, Some(&question.id), &graded, elapsed_ms)
                    .await;
                Ok(graded)
            }
            (SessionItem::Synthesis { .. }, AnswerPayload::Text(_)) => {
                // Synthesis is reflective; completion counts, content is not
                // graded.
                Ok(GradedAnswer {
                    is_correct: true,
                    rating: Rating::Good,
                })
            }
            (SessionItem::Pretest { .. }, AnswerPayload::Text(_)) => Err(EngineError::state(
                "PRETEST_ITEM_IN_SESSION",
                "pretest items are answered through submit_pretest_answer",
            )),
            (
                SessionItem::Sandbox { spec },
                AnswerPayload::Sandbox {
                    response,
                    attempt_count,
                    hints_used,
                },
            ) => {
                self.grade_sandbox(spec.clone(), response, attempt_count, hints_used, elapsed_ms, epoch)
                    .await
            }
            _ => Err(EngineError::validation(
                "ANSWER_SHAPE_MISMATCH",
                "answer payload does not fit the current item",
            )),
        }
    }

    async fn grade_sandbox(
        &self,
        spec: crate::types::SandboxSpec,
        response: SandboxResponse,
        attempt_count: u32,
        hints_used: u32,
        elapsed_ms: i64,
        epoch: u64,
    ) -> Result<GradedAnswer, EngineError> {
        let deterministic = score_sandbox(&spec, &response, &self.config.grading);

        // Second layer: AI semantic accuracy, free-text only. A collaborator
        // failure keeps the deterministic score.
        let score = if let (crate::types::InteractionType::FreeText, SandboxResponse::FreeText(text)) =
            (spec.interaction, &response)
        {
            match self.judge_free_text(&spec, text).await {
                Ok(accuracy) => accuracy.clamp(0.0, 1.0),
                Err(err) => {
                    warn!(error = %err, "semantic judgment failed, keeping deterministic score");
                    deterministic.score
                }
            }
        } else {
            deterministic.score
        };
        let passed = score >= spec.min_correct_percentage;

        let baseline = baseline_ms(spec.interaction, spec.element_count(), &self.config.grading);
        let time_ratio = elapsed_ms as f64 / baseline.max(1) as f64;
        let rating = derive_rating(
            &RetrievalOutcome {
                passed,
                attempt_count,
                hints_used,
                time_ratio,
            },
            &self.config.grading,
        );
        let graded = GradedAnswer {
            is_correct: passed,
            rating,
        };

        let result = crate::types::SandboxResult {
            interaction: spec.interaction,
            cognitive: spec.cognitive,
            concept_ids: spec.concept_ids.clone(),
            passed,
            score,
            attempt_count,
            hints_used,
            time_ratio,
            completed: true,
            ts: chrono::Utc::now().timestamp_millis(),
        };

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!("discarding sandbox result arriving after cancellation");
                return Err(cancelled());
            }
            state.usefulness.record_result(&result);
        }

        if let Err(err) = self
            .store
            .record_sandbox_result(&self.project_id, &self.user_id, &result)
            .await
        {
            warn!(error = %err, "failed to persist sandbox result");
        }
        if let Some(primary) = spec.concept_ids.first() {
            self.forward_rating(primary, None, &graded, elapsed_ms).await;
        }
        Ok(graded)
    }

    async fn judge_free_text(
        &self,
        spec: &crate::types::SandboxSpec,
        text: &str,
    ) -> Result<f64, EngineError> {
        let expected = spec
            .elements
            .iter()
            .map(|e| e.expected.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let user_message = serde_json::json!({
            "prompt": spec.prompt,
            "expectedPoints": expected,
            "learnerAnswer": text,
        })
        .to_string();

        let judgment: SemanticJudgment = generate_structured(
            self.generator.as_ref(),
            SEMANTIC_SYSTEM_PROMPT,
            &user_message,
            &GenerateOptions {
                temperature: 0.0,
                ..Default::default()
            },
        )
        .await
        .map_err(EngineError::collaborator)?;
        Ok(judgment.accuracy)
    }

    async fn forward_rating(
        &self,
        concept_id: &str,
        question_id: Option<&str>,
        graded: &GradedAnswer,
        elapsed_ms: i64,
    ) {
        let event = RatingEvent {
            concept_id: concept_id.to_string(),
            question_id: question_id.map(|s| s.to_string()),
            rating: graded.rating,
            is_correct: graded.is_correct,
            elapsed_ms,
            ts: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(err) = self
            .store
            .record_rating(&self.project_id, &self.user_id, event)
            .await
        {
            warn!(error = %err, concept_id, "failed to forward rating event");
        }
    }

    /// Moves the cursor; returns the next item or session completion.
    pub fn advance(&self) -> Result<Progress, EngineError> {
        let mut state = self.state.lock();
        let Some(session) = state.session.as_mut() else {
            return Err(EngineError::state(
                "NO_ACTIVE_SESSION",
                "no session to advance",
            ));
        };
        session.cursor += 1;
        match session.items.get(session.cursor) {
            Some(item) => Ok(Progress::NextItem(item.clone())),
            None => Ok(Progress::SessionComplete),
        }
    }

    /// Learner exited mid-session. Bumps the epoch so results from any
    /// still-suspended collaborator calls are discarded instead of mutating
    /// torn-down state.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        if let Some(session) = state.session.take() {
            info!(session_id = %session.id, cursor = session.cursor, "session cancelled");
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session.as_ref().map(|s| s.id.clone())
    }
}

/// Clears the in-flight flag however the build exits.
struct BuildingFlag<'a> {
    state: &'a Mutex<EngineState>,
}

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.state.lock().building = false;
    }
}

impl SessionEngine {
    async fn load_pools(
        &self,
    ) -> Result<(Vec<Concept>, HashMap<String, MasteryRecord>), EngineError> {
        let concepts = self.store.load_concepts(&self.project_id).await?;
        let mastery = self
            .store
            .load_mastery(&self.project_id, &self.user_id)
            .await?;
        Ok((concepts, mastery))
    }
}

fn cancelled() -> EngineError {
    EngineError::state("SESSION_CANCELLED", "the session was cancelled")
}

fn probe_question(concept: &Concept) -> Question {
    concept
        .questions
        .first()
        .cloned()
        .unwrap_or_else(|| Question::definition_probe(concept))
}

fn placeholder_probe(prerequisite_id: &str) -> Question {
    Question {
        id: format!("{prerequisite_id}::probe"),
        concept_id: prerequisite_id.to_string(),
        kind: crate::types::QuestionKind::OpenText,
        prompt: format!("What do you know about {prerequisite_id}?"),
        answer: String::new(),
        options: Vec::new(),
    }
}

/// Prerequisites of would-be-new concepts the learner has not mastered yet.
fn unmastered_prerequisites(
    concepts: &[Concept],
    mastery: &HashMap<String, MasteryRecord>,
) -> Vec<String> {
    let state_of = |id: &str| {
        mastery
            .get(id)
            .map(|r| r.state)
            .unwrap_or(MasteryState::Unseen)
    };

    let mut prerequisite_ids = Vec::new();
    for concept in concepts {
        if state_of(&concept.id) != MasteryState::Unseen {
            continue;
        }
        for prerequisite in &concept.prerequisite_ids {
            if state_of(prerequisite) != MasteryState::Mastered
                && !prerequisite_ids.contains(prerequisite)
            {
                prerequisite_ids.push(prerequisite.clone());
            }
        }
    }
    prerequisite_ids
}

fn split_pools(
    concepts: &[Concept],
    mastery: &HashMap<String, MasteryRecord>,
    can_learn_new: bool,
) -> (Vec<ReviewCandidate>, Vec<Concept>) {
    let now = chrono::Utc::now();
    let mut review_pool = Vec::new();
    let mut new_pool = Vec::new();

    for concept in concepts {
        match mastery.get(&concept.id) {
            Some(record) => match record.state {
                MasteryState::Mastered => {}
                MasteryState::Unseen => new_pool.push(concept.clone()),
                MasteryState::Learning | MasteryState::Review => {
                    let due = record.due_at.map(|d| d <= now).unwrap_or(true);
                    if due {
                        review_pool.push(ReviewCandidate::from_concept(concept, 0));
                    }
                }
            },
            // Missing row means unseen, not an error.
            None => new_pool.push(concept.clone()),
        }
    }

    if !can_learn_new {
        new_pool.clear();
    }
    (review_pool, new_pool)
}

/// Walks the base sequence once, asking the scheduler at every progress unit
/// whether a synthesis window has elapsed. A triggered window with too few
/// connectable concepts is skipped, not forced.
fn plan_synthesis_slots(
    base_items: &[SessionItem],
    concepts: &HashMap<String, Concept>,
    scheduler: &mut SynthesisScheduler,
    config: &EngineConfig,
) -> Vec<(usize, SynthesisRequest)> {
    let mut slots = Vec::new();
    let mut covered_ids: Vec<String> = Vec::new();
    let mut last_trigger: i64 = 0;

    for (index, item) in base_items.iter().enumerate() {
        for id in item.concept_ids() {
            if !covered_ids.iter().any(|c| c == id) {
                covered_ids.push(id.to_string());
            }
        }

        let progress = (index + 1) as i64;
        if !scheduler.should_insert(progress, last_trigger) {
            continue;
        }
        last_trigger = progress;

        // Most recently covered first.
        let recent: Vec<&Concept> = covered_ids
            .iter()
            .rev()
            .filter_map(|id| concepts.get(id))
            .collect();
        match build_synthesis_request(&recent, &config.synthesis) {
            Ok(request) => slots.push((index, request)),
            Err(err) => {
                debug!(code = err.code(), "synthesis window skipped");
            }
        }
    }
    slots
}

fn covered_concept_ids(items: &[SessionItem]) -> Vec<String> {
    let mut covered = Vec::new();
    for item in items {
        if matches!(item, SessionItem::Synthesis { .. } | SessionItem::Sandbox { .. }) {
            continue;
        }
        for id in item.concept_ids() {
            if !covered.iter().any(|c| c == id) {
                covered.push(id.to_string());
            }
        }
    }
    covered
}
