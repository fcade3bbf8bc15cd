use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum ConceptTier {
    Enrichment = 1,
    #[default]
    Supporting = 2,
    Core = 3,
}

impl ConceptTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Supporting => "supporting",
            Self::Enrichment => "enrichment",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "core" => Self::Core,
            "enrichment" => Self::Enrichment,
            _ => Self::Supporting,
        }
    }

    /// Pedagogical importance, 1 (enrichment) to 3 (core).
    pub fn weight(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    OpenText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub concept_id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    pub answer: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Question {
    /// Fallback probe for concepts shipped without a question bank: recall
    /// the definition itself.
    pub fn definition_probe(concept: &Concept) -> Self {
        Self {
            id: format!("{}::definition", concept.id),
            concept_id: concept.id.clone(),
            kind: QuestionKind::OpenText,
            prompt: format!("In your own words, what is \"{}\"?", concept.name),
            answer: concept.definition.clone(),
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub id: String,
    pub name: String,
    pub definition: String,
    pub tier: ConceptTier,
    #[serde(default)]
    pub prerequisite_ids: Vec<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum MasteryState {
    #[default]
    Unseen,
    Learning,
    Review,
    Mastered,
}

impl MasteryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Mastered => "mastered",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "learning" => Self::Learning,
            "review" => Self::Review,
            "mastered" => Self::Mastered,
            _ => Self::Unseen,
        }
    }
}

/// Spaced-repetition row as read from the external mastery store. The engine
/// never mutates these directly; it emits [`RatingEvent`]s the store applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub concept_id: String,
    pub state: MasteryState,
    pub due_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

/// Emitted after every graded answer; consumed by the external
/// spaced-repetition scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingEvent {
    pub concept_id: String,
    pub question_id: Option<String>,
    pub rating: Rating,
    pub is_correct: bool,
    pub elapsed_ms: i64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionType {
    Matching,
    Sequencing,
    FillInBlank,
    FreeText,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matching => "matching",
            Self::Sequencing => "sequencing",
            Self::FillInBlank => "fillInBlank",
            Self::FreeText => "freeText",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sequencing" => Self::Sequencing,
            "fillinblank" | "fill_in_blank" => Self::FillInBlank,
            "freetext" | "free_text" => Self::FreeText,
            _ => Self::Matching,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum CognitiveType {
    #[default]
    Recall,
    Application,
    Analysis,
}

impl CognitiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recall => "recall",
            Self::Application => "application",
            Self::Analysis => "analysis",
        }
    }
}

/// One interactive element of a sandbox exercise: a pair to match, a blank
/// to fill, or a step to order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxElement {
    pub id: String,
    pub label: String,
    pub expected: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    pub concept_ids: Vec<String>,
    pub interaction: InteractionType,
    pub cognitive: CognitiveType,
    pub prompt: String,
    pub elements: Vec<SandboxElement>,
    /// Fraction of the deterministic score required to pass, per exercise.
    pub min_correct_percentage: f64,
}

impl SandboxSpec {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

/// Learner response to a sandbox exercise, shaped by the interaction type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SandboxResponse {
    /// `(element_id, value)` placements for matching / fill-in-blank.
    Placements(Vec<(String, String)>),
    /// Element ids in the learner's chosen order, for sequencing.
    Ordering(Vec<String>),
    FreeText(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    pub interaction: InteractionType,
    pub cognitive: CognitiveType,
    pub concept_ids: Vec<String>,
    pub passed: bool,
    pub score: f64,
    pub attempt_count: u32,
    pub hints_used: u32,
    pub time_ratio: f64,
    pub completed: bool,
    pub ts: i64,
}

/// The declarative feed the engine emits. Items are immutable once placed;
/// the session holds the ordered sequence plus a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionItem {
    Review {
        concept_id: String,
        question: Question,
    },
    New {
        concept_id: String,
        question: Question,
        is_intro: bool,
    },
    Synthesis {
        concept_ids: Vec<String>,
        prompt: String,
    },
    Sandbox {
        spec: SandboxSpec,
    },
    Pretest {
        prerequisite_id: String,
        question: Question,
    },
}

impl SessionItem {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Review { .. } => "review",
            Self::New { .. } => "new",
            Self::Synthesis { .. } => "synthesis",
            Self::Sandbox { .. } => "sandbox",
            Self::Pretest { .. } => "pretest",
        }
    }

    /// Concept ids the item targets (one for quiz items, several for
    /// synthesis/sandbox).
    pub fn concept_ids(&self) -> Vec<&str> {
        match self {
            Self::Review { concept_id, .. } | Self::New { concept_id, .. } => {
                vec![concept_id.as_str()]
            }
            Self::Synthesis { concept_ids, .. } => {
                concept_ids.iter().map(|s| s.as_str()).collect()
            }
            Self::Sandbox { spec } => spec.concept_ids.iter().map(|s| s.as_str()).collect(),
            Self::Pretest { prerequisite_id, .. } => vec![prerequisite_id.as_str()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAnswer {
    pub is_correct: bool,
    pub rating: Rating,
}
