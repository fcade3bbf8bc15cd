pub mod builder;
pub mod engine;

pub use builder::{build_base_sequence, BaseSequence, BuildOutcome, ReviewCandidate};
pub use engine::{AnswerPayload, BuildResult, Progress, SessionEngine, SessionPlan};
