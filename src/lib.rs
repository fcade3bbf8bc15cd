#![allow(dead_code)]

//! Adaptive session scheduling engine for a personalized-learning client:
//! prerequisite-gap assessment, capacity-bounded interleaved session
//! building, graded recall ratings for an external spaced-repetition store,
//! and a usefulness feedback loop biasing sandbox placement.
//!
//! The engine renders nothing and persists nothing: it emits a declarative
//! item sequence, receives typed learner actions, and talks to injected
//! collaborators (content/mastery store, text generation, placement).

pub mod assessment;
pub mod capacity;
pub mod config;
pub mod error;
pub mod grading;
pub mod logging;
pub mod placement;
pub mod services;
pub mod session;
pub mod types;
pub mod usefulness;

pub use config::EngineConfig;
pub use error::EngineError;
pub use session::engine::{AnswerPayload, BuildResult, Progress, SessionEngine, SessionPlan};
#[allow(unused_imports)]
pub use types::*;
