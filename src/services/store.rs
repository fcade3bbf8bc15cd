use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Concept, MasteryRecord, RatingEvent, SandboxResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("load failed: {0}")]
    LoadFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LoadFailed(_) => "STORE_LOAD_FAILED",
            Self::WriteFailed(_) => "STORE_WRITE_FAILED",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

/// Contract with the external content/mastery store. The engine reads
/// concepts and mastery once per session build and emits rating events; it
/// never mutates mastery rows itself.
///
/// Absence of a mastery row is not an error — it means "unseen".
#[async_trait]
pub trait ConceptStore: Send + Sync {
    async fn load_concepts(&self, project_id: &str) -> Result<Vec<Concept>, StoreError>;

    async fn load_mastery(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<HashMap<String, MasteryRecord>, StoreError>;

    async fn record_rating(
        &self,
        project_id: &str,
        user_id: &str,
        event: RatingEvent,
    ) -> Result<(), StoreError>;

    async fn record_sandbox_result(
        &self,
        project_id: &str,
        user_id: &str,
        result: &SandboxResult,
    ) -> Result<(), StoreError>;
}
