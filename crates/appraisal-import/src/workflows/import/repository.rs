use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{ExistingProperty, ImportSession, PropertyId};

/// Property library owned outside the pipeline.
///
/// Address matching semantics belong to the store: `find_by_address` returns at
/// most one property even when several near-duplicates exist.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn find_by_address(&self, address: &str)
        -> Result<Option<ExistingProperty>, StoreError>;

    /// Best-effort batch commit of every reviewable candidate, one outcome per
    /// candidate in session order.
    async fn create_properties_from_import(
        &self,
        session: &ImportSession,
    ) -> Result<Vec<CandidateCommit>, StoreError>;

    /// Single-property path for sessions built from the legacy shape.
    async fn create_property_from_import(
        &self,
        session: &ImportSession,
    ) -> Result<PropertyId, StoreError>;

    async fn merge_property_data(
        &self,
        existing: &PropertyId,
        session: &ImportSession,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("property {0} not found")]
    NotFound(PropertyId),
    #[error("property store rejected the candidate: {0}")]
    Rejected(String),
    #[error("property store unavailable: {0}")]
    Unavailable(String),
}

/// What the store did with one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CommitOutcome {
    Created(PropertyId),
    Merged(PropertyId),
    Skipped,
    Failed(String),
}

impl CommitOutcome {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True when the candidate now exists in the library as a result of this commit.
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Merged(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateCommit {
    pub index: usize,
    #[serde(flatten)]
    pub outcome: CommitOutcome,
}
