use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{ExistingProperty, ImportSession};
use super::repository::{PropertyStore, StoreError};

/// How a failed per-candidate lookup affects the review step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// The failing candidate is treated as having no known duplicate.
    #[default]
    Isolate,
    /// Any failure aborts matching for the whole session.
    Abort,
}

impl LookupFailurePolicy {
    pub fn from_code(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Some(Self::Isolate),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("duplicate lookup failed for candidate {index}: {source}")]
    Failed { index: usize, source: StoreError },
}

/// Per-candidate lookup result, kept in candidate order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Candidate had no address.
    Skipped,
    NoMatch,
    Found(ExistingProperty),
    Failed(StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub skipped: usize,
    pub failed: Vec<usize>,
}

/// Looks up library duplicates for extracted candidates.
pub struct DuplicateMatcher<S> {
    store: Arc<S>,
    policy: LookupFailurePolicy,
}

impl<S> DuplicateMatcher<S>
where
    S: PropertyStore + 'static,
{
    pub fn new(store: Arc<S>, policy: LookupFailurePolicy) -> Self {
        Self { store, policy }
    }

    /// Run one lookup per addressed candidate concurrently.
    ///
    /// The returned vector is indexed like the session's reviewable candidates,
    /// whatever order the lookups complete in.
    pub async fn lookup_all(&self, session: &ImportSession) -> Vec<LookupOutcome> {
        let lookups = session.reviewable().into_iter().map(|candidate| {
            let address = candidate.fields.address().map(str::to_string);
            async move {
                match address {
                    None => LookupOutcome::Skipped,
                    Some(address) => match self.store.find_by_address(&address).await {
                        Ok(Some(existing)) => LookupOutcome::Found(existing),
                        Ok(None) => LookupOutcome::NoMatch,
                        Err(err) => LookupOutcome::Failed(err),
                    },
                }
            }
        });

        join_all(lookups).await
    }

    /// Attach duplicates to the session's candidates. Actions are left untouched.
    ///
    /// Under [`LookupFailurePolicy::Abort`] the session is not modified when any
    /// lookup fails.
    pub async fn match_candidates(
        &self,
        session: &mut ImportSession,
    ) -> Result<MatchSummary, LookupError> {
        let outcomes = self.lookup_all(session).await;

        if self.policy == LookupFailurePolicy::Abort {
            if let Some((index, err)) = outcomes.iter().enumerate().find_map(|(index, outcome)| {
                match outcome {
                    LookupOutcome::Failed(err) => Some((index, err.clone())),
                    _ => None,
                }
            }) {
                warn!(session = %session.id, index, error = %err, "duplicate lookup aborted review");
                return Err(LookupError::Failed { index, source: err });
            }
        }

        let mut summary = MatchSummary::default();
        for (index, (candidate, outcome)) in session
            .reviewable_mut()
            .into_iter()
            .zip(outcomes)
            .enumerate()
        {
            match outcome {
                LookupOutcome::Skipped => {
                    summary.skipped += 1;
                    candidate.set_duplicate(None);
                }
                LookupOutcome::NoMatch => {
                    summary.unmatched += 1;
                    candidate.set_duplicate(None);
                }
                LookupOutcome::Found(existing) => {
                    debug!(index, property = %existing.id, "duplicate found");
                    summary.matched += 1;
                    candidate.set_duplicate(Some(existing));
                }
                LookupOutcome::Failed(err) => {
                    warn!(index, error = %err, "duplicate lookup failed, treating as unmatched");
                    summary.failed.push(index);
                    candidate.set_duplicate(None);
                }
            }
        }

        Ok(summary)
    }
}
