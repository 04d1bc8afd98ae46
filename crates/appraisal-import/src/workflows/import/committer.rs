use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{CandidateAction, ImportSession, SessionId};
use super::repository::{CandidateCommit, CommitOutcome, PropertyStore, StoreError};

/// Per-candidate result of committing a session.
///
/// Commits are not atomic across candidates: outcomes before a failure stay committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub session: SessionId,
    pub outcomes: Vec<CandidateCommit>,
}

impl CommitReport {
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|commit| !commit.outcome.is_failure())
    }

    pub fn committed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|commit| commit.outcome.is_committed())
            .map(|commit| commit.index)
            .collect()
    }

    pub fn failures(&self) -> Vec<&CandidateCommit> {
        self.outcomes
            .iter()
            .filter(|commit| commit.outcome.is_failure())
            .collect()
    }

    fn count(&self, predicate: impl Fn(&CommitOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|commit| predicate(&commit.outcome))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} merged, {} skipped, {} failed",
            self.count(|outcome| matches!(outcome, CommitOutcome::Created(_))),
            self.count(|outcome| matches!(outcome, CommitOutcome::Merged(_))),
            self.count(|outcome| matches!(outcome, CommitOutcome::Skipped)),
            self.count(CommitOutcome::is_failure),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

const UNREPORTED: &str = "property store reported no outcome for this candidate";

/// Persists a resolved session through the property store.
pub struct BatchCommitter<S> {
    store: Arc<S>,
}

impl<S> BatchCommitter<S>
where
    S: PropertyStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn commit(&self, session: &ImportSession) -> Result<CommitReport, CommitError> {
        let outcomes = if !session.candidates().is_empty() {
            self.commit_batch(session).await?
        } else if let Some(legacy) = session.legacy() {
            let outcome = match legacy.action() {
                CandidateAction::Skip => CommitOutcome::Skipped,
                CandidateAction::Merge(existing) => {
                    self.store.merge_property_data(existing, session).await?;
                    CommitOutcome::Merged(existing.clone())
                }
                CandidateAction::Create => {
                    CommitOutcome::Created(self.store.create_property_from_import(session).await?)
                }
            };
            vec![CandidateCommit { index: 0, outcome }]
        } else {
            Vec::new()
        };

        let report = CommitReport {
            session: session.id,
            outcomes,
        };

        if report.is_complete() {
            info!(session = %session.id, summary = %report.summary(), "import committed");
        } else {
            warn!(session = %session.id, summary = %report.summary(), "import partially committed");
            for failure in report.failures() {
                if let CommitOutcome::Failed(reason) = &failure.outcome {
                    warn!(session = %session.id, index = failure.index, %reason, "candidate not committed");
                }
            }
        }

        Ok(report)
    }

    /// One outcome per candidate, in candidate order.
    ///
    /// Outcomes the store reports for unknown or repeated indices are dropped.
    /// A candidate the store says nothing about counts as failed, unless it was skipped.
    async fn commit_batch(
        &self,
        session: &ImportSession,
    ) -> Result<Vec<CandidateCommit>, CommitError> {
        let candidates = session.candidates();
        let reported = self.store.create_properties_from_import(session).await?;

        let mut slots: Vec<Option<CommitOutcome>> = vec![None; candidates.len()];
        for commit in reported {
            match slots.get_mut(commit.index) {
                Some(slot) if slot.is_none() => *slot = Some(commit.outcome),
                _ => warn!(
                    session = %session.id,
                    index = commit.index,
                    "ignoring unexpected outcome from property store"
                ),
            }
        }

        Ok(slots
            .into_iter()
            .zip(candidates)
            .enumerate()
            .map(|(index, (outcome, candidate))| CandidateCommit {
                index,
                outcome: outcome.unwrap_or_else(|| match candidate.action() {
                    CandidateAction::Skip => CommitOutcome::Skipped,
                    _ => CommitOutcome::Failed(UNREPORTED.to_string()),
                }),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::import::domain::{
        CandidateActionKind, DocumentType, ExistingProperty, ExtractedField, ExtractionCandidate,
        PropertyFields, PropertyId,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Batch(usize),
        Single,
        Merge(PropertyId),
    }

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        fail_batch: bool,
        /// Report only this candidate, plus one outcome for an unknown index.
        report_only: Option<usize>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("calls mutex poisoned").clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().expect("calls mutex poisoned").push(call);
        }
    }

    #[async_trait]
    impl PropertyStore for RecordingStore {
        async fn find_by_address(
            &self,
            _address: &str,
        ) -> Result<Option<ExistingProperty>, StoreError> {
            Ok(None)
        }

        async fn create_properties_from_import(
            &self,
            session: &ImportSession,
        ) -> Result<Vec<CandidateCommit>, StoreError> {
            self.record(Call::Batch(session.candidates().len()));
            if self.fail_batch {
                return Err(StoreError::Unavailable("database offline".to_string()));
            }
            if let Some(only) = self.report_only {
                return Ok(vec![
                    CandidateCommit {
                        index: only,
                        outcome: CommitOutcome::Created(PropertyId(format!("new-{only}"))),
                    },
                    CandidateCommit {
                        index: 99,
                        outcome: CommitOutcome::Skipped,
                    },
                ]);
            }
            Ok(session
                .candidates()
                .iter()
                .enumerate()
                .rev()
                .map(|(index, candidate)| CandidateCommit {
                    index,
                    outcome: match candidate.action() {
                        CandidateAction::Create => {
                            CommitOutcome::Created(PropertyId(format!("new-{index}")))
                        }
                        CandidateAction::Merge(id) => CommitOutcome::Merged(id.clone()),
                        CandidateAction::Skip => CommitOutcome::Skipped,
                    },
                })
                .collect())
        }

        async fn create_property_from_import(
            &self,
            _session: &ImportSession,
        ) -> Result<PropertyId, StoreError> {
            self.record(Call::Single);
            Ok(PropertyId("legacy-1".to_string()))
        }

        async fn merge_property_data(
            &self,
            existing: &PropertyId,
            _session: &ImportSession,
        ) -> Result<(), StoreError> {
            self.record(Call::Merge(existing.clone()));
            Ok(())
        }
    }

    fn candidate(address: &str) -> ExtractionCandidate {
        ExtractionCandidate::new(PropertyFields {
            address: Some(ExtractedField::new(address.to_string(), 0.8)),
            ..PropertyFields::default()
        })
    }

    fn existing(id: &str) -> ExistingProperty {
        ExistingProperty {
            id: PropertyId(id.to_string()),
            address: "8 Birch Ave".to_string(),
            city: None,
            municipality: None,
            sale_price: None,
        }
    }

    #[tokio::test]
    async fn batch_is_sent_once_and_reported_in_candidate_order() {
        let store = Arc::new(RecordingStore::default());
        let committer = BatchCommitter::new(store.clone());
        let mut session = ImportSession::new(
            DocumentType::Listing,
            vec![candidate("7 Birch Ave"), candidate("8 Birch Ave")],
        );
        session.resolve(0, CandidateActionKind::Skip).expect("skip");
        session
            .reviewable_mut_at(1)
            .expect("second candidate")
            .set_duplicate(Some(existing("p8")));
        session.resolve(1, CandidateActionKind::Merge).expect("merge");

        let report = committer.commit(&session).await.expect("commit succeeds");

        assert_eq!(store.calls(), vec![Call::Batch(2)]);
        assert_eq!(
            report.outcomes,
            vec![
                CandidateCommit {
                    index: 0,
                    outcome: CommitOutcome::Skipped
                },
                CandidateCommit {
                    index: 1,
                    outcome: CommitOutcome::Merged(PropertyId("p8".to_string()))
                },
            ]
        );
        assert!(report.is_complete());
        assert_eq!(report.summary(), "0 created, 1 merged, 1 skipped, 0 failed");
    }

    #[tokio::test]
    async fn legacy_session_uses_single_property_paths() {
        let store = Arc::new(RecordingStore::default());
        let committer = BatchCommitter::new(store.clone());

        let create = ImportSession::from_legacy(DocumentType::Sale, candidate("1 Elm St"));
        let report = committer.commit(&create).await.expect("legacy create");
        assert_eq!(
            report.outcomes[0].outcome,
            CommitOutcome::Created(PropertyId("legacy-1".to_string()))
        );

        let mut merge = ImportSession::from_legacy(DocumentType::Sale, candidate("1 Elm St"));
        merge
            .reviewable_mut_at(0)
            .expect("legacy candidate")
            .set_duplicate(Some(existing("p1")));
        merge.resolve(0, CandidateActionKind::Merge).expect("merge");
        committer.commit(&merge).await.expect("legacy merge");

        let mut skip = ImportSession::from_legacy(DocumentType::Sale, candidate("1 Elm St"));
        skip.resolve(0, CandidateActionKind::Skip).expect("skip");
        let report = committer.commit(&skip).await.expect("legacy skip");
        assert_eq!(report.outcomes[0].outcome, CommitOutcome::Skipped);

        assert_eq!(
            store.calls(),
            vec![Call::Single, Call::Merge(PropertyId("p1".to_string()))]
        );
    }

    #[tokio::test]
    async fn store_failure_is_returned_as_error() {
        let store = Arc::new(RecordingStore {
            fail_batch: true,
            ..RecordingStore::default()
        });
        let committer = BatchCommitter::new(store);
        let session = ImportSession::new(DocumentType::Sale, vec![candidate("3 Ash St")]);

        assert!(matches!(
            committer.commit(&session).await,
            Err(CommitError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn unreported_candidates_count_as_failed() {
        let store = Arc::new(RecordingStore {
            report_only: Some(0),
            ..RecordingStore::default()
        });
        let committer = BatchCommitter::new(store);
        let mut session = ImportSession::new(
            DocumentType::Sale,
            vec![candidate("4 Ash St"), candidate("5 Ash St"), candidate("6 Ash St")],
        );
        session.resolve(2, CandidateActionKind::Skip).expect("skip");

        let report = committer.commit(&session).await.expect("store answered");

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(
            report.outcomes[0].outcome,
            CommitOutcome::Created(PropertyId("new-0".to_string()))
        );
        assert!(report.outcomes[1].outcome.is_failure());
        assert_eq!(report.outcomes[2].outcome, CommitOutcome::Skipped);
        assert!(!report.is_complete());
        assert_eq!(report.committed_indices(), vec![0]);
    }

    #[tokio::test]
    async fn empty_session_commits_nothing() {
        let store = Arc::new(RecordingStore::default());
        let committer = BatchCommitter::new(store.clone());
        let session = ImportSession::new(DocumentType::Sale, Vec::new());

        let report = committer.commit(&session).await.expect("empty commit");
        assert!(report.outcomes.is_empty());
        assert!(report.is_complete());
        assert!(store.calls().is_empty());
    }

    #[test]
    fn report_tracks_partial_failure() {
        let report = CommitReport {
            session: SessionId::new(),
            outcomes: vec![
                CandidateCommit {
                    index: 0,
                    outcome: CommitOutcome::Created(PropertyId("a".to_string())),
                },
                CandidateCommit {
                    index: 1,
                    outcome: CommitOutcome::Failed("constraint violation".to_string()),
                },
                CandidateCommit {
                    index: 2,
                    outcome: CommitOutcome::Skipped,
                },
            ],
        };

        assert!(!report.is_complete());
        assert_eq!(report.committed_indices(), vec![0]);
        assert_eq!(report.failures().len(), 1);
    }
}
