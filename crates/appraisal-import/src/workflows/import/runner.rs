use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::controller::ImportStep;
use super::credentials::ProviderCredentials;
use super::domain::{DocumentType, ImportSession, InputMode, SessionId, UploadedFile};
use super::gateway::{ExtractionError, ExtractionGateway, ExtractionInput, ExtractionRequest};
use super::pending::PendingImportStore;

/// State shown by the global import indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportProgress {
    Idle,
    Extracting {
        document_type: DocumentType,
        mode: InputMode,
    },
    Completed {
        session: SessionId,
        candidates: usize,
    },
    Failed {
        message: String,
    },
}

impl ImportProgress {
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Extracting { .. })
    }
}

/// Told when an extraction has consumed provider credits.
pub trait CreditObserver: Send + Sync {
    fn credits_changed(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ImportRunError {
    #[error("extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractionError),
    #[error("extraction task stopped before completing: {0}")]
    Interrupted(String),
}

/// Runs extractions as detached tasks and records their result as the pending import.
pub struct BackgroundImportRunner {
    gateway: Arc<dyn ExtractionGateway>,
    pending: PendingImportStore,
    progress: Arc<watch::Sender<ImportProgress>>,
    credits: Option<Arc<dyn CreditObserver>>,
}

impl BackgroundImportRunner {
    pub fn new(gateway: Arc<dyn ExtractionGateway>, pending: PendingImportStore) -> Self {
        let (progress, _) = watch::channel(ImportProgress::Idle);
        Self {
            gateway,
            pending,
            progress: Arc::new(progress),
            credits: None,
        }
    }

    pub fn with_credit_observer(mut self, observer: Arc<dyn CreditObserver>) -> Self {
        self.credits = Some(observer);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ImportProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> ImportProgress {
        self.progress.borrow().clone()
    }

    pub fn start_single_import(
        &self,
        file: UploadedFile,
        document_type: DocumentType,
        credentials: ProviderCredentials,
    ) -> ImportTask {
        self.start(ExtractionRequest {
            input: ExtractionInput::File(file),
            document_type,
            credentials,
        })
    }

    pub fn start_text_import(
        &self,
        text: String,
        document_type: DocumentType,
        credentials: ProviderCredentials,
    ) -> ImportTask {
        self.start(ExtractionRequest {
            input: ExtractionInput::Text(text),
            document_type,
            credentials,
        })
    }

    fn start(&self, request: ExtractionRequest) -> ImportTask {
        let mode = match request.input {
            ExtractionInput::File(_) => InputMode::Pdf,
            ExtractionInput::Text(_) => InputMode::Text,
        };
        self.progress.send_replace(ImportProgress::Extracting {
            document_type: request.document_type,
            mode,
        });

        let job = ExtractionJob {
            gateway: Arc::clone(&self.gateway),
            pending: self.pending.clone(),
            progress: Arc::clone(&self.progress),
            credits: self.credits.clone(),
        };

        ImportTask {
            handle: tokio::spawn(job.run(request)),
        }
    }
}

struct ExtractionJob {
    gateway: Arc<dyn ExtractionGateway>,
    pending: PendingImportStore,
    progress: Arc<watch::Sender<ImportProgress>>,
    credits: Option<Arc<dyn CreditObserver>>,
}

impl ExtractionJob {
    async fn run(self, request: ExtractionRequest) -> Result<ImportSession, ImportRunError> {
        let document_type = request.document_type;
        let result = match self.gateway.extract(&request).await {
            Ok(raw) => raw.into_session(document_type),
            Err(err) => Err(err),
        };

        match result {
            Ok(session) => {
                // Must be recorded before the session is handed back.
                self.pending
                    .save_extracted(session.clone(), ImportStep::Review, request.input);
                info!(
                    session = %session.id,
                    document_type = document_type.code(),
                    candidates = session.reviewable().len(),
                    "extraction completed"
                );
                self.progress.send_replace(ImportProgress::Completed {
                    session: session.id,
                    candidates: session.reviewable().len(),
                });
                if let Some(observer) = &self.credits {
                    observer.credits_changed();
                }
                Ok(session)
            }
            Err(err) => {
                error!(document_type = document_type.code(), error = %err, "extraction failed");
                self.progress.send_replace(ImportProgress::Failed {
                    message: err.to_string(),
                });
                Err(ImportRunError::ExtractionFailed(err))
            }
        }
    }
}

/// Handle on a running extraction.
///
/// Dropping it detaches the caller; the extraction still completes and still
/// records its session as the pending import.
#[derive(Debug)]
pub struct ImportTask {
    handle: JoinHandle<Result<ImportSession, ImportRunError>>,
}

impl ImportTask {
    pub async fn wait(self) -> Result<ImportSession, ImportRunError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(ImportRunError::Interrupted(join_error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::import::credentials::AiProvider;
    use crate::workflows::import::gateway::{RawExtraction, RecordedExtractionGateway};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ONE_PROPERTY: &str = r#"{ "properties": [
        { "fields": { "address": { "value": "123 Main St", "confidence": 0.9 } } }
    ] }"#;

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            provider: AiProvider::OpenAi,
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    fn recorded() -> Arc<dyn ExtractionGateway> {
        let raw = RawExtraction::from_reader(ONE_PROPERTY.as_bytes()).expect("valid json");
        Arc::new(RecordedExtractionGateway::new(raw))
    }

    struct OfflineGateway;

    #[async_trait]
    impl ExtractionGateway for OfflineGateway {
        async fn extract(
            &self,
            _request: &ExtractionRequest,
        ) -> Result<RawExtraction, ExtractionError> {
            Err(ExtractionError::Transport("connection reset".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl CreditObserver for CountingObserver {
        fn credits_changed(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn saves_pending_session_before_returning() {
        let pending = PendingImportStore::new();
        let observer = Arc::new(CountingObserver::default());
        let runner = BackgroundImportRunner::new(recorded(), pending.clone())
            .with_credit_observer(observer.clone());

        let session = runner
            .start_text_import(
                "123 Main St, Springfield".to_string(),
                DocumentType::Sale,
                credentials(),
            )
            .wait()
            .await
            .expect("extraction succeeds");

        let snapshot = pending.snapshot();
        assert_eq!(snapshot.session.as_ref(), Some(&session));
        assert_eq!(snapshot.step, Some(ImportStep::Review));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            runner.progress(),
            ImportProgress::Completed {
                session: session.id,
                candidates: 1
            }
        );
    }

    #[tokio::test]
    async fn detached_task_still_records_the_session() {
        let pending = PendingImportStore::new();
        let runner = BackgroundImportRunner::new(recorded(), pending.clone());
        let mut progress = runner.subscribe();

        drop(runner.start_single_import(
            UploadedFile::pdf("listing.pdf", b"%PDF".to_vec()),
            DocumentType::Listing,
            credentials(),
        ));

        progress
            .wait_for(|state| matches!(state, ImportProgress::Completed { .. }))
            .await
            .expect("runner alive");
        assert!(pending.snapshot().resumable().is_some());
    }

    #[tokio::test]
    async fn failure_leaves_pending_store_untouched() {
        let pending = PendingImportStore::new();
        let observer = Arc::new(CountingObserver::default());
        let runner = BackgroundImportRunner::new(Arc::new(OfflineGateway), pending.clone())
            .with_credit_observer(observer.clone());

        let result = runner
            .start_text_import("anything".to_string(), DocumentType::Sale, credentials())
            .wait()
            .await;

        assert!(matches!(result, Err(ImportRunError::ExtractionFailed(_))));
        assert!(pending.is_empty());
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(runner.progress(), ImportProgress::Failed { .. }));
    }
}
