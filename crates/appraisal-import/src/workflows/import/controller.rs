//! Import screen state machine.
//!
//! The screen moves through `SourceSelect → Upload → Review → Done`. Every step
//! change goes through [`transition`], and every asynchronous handler is guarded by
//! a busy flag so that a second invocation while one is in flight is ignored.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::committer::{BatchCommitter, CommitReport};
use super::credentials::CredentialPolicy;
use super::domain::{
    CandidateActionKind, DocumentType, ExistingProperty, ImportSession, ImportSource, InputMode,
    ResolutionError, UploadedFile,
};
use super::gateway::{ExtractionGateway, ExtractionInput};
use super::matcher::{DuplicateMatcher, LookupError, LookupFailurePolicy};
use super::pending::PendingImportStore;
use super::repository::PropertyStore;
use super::runner::{BackgroundImportRunner, CreditObserver, ImportRunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStep {
    #[default]
    SourceSelect,
    Upload,
    Review,
    Done,
}

impl ImportStep {
    pub const fn ordered() -> [Self; 4] {
        [Self::SourceSelect, Self::Upload, Self::Review, Self::Done]
    }

    pub const fn index(self) -> usize {
        match self {
            Self::SourceSelect => 0,
            Self::Upload => 1,
            Self::Review => 2,
            Self::Done => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ordered().get(index).copied()
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::SourceSelect => "source_select",
            Self::Upload => "upload",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ImportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse the `step` query parameter. Anything but an index in `0..=3` is ignored.
pub fn parse_step_param(raw: &str) -> Option<ImportStep> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .and_then(ImportStep::from_index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEvent {
    SourceChosen(ImportSource),
    ExtractionSucceeded,
    CommitSucceeded,
    Cancel,
    Back,
}

impl ImportEvent {
    const fn name(self) -> &'static str {
        match self {
            Self::SourceChosen(_) => "choose a source",
            Self::ExtractionSucceeded => "review an extraction",
            Self::CommitSucceeded => "finish a commit",
            Self::Cancel => "cancel",
            Self::Back => "go back",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejected {
    #[error("import source {import_source:?} is not available yet")]
    SourceDisabled { import_source: ImportSource },
    #[error("cannot {event} from the {from} step")]
    NotAllowed { from: ImportStep, event: &'static str },
}

/// The only place step changes are decided.
pub fn transition(step: ImportStep, event: ImportEvent) -> Result<ImportStep, TransitionRejected> {
    use ImportEvent as E;
    use ImportStep as S;

    match (step, event) {
        (S::SourceSelect, E::SourceChosen(source)) if source.is_enabled() => Ok(S::Upload),
        (S::SourceSelect, E::SourceChosen(source)) => Err(TransitionRejected::SourceDisabled {
            import_source: source,
        }),
        (S::Upload, E::ExtractionSucceeded) => Ok(S::Review),
        (S::Review, E::CommitSucceeded) => Ok(S::Done),
        (S::Upload | S::Review, E::Cancel) => Ok(S::SourceSelect),
        (S::Upload, E::Back) => Ok(S::SourceSelect),
        (S::Review, E::Back) => Ok(S::Upload),
        (from, event) => Err(TransitionRejected::NotAllowed {
            from,
            event: event.name(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Choose the type of document you are importing.")]
    MissingDocumentType,
    #[error("Select a PDF file to import.")]
    MissingFile,
    #[error("Paste the document text to import.")]
    MissingText,
}

/// The single message category shown to the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum UserFacingError {
    Validation(ValidationError),
    ExtractionFailed,
    CommitFailed,
}

impl UserFacingError {
    pub fn message(&self) -> String {
        match self {
            Self::Validation(reason) => reason.to_string(),
            Self::ExtractionFailed => {
                "The document could not be analysed. Please try again.".to_string()
            }
            Self::CommitFailed => {
                "The properties could not be saved. Review your choices and try again.".to_string()
            }
        }
    }
}

/// Errors caused by calling the controller in a state where the call makes no sense.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("action requires the {expected} step but the screen is on {actual}")]
    WrongStep {
        expected: ImportStep,
        actual: ImportStep,
    },
    #[error("no import session to review")]
    NoSession,
    #[error("the import is being saved")]
    Busy,
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Transition(#[from] TransitionRejected),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// An extraction was already running.
    Ignored,
    Invalid { reason: ValidationError },
    Failed,
    Reviewing { candidates: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// A commit was already running.
    Ignored,
    Saved { report: CommitReport },
    Failed { report: Option<CommitReport> },
}

/// Navigation the screen performs once the commit completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectPlan {
    pub target: String,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub redirect_target: String,
    pub redirect_delay: Duration,
    pub lookup_failure_policy: LookupFailurePolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            redirect_target: "/properties".to_string(),
            redirect_delay: Duration::from_millis(2000),
            lookup_failure_policy: LookupFailurePolicy::Isolate,
        }
    }
}

/// Collaborators shared by every mount of the import screen.
pub struct ImportPipeline<S> {
    runner: BackgroundImportRunner,
    matcher: DuplicateMatcher<S>,
    committer: BatchCommitter<S>,
    credentials: Arc<dyn CredentialPolicy>,
    pending: PendingImportStore,
    settings: ControllerSettings,
}

impl<S> ImportPipeline<S>
where
    S: PropertyStore + 'static,
{
    pub fn new(
        gateway: Arc<dyn ExtractionGateway>,
        store: Arc<S>,
        credentials: Arc<dyn CredentialPolicy>,
        settings: ControllerSettings,
    ) -> Self {
        Self::with_pending(
            gateway,
            store,
            credentials,
            settings,
            PendingImportStore::new(),
        )
    }

    pub fn with_pending(
        gateway: Arc<dyn ExtractionGateway>,
        store: Arc<S>,
        credentials: Arc<dyn CredentialPolicy>,
        settings: ControllerSettings,
        pending: PendingImportStore,
    ) -> Self {
        Self {
            runner: BackgroundImportRunner::new(gateway, pending.clone()),
            matcher: DuplicateMatcher::new(Arc::clone(&store), settings.lookup_failure_policy),
            committer: BatchCommitter::new(store),
            credentials,
            pending,
            settings,
        }
    }

    pub fn with_credit_observer(mut self, observer: Arc<dyn CreditObserver>) -> Self {
        self.runner = self.runner.with_credit_observer(observer);
        self
    }

    pub fn pending(&self) -> &PendingImportStore {
        &self.pending
    }

    pub fn runner(&self) -> &BackgroundImportRunner {
        &self.runner
    }
}

#[derive(Debug, Clone, Default)]
struct ScreenState {
    step: ImportStep,
    source: Option<ImportSource>,
    document_type: Option<DocumentType>,
    mode: InputMode,
    file: Option<UploadedFile>,
    pasted_text: String,
    session: Option<ImportSession>,
    processing: bool,
    saving: bool,
    error: Option<UserFacingError>,
    last_commit: Option<CommitReport>,
    redirect: Option<RedirectPlan>,
}

impl ScreenState {
    fn require(&self, expected: ImportStep) -> Result<(), ControllerError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(ControllerError::WrongStep {
                expected,
                actual: self.step,
            })
        }
    }

    fn validated_input(&self) -> Result<(DocumentType, ValidatedInput), ValidationError> {
        let document_type = self
            .document_type
            .ok_or(ValidationError::MissingDocumentType)?;

        let input = match self.mode {
            InputMode::Pdf => self
                .file
                .clone()
                .map(ValidatedInput::File)
                .ok_or(ValidationError::MissingFile)?,
            InputMode::Text if self.pasted_text.trim().is_empty() => {
                return Err(ValidationError::MissingText)
            }
            InputMode::Text => ValidatedInput::Text(self.pasted_text.clone()),
        };

        Ok((document_type, input))
    }

    fn clear_validation_error(&mut self) {
        if matches!(self.error, Some(UserFacingError::Validation(_))) {
            self.error = None;
        }
    }

    fn apply(&mut self, event: ImportEvent) -> Result<ImportStep, TransitionRejected> {
        let next = transition(self.step, event)?;
        self.step = next;
        Ok(next)
    }
}

enum ValidatedInput {
    File(UploadedFile),
    Text(String),
}

#[derive(Debug, thiserror::Error)]
enum ReviewPreparationError {
    #[error(transparent)]
    Extraction(#[from] ImportRunError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Serializable snapshot of the screen.
#[derive(Debug, Clone, Serialize)]
pub struct ImportScreenView {
    pub step: ImportStep,
    pub step_index: usize,
    pub source: Option<ImportSource>,
    pub document_type: Option<DocumentType>,
    pub mode: InputMode,
    pub file_name: Option<String>,
    pub has_text: bool,
    pub session: Option<ImportSession>,
    pub processing: bool,
    pub saving: bool,
    pub error: Option<UserFacingError>,
    pub error_message: Option<String>,
    pub last_commit: Option<CommitReport>,
    pub redirect: Option<RedirectPlan>,
}

/// Resets a busy flag when the handler that set it finishes or is dropped.
struct BusyFlag<'a> {
    state: &'a Mutex<ScreenState>,
    select: fn(&mut ScreenState) -> &mut bool,
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *(self.select)(&mut *state) = false;
    }
}

fn processing_flag(state: &mut ScreenState) -> &mut bool {
    &mut state.processing
}

fn saving_flag(state: &mut ScreenState) -> &mut bool {
    &mut state.saving
}

/// One mounted instance of the import screen.
pub struct ImportController<S> {
    pipeline: Arc<ImportPipeline<S>>,
    state: Mutex<ScreenState>,
}

impl<S> ImportController<S>
where
    S: PropertyStore + 'static,
{
    /// Mount the screen, resuming a pending import when one exists.
    ///
    /// A pending session and step win over the `step` parameter; the parameter
    /// is only honoured when it is a valid index.
    pub fn mount(pipeline: Arc<ImportPipeline<S>>, step_param: Option<&str>) -> Self {
        let pending = pipeline.pending.snapshot();
        let mut state = ScreenState::default();

        if let Some((session, step)) = pending.resumable() {
            info!(session = %session.id, step = %step, "resuming pending import");
            state.source = Some(ImportSource::Document);
            state.document_type = Some(session.document_type);
            state.session = Some(session.clone());
            state.step = step;
            match &pending.input {
                Some(ExtractionInput::File(file)) => {
                    state.mode = InputMode::Pdf;
                    state.file = Some(file.clone());
                }
                Some(ExtractionInput::Text(text)) => {
                    state.mode = InputMode::Text;
                    state.pasted_text = text.clone();
                }
                None => {}
            }
        } else if let Some(step) = step_param.and_then(parse_step_param) {
            state.step = step;
        }

        Self {
            pipeline,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScreenState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn step(&self) -> ImportStep {
        self.lock().step
    }

    pub fn session(&self) -> Option<ImportSession> {
        self.lock().session.clone()
    }

    pub fn error(&self) -> Option<UserFacingError> {
        self.lock().error
    }

    pub fn redirect(&self) -> Option<RedirectPlan> {
        self.lock().redirect.clone()
    }

    pub fn view(&self) -> ImportScreenView {
        let state = self.lock();
        ImportScreenView {
            step: state.step,
            step_index: state.step.index(),
            source: state.source,
            document_type: state.document_type,
            mode: state.mode,
            file_name: state.file.as_ref().map(|file| file.name.clone()),
            has_text: !state.pasted_text.trim().is_empty(),
            session: state.session.clone(),
            processing: state.processing,
            saving: state.saving,
            error: state.error,
            error_message: state.error.map(|err| err.message()),
            last_commit: state.last_commit.clone(),
            redirect: state.redirect.clone(),
        }
    }

    /// Choose where the document comes from. Disabled sources leave the screen as is.
    pub fn select_source(&self, source: ImportSource) -> Result<ImportStep, ControllerError> {
        let mut state = self.lock();
        match state.apply(ImportEvent::SourceChosen(source)) {
            Ok(step) => {
                state.source = Some(source);
                Ok(step)
            }
            Err(TransitionRejected::SourceDisabled { .. }) => Ok(state.step),
            Err(other) => Err(other.into()),
        }
    }

    pub fn set_document_type(
        &self,
        document_type: Option<DocumentType>,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.require(ImportStep::Upload)?;
        state.document_type = document_type;
        state.clear_validation_error();
        Ok(())
    }

    pub fn set_input_mode(&self, mode: InputMode) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.require(ImportStep::Upload)?;
        state.mode = mode;
        state.clear_validation_error();
        Ok(())
    }

    pub fn select_file(&self, file: Option<UploadedFile>) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.require(ImportStep::Upload)?;
        state.file = file;
        state.clear_validation_error();
        Ok(())
    }

    pub fn set_pasted_text(&self, text: impl Into<String>) -> Result<(), ControllerError> {
        let mut state = self.lock();
        state.require(ImportStep::Upload)?;
        state.pasted_text = text.into();
        state.clear_validation_error();
        Ok(())
    }

    /// Validate the upload, extract, look up duplicates and open the review.
    ///
    /// Pipeline failures never escape: they leave the screen on `Upload` with a
    /// single extraction error.
    pub async fn handle_process(&self) -> Result<ProcessOutcome, ControllerError> {
        let (document_type, input) = {
            let mut state = self.lock();
            state.require(ImportStep::Upload)?;
            if state.processing {
                return Ok(ProcessOutcome::Ignored);
            }
            match state.validated_input() {
                Ok(validated) => {
                    state.processing = true;
                    state.error = None;
                    validated
                }
                Err(reason) => {
                    state.error = Some(UserFacingError::Validation(reason));
                    return Ok(ProcessOutcome::Invalid { reason });
                }
            }
        };
        let _busy = BusyFlag {
            state: &self.state,
            select: processing_flag,
        };

        let result = self.prepare_review(document_type, input).await;

        let mut state = self.lock();
        match result {
            Ok(session) => {
                let candidates = session.reviewable().len();
                self.pipeline.pending.save(session.clone(), ImportStep::Review);
                state.apply(ImportEvent::ExtractionSucceeded)?;
                state.session = Some(session);
                state.last_commit = None;
                state.redirect = None;
                Ok(ProcessOutcome::Reviewing { candidates })
            }
            Err(err) => {
                error!(error = %err, "import processing failed");
                if matches!(err, ReviewPreparationError::Lookup(_)) {
                    self.pipeline.pending.clear();
                }
                state.session = None;
                state.error = Some(UserFacingError::ExtractionFailed);
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn prepare_review(
        &self,
        document_type: DocumentType,
        input: ValidatedInput,
    ) -> Result<ImportSession, ReviewPreparationError> {
        let credentials = self.pipeline.credentials.resolve_provider_and_key();
        let runner = &self.pipeline.runner;
        let task = match input {
            ValidatedInput::File(file) => {
                runner.start_single_import(file, document_type, credentials)
            }
            ValidatedInput::Text(text) => runner.start_text_import(text, document_type, credentials),
        };

        let mut session = task.wait().await?;
        let summary = self.pipeline.matcher.match_candidates(&mut session).await?;
        info!(
            session = %session.id,
            matched = summary.matched,
            unmatched = summary.unmatched,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "duplicate matching finished"
        );
        Ok(session)
    }

    fn edit_session<T>(
        &self,
        edit: impl FnOnce(&mut ImportSession) -> Result<T, ResolutionError>,
    ) -> Result<T, ControllerError> {
        let mut state = self.lock();
        state.require(ImportStep::Review)?;
        if state.saving {
            return Err(ControllerError::Busy);
        }
        let session = state.session.as_mut().ok_or(ControllerError::NoSession)?;
        Ok(edit(session)?)
    }

    /// Choose create, merge or skip for the candidate at `index`.
    pub fn set_candidate_action(
        &self,
        index: usize,
        kind: CandidateActionKind,
    ) -> Result<(), ControllerError> {
        self.edit_session(|session| session.resolve(index, kind))
    }

    /// Replace the duplicate attached to a candidate; a merge falls back to create.
    pub fn set_candidate_duplicate(
        &self,
        index: usize,
        duplicate: Option<ExistingProperty>,
    ) -> Result<(), ControllerError> {
        self.edit_session(|session| {
            session.reviewable_mut_at(index)?.set_duplicate(duplicate);
            Ok(())
        })
    }

    /// Commit the reviewed session.
    ///
    /// On success the pending import is cleared before the redirect is planned.
    /// On failure the screen stays on `Review`; candidates that did reach the
    /// store are switched to skip so a retry cannot commit them twice.
    pub async fn handle_commit(&self) -> Result<SaveOutcome, ControllerError> {
        let session = {
            let mut state = self.lock();
            state.require(ImportStep::Review)?;
            if state.saving {
                return Ok(SaveOutcome::Ignored);
            }
            let session = state.session.clone().ok_or(ControllerError::NoSession)?;
            state.saving = true;
            state.error = None;
            session
        };
        let _busy = BusyFlag {
            state: &self.state,
            select: saving_flag,
        };

        let result = self.pipeline.committer.commit(&session).await;

        let mut state = self.lock();
        match result {
            Ok(report) if report.is_complete() => {
                self.pipeline.pending.clear();
                state.apply(ImportEvent::CommitSucceeded)?;
                state.session = None;
                state.last_commit = Some(report.clone());
                state.redirect = Some(RedirectPlan {
                    target: self.pipeline.settings.redirect_target.clone(),
                    delay_ms: self.pipeline.settings.redirect_delay.as_millis() as u64,
                });
                Ok(SaveOutcome::Saved { report })
            }
            Ok(report) => {
                warn!(
                    session = %session.id,
                    summary = %report.summary(),
                    "commit incomplete, keeping review open"
                );
                if let Some(current) = state.session.as_mut() {
                    for index in report.committed_indices() {
                        current.resolve(index, CandidateActionKind::Skip)?;
                    }
                    self.pipeline.pending.save(current.clone(), ImportStep::Review);
                }
                state.error = Some(UserFacingError::CommitFailed);
                state.last_commit = Some(report.clone());
                Ok(SaveOutcome::Failed {
                    report: Some(report),
                })
            }
            Err(err) => {
                error!(session = %session.id, error = %err, "commit failed");
                state.error = Some(UserFacingError::CommitFailed);
                Ok(SaveOutcome::Failed { report: None })
            }
        }
    }

    /// Abandon the import: the session is discarded and the pending import cleared.
    ///
    /// Refused while an extraction or a commit is running.
    pub fn cancel(&self) -> Result<ImportStep, ControllerError> {
        let mut state = self.lock();
        if state.processing || state.saving {
            return Err(ControllerError::Busy);
        }
        let step = state.apply(ImportEvent::Cancel)?;
        let session = state.session.take();
        *state = ScreenState {
            step,
            ..ScreenState::default()
        };
        self.pipeline.pending.clear();
        if let Some(session) = session {
            info!(session = %session.id, "import cancelled");
        }
        Ok(step)
    }

    pub fn back(&self) -> Result<ImportStep, ControllerError> {
        let mut state = self.lock();
        if state.processing || state.saving {
            return Err(ControllerError::Busy);
        }
        Ok(state.apply(ImportEvent::Back)?)
    }
}
