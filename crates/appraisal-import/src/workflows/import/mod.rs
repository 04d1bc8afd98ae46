//! Document import and reconciliation against the property library.

pub mod committer;
pub mod controller;
pub mod credentials;
pub mod domain;
pub mod gateway;
pub mod library;
pub mod matcher;
pub mod normalizer;
pub mod pending;
pub mod repository;
pub mod router;
pub mod runner;

pub use committer::{BatchCommitter, CommitError, CommitReport};
pub use controller::{
    parse_step_param, transition, ControllerError, ControllerSettings, ImportController,
    ImportEvent, ImportPipeline, ImportScreenView, ImportStep, ProcessOutcome, RedirectPlan,
    SaveOutcome, TransitionRejected, UserFacingError, ValidationError,
};
pub use credentials::{
    AiProvider, CredentialPolicy, PriorityCredentialPolicy, ProviderCredentials, ProviderSetting,
};
pub use domain::{
    CandidateAction, CandidateActionKind, DocumentType, ExistingProperty, ExtractedField,
    ExtractionCandidate, ImportSession, ImportSource, InputMode, PropertyFields, PropertyId,
    ResolutionError, SessionId, UploadedFile,
};
pub use gateway::{
    ExtractionError, ExtractionGateway, ExtractionInput, ExtractionRequest,
    HttpExtractionGateway, RawExtraction, RecordedExtractionGateway,
};
pub use library::{load_library, parse_library, LibraryLoadError};
pub use matcher::{DuplicateMatcher, LookupError, LookupFailurePolicy, MatchSummary};
pub use normalizer::normalize_address;
pub use pending::{PendingImport, PendingImportStore};
pub use repository::{CandidateCommit, CommitOutcome, PropertyStore, StoreError};
pub use router::{import_router, ImportScreens};
pub use runner::{BackgroundImportRunner, CreditObserver, ImportProgress, ImportTask};
