use std::sync::{Arc, RwLock};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::controller::{ControllerError, ImportController, ImportPipeline};
use super::domain::{
    CandidateActionKind, DocumentType, ExistingProperty, ImportSource, InputMode,
    ResolutionError, UploadedFile,
};
use super::repository::PropertyStore;

/// The import screen currently mounted for the HTTP surface.
pub struct ImportScreens<S> {
    pipeline: Arc<ImportPipeline<S>>,
    current: RwLock<Arc<ImportController<S>>>,
}

impl<S> ImportScreens<S>
where
    S: PropertyStore + 'static,
{
    pub fn new(pipeline: Arc<ImportPipeline<S>>) -> Self {
        let current = ImportController::mount(Arc::clone(&pipeline), None);
        Self {
            pipeline,
            current: RwLock::new(Arc::new(current)),
        }
    }

    pub fn pipeline(&self) -> &Arc<ImportPipeline<S>> {
        &self.pipeline
    }

    pub fn current(&self) -> Arc<ImportController<S>> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Replace the mounted screen, resuming any pending import.
    pub fn remount(&self, step_param: Option<&str>) -> Arc<ImportController<S>> {
        let controller = Arc::new(ImportController::mount(
            Arc::clone(&self.pipeline),
            step_param,
        ));
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&controller);
        controller
    }
}

/// Router builder exposing the import screen over HTTP.
pub fn import_router<S>(screens: Arc<ImportScreens<S>>) -> Router
where
    S: PropertyStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/imports/screen",
            get(screen_handler::<S>).post(mount_handler::<S>),
        )
        .route("/api/v1/imports/source", post(source_handler::<S>))
        .route("/api/v1/imports/input", put(input_handler::<S>))
        .route("/api/v1/imports/process", post(process_handler::<S>))
        .route(
            "/api/v1/imports/candidates/:index",
            put(candidate_handler::<S>),
        )
        .route(
            "/api/v1/imports/candidates/:index/duplicate",
            put(duplicate_handler::<S>),
        )
        .route("/api/v1/imports/commit", post(commit_handler::<S>))
        .route("/api/v1/imports/cancel", post(cancel_handler::<S>))
        .route("/api/v1/imports/back", post(back_handler::<S>))
        .route(
            "/api/v1/imports/pending",
            get(pending_handler::<S>).delete(clear_pending_handler::<S>),
        )
        .route("/api/v1/imports/progress", get(progress_handler::<S>))
        .with_state(screens)
}

#[derive(Debug, Deserialize)]
pub(crate) struct MountQuery {
    step: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SourceRequest {
    source: ImportSource,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct InputUpdate {
    #[serde(default)]
    document_type: Option<DocumentType>,
    #[serde(default)]
    mode: Option<InputMode>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    file: Option<FileUpload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileUpload {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    data_base64: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateUpdate {
    action: CandidateActionKind,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DuplicateUpdate {
    duplicate: Option<ExistingProperty>,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    let payload = json!({
        "error": message.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn controller_error_response(err: ControllerError) -> Response {
    let status = match &err {
        ControllerError::NoSession
        | ControllerError::Resolution(ResolutionError::UnknownCandidate { .. }) => {
            StatusCode::NOT_FOUND
        }
        ControllerError::Resolution(ResolutionError::NoDuplicate { .. }) => {
            StatusCode::BAD_REQUEST
        }
        ControllerError::WrongStep { .. }
        | ControllerError::Busy
        | ControllerError::Transition(_) => StatusCode::CONFLICT,
    };
    warn!(error = %err, status = status.as_u16(), "import request rejected");
    error_response(status, err)
}

fn screen_response<S>(controller: &ImportController<S>) -> Response
where
    S: PropertyStore + 'static,
{
    (StatusCode::OK, axum::Json(controller.view())).into_response()
}

fn respond<S>(controller: &ImportController<S>, result: Result<(), ControllerError>) -> Response
where
    S: PropertyStore + 'static,
{
    match result {
        Ok(()) => screen_response(controller),
        Err(err) => controller_error_response(err),
    }
}

pub(crate) async fn screen_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    screen_response(&screens.current())
}

pub(crate) async fn mount_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
    Query(query): Query<MountQuery>,
) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.remount(query.step.as_deref());
    info!(step = %controller.step(), "import screen mounted");
    screen_response(&controller)
}

pub(crate) async fn source_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
    axum::Json(request): axum::Json<SourceRequest>,
) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    let result = controller.select_source(request.source).map(|_| ());
    respond(&controller, result)
}

pub(crate) async fn input_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
    axum::Json(update): axum::Json<InputUpdate>,
) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();

    let file = match update.file {
        Some(upload) => {
            match base64::engine::general_purpose::STANDARD.decode(upload.data_base64.trim()) {
                Ok(bytes) => Some(UploadedFile {
                    name: upload.name,
                    content_type: upload
                        .content_type
                        .unwrap_or_else(|| mime::APPLICATION_PDF.to_string()),
                    bytes,
                }),
                Err(err) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        format!("file data is not valid base64: {err}"),
                    )
                }
            }
        }
        None => None,
    };

    let mut result = Ok(());
    if let Some(document_type) = update.document_type {
        result = result.and_then(|_| controller.set_document_type(Some(document_type)));
    }
    if let Some(mode) = update.mode {
        result = result.and_then(|_| controller.set_input_mode(mode));
    }
    if let Some(text) = update.text {
        result = result.and_then(|_| controller.set_pasted_text(text));
    }
    if file.is_some() {
        result = result.and_then(|_| controller.select_file(file));
    }
    respond(&controller, result)
}

pub(crate) async fn process_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    match controller.handle_process().await {
        Ok(outcome) => {
            let payload = json!({
                "outcome": outcome,
                "screen": controller.view(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => controller_error_response(err),
    }
}

pub(crate) async fn candidate_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
    Path(index): Path<usize>,
    axum::Json(update): axum::Json<CandidateUpdate>,
) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    let result = controller.set_candidate_action(index, update.action);
    respond(&controller, result)
}

pub(crate) async fn duplicate_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
    Path(index): Path<usize>,
    axum::Json(update): axum::Json<DuplicateUpdate>,
) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    let result = controller.set_candidate_duplicate(index, update.duplicate);
    respond(&controller, result)
}

pub(crate) async fn commit_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    match controller.handle_commit().await {
        Ok(outcome) => {
            let payload = json!({
                "outcome": outcome,
                "screen": controller.view(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => controller_error_response(err),
    }
}

pub(crate) async fn cancel_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    let result = controller.cancel().map(|_| ());
    respond(&controller, result)
}

pub(crate) async fn back_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let controller = screens.current();
    let result = controller.back().map(|_| ());
    respond(&controller, result)
}

pub(crate) async fn pending_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let snapshot = screens.pipeline().pending().snapshot();
    (StatusCode::OK, axum::Json(snapshot)).into_response()
}

/// Global import indicator, readable from any screen.
pub(crate) async fn progress_handler<S>(State(screens): State<Arc<ImportScreens<S>>>) -> Response
where
    S: PropertyStore + 'static,
{
    let progress = screens.pipeline().runner().progress();
    let payload = json!({
        "running": progress.is_running(),
        "progress": progress,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn clear_pending_handler<S>(
    State(screens): State<Arc<ImportScreens<S>>>,
) -> Response
where
    S: PropertyStore + 'static,
{
    screens.pipeline().pending().clear();
    StatusCode::NO_CONTENT.into_response()
}
