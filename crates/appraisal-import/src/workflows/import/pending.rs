use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use super::controller::ImportStep;
use super::domain::ImportSession;
use super::gateway::ExtractionInput;

/// Snapshot of an unfinished import that survives leaving the import screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingImport {
    pub session: Option<ImportSession>,
    pub step: Option<ImportStep>,
    /// Document the session was extracted from, restored on the upload form.
    #[serde(skip)]
    pub input: Option<ExtractionInput>,
}

impl PendingImport {
    /// Both halves are needed to resume.
    pub fn resumable(&self) -> Option<(&ImportSession, ImportStep)> {
        match (&self.session, self.step) {
            (Some(session), Some(step)) => Some((session, step)),
            _ => None,
        }
    }
}

/// Shared, in-process holder of the pending import.
///
/// Cloning yields another handle on the same state, so the runner and every
/// controller mounted from it observe the same snapshot. Nothing is written to
/// disk; a process restart loses it.
#[derive(Debug, Clone, Default)]
pub struct PendingImportStore {
    inner: Arc<Mutex<PendingImport>>,
}

impl PendingImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingImport> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the session and step. The recorded input is kept.
    pub fn save(&self, session: ImportSession, step: ImportStep) {
        debug!(session = %session.id, step = step.index(), "saving pending import");
        let mut guard = self.lock();
        guard.session = Some(session);
        guard.step = Some(step);
    }

    pub fn save_extracted(
        &self,
        session: ImportSession,
        step: ImportStep,
        input: ExtractionInput,
    ) {
        debug!(session = %session.id, step = step.index(), "saving extracted import");
        *self.lock() = PendingImport {
            session: Some(session),
            step: Some(step),
            input: Some(input),
        };
    }

    /// Drop any pending import. Calling it on an empty store does nothing.
    pub fn clear(&self) {
        let mut guard = self.lock();
        if guard.session.is_some() || guard.step.is_some() {
            debug!("clearing pending import");
        }
        *guard = PendingImport::default();
    }

    pub fn snapshot(&self) -> PendingImport {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.lock();
        guard.session.is_none() && guard.step.is_none()
    }
}
