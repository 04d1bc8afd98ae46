use appraisal_import::workflows::import::{
    normalize_address, CandidateAction, CandidateCommit, CommitOutcome, CreditObserver,
    ExistingProperty, ExtractionCandidate, ExtractionError, ExtractionGateway, ExtractionRequest,
    ImportSession, PropertyFields, PropertyId, PropertyStore, RawExtraction, StoreError,
};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Property library kept in memory and matched on normalized addresses.
#[derive(Default, Clone)]
pub(crate) struct InMemoryPropertyStore {
    properties: Arc<Mutex<BTreeMap<PropertyId, ExistingProperty>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryPropertyStore {
    pub(crate) fn with_library(library: Vec<ExistingProperty>) -> Self {
        let store = Self::default();
        {
            let mut guard = store.properties.lock().expect("store mutex poisoned");
            for property in library {
                guard.insert(property.id.clone(), property);
            }
        }
        store
    }

    pub(crate) fn properties(&self) -> Vec<ExistingProperty> {
        let guard = self.properties.lock().expect("store mutex poisoned");
        guard.values().cloned().collect()
    }

    /// Always inserts a new record, even when the address is already in the library.
    fn create(&self, fields: &PropertyFields) -> Result<PropertyId, String> {
        let address = fields
            .address()
            .ok_or_else(|| "candidate has no address".to_string())?;

        let mut guard = self.properties.lock().expect("store mutex poisoned");
        let id = PropertyId(format!(
            "imp-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1
        ));
        guard.insert(
            id.clone(),
            ExistingProperty {
                id: id.clone(),
                address: address.to_string(),
                city: fields.city.as_ref().map(|field| field.value.clone()),
                municipality: fields.municipality.as_ref().map(|field| field.value.clone()),
                sale_price: fields.sale_price.as_ref().map(|field| field.value),
            },
        );
        Ok(id)
    }

    /// Extracted values fill in or replace the library's; absent ones leave it untouched.
    fn merge(&self, id: &PropertyId, fields: &PropertyFields) -> Result<(), StoreError> {
        let mut guard = self.properties.lock().expect("store mutex poisoned");
        let existing = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(city) = &fields.city {
            existing.city = Some(city.value.clone());
        }
        if let Some(municipality) = &fields.municipality {
            existing.municipality = Some(municipality.value.clone());
        }
        if let Some(price) = &fields.sale_price {
            existing.sale_price = Some(price.value);
        }
        Ok(())
    }

    fn commit_candidate(&self, candidate: &ExtractionCandidate) -> CommitOutcome {
        match candidate.action() {
            CandidateAction::Skip => CommitOutcome::Skipped,
            CandidateAction::Create => match self.create(&candidate.fields) {
                Ok(id) => CommitOutcome::Created(id),
                Err(reason) => CommitOutcome::Failed(reason),
            },
            CandidateAction::Merge(id) => match self.merge(id, &candidate.fields) {
                Ok(()) => CommitOutcome::Merged(id.clone()),
                Err(err) => CommitOutcome::Failed(err.to_string()),
            },
        }
    }
}

fn legacy_candidate(session: &ImportSession) -> Result<&ExtractionCandidate, StoreError> {
    session
        .legacy()
        .ok_or_else(|| StoreError::Unavailable("session has no single-property data".to_string()))
}

#[async_trait]
impl PropertyStore for InMemoryPropertyStore {
    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<ExistingProperty>, StoreError> {
        let key = normalize_address(address);
        let guard = self.properties.lock().expect("store mutex poisoned");
        Ok(guard
            .values()
            .find(|existing| normalize_address(&existing.address) == key)
            .cloned())
    }

    async fn create_properties_from_import(
        &self,
        session: &ImportSession,
    ) -> Result<Vec<CandidateCommit>, StoreError> {
        Ok(session
            .candidates()
            .iter()
            .enumerate()
            .map(|(index, candidate)| CandidateCommit {
                index,
                outcome: self.commit_candidate(candidate),
            })
            .collect())
    }

    async fn create_property_from_import(
        &self,
        session: &ImportSession,
    ) -> Result<PropertyId, StoreError> {
        let candidate = legacy_candidate(session)?;
        self.create(&candidate.fields).map_err(|reason| {
            warn!(session = %session.id, %reason, "legacy import rejected");
            StoreError::Rejected(reason)
        })
    }

    async fn merge_property_data(
        &self,
        existing: &PropertyId,
        session: &ImportSession,
    ) -> Result<(), StoreError> {
        let candidate = legacy_candidate(session)?;
        self.merge(existing, &candidate.fields)
    }
}

/// Stands in for the extraction service when no endpoint is configured.
pub(crate) struct UnconfiguredExtractionGateway;

#[async_trait]
impl ExtractionGateway for UnconfiguredExtractionGateway {
    async fn extract(
        &self,
        _request: &ExtractionRequest,
    ) -> Result<RawExtraction, ExtractionError> {
        Err(ExtractionError::Transport(
            "IMPORT_EXTRACTION_ENDPOINT is not configured".to_string(),
        ))
    }
}

/// Credit balance refresh hook; the service has no billing backend, so it only logs.
#[derive(Default)]
pub(crate) struct LoggingCreditObserver {
    refreshes: AtomicU64,
}

impl CreditObserver for LoggingCreditObserver {
    fn credits_changed(&self) {
        let count = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(refreshes = count, "provider credits changed");
    }
}
