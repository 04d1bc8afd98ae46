use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a property record owned by the property store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub String);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hint given to the extraction provider about what the document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Sale,
    Listing,
    Rental,
    Assessment,
    Appraisal,
    Other,
}

impl DocumentType {
    pub const fn ordered() -> [Self; 6] {
        [
            Self::Sale,
            Self::Listing,
            Self::Rental,
            Self::Assessment,
            Self::Appraisal,
            Self::Other,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Listing => "listing",
            Self::Rental => "rental",
            Self::Assessment => "assessment",
            Self::Appraisal => "appraisal",
            Self::Other => "other",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ordered()
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(value))
    }
}

/// Where the document comes from. Browser capture is listed but not yet enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    Document,
    BrowserCapture,
}

impl ImportSource {
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Document)
    }
}

/// How the document is supplied on the upload step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Pdf,
    Text,
}

/// A file selected on the upload step.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: mime::APPLICATION_PDF.to_string(),
            bytes,
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One extracted value together with the provider's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField<T> {
    pub value: T,
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self {
            value,
            confidence: clamp_confidence(confidence),
        }
    }
}

pub(crate) fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Structured property data recovered from a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_number: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<ExtractedField<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<ExtractedField<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_date: Option<ExtractedField<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_built: Option<ExtractedField<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub living_area_sqft: Option<ExtractedField<u32>>,
}

impl PropertyFields {
    /// The extracted street address, when one was found and is not blank.
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_ref()
            .map(|field| field.value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn confidences(&self) -> Vec<f32> {
        [
            self.address.as_ref().map(|f| f.confidence),
            self.city.as_ref().map(|f| f.confidence),
            self.municipality.as_ref().map(|f| f.confidence),
            self.postal_code.as_ref().map(|f| f.confidence),
            self.lot_number.as_ref().map(|f| f.confidence),
            self.property_type.as_ref().map(|f| f.confidence),
            self.sale_price.as_ref().map(|f| f.confidence),
            self.sale_date.as_ref().map(|f| f.confidence),
            self.year_built.as_ref().map(|f| f.confidence),
            self.living_area_sqft.as_ref().map(|f| f.confidence),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn average_confidence(&self) -> f32 {
        let confidences = self.confidences();
        if confidences.is_empty() {
            return 0.0;
        }
        confidences.iter().sum::<f32>() / confidences.len() as f32
    }
}

/// A property already present in the user's library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingProperty {
    pub id: PropertyId,
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub municipality: Option<String>,
    #[serde(default)]
    pub sale_price: Option<u64>,
}

/// Resolution chosen for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "property_id", rename_all = "snake_case")]
pub enum CandidateAction {
    Create,
    Merge(PropertyId),
    Skip,
}

impl CandidateAction {
    pub const fn kind(&self) -> CandidateActionKind {
        match self {
            Self::Create => CandidateActionKind::Create,
            Self::Merge(_) => CandidateActionKind::Merge,
            Self::Skip => CandidateActionKind::Skip,
        }
    }
}

/// The user's requested resolution before it is bound to a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateActionKind {
    Create,
    Merge,
    Skip,
}

impl CandidateActionKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Merge => "merge",
            Self::Skip => "skip",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "merge" => Some(Self::Merge),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("candidate {index} has no duplicate to merge into")]
    NoDuplicate { index: usize },
    #[error("no candidate at position {index}")]
    UnknownCandidate { index: usize },
}

/// One property's worth of extracted data plus its resolution state.
///
/// The action and duplicate are only mutated through methods so that a merge
/// always points at the duplicate currently attached to the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub fields: PropertyFields,
    pub average_confidence: f32,
    duplicate: Option<ExistingProperty>,
    action: CandidateAction,
}

impl ExtractionCandidate {
    pub fn new(fields: PropertyFields) -> Self {
        let average_confidence = fields.average_confidence();
        Self {
            fields,
            average_confidence,
            duplicate: None,
            action: CandidateAction::Create,
        }
    }

    pub fn with_average_confidence(mut self, value: f32) -> Self {
        self.average_confidence = clamp_confidence(value);
        self
    }

    pub fn duplicate(&self) -> Option<&ExistingProperty> {
        self.duplicate.as_ref()
    }

    pub fn action(&self) -> &CandidateAction {
        &self.action
    }

    /// Attach or detach the matching library property.
    ///
    /// Any merge is dropped back to `Create` when the duplicate changes.
    pub fn set_duplicate(&mut self, duplicate: Option<ExistingProperty>) {
        let unchanged = match (&self.duplicate, &duplicate) {
            (Some(current), Some(next)) => current.id == next.id,
            (None, None) => true,
            _ => false,
        };
        if !unchanged && matches!(self.action, CandidateAction::Merge(_)) {
            self.action = CandidateAction::Create;
        }
        self.duplicate = duplicate;
    }

    pub(crate) fn set_action(
        &mut self,
        index: usize,
        kind: CandidateActionKind,
    ) -> Result<(), ResolutionError> {
        self.action = match kind {
            CandidateActionKind::Create => CandidateAction::Create,
            CandidateActionKind::Skip => CandidateAction::Skip,
            CandidateActionKind::Merge => match &self.duplicate {
                Some(existing) => CandidateAction::Merge(existing.id.clone()),
                None => return Err(ResolutionError::NoDuplicate { index }),
            },
        };
        Ok(())
    }
}

/// The result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSession {
    pub id: SessionId,
    pub document_type: DocumentType,
    pub created_at: DateTime<Utc>,
    candidates: Vec<ExtractionCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    legacy: Option<ExtractionCandidate>,
}

impl ImportSession {
    pub fn new(document_type: DocumentType, candidates: Vec<ExtractionCandidate>) -> Self {
        Self {
            id: SessionId::new(),
            document_type,
            created_at: Utc::now(),
            candidates,
            legacy: None,
        }
    }

    /// Session built from a provider that answered with a single property object.
    pub fn from_legacy(document_type: DocumentType, candidate: ExtractionCandidate) -> Self {
        Self {
            legacy: Some(candidate),
            ..Self::new(document_type, Vec::new())
        }
    }

    pub fn candidates(&self) -> &[ExtractionCandidate] {
        &self.candidates
    }

    pub fn legacy(&self) -> Option<&ExtractionCandidate> {
        self.legacy.as_ref()
    }

    /// Candidates that take part in duplicate matching and review, in provider order.
    ///
    /// A legacy session exposes its single candidate at position zero.
    pub fn reviewable(&self) -> Vec<&ExtractionCandidate> {
        if self.candidates.is_empty() {
            self.legacy.iter().collect()
        } else {
            self.candidates.iter().collect()
        }
    }

    pub(crate) fn reviewable_mut(&mut self) -> Vec<&mut ExtractionCandidate> {
        if self.candidates.is_empty() {
            self.legacy.iter_mut().collect()
        } else {
            self.candidates.iter_mut().collect()
        }
    }

    pub fn reviewable_mut_at(
        &mut self,
        index: usize,
    ) -> Result<&mut ExtractionCandidate, ResolutionError> {
        self.reviewable_mut()
            .into_iter()
            .nth(index)
            .ok_or(ResolutionError::UnknownCandidate { index })
    }

    /// Set the action of the candidate at `index`, binding merges to its duplicate.
    pub fn resolve(
        &mut self,
        index: usize,
        kind: CandidateActionKind,
    ) -> Result<(), ResolutionError> {
        self.reviewable_mut_at(index)?.set_action(index, kind)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.legacy.is_none()
    }

    pub fn pending_commits(&self) -> usize {
        self.reviewable()
            .iter()
            .filter(|candidate| candidate.action() != &CandidateAction::Skip)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(id: &str) -> ExistingProperty {
        ExistingProperty {
            id: PropertyId(id.to_string()),
            address: "123 Main St".to_string(),
            city: Some("Springfield".to_string()),
            municipality: None,
            sale_price: Some(350_000),
        }
    }

    fn fields(address: &str) -> PropertyFields {
        PropertyFields {
            address: Some(ExtractedField::new(address.to_string(), 0.9)),
            sale_price: Some(ExtractedField::new(350_000, 0.7)),
            ..PropertyFields::default()
        }
    }

    #[test]
    fn candidate_defaults_to_create_without_duplicate() {
        let candidate = ExtractionCandidate::new(fields("123 Main St"));
        assert_eq!(candidate.action(), &CandidateAction::Create);
        assert!(candidate.duplicate().is_none());
        assert!((candidate.average_confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn merge_requires_a_duplicate() {
        let candidate = ExtractionCandidate::new(fields("1 A St"));
        let mut session = ImportSession::new(DocumentType::Sale, vec![candidate]);

        let error = session
            .resolve(0, CandidateActionKind::Merge)
            .expect_err("merge without duplicate");
        assert_eq!(error, ResolutionError::NoDuplicate { index: 0 });
        assert_eq!(session.candidates()[0].action(), &CandidateAction::Create);
    }

    #[test]
    fn clearing_duplicate_resets_merge_to_create() {
        let mut candidate = ExtractionCandidate::new(fields("123 Main St"));
        candidate.set_duplicate(Some(existing("p1")));
        candidate
            .set_action(0, CandidateActionKind::Merge)
            .expect("merge allowed");
        assert_eq!(
            candidate.action(),
            &CandidateAction::Merge(PropertyId("p1".to_string()))
        );

        candidate.set_duplicate(None);
        assert_eq!(candidate.action(), &CandidateAction::Create);
    }

    #[test]
    fn swapping_duplicate_resets_merge_but_keeping_it_does_not() {
        let mut candidate = ExtractionCandidate::new(fields("123 Main St"));
        candidate.set_duplicate(Some(existing("p1")));
        candidate
            .set_action(0, CandidateActionKind::Merge)
            .expect("merge allowed");

        candidate.set_duplicate(Some(existing("p1")));
        assert!(matches!(candidate.action(), CandidateAction::Merge(_)));

        candidate.set_duplicate(Some(existing("p2")));
        assert_eq!(candidate.action(), &CandidateAction::Create);
    }

    #[test]
    fn skip_leaves_duplicate_untouched() {
        let mut candidate = ExtractionCandidate::new(fields("123 Main St"));
        candidate.set_duplicate(Some(existing("p1")));
        candidate
            .set_action(0, CandidateActionKind::Skip)
            .expect("skip always allowed");
        assert_eq!(candidate.action(), &CandidateAction::Skip);
        assert_eq!(candidate.duplicate().map(|d| d.id.0.as_str()), Some("p1"));
    }

    #[test]
    fn blank_address_is_treated_as_missing() {
        let candidate = ExtractionCandidate::new(fields("   "));
        assert!(candidate.fields.address().is_none());
        assert!(PropertyFields::default().address().is_none());
        assert_eq!(PropertyFields::default().average_confidence(), 0.0);
    }

    #[test]
    fn legacy_session_reviews_its_single_candidate() {
        let candidate = ExtractionCandidate::new(fields("9 Elm"));
        let mut session = ImportSession::from_legacy(DocumentType::Sale, candidate);
        assert_eq!(session.reviewable().len(), 1);
        session
            .resolve(0, CandidateActionKind::Skip)
            .expect("skip legacy");
        assert_eq!(
            session.legacy().map(|candidate| candidate.action().clone()),
            Some(CandidateAction::Skip)
        );
        assert_eq!(session.pending_commits(), 0);
        assert!(matches!(
            session.resolve(1, CandidateActionKind::Skip),
            Err(ResolutionError::UnknownCandidate { index: 1 })
        ));
    }

    #[test]
    fn document_type_codes_round_trip() {
        for kind in DocumentType::ordered() {
            assert_eq!(DocumentType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(DocumentType::from_code(" SALE "), Some(DocumentType::Sale));
        assert_eq!(DocumentType::from_code("deed"), None);
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        assert_eq!(ExtractedField::new(1u64, 1.7).confidence, 1.0);
        assert_eq!(ExtractedField::new(1u64, -0.2).confidence, 0.0);
        assert_eq!(ExtractedField::new(1u64, f32::NAN).confidence, 0.0);
    }
}
