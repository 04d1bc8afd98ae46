use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::credentials::ProviderCredentials;
use super::domain::{DocumentType, ExtractionCandidate, ImportSession, PropertyFields, UploadedFile};

/// Raw document handed to the extraction provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionInput {
    File(UploadedFile),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub input: ExtractionInput,
    pub document_type: DocumentType,
    pub credentials: ProviderCredentials,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction service unreachable: {0}")]
    Transport(String),
    #[error("extraction provider answered {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("malformed extraction response: {0}")]
    Malformed(String),
}

/// One call to the AI extraction provider. Implementations make a single attempt.
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError>;
}

/// Provider payload before it becomes an [`ImportSession`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<RawCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<PropertyFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    #[serde(alias = "extractedData")]
    pub fields: PropertyFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f32>,
}

impl RawCandidate {
    fn into_candidate(self) -> ExtractionCandidate {
        let candidate = ExtractionCandidate::new(self.fields);
        match self.average_confidence {
            Some(value) => candidate.with_average_confidence(value),
            None => candidate,
        }
    }
}

impl RawExtraction {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ExtractionError> {
        serde_json::from_reader(reader).map_err(|err| ExtractionError::Malformed(err.to_string()))
    }

    /// Build a session, preferring the multi-property list over the legacy shape.
    pub fn into_session(self, document_type: DocumentType) -> Result<ImportSession, ExtractionError> {
        if let Some(properties) = self.properties {
            let candidates = properties
                .into_iter()
                .map(RawCandidate::into_candidate)
                .collect();
            return Ok(ImportSession::new(document_type, candidates));
        }

        match self.extracted_data {
            Some(fields) => {
                let candidate = RawCandidate {
                    fields,
                    average_confidence: self.average_confidence,
                }
                .into_candidate();
                Ok(ImportSession::from_legacy(document_type, candidate))
            }
            None => Err(ExtractionError::Malformed(
                "response carried neither properties nor extractedData".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtractionPayload<'a> {
    document_type: &'a str,
    provider: &'a str,
    api_key: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_base64: Option<String>,
}

impl<'a> ExtractionPayload<'a> {
    fn from_request(request: &'a ExtractionRequest) -> Self {
        let credentials = &request.credentials;
        let mut payload = Self {
            document_type: request.document_type.code(),
            provider: credentials.provider.code(),
            api_key: &credentials.api_key,
            model: &credentials.model,
            text: None,
            file_name: None,
            content_type: None,
            file_base64: None,
        };

        match &request.input {
            ExtractionInput::Text(text) => payload.text = Some(text),
            ExtractionInput::File(file) => {
                payload.file_name = Some(&file.name);
                payload.content_type = Some(&file.content_type);
                payload.file_base64 = Some(BASE64.encode(&file.bytes));
            }
        }

        payload
    }
}

/// Gateway posting documents to the server-side extraction function.
///
/// The server owns provider selection; an empty API key asks it to use the
/// shared credentials.
#[derive(Debug, Clone)]
pub struct HttpExtractionGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExtractionGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ExtractionGateway for HttpExtractionGateway {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        let payload = ExtractionPayload::from_request(request);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ExtractionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<RawExtraction>()
            .await
            .map_err(|err| ExtractionError::Malformed(err.to_string()))
    }
}

/// Replays a provider response captured earlier, for offline runs and demos.
#[derive(Debug, Clone)]
pub struct RecordedExtractionGateway {
    recorded: RawExtraction,
}

impl RecordedExtractionGateway {
    pub fn new(recorded: RawExtraction) -> Self {
        Self { recorded }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ExtractionError> {
        let file = std::fs::File::open(path.as_ref()).map_err(|err| {
            ExtractionError::Transport(format!("{}: {err}", path.as_ref().display()))
        })?;
        Ok(Self::new(RawExtraction::from_reader(file)?))
    }
}

#[async_trait]
impl ExtractionGateway for RecordedExtractionGateway {
    async fn extract(&self, _request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        Ok(self.recorded.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::import::credentials::AiProvider;
    use crate::workflows::import::domain::CandidateAction;

    const MULTI: &str = r#"{
        "properties": [
            {
                "fields": {
                    "address": { "value": "123 Main St", "confidence": 0.94 },
                    "city": { "value": "Springfield", "confidence": 0.9 },
                    "sale_price": { "value": 412000, "confidence": 0.8 }
                }
            },
            {
                "fields": { "address": { "value": "125 Main St", "confidence": 0.6 } },
                "averageConfidence": 0.55
            }
        ]
    }"#;

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            provider: AiProvider::OpenAi,
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn builds_candidates_in_provider_order() {
        let raw = RawExtraction::from_reader(MULTI.as_bytes()).expect("valid json");
        let session = raw.into_session(DocumentType::Listing).expect("session");

        let addresses: Vec<_> = session
            .candidates()
            .iter()
            .map(|candidate| candidate.fields.address().unwrap_or_default().to_string())
            .collect();
        assert_eq!(addresses, vec!["123 Main St", "125 Main St"]);
        assert!((session.candidates()[0].average_confidence - 0.88).abs() < 1e-4);
        assert!((session.candidates()[1].average_confidence - 0.55).abs() < 1e-6);
        assert!(session
            .candidates()
            .iter()
            .all(|candidate| candidate.action() == &CandidateAction::Create));
        assert!(session.legacy().is_none());
    }

    #[test]
    fn falls_back_to_legacy_single_property_shape() {
        let raw = RawExtraction::from_reader(
            r#"{ "extractedData": { "address": { "value": "9 Elm Rd", "confidence": 0.7 } } }"#
                .as_bytes(),
        )
        .expect("valid json");
        let session = raw.into_session(DocumentType::Sale).expect("legacy session");

        assert!(session.candidates().is_empty());
        let legacy = session.legacy().expect("legacy candidate");
        assert_eq!(legacy.fields.address(), Some("9 Elm Rd"));
    }

    #[test]
    fn rejects_payload_without_any_property() {
        let raw = RawExtraction::from_reader(r#"{ "status": "ok" }"#.as_bytes()).expect("json");
        assert!(matches!(
            raw.into_session(DocumentType::Sale),
            Err(ExtractionError::Malformed(_))
        ));
        assert!(matches!(
            RawExtraction::from_reader("not json".as_bytes()),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn payload_encodes_files_and_passes_credentials_through() {
        let request = ExtractionRequest {
            input: ExtractionInput::File(UploadedFile::pdf("deed.pdf", b"%PDF-1.4".to_vec())),
            document_type: DocumentType::Sale,
            credentials: credentials(),
        };
        let payload = serde_json::to_value(ExtractionPayload::from_request(&request))
            .expect("serializes");

        assert_eq!(payload["document_type"], "sale");
        assert_eq!(payload["provider"], "openai");
        assert_eq!(payload["api_key"], "");
        assert_eq!(payload["file_name"], "deed.pdf");
        assert_eq!(payload["content_type"], "application/pdf");
        assert_eq!(payload["file_base64"], "JVBERi0xLjQ=");
        assert!(payload.get("text").is_none());
    }

    #[tokio::test]
    async fn recorded_gateway_replays_response() {
        let raw = RawExtraction::from_reader(MULTI.as_bytes()).expect("valid json");
        let gateway = RecordedExtractionGateway::new(raw.clone());
        let request = ExtractionRequest {
            input: ExtractionInput::Text("123 Main St, Springfield".to_string()),
            document_type: DocumentType::Sale,
            credentials: credentials(),
        };

        let replayed = gateway.extract(&request).await.expect("replay");
        assert_eq!(replayed, raw);
    }
}
