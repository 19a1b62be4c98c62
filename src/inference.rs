//! Seam between the orchestrators and the external LLM service.
//!
//! Orchestrators only see [`InferenceClient`]; the Gemini REST client and the
//! offline stand-in both implement it, and tests substitute scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Failure classes of the inference service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// HTTP 503. The only class the retry policy retries.
    #[error("inference service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("inference service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("inference request failed: {0}")]
    Transport(String),
    #[error("inference reply could not be decoded: {0}")]
    InvalidReply(String),
    #[error("inference reply contained no text")]
    EmptyResponse,
    #[error("failed to read upload: {0}")]
    Upload(String),
}

impl InferenceError {
    /// Retry predicate for [`crate::retry::with_retry`].
    pub fn is_transient(&self) -> bool {
        matches!(self, InferenceError::ServiceUnavailable(_))
    }
}

/// A file registered with the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Resource name used for deletion, e.g. `files/abc123`.
    pub name: String,
    /// URI referenced from generation requests.
    pub uri: String,
    pub mime_type: String,
}

/// One schema-constrained generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub file: Option<&'a RemoteFile>,
    /// Response schema; the reply is always requested as JSON.
    pub schema: Option<&'a Value>,
}

impl<'a> GenerationRequest<'a> {
    pub fn json(prompt: &'a str) -> Self {
        Self {
            prompt,
            file: None,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: &'a Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_file(mut self, file: &'a RemoteFile) -> Self {
        self.file = Some(file);
        self
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a generation call and return the raw reply text.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, InferenceError>;

    /// Register a local file with the service.
    async fn upload_file(&self, path: &Path, mime_type: &str)
        -> Result<RemoteFile, InferenceError>;

    async fn delete_file(&self, name: &str) -> Result<(), InferenceError>;
}

// ============ Offline Client ============

/// Canned replies for running the whole pipeline without network access
/// (`USE_GEMINI=false`).
#[derive(Debug, Clone, Default)]
pub struct OfflineInferenceClient;

pub const OFFLINE_EXTRACTION: &str = r#"{
  "District_Name": "Kolhapur",
  "Nitrogen": 45,
  "Phosphorus": 32,
  "Potassium": 40,
  "Organic_Carbon": 0.75,
  "pH": 6.8,
  "Rainfall": 900,
  "Sulphur": 10,
  "Zinc": 1.2,
  "Iron": 3.5
}"#;

pub const OFFLINE_ANALYSIS: &str = r#"{
  "soil_health_analysis": "Balanced soil with moderate nutrients.",
  "soil_health_score": "75",
  "soil_health_grade": "Good",
  "recommended_crop": "Cotton",
  "recommended_fertilizer": "DAP",
  "top_crops": [],
  "top_fertilizers": []
}"#;

#[async_trait]
impl InferenceClient for OfflineInferenceClient {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, InferenceError> {
        // Attachment present means this is the extraction step
        if request.file.is_some() {
            Ok(OFFLINE_EXTRACTION.to_string())
        } else {
            Ok(OFFLINE_ANALYSIS.to_string())
        }
    }

    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteFile, InferenceError> {
        tracing::debug!("Offline upload of {}", path.display());
        Ok(RemoteFile {
            name: "files/offline".to_string(),
            uri: "offline://files/offline".to_string(),
            mime_type: mime_type.to_string(),
        })
    }

    async fn delete_file(&self, _name: &str) -> Result<(), InferenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(InferenceError::ServiceUnavailable("503".to_string()).is_transient());
        assert!(!InferenceError::Http {
            status: 500,
            body: "boom".to_string()
        }
        .is_transient());
        assert!(!InferenceError::EmptyResponse.is_transient());
    }

    #[tokio::test]
    async fn test_offline_replies_parse() {
        let client = OfflineInferenceClient;
        let file = client
            .upload_file(Path::new("/tmp/report.pdf"), "application/pdf")
            .await
            .unwrap();

        let extraction = client
            .generate(GenerationRequest::json("extract").with_file(&file))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&extraction).unwrap();
        assert_eq!(value["District_Name"], "Kolhapur");

        let analysis = client
            .generate(GenerationRequest::json("analyze"))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&analysis).unwrap();
        assert_eq!(value["recommended_crop"], "Cotton");
    }
}
