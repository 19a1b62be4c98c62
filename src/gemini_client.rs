use crate::inference::{GenerationRequest, InferenceClient, InferenceError, RemoteFile};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

/// Client for the Gemini REST API (generation and file storage).
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    mime_type: Option<String>,
}

impl GeminiClient {
    /// Creates a new `GeminiClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://generativelanguage.googleapis.com`.
    /// * `api_key` - Google API key, sent as `x-goog-api-key`.
    /// * `model` - Model id, e.g. `gemini-2.5-flash`.
    /// * `timeout` - Per-request deadline.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                InferenceError::Transport(format!("Failed to create Gemini client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn request_body(request: &GenerationRequest<'_>) -> Value {
        let mut parts = Vec::new();
        if let Some(file) = request.file {
            parts.push(json!({
                "file_data": {
                    "mime_type": file.mime_type,
                    "file_uri": file.uri
                }
            }));
        }
        parts.push(json!({ "text": request.prompt }));

        let mut generation_config = serde_json::Map::new();
        generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        if let Some(schema) = request.schema {
            generation_config.insert("responseSchema".to_string(), schema.clone());
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, InferenceError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(InferenceError::ServiceUnavailable(error_text));
        }
        Err(InferenceError::Http {
            status: status.as_u16(),
            body: error_text,
        })
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, InferenceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::debug!(
            "Gemini generateContent (model={}, attachment={}, schema={})",
            self.model,
            request.file.is_some(),
            request.schema.is_some()
        );

        let response = self
            .send(self.client.post(&url).json(&Self::request_body(&request)))
            .await?;

        let data: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidReply(e.to_string()))?;

        let text: String = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(InferenceError::EmptyResponse);
        }
        Ok(text)
    }

    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteFile, InferenceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| InferenceError::Upload(format!("{}: {}", path.display(), e)))?;
        let url = format!("{}/upload/v1beta/files", self.base_url);
        tracing::info!("Uploading {} bytes ({}) to Gemini", bytes.len(), mime_type);

        let response = self
            .send(
                self.client
                    .post(&url)
                    .header("X-Goog-Upload-Protocol", "raw")
                    .header("Content-Type", mime_type)
                    .body(bytes),
            )
            .await?;

        let data: UploadResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidReply(format!("upload reply: {}", e)))?;

        tracing::info!("✓ Uploaded file registered as {}", data.file.name);
        Ok(RemoteFile {
            name: data.file.name,
            uri: data.file.uri,
            mime_type: data.file.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn delete_file(&self, name: &str) -> Result<(), InferenceError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        self.send(self.client.delete(&url)).await?;
        tracing::debug!("Deleted remote file {}", name);
        Ok(())
    }
}
