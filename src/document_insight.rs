//! Soil report insight: upload a lab report (PDF or image), have the LLM
//! extract the soil readings, then have it analyze them.
//!
//! Per request: validate -> stage temp file -> upload -> extract -> analyze.
//! The local temp file and the remote upload are released on every path,
//! and release failures are only logged.

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::inference::{GenerationRequest, InferenceClient, InferenceError, RemoteFile};
use crate::models::{ExtractionResult, LlmRecommendation, SoilReportInsight};
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::{parse_strict, ParseFailure, ResponseSchema};

/// Accepted MIME types and the suffix used for the staged temp file.
const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("application/pdf", ".pdf"),
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
];

const EXTRACTION_PROMPT: &str = "You are a data extraction AI.
Extract from the attached soil test report:
District Name, Nitrogen, Phosphorus, Potassium,
Organic Carbon, pH, Rainfall, Sulphur, Zinc, Iron.
Use null for Sulphur, Zinc or Iron when the report does not list them.
Return STRICT JSON only.";

/// An uploaded soil report as received from the client.
#[derive(Debug, Clone)]
pub struct SoilReportUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Pipeline step an inference failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStage {
    Upload,
    Extraction,
    Analysis,
}

impl std::fmt::Display for InsightStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InsightStage::Upload => "upload",
            InsightStage::Extraction => "extraction",
            InsightStage::Analysis => "analysis",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    /// Rejected before any external call.
    #[error("{0}")]
    Rejected(AppError),
    /// Local failure (temp file staging).
    #[error("{0}")]
    Internal(#[from] AppError),
    /// The inference service failed (after retries, for transient failures).
    #[error("{stage} failed: {source}")]
    Service {
        stage: InsightStage,
        source: InferenceError,
        extracted: Option<ExtractionResult>,
    },
    /// The model replied with JSON that does not match the schema.
    #[error("{stage} failed: {failure}")]
    MalformedJson {
        stage: InsightStage,
        failure: ParseFailure,
        extracted: Option<ExtractionResult>,
    },
}

impl IntoResponse for InsightError {
    /// Service and parse failures keep whatever extraction succeeded in the
    /// body so the client can still show it.
    fn into_response(self) -> Response {
        match self {
            InsightError::Rejected(e) | InsightError::Internal(e) => e.into_response(),
            InsightError::Service {
                stage,
                source,
                extracted,
            } => {
                let (status, message) = if source.is_transient() {
                    tracing::warn!("AI service unavailable during {}: {}", stage, source);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "AI service temporarily unavailable. Try again later.".to_string(),
                    )
                } else {
                    tracing::error!("AI service error during {}: {}", stage, source);
                    (StatusCode::BAD_GATEWAY, format!("AI service error: {}", source))
                };
                let body = json!({
                    "error": message,
                    "stage": stage,
                    "extracted_data": extracted,
                    "ai_analysis_data": null,
                });
                (status, Json(body)).into_response()
            }
            InsightError::MalformedJson {
                stage,
                failure,
                extracted,
            } => {
                tracing::error!(
                    "Malformed JSON during {}: {} | raw: {}",
                    stage,
                    failure.reason,
                    failure.raw
                );
                let body = json!({
                    "error": format!("AI returned malformed JSON during {}", stage),
                    "stage": stage,
                    "reason": failure.reason,
                    "raw_response": failure.raw,
                    "extracted_data": extracted,
                    "ai_analysis_data": null,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
        }
    }
}

/// Orchestrates one soil report analysis per call.
#[derive(Clone)]
pub struct DocumentInsightService {
    llm: Arc<dyn InferenceClient>,
    retry: RetryPolicy,
    max_upload_bytes: usize,
}

impl DocumentInsightService {
    pub fn new(llm: Arc<dyn InferenceClient>, retry: RetryPolicy, max_upload_bytes: usize) -> Self {
        Self {
            llm,
            retry,
            max_upload_bytes,
        }
    }

    /// Check type and size. Returns the resolved MIME type and temp file suffix.
    pub fn validate(
        &self,
        upload: &SoilReportUpload,
    ) -> Result<(&'static str, &'static str), AppError> {
        let (mime, suffix) = resolve_type(upload).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unsupported file type '{}'. Upload a PDF, PNG or JPEG report",
                upload.content_type.as_deref().unwrap_or("unknown")
            ))
        })?;

        if upload.bytes.is_empty() {
            return Err(AppError::BadRequest("Empty file received".to_string()));
        }
        if upload.bytes.len() > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File too large (max {}MB)",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }
        Ok((mime, suffix))
    }

    /// Full pipeline for one upload.
    pub async fn analyze(
        &self,
        upload: SoilReportUpload,
    ) -> Result<SoilReportInsight, InsightError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("soil_report", %request_id);

        async move {
            let (mime, suffix) = self.validate(&upload).map_err(InsightError::Rejected)?;
            tracing::info!(
                "Analyzing soil report {:?} ({}, {} bytes)",
                upload.file_name,
                mime,
                upload.bytes.len()
            );

            // Dropping `staged` removes the local file on every early return
            let staged = stage_temp_file(&upload.bytes, suffix).await?;

            let remote = with_retry(
                "soil report upload",
                &self.retry,
                InferenceError::is_transient,
                || self.llm.upload_file(staged.path(), mime),
            )
            .await
            .map_err(|source| InsightError::Service {
                stage: InsightStage::Upload,
                source,
                extracted: None,
            })?;

            // Dropping `remote` before `release` (request cancelled) still
            // deletes the upload from a background task
            let remote = RemoteUpload::new(self.llm.clone(), remote);
            let outcome = self.extract_and_analyze(remote.file()).await;

            remote.release().await;
            release_local(staged);

            match &outcome {
                Ok(insight) => tracing::info!(
                    "Soil report analyzed: district={}, crop={}",
                    insight.extracted_data.district,
                    insight.ai_analysis_data.recommended_crop
                ),
                Err(e) => tracing::warn!("Soil report analysis failed: {}", e),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn extract_and_analyze(
        &self,
        remote: &RemoteFile,
    ) -> Result<SoilReportInsight, InsightError> {
        let extraction_request = GenerationRequest::json(EXTRACTION_PROMPT)
            .with_file(remote)
            .with_schema(ExtractionResult::schema());
        let raw = with_retry(
            "soil report extraction",
            &self.retry,
            InferenceError::is_transient,
            || self.llm.generate(extraction_request),
        )
        .await
        .map_err(|source| InsightError::Service {
            stage: InsightStage::Extraction,
            source,
            extracted: None,
        })?;

        let extracted: ExtractionResult =
            parse_strict(&raw).map_err(|failure| InsightError::MalformedJson {
                stage: InsightStage::Extraction,
                failure,
                extracted: None,
            })?;
        tracing::debug!("Extracted soil data for district {}", extracted.district);

        let prompt = analysis_prompt(&extracted);
        let analysis_request =
            GenerationRequest::json(&prompt).with_schema(LlmRecommendation::schema());
        let raw = match with_retry(
            "soil report analysis",
            &self.retry,
            InferenceError::is_transient,
            || self.llm.generate(analysis_request),
        )
        .await
        {
            Ok(raw) => raw,
            Err(source) => {
                return Err(InsightError::Service {
                    stage: InsightStage::Analysis,
                    source,
                    extracted: Some(extracted),
                })
            }
        };

        let analysis: LlmRecommendation = match parse_strict(&raw) {
            Ok(analysis) => analysis,
            Err(failure) => {
                return Err(InsightError::MalformedJson {
                    stage: InsightStage::Analysis,
                    failure,
                    extracted: Some(extracted),
                })
            }
        };

        Ok(SoilReportInsight {
            extracted_data: extracted,
            ai_analysis_data: analysis.into_result(),
        })
    }
}

/// A file registered with the inference service for the length of one request.
struct RemoteUpload {
    llm: Arc<dyn InferenceClient>,
    file: RemoteFile,
    released: bool,
}

impl RemoteUpload {
    fn new(llm: Arc<dyn InferenceClient>, file: RemoteFile) -> Self {
        Self {
            llm,
            file,
            released: false,
        }
    }

    fn file(&self) -> &RemoteFile {
        &self.file
    }

    async fn release(mut self) {
        delete_remote(self.llm.as_ref(), &self.file.name).await;
        self.released = true;
    }
}

impl Drop for RemoteUpload {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let name = std::mem::take(&mut self.file.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let llm = self.llm.clone();
                tracing::debug!("Request dropped, deleting remote file {} in background", name);
                handle.spawn(async move { delete_remote(llm.as_ref(), &name).await });
            }
            Err(_) => tracing::warn!("No runtime left to delete remote file {}", name),
        }
    }
}

async fn delete_remote(llm: &dyn InferenceClient, name: &str) {
    if let Err(e) = llm.delete_file(name).await {
        tracing::warn!("Failed to delete remote file {}: {}", name, e);
    }
}

async fn stage_temp_file(bytes: &[u8], suffix: &str) -> Result<NamedTempFile, AppError> {
    let staged = tempfile::Builder::new()
        .prefix("soil-report-")
        .suffix(suffix)
        .tempfile()
        .context("Failed to create temp file for upload")?;
    tokio::fs::write(staged.path(), bytes)
        .await
        .with_context(|| format!("Failed to write upload to {}", staged.path().display()))?;
    Ok(staged)
}

fn release_local(staged: NamedTempFile) {
    let path = staged.path().to_path_buf();
    if let Err(e) = staged.close() {
        tracing::warn!("Failed to remove temp file {}: {}", path.display(), e);
    }
}

/// MIME type from the declared content type, falling back to the file
/// extension when the client sent none (or a generic one).
fn resolve_type(upload: &SoilReportUpload) -> Option<(&'static str, &'static str)> {
    let declared = upload
        .content_type
        .as_deref()
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

    let mime = match declared {
        Some(ct) if ct == "image/jpg" => "image/jpeg".to_string(),
        Some(ct) => ct,
        None => {
            let extension = upload
                .file_name
                .as_deref()
                .and_then(|name| Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())?;
            match extension.as_str() {
                "pdf" => "application/pdf".to_string(),
                "png" => "image/png".to_string(),
                "jpg" | "jpeg" => "image/jpeg".to_string(),
                _ => return None,
            }
        }
    };

    ACCEPTED_TYPES
        .iter()
        .find(|(accepted, _)| *accepted == mime)
        .copied()
}

fn analysis_prompt(extracted: &ExtractionResult) -> String {
    let data = serde_json::to_string_pretty(extracted).unwrap_or_default();
    format!(
        r#"You are an agricultural expert.
Analyze this soil data:

{data}

Return STRICT JSON only. Sample:
{{
    "soil_health_analysis": "Balanced soil with moderate nutrients.",
    "soil_health_score": "75",
    "soil_health_grade": "Good",
    "recommended_crop": "Cotton",
    "recommended_fertilizer": "DAP",
    "top_crops": [{{"crop": "Cotton", "probability": 62.5}}, {{"crop": "Soybean", "probability": 21.0}}],
    "top_fertilizers": [{{"fertilizer": "DAP", "probability": 55.0}}, {{"fertilizer": "Urea", "probability": 30.0}}]
}}
List up to 5 crops and 5 fertilizers, most suitable first, probabilities 0-100."#
    )
}
