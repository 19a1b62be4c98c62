use crate::config::Config;
use crate::document_insight::{DocumentInsightService, InsightError, SoilReportUpload};
use crate::errors::AppError;
use crate::models::{SoilReportInsight, SoilSample};
use crate::prediction::{PredictionOutcome, Predictor};
use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Classifier-first crop and fertilizer recommendations.
    pub predictor: Predictor,
    /// Soil report upload pipeline.
    pub insight: DocumentInsightService,
}

/// Routes that skip rate limiting (liveness and health probes).
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

/// API and documentation routes. `main` wraps these in the rate limiter.
///
/// `body_limit` bounds request bodies, including multipart framing.
pub fn api_routes(body_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        .route("/predict", post(predict))
        .route("/api/analyze-soil-report", post(analyze_soil_report))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness message.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Crop & Fertilizer Recommendation API is running"
    }))
}

/// Health check endpoint.
///
/// Returns the service status, version, and whether the classifier artifacts
/// were loaded at startup.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "soil-advisor-api",
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": state.predictor.model_loaded(),
            "llm_backend": if state.config.use_gemini { "gemini" } else { "offline" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// POST /predict
///
/// Recommends a crop and fertilizer for one soil sample. The classifier runs
/// first; on any classifier failure the LLM fallback answers instead. When
/// both fail the response is still HTTP 200 with an error payload.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `payload` - Soil sample JSON (`District_Name`, `Nitrogen`, ...).
///
/// # Returns
///
/// * `Result<Json<PredictionOutcome>, AppError>` - The recommendation (or the
///   combined failure payload), or 400 for an unreadable body.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SoilSample>, JsonRejection>,
) -> Result<Json<PredictionOutcome>, AppError> {
    let Json(sample) = payload.map_err(|rejection| {
        tracing::warn!("Rejected /predict body: {}", rejection.body_text());
        AppError::BadRequest(rejection.body_text())
    })?;

    tracing::info!("POST /predict - district: {}", sample.district);
    let outcome = state.predictor.predict(&sample).await;
    Ok(Json(outcome))
}

/// POST /api/analyze-soil-report
///
/// Accepts a multipart upload (field `file`, PDF/PNG/JPEG), extracts the soil
/// readings with the LLM and returns them together with an LLM analysis.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `multipart` - The multipart form body.
///
/// # Returns
///
/// * `Result<Json<SoilReportInsight>, InsightError>` - Extracted data and analysis,
///   or a status-coded error body naming the failed stage.
pub async fn analyze_soil_report(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SoilReportInsight>, InsightError> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(rejected_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(rejected_multipart)?;
        upload = Some(SoilReportUpload {
            file_name,
            content_type,
            bytes,
        });
        break;
    }

    let upload = upload.ok_or_else(|| {
        InsightError::Rejected(AppError::BadRequest(
            "No file uploaded (expected multipart field 'file')".to_string(),
        ))
    })?;

    let insight = state.insight.analyze(upload).await?;
    Ok(Json(insight))
}

fn rejected_multipart(err: MultipartError) -> InsightError {
    let error = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(err.body_text())
    };
    InsightError::Rejected(error)
}

/// Serves the OpenAPI specification YAML file from the working directory.
pub async fn serve_openapi_spec() -> impl IntoResponse {
    match tokio::fs::read_to_string("openapi.yml").await {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/yaml")],
            content,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("openapi.yml not readable: {}", e);
            (StatusCode::NOT_FOUND, "OpenAPI spec not found").into_response()
        }
    }
}

/// Serves a Swagger UI page pointed at `/api-docs/openapi.yml`.
pub async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Soil Advisor API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({ url: "/api-docs/openapi.yml", dom_id: '#swagger-ui' });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}
