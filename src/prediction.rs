//! Crop and fertilizer prediction.
//!
//! The classifier path runs first. Its failure is an explicit
//! [`PredictionFailure`] value, and any failure switches to the LLM fallback.
//! [`Predictor::predict`] never returns an error: the worst case is a
//! [`PredictionOutcome::Failed`] naming both causes.

use serde::Serialize;
use std::sync::Arc;

use crate::classifier::{top_indices, ModelBundle, ModelError};
use crate::inference::{GenerationRequest, InferenceClient, InferenceError};
use crate::models::{
    CropProbability, FertilizerProbability, LlmRecommendation, RecommendationResult,
    RecommendationSource, SoilSample, TOP_N,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::schema::{parse_lenient, ParseFailure, ResponseSchema};
use crate::soil_health;

/// Why the classifier path did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum PredictionFailure {
    #[error("classifier artifacts are not loaded")]
    ModelUnavailable,
    #[error("district '{0}' is not in the trained vocabulary")]
    UnknownDistrict(String),
    #[error("invalid features: {0}")]
    InvalidFeatures(String),
    #[error("classifier error: {0}")]
    Artifact(#[from] ModelError),
}

/// Why the LLM fallback did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum FallbackFailure {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("{0} (raw: {})", .0.raw)]
    Parse(#[from] ParseFailure),
}

/// Terminal error payload when both paths failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionError {
    pub error: String,
    pub model_error: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionOutcome {
    Recommendation(RecommendationResult),
    Failed(PredictionError),
}

/// Holds the read-only classifier artifacts and the inference client.
#[derive(Clone)]
pub struct Predictor {
    models: Option<Arc<ModelBundle>>,
    llm: Arc<dyn InferenceClient>,
    retry: RetryPolicy,
}

impl Predictor {
    pub fn new(
        models: Option<Arc<ModelBundle>>,
        llm: Arc<dyn InferenceClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self { models, llm, retry }
    }

    pub fn model_loaded(&self) -> bool {
        self.models.is_some()
    }

    /// Classifier first, LLM on any classifier failure.
    pub async fn predict(&self, sample: &SoilSample) -> PredictionOutcome {
        let model_failure = match self.predict_with_model(sample) {
            Ok(result) => return PredictionOutcome::Recommendation(result),
            Err(failure) => failure,
        };

        tracing::warn!(
            "⚠️ Classifier failed for district '{}' ({}), switching to LLM fallback",
            sample.district,
            model_failure
        );

        match self.predict_with_llm(sample).await {
            Ok(result) => {
                tracing::info!("LLM fallback produced a recommendation: {}", result.recommended_crop);
                PredictionOutcome::Recommendation(result)
            }
            Err(fallback_failure) => {
                tracing::error!("❌ LLM fallback also failed: {}", fallback_failure);
                PredictionOutcome::Failed(PredictionError {
                    error: "Both ML model and LLM fallback failed.".to_string(),
                    model_error: model_failure.to_string(),
                    details: fallback_failure.to_string(),
                })
            }
        }
    }

    /// Deterministic classifier path.
    pub fn predict_with_model(
        &self,
        sample: &SoilSample,
    ) -> Result<RecommendationResult, PredictionFailure> {
        let models = self
            .models
            .as_deref()
            .ok_or(PredictionFailure::ModelUnavailable)?;

        let readings = [
            ("Nitrogen", sample.nitrogen),
            ("Phosphorus", sample.phosphorus),
            ("Potassium", sample.potassium),
            ("pH", sample.ph),
            ("Rainfall", sample.rainfall),
        ];
        if let Some((name, value)) = readings.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PredictionFailure::InvalidFeatures(format!(
                "{} is not a finite number ({})",
                name, value
            )));
        }

        let district_code = models
            .district_encoder
            .transform(&sample.district)
            .map_err(|_| PredictionFailure::UnknownDistrict(sample.district.clone()))?;

        let features = [
            district_code as f64,
            sample.nitrogen,
            sample.phosphorus,
            sample.potassium,
            sample.ph,
            sample.rainfall,
        ];

        let crop_probs = models.crop_model.predict_proba(&features)?;
        let fert_probs = models.fertilizer_model.predict_proba(&features)?;

        let recommended_crop = models
            .crop_encoder
            .inverse_transform(models.crop_model.predict(&features)?)?
            .to_string();
        let recommended_fertilizer = models
            .fertilizer_encoder
            .inverse_transform(models.fertilizer_model.predict(&features)?)?
            .to_string();

        let top_crops = top_indices(&crop_probs, TOP_N)
            .into_iter()
            .map(|idx| {
                Ok(CropProbability {
                    crop: models.crop_encoder.inverse_transform(idx)?.to_string(),
                    probability: as_percentage(crop_probs[idx]),
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let top_fertilizers = top_indices(&fert_probs, TOP_N)
            .into_iter()
            .map(|idx| {
                Ok(FertilizerProbability {
                    fertilizer: models.fertilizer_encoder.inverse_transform(idx)?.to_string(),
                    probability: as_percentage(fert_probs[idx]),
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        Ok(RecommendationResult {
            source: RecommendationSource::Model,
            health: soil_health::assess(sample),
            recommended_crop,
            recommended_fertilizer,
            top_crops,
            top_fertilizers,
        })
    }

    /// LLM fallback path: prompt with the raw input, parse leniently and fill
    /// defaults for omitted fields.
    pub async fn predict_with_llm(
        &self,
        sample: &SoilSample,
    ) -> Result<RecommendationResult, FallbackFailure> {
        let prompt = fallback_prompt(sample);
        let request =
            GenerationRequest::json(&prompt).with_schema(LlmRecommendation::schema());

        let raw = with_retry(
            "LLM fallback prediction",
            &self.retry,
            InferenceError::is_transient,
            || self.llm.generate(request),
        )
        .await?;

        let payload: LlmRecommendation = parse_lenient(&raw)?;
        Ok(payload.into_result())
    }
}

/// Fraction -> percentage rounded to two decimals.
fn as_percentage(p: f64) -> f64 {
    (p * 100.0 * 100.0).round() / 100.0
}

fn fallback_prompt(sample: &SoilSample) -> String {
    let input = serde_json::to_string_pretty(sample).unwrap_or_default();
    format!(
        r#"You are an agricultural expert.
The ML model failed to predict results for the following soil data.
Please analyze the soil and respond strictly in JSON format matching this schema:

Input:
{input}

Output JSON Schema:
{{
    "soil_health_analysis": "Short text summary of soil condition, e.g. Soil Health Analysis: Nitrogen: Moderate, Phosphorus: Moderate, Potassium: Moderate, Soil pH: 8.0, Rainfall: Moderate",
    "soil_health_score": "Numeric score out of 100",
    "soil_health_grade": "Excellent/Good/Moderate/Poor",
    "recommended_crop": "Best crop name",
    "recommended_fertilizer": "Best fertilizer name",
    "top_crops": [{{"crop": "name", "probability": 0-100}}],
    "top_fertilizers": [{{"fertilizer": "name", "probability": 0-100}}]
}}"#
    )
}
