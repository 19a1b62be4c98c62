use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Maximum number of ranked crops / fertilizers returned per recommendation.
pub const TOP_N: usize = 5;

// ============ Soil Input ============

/// Soil measurements for one request.
///
/// Doubles as the `POST /predict` body, so field names follow the wire format
/// (`District_Name`, `Nitrogen`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilSample {
    #[serde(rename = "District_Name")]
    pub district: String,
    #[serde(rename = "Nitrogen")]
    pub nitrogen: f64,
    #[serde(rename = "Phosphorus")]
    pub phosphorus: f64,
    #[serde(rename = "Potassium")]
    pub potassium: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    #[serde(rename = "Rainfall")]
    pub rainfall: f64,
    #[serde(rename = "Organic_Carbon", default, skip_serializing_if = "Option::is_none")]
    pub organic_carbon: Option<f64>,
    #[serde(rename = "Sulphur", default, skip_serializing_if = "Option::is_none")]
    pub sulphur: Option<f64>,
    #[serde(rename = "Zinc", default, skip_serializing_if = "Option::is_none")]
    pub zinc: Option<f64>,
    #[serde(rename = "Iron", default, skip_serializing_if = "Option::is_none")]
    pub iron: Option<f64>,
}

// ============ Soil Health ============

/// Qualitative soil health grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoilGrade {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl SoilGrade {
    /// Grade for a 0-100 score. First matching threshold wins.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            SoilGrade::Excellent
        } else if score >= 60.0 {
            SoilGrade::Good
        } else if score >= 40.0 {
            SoilGrade::Moderate
        } else {
            SoilGrade::Poor
        }
    }

    /// Parse a free-form grade label as returned by the LLM.
    ///
    /// Accepts decorated labels such as "Excellent Soil Health"; "Average"
    /// is treated as `Moderate`.
    pub fn parse_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        if lower.contains("excellent") {
            Some(SoilGrade::Excellent)
        } else if lower.contains("good") {
            Some(SoilGrade::Good)
        } else if lower.contains("moderate") || lower.contains("average") {
            Some(SoilGrade::Moderate)
        } else if lower.contains("poor") {
            Some(SoilGrade::Poor)
        } else {
            None
        }
    }
}

/// Score, grade and narrative for a soil sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    #[serde(rename = "soil_health_analysis")]
    pub narrative: String,
    #[serde(rename = "soil_health_score")]
    pub score: f64,
    #[serde(rename = "soil_health_grade")]
    pub grade: SoilGrade,
}

// ============ Recommendation ============

/// Which path produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationSource {
    #[serde(rename = "ML Model")]
    Model,
    #[serde(rename = "LLM")]
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropProbability {
    pub crop: String,
    /// Percentage in [0, 100].
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertilizerProbability {
    pub fertilizer: String,
    /// Percentage in [0, 100].
    pub probability: f64,
}

/// Crop and fertilizer recommendation, identical in shape for both paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub source: RecommendationSource,
    #[serde(flatten)]
    pub health: HealthAssessment,
    pub recommended_crop: String,
    pub recommended_fertilizer: String,
    pub top_crops: Vec<CropProbability>,
    pub top_fertilizers: Vec<FertilizerProbability>,
}

// ============ Document Extraction ============

/// Soil fields extracted from an uploaded report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(rename = "District_Name")]
    pub district: String,
    #[serde(rename = "Nitrogen")]
    pub nitrogen: f64,
    #[serde(rename = "Phosphorus")]
    pub phosphorus: f64,
    #[serde(rename = "Potassium")]
    pub potassium: f64,
    #[serde(rename = "Organic_Carbon")]
    pub organic_carbon: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    #[serde(rename = "Rainfall")]
    pub rainfall: f64,
    #[serde(rename = "Sulphur", default)]
    pub sulphur: Option<f64>,
    #[serde(rename = "Zinc", default)]
    pub zinc: Option<f64>,
    #[serde(rename = "Iron", default)]
    pub iron: Option<f64>,
}

// ============ LLM Recommendation Payload ============

/// Recommendation as returned by the LLM, before normalization.
///
/// Every field is optional: the fallback path substitutes defaults for
/// whatever the model leaves out. A field of the wrong JSON type reads as
/// missing rather than failing the whole payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmRecommendation {
    #[serde(default, deserialize_with = "lenient_text")]
    pub soil_health_analysis: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub soil_health_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub soil_health_grade: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub recommended_crop: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub recommended_fertilizer: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub top_crops: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub top_fertilizers: Option<Vec<Value>>,
}

impl LlmRecommendation {
    /// Normalize into the common response shape, tagged as LLM-sourced.
    pub fn into_result(self) -> RecommendationResult {
        let score = self
            .soil_health_score
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 100.0))
            .unwrap_or(0.0);
        let grade = self
            .soil_health_grade
            .as_deref()
            .and_then(SoilGrade::parse_label)
            .unwrap_or_else(|| SoilGrade::from_score(score));

        let top_crops = ranked_entries(self.top_crops.unwrap_or_default(), "crop")
            .into_iter()
            .map(|(crop, probability)| CropProbability { crop, probability })
            .collect();
        let top_fertilizers = ranked_entries(self.top_fertilizers.unwrap_or_default(), "fertilizer")
            .into_iter()
            .map(|(fertilizer, probability)| FertilizerProbability {
                fertilizer,
                probability,
            })
            .collect();

        RecommendationResult {
            source: RecommendationSource::Llm,
            health: HealthAssessment {
                narrative: non_blank(self.soil_health_analysis)
                    .unwrap_or_else(|| "Analysis unavailable.".to_string()),
                score,
                grade,
            },
            recommended_crop: non_blank(self.recommended_crop).unwrap_or_else(|| "N/A".to_string()),
            recommended_fertilizer: non_blank(self.recommended_fertilizer)
                .unwrap_or_else(|| "N/A".to_string()),
            top_crops,
            top_fertilizers,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Pull `(name, probability)` pairs out of loosely shaped LLM list entries,
/// sorted descending and capped at `TOP_N`. Entries without a name are dropped.
fn ranked_entries(items: Vec<Value>, name_key: &str) -> Vec<(String, f64)> {
    let mut entries: Vec<(String, f64)> = items
        .iter()
        .filter_map(|item| {
            let name = item
                .get(name_key)
                .or_else(|| item.get("name"))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())?;
            let probability = item
                .get("probability")
                .and_then(value_as_number)
                .filter(|p| p.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 100.0);
            Some((name.to_string(), probability))
        })
        .collect();

    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries.truncate(TOP_N);
    entries
}

pub(crate) fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `75`, `75.5`, `"75"` or `"75.00"`; anything else becomes `None`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_number))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Ok(Some(items)),
        _ => Ok(None),
    }
}

// ============ HTTP Responses ============

/// Combined document insight response.
#[derive(Debug, Clone, Serialize)]
pub struct SoilReportInsight {
    pub extracted_data: ExtractionResult,
    pub ai_analysis_data: RecommendationResult,
}
