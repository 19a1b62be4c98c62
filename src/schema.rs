//! Response schemas for the LLM calls.
//!
//! Each result type declares its schema once. The same definition shapes the
//! outbound `responseSchema` and checks the inbound reply before it is
//! deserialized, so request and validation cannot drift apart.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::models::{value_as_number, ExtractionResult, LlmRecommendation};

/// A type the LLM is asked to return as schema-constrained JSON.
pub trait ResponseSchema: DeserializeOwned {
    /// Schema sent with the generation request.
    fn schema() -> &'static Value;

    /// Keys that must be present (and non-null) in the reply.
    fn required_fields() -> &'static [&'static str];

    /// Reject present fields whose JSON type deserialization would otherwise
    /// paper over. Returns the offending field names.
    fn type_mismatches(_value: &Value) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Why a reply could not be turned into a typed result. Always carries the
/// raw reply text for diagnosis.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed JSON from model: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

const EXTRACTION_REQUIRED: &[&str] = &[
    "District_Name",
    "Nitrogen",
    "Phosphorus",
    "Potassium",
    "Organic_Carbon",
    "pH",
    "Rainfall",
];

const RECOMMENDATION_REQUIRED: &[&str] = &[
    "soil_health_analysis",
    "soil_health_score",
    "soil_health_grade",
    "recommended_crop",
    "recommended_fertilizer",
];

impl ResponseSchema for ExtractionResult {
    fn schema() -> &'static Value {
        static SCHEMA: OnceLock<Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "type": "OBJECT",
                "properties": {
                    "District_Name": {"type": "STRING"},
                    "Nitrogen": {"type": "NUMBER"},
                    "Phosphorus": {"type": "NUMBER"},
                    "Potassium": {"type": "NUMBER"},
                    "Organic_Carbon": {"type": "NUMBER"},
                    "pH": {"type": "NUMBER"},
                    "Rainfall": {"type": "NUMBER"},
                    "Sulphur": {"type": "NUMBER", "nullable": true},
                    "Zinc": {"type": "NUMBER", "nullable": true},
                    "Iron": {"type": "NUMBER", "nullable": true}
                },
                "required": EXTRACTION_REQUIRED
            })
        })
    }

    fn required_fields() -> &'static [&'static str] {
        EXTRACTION_REQUIRED
    }
}

fn ranked_list_schema(name_key: &str) -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                name_key: {"type": "STRING"},
                "probability": {"type": "NUMBER"}
            },
            "required": [name_key, "probability"]
        }
    })
}

impl ResponseSchema for LlmRecommendation {
    fn schema() -> &'static Value {
        static SCHEMA: OnceLock<Value> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            json!({
                "type": "OBJECT",
                "properties": {
                    "soil_health_analysis": {"type": "STRING"},
                    "soil_health_score": {"type": "STRING"},
                    "soil_health_grade": {"type": "STRING"},
                    "recommended_crop": {"type": "STRING"},
                    "recommended_fertilizer": {"type": "STRING"},
                    "top_crops": ranked_list_schema("crop"),
                    "top_fertilizers": ranked_list_schema("fertilizer")
                },
                "required": RECOMMENDATION_REQUIRED
            })
        })
    }

    fn required_fields() -> &'static [&'static str] {
        RECOMMENDATION_REQUIRED
    }

    fn type_mismatches(value: &Value) -> Vec<&'static str> {
        let present = |field: &str| value.get(field).filter(|v| !v.is_null());
        let mut wrong = Vec::new();

        for field in [
            "soil_health_analysis",
            "soil_health_grade",
            "recommended_crop",
            "recommended_fertilizer",
        ] {
            if present(field).is_some_and(|v| !v.is_string()) {
                wrong.push(field);
            }
        }
        if present("soil_health_score").is_some_and(|v| value_as_number(v).is_none()) {
            wrong.push("soil_health_score");
        }
        for field in ["top_crops", "top_fertilizers"] {
            let valid = match present(field) {
                None => true,
                Some(Value::Array(items)) => items.iter().all(|item| {
                    item.is_object()
                        && item
                            .get("probability")
                            .map_or(true, |p| value_as_number(p).is_some())
                }),
                Some(_) => false,
            };
            if !valid {
                wrong.push(field);
            }
        }
        wrong
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(raw: &str) -> &str {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)^\s*```(?:json|JSON)?\s*(.*?)\s*```\s*$").expect("valid regex")
    });
    match fence.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

fn parse_object(raw: &str) -> Result<Value, ParseFailure> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ParseFailure::new("empty reply", raw));
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| ParseFailure::new(e.to_string(), raw))?;
    if !value.is_object() {
        return Err(ParseFailure::new("reply is not a JSON object", raw));
    }
    Ok(value)
}

/// Parse a reply, enforcing every required field of `T`'s schema.
pub fn parse_strict<T: ResponseSchema>(raw: &str) -> Result<T, ParseFailure> {
    let value = parse_object(raw)?;
    let missing: Vec<&str> = T::required_fields()
        .iter()
        .copied()
        .filter(|field| value.get(*field).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(ParseFailure::new(
            format!("missing required fields: {}", missing.join(", ")),
            raw,
        ));
    }
    let wrong = T::type_mismatches(&value);
    if !wrong.is_empty() {
        return Err(ParseFailure::new(
            format!("wrong type for fields: {}", wrong.join(", ")),
            raw,
        ));
    }
    serde_json::from_value(value).map_err(|e| ParseFailure::new(e.to_string(), raw))
}

/// Parse a reply that only needs to be a well-formed JSON object; missing or
/// mistyped fields are left for the caller to default.
pub fn parse_lenient<T: ResponseSchema>(raw: &str) -> Result<T, ParseFailure> {
    let value = parse_object(raw)?;
    serde_json::from_value(value).map_err(|e| ParseFailure::new(e.to_string(), raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_required_matches_declared_fields() {
        let schema = ExtractionResult::schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, ExtractionResult::required_fields());
        for field in ExtractionResult::required_fields() {
            assert!(schema["properties"].get(*field).is_some());
        }
        assert_eq!(
            LlmRecommendation::schema()["properties"]["top_crops"]["items"]["properties"]["crop"]
                ["type"],
            "STRING"
        );
    }

    #[test]
    fn test_strict_parse_accepts_fenced_json() {
        let raw = "```json\n{\"District_Name\": \"Pune\", \"Nitrogen\": 40, \"Phosphorus\": 20, \"Potassium\": 30, \"Organic_Carbon\": 0.5, \"pH\": 7.1, \"Rainfall\": 650}\n```";
        let extraction: ExtractionResult = parse_strict(raw).unwrap();
        assert_eq!(extraction.district, "Pune");
        assert_eq!(extraction.sulphur, None);
    }

    #[test]
    fn test_strict_parse_reports_missing_fields_with_raw_text() {
        let raw = r#"{"District_Name": "Pune", "Nitrogen": 40}"#;
        let err = parse_strict::<ExtractionResult>(raw).unwrap_err();
        assert!(err.reason.contains("Phosphorus"));
        assert!(err.reason.contains("Rainfall"));
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn test_malformed_json_keeps_raw_text() {
        let raw = "Sure! Here is the soil data: {District: Pune";
        let err = parse_strict::<ExtractionResult>(raw).unwrap_err();
        assert_eq!(err.raw, raw);

        let err = parse_lenient::<LlmRecommendation>("[1, 2, 3]").unwrap_err();
        assert_eq!(err.reason, "reply is not a JSON object");
    }

    #[test]
    fn test_lenient_parse_allows_missing_fields() {
        let payload: LlmRecommendation =
            parse_lenient(r#"{"recommended_crop": "Soybean"}"#).unwrap();
        assert_eq!(payload.recommended_crop.as_deref(), Some("Soybean"));
        assert!(payload.soil_health_score.is_none());
    }

    #[test]
    fn test_strict_parse_rejects_mistyped_recommendation() {
        let raw = r#"{
            "soil_health_analysis": "Rich soil.",
            "soil_health_score": "high",
            "soil_health_grade": "Good",
            "recommended_crop": "Rice",
            "recommended_fertilizer": "Urea",
            "top_crops": "Rice"
        }"#;
        let err = parse_strict::<LlmRecommendation>(raw).unwrap_err();
        assert_eq!(err.reason, "wrong type for fields: soil_health_score, top_crops");
        assert_eq!(err.raw, raw);

        // The fallback path keeps going with defaults instead
        let payload: LlmRecommendation = parse_lenient(raw).unwrap();
        assert!(payload.soil_health_score.is_none());
        assert!(payload.top_crops.is_none());
        assert_eq!(payload.recommended_crop.as_deref(), Some("Rice"));
    }

    #[test]
    fn test_strict_parse_accepts_numeric_string_score() {
        let raw = r#"{
            "soil_health_analysis": "Balanced.",
            "soil_health_score": "72.5%",
            "soil_health_grade": "Good",
            "recommended_crop": "Soybean",
            "recommended_fertilizer": "DAP",
            "top_crops": [{"crop": "Soybean", "probability": "60"}]
        }"#;
        let payload: LlmRecommendation = parse_strict(raw).unwrap();
        assert_eq!(payload.soil_health_score, Some(72.5));
    }
}
