/// Property-based tests using proptest
/// Invariants of the soil health scorer and the LLM reply normalization
use proptest::prelude::*;
use soil_advisor_api::models::{LlmRecommendation, SoilGrade, TOP_N};
use soil_advisor_api::soil_health::{calculate_soil_health, soil_health_score};

fn reading() -> impl Strategy<Value = f64> {
    prop_oneof![
        -100.0f64..3000.0,
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

// Property: score stays in [0, 100] and moves in steps of 10
proptest! {
    #[test]
    fn score_is_bounded_multiple_of_ten(
        n in reading(), p in reading(), k in reading(), ph in reading(), rain in reading()
    ) {
        let score = soil_health_score(n, p, k, ph, rain);
        prop_assert!(score <= 100);
        prop_assert_eq!(score % 10, 0);
    }

    #[test]
    fn grade_is_a_function_of_score(
        n in 0.0f64..200.0, p in 0.0f64..200.0, k in 0.0f64..200.0,
        ph in 3.0f64..10.0, rain in 0.0f64..2000.0
    ) {
        let health = calculate_soil_health(n, p, k, ph, rain);
        prop_assert_eq!(health.grade, SoilGrade::from_score(health.score));
        prop_assert!(health.narrative.starts_with("Soil Health Analysis: "));
    }

    #[test]
    fn ideal_band_readings_score_full_marks(
        n in 50.0f64..=100.0, p in 40.0f64..=80.0, k in 50.0f64..=100.0,
        ph in 6.0f64..=7.5, rain in 700.0f64..=1200.0
    ) {
        prop_assert_eq!(soil_health_score(n, p, k, ph, rain), 100);
    }

    #[test]
    fn readings_far_outside_every_band_score_zero(
        n in 151.0f64..1000.0, p in 121.0f64..1000.0, k in 151.0f64..1000.0,
        ph in 8.01f64..14.0, rain in 1501.0f64..5000.0
    ) {
        prop_assert_eq!(soil_health_score(n, p, k, ph, rain), 0);
    }
}

// Property: normalized LLM lists are capped, sorted and clamped
proptest! {
    #[test]
    fn llm_lists_are_capped_sorted_and_clamped(
        probs in proptest::collection::vec(-50.0f64..250.0, 0..12)
    ) {
        let crops: Vec<serde_json::Value> = probs
            .iter()
            .enumerate()
            .map(|(i, p)| serde_json::json!({"crop": format!("crop-{}", i), "probability": p}))
            .collect();
        let payload = LlmRecommendation {
            top_crops: Some(crops),
            ..Default::default()
        };

        let result = payload.into_result();
        prop_assert!(result.top_crops.len() <= TOP_N);
        prop_assert_eq!(result.top_crops.len(), probs.len().min(TOP_N));
        for pair in result.top_crops.windows(2) {
            prop_assert!(pair[0].probability >= pair[1].probability);
        }
        for entry in &result.top_crops {
            prop_assert!((0.0..=100.0).contains(&entry.probability));
        }
    }

    #[test]
    fn grade_label_parsing_never_panics(label in "\\PC*") {
        let _ = SoilGrade::parse_label(&label);
    }
}
