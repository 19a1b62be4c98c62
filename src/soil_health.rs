//! Soil health scoring.
//!
//! Each of nitrogen, phosphorus, potassium, pH and rainfall earns 20 points
//! inside its ideal band, 10 points in the adjacent "near" band and nothing
//! outside, for a total between 0 and 100. No range validation is done:
//! out-of-range readings simply fall through to 0 points.

use crate::models::{HealthAssessment, SoilGrade, SoilSample};

/// Scoring band for one reading: `ideal` is inclusive on both ends, the
/// near band is `[low_near, ideal.0)` plus `(ideal.1, high_near]`.
struct Band {
    low_near: f64,
    ideal: (f64, f64),
    high_near: f64,
}

impl Band {
    fn points(&self, value: f64) -> u32 {
        let (lo, hi) = self.ideal;
        if lo <= value && value <= hi {
            20
        } else if (self.low_near <= value && value < lo) || (hi < value && value <= self.high_near)
        {
            10
        } else {
            0
        }
    }
}

const NITROGEN: Band = Band {
    low_near: 30.0,
    ideal: (50.0, 100.0),
    high_near: 150.0,
};
const PHOSPHORUS: Band = Band {
    low_near: 20.0,
    ideal: (40.0, 80.0),
    high_near: 120.0,
};
const POTASSIUM: Band = Band {
    low_near: 30.0,
    ideal: (50.0, 100.0),
    high_near: 150.0,
};
const PH: Band = Band {
    low_near: 5.5,
    ideal: (6.0, 7.5),
    high_near: 8.0,
};
const RAINFALL: Band = Band {
    low_near: 500.0,
    ideal: (700.0, 1200.0),
    high_near: 1500.0,
};

/// Total 0-100 score for the five readings.
pub fn soil_health_score(n: f64, p: f64, k: f64, ph: f64, rainfall: f64) -> u32 {
    NITROGEN.points(n)
        + PHOSPHORUS.points(p)
        + POTASSIUM.points(k)
        + PH.points(ph)
        + RAINFALL.points(rainfall)
}

/// Narrative summary. Uses its own, wider "Moderate" bands than the scoring.
pub fn soil_health_narrative(n: f64, p: f64, k: f64, ph: f64, rainfall: f64) -> String {
    format!(
        "Soil Health Analysis: Nitrogen: {}, Phosphorus: {}, Potassium: {}, Soil pH: {:?}, Rainfall: {}",
        level(n, 30.0, 100.0),
        level(p, 20.0, 80.0),
        level(k, 30.0, 100.0),
        ph,
        level(rainfall, 500.0, 1200.0),
    )
}

fn level(value: f64, lo: f64, hi: f64) -> &'static str {
    if lo <= value && value <= hi {
        "Moderate"
    } else {
        "Low/High"
    }
}

/// Score, grade and narrative from raw readings.
pub fn calculate_soil_health(n: f64, p: f64, k: f64, ph: f64, rainfall: f64) -> HealthAssessment {
    let score = f64::from(soil_health_score(n, p, k, ph, rainfall));
    HealthAssessment {
        narrative: soil_health_narrative(n, p, k, ph, rainfall),
        score,
        grade: SoilGrade::from_score(score),
    }
}

/// Convenience wrapper over [`calculate_soil_health`] for a full sample.
pub fn assess(sample: &SoilSample) -> HealthAssessment {
    calculate_soil_health(
        sample.nitrogen,
        sample.phosphorus,
        sample.potassium,
        sample.ph,
        sample.rainfall,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ideal_sample_is_excellent() {
        let health = calculate_soil_health(75.0, 60.0, 75.0, 6.8, 900.0);
        assert_eq!(health.score, 100.0);
        assert_eq!(health.grade, SoilGrade::Excellent);
        assert_eq!(
            health.narrative,
            "Soil Health Analysis: Nitrogen: Moderate, Phosphorus: Moderate, Potassium: Moderate, Soil pH: 6.8, Rainfall: Moderate"
        );
    }

    #[test]
    fn test_band_edges() {
        // Ideal band is inclusive on both ends
        assert_eq!(NITROGEN.points(50.0), 20);
        assert_eq!(NITROGEN.points(100.0), 20);
        // Near band
        assert_eq!(NITROGEN.points(30.0), 10);
        assert_eq!(NITROGEN.points(49.99), 10);
        assert_eq!(NITROGEN.points(100.01), 10);
        assert_eq!(NITROGEN.points(150.0), 10);
        // Outside
        assert_eq!(NITROGEN.points(29.99), 0);
        assert_eq!(NITROGEN.points(150.01), 0);

        assert_eq!(PH.points(6.0), 20);
        assert_eq!(PH.points(7.5), 20);
        assert_eq!(PH.points(5.5), 10);
        assert_eq!(PH.points(8.0), 10);
        assert_eq!(PH.points(8.1), 0);

        assert_eq!(RAINFALL.points(1200.0), 20);
        assert_eq!(RAINFALL.points(1500.0), 10);
        assert_eq!(RAINFALL.points(499.0), 0);

        assert_eq!(PHOSPHORUS.points(80.0), 20);
        assert_eq!(PHOSPHORUS.points(120.0), 10);
        assert_eq!(POTASSIUM.points(151.0), 0);
    }

    #[test]
    fn test_near_band_sample_is_moderate() {
        // 10 points from each reading
        let health = calculate_soil_health(40.0, 30.0, 120.0, 5.8, 600.0);
        assert_eq!(health.score, 50.0);
        assert_eq!(health.grade, SoilGrade::Moderate);
    }

    #[test]
    fn test_mixed_sample_is_good() {
        // 20 + 20 + 10 + 10 + 0
        let health = calculate_soil_health(60.0, 50.0, 40.0, 7.8, 2000.0);
        assert_eq!(health.score, 60.0);
        assert_eq!(health.grade, SoilGrade::Good);
    }

    #[test]
    fn test_out_of_range_is_poor() {
        let health = calculate_soil_health(-5.0, 500.0, 0.0, 14.0, 0.0);
        assert_eq!(health.score, 0.0);
        assert_eq!(health.grade, SoilGrade::Poor);
    }

    #[test]
    fn test_nan_scores_zero() {
        let health = calculate_soil_health(f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN);
        assert_eq!(health.score, 0.0);
        assert_eq!(health.grade, SoilGrade::Poor);
    }

    #[test]
    fn test_narrative_uses_wider_bands() {
        // Nitrogen 35 scores as "near" but reads "Moderate" in the narrative;
        // rainfall 1300 scores 10 but reads "Low/High"
        let narrative = soil_health_narrative(35.0, 10.0, 100.0, 7.0, 1300.0);
        assert_eq!(
            narrative,
            "Soil Health Analysis: Nitrogen: Moderate, Phosphorus: Low/High, Potassium: Moderate, Soil pH: 7.0, Rainfall: Low/High"
        );
    }
}
