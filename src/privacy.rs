//! Privacy risk evaluation
//!
//! Scores a session along three dimensions:
//! - Biometrics: how real the recorded physiology is
//! - Temporal precision: how fine-grained the event clock is
//! - Location trace: whether location data is present or declared sensitive
//!
//! The evaluation is a pure function of the session and its effective
//! privacy ledger.

use serde_json::Value;

use crate::error::CodecError;
use crate::schema::coerce::round_to;
use crate::schema::Session;
use crate::types::{PrivacyAssessment, RiskVector};

/// Default score above which `heart_bpm` is redacted rather than jittered
pub const DEFAULT_PRIVACY_THRESHOLD: f64 = 0.6;

/// Median gap thresholds (ms) and the risk they map to, finest first
const TEMPORAL_BANDS: [(i64, f64); 3] = [(15_000, 0.9), (60_000, 0.6), (300_000, 0.4)];

/// Risk for clocks coarser than every band
const COARSE_TEMPORAL_RISK: f64 = 0.2;

/// Privacy risk evaluator
pub struct PrivacyEvaluator;

impl PrivacyEvaluator {
    /// Evaluate a raw JSON value, rejecting anything that is not an object
    pub fn evaluate_value(value: &Value) -> Result<PrivacyAssessment, CodecError> {
        let session = Session::from_value(value.clone())?;
        Ok(Self::evaluate(&session))
    }

    /// Evaluate a session
    pub fn evaluate(session: &Session) -> PrivacyAssessment {
        let risk_vector = RiskVector {
            biometrics: biometrics_risk(session),
            temporal_precision: temporal_precision_risk(session),
            location_trace: location_risk(session),
        };

        PrivacyAssessment {
            score: round_to(risk_vector.mean(), 2),
            recommendation: recommend(&risk_vector).to_string(),
            risk_vector,
        }
    }
}

fn biometrics_risk(session: &Session) -> f64 {
    match session.privacy_ledger().biometrics_source.as_str() {
        "real" => 0.8,
        "transformed" => 0.5,
        _ => 0.2,
    }
}

/// Map the median gap between consecutive events to a risk level.
fn temporal_precision_risk(session: &Session) -> f64 {
    let mut timestamps: Vec<i64> = session
        .events()
        .iter()
        .filter_map(|event| event.time_ms)
        .collect();
    if timestamps.len() < 2 {
        return 0.0;
    }
    timestamps.sort_unstable();

    let mut gaps: Vec<i64> = timestamps
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .collect();
    gaps.sort_unstable();
    let median_gap = gaps[gaps.len() / 2];

    TEMPORAL_BANDS
        .iter()
        .find(|(limit, _)| median_gap <= *limit)
        .map(|(_, risk)| *risk)
        .unwrap_or(COARSE_TEMPORAL_RISK)
}

fn location_risk(session: &Session) -> f64 {
    if session.privacy_ledger().is_sensitive("location") {
        return 0.9;
    }
    let has_trace = session.data().is_some_and(|data| {
        ["location", "location_trace"]
            .iter()
            .any(|key| data.get(*key).is_some_and(|v| !v.is_null()))
    });
    if has_trace {
        0.8
    } else {
        0.2
    }
}

fn recommend(risk: &RiskVector) -> &'static str {
    if risk.location_trace > 0.7 {
        "Apply jitter and remove location before export."
    } else if risk.biometrics > 0.6 {
        "Mask biometric streams or apply percentile encoding."
    } else if risk.temporal_precision > 0.5 {
        "Bucket timestamps to coarser intervals."
    } else {
        "Ready for export with current privacy settings."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(value: Value) -> Session {
        Session::from_value(value).unwrap()
    }

    #[test]
    fn test_non_object_is_invalid() {
        let result = PrivacyEvaluator::evaluate_value(&json!("not a session"));
        assert!(matches!(result, Err(CodecError::InvalidSession(_))));
    }

    #[test]
    fn test_default_ledger_counts_as_real_biometrics() {
        let assessment = PrivacyEvaluator::evaluate(&session(json!({})));
        assert_eq!(assessment.risk_vector.biometrics, 0.8);
        assert_eq!(assessment.risk_vector.temporal_precision, 0.0);
        assert_eq!(assessment.risk_vector.location_trace, 0.2);
        assert_eq!(assessment.score, 0.33);
        assert_eq!(
            assessment.recommendation,
            "Mask biometric streams or apply percentile encoding."
        );
    }

    #[test]
    fn test_temporal_bands() {
        let events = |gap_s: i64| {
            let times: Vec<Value> = (0..4)
                .map(|i| json!({"time": 1_700_000_000_000i64 + i * gap_s * 1000, "eventType": "speed"}))
                .collect();
            session(json!({"events": times}))
        };
        let risk = |gap_s| PrivacyEvaluator::evaluate(&events(gap_s)).risk_vector.temporal_precision;
        assert_eq!(risk(5), 0.9);
        assert_eq!(risk(15), 0.9);
        assert_eq!(risk(45), 0.6);
        assert_eq!(risk(300), 0.4);
        assert_eq!(risk(301), 0.2);
    }

    #[test]
    fn test_single_timed_event_has_no_temporal_risk() {
        let s = session(json!({"events": [{"time": "2024-01-01T00:00:00Z"}, {"time": "garbage"}]}));
        assert_eq!(PrivacyEvaluator::evaluate(&s).risk_vector.temporal_precision, 0.0);
    }

    #[test]
    fn test_location_sources() {
        let declared = session(json!({"privacy_ledger": {"sensitive_fields": ["location"]}}));
        assert_eq!(PrivacyEvaluator::evaluate(&declared).risk_vector.location_trace, 0.9);

        let traced = session(json!({"data": {"location_trace": [[1, 2]]}}));
        assert_eq!(PrivacyEvaluator::evaluate(&traced).risk_vector.location_trace, 0.8);

        let assessment = PrivacyEvaluator::evaluate(&declared);
        assert_eq!(
            assessment.recommendation,
            "Apply jitter and remove location before export."
        );
    }

    #[test]
    fn test_high_risk_session_scores_above_threshold() {
        let s = session(json!({
            "privacy_ledger": {"biometrics_source": "real", "sensitive_fields": ["location"]},
            "events": [
                {"time": "2024-01-01T00:00:00Z", "eventType": "speed", "value": 3.0},
                {"time": "2024-01-01T00:00:05Z", "eventType": "speed", "value": 3.1},
                {"time": "2024-01-01T00:00:10Z", "eventType": "speed", "value": 3.2}
            ]
        }));
        let assessment = PrivacyEvaluator::evaluate(&s);
        // (0.8 + 0.9 + 0.9) / 3
        assert_eq!(assessment.score, 0.87);
        assert!(assessment.score > DEFAULT_PRIVACY_THRESHOLD);
    }

    #[test]
    fn test_transformed_low_risk_is_ready() {
        let s = session(json!({"privacy_ledger": {"biometrics_source": "transformed"}}));
        let assessment = PrivacyEvaluator::evaluate(&s);
        assert_eq!(assessment.risk_vector.biometrics, 0.5);
        assert_eq!(
            assessment.recommendation,
            "Ready for export with current privacy settings."
        );
    }
}
