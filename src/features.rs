//! Feature derivation
//!
//! This module derives the session-level companion written next to an
//! artifact as `<session_id>.features.json`:
//! - Average speed
//! - Cadence variance
//! - Tempo alignment
//! - Flow score from drop/stall event density

use serde_json::Map;

use crate::schema::coerce::{first_float, round_to};
use crate::schema::Session;
use crate::types::{FeatureCompanion, SessionRow};

/// Sync ratio assumed when a session carries neither a ratio nor a tempo target
const DEFAULT_SYNC_RATIO: f64 = 0.8;

/// Feature deriver for computing the companion feature vector
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive features from a session and its normalized rows
    pub fn derive(session: &Session, session_id: &str, rows: &[SessionRow]) -> FeatureCompanion {
        let empty = Map::new();
        let data = session.data().unwrap_or(&empty);
        let samples = session.samples();

        let speeds: Vec<f64> = samples.speed.iter().flatten().copied().collect();
        let cadences: Vec<f64> = samples.cadence.iter().flatten().copied().collect();

        FeatureCompanion {
            session_id: session_id.to_string(),
            avg_speed: compute_avg_speed(data, &speeds, rows),
            cadence_variance: compute_cadence_variance(&cadences, rows),
            tempo_alignment: compute_tempo_alignment(data),
            flow_score: compute_flow_score(session, rows.len()),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Recorded average, else the sample mean, else the mean of row speeds
fn compute_avg_speed(data: &Map<String, serde_json::Value>, samples: &[f64], rows: &[SessionRow]) -> f64 {
    let row_speeds: Vec<f64> = rows.iter().filter_map(|row| row.speed).collect();
    let avg = first_float(data, &["avg_speed", "average_speed", "speed"])
        .or_else(|| mean(samples))
        .or_else(|| mean(&row_speeds))
        .unwrap_or(0.0);
    round_to(avg, 2)
}

/// Population variance of cadence samples (or row cadences)
fn compute_cadence_variance(samples: &[f64], rows: &[SessionRow]) -> f64 {
    let row_cadences: Vec<f64> = rows.iter().filter_map(|row| row.cadence).collect();
    let values = if samples.is_empty() { &row_cadences[..] } else { samples };

    match mean(values) {
        Some(avg) => {
            let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
            round_to(variance, 4)
        }
        None => 0.0,
    }
}

fn compute_sync_ratio(data: &Map<String, serde_json::Value>) -> f64 {
    if let Some(ratio) = first_float(data, &["sync_ratio", "syncRatio"]) {
        return ratio;
    }
    let cadence = first_float(data, &["cadence"]);
    let tempo = first_float(data, &["tempo_target", "tempoTarget"]);
    match (cadence, tempo) {
        (Some(cadence), Some(tempo)) if tempo != 0.0 => round_to(cadence / tempo, 2),
        _ => DEFAULT_SYNC_RATIO,
    }
}

fn compute_tempo_alignment(data: &Map<String, serde_json::Value>) -> f64 {
    let alignment = first_float(data, &["tempo_alignment_score", "tempoAlignmentScore"])
        .unwrap_or_else(|| compute_sync_ratio(data).clamp(0.0, 1.0));
    round_to(alignment, 2)
}

/// 1 - drops per row, clamped to [0, 1]
fn compute_flow_score(session: &Session, row_count: usize) -> f64 {
    let drops = session
        .events()
        .iter()
        .filter(|event| {
            let kind = event.event_type_lower();
            kind.contains("drop") || kind.contains("stall")
        })
        .count();
    let raw = 1.0 - drops as f64 / row_count.max(1) as f64;
    round_to(raw.clamp(0.0, 1.0), 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn derive(value: serde_json::Value, rows: &[SessionRow]) -> FeatureCompanion {
        let session = Session::from_value(value).unwrap();
        FeatureDeriver::derive(&session, "s1", rows)
    }

    fn speed_row(speed: f64, cadence: f64) -> SessionRow {
        let mut row = SessionRow::new("s1", false);
        row.speed = Some(speed);
        row.cadence = Some(cadence);
        row
    }

    #[test]
    fn test_features_from_samples() {
        let features = derive(
            json!({
                "data": {
                    "speed_samples": [3.0, 3.5, null, 4.0],
                    "cadence_samples": [160, 170, 180],
                    "sync_ratio": 1.4
                }
            }),
            &[],
        );
        assert_eq!(
            features,
            FeatureCompanion {
                session_id: "s1".to_string(),
                avg_speed: 3.5,
                cadence_variance: 66.6667,
                tempo_alignment: 1.0,
                flow_score: 1.0,
            }
        );
    }

    #[test]
    fn test_recorded_values_win() {
        let features = derive(
            json!({"data": {"avg_speed": "2.346", "tempo_alignment_score": 0.734, "speed_samples": [9]}}),
            &[speed_row(1.0, 150.0)],
        );
        assert_eq!(features.avg_speed, 2.35);
        assert_eq!(features.tempo_alignment, 0.73);
        assert_eq!(features.cadence_variance, 0.0);
    }

    #[test]
    fn test_row_fallbacks_and_tempo_target() {
        let features = derive(
            json!({"data": {"cadence": 170, "tempo_target": 200}}),
            &[speed_row(3.0, 160.0), speed_row(4.0, 170.0)],
        );
        assert_eq!(features.avg_speed, 3.5);
        assert_eq!(features.cadence_variance, 25.0);
        assert_eq!(features.tempo_alignment, 0.85);
    }

    #[test]
    fn test_defaults_and_flow_drops() {
        let rows: Vec<SessionRow> = (0..4).map(|_| speed_row(3.0, 160.0)).collect();
        let features = derive(
            json!({
                "events": [
                    {"eventType": "flow_drop"},
                    {"eventType": "Stall"},
                    {"eventType": "speed"}
                ]
            }),
            &rows,
        );
        assert_eq!(features.tempo_alignment, DEFAULT_SYNC_RATIO);
        assert_eq!(features.flow_score, 0.5);

        let lonely = derive(json!({"events": [{"eventType": "drop"}, {"eventType": "drop"}]}), &[]);
        assert_eq!(lonely.flow_score, 0.0);
        assert_eq!(lonely.avg_speed, 0.0);
    }
}
