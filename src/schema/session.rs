//! Recorded session input
//!
//! A session ("noodle") is an arbitrary JSON object. Its time-series content
//! arrives either as an `events[]` list or as parallel sample arrays. The
//! shape is resolved once into a [`SessionSource`] so that nothing
//! downstream probes raw keys.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::coerce::{coerce_bool, parse_optional_float, parse_time_ms};
use crate::error::CodecError;

/// Current privacy ledger schema version
pub const LEDGER_SCHEMA_VERSION: &str = "v1.0.0";

/// Sample interval used when a session does not declare one
pub const DEFAULT_SAMPLE_INTERVAL_MS: i64 = 1000;

/// A recorded session, validated to be a JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    raw: Map<String, Value>,
}

impl Session {
    /// Wrap a parsed JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(CodecError::InvalidSession(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    /// Explicit `sessionId` / `session_id`, if the recorder set one
    pub fn explicit_id(&self) -> Option<String> {
        ["sessionId", "session_id"]
            .iter()
            .filter_map(|key| self.raw.get(*key))
            .find_map(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Session id, falling back to the source file's stem.
    pub fn resolve_id(&self, source: Option<&Path>) -> String {
        self.explicit_id()
            .or_else(|| {
                source
                    .and_then(Path::file_stem)
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "unknown-session".to_string())
    }

    /// Absolute session start in epoch milliseconds
    pub fn start_ms(&self) -> Option<i64> {
        self.raw.get("timestamp").and_then(parse_time_ms)
    }

    pub fn is_synthetic(&self) -> bool {
        self.raw
            .get("synthetic")
            .and_then(coerce_bool)
            .unwrap_or(false)
    }

    /// The nested `data` bag some recorders use for samples and aggregates
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.raw.get("data").and_then(Value::as_object)
    }

    /// Parsed `events[]`; entries that are not objects are skipped.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.raw
            .get("events")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .filter_map(Value::as_object)
                    .map(SessionEvent::from_map)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parallel sample arrays, read from `data` first and then the root.
    pub fn samples(&self) -> SampleSeries {
        let scopes: Vec<&Map<String, Value>> = self.data().into_iter().chain([&self.raw]).collect();
        let series = |keys: &[&str]| -> Vec<Option<f64>> {
            scopes
                .iter()
                .flat_map(move |scope| keys.iter().filter_map(move |key| scope.get(*key)))
                .find_map(Value::as_array)
                .map(|values| values.iter().map(parse_optional_float).collect())
                .unwrap_or_default()
        };
        let interval_ms = scopes
            .iter()
            .flat_map(|scope| {
                ["sample_interval_ms", "sampleIntervalMs"]
                    .iter()
                    .filter_map(move |key| scope.get(*key))
            })
            .find_map(parse_optional_float)
            .filter(|interval| *interval > 0.0)
            .map(|interval| interval.round() as i64)
            .unwrap_or(DEFAULT_SAMPLE_INTERVAL_MS);

        SampleSeries {
            speed: series(&["speed_samples", "speedSamples"]),
            cadence: series(&["cadence_samples", "cadenceSamples"]),
            stride_length: series(&["stride_samples", "strideSamples"]),
            heart_bpm: series(&["heart_samples", "heartSamples"]),
            interval_ms,
        }
    }

    /// Resolve which row source this session carries.
    ///
    /// Events win when at least one has a resolvable time; otherwise the
    /// sample arrays are used. The normalizer still falls back to samples
    /// when no timed event yields a row.
    pub fn source(&self) -> SessionSource {
        let events = self.events();
        if events.iter().any(|event| event.time_ms.is_some()) {
            return SessionSource::Events(events);
        }
        let samples = self.samples();
        if !samples.is_empty() {
            SessionSource::Samples(samples)
        } else {
            SessionSource::Empty
        }
    }

    /// Effective ledger: the stored one merged over defaults.
    pub fn privacy_ledger(&self) -> PrivacyLedger {
        PrivacyLedger::from_raw(self.raw.get("privacy_ledger").and_then(Value::as_object))
    }

    /// Write the effective ledger back onto the session. Idempotent.
    pub fn ensure_privacy_ledger(&mut self) -> Result<PrivacyLedger, CodecError> {
        let ledger = self.privacy_ledger();
        self.raw
            .insert("privacy_ledger".to_string(), serde_json::to_value(&ledger)?);
        Ok(ledger)
    }

    /// Array stored under the first present key
    pub fn array(&self, keys: &[&str]) -> Option<&Vec<Value>> {
        keys.iter()
            .filter_map(|key| self.raw.get(*key))
            .find_map(Value::as_array)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One entry of `events[]`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Absolute time in epoch milliseconds, if resolvable
    pub time_ms: Option<i64>,
    /// `eventType` as recorded
    pub event_type: String,
    pub value: Option<Value>,
    pub metadata: Map<String, Value>,
    /// The whole event object, for event-level metric keys
    pub fields: Map<String, Value>,
}

impl SessionEvent {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let event_type = ["eventType", "event_type", "type"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            time_ms: map.get("time").and_then(parse_time_ms),
            event_type,
            value: map.get("value").filter(|v| !v.is_null()).cloned(),
            metadata: map
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            fields: map.clone(),
        }
    }

    pub fn event_type_lower(&self) -> String {
        self.event_type.to_lowercase()
    }
}

/// Parallel per-metric sample arrays sharing one sample clock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSeries {
    pub speed: Vec<Option<f64>>,
    pub cadence: Vec<Option<f64>>,
    pub stride_length: Vec<Option<f64>>,
    pub heart_bpm: Vec<Option<f64>>,
    pub interval_ms: i64,
}

impl SampleSeries {
    /// Length of the longest series
    pub fn len(&self) -> usize {
        [
            self.speed.len(),
            self.cadence.len(),
            self.stride_length.len(),
            self.heart_bpm.len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a session's rows come from, resolved once
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSource {
    Events(Vec<SessionEvent>),
    Samples(SampleSeries),
    Empty,
}

/// Per-session consent and provenance facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyLedger {
    pub schema_version: String,
    pub input_type: String,
    pub synthetic_profile: Option<String>,
    pub biometrics_source: String,
    pub movement_source: String,
    pub sensitive_fields: Vec<String>,
    pub export_approved: bool,
}

impl Default for PrivacyLedger {
    fn default() -> Self {
        Self::from_raw(None)
    }
}

impl PrivacyLedger {
    /// Merge a stored ledger (snake_case or camelCase keys) over defaults.
    pub fn from_raw(raw: Option<&Map<String, Value>>) -> Self {
        let empty = Map::new();
        let raw = raw.unwrap_or(&empty);
        let text = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|key| raw.get(*key))
                .find_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let input_type = text(&["input_type", "inputType"]).unwrap_or_else(|| "real".to_string());
        let biometrics_source = text(&["biometrics_source", "biometricsSource"]).unwrap_or_else(|| {
            if input_type == "real" {
                "real".to_string()
            } else {
                "transformed".to_string()
            }
        });

        let mut sensitive_fields: Vec<String> = Vec::new();
        if let Some(items) = ["sensitive_fields", "sensitiveFields"]
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(Value::as_array)
        {
            for item in items {
                let name = match item {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                if !name.is_empty() && !sensitive_fields.contains(&name) {
                    sensitive_fields.push(name);
                }
            }
        }

        Self {
            schema_version: text(&["schema_version", "schemaVersion"])
                .unwrap_or_else(|| LEDGER_SCHEMA_VERSION.to_string()),
            synthetic_profile: text(&["synthetic_profile", "syntheticProfile"]),
            movement_source: text(&["movement_source", "movementSource"])
                .unwrap_or_else(|| "user_recorded".to_string()),
            export_approved: ["export_approved", "exportApproved"]
                .iter()
                .filter_map(|key| raw.get(*key))
                .find_map(coerce_bool)
                .unwrap_or(false),
            input_type,
            biometrics_source,
            sensitive_fields,
        }
    }

    /// Ledger attached to a session rebuilt from an artifact
    pub fn rehydrated() -> Self {
        Self {
            input_type: "synthetic".to_string(),
            synthetic_profile: Some("rehydrated".to_string()),
            biometrics_source: "transformed".to_string(),
            ..Self::default()
        }
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields.iter().any(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_object_rejected() {
        let result = Session::from_value(json!([1, 2, 3]));
        assert!(matches!(result, Err(CodecError::InvalidSession(_))));
    }

    #[test]
    fn test_resolve_id_order() {
        let session = Session::from_value(json!({"sessionId": "abc", "session_id": "def"})).unwrap();
        assert_eq!(session.resolve_id(None), "abc");

        let session = Session::from_value(json!({})).unwrap();
        assert_eq!(session.resolve_id(Some(Path::new("/tmp/run-42.json"))), "run-42");
        assert_eq!(session.resolve_id(None), "unknown-session");
    }

    #[test]
    fn test_source_prefers_timed_events() {
        let session = Session::from_value(json!({
            "events": [{"time": "2024-01-01T00:00:00Z", "eventType": "speed", "value": 3}],
            "data": {"speed_samples": [1, 2]}
        }))
        .unwrap();
        assert!(matches!(session.source(), SessionSource::Events(events) if events.len() == 1));
    }

    #[test]
    fn test_source_falls_back_to_samples() {
        let session = Session::from_value(json!({
            "events": [{"eventType": "speed", "value": 3}],
            "speedSamples": [1, "2", null],
            "heart_samples": [120],
            "sampleIntervalMs": 500
        }))
        .unwrap();
        match session.source() {
            SessionSource::Samples(samples) => {
                assert_eq!(samples.len(), 3);
                assert_eq!(samples.speed, vec![Some(1.0), Some(2.0), None]);
                assert_eq!(samples.interval_ms, 500);
            }
            other => panic!("expected samples, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_source() {
        let session = Session::from_value(json!({"events": []})).unwrap();
        assert_eq!(session.source(), SessionSource::Empty);
    }

    #[test]
    fn test_default_ledger() {
        let session = Session::from_value(json!({})).unwrap();
        let ledger = session.privacy_ledger();
        assert_eq!(ledger.schema_version, LEDGER_SCHEMA_VERSION);
        assert_eq!(ledger.biometrics_source, "real");
        assert!(!ledger.export_approved);

        let synthetic = PrivacyLedger::from_raw(json!({"inputType": "synthetic"}).as_object());
        assert_eq!(synthetic.biometrics_source, "transformed");
    }

    #[test]
    fn test_ensure_ledger_is_idempotent() {
        let mut session = Session::from_value(json!({
            "privacy_ledger": {"sensitiveFields": ["location", "location", null], "export_approved": "yes"}
        }))
        .unwrap();
        let first = session.ensure_privacy_ledger().unwrap();
        let snapshot = session.clone();
        let second = session.ensure_privacy_ledger().unwrap();
        assert_eq!(first, second);
        assert_eq!(snapshot, session);
        assert_eq!(first.sensitive_fields, vec!["location".to_string()]);
        assert!(first.export_approved);
    }
}
