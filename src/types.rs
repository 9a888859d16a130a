//! Core types for the Noodle Pack pipeline
//!
//! This module defines the data structures that flow through each stage:
//! canonical rows, sidecar metadata, privacy assessments, overlay rows and
//! the rehydrated payload views.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::PrivacyLedger;

/// One canonical session row.
///
/// `t_ms` is relative: the first row holds the offset from session start
/// (or 0), every later row holds the non-negative delta from its
/// predecessor's absolute time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub t_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stride_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_bpm: Option<f64>,
    pub synthetic_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cue_event: Option<String>,
}

impl SessionRow {
    pub fn new(session_id: impl Into<String>, synthetic_flag: bool) -> Self {
        Self {
            session_id: session_id.into(),
            t_ms: 0,
            speed: None,
            cadence: None,
            stride_length: None,
            heart_bpm: None,
            synthetic_flag,
            cue_event: None,
        }
    }

    /// True when at least one metric column carries a value
    pub fn has_metrics(&self) -> bool {
        self.speed.is_some()
            || self.cadence.is_some()
            || self.stride_length.is_some()
            || self.heart_bpm.is_some()
    }
}

/// Identity of the encoder that produced an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// JSON sidecar written next to every artifact (`<artifact>.meta.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub parquet_file: String,
    /// Row count as recorded; compared against the artifact only when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub compression: String,
    #[serde(default)]
    pub privacy_score: Option<f64>,
    #[serde(default)]
    pub redacted_fields: Vec<String>,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<Producer>,
}

/// Per-dimension privacy risk, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskVector {
    pub biometrics: f64,
    pub temporal_precision: f64,
    pub location_trace: f64,
}

impl RiskVector {
    pub fn mean(&self) -> f64 {
        (self.biometrics + self.temporal_precision + self.location_trace) / 3.0
    }
}

/// Outcome of the privacy risk evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyAssessment {
    pub score: f64,
    pub risk_vector: RiskVector,
    pub recommendation: String,
}

/// One row of an overlay artifact; times are absolute milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRow {
    pub source_session_id: String,
    pub overlay_id: String,
    pub overlay_type: String,
    pub start_ms: i64,
    pub end_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
}

/// Session-level aggregates written as `<session_id>.features.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCompanion {
    pub session_id: String,
    pub avg_speed: f64,
    pub cadence_variance: f64,
    pub tempo_alignment: f64,
    pub flow_score: f64,
}

/// A reconstructed row with absolute `t_ms` from session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub t_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stride_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cue_event: Option<String>,
}

/// Provenance and validation facts attached to a rehydrated session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RehydrationMetadata {
    pub source_parquet: String,
    pub restored_at: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Canonical ("noodle") view of a rehydrated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoodlePayload {
    pub session_id: String,
    pub synthetic: bool,
    pub timeline: Vec<TimelineEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_ledger: Option<PrivacyLedger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remixed_from: Option<String>,
    pub rehydration_metadata: RehydrationMetadata,
}

/// Replay-oriented ("ghost") view of a rehydrated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostPayload {
    pub session_id: String,
    pub events: Vec<TimelineEvent>,
}

/// Why a session produced no artifact without being an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Filter,
    Empty,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Filter => "filter",
            SkipReason::Empty => "no time-series data",
        }
    }
}

/// A successfully encoded (or dry-run) session
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedSession {
    pub session_id: String,
    pub artifact_path: PathBuf,
    pub sidecar: Sidecar,
    pub overlay_paths: Vec<PathBuf>,
    pub features_path: Option<PathBuf>,
}

/// Tagged per-file result; failures never cross file boundaries
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Compressed(CompressedSession),
    Skipped { file: PathBuf, reason: SkipReason },
    Failed { file: PathBuf, message: String },
}

/// Counts and exports of one batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub compressed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub results: Vec<CompressedSession>,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: SessionOutcome) {
        self.processed += 1;
        match outcome {
            SessionOutcome::Compressed(session) => {
                self.compressed += 1;
                self.results.push(session);
            }
            SessionOutcome::Skipped { .. } => self.skipped += 1,
            SessionOutcome::Failed { .. } => self.errors += 1,
        }
    }
}
