//! Redaction and aliasing
//!
//! Projects normalized rows onto the artifact column layout:
//! - Configured field drops, plus the privacy-gated `heart_bpm` drop
//! - Symmetric heart-rate jitter when the session scores under the threshold
//! - Column renaming through the alias table

use std::collections::BTreeSet;

use rand::Rng;
use serde_json::{Map, Value};

use crate::normalizer::DEFAULT_ROUND_PRECISION;
use crate::privacy::DEFAULT_PRIVACY_THRESHOLD;
use crate::schema::coerce::round_to;
use crate::schema::{AliasTable, CanonicalField};
use crate::types::SessionRow;

/// Default maximum absolute jitter applied to `heart_bpm`
pub const DEFAULT_HEART_JITTER: f64 = 1.5;

/// How rows are projected onto artifact columns
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionPolicy {
    pub drop_fields: BTreeSet<CanonicalField>,
    pub use_alias: bool,
    pub privacy_threshold: f64,
    pub heart_jitter_amplitude: f64,
    pub round_precision: u32,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            drop_fields: BTreeSet::new(),
            use_alias: false,
            privacy_threshold: DEFAULT_PRIVACY_THRESHOLD,
            heart_jitter_amplitude: DEFAULT_HEART_JITTER,
            round_precision: DEFAULT_ROUND_PRECISION,
        }
    }
}

/// What happened to `heart_bpm` for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartTreatment {
    /// No privacy score was computed
    Untouched,
    Dropped,
    Jittered,
}

impl HeartTreatment {
    /// Drop iff the score is strictly above the threshold; jitter otherwise.
    pub fn decide(privacy_score: Option<f64>, threshold: f64) -> Self {
        match privacy_score {
            None => HeartTreatment::Untouched,
            Some(score) if score > threshold => HeartTreatment::Dropped,
            Some(_) => HeartTreatment::Jittered,
        }
    }
}

/// One artifact column: its field and the name it is written under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: CanonicalField,
    pub name: String,
}

/// Rows ready for the encoder, with the column layout they must be written in
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Rows with every dropped field cleared
    pub rows: Vec<SessionRow>,
    pub layout: Vec<ColumnSpec>,
    /// Fields removed by the privacy gate
    pub redacted_fields: Vec<String>,
    pub heart: HeartTreatment,
}

impl Projection {
    /// Column names in artifact order
    pub fn field_names(&self) -> Vec<String> {
        self.layout.iter().map(|column| column.name.clone()).collect()
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.layout.iter().any(|column| column.field == field)
    }

    /// Rows as JSON objects keyed by output column name.
    ///
    /// Dropped fields and absent values are omitted, never written as null.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.layout
                    .iter()
                    .filter_map(|column| {
                        field_value(row, column.field).map(|value| (column.name.clone(), value))
                    })
                    .collect()
            })
            .collect()
    }
}

fn field_value(row: &SessionRow, field: CanonicalField) -> Option<Value> {
    match field {
        CanonicalField::SessionId => Some(Value::from(row.session_id.clone())),
        CanonicalField::TMs => Some(Value::from(row.t_ms)),
        CanonicalField::Speed => row.speed.map(Value::from),
        CanonicalField::Cadence => row.cadence.map(Value::from),
        CanonicalField::StrideLength => row.stride_length.map(Value::from),
        CanonicalField::HeartBpm => row.heart_bpm.map(Value::from),
        CanonicalField::SyntheticFlag => Some(Value::from(row.synthetic_flag)),
        CanonicalField::CueEvent => row.cue_event.clone().map(Value::from),
    }
}

/// Redaction and aliasing engine
pub struct RedactionEngine<'a> {
    aliases: &'a AliasTable,
    policy: &'a RedactionPolicy,
}

impl<'a> RedactionEngine<'a> {
    pub fn new(aliases: &'a AliasTable, policy: &'a RedactionPolicy) -> Self {
        Self { aliases, policy }
    }

    /// Project rows under the policy.
    ///
    /// `privacy_score` is `None` when no privacy check ran; heart rate is
    /// then neither dropped nor jittered.
    pub fn project<R: Rng + ?Sized>(
        &self,
        mut rows: Vec<SessionRow>,
        privacy_score: Option<f64>,
        rng: &mut R,
    ) -> Projection {
        let heart = HeartTreatment::decide(privacy_score, self.policy.privacy_threshold);
        let mut drops = self.policy.drop_fields.clone();
        let mut redacted_fields = Vec::new();
        if heart == HeartTreatment::Dropped {
            drops.insert(CanonicalField::HeartBpm);
            redacted_fields.push(CanonicalField::HeartBpm.as_str().to_string());
        }

        if heart == HeartTreatment::Jittered {
            let amplitude = self.policy.heart_jitter_amplitude;
            for row in &mut rows {
                if let Some(bpm) = row.heart_bpm {
                    let jitter = rng.gen_range(-amplitude..=amplitude);
                    row.heart_bpm = Some(round_to(bpm + jitter, self.policy.round_precision));
                }
            }
        }

        for row in &mut rows {
            clear_dropped(row, &drops);
        }

        let layout = CanonicalField::ALL
            .into_iter()
            .filter(|field| !drops.contains(field))
            .map(|field| ColumnSpec {
                field,
                name: self.aliases.output_name(field, self.policy.use_alias),
            })
            .collect();

        Projection {
            rows,
            layout,
            redacted_fields,
            heart,
        }
    }
}

fn clear_dropped(row: &mut SessionRow, drops: &BTreeSet<CanonicalField>) {
    for field in drops {
        match field {
            CanonicalField::Speed => row.speed = None,
            CanonicalField::Cadence => row.cadence = None,
            CanonicalField::StrideLength => row.stride_length = None,
            CanonicalField::HeartBpm => row.heart_bpm = None,
            CanonicalField::CueEvent => row.cue_event = None,
            // Required columns are rejected at config validation
            CanonicalField::SessionId | CanonicalField::TMs | CanonicalField::SyntheticFlag => {}
        }
    }
}
