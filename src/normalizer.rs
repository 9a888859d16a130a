//! Session normalization
//!
//! This module canonicalizes a heterogeneous session into ordered, typed rows.
//! - Row sourcing from `events[]` or parallel sample arrays
//! - Metric resolution from metadata, with an isolated event-type fallback
//! - Precision rounding of every metric
//! - Sorting by absolute time and delta-encoding of `t_ms`

use std::path::Path;

use serde_json::Value;

use crate::schema::coerce::{coerce_bool, first_float, first_text, parse_optional_float, round_to};
use crate::schema::{SampleSeries, Session, SessionEvent, SessionSource};
use crate::types::SessionRow;

/// Default number of decimal places kept on metric fields
pub const DEFAULT_ROUND_PRECISION: u32 = 2;

/// Rows of one session, delta-encoded and ready for projection
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSession {
    pub session_id: String,
    /// Session start in epoch milliseconds, when the recorder set one
    pub origin_ms: Option<i64>,
    pub rows: Vec<SessionRow>,
    /// Absolute time of each row, parallel to `rows`
    pub absolute_ms: Vec<i64>,
}

impl NormalizedSession {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A row before delta-encoding
struct TimedRow {
    absolute_ms: i64,
    row: SessionRow,
}

/// Normalizer for converting raw sessions to canonical rows
pub struct Normalizer;

impl Normalizer {
    /// Normalize a session.
    ///
    /// `source` is only used to derive a session id when the payload has
    /// none. An empty `rows` result means the session has no resolvable
    /// time-series data and should be skipped.
    pub fn normalize(session: &Session, source: Option<&Path>, precision: u32) -> NormalizedSession {
        let session_id = session.resolve_id(source);
        let synthetic = session.is_synthetic();
        let origin_ms = session.start_ms();

        let samples = |series: &SampleSeries| {
            sample_rows(series, origin_ms.unwrap_or(0), &session_id, synthetic, precision)
        };
        let mut timed: Vec<TimedRow> = match session.source() {
            SessionSource::Events(events) => {
                let rows: Vec<TimedRow> = events
                    .iter()
                    .filter_map(|event| event_row(event, &session_id, synthetic, precision))
                    .collect();
                // Timed events carrying neither metrics nor cues are not usable
                if rows.is_empty() {
                    samples(&session.samples())
                } else {
                    rows
                }
            }
            SessionSource::Samples(series) => samples(&series),
            SessionSource::Empty => Vec::new(),
        };

        // Stable: rows sharing a timestamp keep their recorded order
        timed.sort_by_key(|t| t.absolute_ms);

        let mut rows = Vec::with_capacity(timed.len());
        let mut absolute_ms = Vec::with_capacity(timed.len());
        let mut previous: Option<i64> = None;
        for TimedRow { absolute_ms: at, mut row } in timed {
            row.t_ms = match previous {
                None => origin_ms.map(|start| at.saturating_sub(start).max(0)).unwrap_or(0),
                Some(prev) => at.saturating_sub(prev).max(0),
            };
            previous = Some(at);
            absolute_ms.push(at);
            rows.push(row);
        }

        NormalizedSession {
            session_id,
            origin_ms,
            rows,
            absolute_ms,
        }
    }
}

/// Build a row from one event, or `None` when it has no time or no content.
fn event_row(
    event: &SessionEvent,
    session_id: &str,
    synthetic: bool,
    precision: u32,
) -> Option<TimedRow> {
    let absolute_ms = event.time_ms?;
    let mut row = SessionRow::new(session_id, synthetic);

    resolve_metadata_metrics(&mut row, event);
    resolve_event_type_metrics(&mut row, event);
    row.cue_event = resolve_cue(event);

    if let Some(flag) = event
        .metadata
        .get("synthetic_flag")
        .and_then(coerce_bool)
    {
        row.synthetic_flag = flag;
    }

    round_metrics(&mut row, precision);
    (row.has_metrics() || row.cue_event.is_some()).then_some(TimedRow { absolute_ms, row })
}

/// Metrics named explicitly in `metadata` or on the event itself.
fn resolve_metadata_metrics(row: &mut SessionRow, event: &SessionEvent) {
    let meta = &event.metadata;
    let own = &event.fields;
    row.speed = first_float(meta, &["speed", "velocity"]).or_else(|| first_float(own, &["speed"]));
    row.cadence = first_float(meta, &["cadence", "steps_per_min"])
        .or_else(|| first_float(own, &["cadence"]));
    row.stride_length = first_float(meta, &["stride_length", "strideLength", "step_length"])
        .or_else(|| first_float(own, &["stride_length"]));
    row.heart_bpm = first_float(meta, &["heart_bpm", "heartRate", "hr"])
        .or_else(|| first_float(own, &["heart_bpm", "heartRate"]));
}

/// Lowest-priority resolver: infer the metric of a bare `value` from the
/// event type name. Only fills fields still empty.
fn resolve_event_type_metrics(row: &mut SessionRow, event: &SessionEvent) {
    let kind = event.event_type_lower();
    if let Some(value) = event.value.as_ref().and_then(parse_optional_float) {
        if row.speed.is_none() && (kind.contains("speed") || kind.contains("pace")) {
            row.speed = Some(value);
        }
        if row.cadence.is_none() && kind.contains("cadence") {
            row.cadence = Some(value);
        }
        if row.heart_bpm.is_none() && (kind.contains("heart") || kind.contains("bpm")) {
            row.heart_bpm = Some(value);
        }
    }
    if row.cadence.is_none() {
        row.cadence = first_float(&event.metadata, &["steps"]);
    }
}

fn resolve_cue(event: &SessionEvent) -> Option<String> {
    if let Some(cue) = first_text(&event.metadata, &["cue", "event", "label"]) {
        return Some(cue.to_string());
    }
    let kind = event.event_type_lower();
    if kind.contains("cue") || kind.contains("callout") {
        return Some(event.event_type.clone());
    }
    match &event.value {
        Some(Value::String(text))
            if !text.is_empty()
                && !kind.contains("metric")
                && parse_optional_float(&Value::String(text.clone())).is_none() =>
        {
            Some(text.clone())
        }
        _ => None,
    }
}

fn sample_rows(
    samples: &SampleSeries,
    start_ms: i64,
    session_id: &str,
    synthetic: bool,
    precision: u32,
) -> Vec<TimedRow> {
    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

    (0..samples.len())
        .filter_map(|i| {
            let mut row = SessionRow::new(session_id, synthetic);
            row.speed = at(&samples.speed, i);
            row.cadence = at(&samples.cadence, i);
            row.stride_length = at(&samples.stride_length, i);
            row.heart_bpm = at(&samples.heart_bpm, i);
            round_metrics(&mut row, precision);
            let offset = (i as i64).saturating_mul(samples.interval_ms);
            row.has_metrics().then(|| TimedRow {
                absolute_ms: start_ms.saturating_add(offset),
                row,
            })
        })
        .collect()
}

fn round_metrics(row: &mut SessionRow, precision: u32) {
    for field in [
        &mut row.speed,
        &mut row.cadence,
        &mut row.stride_length,
        &mut row.heart_bpm,
    ] {
        *field = field.map(|value| round_to(value, precision));
    }
}
