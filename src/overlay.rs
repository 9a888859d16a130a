//! Overlay codec
//!
//! Ghost, movement and generic overlay annotations are encoded to one
//! artifact per overlay type (`<session_id>.<type>.parquet`), each with its
//! own sidecar. Overlay times are absolute milliseconds and are never
//! delta-encoded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};

use crate::columnar::{self, ColumnDef};
use crate::encoder::{timestamp_now, ColumnarEncoder, EncodedArtifact};
use crate::error::CodecError;
use crate::schema::coerce::{first_float, parse_time_ms, round_to};
use crate::schema::{ColumnType, Session};
use crate::types::{OverlayRow, Sidecar};

/// Session keys holding overlay arrays, and the overlay type each produces
const OVERLAY_SOURCES: [(&[&str], &str); 3] = [
    (&["ghost_overlays", "ghostOverlays"], "ghost"),
    (&["movement_overlays", "movementOverlays"], "movement"),
    (&["overlays"], "overlay"),
];

const INTENSITY_PRECISION: u32 = 2;

/// All overlay rows of one type
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayTrack {
    pub overlay_type: String,
    pub rows: Vec<OverlayRow>,
}

/// An overlay artifact ready to write
#[derive(Debug, Clone)]
pub struct PreparedOverlay {
    pub track: OverlayTrack,
    pub artifact_path: PathBuf,
    pub sidecar: Sidecar,
    batch: RecordBatch,
}

fn overlay_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("source_session_id", ColumnType::Utf8, false),
        ColumnDef::new("overlay_id", ColumnType::Utf8, false),
        ColumnDef::new("overlay_type", ColumnType::Utf8, false),
        ColumnDef::new("start_ms", ColumnType::Int32, false),
        ColumnDef::new("end_ms", ColumnType::Int32, false),
        ColumnDef::new("intensity", ColumnType::Float, true),
    ]
}

/// Collect the non-empty overlay tracks of a session.
pub fn extract_tracks(session: &Session, session_id: &str) -> Vec<OverlayTrack> {
    OVERLAY_SOURCES
        .iter()
        .filter_map(|(keys, overlay_type)| {
            let entries = session.array(keys)?;
            let rows: Vec<OverlayRow> = entries
                .iter()
                .enumerate()
                .filter_map(|(index, entry)| {
                    let item = entry.as_object()?;
                    Some(overlay_row(item, index, overlay_type, session_id))
                })
                .collect();
            (!rows.is_empty()).then(|| OverlayTrack {
                overlay_type: overlay_type.to_string(),
                rows,
            })
        })
        .collect()
}

fn overlay_row(item: &Map<String, Value>, index: usize, overlay_type: &str, session_id: &str) -> OverlayRow {
    let time = |keys: [&str; 2]| keys.iter().filter_map(|key| item.get(*key)).find_map(parse_time_ms);
    let start = time(["start", "start_time"]);
    let end = time(["end", "end_time"]);

    let overlay_id = ["id", "name"]
        .iter()
        .filter_map(|key| item.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("{overlay_type}_{}", index + 1));

    OverlayRow {
        source_session_id: session_id.to_string(),
        overlay_id,
        overlay_type: overlay_type.to_string(),
        start_ms: start.unwrap_or(0),
        end_ms: end.or(start).unwrap_or(0),
        intensity: first_float(item, &["intensity", "weight"])
            .map(|value| round_to(value, INTENSITY_PRECISION)),
    }
}

fn to_int32(value: i64, what: &str, row: &OverlayRow) -> Result<i32, CodecError> {
    i32::try_from(value).map_err(|_| {
        CodecError::Encoding(format!(
            "overlay '{}' {what} {value} does not fit INT32",
            row.overlay_id
        ))
    })
}

fn overlay_batch(rows: &[OverlayRow]) -> Result<RecordBatch, CodecError> {
    let starts = rows
        .iter()
        .map(|row| to_int32(row.start_ms, "start_ms", row))
        .collect::<Result<Vec<i32>, CodecError>>()?;
    let ends = rows
        .iter()
        .map(|row| to_int32(row.end_ms, "end_ms", row))
        .collect::<Result<Vec<i32>, CodecError>>()?;

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|row| row.source_session_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|row| row.overlay_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|row| row.overlay_type.as_str()),
        )),
        Arc::new(Int32Array::from(starts)),
        Arc::new(Int32Array::from(ends)),
        Arc::new(Float32Array::from(
            rows.iter()
                .map(|row| row.intensity.map(|value| value as f32))
                .collect::<Vec<_>>(),
        )),
    ];
    Ok(RecordBatch::try_new(columnar::arrow_schema(&overlay_columns()), arrays)?)
}

impl ColumnarEncoder {
    /// Build the overlay artifacts of a session without writing them.
    ///
    /// Fails on the first track whose times do not fit INT32, so callers
    /// can prepare overlays before committing any file.
    pub fn prepare_overlays(
        &self,
        session: &Session,
        session_id: &str,
        output_dir: &Path,
    ) -> Result<Vec<PreparedOverlay>, CodecError> {
        columnar::check_file_stem(session_id)?;
        extract_tracks(session, session_id)
            .into_iter()
            .map(|track| {
                let batch = overlay_batch(&track.rows)?;
                let file_name = format!("{session_id}.{}.parquet", track.overlay_type);
                let sidecar = Sidecar {
                    session_id: session_id.to_string(),
                    source_file: format!("{session_id}.json"),
                    parquet_file: file_name.clone(),
                    rows: Some(track.rows.len() as u64),
                    fields: overlay_columns().into_iter().map(|column| column.name).collect(),
                    compression: self.codec().as_str().to_string(),
                    privacy_score: None,
                    redacted_fields: Vec::new(),
                    generated_at: timestamp_now(),
                    producer: Some(self.producer()),
                };
                Ok(PreparedOverlay {
                    track,
                    artifact_path: output_dir.join(file_name),
                    sidecar,
                    batch,
                })
            })
            .collect()
    }

    /// Write prepared overlays; a dry run only reports them.
    ///
    /// All or nothing: when one overlay fails, those already written are
    /// removed again.
    pub fn write_overlays(
        &self,
        overlays: Vec<PreparedOverlay>,
        dry_run: bool,
    ) -> Result<Vec<EncodedArtifact>, CodecError> {
        let mut encoded: Vec<EncodedArtifact> = Vec::with_capacity(overlays.len());
        for overlay in overlays {
            if !dry_run {
                let written = self.write_artifact(
                    &overlay.artifact_path,
                    &overlay.batch,
                    &overlay_columns(),
                    &overlay.sidecar,
                );
                if let Err(err) = written {
                    for done in &encoded {
                        columnar::discard_artifact(&done.artifact_path);
                    }
                    return Err(err);
                }
            }
            encoded.push(EncodedArtifact {
                artifact_path: overlay.artifact_path,
                sidecar: overlay.sidecar,
                written: !dry_run,
            });
        }
        Ok(encoded)
    }

    /// Encode every overlay track of a session.
    pub fn encode_overlays(
        &self,
        session: &Session,
        session_id: &str,
        output_dir: &Path,
        dry_run: bool,
    ) -> Result<Vec<EncodedArtifact>, CodecError> {
        let prepared = self.prepare_overlays(session, session_id, output_dir)?;
        self.write_overlays(prepared, dry_run)
    }
}

/// Read the rows of an overlay artifact.
pub fn read_overlay_artifact(path: &Path) -> Result<Vec<OverlayRow>, CodecError> {
    let batch = columnar::read_parquet(path)?;
    let required = |name: &str| {
        batch.column_by_name(name).ok_or_else(|| {
            CodecError::Schema(format!("{} has no {name} column", path.display()))
        })
    };

    let sessions = columnar::text_values(required("source_session_id")?.as_ref())?;
    let ids = columnar::text_values(required("overlay_id")?.as_ref())?;
    let types = columnar::text_values(required("overlay_type")?.as_ref())?;
    let starts = columnar::int_values(required("start_ms")?.as_ref())?;
    let ends = columnar::int_values(required("end_ms")?.as_ref())?;
    let intensities = match batch.column_by_name("intensity") {
        Some(array) => columnar::float_values(array.as_ref())?,
        None => vec![None; batch.num_rows()],
    };

    Ok((0..batch.num_rows())
        .map(|i| OverlayRow {
            source_session_id: sessions[i].clone().unwrap_or_default(),
            overlay_id: ids[i].clone().unwrap_or_default(),
            overlay_type: types[i].clone().unwrap_or_default(),
            start_ms: starts[i].unwrap_or(0),
            end_ms: ends[i].unwrap_or(0),
            intensity: intensities[i],
        })
        .collect())
}
