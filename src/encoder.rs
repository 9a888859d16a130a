//! Columnar session encoding
//!
//! This module writes projected session rows to a Parquet artifact and its
//! JSON sidecar. The sidecar is written only after the artifact is complete,
//! so its presence marks the artifact as valid.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float32Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::columnar::{self, ColumnDef, CompressionCodec};
use crate::error::CodecError;
use crate::redaction::Projection;
use crate::schema::CanonicalField;
use crate::types::{Producer, SessionRow, Sidecar};
use crate::{PACK_VERSION, PRODUCER_NAME};

/// Inputs for encoding one session
#[derive(Debug, Clone, Copy)]
pub struct EncodeJob<'a> {
    pub session_id: &'a str,
    /// Base name of the session file the rows came from
    pub source_file: &'a str,
    pub output_dir: &'a Path,
    pub projection: &'a Projection,
    pub privacy_score: Option<f64>,
}

/// An artifact and the sidecar describing it
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedArtifact {
    pub artifact_path: PathBuf,
    pub sidecar: Sidecar,
    /// False for dry runs
    pub written: bool,
}

/// Parquet encoder for session rows
#[derive(Debug)]
pub struct ColumnarEncoder {
    instance_id: String,
    codec: CompressionCodec,
}

impl Default for ColumnarEncoder {
    fn default() -> Self {
        Self::new(CompressionCodec::default())
    }
}

impl ColumnarEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new(codec: CompressionCodec) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            codec,
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String, codec: CompressionCodec) -> Self {
        Self { instance_id, codec }
    }

    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }

    pub fn producer(&self) -> Producer {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: PACK_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        }
    }

    /// Encode one session.
    ///
    /// A dry run performs every step, including building the record batch,
    /// and returns the sidecar it would have written.
    pub fn encode(&self, job: EncodeJob<'_>, dry_run: bool) -> Result<EncodedArtifact, CodecError> {
        columnar::check_file_stem(job.session_id)?;
        let projection = job.projection;
        if projection.rows.is_empty() {
            return Err(CodecError::EmptySession(job.session_id.to_string()));
        }

        let columns = session_columns(projection);
        let batch = session_batch(projection, &columns)?;

        let file_name = format!("{}.parquet", job.session_id);
        let artifact_path = job.output_dir.join(&file_name);
        let sidecar = Sidecar {
            session_id: job.session_id.to_string(),
            source_file: job.source_file.to_string(),
            parquet_file: file_name,
            rows: Some(projection.rows.len() as u64),
            fields: projection.field_names(),
            compression: self.codec.as_str().to_string(),
            privacy_score: job.privacy_score,
            redacted_fields: projection.redacted_fields.clone(),
            generated_at: timestamp_now(),
            producer: Some(self.producer()),
        };

        if !dry_run {
            self.write_artifact(&artifact_path, &batch, &columns, &sidecar)?;
        }

        Ok(EncodedArtifact {
            artifact_path,
            sidecar,
            written: !dry_run,
        })
    }

    /// Write an artifact, then its sidecar.
    pub(crate) fn write_artifact(
        &self,
        path: &Path,
        batch: &RecordBatch,
        columns: &[ColumnDef],
        sidecar: &Sidecar,
    ) -> Result<(), CodecError> {
        columnar::write_parquet(path, batch, columns, self.codec)?;
        if let Err(err) = columnar::write_json(&columnar::sidecar_path(path), sidecar) {
            columnar::discard_artifact(path);
            return Err(err);
        }
        log::debug!("wrote {} ({} rows)", path.display(), batch.num_rows());
        Ok(())
    }
}

pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Column declarations for a projection's layout
pub fn session_columns(projection: &Projection) -> Vec<ColumnDef> {
    projection
        .layout
        .iter()
        .map(|column| {
            let def = ColumnDef::new(
                column.name.clone(),
                column.field.column_type(),
                column.field.is_optional(),
            );
            if column.field == CanonicalField::TMs {
                def.delta_encoded()
            } else {
                def
            }
        })
        .collect()
}

fn session_batch(projection: &Projection, columns: &[ColumnDef]) -> Result<RecordBatch, CodecError> {
    let rows = &projection.rows;
    let arrays = projection
        .layout
        .iter()
        .map(|column| column_array(column.field, rows))
        .collect::<Result<Vec<ArrayRef>, CodecError>>()?;
    Ok(RecordBatch::try_new(columnar::arrow_schema(columns), arrays)?)
}

fn column_array(field: CanonicalField, rows: &[SessionRow]) -> Result<ArrayRef, CodecError> {
    let array: ArrayRef = match field {
        CanonicalField::SessionId => Arc::new(StringArray::from_iter_values(
            rows.iter().map(|row| row.session_id.as_str()),
        )),
        CanonicalField::TMs => {
            let deltas = rows
                .iter()
                .map(|row| {
                    i32::try_from(row.t_ms).map_err(|_| {
                        CodecError::Encoding(format!(
                            "t_ms delta {} of session '{}' does not fit INT32",
                            row.t_ms, row.session_id
                        ))
                    })
                })
                .collect::<Result<Vec<i32>, CodecError>>()?;
            Arc::new(Int32Array::from(deltas))
        }
        CanonicalField::Speed => float_array(rows, |row| row.speed),
        CanonicalField::Cadence => float_array(rows, |row| row.cadence),
        CanonicalField::StrideLength => float_array(rows, |row| row.stride_length),
        CanonicalField::HeartBpm => float_array(rows, |row| row.heart_bpm),
        CanonicalField::SyntheticFlag => Arc::new(BooleanArray::from(
            rows.iter().map(|row| row.synthetic_flag).collect::<Vec<_>>(),
        )),
        CanonicalField::CueEvent => Arc::new(StringArray::from(
            rows.iter()
                .map(|row| row.cue_event.as_deref())
                .collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

fn float_array(rows: &[SessionRow], get: impl Fn(&SessionRow) -> Option<f64>) -> ArrayRef {
    Arc::new(Float32Array::from(
        rows.iter()
            .map(|row| get(row).map(|value| value as f32))
            .collect::<Vec<_>>(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redaction::{RedactionEngine, RedactionPolicy};
    use crate::schema::AliasTable;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn projection(rows: Vec<SessionRow>, policy: &RedactionPolicy, score: Option<f64>) -> Projection {
        let aliases = AliasTable::standard();
        let mut rng = StdRng::seed_from_u64(1);
        RedactionEngine::new(&aliases, policy).project(rows, score, &mut rng)
    }

    fn sample_rows() -> Vec<SessionRow> {
        let mut first = SessionRow::new("s1", false);
        first.speed = Some(3.2);
        let mut second = SessionRow::new("s1", false);
        second.t_ms = 5000;
        second.heart_bpm = Some(140.0);
        vec![first, second]
    }

    fn job<'a>(dir: &'a Path, projection: &'a Projection) -> EncodeJob<'a> {
        EncodeJob {
            session_id: "s1",
            source_file: "s1.json",
            output_dir: dir,
            projection,
            privacy_score: None,
        }
    }

    #[test]
    fn test_encode_writes_artifact_then_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let projection = projection(sample_rows(), &RedactionPolicy::default(), None);
        let encoder = ColumnarEncoder::with_instance_id("test-instance".to_string(), CompressionCodec::Zstd);

        let encoded = encoder.encode(job(dir.path(), &projection), false).unwrap();
        assert!(encoded.written);
        assert_eq!(encoded.artifact_path, dir.path().join("s1.parquet"));
        assert!(encoded.artifact_path.exists());

        let text = std::fs::read_to_string(columnar::sidecar_path(&encoded.artifact_path)).unwrap();
        let sidecar: Sidecar = serde_json::from_str(&text).unwrap();
        assert_eq!(sidecar, encoded.sidecar);
        assert_eq!(sidecar.rows, Some(2));
        assert_eq!(sidecar.compression, "ZSTD");
        assert_eq!(sidecar.parquet_file, "s1.parquet");
        assert_eq!(sidecar.producer.unwrap().instance_id, "test-instance");

        let batch = columnar::read_parquet(&encoded.artifact_path).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            columnar::int_values(batch.column(1).as_ref()).unwrap(),
            vec![Some(0), Some(5000)]
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let projection = projection(sample_rows(), &RedactionPolicy::default(), Some(0.75));
        let encoder = ColumnarEncoder::default();

        let mut request = job(dir.path(), &projection);
        request.privacy_score = Some(0.75);
        let dry = encoder.encode(request, true).unwrap();
        assert!(!dry.written);
        assert!(!dry.artifact_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let real = encoder.encode(request, false).unwrap();
        let strip = |mut sidecar: Sidecar| {
            sidecar.generated_at.clear();
            sidecar
        };
        assert_eq!(strip(dry.sidecar), strip(real.sidecar));
    }

    #[test]
    fn test_scenario_b_sidecar_records_redaction() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RedactionPolicy {
            use_alias: true,
            ..RedactionPolicy::default()
        };
        let projection = projection(sample_rows(), &policy, Some(0.75));
        let mut request = job(dir.path(), &projection);
        request.privacy_score = Some(0.75);

        let encoded = ColumnarEncoder::default().encode(request, false).unwrap();
        assert_eq!(encoded.sidecar.fields, vec!["sid", "dt", "spd", "cad", "str", "syn", "cue"]);
        assert_eq!(encoded.sidecar.redacted_fields, vec!["heart_bpm".to_string()]);
        assert_eq!(encoded.sidecar.privacy_score, Some(0.75));

        let batch = columnar::read_parquet(&encoded.artifact_path).unwrap();
        let schema = batch.schema();
        assert!(schema.field_with_name("hb").is_err());
        assert!(schema.field_with_name("heart_bpm").is_err());
    }

    #[test]
    fn test_empty_rows_are_an_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let projection = projection(vec![], &RedactionPolicy::default(), None);
        let result = ColumnarEncoder::default().encode(job(dir.path(), &projection), false);
        assert!(matches!(result, Err(CodecError::EmptySession(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_delta_overflow_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut rows = sample_rows();
        rows[1].t_ms = i64::from(i32::MAX) + 1;
        let projection = projection(rows, &RedactionPolicy::default(), None);
        let result = ColumnarEncoder::default().encode(job(dir.path(), &projection), false);
        assert!(matches!(result, Err(CodecError::Encoding(_))));
        assert!(!dir.path().join("s1.parquet").exists());
    }
}
