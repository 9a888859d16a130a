//! Columnar session decoding ("rehydrate")
//!
//! Reads an artifact and its optional sidecar back into a reconstructed
//! timeline with absolute `t_ms`, then renders the requested views:
//! - `noodle`: canonical session with a `timeline` array
//! - `ghost`: replay-oriented event list
//! - `timeline`: the bare reconstructed rows
//!
//! Column names are resolved through the alias table whether or not the
//! sidecar mentions aliasing. Sidecar disagreements become warnings.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::columnar;
use crate::encoder::timestamp_now;
use crate::error::{CodecError, SchemaMismatchWarning};
use crate::schema::{AliasTable, CanonicalField, PrivacyLedger};
use crate::types::{GhostPayload, NoodlePayload, RehydrationMetadata, Sidecar, TimelineEvent};

/// A rehydrated representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputFormat {
    Noodle,
    Ghost,
    Timeline,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Noodle, OutputFormat::Ghost, OutputFormat::Timeline];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Noodle => "noodle",
            OutputFormat::Ghost => "ghost",
            OutputFormat::Timeline => "timeline",
        }
    }

    /// Parse a comma-separated list; `all` expands to every format.
    ///
    /// Duplicates collapse, first mention wins the position.
    pub fn parse_list(list: &str) -> Result<Vec<OutputFormat>, CodecError> {
        let mut formats = Vec::new();
        for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let expanded: Vec<OutputFormat> = if token.eq_ignore_ascii_case("all") {
                Self::ALL.to_vec()
            } else {
                vec![token.parse()?]
            };
            for format in expanded {
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
        }
        if formats.is_empty() {
            return Err(CodecError::UnsupportedFormat(
                "no output format requested".to_string(),
            ));
        }
        Ok(formats)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noodle" => Ok(OutputFormat::Noodle),
            "ghost" => Ok(OutputFormat::Ghost),
            "timeline" => Ok(OutputFormat::Timeline),
            _ => Err(CodecError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Options for one decode
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub formats: Vec<OutputFormat>,
    /// New session id for the noodle view; the old one goes to `remixed_from`
    pub remix: Option<String>,
    /// Track identifier attached to the noodle view
    pub inject_track: Option<String>,
    /// Mark the noodle view synthetic and attach a rebuilt privacy ledger
    pub rebuild_synthetic: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            formats: vec![OutputFormat::Noodle],
            remix: None,
            inject_track: None,
            rebuild_synthetic: false,
        }
    }
}

/// One rendered view
#[derive(Debug, Clone, PartialEq)]
pub enum RehydratedView {
    Noodle(NoodlePayload),
    Ghost(GhostPayload),
    Timeline(Vec<TimelineEvent>),
}

impl RehydratedView {
    pub fn format(&self) -> OutputFormat {
        match self {
            RehydratedView::Noodle(_) => OutputFormat::Noodle,
            RehydratedView::Ghost(_) => OutputFormat::Ghost,
            RehydratedView::Timeline(_) => OutputFormat::Timeline,
        }
    }

    pub fn to_value(&self) -> Result<Value, CodecError> {
        Ok(match self {
            RehydratedView::Noodle(payload) => serde_json::to_value(payload)?,
            RehydratedView::Ghost(payload) => serde_json::to_value(payload)?,
            RehydratedView::Timeline(events) => serde_json::to_value(events)?,
        })
    }
}

/// Everything recovered from one artifact
#[derive(Debug, Clone, PartialEq)]
pub struct RehydratedSession {
    /// Session id before any remix
    pub session_id: String,
    pub synthetic: bool,
    pub timeline: Vec<TimelineEvent>,
    pub metadata: RehydrationMetadata,
    pub views: Vec<RehydratedView>,
}

impl RehydratedSession {
    pub fn view(&self, format: OutputFormat) -> Option<&RehydratedView> {
        self.views.iter().find(|view| view.format() == format)
    }

    pub fn warnings(&self) -> &[String] {
        &self.metadata.warnings
    }

    /// Write each view to `<output_dir>/<base>.<format>.json`.
    pub fn write_views(&self, output_dir: &Path, base: &str) -> Result<Vec<PathBuf>, CodecError> {
        self.views
            .iter()
            .map(|view| {
                let path = output_dir.join(format!("{base}.{}.json", view.format()));
                columnar::write_json(&path, &view.to_value()?)?;
                Ok(path)
            })
            .collect()
    }
}

/// Base name used for rehydrated output files: the artifact's stem
pub fn output_base(artifact: &Path) -> String {
    artifact
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string())
}

/// Decoded artifact columns, by canonical field
struct ArtifactColumns {
    names: Vec<String>,
    rows: usize,
    session_id: Vec<Option<String>>,
    t_ms: Vec<Option<i64>>,
    floats: BTreeMap<CanonicalField, Vec<Option<f64>>>,
    synthetic_flag: Vec<Option<bool>>,
    cue_event: Vec<Option<String>>,
}

/// Parquet decoder for session artifacts
#[derive(Default)]
pub struct ColumnarDecoder {
    aliases: AliasTable,
}

impl ColumnarDecoder {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    /// Decode an artifact into the requested views.
    pub fn decode(&self, artifact: &Path, options: &DecodeOptions) -> Result<RehydratedSession, CodecError> {
        let mut warnings = Vec::new();
        let columns = self.read_columns(artifact, &mut warnings)?;
        let sidecar = read_sidecar(artifact, &mut warnings);

        if let Some(sidecar) = &sidecar {
            if let Some(meta) = sidecar.rows.filter(|rows| *rows != columns.rows as u64) {
                warnings.push(SchemaMismatchWarning::RowCount {
                    parquet: columns.rows,
                    meta,
                });
            }
            if !sidecar.fields.is_empty() && sidecar.fields != columns.names {
                warnings.push(SchemaMismatchWarning::FieldList {
                    parquet: columns.names.clone(),
                    meta: sidecar.fields.clone(),
                });
            }
        }
        for warning in &warnings {
            log::warn!("{}: {warning}", artifact.display());
        }

        let timeline = reconstruct(&columns);
        let synthetic = columns
            .synthetic_flag
            .iter()
            .rev()
            .find_map(|flag| *flag)
            .unwrap_or(false);
        let session_id = sidecar
            .as_ref()
            .map(|s| s.session_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| columns.session_id.iter().flatten().find(|id| !id.is_empty()).cloned())
            .unwrap_or_else(|| output_base(artifact));

        let metadata = rehydration_metadata(
            artifact,
            columns.rows,
            sidecar.as_ref(),
            warnings.iter().map(ToString::to_string).collect(),
        );

        let views = options
            .formats
            .iter()
            .map(|format| match format {
                OutputFormat::Noodle => RehydratedView::Noodle(noodle_view(
                    &session_id,
                    synthetic,
                    &timeline,
                    &metadata,
                    options,
                )),
                OutputFormat::Ghost => RehydratedView::Ghost(GhostPayload {
                    session_id: session_id.clone(),
                    events: timeline.clone(),
                }),
                OutputFormat::Timeline => RehydratedView::Timeline(timeline.clone()),
            })
            .collect();

        Ok(RehydratedSession {
            session_id,
            synthetic,
            timeline,
            metadata,
            views,
        })
    }

    fn read_columns(
        &self,
        artifact: &Path,
        warnings: &mut Vec<SchemaMismatchWarning>,
    ) -> Result<ArtifactColumns, CodecError> {
        let batch = columnar::read_parquet(artifact)?;
        let rows = batch.num_rows();
        if rows == 0 {
            return Err(CodecError::Schema(format!(
                "{} contains no rows",
                artifact.display()
            )));
        }

        let schema = batch.schema();
        let mut columns = ArtifactColumns {
            names: schema.fields().iter().map(|f| f.name().clone()).collect(),
            rows,
            session_id: vec![None; rows],
            t_ms: Vec::new(),
            floats: BTreeMap::new(),
            synthetic_flag: vec![None; rows],
            cue_event: vec![None; rows],
        };
        let mut seen_t_ms = false;

        for (index, field) in schema.fields().iter().enumerate() {
            let array = batch.column(index).as_ref();
            let Some(canonical) = self.aliases.resolve(field.name()) else {
                warnings.push(SchemaMismatchWarning::UnknownColumn(field.name().clone()));
                continue;
            };
            match canonical {
                CanonicalField::SessionId => columns.session_id = columnar::text_values(array)?,
                CanonicalField::TMs => {
                    columns.t_ms = columnar::int_values(array)?;
                    seen_t_ms = true;
                }
                CanonicalField::SyntheticFlag => columns.synthetic_flag = columnar::bool_values(array)?,
                CanonicalField::CueEvent => columns.cue_event = columnar::text_values(array)?,
                metric => {
                    columns.floats.insert(metric, columnar::float_values(array)?);
                }
            }
        }

        if !seen_t_ms {
            return Err(CodecError::Schema(format!(
                "{} has no t_ms column",
                artifact.display()
            )));
        }
        Ok(columns)
    }
}

/// Cumulative sum of deltas, seeded with the first row's offset.
fn reconstruct(columns: &ArtifactColumns) -> Vec<TimelineEvent> {
    let metric = |field: CanonicalField, row: usize| -> Option<f64> {
        columns
            .floats
            .get(&field)
            .and_then(|values| values.get(row).copied().flatten())
    };

    let mut elapsed = 0i64;
    (0..columns.rows)
        .map(|row| {
            elapsed = elapsed.saturating_add(columns.t_ms[row].unwrap_or(0));
            TimelineEvent {
                t_ms: elapsed,
                speed: metric(CanonicalField::Speed, row),
                cadence: metric(CanonicalField::Cadence, row),
                stride_length: metric(CanonicalField::StrideLength, row),
                heart_bpm: metric(CanonicalField::HeartBpm, row),
                cue_event: columns.cue_event[row].clone().filter(|cue| !cue.is_empty()),
            }
        })
        .collect()
}

/// Read `<artifact>.meta.json`; a present but unreadable file is a warning.
fn read_sidecar(artifact: &Path, warnings: &mut Vec<SchemaMismatchWarning>) -> Option<Sidecar> {
    let path = columnar::sidecar_path(artifact);
    if !path.exists() {
        return None;
    }
    let parsed = fs::read_to_string(&path)
        .map_err(|err| err.to_string())
        .and_then(|text| serde_json::from_str::<Sidecar>(&text).map_err(|err| err.to_string()));
    match parsed {
        Ok(sidecar) => Some(sidecar),
        Err(reason) => {
            warnings.push(SchemaMismatchWarning::SidecarUnreadable(reason));
            None
        }
    }
}

fn rehydration_metadata(
    artifact: &Path,
    rows: usize,
    sidecar: Option<&Sidecar>,
    warnings: Vec<String>,
) -> RehydrationMetadata {
    let source = fs::canonicalize(artifact).unwrap_or_else(|_| artifact.to_path_buf());
    let present = |text: &str| Some(text.to_string()).filter(|t| !t.is_empty());

    let mut metadata = RehydrationMetadata {
        source_parquet: source.display().to_string(),
        restored_at: timestamp_now(),
        rows,
        warnings,
        ..RehydrationMetadata::default()
    };
    if let Some(sidecar) = sidecar {
        metadata.sidecar_session_id = present(&sidecar.session_id);
        metadata.source_file = present(&sidecar.source_file);
        metadata.privacy_score = sidecar.privacy_score;
        metadata.fields = Some(sidecar.fields.clone());
        metadata.compression = present(&sidecar.compression);
        metadata.redacted_fields = Some(sidecar.redacted_fields.clone());
        metadata.generated_at = present(&sidecar.generated_at);
    }
    metadata
}

fn noodle_view(
    session_id: &str,
    synthetic: bool,
    timeline: &[TimelineEvent],
    metadata: &RehydrationMetadata,
    options: &DecodeOptions,
) -> NoodlePayload {
    let (session_id, remixed_from) = match &options.remix {
        Some(remix) => (remix.clone(), Some(session_id.to_string())),
        None => (session_id.to_string(), None),
    };
    NoodlePayload {
        session_id,
        synthetic: synthetic || options.rebuild_synthetic,
        timeline: timeline.to_vec(),
        track_id: options.inject_track.clone(),
        privacy_ledger: options.rebuild_synthetic.then(PrivacyLedger::rehydrated),
        remixed_from,
        rehydration_metadata: metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::{ColumnDef, CompressionCodec};
    use crate::schema::ColumnType;
    use arrow::array::{ArrayRef, BooleanArray, Float32Array, Int32Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// Write a small aliased artifact by hand: deltas 0, 5000, 250
    fn write_artifact(dir: &Path, name: &str) -> PathBuf {
        let columns = vec![
            ColumnDef::new("sid", ColumnType::Utf8, false),
            ColumnDef::new("dt", ColumnType::Int32, false).delta_encoded(),
            ColumnDef::new("spd", ColumnType::Float, true),
            ColumnDef::new("hb", ColumnType::Float, true),
            ColumnDef::new("syn", ColumnType::Boolean, false),
            ColumnDef::new("cue", ColumnType::Utf8, true),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["row-id"; 3])),
            Arc::new(Int32Array::from(vec![0, 5000, 250])),
            Arc::new(Float32Array::from(vec![Some(3.2f32), None, Some(3.3)])),
            Arc::new(Float32Array::from(vec![None, Some(140.0f32), Some(141.5)])),
            Arc::new(BooleanArray::from(vec![false, false, true])),
            Arc::new(StringArray::from(vec![None, Some("go"), None])),
        ];
        let batch = RecordBatch::try_new(columnar::arrow_schema(&columns), arrays).unwrap();
        let path = dir.join(name);
        columnar::write_parquet(&path, &batch, &columns, CompressionCodec::Snappy).unwrap();
        path
    }

    fn write_sidecar(artifact: &Path, rows: Option<u64>) {
        let sidecar = Sidecar {
            session_id: "sidecar-id".to_string(),
            source_file: "sidecar-id.json".to_string(),
            parquet_file: "a.parquet".to_string(),
            rows,
            fields: ["sid", "dt", "spd", "hb", "syn", "cue"].map(String::from).to_vec(),
            compression: "SNAPPY".to_string(),
            privacy_score: Some(0.42),
            redacted_fields: vec![],
            generated_at: "2024-01-01T00:00:00.000Z".to_string(),
            producer: None,
        };
        columnar::write_json(&columnar::sidecar_path(artifact), &sidecar).unwrap();
    }

    #[test]
    fn test_output_format_lists() {
        assert_eq!(
            OutputFormat::parse_list("ghost, noodle,ghost").unwrap(),
            vec![OutputFormat::Ghost, OutputFormat::Noodle]
        );
        assert_eq!(OutputFormat::parse_list("all").unwrap(), OutputFormat::ALL.to_vec());
        assert!(matches!(
            OutputFormat::parse_list("noodle,csv"),
            Err(CodecError::UnsupportedFormat(_))
        ));
        assert!(OutputFormat::parse_list(" , ").is_err());
    }

    #[test]
    fn test_reconstructs_absolute_time_through_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        let times: Vec<i64> = session.timeline.iter().map(|e| e.t_ms).collect();
        assert_eq!(times, vec![0, 5000, 5250]);
        assert_eq!(session.timeline[0].speed, Some(3.2));
        assert_eq!(session.timeline[1].heart_bpm, Some(140.0));
        assert_eq!(session.timeline[1].cue_event.as_deref(), Some("go"));
        // Without a sidecar the id comes from the rows
        assert_eq!(session.session_id, "row-id");
        assert!(session.synthetic);
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn test_scenario_c_row_count_mismatch_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");
        write_sidecar(&artifact, Some(10));

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert_eq!(
            session.warnings(),
            &["Row count mismatch (parquet: 3, meta: 10)".to_string()]
        );
        let Some(RehydratedView::Noodle(noodle)) = session.view(OutputFormat::Noodle) else {
            panic!("noodle view missing");
        };
        assert_eq!(noodle.session_id, "sidecar-id");
        assert_eq!(noodle.rehydration_metadata.rows, 3);
        assert_eq!(noodle.rehydration_metadata.privacy_score, Some(0.42));
        assert_eq!(noodle.timeline.len(), 3);

        let value = session.view(OutputFormat::Noodle).unwrap().to_value().unwrap();
        assert_eq!(
            value["rehydration_metadata"]["warnings"],
            serde_json::json!(["Row count mismatch (parquet: 3, meta: 10)"])
        );
    }

    #[test]
    fn test_sidecar_without_row_count_is_not_compared() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");
        fs::write(
            columnar::sidecar_path(&artifact),
            r#"{"session_id": "sidecar-id", "fields": ["sid", "dt", "spd", "hb", "syn", "cue"]}"#,
        )
        .unwrap();

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert!(session.warnings().is_empty());
        assert_eq!(session.metadata.sidecar_session_id.as_deref(), Some("sidecar-id"));
    }

    #[test]
    fn test_unreadable_sidecar_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");
        fs::write(columnar::sidecar_path(&artifact), "{not json").unwrap();

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert_eq!(session.warnings().len(), 1);
        assert!(session.warnings()[0].starts_with("Sidecar metadata unreadable"));
        assert_eq!(session.metadata.sidecar_session_id, None);
    }

    #[test]
    fn test_field_list_mismatch_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");
        let mut sidecar = Sidecar {
            session_id: "s".to_string(),
            source_file: String::new(),
            parquet_file: String::new(),
            rows: Some(3),
            fields: vec!["session_id".to_string(), "t_ms".to_string()],
            compression: String::new(),
            privacy_score: None,
            redacted_fields: vec![],
            generated_at: String::new(),
            producer: None,
        };
        columnar::write_json(&columnar::sidecar_path(&artifact), &sidecar).unwrap();

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert_eq!(session.warnings().len(), 1);
        assert!(session.warnings()[0].starts_with("Field list mismatch"));

        sidecar.fields.clear();
        columnar::write_json(&columnar::sidecar_path(&artifact), &sidecar).unwrap();
        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn test_views_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_artifact(dir.path(), "a.parquet");
        write_sidecar(&artifact, Some(3));

        let options = DecodeOptions {
            formats: OutputFormat::ALL.to_vec(),
            remix: Some("remixed".to_string()),
            inject_track: Some("track-9".to_string()),
            rebuild_synthetic: true,
        };
        let session = ColumnarDecoder::default().decode(&artifact, &options).unwrap();

        let Some(RehydratedView::Noodle(noodle)) = session.view(OutputFormat::Noodle) else {
            panic!("noodle view missing");
        };
        assert_eq!(noodle.session_id, "remixed");
        assert_eq!(noodle.remixed_from.as_deref(), Some("sidecar-id"));
        assert_eq!(noodle.track_id.as_deref(), Some("track-9"));
        assert!(noodle.synthetic);
        assert_eq!(noodle.privacy_ledger, Some(PrivacyLedger::rehydrated()));

        let Some(RehydratedView::Ghost(ghost)) = session.view(OutputFormat::Ghost) else {
            panic!("ghost view missing");
        };
        assert_eq!(ghost.session_id, "sidecar-id");
        assert_eq!(ghost.events, session.timeline);

        let written = session.write_views(dir.path(), &output_base(&artifact)).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("a.noodle.json"),
                dir.path().join("a.ghost.json"),
                dir.path().join("a.timeline.json"),
            ]
        );
        let timeline: Vec<TimelineEvent> =
            serde_json::from_str(&fs::read_to_string(&written[2]).unwrap()).unwrap();
        assert_eq!(timeline, session.timeline);
    }

    #[test]
    fn test_unknown_columns_are_ignored_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let columns = vec![
            ColumnDef::new("t_ms", ColumnType::Int32, false),
            ColumnDef::new("altitude", ColumnType::Float, true),
        ];
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![100, 100])),
            Arc::new(Float32Array::from(vec![Some(1.0f32), Some(2.0)])),
        ];
        let batch = RecordBatch::try_new(columnar::arrow_schema(&columns), arrays).unwrap();
        let artifact = dir.path().join("bare.parquet");
        columnar::write_parquet(&artifact, &batch, &columns, CompressionCodec::Uncompressed).unwrap();

        let session = ColumnarDecoder::default()
            .decode(&artifact, &DecodeOptions::default())
            .unwrap();
        assert_eq!(session.warnings(), &["Unrecognized column 'altitude' ignored".to_string()]);
        assert_eq!(session.session_id, "bare");
        let times: Vec<i64> = session.timeline.iter().map(|e| e.t_ms).collect();
        assert_eq!(times, vec![100, 200]);
    }

    #[test]
    fn test_missing_t_ms_column_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let columns = vec![ColumnDef::new("speed", ColumnType::Float, true)];
        let arrays: Vec<ArrayRef> = vec![Arc::new(Float32Array::from(vec![Some(1.0f32)]))];
        let batch = RecordBatch::try_new(columnar::arrow_schema(&columns), arrays).unwrap();
        let artifact = dir.path().join("x.parquet");
        columnar::write_parquet(&artifact, &batch, &columns, CompressionCodec::Snappy).unwrap();

        let result = ColumnarDecoder::default().decode(&artifact, &DecodeOptions::default());
        assert!(matches!(result, Err(CodecError::Schema(_))));
    }
}
