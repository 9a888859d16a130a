//! Columnar artifact machinery shared by the session and overlay codecs
//!
//! Artifacts are Parquet files written through Arrow record batches. Every
//! file (artifact or sidecar) is written to a temporary sibling and renamed
//! into place, so a reader never observes a partial file.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Float32Type, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, Encoding, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;
use crate::schema::coerce::widen_f32;
use crate::schema::ColumnType;

/// Per-column compression codec of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionCodec {
    #[default]
    #[serde(alias = "snappy")]
    Snappy,
    #[serde(alias = "zstd")]
    Zstd,
    #[serde(alias = "gzip")]
    Gzip,
    #[serde(alias = "uncompressed", alias = "none")]
    Uncompressed,
}

impl CompressionCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionCodec::Snappy => "SNAPPY",
            CompressionCodec::Zstd => "ZSTD",
            CompressionCodec::Gzip => "GZIP",
            CompressionCodec::Uncompressed => "UNCOMPRESSED",
        }
    }

    fn to_parquet(self) -> Compression {
        match self {
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            CompressionCodec::Gzip => Compression::GZIP(GzipLevel::default()),
            CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

impl fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionCodec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SNAPPY" => Ok(CompressionCodec::Snappy),
            "ZSTD" => Ok(CompressionCodec::Zstd),
            "GZIP" => Ok(CompressionCodec::Gzip),
            "UNCOMPRESSED" | "NONE" => Ok(CompressionCodec::Uncompressed),
            other => Err(CodecError::Configuration(format!(
                "unknown compression codec '{other}'"
            ))),
        }
    }
}

/// A declared artifact column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Write with DELTA_BINARY_PACKED instead of dictionary/plain encoding
    pub delta_encoded: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
            delta_encoded: false,
        }
    }

    pub fn delta_encoded(mut self) -> Self {
        self.delta_encoded = true;
        self
    }

    fn data_type(&self) -> DataType {
        match self.column_type {
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Float => DataType::Float32,
            ColumnType::Boolean => DataType::Boolean,
        }
    }
}

pub fn arrow_schema(columns: &[ColumnDef]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|column| Field::new(&column.name, column.data_type(), column.nullable))
        .collect();
    Arc::new(Schema::new(fields))
}

fn writer_properties(columns: &[ColumnDef], codec: CompressionCodec) -> WriterProperties {
    columns
        .iter()
        .filter(|column| column.delta_encoded)
        .fold(
            WriterProperties::builder().set_compression(codec.to_parquet()),
            |builder, column| {
                let path = ColumnPath::new(vec![column.name.clone()]);
                builder
                    .set_column_dictionary_enabled(path.clone(), false)
                    .set_column_encoding(path, Encoding::DELTA_BINARY_PACKED)
            },
        )
        .build()
}

/// `<path>.<uuid>.tmp`, in the same directory so the final rename stays
/// atomic. Concurrent writers of one path never share a temporary file.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// Reject a session id that would not stay a single file name inside the
/// output directory.
pub fn check_file_stem(stem: &str) -> Result<(), CodecError> {
    let mut components = Path::new(stem).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single && !stem.contains(['/', '\\', '\0']) {
        Ok(())
    } else {
        Err(CodecError::InvalidSession(format!(
            "session id '{stem}' cannot be used as a file name"
        )))
    }
}

fn rename_into_place(temp_path: &Path, path: &Path) -> Result<(), CodecError> {
    fs::rename(temp_path, path).map_err(|err| {
        let _ = fs::remove_file(temp_path);
        CodecError::from(err)
    })
}

fn ensure_parent(path: &Path) -> Result<(), CodecError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write one record batch to `path` atomically.
pub fn write_parquet(
    path: &Path,
    batch: &RecordBatch,
    columns: &[ColumnDef],
    codec: CompressionCodec,
) -> Result<(), CodecError> {
    ensure_parent(path)?;
    let temp_path = temp_sibling(path);

    let written = (|| -> Result<(), CodecError> {
        let file = File::create(&temp_path)?;
        let props = writer_properties(columns, codec);
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    rename_into_place(&temp_path, path)
}

/// Read every row of an artifact into a single batch.
pub fn read_parquet(path: &Path) -> Result<RecordBatch, CodecError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<Result<Vec<RecordBatch>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Pretty-print `value` as JSON to `path` atomically, with a trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CodecError> {
    ensure_parent(path)?;
    let temp_path = temp_sibling(path);
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    if let Err(err) = fs::write(&temp_path, text) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    rename_into_place(&temp_path, path)
}

/// Remove an artifact and its sidecar; files already gone are ignored.
pub fn discard_artifact(path: &Path) {
    for file in [path.to_path_buf(), sidecar_path(path)] {
        match fs::remove_file(&file) {
            Ok(()) => log::debug!("removed {}", file.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("could not remove {}: {err}", file.display()),
        }
    }
}

/// Sidecar location for an artifact: `<artifact>.meta.json`
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut name: OsString = artifact.file_name().map(OsString::from).unwrap_or_default();
    name.push(".meta.json");
    artifact.with_file_name(name)
}

pub fn int_values(array: &dyn Array) -> Result<Vec<Option<i64>>, CodecError> {
    let widened = cast(array, &DataType::Int64)?;
    Ok(widened.as_primitive::<Int64Type>().iter().collect())
}

/// FLOAT columns are widened through their shortest decimal form.
pub fn float_values(array: &dyn Array) -> Result<Vec<Option<f64>>, CodecError> {
    if let Some(floats) = array.as_primitive_opt::<Float32Type>() {
        return Ok(floats.iter().map(|value| value.map(widen_f32)).collect());
    }
    let widened = cast(array, &DataType::Float64)?;
    Ok(widened.as_primitive::<Float64Type>().iter().collect())
}

pub fn bool_values(array: &dyn Array) -> Result<Vec<Option<bool>>, CodecError> {
    let flags = cast(array, &DataType::Boolean)?;
    Ok(flags.as_boolean().iter().collect())
}

pub fn text_values(array: &dyn Array) -> Result<Vec<Option<String>>, CodecError> {
    let text = cast(array, &DataType::Utf8)?;
    Ok(text
        .as_string::<i32>()
        .iter()
        .map(|value| value.map(str::to_string))
        .collect())
}
