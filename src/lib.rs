//! Noodle Pack - Columnar compression and rehydration of session telemetry
//!
//! Noodle Pack turns recorded treadmill/movement sessions ("noodles") into
//! compact Parquet artifacts and back, through a deterministic pipeline:
//! normalization → privacy scoring → redaction & aliasing → columnar
//! encoding. Decoding reconstructs absolute timelines and renders them as
//! noodle, ghost or timeline JSON views.
//!
//! ## Modules
//!
//! - **Compression**: `normalizer`, `privacy`, `redaction`, `encoder`, `overlay`, `features`
//! - **Rehydration**: `decoder`
//! - **Orchestration**: `config`, `context`, `logbook`, `pipeline`

pub mod columnar;
pub mod config;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod features;
pub mod logbook;
pub mod normalizer;
pub mod overlay;
pub mod pipeline;
pub mod privacy;
pub mod redaction;
pub mod schema;
pub mod types;

pub use columnar::CompressionCodec;
pub use config::{PipelineConfig, SessionFilter};
pub use context::PipelineContext;
pub use decoder::{ColumnarDecoder, DecodeOptions, OutputFormat};
pub use encoder::ColumnarEncoder;
pub use error::{CodecError, SchemaMismatchWarning};
pub use pipeline::{compress_directory, compress_session, rehydrate, CancellationFlag};
pub use privacy::PrivacyEvaluator;

// Schema exports
pub use schema::{AliasTable, CanonicalField, Session};

/// Noodle Pack version embedded in every sidecar
pub const PACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for sidecars
pub const PRODUCER_NAME: &str = "noodle-pack";
