//! Pipeline configuration
//!
//! `PipelineConfig` carries every knob of a compression run. It can be read
//! from a JSON file (missing keys take their defaults) and is validated once,
//! when a [`PipelineContext`](crate::context::PipelineContext) is built.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::columnar::CompressionCodec;
use crate::error::CodecError;
use crate::normalizer::DEFAULT_ROUND_PRECISION;
use crate::privacy::DEFAULT_PRIVACY_THRESHOLD;
use crate::redaction::{RedactionPolicy, DEFAULT_HEART_JITTER};
use crate::schema::{AliasTable, CanonicalField, Session};

/// Default number of batch worker threads
pub const DEFAULT_WORKERS: usize = 4;

/// Largest supported rounding precision
pub const MAX_ROUND_PRECISION: u32 = 9;

/// Which sessions a run keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFilter {
    #[serde(alias = "synthetic")]
    SyntheticOnly,
    #[serde(alias = "real")]
    RealOnly,
    #[serde(alias = "consented_only", alias = "approved")]
    Consented,
}

impl SessionFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionFilter::SyntheticOnly => "synthetic_only",
            SessionFilter::RealOnly => "real_only",
            SessionFilter::Consented => "consented",
        }
    }

    pub fn accepts(&self, session: &Session) -> bool {
        match self {
            SessionFilter::SyntheticOnly => session.is_synthetic(),
            SessionFilter::RealOnly => !session.is_synthetic(),
            SessionFilter::Consented => session.privacy_ledger().export_approved,
        }
    }
}

impl fmt::Display for SessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionFilter {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic_only" | "synthetic" => Ok(SessionFilter::SyntheticOnly),
            "real_only" | "real" => Ok(SessionFilter::RealOnly),
            "consented" | "consented_only" | "approved" => Ok(SessionFilter::Consented),
            other => Err(CodecError::Configuration(format!("unknown filter '{other}'"))),
        }
    }
}

/// Settings for one compression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decimal places kept on metric fields
    pub round_precision: u32,
    pub compression: CompressionCodec,
    /// Write columns under their short aliases
    pub use_alias: bool,
    /// Canonical names of optional columns to omit
    pub drop_fields: Vec<String>,
    /// Score sessions and gate `heart_bpm` on the score
    pub privacy_check: bool,
    pub privacy_threshold: f64,
    pub heart_jitter_amplitude: f64,
    /// Write `<session_id>.features.json` next to each artifact
    pub write_features: bool,
    pub dry_run: bool,
    pub filter: Option<SessionFilter>,
    /// Append-only operational log
    pub log_path: Option<PathBuf>,
    pub workers: usize,
    /// Seed for heart-rate jitter; entropy when absent
    pub jitter_seed: Option<u64>,
    /// Replacement alias table, canonical name → alias
    pub aliases: Option<BTreeMap<String, String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            round_precision: DEFAULT_ROUND_PRECISION,
            compression: CompressionCodec::default(),
            use_alias: false,
            drop_fields: Vec::new(),
            privacy_check: false,
            privacy_threshold: DEFAULT_PRIVACY_THRESHOLD,
            heart_jitter_amplitude: DEFAULT_HEART_JITTER,
            write_features: false,
            dry_run: false,
            filter: None,
            log_path: None,
            workers: DEFAULT_WORKERS,
            jitter_seed: None,
            aliases: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, CodecError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| {
            CodecError::Configuration(format!("{}: {err}", path.display()))
        })
    }

    /// The alias table in force: the override if one is set, else the standard table.
    pub fn alias_table(&self) -> Result<AliasTable, CodecError> {
        match &self.aliases {
            Some(pairs) => AliasTable::from_pairs(pairs),
            None => Ok(AliasTable::standard()),
        }
    }

    /// Parse `drop_fields`; required columns and unknown names are rejected.
    pub fn drop_set(&self) -> Result<BTreeSet<CanonicalField>, CodecError> {
        self.drop_fields
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| {
                let field = CanonicalField::from_name(name).ok_or_else(|| {
                    CodecError::Configuration(format!("cannot drop unknown field '{name}'"))
                })?;
                if !field.is_optional() {
                    return Err(CodecError::Configuration(format!(
                        "'{name}' is a required column and cannot be dropped"
                    )));
                }
                Ok(field)
            })
            .collect()
    }

    pub fn redaction_policy(&self) -> Result<RedactionPolicy, CodecError> {
        Ok(RedactionPolicy {
            drop_fields: self.drop_set()?,
            use_alias: self.use_alias,
            privacy_threshold: self.privacy_threshold,
            heart_jitter_amplitude: self.heart_jitter_amplitude,
            round_precision: self.round_precision,
        })
    }

    /// Check every setting once, before any file is touched.
    pub fn validate(&self) -> Result<(), CodecError> {
        self.alias_table()?;
        self.drop_set()?;

        if self.round_precision > MAX_ROUND_PRECISION {
            return Err(CodecError::Configuration(format!(
                "round_precision {} exceeds {MAX_ROUND_PRECISION}",
                self.round_precision
            )));
        }
        for (name, value) in [
            ("privacy_threshold", self.privacy_threshold),
            ("heart_jitter_amplitude", self.heart_jitter_amplitude),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CodecError::Configuration(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.workers == 0 {
            return Err(CodecError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
