//! Canonical row fields and the short-alias table
//!
//! The artifact schema is fixed: eight columns, each with a canonical name
//! and a short alias. Aliasing is a bijection and is validated once when a
//! pipeline context is built, never per row.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Physical column type in the columnar artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Utf8,
    Int32,
    Float,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Utf8 => "UTF8",
            ColumnType::Int32 => "INT32",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
        }
    }
}

/// Columns of a session row, in artifact order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    SessionId,
    TMs,
    Speed,
    Cadence,
    StrideLength,
    HeartBpm,
    SyntheticFlag,
    CueEvent,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 8] = [
        CanonicalField::SessionId,
        CanonicalField::TMs,
        CanonicalField::Speed,
        CanonicalField::Cadence,
        CanonicalField::StrideLength,
        CanonicalField::HeartBpm,
        CanonicalField::SyntheticFlag,
        CanonicalField::CueEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::SessionId => "session_id",
            CanonicalField::TMs => "t_ms",
            CanonicalField::Speed => "speed",
            CanonicalField::Cadence => "cadence",
            CanonicalField::StrideLength => "stride_length",
            CanonicalField::HeartBpm => "heart_bpm",
            CanonicalField::SyntheticFlag => "synthetic_flag",
            CanonicalField::CueEvent => "cue_event",
        }
    }

    /// Default short code used when aliasing is enabled
    pub fn default_alias(&self) -> &'static str {
        match self {
            CanonicalField::SessionId => "sid",
            CanonicalField::TMs => "dt",
            CanonicalField::Speed => "spd",
            CanonicalField::Cadence => "cad",
            CanonicalField::StrideLength => "str",
            CanonicalField::HeartBpm => "hb",
            CanonicalField::SyntheticFlag => "syn",
            CanonicalField::CueEvent => "cue",
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            CanonicalField::SessionId | CanonicalField::CueEvent => ColumnType::Utf8,
            CanonicalField::TMs => ColumnType::Int32,
            CanonicalField::SyntheticFlag => ColumnType::Boolean,
            _ => ColumnType::Float,
        }
    }

    pub fn is_optional(&self) -> bool {
        !matches!(
            self,
            CanonicalField::SessionId | CanonicalField::TMs | CanonicalField::SyntheticFlag
        )
    }

    pub fn from_name(name: &str) -> Option<CanonicalField> {
        Self::ALL.into_iter().find(|field| field.as_str() == name)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated bijection between canonical field names and short aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    forward: BTreeMap<CanonicalField, String>,
    reverse: BTreeMap<String, CanonicalField>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl AliasTable {
    /// The built-in table (`session_id` ↔ `sid`, `t_ms` ↔ `dt`, ...)
    pub fn standard() -> Self {
        let forward: BTreeMap<CanonicalField, String> = CanonicalField::ALL
            .into_iter()
            .map(|field| (field, field.default_alias().to_string()))
            .collect();
        let reverse = forward
            .iter()
            .map(|(field, alias)| (alias.clone(), *field))
            .collect();
        Self { forward, reverse }
    }

    /// Build a table from canonical-name → alias pairs.
    ///
    /// The table must cover every canonical field, map no two fields to the
    /// same alias, and never use another field's canonical name as an alias.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut forward = BTreeMap::new();
        for (name, alias) in pairs {
            let name = name.as_ref();
            let field = CanonicalField::from_name(name).ok_or_else(|| {
                CodecError::Configuration(format!("alias table names unknown field '{name}'"))
            })?;
            let alias = alias.as_ref().trim();
            if alias.is_empty() {
                return Err(CodecError::Configuration(format!(
                    "alias for '{name}' is empty"
                )));
            }
            if forward.insert(field, alias.to_string()).is_some() {
                return Err(CodecError::Configuration(format!(
                    "alias table lists '{name}' twice"
                )));
            }
        }

        let missing: Vec<&str> = CanonicalField::ALL
            .iter()
            .filter(|field| !forward.contains_key(*field))
            .map(CanonicalField::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CodecError::Configuration(format!(
                "alias table is incomplete, missing: {}",
                missing.join(", ")
            )));
        }

        let mut reverse = BTreeMap::new();
        for (field, alias) in &forward {
            if let Some(other) = CanonicalField::from_name(alias) {
                if other != *field {
                    return Err(CodecError::Configuration(format!(
                        "alias '{alias}' for '{field}' collides with canonical field '{other}'"
                    )));
                }
            }
            if let Some(previous) = reverse.insert(alias.clone(), *field) {
                return Err(CodecError::Configuration(format!(
                    "alias '{alias}' is shared by '{previous}' and '{field}'"
                )));
            }
        }

        Ok(Self { forward, reverse })
    }

    pub fn alias(&self, field: CanonicalField) -> &str {
        self.forward
            .get(&field)
            .map(String::as_str)
            .unwrap_or_else(|| field.as_str())
    }

    /// Resolve a column name, aliased or canonical, to its field.
    pub fn resolve(&self, column: &str) -> Option<CanonicalField> {
        self.reverse
            .get(column)
            .copied()
            .or_else(|| CanonicalField::from_name(column))
    }

    /// Column name for `field` under the given naming convention.
    pub fn output_name(&self, field: CanonicalField, use_alias: bool) -> String {
        if use_alias {
            self.alias(field).to_string()
        } else {
            field.as_str().to_string()
        }
    }

    pub fn aliases(&self) -> BTreeSet<&str> {
        self.reverse.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_bijective() {
        let table = AliasTable::standard();
        for field in CanonicalField::ALL {
            let alias = table.alias(field).to_string();
            let canonical = table.resolve(&alias).unwrap();
            assert_eq!(canonical, field);
            assert_eq!(table.alias(canonical), alias);
        }
        assert_eq!(table.aliases().len(), CanonicalField::ALL.len());
    }

    #[test]
    fn test_resolve_accepts_canonical_names() {
        let table = AliasTable::standard();
        assert_eq!(table.resolve("heart_bpm"), Some(CanonicalField::HeartBpm));
        assert_eq!(table.resolve("hb"), Some(CanonicalField::HeartBpm));
        assert_eq!(table.resolve("altitude"), None);
    }

    #[test]
    fn test_incomplete_table_rejected() {
        let result = AliasTable::from_pairs([("session_id", "sid"), ("t_ms", "dt")]);
        match result {
            Err(CodecError::Configuration(msg)) => assert!(msg.contains("incomplete")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut pairs: Vec<(&str, &str)> = CanonicalField::ALL
            .iter()
            .map(|f| (f.as_str(), f.default_alias()))
            .collect();
        pairs[2] = ("speed", "cad");
        assert!(matches!(
            AliasTable::from_pairs(pairs),
            Err(CodecError::Configuration(_))
        ));
    }

    #[test]
    fn test_alias_colliding_with_canonical_name_rejected() {
        let mut pairs: Vec<(&str, &str)> = CanonicalField::ALL
            .iter()
            .map(|f| (f.as_str(), f.default_alias()))
            .collect();
        pairs[2] = ("speed", "cadence");
        assert!(matches!(
            AliasTable::from_pairs(pairs),
            Err(CodecError::Configuration(_))
        ));
    }

    #[test]
    fn test_column_types() {
        assert_eq!(CanonicalField::TMs.column_type(), ColumnType::Int32);
        assert_eq!(CanonicalField::HeartBpm.column_type(), ColumnType::Float);
        assert!(CanonicalField::CueEvent.is_optional());
        assert!(!CanonicalField::SyntheticFlag.is_optional());
    }
}
