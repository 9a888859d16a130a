//! Per-invocation pipeline context
//!
//! Everything a compression or rehydration run shares across files: the
//! operational log, the validated alias table, the redaction policy and the
//! encoder identity. A context is built once per invocation from a
//! [`PipelineConfig`] and dropped with it; nothing lives in process globals.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::PipelineConfig;
use crate::encoder::ColumnarEncoder;
use crate::error::CodecError;
use crate::logbook::CompressionLog;
use crate::redaction::RedactionPolicy;
use crate::schema::AliasTable;

/// Shared state of one pipeline invocation
#[derive(Debug)]
pub struct PipelineContext {
    pub log: CompressionLog,
    pub aliases: AliasTable,
    pub policy: RedactionPolicy,
    pub config: PipelineConfig,
    pub encoder: ColumnarEncoder,
}

impl PipelineContext {
    /// Validate the configuration and open the log named by it.
    pub fn new(config: PipelineConfig) -> Result<Self, CodecError> {
        let log = match &config.log_path {
            Some(path) => CompressionLog::open(path)?,
            None => CompressionLog::disabled(),
        };
        Self::with_log(config, log)
    }

    /// Like [`PipelineContext::new`], with an already opened log.
    pub fn with_log(config: PipelineConfig, log: CompressionLog) -> Result<Self, CodecError> {
        config.validate()?;
        let aliases = config.alias_table()?;
        let policy = config.redaction_policy()?;
        let encoder = ColumnarEncoder::new(config.compression);
        log::debug!(
            "pipeline context ready (codec {}, alias {}, privacy check {})",
            config.compression,
            config.use_alias,
            config.privacy_check
        );
        Ok(Self {
            log,
            aliases,
            policy,
            config,
            encoder,
        })
    }

    /// Jitter source for one session: seeded when configured, else entropy.
    pub fn jitter_rng(&self) -> StdRng {
        match self.config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CanonicalField;
    use rand::Rng;

    #[test]
    fn test_invalid_config_is_rejected_at_startup() {
        let config = PipelineConfig {
            drop_fields: vec!["session_id".to_string()],
            ..PipelineConfig::default()
        };
        assert!(matches!(
            PipelineContext::new(config),
            Err(CodecError::Configuration(_))
        ));
    }

    #[test]
    fn test_context_carries_policy_and_aliases() {
        let config = PipelineConfig {
            use_alias: true,
            drop_fields: vec!["stride_length".to_string()],
            ..PipelineConfig::default()
        };
        let context = PipelineContext::new(config).unwrap();
        assert!(context.policy.use_alias);
        assert!(context.policy.drop_fields.contains(&CanonicalField::StrideLength));
        assert_eq!(context.aliases.alias(CanonicalField::HeartBpm), "hb");
        assert!(context.log.path().is_none());
    }

    #[test]
    fn test_seeded_jitter_is_repeatable() {
        let config = PipelineConfig {
            jitter_seed: Some(9),
            ..PipelineConfig::default()
        };
        let context = PipelineContext::new(config).unwrap();
        let a: f64 = context.jitter_rng().gen();
        let b: f64 = context.jitter_rng().gen();
        assert_eq!(a, b);
    }

    #[test]
    fn test_log_path_is_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let config = PipelineConfig {
            log_path: Some(path.clone()),
            ..PipelineConfig::default()
        };
        let context = PipelineContext::new(config).unwrap();
        assert_eq!(context.log.path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
