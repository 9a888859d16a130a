//! Append-only compression log
//!
//! One line per event, `[<RFC 3339 UTC>] [<TAG>] <message>`. Lines are
//! written whole while holding the file lock, so concurrent batch workers
//! never interleave. Every line is also forwarded to the `log` facade.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::CodecError;

/// Kind of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Compress,
    DryRun,
    Skipped,
    Error,
    Rehydrate,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Compress => "COMPRESS",
            LogTag::DryRun => "DRY-RUN",
            LogTag::Skipped => "SKIPPED",
            LogTag::Error => "ERROR",
            LogTag::Rehydrate => "REHYDRATE",
        }
    }

    /// `Compress` or `DryRun`, depending on the run mode
    pub fn for_run(dry_run: bool) -> Self {
        if dry_run {
            LogTag::DryRun
        } else {
            LogTag::Compress
        }
    }

    fn level(&self) -> log::Level {
        match self {
            LogTag::Error => log::Level::Error,
            LogTag::Skipped => log::Level::Warn,
            _ => log::Level::Info,
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render one log line, newline included
pub fn format_line(at: DateTime<Utc>, tag: LogTag, message: &str) -> String {
    format!(
        "[{}] [{tag}] {message}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// The operational log of one pipeline invocation
#[derive(Debug)]
pub struct CompressionLog {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl CompressionLog {
    /// Open (or create) a log file in append mode.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(Mutex::new(file)),
        })
    }

    /// A log that only forwards to the `log` facade
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line. A failed write is reported through `log`, never
    /// returned: logging must not fail the file being processed.
    pub fn record(&self, tag: LogTag, message: &str) {
        log::log!(tag.level(), "[{tag}] {message}");

        let Some(file) = &self.file else {
            return;
        };
        let line = format_line(Utc::now(), tag, message);
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = file.write_all(line.as_bytes()) {
            log::warn!("failed to append to compression log: {err}");
        }
    }
}
