//! Pipeline orchestration
//!
//! This module provides the public API for Noodle Pack.
//! It orchestrates the full pipeline from session JSON files to columnar
//! artifacts, and from artifacts back to rehydrated JSON views.

use std::fs;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::columnar;
use crate::context::PipelineContext;
use crate::decoder::{output_base, ColumnarDecoder, DecodeOptions, RehydratedSession};
use crate::encoder::{EncodeJob, EncodedArtifact};
use crate::error::{CodecError, Disposition};
use crate::features::FeatureDeriver;
use crate::logbook::LogTag;
use crate::normalizer::Normalizer;
use crate::privacy::PrivacyEvaluator;
use crate::redaction::RedactionEngine;
use crate::schema::Session;
use crate::types::{BatchSummary, CompressedSession, SessionOutcome, SkipReason};

/// Batch-level stop signal.
///
/// Cancelling stops workers from taking new files; files already in flight
/// run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Views written by [`rehydrate`]
#[derive(Debug, Clone, PartialEq)]
pub struct Rehydration {
    pub session: RehydratedSession,
    pub written: Vec<PathBuf>,
}

/// Compress one session file.
///
/// Pipeline stages:
/// 1. Session - Parse the JSON object and settle its privacy ledger
/// 2. Normalizer - Resolve rows and delta-encode time
/// 3. PrivacyEvaluator - Score the session (only with `privacy_check`)
/// 4. RedactionEngine - Drop, jitter and alias columns
/// 5. ColumnarEncoder - Write overlays, artifact, sidecar and features
///
/// Never returns an error: every failure is folded into the outcome and
/// logged with the file name, so one bad file cannot stop a batch.
pub fn compress_session(ctx: &PipelineContext, file: &Path, output_dir: &Path) -> SessionOutcome {
    let name = file_label(file);
    match try_compress(ctx, file, &name, output_dir) {
        Ok(outcome) => outcome,
        Err(err) => match err.disposition() {
            Disposition::Skipped => skip(ctx, file, &name, SkipReason::Empty),
            Disposition::Error => {
                ctx.log.record(LogTag::Error, &format!("{name}: {err}"));
                SessionOutcome::Failed {
                    file: file.to_path_buf(),
                    message: err.to_string(),
                }
            }
        },
    }
}

fn try_compress(
    ctx: &PipelineContext,
    file: &Path,
    name: &str,
    output_dir: &Path,
) -> Result<SessionOutcome, CodecError> {
    let text = fs::read_to_string(file)?;
    let mut session = Session::from_json(&text)?;
    session.ensure_privacy_ledger()?;

    if let Some(filter) = ctx.config.filter {
        if !filter.accepts(&session) {
            return Ok(skip(ctx, file, name, SkipReason::Filter));
        }
    }

    let normalized = Normalizer::normalize(&session, Some(file), ctx.policy.round_precision);
    if normalized.is_empty() {
        return Ok(skip(ctx, file, name, SkipReason::Empty));
    }
    let session_id = normalized.session_id;

    let privacy_score = ctx
        .config
        .privacy_check
        .then(|| PrivacyEvaluator::evaluate(&session).score);
    let features = ctx
        .config
        .write_features
        .then(|| FeatureDeriver::derive(&session, &session_id, &normalized.rows));

    let mut rng = ctx.jitter_rng();
    let projection = RedactionEngine::new(&ctx.aliases, &ctx.policy).project(
        normalized.rows,
        privacy_score,
        &mut rng,
    );

    let dry_run = ctx.config.dry_run;
    // Overlays go first: a failure here leaves no output behind
    let overlays = ctx.encoder.prepare_overlays(&session, &session_id, output_dir)?;
    let overlay_lines: Vec<String> = overlays
        .iter()
        .map(|overlay| {
            format!(
                "overlay:{} {session_id} → {} (rows: {})",
                overlay.track.overlay_type,
                overlay.sidecar.parquet_file,
                overlay.track.rows.len()
            )
        })
        .collect();
    let overlays = ctx.encoder.write_overlays(overlays, dry_run)?;

    let encoded = ctx.encoder.encode(
        EncodeJob {
            session_id: &session_id,
            source_file: name,
            output_dir,
            projection: &projection,
            privacy_score,
        },
        dry_run,
    );
    let artifact = match encoded {
        Ok(artifact) => artifact,
        Err(err) => {
            discard(&overlays);
            return Err(err);
        }
    };

    let features_path = match features {
        Some(features) if !dry_run => {
            let path = output_dir.join(format!("{session_id}.features.json"));
            if let Err(err) = columnar::write_json(&path, &features) {
                discard(&overlays);
                discard(std::slice::from_ref(&artifact));
                return Err(err);
            }
            Some(path)
        }
        _ => None,
    };

    let tag = LogTag::for_run(dry_run);
    ctx.log.record(
        tag,
        &format!(
            "{name} → {} (rows: {}, fields: {})",
            artifact.sidecar.parquet_file,
            projection.rows.len(),
            artifact.sidecar.fields.len()
        ),
    );
    for line in &overlay_lines {
        ctx.log.record(tag, line);
    }

    Ok(SessionOutcome::Compressed(CompressedSession {
        session_id,
        artifact_path: artifact.artifact_path,
        sidecar: artifact.sidecar,
        overlay_paths: overlays
            .into_iter()
            .map(|overlay| overlay.artifact_path)
            .collect(),
        features_path,
    }))
}

/// Remove outputs of a session that failed part way.
fn discard(outputs: &[EncodedArtifact]) {
    for output in outputs.iter().filter(|output| output.written) {
        columnar::discard_artifact(&output.artifact_path);
    }
}

fn skip(ctx: &PipelineContext, file: &Path, name: &str, reason: SkipReason) -> SessionOutcome {
    ctx.log
        .record(LogTag::Skipped, &format!("{name} ({})", reason.as_str()));
    SessionOutcome::Skipped {
        file: file.to_path_buf(),
        reason,
    }
}

fn file_label(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}

/// Session files under `input`, sorted.
///
/// A file path is returned as is. In a directory, every `*.json` file is a
/// session except sidecars and feature companions.
pub fn session_files(input: &Path) -> Result<Vec<PathBuf>, CodecError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() && is_session_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_session_file(path: &Path) -> bool {
    let name = file_label(path);
    name.ends_with(".json") && !name.ends_with(".meta.json") && !name.ends_with(".features.json")
}

/// Compress every session under `input` into `output_dir`.
///
/// # Arguments
/// * `ctx` - Context of this invocation
/// * `input` - A session file, or a directory of them
/// * `output_dir` - Where artifacts go; created unless this is a dry run
/// * `cancel` - Checked before each file is taken
///
/// # Returns
/// Counts of processed, compressed, skipped and failed files, plus the
/// compressed sessions in input order. Only listing the input or creating
/// the output directory can fail the batch as a whole.
///
/// # Example
/// ```ignore
/// let ctx = PipelineContext::new(PipelineConfig::default())?;
/// let summary = compress_directory(&ctx, "sessions".as_ref(), "out".as_ref(), &CancellationFlag::new())?;
/// println!("{} compressed", summary.compressed);
/// ```
pub fn compress_directory(
    ctx: &PipelineContext,
    input: &Path,
    output_dir: &Path,
    cancel: &CancellationFlag,
) -> Result<BatchSummary, CodecError> {
    let files = session_files(input)?;
    if !ctx.config.dry_run {
        fs::create_dir_all(output_dir)?;
    }

    let workers = ctx.config.workers.min(files.len()).max(1);
    log::info!(
        "compressing {} session file(s) from {} with {workers} worker(s)",
        files.len(),
        input.display()
    );

    let cursor = AtomicUsize::new(0);
    let mut outcomes: Vec<(usize, SessionOutcome)> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(|| {
                let mut done = Vec::new();
                while !cancel.is_cancelled() {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(file) = files.get(index) else {
                        break;
                    };
                    done.push((index, compress_session(ctx, file, output_dir)));
                }
                done
            }));
        }

        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    });
    outcomes.sort_by_key(|(index, _)| *index);

    let mut summary = BatchSummary::default();
    for (_, outcome) in outcomes {
        summary.record(outcome);
    }
    if cancel.is_cancelled() && summary.processed < files.len() {
        log::warn!(
            "batch cancelled after {} of {} file(s)",
            summary.processed,
            files.len()
        );
    }
    log::info!(
        "processed {}, compressed {}, skipped {}, errors {}",
        summary.processed,
        summary.compressed,
        summary.skipped,
        summary.errors
    );
    Ok(summary)
}

/// Decode an artifact and write the requested views.
///
/// Views land in `output_dir`, or next to the artifact when none is given,
/// as `<artifact stem>.<format>.json`.
pub fn rehydrate(
    ctx: &PipelineContext,
    artifact: &Path,
    output_dir: Option<&Path>,
    options: &DecodeOptions,
) -> Result<Rehydration, CodecError> {
    let result = write_rehydrated(ctx, artifact, output_dir, options);
    if let Err(err) = &result {
        ctx.log
            .record(LogTag::Error, &format!("{}: {err}", artifact.display()));
    }
    result
}

fn write_rehydrated(
    ctx: &PipelineContext,
    artifact: &Path,
    output_dir: Option<&Path>,
    options: &DecodeOptions,
) -> Result<Rehydration, CodecError> {
    let session = ColumnarDecoder::new(ctx.aliases.clone()).decode(artifact, options)?;

    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| artifact.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    if !dir.as_os_str().is_empty() {
        fs::create_dir_all(&dir)?;
    }

    let written = session.write_views(&dir, &output_base(artifact))?;
    for (view, path) in session.views.iter().zip(&written) {
        ctx.log.record(
            LogTag::Rehydrate,
            &format!(
                "{} → {} (format: {}, rows: {})",
                artifact.display(),
                path.display(),
                view.format(),
                session.metadata.rows
            ),
        );
    }

    Ok(Rehydration { session, written })
}
