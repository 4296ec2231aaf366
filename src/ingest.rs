//! Ingestion orchestration.
//!
//! # Pipeline
//!
//! ```text
//! validate path ──► create run (running)
//!                       │
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!    checksum       mime type        parse        (spawn_blocking, retried)
//!        └──────────────┼──────────────┘
//!                       ▼
//!     OCR if text is blank and OCR is enabled    (timeout, retried)
//!                       ▼
//!       classify ─► persist ─► graph ─► index
//!                       ▼
//!             finish run (completed)
//! ```
//!
//! Any failure after the run exists marks it `failed`, appends a dead letter
//! carrying the original `{path, source}` request, and then returns the error.
//! A drop guard covers cancellation: if the ingestion future is dropped
//! mid-flight, the run is still moved to `failed`.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::IngestionConfig;
use crate::engine::Engine;
use crate::error::{IngestError, Result};
use crate::metadata::extract_metadata;
use crate::models::{FragmentKind, ParsedDocument, RunStatus};
use crate::store::{self, NewDocument};
use crate::traits::OcrEngine;

pub const CANCELLED_MESSAGE: &str = "ingestion cancelled";

const SUMMARY_CHARS: usize = 500;

/// Outcome of [`Engine::ingest_paths`].
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub ingested: Vec<String>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Engine {
    /// Ingest one file and return its document `external_id`.
    ///
    /// Re-ingesting an unchanged file returns the id of the existing document.
    #[tracing::instrument(skip(self), fields(trace_id = tracing::field::Empty))]
    pub async fn ingest_document(&self, path: &Path, source: &str) -> Result<String> {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) if p.is_file() => p,
            _ => return Err(IngestError::NotFound(path.to_path_buf())),
        };

        let trace_id = uuid::Uuid::new_v4().simple().to_string();
        tracing::Span::current().record("trace_id", trace_id.as_str());

        let run_id = store::create_run(&self.pool, &trace_id, source).await?;
        let mut guard = RunGuard::new(self.pool.clone(), run_id);

        match self.run_pipeline(&resolved, source, run_id).await {
            Ok(external_id) => {
                store::finish_run(&self.pool, run_id, RunStatus::Completed, None).await?;
                guard.disarm();
                tracing::info!(%external_id, "ingested");
                Ok(external_id)
            }
            Err(err) => {
                tracing::error!(error = %err, "ingestion failed");
                self.record_failure(run_id, &trace_id, path, source, &err)
                    .await?;
                guard.disarm();
                Err(err)
            }
        }
    }

    /// Ingest every path in order, continuing past individual failures.
    pub async fn ingest_paths(&self, paths: &[PathBuf], source: &str) -> BatchReport {
        let mut report = BatchReport::default();
        for path in paths {
            match self.ingest_document(path, source).await {
                Ok(external_id) => report.ingested.push(external_id),
                Err(err) => report.failed.push((path.clone(), err.to_string())),
            }
        }
        tracing::info!(
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        report
    }

    /// Walk `dir` and ingest every allowed file under it.
    pub async fn ingest_folder(&self, dir: &Path, source: &str) -> anyhow::Result<BatchReport> {
        let paths = collect_paths(&self.config.ingestion, &[dir.to_path_buf()])?;
        Ok(self.ingest_paths(&paths, source).await)
    }

    async fn run_pipeline(&self, path: &Path, source: &str, run_id: i64) -> Result<String> {
        let policy = &self.config.ingestion;

        let inspector = self.collaborators.inspector.clone();
        let checksum = blocking_with_retry("checksum", policy, path, move |p: &Path| {
            inspector.compute_checksum(p)
        });
        let inspector = self.collaborators.inspector.clone();
        let mime = blocking_with_retry("mime", policy, path, move |p: &Path| {
            inspector.detect_mime_type(p)
        });
        let parser = self.collaborators.parser.clone();
        let parse = blocking_with_retry("parse", policy, path, move |p: &Path| parser.parse(p));

        let (checksum, mime_type, parsed) = tokio::try_join!(checksum, mime, parse)?;

        let source_path = path.to_string_lossy();
        if let Some(existing) =
            store::find_document_by_path_and_checksum(&self.pool, &source_path, &checksum).await?
        {
            tracing::info!(external_id = %existing, "unchanged document, skipping");
            return Ok(existing);
        }

        let needs_ocr = parsed.text.trim().is_empty() && self.config.ingestion.enable_ocr;
        let ParsedDocument { text, metadata } = if needs_ocr {
            self.ocr_fallback(path, parsed).await?
        } else {
            parsed
        };

        let classification = self.classifier.classify(&text, &metadata, &self.stats);
        let summary: String = text.chars().take(SUMMARY_CHARS).collect();

        let external_id = store::mint_external_id(&self.pool).await?;
        store::insert_document_with_fragments(
            &self.pool,
            &external_id,
            &NewDocument {
                source_path: &source_path,
                source,
                checksum: &checksum,
                mime_type: &mime_type,
                text_content: &text,
                summary: &summary,
                document_type: &classification.document_type,
                privilege_risk: classification.privilege_risk,
                importance_score: classification.importance_score,
                metadata: &metadata,
                ingestion_run_id: run_id,
            },
        )
        .await?;

        self.graph
            .upsert(&external_id, &metadata)
            .map_err(|e| IngestError::Graph(format!("{:#}", e)))?;
        self.reindex().await?;

        tracing::debug!(
            %external_id,
            document_type = %classification.document_type,
            privilege_risk = classification.privilege_risk,
            importance = classification.importance_score,
            "classified"
        );
        Ok(external_id)
    }

    async fn ocr_fallback(&self, path: &Path, parsed: ParsedDocument) -> Result<ParsedDocument> {
        let ocr: &dyn OcrEngine = self.collaborators.ocr.as_ref();
        let secs = self.config.ocr.timeout_secs;

        let output = retry_transient("ocr", &self.config.ingestion, || async move {
            tokio::time::timeout(Duration::from_secs(secs), ocr.extract_text(path))
                .await
                .map_err(|_| IngestError::Timeout { stage: "ocr", secs })?
        })
        .await?;

        tracing::debug!(
            engine = ocr.name(),
            chars = output.text.len(),
            warnings = output.warnings.len(),
            "ocr fallback"
        );

        let (text, mut metadata) = if output.text.trim().is_empty() {
            (parsed.text, parsed.metadata)
        } else {
            let metadata = extract_metadata(&output.text);
            (output.text, metadata)
        };
        metadata.extend(FragmentKind::OcrWarnings, output.warnings);
        Ok(ParsedDocument { text, metadata })
    }

    async fn record_failure(
        &self,
        run_id: i64,
        trace_id: &str,
        path: &Path,
        source: &str,
        err: &IngestError,
    ) -> Result<()> {
        let message = err.to_string();
        store::finish_run(&self.pool, run_id, RunStatus::Failed, Some(&message)).await?;

        let payload = serde_json::json!({
            "path": path.to_string_lossy(),
            "source": source,
        });
        let stacktrace = captured_backtrace();
        store::add_dead_letter(&self.pool, trace_id, &payload, &message, stacktrace.as_deref())
            .await?;
        Ok(())
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts
/// `policy.max_retries` retries. Backoff doubles from `retry_backoff_ms`.
pub(crate) async fn retry_transient<T, F, Fut>(
    stage: &'static str,
    policy: &IngestionConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy
                    .retry_backoff_ms
                    .saturating_mul(1 << attempt.min(10));
                tracing::warn!(
                    stage,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn blocking_with_retry<T, F>(
    stage: &'static str,
    policy: &IngestionConfig,
    path: &Path,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: Fn(&Path) -> Result<T> + Clone + Send + 'static,
{
    retry_transient(stage, policy, || {
        let op = op.clone();
        let path = path.to_path_buf();
        async move {
            tokio::task::spawn_blocking(move || op(&path))
                .await
                .map_err(|e| IngestError::Validation(format!("{} task aborted: {}", stage, e)))?
        }
    })
    .await
}

fn captured_backtrace() -> Option<String> {
    let backtrace = std::backtrace::Backtrace::capture();
    match backtrace.status() {
        std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

/// Marks a run `failed` if dropped while still armed.
struct RunGuard {
    pool: SqlitePool,
    run_id: i64,
    armed: bool,
}

impl RunGuard {
    fn new(pool: SqlitePool, run_id: i64) -> Self {
        Self {
            pool,
            run_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let pool = self.pool.clone();
        let run_id = self.run_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) =
                        store::finish_run(&pool, run_id, RunStatus::Failed, Some(CANCELLED_MESSAGE))
                            .await
                    {
                        tracing::error!(run_id, error = %e, "failed to close cancelled run");
                    } else {
                        tracing::warn!(run_id, "ingestion cancelled");
                    }
                });
            }
            Err(_) => tracing::error!(run_id, "run left open: no runtime to close it"),
        }
    }
}

/// Expand `inputs` into the files to ingest.
///
/// Files are kept as given. Directories are walked recursively, keeping files
/// with an allowed extension and dropping anything matching `exclude_globs`
/// (matched against the path relative to that directory). Walked files come
/// out sorted.
pub fn collect_paths(config: &IngestionConfig, inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let excludes = build_globset(&config.exclude_globs)?;
    let mut paths = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            paths.push(input.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(input) {
            let entry =
                entry.with_context(|| format!("Failed to walk directory: {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            if excludes.is_match(relative) || !config.allows(path) {
                continue;
            }
            found.push(path.to_path_buf());
        }
        found.sort();
        paths.extend(found);
    }

    Ok(paths)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
