//! File-level ingestion of PI-XML time-series sources.

use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::config::{DataKind, IngestFilters};
use crate::context::IngestContext;
use crate::error::{IngestionError, Result, Stage};
use crate::pipeline::IngestPipeline;
use crate::pixml::PixmlReader;

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionResult {
    pub path: String,
    pub kind: DataKind,
    pub series_seen: usize,
    pub series_accepted: usize,
    pub series_rejected: usize,
    pub events_read: usize,
    pub events_skipped: usize,
    /// Rows confirmed written by the store
    pub rows_written: u64,
    pub batches_written: usize,
}

/// Per-file outcome of a multi-file run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Ingested(IngestionResult),
    Failed {
        path: String,
        stage: Stage,
        /// Series open when the failure happened, if known.
        series: Option<String>,
        error: String,
    },
    /// Not started because an earlier file hit a fatal error.
    NotStarted { path: String },
}

impl FileOutcome {
    pub fn path(&self) -> &str {
        match self {
            FileOutcome::Ingested(result) => &result.path,
            FileOutcome::Failed { path, .. } | FileOutcome::NotStarted { path } => path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Ingested(_))
    }
}

/// Ingests PI-XML files through pipelines sharing one [`IngestContext`].
#[derive(Clone)]
pub struct Ingester {
    ctx: Arc<IngestContext>,
    filters: Arc<IngestFilters>,
}

impl Ingester {
    pub fn new(ctx: Arc<IngestContext>, filters: IngestFilters) -> Self {
        Self {
            ctx,
            filters: Arc::new(filters),
        }
    }

    pub fn context(&self) -> &Arc<IngestContext> {
        &self.ctx
    }

    /// Ingest a file from the filesystem. `.gz` files are decompressed.
    pub async fn ingest_file(&self, path: &str, kind: DataKind) -> Result<IngestionResult> {
        let data = tokio::fs::read(path).await?;
        self.ingest_bytes(Bytes::from(data), path, kind).await
    }

    /// Ingest a document already in memory; `path` names the source.
    #[instrument(skip(self, data), fields(path = %path, kind = ?kind, bytes = data.len()))]
    pub async fn ingest_bytes(
        &self,
        data: Bytes,
        path: &str,
        kind: DataKind,
    ) -> Result<IngestionResult> {
        let document = if is_gzip(path, &data) {
            decompress_gzip(&data)?
        } else {
            data
        };

        let mut pipeline = IngestPipeline::new(
            Arc::clone(&self.ctx),
            path,
            kind,
            Arc::clone(&self.filters),
        );

        let read = PixmlReader::new(&document).read_into(&mut pipeline).await;

        let summary = match read {
            Ok(summary) => summary,
            Err(e) => {
                let series = pipeline.current_series();
                pipeline.abort_series();
                // Batches already submitted stand; wait so none outlive the file.
                if let Err(write_err) = pipeline.await_completion().await {
                    warn!(error = %write_err, "Write failed after aborted read");
                }
                let e = e.in_series(series);
                error!(stage = %e.stage(), series = ?e.series(), error = %e, "Ingest failed");
                return Err(e);
            }
        };

        pipeline.flush_leftovers();
        let writes = pipeline.await_completion().await?;
        let stats = pipeline.stats();

        let result = IngestionResult {
            path: path.to_string(),
            kind,
            series_seen: stats.series_seen,
            series_accepted: stats.series_accepted,
            series_rejected: stats.series_rejected,
            events_read: summary.events,
            events_skipped: stats.events_skipped,
            rows_written: writes.rows,
            batches_written: writes.batches,
        };

        info!(
            series = result.series_accepted,
            rejected = result.series_rejected,
            rows = result.rows_written,
            batches = result.batches_written,
            skipped = result.events_skipped,
            "Ingested file"
        );

        Ok(result)
    }

    /// Ingest files concurrently, at most `parallelism` at once.
    ///
    /// Outcomes are returned in input order. After a partition failure no
    /// further files are started; files already running finish.
    pub async fn ingest_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        kind: DataKind,
        parallelism: usize,
    ) -> Vec<FileOutcome> {
        let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::with_capacity(paths.len());

        for path in paths {
            let path = path.as_ref().to_string_lossy().into_owned();

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            if halted.load(Ordering::SeqCst) {
                tasks.push((path, None));
                continue;
            }

            let ingester = self.clone();
            let halted = Arc::clone(&halted);
            let file = path.clone();

            let task = tokio::spawn(async move {
                let _permit = permit;
                let outcome = ingester.ingest_file(&file, kind).await;
                if let Err(e) = &outcome {
                    if e.is_fatal() {
                        halted.store(true, Ordering::SeqCst);
                    }
                }
                outcome
            });
            tasks.push((path, Some(task)));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (path, task) in tasks {
            let outcome = match task {
                None => FileOutcome::NotStarted { path },
                Some(task) => match task.await {
                    Ok(Ok(result)) => FileOutcome::Ingested(result),
                    Ok(Err(e)) => FileOutcome::Failed {
                        path,
                        stage: e.stage(),
                        series: e.series().map(str::to_string),
                        error: e.to_string(),
                    },
                    Err(join) => FileOutcome::Failed {
                        path,
                        stage: Stage::Write,
                        series: None,
                        error: format!("ingest task failed: {}", join),
                    },
                },
            };
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(files = outcomes.len(), failed = failed, "Finished ingesting files");

        outcomes
    }
}

fn is_gzip(path: &str, data: &[u8]) -> bool {
    path.ends_with(".gz") || data.starts_with(&[0x1f, 0x8b])
}

/// Decompress gzip data.
fn decompress_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| IngestionError::Decompression(e.to_string()))?;
    Ok(Bytes::from(out))
}
