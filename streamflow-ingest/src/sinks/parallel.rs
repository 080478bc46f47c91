use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use futures::StreamExt;
use streamflow_domain::domain::ObservationTable;
use time::OffsetDateTime;

use crate::pipeline::PipelineError;
use crate::sinks::artifact::WrittenArtifact;
use crate::transform::slicing::{resolve_duplicates, DuplicateSitePolicy, SliceKey, TimeSlice};

/// Turns one slice of a table into one file.
///
/// Implementations are blocking; `ParallelSliceWriter` runs them on the
/// blocking pool.
pub trait SliceWriter: Send + Sync + 'static {
    /// Short label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Fails when `table` lacks something every slice would need.
    fn check(&self, table: &ObservationTable) -> Result<(), PipelineError>;

    fn write_slice(&self, table: &ObservationTable, slice: &TimeSlice) -> Result<WrittenArtifact, PipelineError>;
}

/// Outcome of writing a batch of slices, ordered by slice key.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<(SliceKey, WrittenArtifact)>,
    pub failed: Vec<(SliceKey, PipelineError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn records(&self) -> usize {
        self.written.iter().map(|(_, a)| a.records).sum()
    }

    pub fn dropped_missing(&self) -> usize {
        self.written.iter().map(|(_, a)| a.dropped_missing).sum()
    }

    /// Rounded time to artifact path. With site partitions the last site
    /// written for a time wins; use `written` to see all of them.
    pub fn paths_by_time(&self) -> BTreeMap<OffsetDateTime, PathBuf> {
        self.written
            .iter()
            .map(|(key, a)| (key.rounded, a.path.clone()))
            .collect()
    }
}

/// Writes every slice as its own blocking task, at most `workers` at a
/// time. A failed slice is reported and never stops the others.
pub struct ParallelSliceWriter<W> {
    writer: Arc<W>,
    workers: usize,
    duplicates: DuplicateSitePolicy,
}

impl<W: SliceWriter> ParallelSliceWriter<W> {
    pub fn new(writer: W, workers: usize) -> Self {
        Self {
            writer: Arc::new(writer),
            workers: workers.max(1),
            duplicates: DuplicateSitePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateSitePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Fails without writing anything when the table does not suit the
    /// writer; otherwise always returns a report.
    pub async fn run(
        &self,
        table: Arc<ObservationTable>,
        slices: Vec<TimeSlice>,
    ) -> Result<BatchReport, PipelineError> {
        self.writer.check(&table)?;
        let name = self.writer.name();
        let total = slices.len();

        let results: Vec<(SliceKey, Result<WrittenArtifact, PipelineError>)> = futures::stream::iter(slices)
            .map(|slice| {
                let writer = Arc::clone(&self.writer);
                let table = Arc::clone(&table);
                let policy = self.duplicates;
                async move {
                    let key = slice.key.clone();
                    let res = tokio::task::spawn_blocking(move || {
                        let slice = resolve_duplicates(&table, &slice, policy)?;
                        writer.write_slice(&table, &slice)
                    })
                    .await
                    .unwrap_or_else(|e| Err(PipelineError::Sink(format!("slice writer task failed: {e}"))));
                    (key, res)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (key, res) in results {
            match res {
                Ok(artifact) => {
                    metrics::counter!("artifacts_written_total", "writer" => name).increment(1);
                    report.written.push((key, artifact));
                }
                Err(e) => {
                    tracing::error!(writer = name, slice = %key, error = %e, "failed to write slice");
                    metrics::counter!("slice_write_failures_total", "writer" => name).increment(1);
                    report.failed.push((key, e));
                }
            }
        }
        report.written.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        tracing::info!(
            writer = name,
            slices = total,
            written = report.written.len(),
            failed = report.failed.len(),
            records = report.records(),
            dropped_missing = report.dropped_missing(),
            "slice batch finished"
        );
        Ok(report)
    }
}
