//! One configured batch: ingest, enrich, slice and write.

use std::sync::Arc;

use streamflow_domain::domain::{Observation, ObservationTable, Variable};

use crate::config::{AppConfig, InputConfig, InputFormat, QcConfig};
use crate::pipeline::{Pipeline, PipelineError, Transform};
use crate::sinks::{BatchReport, IngestReport, ObsSeqWriter, ParallelSliceWriter, SliceWriter, TableSink, TimeSliceWriter};
use crate::sources::{load_site_metadata, ObservationCsvFileSource, ObservationNdjsonFileSource};
use crate::transform::{
    join::{join_site_metadata, JoinReport},
    rounding::{round_table, Granularity},
    slicing::{slice_table, Partition},
    units::to_si,
    variance::{derive_variance, VarianceReport},
    DischargeQc,
};

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub ingest: IngestReport,
    pub join: JoinReport,
    pub variance: VarianceReport,
    pub obs_seq: Option<BatchReport>,
    pub time_slice: Option<BatchReport>,
}

impl BatchSummary {
    pub fn failed_slices(&self) -> usize {
        [&self.obs_seq, &self.time_slice]
            .into_iter()
            .flatten()
            .map(|r| r.failed.len())
            .sum()
    }
}

/// Reads the observation file through quality control into a table.
pub async fn ingest(input: &InputConfig, qc: &QcConfig) -> Result<(ObservationTable, IngestReport), PipelineError> {
    let sink = TableSink::new(Variable::of_unit(input.unit)).lenient(input.lenient);
    let transforms: Vec<Arc<dyn Transform<Observation, Observation> + Send + Sync>> =
        vec![Arc::new(DischargeQc::new(qc.clone().into()))];

    match input.format {
        InputFormat::Csv | InputFormat::Dat => {
            let source = match input.format {
                InputFormat::Dat => ObservationCsvFileSource::dat(&input.observations),
                _ => ObservationCsvFileSource::new(&input.observations),
            }
            .with_value_column(input.value_column.as_str());
            Pipeline {
                source,
                transforms,
                sink,
            }
            .run()
            .await
        }
        InputFormat::Ndjson => {
            Pipeline {
                source: ObservationNdjsonFileSource::new(&input.observations),
                transforms,
                sink,
            }
            .run()
            .await
        }
    }
}

/// Runs the whole batch described by `cfg`.
///
/// Configuration and schema problems fail the batch before any file is
/// written. Slices that fail to write are listed in the returned summary.
pub async fn run_batch(cfg: &AppConfig) -> anyhow::Result<BatchSummary> {
    let granularity = Granularity::new(cfg.rounding.minutes)?;
    cfg.error_model.validate()?;

    let (raw, ingest) = ingest(&cfg.input, &cfg.qc).await?;
    let sites = load_site_metadata(&cfg.input.sites)?;
    let (joined, join) = join_site_metadata(&raw, &sites)?;

    let table = to_si(&joined)?;
    let (table, variance) =
        derive_variance(&table, &cfg.error_model, cfg.variance.as_variance, cfg.variance.scope)?;
    let table = Arc::new(round_table(&table, granularity)?);

    let obs_seq = cfg.obs_seq.as_ref().map(|c| {
        ParallelSliceWriter::new(ObsSeqWriter::new(&c.out_dir, c.options.clone()), cfg.workers)
            .with_duplicate_policy(cfg.rounding.duplicates)
    });
    let time_slice = cfg.time_slice.as_ref().map(|c| {
        ParallelSliceWriter::new(TimeSliceWriter::new(&c.out_dir, granularity), cfg.workers)
            .with_duplicate_policy(cfg.rounding.duplicates)
    });
    if let Some(w) = &obs_seq {
        w.writer().check(&table)?;
    }
    if let Some(w) = &time_slice {
        w.writer().check(&table)?;
    }

    let mut summary = BatchSummary {
        ingest,
        join,
        variance,
        ..BatchSummary::default()
    };
    if let Some(w) = &obs_seq {
        let slices = slice_table(&table, cfg.rounding.partition)?;
        summary.obs_seq = Some(w.run(Arc::clone(&table), slices).await?);
    }
    if let Some(w) = &time_slice {
        // Time-slice files are one per rounded time.
        let slices = slice_table(&table, Partition::ByTime)?;
        summary.time_slice = Some(w.run(Arc::clone(&table), slices).await?);
    }

    tracing::info!(
        accepted = summary.ingest.accepted,
        rejected = summary.ingest.rejected_total(),
        excluded_sites = summary.join.excluded_sites.len(),
        variance_skipped_sites = summary.variance.skipped_sites.len(),
        failed_slices = summary.failed_slices(),
        "batch finished"
    );
    Ok(summary)
}
