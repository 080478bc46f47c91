//! Observation definition files for the downstream sequence-assembly tool.
//!
//! The format is positional, one item per line:
//!
//! ```text
//! <records + 1>
//! <copies>
//! <quality fields>
//! <one label per copy>
//! <one label per quality field>
//! then per record:
//!   <index> <type code> -1 <elevation> <lon in [0, 360)> <lat>
//!   "<Y> <M> <D> <h> <m> <s>" <error> <value per copy> <quality per field>
//! -1
//! <groupTag>.<errorTag>.obs_seq.out
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use streamflow_domain::domain::{DerivedColumn, ObservationKind, ObservationTable};
use time::UtcOffset;

use crate::pipeline::PipelineError;
use crate::sinks::artifact::{fmt_real, persist, WrittenArtifact};
use crate::sinks::parallel::SliceWriter;
use crate::transform::slicing::{SliceKey, TimeSlice};

/// Value written for a missing observation or error when rows are kept.
pub const MISSING_VALUE: f64 = -888888.0;

/// Vertical coordinate code written in every record.
const VERTICAL_COORDINATE: i32 = -1;

/// Terminates the record list.
const END_OF_RECORDS: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Leave rows with a missing value out and count them.
    #[default]
    Drop,
    /// Write them, with `MISSING_VALUE` in place of whichever of value or
    /// error is absent, and log a warning.
    Keep,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObsSeqOptions {
    /// Observation type code written in every record.
    pub obs_type: i32,
    /// One label per data copy; the record value is repeated per copy.
    pub copy_labels: Vec<String>,
    /// One label per quality field; the quality code is repeated per field.
    pub quality_labels: Vec<String>,
    pub missing: MissingPolicy,
    /// Prepended to every group tag.
    pub group_prefix: String,
    /// Error tag in file names. Defaults to the error column's model tag.
    pub error_tag: Option<String>,
    /// Derived column holding the error. Defaults to the last one attached.
    pub error_column: Option<String>,
}

impl Default for ObsSeqOptions {
    fn default() -> Self {
        Self {
            obs_type: 1,
            copy_labels: vec!["The observations".to_string()],
            quality_labels: Vec::new(),
            missing: MissingPolicy::Drop,
            group_prefix: String::new(),
            error_tag: None,
            error_column: None,
        }
    }
}

pub struct ObsSeqWriter {
    out_dir: PathBuf,
    options: ObsSeqOptions,
}

/// A rendered definition file, before it touches the disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObsSeq {
    pub file_name: String,
    pub contents: String,
    pub records: usize,
    pub dropped_missing: usize,
}

impl ObsSeqWriter {
    pub fn new(out_dir: impl Into<PathBuf>, options: ObsSeqOptions) -> Self {
        Self {
            out_dir: out_dir.into(),
            options,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn group_tag(&self, key: &SliceKey) -> Result<String, PipelineError> {
        Ok(format!("{}{}", self.options.group_prefix, key.tag()?))
    }

    fn error_column<'t>(&self, table: &'t ObservationTable) -> Result<&'t DerivedColumn, PipelineError> {
        let column = match &self.options.error_column {
            Some(name) => table.derived_column(name),
            None => table.derived().last(),
        };
        column.ok_or(PipelineError::MissingRequiredColumn("error"))
    }

    fn error_tag(&self, column: &DerivedColumn) -> String {
        self.options
            .error_tag
            .clone()
            .unwrap_or_else(|| column.model.clone())
    }

    /// Renders the definition file for one slice without writing it.
    pub fn render(&self, table: &ObservationTable, slice: &TimeSlice) -> Result<RenderedObsSeq, PipelineError> {
        self.check(table)?;
        let times = table
            .rounded_times()
            .ok_or(PipelineError::MissingRequiredColumn("time"))?;
        let locations = table
            .locations()
            .ok_or(PipelineError::MissingRequiredColumn("location"))?;
        let errors = self.error_column(table)?;
        let rows = table.rows();

        let mut kept: Vec<(usize, f64, f64)> = Vec::with_capacity(slice.len());
        let mut dropped = 0usize;
        let mut sentinels = 0usize;
        for &i in &slice.rows {
            match (rows[i].value, errors.values.get(i).copied().flatten()) {
                (Some(v), Some(e)) => kept.push((i, v, e)),
                (value, error) => match self.options.missing {
                    MissingPolicy::Drop => dropped += 1,
                    MissingPolicy::Keep => {
                        sentinels += 1;
                        kept.push((i, value.unwrap_or(MISSING_VALUE), error.unwrap_or(MISSING_VALUE)));
                    }
                },
            }
        }

        let group_tag = self.group_tag(&slice.key)?;
        let error_tag = self.error_tag(errors);
        if dropped > 0 {
            metrics::counter!("obs_seq_dropped_missing_total").increment(dropped as u64);
            tracing::info!(group = %group_tag, dropped, "dropped observations with missing values");
        }
        if sentinels > 0 {
            tracing::warn!(
                group = %group_tag,
                kept = sentinels,
                sentinel = MISSING_VALUE,
                "writing observations with missing values"
            );
        }

        let mut out = String::with_capacity(64 + kept.len() * 96);
        push_line(&mut out, kept.len() + 1);
        push_line(&mut out, self.options.copy_labels.len());
        push_line(&mut out, self.options.quality_labels.len());
        for label in self.options.copy_labels.iter().chain(&self.options.quality_labels) {
            push_line(&mut out, label);
        }

        for (n, (i, value, error)) in kept.iter().enumerate() {
            let loc = &locations[*i];
            let t = times[*i].to_offset(UtcOffset::UTC);
            push_line(&mut out, n + 1);
            push_line(&mut out, self.options.obs_type);
            push_line(&mut out, VERTICAL_COORDINATE);
            push_line(&mut out, fmt_real(loc.elevation));
            push_line(&mut out, fmt_real(loc.normalized_longitude()));
            push_line(&mut out, fmt_real(loc.latitude));
            push_line(
                &mut out,
                format!(
                    "{} {} {} {} {} {}",
                    t.year(),
                    u8::from(t.month()),
                    t.day(),
                    t.hour(),
                    t.minute(),
                    t.second()
                ),
            );
            push_line(&mut out, fmt_real(*error));
            for _ in &self.options.copy_labels {
                push_line(&mut out, fmt_real(*value));
            }
            for _ in &self.options.quality_labels {
                push_line(&mut out, rows[*i].quality);
            }
        }

        push_line(&mut out, END_OF_RECORDS);
        push_line(&mut out, format!("{group_tag}.{error_tag}.obs_seq.out"));

        Ok(RenderedObsSeq {
            file_name: format!("{group_tag}.{error_tag}.inputForCreateObsSeq"),
            contents: out,
            records: kept.len(),
            dropped_missing: dropped,
        })
    }
}

fn push_line(out: &mut String, item: impl std::fmt::Display) {
    out.push_str(&item.to_string());
    out.push('\n');
}

impl SliceWriter for ObsSeqWriter {
    fn name(&self) -> &'static str {
        "obs_seq"
    }

    fn check(&self, table: &ObservationTable) -> Result<(), PipelineError> {
        if self.options.copy_labels.is_empty() {
            return Err(PipelineError::Sink(
                "observation definition files need at least one data copy".to_string(),
            ));
        }
        if table.variable().kind() != ObservationKind::Discharge {
            return Err(PipelineError::MissingRequiredColumn("discharge"));
        }
        if table.rounded_times().is_none() {
            return Err(PipelineError::MissingRequiredColumn("time"));
        }
        if table.locations().is_none() {
            return Err(PipelineError::MissingRequiredColumn("location"));
        }
        self.error_column(table).map(|_| ())
    }

    fn write_slice(&self, table: &ObservationTable, slice: &TimeSlice) -> Result<WrittenArtifact, PipelineError> {
        let rendered = self.render(table, slice)?;
        let path = self.out_dir.join(&rendered.file_name);
        let artifact = persist(
            &path,
            rendered.contents.as_bytes(),
            rendered.records,
            rendered.dropped_missing,
        )?;
        tracing::debug!(path = %path.display(), records = artifact.records, "wrote observation definition file");
        Ok(artifact)
    }
}
