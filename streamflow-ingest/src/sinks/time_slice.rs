use std::path::{Path, PathBuf};

use serde::Serialize;
use streamflow_domain::domain::{DerivedColumn, ObservationKind, ObservationTable, Unit};
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime, UtcOffset};

use crate::pipeline::PipelineError;
use crate::sinks::artifact::{persist, WrittenArtifact};
use crate::sinks::parallel::SliceWriter;
use crate::transform::rounding::Granularity;
use crate::transform::slicing::{format_utc, SliceKey, TimeSlice};

/// One CSV snapshot per rounded time, discharge in m^3/s and variance in
/// (m^3/s)^2 whatever the table's own unit.
pub struct TimeSliceWriter {
    out_dir: PathBuf,
    granularity: Granularity,
    error_column: Option<String>,
}

#[derive(Serialize)]
struct SliceRow<'a> {
    site_id: &'a str,
    slice_time: String,
    query_time: Option<String>,
    discharge_cms: Option<f64>,
    discharge_quality: i32,
    variance_cms2: Option<f64>,
}

fn rfc3339(ts: OffsetDateTime) -> Result<String, PipelineError> {
    ts.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| PipelineError::Sink(format!("failed to format {ts}: {e}")))
}

impl TimeSliceWriter {
    pub fn new(out_dir: impl Into<PathBuf>, granularity: Granularity) -> Self {
        Self {
            out_dir: out_dir.into(),
            granularity,
            error_column: None,
        }
    }

    /// Reads the error from the named derived column instead of the last one.
    pub fn with_error_column(mut self, name: impl Into<String>) -> Self {
        self.error_column = Some(name.into());
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// `YYYY-MM-DD_HH_MM_SS.<g>min.timeSlice.csv`; site slices carry the
    /// site before the granularity so they never collide.
    pub fn file_name(&self, key: &SliceKey) -> Result<String, PipelineError> {
        let stamp = format_utc(
            key.rounded,
            format_description!("[year]-[month]-[day]_[hour]_[minute]_[second]"),
        )?;
        let g = self.granularity.minutes();
        Ok(match key.safe_site() {
            Some(site) => format!("{stamp}.{site}.{g:02}min.timeSlice.csv"),
            None => format!("{stamp}.{g:02}min.timeSlice.csv"),
        })
    }

    fn error_column<'t>(&self, table: &'t ObservationTable) -> Result<&'t DerivedColumn, PipelineError> {
        let column = match &self.error_column {
            Some(name) => table.derived_column(name),
            None => table.derived().last(),
        };
        column.ok_or(PipelineError::MissingRequiredColumn("error"))
    }

    /// The CSV bytes for one slice.
    pub fn render(&self, table: &ObservationTable, slice: &TimeSlice) -> Result<Vec<u8>, PipelineError> {
        self.check(table)?;
        let times = table
            .rounded_times()
            .ok_or(PipelineError::MissingRequiredColumn("time"))?;
        let errors = self.error_column(table)?;
        let to_cms = table.variable().unit().conversion_factor(Unit::CubicMetersPerSecond)?;
        let err_to_cms = errors.unit.conversion_factor(Unit::CubicMetersPerSecond)?;

        let mut wtr = csv::Writer::from_writer(Vec::with_capacity(64 * (slice.len() + 1)));
        for &i in &slice.rows {
            let row = &table.rows()[i];
            let query_time = row.query_time.map(rfc3339).transpose()?;
            wtr.serialize(SliceRow {
                site_id: &row.site_id,
                slice_time: rfc3339(times[i])?,
                query_time,
                discharge_cms: row.value.map(|v| v * to_cms),
                discharge_quality: row.quality,
                variance_cms2: errors.variance(i).map(|v| v * err_to_cms * err_to_cms),
            })
            .map_err(|e| PipelineError::Sink(format!("failed to encode time slice row: {e}")))?;
        }
        // An empty slice still gets its header.
        if slice.is_empty() {
            wtr.write_record([
                "site_id",
                "slice_time",
                "query_time",
                "discharge_cms",
                "discharge_quality",
                "variance_cms2",
            ])
            .map_err(|e| PipelineError::Sink(format!("failed to encode time slice header: {e}")))?;
        }
        wtr.into_inner()
            .map_err(|e| PipelineError::Sink(format!("failed to flush time slice: {e}")))
    }
}

impl SliceWriter for TimeSliceWriter {
    fn name(&self) -> &'static str {
        "time_slice"
    }

    fn check(&self, table: &ObservationTable) -> Result<(), PipelineError> {
        if table.variable().kind() != ObservationKind::Discharge {
            return Err(PipelineError::MissingRequiredColumn("discharge"));
        }
        if table.rounded_times().is_none() {
            return Err(PipelineError::MissingRequiredColumn("time"));
        }
        self.error_column(table).map(|_| ())
    }

    fn write_slice(&self, table: &ObservationTable, slice: &TimeSlice) -> Result<WrittenArtifact, PipelineError> {
        let bytes = self.render(table, slice)?;
        let path = self.out_dir.join(self.file_name(&slice.key)?);
        persist(&path, &bytes, slice.len(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::rounding::round_table;
    use crate::transform::slicing::{slice_table, Partition};
    use streamflow_domain::domain::{ErrorStatistic, Observation, Variable, CFS_TO_CMS};
    use time::macros::datetime;

    fn table() -> ObservationTable {
        let t = ObservationTable::new(
            Variable::of_unit(Unit::CubicFeetPerSecond),
            vec![
                Observation::new("A", datetime!(2013-06-01 12:01:00 UTC), Some(100.0), 0)
                    .with_query_time(datetime!(2013-06-01 12:30:00 UTC)),
                Observation::new("B", datetime!(2013-06-01 11:59:00 UTC), None, 1),
                Observation::new("A", datetime!(2013-06-01 12:14:00 UTC), Some(50.0), 0),
            ],
        );
        let t = t
            .with_derived(DerivedColumn::new(
                "clim_taper",
                ErrorStatistic::StdDev,
                Unit::CubicFeetPerSecond,
                vec![Some(2.0), None, Some(1.0)],
            ))
            .unwrap();
        round_table(&t, Granularity::new(15).unwrap()).unwrap()
    }

    fn writer(dir: &Path) -> TimeSliceWriter {
        TimeSliceWriter::new(dir, Granularity::new(15).unwrap())
    }

    #[test]
    fn file_names_follow_rounded_time() {
        let w = writer(Path::new("out"));
        let key = SliceKey {
            rounded: datetime!(2013-06-01 12:15:00 UTC),
            site_id: None,
        };
        assert_eq!(w.file_name(&key).unwrap(), "2013-06-01_12_15_00.15min.timeSlice.csv");
        let key = SliceKey {
            site_id: Some("05568500".into()),
            ..key
        };
        assert_eq!(w.file_name(&key).unwrap(), "2013-06-01_12_15_00.05568500.15min.timeSlice.csv");
    }

    #[test]
    fn rows_are_converted_to_si() {
        let t = table();
        let slices = slice_table(&t, Partition::ByTime).unwrap();
        let w = writer(Path::new("out"));
        let csv = String::from_utf8(w.render(&t, &slices[0]).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "site_id,slice_time,query_time,discharge_cms,discharge_quality,variance_cms2"
        );
        assert_eq!(lines.len(), 3);

        let a: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(&a[..3], ["A", "2013-06-01T12:00:00Z", "2013-06-01T12:30:00Z"]);
        let discharge: f64 = a[3].parse().unwrap();
        assert_eq!(discharge, 100.0 * CFS_TO_CMS);
        let variance: f64 = a[5].parse().unwrap();
        let sd_cms = 2.0 * CFS_TO_CMS;
        assert!((variance - sd_cms * sd_cms).abs() < 1e-15);

        assert_eq!(lines[2], "B,2013-06-01T12:00:00Z,,,1,");
    }

    #[test]
    fn writing_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let t = table();
        let w = writer(dir.path());
        let slice = slice_table(&t, Partition::ByTime).unwrap().remove(1);

        let first = w.write_slice(&t, &slice).unwrap();
        let bytes = std::fs::read(&first.path).unwrap();
        let second = w.write_slice(&t, &slice).unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.path, dir.path().join("2013-06-01_12_15_00.15min.timeSlice.csv"));
        assert_eq!(first.digest, second.digest);
        assert_eq!(std::fs::read(&second.path).unwrap(), bytes);
    }

    #[test]
    fn missing_error_column_is_reported() {
        let t = table();
        let bare = ObservationTable::new(t.variable(), t.rows().to_vec())
            .with_rounded_times(t.rounded_times().unwrap().to_vec())
            .unwrap();
        let w = writer(Path::new("out"));
        assert!(matches!(w.check(&bare), Err(PipelineError::MissingRequiredColumn("error"))));
    }
}
