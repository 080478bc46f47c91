use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use futures::Stream;
use streamflow_domain::domain::Observation;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::pipeline::{Envelope, PipelineError, Source};

/// Delimited-text source for gauge `Observation`s.
///
/// Expected header columns (by name):
/// - site_id
/// - ts (RFC3339 timestamp)
/// - the value column (configurable, `discharge` by default); empty or
///   non-finite text is a missing value
/// - quality (optional integer code, 0 when absent)
/// - query_time (optional RFC3339 timestamp)
///
/// `.dat` exports use the same header with `|` as the delimiter.
pub struct ObservationCsvFileSource {
    path: PathBuf,
    delimiter: u8,
    value_column: String,
}

impl ObservationCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
            value_column: "discharge".to_string(),
        }
    }

    /// Pipe-delimited variant.
    pub fn dat<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path).with_delimiter(b'|')
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_value_column(mut self, name: impl Into<String>) -> Self {
        self.value_column = name.into();
        self
    }
}

fn parse_optional_f64(s: &str) -> Result<Option<f64>, PipelineError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let v: f64 = trimmed
        .parse()
        .map_err(|e| PipelineError::Source(format!("invalid value '{trimmed}': {e}")))?;
    Ok(Some(v).filter(|v| v.is_finite()))
}

fn parse_ts(name: &str, s: &str) -> Result<OffsetDateTime, PipelineError> {
    OffsetDateTime::parse(s.trim(), &Rfc3339).map_err(|e| PipelineError::Source(format!("invalid {name} '{s}': {e}")))
}

fn record_to_observation(
    record: &StringRecord,
    headers: &StringRecord,
    value_column: &str,
) -> Result<Observation, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in observation record")))
    };

    let site_id = get("site_id")?.trim().to_string();
    if site_id.is_empty() {
        return Err(PipelineError::Source("empty site_id in observation record".to_string()));
    }
    let ts = parse_ts("ts", get("ts")?)?;
    let value = parse_optional_f64(get(value_column)?)?;

    let quality = match get("quality").map(str::trim) {
        Ok(q) if !q.is_empty() => q
            .parse::<i32>()
            .map_err(|e| PipelineError::Source(format!("invalid quality '{q}': {e}")))?,
        _ => 0,
    };

    let mut obs = Observation::new(site_id, ts, value, quality);
    if let Ok(q) = get("query_time") {
        if !q.trim().is_empty() {
            obs = obs.with_query_time(parse_ts("query_time", q)?);
        }
    }
    Ok(obs)
}

#[async_trait::async_trait]
impl Source<Observation> for ObservationCsvFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<Observation>, PipelineError>> + Send>> {
        // Blocking CSV reader inside one async task; input files are one batch each.
        let path = self.path.clone();
        let delimiter = self.delimiter;
        let value_column = self.value_column.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", path.display())))?;
            let mut rdr = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .trim(csv::Trim::Headers)
                .from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| PipelineError::Source(format!("failed to read observation headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = result.map_err(|e| PipelineError::Source(format!(
                    "failed to read observation record: {e}"
                )))?;

                let obs = match record_to_observation(&record, &headers, &value_column) {
                    Ok(o) => o,
                    Err(e) => {
                        metrics::counter!("observation_parse_errors_total").increment(1);
                        Err(e)?
                    }
                };

                yield Envelope::new(obs);
            }
        };

        Box::pin(s)
    }
}
