use std::path::PathBuf;

use async_stream::try_stream;
use futures::Stream;
use streamflow_domain::domain::Observation;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::pipeline::{Envelope, PipelineError, Source};

/// Newline-delimited JSON source for `Observation`s.
///
/// Each non-blank line is one object:
/// `{"site_id": "...", "ts": "<RFC3339>", "value": 1.0 | null, "quality": 0, "query_time": "<RFC3339>"}`.
/// `quality` and `query_time` may be omitted.
pub struct ObservationNdjsonFileSource {
    path: PathBuf,
}

#[derive(serde::Deserialize)]
struct RawObservation {
    site_id: String,
    #[serde(with = "time::serde::rfc3339")]
    ts: time::OffsetDateTime,
    value: Option<f64>,
    #[serde(default)]
    quality: i32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    query_time: Option<time::OffsetDateTime>,
}

impl From<RawObservation> for Observation {
    fn from(r: RawObservation) -> Self {
        let obs = Observation::new(r.site_id, r.ts, r.value, r.quality);
        match r.query_time {
            Some(q) => obs.with_query_time(q),
            None => obs,
        }
    }
}

impl ObservationNdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<Observation> for ObservationNdjsonFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<Observation>, PipelineError>> + Send>> {
        let path = self.path.clone();
        let s = try_stream! {
            let file = File::open(&path).await.map_err(|e| {
                PipelineError::Source(format!("failed to open {}: {e}", path.display()))
            })?;
            let reader = BufReader::new(file);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await.map_err(|e| {
                PipelineError::Source(format!("failed to read observation line: {e}"))
            })? {
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: RawObservation = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        metrics::counter!("observation_parse_errors_total").increment(1);
                        Err(PipelineError::Source(format!(
                            "failed to parse observation json line: {e}"
                        )))?
                    }
                };
                yield Envelope::new(Observation::from(parsed));
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use time::macros::datetime;

    #[test]
    fn raw_observation_converts_with_defaults() {
        let raw: RawObservation =
            serde_json::from_str(r#"{"site_id":"A","ts":"2013-06-01T12:00:00Z","value":null}"#).unwrap();
        let obs: Observation = raw.into();
        assert_eq!(obs.site_id, "A");
        assert_eq!(obs.ts, datetime!(2013-06-01 12:00:00 UTC));
        assert!(obs.is_missing());
        assert_eq!(obs.quality, 0);
        assert!(obs.query_time.is_none());
    }

    #[tokio::test]
    async fn bad_lines_surface_as_in_band_errors() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"site_id":"A","ts":"2013-06-01T12:00:00Z","value":12.5,"quality":100,"query_time":"2013-06-01T12:30:00Z"}}"#
        )
        .unwrap();
        writeln!(f).unwrap();
        writeln!(f, "not json").unwrap();

        let source = ObservationNdjsonFileSource::new(f.path());
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 2);

        let a = &items[0].as_ref().unwrap().payload;
        assert_eq!(a.value, Some(12.5));
        assert_eq!(a.quality, 100);
        assert_eq!(a.query_time, Some(datetime!(2013-06-01 12:30:00 UTC)));
        assert!(matches!(items[1], Err(PipelineError::Source(_))));
    }
}
