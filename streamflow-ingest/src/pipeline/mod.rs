use std::{fmt, path::PathBuf, pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};
use streamflow_domain::domain::{ObservationKind, TableError, UnitError};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

/// Why a record was removed by quality control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    NegativeValue,
    QualityCode(i32),
    TimestampOutOfRange,
}

impl RejectReason {
    /// Stable label for metrics and reports.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::NegativeValue => "negative_value",
            RejectReason::QualityCode(_) => "quality_code",
            RejectReason::TimestampOutOfRange => "timestamp_out_of_range",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NegativeValue => write!(f, "negative value"),
            RejectReason::QualityCode(code) => write!(f, "quality code {code} not accepted"),
            RejectReason::TimestampOutOfRange => write!(f, "timestamp out of allowed range"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("observation rejected: {0}")]
    Rejected(RejectReason),
    #[error("insufficient data: quantile needs at least 2 distinct finite values, got {distinct}")]
    InsufficientData { distinct: usize },
    #[error("error estimate {estimate} for value {value} is negative")]
    NegativeErrorEstimate { value: f64, estimate: f64 },
    #[error("wrong observation kind: expected {expected}, got {found}")]
    WrongObservationKind {
        expected: ObservationKind,
        found: ObservationKind,
    },
    #[error("invalid granularity: {0} minutes does not evenly divide an hour")]
    InvalidGranularity(u32),
    #[error("missing required column '{0}'")]
    MissingRequiredColumn(&'static str),
    #[error("site '{0}' has no location metadata")]
    JoinMiss(String),
    #[error("site '{site}' appears {count} times in slice {slice}")]
    DuplicateSite {
        site: String,
        count: usize,
        slice: String,
    },
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

/// Terminal stage of a pipeline. Upstream errors arrive in-band so a sink
/// decides whether they are fatal or merely counted.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    type Output: Send;

    async fn run<S>(&self, input: S) -> Result<Self::Output, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<K::Output, PipelineError> {
        let mut stream = self.source.stream().await;

        // Apply transforms in sequence (if any).
        for t in self.transforms {
            let t_arc = t.clone();
            stream = Box::pin(stream.then(move |item| {
                let t_inner = t_arc.clone();
                async move {
                    match item {
                        Ok(env) => t_inner.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}
