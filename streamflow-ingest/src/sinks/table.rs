use std::collections::BTreeMap;

use futures::StreamExt;
use streamflow_domain::domain::{Observation, ObservationTable, Variable};

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Counts from one ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    /// Accepted rows whose value is missing.
    pub missing_values: usize,
    /// Quality-control rejections by reason label.
    pub rejected: BTreeMap<&'static str, usize>,
    pub source_errors: usize,
}

impl IngestReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Collects a pipeline's accepted observations into one table.
///
/// Rejections are always counted. Any other upstream error aborts the run
/// unless the sink is lenient, in which case it is logged and counted.
pub struct TableSink {
    variable: Variable,
    lenient: bool,
}

impl TableSink {
    pub fn new(variable: Variable) -> Self {
        Self {
            variable,
            lenient: false,
        }
    }

    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

#[async_trait::async_trait]
impl Sink<Observation> for TableSink {
    type Output = (ObservationTable, IngestReport);

    async fn run<S>(&self, mut input: S) -> Result<Self::Output, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Observation>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut rows = Vec::new();
        let mut report = IngestReport::default();

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => {
                    if env.payload.is_missing() {
                        report.missing_values += 1;
                    }
                    report.accepted += 1;
                    rows.push(env.payload);
                }
                Err(PipelineError::Rejected(reason)) => {
                    *report.rejected.entry(reason.label()).or_default() += 1;
                }
                Err(e) if self.lenient => {
                    tracing::error!(error = %e, "error in upstream pipeline for TableSink");
                    report.source_errors += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            accepted = report.accepted,
            missing = report.missing_values,
            rejected = report.rejected_total(),
            source_errors = report.source_errors,
            "ingest finished"
        );
        Ok((ObservationTable::new(self.variable, rows), report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RejectReason;
    use streamflow_domain::domain::Unit;
    use time::macros::datetime;

    fn ok(value: Option<f64>) -> Result<Envelope<Observation>, PipelineError> {
        Ok(Envelope::new(Observation::new(
            "A",
            datetime!(2013-06-01 12:00:00 UTC),
            value,
            0,
        )))
    }

    #[tokio::test]
    async fn counts_accepted_missing_and_rejected() {
        let items = vec![
            ok(Some(1.0)),
            Err(PipelineError::Rejected(RejectReason::NegativeValue)),
            ok(None),
            Err(PipelineError::Rejected(RejectReason::QualityCode(9))),
            Err(PipelineError::Rejected(RejectReason::NegativeValue)),
        ];
        let sink = TableSink::new(Variable::of_unit(Unit::CubicFeetPerSecond));
        let (table, report) = sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.variable().unit(), Unit::CubicFeetPerSecond);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.missing_values, 1);
        assert_eq!(report.rejected.get("negative_value"), Some(&2));
        assert_eq!(report.rejected.get("quality_code"), Some(&1));
        assert_eq!(report.rejected_total(), 3);
    }

    #[tokio::test]
    async fn source_errors_are_fatal_unless_lenient() {
        let items = || vec![ok(Some(1.0)), Err(PipelineError::Source("bad row".into())), ok(Some(2.0))];
        let variable = Variable::of_unit(Unit::CubicMetersPerSecond);

        let strict = TableSink::new(variable).run(futures::stream::iter(items())).await;
        assert!(matches!(strict, Err(PipelineError::Source(_))));

        let (table, report) = TableSink::new(variable)
            .lenient(true)
            .run(futures::stream::iter(items()))
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(report.source_errors, 1);
    }
}
