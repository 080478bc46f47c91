//! Per-record quality control plus the batch transforms that enrich an
//! `ObservationTable` on its way to the writers.

pub mod error_model;
pub mod join;
pub mod rounding;
pub mod slicing;
pub mod units;
pub mod variance;

use crate::pipeline::{Envelope, PipelineError, RejectReason, Transform};
use streamflow_domain::domain::Observation;
use time::macros::datetime;

/// Minimal removal policy applied to raw gauge readings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcPolicy {
    /// Quality codes to keep. `None` keeps every code.
    pub accepted_quality: Option<Vec<i32>>,
    /// Keep negative values instead of rejecting them.
    pub allow_negative: bool,
}

/// Pure validation of one raw `Observation`.
///
/// Rules:
/// - a present value must be non-negative (unless the policy allows it);
///   a missing value passes, the writers decide what to do with it.
/// - the quality code must be in the accepted set when one is configured.
/// - ts must be within a broad sanity window [1900-01-01, 2100-01-01].
pub fn validate_observation(
    env: Envelope<Observation>,
    policy: &QcPolicy,
) -> Result<Envelope<Observation>, PipelineError> {
    let o = &env.payload;

    if let Some(v) = o.value {
        if v < 0.0 && !policy.allow_negative {
            return Err(PipelineError::Rejected(RejectReason::NegativeValue));
        }
    }

    if let Some(accepted) = &policy.accepted_quality {
        if !accepted.contains(&o.quality) {
            return Err(PipelineError::Rejected(RejectReason::QualityCode(o.quality)));
        }
    }

    let min_ts = datetime!(1900-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if o.ts < min_ts || o.ts > max_ts {
        return Err(PipelineError::Rejected(RejectReason::TimestampOutOfRange));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct DischargeQc {
    policy: QcPolicy,
}

impl DischargeQc {
    pub fn new(policy: QcPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Transform<Observation, Observation> for DischargeQc {
    async fn apply(
        &self,
        input: Envelope<Observation>,
    ) -> Result<Envelope<Observation>, PipelineError> {
        match validate_observation(input, &self.policy) {
            Ok(env) => Ok(env),
            Err(e) => {
                if let PipelineError::Rejected(reason) = &e {
                    metrics::counter!("qc_rejected_total", "reason" => reason.label()).increment(1);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn env(value: Option<f64>, quality: i32) -> Envelope<Observation> {
        Envelope::new(Observation::new(
            "05568500",
            datetime!(2024-01-01 00:00:00 UTC),
            value,
            quality,
        ))
    }

    #[test]
    fn accepts_valid_and_missing_values() {
        let policy = QcPolicy::default();
        assert!(validate_observation(env(Some(1.0), 0), &policy).is_ok());
        assert!(validate_observation(env(Some(0.0), 0), &policy).is_ok());
        assert!(validate_observation(env(None, 0), &policy).is_ok());
    }

    #[test]
    fn rejects_negative_discharge() {
        let res = validate_observation(env(Some(-0.1), 0), &QcPolicy::default());
        assert!(matches!(
            res,
            Err(PipelineError::Rejected(RejectReason::NegativeValue))
        ));

        let lenient = QcPolicy {
            allow_negative: true,
            ..QcPolicy::default()
        };
        assert!(validate_observation(env(Some(-0.1), 0), &lenient).is_ok());
    }

    #[test]
    fn rejects_quality_codes_outside_accepted_set() {
        let policy = QcPolicy {
            accepted_quality: Some(vec![0, 100]),
            allow_negative: false,
        };
        assert!(validate_observation(env(Some(1.0), 100), &policy).is_ok());
        assert!(matches!(
            validate_observation(env(Some(1.0), 50), &policy),
            Err(PipelineError::Rejected(RejectReason::QualityCode(50)))
        ));
    }

    #[test]
    fn rejects_out_of_range_ts() {
        let mut e = env(Some(1.0), 0);
        e.payload.ts = datetime!(1800-01-01 00:00:00 UTC);
        assert!(matches!(
            validate_observation(e, &QcPolicy::default()),
            Err(PipelineError::Rejected(RejectReason::TimestampOutOfRange))
        ));
    }

    #[tokio::test]
    async fn transform_passes_through_accepted_records() {
        let qc = DischargeQc::new(QcPolicy::default());
        let out = qc.apply(env(Some(3.0), 0)).await.unwrap();
        assert_eq!(out.payload.value, Some(3.0));
        assert!(qc.apply(env(Some(-3.0), 0)).await.is_err());
    }
}
