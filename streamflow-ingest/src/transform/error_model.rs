//! Three-sigma observation error models.
//!
//! Both models are pure: the same sample and value always give the same
//! estimate. The sample is a historical record of the variable; only its
//! empirical quantiles are used, never its time structure.

use serde::Deserialize;

use crate::pipeline::PipelineError;

fn default_ppq_intercept() -> f64 {
    0.005
}

fn default_ppq_pct_err() -> f64 {
    0.10
}

fn default_taper_intercept() -> f64 {
    0.05
}

fn default_taper_clim() -> f64 {
    0.5
}

fn default_taper_pct_err() -> f64 {
    0.15
}

/// Closed set of error strategies, dispatched by tag.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorModel {
    /// `Q(sample, q_intercept) + pct_err * value`
    PercentPlusQuantile {
        #[serde(default = "default_ppq_intercept")]
        q_intercept: f64,
        #[serde(default = "default_ppq_pct_err")]
        pct_err: f64,
    },
    /// `Q(sample, q_intercept) + min(pct_err * value, pct_err * |value - Q(sample, q_clim)|)`
    ///
    /// Smallest near the climatological quantile, growing linearly away from
    /// it, and never above the flat percent-error term.
    ClimatologicalTaper {
        #[serde(default = "default_taper_intercept")]
        q_intercept: f64,
        #[serde(default = "default_taper_clim")]
        q_clim: f64,
        #[serde(default = "default_taper_pct_err")]
        pct_err: f64,
    },
}

impl ErrorModel {
    pub fn percent_plus_quantile() -> Self {
        ErrorModel::PercentPlusQuantile {
            q_intercept: default_ppq_intercept(),
            pct_err: default_ppq_pct_err(),
        }
    }

    pub fn climatological_taper() -> Self {
        ErrorModel::ClimatologicalTaper {
            q_intercept: default_taper_intercept(),
            q_clim: default_taper_clim(),
            pct_err: default_taper_pct_err(),
        }
    }

    /// Short stable name, used in column names and output file tags.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorModel::PercentPlusQuantile { .. } => "pct_plus_quantile",
            ErrorModel::ClimatologicalTaper { .. } => "clim_taper",
        }
    }

    /// Rejects probabilities outside `[0, 1]` and negative or non-finite
    /// percent errors.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let (probs, pct_err) = match *self {
            ErrorModel::PercentPlusQuantile { q_intercept, pct_err } => (vec![q_intercept], pct_err),
            ErrorModel::ClimatologicalTaper {
                q_intercept,
                q_clim,
                pct_err,
            } => (vec![q_intercept, q_clim], pct_err),
        };
        for p in probs {
            check_probability(p)?;
        }
        if !pct_err.is_finite() || pct_err < 0.0 {
            return Err(PipelineError::Transform(format!(
                "{}: pct_err must be a non-negative number, got {pct_err}",
                self.tag()
            )));
        }
        Ok(())
    }

    /// Three-sigma error of one value against a historical sample.
    ///
    /// Fails with `NegativeErrorEstimate` when the result would be below
    /// zero, which a negative value or a negative intercept quantile can cause.
    pub fn estimate(&self, sample: &[f64], value: f64) -> Result<f64, PipelineError> {
        self.fit(sample)?.three_sigma(value)
    }

    /// Three-sigma errors for a series of values sharing one sample.
    /// Quantiles are computed once; missing values stay missing.
    pub fn estimate_all(
        &self,
        sample: &[f64],
        values: &[Option<f64>],
    ) -> Result<Vec<Option<f64>>, PipelineError> {
        let fitted = self.fit(sample)?;
        values
            .iter()
            .map(|v| v.map(|x| fitted.three_sigma(x)).transpose())
            .collect()
    }

    fn fit(&self, sample: &[f64]) -> Result<Fitted, PipelineError> {
        self.validate()?;
        let sorted = sorted_finite(sample)?;
        Ok(match *self {
            ErrorModel::PercentPlusQuantile { q_intercept, pct_err } => Fitted {
                intercept: sorted_quantile(&sorted, q_intercept),
                pct_err,
                climatology: None,
            },
            ErrorModel::ClimatologicalTaper {
                q_intercept,
                q_clim,
                pct_err,
            } => Fitted {
                intercept: sorted_quantile(&sorted, q_intercept),
                pct_err,
                climatology: Some(sorted_quantile(&sorted, q_clim)),
            },
        })
    }
}

struct Fitted {
    intercept: f64,
    pct_err: f64,
    climatology: Option<f64>,
}

impl Fitted {
    fn three_sigma(&self, value: f64) -> Result<f64, PipelineError> {
        let flat = self.pct_err * value;
        let estimate = match self.climatology {
            None => self.intercept + flat,
            Some(clim) => self.intercept + flat.min(self.pct_err * (value - clim).abs()),
        };
        if estimate >= 0.0 {
            Ok(estimate)
        } else {
            Err(PipelineError::NegativeErrorEstimate { value, estimate })
        }
    }
}

fn check_probability(p: f64) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(PipelineError::Transform(format!(
            "quantile probability {p} outside [0, 1]"
        )));
    }
    Ok(())
}

/// Finite members of `sample`, sorted ascending. Fails unless at least two
/// distinct values remain.
fn sorted_finite(sample: &[f64]) -> Result<Vec<f64>, PipelineError> {
    let mut xs: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
    xs.sort_by(f64::total_cmp);

    let mut distinct = xs.len().min(1);
    for pair in xs.windows(2) {
        if pair[1] != pair[0] {
            distinct += 1;
        }
    }
    if distinct < 2 {
        return Err(PipelineError::InsufficientData { distinct });
    }
    Ok(xs)
}

/// Continuous empirical quantile with linear interpolation between order
/// statistics (Hyndman & Fan type 7).
pub fn quantile(sample: &[f64], p: f64) -> Result<f64, PipelineError> {
    check_probability(p)?;
    let sorted = sorted_finite(sample)?;
    Ok(sorted_quantile(&sorted, p))
}

fn sorted_quantile(sorted: &[f64], p: f64) -> f64 {
    let index = (sorted.len() - 1) as f64 * p;
    let lo = index.floor() as usize;
    let hi = index.ceil() as usize;
    let x_lo = sorted[lo];
    let x_hi = sorted[hi];
    if hi == lo || x_hi == x_lo {
        return x_lo;
    }
    let h = index - lo as f64;
    (1.0 - h) * x_lo + h * x_hi
}
