use std::collections::HashMap;

use serde::Deserialize;
use streamflow_domain::domain::{DerivedColumn, ErrorStatistic, ObservationKind, ObservationTable};

use crate::pipeline::PipelineError;
use crate::transform::error_model::ErrorModel;

/// Which rows form the historical sample an error model is fitted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleScope {
    /// Every row in the table, regardless of site.
    #[default]
    Pooled,
    /// Each site's own record in the table.
    PerSite,
}

/// Rows left without an error by `derive_variance`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarianceReport {
    /// Sites whose own sample was too degenerate to fit, in table order.
    pub skipped_sites: Vec<String>,
    /// Rows of those sites; their error is missing.
    pub skipped_rows: usize,
}

/// Appends a one-sigma error column to a discharge table.
///
/// The model's three-sigma estimate is divided by three; with `as_variance`
/// the result is squared. Rows with a missing value get a missing error.
/// The input table is left as it was.
///
/// A degenerate pooled sample fails with `InsufficientData`. Under
/// `SampleScope::PerSite` a degenerate site is skipped instead: its rows get
/// a missing error and are counted in the report.
pub fn derive_variance(
    table: &ObservationTable,
    model: &ErrorModel,
    as_variance: bool,
    scope: SampleScope,
) -> Result<(ObservationTable, VarianceReport), PipelineError> {
    let variable = table.variable();
    if variable.kind() != ObservationKind::Discharge {
        return Err(PipelineError::WrongObservationKind {
            expected: ObservationKind::Discharge,
            found: variable.kind(),
        });
    }
    model.validate()?;

    let rows = table.rows();
    let groups: Vec<(&str, Vec<usize>)> = match scope {
        SampleScope::Pooled => vec![("*", (0..rows.len()).collect())],
        SampleScope::PerSite => {
            let mut order: Vec<&str> = Vec::new();
            let mut by_site: HashMap<&str, Vec<usize>> = HashMap::new();
            for (i, row) in rows.iter().enumerate() {
                by_site
                    .entry(row.site_id.as_str())
                    .or_insert_with(|| {
                        order.push(row.site_id.as_str());
                        Vec::new()
                    })
                    .push(i);
            }
            order
                .into_iter()
                .map(|site| (site, by_site.remove(site).unwrap_or_default()))
                .collect()
        }
    };

    let mut errors: Vec<Option<f64>> = vec![None; rows.len()];
    let mut report = VarianceReport::default();
    for (site, idx) in &groups {
        let series: Vec<Option<f64>> = idx.iter().map(|&i| rows[i].value).collect();
        if series.iter().all(Option::is_none) {
            continue;
        }
        let sample: Vec<f64> = series.iter().flatten().copied().collect();
        let three_sigma = match model.estimate_all(&sample, &series) {
            Ok(e) => e,
            Err(PipelineError::InsufficientData { distinct }) if scope == SampleScope::PerSite => {
                tracing::warn!(site, distinct, rows = idx.len(), "site sample too small; errors left missing");
                metrics::counter!("variance_sites_skipped_total").increment(1);
                report.skipped_sites.push(site.to_string());
                report.skipped_rows += idx.len();
                continue;
            }
            Err(e) => {
                tracing::error!(site, model = model.tag(), error = %e, "error model could not be applied");
                return Err(e);
            }
        };
        for (&i, e) in idx.iter().zip(three_sigma) {
            errors[i] = e.map(|e3| {
                let sd = e3 / 3.0;
                if as_variance {
                    sd * sd
                } else {
                    sd
                }
            });
        }
    }

    let statistic = if as_variance {
        ErrorStatistic::Variance
    } else {
        ErrorStatistic::StdDev
    };
    let column = DerivedColumn::new(model.tag(), statistic, variable.unit(), errors);
    tracing::debug!(
        rows = rows.len(),
        groups = groups.len(),
        skipped_sites = report.skipped_sites.len(),
        column = %column.name,
        "derived observation errors"
    );

    Ok((table.with_derived(column)?, report))
}
