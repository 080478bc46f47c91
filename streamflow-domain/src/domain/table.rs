use std::fmt;

use time::OffsetDateTime;

use super::observation::Observation;
use super::site::Location;
use super::units::{ObservationKind, Unit, UnitError, Variable};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("column '{column}' has {found} values for {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// Which one-sigma statistic an error column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatistic {
    StdDev,
    Variance,
}

impl ErrorStatistic {
    pub fn label(self) -> &'static str {
        match self {
            ErrorStatistic::StdDev => "stdev",
            ErrorStatistic::Variance => "variance",
        }
    }

    fn exponent(self) -> i32 {
        match self {
            ErrorStatistic::StdDev => 1,
            ErrorStatistic::Variance => 2,
        }
    }
}

impl fmt::Display for ErrorStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A per-row error column appended by variance derivation.
///
/// The name is for humans and downstream traceability only; the typed
/// `model`, `statistic` and `unit` fields are the source of truth.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub model: String,
    pub statistic: ErrorStatistic,
    pub unit: Unit,
    pub values: Vec<Option<f64>>,
}

impl DerivedColumn {
    pub fn new(
        model: impl Into<String>,
        statistic: ErrorStatistic,
        unit: Unit,
        values: Vec<Option<f64>>,
    ) -> Self {
        let model = model.into();
        Self {
            name: Self::column_name(unit.kind(), &model, statistic, unit),
            model,
            statistic,
            unit,
            values,
        }
    }

    /// e.g. `discharge variance ((m^3/s)^2) [clim_taper]`.
    pub fn column_name(kind: ObservationKind, model: &str, statistic: ErrorStatistic, unit: Unit) -> String {
        match statistic {
            ErrorStatistic::StdDev => format!("{kind} {statistic} ({unit}) [{model}]"),
            ErrorStatistic::Variance => format!("{kind} {statistic} (({unit})^2) [{model}]"),
        }
    }

    /// Row `i` expressed as a variance, squaring a std-dev column.
    pub fn variance(&self, i: usize) -> Option<f64> {
        let v = self.values.get(i).copied().flatten()?;
        match self.statistic {
            ErrorStatistic::StdDev => Some(v * v),
            ErrorStatistic::Variance => Some(v),
        }
    }

    fn converted(&self, to: Unit) -> Result<Self, UnitError> {
        let factor = self.unit.conversion_factor(to)?.powi(self.statistic.exponent());
        let values = self.values.iter().map(|v| v.map(|x| x * factor)).collect();
        Ok(Self::new(self.model.clone(), self.statistic, to, values))
    }

    fn select(&self, indices: &[usize]) -> Self {
        Self {
            values: indices.iter().map(|&i| self.values[i]).collect(),
            ..self.clone()
        }
    }
}

/// A batch of observations of one variable plus the columns attached to it
/// as it moves through the pipeline.
///
/// Enrichment columns are parallel to `rows`. Every `with_*` method returns
/// a new table; nothing is mutated in place once a table is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    variable: Variable,
    rows: Vec<Observation>,
    locations: Option<Vec<Location>>,
    rounded_times: Option<Vec<OffsetDateTime>>,
    derived: Vec<DerivedColumn>,
}

impl ObservationTable {
    pub fn new(variable: Variable, rows: Vec<Observation>) -> Self {
        Self {
            variable,
            rows,
            locations: None,
            rounded_times: None,
            derived: Vec::new(),
        }
    }

    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn locations(&self) -> Option<&[Location]> {
        self.locations.as_deref()
    }

    pub fn rounded_times(&self) -> Option<&[OffsetDateTime]> {
        self.rounded_times.as_deref()
    }

    pub fn derived(&self) -> &[DerivedColumn] {
        &self.derived
    }

    pub fn derived_column(&self, name: &str) -> Option<&DerivedColumn> {
        self.derived.iter().find(|c| c.name == name)
    }

    pub fn with_locations(&self, locations: Vec<Location>) -> Result<Self, TableError> {
        self.check_len("location", locations.len())?;
        Ok(Self {
            locations: Some(locations),
            ..self.clone()
        })
    }

    pub fn with_rounded_times(&self, times: Vec<OffsetDateTime>) -> Result<Self, TableError> {
        self.check_len("rounded time", times.len())?;
        Ok(Self {
            rounded_times: Some(times),
            ..self.clone()
        })
    }

    /// Appends `column`, replacing an existing column of the same name.
    pub fn with_derived(&self, column: DerivedColumn) -> Result<Self, TableError> {
        self.check_len(&column.name, column.values.len())?;
        let mut derived: Vec<DerivedColumn> =
            self.derived.iter().filter(|c| c.name != column.name).cloned().collect();
        derived.push(column);
        Ok(Self {
            derived,
            ..self.clone()
        })
    }

    /// The rows at `indices`, in that order, with every column kept aligned.
    ///
    /// Panics if an index is out of bounds.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            variable: self.variable,
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            locations: self
                .locations
                .as_ref()
                .map(|locs| indices.iter().map(|&i| locs[i]).collect()),
            rounded_times: self
                .rounded_times
                .as_ref()
                .map(|times| indices.iter().map(|&i| times[i]).collect()),
            derived: self.derived.iter().map(|c| c.select(indices)).collect(),
        }
    }

    /// Values and derived columns re-expressed in `to`.
    pub fn converted_to(&self, to: Unit) -> Result<Self, UnitError> {
        let factor = self.variable.unit().conversion_factor(to)?;
        let rows = self
            .rows
            .iter()
            .map(|r| Observation {
                value: r.value.map(|v| v * factor),
                ..r.clone()
            })
            .collect();
        let derived = self
            .derived
            .iter()
            .map(|c| c.converted(to))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            variable: Variable::new(self.variable.kind(), to)?,
            rows,
            locations: self.locations.clone(),
            rounded_times: self.rounded_times.clone(),
            derived,
        })
    }

    fn check_len(&self, column: &str, found: usize) -> Result<(), TableError> {
        if found != self.rows.len() {
            return Err(TableError::LengthMismatch {
                column: column.to_string(),
                expected: self.rows.len(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn table() -> ObservationTable {
        let ts = datetime!(2024-05-01 12:00:00 UTC);
        ObservationTable::new(
            Variable::of_unit(Unit::CubicFeetPerSecond),
            vec![
                Observation::new("A", ts, Some(100.0), 0),
                Observation::new("B", ts, None, 0),
                Observation::new("C", ts, Some(50.0), 0),
            ],
        )
    }

    #[test]
    fn column_names_encode_model_statistic_and_units() {
        assert_eq!(
            DerivedColumn::column_name(
                ObservationKind::Discharge,
                "clim_taper",
                ErrorStatistic::Variance,
                Unit::CubicMetersPerSecond
            ),
            "discharge variance ((m^3/s)^2) [clim_taper]"
        );
        assert_eq!(
            DerivedColumn::column_name(
                ObservationKind::Discharge,
                "pct_plus_quantile",
                ErrorStatistic::StdDev,
                Unit::CubicFeetPerSecond
            ),
            "discharge stdev (ft^3/s) [pct_plus_quantile]"
        );
    }

    #[test]
    fn enrichment_rejects_misaligned_columns() {
        let err = table().with_rounded_times(vec![]).unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch {
                column: "rounded time".to_string(),
                expected: 3,
                found: 0
            }
        );
    }

    #[test]
    fn enrichment_leaves_the_source_table_untouched() {
        let base = table();
        let col = DerivedColumn::new("m", ErrorStatistic::StdDev, Unit::CubicFeetPerSecond, vec![Some(1.0), None, Some(2.0)]);
        let enriched = base.with_derived(col).unwrap();
        assert!(base.derived().is_empty());
        assert_eq!(enriched.derived().len(), 1);

        // Same name replaces rather than duplicates.
        let again = DerivedColumn::new("m", ErrorStatistic::StdDev, Unit::CubicFeetPerSecond, vec![None, None, None]);
        let replaced = enriched.with_derived(again).unwrap();
        assert_eq!(replaced.derived().len(), 1);
        assert_eq!(replaced.derived()[0].values, vec![None, None, None]);
    }

    #[test]
    fn select_keeps_columns_aligned() {
        let col = DerivedColumn::new("m", ErrorStatistic::StdDev, Unit::CubicFeetPerSecond, vec![Some(1.0), None, Some(2.0)]);
        let t = table().with_derived(col).unwrap();
        let picked = t.select(&[2, 0]);
        assert_eq!(picked.rows()[0].site_id, "C");
        assert_eq!(picked.rows()[1].site_id, "A");
        assert_eq!(picked.derived()[0].values, vec![Some(2.0), Some(1.0)]);
        assert!(picked.locations().is_none());
    }

    #[test]
    fn conversion_scales_stdev_linearly_and_variance_quadratically() {
        let stdev = DerivedColumn::new("m", ErrorStatistic::StdDev, Unit::CubicFeetPerSecond, vec![Some(10.0), None, Some(10.0)]);
        let var = DerivedColumn::new("m", ErrorStatistic::Variance, Unit::CubicFeetPerSecond, vec![Some(100.0), None, Some(100.0)]);
        let t = table().with_derived(stdev).unwrap().with_derived(var).unwrap();

        let si = t.converted_to(Unit::CubicMetersPerSecond).unwrap();
        assert_eq!(si.variable().unit(), Unit::CubicMetersPerSecond);
        assert_eq!(si.rows()[0].value, Some(100.0 * CFS));
        assert_eq!(si.rows()[1].value, None);

        let sd = si.derived()[0].values[0].unwrap();
        let vr = si.derived()[1].values[0].unwrap();
        assert!((sd - 10.0 * CFS).abs() < 1e-12);
        assert!((vr - sd * sd).abs() < 1e-12);
        assert!(si.derived()[1].name.contains("m^3/s"));
    }

    const CFS: f64 = crate::domain::units::CFS_TO_CMS;

    #[test]
    fn variance_accessor_squares_stdev() {
        let col = DerivedColumn::new("m", ErrorStatistic::StdDev, Unit::CubicMetersPerSecond, vec![Some(3.0), None]);
        assert_eq!(col.variance(0), Some(9.0));
        assert_eq!(col.variance(1), None);
        assert_eq!(col.variance(7), None);
    }
}
