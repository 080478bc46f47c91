use streamflow_domain::domain::{ObservationTable, Unit};

use crate::pipeline::PipelineError;

/// Re-expresses a table's values and error columns in `target`.
pub fn convert_units(table: &ObservationTable, target: Unit) -> Result<ObservationTable, PipelineError> {
    let from = table.variable().unit();
    if from == target {
        return Ok(table.clone());
    }
    let converted = table.converted_to(target)?;
    tracing::debug!(%from, to = %target, rows = table.len(), "converted observation units");
    Ok(converted)
}

/// Shorthand for converting to the SI unit of the table's variable.
pub fn to_si(table: &ObservationTable) -> Result<ObservationTable, PipelineError> {
    convert_units(table, table.variable().unit().si())
}
