//! Rounding timestamps to the nearest multiple of a whole-minute step.

use streamflow_domain::domain::ObservationTable;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::pipeline::PipelineError;

const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;

/// A rounding step in minutes that evenly divides an hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity(u32);

impl Granularity {
    pub fn new(minutes: u32) -> Result<Self, PipelineError> {
        if minutes == 0 || 60 % minutes != 0 {
            return Err(PipelineError::InvalidGranularity(minutes));
        }
        Ok(Self(minutes))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Granularity {
    type Error = PipelineError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Granularity::new(minutes)
    }
}

/// Rounds `ts` to the nearest multiple of `g` minutes past the hour, in UTC.
///
/// Sub-minute precision counts toward the rounding. An exact tie goes to
/// the later bucket (12:02:30 with a 5 minute step gives 12:05). This
/// deliberately differs from round-half-to-even, which gives 12:00 there.
/// A result of minute 60 carries into
/// the next hour (and from there into the next day, month or year).
pub fn round_to_nearest(ts: OffsetDateTime, g: Granularity) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    let into_hour = i64::from(utc.minute()) * NANOS_PER_MINUTE
        + i64::from(utc.second()) * 1_000_000_000
        + i64::from(utc.nanosecond());
    let step = i64::from(g.minutes()) * NANOS_PER_MINUTE;
    let rounded_minutes = (into_hour + step / 2) / step * i64::from(g.minutes());

    let hour_start = utc - Duration::nanoseconds(into_hour);
    hour_start + Duration::minutes(rounded_minutes)
}

/// Attaches the rounded-time column to a table.
pub fn round_table(table: &ObservationTable, g: Granularity) -> Result<ObservationTable, PipelineError> {
    let rounded = table
        .rows()
        .iter()
        .map(|row| round_to_nearest(row.ts, g))
        .collect();
    Ok(table.with_rounded_times(rounded)?)
}
