//! Grouping rounded observations into time slices.
//!
//! A slice only holds row indices into the table it was cut from, so slices
//! are cheap to hand out to independent writer tasks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Deserialize;
use streamflow_domain::domain::ObservationTable;
use time::{formatting::Formattable, macros::format_description, OffsetDateTime, UtcOffset};

use crate::pipeline::PipelineError;

/// Identifies one output group: a rounded time and, for per-site output,
/// a site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceKey {
    pub rounded: OffsetDateTime,
    pub site_id: Option<String>,
}

impl SliceKey {
    /// Filename-safe tag: `YYYYMMDDHHMM`, plus `.<site>` for site groups.
    pub fn tag(&self) -> Result<String, PipelineError> {
        let mut tag = format_utc(self.rounded, format_description!("[year][month][day][hour][minute]"))?;
        if let Some(site) = self.safe_site() {
            tag.push('.');
            tag.push_str(&site);
        }
        Ok(tag)
    }

    /// The site id with anything outside `[A-Za-z0-9_-]` replaced by `_`.
    pub fn safe_site(&self) -> Option<String> {
        self.site_id.as_ref().map(|site| {
            site.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        })
    }
}

/// Formats `ts` in UTC with a compile-time format description.
pub(crate) fn format_utc(ts: OffsetDateTime, format: &(impl Formattable + ?Sized)) -> Result<String, PipelineError> {
    ts.to_offset(UtcOffset::UTC)
        .format(format)
        .map_err(|e| PipelineError::Sink(format!("failed to format {ts}: {e}")))
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Ok(tag) => f.write_str(&tag),
            Err(_) => write!(f, "{}", self.rounded),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlice {
    pub key: SliceKey,
    /// Indices into the source table, in source order.
    pub rows: Vec<usize>,
}

impl TimeSlice {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    #[default]
    ByTime,
    ByTimeAndSite,
}

/// What to do when one site shows up more than once in a slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateSitePolicy {
    /// Keep every row and log the condition.
    #[default]
    Report,
    /// Keep only the last row for each site.
    KeepLast,
    /// Fail the slice.
    Reject,
}

/// Groups a rounded table by rounded time, optionally splitting each time
/// further by site.
///
/// Groups come out in ascending time order; site groups within one time in
/// the order their site first appears; rows keep source order.
pub fn slice_table(table: &ObservationTable, partition: Partition) -> Result<Vec<TimeSlice>, PipelineError> {
    let times = table
        .rounded_times()
        .ok_or(PipelineError::MissingRequiredColumn("time"))?;

    let mut by_time: BTreeMap<OffsetDateTime, Vec<usize>> = BTreeMap::new();
    for (i, t) in times.iter().enumerate() {
        by_time.entry(*t).or_default().push(i);
    }

    let slices: Vec<TimeSlice> = match partition {
        Partition::ByTime => by_time
            .into_iter()
            .map(|(rounded, rows)| TimeSlice {
                key: SliceKey {
                    rounded,
                    site_id: None,
                },
                rows,
            })
            .collect(),
        Partition::ByTimeAndSite => {
            let mut out = Vec::new();
            for (rounded, rows) in by_time {
                let mut position: HashMap<&str, usize> = HashMap::new();
                let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
                for i in rows {
                    let site = table.rows()[i].site_id.as_str();
                    match position.get(site) {
                        Some(&g) => groups[g].1.push(i),
                        None => {
                            position.insert(site, groups.len());
                            groups.push((site, vec![i]));
                        }
                    }
                }
                out.extend(groups.into_iter().map(|(site, rows)| TimeSlice {
                    key: SliceKey {
                        rounded,
                        site_id: Some(site.to_string()),
                    },
                    rows,
                }));
            }
            out
        }
    };

    tracing::debug!(rows = table.len(), slices = slices.len(), ?partition, "sliced observations");
    Ok(slices)
}

/// Sites with more than one row in `slice`, with their counts, in the order
/// each site first appears.
pub fn duplicate_sites(table: &ObservationTable, slice: &TimeSlice) -> Vec<(String, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for &i in &slice.rows {
        let site = table.rows()[i].site_id.as_str();
        match counts.iter_mut().find(|(s, _)| *s == site) {
            Some((_, n)) => *n += 1,
            None => counts.push((site, 1)),
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(s, n)| (s.to_string(), n))
        .collect()
}

/// Applies `policy` to one slice, returning the rows to write.
pub fn resolve_duplicates(
    table: &ObservationTable,
    slice: &TimeSlice,
    policy: DuplicateSitePolicy,
) -> Result<TimeSlice, PipelineError> {
    let dups = duplicate_sites(table, slice);
    if dups.is_empty() {
        return Ok(slice.clone());
    }
    metrics::counter!("slice_duplicate_sites_total").increment(dups.len() as u64);

    match policy {
        DuplicateSitePolicy::Report => {
            for (site, count) in &dups {
                tracing::warn!(slice = %slice.key, site = %site, count, "duplicate site observations in slice");
            }
            Ok(slice.clone())
        }
        DuplicateSitePolicy::KeepLast => {
            let mut last: HashMap<&str, usize> = HashMap::new();
            for &i in &slice.rows {
                last.insert(table.rows()[i].site_id.as_str(), i);
            }
            let rows: Vec<usize> = slice
                .rows
                .iter()
                .copied()
                .filter(|&i| last.get(table.rows()[i].site_id.as_str()) == Some(&i))
                .collect();
            tracing::warn!(
                slice = %slice.key,
                dropped = slice.rows.len() - rows.len(),
                "kept last observation for duplicated sites"
            );
            Ok(TimeSlice {
                key: slice.key.clone(),
                rows,
            })
        }
        DuplicateSitePolicy::Reject => {
            let (site, count) = dups.into_iter().next().unwrap_or_default();
            Err(PipelineError::DuplicateSite {
                site,
                count,
                slice: slice.key.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::rounding::{round_table, Granularity};
    use std::collections::BTreeSet;
    use streamflow_domain::domain::{Observation, Unit, Variable};
    use time::macros::datetime;
    use time::Duration;

    fn rounded(rows: Vec<Observation>) -> ObservationTable {
        let t = ObservationTable::new(Variable::of_unit(Unit::CubicMetersPerSecond), rows);
        round_table(&t, Granularity::new(5).unwrap()).unwrap()
    }

    fn obs(site: &str, ts: OffsetDateTime) -> Observation {
        Observation::new(site, ts, Some(1.0), 0)
    }

    #[test]
    fn empty_table_gives_no_slices() {
        let t = rounded(vec![]);
        assert!(slice_table(&t, Partition::ByTime).unwrap().is_empty());
        assert!(slice_table(&t, Partition::ByTimeAndSite).unwrap().is_empty());
    }

    #[test]
    fn unrounded_table_is_missing_the_time_column() {
        let t = ObservationTable::new(Variable::of_unit(Unit::CubicMetersPerSecond), vec![]);
        assert!(matches!(
            slice_table(&t, Partition::ByTime),
            Err(PipelineError::MissingRequiredColumn("time"))
        ));
    }

    #[test]
    fn hundred_observations_in_three_buckets() {
        // 100 readings spread over 12:00:00..12:12:22, i.e. buckets 12:00, 12:05, 12:10.
        let start = datetime!(2013-06-01 11:57:30 UTC);
        let rows: Vec<Observation> = (0..100)
            .map(|i| obs(&format!("S{:03}", i), start + Duration::seconds(i * 8)))
            .collect();
        let t = rounded(rows);

        let slices = slice_table(&t, Partition::ByTime).unwrap();
        assert_eq!(slices.len(), 3);

        let keys: Vec<_> = slices.iter().map(|s| s.key.rounded).collect();
        assert_eq!(
            keys,
            [
                datetime!(2013-06-01 12:00:00 UTC),
                datetime!(2013-06-01 12:05:00 UTC),
                datetime!(2013-06-01 12:10:00 UTC)
            ]
        );

        let all: Vec<usize> = slices.iter().flat_map(|s| s.rows.iter().copied()).collect();
        assert_eq!(all.len(), 100);
        let unique: BTreeSet<usize> = all.into_iter().collect();
        assert_eq!(unique, (0..100).collect::<BTreeSet<_>>());

        for s in &slices {
            for &i in &s.rows {
                assert_eq!(t.rounded_times().unwrap()[i], s.key.rounded);
            }
        }
    }

    #[test]
    fn site_partition_keeps_first_seen_site_order_and_row_order() {
        let t0 = datetime!(2013-06-01 12:00:00 UTC);
        let t1 = datetime!(2013-06-01 12:05:00 UTC);
        let t = rounded(vec![
            obs("B", t1),
            obs("B", t0),
            obs("A", t0),
            obs("B", t0 + Duration::seconds(30)),
        ]);

        let slices = slice_table(&t, Partition::ByTimeAndSite).unwrap();
        let summary: Vec<_> = slices
            .iter()
            .map(|s| (s.key.rounded, s.key.site_id.clone().unwrap(), s.rows.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (t0, "B".to_string(), vec![1, 3]),
                (t0, "A".to_string(), vec![2]),
                (t1, "B".to_string(), vec![0]),
            ]
        );
    }

    #[test]
    fn key_tags_are_filename_safe() {
        let key = SliceKey {
            rounded: datetime!(2013-06-01 18:20:00 +05:45),
            site_id: Some("05568500/x y".to_string()),
        };
        assert_eq!(key.tag().unwrap(), "201306011235.05568500_x_y");
        assert_eq!(key.safe_site().as_deref(), Some("05568500_x_y"));
        let key = SliceKey {
            rounded: datetime!(2013-06-01 12:35:00 UTC),
            site_id: None,
        };
        assert_eq!(key.to_string(), "201306011235");
    }

    #[test]
    fn duplicate_policies() {
        let t0 = datetime!(2013-06-01 12:00:00 UTC);
        let t = rounded(vec![
            obs("A", t0),
            obs("B", t0),
            obs("A", t0 + Duration::seconds(60)),
            obs("A", t0 + Duration::seconds(90)),
        ]);
        let slice = slice_table(&t, Partition::ByTime).unwrap().remove(0);
        assert_eq!(duplicate_sites(&t, &slice), vec![("A".to_string(), 3)]);

        let kept = resolve_duplicates(&t, &slice, DuplicateSitePolicy::Report).unwrap();
        assert_eq!(kept.rows, vec![0, 1, 2, 3]);

        let last = resolve_duplicates(&t, &slice, DuplicateSitePolicy::KeepLast).unwrap();
        assert_eq!(last.rows, vec![1, 3]);

        let err = resolve_duplicates(&t, &slice, DuplicateSitePolicy::Reject).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateSite { ref site, count: 3, .. } if site == "A"));
    }
}
