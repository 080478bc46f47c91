use std::collections::{BTreeSet, HashMap};

use streamflow_domain::domain::{ObservationTable, SiteMetadata};

use crate::pipeline::PipelineError;

/// What the metadata join kept and what it left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub joined_rows: usize,
    pub excluded_rows: usize,
    pub excluded_sites: BTreeSet<String>,
}

/// Inner-joins site locations onto observations by site id.
///
/// Rows whose site has no metadata are dropped. Each such site is logged
/// once as a join miss and every dropped row is counted in the report.
/// When `sites` repeats a site id the first entry wins.
pub fn join_site_metadata(
    table: &ObservationTable,
    sites: &[SiteMetadata],
) -> Result<(ObservationTable, JoinReport), PipelineError> {
    let mut by_id: HashMap<&str, &SiteMetadata> = HashMap::with_capacity(sites.len());
    for site in sites {
        by_id.entry(site.site_id.as_str()).or_insert(site);
    }

    let mut keep = Vec::with_capacity(table.len());
    let mut locations = Vec::with_capacity(table.len());
    let mut report = JoinReport::default();

    for (i, row) in table.rows().iter().enumerate() {
        match by_id.get(row.site_id.as_str()) {
            Some(site) => {
                keep.push(i);
                locations.push(site.location());
            }
            None => {
                report.excluded_rows += 1;
                if report.excluded_sites.insert(row.site_id.clone()) {
                    let miss = PipelineError::JoinMiss(row.site_id.clone());
                    tracing::warn!(site = %row.site_id, "{miss}; excluding its observations");
                }
            }
        }
    }
    report.joined_rows = keep.len();

    if report.excluded_rows > 0 {
        metrics::counter!("join_excluded_rows_total").increment(report.excluded_rows as u64);
        tracing::info!(
            joined = report.joined_rows,
            excluded_rows = report.excluded_rows,
            excluded_sites = report.excluded_sites.len(),
            "site metadata join dropped observations"
        );
    }

    let joined = table.select(&keep).with_locations(locations)?;
    Ok((joined, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamflow_domain::domain::{Observation, Unit, Variable};
    use time::macros::datetime;

    fn site(id: &str, longitude: f64) -> SiteMetadata {
        SiteMetadata {
            site_id: id.to_string(),
            longitude,
            latitude: 40.0,
            elevation: 150.0,
        }
    }

    fn raw(sites: &[&str]) -> ObservationTable {
        let ts = datetime!(2013-06-01 12:00:00 UTC);
        ObservationTable::new(
            Variable::of_unit(Unit::CubicFeetPerSecond),
            sites
                .iter()
                .enumerate()
                .map(|(i, s)| Observation::new(*s, ts, Some(i as f64), 0))
                .collect(),
        )
    }

    #[test]
    fn sites_without_metadata_are_excluded_and_counted() {
        let (joined, report) =
            join_site_metadata(&raw(&["A", "B", "C"]), &[site("A", -89.9), site("C", -88.0)]).unwrap();

        assert_eq!(joined.len(), 2);
        assert_eq!(report.joined_rows, 2);
        assert_eq!(report.excluded_rows, 1);
        assert_eq!(report.excluded_sites, BTreeSet::from(["B".to_string()]));

        let ids: Vec<_> = joined.rows().iter().map(|r| r.site_id.as_str()).collect();
        assert_eq!(ids, ["A", "C"]);
        let locs = joined.locations().unwrap();
        assert_eq!(locs[0].longitude, -89.9);
        assert_eq!(locs[1].longitude, -88.0);
    }

    #[test]
    fn repeated_rows_for_a_missing_site_count_once_per_site() {
        let (joined, report) = join_site_metadata(&raw(&["B", "A", "B", "B"]), &[site("A", 0.0)]).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(report.excluded_rows, 3);
        assert_eq!(report.excluded_sites.len(), 1);
    }

    #[test]
    fn empty_inputs_join_to_empty_tables() {
        let (joined, report) = join_site_metadata(&raw(&[]), &[site("A", 0.0)]).unwrap();
        assert!(joined.is_empty());
        assert_eq!(joined.locations().map(<[_]>::len), Some(0));
        assert_eq!(report, JoinReport::default());
    }
}
