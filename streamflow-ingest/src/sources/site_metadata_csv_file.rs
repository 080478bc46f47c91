use std::path::Path;

use streamflow_domain::domain::SiteMetadata;

use crate::pipeline::PipelineError;

/// Reads the gauge site table: header columns `site_id, longitude,
/// latitude, elevation`, any extra columns ignored.
///
/// The table is small and needed whole before the join, so it is read
/// eagerly rather than streamed.
pub fn load_site_metadata(path: impl AsRef<Path>) -> Result<Vec<SiteMetadata>, PipelineError> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", path.display())))?;

    let mut sites = Vec::new();
    for (line, result) in rdr.deserialize::<SiteMetadata>().enumerate() {
        let site = result.map_err(|e| {
            PipelineError::Source(format!("invalid site metadata row {} in {}: {e}", line + 1, path.display()))
        })?;
        sites.push(site);
    }

    tracing::info!(path = %path.display(), sites = sites.len(), "loaded site metadata");
    Ok(sites)
}
