use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::pipeline::PipelineError;

/// One file produced by a slice writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    /// Observation records written.
    pub records: usize,
    /// Rows left out because their value (or error) was missing.
    pub dropped_missing: usize,
    /// blake3 hex digest of the file contents.
    pub digest: String,
}

/// Writes `bytes` to `path` through a temp file in the same directory and a
/// rename, so readers see either the old file or the complete new one.
pub(crate) fn persist(
    path: &Path,
    bytes: &[u8],
    records: usize,
    dropped_missing: usize,
) -> Result<WrittenArtifact, PipelineError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| PipelineError::io(path, e.error))?;

    Ok(WrittenArtifact {
        path: path.to_path_buf(),
        records,
        dropped_missing,
        digest: blake3::hash(bytes).to_hex().to_string(),
    })
}

/// Shortest text that reads back as the same `f64`, always with a decimal
/// point or exponent (`350.0`, `0.1`, `1e-7`).
pub(crate) fn fmt_real(v: f64) -> String {
    format!("{v:?}")
}
