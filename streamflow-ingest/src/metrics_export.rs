//! Prometheus metrics for batch runs.
//!
//! The recorder is rendered once, when a batch ends, into a text file for
//! a node-exporter textfile collector.

use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::sinks::artifact::persist;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the global Prometheus recorder. Later calls are no-ops.
pub fn init() -> anyhow::Result<()> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Writes the global recorder's current state to `path`.
pub fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let handle = PROM_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("Prometheus recorder not initialized"))?;
    write_rendered(handle, path)
}

fn write_rendered(handle: &PrometheusHandle, path: &Path) -> anyhow::Result<()> {
    let body = handle.render();
    persist(path, body.as_bytes(), 0, 0)?;
    tracing::info!(path = %path.display(), "wrote metrics textfile");
    Ok(())
}
