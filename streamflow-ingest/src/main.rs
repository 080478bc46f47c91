use anyhow::Result;
use streamflow_ingest::{batch, config::AppConfig, metrics_export, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing()?;

    // Load configuration
    let cfg = AppConfig::load()?;

    if cfg.metrics.is_some() {
        metrics_export::init()?;
    }

    let outcome = batch::run_batch(&cfg).await;

    // Metrics are written even when the batch failed part way.
    if let Some(metrics_cfg) = &cfg.metrics {
        if let Err(e) = metrics_export::write_textfile(&metrics_cfg.textfile) {
            tracing::error!(error = %e, "failed to write metrics textfile");
        }
    }

    let summary = outcome?;
    let failed: Vec<String> = [&summary.obs_seq, &summary.time_slice]
        .into_iter()
        .flatten()
        .flat_map(|r| r.failed.iter().map(|(key, e)| format!("{key}: {e}")))
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} slice(s) failed to write: {}", failed.len(), failed.join("; "));
    }

    Ok(())
}
