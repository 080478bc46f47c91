use serde::Deserialize;
use std::{fs, path::PathBuf};
use streamflow_domain::domain::Unit;

use crate::sinks::ObsSeqOptions;
use crate::transform::{
    error_model::ErrorModel,
    slicing::{DuplicateSitePolicy, Partition},
    variance::SampleScope,
    QcPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Csv,
    /// Pipe-delimited text with a CSV-style header.
    Dat,
    Ndjson,
}

fn default_value_column() -> String {
    "discharge".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub observations: PathBuf,
    pub format: InputFormat,
    /// Unit of the values in the observation file.
    pub unit: Unit,
    #[serde(default = "default_value_column")]
    pub value_column: String,
    /// Site metadata CSV (`site_id, longitude, latitude, elevation`).
    pub sites: PathBuf,
    /// Count unparseable rows instead of failing the batch.
    #[serde(default)]
    pub lenient: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    pub accepted_quality: Option<Vec<i32>>,
    pub allow_negative: bool,
}

impl From<QcConfig> for QcPolicy {
    fn from(c: QcConfig) -> Self {
        QcPolicy {
            accepted_quality: c.accepted_quality,
            allow_negative: c.allow_negative,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VarianceConfig {
    /// Write variance (true) or standard deviation (false).
    pub as_variance: bool,
    #[serde(default)]
    pub scope: SampleScope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoundingConfig {
    pub minutes: u32,
    #[serde(default)]
    pub partition: Partition,
    #[serde(default)]
    pub duplicates: DuplicateSitePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObsSeqConfig {
    pub out_dir: PathBuf,
    #[serde(flatten)]
    pub options: ObsSeqOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSliceConfig {
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text file written when the batch ends.
    pub textfile: PathBuf,
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub input: InputConfig,
    #[serde(default)]
    pub qc: QcConfig,
    pub error_model: ErrorModel,
    pub variance: VarianceConfig,
    pub rounding: RoundingConfig,
    pub obs_seq: Option<ObsSeqConfig>,
    pub time_slice: Option<TimeSliceConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("STREAMFLOW_CONFIG").unwrap_or_else(|_| "streamflow-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.obs_seq.is_none() && cfg.time_slice.is_none() {
            anyhow::bail!("config enables no writer: add an [obs_seq] or [time_slice] section");
        }
        Ok(cfg)
    }
}
