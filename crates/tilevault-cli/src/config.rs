use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

/// Top-level config. Unknown keys are ignored, so the log issuance
/// service's own config file can be reused as is.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "Logs", default)]
    pub logs: Vec<LogConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Label for logs and metrics.
    #[serde(rename = "ShortName", default)]
    pub short_name: String,

    /// Directory holding this log's `log.v3.json`, `checkpoint` and `tile/`.
    #[serde(rename = "LocalDirectory", default)]
    pub local_directory: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&yaml).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate. Every log must be complete before any is touched.
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for (i, log) in self.logs.iter().enumerate() {
            if log.short_name.is_empty() {
                bail!("log #{}: missing ShortName", i + 1);
            }
            if log.local_directory.as_os_str().is_empty() {
                bail!("log {}: missing LocalDirectory", log.short_name);
            }
            if !seen.insert(log.short_name.as_str()) {
                bail!("log {}: duplicate ShortName", log.short_name);
            }
        }
        Ok(())
    }
}
