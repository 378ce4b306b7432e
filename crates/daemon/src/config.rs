//! Daemon configuration: a thin YAML wrapper around the pipeline crate's
//! own [`BatchConfig`], following the same load-or-default shape the
//! pipeline library itself uses for host app config.

use pipeline::BatchConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    pub batch: BatchConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
        }
    }
}

/// Loads daemon configuration from `path`. Missing files fall back to
/// defaults (logged at warn level); a present-but-invalid file is an error.
pub fn load_config(path: &str) -> anyhow::Result<DaemonConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config: DaemonConfig = serde_yaml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse daemon config at '{path}': {e}"))?;
            tracing::info!(path, "loaded daemon configuration");
            Ok(config)
        }
        Err(_) => {
            tracing::warn!(path, "no config file found, using defaults");
            Ok(DaemonConfig::default())
        }
    }
}
