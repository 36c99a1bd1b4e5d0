//! Layered configuration loading: defaults, then an optional TOML file, then environment
//! variables (`MEMTSDB_*`). Only fields present in a layer override the ones below it.

use crate::engine::EngineConfig;
use crate::error::TsdbError;
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment prefix used by [`load_config`].
pub const ENV_PREFIX: &str = "MEMTSDB";

/// Engine settings as read from file + env. Every field optional for layering.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineFileConfig {
    /// Retention horizon in seconds; `0` disables retention.
    pub retention_secs: Option<u64>,
    pub retention_check_interval_secs: Option<u64>,
    pub partition_count: Option<usize>,
}

impl EngineFileConfig {
    /// Overwrites the fields of `base` that are set here.
    pub fn merge_into(&self, base: &mut EngineConfig) {
        if let Some(secs) = self.retention_secs {
            base.retention = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = self.retention_check_interval_secs {
            base.retention_check_interval = Some(Duration::from_secs(secs));
        }
        if let Some(n) = self.partition_count {
            base.partition_count = n;
        }
    }
}

/// Loads an [`EngineConfig`] from `path` (if given) and `MEMTSDB_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, TsdbError> {
    load_config_with_prefix(path, ENV_PREFIX)
}

/// Like [`load_config`], reading environment variables under `env_prefix` instead.
///
/// An explicitly named file that does not exist is an error. The result is validated.
pub fn load_config_with_prefix(
    path: Option<&Path>,
    env_prefix: &str,
) -> Result<EngineConfig, TsdbError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(TsdbError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| TsdbError::Config(e.to_string()))?;
    let partial: EngineFileConfig = merged
        .try_deserialize()
        .map_err(|e| TsdbError::Config(e.to_string()))?;

    let mut config = EngineConfig::default();
    partial.merge_into(&mut config);
    config.validate()?;
    Ok(config)
}
