use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct PyriteConfig {
    #[serde(default = "defaults::region_path")]
    pub region_path: String,
    #[serde(default = "defaults::workers")]
    pub workers: u64,
    #[serde(default = "defaults::iterations")]
    pub iterations: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn region_path() -> String {
        format!("/tmp/pyrite_region_{}", std::process::id())
    }

    pub fn workers() -> u64 {
        10
    }

    pub fn iterations() -> u64 {
        10_000
    }
}

impl Default for PyriteConfig {
    fn default() -> Self {
        Self {
            region_path: defaults::region_path(),
            workers: defaults::workers(),
            iterations: defaults::iterations(),
        }
    }
}

impl PyriteConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: PyriteConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
