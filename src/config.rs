use std::{env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::SamplerError;

/// Deepest stack captured by default.
pub const DEFAULT_MAX_DEPTH: usize = 2048;

pub const ENV_INTERVAL: &str = "ALLOC_SAMPLER_INTERVAL";
pub const ENV_MAX_DEPTH: &str = "ALLOC_SAMPLER_MAX_DEPTH";
pub const ENV_DIR: &str = "ALLOC_SAMPLER_DIR";

/// Sampler settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Capture one allocation out of every `interval`.
    pub interval: usize,
    /// Frames captured per stack; deeper frames are cut off.
    pub max_depth: usize,
    /// Where per-thread profiles are written by the native allocator.
    /// Current directory when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: 1,
            max_depth: DEFAULT_MAX_DEPTH,
            output_dir: None,
        }
    }
}

impl SamplerConfig {
    pub fn with_interval(interval: usize) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.interval == 0 {
            return Err(SamplerError::ZeroInterval);
        }
        if self.max_depth == 0 {
            return Err(SamplerError::ZeroMaxDepth);
        }
        Ok(())
    }

    /// Defaults overridden by `ALLOC_SAMPLER_INTERVAL`, `ALLOC_SAMPLER_MAX_DEPTH`
    /// and `ALLOC_SAMPLER_DIR`.
    pub fn from_env() -> Result<Self, SamplerError> {
        let mut config = Self::default();
        if let Some(interval) = parse_env(ENV_INTERVAL)? {
            config.interval = interval;
        }
        if let Some(max_depth) = parse_env(ENV_MAX_DEPTH)? {
            config.max_depth = max_depth;
        }
        if let Some(dir) = env::var_os(ENV_DIR) {
            config.output_dir = Some(PathBuf::from(dir));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, SamplerError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SamplerError::InvalidEnv { name, value }),
        Err(_) => Ok(None),
    }
}
