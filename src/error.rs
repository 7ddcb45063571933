use std::{io, path::PathBuf};

use thiserror::Error;

/// Rejected sampler configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplerError {
    #[error("sampling interval must be positive")]
    ZeroInterval,
    #[error("maximum stack depth must be positive")]
    ZeroMaxDepth,
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Failure to save or load a `Profile`.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to access profile {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode profile as YAML: {0}")]
    Encode(#[source] serde_yaml::Error),
    #[error("failed to decode profile {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
