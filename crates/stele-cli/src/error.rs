//! Errors raised by the batch runner outside the compositing core.

use std::path::PathBuf;

use stele_pipeline::InputError;
use stele_pipeline::error::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to decode {}: {source}", path.display())]
    Decode { path: PathBuf, source: InputError },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("artifact {id}: {source}")]
    Assignment { id: String, source: InputError },

    #[error("error parsing --config-json: {0}")]
    Config(serde_json::Error),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to serialize the run report: {0}")]
    Report(serde_json::Error),

    #[error("failed to configure thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
