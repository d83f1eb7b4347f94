use packmc_core::core::io::ramsnap::SnapshotError;
use packmc_core::engine::error::{PackingError, SimulationError};
use packmc_core::engine::scalers::ScalerError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Packing(#[from] PackingError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse '{path}': {source}", path = path.display())]
    ConfigParsing {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid run state: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
