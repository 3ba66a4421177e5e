use std::path::PathBuf;

use thiserror::Error;

use crate::graph::OpKind;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown model family: {0}")]
    UnknownModelFamily(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unsupported precision {precision} for operation '{op}'")]
    UnsupportedPrecision { precision: String, op: String },

    #[error("{device} cannot evaluate {kind:?} operation '{op}'")]
    UnsupportedOperation {
        device: String,
        kind: OpKind,
        op: String,
    },

    #[error("Memory simulator not installed at {0}")]
    MemorySimulatorUnavailable(PathBuf),

    #[error("Memory simulator failed: {0}")]
    MemorySimulatorFailed(String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
