pub mod compute;
pub mod config;
pub mod error;
pub mod graph;
pub mod memsim;
pub mod metrics;
pub mod simulation;

// Re-export key types
pub use compute::{ComputeEngine, DeviceModel, PimDevice};
pub use config::Config;
pub use error::{Result, SimError};
pub use graph::{DecodeGraph, Operation};
pub use metrics::{MetricsCollector, ResultLog, ScenarioRecord};
pub use simulation::System;
