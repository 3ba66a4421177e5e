pub mod collector;
pub mod log;
pub mod summary;

pub use collector::{BatchMetrics, MetricsCollector};
pub use self::log::ResultLog;
pub use summary::{
    GenerationEnergy, GenerationTimes, ScenarioEcho, ScenarioRecord, SummarizationTimes, SystemTag,
};
