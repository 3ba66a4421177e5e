mod footprint;
pub mod pipeline;
mod simulator;

pub use footprint::MemoryFootprint;
pub use pipeline::{FeedForwardOverlap, StepTimes};
pub use simulator::{AcceleratorKind, DeviceRole, System};
