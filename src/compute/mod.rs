pub mod arithmetic;
pub mod engine;
pub mod pim;

pub use arithmetic::TileConfig;
pub use engine::ComputeEngine;
pub use pim::PimDevice;

use crate::error::Result;
use crate::graph::{Energy, Operation};

/// Time (seconds) and energy (pJ) of one evaluated operation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluation {
    pub time: f64,
    pub energy: Energy,
}

/// A device that can price operations.
///
/// `evaluate` also records time, energy, bound and off-chip traffic on the
/// operation itself.
pub trait DeviceModel {
    fn name(&self) -> &str;

    fn evaluate(&mut self, op: &mut Operation) -> Result<Evaluation>;

    /// Peak off-chip (internal, for in-memory devices) bandwidth of one device
    fn peak_memory_bandwidth(&self) -> f64;

    /// Memory capacity summed over every device of the fleet
    fn aggregate_memory_capacity(&self) -> u64;

    /// Run under (or lift) the device's power budget
    fn set_power_constraint(&mut self, _power_constraint: bool) {}
}
