use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, SimError};

const GB: f64 = 1000.0 * 1000.0 * 1000.0;
const GIB: u64 = 1024 * 1024 * 1024;

/// Per-stack HBM3 bandwidth seen by the buffer die
const STACK_BANDWIDTH: f64 = 670.4 * GB;

/// Where the processing units sit inside the HBM stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PimType {
    #[serde(rename = "bank")]
    Bank,
    #[serde(rename = "bg")]
    BankGroup,
    #[serde(rename = "buffer")]
    Buffer,
}

impl PimType {
    /// Short name used in result logs and the memory-simulator cache
    pub fn name(self) -> &'static str {
        match self {
            PimType::Bank => "BA",
            PimType::BankGroup => "BG",
            PimType::Buffer => "BUFFER",
        }
    }

    /// Suffix of the command-trace generator for this variant
    pub fn trace_name(self) -> &'static str {
        match self {
            PimType::Bank => "bank",
            PimType::BankGroup => "bg",
            PimType::Buffer => "buffer",
        }
    }

    /// Internal bandwidth multiple over the stack interface (rank x BG x BA / tCCD)
    pub fn bandwidth_scale(self, power_constraint: bool) -> f64 {
        match (self, power_constraint) {
            (PimType::Bank, false) => 2.0 * 4.0 * 4.0 / 2.0,
            (PimType::BankGroup, false) => 2.0 * 4.0,
            (PimType::Buffer, false) => 1.0,
            (PimType::Bank, true) => 9.0,
            (PimType::BankGroup, true) => 3.0,
            (PimType::Buffer, true) => 1.0,
        }
    }

    /// Cell reads per 32-byte column command (pCH x rank x BG x bank)
    pub fn cell_access_multiplier(self) -> f64 {
        match self {
            PimType::Bank => 2.0 * 2.0 * 4.0 * 4.0,
            PimType::BankGroup => 2.0 * 2.0 * 4.0,
            PimType::Buffer => 1.0,
        }
    }
}

impl FromStr for PimType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bank" | "ba" => Ok(PimType::Bank),
            "bg" => Ok(PimType::BankGroup),
            "buffer" => Ok(PimType::Buffer),
            _ => Err(SimError::UnknownDevice(s.to_string())),
        }
    }
}

/// Link between the GPUs and the accelerator modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Nvlink3,
    Nvlink4,
    Pcie4,
    Pcie5,
}

impl InterfaceType {
    pub fn bandwidth(self) -> f64 {
        match self {
            InterfaceType::Nvlink3 => 600.0 * GB,
            InterfaceType::Nvlink4 => 900.0 * GB,
            InterfaceType::Pcie4 => 64.0 * GB,
            InterfaceType::Pcie5 => 128.0 * GB,
        }
    }
}

/// Energy per byte (pJ/B) of the attention-in-memory accelerator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PimEnergyTable {
    /// Cell activation plus the column path up to the processing unit
    pub cell: f64,
    pub sram: f64,
    pub alu: f64,
    /// Interposer, TSV, GIO mux, bank-group mux
    pub io: [f64; 4],
    pub comm: f64,
}

impl PimEnergyTable {
    pub fn for_type(pim_type: PimType) -> Self {
        let cell = match pim_type {
            PimType::Bank => (0.11 + 0.44) * 8.0,
            PimType::BankGroup => (0.11 + 0.44 + 1.01) * 8.0,
            PimType::Buffer => (0.11 + 0.44 + 1.01 + 1.23 + 0.5) * 8.0,
        };
        Self {
            cell,
            sram: 0.0034,
            alu: 0.32,
            io: [0.3, 0.5, 1.23, 1.01],
            comm: 10.4,
        }
    }
}

fn default_interface() -> InterfaceType {
    InterfaceType::Nvlink3
}

fn default_num_modules() -> u64 {
    8
}

fn default_num_stacks() -> u64 {
    5
}

/// `[accelerator]` section of the TOML configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AcceleratorConfig {
    pub pim_type: PimType,

    #[serde(default = "default_interface")]
    pub interface: InterfaceType,

    #[serde(default = "default_num_modules")]
    pub num_modules: u64,

    #[serde(default = "default_num_stacks")]
    pub num_stacks: u64,

    /// Overrides the variant's internal bandwidth multiple
    #[serde(default)]
    pub bandwidth_scale: Option<f64>,
}

impl AcceleratorConfig {
    pub fn new(pim_type: PimType) -> Self {
        Self {
            pim_type,
            interface: default_interface(),
            num_modules: default_num_modules(),
            num_stacks: default_num_stacks(),
            bandwidth_scale: None,
        }
    }
}

/// Capability record of the attention-in-memory accelerator
#[derive(Debug, Clone)]
pub struct PimConfig {
    pub pim_type: PimType,
    pub power_constraint: bool,

    /// Accelerator modules (one per GPU)
    pub num_modules: u64,

    /// HBM stacks per module
    pub num_stacks: u64,

    pub capacity_per_stack: u64,
    pub bandwidth_per_stack: f64,
    /// Fixed internal bandwidth multiple, ignoring the power budget
    pub bandwidth_scale: Option<f64>,
    pub softmax_bandwidth: f64,
    pub softmax_flops: f64,
    pub interface_bandwidth: f64,
    pub energy: PimEnergyTable,
}

impl PimConfig {
    pub fn new(accel: &AcceleratorConfig, power_constraint: bool) -> Self {
        let softmax_bandwidth = STACK_BANDWIDTH * accel.num_stacks as f64;

        let mut config = Self {
            pim_type: accel.pim_type,
            power_constraint,
            num_modules: accel.num_modules,
            num_stacks: accel.num_stacks,
            capacity_per_stack: 16 * GIB,
            bandwidth_per_stack: 0.0,
            bandwidth_scale: accel.bandwidth_scale,
            softmax_bandwidth,
            softmax_flops: softmax_bandwidth,
            interface_bandwidth: accel.interface.bandwidth(),
            energy: PimEnergyTable::for_type(accel.pim_type),
        };
        config.set_power_constraint(power_constraint);
        config
    }

    /// Switch the power budget, re-deriving the internal bandwidth
    pub fn set_power_constraint(&mut self, power_constraint: bool) {
        let scale = self
            .bandwidth_scale
            .unwrap_or_else(|| self.pim_type.bandwidth_scale(power_constraint));
        self.power_constraint = power_constraint;
        self.bandwidth_per_stack = STACK_BANDWIDTH * scale;
    }

    /// Internal bandwidth of one module
    pub fn peak_memory_bandwidth(&self) -> f64 {
        self.bandwidth_per_stack * self.num_stacks as f64
    }

    pub fn aggregate_memory_capacity(&self) -> u64 {
        self.capacity_per_stack * self.num_modules * self.num_stacks
    }
}
