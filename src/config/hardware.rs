use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

const GB: f64 = 1000.0 * 1000.0 * 1000.0;
const TB: f64 = 1000.0 * GB;
const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// GPU generation of the primary device fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuType {
    /// A100 with HBM3
    A100a,
    H100,
}

impl FromStr for GpuType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A100A" | "A100" => Ok(GpuType::A100a),
            "H100" => Ok(GpuType::H100),
            _ => Err(SimError::UnknownDevice(s.to_string())),
        }
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuType::A100a => f.write_str("A100a"),
            GpuType::H100 => f.write_str("H100"),
        }
    }
}

/// Which timing rules a general compute device follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Gpu,
    Cpu,
}

impl DeviceClass {
    pub fn name(self) -> &'static str {
        match self {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
        }
    }
}

/// Energy per byte moved (pJ/B), per memory level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyTable {
    pub reg: f64,
    pub l1: f64,
    pub l2: f64,
    pub alu: f64,
    pub mem: f64,
    pub comm: f64,
}

impl EnergyTable {
    pub fn gpu() -> Self {
        Self {
            reg: 0.0675,
            // 4-way set associative SRAM
            l1: 0.16 * 8.0,
            l2: 0.3 * 8.0,
            alu: 0.32,
            // cell + column path + bank-group mux + TSV + interposer
            mem: (0.11 + 0.44 + 1.01 + 1.23 + 0.5 + 0.3) * 8.0,
            comm: 1.3 * 8.0,
        }
    }

    /// Host energy is not modeled
    pub fn cpu() -> Self {
        Self {
            reg: 0.0,
            l1: 0.0,
            l2: 0.0,
            alu: 0.0,
            mem: 0.0,
            comm: 0.0,
        }
    }
}

/// Achievable fraction of peak throughput
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_max_compute_util")]
    pub max_compute_util: f64,

    #[serde(default = "default_max_memory_util")]
    pub max_memory_util: f64,
}

fn default_max_compute_util() -> f64 {
    0.8
}

fn default_max_memory_util() -> f64 {
    0.85
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            max_compute_util: default_max_compute_util(),
            max_memory_util: default_max_memory_util(),
        }
    }
}

/// Optional overrides applied on top of a GPU preset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpuOverrides {
    pub num_devices: Option<u64>,
    pub peak_flops: Option<f64>,
    pub memory_capacity_gib: Option<u64>,
    pub memory_bandwidth: Option<f64>,
}

/// Static capability record of a general compute device fleet
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub class: DeviceClass,

    /// Number of physical devices (tensor-parallel degree for GPUs)
    pub num_devices: u64,

    /// Streaming multiprocessors / cores per device
    pub num_cores: u64,

    /// Peak FLOPS per device at 16-bit precision
    pub peak_flops: f64,

    /// Memory capacity per device in bytes
    pub memory_capacity: u64,

    /// Off-chip bandwidth per device in bytes/sec
    pub memory_bandwidth: f64,

    /// L2 bandwidth per device in bytes/sec (infinite when not modeled)
    pub l2_bandwidth: f64,

    /// L1 capacity per core in bytes
    pub l1_capacity: u64,

    /// L2 capacity per device in bytes
    pub l2_capacity: u64,

    /// Interface bandwidth (both directions) in bytes/sec
    pub interface_bandwidth: f64,

    pub energy: EnergyTable,
}

impl DeviceConfig {
    /// DGX-class GPU preset
    pub fn gpu(gpu: GpuType, overrides: &GpuOverrides) -> Self {
        let mut config = match gpu {
            GpuType::A100a => Self {
                class: DeviceClass::Gpu,
                num_devices: 8,
                num_cores: 108,
                peak_flops: 312.0 * TB,
                memory_capacity: 80 * GIB,
                memory_bandwidth: 3352.0 * GB,
                l2_bandwidth: f64::INFINITY,
                l1_capacity: 192 * KIB,
                l2_capacity: 40 * MIB,
                interface_bandwidth: 600.0 * GB,
                energy: EnergyTable::gpu(),
            },
            GpuType::H100 => Self {
                class: DeviceClass::Gpu,
                num_devices: 8,
                num_cores: 132,
                peak_flops: 989.4 * TB,
                memory_capacity: 80 * GIB,
                memory_bandwidth: 3352.0 * GB,
                l2_bandwidth: f64::INFINITY,
                l1_capacity: 256 * KIB,
                l2_capacity: 50 * MIB,
                // NVLink4: 450 GB/s per direction
                interface_bandwidth: 900.0 * GB,
                energy: EnergyTable::gpu(),
            },
        };

        if let Some(n) = overrides.num_devices {
            config.num_devices = n;
        }
        if let Some(flops) = overrides.peak_flops {
            config.peak_flops = flops;
        }
        if let Some(cap) = overrides.memory_capacity_gib {
            config.memory_capacity = cap * GIB;
        }
        if let Some(bw) = overrides.memory_bandwidth {
            config.memory_bandwidth = bw;
        }
        config
    }

    /// Host processors of the DGX box hosting `gpu`
    pub fn host_cpu(gpu: GpuType) -> Self {
        match gpu {
            GpuType::A100a => Self {
                class: DeviceClass::Cpu,
                num_devices: 2,
                num_cores: 64,
                peak_flops: 4.0 * TB,
                memory_capacity: 1024 * GIB,
                memory_bandwidth: 200.0 * GB,
                l2_bandwidth: f64::INFINITY,
                l1_capacity: 96 * KIB,
                l2_capacity: 256 * MIB,
                interface_bandwidth: 4.0 * 64.0 * GB,
                energy: EnergyTable::cpu(),
            },
            // Sapphire Rapids: 8 channels x 2 DPC x 4400 MT/s x 8 B
            GpuType::H100 => Self {
                class: DeviceClass::Cpu,
                num_devices: 2,
                num_cores: 56,
                peak_flops: 4.0 * TB,
                memory_capacity: 1024 * GIB,
                memory_bandwidth: 8.0 * 2.0 * 4400.0 * 8.0 * 1000.0 * 1000.0,
                l2_bandwidth: 5.5 * TB,
                l1_capacity: 48 * KIB,
                l2_capacity: 2 * MIB,
                interface_bandwidth: 4.0 * 128.0 * GB,
                energy: EnergyTable::cpu(),
            },
        }
    }

    pub fn aggregate_memory_capacity(&self) -> u64 {
        self.memory_capacity * self.num_devices
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self::gpu(GpuType::A100a, &GpuOverrides::default())
    }
}
