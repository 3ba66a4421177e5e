pub mod accelerator;
pub mod hardware;
pub mod model;
pub mod simulation;

pub use accelerator::{AcceleratorConfig, InterfaceType, PimConfig, PimEnergyTable, PimType};
pub use hardware::{DeviceClass, DeviceConfig, EnergyTable, GpuOverrides, GpuType, ScalingConfig};
pub use model::{ModelConfig, ModelFamily, Precision};
pub use simulation::{MemorySimulatorConfig, OutputConfig, ScenarioConfig};

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, SimError};
use crate::memsim::Ramulator;
use crate::simulation::System;

/// Shape of the deployed system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemKind {
    /// GPUs only
    Dgx,
    /// GPUs with attention offloaded to the host CPUs
    DgxCpu,
    /// GPUs with attention offloaded to attention-in-memory modules
    DgxAttacc,
}

impl FromStr for SystemKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dgx" => Ok(SystemKind::Dgx),
            "dgx-cpu" => Ok(SystemKind::DgxCpu),
            "dgx-attacc" => Ok(SystemKind::DgxAttacc),
            _ => Err(SimError::UnknownDevice(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub kind: SystemKind,

    pub gpu: GpuType,

    #[serde(flatten)]
    pub overrides: GpuOverrides,
}

/// A `[model]` table either names a preset or spells out every field
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ModelSection {
    Preset { preset: String, precision: Precision },
    Custom(ModelConfig),
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    system: SystemConfig,
    model: ModelSection,
    #[serde(default)]
    accelerator: Option<AcceleratorConfig>,
    scenario: ScenarioConfig,
    #[serde(default)]
    scaling: ScalingConfig,
    #[serde(default)]
    memory_simulator: MemorySimulatorConfig,
    #[serde(default)]
    output: OutputConfig,
}

/// Top-level configuration that aggregates all sub-configs
#[derive(Debug, Clone)]
pub struct Config {
    pub system: SystemConfig,
    pub model: ModelConfig,
    pub accelerator: Option<AcceleratorConfig>,
    pub scenario: ScenarioConfig,
    pub scaling: ScalingConfig,
    pub memory_simulator: MemorySimulatorConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents)?;

        // Resolve presets into a full model record
        let model = match raw.model {
            ModelSection::Preset { preset, precision } => ModelConfig::preset(&preset, precision)?,
            ModelSection::Custom(model) => model,
        };

        // Bank-level modules unless told otherwise
        let accelerator = match raw.system.kind {
            SystemKind::DgxAttacc => Some(
                raw.accelerator
                    .unwrap_or_else(|| AcceleratorConfig::new(PimType::Bank)),
            ),
            SystemKind::Dgx | SystemKind::DgxCpu => raw.accelerator,
        };

        let config = Config {
            system: raw.system,
            model,
            accelerator,
            scenario: raw.scenario,
            scaling: raw.scaling,
            memory_simulator: raw.memory_simulator,
            output: raw.output,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject device counts that leave nothing to partition
    fn validate(&self) -> Result<()> {
        let devices = self.primary_device().num_devices;
        if devices == 0 {
            return Err(SimError::InvalidConfig(
                "num_devices must be at least 1".to_string(),
            ));
        }
        if self.model.num_heads < devices {
            return Err(SimError::InvalidConfig(format!(
                "{} heads cannot be split across {} devices",
                self.model.num_heads, devices
            )));
        }
        if let Some(accel) = &self.accelerator {
            if accel.num_modules == 0 || accel.num_stacks == 0 {
                return Err(SimError::InvalidConfig(
                    "accelerator needs at least one module and one stack".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn primary_device(&self) -> DeviceConfig {
        DeviceConfig::gpu(self.system.gpu, &self.system.overrides)
    }

    /// Construct the simulated system described by this configuration
    pub fn build_system(&self) -> Result<System> {
        let gpu = self.primary_device();
        let model = self.model.clone();

        let system = match self.system.kind {
            SystemKind::Dgx => System::homogeneous(model, gpu, self.scaling),
            SystemKind::DgxCpu => {
                let cpu = DeviceConfig::host_cpu(self.system.gpu);
                System::with_cpu(model, gpu, cpu, self.scaling)
            }
            SystemKind::DgxAttacc => {
                let accel = self
                    .accelerator
                    .clone()
                    .unwrap_or_else(|| AcceleratorConfig::new(PimType::Bank));
                let pim = PimConfig::new(&accel, self.scenario.power_constraint);
                let oracle = Ramulator::new(&self.memory_simulator, pim.num_stacks)?;
                System::with_pim(model, gpu, pim, Box::new(oracle), self.scaling)
            }
        };
        Ok(system)
    }
}
