use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::graph::Activation;

/// Weight/activation precision of the deployed model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    W16A16,
    W16A8,
    W8A16,
    W8A8,
}

impl Precision {
    pub fn name(self) -> &'static str {
        match self {
            Precision::W16A16 => "W16A16",
            Precision::W16A8 => "W16A8",
            Precision::W8A16 => "W8A16",
            Precision::W8A8 => "W8A8",
        }
    }

    /// Bytes per stored weight
    pub fn weight_bytes(self) -> u64 {
        match self {
            Precision::W16A16 | Precision::W16A8 => 2,
            Precision::W8A16 | Precision::W8A8 => 1,
        }
    }

    /// Bytes per activation / KV cache element
    pub fn activation_bytes(self) -> u64 {
        match self {
            Precision::W16A16 | Precision::W8A16 => 2,
            Precision::W16A8 | Precision::W8A8 => 1,
        }
    }

    /// Element width used by the operation cost formulas.
    /// Mixed precisions have no operation-level model.
    pub fn element_bytes(self) -> Option<u64> {
        match self {
            Precision::W16A16 => Some(2),
            Precision::W8A8 => Some(1),
            Precision::W16A8 | Precision::W8A16 => None,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "W16A16" | "FP16" | "2" => Ok(Precision::W16A16),
            "W16A8" => Ok(Precision::W16A8),
            "W8A16" => Ok(Precision::W8A16),
            "W8A8" | "INT8" | "1" => Ok(Precision::W8A8),
            _ => Err(SimError::UnsupportedPrecision {
                precision: s.to_string(),
                op: "model".to_string(),
            }),
        }
    }
}

/// Model family, selects the feed-forward variant of every decoder layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Gpt,
    Llama,
    Opt,
    Mt,
}

impl ModelFamily {
    /// Infer the family from a preset-style model name ("LLAMA-65B", "OPT-66B", ...)
    pub fn from_model_name(name: &str) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let prefix = upper.split('-').next().unwrap_or_default();
        prefix.parse()
    }

    /// Gated feed-forward: two parallel up-projections feeding a gate
    pub fn is_gated(self) -> bool {
        matches!(self, ModelFamily::Llama)
    }

    pub fn activation(self) -> Activation {
        match self {
            ModelFamily::Llama => Activation::Gated,
            ModelFamily::Opt => Activation::Relu,
            ModelFamily::Gpt | ModelFamily::Mt => Activation::Gelu,
        }
    }
}

impl FromStr for ModelFamily {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpt" => Ok(ModelFamily::Gpt),
            "llama" => Ok(ModelFamily::Llama),
            "opt" => Ok(ModelFamily::Opt),
            "mt" => Ok(ModelFamily::Mt),
            _ => Err(SimError::UnknownModelFamily(s.to_string())),
        }
    }
}

fn default_gqa_size() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name (e.g., "GPT-175B")
    pub name: String,

    pub family: ModelFamily,

    /// Number of decoder layers
    pub num_layers: u64,

    /// Hidden dimension
    pub hidden_dim: u64,

    /// Number of attention heads
    pub num_heads: u64,

    /// Width of a single attention head
    pub head_dim: u64,

    /// Feed-forward expansion ratio (4 for GPT, 8/3 for LLaMA)
    pub ff_scale: f64,

    /// Query heads sharing one KV head (1 = MHA)
    #[serde(default = "default_gqa_size")]
    pub gqa_size: u64,

    pub precision: Precision,
}

// name, layers, hidden, heads, head_dim, ff_scale, gqa
const PRESETS: &[(&str, u64, u64, u64, u64, f64, u64)] = &[
    ("GPT-175B", 96, 12288, 96, 128, 4.0, 1),
    ("GPT-89B", 48, 12288, 96, 128, 4.0, 1),
    ("GPT-13B", 40, 5120, 40, 128, 4.0, 1),
    ("LLAMA-7B", 32, 4096, 32, 128, 8.0 / 3.0, 1),
    ("LLAMA-65B", 80, 8192, 64, 128, 8.0 / 3.0, 1),
    ("MT-76B", 60, 10240, 40, 128, 4.0, 1),
    ("MT-146B", 80, 12288, 80, 128, 4.0, 1),
    ("MT-310B", 96, 16384, 128, 128, 4.0, 1),
    ("MT-530B", 105, 20480, 128, 160, 4.0, 1),
    ("MT-1008B", 128, 25600, 160, 160, 4.0, 1),
    ("OPT-66B", 64, 9216, 72, 128, 4.0, 1),
];

impl ModelConfig {
    /// Look up a built-in model by name
    pub fn preset(name: &str, precision: Precision) -> Result<Self> {
        let &(name, num_layers, hidden_dim, num_heads, head_dim, ff_scale, gqa_size) = PRESETS
            .iter()
            .find(|p| p.0.eq_ignore_ascii_case(name))
            .ok_or_else(|| SimError::UnknownModel(name.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            family: ModelFamily::from_model_name(name)?,
            num_layers,
            hidden_dim,
            num_heads,
            head_dim,
            ff_scale,
            gqa_size,
            precision,
        })
    }

    pub fn preset_names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|p| p.0)
    }

    /// Hidden width owned by one device under tensor parallelism
    pub fn hidden_per_device(&self, tensor_parallel: u64) -> u64 {
        self.hidden_dim / tensor_parallel
    }

    /// Attention heads owned by one device under tensor parallelism
    pub fn heads_per_device(&self, tensor_parallel: u64) -> u64 {
        self.num_heads / tensor_parallel
    }

    /// Feed-forward inner width owned by one device (truncated to whole elements)
    pub fn ff_dim_per_device(&self, tensor_parallel: u64) -> u64 {
        (self.ff_scale * self.hidden_per_device(tensor_parallel) as f64) as u64
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            name: "Test-7B".to_string(),
            family: ModelFamily::Gpt,
            num_layers: 32,
            hidden_dim: 4096,
            num_heads: 32,
            head_dim: 128,
            ff_scale: 4.0,
            gqa_size: 1,
            precision: Precision::W16A16,
        }
    }
}
