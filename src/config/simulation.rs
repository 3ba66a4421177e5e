use std::path::PathBuf;

use serde::Deserialize;

fn default_projection_split() -> f64 {
    0.75
}

/// One batch scenario to simulate
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub batch_size: u64,

    /// Prompt length in tokens
    pub input_len: u64,

    /// Generated tokens, including the one produced by the summarization pass
    pub output_len: u64,

    /// Overlap QKV/output projections with offloaded attention as well as transfers
    #[serde(default)]
    pub pipelining: bool,

    /// Overlap feed-forward layers with offloaded attention
    #[serde(default)]
    pub ff_overlap: bool,

    /// Run the accelerator under its power budget
    #[serde(default)]
    pub power_constraint: bool,

    /// Total requests to serve; 0 simulates a single batch
    #[serde(default)]
    pub num_requests: u64,

    /// Share of hidden attention time taken from the QKV projection when
    /// projections dominate (the remainder comes from the output projection)
    #[serde(default = "default_projection_split")]
    pub projection_split: f64,
}

impl ScenarioConfig {
    pub fn new(batch_size: u64, input_len: u64, output_len: u64) -> Self {
        Self {
            batch_size,
            input_len,
            output_len,
            pipelining: false,
            ff_overlap: false,
            power_constraint: false,
            num_requests: 0,
            projection_split: default_projection_split(),
        }
    }
}

fn default_simulator_dir() -> PathBuf {
    PathBuf::from("./ramulator2")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./ramulator.out")
}

fn default_tck_ns() -> f64 {
    0.769
}

/// Location and behaviour of the external memory-system simulator
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySimulatorConfig {
    /// Directory holding the `ramulator2` binary and `trace_gen/` scripts
    #[serde(default = "default_simulator_dir")]
    pub dir: PathBuf,

    /// Persistent result cache (CSV)
    #[serde(default = "default_cache_path")]
    pub cache: PathBuf,

    /// Simulate at most 64 heads per stack and scale the result
    #[serde(default)]
    pub fast_mode: bool,

    /// DRAM clock period in nanoseconds
    #[serde(default = "default_tck_ns")]
    pub tck_ns: f64,
}

impl Default for MemorySimulatorConfig {
    fn default() -> Self {
        Self {
            dir: default_simulator_dir(),
            cache: default_cache_path(),
            fast_mode: false,
            tck_ns: default_tck_ns(),
        }
    }
}

/// Where results are written
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Append-only CSV log of scenario records
    #[serde(default)]
    pub log: Option<PathBuf>,

    /// JSON dump of the last scenario record
    #[serde(default)]
    pub json: Option<PathBuf>,
}
