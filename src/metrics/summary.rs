use std::ops::AddAssign;

use serde::Serialize;

/// Named per-category accumulators that also know their result-log columns
macro_rules! category_vector {
    ($(#[$meta:meta])* $name:ident { $($field:ident => $column:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
        pub struct $name {
            $(pub $field: f64,)+
        }

        impl $name {
            pub const COLUMNS: &'static [&'static str] = &[$($column),+];

            pub fn values(&self) -> Vec<f64> {
                vec![$(self.$field),+]
            }

            pub fn scaled(&self, factor: f64) -> Self {
                Self {
                    $($field: self.$field * factor,)+
                }
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                $(self.$field += rhs.$field;)+
            }
        }
    };
}

category_vector! {
    /// Summarization (prefill) time per category
    SummarizationTimes {
        all => "s_time",
        matmul => "s_matmul",
        fc => "s_fc",
        comm => "s_comm",
        softmax => "s_softmax",
        act => "s_act",
        norm => "s_lnorm",
    }
}

category_vector! {
    /// Time of one generation step per category
    GenerationTimes {
        all => "g_time (ms)",
        matmul => "g_matmul",
        fc => "g_fc",
        comm => "g_comm",
        etc => "g_etc",
        qkv => "g_qkv_time",
        proj => "g_prj_time",
        ff => "g_ff_time",
        g2g => "g2g_comm",
        x2g => "c2g_comm",
        softmax => "g_softmax",
        act => "g_act",
        norm => "g_lnorm",
    }
}

category_vector! {
    /// Energy of one generation step, by memory level and by operation class
    GenerationEnergy {
        all => "g_energy (nJ)",
        off_chip => "g_dram_energy",
        l2 => "g_l2_energy",
        l1 => "g_l1_energy",
        reg => "g_reg_energy",
        alu => "g_alu_energy",
        fc_mem => "g_fc_mem_energy",
        fc_comp => "g_fc_comp_energy",
        attn_mem => "g_attn_mem_energy",
        attn_comp => "g_attn_comp_energy",
        etc_mem => "g_etc_mem_energy",
        etc_comp => "g_etc_comp_energy",
        comm => "g_comm_energy",
    }
}

/// Identifies the system a record was produced on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemTag {
    pub model: String,
    pub precision: String,
    pub device: String,
    /// Total memory capacity in GiB
    pub capacity_gib: u64,
    /// Accelerator over GPU bandwidth (1 when homogeneous)
    pub bandwidth_ratio: f64,
    /// GPU ops per byte of off-chip bandwidth
    pub ops_per_byte: f64,
}

impl SystemTag {
    pub const COLUMNS: &'static [&'static str] = &["model", "dtype", "xpu", "cap", "bw", "sys_opb"];

    fn row(&self) -> Vec<String> {
        vec![
            self.model.clone(),
            self.precision.clone(),
            self.device.clone(),
            self.capacity_gib.to_string(),
            self.bandwidth_ratio.to_string(),
            self.ops_per_byte.to_string(),
        ]
    }
}

/// Scenario parameters echoed into the record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioEcho {
    /// NONE, CPU, or the accelerator variant
    pub accelerator: String,
    pub num_devices: u64,
    pub pipelining: bool,
    pub ff_overlap: bool,
    pub power_constraint: bool,
    pub gqa_size: u64,
    pub input_len: u64,
    pub output_len: u64,
    pub batch_size: u64,
    /// Bytes of weights, KV cache and activations
    pub required_capacity: f64,
    pub summarization_flops: f64,
    pub generation_flops: f64,
}

impl ScenarioEcho {
    pub const COLUMNS: &'static [&'static str] = &[
        "hw",
        "cores",
        "pipe_level",
        "is parallel",
        "power constraint",
        "gqa_size",
        "Lin",
        "Lout",
        "bs",
        "required_cap",
        "s_flops",
        "g_flops",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.accelerator.clone(),
            self.num_devices.to_string(),
            self.pipelining.to_string(),
            self.ff_overlap.to_string(),
            self.power_constraint.to_string(),
            self.gqa_size.to_string(),
            self.input_len.to_string(),
            self.output_len.to_string(),
            self.batch_size.to_string(),
            self.required_capacity.to_string(),
            self.summarization_flops.to_string(),
            self.generation_flops.to_string(),
        ]
    }
}

/// Result of one simulated scenario.
///
/// Times are in milliseconds for the whole model; energies in nJ per
/// generation step for the whole model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioRecord {
    pub tag: SystemTag,
    pub scenario: ScenarioEcho,
    pub summarization: SummarizationTimes,
    pub generation: GenerationTimes,
    pub energy: GenerationEnergy,
}

impl ScenarioRecord {
    /// Header of the result log, in row order
    pub fn columns() -> Vec<&'static str> {
        [
            SystemTag::COLUMNS,
            ScenarioEcho::COLUMNS,
            SummarizationTimes::COLUMNS,
            GenerationTimes::COLUMNS,
            GenerationEnergy::COLUMNS,
        ]
        .concat()
    }

    pub fn row(&self) -> Vec<String> {
        let mut row = self.tag.row();
        row.extend(self.scenario.row());
        row.extend(
            self.summarization
                .values()
                .into_iter()
                .chain(self.generation.values())
                .chain(self.energy.values())
                .map(|v| v.to_string()),
        );
        row
    }

    /// Per-token generation latency (ms)
    pub fn latency_ms(&self) -> f64 {
        self.generation.all
    }

    /// Generated tokens per second across the batch
    pub fn throughput(&self) -> f64 {
        self.scenario.batch_size as f64 / (self.generation.all / 1000.0)
    }

    pub fn print(&self) {
        println!("\n=== Scenario Result ===\n");
        println!(
            "System: {} {} x{} ({}), {} GiB",
            self.tag.model,
            self.tag.precision,
            self.scenario.num_devices,
            self.scenario.accelerator,
            self.tag.capacity_gib
        );
        println!(
            "Scenario: batch={}, Lin={}, Lout={}, pipe={}, ff={}, power limit={}",
            self.scenario.batch_size,
            self.scenario.input_len,
            self.scenario.output_len,
            self.scenario.pipelining,
            self.scenario.ff_overlap,
            self.scenario.power_constraint
        );
        println!("\nSummarization: {:.3} ms", self.summarization.all);
        println!("Generation:    {:.3} ms/token", self.generation.all);
        println!("Throughput:    {:.2} tokens/s", self.throughput());
        println!("Energy:        {:.1} nJ/token", self.energy.all);
    }

    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            tag: SystemTag {
                model: "GPT-175B".to_string(),
                precision: "W16A16".to_string(),
                device: "GPU".to_string(),
                capacity_gib: 640,
                bandwidth_ratio: 1.0,
                ops_per_byte: 93.0,
            },
            scenario: ScenarioEcho {
                accelerator: "NONE".to_string(),
                num_devices: 8,
                pipelining: false,
                ff_overlap: false,
                power_constraint: false,
                gqa_size: 1,
                input_len: 2048,
                output_len: 128,
                batch_size: 4,
                required_capacity: 1.0e9,
                summarization_flops: 2.0e12,
                generation_flops: 1.0e10,
            },
            summarization: SummarizationTimes {
                all: 10.0,
                ..Default::default()
            },
            generation: GenerationTimes {
                all: 20.0,
                fc: 15.0,
                ..Default::default()
            },
            energy: GenerationEnergy {
                all: 5.0,
                ..Default::default()
            },
        }
    }
}
