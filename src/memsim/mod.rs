pub mod ramulator;

pub use ramulator::Ramulator;

use serde::{Deserialize, Serialize};

use crate::config::PimType;
use crate::error::Result;

/// Bytes of one column command
const ACCESS_GRANULARITY: f64 = 32.0;

/// One attention block to be priced on the in-memory accelerator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttentionQuery {
    pub pim_type: PimType,
    /// Tokens in the KV cache
    pub context_len: u64,
    /// Attention heads handled by one module (heads x batch / modules)
    pub num_heads: u64,
    pub head_dim: u64,
    pub dbyte: u64,
    pub power_constraint: bool,
}

/// Bytes moved through each level of the stack, summed over all stacks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PimTraffic {
    /// Silicon interposer
    pub interposer: f64,
    pub tsv: f64,
    /// Global IO to bank-group mux
    pub gio_mux: f64,
    /// Bank-group mux to column decoder
    pub bg_mux: f64,
    /// DRAM cell reads
    pub cell: f64,
}

impl PimTraffic {
    /// Traffic on the IO path, ordered like `PimEnergyTable::io`
    pub fn io(&self) -> [f64; 4] {
        [self.interposer, self.tsv, self.gio_mux, self.bg_mux]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttentionCost {
    /// Seconds
    pub time: f64,
    pub traffic: PimTraffic,
}

/// Source of cycle-accurate attention costs
pub trait MemorySimulator {
    fn attention_cost(&mut self, query: &AttentionQuery) -> Result<AttentionCost>;
}

/// Command counts reported by one simulator run (single stack)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCounters {
    pub cycles: u64,
    pub mac: u64,
    pub softmax: u64,
    /// Moves into the GEMV buffer
    pub mvgb: u64,
    /// Moves into the softmax buffer
    pub mvsb: u64,
    /// Writes into the GEMV buffer
    pub wrgb: u64,
}

impl CommandCounters {
    /// Scale single-stack counts to `num_stacks` stacks, each running
    /// `group` back-to-back copies of the simulated head set.
    pub fn cost(&self, pim_type: PimType, num_stacks: u64, group: u64, tck_ns: f64) -> AttentionCost {
        let scale = (num_stacks * group) as f64;
        let moved = (self.wrgb + self.mvsb + self.mvgb) as f64 * ACCESS_GRANULARITY * scale;
        let traffic = PimTraffic {
            interposer: self.wrgb as f64 * ACCESS_GRANULARITY * scale,
            tsv: moved,
            gio_mux: moved,
            bg_mux: moved,
            cell: self.mac as f64 * ACCESS_GRANULARITY * pim_type.cell_access_multiplier() * scale,
        };

        AttentionCost {
            time: tck_ns * self.cycles as f64 * 1e-9 * group as f64,
            traffic,
        }
    }
}

/// Deterministic stand-in used by unit tests: cost grows linearly with
/// context length and heads.
#[cfg(test)]
pub struct LinearOracle {
    pub seconds_per_token_head: f64,
    pub queries: Vec<AttentionQuery>,
}

#[cfg(test)]
impl LinearOracle {
    pub fn new(seconds_per_token_head: f64) -> Self {
        Self {
            seconds_per_token_head,
            queries: Vec::new(),
        }
    }
}

#[cfg(test)]
impl MemorySimulator for LinearOracle {
    fn attention_cost(&mut self, query: &AttentionQuery) -> Result<AttentionCost> {
        self.queries.push(*query);
        let work = (query.context_len * query.num_heads) as f64;
        let bytes = work * (query.head_dim * query.dbyte) as f64;
        // the power-limited timing preset runs at half rate
        let rate = if query.power_constraint { 2.0 } else { 1.0 };
        Ok(AttentionCost {
            time: self.seconds_per_token_head * work * rate,
            traffic: PimTraffic {
                interposer: bytes / 64.0,
                tsv: bytes / 32.0,
                gio_mux: bytes / 32.0,
                bg_mux: bytes / 32.0,
                cell: 2.0 * bytes,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> CommandCounters {
        CommandCounters {
            cycles: 1000,
            mac: 10,
            softmax: 4,
            mvgb: 2,
            mvsb: 3,
            wrgb: 5,
        }
    }

    #[test]
    fn test_counter_post_processing() {
        let cost = counters().cost(PimType::Bank, 5, 1, 0.769);
        assert!((cost.time - 769e-9).abs() < 1e-15);
        assert_eq!(cost.traffic.interposer, 5.0 * 32.0 * 5.0);
        assert_eq!(cost.traffic.tsv, 10.0 * 32.0 * 5.0);
        assert_eq!(cost.traffic.gio_mux, cost.traffic.tsv);
        assert_eq!(cost.traffic.cell, 10.0 * 32.0 * 64.0 * 5.0);
    }

    #[test]
    fn test_cell_multiplier_by_variant() {
        let bg = counters().cost(PimType::BankGroup, 1, 1, 1.0);
        let buffer = counters().cost(PimType::Buffer, 1, 1, 1.0);
        assert_eq!(bg.traffic.cell, 10.0 * 32.0 * 16.0);
        assert_eq!(buffer.traffic.cell, 10.0 * 32.0);
    }

    #[test]
    fn test_group_scales_time_and_traffic() {
        let one = counters().cost(PimType::Bank, 5, 1, 0.769);
        let three = counters().cost(PimType::Bank, 5, 3, 0.769);
        assert!((three.time - 3.0 * one.time).abs() < 1e-15);
        assert_eq!(three.traffic.cell, 3.0 * one.traffic.cell);
        assert_eq!(three.traffic.io()[0], 3.0 * one.traffic.io()[0]);
    }
}
