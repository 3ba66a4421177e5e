/// Attention-in-memory accelerator device

use super::{DeviceModel, Evaluation};
use crate::config::PimConfig;
use crate::error::{Result, SimError};
use crate::graph::{Bound, Energy, OpKind, OpName, Operation};
use crate::memsim::{AttentionQuery, MemorySimulator};

pub struct PimDevice {
    config: PimConfig,
    oracle: Box<dyn MemorySimulator>,
}

impl PimDevice {
    pub fn new(config: PimConfig, oracle: Box<dyn MemorySimulator>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &PimConfig {
        &self.config
    }

    /// The whole attention block is priced on the score matmul;
    /// the context matmul is folded into it.
    fn attention(&mut self, op: &mut Operation) -> Result<Evaluation> {
        if op.name != OpName::Score {
            op.bound = Bound::Memory;
            return Ok(Evaluation::default());
        }

        let query = AttentionQuery {
            pim_type: self.config.pim_type,
            context_len: op.n,
            num_heads: op.num_op,
            head_dim: op.k,
            dbyte: op.dbyte(),
            power_constraint: self.config.power_constraint,
        };
        let cost = self.oracle.attention_cost(&query)?;

        let table = &self.config.energy;
        let io: f64 = cost
            .traffic
            .io()
            .iter()
            .zip(table.io.iter())
            .map(|(bytes, pj)| bytes * pj)
            .sum();
        let energy = Energy {
            off_chip: cost.traffic.cell * table.cell + io,
            alu: op.flops() / 2.0 * table.alu,
            ..Default::default()
        };

        op.bound = Bound::Memory;
        op.off_traffic = cost.traffic.cell;
        Ok(Evaluation {
            time: cost.time,
            energy: energy * self.config.num_modules as f64,
        })
    }

    /// Softmax runs on the buffer-die units as a roofline
    fn softmax(&self, op: &mut Operation) -> Evaluation {
        let footprint = op.footprint().total();
        let flops = self.config.softmax_flops * (2 / op.dbyte()) as f64;
        let compute = op.flops() / flops;
        let memory = footprint / self.config.softmax_bandwidth;

        op.bound = if compute > memory {
            Bound::Compute
        } else {
            Bound::Memory
        };
        op.off_traffic = footprint;

        let table = &self.config.energy;
        let energy = Energy {
            off_chip: footprint * table.sram,
            alu: op.flops() / 2.0 * table.alu,
            ..Default::default()
        };
        Evaluation {
            time: compute.max(memory),
            energy: energy * self.config.num_modules as f64,
        }
    }

    fn transfer(&self, op: &Operation) -> Evaluation {
        let bytes = op.payload_bytes();
        Evaluation {
            time: bytes / (self.config.interface_bandwidth / 2.0),
            energy: Energy::communication(
                bytes * self.config.energy.comm * self.config.num_modules as f64,
            ),
        }
    }
}

impl DeviceModel for PimDevice {
    fn name(&self) -> &str {
        self.config.pim_type.name()
    }

    fn evaluate(&mut self, op: &mut Operation) -> Result<Evaluation> {
        let eval = match op.kind {
            OpKind::HostTransfer => {
                op.bound = Bound::Memory;
                self.transfer(op)
            }
            OpKind::Matmul => self.attention(op)?,
            OpKind::Softmax => self.softmax(op),
            kind => {
                return Err(SimError::UnsupportedOperation {
                    device: self.name().to_string(),
                    kind,
                    op: op.name.to_string(),
                })
            }
        };

        op.time = eval.time;
        op.energy = eval.energy;
        Ok(eval)
    }

    fn peak_memory_bandwidth(&self) -> f64 {
        self.config.peak_memory_bandwidth()
    }

    fn aggregate_memory_capacity(&self) -> u64 {
        self.config.aggregate_memory_capacity()
    }

    fn set_power_constraint(&mut self, power_constraint: bool) {
        self.config.set_power_constraint(power_constraint);
    }
}
