use super::summary::{GenerationEnergy, GenerationTimes, SummarizationTimes};
use crate::graph::{OpKind, OpName, Operation};

/// Per-layer totals for one batch, before scaling to the whole model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchMetrics {
    pub summarization: SummarizationTimes,
    /// Average over generation steps
    pub generation: GenerationTimes,
    /// Average over generation steps
    pub energy: GenerationEnergy,
    pub summarization_flops: f64,
    /// Average over generation steps
    pub generation_flops: f64,
}

impl BatchMetrics {
    /// Convert one decoder layer's totals into whole-model milliseconds and nJ
    pub fn to_model_scale(&self, num_layers: u64, num_devices: u64) -> Self {
        let layers = num_layers as f64;
        let devices = num_devices as f64;
        Self {
            summarization: self.summarization.scaled(layers * 1000.0),
            generation: self.generation.scaled(layers * 1000.0),
            energy: self.energy.scaled(layers / 1000.0),
            summarization_flops: self.summarization_flops * devices * layers,
            generation_flops: self.generation_flops * devices * layers,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            summarization: self.summarization.scaled(factor),
            generation: self.generation.scaled(factor),
            energy: self.energy.scaled(factor),
            summarization_flops: self.summarization_flops * factor,
            generation_flops: self.generation_flops * factor,
        }
    }

    pub fn accumulate(&mut self, other: &BatchMetrics) {
        self.summarization += other.summarization;
        self.generation += other.generation;
        self.energy += other.energy;
        self.summarization_flops += other.summarization_flops;
        self.generation_flops += other.generation_flops;
    }
}

/// Buckets evaluated operations into time and energy categories
#[derive(Debug, Default)]
pub struct MetricsCollector {
    summarization: SummarizationTimes,
    generation: GenerationTimes,
    energy: GenerationEnergy,
    summarization_flops: f64,
    generation_flops: f64,
    steps: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The KV hand-off to the attention device only delays later
    /// transfers; it is not part of any summarization category.
    pub fn record_summarization(&mut self, op: &Operation) {
        self.summarization_flops += op.flops();
        let t = &mut self.summarization;
        let slot = match op.kind {
            OpKind::Fc => &mut t.fc,
            OpKind::Matmul => &mut t.matmul,
            OpKind::DeviceReduce => &mut t.comm,
            OpKind::Softmax => &mut t.softmax,
            OpKind::Activation => &mut t.act,
            OpKind::Norm => &mut t.norm,
            OpKind::HostTransfer => return,
        };
        *slot += op.time;
        t.all += op.time;
    }

    /// Record every operation of one generation step
    pub fn record_step(&mut self, ops: &[Operation]) {
        for op in ops {
            self.record_generation(op);
        }
        self.steps += 1;
    }

    fn record_generation(&mut self, op: &Operation) {
        let t = &mut self.generation;
        t.all += op.time;
        match op.kind {
            OpKind::Fc => {
                t.fc += op.time;
                match op.name {
                    OpName::Qkv => t.qkv += op.time,
                    OpName::Proj => t.proj += op.time,
                    name if name.is_feed_forward() => t.ff += op.time,
                    _ => {}
                }
            }
            OpKind::Matmul => t.matmul += op.time,
            OpKind::DeviceReduce => {
                t.comm += op.time;
                t.g2g += op.time;
            }
            OpKind::HostTransfer => {
                t.comm += op.time;
                t.x2g += op.time;
            }
            OpKind::Activation => {
                t.etc += op.time;
                t.act += op.time;
            }
            OpKind::Norm => {
                t.etc += op.time;
                t.norm += op.time;
            }
            OpKind::Softmax => t.softmax += op.time,
        }

        let energy = op.energy;
        let mem = energy.off_chip;
        let comp = energy.on_chip();
        let e = &mut self.energy;
        e.all += energy.total();
        e.off_chip += energy.off_chip;
        e.l2 += energy.l2;
        e.l1 += energy.l1;
        e.reg += energy.reg;
        e.alu += energy.alu;
        e.comm += energy.comm;
        match op.kind {
            OpKind::Fc => {
                e.fc_mem += mem;
                e.fc_comp += comp;
            }
            OpKind::Matmul | OpKind::Softmax => {
                e.attn_mem += mem;
                e.attn_comp += comp;
            }
            OpKind::Activation | OpKind::Norm => {
                e.etc_mem += mem;
                e.etc_comp += comp;
            }
            OpKind::DeviceReduce | OpKind::HostTransfer => {}
        }

        self.generation_flops += op.flops();
    }

    /// Per-layer totals with generation figures averaged over recorded
    /// steps. FLOPs of both stages are reported per generation step.
    pub fn finish(&self) -> BatchMetrics {
        let per_step = if self.steps == 0 {
            0.0
        } else {
            1.0 / self.steps as f64
        };
        BatchMetrics {
            summarization: self.summarization,
            generation: self.generation.scaled(per_step),
            energy: self.energy.scaled(per_step),
            summarization_flops: self.summarization_flops * per_step,
            generation_flops: self.generation_flops * per_step,
        }
    }
}
