//! Algebraic corrections for work hidden behind offloaded attention.
//!
//! Attention runs on the in-memory accelerator one head group at a time, so
//! transfers (and optionally the QKV/output projections) of the other
//! groups overlap it. Only the primary-device share that cannot overlap is
//! kept.

use crate::graph::{Bound, OpKind, OpName, Operation};

/// Step time by overlap-relevant bucket (seconds)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepTimes {
    pub qkv: f64,
    pub proj: f64,
    pub transfer: f64,
    pub attention: f64,
}

impl StepTimes {
    pub fn collect(step: &[Operation]) -> Self {
        let mut times = Self::default();
        for op in step {
            match (op.name, op.kind) {
                (OpName::Qkv, _) => times.qkv += op.time,
                (OpName::Proj, _) => times.proj += op.time,
                (_, OpKind::HostTransfer) => times.transfer += op.time,
                (OpName::Score | OpName::Context | OpName::Softmax, _) => {
                    times.attention += op.time
                }
                _ => {}
            }
        }
        times
    }

    /// Apply the overlap rules.
    ///
    /// `ratio` is the fraction of a step that cannot overlap (one head group
    /// out of heads / devices). With `deeper`, the projections are
    /// overlapped as well and `projection_split` of the hidden attention time
    /// comes out of the QKV projection.
    pub fn overlapped(&self, ratio: f64, deeper: bool, projection_split: f64) -> Self {
        let hidden = self.attention * (1.0 - ratio);
        let mut out = *self;

        let hide_transfer = |out: &mut StepTimes| {
            if self.attention > self.transfer {
                out.transfer = self.transfer * ratio;
            } else {
                out.transfer = self.transfer - hidden;
            }
        };

        if !deeper {
            hide_transfer(&mut out);
            return out;
        }

        let fc = self.qkv + self.proj;
        if self.attention > fc {
            out.qkv = self.qkv * ratio;
            out.proj = self.proj * ratio;
            hide_transfer(&mut out);
        } else if fc > self.transfer {
            out.transfer = self.transfer * ratio;
            out.qkv = self.qkv - hidden * projection_split;
            out.proj = self.proj - hidden * (1.0 - projection_split);
        } else {
            out.transfer = self.transfer - hidden;
            out.qkv = self.qkv * ratio;
            out.proj = self.proj * ratio;
        }
        out
    }
}

/// Rewrite one generation step with attention overlapped.
///
/// Softmax is hidden inside the attention command stream; the two
/// transfers share the remaining transfer time equally.
pub fn overlap_attention(step: &mut [Operation], ratio: f64, deeper: bool, projection_split: f64) {
    let times = StepTimes::collect(step).overlapped(ratio, deeper, projection_split);
    let transfers = step
        .iter()
        .filter(|op| op.kind == OpKind::HostTransfer)
        .count()
        .max(1) as f64;

    for op in step.iter_mut() {
        match (op.name, op.kind) {
            (OpName::Qkv, _) => op.time = times.qkv,
            (OpName::Proj, _) => op.time = times.proj,
            (_, OpKind::HostTransfer) => op.time = times.transfer / transfers,
            (OpName::Softmax, _) => op.time = 0.0,
            _ => {}
        }
    }
}

/// Capability figures needed to split feed-forward work with the accelerator
#[derive(Debug, Clone, Copy)]
pub struct FeedForwardOverlap {
    pub gpu_flops: f64,
    pub gpu_bandwidth: f64,
    pub accelerator_bandwidth: f64,
}

impl FeedForwardOverlap {
    /// Share of a feed-forward op left on the GPU
    pub fn ratio(&self, op: &Operation, batch: u64) -> f64 {
        let bw_scale = self.accelerator_bandwidth / self.gpu_bandwidth;
        match op.bound {
            Bound::Compute => {
                let attn_flops = self.gpu_bandwidth / op.dbyte() as f64 * 2.0 * bw_scale;
                self.gpu_flops / (self.gpu_flops + attn_flops)
            }
            Bound::Memory => {
                let attn_bandwidth = self.gpu_bandwidth * bw_scale / batch as f64;
                self.gpu_bandwidth / (self.gpu_bandwidth + attn_bandwidth)
            }
        }
    }

    pub fn apply(&self, step: &mut [Operation], batch: u64) {
        for op in step.iter_mut().filter(|op| op.name.is_feed_forward()) {
            op.time *= self.ratio(op, batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Precision;
    use crate::graph::Stage;

    fn timed(name: OpName, kind: OpKind, time: f64) -> Operation {
        let mut op = Operation::new(Stage::Generation, name, kind, Precision::W16A16, 1, 8, 8, 1).unwrap();
        op.time = time;
        op
    }

    fn step(qkv: f64, transfer: f64, attention: f64, proj: f64) -> Vec<Operation> {
        vec![
            timed(OpName::Qkv, OpKind::Fc, qkv),
            timed(OpName::TransferOut, OpKind::HostTransfer, transfer / 2.0),
            timed(OpName::Score, OpKind::Matmul, attention),
            timed(OpName::Softmax, OpKind::Softmax, 0.0),
            timed(OpName::Context, OpKind::Matmul, 0.0),
            timed(OpName::TransferIn, OpKind::HostTransfer, transfer / 2.0),
            timed(OpName::Proj, OpKind::Fc, proj),
        ]
    }

    #[test]
    fn test_basic_attention_dominates() {
        let times = StepTimes {
            qkv: 1.0,
            proj: 1.0,
            transfer: 2.0,
            attention: 8.0,
        };
        let out = times.overlapped(0.25, false, 0.75);
        assert_eq!(out.transfer, 0.5);
        assert_eq!(out.qkv, 1.0);
        assert_eq!(out.proj, 1.0);
    }

    #[test]
    fn test_basic_transfer_dominates() {
        let times = StepTimes {
            transfer: 8.0,
            attention: 4.0,
            ..Default::default()
        };
        let out = times.overlapped(0.25, false, 0.75);
        assert_eq!(out.transfer, 8.0 - 3.0);
    }

    #[test]
    fn test_deeper_projections_dominate() {
        let times = StepTimes {
            qkv: 6.0,
            proj: 2.0,
            transfer: 1.0,
            attention: 4.0,
        };
        let out = times.overlapped(0.5, true, 0.75);
        assert_eq!(out.transfer, 0.5);
        assert_eq!(out.qkv, 6.0 - 2.0 * 0.75);
        assert_eq!(out.proj, 2.0 - 2.0 * 0.25);
    }

    #[test]
    fn test_deeper_attention_dominates() {
        let times = StepTimes {
            qkv: 1.0,
            proj: 1.0,
            transfer: 1.0,
            attention: 4.0,
        };
        let out = times.overlapped(0.5, true, 0.75);
        assert_eq!((out.qkv, out.proj, out.transfer), (0.5, 0.5, 0.5));
    }

    #[test]
    fn test_deeper_transfer_dominates() {
        let times = StepTimes {
            qkv: 1.0,
            proj: 1.0,
            transfer: 8.0,
            attention: 2.0,
        };
        let out = times.overlapped(0.5, true, 0.75);
        assert_eq!((out.qkv, out.proj, out.transfer), (0.5, 0.5, 7.0));
    }

    #[test]
    fn test_overlap_rewrites_step() {
        let mut ops = step(1.0, 2.0, 8.0, 1.0);
        ops[3].time = 0.5;
        overlap_attention(&mut ops, 0.25, false, 0.75);

        // attention 8.5 > transfer 2: transfer scaled by the ratio and split
        assert_eq!(ops[1].time, 0.25);
        assert_eq!(ops[5].time, 0.25);
        assert_eq!(ops[3].time, 0.0);
        assert_eq!(ops[2].time, 8.0);
    }

    #[test]
    fn test_pipelining_never_slower() {
        for (qkv, transfer, attention, proj) in [
            (1.0, 2.0, 8.0, 1.0),
            (6.0, 1.0, 4.0, 2.0),
            (1.0, 8.0, 2.0, 1.0),
            (3.0, 3.0, 3.0, 3.0),
        ] {
            let times = StepTimes::collect(&step(qkv, transfer, attention, proj));
            let basic = times.overlapped(0.125, false, 0.75);
            let deeper = times.overlapped(0.125, true, 0.75);
            assert!(deeper.transfer <= basic.transfer);
            assert!(deeper.qkv + deeper.proj <= basic.qkv + basic.proj);
        }
    }

    #[test]
    fn test_feed_forward_ratio() {
        let overlap = FeedForwardOverlap {
            gpu_flops: 312.0e12,
            gpu_bandwidth: 2.0e12,
            accelerator_bandwidth: 8.0e12,
        };

        let mut memory = timed(OpName::FeedForward1, OpKind::Fc, 1.0);
        memory.bound = Bound::Memory;
        // accelerator adds 4x GPU bandwidth, shared by a batch of 4
        assert_eq!(overlap.ratio(&memory, 4), 0.5);

        let mut compute = timed(OpName::FeedForward2, OpKind::Fc, 1.0);
        compute.bound = Bound::Compute;
        let attn_flops = 2.0e12 / 2.0 * 2.0 * 4.0;
        assert_eq!(overlap.ratio(&compute, 4), 312.0e12 / (312.0e12 + attn_flops));

        let mut ops = vec![memory, timed(OpName::Qkv, OpKind::Fc, 1.0)];
        ops[1].bound = Bound::Memory;
        overlap.apply(&mut ops, 4);
        assert_eq!(ops[0].time, 0.5);
        assert_eq!(ops[1].time, 1.0);
    }
}
