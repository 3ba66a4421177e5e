use std::fmt;
use std::ops::{Add, AddAssign, Mul};

use serde::Serialize;

use crate::config::Precision;
use crate::error::{Result, SimError};

/// Decode stage an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    /// Single prefill pass over the prompt
    Summarization,
    /// One autoregressive token step
    Generation,
}

/// Cost-model category of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpKind {
    /// Dense matmul against model weights
    Fc,
    /// Batched matmul between activations (attention)
    Matmul,
    Activation,
    Softmax,
    Norm,
    /// All-reduce between the tensor-parallel devices
    DeviceReduce,
    /// Transfer between the primary device and the attention device
    HostTransfer,
}

impl OpKind {
    /// Operations whose traffic depends on the chosen cache tiles
    pub fn is_tiled(self) -> bool {
        matches!(self, OpKind::Fc | OpKind::Matmul)
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, OpKind::DeviceReduce | OpKind::HostTransfer)
    }
}

/// Nonlinearity of the feed-forward block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Activation {
    Relu,
    Gelu,
    /// SwiGLU-style gate over two parallel projections
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpName {
    Qkv,
    /// K/V (prefill) or Q/K/V (decode) sent to the attention device
    TransferOut,
    Score,
    Softmax,
    Context,
    /// Attention output returned to the primary device
    TransferIn,
    Proj,
    AllReduce,
    Norm1,
    FeedForward1,
    FeedForward2,
    FeedForward3,
    Act(Activation),
    Norm2,
}

impl OpName {
    pub fn is_feed_forward(self) -> bool {
        matches!(
            self,
            OpName::FeedForward1 | OpName::FeedForward2 | OpName::FeedForward3
        )
    }
}

impl fmt::Display for OpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpName::Qkv => "qkv",
            OpName::TransferOut => "comm_x2g",
            OpName::Score => "score",
            OpName::Softmax => "softmax",
            OpName::Context => "context",
            OpName::TransferIn => "comm_x2g",
            OpName::Proj => "proj",
            OpName::AllReduce => "comm_g2g",
            OpName::Norm1 => "norm1",
            OpName::FeedForward1 => "ff1",
            OpName::FeedForward2 => "ff2",
            OpName::FeedForward3 => "ff3",
            OpName::Act(Activation::Relu) => "relu",
            OpName::Act(Activation::Gelu) => "gelu",
            OpName::Act(Activation::Gated) => "glu",
            OpName::Norm2 => "norm2",
        };
        f.write_str(name)
    }
}

/// Which resource limits an operation's execution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bound {
    Compute,
    Memory,
}

/// Energy in pJ, split by where it is spent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Energy {
    pub off_chip: f64,
    pub l2: f64,
    pub l1: f64,
    pub reg: f64,
    pub alu: f64,
    pub comm: f64,
}

impl Energy {
    pub fn communication(comm: f64) -> Self {
        Self {
            comm,
            ..Default::default()
        }
    }

    pub fn total(&self) -> f64 {
        self.off_chip + self.l2 + self.l1 + self.reg + self.alu + self.comm
    }

    /// Energy spent inside the chip (caches, registers, ALUs)
    pub fn on_chip(&self) -> f64 {
        self.l2 + self.l1 + self.reg + self.alu
    }
}

impl Add for Energy {
    type Output = Energy;

    fn add(self, rhs: Energy) -> Energy {
        Energy {
            off_chip: self.off_chip + rhs.off_chip,
            l2: self.l2 + rhs.l2,
            l1: self.l1 + rhs.l1,
            reg: self.reg + rhs.reg,
            alu: self.alu + rhs.alu,
            comm: self.comm + rhs.comm,
        }
    }
}

impl AddAssign for Energy {
    fn add_assign(&mut self, rhs: Energy) {
        *self = *self + rhs;
    }
}

impl Mul<f64> for Energy {
    type Output = Energy;

    fn mul(self, factor: f64) -> Energy {
        Energy {
            off_chip: self.off_chip * factor,
            l2: self.l2 * factor,
            l1: self.l1 * factor,
            reg: self.reg * factor,
            alu: self.alu * factor,
            comm: self.comm * factor,
        }
    }
}

/// Bytes read and written by one operation: two inputs and an output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub in1: f64,
    pub in2: f64,
    pub out: f64,
}

impl Footprint {
    pub fn total(&self) -> f64 {
        self.in1 + self.in2 + self.out
    }
}

/// One unit of work in a decoder layer.
///
/// Shape follows GEMM conventions: an `m x k` by `k x n` product repeated
/// `num_op` times (heads x batch for attention). Elementwise kinds only use
/// `m` and `n`.
#[derive(Debug, Clone)]
pub struct Operation {
    pub stage: Stage,
    pub name: OpName,
    pub kind: OpKind,
    pub precision: Precision,
    pub m: u64,
    pub n: u64,
    pub k: u64,
    pub num_op: u64,
    dbyte: u64,

    // Results of the last evaluation
    pub time: f64,
    pub energy: Energy,
    pub bound: Bound,
    /// Bytes moved to/from off-chip memory
    pub off_traffic: f64,
}

impl Operation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: Stage,
        name: OpName,
        kind: OpKind,
        precision: Precision,
        m: u64,
        n: u64,
        k: u64,
        num_op: u64,
    ) -> Result<Self> {
        let dbyte = precision
            .element_bytes()
            .ok_or_else(|| SimError::UnsupportedPrecision {
                precision: precision.to_string(),
                op: name.to_string(),
            })?;

        Ok(Self {
            stage,
            name,
            kind,
            precision,
            m,
            n,
            k,
            num_op,
            dbyte,
            time: 0.0,
            energy: Energy::default(),
            bound: Bound::Compute,
            off_traffic: 0.0,
        })
    }

    /// Bytes per element
    pub fn dbyte(&self) -> u64 {
        self.dbyte
    }

    pub fn flops(&self) -> f64 {
        let mn = (self.m * self.n * self.num_op) as f64;
        match self.kind {
            OpKind::Softmax | OpKind::Norm => 5.0 * mn,
            OpKind::Activation => match self.name {
                OpName::Act(Activation::Relu) => mn,
                // GELU plus the gating multiply
                OpName::Act(Activation::Gated) => 9.0 * mn,
                _ => 8.0 * mn,
            },
            OpKind::Fc | OpKind::Matmul => 2.0 * mn * self.k as f64,
            OpKind::DeviceReduce | OpKind::HostTransfer => 0.0,
        }
    }

    pub fn footprint(&self) -> Footprint {
        let b = (self.num_op * self.dbyte) as f64;
        let mn = (self.m * self.n) as f64 * b;
        match self.kind {
            OpKind::Fc | OpKind::Matmul => Footprint {
                in1: (self.m * self.k) as f64 * b,
                in2: (self.n * self.k) as f64 * b,
                out: mn,
            },
            OpKind::Norm => Footprint {
                in1: mn,
                in2: mn,
                out: mn,
            },
            OpKind::Activation if self.name == OpName::Act(Activation::Gated) => Footprint {
                in1: mn,
                in2: mn,
                out: mn,
            },
            OpKind::Activation | OpKind::Softmax | OpKind::DeviceReduce | OpKind::HostTransfer => {
                Footprint {
                    in1: mn,
                    in2: 0.0,
                    out: mn,
                }
            }
        }
    }

    /// Bytes carried by a transfer: one `m x n` tensor per instance
    pub fn payload_bytes(&self) -> f64 {
        (self.m * self.n * self.num_op * self.dbyte) as f64
    }
}
