use log::debug;

use super::operation::{OpKind, OpName, Operation, Stage};
use crate::config::ModelConfig;
use crate::error::Result;

/// Operation sequences of one decoder layer for a whole request batch
#[derive(Debug, Clone)]
pub struct DecodeGraph {
    /// Single prefill pass
    pub summarization: Vec<Operation>,
    /// One sequence per generated token after the first
    pub generation: Vec<Vec<Operation>>,
}

impl DecodeGraph {
    /// Expand one decoder layer for `batch` requests of `input_len` prompt
    /// tokens generating `output_len` tokens.
    ///
    /// With `attention_offload`, transfers are placed around the attention
    /// block so activations can move to and from the attention device.
    pub fn build(
        model: &ModelConfig,
        tensor_parallel: u64,
        batch: u64,
        input_len: u64,
        output_len: u64,
        attention_offload: bool,
    ) -> Result<Self> {
        let builder = LayerBuilder {
            model,
            tp: tensor_parallel,
            batch,
            attention_offload,
        };

        let summarization = builder.layer(Stage::Summarization, input_len, input_len)?;
        let generation = (1..output_len)
            .map(|step| builder.layer(Stage::Generation, 1, input_len + step))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "decode graph: {} summarization ops, {} generation steps x {} ops",
            summarization.len(),
            generation.len(),
            generation.first().map_or(0, Vec::len)
        );

        Ok(Self {
            summarization,
            generation,
        })
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.summarization
            .iter()
            .chain(self.generation.iter().flatten())
    }
}

struct LayerBuilder<'a> {
    model: &'a ModelConfig,
    tp: u64,
    batch: u64,
    attention_offload: bool,
}

impl LayerBuilder<'_> {
    /// One decoder layer attending `query_len` new tokens over `context_len`
    fn layer(&self, stage: Stage, query_len: u64, context_len: u64) -> Result<Vec<Operation>> {
        let model = self.model;
        let precision = model.precision;
        let hidden = model.hidden_dim;
        let width = model.hidden_per_device(self.tp);
        let ff_width = model.ff_dim_per_device(self.tp);
        let head_dim = model.head_dim;
        let heads = model.heads_per_device(self.tp) * self.batch;
        let rows = self.batch * query_len;

        let op = |name, kind, m, n, k, num_op| {
            Operation::new(stage, name, kind, precision, m, n, k, num_op)
        };

        let mut ops = Vec::with_capacity(16);
        ops.push(op(OpName::Qkv, OpKind::Fc, rows, 3 * width, hidden, 1)?);

        if self.attention_offload {
            // Prefill ships K and V for the cache; decode also ships the query
            let tensors = match stage {
                Stage::Summarization => 2,
                Stage::Generation => 3,
            };
            ops.push(op(OpName::TransferOut, OpKind::HostTransfer, rows, tensors * width, 1, 1)?);
        }

        ops.push(op(OpName::Score, OpKind::Matmul, query_len, context_len, head_dim, heads)?);
        ops.push(op(OpName::Softmax, OpKind::Softmax, query_len, context_len, 1, heads)?);
        ops.push(op(OpName::Context, OpKind::Matmul, query_len, head_dim, context_len, heads)?);

        if self.attention_offload && stage == Stage::Generation {
            ops.push(op(OpName::TransferIn, OpKind::HostTransfer, 1, head_dim, 1, heads)?);
        }

        ops.push(op(OpName::Proj, OpKind::Fc, rows, hidden, width, 1)?);
        ops.push(op(OpName::AllReduce, OpKind::DeviceReduce, rows, hidden, 1, 1)?);
        ops.push(op(OpName::Norm1, OpKind::Norm, rows, hidden, 1, 1)?);

        let act = OpName::Act(model.family.activation());
        if model.family.is_gated() {
            ops.push(op(OpName::FeedForward1, OpKind::Fc, rows, ff_width, hidden, 1)?);
            ops.push(op(OpName::FeedForward2, OpKind::Fc, rows, ff_width, hidden, 1)?);
            ops.push(op(act, OpKind::Activation, rows, ff_width, 1, 1)?);
            ops.push(op(OpName::FeedForward3, OpKind::Fc, rows, hidden, ff_width, 1)?);
        } else {
            ops.push(op(OpName::FeedForward1, OpKind::Fc, rows, ff_width, hidden, 1)?);
            ops.push(op(act, OpKind::Activation, rows, ff_width, 1, 1)?);
            ops.push(op(OpName::FeedForward2, OpKind::Fc, rows, hidden, ff_width, 1)?);
        }

        ops.push(op(OpName::AllReduce, OpKind::DeviceReduce, rows, hidden, 1, 1)?);
        ops.push(op(OpName::Norm2, OpKind::Norm, rows, hidden, 1, 1)?);

        Ok(ops)
    }
}
