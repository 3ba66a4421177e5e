use crate::config::ModelConfig;

/// Memory a scenario needs across the whole system (bytes)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryFootprint {
    pub weights: f64,
    pub kv_cache: f64,
    /// Peak temporary activations
    pub activations: f64,
}

impl MemoryFootprint {
    pub fn estimate(model: &ModelConfig, batch: u64, input_len: u64, output_len: u64) -> Self {
        let w = model.precision.weight_bytes() as f64;
        let a = model.precision.activation_bytes() as f64;
        let layers = model.num_layers as f64;
        let h = model.hidden_dim as f64;
        let heads = model.num_heads as f64;
        let f = model.ff_scale;
        let b = batch as f64;
        // tokens in the KV cache after the last step
        let l = (input_len + output_len - 1) as f64;

        let ff_matrices = if model.family.is_gated() { 3.0 } else { 2.0 };
        let weights = layers * h * (4.0 * h + ff_matrices * f * h) * w;
        let kv_cache = layers * 2.0 * l * h * a * b;

        let temp = [
            (h + l * heads) * a,
            2.0 * h * a,
            2.0 * l * heads * a,
            (f * h + h) * a,
        ]
        .into_iter()
        .fold(0.0, f64::max);
        let activations = (temp + l * heads) * b;

        Self {
            weights,
            kv_cache,
            activations,
        }
    }

    pub fn total(&self) -> f64 {
        self.weights + self.kv_cache + self.activations
    }
}
