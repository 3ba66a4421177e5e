use log::{debug, info};

use super::footprint::MemoryFootprint;
use super::pipeline::{self, FeedForwardOverlap};
use crate::compute::{ComputeEngine, DeviceModel, PimDevice};
use crate::config::{
    DeviceConfig, ModelConfig, PimConfig, PimType, Precision, ScalingConfig, ScenarioConfig,
};
use crate::error::{Result, SimError};
use crate::graph::{DecodeGraph, OpKind};
use crate::memsim::MemorySimulator;
use crate::metrics::{BatchMetrics, MetricsCollector, ScenarioEcho, ScenarioRecord, SystemTag};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Second device class attached to the GPU fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorKind {
    None,
    Cpu,
    Pim(PimType),
}

impl AcceleratorKind {
    pub fn name(self) -> &'static str {
        match self {
            AcceleratorKind::None => "NONE",
            AcceleratorKind::Cpu => "CPU",
            AcceleratorKind::Pim(pim_type) => pim_type.name(),
        }
    }
}

/// Which device executes an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Primary,
    /// The attention device; aliases the primary in homogeneous systems
    Attention,
}

impl DeviceRole {
    /// Placement of generation-stage operations
    pub fn for_generation(kind: OpKind) -> Self {
        match kind {
            OpKind::Matmul | OpKind::Softmax | OpKind::HostTransfer => DeviceRole::Attention,
            OpKind::Fc | OpKind::Activation | OpKind::Norm | OpKind::DeviceReduce => {
                DeviceRole::Primary
            }
        }
    }
}

/// A GPU fleet with an optional attention-offload device
pub struct System {
    model: ModelConfig,
    primary: ComputeEngine,
    attention: Option<Box<dyn DeviceModel>>,
    kind: AcceleratorKind,
}

impl System {
    pub fn homogeneous(model: ModelConfig, gpu: DeviceConfig, scaling: ScalingConfig) -> Self {
        Self {
            model,
            primary: ComputeEngine::new(gpu, scaling),
            attention: None,
            kind: AcceleratorKind::None,
        }
    }

    pub fn with_cpu(
        model: ModelConfig,
        gpu: DeviceConfig,
        cpu: DeviceConfig,
        scaling: ScalingConfig,
    ) -> Self {
        Self {
            model,
            primary: ComputeEngine::new(gpu, scaling),
            attention: Some(Box::new(ComputeEngine::new(cpu, scaling))),
            kind: AcceleratorKind::Cpu,
        }
    }

    pub fn with_pim(
        model: ModelConfig,
        gpu: DeviceConfig,
        pim: PimConfig,
        oracle: Box<dyn MemorySimulator>,
        scaling: ScalingConfig,
    ) -> Self {
        let kind = AcceleratorKind::Pim(pim.pim_type);
        Self {
            model,
            primary: ComputeEngine::new(gpu, scaling),
            attention: Some(Box::new(PimDevice::new(pim, oracle))),
            kind,
        }
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn accelerator(&self) -> AcceleratorKind {
        self.kind
    }

    pub fn offloads_attention(&self) -> bool {
        self.attention.is_some()
    }

    fn num_devices(&self) -> u64 {
        self.primary.config().num_devices
    }

    fn device_for(&mut self, role: DeviceRole) -> &mut dyn DeviceModel {
        match (role, self.attention.as_deref_mut()) {
            (DeviceRole::Attention, Some(device)) => device,
            _ => &mut self.primary,
        }
    }

    pub fn required_memory(&self, batch: u64, input_len: u64, output_len: u64) -> MemoryFootprint {
        MemoryFootprint::estimate(&self.model, batch, input_len, output_len)
    }

    /// Build and price one decoder layer for `batch` requests.
    ///
    /// Returns the evaluated graph and its per-layer totals, with generation
    /// figures averaged per step.
    pub fn evaluate_batch(
        &mut self,
        batch: u64,
        scenario: &ScenarioConfig,
    ) -> Result<(DecodeGraph, BatchMetrics)> {
        self.check_partitioning()?;
        if let Some(device) = self.attention.as_deref_mut() {
            device.set_power_constraint(scenario.power_constraint);
        }

        let mut graph = DecodeGraph::build(
            &self.model,
            self.num_devices(),
            batch,
            scenario.input_len,
            scenario.output_len,
            self.offloads_attention(),
        )?;
        let mut collector = MetricsCollector::new();

        // Prefill runs entirely on the GPUs; the KV hand-off waits for the link
        let mut now = 0.0;
        let mut link_busy_until: f64 = 0.0;
        for op in graph.summarization.iter_mut() {
            self.primary.evaluate(op)?;
            if op.kind == OpKind::HostTransfer {
                op.time += (link_busy_until - now).max(0.0);
                link_busy_until = now + op.time;
            }
            now += op.time;
            collector.record_summarization(op);
        }

        let ratio = self.num_devices() as f64 / self.model.num_heads as f64;
        let ff_overlap = self.feed_forward_overlap();
        for step in graph.generation.iter_mut() {
            for op in step.iter_mut() {
                self.device_for(DeviceRole::for_generation(op.kind))
                    .evaluate(op)?;
            }

            if let AcceleratorKind::Pim(_) = self.kind {
                pipeline::overlap_attention(
                    step,
                    ratio,
                    scenario.pipelining,
                    scenario.projection_split,
                );
                if scenario.ff_overlap {
                    ff_overlap.apply(step, batch);
                }
            }
            collector.record_step(step);
        }

        Ok((graph, collector.finish()))
    }

    fn feed_forward_overlap(&self) -> FeedForwardOverlap {
        let gpu = self.primary.config();
        FeedForwardOverlap {
            gpu_flops: gpu.peak_flops,
            gpu_bandwidth: gpu.memory_bandwidth,
            accelerator_bandwidth: self.attention_bandwidth(),
        }
    }

    fn attention_bandwidth(&self) -> f64 {
        match &self.attention {
            Some(device) => device.peak_memory_bandwidth(),
            None => self.primary.peak_memory_bandwidth(),
        }
    }

    /// Batch sizes to run and how many times each repeats
    fn batches(scenario: &ScenarioConfig) -> Vec<(u64, u64)> {
        let batch = scenario.batch_size;
        if scenario.num_requests == 0 {
            return vec![(batch, 1)];
        }

        let full = scenario.num_requests / batch;
        let rest = scenario.num_requests % batch;
        let mut batches = Vec::with_capacity(2);
        if full > 0 {
            batches.push((batch, full));
        }
        if rest > 0 {
            batches.push((rest, 1));
        }
        batches
    }

    /// Every device must own at least one head and one hidden column
    fn check_partitioning(&self) -> Result<()> {
        let devices = self.num_devices();
        if devices == 0 {
            return Err(SimError::InvalidConfig(
                "system needs at least one device".to_string(),
            ));
        }
        if self.model.num_heads < devices || self.model.hidden_dim < devices {
            return Err(SimError::InvalidConfig(format!(
                "{} with {} heads cannot be split across {} devices",
                self.model.name, self.model.num_heads, devices
            )));
        }
        Ok(())
    }

    fn validate(scenario: &ScenarioConfig) -> Result<()> {
        if scenario.batch_size == 0 {
            return Err(SimError::InvalidScenario(
                "batch size must be at least 1".to_string(),
            ));
        }
        if scenario.output_len < 2 {
            return Err(SimError::InvalidScenario(format!(
                "output length {} leaves no generation step",
                scenario.output_len
            )));
        }
        Ok(())
    }

    fn tag(&self) -> SystemTag {
        let gpu = self.primary.config();
        let mut capacity = self.primary.aggregate_memory_capacity();
        if let Some(device) = &self.attention {
            capacity += device.aggregate_memory_capacity();
        }

        let mut ops_per_byte = gpu.peak_flops / gpu.memory_bandwidth;
        if self.model.precision == Precision::W8A8 {
            ops_per_byte *= 2.0;
        }

        SystemTag {
            model: self.model.name.clone(),
            precision: self.model.precision.name().to_string(),
            device: self.primary.name().to_string(),
            capacity_gib: (capacity as f64 / GIB) as u64,
            bandwidth_ratio: self.attention_bandwidth() / gpu.memory_bandwidth,
            ops_per_byte,
        }
    }

    /// Simulate one scenario end to end
    pub fn simulate(&mut self, scenario: &ScenarioConfig) -> Result<ScenarioRecord> {
        Self::validate(scenario)?;

        let mut total = BatchMetrics::default();
        for (batch, count) in Self::batches(scenario) {
            debug!("simulating {} batch(es) of {}", count, batch);
            let (_, metrics) = self.evaluate_batch(batch, scenario)?;
            let scaled = metrics.to_model_scale(self.model.num_layers, self.num_devices());
            total.accumulate(&scaled.scaled(count as f64));
        }

        let required = self.required_memory(
            scenario.batch_size,
            scenario.input_len,
            scenario.output_len,
        );
        let record = ScenarioRecord {
            tag: self.tag(),
            scenario: ScenarioEcho {
                accelerator: self.kind.name().to_string(),
                num_devices: self.num_devices(),
                pipelining: scenario.pipelining,
                ff_overlap: scenario.ff_overlap,
                power_constraint: scenario.power_constraint,
                gqa_size: self.model.gqa_size,
                input_len: scenario.input_len,
                output_len: scenario.output_len,
                batch_size: scenario.batch_size,
                required_capacity: required.total(),
                summarization_flops: total.summarization_flops,
                generation_flops: total.generation_flops,
            },
            summarization: total.summarization,
            generation: total.generation,
            energy: total.energy,
        };

        info!(
            "Batch: {}, Throughput: {:.2} tokens/s, Latency: {:.2}ms, pipe/ff_overlap: {}/{}, power limit: {}",
            scenario.batch_size,
            record.throughput(),
            record.latency_ms(),
            scenario.pipelining,
            scenario.ff_overlap,
            scenario.power_constraint
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AcceleratorConfig, GpuType};
    use crate::graph::OpName;
    use crate::memsim::LinearOracle;

    fn homogeneous() -> System {
        System::homogeneous(
            ModelConfig::test_default(),
            DeviceConfig::test_default(),
            ScalingConfig::default(),
        )
    }

    fn with_pim() -> System {
        let pim = PimConfig::new(&AcceleratorConfig::new(PimType::Bank), false);
        System::with_pim(
            ModelConfig::test_default(),
            DeviceConfig::test_default(),
            pim,
            Box::new(LinearOracle::new(1e-9)),
            ScalingConfig::default(),
        )
    }

    #[test]
    fn test_role_table() {
        assert_eq!(DeviceRole::for_generation(OpKind::Matmul), DeviceRole::Attention);
        assert_eq!(DeviceRole::for_generation(OpKind::Softmax), DeviceRole::Attention);
        assert_eq!(DeviceRole::for_generation(OpKind::HostTransfer), DeviceRole::Attention);
        assert_eq!(DeviceRole::for_generation(OpKind::Fc), DeviceRole::Primary);
        assert_eq!(DeviceRole::for_generation(OpKind::DeviceReduce), DeviceRole::Primary);
    }

    #[test]
    fn test_generation_categories_sum_to_total() {
        let mut system = homogeneous();
        let record = system.simulate(&ScenarioConfig::new(1, 128, 9)).unwrap();
        let g = &record.generation;

        let parts = g.fc + g.matmul + g.comm + g.etc + g.softmax;
        assert!((parts - g.all).abs() / g.all < 1e-9);
        assert!((g.qkv + g.proj + g.ff - g.fc).abs() / g.fc < 1e-9);
        assert_eq!(g.x2g, 0.0);
        assert!(record.summarization.all > 0.0);
        assert!(record.energy.all > 0.0);
        assert_eq!(record.scenario.accelerator, "NONE");
        assert_eq!(record.tag.bandwidth_ratio, 1.0);
        assert_eq!(record.tag.capacity_gib, 640);
    }

    #[test]
    fn test_homogeneous_ignores_overlap_flags() {
        let mut plain = ScenarioConfig::new(2, 64, 4);
        let baseline = homogeneous().simulate(&plain).unwrap();
        plain.pipelining = true;
        plain.ff_overlap = true;
        let flagged = homogeneous().simulate(&plain).unwrap();

        assert_eq!(baseline.generation, flagged.generation);
        assert!(baseline.generation.softmax > 0.0);
    }

    #[test]
    fn test_homogeneous_steps_match_primary_device() {
        let scenario = ScenarioConfig::new(1, 32, 3);
        let (graph, _) = homogeneous().evaluate_batch(1, &scenario).unwrap();

        let mut engine = ComputeEngine::new(DeviceConfig::test_default(), ScalingConfig::default());
        for op in graph.generation.iter().flatten() {
            let mut fresh = op.clone();
            let eval = engine.evaluate(&mut fresh).unwrap();
            assert_eq!(eval.time, op.time);
        }
    }

    #[test]
    fn test_pim_offload_routes_attention() {
        let mut system = with_pim();
        assert!(system.offloads_attention());
        let (graph, metrics) = system.evaluate_batch(2, &ScenarioConfig::new(2, 64, 3)).unwrap();

        // context is folded into score; softmax is hidden by the overlap pass
        for step in &graph.generation {
            for op in step {
                match op.name {
                    OpName::Context | OpName::Softmax => assert_eq!(op.time, 0.0),
                    OpName::Score => assert!(op.time > 0.0),
                    _ => {}
                }
            }
        }
        assert!(metrics.generation.x2g > 0.0);
        assert_eq!(metrics.generation.softmax, 0.0);
    }

    #[test]
    fn test_pipelining_never_slower() {
        let mut off = ScenarioConfig::new(4, 256, 5);
        let mut on = off.clone();
        on.pipelining = true;
        off.pipelining = false;

        let base = with_pim().simulate(&off).unwrap();
        let piped = with_pim().simulate(&on).unwrap();
        assert!(piped.generation.x2g <= base.generation.x2g);
        assert!(piped.generation.all <= base.generation.all);
    }

    #[test]
    fn test_power_constraint_follows_scenario() {
        let mut system = with_pim();
        let mut scenario = ScenarioConfig::new(4, 256, 8);
        let free = system.simulate(&scenario).unwrap();
        scenario.power_constraint = true;
        let limited = system.simulate(&scenario).unwrap();

        assert!(limited.scenario.power_constraint);
        assert!(limited.generation.matmul > free.generation.matmul);
        assert!(limited.generation.all > free.generation.all);
        // bank-level scale drops from 16 to 9 under the budget
        assert!((limited.tag.bandwidth_ratio * 16.0 - free.tag.bandwidth_ratio * 9.0).abs() < 1e-9);

        // and back again on the same system
        scenario.power_constraint = false;
        let again = system.simulate(&scenario).unwrap();
        assert_eq!(again.generation, free.generation);
    }

    #[test]
    fn test_projection_dominated_pipelining() {
        let pim = || {
            System::with_pim(
                ModelConfig::test_default(),
                DeviceConfig::test_default(),
                PimConfig::new(&AcceleratorConfig::new(PimType::Bank), false),
                Box::new(LinearOracle::new(2e-10)),
                ScalingConfig::default(),
            )
        };
        let mut scenario = ScenarioConfig::new(4, 256, 5);
        let base = pim().simulate(&scenario).unwrap();
        scenario.pipelining = true;
        let piped = pim().simulate(&scenario).unwrap();

        let (b, p) = (&base.generation, &piped.generation);
        assert!(b.qkv + b.proj > b.matmul);
        assert!(p.all <= b.all);
        assert!(p.qkv < b.qkv && p.qkv > 0.0);
        assert!(p.proj < b.proj);
        assert!(p.x2g <= b.x2g);
        assert!(p.x2g <= p.all);
        assert_eq!(p.softmax, 0.0);
    }

    #[test]
    fn test_unpartitionable_systems_rejected() {
        let mut gpu = DeviceConfig::test_default();
        gpu.num_devices = 0;
        let mut system = System::homogeneous(ModelConfig::test_default(), gpu, ScalingConfig::default());
        assert!(matches!(
            system.simulate(&ScenarioConfig::new(1, 64, 4)),
            Err(SimError::InvalidConfig(_))
        ));

        // 32 heads over 64 devices leaves some without a head
        let mut gpu = DeviceConfig::test_default();
        gpu.num_devices = 64;
        let mut system = System::homogeneous(ModelConfig::test_default(), gpu, ScalingConfig::default());
        assert!(matches!(
            system.evaluate_batch(1, &ScenarioConfig::new(1, 64, 4)),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ff_overlap_shortens_feed_forward() {
        let mut scenario = ScenarioConfig::new(4, 256, 5);
        let base = with_pim().simulate(&scenario).unwrap();
        scenario.ff_overlap = true;
        let overlapped = with_pim().simulate(&scenario).unwrap();

        assert!(overlapped.generation.ff < base.generation.ff);
        assert_eq!(overlapped.generation.qkv, base.generation.qkv);
    }

    #[test]
    fn test_cpu_offload_tag() {
        let mut system = System::with_cpu(
            ModelConfig::test_default(),
            DeviceConfig::test_default(),
            DeviceConfig::host_cpu(GpuType::A100a),
            ScalingConfig::default(),
        );
        let record = system.simulate(&ScenarioConfig::new(1, 64, 3)).unwrap();
        assert_eq!(record.scenario.accelerator, "CPU");
        assert_eq!(record.tag.capacity_gib, 640 + 2048);
        assert!(record.tag.bandwidth_ratio < 1.0);
        // the CPU path keeps softmax
        assert!(record.generation.softmax > 0.0);
    }

    #[test]
    fn test_request_mode_sums_batches() {
        let single = homogeneous().simulate(&ScenarioConfig::new(4, 64, 3)).unwrap();
        let remainder = homogeneous().simulate(&ScenarioConfig::new(2, 64, 3)).unwrap();

        let mut scenario = ScenarioConfig::new(4, 64, 3);
        scenario.num_requests = 10;
        let record = homogeneous().simulate(&scenario).unwrap();

        let expected = 2.0 * single.generation.all + remainder.generation.all;
        assert!((record.generation.all - expected).abs() / expected < 1e-9);
        assert_eq!(record.scenario.batch_size, 4);
    }

    #[test]
    fn test_ops_per_byte_doubles_for_int8() {
        let fp16 = homogeneous().tag();
        let mut model = ModelConfig::test_default();
        model.precision = Precision::W8A8;
        let int8 = System::homogeneous(model, DeviceConfig::test_default(), ScalingConfig::default()).tag();
        assert_eq!(int8.ops_per_byte, 2.0 * fp16.ops_per_byte);
        assert_eq!(int8.precision, "W8A8");
    }

    #[test]
    fn test_invalid_scenarios() {
        let mut system = homogeneous();
        assert!(matches!(
            system.simulate(&ScenarioConfig::new(0, 64, 3)),
            Err(SimError::InvalidScenario(_))
        ));
        assert!(matches!(
            system.simulate(&ScenarioConfig::new(1, 64, 1)),
            Err(SimError::InvalidScenario(_))
        ));
    }
}
