/// Compute engine for pricing operations on a GPU or host CPU fleet

use std::collections::HashMap;

use log::debug;

use super::arithmetic::{self, TileConfig, REG_TILE};
use super::{DeviceModel, Evaluation};
use crate::config::{DeviceClass, DeviceConfig, ScalingConfig};
use crate::error::Result;
use crate::graph::{Bound, Energy, OpKind, Operation};

/// Shape plus tiling class; two operations with the same key share tiles
type TileKey = (u64, u64, u64, u64, u64, OpKind);

/// Bytes moved at each level of the memory hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelTraffic {
    pub off_chip: f64,
    pub l2: f64,
    pub l1: f64,
    pub reg: f64,
}

pub struct ComputeEngine {
    config: DeviceConfig,
    scaling: ScalingConfig,
    tiles: HashMap<TileKey, TileConfig>,
}

impl ComputeEngine {
    pub fn new(config: DeviceConfig, scaling: ScalingConfig) -> Self {
        Self {
            config,
            scaling,
            tiles: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Cache tiles for a matmul-like operation, memoized per shape
    pub fn optimal_tile(&mut self, op: &Operation) -> TileConfig {
        let key = (op.m, op.n, op.k, op.num_op, op.dbyte(), op.kind);
        if let Some(tiles) = self.tiles.get(&key) {
            return *tiles;
        }

        let tiles = arithmetic::search_tiles(
            op,
            self.config.num_cores,
            self.config.l1_capacity,
            self.config.l2_capacity,
        );
        debug!(
            "{} tiles for {}x{}x{} (x{}): L1 {}x{}x{}, L2 {}x{}x{}",
            self.config.class.name(),
            op.m,
            op.n,
            op.k,
            op.num_op,
            tiles.l1_m,
            tiles.l1_n,
            tiles.l1_k,
            tiles.l2_m,
            tiles.l2_n,
            tiles.l2_k
        );
        self.tiles.insert(key, tiles);
        tiles
    }

    /// Number of distinct shapes tiled so far
    pub fn cached_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn traffic(&mut self, op: &Operation) -> LevelTraffic {
        if !op.kind.is_tiled() {
            let data = op.footprint().total();
            return LevelTraffic {
                off_chip: data,
                l2: data,
                l1: data,
                reg: data,
            };
        }

        let tiles = self.optimal_tile(op);
        let mnk = (op.m * op.n * op.k) as f64;
        LevelTraffic {
            off_chip: arithmetic::traffic_for_tile(op, tiles.l2_m, tiles.l2_n).iter().sum(),
            l2: arithmetic::traffic_for_tile(op, tiles.l1_m, tiles.l1_n).iter().sum(),
            l1: arithmetic::traffic_for_tile(op, REG_TILE.0, REG_TILE.1).iter().sum(),
            reg: 3.0 * mnk,
        }
    }

    /// Fraction of cores kept busy by `op`; only GPUs lose throughput to partial waves
    fn occupancy(&mut self, op: &Operation) -> f64 {
        if self.config.class != DeviceClass::Gpu {
            return 1.0;
        }
        let blocks = if op.kind == OpKind::Fc {
            let tiles = self.optimal_tile(op);
            arithmetic::thread_blocks(op, tiles.l1_m, tiles.l1_n)
        } else {
            op.num_op
        };
        arithmetic::core_utilization(blocks, self.config.num_cores)
    }

    pub fn compute_time(&mut self, op: &Operation) -> f64 {
        let occupancy = self.occupancy(op);
        // FP8 peak is twice the FP16 peak
        let precision_scale = (2 / op.dbyte()) as f64;
        let flops =
            self.config.peak_flops * self.scaling.max_compute_util * occupancy * precision_scale;
        op.flops() / flops
    }

    pub fn memory_time(&mut self, op: &Operation) -> f64 {
        let traffic = self.traffic(op);
        let bandwidth = self.config.memory_bandwidth;

        if self.config.class == DeviceClass::Gpu {
            match op.kind {
                OpKind::Activation => return arithmetic::activation_latency(traffic.off_chip, bandwidth),
                OpKind::Norm => return arithmetic::norm_latency(traffic.off_chip, bandwidth),
                _ => {}
            }
        }

        let off_chip_bw = bandwidth * self.scaling.max_memory_util * self.occupancy(op);
        (traffic.off_chip / off_chip_bw).max(traffic.l2 / self.config.l2_bandwidth)
    }

    fn energy(&self, op: &Operation, traffic: &LevelTraffic) -> Energy {
        let table = &self.config.energy;
        let alu = op.flops() / 2.0 * table.alu;
        let energy = match self.config.class {
            DeviceClass::Gpu => Energy {
                off_chip: traffic.off_chip * table.mem,
                l2: traffic.l2 * table.l2,
                l1: traffic.l1 * table.l1,
                reg: traffic.reg * table.reg,
                alu,
                comm: 0.0,
            },
            DeviceClass::Cpu => Energy {
                off_chip: traffic.off_chip * table.mem,
                alu,
                ..Default::default()
            },
        };
        energy * self.config.num_devices as f64
    }

    /// All-reduce among the fleet or a transfer to/from the attention device
    fn transfer(&self, op: &Operation) -> Evaluation {
        let bytes = op.payload_bytes();
        let interface_bw = self.config.interface_bandwidth;
        let n = self.config.num_devices;

        if self.config.class == DeviceClass::Cpu {
            return Evaluation {
                time: bytes / (interface_bw / 2.0),
                energy: Energy::default(),
            };
        }

        let time = match op.kind {
            OpKind::HostTransfer => bytes / (interface_bw / 2.0),
            // ring all-reduce: each device holds a partial sum of the output
            _ => arithmetic::interconnect_latency(bytes / n as f64, interface_bw) * n.saturating_sub(1) as f64,
        };
        Evaluation {
            time,
            energy: Energy::communication(n as f64 * bytes * self.config.energy.comm),
        }
    }
}

impl DeviceModel for ComputeEngine {
    fn name(&self) -> &str {
        self.config.class.name()
    }

    fn evaluate(&mut self, op: &mut Operation) -> Result<Evaluation> {
        let eval = if op.kind.is_transfer() {
            op.bound = Bound::Memory;
            op.off_traffic = 0.0;
            self.transfer(op)
        } else {
            let traffic = self.traffic(op);
            let compute = self.compute_time(op);
            let memory = self.memory_time(op);
            op.off_traffic = traffic.off_chip;
            op.bound = if compute > memory {
                Bound::Compute
            } else {
                Bound::Memory
            };
            Evaluation {
                time: compute.max(memory),
                energy: self.energy(op, &traffic),
            }
        };

        op.time = eval.time;
        op.energy = eval.energy;
        Ok(eval)
    }

    fn peak_memory_bandwidth(&self) -> f64 {
        self.config.memory_bandwidth
    }

    fn aggregate_memory_capacity(&self) -> u64 {
        self.config.aggregate_memory_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GpuType, Precision};
    use crate::graph::{Activation, OpName, Stage};

    fn gpu() -> ComputeEngine {
        ComputeEngine::new(DeviceConfig::test_default(), ScalingConfig::default())
    }

    fn op(name: OpName, kind: OpKind, precision: Precision, m: u64, n: u64, k: u64, num_op: u64) -> Operation {
        Operation::new(Stage::Generation, name, kind, precision, m, n, k, num_op).unwrap()
    }

    #[test]
    fn test_fp8_halves_compute_time() {
        let mut engine = gpu();
        let fp16 = op(OpName::Qkv, OpKind::Fc, Precision::W16A16, 512, 1536, 4096, 1);
        let fp8 = op(OpName::Qkv, OpKind::Fc, Precision::W8A8, 512, 1536, 4096, 1);

        let t16 = engine.compute_time(&fp16);
        let t8 = engine.compute_time(&fp8);
        // FP8 tiles may differ, so compare against the per-occupancy rate
        let occ16 = engine.occupancy(&fp16);
        let occ8 = engine.occupancy(&fp8);
        assert!((t16 * occ16 - 2.0 * t8 * occ8).abs() / (t16 * occ16) < 1e-9);
    }

    #[test]
    fn test_compute_time_full_occupancy() {
        let mut engine = gpu();
        // 108 heads fill exactly one wave
        let matmul = op(OpName::Score, OpKind::Matmul, Precision::W16A16, 1, 1024, 128, 108);
        let expected = matmul.flops() / (312.0e12 * 0.8);
        assert!((engine.compute_time(&matmul) - expected).abs() / expected < 1e-9);
    }

    #[test]
    fn test_tiles_are_memoized() {
        let mut engine = gpu();
        let a = op(OpName::Qkv, OpKind::Fc, Precision::W16A16, 64, 1536, 4096, 1);
        let first = engine.optimal_tile(&a);
        let second = engine.optimal_tile(&a);
        assert_eq!(first, second);
        assert_eq!(engine.cached_tiles(), 1);

        // same shape, different tiling class
        let mut b = a.clone();
        b.kind = OpKind::Matmul;
        engine.optimal_tile(&b);
        assert_eq!(engine.cached_tiles(), 2);
    }

    #[test]
    fn test_tiles_fit_caches() {
        let mut engine = gpu();
        let ff = op(OpName::FeedForward1, OpKind::Fc, Precision::W16A16, 2048, 2048, 4096, 1);
        let tiles = engine.optimal_tile(&ff);
        let config = engine.config();
        assert!(tiles.l1_footprint(ff.dbyte()) <= config.l1_capacity);
        assert!(tiles.l2_footprint(ff.dbyte()) <= config.l2_capacity as f64 || tiles.l2_is_l1());
    }

    #[test]
    fn test_bound_matches_max() {
        let mut engine = gpu();
        for (m, n, k) in [(1, 1536, 4096), (4096, 4096, 4096)] {
            let mut fc = op(OpName::Qkv, OpKind::Fc, Precision::W16A16, m, n, k, 1);
            let compute = engine.compute_time(&fc);
            let memory = engine.memory_time(&fc);
            let eval = engine.evaluate(&mut fc).unwrap();

            assert_eq!(eval.time, compute.max(memory));
            assert_eq!(fc.time, eval.time);
            let expected = if compute > memory { Bound::Compute } else { Bound::Memory };
            assert_eq!(fc.bound, expected);
            assert!(fc.off_traffic > 0.0);
        }

        // a single decode row is memory bound, a large square GEMM compute bound
        let mut gemv = op(OpName::Qkv, OpKind::Fc, Precision::W16A16, 1, 1536, 4096, 1);
        engine.evaluate(&mut gemv).unwrap();
        assert_eq!(gemv.bound, Bound::Memory);
        let mut gemm = op(OpName::Qkv, OpKind::Fc, Precision::W16A16, 4096, 4096, 4096, 1);
        engine.evaluate(&mut gemm).unwrap();
        assert_eq!(gemm.bound, Bound::Compute);
    }

    #[test]
    fn test_gpu_elementwise_curves() {
        let mut engine = gpu();
        let gelu = op(OpName::Act(Activation::Gelu), OpKind::Activation, Precision::W16A16, 4, 2048, 1, 1);
        let bytes = gelu.footprint().total();
        let expected = arithmetic::activation_latency(bytes, engine.config().memory_bandwidth);
        assert_eq!(engine.memory_time(&gelu), expected);

        let norm = op(OpName::Norm1, OpKind::Norm, Precision::W16A16, 4, 4096, 1, 1);
        let bytes = norm.footprint().total();
        let expected = arithmetic::norm_latency(bytes, engine.config().memory_bandwidth);
        assert_eq!(engine.memory_time(&norm), expected);
    }

    #[test]
    fn test_all_reduce() {
        let mut engine = gpu();
        let mut reduce = op(OpName::AllReduce, OpKind::DeviceReduce, Precision::W16A16, 4, 4096, 1, 1);
        let eval = engine.evaluate(&mut reduce).unwrap();

        let bytes = 4.0 * 4096.0 * 2.0;
        let expected = arithmetic::interconnect_latency(bytes / 8.0, 600.0e9) * 7.0;
        assert_eq!(eval.time, expected);
        assert_eq!(eval.energy.comm, 8.0 * bytes * 1.3 * 8.0);
        assert_eq!(eval.energy.total(), eval.energy.comm);
    }

    #[test]
    fn test_gpu_energy_scales_with_devices() {
        let mut fc = op(OpName::Proj, OpKind::Fc, Precision::W16A16, 8, 4096, 512, 1);
        let mut engine = gpu();
        let eight = engine.evaluate(&mut fc).unwrap().energy;

        let mut config = DeviceConfig::test_default();
        config.num_devices = 4;
        let mut engine = ComputeEngine::new(config, ScalingConfig::default());
        let four = engine.evaluate(&mut fc).unwrap().energy;

        assert!((eight.total() - 2.0 * four.total()).abs() / eight.total() < 1e-12);
        assert!(eight.l1 > 0.0 && eight.reg > 0.0);
    }

    #[test]
    fn test_cpu_has_no_occupancy_or_energy() {
        let mut cpu = ComputeEngine::new(DeviceConfig::host_cpu(GpuType::A100a), ScalingConfig::default());
        assert_eq!(cpu.name(), "CPU");

        let mut score = op(OpName::Score, OpKind::Matmul, Precision::W16A16, 1, 1024, 128, 3);
        let expected = score.flops() / (4.0e12 * 0.8);
        assert!((cpu.compute_time(&score) - expected).abs() / expected < 1e-9);

        let eval = cpu.evaluate(&mut score).unwrap();
        assert_eq!(eval.energy.total(), 0.0);

        let mut transfer = op(OpName::TransferOut, OpKind::HostTransfer, Precision::W16A16, 2, 1536, 1, 1);
        let eval = cpu.evaluate(&mut transfer).unwrap();
        assert_eq!(eval.time, transfer.payload_bytes() / (4.0 * 64.0e9 / 2.0));
        assert_eq!(eval.energy.total(), 0.0);
    }

    #[test]
    fn test_cpu_softmax_uses_roofline() {
        let mut cpu = ComputeEngine::new(DeviceConfig::host_cpu(GpuType::A100a), ScalingConfig::default());
        let softmax = op(OpName::Softmax, OpKind::Softmax, Precision::W16A16, 1, 1024, 1, 32);
        let expected = softmax.footprint().total() / (200.0e9 * 0.85);
        assert!((cpu.memory_time(&softmax) - expected).abs() / expected < 1e-9);
    }
}
