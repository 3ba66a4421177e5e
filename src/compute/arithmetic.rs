/// Closed-form cost formulas shared by the device models

use crate::graph::{OpKind, Operation};

/// Tile edges tried for the L1 (per-core) tile
pub const TILE_CANDIDATES: [u64; 11] = [8, 16, 32, 64, 128, 192, 256, 320, 384, 448, 512];

/// Reduction depth of the L1 tile
pub const L1_TILE_K: u64 = 32;

/// Register tile used for L1 traffic
pub const REG_TILE: (u64, u64) = (16, 16);

/// Reference bandwidth the elementwise kernel curves were fitted on (A100)
const FIT_BANDWIDTH: f64 = 1555.0 * 1000.0 * 1000.0 * 1000.0;

/// Interconnect bandwidth the all-reduce curve was fitted on (NVLink3)
const FIT_INTERFACE_BANDWIDTH: f64 = 600.0 * 1000.0 * 1000.0 * 1000.0;

/// Cache tiles chosen for a matmul-like operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileConfig {
    pub l1_m: u64,
    pub l1_n: u64,
    pub l1_k: u64,
    pub l2_m: u64,
    pub l2_n: u64,
    /// Empirical L2 reduction depth (k / 64), may be fractional
    pub l2_k: f64,
}

impl TileConfig {
    /// Bytes the L1 tile occupies: two input panels plus the output block
    pub fn l1_footprint(&self, dbyte: u64) -> u64 {
        tile_footprint(self.l1_m, self.l1_n, self.l1_k as f64, dbyte) as u64
    }

    pub fn l2_footprint(&self, dbyte: u64) -> f64 {
        tile_footprint(self.l2_m, self.l2_n, self.l2_k, dbyte)
    }

    pub fn l2_is_l1(&self) -> bool {
        self.l2_m == self.l1_m && self.l2_n == self.l1_n
    }
}

fn tile_footprint(tm: u64, tn: u64, tk: f64, dbyte: u64) -> f64 {
    let b = dbyte as f64;
    (tm + tn) as f64 * tk * b + (tm * tn) as f64 * b
}

/// Off-tile traffic in bytes when `op` is processed in `tm x tn` output tiles:
/// the A panel is re-read per column tile, the B panel per row tile.
pub fn traffic_for_tile(op: &Operation, tm: u64, tn: u64) -> [f64; 3] {
    let (m, n, k) = (op.m as f64, op.n as f64, op.k as f64);
    let scale = (op.dbyte() * op.num_op) as f64;
    [
        op.n.div_ceil(tn) as f64 * m * k * scale,
        op.m.div_ceil(tm) as f64 * n * k * scale,
        m * n * scale,
    ]
}

/// Thread blocks launched for `op` with an L1 tile of `tm x tn`
pub fn thread_blocks(op: &Operation, tm: u64, tn: u64) -> u64 {
    match op.kind {
        OpKind::Fc => op.m.div_ceil(tm) * op.n.div_ceil(tn) * op.num_op,
        _ => op.num_op,
    }
}

/// Fraction of cores busy over all waves
pub fn core_utilization(thread_blocks: u64, num_cores: u64) -> f64 {
    let slots = thread_blocks.div_ceil(num_cores) * num_cores;
    thread_blocks as f64 / slots as f64
}

/// Search L1 then L2 tiles for a matmul-like operation.
///
/// The L1 tile minimizes L2 traffic weighted by the squared wave
/// underutilization. The L2 tile is a multiple of the L1 tile that
/// minimizes off-chip traffic; it may exceed the L2 capacity only when it
/// equals the L1 tile.
pub fn search_tiles(op: &Operation, num_cores: u64, l1_capacity: u64, l2_capacity: u64) -> TileConfig {
    let dbyte = op.dbyte();

    let mut l1 = (TILE_CANDIDATES[0].min(op.m), TILE_CANDIDATES[0].min(op.n));
    let mut min_cost = f64::INFINITY;
    for &cand_m in &TILE_CANDIDATES {
        for &cand_n in &TILE_CANDIDATES {
            let tm = cand_m.min(op.m);
            let tn = cand_n.min(op.n);
            if tile_footprint(tm, tn, L1_TILE_K as f64, dbyte) > l1_capacity as f64 {
                continue;
            }

            let l2_access: f64 = traffic_for_tile(op, tm, tn).iter().sum();
            let util = core_utilization(thread_blocks(op, tm, tn), num_cores);
            let cost = l2_access / (util * util);
            if cost < min_cost {
                min_cost = cost;
                l1 = (tm, tn);
            }
        }
    }

    let (l1_m, l1_n) = l1;
    let l2_k = op.k as f64 / 64.0;
    let (m, n, k) = (op.m as f64, op.n as f64, op.k as f64);
    let b = dbyte as f64;

    let multiples = |tile: u64, dim: u64| {
        (1..=dim / tile)
            .map(move |i| tile * i)
            .chain(std::iter::once(dim))
    };

    let mut l2 = (l1_m, l1_n);
    let mut min_access = f64::INFINITY;
    for cand_m in multiples(l1_m, op.m) {
        for cand_n in multiples(l1_n, op.n) {
            let tm = cand_m.min(op.m);
            let tn = cand_n.min(op.n);
            let fits = tile_footprint(tm, tn, l2_k, dbyte) <= l2_capacity as f64;
            if !fits && (tm != l1_m || tn != l1_n) {
                continue;
            }

            let access = op.m.div_ceil(tm) as f64 * n * k * b
                + op.n.div_ceil(tn) as f64 * m * k * b
                + m * n * b;
            if access < min_access {
                min_access = access;
                l2 = (tm, tn);
            }
        }
    }

    TileConfig {
        l1_m,
        l1_n,
        l1_k: L1_TILE_K,
        l2_m: l2.0,
        l2_n: l2.1,
        l2_k,
    }
}

/// Fitted latency of an elementwise activation kernel (seconds)
pub fn activation_latency(bytes: f64, memory_bandwidth: f64) -> f64 {
    (0.000000447 * (FIT_BANDWIDTH / memory_bandwidth) * bytes + 8.29) / 1e6
}

/// Fitted latency of a normalization kernel (seconds)
pub fn norm_latency(bytes: f64, memory_bandwidth: f64) -> f64 {
    (0.0000016 * (FIT_BANDWIDTH / memory_bandwidth) * bytes + 6.87) / 1e6
}

/// Latency of one point-to-point message of `bytes` over the device
/// interconnect: fixed overhead plus a fitted slope, never faster than
/// the one-direction link bandwidth.
pub fn interconnect_latency(bytes: f64, interface_bandwidth: f64) -> f64 {
    let fitted_ns = 6060.0 + 0.009 * bytes * (FIT_INTERFACE_BANDWIDTH / interface_bandwidth);
    (fitted_ns / 1e9).max(bytes / (interface_bandwidth / 2.0))
}
