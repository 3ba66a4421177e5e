//! Adapter around the external Ramulator2 PIM build.
//!
//! Each distinct attention shape is simulated once: the adapter generates a
//! command trace with the matching `trace_gen/gen_trace_attacc_*.py` script,
//! runs `ramulator2` on it and keeps the command counts in a CSV cache that
//! survives across runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};

use super::{AttentionCost, AttentionQuery, CommandCounters, MemorySimulator};
use crate::config::{MemorySimulatorConfig, PimType};
use crate::error::{Result, SimError};

/// Heads simulated per stack in fast mode
const FAST_MODE_HEADS: u64 = 64;

/// One row of the result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheRecord {
    #[serde(rename = "L")]
    context_len: u64,
    nhead: u64,
    dhead: u64,
    dbyte: u64,
    pim_type: String,
    #[serde(deserialize_with = "deserialize_flag")]
    power_constraint: bool,
    cycle: u64,
    mac: u64,
    softmax: u64,
    mvgb: u64,
    mvsb: u64,
    wrgb: u64,
}

/// Accepts `true`/`false` as well as the `True`/`False` and `1`/`0`
/// spellings found in caches written by the Python tooling
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid flag: {other}"))),
    }
}

impl CacheRecord {
    fn new(key: &RunKey, counters: &CommandCounters) -> Self {
        Self {
            context_len: key.context_len,
            nhead: key.heads_per_stack,
            dhead: key.head_dim,
            dbyte: key.dbyte,
            pim_type: key.pim_type.name().to_string(),
            power_constraint: key.power_constraint,
            cycle: counters.cycles,
            mac: counters.mac,
            softmax: counters.softmax,
            mvgb: counters.mvgb,
            mvsb: counters.mvsb,
            wrgb: counters.wrgb,
        }
    }

    fn matches(&self, key: &RunKey) -> bool {
        self.context_len == key.context_len
            && self.nhead == key.heads_per_stack
            && self.dhead == key.head_dim
            && self.dbyte == key.dbyte
            && self.power_constraint == key.power_constraint
            && self.pim_type == key.pim_type.name()
    }

    fn counters(&self) -> CommandCounters {
        CommandCounters {
            cycles: self.cycle,
            mac: self.mac,
            softmax: self.softmax,
            mvgb: self.mvgb,
            mvsb: self.mvsb,
            wrgb: self.wrgb,
        }
    }
}

/// Parameters of a single simulator run
#[derive(Debug, Clone, Copy)]
struct RunKey {
    pim_type: PimType,
    context_len: u64,
    heads_per_stack: u64,
    head_dim: u64,
    dbyte: u64,
    power_constraint: bool,
}

impl RunKey {
    fn file_stem(&self) -> String {
        format!(
            "attacc_l{}_nattn{}_dhead{}_dbyte{}_pc{}",
            self.context_len,
            self.heads_per_stack,
            self.head_dim,
            self.dbyte,
            u8::from(self.power_constraint)
        )
    }
}

pub struct Ramulator {
    dir: PathBuf,
    cache_path: PathBuf,
    fast_mode: bool,
    tck_ns: f64,
    num_stacks: u64,
    records: Vec<CacheRecord>,
}

impl Ramulator {
    /// Open the adapter, loading any cached results from disk.
    ///
    /// The simulator directory is only needed on a cache miss, so a missing
    /// install is not an error here.
    pub fn new(config: &MemorySimulatorConfig, num_stacks: u64) -> Result<Self> {
        let records = if config.cache.exists() {
            let mut reader = csv::Reader::from_path(&config.cache)?;
            reader
                .deserialize()
                .collect::<std::result::Result<Vec<CacheRecord>, _>>()?
        } else {
            Vec::new()
        };
        debug!(
            "loaded {} cached memory-simulator results from {}",
            records.len(),
            config.cache.display()
        );

        Ok(Self {
            dir: config.dir.clone(),
            cache_path: config.cache.clone(),
            fast_mode: config.fast_mode,
            tck_ns: config.tck_ns,
            num_stacks,
            records,
        })
    }

    pub fn cached_results(&self) -> usize {
        self.records.len()
    }

    /// Heads simulated on one stack and how many times that set repeats
    fn partition(&self, num_heads: u64) -> (u64, u64) {
        let per_stack = num_heads.div_ceil(self.num_stacks);
        if self.fast_mode {
            (FAST_MODE_HEADS, per_stack.div_ceil(FAST_MODE_HEADS))
        } else {
            (per_stack, 1)
        }
    }

    fn run(&self, key: &RunKey) -> Result<CommandCounters> {
        if !self.dir.exists() {
            return Err(SimError::MemorySimulatorUnavailable(self.dir.clone()));
        }

        let stem = key.file_stem();
        let trace_path = self.dir.join(format!("{stem}.trace"));
        let yaml_path = self.dir.join(format!("{stem}.yaml"));
        fs::write(&yaml_path, simulator_yaml(&trace_path, key.power_constraint))?;

        info!(
            "running memory simulator: {} L={} heads/stack={} dhead={} dbyte={}",
            key.pim_type.name(),
            key.context_len,
            key.heads_per_stack,
            key.head_dim,
            key.dbyte
        );
        let result = self.simulate(key, &trace_path, &yaml_path);

        for path in [&trace_path, &yaml_path] {
            if let Err(e) = fs::remove_file(path) {
                warn!("could not remove {}: {}", path.display(), e);
            }
        }
        result
    }

    fn simulate(&self, key: &RunKey, trace_path: &Path, yaml_path: &Path) -> Result<CommandCounters> {
        let script = self
            .dir
            .join("trace_gen")
            .join(format!("gen_trace_attacc_{}.py", key.pim_type.trace_name()));
        let status = Command::new("python")
            .arg(&script)
            .arg("--dhead")
            .arg(key.head_dim.to_string())
            .arg("--nhead")
            .arg(key.heads_per_stack.to_string())
            .arg("--seqlen")
            .arg(key.context_len.to_string())
            .arg("--dbyte")
            .arg(key.dbyte.to_string())
            .arg("--output")
            .arg(trace_path)
            .status()?;
        if !status.success() {
            return Err(SimError::MemorySimulatorFailed(format!(
                "{} exited with {}",
                script.display(),
                status
            )));
        }

        let binary = self.dir.join("ramulator2");
        let output = Command::new(&binary).arg("-f").arg(yaml_path).output()?;
        if !output.status.success() {
            return Err(SimError::MemorySimulatorFailed(format!(
                "{} exited with {}",
                binary.display(),
                output.status
            )));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn save_cache(&self) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.cache_path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl MemorySimulator for Ramulator {
    fn attention_cost(&mut self, query: &AttentionQuery) -> Result<AttentionCost> {
        let (heads_per_stack, group) = self.partition(query.num_heads);
        let key = RunKey {
            pim_type: query.pim_type,
            context_len: query.context_len,
            heads_per_stack,
            head_dim: query.head_dim,
            dbyte: query.dbyte,
            power_constraint: query.power_constraint,
        };

        let counters = match self.records.iter().find(|r| r.matches(&key)) {
            Some(record) => record.counters(),
            None => {
                let counters = self.run(&key)?;
                self.records.push(CacheRecord::new(&key, &counters));
                self.save_cache()?;
                counters
            }
        };

        Ok(counters.cost(query.pim_type, self.num_stacks, group, self.tck_ns))
    }
}

/// Sum the command statistics printed by a simulator run
fn parse_output(stdout: &str) -> Result<CommandCounters> {
    let mut counters = CommandCounters::default();

    for line in stdout.lines().map(str::trim) {
        let slot = if line.contains("mac") {
            &mut counters.mac
        } else if line.contains("softmax_requests") {
            &mut counters.softmax
        } else if line.contains("move_to_gemv_buffer") {
            &mut counters.mvgb
        } else if line.contains("move_to_softmax_buffer") {
            &mut counters.mvsb
        } else if line.contains("write_to_gemv_buffer") {
            &mut counters.wrgb
        } else if line.contains("memory_system_cycles") {
            &mut counters.cycles
        } else {
            continue;
        };

        let value = line
            .split_whitespace()
            .last()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| SimError::MemorySimulatorFailed(format!("unparsable line: {line}")))?;
        *slot += value;
    }

    Ok(counters)
}

fn simulator_yaml(trace_path: &Path, power_constraint: bool) -> String {
    let timing = if power_constraint {
        "HBM3_5.2Gbps"
    } else {
        "HBM3_5.2Gbps_NPC"
    };

    format!(
        "Frontend:
  impl: PIMLoadStoreTrace
  path: {trace}
  clock_ratio: 1

  Translation:
    impl: NoTranslation
    max_addr: 2147483648

MemorySystem:
  impl: PIMDRAM
  clock_ratio: 1
  DRAM:
    impl: HBM3-PIM
    org:
      preset: HBM3_8Gb_2R
      channel: 16
    timing:
      preset: {timing}

  Controller:
    impl: HBM3-PIM
    Scheduler:
      impl: PIM
    RefreshManager:
      impl: AllBankHBM3
    plugins:

  AddrMapper:
    impl: HBM3-PIM
",
        trace = trace_path.display(),
        timing = timing
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CACHE: &str = "\
L,nhead,dhead,dbyte,pim_type,power_constraint,cycle,mac,softmax,mvgb,mvsb,wrgb
1024,7,128,2,BA,false,20000,512,16,8,8,32
1024,64,128,2,BA,false,150000,4096,128,64,64,256
";

    fn config(dir: &TempDir, fast_mode: bool) -> MemorySimulatorConfig {
        let cache = dir.path().join("ramulator.out");
        fs::write(&cache, CACHE).unwrap();
        MemorySimulatorConfig {
            dir: dir.path().join("missing-ramulator"),
            cache,
            fast_mode,
            tck_ns: 0.769,
        }
    }

    fn query(context_len: u64, num_heads: u64) -> AttentionQuery {
        AttentionQuery {
            pim_type: PimType::Bank,
            context_len,
            num_heads,
            head_dim: 128,
            dbyte: 2,
            power_constraint: false,
        }
    }

    #[test]
    fn test_cache_hit_skips_simulator() {
        let dir = TempDir::new().unwrap();
        let mut sim = Ramulator::new(&config(&dir, false), 5).unwrap();
        assert_eq!(sim.cached_results(), 2);

        // 32 heads over 5 stacks -> 7 per stack
        let cost = sim.attention_cost(&query(1024, 32)).unwrap();
        assert!((cost.time - 0.769 * 20000.0 * 1e-9).abs() < 1e-15);
        assert_eq!(cost.traffic.cell, 512.0 * 32.0 * 64.0 * 5.0);
        assert_eq!(cost.traffic.interposer, 32.0 * 32.0 * 5.0);
    }

    #[test]
    fn test_fast_mode_groups_heads() {
        let dir = TempDir::new().unwrap();
        let mut sim = Ramulator::new(&config(&dir, true), 5).unwrap();

        // 640 heads -> 128 per stack -> two groups of 64
        let cost = sim.attention_cost(&query(1024, 640)).unwrap();
        assert!((cost.time - 2.0 * 0.769 * 150000.0 * 1e-9).abs() < 1e-15);
        assert_eq!(cost.traffic.cell, 4096.0 * 32.0 * 64.0 * 5.0 * 2.0);
    }

    #[test]
    fn test_python_cache_flags() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("ramulator.out");
        fs::write(
            &cache,
            "L,nhead,dhead,dbyte,pim_type,power_constraint,cycle,mac,softmax,mvgb,mvsb,wrgb\n\
             1024,7,128,2,BA,True,30000,512,16,8,8,32\n\
             1024,7,128,2,BA,False,20000,512,16,8,8,32\n",
        )
        .unwrap();
        let config = MemorySimulatorConfig {
            cache,
            ..config_without_reset(&dir)
        };
        let mut sim = Ramulator::new(&config, 5).unwrap();
        assert_eq!(sim.cached_results(), 2);

        let mut limited = query(1024, 32);
        limited.power_constraint = true;
        let cost = sim.attention_cost(&limited).unwrap();
        assert!((cost.time - 0.769 * 30000.0 * 1e-9).abs() < 1e-15);
        let cost = sim.attention_cost(&query(1024, 32)).unwrap();
        assert!((cost.time - 0.769 * 20000.0 * 1e-9).abs() < 1e-15);
    }

    #[test]
    fn test_bad_cache_flag_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("ramulator.out");
        fs::write(
            &cache,
            "L,nhead,dhead,dbyte,pim_type,power_constraint,cycle,mac,softmax,mvgb,mvsb,wrgb\n\
             1024,7,128,2,BA,maybe,30000,512,16,8,8,32\n",
        )
        .unwrap();
        let config = MemorySimulatorConfig {
            cache,
            ..config_without_reset(&dir)
        };
        assert!(matches!(Ramulator::new(&config, 5), Err(SimError::Csv(_))));
    }

    #[test]
    fn test_miss_without_simulator() {
        let dir = TempDir::new().unwrap();
        let mut sim = Ramulator::new(&config(&dir, false), 5).unwrap();
        let err = sim.attention_cost(&query(2048, 32)).unwrap_err();
        assert!(matches!(err, SimError::MemorySimulatorUnavailable(_)));
    }

    #[test]
    fn test_missing_cache_starts_empty() {
        let dir = TempDir::new().unwrap();
        let config = MemorySimulatorConfig {
            cache: dir.path().join("none.csv"),
            ..Default::default()
        };
        let sim = Ramulator::new(&config, 5).unwrap();
        assert_eq!(sim.cached_results(), 0);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut sim = Ramulator::new(&config(&dir, false), 5).unwrap();
        let key = RunKey {
            pim_type: PimType::BankGroup,
            context_len: 4096,
            heads_per_stack: 13,
            head_dim: 128,
            dbyte: 1,
            power_constraint: true,
        };
        let counters = CommandCounters {
            cycles: 1,
            mac: 2,
            softmax: 3,
            mvgb: 4,
            mvsb: 5,
            wrgb: 6,
        };
        sim.records.push(CacheRecord::new(&key, &counters));
        sim.save_cache().unwrap();

        let reloaded = Ramulator::new(&config_without_reset(&dir), 5).unwrap();
        assert_eq!(reloaded.cached_results(), 3);
        let record = reloaded.records.iter().find(|r| r.matches(&key)).unwrap();
        assert_eq!(record.counters(), counters);
        assert_eq!(record.pim_type, "BG");
    }

    fn config_without_reset(dir: &TempDir) -> MemorySimulatorConfig {
        MemorySimulatorConfig {
            dir: dir.path().join("missing-ramulator"),
            cache: dir.path().join("ramulator.out"),
            fast_mode: false,
            tck_ns: 0.769,
        }
    }

    #[test]
    fn test_parse_output() {
        let stdout = "
            Frontend:
              impl: PIMLoadStoreTrace
            memory_system_cycles: 12345
            total_num_mac_requests: 100
            total_num_softmax_requests: 7
            total_num_move_to_gemv_buffer_requests: 3
            total_num_move_to_softmax_buffer_requests: 4
            total_num_write_to_gemv_buffer_requests: 5
            total_num_mac_requests: 20
        ";
        let counters = parse_output(stdout).unwrap();
        assert_eq!(counters.cycles, 12345);
        assert_eq!(counters.mac, 120);
        assert_eq!(counters.softmax, 7);
        assert_eq!(counters.mvgb, 3);
        assert_eq!(counters.mvsb, 4);
        assert_eq!(counters.wrgb, 5);
    }

    #[test]
    fn test_parse_rejects_garbage_counts() {
        assert!(parse_output("total_num_mac_requests: many").is_err());
    }

    #[test]
    fn test_yaml_timing_preset() {
        let path = Path::new("/tmp/x.trace");
        assert!(simulator_yaml(path, true).contains("preset: HBM3_5.2Gbps\n"));
        assert!(simulator_yaml(path, false).contains("preset: HBM3_5.2Gbps_NPC"));
        assert!(simulator_yaml(path, false).contains("path: /tmp/x.trace"));
    }

    #[test]
    fn test_file_stem() {
        let key = RunKey {
            pim_type: PimType::Bank,
            context_len: 2048,
            heads_per_stack: 7,
            head_dim: 128,
            dbyte: 2,
            power_constraint: true,
        };
        assert_eq!(key.file_stem(), "attacc_l2048_nattn7_dhead128_dbyte2_pc1");
    }
}
