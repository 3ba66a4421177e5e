use clap::Parser;
use hetsim::{Config, ResultLog, ScenarioRecord};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use tabled::{settings::Style, Table, Tabled};

#[derive(Parser, Debug)]
#[command(author, version, about = "LLM inference latency and energy model", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the batch size
    #[arg(short, long)]
    batch: Option<u64>,

    /// Override the prompt length
    #[arg(long)]
    lin: Option<u64>,

    /// Override the number of generated tokens
    #[arg(long)]
    lout: Option<u64>,

    /// Also overlap projections with offloaded attention
    #[arg(long)]
    pipeline: bool,

    /// Overlap feed-forward layers with offloaded attention
    #[arg(long)]
    ff_overlap: bool,

    /// Run the accelerator under its power budget
    #[arg(long)]
    power_limit: bool,

    /// Total requests to serve in batches
    #[arg(long)]
    num_requests: Option<u64>,

    /// Minimal output (final metrics only)
    #[arg(short, long)]
    quiet: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Save the scenario record to a JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Append the scenario record to a CSV result log
    #[arg(long)]
    log: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        let scenario = &mut config.scenario;
        if let Some(batch) = self.batch {
            scenario.batch_size = batch;
        }
        if let Some(lin) = self.lin {
            scenario.input_len = lin;
        }
        if let Some(lout) = self.lout {
            scenario.output_len = lout;
        }
        if let Some(n) = self.num_requests {
            scenario.num_requests = n;
        }
        scenario.pipelining |= self.pipeline;
        scenario.ff_overlap |= self.ff_overlap;
        scenario.power_constraint |= self.power_limit;

        if self.output.is_some() {
            config.output.json = self.output.clone();
        }
        if self.log.is_some() {
            config.output.log = self.log.clone();
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Summarization (ms)")]
    summarization: String,
    #[tabled(rename = "Generation (ms/token)")]
    generation: String,
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let use_color = !args.no_color;

    if !args.quiet {
        print_header("LLM Inference Cost Model", use_color);
        println!("Loading configuration from: {:?}\n", args.config);
    }

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);

    if !args.quiet {
        print_configuration(&config, use_color);
    }

    let mut system = match config.build_system() {
        Ok(system) => system,
        Err(e) => {
            eprintln!("Error building system: {}", e);
            std::process::exit(1);
        }
    };

    let start_time = Instant::now();
    let record = match system.simulate(&config.scenario) {
        Ok(record) => record,
        Err(e) => {
            eprintln!("Error simulating scenario: {}", e);
            std::process::exit(1);
        }
    };
    let elapsed = start_time.elapsed();

    print_record(&record, elapsed, args.quiet, use_color);

    if let Some(path) = &config.output.log {
        match ResultLog::new(path).append(&record) {
            Ok(()) => {
                if !args.quiet {
                    println!("\nResult appended to: {:?}", path);
                }
            }
            Err(e) => eprintln!("Error writing result log: {}", e),
        }
    }

    if let Some(path) = &config.output.json {
        match save_record_json(&record, path) {
            Ok(()) => {
                if !args.quiet {
                    println!("Record saved to: {:?}", path);
                }
            }
            Err(e) => eprintln!("Error saving record to JSON: {}", e),
        }
    }
}

#[cfg(feature = "cli")]
fn print_header(title: &str, use_color: bool) {
    if use_color {
        println!("{}", title.bright_cyan().bold());
    } else {
        println!("{}", title);
    }
}

#[cfg(not(feature = "cli"))]
fn print_header(title: &str, _use_color: bool) {
    println!("{}", title);
}

fn print_configuration(config: &Config, use_color: bool) {
    print_header("Configuration:", use_color);
    let gpu = config.primary_device();
    println!("  System: {:?} ({} x {})", config.system.kind, gpu.num_devices, config.system.gpu);
    if let Some(accel) = &config.accelerator {
        println!(
            "  Accelerator: {} x {} stacks",
            accel.pim_type.name(),
            accel.num_stacks
        );
    }
    println!("  Model: {} ({})", config.model.name, config.model.precision);
    let scenario = &config.scenario;
    println!(
        "  Scenario: batch {}, Lin {}, Lout {}",
        scenario.batch_size, scenario.input_len, scenario.output_len
    );
    if scenario.num_requests > 0 {
        println!("  Requests: {}", scenario.num_requests);
    }
    println!();
}

#[cfg(feature = "cli")]
fn print_record(record: &ScenarioRecord, real_time: std::time::Duration, quiet: bool, use_color: bool) {
    if quiet {
        println!(
            "Latency: {:.3}ms/token | Throughput: {:.2} tokens/s | Energy: {:.1} nJ/token",
            record.latency_ms(),
            record.throughput(),
            record.energy.all
        );
        return;
    }

    if use_color {
        println!(
            "{} ({:.2}s real)",
            "Scenario Complete".bright_green().bold(),
            real_time.as_secs_f64()
        );
        println!("{}", "━".repeat(72).bright_black());
        println!("\n{}", "TIME BREAKDOWN".yellow().bold());
    } else {
        println!("Scenario Complete ({:.2}s real)", real_time.as_secs_f64());
        println!("{}", "━".repeat(72));
        println!("\nTIME BREAKDOWN");
    }

    let s = &record.summarization;
    let g = &record.generation;
    let row = |category: &str, summarization: Option<f64>, generation: f64| CategoryRow {
        category: category.to_string(),
        summarization: summarization.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v)),
        generation: format!("{:.3}", generation),
    };
    let rows = vec![
        row("FC", Some(s.fc), g.fc),
        row("Attention matmul", Some(s.matmul), g.matmul),
        row("Softmax", Some(s.softmax), g.softmax),
        row("Communication", Some(s.comm), g.comm),
        row("  GPU-GPU", None, g.g2g),
        row("  Offload link", None, g.x2g),
        row("Activation", Some(s.act), g.act),
        row("Layer norm", Some(s.norm), g.norm),
        row("Total", Some(s.all), g.all),
    ];
    println!("{}", Table::new(&rows).with(Style::rounded()));

    if use_color {
        println!("\n{}", "SUMMARY".yellow().bold());
    } else {
        println!("\nSUMMARY");
    }
    println!("  • Accelerator: {}", record.scenario.accelerator);
    println!("  • Throughput: {:.2} tokens/s", record.throughput());
    println!("  • Energy: {:.1} nJ/token", record.energy.all);
    println!(
        "  • Required memory: {:.1} GiB of {} GiB",
        record.scenario.required_capacity / (1024.0 * 1024.0 * 1024.0),
        record.tag.capacity_gib
    );
}

#[cfg(not(feature = "cli"))]
fn print_record(record: &ScenarioRecord, _real_time: std::time::Duration, _quiet: bool, _use_color: bool) {
    record.print();
}

fn save_record_json(record: &ScenarioRecord, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, serde_json::to_string_pretty(record)?)?;
    Ok(())
}
