//! Hybrid-memory simulator CLI.
//!
//! This binary wires trace files and tier configuration into a simulation
//! run. It performs:
//! 1. **Configuration:** two positional JSON tier files (fast, slow), with
//!    optional policy/driver sections in the fast-tier file, plus an
//!    optional `--mapping` override file.
//! 2. **Run control:** warmup and measurement lengths, heartbeat.
//! 3. **Output:** sectioned text statistics to stdout and `--stats`, JSON
//!    to `--json`, and an optional replayable memory trace.

use std::fs::{self, File};
use std::io::BufWriter;
use std::process;

use clap::Parser;
use serde::Deserialize;

use tiersim_core::common::SimError;
use tiersim_core::config::{Config, TierFile};
use tiersim_core::mem::controller::MemoryTrace;
use tiersim_core::sim::{RunOptions, Simulator, TraceFormat, TraceReader};

#[derive(Parser, Debug)]
#[command(
    name = "tiersim",
    author,
    version,
    about = "Cycle-level hybrid-memory simulator with OS-transparent data placement",
    long_about = "Replays one memory-access trace per simulated CPU against a two-tier \
                  main memory (fast HBM-class + slow DDR-class) managed by an \
                  OS-transparent placement policy (CAMEO, MemPod, or variable \
                  granularity).\n\nExamples:\n  tiersim fast.json slow.json trace0.txt\n  \
                  tiersim --warmup-instructions 1000000 --simulation-instructions 2000000 \
                  fast.json slow.json cpu0.txt cpu1.txt"
)]
struct Cli {
    /// Accesses to fast-forward before measurement (default: 0, or 20% of
    /// the simulation length when that is given).
    #[arg(long, value_name = "N")]
    warmup_instructions: Option<u64>,

    /// Measured accesses to run; runs to trace end if omitted.
    #[arg(long, value_name = "N")]
    simulation_instructions: Option<u64>,

    /// Suppress periodic progress lines.
    #[arg(long)]
    hide_heartbeat: bool,

    /// Parse traces in the CloudSuite comma-separated format.
    #[arg(long)]
    cloudsuite: bool,

    /// Write statistics as JSON to PATH, or to stdout when PATH is omitted.
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "")]
    json: Option<String>,

    /// Also write the text statistics to this file.
    #[arg(long, value_name = "PATH")]
    stats: Option<String>,

    /// JSON file overriding per-tier bank/row address mapping.
    #[arg(long, value_name = "PATH")]
    mapping: Option<String>,

    /// Emit every routed demand access as a replayable trace file.
    #[arg(long, value_name = "PATH")]
    trace_out: Option<String>,

    /// Record hardware addresses in the output trace instead of physical.
    #[arg(long, requires = "trace_out")]
    trace_hardware: bool,

    /// Fast-tier configuration file (JSON).
    #[arg(value_name = "FAST_CONFIG")]
    fast_config: String,

    /// Slow-tier configuration file (JSON).
    #[arg(value_name = "SLOW_CONFIG")]
    slow_config: String,

    /// One trace file per simulated CPU.
    #[arg(value_name = "TRACE", required = true)]
    traces: Vec<String>,
}

/// Per-tier address-mapping overrides (`--mapping`).
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MappingOverride {
    banks: Option<usize>,
    row_bytes: Option<u64>,
}

/// The `--mapping` file: overrides for either tier.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MappingFile {
    fast: MappingOverride,
    slow: MappingOverride,
}

fn load_config(cli: &Cli) -> Result<Config, SimError> {
    let fast: TierFile = serde_json::from_str(&fs::read_to_string(&cli.fast_config)?)?;
    let slow: TierFile = serde_json::from_str(&fs::read_to_string(&cli.slow_config)?)?;
    let mut config = Config::from_tier_files(fast, slow)?;

    if let Some(path) = &cli.mapping {
        let mapping: MappingFile = serde_json::from_str(&fs::read_to_string(path)?)?;
        if let Some(banks) = mapping.fast.banks {
            config.fast.banks = banks;
        }
        if let Some(row_bytes) = mapping.fast.row_bytes {
            config.fast.row_bytes = row_bytes;
        }
        if let Some(banks) = mapping.slow.banks {
            config.slow.banks = banks;
        }
        if let Some(row_bytes) = mapping.slow.row_bytes {
            config.slow.row_bytes = row_bytes;
        }
        config.validate()?;
    }
    Ok(config)
}

fn build_simulator(cli: &Cli, config: &Config) -> Result<Simulator, SimError> {
    let format = if cli.cloudsuite {
        TraceFormat::CloudSuite
    } else {
        TraceFormat::Plain
    };
    let readers = cli
        .traces
        .iter()
        .map(|path| TraceReader::from_path(path, format))
        .collect::<Result<Vec<_>, _>>()?;

    // the original heuristic: unstated warmup defaults to a fifth of the
    // measured run
    let warmup = cli.warmup_instructions.unwrap_or_else(|| {
        cli.simulation_instructions.map_or(0, |n| n / 5)
    });
    let options = RunOptions {
        warmup_accesses: warmup,
        simulation_accesses: cli.simulation_instructions,
        hide_heartbeat: cli.hide_heartbeat,
    };

    let mut simulator = Simulator::new(config, readers, options)?;
    if let Some(path) = &cli.trace_out {
        let writer = BufWriter::new(File::create(path)?);
        simulator.set_memory_trace(MemoryTrace::new(Box::new(writer), cli.trace_hardware));
    }
    Ok(simulator)
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let config = load_config(cli)?;
    let mut simulator = build_simulator(cli, &config)?;
    let stats = simulator.run()?;

    stats.print();
    if let Some(path) = &cli.stats {
        let mut file = BufWriter::new(File::create(path)?);
        stats.write_sections(&mut file, &[])?;
    }
    if let Some(path) = &cli.json {
        let json = serde_json::to_string_pretty(&stats.to_json())?;
        if path.is_empty() {
            println!("{json}");
        } else {
            fs::write(path, json)?;
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(&cli) {
        Ok(()) => {}
        Err(SimError::Deadlock { cycles }) => {
            eprintln!("tiersim: deadlock after {cycles} cycles without progress");
            process::abort();
        }
        Err(err) => {
            eprintln!("tiersim: {err}");
            process::exit(1);
        }
    }
}
