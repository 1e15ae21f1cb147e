#![deny(missing_docs)]
//! # clbench
//!
//! Sweeps every compute platform and device, runs the vector-add benchmark on
//! each and prints the per-stage timing report to stdout. Diagnostics go to
//! stderr through `tracing`, so the report can be redirected on its own.
//!
//! ## Backends
//!
//! - **`opencl`**: Real OpenCL platforms. Needs the `opencl` cargo feature.
//! - **`host`**: The host reference runtime, one CPU device running in host
//!   memory. The default when the crate is built without `opencl`.
//!
//! Exit code is 0 when the sweep completes, whatever individual devices did,
//! and -1 when platform enumeration fails or finds nothing.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

use clbench::{BenchConfig, BenchError, ComputeRuntime, HostRuntime, SweepSummary, VerifySample};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
/// Compute runtime the sweep runs against.
enum Backend {
    /// Host reference runtime
    Host,
    /// OpenCL platforms via the ICD loader
    Opencl,
}

impl Backend {
    fn default_for_build() -> Self {
        if cfg!(feature = "opencl") {
            Backend::Opencl
        } else {
            Backend::Host
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cross-device vector-add benchmark")]
/// Command-line arguments for the benchmark sweep.
struct Args {
    /// Runtime backend (defaults to opencl when built with it, host otherwise)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Number of int elements per buffer
    #[arg(long, default_value_t = clbench::config::DEFAULT_ELEMENTS)]
    elements: usize,

    /// Number of leading output elements to verify
    #[arg(long, default_value_t = clbench::config::DEFAULT_VERIFY_COUNT)]
    verify_count: usize,

    /// Verify every output element
    #[arg(long, conflicts_with = "verify_count")]
    verify_all: bool,

    /// Fill value for input A
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    fill_a: i32,

    /// Fill value for input B
    #[arg(long, default_value_t = 2, allow_negative_numbers = true)]
    fill_b: i32,

    /// Kernel source file replacing the built-in vecadd program
    #[arg(long)]
    kernel: Option<String>,

    /// Directory for config.json and results.json
    #[arg(long)]
    out_dir: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let backend = args.backend.unwrap_or_else(Backend::default_for_build);
    let config = build_config(&args)?;
    info!(
        "[CLBENCH:INIT] clbench {} backend={:?} elements={} verify={:?}",
        clbench::VERSION,
        backend,
        config.elements,
        config.verify
    );

    if let Some(ref out_dir) = args.out_dir {
        save_config(out_dir, backend, &config)?;
    }

    let result = match backend {
        Backend::Host => run(&HostRuntime::default(), &config),
        Backend::Opencl => run_opencl(&config)?,
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(err) if matches!(err, BenchError::Enumeration { .. } | BenchError::NoPlatforms) => {
            error!("[CLBENCH:ENUM] {}", err);
            std::process::exit(-1);
        }
        Err(err) => return Err(err).context("Benchmark sweep failed"),
    };

    if let Some(ref out_dir) = args.out_dir {
        save_results(out_dir, &summary)?;
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<BenchConfig> {
    let verify = if args.verify_all {
        VerifySample::All
    } else {
        VerifySample::Prefix(args.verify_count)
    };
    let mut config = BenchConfig::default()
        .with_elements(args.elements)
        .with_fill(args.fill_a, args.fill_b)
        .with_verify(verify);

    if let Some(ref path) = args.kernel {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read kernel source {:?}", path))?;
        config = config.with_kernel_source(source);
    }

    config.validate().context("Invalid benchmark configuration")?;
    Ok(config)
}

fn run<R: ComputeRuntime>(runtime: &R, config: &BenchConfig) -> clbench::Result<SweepSummary> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    clbench::sweep(runtime, config, &mut out)
}

#[cfg(feature = "opencl")]
fn run_opencl(config: &BenchConfig) -> Result<clbench::Result<SweepSummary>> {
    Ok(run(&clbench::OpenClRuntime::new(), config))
}

#[cfg(not(feature = "opencl"))]
fn run_opencl(_config: &BenchConfig) -> Result<clbench::Result<SweepSummary>> {
    anyhow::bail!(
        "clbench was built without the `opencl` feature; rebuild with --features opencl or use --backend host"
    )
}

fn save_config(out_dir: &str, backend: Backend, config: &BenchConfig) -> Result<()> {
    fs::create_dir_all(out_dir).context("Failed to create results directory")?;

    let config_path = Path::new(out_dir).join("config.json");
    let config_json = serde_json::to_string_pretty(&serde_json::json!({
        "backend": backend,
        "bench": config,
    }))
    .context("Failed to serialize config")?;
    fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write config to {:?}", config_path))?;
    Ok(())
}

fn save_results(out_dir: &str, summary: &SweepSummary) -> Result<()> {
    let results = serde_json::json!({
        "clbench": {
            "version": clbench::VERSION,
            "backend": summary.backend,
            "platforms": summary.platforms,
            "completed": summary.completed(),
            "failed": summary.failed(),
            "devices": summary.devices,
        }
    });

    let path = Path::new(out_dir).join("results.json");
    let mut file =
        File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    writeln!(file, "{}", serde_json::to_string_pretty(&results)?)?;

    info!("[CLBENCH:DONE] Results saved to {:?}", path);
    Ok(())
}
