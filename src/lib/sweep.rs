//! # Device Sweep
//!
//! Walks every platform and device the runtime exposes, prints the
//! enumeration listing and benchmarks each device in turn. The sweep is a
//! fold over devices: a failing device is logged and recorded as
//! [`DeviceOutcome::Failed`], and the next device starts from scratch.
//!
//! Only a failed or empty top-level platform query ends the sweep early.

use std::io::Write;

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use crate::buffers::BufferSet;
use crate::compiler::CompiledWorkload;
use crate::config::BenchConfig;
use crate::device::DeviceResources;
use crate::error::{BenchError, Result};
use crate::pipeline::{self, HostArrays};
use crate::report::BenchReport;
use crate::runtime::{status, ComputeRuntime, DeviceClass};

/// Width of the cosmetic separator line.
pub const SEPARATOR_WIDTH: usize = 43;

/// Run the full benchmark on one device.
///
/// Stages run strictly in order (resources, build, buffers, pipeline,
/// report) and the first failure ends the run. Every resource is dropped
/// before returning.
pub fn run_device<R: ComputeRuntime>(
    runtime: &R,
    device: &R::Device,
    config: &BenchConfig,
) -> Result<BenchReport> {
    let resources = DeviceResources::acquire(runtime, device)?;
    let mut workload = CompiledWorkload::build(
        runtime,
        &resources,
        device,
        &config.kernel_source,
        &config.entry_point,
    )?;
    let buffers = BufferSet::allocate(runtime, &resources, config.elements)?;
    let mut host = HostArrays::filled(config.elements, config.fill_a, config.fill_b);

    let run = pipeline::execute(runtime, &resources, &mut workload, &buffers, &mut host)?;
    BenchReport::collect(runtime, &run, &host, config.verify)
}

fn serialize_error<S: Serializer>(
    error: &BenchError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Result of one device's run.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviceOutcome {
    Completed(BenchReport),
    Failed {
        #[serde(serialize_with = "serialize_error")]
        error: BenchError,
    },
}

impl DeviceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// One benchmarked device with its enumeration metadata.
#[derive(Debug, Serialize)]
pub struct DeviceResult {
    pub platform: String,
    pub device: String,
    pub class: DeviceClass,
    pub outcome: DeviceOutcome,
}

/// Everything a sweep produced, in enumeration order.
#[derive(Debug, Serialize)]
pub struct SweepSummary {
    pub backend: String,
    pub platforms: usize,
    pub devices: Vec<DeviceResult>,
}

impl SweepSummary {
    /// Devices whose run completed, whatever the verification verdict.
    pub fn completed(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.outcome.is_completed())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.devices.len() - self.completed()
    }
}

/// Enumerate, print and benchmark every device, writing the report to `out`.
pub fn sweep<R: ComputeRuntime, W: Write>(
    runtime: &R,
    config: &BenchConfig,
    out: &mut W,
) -> Result<SweepSummary> {
    config.validate()?;

    let platforms = runtime
        .platforms()
        .map_err(|code| BenchError::Enumeration { code })?;
    if platforms.is_empty() {
        return Err(BenchError::NoPlatforms);
    }
    info!(
        "[SWEEP:ENUM] {} platform(s) on the {} backend",
        platforms.len(),
        runtime.backend_name()
    );

    let mut devices = Vec::new();
    writeln!(out, "--- Discovered OpenCL Platforms and Devices ---")?;

    for (platform_idx, platform) in platforms.iter().enumerate() {
        if platform_idx > 0 && platform.name.contains(&config.separator_marker) {
            writeln!(out)?;
            writeln!(out, "{}", "~".repeat(SEPARATOR_WIDTH))?;
        }
        writeln!(
            out,
            "Platform {}: {} (Version: {})",
            platform_idx, platform.name, platform.version
        )?;

        let entries = match &platform.devices {
            Ok(entries) => entries,
            Err(code) => {
                warn!(
                    "[SWEEP:ENUM] Device query for '{}' failed: {} ({})",
                    platform.name,
                    status::name(*code),
                    code
                );
                continue;
            }
        };
        if entries.is_empty() {
            writeln!(out, "  No devices found for this platform.")?;
            continue;
        }

        for (device_idx, entry) in entries.iter().enumerate() {
            writeln!(
                out,
                "  Device {}: {} (Type: {})",
                device_idx, entry.name, entry.class
            )?;
            writeln!(
                out,
                "--- Benchmarking Device: {} (Platform: {}) ---",
                entry.name, platform.name
            )?;
            out.flush()?;

            let outcome = match run_device(runtime, &entry.handle, config) {
                Ok(report) => {
                    write!(out, "{}", report.render())?;
                    info!(
                        "[BENCH:DONE] {}: kernel {:.6} ms, overall {:.6} ms",
                        entry.name, report.timings.kernel_ms, report.timings.overall_ms
                    );
                    DeviceOutcome::Completed(report)
                }
                Err(err) => {
                    error!("[BENCH:FAIL] {}: {}", entry.name, err);
                    DeviceOutcome::Failed { error: err }
                }
            };
            devices.push(DeviceResult {
                platform: platform.name.clone(),
                device: entry.name.clone(),
                class: entry.class,
                outcome,
            });
        }
    }

    let summary = SweepSummary {
        backend: runtime.backend_name().to_string(),
        platforms: platforms.len(),
        devices,
    };
    info!(
        "[SWEEP:DONE] {} device(s) completed, {} failed",
        summary.completed(),
        summary.failed()
    );
    Ok(summary)
}
