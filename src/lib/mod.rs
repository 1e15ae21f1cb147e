//! # clbench: Cross-Device Compute Benchmark
//!
//! This crate discovers every platform/device pair a compute runtime exposes
//! and runs the same offload workload (elementwise `int` vector addition) on
//! each one. Per device it reports device-timed host-to-device transfers,
//! kernel execution and device-to-host transfer, plus a host-clock overall
//! time and a correctness verdict.
//!
//! ## Core Modules
//!
//! - `runtime`: The `ComputeRuntime` trait plus the host reference backend and
//!   the OpenCL backend (feature `opencl`).
//! - `device`: Per-device context and profiling command queue.
//! - `compiler`: Kernel source, program build and entry point resolution.
//! - `buffers`: The A/B/C device buffers with their access hints.
//! - `pipeline`: The four dependency-ordered operations of one run.
//! - `report`: Timestamp extraction, verification and console rendering.
//! - `sweep`: Enumeration and the per-device fold.
//! - `config`: Sweep configuration.

pub mod buffers;
pub mod compiler;
pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod sweep;

pub use config::{BenchConfig, VerifySample};
pub use error::{BenchError, Result};
pub use report::{BenchReport, StageTimings, Verification};
pub use runtime::host::HostRuntime;
#[cfg(feature = "opencl")]
pub use runtime::opencl::OpenClRuntime;
pub use runtime::ComputeRuntime;
pub use sweep::{run_device, sweep, DeviceOutcome, SweepSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
