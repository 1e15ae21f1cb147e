//! # Workload Compiler
//!
//! Builds the kernel program for one device and resolves its entry point.
//! A failed build fetches the device's build log before returning, so the
//! compiler output reaches the user even though the run is abandoned.

use tracing::{debug, error};

use crate::device::DeviceResources;
use crate::error::{BenchError, Result};
use crate::runtime::{ComputeRuntime, ParamKind};

/// Entry point name of the benchmark kernel.
pub const ENTRY_POINT: &str = "vecadd";

/// Elementwise `int` addition guarded by the element count.
pub const VECADD_SOURCE: &str = r#"
__kernel void vecadd(
    __global const int *A,
    __global const int *B,
    __global int *C,
    const int N)
{
    int id = get_global_id(0);
    if (id < N) {
        C[id] = A[id] + B[id];
    }
}
"#;

/// Parameter layout of `vecadd`: A, B, C, then the element count.
pub const VECADD_PARAMS: &[ParamKind] = &[
    ParamKind::Buffer,
    ParamKind::Buffer,
    ParamKind::Buffer,
    ParamKind::ScalarI32,
];

/// A built program and the unbound kernel extracted from it.
pub struct CompiledWorkload<R: ComputeRuntime> {
    pub program: R::Program,
    pub kernel: R::Kernel,
}

impl<R: ComputeRuntime> CompiledWorkload<R> {
    /// Build `source` for `device` and resolve `entry_point`.
    pub fn build(
        runtime: &R,
        resources: &DeviceResources<R>,
        device: &R::Device,
        source: &str,
        entry_point: &str,
    ) -> Result<Self> {
        let mut program = runtime
            .create_program(&resources.context, source)
            .map_err(|code| BenchError::Build {
                code,
                log: String::new(),
            })?;

        if let Err(code) = runtime.build_program(&mut program, device) {
            let log = match runtime.build_log(&program, device) {
                Ok(log) => log,
                Err(log_code) => format!("<build log unavailable: status {log_code}>"),
            };
            error!("[BENCH:BUILD] Build failed, log:\n{}", log);
            return Err(BenchError::Build { code, log });
        }
        debug!("[BENCH:BUILD] program built");

        let kernel = runtime
            .create_kernel(&program, &resources.queue, entry_point, VECADD_PARAMS)
            .map_err(|code| BenchError::EntryPoint {
                name: entry_point.to_string(),
                code,
            })?;

        Ok(Self { program, kernel })
    }
}
