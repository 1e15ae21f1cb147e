//! # Device Resources
//!
//! Owns the execution context and the profiling-enabled command queue of one
//! device for the duration of a single benchmark run. Nothing here outlives
//! the run; the next device starts from a fresh context.

use tracing::debug;

use crate::error::{BenchError, Result};
use crate::runtime::ComputeRuntime;

/// Context plus command queue bound to one device.
pub struct DeviceResources<R: ComputeRuntime> {
    pub context: R::Context,
    pub queue: R::Queue,
}

impl<R: ComputeRuntime> DeviceResources<R> {
    /// Create the context, then a queue with profiling enabled.
    ///
    /// Profiling cannot be switched on after creation, so without it no
    /// stage timestamps would ever be available.
    pub fn acquire(runtime: &R, device: &R::Device) -> Result<Self> {
        let context = runtime
            .create_context(device)
            .map_err(|code| BenchError::ContextCreation { code })?;
        let queue = runtime
            .create_queue(&context, device, true)
            .map_err(|code| BenchError::QueueCreation { code })?;
        debug!("[BENCH:SETUP] context and profiling queue ready");
        Ok(Self { context, queue })
    }
}
