//! # Execution Pipeline
//!
//! Submits the four operations of one run and drains the queue:
//!
//! 1. `writeA`: non-blocking upload of host A.
//! 2. `writeB`: non-blocking upload of host B.
//! 3. `kernelExec`: 1-D dispatch over N work items, waiting on {writeA, writeB}.
//! 4. `readC`: blocking download of C, waiting on {kernelExec}.
//!
//! Ordering comes from the wait-lists alone, so the pipeline is correct on
//! out-of-order queues too. After the blocking read the queue is drained
//! with `finish`, which makes every event's timestamps final.
//!
//! The host clock brackets steps 1 through the drain and is reported
//! separately from the device timestamps.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::buffers::BufferSet;
use crate::compiler::CompiledWorkload;
use crate::device::DeviceResources;
use crate::error::{BenchError, Result};
use crate::runtime::{status, ComputeRuntime, KernelArg, Status};

/// The four profiled operations, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    WriteA,
    WriteB,
    KernelExec,
    ReadC,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::WriteA, Stage::WriteB, Stage::KernelExec, Stage::ReadC];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WriteA => "write A",
            Self::WriteB => "write B",
            Self::KernelExec => "kernel execution",
            Self::ReadC => "read C",
        };
        f.write_str(label)
    }
}

/// Host-side arrays of one run. All three have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostArrays {
    a: Vec<i32>,
    b: Vec<i32>,
    c: Vec<i32>,
}

impl HostArrays {
    /// A and B filled with constants, C zeroed.
    pub fn filled(len: usize, fill_a: i32, fill_b: i32) -> Self {
        Self {
            a: vec![fill_a; len],
            b: vec![fill_b; len],
            c: vec![0; len],
        }
    }

    /// Arbitrary inputs. Fails if `a` and `b` differ in length.
    pub fn from_inputs(a: Vec<i32>, b: Vec<i32>) -> Result<Self> {
        if a.len() != b.len() {
            return Err(BenchError::InvalidConfig(format!(
                "input lengths differ: A has {}, B has {}",
                a.len(),
                b.len()
            )));
        }
        let c = vec![0; a.len()];
        Ok(Self { a, b, c })
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn a(&self) -> &[i32] {
        &self.a
    }

    pub fn b(&self) -> &[i32] {
        &self.b
    }

    pub fn c(&self) -> &[i32] {
        &self.c
    }

    #[cfg(test)]
    pub(crate) fn c_mut(&mut self) -> &mut [i32] {
        &mut self.c
    }

    /// Leak all three allocations and leave empty arrays behind. Used when
    /// commands that may still reference them cannot be waited out.
    fn abandon(&mut self) {
        for array in [&mut self.a, &mut self.b, &mut self.c] {
            std::mem::forget(std::mem::take(array));
        }
    }
}

/// Completion events of one run.
#[derive(Debug, Clone)]
pub struct StageEvents<E> {
    pub write_a: E,
    pub write_b: E,
    pub kernel_exec: E,
    pub read_c: E,
}

impl<E> StageEvents<E> {
    pub fn get(&self, stage: Stage) -> &E {
        match stage {
            Stage::WriteA => &self.write_a,
            Stage::WriteB => &self.write_b,
            Stage::KernelExec => &self.kernel_exec,
            Stage::ReadC => &self.read_c,
        }
    }
}

/// A drained pipeline: its events and the host-measured duration.
#[derive(Debug, Clone)]
pub struct PipelineRun<E> {
    pub events: StageEvents<E>,
    pub overall: Duration,
}

/// Bind the kernel arguments, submit the four operations and drain.
///
/// Every return path settles the submitted commands first: the queue is
/// drained, and if the drain fails each returned event is waited on. When
/// neither succeeds, `host` is emptied and its old arrays are leaked so no
/// command still in flight can reference freed memory.
pub fn execute<R: ComputeRuntime>(
    runtime: &R,
    resources: &DeviceResources<R>,
    workload: &mut CompiledWorkload<R>,
    buffers: &BufferSet<R>,
    host: &mut HostArrays,
) -> Result<PipelineRun<R::Event>> {
    let n = i32::try_from(buffers.len()).map_err(|_| {
        BenchError::InvalidConfig(format!("element count {} exceeds i32", buffers.len()))
    })?;

    let args = [
        KernelArg::Buffer(&buffers.a),
        KernelArg::Buffer(&buffers.b),
        KernelArg::Buffer(&buffers.c),
        KernelArg::ScalarI32(n),
    ];
    for (index, arg) in (0u32..).zip(args) {
        runtime
            .set_kernel_arg(&mut workload.kernel, index, arg)
            .map_err(|code| BenchError::KernelArgument { index, code })?;
    }

    let queue = &resources.queue;
    let start = Instant::now();

    let mut submitted = Vec::with_capacity(Stage::ALL.len());
    // SAFETY: `settle` runs on both paths before `host` is released. It either
    // waits out every submitted command or leaks the arrays they reference.
    let result = unsafe { submit(runtime, queue, workload, buffers, host, &mut submitted) };
    let drained = settle(runtime, queue, &submitted, host);
    let events = match result {
        Ok(events) => events,
        Err(err) => {
            if let Err(code) = drained {
                warn!("[BENCH:DRAIN] Drain after failed submission also failed: {}", code);
            }
            return Err(err);
        }
    };
    drained.map_err(|code| BenchError::Drain { code })?;
    let overall = start.elapsed();
    debug!("[BENCH:DRAIN] queue drained in {:?}", overall);

    Ok(PipelineRun { events, overall })
}

/// Drain `queue`, falling back to waiting on `submitted` one by one. If that
/// fails too, abandon `host`. Returns the drain status.
fn settle<R: ComputeRuntime>(
    runtime: &R,
    queue: &R::Queue,
    submitted: &[R::Event],
    host: &mut HostArrays,
) -> std::result::Result<(), Status> {
    let drained = runtime.finish(queue);
    if drained.is_err() {
        if let Err(code) = runtime.wait_events(submitted) {
            warn!(
                "[BENCH:DRAIN] {} submitted command(s) could not be waited out ({}); leaking host arrays",
                submitted.len(),
                status::name(code)
            );
            host.abandon();
        }
    }
    drained
}

/// # Safety
///
/// Every event the runtime returns is pushed to `submitted`. The caller must
/// wait for all of them, or leak `host`, before `host` is dropped or touched
/// again.
unsafe fn submit<R: ComputeRuntime>(
    runtime: &R,
    queue: &R::Queue,
    workload: &CompiledWorkload<R>,
    buffers: &BufferSet<R>,
    host: &mut HostArrays,
    submitted: &mut Vec<R::Event>,
) -> Result<StageEvents<R::Event>> {
    let n = buffers.len();
    let enqueue_err = |stage| move |code| BenchError::Enqueue { stage, code };

    let write_a = runtime
        .enqueue_write(queue, &buffers.a, false, &host.a, &[])
        .map_err(enqueue_err(Stage::WriteA))?;
    submitted.push(write_a.clone());
    let write_b = runtime
        .enqueue_write(queue, &buffers.b, false, &host.b, &[])
        .map_err(enqueue_err(Stage::WriteB))?;
    submitted.push(write_b.clone());
    let kernel_exec = runtime
        .enqueue_kernel(
            queue,
            &workload.kernel,
            n,
            &[write_a.clone(), write_b.clone()],
        )
        .map_err(enqueue_err(Stage::KernelExec))?;
    submitted.push(kernel_exec.clone());
    let read_c = runtime
        .enqueue_read(
            queue,
            &buffers.c,
            true,
            &mut host.c,
            std::slice::from_ref(&kernel_exec),
        )
        .map_err(enqueue_err(Stage::ReadC))?;
    submitted.push(read_c.clone());

    Ok(StageEvents {
        write_a,
        write_b,
        kernel_exec,
        read_c,
    })
}
