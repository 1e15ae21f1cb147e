//! # Compute Runtime Abstraction
//!
//! The benchmark core never talks to a driver directly. Everything it needs
//! from a heterogeneous-computing runtime (enumeration, contexts, queues,
//! buffers, program builds, kernel dispatch, completion events) goes through
//! the [`ComputeRuntime`] trait defined here.
//!
//! Two implementations ship with the crate:
//!
//! - [`host::HostRuntime`]: a host-memory reference runtime. Always built.
//!   It honors wait-lists on in-order and out-of-order queues, produces
//!   monotonic profiling timestamps and supports fault injection.
//! - `opencl::OpenClRuntime` (feature `opencl`): real OpenCL platforms via
//!   the `ocl` crate.
//!
//! Every fallible call returns a raw runtime [`Status`] code. Mapping those
//! codes onto the benchmark error taxonomy is the caller's job.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

/// Raw status code reported by the runtime (OpenCL numbering).
pub type Status = i32;

/// Named status codes. Values match the OpenCL headers.
pub mod status {
    use super::Status;

    pub const SUCCESS: Status = 0;
    pub const DEVICE_NOT_FOUND: Status = -1;
    pub const DEVICE_NOT_AVAILABLE: Status = -2;
    pub const COMPILER_NOT_AVAILABLE: Status = -3;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Status = -4;
    pub const OUT_OF_RESOURCES: Status = -5;
    pub const OUT_OF_HOST_MEMORY: Status = -6;
    pub const PROFILING_INFO_NOT_AVAILABLE: Status = -7;
    pub const BUILD_PROGRAM_FAILURE: Status = -11;
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: Status = -14;
    pub const INVALID_VALUE: Status = -30;
    pub const INVALID_PLATFORM: Status = -32;
    pub const INVALID_DEVICE: Status = -33;
    pub const INVALID_CONTEXT: Status = -34;
    pub const INVALID_COMMAND_QUEUE: Status = -36;
    pub const INVALID_MEM_OBJECT: Status = -38;
    pub const INVALID_PROGRAM: Status = -44;
    pub const INVALID_PROGRAM_EXECUTABLE: Status = -45;
    pub const INVALID_KERNEL_NAME: Status = -46;
    pub const INVALID_KERNEL_DEFINITION: Status = -47;
    pub const INVALID_ARG_INDEX: Status = -49;
    pub const INVALID_ARG_VALUE: Status = -50;
    pub const INVALID_KERNEL_ARGS: Status = -52;
    pub const INVALID_EVENT_WAIT_LIST: Status = -57;
    pub const INVALID_OPERATION: Status = -59;
    pub const INVALID_BUFFER_SIZE: Status = -61;
    pub const PLATFORM_NOT_FOUND_KHR: Status = -1001;
    /// Used when a backend error carries no numeric status.
    pub const UNKNOWN: Status = i32::MIN;

    /// Symbolic name of a status code, for diagnostics.
    pub fn name(code: Status) -> &'static str {
        match code {
            SUCCESS => "CL_SUCCESS",
            DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
            DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
            COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
            MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
            PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
            BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
                "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            INVALID_VALUE => "CL_INVALID_VALUE",
            INVALID_PLATFORM => "CL_INVALID_PLATFORM",
            INVALID_DEVICE => "CL_INVALID_DEVICE",
            INVALID_CONTEXT => "CL_INVALID_CONTEXT",
            INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
            INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
            INVALID_PROGRAM => "CL_INVALID_PROGRAM",
            INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
            INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            INVALID_KERNEL_DEFINITION => "CL_INVALID_KERNEL_DEFINITION",
            INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
            INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
            INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
            INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
            INVALID_OPERATION => "CL_INVALID_OPERATION",
            INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            PLATFORM_NOT_FOUND_KHR => "CL_PLATFORM_NOT_FOUND_KHR",
            _ => "UNKNOWN_STATUS",
        }
    }
}

/// Device class tag reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
    Unknown,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceClass::Cpu => "CPU",
            DeviceClass::Gpu => "GPU",
            DeviceClass::Accelerator => "Accelerator",
            DeviceClass::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// How the host may access a buffer through transfer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Allocation hints for a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFlags {
    pub device: DeviceAccess,
    pub host: HostAccess,
}

impl MemFlags {
    /// Kernel input uploaded by the host: device read-only, host write-only.
    pub const INPUT: MemFlags = MemFlags {
        device: DeviceAccess::ReadOnly,
        host: HostAccess::WriteOnly,
    };

    /// Kernel output downloaded by the host: device write-only, host read-only.
    pub const OUTPUT: MemFlags = MemFlags {
        device: DeviceAccess::WriteOnly,
        host: HostAccess::ReadOnly,
    };

    pub fn host_can_write(&self) -> bool {
        self.host != HostAccess::ReadOnly
    }

    pub fn host_can_read(&self) -> bool {
        self.host != HostAccess::WriteOnly
    }

    pub fn device_can_write(&self) -> bool {
        self.device != DeviceAccess::ReadOnly
    }
}

/// Declared kind of one positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `__global int *`
    Buffer,
    /// `const int`
    ScalarI32,
}

/// A value bound to a positional kernel parameter.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    ScalarI32(i32),
}

/// Command-start and command-end hardware timestamps of one completed command.
///
/// Both values are nanoseconds on a monotonic device counter with an
/// implementation-defined epoch. Only their difference carries meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilingStamps {
    pub start: u64,
    pub end: u64,
}

impl ProfilingStamps {
    /// Duration in nanoseconds, or `None` if the counter went backwards.
    pub fn elapsed_ns(&self) -> Option<u64> {
        self.end.checked_sub(self.start)
    }
}

/// One enumerated device with its metadata.
#[derive(Debug, Clone)]
pub struct DeviceEntry<D> {
    pub name: String,
    pub class: DeviceClass,
    pub handle: D,
}

/// One enumerated platform. The device query can fail independently of the
/// platform query, so the device list carries its own status.
#[derive(Debug, Clone)]
pub struct PlatformEntry<D> {
    pub name: String,
    pub version: String,
    pub devices: Result<Vec<DeviceEntry<D>>, Status>,
}

/// The operations the benchmark core needs from a compute runtime.
///
/// Element storage is fixed to `i32` because the workload is fixed to
/// 32-bit integer vector addition.
pub trait ComputeRuntime {
    type Device;
    type Context;
    type Queue;
    type Buffer;
    type Program;
    type Kernel;
    type Event: Clone;

    /// Short backend label used in logs and result files.
    fn backend_name(&self) -> &'static str;

    /// Ordered platforms, each with its ordered devices.
    fn platforms(&self) -> Result<Vec<PlatformEntry<Self::Device>>, Status>;

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, Status>;

    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        profiling: bool,
    ) -> Result<Self::Queue, Status>;

    /// Allocate `len` `i32` elements.
    fn create_buffer(
        &self,
        context: &Self::Context,
        queue: &Self::Queue,
        flags: MemFlags,
        len: usize,
    ) -> Result<Self::Buffer, Status>;

    fn create_program(&self, context: &Self::Context, source: &str)
        -> Result<Self::Program, Status>;

    fn build_program(&self, program: &mut Self::Program, device: &Self::Device)
        -> Result<(), Status>;

    /// Build log recorded for `device` by the last build attempt.
    fn build_log(&self, program: &Self::Program, device: &Self::Device) -> Result<String, Status>;

    fn create_kernel(
        &self,
        program: &Self::Program,
        queue: &Self::Queue,
        name: &str,
        params: &[ParamKind],
    ) -> Result<Self::Kernel, Status>;

    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        arg: KernelArg<'_, Self::Buffer>,
    ) -> Result<(), Status>;

    /// Enqueue a host-to-device copy of `data` into `buffer`.
    ///
    /// # Safety
    ///
    /// With `blocking == false` the command may still be reading `data` after
    /// this call returns. The caller must keep `data` alive and unmodified
    /// until the returned event has completed (for example by draining the
    /// queue with [`ComputeRuntime::finish`]).
    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        blocking: bool,
        data: &[i32],
        wait: &[Self::Event],
    ) -> Result<Self::Event, Status>;

    /// Enqueue a 1-D dispatch of `global_size` work items. The runtime picks
    /// the local size.
    ///
    /// # Safety
    ///
    /// Every buffer bound to `kernel` must stay alive until the returned
    /// event has completed.
    unsafe fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global_size: usize,
        wait: &[Self::Event],
    ) -> Result<Self::Event, Status>;

    /// Enqueue a device-to-host copy of `buffer` into `out`.
    ///
    /// # Safety
    ///
    /// With `blocking == false` the command may write `out` after this call
    /// returns. The caller must not touch `out` until the returned event has
    /// completed.
    unsafe fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        blocking: bool,
        out: &mut [i32],
        wait: &[Self::Event],
    ) -> Result<Self::Event, Status>;

    /// Block until every command enqueued on `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<(), Status>;

    /// Block until every event in `events` has completed. Fails if any of
    /// them failed or can no longer complete.
    fn wait_events(&self, events: &[Self::Event]) -> Result<(), Status>;

    /// Start/end timestamps of a completed command on a profiling queue.
    fn profiling(&self, event: &Self::Event) -> Result<ProfilingStamps, Status>;
}
