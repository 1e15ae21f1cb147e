//! # OpenCL Runtime
//!
//! [`ComputeRuntime`] over real OpenCL platforms through the `ocl` crate.
//! Only compiled with the `opencl` feature, since linking needs an ICD loader.
//!
//! Status codes are taken from `ocl::Error::api_status`. Errors that did not
//! come from an OpenCL call map to [`status::UNKNOWN`].
//!
//! OpenCL rejects zero-sized buffers and zero-length transfers, so buffers are
//! allocated with at least one element and empty transfers or dispatches are
//! replaced with marker commands carrying the same wait-list.

use std::collections::HashMap;

use ocl::core::{DeviceInfoResult, ProfilingInfoResult};
use ocl::enums::{DeviceInfo, ProfilingInfo};
use ocl::flags::{self, DeviceType};
use ocl::{Buffer, Context, Device, Event, EventList, Kernel, Platform, Program, Queue};
use tracing::debug;

use super::{
    status, ComputeRuntime, DeviceAccess, DeviceClass, DeviceEntry, HostAccess, KernelArg,
    MemFlags, ParamKind, PlatformEntry, ProfilingStamps, Status,
};

fn status_of(err: &ocl::Error) -> Status {
    err.api_status()
        .map(|code| code as Status)
        .unwrap_or(status::UNKNOWN)
}

fn class_of(device: &Device) -> DeviceClass {
    match device.info(DeviceInfo::Type) {
        Ok(DeviceInfoResult::Type(kind)) if kind.contains(DeviceType::GPU) => DeviceClass::Gpu,
        Ok(DeviceInfoResult::Type(kind)) if kind.contains(DeviceType::CPU) => DeviceClass::Cpu,
        Ok(DeviceInfoResult::Type(kind)) if kind.contains(DeviceType::ACCELERATOR) => {
            DeviceClass::Accelerator
        }
        _ => DeviceClass::Unknown,
    }
}

fn ocl_flags(flags: MemFlags) -> flags::MemFlags {
    let device = match flags.device {
        DeviceAccess::ReadOnly => flags::MEM_READ_ONLY,
        DeviceAccess::WriteOnly => flags::MEM_WRITE_ONLY,
        DeviceAccess::ReadWrite => flags::MEM_READ_WRITE,
    };
    let host = match flags.host {
        HostAccess::ReadOnly => flags::MEM_HOST_READ_ONLY,
        HostAccess::WriteOnly => flags::MEM_HOST_WRITE_ONLY,
        HostAccess::ReadWrite => flags::MemFlags::empty(),
    };
    device | host
}

/// A device together with the platform that exposed it.
#[derive(Debug, Clone)]
pub struct OclDevice {
    platform: Platform,
    device: Device,
    name: String,
}

/// Program source, the owning context and the per-device build records.
#[derive(Debug)]
pub struct OclProgram {
    context: Context,
    source: String,
    built: Option<Program>,
    build_logs: HashMap<String, String>,
}

/// Device buffer plus its logical length (the allocation may be padded).
#[derive(Debug, Clone)]
pub struct OclBuffer {
    inner: Buffer<i32>,
    len: usize,
}

/// The OpenCL runtime. Stateless: every handle lives in the returned objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClRuntime;

impl OpenClRuntime {
    pub fn new() -> Self {
        Self
    }

    fn marker(queue: &Queue, wait: &[Event]) -> Result<Event, Status> {
        let result = if wait.is_empty() {
            queue.enqueue_marker(None::<&EventList>)
        } else {
            queue.enqueue_marker(Some(&EventList::from(wait.to_vec())))
        };
        result.map_err(|e| status_of(&e))
    }
}

impl ComputeRuntime for OpenClRuntime {
    type Device = OclDevice;
    type Context = Context;
    type Queue = Queue;
    type Buffer = OclBuffer;
    type Program = OclProgram;
    type Kernel = Kernel;
    type Event = Event;

    fn backend_name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<PlatformEntry<OclDevice>>, Status> {
        let ids = ocl::core::get_platform_ids().map_err(|e| status_of(&e.into()))?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let platform = Platform::new(id);
            let name = platform.name().map_err(|e| status_of(&e))?;
            let version = platform.version().map_err(|e| status_of(&e))?;
            let devices = Device::list_all(&platform)
                .map_err(|e| status_of(&e))
                .map(|devices| {
                    devices
                        .into_iter()
                        .map(|device| {
                            let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
                            DeviceEntry {
                                name: name.clone(),
                                class: class_of(&device),
                                handle: OclDevice {
                                    platform: platform.clone(),
                                    device,
                                    name,
                                },
                            }
                        })
                        .collect()
                });
            entries.push(PlatformEntry {
                name,
                version,
                devices,
            });
        }
        Ok(entries)
    }

    fn create_context(&self, device: &OclDevice) -> Result<Context, Status> {
        Context::builder()
            .platform(device.platform.clone())
            .devices(device.device)
            .build()
            .map_err(|e| status_of(&e))
    }

    fn create_queue(
        &self,
        context: &Context,
        device: &OclDevice,
        profiling: bool,
    ) -> Result<Queue, Status> {
        let props = profiling.then_some(flags::QUEUE_PROFILING_ENABLE);
        Queue::new(context, device.device, props).map_err(|e| status_of(&e))
    }

    fn create_buffer(
        &self,
        _context: &Context,
        queue: &Queue,
        flags: MemFlags,
        len: usize,
    ) -> Result<OclBuffer, Status> {
        let inner = Buffer::<i32>::builder()
            .queue(queue.clone())
            .flags(ocl_flags(flags))
            .len(len.max(1))
            .build()
            .map_err(|e| status_of(&e))?;
        Ok(OclBuffer { inner, len })
    }

    fn create_program(&self, context: &Context, source: &str) -> Result<OclProgram, Status> {
        if source.trim().is_empty() {
            return Err(status::INVALID_VALUE);
        }
        Ok(OclProgram {
            context: context.clone(),
            source: source.to_string(),
            built: None,
            build_logs: HashMap::new(),
        })
    }

    fn build_program(&self, program: &mut OclProgram, device: &OclDevice) -> Result<(), Status> {
        let result = Program::builder()
            .source(program.source.as_str())
            .devices(device.device)
            .build(&program.context);
        match result {
            Ok(built) => {
                debug!("[OPENCL:BUILD] program built for {}", device.name);
                program.built = Some(built);
                program.build_logs.insert(device.name.clone(), String::new());
                Ok(())
            }
            Err(err) => {
                // A failed build surfaces the compiler output as the error text.
                program.built = None;
                program.build_logs.insert(device.name.clone(), err.to_string());
                Err(err
                    .api_status()
                    .map(|code| code as Status)
                    .unwrap_or(status::BUILD_PROGRAM_FAILURE))
            }
        }
    }

    fn build_log(&self, program: &OclProgram, device: &OclDevice) -> Result<String, Status> {
        Ok(program
            .build_logs
            .get(&device.name)
            .cloned()
            .unwrap_or_default())
    }

    fn create_kernel(
        &self,
        program: &OclProgram,
        queue: &Queue,
        name: &str,
        params: &[ParamKind],
    ) -> Result<Kernel, Status> {
        let built = program
            .built
            .as_ref()
            .ok_or(status::INVALID_PROGRAM_EXECUTABLE)?;
        let mut builder = Kernel::builder();
        builder.program(built).name(name).queue(queue.clone());
        for param in params {
            match param {
                ParamKind::Buffer => builder.arg(None::<&Buffer<i32>>),
                ParamKind::ScalarI32 => builder.arg(&0i32),
            };
        }
        builder.build().map_err(|e| status_of(&e))
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut Kernel,
        index: u32,
        arg: KernelArg<'_, OclBuffer>,
    ) -> Result<(), Status> {
        let result = match arg {
            KernelArg::Buffer(buffer) => kernel.set_arg(index, &buffer.inner),
            KernelArg::ScalarI32(value) => kernel.set_arg(index, &value),
        };
        result.map_err(|e| status_of(&e))
    }

    unsafe fn enqueue_write(
        &self,
        queue: &Queue,
        buffer: &OclBuffer,
        blocking: bool,
        data: &[i32],
        wait: &[Event],
    ) -> Result<Event, Status> {
        if data.is_empty() {
            return Self::marker(queue, wait);
        }
        if data.len() > buffer.len {
            return Err(status::INVALID_VALUE);
        }
        let mut event = Event::empty();
        let cmd = buffer
            .inner
            .cmd()
            .queue(queue)
            .write(data)
            .block(blocking)
            .enew(&mut event);
        let result = if wait.is_empty() {
            cmd.enq()
        } else {
            cmd.ewait(wait).enq()
        };
        result.map_err(|e| status_of(&e))?;
        Ok(event)
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &Queue,
        kernel: &Kernel,
        global_size: usize,
        wait: &[Event],
    ) -> Result<Event, Status> {
        if global_size == 0 {
            return Self::marker(queue, wait);
        }
        let mut event = Event::empty();
        let cmd = kernel
            .cmd()
            .queue(queue)
            .global_work_size(global_size)
            .enew(&mut event);
        let result = if wait.is_empty() {
            cmd.enq()
        } else {
            cmd.ewait(wait).enq()
        };
        result.map_err(|e| status_of(&e))?;
        Ok(event)
    }

    unsafe fn enqueue_read(
        &self,
        queue: &Queue,
        buffer: &OclBuffer,
        blocking: bool,
        out: &mut [i32],
        wait: &[Event],
    ) -> Result<Event, Status> {
        if out.is_empty() {
            let event = Self::marker(queue, wait)?;
            if blocking {
                event.wait_for().map_err(|e| status_of(&e.into()))?;
            }
            return Ok(event);
        }
        if out.len() > buffer.len {
            return Err(status::INVALID_VALUE);
        }
        let mut event = Event::empty();
        let cmd = buffer
            .inner
            .cmd()
            .queue(queue)
            .read(out)
            .block(blocking)
            .enew(&mut event);
        let result = if wait.is_empty() {
            cmd.enq()
        } else {
            cmd.ewait(wait).enq()
        };
        result.map_err(|e| status_of(&e))?;
        Ok(event)
    }

    fn finish(&self, queue: &Queue) -> Result<(), Status> {
        queue.finish().map_err(|e| status_of(&e))
    }

    fn wait_events(&self, events: &[Event]) -> Result<(), Status> {
        for event in events {
            event.wait_for().map_err(|e| status_of(&e.into()))?;
        }
        Ok(())
    }

    fn profiling(&self, event: &Event) -> Result<ProfilingStamps, Status> {
        let start = event
            .profiling_info(ProfilingInfo::Start)
            .map_err(|e| status_of(&e))?;
        let end = event
            .profiling_info(ProfilingInfo::End)
            .map_err(|e| status_of(&e))?;
        match (start, end) {
            (ProfilingInfoResult::Start(start), ProfilingInfoResult::End(end)) => {
                Ok(ProfilingStamps { start, end })
            }
            _ => Err(status::PROFILING_INFO_NOT_AVAILABLE),
        }
    }
}
