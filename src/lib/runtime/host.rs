//! # Host Reference Runtime
//!
//! A [`ComputeRuntime`] that executes everything in host memory. It exists so
//! the benchmark pipeline can be exercised, and its ordering contract checked,
//! on machines without any OpenCL driver.
//!
//! The runtime keeps the semantics that matter for the benchmark:
//!
//! - Commands are deferred. Nothing runs until a blocking call or
//!   [`ComputeRuntime::finish`] forces the queue forward.
//! - A command only runs once every event in its wait-list has resolved.
//!   In-order queues run in submission order. Out-of-order queues always pick
//!   the *most recently submitted* ready command, so a missing wait-list edge
//!   shows up as wrong results instead of passing by luck.
//! - Each executed command is stamped with start/end nanoseconds from a
//!   monotonic clock anchored when the runtime was created. A device built
//!   with [`HostDevice::backwards_clock`] reports them swapped instead.
//! - A command waiting on a failed event fails with
//!   `EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST`.
//! - Fresh device memory is filled with `0xA5` rather than zeroes.
//!
//! Programs are not really compiled. A build checks delimiter balance and
//! collects the `__kernel` declarations; entry points then resolve to native
//! host implementations (currently `vecadd`).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use tracing::debug;

use super::{
    status, ComputeRuntime, DeviceClass, DeviceEntry, KernelArg, MemFlags, ParamKind,
    PlatformEntry, ProfilingStamps, Status,
};

/// Byte pattern of freshly allocated device memory.
pub const UNINITIALIZED_BYTE: u8 = 0xA5;

const ELEMENT_BYTES: usize = std::mem::size_of::<i32>();

/// Command ordering of the queues a device creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    InOrder,
    OutOfOrder,
}

/// A simulated device and its fault configuration.
#[derive(Debug, Clone)]
pub struct HostDevice {
    name: String,
    class: DeviceClass,
    queue_order: QueueOrder,
    context_status: Option<Status>,
    queue_status: Option<Status>,
    compiler_available: bool,
    max_alloc_bytes: Option<usize>,
    backwards_clock: bool,
}

impl HostDevice {
    pub fn new(name: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            name: name.into(),
            class,
            queue_order: QueueOrder::InOrder,
            context_status: None,
            queue_status: None,
            compiler_available: true,
            max_alloc_bytes: None,
            backwards_clock: false,
        }
    }

    /// Queues on this device execute ready commands in adversarial order.
    pub fn out_of_order(mut self) -> Self {
        self.queue_order = QueueOrder::OutOfOrder;
        self
    }

    /// Context creation fails with `status`.
    pub fn failing_context(mut self, status: Status) -> Self {
        self.context_status = Some(status);
        self
    }

    /// Queue creation fails with `status`.
    pub fn failing_queue(mut self, status: Status) -> Self {
        self.queue_status = Some(status);
        self
    }

    /// Every program build fails with `COMPILER_NOT_AVAILABLE`.
    pub fn without_compiler(mut self) -> Self {
        self.compiler_available = false;
        self
    }

    /// Buffers larger than `bytes` fail with `INVALID_BUFFER_SIZE`.
    pub fn max_alloc_bytes(mut self, bytes: usize) -> Self {
        self.max_alloc_bytes = Some(bytes);
        self
    }

    /// Completed commands on this device report an end stamp before their
    /// start stamp.
    pub fn backwards_clock(mut self) -> Self {
        self.backwards_clock = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A simulated platform grouping devices.
#[derive(Debug, Clone)]
pub struct HostPlatform {
    name: String,
    version: String,
    devices: Vec<HostDevice>,
    device_query_status: Option<Status>,
}

impl HostPlatform {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            devices: Vec::new(),
            device_query_status: None,
        }
    }

    pub fn with_device(mut self, device: HostDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// The device query for this platform fails with `status`.
    pub fn failing_device_query(mut self, status: Status) -> Self {
        self.device_query_status = Some(status);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    epoch: Instant,
}

impl Clock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// The host reference runtime.
#[derive(Debug, Clone)]
pub struct HostRuntime {
    platforms: Vec<HostPlatform>,
    platform_query_status: Option<Status>,
    clock: Clock,
}

impl HostRuntime {
    /// A runtime with no platforms.
    pub fn new() -> Self {
        Self {
            platforms: Vec::new(),
            platform_query_status: None,
            clock: Clock {
                epoch: Instant::now(),
            },
        }
    }

    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platforms.push(platform);
        self
    }

    /// The top-level platform query fails with `status`.
    pub fn failing_enumeration(mut self, status: Status) -> Self {
        self.platform_query_status = Some(status);
        self
    }
}

impl Default for HostRuntime {
    /// One platform with one in-order CPU device.
    fn default() -> Self {
        Self::new().with_platform(
            HostPlatform::new("Host Reference Platform", "OpenCL 3.0 clbench-host")
                .with_device(HostDevice::new("Host Reference CPU", DeviceClass::Cpu)),
        )
    }
}

/// Execution scope bound to one simulated device.
#[derive(Debug)]
pub struct HostContext {
    device: HostDevice,
}

/// Device memory plus its allocation hints. Cloning shares the memory.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    flags: MemFlags,
    memory: Rc<RefCell<Vec<u8>>>,
}

impl HostBuffer {
    /// Capacity in `i32` elements.
    pub fn len(&self) -> usize {
        self.memory.borrow().len() / ELEMENT_BYTES
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flags(&self) -> MemFlags {
        self.flags
    }

    fn to_elements(&self) -> Vec<i32> {
        self.memory
            .borrow()
            .chunks_exact(ELEMENT_BYTES)
            .map(bytemuck::pod_read_unaligned::<i32>)
            .collect()
    }
}

/// Lifecycle of one enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Complete(ProfilingStamps),
    Failed(Status),
}

#[derive(Debug)]
struct EventState {
    command: &'static str,
    profiling: bool,
    status: Cell<EventStatus>,
}

/// Completion handle of one enqueued command.
#[derive(Debug, Clone)]
pub struct HostEvent(Rc<EventState>);

impl HostEvent {
    fn new(command: &'static str, profiling: bool) -> Self {
        Self(Rc::new(EventState {
            command,
            profiling,
            status: Cell::new(EventStatus::Queued),
        }))
    }

    pub fn status(&self) -> EventStatus {
        self.0.status.get()
    }

    /// Kind of command this event belongs to (`write`, `read`, `kernel`).
    pub fn command(&self) -> &'static str {
        self.0.command
    }

    fn is_resolved(&self) -> bool {
        !matches!(self.status(), EventStatus::Queued)
    }

    fn failed(&self) -> bool {
        matches!(self.status(), EventStatus::Failed(_))
    }

    fn set(&self, status: EventStatus) {
        self.0.status.set(status);
    }
}

#[derive(Debug, Clone)]
struct KernelDecl {
    name: String,
    params: usize,
}

/// Program source plus the per-device result of the last build.
#[derive(Debug)]
pub struct HostProgram {
    source: String,
    kernels: Vec<KernelDecl>,
    built: bool,
    build_logs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
enum BoundArg {
    Buffer(HostBuffer),
    Scalar(Vec<u8>),
}

type NativeFn = fn(usize, &[BoundArg]) -> Result<(), Status>;

/// A host implementation registered for a kernel entry point.
struct NativeKernel {
    name: &'static str,
    params: &'static [ParamKind],
    /// Parameter positions the kernel writes through.
    writes: &'static [usize],
    run: NativeFn,
}

const NATIVE_KERNELS: &[NativeKernel] = &[NativeKernel {
    name: "vecadd",
    params: &[
        ParamKind::Buffer,
        ParamKind::Buffer,
        ParamKind::Buffer,
        ParamKind::ScalarI32,
    ],
    writes: &[2],
    run: vecadd,
}];

/// `C[id] = A[id] + B[id]` for every `id < N` in the dispatch range.
fn vecadd(global_size: usize, args: &[BoundArg]) -> Result<(), Status> {
    let (
        Some(BoundArg::Buffer(a)),
        Some(BoundArg::Buffer(b)),
        Some(BoundArg::Buffer(c)),
        Some(BoundArg::Scalar(n)),
    ) = (args.first(), args.get(1), args.get(2), args.get(3))
    else {
        return Err(status::INVALID_KERNEL_ARGS);
    };
    if n.len() != ELEMENT_BYTES {
        return Err(status::INVALID_ARG_VALUE);
    }
    let n: i32 = bytemuck::pod_read_unaligned(n);

    // Inputs are copied out first so aliasing A or B with C cannot double-borrow.
    let a = a.to_elements();
    let b = b.to_elements();
    let mut out = c.memory.borrow_mut();

    for id in 0..global_size {
        if (id as i64) < i64::from(n) {
            let (Some(x), Some(y)) = (a.get(id), b.get(id)) else {
                return Err(status::OUT_OF_RESOURCES);
            };
            let slot = out
                .get_mut(id * ELEMENT_BYTES..(id + 1) * ELEMENT_BYTES)
                .ok_or(status::OUT_OF_RESOURCES)?;
            slot.copy_from_slice(bytemuck::bytes_of(&x.wrapping_add(*y)));
        }
    }
    Ok(())
}

/// Entry point resolved from a built program, with its bound arguments.
pub struct HostKernel {
    native: &'static NativeKernel,
    args: Vec<Option<BoundArg>>,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("name", &self.native.name)
            .field("args", &self.args)
            .finish()
    }
}

enum Op {
    Write {
        dst: HostBuffer,
        bytes: Vec<u8>,
    },
    Kernel {
        run: NativeFn,
        global_size: usize,
        args: Vec<BoundArg>,
    },
    Read {
        src: HostBuffer,
        staging: Rc<RefCell<Vec<u8>>>,
    },
}

struct Command {
    op: Op,
    wait: Vec<HostEvent>,
    event: HostEvent,
}

impl Command {
    fn is_ready(&self) -> bool {
        self.wait.iter().all(HostEvent::is_resolved)
    }
}

/// Command queue of one host context.
pub struct HostQueue {
    order: QueueOrder,
    profiling: bool,
    clock: Clock,
    backwards_clock: bool,
    pending: RefCell<Vec<Command>>,
}

impl std::fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostQueue")
            .field("order", &self.order)
            .field("profiling", &self.profiling)
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl HostQueue {
    /// Number of submitted commands that have not run yet.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    fn submit(&self, command: &'static str, op: Op, wait: &[HostEvent]) -> HostEvent {
        let event = HostEvent::new(command, self.profiling);
        self.pending.borrow_mut().push(Command {
            op,
            wait: wait.to_vec(),
            event: event.clone(),
        });
        event
    }

    /// Run commands until `target` resolves, or until the queue is empty when
    /// `target` is `None`. Returns the first failure among executed commands.
    fn advance(&self, target: Option<&HostEvent>) -> Result<(), Status> {
        let mut first_failure = None;
        loop {
            if target.is_some_and(HostEvent::is_resolved) {
                break;
            }
            let command = {
                let mut pending = self.pending.borrow_mut();
                if pending.is_empty() {
                    break;
                }
                let pick = match self.order {
                    QueueOrder::InOrder => pending[0].is_ready().then_some(0),
                    QueueOrder::OutOfOrder => pending.iter().rposition(Command::is_ready),
                };
                match pick {
                    Some(index) => pending.remove(index),
                    // Remaining commands wait on events no queue will ever run.
                    None => return Err(status::INVALID_EVENT_WAIT_LIST),
                }
            };
            if let Err(code) = self.execute(command) {
                first_failure.get_or_insert(code);
            }
        }
        match first_failure {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    /// Advance until `event` resolves and report its own outcome.
    fn wait_for(&self, event: &HostEvent) -> Result<(), Status> {
        let advanced = self.advance(Some(event));
        match event.status() {
            EventStatus::Complete(_) => Ok(()),
            EventStatus::Failed(code) => Err(code),
            EventStatus::Queued => Err(advanced.err().unwrap_or(status::INVALID_EVENT_WAIT_LIST)),
        }
    }

    fn execute(&self, command: Command) -> Result<(), Status> {
        let Command { op, wait, event } = command;
        if wait.iter().any(HostEvent::failed) {
            let code = status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST;
            event.set(EventStatus::Failed(code));
            return Err(code);
        }

        let start = self.clock.now_ns();
        let result = match op {
            Op::Write { dst, bytes } => {
                let mut memory = dst.memory.borrow_mut();
                match memory.get_mut(..bytes.len()) {
                    Some(region) => {
                        region.copy_from_slice(&bytes);
                        Ok(())
                    }
                    None => Err(status::INVALID_VALUE),
                }
            }
            Op::Kernel {
                run,
                global_size,
                args,
            } => run(global_size, &args),
            Op::Read { src, staging } => {
                let memory = src.memory.borrow();
                let mut staging = staging.borrow_mut();
                let len = staging.len();
                match memory.get(..len) {
                    Some(region) => {
                        staging.copy_from_slice(region);
                        Ok(())
                    }
                    None => Err(status::INVALID_VALUE),
                }
            }
        };
        let end = self.clock.now_ns();
        let stamps = if self.backwards_clock {
            ProfilingStamps {
                start: end + 1,
                end: start,
            }
        } else {
            ProfilingStamps { start, end }
        };

        match result {
            Ok(()) => {
                event.set(EventStatus::Complete(stamps));
                Ok(())
            }
            Err(code) => {
                debug!("[HOST:EXEC] {} failed: {}", event.command(), status::name(code));
                event.set(EventStatus::Failed(code));
                Err(code)
            }
        }
    }
}

/// Delimiter check plus `__kernel` declaration scan. Errors are log lines.
fn scan_program(source: &str) -> Result<Vec<KernelDecl>, String> {
    let mut open: Vec<(char, usize)> = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        for ch in line.chars() {
            let expected = match ch {
                '(' | '{' | '[' => {
                    open.push((ch, line_no + 1));
                    continue;
                }
                ')' => '(',
                '}' => '{',
                ']' => '[',
                _ => continue,
            };
            match open.pop() {
                Some((found, _)) if found == expected => {}
                _ => {
                    return Err(format!(
                        "<source>:{}: error: unexpected '{}'",
                        line_no + 1,
                        ch
                    ))
                }
            }
        }
    }
    if let Some((ch, line)) = open.pop() {
        return Err(format!("<source>:{line}: error: unterminated '{ch}'"));
    }

    let mut kernels = Vec::new();
    let mut rest = source;
    while let Some(pos) = rest.find("__kernel") {
        let after = rest[pos + "__kernel".len()..].trim_start();
        let Some(after) = after.strip_prefix("void") else {
            return Err("error: kernel function must return void".to_string());
        };
        let after = after.trim_start();
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        if name.is_empty() {
            return Err("error: expected kernel function name".to_string());
        }
        let Some(params) = after[name_len..].trim_start().strip_prefix('(') else {
            return Err(format!("error: expected '(' after kernel '{name}'"));
        };
        let params = params.find(')').map(|close| params[..close].trim()).unwrap_or("");
        let count = if params.is_empty() || params == "void" {
            0
        } else {
            params.split(',').count()
        };
        kernels.push(KernelDecl {
            name: name.to_string(),
            params: count,
        });
        rest = &after[name_len..];
    }

    if kernels.is_empty() {
        return Err("error: no __kernel functions found in program source".to_string());
    }
    Ok(kernels)
}

impl ComputeRuntime for HostRuntime {
    type Device = HostDevice;
    type Context = HostContext;
    type Queue = HostQueue;
    type Buffer = HostBuffer;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Event = HostEvent;

    fn backend_name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformEntry<HostDevice>>, Status> {
        if let Some(code) = self.platform_query_status {
            return Err(code);
        }
        Ok(self
            .platforms
            .iter()
            .map(|platform| PlatformEntry {
                name: platform.name.clone(),
                version: platform.version.clone(),
                devices: match platform.device_query_status {
                    Some(code) => Err(code),
                    None => Ok(platform
                        .devices
                        .iter()
                        .map(|device| DeviceEntry {
                            name: device.name.clone(),
                            class: device.class,
                            handle: device.clone(),
                        })
                        .collect()),
                },
            })
            .collect())
    }

    fn create_context(&self, device: &HostDevice) -> Result<HostContext, Status> {
        if let Some(code) = device.context_status {
            return Err(code);
        }
        Ok(HostContext {
            device: device.clone(),
        })
    }

    fn create_queue(
        &self,
        context: &HostContext,
        device: &HostDevice,
        profiling: bool,
    ) -> Result<HostQueue, Status> {
        if context.device.name != device.name {
            return Err(status::INVALID_DEVICE);
        }
        if let Some(code) = device.queue_status {
            return Err(code);
        }
        Ok(HostQueue {
            order: device.queue_order,
            profiling,
            clock: self.clock,
            backwards_clock: device.backwards_clock,
            pending: RefCell::new(Vec::new()),
        })
    }

    fn create_buffer(
        &self,
        context: &HostContext,
        _queue: &HostQueue,
        flags: MemFlags,
        len: usize,
    ) -> Result<HostBuffer, Status> {
        let bytes = len
            .checked_mul(ELEMENT_BYTES)
            .ok_or(status::INVALID_BUFFER_SIZE)?;
        if context.device.max_alloc_bytes.is_some_and(|max| bytes > max) {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        Ok(HostBuffer {
            flags,
            memory: Rc::new(RefCell::new(vec![UNINITIALIZED_BYTE; bytes])),
        })
    }

    fn create_program(&self, _context: &HostContext, source: &str) -> Result<HostProgram, Status> {
        if source.trim().is_empty() {
            return Err(status::INVALID_VALUE);
        }
        Ok(HostProgram {
            source: source.to_string(),
            kernels: Vec::new(),
            built: false,
            build_logs: HashMap::new(),
        })
    }

    fn build_program(&self, program: &mut HostProgram, device: &HostDevice) -> Result<(), Status> {
        program.built = false;
        program.kernels.clear();
        if !device.compiler_available {
            program.build_logs.insert(
                device.name.clone(),
                format!("error: no compiler available for device '{}'", device.name),
            );
            return Err(status::COMPILER_NOT_AVAILABLE);
        }
        match scan_program(&program.source) {
            Ok(kernels) => {
                debug!(
                    "[HOST:BUILD] {} kernel(s) declared for {}",
                    kernels.len(),
                    device.name
                );
                program.kernels = kernels;
                program.built = true;
                program.build_logs.insert(device.name.clone(), String::new());
                Ok(())
            }
            Err(log) => {
                program.build_logs.insert(device.name.clone(), log);
                Err(status::BUILD_PROGRAM_FAILURE)
            }
        }
    }

    fn build_log(&self, program: &HostProgram, device: &HostDevice) -> Result<String, Status> {
        Ok(program
            .build_logs
            .get(&device.name)
            .cloned()
            .unwrap_or_default())
    }

    fn create_kernel(
        &self,
        program: &HostProgram,
        _queue: &HostQueue,
        name: &str,
        params: &[ParamKind],
    ) -> Result<HostKernel, Status> {
        if !program.built {
            return Err(status::INVALID_PROGRAM_EXECUTABLE);
        }
        let decl = program
            .kernels
            .iter()
            .find(|decl| decl.name == name)
            .ok_or(status::INVALID_KERNEL_NAME)?;
        let native = NATIVE_KERNELS
            .iter()
            .find(|native| native.name == name)
            .ok_or(status::INVALID_KERNEL_NAME)?;
        if decl.params != native.params.len() || params != native.params {
            return Err(status::INVALID_KERNEL_DEFINITION);
        }
        Ok(HostKernel {
            native,
            args: vec![None; native.params.len()],
        })
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        arg: KernelArg<'_, HostBuffer>,
    ) -> Result<(), Status> {
        let index = index as usize;
        let kind = *kernel
            .native
            .params
            .get(index)
            .ok_or(status::INVALID_ARG_INDEX)?;
        let bound = match (kind, arg) {
            (ParamKind::Buffer, KernelArg::Buffer(buffer)) => BoundArg::Buffer(buffer.clone()),
            (ParamKind::ScalarI32, KernelArg::ScalarI32(value)) => {
                BoundArg::Scalar(bytemuck::bytes_of(&value).to_vec())
            }
            _ => return Err(status::INVALID_ARG_VALUE),
        };
        kernel.args[index] = Some(bound);
        Ok(())
    }

    unsafe fn enqueue_write(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        blocking: bool,
        data: &[i32],
        wait: &[HostEvent],
    ) -> Result<HostEvent, Status> {
        if !buffer.flags.host_can_write() {
            return Err(status::INVALID_OPERATION);
        }
        if data.len() > buffer.len() {
            return Err(status::INVALID_VALUE);
        }
        // The host copy is taken at submission, so `data` is free once this returns.
        let op = Op::Write {
            dst: buffer.clone(),
            bytes: bytemuck::cast_slice(data).to_vec(),
        };
        let event = queue.submit("write", op, wait);
        if blocking {
            queue.wait_for(&event)?;
        }
        Ok(event)
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        global_size: usize,
        wait: &[HostEvent],
    ) -> Result<HostEvent, Status> {
        let args = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<BoundArg>>>()
            .ok_or(status::INVALID_KERNEL_ARGS)?;
        for &position in kernel.native.writes {
            if let Some(BoundArg::Buffer(buffer)) = args.get(position) {
                if !buffer.flags.device_can_write() {
                    return Err(status::INVALID_OPERATION);
                }
            }
        }
        let op = Op::Kernel {
            run: kernel.native.run,
            global_size,
            args,
        };
        Ok(queue.submit("kernel", op, wait))
    }

    unsafe fn enqueue_read(
        &self,
        queue: &HostQueue,
        buffer: &HostBuffer,
        _blocking: bool,
        out: &mut [i32],
        wait: &[HostEvent],
    ) -> Result<HostEvent, Status> {
        if !buffer.flags.host_can_read() {
            return Err(status::INVALID_OPERATION);
        }
        if out.len() > buffer.len() {
            return Err(status::INVALID_VALUE);
        }
        let staging = Rc::new(RefCell::new(vec![0u8; out.len() * ELEMENT_BYTES]));
        let op = Op::Read {
            src: buffer.clone(),
            staging: Rc::clone(&staging),
        };
        let event = queue.submit("read", op, wait);
        // Reads always complete before returning, whatever `blocking` says.
        queue.wait_for(&event)?;
        bytemuck::cast_slice_mut::<i32, u8>(out).copy_from_slice(&staging.borrow());
        Ok(event)
    }

    fn finish(&self, queue: &HostQueue) -> Result<(), Status> {
        queue.advance(None)
    }

    // Host events only advance through their queue, so a queued event here
    // belongs to a queue that is stuck.
    fn wait_events(&self, events: &[HostEvent]) -> Result<(), Status> {
        for event in events {
            match event.status() {
                EventStatus::Complete(_) => {}
                EventStatus::Failed(_) => {
                    return Err(status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
                }
                EventStatus::Queued => return Err(status::INVALID_EVENT_WAIT_LIST),
            }
        }
        Ok(())
    }

    fn profiling(&self, event: &HostEvent) -> Result<ProfilingStamps, Status> {
        if !event.0.profiling {
            return Err(status::PROFILING_INFO_NOT_AVAILABLE);
        }
        match event.status() {
            EventStatus::Complete(stamps) => Ok(stamps),
            _ => Err(status::PROFILING_INFO_NOT_AVAILABLE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = crate::compiler::VECADD_SOURCE;

    struct Rig {
        runtime: HostRuntime,
        queue: HostQueue,
        context: HostContext,
    }

    fn rig(device: HostDevice) -> Rig {
        let runtime = HostRuntime::new();
        let context = runtime.create_context(&device).unwrap();
        let queue = runtime.create_queue(&context, &device, true).unwrap();
        Rig {
            runtime,
            queue,
            context,
        }
    }

    fn vecadd_kernel(rig: &Rig, device: &HostDevice) -> HostKernel {
        let mut program = rig.runtime.create_program(&rig.context, SOURCE).unwrap();
        rig.runtime.build_program(&mut program, device).unwrap();
        rig.runtime
            .create_kernel(&program, &rig.queue, "vecadd", crate::compiler::VECADD_PARAMS)
            .unwrap()
    }

    #[test]
    fn test_default_runtime_enumeration() {
        let runtime = HostRuntime::default();
        let platforms = runtime.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].name, "Host Reference Platform");
        let devices = platforms[0].devices.as_ref().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].class, DeviceClass::Cpu);
    }

    #[test]
    fn test_enumeration_faults() {
        let runtime = HostRuntime::new().failing_enumeration(status::PLATFORM_NOT_FOUND_KHR);
        assert_eq!(runtime.platforms().unwrap_err(), status::PLATFORM_NOT_FOUND_KHR);

        let runtime = HostRuntime::new()
            .with_platform(HostPlatform::new("p", "v").failing_device_query(status::DEVICE_NOT_FOUND));
        let platforms = runtime.platforms().unwrap();
        assert_eq!(platforms[0].devices.as_ref().unwrap_err(), &status::DEVICE_NOT_FOUND);
    }

    #[test]
    fn test_scan_program_finds_vecadd() {
        let kernels = scan_program(SOURCE).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].name, "vecadd");
        assert_eq!(kernels[0].params, 4);
    }

    #[test]
    fn test_scan_program_rejects_bad_sources() {
        let log = scan_program("__kernel void f(__global int *a) { a[0] = 1;").unwrap_err();
        assert!(log.contains("unterminated '{'"), "log: {log}");

        let log = scan_program("__kernel void f() { ) }").unwrap_err();
        assert!(log.contains("unexpected ')'"), "log: {log}");

        let log = scan_program("int helper(int x) { return x; }").unwrap_err();
        assert!(log.contains("no __kernel functions"), "log: {log}");
    }

    #[test]
    fn test_build_log_is_per_device() {
        let device = HostDevice::new("dev0", DeviceClass::Gpu);
        let other = HostDevice::new("dev1", DeviceClass::Gpu);
        let r = rig(device.clone());
        let mut program = r.runtime.create_program(&r.context, "__kernel void f( {").unwrap();
        assert_eq!(
            r.runtime.build_program(&mut program, &device),
            Err(status::BUILD_PROGRAM_FAILURE)
        );
        assert!(!r.runtime.build_log(&program, &device).unwrap().is_empty());
        assert!(r.runtime.build_log(&program, &other).unwrap().is_empty());
    }

    #[test]
    fn test_kernel_name_resolution() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let mut program = r.runtime.create_program(&r.context, SOURCE).unwrap();

        let unbuilt = r
            .runtime
            .create_kernel(&program, &r.queue, "vecadd", crate::compiler::VECADD_PARAMS);
        assert_eq!(unbuilt.unwrap_err(), status::INVALID_PROGRAM_EXECUTABLE);

        r.runtime.build_program(&mut program, &device).unwrap();
        let missing = r
            .runtime
            .create_kernel(&program, &r.queue, "vecmul", crate::compiler::VECADD_PARAMS);
        assert_eq!(missing.unwrap_err(), status::INVALID_KERNEL_NAME);
    }

    #[test]
    fn test_set_arg_checks_index_and_kind() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let mut kernel = vecadd_kernel(&r, &device);
        assert_eq!(
            r.runtime.set_kernel_arg(&mut kernel, 4, KernelArg::ScalarI32(1)),
            Err(status::INVALID_ARG_INDEX)
        );
        assert_eq!(
            r.runtime.set_kernel_arg(&mut kernel, 0, KernelArg::ScalarI32(1)),
            Err(status::INVALID_ARG_VALUE)
        );
    }

    #[test]
    fn test_unbound_kernel_rejected_at_enqueue() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let kernel = vecadd_kernel(&r, &device);
        let result = unsafe { r.runtime.enqueue_kernel(&r.queue, &kernel, 4, &[]) };
        assert_eq!(result.unwrap_err(), status::INVALID_KERNEL_ARGS);
    }

    #[test]
    fn test_host_access_hints_enforced() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device);
        let input = r
            .runtime
            .create_buffer(&r.context, &r.queue, MemFlags::INPUT, 4)
            .unwrap();
        let output = r
            .runtime
            .create_buffer(&r.context, &r.queue, MemFlags::OUTPUT, 4)
            .unwrap();

        let mut out = [0i32; 4];
        let read = unsafe { r.runtime.enqueue_read(&r.queue, &input, true, &mut out, &[]) };
        assert_eq!(read.unwrap_err(), status::INVALID_OPERATION);

        let write = unsafe { r.runtime.enqueue_write(&r.queue, &output, true, &[1, 2, 3, 4], &[]) };
        assert_eq!(write.unwrap_err(), status::INVALID_OPERATION);
    }

    #[test]
    fn test_allocation_limit() {
        let device = HostDevice::new("small", DeviceClass::Accelerator).max_alloc_bytes(64);
        let r = rig(device);
        assert!(r
            .runtime
            .create_buffer(&r.context, &r.queue, MemFlags::INPUT, 16)
            .is_ok());
        assert_eq!(
            r.runtime
                .create_buffer(&r.context, &r.queue, MemFlags::INPUT, 17)
                .unwrap_err(),
            status::INVALID_BUFFER_SIZE
        );
    }

    #[test]
    fn test_commands_deferred_until_finish() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device);
        let buffer = r
            .runtime
            .create_buffer(&r.context, &r.queue, MemFlags::INPUT, 2)
            .unwrap();
        let event = unsafe { r.runtime.enqueue_write(&r.queue, &buffer, false, &[7, 8], &[]) }.unwrap();
        assert_eq!(event.status(), EventStatus::Queued);
        assert_eq!(r.queue.pending(), 1);
        assert_eq!(
            r.runtime.profiling(&event).unwrap_err(),
            status::PROFILING_INFO_NOT_AVAILABLE
        );

        r.runtime.finish(&r.queue).unwrap();
        assert_eq!(r.queue.pending(), 0);
        let stamps = r.runtime.profiling(&event).unwrap();
        assert!(stamps.end >= stamps.start);
        assert_eq!(buffer.to_elements(), vec![7, 8]);
    }

    #[test]
    fn test_profiling_disabled_queue() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let runtime = HostRuntime::new();
        let context = runtime.create_context(&device).unwrap();
        let queue = runtime.create_queue(&context, &device, false).unwrap();
        let buffer = runtime
            .create_buffer(&context, &queue, MemFlags::INPUT, 1)
            .unwrap();
        let event = unsafe { runtime.enqueue_write(&queue, &buffer, true, &[1], &[]) }.unwrap();
        assert!(matches!(event.status(), EventStatus::Complete(_)));
        assert_eq!(
            runtime.profiling(&event).unwrap_err(),
            status::PROFILING_INFO_NOT_AVAILABLE
        );
    }

    #[test]
    fn test_out_of_order_queue_without_wait_list_reads_stale_memory() {
        let device = HostDevice::new("ooo", DeviceClass::Gpu).out_of_order();
        let r = rig(device.clone());
        let a = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 4).unwrap();
        let b = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 4).unwrap();
        let c = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::OUTPUT, 4).unwrap();
        let mut kernel = vecadd_kernel(&r, &device);
        r.runtime.set_kernel_arg(&mut kernel, 0, KernelArg::Buffer(&a)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 1, KernelArg::Buffer(&b)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 2, KernelArg::Buffer(&c)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 3, KernelArg::ScalarI32(4)).unwrap();

        let mut out = [0i32; 4];
        unsafe {
            r.runtime.enqueue_write(&r.queue, &a, false, &[1; 4], &[]).unwrap();
            r.runtime.enqueue_write(&r.queue, &b, false, &[2; 4], &[]).unwrap();
            r.runtime.enqueue_kernel(&r.queue, &kernel, 4, &[]).unwrap();
            r.runtime.enqueue_read(&r.queue, &c, true, &mut out, &[]).unwrap();
        }
        r.runtime.finish(&r.queue).unwrap();

        let poison = i32::from_ne_bytes([UNINITIALIZED_BYTE; 4]);
        assert_eq!(out, [poison; 4]);
    }

    #[test]
    fn test_out_of_order_queue_honors_wait_lists() {
        let device = HostDevice::new("ooo", DeviceClass::Gpu).out_of_order();
        let r = rig(device.clone());
        let a = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 4).unwrap();
        let b = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 4).unwrap();
        let c = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::OUTPUT, 4).unwrap();
        let mut kernel = vecadd_kernel(&r, &device);
        r.runtime.set_kernel_arg(&mut kernel, 0, KernelArg::Buffer(&a)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 1, KernelArg::Buffer(&b)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 2, KernelArg::Buffer(&c)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 3, KernelArg::ScalarI32(4)).unwrap();

        let mut out = [0i32; 4];
        let (wa, wb, k, rd) = unsafe {
            let wa = r.runtime.enqueue_write(&r.queue, &a, false, &[1; 4], &[]).unwrap();
            let wb = r.runtime.enqueue_write(&r.queue, &b, false, &[2; 4], &[]).unwrap();
            let k = r
                .runtime
                .enqueue_kernel(&r.queue, &kernel, 4, &[wa.clone(), wb.clone()])
                .unwrap();
            let rd = r
                .runtime
                .enqueue_read(&r.queue, &c, true, &mut out, &[k.clone()])
                .unwrap();
            (wa, wb, k, rd)
        };
        r.runtime.finish(&r.queue).unwrap();
        assert_eq!(out, [3; 4]);

        let stamp = |e: &HostEvent| r.runtime.profiling(e).unwrap();
        assert!(stamp(&k).start >= stamp(&wa).end);
        assert!(stamp(&k).start >= stamp(&wb).end);
        assert!(stamp(&rd).start >= stamp(&k).end);
        // Adversarial order: B lands before A.
        assert!(stamp(&wb).end <= stamp(&wa).start);
    }

    #[test]
    fn test_failure_propagates_through_wait_list() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let a = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 2).unwrap();
        let b = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 2).unwrap();
        let c = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::OUTPUT, 2).unwrap();
        let mut kernel = vecadd_kernel(&r, &device);
        r.runtime.set_kernel_arg(&mut kernel, 0, KernelArg::Buffer(&a)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 1, KernelArg::Buffer(&b)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 2, KernelArg::Buffer(&c)).unwrap();
        // N larger than the buffers: the kernel runs off the end.
        r.runtime.set_kernel_arg(&mut kernel, 3, KernelArg::ScalarI32(8)).unwrap();

        let mut out = [0i32; 2];
        let k = unsafe { r.runtime.enqueue_kernel(&r.queue, &kernel, 8, &[]) }.unwrap();
        let read = unsafe { r.runtime.enqueue_read(&r.queue, &c, true, &mut out, &[k.clone()]) };
        assert_eq!(read.unwrap_err(), status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert_eq!(k.status(), EventStatus::Failed(status::OUT_OF_RESOURCES));
        assert_eq!(
            r.runtime.wait_events(&[k]).unwrap_err(),
            status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        );
    }

    #[test]
    fn test_wait_events_on_stuck_queue() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let other = r.runtime.create_queue(&r.context, &device, true).unwrap();
        let buffer = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 1).unwrap();

        let (foreign, stuck) = unsafe {
            let foreign = r.runtime.enqueue_write(&other, &buffer, false, &[1], &[]).unwrap();
            let stuck = r
                .runtime
                .enqueue_write(&r.queue, &buffer, false, &[2], &[foreign.clone()])
                .unwrap();
            (foreign, stuck)
        };
        assert_eq!(
            r.runtime.finish(&r.queue).unwrap_err(),
            status::INVALID_EVENT_WAIT_LIST
        );
        assert_eq!(
            r.runtime.wait_events(&[stuck.clone()]).unwrap_err(),
            status::INVALID_EVENT_WAIT_LIST
        );

        r.runtime.finish(&other).unwrap();
        r.runtime.finish(&r.queue).unwrap();
        r.runtime.wait_events(&[foreign, stuck]).unwrap();
    }

    #[test]
    fn test_backwards_clock_stamps() {
        let device = HostDevice::new("skew", DeviceClass::Gpu).backwards_clock();
        let r = rig(device);
        let buffer = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 2).unwrap();
        let event = unsafe { r.runtime.enqueue_write(&r.queue, &buffer, true, &[1, 2], &[]) }.unwrap();
        let stamps = r.runtime.profiling(&event).unwrap();
        assert!(stamps.end < stamps.start);
        assert_eq!(stamps.elapsed_ns(), None);
    }

    #[test]
    fn test_vecadd_guard_and_wrapping() {
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let r = rig(device.clone());
        let a = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 3).unwrap();
        let b = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::INPUT, 3).unwrap();
        let c = r.runtime.create_buffer(&r.context, &r.queue, MemFlags::OUTPUT, 3).unwrap();
        let mut kernel = vecadd_kernel(&r, &device);
        r.runtime.set_kernel_arg(&mut kernel, 0, KernelArg::Buffer(&a)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 1, KernelArg::Buffer(&b)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 2, KernelArg::Buffer(&c)).unwrap();
        r.runtime.set_kernel_arg(&mut kernel, 3, KernelArg::ScalarI32(2)).unwrap();

        let mut out = [0i32; 3];
        unsafe {
            r.runtime.enqueue_write(&r.queue, &a, true, &[i32::MAX, 5, 5], &[]).unwrap();
            r.runtime.enqueue_write(&r.queue, &b, true, &[1, 6, 6], &[]).unwrap();
            // Dispatch range larger than N: the guard leaves index 2 untouched.
            let k = r.runtime.enqueue_kernel(&r.queue, &kernel, 3, &[]).unwrap();
            r.runtime.enqueue_read(&r.queue, &c, true, &mut out, &[k]).unwrap();
        }
        let poison = i32::from_ne_bytes([UNINITIALIZED_BYTE; 4]);
        assert_eq!(out, [i32::MIN, 11, poison]);
    }
}
