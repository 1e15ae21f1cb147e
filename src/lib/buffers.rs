//! # Buffer Set
//!
//! The three device allocations of one run: inputs A and B, output C. All
//! three hold exactly N `int`s. The output buffer is not zeroed, so every
//! element the check reads must have been written by the kernel.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::device::DeviceResources;
use crate::error::{BenchError, Result};
use crate::runtime::{ComputeRuntime, MemFlags};

/// Which of the three buffers an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferRole {
    A,
    B,
    C,
}

impl BufferRole {
    /// Access hints for this role.
    pub fn flags(self) -> MemFlags {
        match self {
            Self::A | Self::B => MemFlags::INPUT,
            Self::C => MemFlags::OUTPUT,
        }
    }
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        };
        f.write_str(label)
    }
}

pub struct BufferSet<R: ComputeRuntime> {
    pub a: R::Buffer,
    pub b: R::Buffer,
    pub c: R::Buffer,
    len: usize,
}

impl<R: ComputeRuntime> BufferSet<R> {
    /// Allocate A, B and C with `len` elements each, in that order.
    pub fn allocate(runtime: &R, resources: &DeviceResources<R>, len: usize) -> Result<Self> {
        let alloc = |role: BufferRole| {
            runtime
                .create_buffer(&resources.context, &resources.queue, role.flags(), len)
                .map_err(|code| BenchError::Allocation { role, code })
        };
        let a = alloc(BufferRole::A)?;
        let b = alloc(BufferRole::B)?;
        let c = alloc(BufferRole::C)?;
        debug!(
            "[BENCH:ALLOC] 3 x {} bytes",
            len * std::mem::size_of::<i32>()
        );
        Ok(Self { a, b, c, len })
    }

    /// Element count shared by all three buffers.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
