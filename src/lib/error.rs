//! Benchmark error types.

use thiserror::Error;

use crate::buffers::BufferRole;
use crate::pipeline::Stage;
use crate::runtime::{status, Status};

fn status_name(code: &Status) -> &'static str {
    status::name(*code)
}

/// Errors produced while enumerating devices or benchmarking one device.
///
/// Most variants abort only the device they occurred on. See
/// [`BenchError::is_fatal`] for the ones that end the sweep.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("platform enumeration failed: {} ({code})", status_name(.code))]
    Enumeration { code: Status },

    #[error("no compute platforms found")]
    NoPlatforms,

    #[error("context creation failed: {} ({code})", status_name(.code))]
    ContextCreation { code: Status },

    #[error("command queue creation failed: {} ({code})", status_name(.code))]
    QueueCreation { code: Status },

    #[error("program build failed: {} ({code})\n{log}", status_name(.code))]
    Build { code: Status, log: String },

    #[error("kernel entry point '{name}' unavailable: {} ({code})", status_name(.code))]
    EntryPoint { name: String, code: Status },

    #[error("allocation of buffer {role} failed: {} ({code})", status_name(.code))]
    Allocation { role: BufferRole, code: Status },

    #[error("setting kernel argument {index} failed: {} ({code})", status_name(.code))]
    KernelArgument { index: u32, code: Status },

    #[error("enqueue of {stage} failed: {} ({code})", status_name(.code))]
    Enqueue { stage: Stage, code: Status },

    #[error("queue drain failed: {} ({code})", status_name(.code))]
    Drain { code: Status },

    #[error("profiling info for {stage} unavailable: {} ({code})", status_name(.code))]
    Profiling { stage: Stage, code: Status },

    #[error("{stage} reported end timestamp {end} before start {start}")]
    NonMonotonicTimestamps { stage: Stage, start: u64, end: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("writing the report failed: {0}")]
    Output(#[from] std::io::Error),
}

impl BenchError {
    /// Runtime status code carried by the error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Enumeration { code }
            | Self::ContextCreation { code }
            | Self::QueueCreation { code }
            | Self::Build { code, .. }
            | Self::EntryPoint { code, .. }
            | Self::Allocation { code, .. }
            | Self::KernelArgument { code, .. }
            | Self::Enqueue { code, .. }
            | Self::Drain { code }
            | Self::Profiling { code, .. } => Some(*code),
            Self::NoPlatforms
            | Self::NonMonotonicTimestamps { .. }
            | Self::InvalidConfig(_)
            | Self::Output(_) => None,
        }
    }

    /// Errors that end the whole sweep rather than one device's run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Enumeration { .. } | Self::NoPlatforms | Self::InvalidConfig(_) | Self::Output(_)
        )
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, BenchError>;
