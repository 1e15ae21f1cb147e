//! # Benchmark Configuration
//!
//! `BenchConfig` holds every knob of a sweep: the workload shape, the host
//! fill values, how much of the output is verified, the kernel source and the
//! cosmetic separator marker. The binary builds it from command-line flags
//! and can persist it as `config.json` next to the results.

use serde::{Deserialize, Serialize};

use crate::compiler::{ENTRY_POINT, VECADD_SOURCE};
use crate::error::{BenchError, Result};

/// Default element count: 1 Mi `int`s, 4 MiB per buffer.
pub const DEFAULT_ELEMENTS: usize = 1024 * 1024;

/// Default number of leading output elements checked against the oracle.
pub const DEFAULT_VERIFY_COUNT: usize = 10;

/// Platforms whose name contains this marker get a separator line before them.
pub const DEFAULT_SEPARATOR_MARKER: &str = "NVIDIA CUDA";

/// How many output elements are compared against `A[i] + B[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySample {
    /// The first `k` elements (fewer when N < k).
    Prefix(usize),
    /// Every element.
    All,
}

impl VerifySample {
    /// Number of elements checked for a run of `n` elements.
    pub fn count(&self, n: usize) -> usize {
        match *self {
            Self::Prefix(k) => k.min(n),
            Self::All => n,
        }
    }
}

impl Default for VerifySample {
    fn default() -> Self {
        Self::Prefix(DEFAULT_VERIFY_COUNT)
    }
}

/// Configuration of one device sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Element count N shared by all three buffers and the kernel argument
    pub elements: usize,
    /// Value every element of host array A is filled with
    pub fill_a: i32,
    /// Value every element of host array B is filled with
    pub fill_b: i32,
    /// Verification sample
    pub verify: VerifySample,
    /// Kernel program source text
    pub kernel_source: String,
    /// Kernel entry point resolved after the build
    pub entry_point: String,
    /// Platform name marker that triggers the separator line
    pub separator_marker: String,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
            fill_a: 1,
            fill_b: 2,
            verify: VerifySample::default(),
            kernel_source: VECADD_SOURCE.to_string(),
            entry_point: ENTRY_POINT.to_string(),
            separator_marker: DEFAULT_SEPARATOR_MARKER.to_string(),
        }
    }
}

impl BenchConfig {
    /// Set the element count
    pub fn with_elements(mut self, elements: usize) -> Self {
        self.elements = elements;
        self
    }

    /// Set the host fill values
    pub fn with_fill(mut self, fill_a: i32, fill_b: i32) -> Self {
        self.fill_a = fill_a;
        self.fill_b = fill_b;
        self
    }

    /// Set the verification sample
    pub fn with_verify(mut self, verify: VerifySample) -> Self {
        self.verify = verify;
        self
    }

    /// Replace the kernel source
    pub fn with_kernel_source(mut self, source: impl Into<String>) -> Self {
        self.kernel_source = source.into();
        self
    }

    /// Reject configurations no device could run.
    ///
    /// N travels to the kernel as an OpenCL `int`, so it must fit in `i32`.
    pub fn validate(&self) -> Result<()> {
        if i32::try_from(self.elements).is_err() {
            return Err(BenchError::InvalidConfig(format!(
                "element count {} exceeds the kernel's int range ({})",
                self.elements,
                i32::MAX
            )));
        }
        if self.entry_point.trim().is_empty() {
            return Err(BenchError::InvalidConfig(
                "kernel entry point name is empty".to_string(),
            ));
        }
        if self.kernel_source.trim().is_empty() {
            return Err(BenchError::InvalidConfig(
                "kernel source is empty".to_string(),
            ));
        }
        Ok(())
    }
}
