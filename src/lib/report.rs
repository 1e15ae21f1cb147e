//! # Profiling and Reporting
//!
//! Turns a drained pipeline into a [`BenchReport`]: one device-timed duration
//! per stage, the host-measured overall time and the correctness verdict.
//!
//! Stage durations are `(end - start) * 1e-6` milliseconds from the event's
//! profiling counters. A pair with `end < start` is an error rather than a
//! negative duration.

use std::fmt::Write as _;

use serde::Serialize;

use crate::config::VerifySample;
use crate::error::{BenchError, Result};
use crate::pipeline::{HostArrays, PipelineRun, Stage};
use crate::runtime::ComputeRuntime;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Device-measured duration of one event, in milliseconds.
pub fn stage_ms<R: ComputeRuntime>(runtime: &R, event: &R::Event, stage: Stage) -> Result<f64> {
    let stamps = runtime
        .profiling(event)
        .map_err(|code| BenchError::Profiling { stage, code })?;
    let elapsed = stamps
        .elapsed_ns()
        .ok_or(BenchError::NonMonotonicTimestamps {
            stage,
            start: stamps.start,
            end: stamps.end,
        })?;
    Ok(elapsed as f64 * 1e-6)
}

/// Per-stage durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageTimings {
    pub write_a_ms: f64,
    pub write_b_ms: f64,
    pub kernel_ms: f64,
    pub read_c_ms: f64,
    /// Host clock, first submission through the drain
    pub overall_ms: f64,
}

/// Outcome of comparing C against `A[i] + B[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Passed {
        checked: usize,
        exhaustive: bool,
    },
    Failed {
        index: usize,
        expected: i32,
        actual: i32,
    },
}

impl Verification {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// The console verdict line.
    pub fn line(&self) -> String {
        match *self {
            Self::Passed {
                checked,
                exhaustive: true,
            } => format!("Result verification: PASSED (all {checked} elements are correct)"),
            Self::Passed { checked, .. } => {
                format!("Result verification: PASSED (first {checked} elements are correct)")
            }
            Self::Failed {
                index,
                expected,
                actual,
            } => format!(
                "Result verification: FAILED (element {index}: expected {expected}, got {actual})"
            ),
        }
    }
}

/// Check the sampled elements of C, stopping at the first mismatch.
///
/// Only reads `host`, so repeating the check gives the same verdict.
pub fn verify(host: &HostArrays, sample: VerifySample) -> Verification {
    let checked = sample.count(host.len());
    let mismatch = host
        .a()
        .iter()
        .zip(host.b())
        .zip(host.c())
        .take(checked)
        .enumerate()
        .find_map(|(index, ((&a, &b), &actual))| {
            let expected = a.wrapping_add(b);
            (actual != expected).then_some(Verification::Failed {
                index,
                expected,
                actual,
            })
        });
    mismatch.unwrap_or(Verification::Passed {
        checked,
        exhaustive: matches!(sample, VerifySample::All),
    })
}

/// Results of one device run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub elements: usize,
    pub data_size_mb: f64,
    pub timings: StageTimings,
    pub verification: Verification,
}

impl BenchReport {
    /// Read every stage's timestamps and run the check. `run` must be drained.
    pub fn collect<R: ComputeRuntime>(
        runtime: &R,
        run: &PipelineRun<R::Event>,
        host: &HostArrays,
        sample: VerifySample,
    ) -> Result<Self> {
        let ms = |stage| stage_ms(runtime, run.events.get(stage), stage);
        let timings = StageTimings {
            write_a_ms: ms(Stage::WriteA)?,
            write_b_ms: ms(Stage::WriteB)?,
            kernel_ms: ms(Stage::KernelExec)?,
            read_c_ms: ms(Stage::ReadC)?,
            overall_ms: run.overall.as_secs_f64() * 1000.0,
        };
        let elements = host.len();
        Ok(Self {
            elements,
            data_size_mb: (elements * std::mem::size_of::<i32>()) as f64 / BYTES_PER_MB,
            timings,
            verification: verify(host, sample),
        })
    }

    /// The console results block, blank line before and after.
    pub fn render(&self) -> String {
        let t = &self.timings;
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "--- Benchmark Results ({} elements) ---", self.elements);
        let _ = writeln!(out, "Data Size: {:.2} MB", self.data_size_mb);
        let _ = writeln!(out, "Write A (Host -> Device): {:.6} ms", t.write_a_ms);
        let _ = writeln!(out, "Write B (Host -> Device): {:.6} ms", t.write_b_ms);
        let _ = writeln!(out, "Kernel Execution Time:    {:.6} ms", t.kernel_ms);
        let _ = writeln!(out, "Read C (Device -> Host):  {:.6} ms", t.read_c_ms);
        let _ = writeln!(
            out,
            "Total Overall Time (measured by host clock): {:.6} ms",
            t.overall_ms
        );
        let _ = writeln!(out, "{}", self.verification.line());
        let _ = writeln!(out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::host::{HostDevice, HostRuntime};
    use crate::runtime::{status, DeviceClass, MemFlags};
    use proptest::prelude::*;

    fn arrays_with_c(a: Vec<i32>, b: Vec<i32>, c: &[i32]) -> HostArrays {
        let mut host = HostArrays::from_inputs(a, b).unwrap();
        host.c_mut().copy_from_slice(c);
        host
    }

    #[test]
    fn test_verify_prefix_passes() {
        let host = arrays_with_c(vec![1; 20], vec![2; 20], &[3; 20]);
        let verdict = verify(&host, VerifySample::Prefix(10));
        assert_eq!(
            verdict,
            Verification::Passed {
                checked: 10,
                exhaustive: false
            }
        );
        assert_eq!(
            verdict.line(),
            "Result verification: PASSED (first 10 elements are correct)"
        );
    }

    #[test]
    fn test_verify_prefix_misses_tail_error() {
        let mut c = vec![3; 20];
        c[15] = 0;
        let host = arrays_with_c(vec![1; 20], vec![2; 20], &c);
        assert!(verify(&host, VerifySample::Prefix(10)).passed());
        assert_eq!(
            verify(&host, VerifySample::All),
            Verification::Failed {
                index: 15,
                expected: 3,
                actual: 0
            }
        );
    }

    #[test]
    fn test_verify_reports_first_mismatch() {
        let host = arrays_with_c(vec![1; 5], vec![2; 5], &[3, 9, 3, 7, 3]);
        let verdict = verify(&host, VerifySample::All);
        assert_eq!(
            verdict.line(),
            "Result verification: FAILED (element 1: expected 3, got 9)"
        );
    }

    #[test]
    fn test_verify_empty_and_wrapping() {
        let host = HostArrays::filled(0, 1, 2);
        assert_eq!(
            verify(&host, VerifySample::Prefix(10)),
            Verification::Passed {
                checked: 0,
                exhaustive: false
            }
        );

        let host = arrays_with_c(vec![i32::MAX], vec![1], &[i32::MIN]);
        assert!(verify(&host, VerifySample::All).passed());
    }

    #[test]
    fn test_render_format() {
        let report = BenchReport {
            elements: 1_048_576,
            data_size_mb: 4.0,
            timings: StageTimings {
                write_a_ms: 0.5,
                write_b_ms: 0.25,
                kernel_ms: 0.125,
                read_c_ms: 1.0,
                overall_ms: 2.0,
            },
            verification: Verification::Passed {
                checked: 10,
                exhaustive: false,
            },
        };
        let expected = "\n\
--- Benchmark Results (1048576 elements) ---\n\
Data Size: 4.00 MB\n\
Write A (Host -> Device): 0.500000 ms\n\
Write B (Host -> Device): 0.250000 ms\n\
Kernel Execution Time:    0.125000 ms\n\
Read C (Device -> Host):  1.000000 ms\n\
Total Overall Time (measured by host clock): 2.000000 ms\n\
Result verification: PASSED (first 10 elements are correct)\n\
\n";
        assert_eq!(report.render(), expected);
    }

    #[test]
    fn test_profiling_unavailable_before_drain() {
        let runtime = HostRuntime::new();
        let device = HostDevice::new("dev", DeviceClass::Cpu);
        let context = runtime.create_context(&device).unwrap();
        let queue = runtime.create_queue(&context, &device, true).unwrap();
        let buffer = runtime
            .create_buffer(&context, &queue, MemFlags::INPUT, 1)
            .unwrap();
        let event = unsafe { runtime.enqueue_write(&queue, &buffer, false, &[1], &[]) }.unwrap();
        let err = stage_ms(&runtime, &event, Stage::WriteA).err().unwrap();
        assert!(matches!(
            err,
            BenchError::Profiling {
                stage: Stage::WriteA,
                code: status::PROFILING_INFO_NOT_AVAILABLE
            }
        ));
        runtime.finish(&queue).unwrap();
        assert!(stage_ms(&runtime, &event, Stage::WriteA).unwrap() >= 0.0);
    }

    #[test]
    fn test_backwards_stamps_rejected() {
        let runtime = HostRuntime::new();
        let device = HostDevice::new("skew", DeviceClass::Gpu).backwards_clock();
        let context = runtime.create_context(&device).unwrap();
        let queue = runtime.create_queue(&context, &device, true).unwrap();
        let buffer = runtime
            .create_buffer(&context, &queue, MemFlags::INPUT, 1)
            .unwrap();
        let event = unsafe { runtime.enqueue_write(&queue, &buffer, true, &[1], &[]) }.unwrap();

        let err = stage_ms(&runtime, &event, Stage::KernelExec).err().unwrap();
        match err {
            BenchError::NonMonotonicTimestamps { stage, start, end } => {
                assert_eq!(stage, Stage::KernelExec);
                assert!(end < start);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_collect_fails_on_backwards_stamps() {
        use crate::buffers::BufferSet;
        use crate::compiler::{CompiledWorkload, ENTRY_POINT, VECADD_SOURCE};
        use crate::device::DeviceResources;
        use crate::pipeline;

        let runtime = HostRuntime::new();
        let device = HostDevice::new("skew", DeviceClass::Gpu).backwards_clock();
        let resources = DeviceResources::acquire(&runtime, &device).unwrap();
        let mut workload =
            CompiledWorkload::build(&runtime, &resources, &device, VECADD_SOURCE, ENTRY_POINT)
                .unwrap();
        let buffers = BufferSet::allocate(&runtime, &resources, 16).unwrap();
        let mut host = HostArrays::filled(16, 1, 2);
        let run = pipeline::execute(&runtime, &resources, &mut workload, &buffers, &mut host)
            .unwrap();
        assert!(host.c().iter().all(|&x| x == 3));

        let err = BenchReport::collect(&runtime, &run, &host, VerifySample::All)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BenchError::NonMonotonicTimestamps {
                stage: Stage::WriteA,
                ..
            }
        ));
    }

    #[test]
    fn test_json_verdict_shape() {
        let json = serde_json::to_value(Verification::Failed {
            index: 2,
            expected: 3,
            actual: 4,
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["index"], 2);
    }

    proptest! {
        #[test]
        fn prop_verify_is_idempotent(
            pairs in proptest::collection::vec((any::<i32>(), any::<i32>(), any::<i32>()), 0..64),
            k in 0usize..80,
        ) {
            let a: Vec<i32> = pairs.iter().map(|p| p.0).collect();
            let b: Vec<i32> = pairs.iter().map(|p| p.1).collect();
            let c: Vec<i32> = pairs.iter().map(|p| p.2).collect();
            let host = arrays_with_c(a, b, &c);
            for sample in [VerifySample::Prefix(k), VerifySample::All] {
                let first = verify(&host, sample);
                prop_assert_eq!(first, verify(&host, sample));
            }
        }

        #[test]
        fn prop_correct_output_always_passes(
            pairs in proptest::collection::vec((any::<i32>(), any::<i32>()), 0..64),
        ) {
            let a: Vec<i32> = pairs.iter().map(|p| p.0).collect();
            let b: Vec<i32> = pairs.iter().map(|p| p.1).collect();
            let c: Vec<i32> = pairs.iter().map(|p| p.0.wrapping_add(p.1)).collect();
            let host = arrays_with_c(a, b, &c);
            prop_assert!(verify(&host, VerifySample::All).passed());
        }
    }
}
