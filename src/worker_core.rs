/*!
Worker-loop logic shared by `worker_cpu` and `worker_mixed`.

A worker is just a fixed-length run of [`WORKER_ITERATIONS`] virtual
instructions, executed one per simulated tick. The only thing that
distinguishes the two binaries is their [`IoProfile`]: CPU-only workers never
raise I/O, mixed workers raise it at two fixed points in their run. Both the
self-location retry loop and the per-iteration policy are factored out here,
as plain functions over a `pc` counter, so they're unit-testable without a
real shared-memory segment or a real `SIGCONT`.
*/

use std::time::Duration;

use crate::config::{MIXED_IO_POINTS, WORKER_ITERATIONS};
use crate::proto::IoType;

/// How many instructions a worker executes per run, and at which of them (if
/// any) it raises I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProfile {
    /// Never raises I/O; runs all [`WORKER_ITERATIONS`] instructions as CPU
    /// bursts.
    CpuOnly,
    /// Raises I/O at each point in [`MIXED_IO_POINTS`], alternating
    /// READ/WRITE starting with READ.
    Mixed,
}

impl IoProfile {
    /// The I/O to raise at virtual instruction `pc` (1-indexed, matching the
    /// shared table's `pc` field), or `None` if this instruction is a plain
    /// CPU burst.
    pub fn io_at(self, pc: u32) -> Option<IoType> {
        match self {
            IoProfile::CpuOnly => None,
            IoProfile::Mixed => {
                let position = MIXED_IO_POINTS.iter().position(|&point| point == pc)?;
                Some(if position % 2 == 0 { IoType::Read } else { IoType::Write })
            }
        }
    }

    pub fn total_iterations(self) -> u32 {
        WORKER_ITERATIONS
    }
}

/// Retry policy for a worker locating its own slot in the shared table's
/// `worker_pid[]` array: the kernel may not have finished writing every
/// slot's pid by the time a freshly `fork`+`exec`'d worker's first tick
/// runs, so it polls briefly rather than failing immediately.
#[derive(Debug, Clone, Copy)]
pub struct SelfLocateRetry {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for SelfLocateRetry {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(50),
        }
    }
}

/// Scan `worker_pids` for `own_pid`, sleeping `retry.interval` between
/// attempts if not found, up to `retry.max_attempts` retries. `read_slots` is
/// injected so the retry loop is testable without a real shared-memory
/// segment; the binary passes a closure that re-reads the shared table.
/// Tests use a zero `interval` so the loop never actually waits.
pub fn locate_self<F>(own_pid: i32, retry: SelfLocateRetry, mut read_slots: F) -> Result<usize, u32>
where
    F: FnMut() -> Vec<i32>,
{
    for attempt in 0..=retry.max_attempts {
        let slots = read_slots();
        if let Some(slot) = slots.iter().position(|&pid| pid == own_pid) {
            return Ok(slot);
        }
        if attempt == retry.max_attempts {
            return Err(retry.max_attempts);
        }
        std::thread::sleep(retry.interval);
    }
    Err(retry.max_attempts)
}

/// One step of a worker's main loop: given the current virtual program
/// counter (1-indexed) and its profile, what should happen this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Ordinary CPU work; advance `pc` and keep running.
    Continue { next_pc: u32 },
    /// Raise I/O of `io_type` at the current `pc`, then block until resumed.
    RaiseIo { io_type: IoType },
    /// This was the worker's last instruction; it should exit.
    Finished,
}

/// Decide what a worker does at virtual instruction `pc` (1-indexed).
pub fn step(profile: IoProfile, pc: u32) -> Step {
    if let Some(io_type) = profile.io_at(pc) {
        return Step::RaiseIo { io_type };
    }
    if pc >= profile.total_iterations() {
        return Step::Finished;
    }
    Step::Continue { next_pc: pc + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_never_raises_io() {
        for pc in 1..=WORKER_ITERATIONS {
            assert_eq!(IoProfile::CpuOnly.io_at(pc), None);
        }
    }

    #[test]
    fn mixed_raises_read_then_write() {
        assert_eq!(IoProfile::Mixed.io_at(3), Some(IoType::Read));
        assert_eq!(IoProfile::Mixed.io_at(8), Some(IoType::Write));
        assert_eq!(IoProfile::Mixed.io_at(4), None);
    }

    #[test]
    fn step_raises_io_before_checking_completion() {
        assert_eq!(
            step(IoProfile::Mixed, 3),
            Step::RaiseIo {
                io_type: IoType::Read
            }
        );
    }

    #[test]
    fn step_finishes_at_last_iteration() {
        assert_eq!(step(IoProfile::CpuOnly, WORKER_ITERATIONS), Step::Finished);
        assert_eq!(
            step(IoProfile::CpuOnly, WORKER_ITERATIONS - 1),
            Step::Continue {
                next_pc: WORKER_ITERATIONS
            }
        );
    }

    #[test]
    fn locate_self_finds_pid_on_first_attempt() {
        let retry = SelfLocateRetry {
            max_attempts: 3,
            interval: Duration::from_millis(0),
        };
        let slot = locate_self(42, retry, || vec![7, 42, 9]).unwrap();
        assert_eq!(slot, 1);
    }

    #[test]
    fn locate_self_retries_until_found() {
        let retry = SelfLocateRetry {
            max_attempts: 3,
            interval: Duration::from_millis(0),
        };
        let mut calls = 0;
        let slot = locate_self(42, retry, || {
            calls += 1;
            if calls < 3 { vec![0, 0, 0] } else { vec![0, 42, 0] }
        })
        .unwrap();
        assert_eq!(slot, 1);
        assert_eq!(calls, 3);
    }

    #[test]
    fn locate_self_gives_up_after_max_attempts() {
        let retry = SelfLocateRetry {
            max_attempts: 2,
            interval: Duration::from_millis(0),
        };
        let err = locate_self(42, retry, || vec![0, 0, 0]).unwrap_err();
        assert_eq!(err, 2);
    }
}
