/*!
Shared constants and CLI surfaces for the kernel, interrupt controller, and
workers.

The worker-block grammar (`-- cmd1 -- cmd2 ...`) is not something clap's
derive API expresses directly — clap supports one trailing `--` group, not a
repeated one — so [`KernelConfig::parse`] runs clap only over the leading
`quantum`/`duration`/flags, then splits the remainder by hand. This mirrors
the original coursework's own hand-rolled `parse_argv`, just with typed
errors instead of a printed usage string and a manual exit.
*/

use std::path::PathBuf;

use clap::Parser;

use crate::error::KernelError;

/// Exactly 20 virtual instructions per worker run, regardless of variant.
pub const WORKER_ITERATIONS: u32 = 20;

/// Virtual instruction counters at which the mixed worker variant raises I/O.
pub const MIXED_IO_POINTS: [u32; 2] = [3, 8];

/// Minimum/maximum worker fleet size the kernel will accept.
pub const MIN_WORKERS: usize = 3;
pub const MAX_WORKERS: usize = 6;

/// Wall-clock seconds the interrupt controller spends servicing one I/O
/// request.
pub const IO_SERVICE_SECONDS: u64 = 3;

/// Bound on the interrupt controller's internal request queue.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Default path for the named request FIFO; overridable on the kernel and
/// controller command lines.
pub const DEFAULT_FIFO_PATH: &str = "/tmp/arness_rr_iofifo";

/// Prefix for the shared-table's POSIX shm name.
pub const SHM_NAME_PREFIX: &str = "/rrsim";

/// The shared table's name is deterministic from the kernel's own pid, so
/// the interrupt controller only needs that pid (already on its command
/// line) to attach the same table the kernel created — no separate
/// `--shm-name` flag required.
pub fn shm_name_for(kernel_pid: i32) -> String {
    format!("{SHM_NAME_PREFIX}_{kernel_pid}")
}

#[derive(Debug, Clone)]
pub struct WorkerBlock {
    pub program: String,
    pub args: Vec<String>,
}

/// Parsed and validated kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub quantum_seconds: u64,
    pub duration_seconds: u64,
    pub fifo_path: PathBuf,
    pub log_level: Option<String>,
    pub workers: Vec<WorkerBlock>,
}

/// Leading, clap-parsed portion of the kernel's command line. The trailing
/// `-- cmd -- cmd ...` worker blocks are consumed separately from
/// `std::env::args()` because clap's `--` handling only models a single
/// trailing group.
#[derive(Debug, Parser)]
#[command(
    name = "kernel",
    about = "Round-robin scheduler supervising a fleet of worker processes"
)]
struct KernelLeadingArgs {
    /// Length of one scheduling quantum, in seconds.
    quantum_seconds: u64,

    /// Total wall-clock run duration, in seconds.
    duration_seconds: u64,

    /// Path of the named FIFO used to submit I/O requests to the controller.
    #[arg(long = "fifo-path", default_value = DEFAULT_FIFO_PATH)]
    fifo_path: PathBuf,

    /// Default `log` filter level, used when `RUST_LOG` is unset.
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

impl KernelConfig {
    /// Parse `argv` (including `argv[0]`) into a validated configuration.
    ///
    /// `argv` is taken explicitly (rather than read from `std::env::args()`
    /// internally) so tests can exercise the worker-block grammar without
    /// a real process's argument vector.
    pub fn parse(argv: &[String]) -> Result<Self, KernelError> {
        let dashdash = argv
            .iter()
            .position(|a| a == "--")
            .ok_or_else(|| KernelError::Args("missing worker blocks (expected `--`)".into()))?;

        let leading = &argv[..dashdash];
        let leading =
            KernelLeadingArgs::try_parse_from(leading).map_err(|e| KernelError::Args(e.to_string()))?;

        if leading.quantum_seconds == 0 || leading.duration_seconds == 0 {
            return Err(KernelError::Args(
                "quantum and duration must both be positive".into(),
            ));
        }

        let workers = parse_worker_blocks(&argv[dashdash..])?;
        if workers.len() < MIN_WORKERS || workers.len() > MAX_WORKERS {
            return Err(KernelError::Args(format!(
                "expected {MIN_WORKERS}..={MAX_WORKERS} worker blocks, got {}",
                workers.len()
            )));
        }

        Ok(Self {
            quantum_seconds: leading.quantum_seconds,
            duration_seconds: leading.duration_seconds,
            fifo_path: leading.fifo_path,
            log_level: leading.log_level,
            workers,
        })
    }
}

/// Split `"-- cmd1 arg -- cmd2 -- cmd3 arg1 arg2"` into worker blocks.
///
/// Each block must name a non-empty program; an empty block (two adjacent
/// `--` tokens) is dropped rather than rejected, matching the original's
/// `if a > 0 { NPROCS++ }` guard.
fn parse_worker_blocks(tail: &[String]) -> Result<Vec<WorkerBlock>, KernelError> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < tail.len() {
        if tail[i] != "--" {
            return Err(KernelError::Args(format!(
                "expected `--` to start a worker block, found {:?}",
                tail[i]
            )));
        }
        i += 1;
        let start = i;
        while i < tail.len() && tail[i] != "--" {
            i += 1;
        }
        if i > start {
            blocks.push(WorkerBlock {
                program: tail[start].clone(),
                args: tail[start + 1..i].to_vec(),
            });
        }
    }
    Ok(blocks)
}

/// Interrupt controller CLI: `inter_controller <kernel_pid> <fifo_path>`.
///
/// The original source carried two observed argument orderings; this rewrite
/// picks kernel-pid first and documents it as the chosen convention (see
/// `DESIGN.md`). No separate shared-memory name is needed — see
/// [`shm_name_for`].
#[derive(Debug, Parser)]
#[command(
    name = "inter_controller",
    about = "Timer tick and I/O completion generator for the round-robin kernel"
)]
pub struct ControllerArgs {
    /// OS process id of the kernel to signal.
    pub kernel_pid: i32,

    /// Path of the named FIFO carrying I/O requests from the kernel.
    pub fifo_path: PathBuf,
}

/// Worker CLI: `worker_cpu <shm_name>` / `worker_mixed <shm_name>`. A worker
/// locates its own slot at startup by scanning `worker_pid[]` for its own
/// pid rather than being told a slot index (see [`crate::worker_core`]).
#[derive(Debug, Parser)]
#[command(about = "Worker process driven by the round-robin kernel")]
pub struct WorkerArgs {
    /// POSIX shared-memory name of the process table to attach.
    pub shm_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn parses_three_worker_blocks() {
        let cfg = KernelConfig::parse(&argv("kernel 1 15 -- worker_mixed -- worker_mixed -- worker_mixed")).unwrap();
        assert_eq!(cfg.quantum_seconds, 1);
        assert_eq!(cfg.duration_seconds, 15);
        assert_eq!(cfg.workers.len(), 3);
        assert_eq!(cfg.workers[0].program, "worker_mixed");
    }

    #[test]
    fn keeps_worker_arguments() {
        let cfg = KernelConfig::parse(&argv(
            "kernel 1 15 -- worker_mixed -- worker_cpu --extra -- worker_mixed",
        ))
        .unwrap();
        assert_eq!(cfg.workers.len(), 3);
        assert_eq!(cfg.workers[1].args, vec!["--extra".to_string()]);
    }

    #[test]
    fn rejects_too_few_workers() {
        let err = KernelConfig::parse(&argv("kernel 2 30 -- worker_mixed -- worker_cpu")).unwrap_err();
        assert!(matches!(err, KernelError::Args(_)));
    }

    #[test]
    fn rejects_non_positive_quantum() {
        let err = KernelConfig::parse(&argv(
            "kernel 0 30 -- worker_mixed -- worker_cpu -- worker_cpu",
        ))
        .unwrap_err();
        assert!(matches!(err, KernelError::Args(_)));
    }

    #[test]
    fn rejects_missing_dashdash() {
        let err = KernelConfig::parse(&argv("kernel 1 15")).unwrap_err();
        assert!(matches!(err, KernelError::Args(_)));
    }

    #[test]
    fn drops_empty_worker_block() {
        let cfg = KernelConfig::parse(&argv(
            "kernel 1 15 -- worker_mixed -- -- worker_cpu -- worker_cpu",
        ))
        .unwrap();
        assert_eq!(cfg.workers.len(), 3);
    }
}
