/*!
Error types for the three binaries in this workspace.

Setup failures (shared-table creation, FIFO creation, child spawn, signal
registration) are fatal and mapped to a process exit code in `main`; everything
else (malformed FIFO lines, signals for unknown pids, duplicate IRQ1s) is a
protocol error that is logged and otherwise ignored, and never reaches these
types.
*/

use std::io;

/// Failures that can abort the Kernel before or during its main loop.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("invalid arguments: {0}")]
    Args(String),

    #[error("failed to create shared process table: {0}")]
    ShmCreate(#[source] io::Error),

    #[error("failed to create request FIFO at {path}: {source}")]
    FifoCreate {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn interrupt controller: {0}")]
    SpawnController(#[source] io::Error),

    #[error("failed to spawn worker {index} ({cmd}): {source}")]
    SpawnWorker {
        index: usize,
        cmd: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handler for {signal}: {source}")]
    SignalInstall {
        signal: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("signal delivery failed: {0}")]
    Signal(#[from] nix::Error),
}

/// Failures that can abort the Interrupt Controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid arguments: {0}")]
    Args(String),

    #[error("failed to attach shared process table: {0}")]
    ShmAttach(#[source] io::Error),

    #[error("failed to install signal handler for {signal}: {source}")]
    SignalInstall {
        signal: &'static str,
        #[source]
        source: nix::Error,
    },
}

/// Failures that can abort a Worker before it reaches its main loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid arguments: {0}")]
    Args(String),

    #[error("failed to attach shared process table: {0}")]
    ShmAttach(#[source] io::Error),

    #[error("could not locate own pid in the shared process table after {retries} retries")]
    SelfLocateTimeout { retries: u32 },

    #[error("failed to install SIGCONT handler: {0}")]
    SignalInstall(#[source] nix::Error),
}
