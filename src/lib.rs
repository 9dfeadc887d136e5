/*!
A round-robin process scheduler, simulated with real OS processes.

Three kinds of component talk over signals, a POSIX shared-memory process
table, and a named FIFO:

- The **kernel** (`bin/kernel.rs`) spawns the interrupt controller and every
  worker, then runs the round-robin scheduling policy in [`sched`],
  dispatching and preempting workers with `SIGCONT`/`SIGSTOP`.
- The **interrupt controller** (`bin/inter_controller.rs`) is the simulated
  clock and I/O device: it delivers IRQ0 on every quantum and IRQ1 whenever
  an I/O request it is servicing completes, using the policy in [`ic_core`].
- **Workers** (`bin/worker_cpu.rs`, `bin/worker_mixed.rs`) run a fixed
  virtual instruction count, occasionally raising I/O, using the policy in
  [`worker_core`].

Every module above the binaries is deliberately free of side effects where
the underlying logic allows it — [`sched`], [`ic_core`], [`proto`], and
[`worker_core`] operate on plain data and are unit-tested directly. The
stateful boundaries ([`shm`], [`signals`]) are kept as thin, well-documented
wrappers around `nix` so the binaries have nowhere else to hide a scheduling
decision.
*/

pub mod config;
pub mod error;
pub mod ic_core;
pub mod logging;
pub mod proto;
pub mod sched;
pub mod shm;
pub mod signals;
pub mod worker_core;
