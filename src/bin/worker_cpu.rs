/*!
CPU-bound worker: runs its full instruction count as plain CPU bursts and
never raises I/O. See `worker_mixed` for the I/O-raising variant; both share
the stepping policy in [`rrsim::worker_core`].

The worker is spawned already `STOPPED` by the Kernel and only ever resumes
when the Kernel sends `SIGCONT` — it never stops itself.
*/

use std::thread;
use std::time::Duration;

use clap::Parser;

use rrsim::config::WorkerArgs;
use rrsim::error::WorkerError;
use rrsim::shm::SharedTable;
use rrsim::worker_core::{IoProfile, SelfLocateRetry, Step, locate_self, step};
use rrsim::{logging, signals};

fn main() {
    logging::init(None);
    if let Err(err) = run() {
        log::error!("worker_cpu: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), WorkerError> {
    let args = WorkerArgs::try_parse().map_err(|e| WorkerError::Args(e.to_string()))?;
    let table = SharedTable::attach(&args.shm_name).map_err(WorkerError::ShmAttach)?;

    signals::install_worker_resume_handler().map_err(WorkerError::SignalInstall)?;

    let own_pid = std::process::id() as i32;
    let retry = SelfLocateRetry::default();
    let slot = locate_self(own_pid, retry, || (0..table.n_procs()).map(|i| table.worker_pid(i)).collect())
        .map_err(|retries| WorkerError::SelfLocateTimeout { retries })?;
    log::info!("worker_cpu: pid {own_pid} is slot {slot}");

    let mut pc = 1u32;
    let mut resume_count = 0u32;
    loop {
        if signals::take_resume() {
            resume_count += 1;
            pc = table.pc(slot);
            log::info!("worker_cpu: pid {own_pid} (slot {slot}) resumed (count {resume_count})");
        }
        table.set_pc(slot, pc);

        match step(IoProfile::CpuOnly, pc) {
            Step::Finished => break,
            Step::RaiseIo { .. } => unreachable!("CPU-only profile never raises I/O"),
            Step::Continue { next_pc } => {
                log::info!("worker_cpu: pid {own_pid} (slot {slot}) running iteration {pc}");
                thread::sleep(Duration::from_secs(1));
                pc = next_pc;
            }
        }
    }

    log::info!("worker_cpu: pid {own_pid} (slot {slot}) finished");
    Ok(())
}
