/*!
Mixed CPU/I/O worker: runs the same instruction count as `worker_cpu` but
raises I/O twice along the way (see [`rrsim::config::MIXED_IO_POINTS`]),
alternating READ and WRITE. Stepping policy lives in [`rrsim::worker_core`].

The worker is spawned already `STOPPED` by the Kernel and only ever resumes
when the Kernel sends `SIGCONT` — it never stops itself, including while
waiting on an I/O request it raised: it parks in a short poll loop for the
Kernel's resume signal rather than re-entering `STOPPED` on its own.
*/

use std::thread;
use std::time::Duration;

use clap::Parser;

use rrsim::config::WorkerArgs;
use rrsim::error::WorkerError;
use rrsim::shm::SharedTable;
use rrsim::worker_core::{IoProfile, SelfLocateRetry, Step, locate_self, step};
use rrsim::{logging, signals};

const RESUME_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    logging::init(None);
    if let Err(err) = run() {
        log::error!("worker_mixed: {err}");
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
    log::info!("worker_mixed: pid {own_pid} is slot {slot}");

    let mut pc = 1u32;
    let mut resume_count = 0u32;
    loop {
        if signals::take_resume() {
            resume_count += 1;
            pc = table.pc(slot);
            log::info!("worker_mixed: pid {own_pid} (slot {slot}) resumed (count {resume_count})");
        }
        table.set_pc(slot, pc);

        match step(IoProfile::Mixed, pc) {
            Step::Finished => break,
            Step::RaiseIo { io_type } => {
                log::info!("worker_mixed: pid {own_pid} (slot {slot}) raises {io_type} at pc {pc}");
                table.set_want_io(slot, io_type);
                wait_for_resume();
                resume_count += 1;
                pc += 1;
            }
            Step::Continue { next_pc } => {
                log::info!("worker_mixed: pid {own_pid} (slot {slot}) running iteration {pc}");
                thread::sleep(Duration::from_secs(1));
                pc = next_pc;
            }
        }
    }

    log::info!("worker_mixed: pid {own_pid} (slot {slot}) finished");
    Ok(())
}

/// Block until the Kernel's resume signal is observed. The Kernel also
/// `SIGSTOP`s this process as part of the block-for-I/O transition, so this
/// loop mostly just gives the OS-level stop time to land; it's what actually
/// guarantees forward progress if a stop/continue ever race.
fn wait_for_resume() {
    loop {
        if signals::take_resume() {
            return;
        }
        thread::sleep(RESUME_POLL_INTERVAL);
    }
}
