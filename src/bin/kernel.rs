/*!
The kernel: spawns the interrupt controller and the worker fleet, then runs
the round-robin scheduling policy from [`rrsim::sched`] until either the
configured duration elapses or every worker reaches DONE.

Usage: `kernel <quantum_seconds> <duration_seconds> [--fifo-path PATH] -- <worker> [args...] -- <worker> [args...] ...`
*/

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, mkfifo};

use rrsim::config::{KernelConfig, shm_name_for};
use rrsim::error::KernelError;
use rrsim::proto::{IoRequest, IoType, encode_request};
use rrsim::sched::{Action, Scheduler};
use rrsim::shm::SharedTable;
use rrsim::{logging, signals};

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let cfg = match KernelConfig::parse(&argv) {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::init(None);
            log::error!("kernel: {err}");
            std::process::exit(2);
        }
    };

    logging::init(cfg.log_level.as_deref());
    if let Err(err) = run(cfg) {
        log::error!("kernel: {err}");
        std::process::exit(1);
    }
}

fn run(cfg: KernelConfig) -> Result<(), KernelError> {
    let n_workers = cfg.workers.len();

    let own_pid = std::process::id() as i32;
    let shm_name = shm_name_for(own_pid);
    let table = SharedTable::create(&shm_name, n_workers).map_err(KernelError::ShmCreate)?;

    if cfg.fifo_path.exists() {
        let _ = std::fs::remove_file(&cfg.fifo_path);
    }
    mkfifo(&cfg.fifo_path, nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR).map_err(|e| {
        KernelError::FifoCreate {
            path: cfg.fifo_path.display().to_string(),
            source: std::io::Error::from(e),
        }
    })?;

    signals::install_kernel_handlers().map_err(|source| KernelError::SignalInstall {
        signal: "IRQ0/IRQ1/SIGTERM/SIGINT",
        source,
    })?;

    log::info!("kernel: pid {own_pid}, {n_workers} workers, shm {shm_name}, fifo {}", cfg.fifo_path.display());

    let controller_exe = sibling_exe("inter_controller");
    let mut controller = Command::new(controller_exe)
        .arg(own_pid.to_string())
        .arg(&cfg.fifo_path)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(KernelError::SpawnController)?;

    let mut worker_children: Vec<Child> = Vec::with_capacity(n_workers);
    for (index, block) in cfg.workers.iter().enumerate() {
        let child = Command::new(&block.program)
            .args(&block.args)
            .arg(&shm_name)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| KernelError::SpawnWorker {
                index,
                cmd: block.program.clone(),
                source,
            })?;
        table.set_worker_pid(index, child.id() as i32);
        worker_children.push(child);
    }

    // Hold every worker stopped until the scheduler explicitly dispatches it.
    for child in &worker_children {
        let _ = signals::stop(child.id() as i32);
    }

    let mut fifo_writer = std::fs::OpenOptions::new()
        .write(true)
        .open(&cfg.fifo_path)
        .map_err(|source| KernelError::FifoCreate {
            path: cfg.fifo_path.display().to_string(),
            source,
        })?;

    // The controller always raises IRQ0 once per wall-clock second; the
    // configured quantum is how many of those one-second ticks a worker may
    // hold the CPU before being preempted.
    let mut scheduler = Scheduler::new(n_workers, cfg.quantum_seconds as u32);
    for slot in 0..n_workers {
        scheduler.mark_ready(slot);
    }
    if let Some(action) = scheduler.dispatch_initial() {
        apply_action(action, &table, &worker_children, &mut fifo_writer);
    }

    let deadline = Instant::now() + Duration::from_secs(cfg.duration_seconds);
    while Instant::now() < deadline && !scheduler.all_done() && !signals::term_requested() {
        signals::wait_for_signal();

        if signals::take_irq0() {
            reap_exited(&worker_children, &mut scheduler);
            let want_io: Vec<Option<IoType>> = (0..n_workers)
                .map(|i| if table.want_io(i) { table.io_type(i) } else { None })
                .collect();
            for action in scheduler.on_irq0(&want_io) {
                apply_action(action, &table, &worker_children, &mut fifo_writer);
            }
        }

        if signals::take_irq1() {
            if let Some((pid, _io_type)) = table.take_io_done() {
                let slot = (0..n_workers).find(|&i| table.worker_pid(i) == pid);
                for action in scheduler.on_irq1(slot) {
                    apply_action(action, &table, &worker_children, &mut fifo_writer);
                }
            }
        }
    }

    log::info!("kernel: shutting down (all_done={}, term_requested={})", scheduler.all_done(), signals::term_requested());
    table.set_done();
    shutdown_workers(&mut worker_children);
    let _ = signals::terminate(controller.id() as i32);
    let _ = controller.wait();
    let _ = std::fs::remove_file(&cfg.fifo_path);

    Ok(())
}

/// Graceful-then-forceful shutdown: a worker currently held `STOPPED` will
/// not act on `SIGTERM` until it is continued, so every worker is resumed
/// before being asked to terminate; stragglers still alive after a brief
/// grace period are killed outright.
fn shutdown_workers(children: &mut [Child]) {
    for child in children.iter() {
        let pid = child.id() as i32;
        let _ = signals::resume(pid);
        let _ = signals::terminate(pid);
    }

    std::thread::sleep(Duration::from_millis(200));

    for child in children.iter() {
        if matches!(
            waitpid(Pid::from_raw(child.id() as i32), Some(WaitPidFlag::WNOHANG)),
            Ok(WaitStatus::StillAlive)
        ) {
            let _ = signals::kill_now(child.id() as i32);
        }
    }

    for child in children.iter_mut() {
        let _ = child.wait();
    }
}

/// Reap any worker whose child process has already exited, without blocking.
fn reap_exited(children: &[Child], scheduler: &mut Scheduler) {
    for (slot, child) in children.iter().enumerate() {
        match waitpid(Pid::from_raw(child.id() as i32), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                if scheduler.mark_exited(slot) {
                    log::info!("kernel: slot {slot} (pid {}) reaped while running", child.id());
                } else {
                    log::info!("kernel: slot {slot} (pid {}) reaped", child.id());
                }
            }
            _ => {}
        }
    }
}

fn apply_action(action: Action, table: &SharedTable, children: &[Child], fifo_writer: &mut std::fs::File) {
    match action {
        Action::Dispatch(slot) => {
            let pid = children[slot].id() as i32;
            log::info!("kernel: dispatch slot {slot} (pid {pid})");
            let _ = signals::resume(pid);
        }
        Action::Preempt(slot) => {
            let pid = children[slot].id() as i32;
            log::info!("kernel: preempt slot {slot} (pid {pid})");
            let _ = signals::stop(pid);
        }
        Action::BlockForIo { slot, io_type } => {
            let pid = children[slot].id() as i32;
            log::info!("kernel: slot {slot} (pid {pid}) blocks for {io_type}");
            let _ = signals::stop(pid);
            table.clear_want_io(slot);
            let line = encode_request(IoRequest { pid, io_type });
            if let Err(e) = fifo_writer.write_all(line.as_bytes()) {
                log::warn!("kernel: failed writing request for pid {pid}: {e}");
            }
        }
        Action::NoReadyWorker => {
            log::debug!("kernel: tick with no READY worker to dispatch");
        }
        Action::UnknownPid => {
            log::warn!("kernel: IRQ1 completion for an unrecognized pid, ignored");
        }
        Action::StaleCompletion(slot) => {
            log::warn!("kernel: stale or duplicate completion for slot {slot}, ignored");
        }
    }
}

fn sibling_exe(name: &str) -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap_or_else(|_| name.into());
    path.set_file_name(name);
    path
}
