/*!
The interrupt controller: the simulated clock and I/O device.

Raises IRQ0 (`SIGUSR1`) to the kernel once every wall-clock second, reads I/O
requests off the named FIFO the kernel writes to, and raises IRQ1
(`SIGUSR2`) once a request it has been servicing completes. All of the
policy (the bounded request queue, the device's service-timer state
machine, the missed-tick collapse) lives in [`rrsim::ic_core`]; this binary
is just the timer loop and the FIFO reader thread around it.
*/

use std::io::{BufRead, BufReader};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use rrsim::config::{ControllerArgs, IO_SERVICE_SECONDS, REQUEST_QUEUE_CAPACITY, shm_name_for};
use rrsim::error::ControllerError;
use rrsim::ic_core::{Controller, IntakeOutcome, collapse_ticks};
use rrsim::shm::SharedTable;
use rrsim::signals::{IRQ0_SIGNAL, IRQ1_SIGNAL};
use rrsim::{logging, signals};

/// The IC's own timer granularity: one tick per wall-clock second, per the
/// Kernel's quantum being expressed in whole seconds.
const TICK: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    logging::init(None);
    if let Err(err) = run() {
        log::error!("inter_controller: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ControllerError> {
    let args = ControllerArgs::try_parse().map_err(|e| ControllerError::Args(e.to_string()))?;

    signals::install_controller_handlers().map_err(|source| ControllerError::SignalInstall {
        signal: "SIGTERM/SIGINT",
        source,
    })?;

    let shm_name = shm_name_for(args.kernel_pid);
    let table = SharedTable::attach(&shm_name).map_err(ControllerError::ShmAttach)?;

    log::info!(
        "inter_controller: watching kernel pid {}, shm {shm_name}, fifo {}",
        args.kernel_pid,
        args.fifo_path.display()
    );

    let (tx, rx) = mpsc::channel::<String>();
    let fifo_path = args.fifo_path.clone();
    thread::spawn(move || {
        // A missing channel at startup is non-fatal for the controller as a
        // whole (ticks keep going); this thread just has nothing to feed.
        let file = match std::fs::File::open(&fifo_path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("inter_controller: failed to open fifo for reading: {e}");
                return;
            }
        };
        let reader = BufReader::new(file);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("inter_controller: error reading fifo: {e}");
                    break;
                }
            }
        }
    });

    let mut controller = Controller::new(REQUEST_QUEUE_CAPACITY, IO_SERVICE_SECONDS as u32);
    let mut last_tick = Instant::now();

    loop {
        if signals::term_requested() {
            log::info!("inter_controller: termination requested, shutting down");
            break;
        }
        if table.done() {
            log::info!("inter_controller: kernel signaled done, shutting down");
            break;
        }

        while let Ok(line) = rx.try_recv() {
            match controller.intake(&line) {
                IntakeOutcome::Enqueued => log::debug!("inter_controller: enqueued request {line:?}"),
                IntakeOutcome::Overflow(req) => {
                    log::warn!("inter_controller: request queue full, dropped pid {} {}", req.pid, req.io_type)
                }
                IntakeOutcome::Malformed => log::warn!("inter_controller: malformed fifo line {line:?}"),
            }
        }

        let now = Instant::now();
        if collapse_ticks(now.duration_since(last_tick), TICK) >= 1 {
            last_tick = now;

            if let Err(e) = signals::send(args.kernel_pid, IRQ0_SIGNAL) {
                log::warn!("inter_controller: failed to deliver IRQ0: {e}");
            } else {
                log::info!("inter_controller: tick");
            }

            let prev_inflight = controller.in_service().map(|r| r.pid);

            if let Some(finished) = controller.on_tick() {
                table.set_io_done(finished.pid, finished.io_type);
                log::info!("inter_controller: completed {} for pid {}", finished.io_type, finished.pid);
                if let Err(e) = signals::send(args.kernel_pid, IRQ1_SIGNAL) {
                    log::warn!("inter_controller: failed to deliver IRQ1: {e}");
                }
            }

            // Publish the device's post-tick state: busy and servicing
            // whichever request `on_tick` is now in the middle of (possibly
            // one just picked up this same tick), or idle.
            match controller.in_service() {
                Some(req) => {
                    if prev_inflight != Some(req.pid) {
                        log::info!("inter_controller: dequeued {} for pid {} into service", req.io_type, req.pid);
                    }
                    table.set_device_busy(true);
                    table.set_io_inflight_pid(req.pid);
                }
                None => {
                    table.set_device_busy(false);
                    table.set_io_inflight_pid(0);
                }
            }
        }

        thread::sleep(POLL_INTERVAL);
    }

    Ok(())
}
