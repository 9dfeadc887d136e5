//! Process-level scenarios exercising the four binaries together. These are
//! necessarily slower and more timing-sensitive than the unit tests in
//! `src/`; they check externally observable behavior (exit status, wall
//! time) rather than internal scheduling decisions, which are already
//! covered by `sched`'s and `ic_core`'s unit tests.
#![cfg(unix)]

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

fn kernel_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kernel"))
}

fn worker_mixed_exe() -> String {
    env!("CARGO_BIN_EXE_worker_mixed").to_string()
}

fn worker_cpu_exe() -> String {
    env!("CARGO_BIN_EXE_worker_cpu").to_string()
}

fn fifo_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rrsim_test_{tag}_{}", std::process::id()))
}

/// Wait up to `timeout` for `child` to exit, polling rather than blocking
/// forever so a hung binary fails the test instead of the test suite.
fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Drain a child's piped stdout into a string. Only safe to call after the
/// child has exited (or is known to be done writing): these tests' total
/// output is a few hundred short lines, well under a pipe buffer, so reading
/// it after `wait_with_timeout` rather than concurrently with it can't
/// deadlock here.
fn read_stdout(child: &mut std::process::Child) -> String {
    let mut buf = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut buf);
    }
    buf
}

#[test]
fn three_mixed_workers_run_to_completion() {
    let fifo = fifo_path("mixed_ok");
    let mut child = Command::new(kernel_exe())
        .args(["1", "30", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_mixed_exe())
        .arg("--")
        .arg(worker_mixed_exe())
        .arg("--")
        .arg(worker_mixed_exe())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kernel");

    let status = wait_with_timeout(&mut child, Duration::from_secs(60)).expect("kernel exited in time");
    let stdout = read_stdout(&mut child);
    assert!(status.success(), "kernel exited with {status:?}");
    assert!(!fifo.exists(), "kernel should clean up its fifo on exit");

    let raises = stdout.matches("raises").count();
    assert_eq!(raises, 6, "each of 3 mixed workers raises I/O exactly twice:\n{stdout}");
    let completions = stdout.matches("inter_controller: completed").count();
    assert_eq!(completions, 6, "every raised I/O request should be completed by the controller:\n{stdout}");
}

#[test]
fn three_cpu_only_workers_run_to_completion() {
    let fifo = fifo_path("cpu_ok");
    let mut child = Command::new(kernel_exe())
        .args(["1", "30", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kernel");

    let status = wait_with_timeout(&mut child, Duration::from_secs(60)).expect("kernel exited in time");
    let stdout = read_stdout(&mut child);
    assert!(status.success(), "kernel exited with {status:?}");

    assert!(!stdout.contains("blocks for"), "a CPU-only run should never block for I/O:\n{stdout}");
    assert!(
        !stdout.contains("inter_controller: completed"),
        "a CPU-only run should never complete an I/O request:\n{stdout}"
    );
}

#[test]
fn rejects_fleet_below_the_minimum_size() {
    let fifo = fifo_path("too_few");
    let status = Command::new(kernel_exe())
        .args(["1", "10", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run kernel");

    assert!(!status.success(), "kernel should refuse fewer than 3 workers");
    assert!(!fifo.exists(), "kernel should not have created anything before validating args");
}

#[test]
fn short_duration_kills_and_reaps_unfinished_workers() {
    let fifo = fifo_path("short_dur");
    // A 2-second run can't let a 20-iteration, 1s-per-iteration worker finish;
    // the kernel must terminate it and still exit cleanly.
    let mut child = Command::new(kernel_exe())
        .args(["1", "2", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kernel");

    let status = wait_with_timeout(&mut child, Duration::from_secs(20)).expect("kernel exited in time");
    assert!(status.success(), "kernel exited with {status:?}");
    assert!(!fifo.exists());
}

#[test]
fn unknown_pid_on_the_fifo_is_ignored_without_crashing() {
    let fifo = fifo_path("bad_pid");
    let mut child = Command::new(kernel_exe())
        .args(["1", "15", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .arg("--")
        .arg(worker_cpu_exe())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kernel");

    // Give the kernel time to create the fifo before we try to write to it.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !fifo.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(fifo.exists(), "kernel never created the fifo");

    if let Ok(mut writer) = std::fs::OpenOptions::new().write(true).open(&fifo) {
        let _ = writer.write_all(b"999999 0\n");
    }

    let status = wait_with_timeout(&mut child, Duration::from_secs(30)).expect("kernel exited in time");
    let stdout = read_stdout(&mut child);
    assert!(status.success(), "kernel should ignore the bogus line and exit cleanly");
    assert!(
        stdout.contains("IRQ1 completion for an unrecognized pid"),
        "kernel should log the unknown-pid completion:\n{stdout}"
    );
}

#[test]
fn sigterm_mid_run_shuts_everything_down() {
    let fifo = fifo_path("sigterm");
    let mut child = Command::new(kernel_exe())
        .args(["1", "30", "--fifo-path"])
        .arg(&fifo)
        .arg("--")
        .arg(worker_mixed_exe())
        .arg("--")
        .arg(worker_mixed_exe())
        .arg("--")
        .arg(worker_mixed_exe())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn kernel");

    std::thread::sleep(Duration::from_secs(2));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).expect("send sigterm");

    let status = wait_with_timeout(&mut child, Duration::from_secs(15)).expect("kernel exited in time");
    assert!(status.success(), "kernel exited with {status:?}");
    assert!(!fifo.exists());
}
