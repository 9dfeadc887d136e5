/*!
Signal plumbing shared by all three component types.

Every handler installed here does exactly one thing: store `true` into a
single `AtomicBool`. No scheduling decision, queue manipulation, or shared-
table write ever happens inside a handler — that is the one non-negotiable
rule this whole simulator rests on (see `DESIGN.md`). All of the deciding
happens back in each binary's main loop, which polls the flags this module
exposes.

IRQ0 is `SIGUSR1` (the timer tick), IRQ1 is `SIGUSR2` (I/O completion). The
kernel additionally watches `SIGTERM`/`SIGINT` for its own shutdown; the
controller watches the same two for its shutdown; workers only ever install a
handler for `SIGCONT`.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, kill, pthread_sigmask, sigaction, sigsuspend,
};
use nix::unistd::Pid;

/// IRQ0: periodic timer tick, delivered controller -> kernel.
pub const IRQ0_SIGNAL: Signal = Signal::SIGUSR1;
/// IRQ1: I/O completion notification, delivered controller -> kernel.
pub const IRQ1_SIGNAL: Signal = Signal::SIGUSR2;

static IRQ0_FLAG: AtomicBool = AtomicBool::new(false);
static IRQ1_FLAG: AtomicBool = AtomicBool::new(false);
static TERM_FLAG: AtomicBool = AtomicBool::new(false);
static RESUME_FLAG: AtomicBool = AtomicBool::new(false);

extern "C" fn on_irq0(_: i32) {
    IRQ0_FLAG.store(true, Ordering::Release);
}

extern "C" fn on_irq1(_: i32) {
    IRQ1_FLAG.store(true, Ordering::Release);
}

extern "C" fn on_term(_: i32) {
    TERM_FLAG.store(true, Ordering::Release);
}

extern "C" fn on_resume(_: i32) {
    RESUME_FLAG.store(true, Ordering::Release);
}

/// The mask `wait_for_signal` hands to `sigsuspend`: the process's signal
/// mask as it stood *before* [`install_kernel_handlers`] blocked IRQ0/IRQ1/
/// termination process-wide. Blocking those signals outside of `sigsuspend`
/// and passing this saved mask back in is the canonical way to close the
/// wake-race: without it, a signal landing between the main loop's last
/// `take_irq0()`/`take_irq1()` check and the next `sigsuspend` call would run
/// its handler unobserved by that call, which would then block until a
/// *further* signal arrived.
static WAIT_MASK: OnceLock<SigSet> = OnceLock::new();

unsafe fn install(signal: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Block `signals` in the process-wide mask, remembering the prior mask in
/// [`WAIT_MASK`] for `wait_for_signal` to restore during `sigsuspend`.
fn block_and_remember(signals: &[Signal]) -> nix::Result<()> {
    let mut block_set = SigSet::empty();
    for &signal in signals {
        block_set.add(signal);
    }
    let mut old_set = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block_set), Some(&mut old_set))?;
    let _ = WAIT_MASK.set(old_set);
    Ok(())
}

/// Install the kernel's three handlers: IRQ0, IRQ1, and termination
/// (`SIGTERM`/`SIGINT`, both map to the same flag). Also blocks all four
/// process-wide so `wait_for_signal` can unblock them only for the duration
/// of each `sigsuspend` call.
pub fn install_kernel_handlers() -> nix::Result<()> {
    unsafe {
        install(IRQ0_SIGNAL, SigHandler::Handler(on_irq0))?;
        install(IRQ1_SIGNAL, SigHandler::Handler(on_irq1))?;
        install(Signal::SIGTERM, SigHandler::Handler(on_term))?;
        install(Signal::SIGINT, SigHandler::Handler(on_term))?;
    }
    block_and_remember(&[IRQ0_SIGNAL, IRQ1_SIGNAL, Signal::SIGTERM, Signal::SIGINT])
}

/// Install the interrupt controller's termination handler.
pub fn install_controller_handlers() -> nix::Result<()> {
    unsafe {
        install(Signal::SIGTERM, SigHandler::Handler(on_term))?;
        install(Signal::SIGINT, SigHandler::Handler(on_term))?;
    }
    Ok(())
}

/// Install a worker's resume handler. `SIGCONT` delivery itself always
/// resumes a stopped process at the OS level; this handler additionally lets
/// the worker observe that it happened.
pub fn install_worker_resume_handler() -> nix::Result<()> {
    unsafe { install(Signal::SIGCONT, SigHandler::Handler(on_resume)) }
}

/// Consume and clear the IRQ0 flag. Returns whether it had been set.
pub fn take_irq0() -> bool {
    IRQ0_FLAG.swap(false, Ordering::Acquire)
}

/// Consume and clear the IRQ1 flag. Returns whether it had been set.
pub fn take_irq1() -> bool {
    IRQ1_FLAG.swap(false, Ordering::Acquire)
}

/// Whether a termination signal has been observed. Not cleared by reading —
/// once requested, shutdown proceeds to completion.
pub fn term_requested() -> bool {
    TERM_FLAG.load(Ordering::Acquire)
}

/// Consume and clear the worker's resume flag.
pub fn take_resume() -> bool {
    RESUME_FLAG.swap(false, Ordering::Acquire)
}

/// Block in the kernel until IRQ0, IRQ1, or a termination signal arrives,
/// then return. Used by the kernel's main loop so it never busy-polls
/// between events. Atomically restores the pre-[`install_kernel_handlers`]
/// mask for the duration of the suspend, so a signal that arrived just
/// before this call (while those signals were blocked) is still pending and
/// is delivered immediately rather than waiting for the next one.
pub fn wait_for_signal() {
    let mask = WAIT_MASK.get().copied().unwrap_or_else(SigSet::empty);
    let _ = sigsuspend(&mask);
}

/// Send `signal` to `pid`. A signal for a pid that no longer exists (`ESRCH`)
/// is not an error worth surfacing — the slot will be reaped as DONE on the
/// next tick — so callers that don't care can ignore the result.
pub fn send(pid: i32, signal: Signal) -> nix::Result<()> {
    kill(Pid::from_raw(pid), signal)
}

pub fn stop(pid: i32) -> nix::Result<()> {
    send(pid, Signal::SIGSTOP)
}

pub fn resume(pid: i32) -> nix::Result<()> {
    send(pid, Signal::SIGCONT)
}

pub fn terminate(pid: i32) -> nix::Result<()> {
    send(pid, Signal::SIGTERM)
}

pub fn kill_now(pid: i32) -> nix::Result<()> {
    send(pid, Signal::SIGKILL)
}
