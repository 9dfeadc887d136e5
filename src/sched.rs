/*!
Pure round-robin scheduling policy.

Everything here operates on slot indices and a minimal view of the shared
table (`want_io` snapshots, a pid-to-slot lookup) rather than on live
processes — no signal is sent and no shared-memory field is written from
this module. The binaries translate the [`Action`] values this module
returns into real `kill()`/shared-table calls. Keeping the policy this way
makes the interesting part of the kernel — dispatch order, quantum
arithmetic, the IRQ0/IRQ1 transition tables, the IRQ1 anti-starvation guard —
testable without forking a single process.
*/

use std::collections::VecDeque;

use crate::proto::IoType;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    New,
    Ready,
    Running,
    Waiting,
    Done,
}

/// What the caller should do in response to a scheduling event. Actions are
/// returned in the order they must be carried out: a `Preempt` must reach
/// the OS before the paired `Dispatch`, so callers should apply them in
/// sequence rather than reordering or batching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Dispatch(usize),
    Preempt(usize),
    BlockForIo { slot: usize, io_type: IoType },
    /// IRQ0 fired with nothing READY to dispatch; the CPU stays idle.
    NoReadyWorker,
    /// IRQ1 carried a pid the scheduler has no slot for.
    UnknownPid,
    /// IRQ1 named a slot that wasn't WAITING (double completion, or a
    /// completion for a slot that was never blocked). Ignored.
    StaleCompletion(usize),
}

pub struct Scheduler {
    n: usize,
    state: Vec<RunState>,
    current: Option<usize>,
    io_queue: VecDeque<usize>,
    quantum_len: u32,
    quantum_left: u32,
    tick: u64,
    /// Tick at which a slot was last dispatched via IRQ1 promotion, so a
    /// second IRQ1 in the same window doesn't preempt it again (see
    /// DESIGN.md's "promoted this tick" guard).
    last_promotion_tick: Option<u64>,
}

impl Scheduler {
    pub fn new(n_procs: usize, quantum_len: u32) -> Self {
        Self {
            n: n_procs,
            state: vec![RunState::New; n_procs],
            current: None,
            io_queue: VecDeque::new(),
            quantum_len,
            quantum_left: 0,
            tick: 0,
            last_promotion_tick: None,
        }
    }

    pub fn state(&self, slot: usize) -> RunState {
        self.state[slot]
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn io_queue(&self) -> impl Iterator<Item = usize> + '_ {
        self.io_queue.iter().copied()
    }

    pub fn all_done(&self) -> bool {
        self.state.iter().all(|s| *s == RunState::Done)
    }

    /// NEW -> READY, once a worker has been spawned and stopped.
    pub fn mark_ready(&mut self, slot: usize) {
        self.state[slot] = RunState::Ready;
    }

    /// Round-robin scan for the next READY slot, starting immediately after
    /// `current` (or at slot 0 if nothing has run yet) and wrapping.
    pub fn pick_next(&self) -> Option<usize> {
        if self.n == 0 {
            return None;
        }
        let cur = self.current.map(|c| c as i64).unwrap_or(-1);
        let start = (cur + 1).rem_euclid(self.n as i64) as usize;
        (0..self.n)
            .map(|offset| (start + offset) % self.n)
            .find(|&idx| self.state[idx] == RunState::Ready)
    }

    fn dispatch_internal(&mut self, slot: usize) {
        self.state[slot] = RunState::Running;
        self.current = Some(slot);
        self.quantum_left = self.quantum_len;
    }

    /// Dispatch whatever is READY, for the kernel's initial startup
    /// dispatch. Returns `None` if nothing is READY yet.
    pub fn dispatch_initial(&mut self) -> Option<Action> {
        let slot = self.pick_next()?;
        self.dispatch_internal(slot);
        Some(Action::Dispatch(slot))
    }

    /// A worker's child process was reaped (non-blocking `waitpid` observed
    /// it exited). Returns `true` if the slot had been RUNNING, so the
    /// caller knows `current` was cleared.
    pub fn mark_exited(&mut self, slot: usize) -> bool {
        if self.state[slot] == RunState::Done {
            return false;
        }
        let was_running = self.current == Some(slot);
        self.state[slot] = RunState::Done;
        if let Some(pos) = self.io_queue.iter().position(|&s| s == slot) {
            self.io_queue.remove(pos);
        }
        if was_running {
            self.current = None;
        }
        was_running
    }

    /// IRQ0: the periodic timer tick. `want_io` gives, for every slot, the
    /// pending I/O type if that worker's `want_io` flag was observed set.
    /// Order of operations matches the kernel's design notes: reap first
    /// (the caller is expected to have already called [`Scheduler::mark_exited`]
    /// for any slots it reaped before calling this), then the READY/want_io
    /// sweep, then block-for-io on the running slot, then quantum
    /// accounting.
    pub fn on_irq0(&mut self, want_io: &[Option<IoType>]) -> Vec<Action> {
        self.tick += 1;
        let mut actions = Vec::new();

        // Waiting-ready I/O intake: a READY slot that raced want_io in
        // before ever being dispatched moves straight to WAITING.
        for slot in 0..self.n {
            if self.state[slot] == RunState::Ready {
                if let Some(io_type) = want_io[slot] {
                    self.state[slot] = RunState::Waiting;
                    self.io_queue.push_back(slot);
                    actions.push(Action::BlockForIo { slot, io_type });
                }
            }
        }

        if let Some(cur) = self.current {
            if self.state[cur] == RunState::Running {
                if let Some(io_type) = want_io[cur] {
                    self.state[cur] = RunState::Waiting;
                    self.io_queue.push_back(cur);
                    self.current = None;
                    actions.push(Action::BlockForIo { slot: cur, io_type });
                }
            }
        }

        match self.current {
            Some(cur) => {
                if self.quantum_left > 0 {
                    self.quantum_left -= 1;
                }
                if self.quantum_left == 0 {
                    self.state[cur] = RunState::Ready;
                    self.current = None;
                    actions.push(Action::Preempt(cur));
                    match self.pick_next() {
                        Some(next) => {
                            self.dispatch_internal(next);
                            actions.push(Action::Dispatch(next));
                        }
                        None => actions.push(Action::NoReadyWorker),
                    }
                }
            }
            None => match self.pick_next() {
                Some(next) => {
                    self.dispatch_internal(next);
                    actions.push(Action::Dispatch(next));
                }
                None => actions.push(Action::NoReadyWorker),
            },
        }

        actions
    }

    /// IRQ1: an I/O completion. `slot` is the scheduler-slot the completed
    /// pid maps to, already resolved by the caller from the shared table
    /// (`None` if the pid is unknown).
    pub fn on_irq1(&mut self, slot: Option<usize>) -> Vec<Action> {
        let Some(slot) = slot else {
            return vec![Action::UnknownPid];
        };
        if self.state[slot] != RunState::Waiting {
            return vec![Action::StaleCompletion(slot)];
        }

        if let Some(pos) = self.io_queue.iter().position(|&s| s == slot) {
            self.io_queue.remove(pos);
        }
        self.state[slot] = RunState::Ready;

        let mut actions = Vec::new();

        // Anti-starvation guard: a second IRQ1 arriving in the same tick
        // window as a prior IRQ1 promotion readies its target but does not
        // preempt the worker that promotion just dispatched.
        if self.last_promotion_tick == Some(self.tick) {
            return actions;
        }

        if let Some(cur) = self.current {
            if self.state[cur] == RunState::Running {
                self.state[cur] = RunState::Ready;
                self.current = None;
                actions.push(Action::Preempt(cur));
            }
        }

        self.dispatch_internal(slot);
        actions.push(Action::Dispatch(slot));
        self.last_promotion_tick = Some(self.tick);

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_scheduler(n: usize, quantum: u32) -> Scheduler {
        let mut s = Scheduler::new(n, quantum);
        for i in 0..n {
            s.mark_ready(i);
        }
        s
    }

    #[test]
    fn dispatch_initial_picks_slot_zero() {
        let mut s = ready_scheduler(3, 2);
        assert_eq!(s.dispatch_initial(), Some(Action::Dispatch(0)));
        assert_eq!(s.current(), Some(0));
        assert_eq!(s.state(0), RunState::Running);
    }

    #[test]
    fn round_robin_wraps_after_last_slot() {
        let mut s = ready_scheduler(3, 1);
        s.dispatch_initial();
        let none = vec![None; 3];

        // quantum_left starts at 1: the very next tick exhausts it.
        let actions = s.on_irq0(&none);
        assert_eq!(actions, vec![Action::Preempt(0), Action::Dispatch(1)]);

        let actions = s.on_irq0(&none);
        assert_eq!(actions, vec![Action::Preempt(1), Action::Dispatch(2)]);

        let actions = s.on_irq0(&none);
        assert_eq!(actions, vec![Action::Preempt(2), Action::Dispatch(0)]);
    }

    #[test]
    fn quantum_survives_multiple_ticks() {
        let mut s = ready_scheduler(3, 3);
        s.dispatch_initial();
        let none = vec![None; 3];

        assert_eq!(s.on_irq0(&none), vec![]);
        assert_eq!(s.on_irq0(&none), vec![]);
        assert_eq!(s.on_irq0(&none), vec![Action::Preempt(0), Action::Dispatch(1)]);
    }

    #[test]
    fn want_io_blocks_before_quantum_check() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial();
        let mut want_io = vec![None; 3];
        want_io[0] = Some(IoType::Read);

        let actions = s.on_irq0(&want_io);
        assert_eq!(
            actions,
            vec![
                Action::BlockForIo {
                    slot: 0,
                    io_type: IoType::Read
                },
                Action::Dispatch(1),
            ]
        );
        assert_eq!(s.state(0), RunState::Waiting);
        assert_eq!(s.io_queue().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn ready_slot_with_want_io_moves_straight_to_waiting() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial(); // slot 0 running
        let mut want_io = vec![None; 3];
        want_io[1] = Some(IoType::Write); // slot 1 is READY, raced want_io in

        let actions = s.on_irq0(&want_io);
        assert!(actions.contains(&Action::BlockForIo {
            slot: 1,
            io_type: IoType::Write
        }));
        assert_eq!(s.state(1), RunState::Waiting);
    }

    #[test]
    fn irq1_promotes_and_preempts_current() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial(); // slot 0 running
        let none = vec![None; 3];
        s.on_irq0(&none);
        // manually block slot 1 for the test
        let mut want_io = vec![None; 3];
        want_io[0] = Some(IoType::Read);
        s.on_irq0(&want_io); // slot 0 blocks, slot 1 dispatched

        let actions = s.on_irq1(Some(0));
        assert_eq!(actions, vec![Action::Preempt(1), Action::Dispatch(0)]);
        assert_eq!(s.state(0), RunState::Running);
        assert_eq!(s.state(1), RunState::Ready);
    }

    #[test]
    fn second_irq1_same_tick_does_not_preempt_again() {
        let mut s = ready_scheduler(4, 5);
        s.dispatch_initial(); // slot 0 running
        let mut want_io = vec![None; 4];
        want_io[0] = Some(IoType::Read);
        s.on_irq0(&want_io); // slot 0 -> waiting, slot 1 dispatched

        want_io = vec![None; 4];
        want_io[1] = Some(IoType::Write);
        s.on_irq0(&want_io); // slot 1 -> waiting, slot 2 dispatched

        let first = s.on_irq1(Some(0)); // promotes slot 0, preempts slot 2
        assert_eq!(first, vec![Action::Preempt(2), Action::Dispatch(0)]);

        let second = s.on_irq1(Some(1)); // slot 1 readied but not preempting slot 0
        assert_eq!(second, vec![]);
        assert_eq!(s.state(1), RunState::Ready);
        assert_eq!(s.current(), Some(0));
    }

    #[test]
    fn irq1_for_unknown_pid_is_ignored() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial();
        assert_eq!(s.on_irq1(None), vec![Action::UnknownPid]);
        assert_eq!(s.current(), Some(0));
    }

    #[test]
    fn duplicate_irq1_is_ignored() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial();
        let mut want_io = vec![None; 3];
        want_io[0] = Some(IoType::Read);
        s.on_irq0(&want_io);

        s.on_irq1(Some(0));
        let actions = s.on_irq1(Some(0));
        assert_eq!(actions, vec![Action::StaleCompletion(0)]);
    }

    #[test]
    fn mark_exited_clears_current_and_io_queue() {
        let mut s = ready_scheduler(3, 5);
        s.dispatch_initial();
        assert!(s.mark_exited(0));
        assert_eq!(s.current(), None);
        assert_eq!(s.state(0), RunState::Done);
        assert!(!s.mark_exited(0));
    }

    #[test]
    fn no_ready_worker_when_all_waiting() {
        let mut s = Scheduler::new(1, 1);
        s.mark_ready(0);
        s.dispatch_initial();
        let mut want_io = vec![None; 1];
        want_io[0] = Some(IoType::Read);
        let actions = s.on_irq0(&want_io);
        assert!(actions.contains(&Action::BlockForIo {
            slot: 0,
            io_type: IoType::Read
        }));

        let actions = s.on_irq0(&[None]);
        assert_eq!(actions, vec![Action::NoReadyWorker]);
    }
}
