/*!
Pure interrupt-controller logic: the bounded request queue and the I/O
device's service-timer state machine.

The binary wraps this in a loop that reads lines off the named FIFO, sleeps
against a wall-clock deadline for the quantum and the device service time,
and turns this module's return values into real `SIGUSR1`/`SIGUSR2` delivery
to the kernel. Nothing in this module blocks, sleeps, or touches a signal —
that split is what makes the queue and service-timer arithmetic
unit-testable.
*/

use std::collections::VecDeque;
use std::time::Duration;

use crate::proto::{IoRequest, decode_request};

/// A line read off the request FIFO either enqueues, is dropped for racing
/// a full queue, or never parsed as a request at all.
#[derive(Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    Enqueued,
    Overflow(IoRequest),
    Malformed,
}

/// Bounded FIFO-order queue of pending I/O requests. Overflow rejects the
/// incoming request rather than evicting an older one — a worker that loses
/// its request this way will raise `want_io` again on its next CPU burst.
pub struct RequestQueue {
    items: VecDeque<IoRequest>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, req: IoRequest) -> Result<(), IoRequest> {
        if self.items.len() >= self.capacity {
            return Err(req);
        }
        self.items.push_back(req);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<IoRequest> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Idle,
    Servicing { request: IoRequest, remaining_ticks: u32 },
}

/// The single I/O device, servicing at most one request at a time over
/// `service_ticks` controller ticks.
pub struct IoDevice {
    state: DeviceState,
    service_ticks: u32,
}

impl IoDevice {
    pub fn new(service_ticks: u32) -> Self {
        Self {
            state: DeviceState::Idle,
            service_ticks,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, DeviceState::Servicing { .. })
    }

    pub fn in_service(&self) -> Option<IoRequest> {
        match self.state {
            DeviceState::Servicing { request, .. } => Some(request),
            DeviceState::Idle => None,
        }
    }
}

/// Combines the queue and the device: decodes incoming FIFO lines, advances
/// the device one tick at a time, and pulls the next queued request in the
/// moment the device goes idle.
pub struct Controller {
    queue: RequestQueue,
    device: IoDevice,
}

impl Controller {
    pub fn new(capacity: usize, service_ticks: u32) -> Self {
        Self {
            queue: RequestQueue::new(capacity),
            device: IoDevice::new(service_ticks),
        }
    }

    pub fn intake(&mut self, line: &str) -> IntakeOutcome {
        match decode_request(line) {
            None => IntakeOutcome::Malformed,
            Some(req) => match self.queue.push(req) {
                Ok(()) => IntakeOutcome::Enqueued,
                Err(req) => IntakeOutcome::Overflow(req),
            },
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_device_busy(&self) -> bool {
        self.device.is_busy()
    }

    pub fn in_service(&self) -> Option<IoRequest> {
        self.device.in_service()
    }

    /// Advance the device one service tick. A request picked up from an idle
    /// device starts servicing (and counts) the same tick it's pulled,
    /// rather than wasting a tick just starting; if a request finishes, it
    /// is returned (the caller sends IRQ1 for its pid) and the device
    /// immediately pulls the next queued request, if any, so a queue with a
    /// backlog never leaves the device idle for a tick it didn't need to.
    pub fn on_tick(&mut self) -> Option<IoRequest> {
        self.try_pickup();

        let mut finished = None;
        if let DeviceState::Servicing { request, remaining_ticks } = &mut self.device.state {
            *remaining_ticks -= 1;
            if *remaining_ticks == 0 {
                finished = Some(*request);
                self.device.state = DeviceState::Idle;
            }
        }
        if finished.is_some() {
            self.try_pickup();
        }
        finished
    }

    fn try_pickup(&mut self) {
        if matches!(self.device.state, DeviceState::Idle) {
            if let Some(next) = self.queue.pop() {
                self.device.state = DeviceState::Servicing {
                    request: next,
                    remaining_ticks: self.device.service_ticks,
                };
            }
        }
    }
}

/// How many IRQ0s to deliver for a timer wakeup that observed `elapsed`
/// since the previous one. Missed ticks collapse into at most one delivery
/// rather than queuing — the timer thread fired late (it was itself
/// descheduled, or the kernel was slow to consume the previous signal) but
/// the simulated clock only ever advances by whole quanta, never backfills.
pub fn collapse_ticks(elapsed: Duration, quantum: Duration) -> u32 {
    if elapsed >= quantum { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::IoType;

    fn req(pid: i32, io_type: IoType) -> IoRequest {
        IoRequest { pid, io_type }
    }

    #[test]
    fn intake_parses_and_enqueues() {
        let mut ctl = Controller::new(2, 3);
        assert_eq!(ctl.intake("100 0\n"), IntakeOutcome::Enqueued);
        assert_eq!(ctl.queue_len(), 1);
    }

    #[test]
    fn intake_rejects_malformed_lines() {
        let mut ctl = Controller::new(2, 3);
        assert_eq!(ctl.intake("garbage"), IntakeOutcome::Malformed);
        assert_eq!(ctl.queue_len(), 0);
    }

    #[test]
    fn intake_overflow_rejects_incoming_request() {
        let mut ctl = Controller::new(1, 3);
        assert_eq!(ctl.intake("100 0\n"), IntakeOutcome::Enqueued);
        assert_eq!(ctl.intake("200 1\n"), IntakeOutcome::Overflow(req(200, IoType::Write)));
        assert_eq!(ctl.queue_len(), 1);
    }

    #[test]
    fn device_services_request_over_several_ticks() {
        let mut ctl = Controller::new(4, 3);
        ctl.intake("100 0\n");
        assert!(ctl.on_tick().is_none());
        assert!(ctl.is_device_busy());
        assert!(ctl.on_tick().is_none());
        assert_eq!(ctl.on_tick(), Some(req(100, IoType::Read)));
        assert!(!ctl.is_device_busy());
    }

    #[test]
    fn device_picks_up_next_request_same_tick_it_frees() {
        let mut ctl = Controller::new(4, 1);
        ctl.intake("100 0\n");
        ctl.intake("200 1\n");
        assert_eq!(ctl.on_tick(), Some(req(100, IoType::Read)));
        assert!(ctl.is_device_busy());
        assert_eq!(ctl.in_service(), Some(req(200, IoType::Write)));
        assert_eq!(ctl.on_tick(), Some(req(200, IoType::Write)));
    }

    #[test]
    fn collapse_ticks_never_delivers_more_than_one() {
        let quantum = Duration::from_secs(2);
        assert_eq!(collapse_ticks(Duration::from_millis(500), quantum), 0);
        assert_eq!(collapse_ticks(Duration::from_secs(2), quantum), 1);
        assert_eq!(collapse_ticks(Duration::from_secs(9), quantum), 1);
    }
}
