//! Cooperative notifier
//!
//! One notifier serves one interpreter thread. Timer handlers fire in
//! deadline order, channel watchers are polled for readiness each step, and
//! idle handlers run as a batch only when no other event is ready. The
//! whole loop is an explicit state machine; nothing here blocks on the
//! host beyond a bounded sleep towards the next deadline.

use crate::interp::Interp;

use bitflags::bitflags;
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

bitflags! {
    /// Event classes a loop step may service.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const FILE = 1 << 0;
        const TIMER = 1 << 1;
        const IDLE = 1 << 2;
        const WINDOW = 1 << 3;
        const ALL = Self::FILE.bits()
            | Self::TIMER.bits()
            | Self::IDLE.bits()
            | Self::WINDOW.bits();
        /// Return instead of blocking when nothing is ready.
        const DONT_WAIT = 1 << 4;
    }
}

/// Bound on one blocking sleep so channel watchers keep getting polled.
const POLL_SLICE: Duration = Duration::from_millis(5);

type OnceCallback = Box<dyn FnOnce(&mut Interp)>;
type WatchHandler = Rc<dyn Fn(&mut Interp)>;

/// Handle for cancelling a timer handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

/// Handle for removing a channel watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherToken(u64);

struct TimerEntry {
    token: TimerToken,
    deadline: Instant,
    callback: Option<OnceCallback>,
}

struct WatcherEntry {
    token: WatcherToken,
    poll: Box<dyn Fn() -> bool>,
    handler: WatchHandler,
}

/// The per-interpreter event source registry and dispatcher.
#[derive(Default)]
pub struct Notifier {
    timers: Vec<TimerEntry>,
    idle: VecDeque<OnceCallback>,
    watchers: Vec<WatcherEntry>,
    next_token: u64,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Schedule `callback` to run once, `delay_ms` from now.
    pub fn create_timer(
        &mut self,
        delay_ms: u64,
        callback: impl FnOnce(&mut Interp) + 'static,
    ) -> TimerToken {
        let token = TimerToken(self.token());
        self.timers.push(TimerEntry {
            token,
            deadline: Instant::now() + Duration::from_millis(delay_ms),
            callback: Some(Box::new(callback)),
        });
        token
    }

    /// Cancel a pending timer. Cancelling one that already fired is a
    /// no-op.
    pub fn delete_timer(&mut self, token: TimerToken) {
        self.timers.retain(|t| t.token != token);
    }

    /// Run `callback` the next time the loop goes idle.
    pub fn do_when_idle(&mut self, callback: impl FnOnce(&mut Interp) + 'static) {
        self.idle.push_back(Box::new(callback));
    }

    /// Register a channel watcher: `poll` reports readiness, `handler`
    /// runs once per loop step while ready.
    pub fn add_watcher(
        &mut self,
        poll: impl Fn() -> bool + 'static,
        handler: impl Fn(&mut Interp) + 'static,
    ) -> WatcherToken {
        let token = WatcherToken(self.token());
        self.watchers.push(WatcherEntry {
            token,
            poll: Box::new(poll),
            handler: Rc::new(handler),
        });
        token
    }

    /// Remove a channel watcher.
    pub fn remove_watcher(&mut self, token: WatcherToken) {
        self.watchers.retain(|w| w.token != token);
    }

    fn take_due_timer(&mut self) -> Option<OnceCallback> {
        let now = Instant::now();
        let due = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| t.deadline)
            .map(|(i, _)| i)?;
        let mut entry = self.timers.remove(due);
        entry.callback.take()
    }

    fn take_ready_watcher(&mut self) -> Option<WatchHandler> {
        self.watchers
            .iter()
            .find(|w| (w.poll)())
            .map(|w| w.handler.clone())
    }

    fn take_idle_batch(&mut self) -> VecDeque<OnceCallback> {
        std::mem::take(&mut self.idle)
    }

    /// How long a blocking step may sleep before re-checking, or `None`
    /// when no event of the masked classes can ever fire.
    fn next_wait(&self, mask: EventMask) -> Option<Duration> {
        let mut wait: Option<Duration> = None;
        if mask.contains(EventMask::TIMER) {
            if let Some(deadline) = self.timers.iter().map(|t| t.deadline).min() {
                wait = Some(deadline.saturating_duration_since(Instant::now()));
            }
        }
        if mask.contains(EventMask::FILE) && !self.watchers.is_empty() {
            wait = Some(wait.map_or(POLL_SLICE, |w| w.min(POLL_SLICE)));
        }
        wait
    }

    /// Whether any source is registered at all.
    pub fn has_sources(&self) -> bool {
        !self.timers.is_empty() || !self.watchers.is_empty() || !self.idle.is_empty()
    }
}

/// Run one step of the event loop: service one ready event of the masked
/// classes (idle handlers count as one batch), blocking until something is
/// ready unless [`EventMask::DONT_WAIT`] is set. Returns whether an event
/// was processed.
pub fn do_one_event(interp: &mut Interp, mask: EventMask) -> bool {
    let notifier = interp.notifier();
    loop {
        if mask.contains(EventMask::TIMER) {
            let due = notifier.borrow_mut().take_due_timer();
            if let Some(callback) = due {
                trace!("timer handler fires");
                callback(interp);
                return true;
            }
        }

        if mask.contains(EventMask::FILE) {
            let ready = notifier.borrow_mut().take_ready_watcher();
            if let Some(handler) = ready {
                trace!("channel watcher fires");
                handler(interp);
                return true;
            }
        }

        // Idle handlers run only after every ready event of this step.
        if mask.contains(EventMask::IDLE) {
            let batch = notifier.borrow_mut().take_idle_batch();
            if !batch.is_empty() {
                trace!(count = batch.len(), "idle handlers fire");
                for callback in batch {
                    callback(interp);
                }
                return true;
            }
        }

        if mask.contains(EventMask::DONT_WAIT) {
            return false;
        }
        let wait = notifier.borrow().next_wait(mask);
        match wait {
            Some(duration) => thread::sleep(duration.min(POLL_SLICE).max(Duration::from_micros(100))),
            None => return false,
        }
    }
}
