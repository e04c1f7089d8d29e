//! Synchronization primitives shared by the process-wide registries

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A reentrant mutex built from a plain lock, the owning thread id and a
/// recursion depth. Locking from the owning thread bumps the depth; other
/// threads queue until the depth returns to zero.
#[derive(Debug, Default)]
pub struct RecursiveMutex {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl RecursiveMutex {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(OwnerState {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquire the lock, recursively if the caller already holds it.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut state),
            }
        }
    }

    /// Release one level of the lock. Panics when the caller does not hold it.
    pub fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(state.owner, Some(me), "unlock of a mutex held elsewhere");
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
    }

    /// Depth of recursion held by the calling thread, zero when not held.
    pub fn held_depth(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.depth
        } else {
            0
        }
    }

    /// Non-blocking acquisition attempt.
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Drop the lock completely, returning the depth that was held so a
    /// condition wait can restore it afterwards.
    fn release_all(&self) -> usize {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(state.owner, Some(me), "wait on a mutex not held");
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.released.notify_one();
        depth
    }

    /// Re-acquire the lock to a previously saved recursion depth.
    fn acquire_to_depth(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some() {
            self.released.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }
}

/// A condition variable bound to a [`RecursiveMutex`]. The wait releases the
/// mutex atomically with respect to notification, saving the recursion depth
/// and restoring it once the thread is woken.
#[derive(Debug, Default)]
pub struct CondPair {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl CondPair {
    pub const fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Block until notified. The caller must hold `mutex`; on return it holds
    /// it again to the same depth.
    pub fn wait(&self, mutex: &RecursiveMutex) {
        let mut generation = self.generation.lock();
        let entered = *generation;
        let depth = mutex.release_all();
        while *generation == entered {
            self.cond.wait(&mut generation);
        }
        drop(generation);
        mutex.acquire_to_depth(depth);
    }

    /// As [`CondPair::wait`], giving up after `timeout`. Returns `false` on
    /// timeout.
    pub fn wait_for(&self, mutex: &RecursiveMutex, timeout: Duration) -> bool {
        let mut generation = self.generation.lock();
        let entered = *generation;
        let depth = mutex.release_all();
        let mut notified = true;
        while *generation == entered {
            if self.cond.wait_for(&mut generation, timeout).timed_out() {
                notified = *generation != entered;
                break;
            }
        }
        drop(generation);
        mutex.acquire_to_depth(depth);
        notified
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }
}

/// One-time initialization: a lock and a done flag. The callback runs under
/// the lock iff the flag is still clear.
#[derive(Debug, Default)]
pub struct OnceInit {
    done: Mutex<bool>,
}

impl OnceInit {
    pub const fn new() -> Self {
        Self {
            done: Mutex::new(false),
        }
    }

    /// Run `f` exactly once across all callers.
    pub fn call_once<F: FnOnce()>(&self, f: F) {
        let mut done = self.done.lock();
        if !*done {
            f();
            *done = true;
        }
    }

    /// Whether the initializer already ran.
    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Reset to the uninitialized state. Used when a subsystem is torn down
    /// during finalization and may be brought up again by a later test.
    pub fn reset(&self) {
        *self.done.lock() = false;
    }
}
