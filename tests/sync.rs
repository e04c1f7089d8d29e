use embra::sync::{CondPair, OnceInit, RecursiveMutex};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn recursive_lock_counts_depth() {
    let mutex = RecursiveMutex::new();
    mutex.lock();
    mutex.lock();
    mutex.lock();
    assert_eq!(mutex.held_depth(), 3);
    mutex.unlock();
    assert_eq!(mutex.held_depth(), 2);
    mutex.unlock();
    mutex.unlock();
    assert_eq!(mutex.held_depth(), 0);
}

#[test]
fn n_locks_need_n_unlocks_before_another_thread_acquires() {
    let mutex = Arc::new(RecursiveMutex::new());
    mutex.lock();
    mutex.lock();

    let contender = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            // Spin until the owner fully releases.
            while !mutex.try_lock() {
                thread::sleep(Duration::from_millis(1));
            }
            mutex.unlock();
        })
    };

    // One unlock is not enough for the other thread.
    mutex.unlock();
    thread::sleep(Duration::from_millis(20));
    assert!(!contender.is_finished(), "lock leaked at depth 1");

    mutex.unlock();
    contender.join().expect("contender");
}

#[test]
fn condition_wait_restores_recursion_depth() {
    let mutex = Arc::new(RecursiveMutex::new());
    let cond = Arc::new(CondPair::new());

    let waiter = {
        let mutex = mutex.clone();
        let cond = cond.clone();
        thread::spawn(move || {
            mutex.lock();
            mutex.lock();
            cond.wait(&mutex);
            let depth = mutex.held_depth();
            mutex.unlock();
            mutex.unlock();
            depth
        })
    };

    // The waiter must have released the lock completely while waiting.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if mutex.try_lock() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "wait never released");
        thread::sleep(Duration::from_millis(1));
    }
    mutex.unlock();

    cond.notify_all();
    assert_eq!(waiter.join().expect("waiter"), 2);
}

#[test]
fn timed_condition_wait_expires() {
    let mutex = RecursiveMutex::new();
    let cond = CondPair::new();
    mutex.lock();
    let notified = cond.wait_for(&mutex, Duration::from_millis(30));
    assert!(!notified);
    assert_eq!(mutex.held_depth(), 1);
    mutex.unlock();
}

#[test]
fn once_init_runs_exactly_once() {
    let once = Arc::new(OnceInit::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..8 {
        let once = once.clone();
        let runs = runs.clone();
        workers.push(thread::spawn(move || {
            once.call_once(|| {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }));
    }
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(once.is_done());
}
