//! Exit-handler and finalization behavior. These tests drive the
//! process-wide lists, so the ordering-sensitive steps live in a single
//! test body.

use embra::event::{
    create_exit_handler, create_late_exit_handler, create_thread_exit_handler,
    delete_exit_handler, finalize, finalize_thread, in_exit, reinitialize,
};

use std::sync::{Arc, Mutex};

// The handler lists are process-wide; tests that drain them must not
// overlap.
static GATE: Mutex<()> = Mutex::new(());

#[test]
fn finalize_drains_in_order() {
    let _gate = GATE.lock().unwrap();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let push = |tag: &'static str| {
        let log = log.clone();
        move || log.lock().unwrap().push(tag.to_string())
    };

    // Global handlers drain last-in-first-out.
    create_exit_handler(push("global-1"));
    create_exit_handler(push("global-2"));

    // Thread handlers run after the global list, late handlers after that.
    {
        let log = log.clone();
        create_thread_exit_handler(move || log.lock().unwrap().push("thread".to_string()));
    }
    create_late_exit_handler(push("late"));

    // A handler registered and deleted again never runs.
    let token = create_exit_handler(push("deleted"));
    delete_exit_handler(token);

    // A handler may observe that exit processing has begun.
    {
        let log = log.clone();
        create_exit_handler(move || {
            assert!(in_exit());
            log.lock().unwrap().push("observer".to_string());
        });
    }

    finalize();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        [
            "observer".to_string(),
            "global-2".to_string(),
            "global-1".to_string(),
            "thread".to_string(),
            "late".to_string(),
        ]
    );

    reinitialize();
}

#[test]
fn handler_may_deregister_a_sibling() {
    let _gate = GATE.lock().unwrap();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let early = {
        let log = log.clone();
        create_exit_handler(move || log.lock().unwrap().push("early"))
    };
    {
        let log = log.clone();
        create_exit_handler(move || {
            // Runs first (LIFO) and removes the earlier registration.
            log.lock().unwrap().push("canceller");
            delete_exit_handler(early);
        });
    }

    finalize();
    assert_eq!(log.lock().unwrap().as_slice(), ["canceller"]);
    reinitialize();
}

#[test]
fn thread_handlers_are_per_thread() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        std::thread::spawn(move || {
            let inner = log.clone();
            create_thread_exit_handler(move || inner.lock().unwrap().push("worker"));
            finalize_thread(true);
        })
        .join()
        .expect("worker thread");
    }
    assert_eq!(log.lock().unwrap().as_slice(), ["worker"]);

    // This thread registered nothing; finalizing it is a no-op.
    finalize_thread(true);
    assert_eq!(log.lock().unwrap().len(), 1);
}
