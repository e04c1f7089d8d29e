//! Exit handlers and staged finalization
//!
//! Handlers register on process-wide lists (plus a thread-local list per
//! thread) and drain last-in-first-out. A handler is removed from its list
//! before its callback runs, so a callback may safely deregister itself.
//! Process exit either runs the fast path — exit handlers, then the
//! calling thread's teardown — or the thorough [`finalize`] used when leak
//! checkers need every subsystem torn down in order.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::env;
use std::process;
use tracing::debug;

/// Environment variable selecting the thorough finalization path on exit.
const FULL_FINALIZE_VAR: &str = "EMBRA_FINALIZE";

type Handler = Box<dyn FnOnce() + Send>;

/// Handle for deregistering an exit handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitHandlerToken(u64);

#[derive(Default)]
struct ExitLists {
    handlers: Vec<(u64, Handler)>,
    late: Vec<(u64, Handler)>,
    next_id: u64,
    in_exit: bool,
    app_exit: Option<Box<dyn FnOnce(i32) + Send>>,
}

static LISTS: Mutex<Option<ExitLists>> = Mutex::new(None);

thread_local! {
    static THREAD_HANDLERS: RefCell<Vec<Box<dyn FnOnce()>>> = const { RefCell::new(Vec::new()) };
}

fn with_lists<R>(f: impl FnOnce(&mut ExitLists) -> R) -> R {
    let mut guard = LISTS.lock();
    f(guard.get_or_insert_with(ExitLists::default))
}

/// Register a handler to run at process exit. Handlers run in reverse
/// registration order.
pub fn create_exit_handler(f: impl FnOnce() + Send + 'static) -> ExitHandlerToken {
    with_lists(|lists| {
        let id = lists.next_id;
        lists.next_id += 1;
        lists.handlers.push((id, Box::new(f)));
        ExitHandlerToken(id)
    })
}

/// Deregister an exit handler that has not run yet.
pub fn delete_exit_handler(token: ExitHandlerToken) {
    with_lists(|lists| lists.handlers.retain(|(id, _)| *id != token.0));
}

/// Register a late exit handler: runs during [`finalize`] after the
/// calling thread has been finalized.
pub fn create_late_exit_handler(f: impl FnOnce() + Send + 'static) -> ExitHandlerToken {
    with_lists(|lists| {
        let id = lists.next_id;
        lists.next_id += 1;
        lists.late.push((id, Box::new(f)));
        ExitHandlerToken(id)
    })
}

/// Deregister a late exit handler.
pub fn delete_late_exit_handler(token: ExitHandlerToken) {
    with_lists(|lists| lists.late.retain(|(id, _)| *id != token.0));
}

/// Register a handler on the calling thread's exit list; it runs when the
/// thread is finalized.
pub fn create_thread_exit_handler(f: impl FnOnce() + 'static) {
    THREAD_HANDLERS.with(|handlers| handlers.borrow_mut().push(Box::new(f)));
}

/// Install an application-wide exit hook. When set, [`exit`] hands the
/// exit code to the hook instead of finalizing; the hook must not return.
pub fn set_exit_proc(f: impl FnOnce(i32) + Send + 'static) {
    with_lists(|lists| lists.app_exit = Some(Box::new(f)));
}

/// Whether exit-time cleanup has begun.
pub fn in_exit() -> bool {
    with_lists(|lists| lists.in_exit)
}

/// Drain the global exit handler list, last registered first. Each handler
/// is unlinked before its callback runs.
fn invoke_exit_handlers() {
    with_lists(|lists| lists.in_exit = true);
    loop {
        // Unlink before invoking, and release the lock across the call so
        // a handler may register or deregister others.
        let handler = with_lists(|lists| lists.handlers.pop());
        match handler {
            Some((_, handler)) => handler(),
            None => break,
        }
    }
}

fn invoke_late_exit_handlers() {
    loop {
        let handler = with_lists(|lists| lists.late.pop());
        match handler {
            Some((_, handler)) => handler(),
            None => break,
        }
    }
}

/// Finalize the calling thread: drain its exit handlers last-in-first-out
/// and tear down its per-thread event state.
pub fn finalize_thread(quick: bool) {
    THREAD_HANDLERS.with(|handlers| {
        loop {
            let handler = handlers.borrow_mut().pop();
            match handler {
                Some(h) => h(),
                None => break,
            }
        }
    });
    if !quick {
        debug!("thread event state torn down");
    }
}

/// Terminate the process.
///
/// If an application exit hook is installed it receives the code and does
/// not return. Otherwise the fast path runs the exit handlers and
/// finalizes the calling thread; the thorough path (selected by the
/// `EMBRA_FINALIZE=full` environment setting) runs [`finalize`] so leak
/// checkers see every subsystem torn down.
pub fn exit(code: i32) -> ! {
    let app_exit = with_lists(|lists| lists.app_exit.take());
    if let Some(hook) = app_exit {
        hook(code);
        panic!("application exit hook returned");
    }
    if env::var(FULL_FINALIZE_VAR).map(|v| v == "full").unwrap_or(false) {
        finalize();
    } else {
        invoke_exit_handlers();
        finalize_thread(true);
    }
    process::exit(code)
}

/// Thorough shutdown: exit handlers, thread finalization, late handlers,
/// then subsystem teardown in dependency order. New exit handlers must not
/// appear once the global list has been drained.
///
/// # Panics
///
/// Panics if a callback registered a new exit handler after the drain.
pub fn finalize() {
    invoke_exit_handlers();
    finalize_thread(false);
    invoke_late_exit_handlers();

    debug!("finalizing value type registry");
    crate::value::shutdown_types();
    debug!("finalizing encoding registry");
    crate::encoding::finalize_encodings();

    with_lists(|lists| {
        assert!(
            lists.handlers.is_empty(),
            "exit handlers were created during finalize"
        );
        lists.in_exit = false;
    });
}

/// Bring the runtime back up after a [`finalize`], for embedders that
/// restart within one process.
pub fn reinitialize() {
    crate::value::reopen_types();
    debug!("runtime reinitialized");
}
