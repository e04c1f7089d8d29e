//! Background error handling
//!
//! Errors raised by asynchronously invoked commands cannot propagate to a
//! caller, so they are captured — result plus return options — on a
//! per-interpreter FIFO queue and handed to a registered handler command
//! from an idle-time callback. The handler can cancel the rest of the
//! queue by returning `break`; its own failures go to the error stream, or
//! are swallowed in sandboxed interpreters save for a hidden fallback.

use crate::error::RuntimeError;
use crate::interp::{CommandResult, Flow, Interp};
use crate::value::Value;

use std::collections::VecDeque;
use tracing::debug;

/// Command name tried as the hidden fallback in sandboxed interpreters.
const HIDDEN_HANDLER: &str = "bgerror-hidden";

struct BgEntry {
    message: Value,
    options: Value,
}

/// Per-interpreter background-error queue and handler configuration.
pub(crate) struct BgErrorState {
    queue: VecDeque<BgEntry>,
    handler: Vec<Value>,
}

impl BgErrorState {
    pub(crate) fn new() -> BgErrorState {
        BgErrorState {
            queue: VecDeque::new(),
            handler: vec![Value::string("bgerror")],
        }
    }
}

/// Replace the background-error handler command prefix.
pub fn set_background_error_handler(interp: &mut Interp, prefix: Vec<Value>) {
    assert!(!prefix.is_empty(), "empty background error handler prefix");
    interp.bg.handler = prefix;
}

/// The current handler command prefix.
pub fn background_error_handler(interp: &Interp) -> Vec<Value> {
    interp.bg.handler.clone()
}

/// Capture the outcome of an asynchronously completed command. A normal
/// completion is a no-op; anything else snapshots the interpreter result
/// and return options onto the queue and, if the queue was empty,
/// schedules an idle-time drain.
pub fn report_background_error(interp: &mut Interp, outcome: &CommandResult) {
    if matches!(outcome, Ok(Flow::Normal(_))) {
        return;
    }
    let entry = BgEntry {
        message: interp.result().clone(),
        options: interp.return_options().clone(),
    };
    let was_empty = interp.bg.queue.is_empty();
    interp.bg.queue.push_back(entry);
    debug!(queued = interp.bg.queue.len(), "background error captured");
    if was_empty {
        interp
            .notifier()
            .borrow_mut()
            .do_when_idle(drain_background_errors);
    }
    interp.reset_result();
}

/// Drain the queue in FIFO order, invoking the handler command at global
/// scope with the captured result and options appended as two arguments.
pub fn drain_background_errors(interp: &mut Interp) {
    while let Some(entry) = interp.bg.queue.pop_front() {
        // The prefix is re-read each pass so one handler may install
        // another.
        let mut words = interp.bg.handler.clone();
        words.push(entry.message.clone());
        words.push(entry.options.clone());

        match interp.eval_global(&words) {
            Ok(Flow::Break) => {
                // Break cancels the remaining reports.
                interp.bg.queue.clear();
            }
            Ok(_) => {}
            Err(err) => handle_handler_failure(interp, &entry, &err),
        }
    }
}

fn handle_handler_failure(interp: &mut Interp, entry: &BgEntry, err: &RuntimeError) {
    if interp.is_safe() {
        // Sandboxed: swallow, except for the hidden fallback a containing
        // application may have installed to interpose on error storms.
        if interp.has_command(HIDDEN_HANDLER) {
            let words = vec![
                Value::string(HIDDEN_HANDLER),
                entry.message.clone(),
                entry.options.clone(),
            ];
            let _ = interp.eval_global(&words);
        }
        return;
    }
    if matches!(err, RuntimeError::UnknownCommand(_)) {
        // No handler command at all: report the original error directly.
        interp.write_error_line(entry.message.get_string());
        return;
    }
    interp.write_error_line("error in background error handler:");
    interp.write_error_line(&err.to_string());
}
