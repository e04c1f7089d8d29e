//! The wait multiplexer
//!
//! `wait` blocks the interpreter in its event loop until watched variables
//! are written, watched channels become ready, or a timeout expires.
//! Sources are stamped with a sequence number in the order their events
//! are delivered so `-extended` can report firing order.

use crate::channel::Interest;
use crate::error::RuntimeError;
use crate::event::notifier::{do_one_event, EventMask};
use crate::interp::{Flow, Interp};
use crate::value::Value;

use itertools::Itertools;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Variable,
    Readable,
    Writable,
}

impl SourceKind {
    fn label(self) -> &'static str {
        match self {
            SourceKind::Variable => "variable",
            SourceKind::Readable => "readable",
            SourceKind::Writable => "writable",
        }
    }
}

struct WaitItem {
    kind: SourceKind,
    source: Value,
    seq: Cell<i64>,
    fired: Cell<bool>,
}

impl WaitItem {
    fn new(kind: SourceKind, source: Value) -> Rc<WaitItem> {
        Rc::new(WaitItem {
            kind,
            source,
            seq: Cell::new(-1),
            fired: Cell::new(false),
        })
    }

    /// Stamp this source with the next sequence number, once.
    fn stamp(&self, done: &Cell<i64>) {
        if !self.fired.get() {
            self.seq.set(done.get());
            done.set(done.get() + 1);
            self.fired.set(true);
        }
    }
}

fn need_arg(option: &str) -> RuntimeError {
    RuntimeError::BadArgument(format!("argument required for \"{option}\""))
}

/// The `wait` command surface.
///
/// ```text
/// wait [-all] [-extended] [-nofileevents] [-noidleevents]
///      [-notimerevents] [-nowindowevents]
///      [-readable CHAN | -writable CHAN | -variable NAME]...
///      [-timeout MS] [--] [NAME]...
/// ```
pub fn wait_cmd(interp: &mut Interp, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut all = false;
    let mut extended = false;
    let mut mask = EventMask::ALL;
    let mut timeout: i64 = 0;
    let mut sources: Vec<(SourceKind, Value)> = Vec::new();

    let mut i = 0;
    if args.len() == 1 && args[0].get_string() != "--" {
        // Legacy single-argument form: one variable name.
        sources.push((SourceKind::Variable, args[0].clone()));
        i = args.len();
    }
    while i < args.len() {
        let word = args[i].get_string().to_string();
        if !word.starts_with('-') {
            break;
        }
        match word.as_str() {
            "-all" => all = true,
            "-extended" => extended = true,
            "-nofileevents" => mask.remove(EventMask::FILE),
            "-noidleevents" => mask.remove(EventMask::IDLE),
            "-notimerevents" => mask.remove(EventMask::TIMER),
            "-nowindowevents" => mask.remove(EventMask::WINDOW),
            "-timeout" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| need_arg("-timeout"))?;
                timeout = value.get_int()?;
                if timeout < 0 {
                    return Err(RuntimeError::WaitNegativeTime);
                }
            }
            "-variable" => {
                i += 1;
                let name = args.get(i).ok_or_else(|| need_arg("-variable"))?;
                sources.push((SourceKind::Variable, name.clone()));
            }
            "-readable" => {
                i += 1;
                let name = args.get(i).ok_or_else(|| need_arg("-readable"))?;
                sources.push((SourceKind::Readable, name.clone()));
            }
            "-writable" => {
                i += 1;
                let name = args.get(i).ok_or_else(|| need_arg("-writable"))?;
                sources.push((SourceKind::Writable, name.clone()));
            }
            "--" => {
                i += 1;
                break;
            }
            _ => {
                return Err(RuntimeError::BadArgument(format!(
                    "bad option \"{word}\""
                )));
            }
        }
        i += 1;
    }
    // Anything after the options is more variable names.
    for arg in &args[i..] {
        sources.push((SourceKind::Variable, arg.clone()));
    }

    if !mask.intersects(EventMask::ALL) {
        return Err(RuntimeError::WaitNoSources);
    }
    if timeout > 0 && !mask.contains(EventMask::TIMER) {
        return Err(RuntimeError::WaitNoTime);
    }
    if !mask.contains(EventMask::FILE)
        && sources
            .iter()
            .any(|(kind, _)| *kind != SourceKind::Variable)
    {
        return Err(RuntimeError::WaitNoFileEvent);
    }

    // Channels are resolved and direction-checked before any source is
    // registered, so failure needs no unwinding.
    let mut channels = Vec::new();
    for (kind, source) in &sources {
        match kind {
            SourceKind::Variable => channels.push(None),
            SourceKind::Readable => {
                let chan = interp.channel(source.get_string())?;
                if !chan.borrow().is_open_read() {
                    return Err(RuntimeError::IoNotReadable(source.get_string().to_string()));
                }
                channels.push(Some(chan));
            }
            SourceKind::Writable => {
                let chan = interp.channel(source.get_string())?;
                if !chan.borrow().is_open_write() {
                    return Err(RuntimeError::IoNotWritable(source.get_string().to_string()));
                }
                channels.push(Some(chan));
            }
        }
    }

    let done = Rc::new(Cell::new(0i64));
    let timed_out = Rc::new(Cell::new(false));
    let notifier = interp.notifier();

    let mut items = Vec::new();
    let mut traces = Vec::new();
    let mut watchers = Vec::new();

    for ((kind, source), chan) in sources.iter().zip(channels) {
        let item = WaitItem::new(*kind, source.clone());
        match kind {
            SourceKind::Variable => {
                let hook_item = item.clone();
                let hook_done = done.clone();
                let token = interp.trace_var(source.get_string(), move |_, _| {
                    hook_item.stamp(&hook_done);
                });
                traces.push(token);
            }
            SourceKind::Readable | SourceKind::Writable => {
                let chan = chan.expect("channel resolved above");
                let readable = *kind == SourceKind::Readable;
                chan.borrow_mut().watch(Interest {
                    readable,
                    writable: !readable,
                });
                let poll_chan = chan.clone();
                let hook_item = item.clone();
                let hook_done = done.clone();
                let token = notifier.borrow_mut().add_watcher(
                    move || {
                        let c = poll_chan.borrow();
                        if readable {
                            c.readable()
                        } else {
                            c.writable()
                        }
                    },
                    move |_| hook_item.stamp(&hook_done),
                );
                watchers.push((token, chan));
            }
        }
        items.push(item);
    }

    let timer = if timeout > 0 {
        let flag = timed_out.clone();
        Some(
            notifier
                .borrow_mut()
                .create_timer(timeout as u64, move |_| flag.set(true)),
        )
    } else {
        None
    };
    let started = Instant::now();

    // Degenerate form: a bare `wait` is one non-blocking pass of the loop.
    let degenerate = items.is_empty() && timeout == 0;
    if degenerate {
        mask |= EventMask::DONT_WAIT;
    }

    let total = items.len() as i64;
    let mut found_event = true;
    let mut failure: Option<RuntimeError> = None;
    loop {
        if timed_out.get() || !found_event {
            break;
        }
        if !degenerate {
            let satisfied = if all {
                done.get() >= total
            } else {
                done.get() > 0
            };
            if satisfied {
                break;
            }
        }
        if let Err(err) = interp.check_cancelled() {
            failure = Some(err);
            break;
        }
        found_event = do_one_event(interp, mask);
        if let Err(err) = interp.check_cancelled() {
            failure = Some(err);
            break;
        }
        if interp.limit_exceeded() {
            failure = Some(RuntimeError::LimitExceeded);
            break;
        }
        if degenerate {
            // Equivalent of `update`: event handlers may have run commands,
            // so clear whatever they left in the result.
            interp.reset_result();
            break;
        }
    }

    if failure.is_none() && !degenerate && !found_event {
        failure = Some(RuntimeError::WaitNoSources);
    }

    // Every exit path deregisters all hooks and deletes the timer.
    if let Some(token) = timer {
        notifier.borrow_mut().delete_timer(token);
    }
    for token in &traces {
        interp.untrace_var(token);
    }
    for (token, chan) in watchers {
        notifier.borrow_mut().remove_watcher(token);
        chan.borrow_mut().watch(Interest::default());
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if degenerate {
        return Ok(Value::empty());
    }

    let remaining = if timeout > 0 {
        if timed_out.get() {
            -1
        } else {
            (timeout - started.elapsed().as_millis() as i64).max(0)
        }
    } else {
        0
    };

    if extended {
        let mut out = Vec::new();
        for item in items
            .iter()
            .filter(|item| item.seq.get() >= 0)
            .sorted_by_key(|item| item.seq.get())
        {
            out.push(Value::string(item.kind.label()));
            out.push(item.source.clone());
        }
        if timeout > 0 {
            out.push(Value::string("timeleft"));
            out.push(Value::int(remaining));
        }
        return Ok(Value::list(out));
    }
    if timeout > 0 {
        return Ok(Value::int(remaining));
    }
    interp.reset_result();
    Ok(Value::empty())
}

/// The `update` command surface: drain ready events without blocking.
pub fn update_cmd(interp: &mut Interp, args: &[Value]) -> Result<Value, RuntimeError> {
    let mask = match args {
        [] => EventMask::ALL | EventMask::DONT_WAIT,
        [only] if only.get_string() == "idletasks" => EventMask::IDLE | EventMask::DONT_WAIT,
        _ => {
            return Err(RuntimeError::BadArgument(
                "usage: update ?idletasks?".to_string(),
            ));
        }
    };
    while do_one_event(interp, mask) {
        interp.check_cancelled()?;
    }
    interp.reset_result();
    Ok(Value::empty())
}

/// Register the `wait` and `update` commands on an interpreter.
pub fn register_event_commands(interp: &mut Interp) {
    interp.register_command("wait", |interp, args| {
        wait_cmd(interp, args).map(Flow::Normal)
    });
    interp.register_command("update", |interp, args| {
        update_cmd(interp, args).map(Flow::Normal)
    });
}
