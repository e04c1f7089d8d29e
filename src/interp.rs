//! Interpreter instance state
//!
//! An [`Interp`] is single-threaded and cooperative: script-visible
//! commands, variable traces, the notifier and all values it owns live on
//! one thread. Cross-interpreter sharing happens only by copying values.

use crate::channel::Channel;
use crate::error::RuntimeError;
use crate::event::bgerror::BgErrorState;
use crate::event::notifier::Notifier;
use crate::value::Value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

/// Result of running a command body: either a value or one of the
/// loop-control outcomes a handler may signal.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Normal completion with a result value.
    Normal(Value),
    /// The command requested `break` semantics from its caller.
    Break,
    /// The command requested `continue` semantics from its caller.
    Continue,
    /// Early return with a value.
    Return(Value),
}

impl Flow {
    /// The carried value; loop-control outcomes carry the empty value.
    pub fn into_value(self) -> Value {
        match self {
            Flow::Normal(v) | Flow::Return(v) => v,
            _ => Value::empty(),
        }
    }
}

/// Outcome of invoking a command.
pub type CommandResult = Result<Flow, RuntimeError>;

/// A registered command implementation.
pub type CommandFn = Rc<dyn Fn(&mut Interp, &[Value]) -> CommandResult>;

/// What happened to a traced variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Write,
    Unset,
}

type TraceFn = Rc<dyn Fn(&str, TraceKind)>;

struct TraceEntry {
    id: u64,
    hook: TraceFn,
}

/// Handle for removing a variable trace.
#[derive(Debug, Clone)]
pub struct TraceToken {
    name: String,
    id: u64,
}

/// An interpreter instance.
pub struct Interp {
    vars: HashMap<String, Value>,
    traces: HashMap<String, Vec<TraceEntry>>,
    commands: HashMap<String, CommandFn>,
    channels: HashMap<String, Rc<RefCell<dyn Channel>>>,
    result: Value,
    return_options: Value,
    cancel_requested: bool,
    limit_exceeded: bool,
    safe: bool,
    next_trace_id: u64,
    notifier: Rc<RefCell<Notifier>>,
    pub(crate) bg: BgErrorState,
    error_stream: Rc<RefCell<dyn Write>>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// A fresh interpreter with its own notifier.
    pub fn new() -> Interp {
        Interp {
            vars: HashMap::new(),
            traces: HashMap::new(),
            commands: HashMap::new(),
            channels: HashMap::new(),
            result: Value::empty(),
            return_options: Value::empty(),
            cancel_requested: false,
            limit_exceeded: false,
            safe: false,
            next_trace_id: 0,
            notifier: Rc::new(RefCell::new(Notifier::new())),
            bg: BgErrorState::new(),
            error_stream: Rc::new(RefCell::new(io::stderr())),
        }
    }

    /// The notifier driving this interpreter's event loop.
    pub fn notifier(&self) -> Rc<RefCell<Notifier>> {
        self.notifier.clone()
    }

    /// Current result value.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Store a result value.
    pub fn set_result(&mut self, value: Value) {
        self.result = value;
    }

    /// Clear the result and return options.
    pub fn reset_result(&mut self) {
        self.result = Value::empty();
        self.return_options = Value::empty();
    }

    /// Dictionary of return options from the last completed command.
    pub fn return_options(&self) -> &Value {
        &self.return_options
    }

    /// Record the outcome of a failed command in the result and return
    /// options, the shape background-error capture relies on.
    pub fn record_error(&mut self, err: &RuntimeError) {
        self.result = Value::string(err.to_string());
        let mut options = vec![
            Value::string("-code"),
            Value::string("error"),
            Value::string("-errorcode"),
            Value::list(err.error_code().into_iter().map(Value::string).collect()),
        ];
        options.push(Value::string("-errorinfo"));
        options.push(Value::string(err.to_string()));
        self.return_options = Value::list(options);
    }

    /// Register a command. Re-registration replaces the old body.
    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(&mut Interp, &[Value]) -> CommandResult + 'static,
    ) {
        self.commands.insert(name.into(), Rc::new(body));
    }

    /// Whether a command with this name exists.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Invoke a command by its word list at global scope, recording errors
    /// in the result and return options.
    pub fn eval_global(&mut self, words: &[Value]) -> CommandResult {
        let Some(first) = words.first() else {
            return Ok(Flow::Normal(Value::empty()));
        };
        let name = first.get_string().to_string();
        let Some(body) = self.commands.get(&name).cloned() else {
            let err = RuntimeError::UnknownCommand(name);
            self.record_error(&err);
            return Err(err);
        };
        match body(self, &words[1..]) {
            Ok(flow) => {
                self.result = match &flow {
                    Flow::Normal(v) | Flow::Return(v) => v.clone(),
                    _ => Value::empty(),
                };
                Ok(flow)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Read a variable.
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Write a variable, firing write traces.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.vars.insert(name.clone(), value);
        self.fire_traces(&name, TraceKind::Write);
    }

    /// Remove a variable, firing unset traces.
    pub fn unset_var(&mut self, name: &str) {
        if self.vars.remove(name).is_some() {
            self.fire_traces(name, TraceKind::Unset);
        }
    }

    fn fire_traces(&mut self, name: &str, kind: TraceKind) {
        let hooks: Vec<TraceFn> = self
            .traces
            .get(name)
            .map(|entries| entries.iter().map(|e| e.hook.clone()).collect())
            .unwrap_or_default();
        for hook in hooks {
            hook(name, kind);
        }
    }

    /// Watch a variable for writes and unsets.
    pub fn trace_var(
        &mut self,
        name: impl Into<String>,
        hook: impl Fn(&str, TraceKind) + 'static,
    ) -> TraceToken {
        let name = name.into();
        let id = self.next_trace_id;
        self.next_trace_id += 1;
        self.traces.entry(name.clone()).or_default().push(TraceEntry {
            id,
            hook: Rc::new(hook),
        });
        TraceToken { name, id }
    }

    /// Remove a variable trace.
    pub fn untrace_var(&mut self, token: &TraceToken) {
        if let Some(entries) = self.traces.get_mut(&token.name) {
            entries.retain(|e| e.id != token.id);
            if entries.is_empty() {
                self.traces.remove(&token.name);
            }
        }
    }

    /// Register a channel under a name.
    pub fn register_channel(&mut self, name: impl Into<String>, chan: Rc<RefCell<dyn Channel>>) {
        self.channels.insert(name.into(), chan);
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Result<Rc<RefCell<dyn Channel>>, RuntimeError> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::IoUnknownChannel(name.to_string()))
    }

    /// Drop a channel registration.
    pub fn unregister_channel(&mut self, name: &str) {
        self.channels.remove(name);
    }

    /// Ask the interpreter to unwind at the next suspension point.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Check-and-clear the cancellation flag.
    pub fn check_cancelled(&mut self) -> Result<(), RuntimeError> {
        if self.cancel_requested {
            self.cancel_requested = false;
            return Err(RuntimeError::Cancelled);
        }
        Ok(())
    }

    /// Mark the interpreter's resource limit as exceeded.
    pub fn set_limit_exceeded(&mut self, exceeded: bool) {
        self.limit_exceeded = exceeded;
    }

    /// Whether the resource limit was exceeded.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Whether this is a sandboxed interpreter with a restricted command
    /// set.
    pub fn is_safe(&self) -> bool {
        self.safe
    }

    /// Mark this interpreter as sandboxed.
    pub fn set_safe(&mut self, safe: bool) {
        self.safe = safe;
    }

    /// Redirect the error output stream.
    pub fn set_error_stream(&mut self, stream: Rc<RefCell<dyn Write>>) {
        self.error_stream = stream;
    }

    /// Write a diagnostic line to the error output stream.
    pub fn write_error_line(&self, message: &str) {
        let mut stream = self.error_stream.borrow_mut();
        let _ = writeln!(stream, "{message}");
        let _ = stream.flush();
    }
}
