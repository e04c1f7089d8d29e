//! Byte channels
//!
//! The channel seam the transform layer stacks onto. A channel moves raw
//! bytes, may be half-closed per direction, and reports readiness without
//! blocking so the notifier can poll it. Reads are cooperative: a channel
//! that cannot deliver data now returns [`ReadOutcome::WouldBlock`] rather
//! than suspending the thread.

use crate::error::RuntimeError;
use crate::value::Value;

use std::collections::VecDeque;

pub mod zlib;

/// Readiness interest registered by an event-loop watcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

/// What a read delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were stored at the front of the buffer.
    Data(usize),
    /// Nothing available now; retry when the channel signals readable.
    WouldBlock,
    /// The write side is closed and everything has been consumed.
    Eof,
}

/// A bidirectional byte channel.
pub trait Channel {
    /// Name the channel registers under.
    fn name(&self) -> &str;

    /// Whether the read side is open.
    fn is_open_read(&self) -> bool;

    /// Whether the write side is open.
    fn is_open_write(&self) -> bool;

    /// Whether a read would deliver data or EOF without blocking.
    fn readable(&self) -> bool;

    /// Whether a write would be accepted.
    fn writable(&self) -> bool;

    /// Read into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, RuntimeError>;

    /// Push bytes back onto the front of the read buffer, so they are
    /// delivered again before anything else.
    fn unget(&mut self, bytes: &[u8]);

    /// Write from `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, RuntimeError>;

    /// Push any buffered output downstream.
    fn flush(&mut self) -> Result<(), RuntimeError>;

    /// Close the read side, discarding pending input.
    fn close_read(&mut self) -> Result<(), RuntimeError>;

    /// Close the write side, flushing buffered output first.
    fn close_write(&mut self) -> Result<(), RuntimeError>;

    /// Select blocking or cooperative non-blocking semantics.
    fn set_blocking(&mut self, blocking: bool);

    /// Current blocking mode.
    fn is_blocking(&self) -> bool;

    /// Event-loop interest changed; transforms may arm wakeup timers.
    fn watch(&mut self, _interest: Interest) {}

    /// Set a channel option.
    fn set_option(&mut self, name: &str, _value: &Value) -> Result<(), RuntimeError> {
        Err(RuntimeError::IoBadOption(name.to_string()))
    }

    /// Read a channel option.
    fn get_option(&self, name: &str) -> Result<Value, RuntimeError> {
        Err(RuntimeError::IoBadOption(name.to_string()))
    }
}

/// An in-memory channel: writes queue bytes, reads drain them. The
/// backing store for tests and for building higher-level plumbing.
#[derive(Debug)]
pub struct ByteChannel {
    name: String,
    buffer: VecDeque<u8>,
    read_open: bool,
    write_open: bool,
    blocking: bool,
}

impl ByteChannel {
    pub fn new(name: impl Into<String>) -> ByteChannel {
        ByteChannel {
            name: name.into(),
            buffer: VecDeque::new(),
            read_open: true,
            write_open: true,
            blocking: true,
        }
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drain everything queued.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.buffer.drain(..).collect()
    }
}

impl Channel for ByteChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open_read(&self) -> bool {
        self.read_open
    }

    fn is_open_write(&self) -> bool {
        self.write_open
    }

    fn readable(&self) -> bool {
        self.read_open && (!self.buffer.is_empty() || !self.write_open)
    }

    fn writable(&self) -> bool {
        self.write_open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, RuntimeError> {
        if !self.read_open {
            return Err(RuntimeError::IoNotReadable(self.name.clone()));
        }
        if self.buffer.is_empty() {
            return if self.write_open {
                Ok(ReadOutcome::WouldBlock)
            } else {
                Ok(ReadOutcome::Eof)
            };
        }
        let mut n = 0;
        while n < buf.len() {
            match self.buffer.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(ReadOutcome::Data(n))
    }

    fn unget(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.buffer.push_front(b);
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, RuntimeError> {
        if !self.write_open {
            return Err(RuntimeError::IoNotWritable(self.name.clone()));
        }
        self.buffer.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn close_read(&mut self) -> Result<(), RuntimeError> {
        self.read_open = false;
        self.buffer.clear();
        Ok(())
    }

    fn close_write(&mut self) -> Result<(), RuntimeError> {
        self.write_open = false;
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }
}
