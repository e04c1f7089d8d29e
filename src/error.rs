//! Runtime error implementation

use std::io;
use thiserror::Error;

/// Runtime error variants shared by every core subsystem.
///
/// Recoverable converter statuses (`NoSpace`, `MultibyteIncomplete` during a
/// piecewise conversion) and would-block channel states are expressed in
/// ordinary return values; only genuine failures become a `RuntimeError`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The value cannot be converted to the required representation.
    #[error("expected {expected} but got \"{value}\"")]
    TypeMismatch {
        /// Name of the representation that was requested.
        expected: &'static str,
        /// String form of the offending value.
        value: String,
    },
    /// A length or size computation exceeded the runtime maximum.
    #[error("max length of a list exceeded")]
    ValueTooLarge,
    /// No encoding with this name is registered or loadable.
    #[error("unknown encoding \"{0}\"")]
    EncodingUnknown(String),
    /// An encoding descriptor was found but could not be parsed.
    #[error("invalid encoding descriptor \"{0}\"")]
    EncodingInvalid(String),
    /// Source bytes are malformed for the encoding profile in use.
    #[error("unexpected byte sequence starting at index {0}")]
    ConvertSyntax(usize),
    /// A character has no representation in the target encoding.
    #[error("character not representable in target encoding at index {0}")]
    ConvertUnknown(usize),
    /// The source ends in a partial multi-byte sequence. Retryable once more
    /// bytes arrive; an error only when the caller declared end of input.
    #[error("partial multi-byte sequence at index {0}")]
    ConvertMultibyteIncomplete(usize),
    /// The channel is not open for reading.
    #[error("channel \"{0}\" wasn't open for reading")]
    IoNotReadable(String),
    /// The channel is not open for writing.
    #[error("channel \"{0}\" wasn't open for writing")]
    IoNotWritable(String),
    /// The channel has been closed.
    #[error("channel \"{0}\" is closed")]
    IoClosed(String),
    /// No channel is registered under this name.
    #[error("can not find channel named \"{0}\"")]
    IoUnknownChannel(String),
    /// An option name or value was not acceptable to the channel.
    #[error("bad channel option: {0}")]
    IoBadOption(String),
    /// The decompressor needs a preset dictionary and none was supplied.
    #[error("compression dictionary required (adler {adler})")]
    CompressNeedDict {
        /// Adler-32 checksum of the dictionary the stream expects.
        adler: u32,
    },
    /// The compression engine was used inconsistently.
    #[error("stream error: {0}")]
    CompressStream(String),
    /// The compressed data itself is corrupt.
    #[error("data error: {0}")]
    CompressData(String),
    /// All event classes are disabled and nothing could ever fire.
    #[error("can't wait: would block forever")]
    WaitNoSources,
    /// A timeout was requested while timer events are disabled.
    #[error("timer events disabled with timeout specified")]
    WaitNoTime,
    /// A channel source was given while file events are disabled.
    #[error("file events disabled with channel(s) specified")]
    WaitNoFileEvent,
    /// A negative timeout was supplied.
    #[error("timeout must be positive")]
    WaitNegativeTime,
    /// The interpreter was asked to unwind.
    #[error("eval canceled")]
    Cancelled,
    /// A resource limit configured on the interpreter was exceeded.
    #[error("limit exceeded")]
    LimitExceeded,
    /// An argument to a command surface could not be parsed.
    #[error("{0}")]
    BadArgument(String),
    /// No command is registered under this name.
    #[error("invalid command name \"{0}\"")]
    UnknownCommand(String),
    /// Unrecoverable I/O error from the host.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RuntimeError {
    /// Structured error-code token list. The leading tokens are stable and
    /// intended for programmatic matching; trailing tokens carry detail.
    pub fn error_code(&self) -> Vec<String> {
        use RuntimeError::*;

        fn tokens(parts: &[&str]) -> Vec<String> {
            parts.iter().map(|s| s.to_string()).collect()
        }

        match self {
            TypeMismatch { expected, .. } => {
                let mut c = tokens(&["EMBRA", "VALUE", "TYPE"]);
                c.push(expected.to_uppercase());
                c
            }
            ValueTooLarge => tokens(&["EMBRA", "MEMORY"]),
            EncodingUnknown(name) => {
                let mut c = tokens(&["EMBRA", "ENCODING", "UNKNOWN"]);
                c.push(name.clone());
                c
            }
            EncodingInvalid(name) => {
                let mut c = tokens(&["EMBRA", "ENCODING", "INVALID"]);
                c.push(name.clone());
                c
            }
            ConvertSyntax(i) => {
                let mut c = tokens(&["EMBRA", "CONVERT", "SYNTAX"]);
                c.push(i.to_string());
                c
            }
            ConvertUnknown(i) => {
                let mut c = tokens(&["EMBRA", "CONVERT", "UNKNOWN"]);
                c.push(i.to_string());
                c
            }
            ConvertMultibyteIncomplete(i) => {
                let mut c = tokens(&["EMBRA", "CONVERT", "MULTIBYTE"]);
                c.push(i.to_string());
                c
            }
            IoNotReadable(_) => tokens(&["EMBRA", "IO", "NOT_READABLE"]),
            IoNotWritable(_) => tokens(&["EMBRA", "IO", "NOT_WRITABLE"]),
            IoClosed(_) => tokens(&["EMBRA", "IO", "CLOSED"]),
            IoUnknownChannel(_) => tokens(&["EMBRA", "IO", "LOOKUP"]),
            IoBadOption(_) => tokens(&["EMBRA", "IO", "OPTION"]),
            CompressNeedDict { adler } => {
                let mut c = tokens(&["EMBRA", "ZIP", "NEED_DICT"]);
                c.push(adler.to_string());
                c
            }
            CompressStream(_) => tokens(&["EMBRA", "ZIP", "STREAM"]),
            CompressData(_) => tokens(&["EMBRA", "ZIP", "DATA"]),
            WaitNoSources => tokens(&["EMBRA", "EVENT", "NO_SOURCES"]),
            WaitNoTime => tokens(&["EMBRA", "EVENT", "NO_TIME"]),
            WaitNoFileEvent => tokens(&["EMBRA", "EVENT", "NO_FILE_EVENT"]),
            WaitNegativeTime => tokens(&["EMBRA", "EVENT", "NEGTIME"]),
            Cancelled => tokens(&["EMBRA", "CANCEL"]),
            LimitExceeded => tokens(&["EMBRA", "EVENT", "LIMIT"]),
            BadArgument(_) => tokens(&["EMBRA", "ARGUMENT"]),
            UnknownCommand(name) => {
                let mut c = tokens(&["EMBRA", "LOOKUP", "COMMAND"]);
                c.push(name.clone());
                c
            }
            Io(_) => tokens(&["EMBRA", "IO", "POSIX"]),
        }
    }

    /// Flag whether a piecewise-conversion caller may retry this error with
    /// more input or a larger output buffer.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConvertMultibyteIncomplete(_))
    }
}
