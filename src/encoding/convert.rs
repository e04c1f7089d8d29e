//! Incremental conversion kernel
//!
//! Converters process as much of the source window as they can and report
//! exactly how far they got. `src_read` never includes a partial trailing
//! sequence; the caller re-presents those bytes together with the next
//! chunk. [`ConvStatus::NoSpace`] asks for a larger output buffer without
//! advancing the source, and [`ConvStatus::MultibyteIncomplete`] is only an
//! error once the caller has declared end of input.

use bitflags::bitflags;

bitflags! {
    /// Conversion control flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConvFlags: u32 {
        /// First chunk of a piecewise conversion; resets converter state.
        const START = 1 << 0;
        /// Last chunk; the converter finalizes (escape encodings emit
        /// their final sequence, partial tails become errors).
        const END = 1 << 1;
        /// Reject anything unrepresentable instead of substituting.
        const STRICT = 1 << 2;
        /// Substitute the fallback character silently.
        const NO_COMPLAIN = 1 << 3;
        /// Stop at the first error and report how far conversion got.
        const STOP_ON_ERROR = 1 << 4;
        /// Modified UTF-8: NUL travels as the two-byte form `C0 80`.
        const MODIFIED = 1 << 5;
        /// Report the source index of the first offending byte.
        const FAIL_INDEX = 1 << 6;
        /// Whole-buffer conversion in one call.
        const WHOLE = Self::START.bits() | Self::END.bits();
    }
}

/// Outcome class of one conversion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvStatus {
    /// The entire source window was consumed.
    Ok,
    /// The output buffer filled with source left over; retry with a larger
    /// buffer without advancing the source.
    NoSpace,
    /// The source ends in a partial multi-byte or escape sequence; retry
    /// once more bytes arrive.
    MultibyteIncomplete,
    /// The source bytes are malformed for this encoding.
    Syntax,
    /// A character has no representation in the target encoding.
    Unknown,
}

/// Result record of one conversion call.
#[derive(Debug, Clone, Copy)]
pub struct Converted {
    /// Outcome class.
    pub status: ConvStatus,
    /// Source bytes fully consumed.
    pub src_read: usize,
    /// Bytes written to the output buffer.
    pub dst_wrote: usize,
    /// Characters represented by the written bytes.
    pub chars: usize,
}

/// Opaque converter state carried across piecewise calls; reset by
/// [`ConvFlags::START`]. Only escape encodings use it: the active
/// sub-table index.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConvState {
    pub(crate) sub_table: usize,
}

/// Whether error statuses should surface rather than substituting.
pub(crate) fn stop_on_error(flags: ConvFlags) -> bool {
    flags.intersects(ConvFlags::STRICT | ConvFlags::STOP_ON_ERROR | ConvFlags::FAIL_INDEX)
        && !flags.contains(ConvFlags::NO_COMPLAIN)
}

/// One decoding step over canonical UTF-8 input.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Utf8Step {
    /// A complete character and the bytes it occupied.
    Char(char, usize),
    /// The window ends inside a sequence.
    Incomplete,
    /// Not valid UTF-8 at this position.
    Invalid,
}

/// Decode one character from the head of `src`.
pub(crate) fn step_utf8(src: &[u8]) -> Utf8Step {
    let Some(&b0) = src.first() else {
        return Utf8Step::Incomplete;
    };
    if b0 < 0x80 {
        return Utf8Step::Char(b0 as char, 1);
    }
    let need = match b0 {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return Utf8Step::Invalid,
    };
    if src.len() < need {
        // Only incomplete if the continuation bytes so far are plausible.
        if src[1..].iter().all(|b| b & 0xC0 == 0x80) {
            return Utf8Step::Incomplete;
        }
        return Utf8Step::Invalid;
    }
    match std::str::from_utf8(&src[..need]) {
        Ok(s) => match s.chars().next() {
            Some(ch) => Utf8Step::Char(ch, need),
            None => Utf8Step::Invalid,
        },
        Err(_) => Utf8Step::Invalid,
    }
}

/// Append `ch` as UTF-8 at `dst[at..]`. `None` when it does not fit.
pub(crate) fn put_utf8(ch: char, dst: &mut [u8], at: usize) -> Option<usize> {
    let mut buf = [0u8; 4];
    let encoded = ch.encode_utf8(&mut buf).as_bytes();
    if at + encoded.len() > dst.len() {
        return None;
    }
    dst[at..at + encoded.len()].copy_from_slice(encoded);
    Some(encoded.len())
}
