//! Streaming compression channel transform
//!
//! A transform stacks on a parent channel and compresses the write path or
//! decompresses the read path, one bounded chunk at a time. Formats: raw
//! deflate, zlib, gzip (with full header and trailer handling), and
//! auto-detection between zlib and gzip by leading magic byte on the read
//! side. Flushing, preset dictionaries, running checksums and half-close
//! semantics follow the channel contract.

use super::{Channel, Interest, ReadOutcome};
use crate::consts::{
    DEFAULT_BUFFER_SIZE, DEFAULT_READ_AHEAD, MAX_BUFFER_SIZE, MAX_GZIP_COMMENT,
    MAX_GZIP_FILENAME, SYNTHETIC_EVENT_MS,
};
use crate::encoding::{self, ConvFlags};
use crate::error::RuntimeError;
use crate::event::notifier::{Notifier, TimerToken};
use crate::value::Value;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace};

/// Direction of the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The write path deflates; reads pass through to the parent.
    Compress,
    /// The read path inflates; writes pass through to the parent.
    Decompress,
}

/// Wire format of the compressed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Bare deflate stream.
    Raw,
    /// RFC 1950 framing with an Adler-32 trailer.
    Zlib,
    /// RFC 1952 framing with header fields and a CRC-32 trailer.
    Gzip,
    /// Decompress-only: sniff zlib versus gzip from the first byte.
    Auto,
}

/// Flush directives for the compressing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Emit all buffered output at a byte boundary.
    Sync,
    /// As `Sync`, and reset the compressor state for decoder resync.
    Full,
    /// End the stream and emit the trailer.
    Finish,
}

/// Configuration for [`push_transform`].
#[derive(Debug, Default)]
pub struct TransformOptions {
    /// Compression level 0..=9; engine default when absent.
    pub level: Option<u32>,
    /// Read-ahead limit for decompressing transforms (1..=65536).
    pub limit: Option<usize>,
    /// Preset compression dictionary (raw and zlib formats only).
    pub dictionary: Option<Vec<u8>>,
    /// Gzip header fields for the compressing side.
    pub header: Option<GzipHeader>,
}

/// Fields of an RFC 1952 gzip header, plus the decoded payload size once a
/// read-side stream completes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    pub comment: Option<String>,
    /// Whether the header carries its own CRC-16.
    pub crc: bool,
    pub filename: Option<String>,
    /// Originating OS code; 255 is "unknown".
    pub os: Option<u8>,
    /// Modification time, seconds since the epoch.
    pub time: u32,
    /// `Some(true)` for text, `Some(false)` for binary.
    pub text: Option<bool>,
    /// Uncompressed payload size from the trailer (read side only).
    pub size: Option<u32>,
}

impl GzipHeader {
    /// Build header fields from a key/value dictionary with the keys
    /// `comment`, `crc`, `filename`, `os`, `time` and `type`.
    pub fn from_dict(dict: &Value) -> Result<GzipHeader, RuntimeError> {
        let items = crate::value::list::all_elements(dict);
        let mut header = GzipHeader::default();
        for pair in items.chunks(2) {
            let [key, value] = pair else {
                return Err(RuntimeError::BadArgument(
                    "header dictionary must have an even number of elements".to_string(),
                ));
            };
            match key.get_string() {
                "comment" => {
                    header.comment = Some(latin1_field(value, "comment", MAX_GZIP_COMMENT)?);
                }
                "crc" => header.crc = value.get_bool()?,
                "filename" => {
                    header.filename = Some(latin1_field(value, "filename", MAX_GZIP_FILENAME)?);
                }
                "os" => header.os = Some(value.get_int()? as u8),
                "time" => header.time = value.get_int()? as u32,
                "type" => {
                    header.text = Some(match value.get_string() {
                        "text" => true,
                        "binary" => false,
                        other => {
                            return Err(RuntimeError::BadArgument(format!(
                                "bad type \"{other}\": must be binary or text"
                            )));
                        }
                    });
                }
                other => {
                    return Err(RuntimeError::BadArgument(format!(
                        "bad gzip header key \"{other}\""
                    )));
                }
            }
        }
        Ok(header)
    }

    /// The header as a key/value dictionary value.
    pub fn to_dict(&self) -> Value {
        let mut out = Vec::new();
        let mut push = |k: &str, v: Value| {
            out.push(Value::string(k));
            out.push(v);
        };
        if let Some(comment) = &self.comment {
            push("comment", Value::string(comment.clone()));
        }
        push("crc", Value::int(self.crc as i64));
        if let Some(filename) = &self.filename {
            push("filename", Value::string(filename.clone()));
        }
        if let Some(os) = self.os {
            push("os", Value::int(os as i64));
        }
        if let Some(size) = self.size {
            push("size", Value::int(size as i64));
        }
        if self.time != 0 {
            push("time", Value::int(self.time as i64));
        }
        if let Some(text) = self.text {
            push("type", Value::string(if text { "text" } else { "binary" }));
        }
        Value::list(out)
    }
}

/// Header strings travel as Latin-1 per RFC 1952, with a length clamp.
fn latin1_field(value: &Value, what: &str, max_len: usize) -> Result<String, RuntimeError> {
    let latin1 = encoding::get_encoding("iso8859-1")?;
    let bytes = latin1
        .encode(value.get_string(), ConvFlags::STRICT)
        .map_err(|_| {
            RuntimeError::BadArgument(format!("{what} contains characters > 0xFF"))
        })?;
    if bytes.len() > max_len {
        return Err(RuntimeError::BadArgument(format!("{what} too large for gzip")));
    }
    Ok(value.get_string().to_string())
}

/// Running checksum over the uncompressed side of the stream.
#[derive(Debug)]
enum RunningChecksum {
    Adler(u32),
    Crc32(crc32fast::Hasher),
}

impl RunningChecksum {
    fn adler() -> RunningChecksum {
        RunningChecksum::Adler(1)
    }

    fn crc() -> RunningChecksum {
        RunningChecksum::Crc32(crc32fast::Hasher::new())
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            RunningChecksum::Adler(state) => *state = adler32(*state, data),
            RunningChecksum::Crc32(hasher) => hasher.update(data),
        }
    }

    fn value(&self) -> u32 {
        match self {
            RunningChecksum::Adler(state) => *state,
            RunningChecksum::Crc32(hasher) => hasher.clone().finalize(),
        }
    }
}

/// RFC 1950 Adler-32. No crate in the dependency set exposes a running
/// Adler state, so the few lines live here.
fn adler32(state: u32, data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    // Largest n with 255n(n+1)/2 + (n+1)(MOD-1) < 2^32.
    const NMAX: usize = 5552;
    let mut a = state & 0xFFFF;
    let mut b = state >> 16;
    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Raw,
    Zlib,
    Gzip,
}

/// A compression transform stacked on a parent channel.
pub struct ZlibTransform {
    name: String,
    parent: Rc<RefCell<dyn Channel>>,
    mode: Mode,
    format: Format,
    framing: Option<Framing>,
    level: Compression,
    compress: Option<Compress>,
    decompress: Option<Decompress>,
    limit: usize,
    dictionary: Option<Vec<u8>>,
    checksum: RunningChecksum,

    // Read side.
    in_buf: Vec<u8>,
    in_pos: usize,
    pending_out: VecDeque<u8>,
    in_header: Option<GzipHeader>,
    header_parsed: bool,
    trailer_buf: Vec<u8>,
    trailer_done: bool,
    stream_end: bool,
    parent_eof: bool,

    // Write side.
    out_header: Option<GzipHeader>,
    header_written: bool,
    finished: bool,
    total_uncompressed: u64,

    read_open: bool,
    write_open: bool,
    blocking: bool,
    notifier: Option<Rc<RefCell<Notifier>>>,
    timer: Option<TimerToken>,
    interest: Interest,
}

impl std::fmt::Debug for ZlibTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibTransform")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("format", &self.format)
            .field("framing", &self.framing)
            .field("limit", &self.limit)
            .field("read_open", &self.read_open)
            .field("write_open", &self.write_open)
            .finish_non_exhaustive()
    }
}

/// Stack a compression or decompression transform onto `parent`.
/// Compression requires a writable parent, decompression a readable one;
/// `Auto` format is only meaningful when decompressing.
pub fn push_transform(
    name: impl Into<String>,
    parent: Rc<RefCell<dyn Channel>>,
    mode: Mode,
    format: Format,
    options: TransformOptions,
) -> Result<ZlibTransform, RuntimeError> {
    let name = name.into();
    match mode {
        Mode::Compress => {
            if !parent.borrow().is_open_write() {
                return Err(RuntimeError::IoNotWritable(parent.borrow().name().to_string()));
            }
            if format == Format::Auto {
                return Err(RuntimeError::BadArgument(
                    "format auto is only supported for decompression".to_string(),
                ));
            }
        }
        Mode::Decompress => {
            if !parent.borrow().is_open_read() {
                return Err(RuntimeError::IoNotReadable(parent.borrow().name().to_string()));
            }
        }
    }
    let limit = options.limit.unwrap_or(DEFAULT_READ_AHEAD);
    if !(1..=MAX_BUFFER_SIZE).contains(&limit) {
        return Err(RuntimeError::IoBadOption(
            "-limit must be between 1 and 65536".to_string(),
        ));
    }
    if options.dictionary.is_some() && format == Format::Gzip {
        return Err(RuntimeError::BadArgument(
            "a compression dictionary may not be set in the gzip format".to_string(),
        ));
    }
    if options.header.is_some() && !(mode == Mode::Compress && format == Format::Gzip) {
        return Err(RuntimeError::BadArgument(
            "a header may only be set when compressing to gzip".to_string(),
        ));
    }
    let level = options
        .level
        .map(Compression::new)
        .unwrap_or_else(Compression::default);

    let mut transform = ZlibTransform {
        name,
        parent,
        mode,
        format,
        framing: match format {
            Format::Raw => Some(Framing::Raw),
            Format::Zlib => Some(Framing::Zlib),
            Format::Gzip => Some(Framing::Gzip),
            Format::Auto => None,
        },
        level,
        compress: None,
        decompress: None,
        limit,
        dictionary: options.dictionary,
        checksum: if format == Format::Gzip {
            RunningChecksum::crc()
        } else {
            RunningChecksum::adler()
        },
        in_buf: Vec::new(),
        in_pos: 0,
        pending_out: VecDeque::new(),
        in_header: None,
        header_parsed: format != Format::Gzip && format != Format::Auto,
        trailer_buf: Vec::new(),
        trailer_done: format != Format::Gzip && format != Format::Auto,
        stream_end: false,
        parent_eof: false,
        out_header: options.header,
        header_written: false,
        finished: false,
        total_uncompressed: 0,
        read_open: true,
        write_open: true,
        blocking: true,
        notifier: None,
        timer: None,
        interest: Interest::default(),
    };

    match mode {
        Mode::Compress => {
            let zlib_header = format == Format::Zlib;
            let mut engine = Compress::new(level, zlib_header);
            if let Some(dict) = &transform.dictionary {
                engine
                    .set_dictionary(dict)
                    .map_err(|e| RuntimeError::CompressStream(e.to_string()))?;
            }
            transform.compress = Some(engine);
        }
        Mode::Decompress => {
            if let Some(framing) = transform.framing {
                transform.install_decompressor(framing)?;
            }
        }
    }
    debug!(
        name = %transform.name,
        ?mode,
        ?format,
        "compression transform stacked"
    );
    Ok(transform)
}

impl ZlibTransform {
    fn install_decompressor(&mut self, framing: Framing) -> Result<(), RuntimeError> {
        self.framing = Some(framing);
        let zlib_header = framing == Framing::Zlib;
        let mut engine = Decompress::new(zlib_header);
        if framing == Framing::Raw {
            if let Some(dict) = &self.dictionary {
                engine
                    .set_dictionary(dict)
                    .map_err(|e| RuntimeError::CompressData(e.to_string()))?;
            }
        }
        if framing == Framing::Gzip {
            self.checksum = RunningChecksum::crc();
            self.header_parsed = false;
            self.trailer_done = false;
        } else {
            self.header_parsed = true;
            self.trailer_done = true;
        }
        self.decompress = Some(engine);
        Ok(())
    }

    /// Attach the notifier used to synthesize readable events when
    /// decompressed data is pending but the parent will not fire.
    pub fn attach_notifier(&mut self, notifier: Rc<RefCell<Notifier>>) {
        self.notifier = Some(notifier);
    }

    /// Running Adler-32 or CRC-32 over the uncompressed data so far.
    pub fn checksum(&self) -> u32 {
        self.checksum.value()
    }

    /// The header parsed from a gzip stream on the read side.
    pub fn header(&self) -> Option<&GzipHeader> {
        self.in_header.as_ref()
    }

    fn remaining_input(&self) -> &[u8] {
        &self.in_buf[self.in_pos..]
    }

    /// Top up the input buffer from the parent, bounded by the read-ahead
    /// limit. Returns whether any bytes arrived.
    fn fill_input(&mut self) -> Result<Option<bool>, RuntimeError> {
        if self.in_pos >= self.in_buf.len() {
            self.in_buf.clear();
            self.in_pos = 0;
        }
        let mut chunk = vec![0u8; self.limit];
        let outcome = self.parent.borrow_mut().read(&mut chunk)?;
        match outcome {
            ReadOutcome::Data(n) => {
                self.in_buf.extend_from_slice(&chunk[..n]);
                Ok(Some(n > 0))
            }
            ReadOutcome::Eof => {
                self.parent_eof = true;
                Ok(Some(false))
            }
            ReadOutcome::WouldBlock => Ok(None),
        }
    }

    /// Resolve auto-detection and consume the gzip header when present.
    /// Returns whether decompression may proceed.
    fn prepare_input(&mut self) -> Result<bool, RuntimeError> {
        if self.framing.is_none() {
            let Some(&first) = self.remaining_input().first() else {
                return Ok(false);
            };
            let framing = if first == 0x1F {
                Framing::Gzip
            } else {
                Framing::Zlib
            };
            trace!(?framing, "auto-detected stream format");
            self.install_decompressor(framing)?;
        }
        if !self.header_parsed {
            let consumed = {
                let input = &self.in_buf[self.in_pos..];
                match parse_gzip_header(input)? {
                    Some((header, consumed)) => {
                        self.in_header = Some(header);
                        consumed
                    }
                    None => return Ok(false),
                }
            };
            self.in_pos += consumed;
            self.header_parsed = true;
        }
        Ok(true)
    }

    fn inflate_into(&mut self, out: &mut [u8]) -> Result<usize, RuntimeError> {
        let engine = self
            .decompress
            .as_mut()
            .ok_or_else(|| RuntimeError::CompressStream("stream not initialized".to_string()))?;
        let input = &self.in_buf[self.in_pos..];
        let before_in = engine.total_in();
        let before_out = engine.total_out();
        let status = match engine.decompress(input, out, FlushDecompress::None) {
            Ok(status) => status,
            Err(err) => match err.needs_dictionary() {
                Some(adler) => {
                    let Some(dict) = self.dictionary.clone() else {
                        return Err(RuntimeError::CompressNeedDict { adler });
                    };
                    engine
                        .set_dictionary(&dict)
                        .map_err(|e| RuntimeError::CompressData(e.to_string()))?;
                    let input = &self.in_buf[self.in_pos..];
                    engine
                        .decompress(input, out, FlushDecompress::None)
                        .map_err(|e| RuntimeError::CompressData(e.to_string()))?
                }
                None => return Err(RuntimeError::CompressData(err.to_string())),
            },
        };
        if status == Status::StreamEnd {
            self.stream_end = true;
        }
        let consumed = (engine.total_in() - before_in) as usize;
        let produced = (engine.total_out() - before_out) as usize;
        self.in_pos += consumed;
        self.checksum.update(&out[..produced]);
        Ok(produced)
    }

    /// After gzip stream end, collect and verify the 8-byte trailer.
    /// Returns whether the trailer is complete.
    fn complete_trailer(&mut self) -> Result<bool, RuntimeError> {
        if self.trailer_done {
            return Ok(true);
        }
        while self.trailer_buf.len() < 8 {
            if self.in_pos < self.in_buf.len() {
                let need = 8 - self.trailer_buf.len();
                let take = need.min(self.in_buf.len() - self.in_pos);
                self.trailer_buf
                    .extend_from_slice(&self.in_buf[self.in_pos..self.in_pos + take]);
                self.in_pos += take;
                continue;
            }
            if self.parent_eof {
                return Err(RuntimeError::CompressData(
                    "truncated gzip trailer".to_string(),
                ));
            }
            match self.fill_input()? {
                Some(true) => continue,
                Some(false) => continue,
                None => return Ok(false),
            }
        }
        let crc = u32::from_le_bytes([
            self.trailer_buf[0],
            self.trailer_buf[1],
            self.trailer_buf[2],
            self.trailer_buf[3],
        ]);
        let size = u32::from_le_bytes([
            self.trailer_buf[4],
            self.trailer_buf[5],
            self.trailer_buf[6],
            self.trailer_buf[7],
        ]);
        if crc != self.checksum.value() {
            return Err(RuntimeError::CompressData("gzip checksum mismatch".to_string()));
        }
        if let Some(header) = &mut self.in_header {
            header.size = Some(size);
        } else {
            self.in_header = Some(GzipHeader {
                size: Some(size),
                ..GzipHeader::default()
            });
        }
        self.trailer_done = true;
        Ok(true)
    }

    fn write_downstream(&mut self, data: &[u8]) -> Result<(), RuntimeError> {
        let mut written = 0;
        while written < data.len() {
            written += self.parent.borrow_mut().write(&data[written..])?;
        }
        Ok(())
    }

    fn ensure_header_written(&mut self) -> Result<(), RuntimeError> {
        if self.framing == Some(Framing::Gzip) && !self.header_written {
            let header = self.out_header.clone().unwrap_or_default();
            let bytes = build_gzip_header(&header);
            self.write_downstream(&bytes)?;
            self.header_written = true;
        }
        Ok(())
    }

    fn deflate_all(&mut self, input: &[u8], flush: FlushCompress) -> Result<usize, RuntimeError> {
        let mut consumed_total = 0;
        let mut out = vec![0u8; DEFAULT_BUFFER_SIZE];
        loop {
            let engine = self
                .compress
                .as_mut()
                .ok_or_else(|| RuntimeError::CompressStream("stream not initialized".to_string()))?;
            let before_in = engine.total_in();
            let before_out = engine.total_out();
            let status = engine
                .compress(&input[consumed_total..], &mut out, flush)
                .map_err(|e| RuntimeError::CompressStream(e.to_string()))?;
            let consumed = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            consumed_total += consumed;
            if produced > 0 {
                let chunk = out[..produced].to_vec();
                self.write_downstream(&chunk)?;
            }
            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    break;
                }
                Status::Ok | Status::BufError => {
                    if consumed_total >= input.len() && produced == 0 {
                        break;
                    }
                }
            }
        }
        Ok(consumed_total)
    }

    /// Perform an explicit flush of the compressing side.
    pub fn flush_output(&mut self, mode: FlushMode) -> Result<(), RuntimeError> {
        if self.mode != Mode::Compress {
            return Err(RuntimeError::IoBadOption("-flush".to_string()));
        }
        self.ensure_header_written()?;
        let flush = match mode {
            FlushMode::Sync => FlushCompress::Sync,
            FlushMode::Full => FlushCompress::Full,
            FlushMode::Finish => FlushCompress::Finish,
        };
        self.deflate_all(&[], flush)?;
        if mode == FlushMode::Finish && self.framing == Some(Framing::Gzip) {
            let mut trailer = Vec::with_capacity(8);
            trailer.extend_from_slice(&self.checksum.value().to_le_bytes());
            trailer.extend_from_slice(&(self.total_uncompressed as u32).to_le_bytes());
            self.write_downstream(&trailer)?;
        }
        self.parent.borrow_mut().flush()
    }

    fn kill_timer(&mut self) {
        if let (Some(notifier), Some(timer)) = (&self.notifier, self.timer.take()) {
            notifier.borrow_mut().delete_timer(timer);
        }
    }

    fn update_timer(&mut self) {
        let wants_readable =
            self.interest.readable && self.mode == Mode::Decompress && !self.pending_out.is_empty();
        if wants_readable {
            if self.timer.is_none() {
                if let Some(notifier) = &self.notifier {
                    // The callback itself does nothing; arming a deadline
                    // wakes the event loop, whose poll then sees the
                    // pending data.
                    self.timer = Some(
                        notifier
                            .borrow_mut()
                            .create_timer(SYNTHETIC_EVENT_MS, |_| {}),
                    );
                }
            }
        } else {
            self.kill_timer();
        }
    }
}

impl Channel for ZlibTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open_read(&self) -> bool {
        match self.mode {
            Mode::Decompress => self.read_open,
            Mode::Compress => self.parent.borrow().is_open_read(),
        }
    }

    fn is_open_write(&self) -> bool {
        match self.mode {
            Mode::Compress => self.write_open,
            Mode::Decompress => self.parent.borrow().is_open_write(),
        }
    }

    fn readable(&self) -> bool {
        match self.mode {
            Mode::Compress => self.parent.borrow().readable(),
            Mode::Decompress => {
                self.read_open
                    && (!self.pending_out.is_empty()
                        || self.stream_end
                        || self.in_pos < self.in_buf.len()
                        || self.parent.borrow().readable())
            }
        }
    }

    fn writable(&self) -> bool {
        match self.mode {
            Mode::Compress => self.write_open && self.parent.borrow().writable(),
            Mode::Decompress => self.parent.borrow().writable(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, RuntimeError> {
        if self.mode == Mode::Compress {
            return self.parent.borrow_mut().read(buf);
        }
        if !self.read_open {
            return Err(RuntimeError::IoNotReadable(self.name.clone()));
        }

        let mut got = 0;
        // Deliver already-decompressed pending output first.
        while got < buf.len() {
            match self.pending_out.pop_front() {
                Some(b) => {
                    buf[got] = b;
                    got += 1;
                }
                None => break,
            }
        }

        while got < buf.len() && !self.stream_end {
            if self.remaining_input().is_empty() && !self.parent_eof {
                match self.fill_input()? {
                    Some(_) => {}
                    None => {
                        // Parent cannot deliver now.
                        if got > 0 {
                            self.update_timer();
                            return Ok(ReadOutcome::Data(got));
                        }
                        return Ok(ReadOutcome::WouldBlock);
                    }
                }
            }
            if !self.prepare_input()? {
                // Format detection or the gzip header needs bytes the
                // buffer does not hold yet.
                if self.parent_eof {
                    break;
                }
                match self.fill_input()? {
                    Some(_) => continue,
                    None => {
                        if got > 0 {
                            break;
                        }
                        return Ok(ReadOutcome::WouldBlock);
                    }
                }
            }
            let produced = self.inflate_into(&mut buf[got..])?;
            got += produced;
            if produced == 0 && !self.stream_end {
                if self.parent_eof {
                    // Truncated stream: deliver what exists.
                    break;
                }
                // The decoder stalled; whatever is buffered is not enough
                // to make progress, so go back to the parent for more.
                match self.fill_input()? {
                    Some(_) => continue,
                    None => {
                        if got > 0 {
                            break;
                        }
                        return Ok(ReadOutcome::WouldBlock);
                    }
                }
            }
        }

        if self.stream_end && !self.complete_trailer()? && got == 0 {
            return Ok(ReadOutcome::WouldBlock);
        }

        self.update_timer();
        if got > 0 {
            Ok(ReadOutcome::Data(got))
        } else if self.stream_end || self.parent_eof {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::WouldBlock)
        }
    }

    fn unget(&mut self, bytes: &[u8]) {
        // Bytes come back as decompressed pending output.
        for &b in bytes.iter().rev() {
            self.pending_out.push_front(b);
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, RuntimeError> {
        if self.mode == Mode::Decompress {
            return self.parent.borrow_mut().write(buf);
        }
        if !self.write_open {
            return Err(RuntimeError::IoNotWritable(self.name.clone()));
        }
        // Zero-length writes are not flushes; those are explicit.
        if buf.is_empty() {
            return Ok(0);
        }
        self.ensure_header_written()?;
        let consumed = self.deflate_all(buf, FlushCompress::None)?;
        self.checksum.update(&buf[..consumed]);
        self.total_uncompressed += consumed as u64;
        Ok(consumed)
    }

    fn flush(&mut self) -> Result<(), RuntimeError> {
        if self.mode == Mode::Compress {
            self.flush_output(FlushMode::Sync)
        } else {
            self.parent.borrow_mut().flush()
        }
    }

    fn close_read(&mut self) -> Result<(), RuntimeError> {
        if self.mode == Mode::Compress {
            return self.parent.borrow_mut().close_read();
        }
        self.kill_timer();
        self.pending_out.clear();
        // Bytes past the compressed stream belong to the parent; unget
        // them so a trailer or following data remains readable there.
        if self.in_pos < self.in_buf.len() {
            let leftover = self.in_buf[self.in_pos..].to_vec();
            self.parent.borrow_mut().unget(&leftover);
            self.in_buf.clear();
            self.in_pos = 0;
        }
        self.read_open = false;
        Ok(())
    }

    fn close_write(&mut self) -> Result<(), RuntimeError> {
        if self.mode == Mode::Decompress {
            return self.parent.borrow_mut().close_write();
        }
        if self.write_open && !self.finished {
            self.flush_output(FlushMode::Finish)?;
        }
        self.write_open = false;
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
        self.parent.borrow_mut().set_blocking(blocking);
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn watch(&mut self, interest: Interest) {
        self.interest = interest;
        self.update_timer();
    }

    fn set_option(&mut self, name: &str, value: &Value) -> Result<(), RuntimeError> {
        match name {
            "-dictionary" => {
                if self.format == Format::Gzip {
                    return Err(RuntimeError::IoBadOption(name.to_string()));
                }
                let dict: Vec<u8> = value.get_string().bytes().collect();
                match self.mode {
                    Mode::Compress => {
                        if let Some(engine) = self.compress.as_mut() {
                            engine
                                .set_dictionary(&dict)
                                .map_err(|e| RuntimeError::CompressStream(e.to_string()))?;
                        }
                    }
                    Mode::Decompress => {
                        if self.framing == Some(Framing::Raw) {
                            if let Some(engine) = self.decompress.as_mut() {
                                engine
                                    .set_dictionary(&dict)
                                    .map_err(|e| RuntimeError::CompressData(e.to_string()))?;
                            }
                        }
                    }
                }
                self.dictionary = Some(dict);
                Ok(())
            }
            "-flush" => match value.get_string() {
                "sync" => self.flush_output(FlushMode::Sync),
                "full" => self.flush_output(FlushMode::Full),
                other => Err(RuntimeError::IoBadOption(format!(
                    "unknown -flush type \"{other}\": must be full or sync"
                ))),
            },
            "-limit" => {
                let limit = value.get_int()?;
                if !(1..=MAX_BUFFER_SIZE as i64).contains(&limit) {
                    return Err(RuntimeError::IoBadOption(
                        "-limit must be between 1 and 65536".to_string(),
                    ));
                }
                self.limit = limit as usize;
                Ok(())
            }
            other => Err(RuntimeError::IoBadOption(other.to_string())),
        }
    }

    fn get_option(&self, name: &str) -> Result<Value, RuntimeError> {
        match name {
            "-checksum" => Ok(Value::int(self.checksum.value() as i64)),
            "-dictionary" => {
                if self.format == Format::Gzip {
                    return Err(RuntimeError::IoBadOption(name.to_string()));
                }
                let bytes = self.dictionary.clone().unwrap_or_default();
                let latin1 = encoding::get_encoding("iso8859-1")?;
                Ok(Value::string(latin1.decode(&bytes, ConvFlags::empty())?))
            }
            "-header" => match (self.mode, &self.in_header) {
                (Mode::Decompress, Some(header)) => Ok(header.to_dict()),
                (Mode::Decompress, None) => Ok(GzipHeader::default().to_dict()),
                _ => Err(RuntimeError::IoBadOption(name.to_string())),
            },
            "-limit" => Ok(Value::int(self.limit as i64)),
            other => Err(RuntimeError::IoBadOption(other.to_string())),
        }
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const GZ_FTEXT: u8 = 1 << 0;
const GZ_FHCRC: u8 = 1 << 1;
const GZ_FEXTRA: u8 = 1 << 2;
const GZ_FNAME: u8 = 1 << 3;
const GZ_FCOMMENT: u8 = 1 << 4;

/// Serialize an RFC 1952 header.
fn build_gzip_header(header: &GzipHeader) -> Vec<u8> {
    let mut flags = 0u8;
    if header.text == Some(true) {
        flags |= GZ_FTEXT;
    }
    if header.crc {
        flags |= GZ_FHCRC;
    }
    if header.filename.is_some() {
        flags |= GZ_FNAME;
    }
    if header.comment.is_some() {
        flags |= GZ_FCOMMENT;
    }
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&GZIP_MAGIC);
    out.push(8); // deflate
    out.push(flags);
    out.extend_from_slice(&header.time.to_le_bytes());
    out.push(0); // extra flags
    out.push(header.os.unwrap_or(255));
    if let Some(filename) = &header.filename {
        push_latin1(&mut out, filename, MAX_GZIP_FILENAME);
    }
    if let Some(comment) = &header.comment {
        push_latin1(&mut out, comment, MAX_GZIP_COMMENT);
    }
    if header.crc {
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&(crc as u16).to_le_bytes());
    }
    out
}

fn push_latin1(out: &mut Vec<u8>, s: &str, max_len: usize) {
    let mut n = 0;
    for ch in s.chars() {
        if n >= max_len {
            break;
        }
        out.push(if (ch as u32) < 0x100 { ch as u8 } else { b'?' });
        n += 1;
    }
    out.push(0);
}

/// Parse an RFC 1952 header from the front of `input`. `Ok(None)` means
/// more bytes are needed.
fn parse_gzip_header(input: &[u8]) -> Result<Option<(GzipHeader, usize)>, RuntimeError> {
    if input.len() < 10 {
        return Ok(None);
    }
    if input[..2] != GZIP_MAGIC {
        return Err(RuntimeError::CompressData("bad gzip magic".to_string()));
    }
    if input[2] != 8 {
        return Err(RuntimeError::CompressData(
            "unsupported gzip compression method".to_string(),
        ));
    }
    let flags = input[3];
    let time = u32::from_le_bytes([input[4], input[5], input[6], input[7]]);
    let os = input[9];
    let mut pos = 10;

    if flags & GZ_FEXTRA != 0 {
        if input.len() < pos + 2 {
            return Ok(None);
        }
        let xlen = u16::from_le_bytes([input[pos], input[pos + 1]]) as usize;
        pos += 2;
        if input.len() < pos + xlen {
            return Ok(None);
        }
        pos += xlen;
    }

    let mut filename = None;
    if flags & GZ_FNAME != 0 {
        match take_cstring(input, pos)? {
            Some((s, next)) => {
                filename = Some(s);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    let mut comment = None;
    if flags & GZ_FCOMMENT != 0 {
        match take_cstring(input, pos)? {
            Some((s, next)) => {
                comment = Some(s);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    let crc = flags & GZ_FHCRC != 0;
    if crc {
        if input.len() < pos + 2 {
            return Ok(None);
        }
        let stored = u16::from_le_bytes([input[pos], input[pos + 1]]);
        let computed = (crc32fast::hash(&input[..pos]) & 0xFFFF) as u16;
        if stored != computed {
            return Err(RuntimeError::CompressData(
                "gzip header checksum mismatch".to_string(),
            ));
        }
        pos += 2;
    }

    Ok(Some((
        GzipHeader {
            comment,
            crc,
            filename,
            os: Some(os),
            time,
            text: Some(flags & GZ_FTEXT != 0),
            size: None,
        },
        pos,
    )))
}

/// A NUL-terminated Latin-1 string at `input[pos..]`.
fn take_cstring(input: &[u8], pos: usize) -> Result<Option<(String, usize)>, RuntimeError> {
    let Some(end) = input[pos..].iter().position(|&b| b == 0) else {
        return Ok(None);
    };
    let latin1 = encoding::get_encoding("iso8859-1")?;
    let s = latin1.decode(&input[pos..pos + end], ConvFlags::empty())?;
    Ok(Some((s, pos + end + 1)))
}
