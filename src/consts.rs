//! Runtime parameters

/// Maximum number of elements any list-shaped value may hold.
pub const MAX_LIST_LEN: u64 = i32::MAX as u64;

/// Default size for channel transform buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Upper bound for transform buffers and the decompression read-ahead limit.
pub const MAX_BUFFER_SIZE: usize = 65536;

/// Default read-ahead limit for decompressing transforms.
pub const DEFAULT_READ_AHEAD: usize = DEFAULT_BUFFER_SIZE;

/// Delay before a synthesized channel readable event fires, in milliseconds.
/// Long enough for a real event to overtake it.
pub const SYNTHETIC_EVENT_MS: u64 = 10;

/// Longest escape sequence accepted in an escape-set encoding descriptor.
pub const MAX_ESCAPE_LEN: usize = 16;

/// Byte length clamp for a filename stored in a gzip header.
pub const MAX_GZIP_FILENAME: usize = 1024 - 1;

/// Byte length clamp for a comment stored in a gzip header.
pub const MAX_GZIP_COMMENT: usize = 256 - 1;

/// Widest UTF-8 sequence the converters emit for one character.
pub const UTF_MAX: usize = 4;

/// Environment variable naming the encoding descriptor search path.
pub const ENCODING_PATH_VAR: &str = "EMBRA_ENCODING_PATH";
