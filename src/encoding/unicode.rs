//! Fixed-width Unicode converters: UTF-16, UCS-2 and UTF-32
//!
//! Byte order comes from the encoding record. Lone surrogates at the tail
//! of a window are reported as incomplete so a piecewise caller can retry
//! with more bytes; in the middle of the stream they are rejected under
//! strict profiles and replaced otherwise.

use super::convert::{
    put_utf8, step_utf8, stop_on_error, ConvFlags, ConvStatus, Converted, Utf8Step,
};

const REPLACEMENT: char = '\u{FFFD}';

/// Fallback byte pair for UCS-2 output of astral characters.
const UCS2_FALLBACK: u16 = 0x003F;

fn unit16(src: &[u8], at: usize, le: bool) -> u16 {
    if le {
        u16::from_le_bytes([src[at], src[at + 1]])
    } else {
        u16::from_be_bytes([src[at], src[at + 1]])
    }
}

fn put16(dst: &mut [u8], at: usize, unit: u16, le: bool) {
    let bytes = if le {
        unit.to_le_bytes()
    } else {
        unit.to_be_bytes()
    };
    dst[at..at + 2].copy_from_slice(&bytes);
}

/// UTF-16 (or UCS-2 when `pairs` is false) bytes to canonical form.
pub(crate) fn utf16_to_canonical(
    src: &[u8],
    flags: ConvFlags,
    le: bool,
    pairs: bool,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;
    let aligned = src.len() & !1;
    if aligned != src.len() {
        status = ConvStatus::MultibyteIncomplete;
    }

    while read + 2 <= aligned {
        let unit = unit16(src, read, le);
        let (ch, consumed) = if pairs && (0xD800..=0xDBFF).contains(&unit) {
            if read + 4 > aligned {
                if !flags.contains(ConvFlags::END) {
                    status = ConvStatus::MultibyteIncomplete;
                    break;
                }
                if stop_on_error(flags) {
                    status = ConvStatus::Syntax;
                    break;
                }
                (REPLACEMENT, 2)
            } else {
                let low = unit16(src, read + 2, le);
                if (0xDC00..=0xDFFF).contains(&low) {
                    let cp =
                        0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                    match char::from_u32(cp) {
                        Some(ch) => (ch, 4),
                        None => (REPLACEMENT, 4),
                    }
                } else {
                    if stop_on_error(flags) {
                        status = ConvStatus::Syntax;
                        break;
                    }
                    (REPLACEMENT, 2)
                }
            }
        } else if (0xD800..=0xDFFF).contains(&unit) {
            if stop_on_error(flags) {
                status = ConvStatus::Syntax;
                break;
            }
            (REPLACEMENT, 2)
        } else {
            match char::from_u32(unit as u32) {
                Some(ch) => (ch, 2),
                None => (REPLACEMENT, 2),
            }
        };
        match put_utf8(ch, dst, wrote) {
            Some(n) => {
                wrote += n;
                read += consumed;
                chars += 1;
            }
            None => {
                status = ConvStatus::NoSpace;
                break;
            }
        }
    }

    if status == ConvStatus::MultibyteIncomplete && flags.contains(ConvFlags::END) && read == aligned
    {
        // A stray trailing byte with no more input coming.
        status = if stop_on_error(flags) {
            ConvStatus::Syntax
        } else {
            ConvStatus::MultibyteIncomplete
        };
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}

/// Canonical form to UTF-16 (or UCS-2 when `pairs` is false) bytes.
pub(crate) fn utf16_from_canonical(
    src: &[u8],
    flags: ConvFlags,
    le: bool,
    pairs: bool,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        match step_utf8(&src[read..]) {
            Utf8Step::Char(ch, len) => {
                let cp = ch as u32;
                if cp > 0xFFFF {
                    if pairs {
                        if wrote + 4 > dst.len() {
                            status = ConvStatus::NoSpace;
                            break;
                        }
                        let v = cp - 0x10000;
                        put16(dst, wrote, 0xD800 + (v >> 10) as u16, le);
                        put16(dst, wrote + 2, 0xDC00 + (v & 0x3FF) as u16, le);
                        wrote += 4;
                    } else {
                        if stop_on_error(flags) {
                            status = ConvStatus::Unknown;
                            break;
                        }
                        if wrote + 2 > dst.len() {
                            status = ConvStatus::NoSpace;
                            break;
                        }
                        put16(dst, wrote, UCS2_FALLBACK, le);
                        wrote += 2;
                    }
                } else {
                    if wrote + 2 > dst.len() {
                        status = ConvStatus::NoSpace;
                        break;
                    }
                    put16(dst, wrote, cp as u16, le);
                    wrote += 2;
                }
                read += len;
                chars += 1;
            }
            Utf8Step::Incomplete => {
                status = if flags.contains(ConvFlags::END) {
                    ConvStatus::Syntax
                } else {
                    ConvStatus::MultibyteIncomplete
                };
                break;
            }
            Utf8Step::Invalid => {
                status = ConvStatus::Syntax;
                break;
            }
        }
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}

/// UTF-32 bytes to canonical form.
pub(crate) fn utf32_to_canonical(
    src: &[u8],
    flags: ConvFlags,
    le: bool,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;
    let aligned = src.len() & !3;
    if aligned != src.len() {
        status = ConvStatus::MultibyteIncomplete;
    }

    while read + 4 <= aligned {
        let cp = if le {
            u32::from_le_bytes([src[read], src[read + 1], src[read + 2], src[read + 3]])
        } else {
            u32::from_be_bytes([src[read], src[read + 1], src[read + 2], src[read + 3]])
        };
        let ch = match char::from_u32(cp) {
            Some(ch) => ch,
            None => {
                if stop_on_error(flags) {
                    status = ConvStatus::Syntax;
                    break;
                }
                REPLACEMENT
            }
        };
        match put_utf8(ch, dst, wrote) {
            Some(n) => {
                wrote += n;
                read += 4;
                chars += 1;
            }
            None => {
                status = ConvStatus::NoSpace;
                break;
            }
        }
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}

/// Canonical form to UTF-32 bytes.
pub(crate) fn utf32_from_canonical(
    src: &[u8],
    flags: ConvFlags,
    le: bool,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        match step_utf8(&src[read..]) {
            Utf8Step::Char(ch, len) => {
                if wrote + 4 > dst.len() {
                    status = ConvStatus::NoSpace;
                    break;
                }
                let bytes = if le {
                    (ch as u32).to_le_bytes()
                } else {
                    (ch as u32).to_be_bytes()
                };
                dst[wrote..wrote + 4].copy_from_slice(&bytes);
                wrote += 4;
                read += len;
                chars += 1;
            }
            Utf8Step::Incomplete => {
                status = if flags.contains(ConvFlags::END) {
                    ConvStatus::Syntax
                } else {
                    ConvStatus::MultibyteIncomplete
                };
                break;
            }
            Utf8Step::Invalid => {
                status = ConvStatus::Syntax;
                break;
            }
        }
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}
