//! External UTF-8 converter
//!
//! Nominally an identity transform, this converter canonicalizes what it
//! passes: malformed sequences and unpaired surrogate encodings are
//! repaired or rejected according to the profile flags, CESU-8 style
//! surrogate pairs are combined, and in modified mode NUL travels
//! externally as the two-byte form `C0 80`.

use super::convert::{
    put_utf8, step_utf8, stop_on_error, ConvFlags, ConvStatus, Converted, Utf8Step,
};

const REPLACEMENT: char = '\u{FFFD}';

/// External UTF-8 bytes to canonical form.
pub(crate) fn to_canonical(src: &[u8], flags: ConvFlags, dst: &mut [u8]) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        let b = src[read];

        // Fast path: ASCII copies through.
        if b < 0x80 {
            if wrote >= dst.len() {
                status = ConvStatus::NoSpace;
                break;
            }
            dst[wrote] = b;
            wrote += 1;
            read += 1;
            chars += 1;
            continue;
        }

        // Modified-mode NUL: C0 80 denotes an embedded zero byte.
        if b == 0xC0 && src.get(read + 1) == Some(&0x80) {
            if flags.contains(ConvFlags::STRICT) {
                status = ConvStatus::Syntax;
                break;
            }
            if flags.contains(ConvFlags::MODIFIED) {
                if wrote >= dst.len() {
                    status = ConvStatus::NoSpace;
                    break;
                }
                dst[wrote] = 0;
                wrote += 1;
                read += 2;
                chars += 1;
                continue;
            }
        }

        match step_utf8(&src[read..]) {
            Utf8Step::Char(ch, len) => {
                match put_utf8(ch, dst, wrote) {
                    Some(n) => {
                        wrote += n;
                        read += len;
                        chars += 1;
                    }
                    None => {
                        status = ConvStatus::NoSpace;
                        break;
                    }
                }
            }
            Utf8Step::Incomplete => {
                if !flags.contains(ConvFlags::END) {
                    status = ConvStatus::MultibyteIncomplete;
                    break;
                }
                if stop_on_error(flags) {
                    status = ConvStatus::Syntax;
                    break;
                }
                // Trailing garbage at declared end of input: each byte
                // stands for itself.
                match put_utf8(src[read] as char, dst, wrote) {
                    Some(n) => {
                        wrote += n;
                        read += 1;
                        chars += 1;
                    }
                    None => {
                        status = ConvStatus::NoSpace;
                        break;
                    }
                }
            }
            Utf8Step::Invalid => {
                // Surrogate encodings arrive here; a high/low pair is the
                // CESU-8 form of one astral character.
                if let Some((ch, len)) = take_surrogate_pair(&src[read..]) {
                    match put_utf8(ch, dst, wrote) {
                        Some(n) => {
                            wrote += n;
                            read += len;
                            chars += 1;
                        }
                        None => {
                            status = ConvStatus::NoSpace;
                            break;
                        }
                    }
                    continue;
                }
                if is_lone_surrogate(&src[read..]) {
                    if stop_on_error(flags) {
                        status = if flags.contains(ConvFlags::MODIFIED) {
                            ConvStatus::Syntax
                        } else {
                            ConvStatus::Unknown
                        };
                        break;
                    }
                    match put_utf8(REPLACEMENT, dst, wrote) {
                        Some(n) => {
                            wrote += n;
                            read += 3;
                            chars += 1;
                        }
                        None => {
                            status = ConvStatus::NoSpace;
                            break;
                        }
                    }
                    continue;
                }
                if stop_on_error(flags) {
                    status = ConvStatus::Syntax;
                    break;
                }
                match put_utf8(src[read] as char, dst, wrote) {
                    Some(n) => {
                        wrote += n;
                        read += 1;
                        chars += 1;
                    }
                    None => {
                        status = ConvStatus::NoSpace;
                        break;
                    }
                }
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

/// Canonical form to external UTF-8 bytes.
pub(crate) fn from_canonical(src: &[u8], flags: ConvFlags, dst: &mut [u8]) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        match step_utf8(&src[read..]) {
            Utf8Step::Char('\0', len) if flags.contains(ConvFlags::MODIFIED) => {
                if wrote + 2 > dst.len() {
                    status = ConvStatus::NoSpace;
                    break;
                }
                dst[wrote] = 0xC0;
                dst[wrote + 1] = 0x80;
                wrote += 2;
                read += len;
                chars += 1;
            }
            Utf8Step::Char(_, len) => {
                if wrote + len > dst.len() {
                    status = ConvStatus::NoSpace;
                    break;
                }
                dst[wrote..wrote + len].copy_from_slice(&src[read..read + len]);
                wrote += len;
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

/// Decode a 3-byte UTF-8 surrogate encoding at the head of `src`, returning
/// the raw surrogate value.
fn surrogate_at(src: &[u8]) -> Option<u32> {
    if src.len() < 3 {
        return None;
    }
    if src[0] != 0xED || src[1] & 0xC0 != 0x80 || src[2] & 0xC0 != 0x80 {
        return None;
    }
    let v = 0xD000 | ((src[1] as u32 & 0x3F) << 6) | (src[2] as u32 & 0x3F);
    (0xD800..=0xDFFF).contains(&v).then_some(v)
}

fn is_lone_surrogate(src: &[u8]) -> bool {
    surrogate_at(src).is_some()
}

/// A CESU-8 high/low surrogate pair combined into one character.
fn take_surrogate_pair(src: &[u8]) -> Option<(char, usize)> {
    let high = surrogate_at(src)?;
    if !(0xD800..=0xDBFF).contains(&high) {
        return None;
    }
    let low = surrogate_at(&src[3..])?;
    if !(0xDC00..=0xDFFF).contains(&low) {
        return None;
    }
    let cp = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
    char::from_u32(cp).map(|ch| (ch, 6))
}
