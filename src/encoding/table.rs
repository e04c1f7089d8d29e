//! Table-driven single/double/multibyte converters
//!
//! Both directions go through two-level 256-page sparse tables. The lead
//! byte set marks which bytes open a two-byte sequence; for double-byte
//! encodings every byte is a lead byte, for multibyte encodings the set is
//! derived from the populated pages.

use super::convert::{put_utf8, step_utf8, stop_on_error, ConvFlags, ConvStatus, Converted, Utf8Step};

type Page = Box<[u16; 256]>;

/// Payload of a table-driven encoding.
#[derive(Debug)]
pub struct TableData {
    /// Byte (or byte pair) substituted for unrepresentable characters.
    pub(crate) fallback: u16,
    /// Bytes that open a two-byte sequence.
    pub(crate) lead: [bool; 256],
    /// Encoding bytes to Unicode; page `0` holds the single-byte plane.
    pub(crate) to_uni: Vec<Option<Page>>,
    /// Unicode to encoding bytes.
    pub(crate) from_uni: Vec<Option<Page>>,
}

impl TableData {
    pub(crate) fn new(fallback: u16) -> TableData {
        let mut to_uni = Vec::with_capacity(256);
        let mut from_uni = Vec::with_capacity(256);
        to_uni.resize_with(256, || None);
        from_uni.resize_with(256, || None);
        TableData {
            fallback,
            lead: [false; 256],
            to_uni,
            from_uni,
        }
    }

    /// The identity table for ISO 8859-1: bytes are the first 256 code
    /// points.
    pub(crate) fn latin1() -> TableData {
        let mut data = TableData::new(0x3F);
        let mut to_page: Page = Box::new([0u16; 256]);
        let mut from_page: Page = Box::new([0u16; 256]);
        for b in 0..256 {
            to_page[b] = b as u16;
            from_page[b] = b as u16;
        }
        data.to_uni[0] = Some(to_page);
        data.from_uni[0] = Some(from_page);
        data
    }

    fn to_unicode(&self, page: u8, cell: u8) -> u16 {
        match &self.to_uni[page as usize] {
            Some(p) => p[cell as usize],
            None => 0,
        }
    }

    pub(crate) fn from_unicode(&self, ch: u16) -> u16 {
        match &self.from_uni[(ch >> 8) as usize] {
            Some(p) => p[(ch & 0xFF) as usize],
            None => 0,
        }
    }

    pub(crate) fn set_from_unicode(&mut self, ch: u16, word: u16) {
        let page = self.from_uni[(ch >> 8) as usize].get_or_insert_with(|| Box::new([0u16; 256]));
        page[(ch & 0xFF) as usize] = word;
    }
}

/// Encoding bytes to canonical form.
pub(crate) fn to_canonical(
    data: &TableData,
    src: &[u8],
    flags: ConvFlags,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        let byte = src[read];
        let (mut ch, mut consumed) = if data.lead[byte as usize] {
            match src.get(read + 1) {
                Some(&trail) => (data.to_unicode(byte, trail), 2),
                None => {
                    if !flags.contains(ConvFlags::END) {
                        status = ConvStatus::MultibyteIncomplete;
                        break;
                    }
                    if stop_on_error(flags) {
                        status = ConvStatus::Syntax;
                        break;
                    }
                    (0, 1)
                }
            }
        } else {
            (data.to_unicode(0, byte), 1)
        };
        if ch == 0 && byte != 0 {
            if stop_on_error(flags) {
                status = ConvStatus::Syntax;
                break;
            }
            // Unmapped bytes stand for themselves, one at a time.
            ch = byte as u16;
            consumed = 1;
        }
        let Some(decoded) = char::from_u32(ch as u32) else {
            if stop_on_error(flags) {
                status = ConvStatus::Syntax;
                break;
            }
            read += consumed;
            continue;
        };
        match put_utf8(decoded, dst, wrote) {
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

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}

/// Canonical form to encoding bytes.
pub(crate) fn from_canonical(
    data: &TableData,
    src: &[u8],
    flags: ConvFlags,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    while read < src.len() {
        let (ch, len) = match step_utf8(&src[read..]) {
            Utf8Step::Char(ch, len) => (ch, len),
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
        };
        let cp = ch as u32;
        // Characters beyond the BMP have no table representation.
        let mut word = if cp > 0xFFFF {
            0
        } else {
            data.from_unicode(cp as u16)
        };
        if word == 0 && ch != '\0' {
            if stop_on_error(flags) {
                status = ConvStatus::Unknown;
                break;
            }
            word = data.fallback;
        }
        if data.lead[(word >> 8) as usize] {
            if wrote + 2 > dst.len() {
                status = ConvStatus::NoSpace;
                break;
            }
            dst[wrote] = (word >> 8) as u8;
            dst[wrote + 1] = word as u8;
            wrote += 2;
        } else {
            if wrote >= dst.len() {
                status = ConvStatus::NoSpace;
                break;
            }
            dst[wrote] = word as u8;
            wrote += 1;
        }
        read += len;
        chars += 1;
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}
