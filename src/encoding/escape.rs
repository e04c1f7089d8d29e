//! Escape-driven multi-charset converter
//!
//! An escape encoding switches between table-driven sub-encodings with
//! in-band escape sequences (the iso2022 family). The piecewise conversion
//! state is the index of the active sub-table. Sub-encodings are addressed
//! by name and resolved through the registry on first use; they hold no
//! back-reference to the escape encoding that uses them.

use super::convert::{
    put_utf8, step_utf8, stop_on_error, ConvFlags, ConvState, ConvStatus, Converted, Utf8Step,
};
use super::table::TableData;

use std::sync::{Arc, OnceLock};
use tracing::warn;

/// One switchable character set inside an escape encoding.
#[derive(Debug)]
pub struct EscapeSubTable {
    /// Name of the sub-encoding, resolved through the registry.
    pub name: String,
    /// Escape sequence selecting this sub-encoding.
    pub sequence: Vec<u8>,
    resolved: OnceLock<Option<Arc<TableData>>>,
}

impl EscapeSubTable {
    pub(crate) fn new(name: String, sequence: Vec<u8>) -> EscapeSubTable {
        EscapeSubTable {
            name,
            sequence,
            resolved: OnceLock::new(),
        }
    }

    fn table(&self) -> Option<&Arc<TableData>> {
        self.resolved
            .get_or_init(|| match super::get_encoding(&self.name) {
                Ok(encoding) => match encoding.table_data() {
                    Some(table) => Some(table),
                    None => {
                        warn!(name = %self.name, "escape sub-encoding is not table-driven");
                        None
                    }
                },
                Err(_) => {
                    warn!(name = %self.name, "escape sub-encoding not loadable");
                    None
                }
            })
            .as_ref()
    }
}

/// Payload of an escape-driven encoding.
#[derive(Debug)]
pub struct EscapeData {
    /// Sequence expected/emitted before the first character.
    pub(crate) init: Vec<u8>,
    /// Sequence expected/emitted after the last character.
    pub(crate) final_seq: Vec<u8>,
    /// First bytes of any recognized sequence.
    pub(crate) lead: [bool; 256],
    /// The switchable sub-encodings; index 0 is the ASCII-like ground set.
    pub(crate) sub_tables: Vec<EscapeSubTable>,
}

impl EscapeData {
    pub(crate) fn new(
        init: Vec<u8>,
        final_seq: Vec<u8>,
        sub_tables: Vec<EscapeSubTable>,
    ) -> EscapeData {
        let mut lead = [false; 256];
        for sub in &sub_tables {
            if let Some(&b) = sub.sequence.first() {
                lead[b as usize] = true;
            }
        }
        if let Some(&b) = init.first() {
            lead[b as usize] = true;
        }
        if let Some(&b) = final_seq.first() {
            lead[b as usize] = true;
        }
        EscapeData {
            init,
            final_seq,
            lead,
            sub_tables,
        }
    }
}

/// Encoding bytes to canonical form.
pub(crate) fn to_canonical(
    data: &EscapeData,
    src: &[u8],
    flags: ConvFlags,
    state: &mut ConvState,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;
    if flags.contains(ConvFlags::START) {
        state.sub_table = 0;
    }
    let mut active: Option<&Arc<TableData>> = None;

    'outer: while read < src.len() {
        let byte = src[read];
        if data.lead[byte as usize] {
            // Possibly the start of an escape sequence. Compare every
            // recognized sequence that fits in the remaining window.
            let left = src.len() - read;
            let mut checked = 0;
            let mut longest = data.init.len().max(data.final_seq.len());

            if !data.init.is_empty() && data.init.len() <= left {
                checked += 1;
                if src[read..].starts_with(&data.init) {
                    read += data.init.len();
                    continue;
                }
            } else if data.init.len() <= left {
                checked += 1;
            }
            if !data.final_seq.is_empty() && data.final_seq.len() <= left {
                checked += 1;
                if src[read..].starts_with(&data.final_seq) {
                    read += data.final_seq.len();
                    continue;
                }
            } else if data.final_seq.len() <= left {
                checked += 1;
            }
            for (i, sub) in data.sub_tables.iter().enumerate() {
                longest = longest.max(sub.sequence.len());
                if sub.sequence.len() <= left {
                    checked += 1;
                    if !sub.sequence.is_empty() && src[read..].starts_with(&sub.sequence) {
                        state.sub_table = i;
                        active = None;
                        read += sub.sequence.len();
                        continue 'outer;
                    }
                }
            }

            // Nothing matched: either the window splits a sequence, or the
            // sequence is unknown.
            if checked == data.sub_tables.len() + 2 || flags.contains(ConvFlags::END) {
                if !stop_on_error(flags) {
                    read += longest.min(left).max(1);
                    continue;
                }
                status = ConvStatus::Syntax;
            } else {
                status = ConvStatus::MultibyteIncomplete;
            }
            break;
        }

        let table = match active {
            Some(t) => t,
            None => match data
                .sub_tables
                .get(state.sub_table)
                .and_then(|sub| sub.table())
            {
                Some(t) => {
                    active = Some(t);
                    t
                }
                None => {
                    status = ConvStatus::Syntax;
                    break;
                }
            },
        };

        let (hi, lo, consumed) = if table.lead[byte as usize] {
            match src.get(read + 1) {
                Some(&trail) => (byte, trail, 2),
                None => {
                    status = if flags.contains(ConvFlags::END) {
                        ConvStatus::Syntax
                    } else {
                        ConvStatus::MultibyteIncomplete
                    };
                    break;
                }
            }
        } else {
            (0, byte, 1)
        };
        let ch = match &table.to_uni[hi as usize] {
            Some(page) => page[lo as usize],
            None => 0,
        };
        let Some(decoded) = char::from_u32(ch as u32) else {
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
    data: &EscapeData,
    src: &[u8],
    flags: ConvFlags,
    state: &mut ConvState,
    dst: &mut [u8],
) -> Converted {
    let mut read = 0;
    let mut wrote = 0;
    let mut chars = 0;
    let mut status = ConvStatus::Ok;

    if flags.contains(ConvFlags::START) {
        state.sub_table = 0;
        if data.init.len() > dst.len() {
            return Converted {
                status: ConvStatus::NoSpace,
                src_read: 0,
                dst_wrote: 0,
                chars: 0,
            };
        }
        dst[..data.init.len()].copy_from_slice(&data.init);
        wrote += data.init.len();
    }

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
        let unit = if cp > 0xFFFF { 0 } else { cp as u16 };

        let Some(current) = data
            .sub_tables
            .get(state.sub_table)
            .and_then(|sub| sub.table())
        else {
            status = ConvStatus::Syntax;
            break;
        };
        let mut table = current;
        let mut word = table.from_unicode(unit);

        if word == 0 && ch != '\0' {
            // Search the other sub-tables for a set that can represent the
            // character, switching state if one is found.
            let old_state = state.sub_table;
            let mut found = None;
            for (i, sub) in data.sub_tables.iter().enumerate() {
                if let Some(candidate) = sub.table() {
                    let w = candidate.from_unicode(unit);
                    if w != 0 {
                        found = Some((i, candidate, w));
                        break;
                    }
                }
            }
            match found {
                Some((i, candidate, w)) => {
                    if i != old_state {
                        let seq = &data.sub_tables[i].sequence;
                        if wrote + seq.len() > dst.len() {
                            // The escape must travel with the character;
                            // leave the state so the next call retries it.
                            status = ConvStatus::NoSpace;
                            break;
                        }
                        dst[wrote..wrote + seq.len()].copy_from_slice(seq);
                        wrote += seq.len();
                        state.sub_table = i;
                    }
                    table = candidate;
                    word = w;
                }
                None => {
                    if stop_on_error(flags) {
                        status = ConvStatus::Unknown;
                        break;
                    }
                    word = table.fallback;
                }
            }
        }

        if table.lead[(word >> 8) as usize] {
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

    if status == ConvStatus::Ok && flags.contains(ConvFlags::END) {
        // Streams must end in the ground set, then the final sequence.
        let ascii_escape = data
            .sub_tables
            .first()
            .map(|sub| sub.sequence.as_slice())
            .unwrap_or(&[]);
        let tail = if state.sub_table != 0 {
            ascii_escape.len() + data.final_seq.len()
        } else {
            data.final_seq.len()
        };
        if wrote + tail > dst.len() {
            status = ConvStatus::NoSpace;
        } else {
            if state.sub_table != 0 {
                dst[wrote..wrote + ascii_escape.len()].copy_from_slice(ascii_escape);
                wrote += ascii_escape.len();
                state.sub_table = 0;
            }
            dst[wrote..wrote + data.final_seq.len()].copy_from_slice(&data.final_seq);
            wrote += data.final_seq.len();
        }
    }

    Converted {
        status,
        src_read: read,
        dst_wrote: wrote,
        chars,
    }
}
