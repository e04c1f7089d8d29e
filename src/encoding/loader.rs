//! Encoding descriptor files
//!
//! Descriptors are text files. Comment lines (`#`) may precede a single
//! type letter — `S`ingle, `D`ouble, `M`ultibyte or `E`scape. Table
//! payloads carry a `FFFF SSSS NNN` header (fallback character, symbol
//! flag, page count) followed by hex pages, optionally closed by an `R`
//! section overriding reverse mappings. Escape payloads are key/value
//! lines: `name`, `init`, `final`, and one line per sub-encoding.

use super::escape::{EscapeData, EscapeSubTable};
use super::table::TableData;
use crate::consts::MAX_ESCAPE_LEN;
use crate::error::RuntimeError;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of table descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    Single,
    Double,
    Multi,
}

/// A parsed descriptor, ready to become an encoding record.
#[derive(Debug)]
pub(crate) enum Descriptor {
    Table { kind: TableKind, data: TableData },
    Escape(EscapeData),
}

fn invalid(name: &str) -> RuntimeError {
    RuntimeError::EncodingInvalid(name.to_string())
}

/// Parse descriptor text into a payload.
pub(crate) fn parse_descriptor(name: &str, text: &str) -> Result<Descriptor, RuntimeError> {
    let mut lines = text.lines().filter(|l| !l.trim_start().starts_with('#'));
    let type_line = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| invalid(name))?;
    match type_line.trim() {
        "S" => parse_table(name, TableKind::Single, lines),
        "D" => parse_table(name, TableKind::Double, lines),
        "M" => parse_table(name, TableKind::Multi, lines),
        "E" => parse_escape(name, lines),
        _ => Err(invalid(name)),
    }
}

fn hex16(s: &str) -> Option<u16> {
    u16::from_str_radix(s, 16).ok()
}

fn parse_table<'a>(
    name: &str,
    kind: TableKind,
    mut lines: impl Iterator<Item = &'a str>,
) -> Result<Descriptor, RuntimeError> {
    let header = lines.next().ok_or_else(|| invalid(name))?;
    let mut fields = header.split_whitespace();
    let fallback = fields.next().and_then(hex16).ok_or_else(|| invalid(name))?;
    let symbol = fields
        .next()
        .and_then(|f| f.parse::<i32>().ok())
        .ok_or_else(|| invalid(name))?
        != 0;
    let num_pages = fields
        .next()
        .and_then(|f| f.parse::<i64>().ok())
        .ok_or_else(|| invalid(name))?
        .clamp(0, 256) as usize;

    let mut data = TableData::new(fallback);
    let mut used = [false; 256];

    for _ in 0..num_pages {
        let page_line = lines
            .by_ref()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| invalid(name))?;
        let hi = hex16(page_line.trim()).ok_or_else(|| invalid(name))? as usize;
        if hi > 255 {
            return Err(invalid(name));
        }
        let mut page: Box<[u16; 256]> = Box::new([0u16; 256]);
        for row in 0..16 {
            let line = lines.next().ok_or_else(|| invalid(name))?;
            let line = line.trim();
            if line.len() < 64 {
                return Err(invalid(name));
            }
            for col in 0..16 {
                let quad = line.get(col * 4..col * 4 + 4).ok_or_else(|| invalid(name))?;
                let word = hex16(quad).ok_or_else(|| invalid(name))?;
                if word != 0 {
                    used[(word >> 8) as usize] = true;
                }
                page[row * 16 + col] = word;
            }
        }
        data.to_uni[hi] = Some(page);
    }

    // Lead bytes: every byte for double-byte encodings, otherwise the
    // populated pages above page zero.
    match kind {
        TableKind::Double => data.lead = [true; 256],
        _ => {
            for hi in 1..256 {
                if data.to_uni[hi].is_some() {
                    data.lead[hi] = true;
                }
            }
        }
    }

    // Invert the forward table to produce the reverse mapping.
    if symbol {
        used[0] = true;
    }
    for hi in 0..256usize {
        let Some(page) = &data.to_uni[hi] else {
            continue;
        };
        let entries: Vec<(u16, u16)> = (0..256)
            .filter_map(|lo| {
                let ch = page[lo];
                (ch != 0).then_some((ch, ((hi as u16) << 8) | lo as u16))
            })
            .collect();
        for (ch, word) in entries {
            data.set_from_unicode(ch, word);
        }
    }

    if kind == TableKind::Multi {
        // Multibyte encodings must map backslash so native path separators
        // survive the round trip.
        if data.from_unicode(b'\\' as u16) == 0 {
            data.set_from_unicode(b'\\' as u16, b'\\' as u16);
        }
    }

    if symbol {
        // Symbol fonts: code points on page zero also map to themselves so
        // plain ASCII renders through the font's glyph range.
        if let Some(page0) = &data.to_uni[0] {
            let identity: Vec<u16> = (0..256)
                .filter(|&lo| page0[lo as usize] != 0)
                .collect();
            for lo in identity {
                data.set_from_unicode(lo, lo);
            }
        }
    }

    // Optional trailing reverse-mapping override.
    if let Some(first) = lines.by_ref().find(|l| !l.trim().is_empty()) {
        if first.trim_start().starts_with('R') {
            for line in lines {
                let mut fields = line.split_whitespace();
                let Some(to) = fields.next().and_then(hex16) else {
                    continue;
                };
                if to == 0 {
                    continue;
                }
                for from in fields.filter_map(hex16) {
                    if from != 0 {
                        data.set_from_unicode(from, to);
                    }
                }
            }
        }
    }

    Ok(Descriptor::Table { kind, data })
}

fn parse_escape<'a>(
    name: &str,
    lines: impl Iterator<Item = &'a str>,
) -> Result<Descriptor, RuntimeError> {
    let mut init = Vec::new();
    let mut final_seq = Vec::new();
    let mut sub_tables = Vec::new();

    for line in lines {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key {
            "name" => {}
            "init" => init = sequence_value(value),
            "final" => final_seq = sequence_value(value),
            _ => {
                let mut sequence = sequence_value(value);
                sequence.truncate(MAX_ESCAPE_LEN);
                sub_tables.push(EscapeSubTable::new(key.to_string(), sequence));
            }
        }
    }

    if sub_tables.is_empty() {
        return Err(invalid(name));
    }
    init.truncate(MAX_ESCAPE_LEN);
    final_seq.truncate(MAX_ESCAPE_LEN);
    Ok(Descriptor::Escape(EscapeData::new(init, final_seq, sub_tables)))
}

/// A sequence field; `{}` is the empty sequence, matching the list
/// quoting the descriptor files use.
fn sequence_value(s: &str) -> Vec<u8> {
    if s == "{}" {
        return Vec::new();
    }
    unescape_sequence(s)
}

/// Escape sequences appear either as literal bytes or as `\xNN` escapes.
fn unescape_sequence(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(hex) = s.get(i + 2..i + 4) {
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Read and parse a descriptor file.
pub(crate) fn load_descriptor_file(name: &str, path: &Path) -> Result<Descriptor, RuntimeError> {
    debug!(name, path = %path.display(), "loading encoding descriptor");
    let text = fs::read_to_string(path)
        .map_err(|_| RuntimeError::EncodingUnknown(name.to_string()))?;
    parse_descriptor(name, &text)
}

/// Names and locations of every descriptor directly inside `dir`.
pub(crate) fn scan_directory(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("enc") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.push((stem.to_string(), path));
        }
    }
    found
}
