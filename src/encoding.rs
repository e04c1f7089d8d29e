//! Encoding registry and streaming converters
//!
//! Text enters the runtime as external bytes and is held internally in a
//! canonical UTF-8 form. Named encodings convert between the two, either in
//! one shot ([`Encoding::decode`]/[`Encoding::encode`]) or incrementally
//! with explicit state and status reporting. The registry is process-wide:
//! lookups hit a mutex-guarded table and fall back to descriptor files
//! found on the search path.

use crate::consts::ENCODING_PATH_VAR;
use crate::error::RuntimeError;

use itertools::Itertools;
use parking_lot::Mutex;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

pub mod convert;
mod escape;
mod loader;
mod table;
mod unicode;
mod utf8;

pub use convert::{ConvFlags, ConvState, ConvStatus, Converted};

use escape::EscapeData;
use loader::{Descriptor, TableKind};
use table::TableData;

#[derive(Debug)]
enum Engine {
    /// No translation; bytes copy straight through.
    Binary,
    /// Canonicalizing UTF-8 passthrough.
    Utf8,
    Utf16 { le: bool },
    Ucs2 { le: bool },
    Utf32 { le: bool },
    Table(Arc<TableData>),
    Escape(Arc<EscapeData>),
}

#[derive(Debug)]
struct Record {
    name: String,
    nul_width: u8,
    engine: Engine,
}

/// A handle on a named encoding. Handles are cheap to clone; an encoding
/// stays alive as long as any handle does, even after the registry entry
/// has been replaced by a newer registration under the same name.
#[derive(Debug, Clone)]
pub struct Encoding(Arc<Record>);

impl Encoding {
    fn new(name: impl Into<String>, nul_width: u8, engine: Engine) -> Encoding {
        Encoding(Arc::new(Record {
            name: name.into(),
            nul_width,
            engine,
        }))
    }

    /// Name under which the encoding was registered.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Width in bytes of the terminating NUL in this encoding (1, 2 or 4).
    pub fn nul_width(&self) -> u8 {
        self.0.nul_width
    }

    /// Length in bytes of a NUL-terminated string in this encoding,
    /// honoring the encoding's terminator width. The whole buffer when no
    /// terminator is present.
    pub fn terminated_length(&self, bytes: &[u8]) -> usize {
        let width = self.0.nul_width as usize;
        let mut i = 0;
        while i + width <= bytes.len() {
            if bytes[i..i + width].iter().all(|&b| b == 0) {
                return i;
            }
            i += width;
        }
        bytes.len()
    }

    pub(crate) fn table_data(&self) -> Option<Arc<TableData>> {
        match &self.0.engine {
            Engine::Table(t) => Some(t.clone()),
            _ => None,
        }
    }

    /// Convert external bytes to canonical form, incrementally. The state
    /// is reset by [`ConvFlags::START`] and must be carried between chunks.
    pub fn to_canonical(
        &self,
        src: &[u8],
        state: &mut ConvState,
        flags: ConvFlags,
        dst: &mut [u8],
    ) -> Converted {
        match &self.0.engine {
            Engine::Binary => copy_through(src, dst),
            Engine::Utf8 => utf8::to_canonical(src, flags, dst),
            Engine::Utf16 { le } => unicode::utf16_to_canonical(src, flags, *le, true, dst),
            Engine::Ucs2 { le } => unicode::utf16_to_canonical(src, flags, *le, false, dst),
            Engine::Utf32 { le } => unicode::utf32_to_canonical(src, flags, *le, dst),
            Engine::Table(t) => table::to_canonical(t, src, flags, dst),
            Engine::Escape(e) => escape::to_canonical(e, src, flags, state, dst),
        }
    }

    /// Convert canonical form to external bytes, incrementally.
    pub fn from_canonical(
        &self,
        src: &[u8],
        state: &mut ConvState,
        flags: ConvFlags,
        dst: &mut [u8],
    ) -> Converted {
        match &self.0.engine {
            Engine::Binary => copy_through(src, dst),
            Engine::Utf8 => utf8::from_canonical(src, flags, dst),
            Engine::Utf16 { le } => unicode::utf16_from_canonical(src, flags, *le, true, dst),
            Engine::Ucs2 { le } => unicode::utf16_from_canonical(src, flags, *le, false, dst),
            Engine::Utf32 { le } => unicode::utf32_from_canonical(src, flags, *le, dst),
            Engine::Table(t) => table::from_canonical(t, src, flags, dst),
            Engine::Escape(e) => escape::from_canonical(e, src, flags, state, dst),
        }
    }

    /// Whole-buffer decode to a canonical string, growing the output as
    /// needed. Recoverable `NoSpace` statuses are absorbed; everything else
    /// maps to the corresponding error with the failing source index.
    pub fn decode(&self, src: &[u8], flags: ConvFlags) -> Result<String, RuntimeError> {
        let bytes = self.run_whole(src, flags, true)?;
        String::from_utf8(bytes).map_err(|_| RuntimeError::EncodingInvalid(self.0.name.clone()))
    }

    /// Whole-buffer encode of a canonical string into external bytes.
    pub fn encode(&self, src: &str, flags: ConvFlags) -> Result<Vec<u8>, RuntimeError> {
        self.run_whole(src.as_bytes(), flags, false)
    }

    fn run_whole(
        &self,
        src: &[u8],
        flags: ConvFlags,
        to_canonical: bool,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; (src.len() * 2).max(64)];
        let mut state = ConvState::default();
        let mut flags = flags | ConvFlags::WHOLE;
        let mut consumed = 0;
        loop {
            let res = if to_canonical {
                self.to_canonical(&src[consumed..], &mut state, flags, &mut buf)
            } else {
                self.from_canonical(&src[consumed..], &mut state, flags, &mut buf)
            };
            out.extend_from_slice(&buf[..res.dst_wrote]);
            consumed += res.src_read;
            flags.remove(ConvFlags::START);
            match res.status {
                ConvStatus::Ok => return Ok(out),
                ConvStatus::NoSpace => {
                    let doubled = buf.len() * 2;
                    buf.resize(doubled, 0);
                }
                ConvStatus::MultibyteIncomplete => {
                    return Err(RuntimeError::ConvertMultibyteIncomplete(consumed));
                }
                ConvStatus::Syntax => return Err(RuntimeError::ConvertSyntax(consumed)),
                ConvStatus::Unknown => return Err(RuntimeError::ConvertUnknown(consumed)),
            }
        }
    }
}

fn copy_through(src: &[u8], dst: &mut [u8]) -> Converted {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    Converted {
        status: if n < src.len() {
            ConvStatus::NoSpace
        } else {
            ConvStatus::Ok
        },
        src_read: n,
        dst_wrote: n,
        chars: n,
    }
}

#[derive(Debug, Default)]
struct Registry {
    initialized: bool,
    encodings: HashMap<String, Encoding>,
    system: Option<Encoding>,
    search_path: Vec<PathBuf>,
    file_map: HashMap<String, PathBuf>,
    file_map_filled: bool,
}

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let mut guard = REGISTRY.lock();
    let registry = guard.get_or_insert_with(Registry::default);
    if !registry.initialized {
        registry.initialized = true;
        install_builtins(registry);
        registry.search_path = env::var_os(ENCODING_PATH_VAR)
            .map(|raw| env::split_paths(&raw).collect())
            .unwrap_or_default();
    }
    f(registry)
}

fn install_builtins(registry: &mut Registry) {
    let mut add = |e: Encoding| {
        registry.encodings.insert(e.name().to_string(), e);
    };
    add(Encoding::new("identity", 1, Engine::Binary));
    add(Encoding::new("utf-8", 1, Engine::Utf8));
    add(Encoding::new("utf-16le", 2, Engine::Utf16 { le: true }));
    add(Encoding::new("utf-16be", 2, Engine::Utf16 { le: false }));
    add(Encoding::new("utf-16", 2, Engine::Utf16 { le: true }));
    add(Encoding::new("ucs-2le", 2, Engine::Ucs2 { le: true }));
    add(Encoding::new("ucs-2be", 2, Engine::Ucs2 { le: false }));
    add(Encoding::new("ucs-2", 2, Engine::Ucs2 { le: true }));
    add(Encoding::new("utf-32le", 4, Engine::Utf32 { le: true }));
    add(Encoding::new("utf-32be", 4, Engine::Utf32 { le: false }));
    add(Encoding::new("utf-32", 4, Engine::Utf32 { le: true }));
    add(Encoding::new(
        "iso8859-1",
        1,
        Engine::Table(Arc::new(TableData::latin1())),
    ));
}

fn descriptor_to_encoding(name: &str, descriptor: Descriptor) -> Encoding {
    match descriptor {
        Descriptor::Table { kind, data } => {
            let nul_width = if kind == TableKind::Double { 2 } else { 1 };
            Encoding::new(name, nul_width, Engine::Table(Arc::new(data)))
        }
        Descriptor::Escape(data) => Encoding::new(name, 1, Engine::Escape(Arc::new(data))),
    }
}

/// Fetch an encoding by name, loading it from the descriptor search path
/// when it is not yet registered.
pub fn get_encoding(name: &str) -> Result<Encoding, RuntimeError> {
    let found = with_registry(|registry| registry.locate(name));
    match found {
        Some(Located::Ready(encoding)) => Ok(encoding),
        Some(Located::OnDisk(path)) => {
            // Parse outside the registry lock; escape descriptors may touch
            // the registry again when their sub-encodings resolve.
            let descriptor = loader::load_descriptor_file(name, &path)?;
            let encoding = descriptor_to_encoding(name, descriptor);
            with_registry(|registry| {
                registry
                    .encodings
                    .insert(name.to_string(), encoding.clone());
            });
            debug!(name, "encoding loaded from descriptor file");
            Ok(encoding)
        }
        None => Err(RuntimeError::EncodingUnknown(name.to_string())),
    }
}

enum Located {
    Ready(Encoding),
    OnDisk(PathBuf),
}

impl Registry {
    fn fill_file_map(&mut self) {
        if self.file_map_filled {
            return;
        }
        self.file_map_filled = true;
        // First directory wins, matching search order.
        for dir in self.search_path.clone() {
            for (name, path) in loader::scan_directory(&dir) {
                self.file_map.entry(name).or_insert(path);
            }
        }
    }

    fn locate(&mut self, name: &str) -> Option<Located> {
        if let Some(e) = self.encodings.get(name) {
            return Some(Located::Ready(e.clone()));
        }
        self.fill_file_map();
        self.file_map.get(name).cloned().map(Located::OnDisk)
    }
}

/// Register an encoding parsed from descriptor text. A registration under
/// an existing name hides the old record from lookup; live handles keep it
/// working until they drop.
pub fn register_descriptor(name: &str, text: &str) -> Result<Encoding, RuntimeError> {
    let descriptor = loader::parse_descriptor(name, text)?;
    let encoding = descriptor_to_encoding(name, descriptor);
    with_registry(|registry| {
        registry
            .encodings
            .insert(name.to_string(), encoding.clone());
    });
    debug!(name, "encoding registered");
    Ok(encoding)
}

/// The encoding used for text crossing the process boundary by default.
pub fn system_encoding() -> Encoding {
    with_registry(|registry| match &registry.system {
        Some(e) => e.clone(),
        None => {
            let utf8 = registry.encodings["utf-8"].clone();
            registry.system = Some(utf8.clone());
            utf8
        }
    })
}

/// Replace the system encoding.
pub fn set_system_encoding(name: &str) -> Result<(), RuntimeError> {
    let encoding = get_encoding(name)?;
    with_registry(|registry| registry.system = Some(encoding));
    Ok(())
}

/// Names of every registered encoding plus every descriptor discoverable
/// on the search path, sorted and de-duplicated.
pub fn encoding_names() -> Vec<String> {
    with_registry(|registry| {
        registry.fill_file_map();
        registry
            .encodings
            .keys()
            .chain(registry.file_map.keys())
            .cloned()
            .unique()
            .sorted()
            .collect()
    })
}

/// Replace the descriptor search path and invalidate the cached file map.
pub fn set_encoding_search_path(paths: Vec<PathBuf>) {
    with_registry(|registry| {
        registry.search_path = paths;
        registry.file_map.clear();
        registry.file_map_filled = false;
    });
}

/// The current descriptor search path.
pub fn encoding_search_path() -> Vec<PathBuf> {
    with_registry(|registry| registry.search_path.clone())
}

/// Tear the registry down. Entries are drained by repeatedly removing the
/// first one: dropping an escape encoding releases its sub-encodings, which
/// may themselves be registry entries.
pub(crate) fn finalize_encodings() {
    let mut guard = REGISTRY.lock();
    if let Some(registry) = guard.as_mut() {
        registry.system = None;
        while let Some(name) = registry.encodings.keys().next().cloned() {
            let dropped = registry.encodings.remove(&name);
            drop(dropped);
        }
        registry.file_map.clear();
        registry.file_map_filled = false;
        registry.initialized = false;
    }
}
