//! Polymorphic values with dual string/internal representations
//!
//! A [`Value`] is a cheaply clonable shared handle. Every value has a
//! canonical UTF-8 string form, synthesized lazily from the internal
//! representation and cached; mutators go through [`Value::rep_mut`], which
//! duplicates the payload when the handle is shared and invalidates the
//! cached string. The internal representation is an enum of built-in
//! variants plus a trait-object escape hatch for user-registered types.

use crate::error::RuntimeError;
use crate::series::Series;

use dyn_clone::DynClone;
use parking_lot::Mutex;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub mod list;

pub use list::ListRep;

/// Internal representation of a value.
#[derive(Debug)]
pub enum Rep {
    /// No internal form; the string form is authoritative.
    Pure,
    /// 64-bit signed integer.
    Int(i64),
    /// IEEE double.
    Double(f64),
    /// Concrete list of child values.
    List(Vec<Value>),
    /// Arithmetic series: a lazy list described by start/end/step.
    Series(Series),
    /// A user-registered representation.
    Extension(Box<dyn ExtensionRep>),
}

impl Clone for Rep {
    fn clone(&self) -> Self {
        match self {
            Rep::Pure => Rep::Pure,
            Rep::Int(i) => Rep::Int(*i),
            Rep::Double(d) => Rep::Double(*d),
            Rep::List(items) => Rep::List(items.clone()),
            Rep::Series(s) => Rep::Series(s.clone()),
            Rep::Extension(e) => Rep::Extension(dyn_clone::clone_box(&**e)),
        }
    }
}

/// The hooks a user-registered representation must supply. `DynClone` stands
/// in for the duplicate hook; the string hook synthesizes the canonical form.
pub trait ExtensionRep: DynClone + fmt::Debug {
    /// Name of the type, as used with [`Value::convert_to`].
    fn type_name(&self) -> &str;

    /// Synthesize the canonical string form.
    fn update_string(&self) -> String;

    /// List-interface view, when this representation can serve list
    /// operations without materializing elements.
    fn as_list(&self) -> Option<&dyn ListRep> {
        None
    }

    /// Mutable list-interface view.
    fn as_list_mut(&mut self) -> Option<&mut dyn ListRep> {
        None
    }
}

dyn_clone::clone_trait_object!(ExtensionRep);

#[derive(Debug, Clone)]
struct Inner {
    string: OnceLock<Box<str>>,
    rep: Rep,
}

/// A shared, copy-on-write runtime value.
#[derive(Debug, Clone)]
pub struct Value(Arc<Inner>);

impl Value {
    fn from_parts(string: Option<Box<str>>, rep: Rep) -> Self {
        let cell = OnceLock::new();
        if let Some(s) = string {
            let _ = cell.set(s);
        }
        Value(Arc::new(Inner { string: cell, rep }))
    }

    /// The empty value.
    pub fn empty() -> Self {
        Self::from_parts(Some("".into()), Rep::Pure)
    }

    /// A value with only a string form.
    pub fn string(s: impl Into<String>) -> Self {
        Self::from_parts(Some(s.into().into_boxed_str()), Rep::Pure)
    }

    /// An integer value.
    pub fn int(i: i64) -> Self {
        Self::from_parts(None, Rep::Int(i))
    }

    /// A double value.
    pub fn double(d: f64) -> Self {
        Self::from_parts(None, Rep::Double(d))
    }

    /// A list value.
    pub fn list(items: Vec<Value>) -> Self {
        Self::from_parts(None, Rep::List(items))
    }

    /// An arithmetic-series value. A zero-length series collapses to the
    /// empty value, as the empty sequence has no series representation.
    pub fn series(series: Series) -> Self {
        if series.len() == 0 {
            Self::empty()
        } else {
            Self::from_parts(None, Rep::Series(series))
        }
    }

    /// A value with a user-registered representation.
    pub fn extension(rep: Box<dyn ExtensionRep>) -> Self {
        Self::from_parts(None, Rep::Extension(rep))
    }

    /// Canonical string form, synthesized from the internal representation
    /// on first request and cached.
    pub fn get_string(&self) -> &str {
        self.0
            .string
            .get_or_init(|| synthesize_string(&self.0.rep).into_boxed_str())
    }

    /// Internal representation.
    pub fn rep(&self) -> &Rep {
        &self.0.rep
    }

    /// Name of the current internal representation.
    pub fn type_name(&self) -> &str {
        match &self.0.rep {
            Rep::Pure => "string",
            Rep::Int(_) => "int",
            Rep::Double(_) => "double",
            Rep::List(_) => "list",
            Rep::Series(_) => "arithseries",
            Rep::Extension(e) => e.type_name(),
        }
    }

    /// Whether other handles to this value exist.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    /// Mutable access to the representation. Duplicates the payload first if
    /// the handle is shared, and invalidates the cached string form: the
    /// caller is about to change what the value denotes.
    pub fn rep_mut(&mut self) -> &mut Rep {
        let inner = Arc::make_mut(&mut self.0);
        inner.string = OnceLock::new();
        &mut inner.rep
    }

    /// Drop the cached string form without touching the representation.
    pub fn invalidate_string(&mut self) {
        let inner = Arc::make_mut(&mut self.0);
        inner.string = OnceLock::new();
    }

    /// Replace the representation while keeping the (consistent) string
    /// form. This is the shimmer path used by type conversion: the new
    /// representation was derived from the existing value.
    pub(crate) fn shimmer(&mut self, rep: Rep) {
        self.get_string();
        let inner = Arc::make_mut(&mut self.0);
        inner.rep = rep;
    }

    /// Integer reading of this value.
    pub fn get_int(&self) -> Result<i64, RuntimeError> {
        match &self.0.rep {
            Rep::Int(i) => Ok(*i),
            Rep::Double(d) => Ok(*d as i64),
            _ => {
                let s = self.get_string();
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| RuntimeError::TypeMismatch {
                        expected: "integer",
                        value: s.to_string(),
                    })
            }
        }
    }

    /// Double reading of this value.
    pub fn get_double(&self) -> Result<f64, RuntimeError> {
        match &self.0.rep {
            Rep::Double(d) => Ok(*d),
            Rep::Int(i) => Ok(*i as f64),
            _ => {
                let s = self.get_string();
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| RuntimeError::TypeMismatch {
                        expected: "double",
                        value: s.to_string(),
                    })
            }
        }
    }

    /// Boolean reading of this value.
    pub fn get_bool(&self) -> Result<bool, RuntimeError> {
        let s = self.get_string();
        match s.trim() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(RuntimeError::TypeMismatch {
                expected: "boolean",
                value: s.to_string(),
            }),
        }
    }

    /// The series representation, when present.
    pub fn as_series(&self) -> Option<&Series> {
        match &self.0.rep {
            Rep::Series(s) => Some(s),
            _ => None,
        }
    }

    /// Convert the internal representation to the named type, re-parsing the
    /// canonical string through the target type's constructor. A no-op when
    /// the value already has that representation.
    pub fn convert_to(&mut self, type_name: &str) -> Result<(), RuntimeError> {
        if self.type_name() == type_name {
            return Ok(());
        }
        match type_name {
            "string" => {
                self.get_string();
                let inner = Arc::make_mut(&mut self.0);
                inner.rep = Rep::Pure;
                Ok(())
            }
            "int" => {
                let i = self.get_int()?;
                self.shimmer(Rep::Int(i));
                Ok(())
            }
            "double" => {
                let d = self.get_double()?;
                self.shimmer(Rep::Double(d));
                Ok(())
            }
            "list" => {
                let items = list::parse_list(self.get_string());
                self.shimmer(Rep::List(items));
                Ok(())
            }
            name => {
                let registered =
                    registered_type(name).ok_or_else(|| RuntimeError::TypeMismatch {
                        expected: "registered type",
                        value: name.to_string(),
                    })?;
                let rep = (registered.from_string)(self.get_string())?;
                self.shimmer(Rep::Extension(rep));
                Ok(())
            }
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get_string())
    }
}

impl PartialEq for Value {
    /// Values compare by canonical string form.
    fn eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.get_string() == other.get_string()
    }
}

impl Eq for Value {}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::string(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Value {
        Value::double(d)
    }
}

fn synthesize_string(rep: &Rep) -> String {
    match rep {
        Rep::Pure => String::new(),
        Rep::Int(i) => i.to_string(),
        Rep::Double(d) => format_double(*d),
        Rep::List(items) => {
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(item.get_string());
            }
            out
        }
        Rep::Series(s) => s.update_string(),
        Rep::Extension(e) => e.update_string(),
    }
}

/// Canonical double formatting: the shortest round-trip decimal, always with
/// a fractional part or exponent so the string re-parses as a double.
pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    let s = format!("{d}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

/// A user-registered value type: a name, a version, and the
/// construct-from-string hook invoked by [`Value::convert_to`].
#[derive(Debug, Clone, Copy)]
pub struct RegisteredType {
    /// Type name, unique within the registry.
    pub name: &'static str,
    /// Version of the type contract the registrant implements.
    pub version: u32,
    /// Parse the canonical string form into a fresh representation.
    pub from_string: fn(&str) -> Result<Box<dyn ExtensionRep>, RuntimeError>,
}

#[derive(Debug, Default)]
struct TypeTable {
    by_name: HashMap<&'static str, RegisteredType>,
    shut_down: bool,
}

static TYPES: Mutex<Option<TypeTable>> = Mutex::new(None);

/// Register a value type process-wide. Last registration under a name wins.
///
/// # Panics
///
/// Panics if called after [`shutdown_types`] has begun draining the
/// registry during finalization.
pub fn register_type(ty: RegisteredType) {
    let mut guard = TYPES.lock();
    let table = guard.get_or_insert_with(TypeTable::default);
    assert!(
        !table.shut_down,
        "type registered during registry finalization"
    );
    table.by_name.insert(ty.name, ty);
}

/// Look up a registered type by name.
pub fn registered_type(name: &str) -> Option<RegisteredType> {
    let guard = TYPES.lock();
    guard.as_ref().and_then(|t| t.by_name.get(name).copied())
}

/// Names of all registered types.
pub fn registered_type_names() -> Vec<String> {
    let guard = TYPES.lock();
    guard
        .as_ref()
        .map(|t| t.by_name.keys().map(|n| n.to_string()).collect())
        .unwrap_or_default()
}

/// Drain the type registry. Called during finalization, after the layers
/// that mint values have shut down; registration afterwards panics.
pub(crate) fn shutdown_types() {
    let mut guard = TYPES.lock();
    let table = guard.get_or_insert_with(TypeTable::default);
    table.shut_down = true;
    table.by_name.clear();
}

/// Undo a shutdown so a fresh initialization can proceed.
pub(crate) fn reopen_types() {
    let mut guard = TYPES.lock();
    if let Some(table) = guard.as_mut() {
        table.shut_down = false;
    }
}
