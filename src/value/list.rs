//! List-interface dispatch
//!
//! Every value can be treated as a list. Representations that implement
//! [`ListRep`] serve the operations directly (the arithmetic series does so
//! in constant space); everything else is materialized by parsing the
//! canonical string form into a concrete list, preserving the illusion at
//! the cost of a conversion.

use super::{Rep, Value};
use crate::consts::MAX_LIST_LEN;
use crate::error::RuntimeError;

use std::fmt;

/// The list-interface slots a lazy representation may fill. Slots returning
/// `None` (or `false` for [`ListRep::reverse`]) fall back to the generic
/// materializing implementation.
pub trait ListRep: fmt::Debug {
    /// Number of elements.
    fn length(&self) -> u64;

    /// Element at `i`, or `None` when out of range.
    fn index(&self, i: u64) -> Option<Value>;

    /// Sub-list covering `from..=to` (already clamped by the dispatcher).
    fn range(&self, from: u64, to: u64) -> Option<Value> {
        let _ = (from, to);
        None
    }

    /// Membership test, when cheaper than a scan.
    fn contains(&self, elem: &Value) -> Option<bool> {
        let _ = elem;
        None
    }

    /// All elements at once, when the representation caches them.
    fn all_elements(&self) -> Option<Vec<Value>> {
        None
    }

    /// In-place reversal. Returns `false` when unsupported.
    fn reverse(&mut self) -> bool {
        false
    }

    /// Whether the elements are in ascending order.
    fn is_sorted(&self) -> Option<bool> {
        None
    }
}

/// Parse a canonical string into list elements. Elements are
/// whitespace-separated words; quoting belongs to the script-level parser,
/// which is outside the runtime core.
pub(crate) fn parse_list(s: &str) -> Vec<Value> {
    s.split_whitespace().map(Value::string).collect()
}

enum View<'a> {
    Items(&'a [Value]),
    Lazy(&'a dyn ListRep),
    Parsed(Vec<Value>),
}

fn view(value: &Value) -> View<'_> {
    match value.rep() {
        Rep::List(items) => View::Items(items),
        Rep::Series(s) => View::Lazy(s),
        Rep::Extension(e) => match e.as_list() {
            Some(rep) => View::Lazy(rep),
            None => View::Parsed(parse_list(value.get_string())),
        },
        _ => View::Parsed(parse_list(value.get_string())),
    }
}

/// Number of list elements in `value`.
pub fn length(value: &Value) -> u64 {
    match view(value) {
        View::Items(items) => items.len() as u64,
        View::Lazy(rep) => rep.length(),
        View::Parsed(items) => items.len() as u64,
    }
}

/// Element at `i`, or `None` when the index is out of range.
pub fn index(value: &Value, i: u64) -> Option<Value> {
    match view(value) {
        View::Items(items) => items.get(i as usize).cloned(),
        View::Lazy(rep) => rep.index(i),
        View::Parsed(items) => items.get(i as usize).cloned(),
    }
}

/// Element counted from the end; `back == 0` is the last element.
pub fn index_end(value: &Value, back: u64) -> Option<Value> {
    let len = length(value);
    len.checked_sub(back + 1).and_then(|i| index(value, i))
}

/// Sub-list covering `from..=to`, clamped to the valid range; the empty
/// value when the clamped range is empty.
pub fn range(value: &Value, from: u64, to: u64) -> Value {
    let len = length(value);
    if len == 0 {
        return Value::empty();
    }
    let to = to.min(len - 1);
    if from > to {
        return Value::empty();
    }
    match view(value) {
        View::Lazy(rep) => match rep.range(from, to) {
            Some(v) => v,
            None => materialized_range(value, from, to),
        },
        _ => materialized_range(value, from, to),
    }
}

/// Sub-list from `from` through the element `end_back` places before the
/// end.
pub fn range_end(value: &Value, from: u64, end_back: u64) -> Value {
    let len = length(value);
    match len.checked_sub(end_back + 1) {
        Some(to) => range(value, from, to),
        None => Value::empty(),
    }
}

fn materialized_range(value: &Value, from: u64, to: u64) -> Value {
    let items = all_elements(value);
    Value::list(items[from as usize..=to as usize].to_vec())
}

/// Membership test; elements compare by canonical string form.
pub fn contains(value: &Value, elem: &Value) -> bool {
    match view(value) {
        View::Lazy(rep) => match rep.contains(elem) {
            Some(answer) => answer,
            None => scan_contains(rep, elem),
        },
        View::Items(items) => items.iter().any(|v| v == elem),
        View::Parsed(items) => items.iter().any(|v| v == elem),
    }
}

fn scan_contains(rep: &dyn ListRep, elem: &Value) -> bool {
    (0..rep.length()).any(|i| rep.index(i).is_some_and(|v| &v == elem))
}

/// All elements, materializing lazily represented lists.
pub fn all_elements(value: &Value) -> Vec<Value> {
    match view(value) {
        View::Items(items) => items.to_vec(),
        View::Lazy(rep) => match rep.all_elements() {
            Some(items) => items,
            None => (0..rep.length()).filter_map(|i| rep.index(i)).collect(),
        },
        View::Parsed(items) => items,
    }
}

/// Shimmer `value` to a concrete list representation and return its
/// elements for mutation. The cached string form is invalidated.
pub(crate) fn make_list(value: &mut Value) -> &mut Vec<Value> {
    if !matches!(value.rep(), Rep::List(_)) {
        let items = all_elements(value);
        *value.rep_mut() = Rep::List(items);
    }
    match value.rep_mut() {
        Rep::List(items) => items,
        _ => unreachable!(),
    }
}

/// Append one element.
pub fn append(value: &mut Value, elem: Value) -> Result<(), RuntimeError> {
    let items = make_list(value);
    if items.len() as u64 >= MAX_LIST_LEN {
        return Err(RuntimeError::ValueTooLarge);
    }
    items.push(elem);
    Ok(())
}

/// Append every element of `other`.
pub fn append_list(value: &mut Value, other: &Value) -> Result<(), RuntimeError> {
    let incoming = all_elements(other);
    let items = make_list(value);
    if items.len() as u64 + incoming.len() as u64 > MAX_LIST_LEN {
        return Err(RuntimeError::ValueTooLarge);
    }
    items.extend(incoming);
    Ok(())
}

/// Replace `count` elements starting at `at` with `elems`. `at` and `count`
/// are clamped to the list.
pub fn replace(
    value: &mut Value,
    at: u64,
    count: u64,
    elems: Vec<Value>,
) -> Result<(), RuntimeError> {
    let items = make_list(value);
    let len = items.len();
    let at = (at as usize).min(len);
    let count = (count as usize).min(len - at);
    if len - count + elems.len() > MAX_LIST_LEN as usize {
        return Err(RuntimeError::ValueTooLarge);
    }
    items.splice(at..at + count, elems);
    Ok(())
}

/// As [`replace`], with the replacement elements drawn from another list.
pub fn replace_list(
    value: &mut Value,
    at: u64,
    count: u64,
    other: &Value,
) -> Result<(), RuntimeError> {
    replace(value, at, count, all_elements(other))
}

/// Store `elem` at index `i`, which must be in range.
pub fn set(value: &mut Value, i: u64, elem: Value) -> Result<(), RuntimeError> {
    let items = make_list(value);
    match items.get_mut(i as usize) {
        Some(slot) => {
            *slot = elem;
            Ok(())
        }
        None => Err(RuntimeError::BadArgument(format!(
            "index {i} out of range"
        ))),
    }
}

/// Store `elem` at a nested index path, shimmering each level to a concrete
/// list as needed.
pub fn set_deep(value: &mut Value, path: &[u64], elem: Value) -> Result<(), RuntimeError> {
    match path {
        [] => {
            *value = elem;
            Ok(())
        }
        [i] => set(value, *i, elem),
        [i, rest @ ..] => {
            let i = *i as usize;
            let items = make_list(value);
            match items.get_mut(i) {
                Some(child) => set_deep(child, rest, elem),
                None => Err(RuntimeError::BadArgument(format!(
                    "index {i} out of range"
                ))),
            }
        }
    }
}

/// Reverse the element order in place.
pub fn reverse(value: &mut Value) -> Result<(), RuntimeError> {
    // Shimmer to a concrete list up front unless the representation can
    // reverse itself; `rep_mut` drops the string form the fallback parse
    // would need.
    let native = match value.rep() {
        Rep::List(_) | Rep::Series(_) => true,
        Rep::Extension(e) => e.as_list().is_some(),
        _ => false,
    };
    if !native {
        make_list(value);
    }
    let handled = match value.rep_mut() {
        Rep::List(items) => {
            items.reverse();
            true
        }
        Rep::Series(s) => ListRep::reverse(s),
        Rep::Extension(e) => e.as_list_mut().map(|rep| rep.reverse()).unwrap_or(false),
        _ => false,
    };
    if !handled {
        make_list(value).reverse();
    }
    Ok(())
}

/// Whether the elements are already in ascending order.
pub fn is_sorted(value: &Value) -> bool {
    match view(value) {
        View::Lazy(rep) => match rep.is_sorted() {
            Some(answer) => answer,
            None => scan_sorted(rep),
        },
        View::Items(items) => slice_sorted(items),
        View::Parsed(items) => slice_sorted(&items),
    }
}

fn slice_sorted(items: &[Value]) -> bool {
    items
        .windows(2)
        .all(|w| w[0].get_string() <= w[1].get_string())
}

fn scan_sorted(rep: &dyn ListRep) -> bool {
    let len = rep.length();
    (1..len).all(|i| match (rep.index(i - 1), rep.index(i)) {
        (Some(a), Some(b)) => a.get_string() <= b.get_string(),
        _ => true,
    })
}
