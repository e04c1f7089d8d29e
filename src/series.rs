//! Arithmetic-series values
//!
//! A series represents the list `start, start+step, …` in constant space.
//! It is the canonical lazy list: indexing and membership are O(1), the
//! element array is materialized only on demand, and reversal just swaps
//! the endpoints. Zero-length ranges are valid and collapse to the empty
//! value at construction.

use crate::consts::MAX_LIST_LEN;
use crate::error::RuntimeError;
use crate::value::{format_double, ListRep, Value};

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Int {
        start: i64,
        step: i64,
    },
    Double {
        start: f64,
        step: f64,
        precision: u32,
    },
}

/// Internal representation of an arithmetic series.
///
/// The length is always derivable from the endpoints but is cached because
/// every list operation needs it.
#[derive(Debug)]
pub struct Series {
    kind: Kind,
    len: u64,
    elements: OnceLock<Vec<Value>>,
}

impl Clone for Series {
    /// Duplicates share nothing; the element cache starts out empty.
    fn clone(&self) -> Self {
        Series {
            kind: self.kind,
            len: self.len,
            elements: OnceLock::new(),
        }
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Series) -> bool {
        self.kind == other.kind && self.len == other.len
    }
}

/// Number of significant fractional digits in the canonical formatting.
fn precision_of(d: f64) -> u32 {
    let s = format_double(d);
    if s.contains(['e', 'E']) {
        return 0;
    }
    match s.find('.') {
        Some(dot) => (s.len() - dot - 1) as u32,
        None => 0,
    }
}

fn max_precision(values: &[f64]) -> u32 {
    values.iter().map(|d| precision_of(*d)).max().unwrap_or(0)
}

fn len_int(start: i64, end: i64, step: i64) -> u64 {
    if step == 0 {
        return 0;
    }
    let len = (end as i128 - start as i128) / step as i128 + 1;
    if len < 0 {
        0
    } else {
        len as u64
    }
}

/// Double lengths are computed in a scaled integer domain so accumulated
/// representation error in start/end/step does not drop or add an element.
fn len_double(start: f64, end: f64, step: f64, precision: u32) -> u64 {
    if step == 0.0 {
        return 0;
    }
    let scale = 10f64.powi(precision as i32);
    let istart = start * scale;
    let iend = end * scale;
    let istep = step * scale;
    let len = ((iend - istart + istep) / istep).floor();
    if len < 0.0 {
        0
    } else {
        len as u64
    }
}

impl Series {
    /// Build an integer series. Any of start/end/step/len may be omitted
    /// and is solved from the others; step defaults to the sign of
    /// `end - start`. A zero step yields the empty series.
    pub fn new_int(
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
        len: Option<i64>,
    ) -> Result<Series, RuntimeError> {
        let start_v = start.unwrap_or(0);
        if step == Some(0) {
            return Ok(Self::empty_int());
        }
        let step_v = match step {
            Some(s) => s,
            None => match end {
                Some(e) if e < start_v => -1,
                _ => 1,
            },
        };
        let length = match len {
            Some(l) => {
                if l < 0 {
                    0
                } else {
                    l as u64
                }
            }
            None => match end {
                Some(e) => len_int(start_v, e, step_v),
                None => 0,
            },
        };
        if length > MAX_LIST_LEN {
            return Err(RuntimeError::ValueTooLarge);
        }
        Ok(Series {
            kind: Kind::Int {
                start: start_v,
                step: step_v,
            },
            len: length,
            elements: OnceLock::new(),
        })
    }

    /// Build a double series; see [`Series::new_int`] for the solving rules.
    /// The formatting precision is the longest fractional precision among
    /// the resolved start, end and step.
    pub fn new_double(
        start: Option<f64>,
        end: Option<f64>,
        step: Option<f64>,
        len: Option<i64>,
    ) -> Result<Series, RuntimeError> {
        let start_v = start.unwrap_or(0.0);
        if step == Some(0.0) {
            return Ok(Self::empty_int());
        }
        let step_v = match step {
            Some(s) => s,
            None => match end {
                Some(e) if e < start_v => -1.0,
                _ => 1.0,
            },
        };
        let precision = match end {
            Some(e) => max_precision(&[start_v, e, step_v]),
            None => max_precision(&[start_v, step_v]),
        };
        let length = match len {
            Some(l) => {
                if l < 0 {
                    0
                } else {
                    l as u64
                }
            }
            None => match end {
                Some(e) => len_double(start_v, e, step_v, precision),
                None => 0,
            },
        };
        if length > MAX_LIST_LEN {
            return Err(RuntimeError::ValueTooLarge);
        }
        Ok(Series {
            kind: Kind::Double {
                start: start_v,
                step: step_v,
                precision,
            },
            len: length,
            elements: OnceLock::new(),
        })
    }

    fn empty_int() -> Series {
        Series {
            kind: Kind::Int { start: 0, step: 1 },
            len: 0,
            elements: OnceLock::new(),
        }
    }

    /// Cached element count.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether elements are doubles.
    pub fn is_double(&self) -> bool {
        matches!(self.kind, Kind::Double { .. })
    }

    /// Formatting precision for double series.
    pub fn precision(&self) -> u32 {
        match self.kind {
            Kind::Int { .. } => 0,
            Kind::Double { precision, .. } => precision,
        }
    }

    fn index_int(&self, i: u64) -> i64 {
        match self.kind {
            Kind::Int { start, step } => {
                (start as i128 + step as i128 * i as i128) as i64
            }
            Kind::Double { start, step, .. } => (start + step * i as f64) as i64,
        }
    }

    fn index_double(&self, i: u64) -> f64 {
        match self.kind {
            Kind::Int { start, step } => (start as i128 + step as i128 * i as i128) as f64,
            Kind::Double {
                start,
                step,
                precision,
            } => round_to(start + step * i as f64, precision),
        }
    }

    /// The step as a value.
    pub fn step_value(&self) -> Value {
        match self.kind {
            Kind::Int { step, .. } => Value::int(step),
            Kind::Double { step, .. } => Value::double(step),
        }
    }

    /// `start + step * i` as a fresh value, or `None` past the end.
    pub fn element(&self, i: u64) -> Option<Value> {
        if i >= self.len {
            return None;
        }
        Some(match self.kind {
            Kind::Int { .. } => Value::int(self.index_int(i)),
            Kind::Double { .. } => Value::double(self.index_double(i)),
        })
    }

    /// Sub-series covering `from..=to`. The bounds must already be clamped
    /// to the series; an inverted range yields the empty value.
    pub fn slice(&self, from: u64, to: u64) -> Value {
        if self.len == 0 || from > to || from >= self.len {
            return Value::empty();
        }
        let to = to.min(self.len - 1);
        let made = match self.kind {
            Kind::Int { step, .. } => Series::new_int(
                Some(self.index_int(from)),
                Some(self.index_int(to)),
                Some(step),
                None,
            ),
            Kind::Double { step, .. } => Series::new_double(
                Some(self.index_double(from)),
                Some(self.index_double(to)),
                Some(step),
                None,
            ),
        };
        match made {
            Ok(series) => Value::series(series),
            Err(_) => Value::empty(),
        }
    }

    /// Reverse in place: the endpoints swap, the step negates, and any
    /// materialized elements are discarded. Only reachable on uniquely
    /// owned values via `Value::rep_mut`.
    pub fn reverse_in_place(&mut self) {
        if self.len == 0 {
            return;
        }
        let last = self.len - 1;
        self.kind = match self.kind {
            Kind::Int { step, .. } => Kind::Int {
                start: self.index_int(last),
                step: -step,
            },
            Kind::Double {
                step, precision, ..
            } => Kind::Double {
                start: self.index_double(last),
                step: -step,
                precision,
            },
        };
        self.elements = OnceLock::new();
    }

    /// O(1) membership: compute the candidate index from the value and
    /// compare string forms. For doubles the next index is probed as well
    /// to absorb truncation in the index computation.
    pub fn has_element(&self, elem: &Value) -> bool {
        if self.len == 0 {
            return false;
        }
        let elem_str = elem.get_string();
        match self.kind {
            Kind::Int { start, step } => {
                let Ok(y) = elem.get_int() else {
                    return false;
                };
                let idx = (y as i128 - start as i128) / step as i128;
                if idx < 0 {
                    return false;
                }
                self.element(idx as u64)
                    .is_some_and(|v| v.get_string() == elem_str)
            }
            Kind::Double { start, step, .. } => {
                let Ok(y) = elem.get_double() else {
                    return false;
                };
                let idx = ((y - start) / step).trunc() as i128;
                (0..2).any(|probe| {
                    let i = idx + probe;
                    i >= 0
                        && self
                            .element(i as u64)
                            .is_some_and(|v| v.get_string() == elem_str)
                })
            }
        }
    }

    /// All elements, materialized once and cached. Each cached child is
    /// owned by the series and released with it.
    pub fn elements(&self) -> &[Value] {
        self.elements
            .get_or_init(|| (0..self.len).filter_map(|i| self.element(i)).collect())
    }

    /// Canonical string form: elements space-separated, doubles formatted
    /// at the series precision.
    pub fn update_string(&self) -> String {
        let mut out = String::new();
        for i in 0..self.len {
            if i > 0 {
                out.push(' ');
            }
            match self.kind {
                Kind::Int { .. } => out.push_str(&self.index_int(i).to_string()),
                Kind::Double { .. } => out.push_str(&format_double(self.index_double(i))),
            }
        }
        out
    }
}

fn round_to(d: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (d * scale).round() / scale
}

impl ListRep for Series {
    fn length(&self) -> u64 {
        self.len
    }

    fn index(&self, i: u64) -> Option<Value> {
        self.element(i)
    }

    fn range(&self, from: u64, to: u64) -> Option<Value> {
        Some(self.slice(from, to))
    }

    fn contains(&self, elem: &Value) -> Option<bool> {
        Some(self.has_element(elem))
    }

    fn all_elements(&self) -> Option<Vec<Value>> {
        Some(self.elements().to_vec())
    }

    fn reverse(&mut self) -> bool {
        self.reverse_in_place();
        true
    }

    fn is_sorted(&self) -> Option<bool> {
        let ascending = match self.kind {
            Kind::Int { step, .. } => step > 0,
            Kind::Double { step, .. } => step > 0.0,
        };
        Some(self.len <= 1 || ascending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_omitted_step() {
        let s = Series::new_int(Some(10), Some(1), None, None).expect("series");
        assert_eq!(s.len(), 10);
        assert_eq!(s.element(1).unwrap().get_string(), "9");
    }

    #[test]
    fn double_precision_follows_inputs() {
        let s = Series::new_double(Some(0.0), Some(1.0), Some(0.25), None).expect("series");
        assert_eq!(s.precision(), 2);
        assert_eq!(s.len(), 5);
        assert_eq!(s.update_string(), "0.0 0.25 0.5 0.75 1.0");
    }

    #[test]
    fn zero_step_is_empty() {
        let s = Series::new_int(Some(1), Some(10), Some(0), None).expect("series");
        assert!(s.is_empty());
    }
}
