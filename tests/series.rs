use embra::prelude::*;
use embra::value::list;

use quickcheck_macros::quickcheck;

fn int_series(start: i64, end: i64, step: i64) -> Value {
    Value::series(Series::new_int(Some(start), Some(end), Some(step), None).expect("series"))
}

#[test]
fn basics() {
    let s = int_series(1, 10, 1);
    assert_eq!(list::length(&s), 10);
    assert_eq!(list::index(&s, 0).expect("first").get_string(), "1");
    assert_eq!(list::index(&s, 9).expect("last").get_string(), "10");
    assert_eq!(s.get_string(), "1 2 3 4 5 6 7 8 9 10");
    assert!(list::contains(&s, &Value::int(7)));
    assert!(!list::contains(&s, &Value::int(11)));
}

#[test]
fn index_out_of_range_is_empty() {
    let s = int_series(1, 10, 1);
    assert!(list::index(&s, 10).is_none());
    assert!(list::index(&s, u64::MAX).is_none());
}

#[test]
fn reverse_swaps_endpoints() {
    let mut s = int_series(1, 5, 1);
    list::reverse(&mut s).expect("reverse");
    assert_eq!(s.get_string(), "5 4 3 2 1");

    let series = s.as_series().expect("series rep survives reverse");
    assert_eq!(series.step_value().get_string(), "-1");
}

#[test]
fn reverse_copies_when_shared() {
    let original = int_series(1, 5, 1);
    let mut copy = original.clone();
    assert!(copy.is_shared());
    list::reverse(&mut copy).expect("reverse");
    assert_eq!(original.get_string(), "1 2 3 4 5");
    assert_eq!(copy.get_string(), "5 4 3 2 1");
}

#[test]
fn range_clamps() {
    let s = int_series(1, 10, 1);
    let cases = vec![
        (0, 9, "1 2 3 4 5 6 7 8 9 10"),
        (0, 100, "1 2 3 4 5 6 7 8 9 10"),
        (3, 5, "4 5 6"),
        (9, 9, "10"),
        (7, 3, ""),
    ];
    for (from, to, expected) in cases {
        assert_eq!(
            list::range(&s, from, to).get_string(),
            expected,
            "range {from}..={to}"
        );
    }
}

#[test]
fn range_end_addresses_from_the_back() {
    let s = int_series(1, 10, 1);
    assert_eq!(list::range_end(&s, 5, 0).get_string(), "6 7 8 9 10");
    assert_eq!(list::index_end(&s, 0).expect("last").get_string(), "10");
    assert_eq!(list::index_end(&s, 9).expect("first").get_string(), "1");
    assert!(list::index_end(&s, 10).is_none());
}

#[test]
fn negative_step() {
    let s = int_series(10, 1, -3);
    assert_eq!(s.get_string(), "10 7 4 1");
    assert!(list::contains(&s, &Value::int(4)));
    assert!(!list::contains(&s, &Value::int(5)));
    assert!(!list::is_sorted(&s));
}

#[test]
fn solved_parameters() {
    // Omitted step takes the sign of end - start; omitted length follows.
    let down = Series::new_int(Some(5), Some(1), None, None).expect("series");
    assert_eq!(down.len(), 5);
    assert_eq!(down.update_string(), "5 4 3 2 1");

    // Length-driven construction with no end.
    let by_len = Series::new_int(Some(3), None, Some(2), Some(4)).expect("series");
    assert_eq!(by_len.update_string(), "3 5 7 9");
}

#[test]
fn zero_step_is_empty_value() {
    let v = Value::series(Series::new_int(Some(1), Some(10), Some(0), None).expect("series"));
    assert_eq!(v.get_string(), "");
    assert_eq!(list::length(&v), 0);
}

#[test]
fn overlong_series_is_rejected() {
    let err = Series::new_int(Some(0), None, Some(1), Some(i64::MAX)).expect_err("too long");
    assert!(matches!(err, RuntimeError::ValueTooLarge));
}

#[test]
fn double_series_formatting() {
    let s = Value::series(
        Series::new_double(Some(0.0), Some(1.0), Some(0.25), None).expect("series"),
    );
    assert_eq!(s.get_string(), "0.0 0.25 0.5 0.75 1.0");
    assert!(list::contains(&s, &Value::double(0.75)));
    assert!(!list::contains(&s, &Value::double(0.3)));
}

#[test]
fn double_length_is_drift_free() {
    // Naive floating accumulation would make this 0.1-step count uncertain.
    let s = Series::new_double(Some(0.1), Some(1.0), Some(0.1), None).expect("series");
    assert_eq!(s.len(), 10);
}

#[test]
fn materialization_is_cached() {
    let s = Series::new_int(Some(1), Some(4), Some(1), None).expect("series");
    let first = s.elements().as_ptr();
    let again = s.elements().as_ptr();
    assert_eq!(first, again);
    assert_eq!(s.elements().len(), 4);
}

#[test]
fn contains_every_indexed_element() {
    let s = int_series(-7, 23, 3);
    for i in 0..list::length(&s) {
        let elem = list::index(&s, i).expect("element");
        assert!(list::contains(&s, &elem), "missing element at {i}");
    }
}

#[quickcheck]
fn reverse_twice_is_identity(start: i16, len: u8, step: i8) -> bool {
    if step == 0 {
        return true;
    }
    let series = Series::new_int(
        Some(start as i64),
        None,
        Some(step as i64),
        Some(len as i64),
    )
    .expect("series");
    let mut v = Value::series(series);
    let before = v.get_string().to_string();
    list::reverse(&mut v).expect("reverse");
    list::reverse(&mut v).expect("reverse");
    v.get_string() == before
}

#[quickcheck]
fn full_range_is_identity(start: i16, len: u8, step: i8) -> bool {
    if step == 0 || len == 0 {
        return true;
    }
    let v = Value::series(
        Series::new_int(
            Some(start as i64),
            None,
            Some(step as i64),
            Some(len as i64),
        )
        .expect("series"),
    );
    let total = list::length(&v);
    list::range(&v, 0, total - 1).get_string() == v.get_string()
}
