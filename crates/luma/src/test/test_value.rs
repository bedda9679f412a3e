// Value model: rendering, equality, type names, varargs at the host
// boundary.

use crate::test::support::*;
use crate::{new_state, LuaValue, Varargs};

#[test]
fn display_matches_lua_tostring_rules() {
    let state = new_state().unwrap();
    assert_eq!(state.display_value(&LuaValue::Nil), "nil");
    assert_eq!(state.display_value(&LuaValue::Boolean(true)), "true");
    assert_eq!(state.display_value(&num(42.0)), "42");
    assert_eq!(state.display_value(&num(0.5)), "0.5");
    assert_eq!(state.display_value(&num(f64::INFINITY)), "inf");
    assert_eq!(state.display_value(&num(f64::NAN)), "nan");
    assert_eq!(state.display_value(&num(1e300)), "1e+300");
}

#[test]
fn tonumber_of_tostring_round_trips() {
    let state = new_state().unwrap();
    for n in [0.1, 2.0 / 3.0, 1234.5678, 1e-12, 9.9e99] {
        let text = state.display_value(&num(n));
        assert_eq!(
            crate::lua_vm::number::str_to_number(&text),
            Some(n),
            "round-trip through {:?}",
            text
        );
    }
}

#[test]
fn strings_compare_by_content_not_identity() {
    let mut state = new_state().unwrap();
    let long = "an intentionally long string that skips the intern cache";
    let a = state.create_string(long).unwrap();
    let b = state.create_string(long).unwrap();
    // Long strings get distinct ids but equal content.
    assert!(!a.same_identity(&b));
    assert!(state.heap.raw_equal(&a, &b));

    let short_a = state.create_string("hi").unwrap();
    let short_b = state.create_string("hi").unwrap();
    assert!(state.heap.raw_equal(&short_a, &short_b));
}

#[test]
fn nan_is_not_raw_equal_to_itself() {
    let state = new_state().unwrap();
    let nan = num(f64::NAN);
    assert!(!state.heap.raw_equal(&nan, &nan));
}

#[test]
fn type_names_cover_every_variant() {
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap();
    let s = state.create_string("s").unwrap();
    assert_eq!(LuaValue::Nil.type_name(), "nil");
    assert_eq!(num(1.0).type_name(), "number");
    assert_eq!(t.type_name(), "table");
    assert_eq!(s.type_name(), "string");
}

#[test]
fn varargs_cross_host_boundary_in_order() {
    // select('#', ...) and select(n, ...) through the real host function.
    let mut state = new_state().unwrap();
    let select = global(&mut state, "select");
    let hash = state.create_string("#").unwrap();

    let out = state
        .call(
            select,
            Varargs::from_slice(&[hash, num(10.0), num(20.0), num(30.0)]),
        )
        .unwrap();
    assert_eq!(out.first().as_number(), Some(3.0));

    let out = state
        .call(
            select,
            Varargs::from_slice(&[num(2.0), num(10.0), num(20.0), num(30.0)]),
        )
        .unwrap();
    assert_eq!(expect_numbers(&out), vec![20.0, 30.0]);
}
