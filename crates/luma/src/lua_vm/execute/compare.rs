// Equality and order comparisons.
//
// `__eq` fires only when both operands are the same Lua type (tables or
// userdata) and are not raw-equal. `<=` tries `__le` first and falls back to
// `not (b < a)` through `__lt`, per the 5.2 rules.

use crate::lua_value::LuaValue;
use crate::lua_vm::execute::metamethod::{get_binop_metamethod, get_metamethod, TmKind};
use crate::lua_vm::{LuaResult, LuaState};

pub enum CompareOutcome {
    Done(bool),
    /// Call `handler(a, b)`; the truth of its result decides, negated when
    /// `invert` (the `__le`-via-`__lt` fallback).
    Call {
        handler: LuaValue,
        a: LuaValue,
        b: LuaValue,
        invert: bool,
    },
}

pub fn equals(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<CompareOutcome> {
    if state.heap.raw_equal(&a, &b) {
        return Ok(CompareOutcome::Done(true));
    }
    let both_tables = a.is_table() && b.is_table();
    let both_userdata = a.is_userdata() && b.is_userdata();
    if !(both_tables || both_userdata) {
        return Ok(CompareOutcome::Done(false));
    }
    let mm = get_metamethod(state, &a, TmKind::Eq);
    let mm = if mm.is_nil() {
        get_metamethod(state, &b, TmKind::Eq)
    } else {
        mm
    };
    if mm.is_nil() {
        Ok(CompareOutcome::Done(false))
    } else {
        Ok(CompareOutcome::Call {
            handler: mm,
            a,
            b,
            invert: false,
        })
    }
}

fn string_lt(state: &LuaState, a: LuaValue, b: LuaValue) -> bool {
    let (x, y) = (a.as_string().unwrap(), b.as_string().unwrap());
    state.heap.string_bytes(x) < state.heap.string_bytes(y)
}

fn order_error(state: &mut LuaState, a: &LuaValue, b: &LuaValue) -> crate::lua_vm::LuaError {
    let (ta, tb) = (state.type_name_of(a), state.type_name_of(b));
    if ta == tb {
        state.rt_error(format!("attempt to compare two {} values", ta))
    } else {
        state.rt_error(format!("attempt to compare {} with {}", ta, tb))
    }
}

pub fn less_than(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<CompareOutcome> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(CompareOutcome::Done(x < y));
    }
    if a.is_string() && b.is_string() {
        return Ok(CompareOutcome::Done(string_lt(state, a, b)));
    }
    let mm = get_binop_metamethod(state, &a, &b, TmKind::Lt);
    if mm.is_nil() {
        Err(order_error(state, &a, &b))
    } else {
        Ok(CompareOutcome::Call {
            handler: mm,
            a,
            b,
            invert: false,
        })
    }
}

pub fn less_equal(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<CompareOutcome> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Ok(CompareOutcome::Done(x <= y));
    }
    if a.is_string() && b.is_string() {
        return Ok(CompareOutcome::Done(!string_lt(state, b, a)));
    }
    let mm = get_binop_metamethod(state, &a, &b, TmKind::Le);
    if !mm.is_nil() {
        return Ok(CompareOutcome::Call {
            handler: mm,
            a,
            b,
            invert: false,
        });
    }
    // a <= b as not (b < a)
    let mm = get_binop_metamethod(state, &b, &a, TmKind::Lt);
    if mm.is_nil() {
        Err(order_error(state, &a, &b))
    } else {
        Ok(CompareOutcome::Call {
            handler: mm,
            a: b,
            b: a,
            invert: true,
        })
    }
}
