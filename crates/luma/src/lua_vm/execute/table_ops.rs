// Indexed access with the __index / __newindex chain.
//
// The chain walks table-valued handlers inline (no frames) and only surfaces
// a function-valued handler to the caller, which turns it into a real call
// with a Finish continuation. Chain length is capped like PUC-Lua.

use crate::lua_value::{LuaValue, TableError};
use crate::lua_vm::execute::metamethod::{get_metamethod, TmKind};
use crate::lua_vm::{LuaResult, LuaState};

/// Cycle limit for __index / __newindex chains.
pub const MAX_TAG_LOOP: usize = 2000;

pub enum IndexOutcome {
    Done(LuaValue),
    /// A function-valued __index: call `handler(target, key)`.
    Call {
        handler: LuaValue,
        target: LuaValue,
        key: LuaValue,
    },
}

pub fn index_value(
    state: &mut LuaState,
    target: LuaValue,
    key: LuaValue,
) -> LuaResult<IndexOutcome> {
    let mut t = target;
    for _ in 0..MAX_TAG_LOOP {
        if let Some(id) = t.as_table() {
            let found = state.heap.table_get(id, &key);
            if !found.is_nil() {
                return Ok(IndexOutcome::Done(found));
            }
            let mm = get_metamethod(state, &t, TmKind::Index);
            if mm.is_nil() {
                return Ok(IndexOutcome::Done(LuaValue::Nil));
            }
            if mm.is_function() {
                return Ok(IndexOutcome::Call {
                    handler: mm,
                    target: t,
                    key,
                });
            }
            t = mm;
        } else {
            let mm = get_metamethod(state, &t, TmKind::Index);
            if mm.is_nil() {
                return Err(state.type_error(&t, "index"));
            }
            if mm.is_function() {
                return Ok(IndexOutcome::Call {
                    handler: mm,
                    target: t,
                    key,
                });
            }
            t = mm;
        }
    }
    Err(state.rt_error("loop in gettable"))
}

pub enum NewIndexOutcome {
    Done,
    /// A function-valued __newindex: call `handler(target, key, value)`.
    Call {
        handler: LuaValue,
        target: LuaValue,
        key: LuaValue,
        value: LuaValue,
    },
}

pub fn newindex_value(
    state: &mut LuaState,
    target: LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<NewIndexOutcome> {
    let mut t = target;
    for _ in 0..MAX_TAG_LOOP {
        if let Some(id) = t.as_table() {
            let existing = state.heap.table_get(id, &key);
            if !existing.is_nil() {
                // Existing key: plain store, no metamethod consulted.
                let _ = state.heap.table_set(id, key, value);
                return Ok(NewIndexOutcome::Done);
            }
            let mm = get_metamethod(state, &t, TmKind::NewIndex);
            if mm.is_nil() {
                return match state.heap.table_set(id, key, value) {
                    Ok(()) => Ok(NewIndexOutcome::Done),
                    Err(TableError::NilKey) => Err(state.rt_error("table index is nil")),
                    Err(TableError::NanKey) => Err(state.rt_error("table index is NaN")),
                    Err(TableError::InvalidNext) => unreachable!(),
                };
            }
            if mm.is_function() {
                return Ok(NewIndexOutcome::Call {
                    handler: mm,
                    target: t,
                    key,
                    value,
                });
            }
            t = mm;
        } else {
            let mm = get_metamethod(state, &t, TmKind::NewIndex);
            if mm.is_nil() {
                return Err(state.type_error(&t, "index"));
            }
            if mm.is_function() {
                return Ok(NewIndexOutcome::Call {
                    handler: mm,
                    target: t,
                    key,
                    value,
                });
            }
            t = mm;
        }
    }
    Err(state.rt_error("loop in settable"))
}
