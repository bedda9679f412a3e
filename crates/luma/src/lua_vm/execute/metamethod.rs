// Metamethod events and lookup.
//
// The first six events are "fast": each table carries a flags byte caching
// which of them its metatable is known to lack, so the common no-metamethod
// case costs one bit test. The cache is cleared whenever the metatable table
// itself is written to.

use crate::heap::TableId;
use crate::lua_value::LuaValue;
use crate::lua_vm::LuaState;

/// Metamethod events of Lua 5.2, fast (flag-cached) events first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Len,
    Eq,
    // events below are not flag-cached
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Lt,
    Le,
    Concat,
    Call,
    ToString,
    Metatable,
    Name,
    Pairs,
}

pub const TM_COUNT: usize = 21;
pub const FAST_TM_COUNT: usize = 6;

pub const EVENT_NAMES: [&str; TM_COUNT] = [
    "__index",
    "__newindex",
    "__gc",
    "__mode",
    "__len",
    "__eq",
    "__add",
    "__sub",
    "__mul",
    "__div",
    "__mod",
    "__pow",
    "__unm",
    "__lt",
    "__le",
    "__concat",
    "__call",
    "__tostring",
    "__metatable",
    "__name",
    "__pairs",
];

impl TmKind {
    pub fn event_name(self) -> &'static str {
        EVENT_NAMES[self as usize]
    }

    /// Operator spelling for "attempt to perform arithmetic" messages.
    pub fn op_name(self) -> &'static str {
        match self {
            TmKind::Add => "add",
            TmKind::Sub => "sub",
            TmKind::Mul => "mul",
            TmKind::Div => "div",
            TmKind::Mod => "mod",
            TmKind::Pow => "pow",
            TmKind::Unm => "unm",
            TmKind::Concat => "concatenate",
            _ => self.event_name(),
        }
    }
}

/// Metatable of a value: per-object for tables and userdata, per-type for
/// everything else.
pub fn get_metatable(state: &LuaState, v: &LuaValue) -> Option<TableId> {
    match v {
        LuaValue::Table(id) => state.heap.table(*id).metatable,
        LuaValue::Userdata(id) => state.heap.userdata(*id).metatable,
        _ => state.type_metatables[v.type_tag()],
    }
}

/// Look up event `tm` for `v`, consulting and maintaining the absence cache.
pub fn get_metamethod(state: &mut LuaState, v: &LuaValue, tm: TmKind) -> LuaValue {
    let mt = match get_metatable(state, v) {
        Some(mt) => mt,
        None => return LuaValue::Nil,
    };
    let idx = tm as usize;
    let fast = idx < FAST_TM_COUNT;
    if fast && state.heap.table(mt).flags & (1 << idx) != 0 {
        return LuaValue::Nil;
    }
    let key = state.tm_names[idx];
    let found = state.heap.table_get(mt, &key);
    if found.is_nil() && fast {
        state.heap.table_mut(mt).flags |= 1 << idx;
    }
    found
}

/// Binary-operator lookup: the left operand's handler wins, then the right's.
pub fn get_binop_metamethod(
    state: &mut LuaState,
    a: &LuaValue,
    b: &LuaValue,
    tm: TmKind,
) -> LuaValue {
    let mm = get_metamethod(state, a, tm);
    if !mm.is_nil() {
        return mm;
    }
    get_metamethod(state, b, tm)
}
