// Base library subset — the hooks the interpreter contract depends on.
//
// pcall/xpcall are the protected-call barriers; tostring/print/pairs/inext
// are written as explicit state machines so a __tostring/__pairs/__index
// handler that yields suspends them cleanly and resume re-enters at the
// parked step.

use std::io::Write;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, TableError, Varargs};
use crate::lua_vm::execute::metamethod::{get_metamethod, get_metatable, TmKind};
use crate::lua_vm::execute::table_ops::{index_value, IndexOutcome};
use crate::lua_vm::frame_flags::FLAG_YPCALL;
use crate::lua_vm::number::{str_to_number, str_to_number_base};
use crate::lua_vm::{FrameState, HostAction, HostFunction, LuaResult, LuaState};

pub fn create_base_lib() -> LibraryModule {
    crate::lib_module!("", {
        "assert" => HostFunction::plain("assert", base_assert),
        "error" => HostFunction::plain("error", base_error),
        "getmetatable" => HostFunction::plain("getmetatable", base_getmetatable),
        "setmetatable" => HostFunction::plain("setmetatable", base_setmetatable),
        "ipairs" => HostFunction::plain("ipairs", base_ipairs),
        "next" => HostFunction::plain("next", base_next),
        "pairs" => HostFunction::resumable("pairs", base_pairs, pairs_resume),
        "pcall" => HostFunction::protected("pcall", base_pcall, pcall_resume, pcall_on_error),
        "xpcall" => HostFunction::protected("xpcall", base_xpcall, pcall_resume, pcall_on_error),
        "print" => HostFunction::resumable("print", base_print, print_resume),
        "rawequal" => HostFunction::plain("rawequal", base_rawequal),
        "rawget" => HostFunction::plain("rawget", base_rawget),
        "rawlen" => HostFunction::plain("rawlen", base_rawlen),
        "rawset" => HostFunction::plain("rawset", base_rawset),
        "select" => HostFunction::plain("select", base_select),
        "tonumber" => HostFunction::plain("tonumber", base_tonumber),
        "tostring" => HostFunction::resumable("tostring", base_tostring, tostring_resume),
        "type" => HostFunction::plain("type", base_type),
        "load" => HostFunction::plain("load", base_load),
    })
}

/// The `next` and `inext` iterator functions are handed out by pairs/ipairs.
pub const NEXT: HostFunction = HostFunction::plain("next", base_next);
const INEXT: HostFunction = HostFunction::resumable("inext", base_inext, inext_resume);

fn return_values(l: &mut LuaState, values: &[LuaValue]) -> LuaResult<HostAction> {
    for &v in values {
        l.push_value(v)?;
    }
    Ok(HostAction::Return(values.len()))
}

// ===== protected calls =====

fn base_pcall(l: &mut LuaState) -> LuaResult<HostAction> {
    let n = l.arg_count();
    if n == 0 {
        return Err(l.arg_error(1, "value", &LuaValue::Nil));
    }
    // The callee and its arguments already sit contiguously in this frame:
    // become a barrier and run them under it.
    l.set_frame_flag(FLAG_YPCALL);
    l.set_frame_state(FrameState::Protected {
        handler: LuaValue::Nil,
    });
    let func_idx = l.cur().current_frame().unwrap().base;
    Ok(HostAction::Call {
        func_idx,
        nargs: n - 1,
    })
}

fn base_xpcall(l: &mut LuaState) -> LuaResult<HostAction> {
    let n = l.arg_count();
    if n < 2 {
        return Err(l.arg_error(2, "value", &LuaValue::Nil));
    }
    let handler = l.arg(2);
    l.set_frame_flag(FLAG_YPCALL);
    l.set_frame_state(FrameState::Protected { handler });
    let f = l.arg(1);
    let extra: Vec<LuaValue> = (3..=n).map(|i| l.arg(i)).collect();
    l.begin_call(f, &extra)
}

fn pcall_resume(l: &mut LuaState, results: Varargs) -> LuaResult<HostAction> {
    l.push_value(LuaValue::Boolean(true))?;
    let n = results.count();
    for i in 1..=n {
        l.push_value(results.arg(i))?;
    }
    Ok(HostAction::Return(1 + n as usize))
}

fn pcall_on_error(l: &mut LuaState, err: LuaValue) -> LuaResult<HostAction> {
    l.push_value(LuaValue::Boolean(false))?;
    l.push_value(err)?;
    Ok(HostAction::Return(2))
}

// ===== errors =====

fn base_error(l: &mut LuaState) -> LuaResult<HostAction> {
    let msg = l.arg(1);
    let level = l.arg(2).as_number().unwrap_or(1.0).max(0.0) as u32;
    if level > 0 {
        if let Some(id) = msg.as_string() {
            let prefix = l.where_prefix_level(level);
            if !prefix.is_empty() {
                let text = format!("{}{}", prefix, l.heap.string(id).display());
                let v = l.create_string(&text)?;
                return Err(l.rt_error_value(v));
            }
        }
    }
    Err(l.rt_error_value(msg))
}

fn base_assert(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    if v.is_truthy() {
        let n = l.arg_count();
        let all: Vec<LuaValue> = (1..=n).map(|i| l.arg(i)).collect();
        return return_values(l, &all);
    }
    let msg = l.arg(2);
    if l.arg_count() >= 2 {
        Err(l.rt_error_value(msg))
    } else {
        Err(l.rt_error("assertion failed!"))
    }
}

// ===== metatables =====

fn base_getmetatable(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    match get_metatable(l, &v) {
        None => return_values(l, &[LuaValue::Nil]),
        Some(mt) => {
            // __metatable hides the real metatable.
            let shield_key = l.tm_names[TmKind::Metatable as usize];
            let shield = l.heap.table_get(mt, &shield_key);
            if shield.is_nil() {
                return_values(l, &[LuaValue::Table(mt)])
            } else {
                return_values(l, &[shield])
            }
        }
    }
}

fn base_setmetatable(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = match l.arg(1).as_table() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "table", &v));
        }
    };
    let mt_value = l.arg(2);
    let new_mt = match mt_value {
        LuaValue::Nil => None,
        LuaValue::Table(id) => Some(id),
        other => return Err(l.arg_error(2, "nil or table", &other)),
    };
    if let Some(old) = l.heap.table(t).metatable {
        let shield_key = l.tm_names[TmKind::Metatable as usize];
        if !l.heap.table_get(old, &shield_key).is_nil() {
            return Err(l.rt_error("cannot change a protected metatable"));
        }
    }
    l.heap.table_mut(t).metatable = new_mt;
    // Refresh weakness from __mode. Without a tracing collector the marks
    // are recorded but entries stay strong (see DESIGN.md).
    let (weak_k, weak_v) = match new_mt {
        Some(mt) => {
            let mode_key = l.tm_names[TmKind::Mode as usize];
            match l.heap.table_get(mt, &mode_key).as_string() {
                Some(id) => {
                    let bytes = l.heap.string_bytes(id);
                    (bytes.contains(&b'k'), bytes.contains(&b'v'))
                }
                None => (false, false),
            }
        }
        None => (false, false),
    };
    let table = l.heap.table_mut(t);
    table.weak_keys = weak_k;
    table.weak_values = weak_v;
    return_values(l, &[LuaValue::Table(t)])
}

// ===== iteration =====

fn base_next(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = match l.arg(1).as_table() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "table", &v));
        }
    };
    let key = l.arg(2);
    match l.heap.table_next(t, &key) {
        Ok(Some((k, v))) => return_values(l, &[k, v]),
        Ok(None) => return_values(l, &[LuaValue::Nil]),
        Err(TableError::InvalidNext) => Err(l.rt_error("invalid key to 'next'")),
        Err(_) => unreachable!(),
    }
}

fn base_pairs(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = l.arg(1);
    let mm = get_metamethod(l, &t, TmKind::Pairs);
    if mm.is_nil() {
        if !t.is_table() {
            return Err(l.arg_error(1, "table", &t));
        }
        let iter = l.create_host_function(NEXT)?;
        return return_values(l, &[iter, t, LuaValue::Nil]);
    }
    l.begin_call(mm, &[t])
}

fn pairs_resume(l: &mut LuaState, results: Varargs) -> LuaResult<HostAction> {
    return_values(l, &[results.arg(1), results.arg(2), results.arg(3)])
}

fn base_ipairs(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = l.arg(1);
    if t.is_nil() {
        return Err(l.arg_error(1, "table", &t));
    }
    let iter = l.create_host_function(INEXT)?;
    return_values(l, &[iter, t, LuaValue::Number(0.0)])
}

fn inext_finish(l: &mut LuaState, i: i64, v: LuaValue) -> LuaResult<HostAction> {
    if v.is_nil() {
        return_values(l, &[LuaValue::Nil])
    } else {
        return_values(l, &[LuaValue::Number(i as f64), v])
    }
}

fn base_inext(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = l.arg(1);
    let i = match l.arg(2).as_number() {
        Some(n) => n as i64 + 1,
        None => {
            let v = l.arg(2);
            return Err(l.arg_error(2, "number", &v));
        }
    };
    // Fast path only for a table with no metatable at all: any metatable
    // (even without __index today) must be observed by ipairs.
    if let Some(id) = t.as_table() {
        if l.heap.table(id).metatable.is_none() {
            let v = l.heap.table_get_int(id, i);
            return inext_finish(l, i, v);
        }
    }
    match index_value(l, t, LuaValue::Number(i as f64))? {
        IndexOutcome::Done(v) => inext_finish(l, i, v),
        IndexOutcome::Call {
            handler,
            target,
            key,
        } => {
            l.set_frame_state(FrameState::Host {
                step: 0,
                slot: LuaValue::Number(i as f64),
            });
            l.begin_call(handler, &[target, key])
        }
    }
}

fn inext_resume(l: &mut LuaState, results: Varargs) -> LuaResult<HostAction> {
    let i = match l.take_frame_state() {
        Some(FrameState::Host { slot, .. }) => slot.as_number().unwrap_or(0.0) as i64,
        _ => 0,
    };
    inext_finish(l, i, results.first())
}

// ===== raw access =====

fn base_rawget(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = match l.arg(1).as_table() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "table", &v));
        }
    };
    let key = l.arg(2);
    let v = l.heap.table_get(t, &key);
    return_values(l, &[v])
}

fn base_rawset(l: &mut LuaState) -> LuaResult<HostAction> {
    let t = match l.arg(1).as_table() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "table", &v));
        }
    };
    let key = l.arg(2);
    let value = l.arg(3);
    match l.heap.table_set(t, key, value) {
        Ok(()) => return_values(l, &[LuaValue::Table(t)]),
        Err(TableError::NilKey) => Err(l.rt_error("table index is nil")),
        Err(TableError::NanKey) => Err(l.rt_error("table index is NaN")),
        Err(TableError::InvalidNext) => unreachable!(),
    }
}

fn base_rawequal(l: &mut LuaState) -> LuaResult<HostAction> {
    let (a, b) = (l.arg(1), l.arg(2));
    let eq = l.heap.raw_equal(&a, &b);
    return_values(l, &[LuaValue::Boolean(eq)])
}

fn base_rawlen(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    let n = match v {
        LuaValue::Table(id) => l.heap.table_len(id) as f64,
        LuaValue::String(id) => l.heap.string(id).len() as f64,
        other => return Err(l.arg_error(1, "table or string", &other)),
    };
    return_values(l, &[LuaValue::Number(n)])
}

// ===== conversions & misc =====

fn base_type(l: &mut LuaState) -> LuaResult<HostAction> {
    if l.arg_count() == 0 {
        return Err(l.arg_error(1, "value", &LuaValue::Nil));
    }
    let name = l.arg(1).type_name();
    let s = l.create_string(name)?;
    return_values(l, &[s])
}

fn base_tonumber(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    if l.arg_count() < 2 || l.arg(2).is_nil() {
        let out = match v {
            LuaValue::Number(_) => v,
            LuaValue::String(id) => {
                let text = l.heap.string(id).display().into_owned();
                match str_to_number(&text) {
                    Some(n) => LuaValue::Number(n),
                    None => LuaValue::Nil,
                }
            }
            _ => LuaValue::Nil,
        };
        return return_values(l, &[out]);
    }
    let base = match l.arg(2).as_number() {
        Some(b) if (2.0..=36.0).contains(&b) => b as u32,
        _ => return Err(l.rt_error("bad argument #2 (base out of range)")),
    };
    let id = match v.as_string() {
        Some(id) => id,
        None => return Err(l.arg_error(1, "string", &v)),
    };
    let text = l.heap.string(id).display().into_owned();
    let out = match str_to_number_base(&text, base) {
        Some(n) => LuaValue::Number(n),
        None => LuaValue::Nil,
    };
    return_values(l, &[out])
}

fn base_tostring(l: &mut LuaState) -> LuaResult<HostAction> {
    if l.arg_count() == 0 {
        return Err(l.arg_error(1, "value", &LuaValue::Nil));
    }
    let v = l.arg(1);
    let mm = get_metamethod(l, &v, TmKind::ToString);
    if mm.is_nil() {
        let text = l.display_value(&v);
        let s = l.create_string(&text)?;
        return return_values(l, &[s]);
    }
    l.begin_call(mm, &[v])
}

fn tostring_resume(l: &mut LuaState, results: Varargs) -> LuaResult<HostAction> {
    let r = results.first();
    if !r.is_string() {
        return Err(l.rt_error("'__tostring' must return a string"));
    }
    return_values(l, &[r])
}

fn base_select(l: &mut LuaState) -> LuaResult<HostAction> {
    let n = l.arg_count();
    let selector = l.arg(1);
    if let Some(id) = selector.as_string() {
        if l.heap.string_bytes(id) == b"#" {
            return return_values(l, &[LuaValue::Number((n - 1) as f64)]);
        }
    }
    let i = match selector.as_number() {
        Some(i) if i != 0.0 => i as i64,
        _ => return Err(l.arg_error(1, "number", &selector)),
    };
    let rest: Vec<LuaValue> = if i < 0 {
        let start = (n as i64 + i).max(1) as u32 + 1;
        (start..=n).map(|j| l.arg(j)).collect()
    } else {
        ((i as u32 + 1)..=n).map(|j| l.arg(j)).collect()
    };
    return_values(l, &rest)
}

fn base_print(l: &mut LuaState) -> LuaResult<HostAction> {
    print_step(l, 1)
}

fn print_step(l: &mut LuaState, mut i: u32) -> LuaResult<HostAction> {
    let n = l.arg_count();
    let mut out = std::io::stdout();
    while i <= n {
        let v = l.arg(i);
        let mm = get_metamethod(l, &v, TmKind::ToString);
        if !mm.is_nil() {
            l.set_frame_state(FrameState::Host {
                step: i,
                slot: LuaValue::Nil,
            });
            return l.begin_call(mm, &[v]);
        }
        let text = l.display_value(&v);
        if i > 1 {
            let _ = out.write_all(b"\t");
        }
        let _ = out.write_all(text.as_bytes());
        i += 1;
    }
    let _ = out.write_all(b"\n");
    Ok(HostAction::Return(0))
}

fn print_resume(l: &mut LuaState, results: Varargs) -> LuaResult<HostAction> {
    let i = match l.take_frame_state() {
        Some(FrameState::Host { step, .. }) => step,
        _ => 1,
    };
    let text = {
        let r = results.first();
        l.display_value(&r)
    };
    let mut out = std::io::stdout();
    if i > 1 {
        let _ = out.write_all(b"\t");
    }
    let _ = out.write_all(text.as_bytes());
    print_step(l, i + 1)
}

fn base_load(l: &mut LuaState) -> LuaResult<HostAction> {
    let chunk = match l.arg(1).as_string() {
        Some(id) => l.heap.string_bytes(id).to_vec(),
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "string", &v));
        }
    };
    let name = match l.arg(2).as_string() {
        Some(id) => l.heap.string(id).display().into_owned(),
        None => "=(load)".to_string(),
    };
    let mode = match l.arg(3).as_string() {
        Some(id) => l.heap.string(id).display().into_owned(),
        None => "bt".to_string(),
    };
    let env = match l.arg(4) {
        LuaValue::Nil => None,
        other => Some(other),
    };
    match l.load(&chunk, &name, &mode, env) {
        Ok(closure) => return_values(l, &[closure]),
        Err(msg) => {
            let m = l.create_string(&msg)?;
            return_values(l, &[LuaValue::Nil, m])
        }
    }
}
