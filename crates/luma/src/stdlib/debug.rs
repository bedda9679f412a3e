// debug.* subset: introspection, hooks, tracebacks.

use crate::heap::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::{hook_mask, LuaValue};
use crate::lua_vm::debug_info::{
    frame_index, frame_info, get_local, get_upvalue, parse_hook_mask, set_hook, set_local,
    set_upvalue, traceback,
};
use crate::lua_vm::execute::metamethod::get_metatable;
use crate::lua_vm::{HostAction, HostFunction, LuaResult, LuaState};

pub fn create_debug_lib() -> LibraryModule {
    crate::lib_module!("debug", {
        "traceback" => HostFunction::plain("traceback", debug_traceback),
        "sethook" => HostFunction::plain("sethook", debug_sethook),
        "gethook" => HostFunction::plain("gethook", debug_gethook),
        "getinfo" => HostFunction::plain("getinfo", debug_getinfo),
        "getlocal" => HostFunction::plain("getlocal", debug_getlocal),
        "setlocal" => HostFunction::plain("setlocal", debug_setlocal),
        "getupvalue" => HostFunction::plain("getupvalue", debug_getupvalue),
        "setupvalue" => HostFunction::plain("setupvalue", debug_setupvalue),
        "getmetatable" => HostFunction::plain("getmetatable", debug_getmetatable),
        "setmetatable" => HostFunction::plain("setmetatable", debug_setmetatable),
        "getregistry" => HostFunction::plain("getregistry", debug_getregistry),
    })
}

/// Shift arguments when the optional leading thread argument is present.
fn thread_and_shift(l: &LuaState) -> (ThreadId, u32) {
    match l.arg(1).as_thread() {
        Some(t) => (t, 1),
        None => (l.current, 0),
    }
}

fn debug_traceback(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, shift) = thread_and_shift(l);
    let msg_val = l.arg(shift + 1);
    // A non-string, non-nil message is passed through untouched.
    if !msg_val.is_nil() && !msg_val.is_string() && !msg_val.is_number() {
        l.push_value(msg_val)?;
        return Ok(HostAction::Return(1));
    }
    let msg = if msg_val.is_nil() {
        None
    } else {
        Some(l.display_value(&msg_val))
    };
    let level = l.arg(shift + 2).as_number().unwrap_or(1.0).max(0.0) as usize;
    let text = traceback(l, t, msg.as_deref(), level);
    let s = l.create_string(&text)?;
    l.push_value(s)?;
    Ok(HostAction::Return(1))
}

fn debug_sethook(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, shift) = thread_and_shift(l);
    let func = l.arg(shift + 1);
    let mask_str = match l.arg(shift + 2).as_string() {
        Some(id) => l.heap.string(id).display().into_owned(),
        None => String::new(),
    };
    let count = l.arg(shift + 3).as_number().unwrap_or(0.0).max(0.0) as u32;
    let mask = parse_hook_mask(&mask_str, count);
    set_hook(l, t, func, mask, count);
    Ok(HostAction::Return(0))
}

fn debug_gethook(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, _) = thread_and_shift(l);
    let hook = l.thread(t).hook.clone();
    if hook.func.is_nil() {
        l.push_value(LuaValue::Nil)?;
        return Ok(HostAction::Return(1));
    }
    let mut mask_str = String::new();
    if hook.mask & hook_mask::CALL != 0 {
        mask_str.push('c');
    }
    if hook.mask & hook_mask::RETURN != 0 {
        mask_str.push('r');
    }
    if hook.mask & hook_mask::LINE != 0 {
        mask_str.push('l');
    }
    let mask_val = l.create_string(&mask_str)?;
    l.push_value(hook.func)?;
    l.push_value(mask_val)?;
    l.push_value(LuaValue::Number(hook.count as f64))?;
    Ok(HostAction::Return(3))
}

fn push_info_field(
    l: &mut LuaState,
    table: crate::heap::TableId,
    key: &str,
    value: LuaValue,
) -> LuaResult<()> {
    let k = l.create_string(key)?;
    let _ = l.heap.table_set(table, k, value);
    Ok(())
}

fn debug_getinfo(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, shift) = thread_and_shift(l);
    let subject = l.arg(shift + 1);
    let info = match subject.as_number() {
        Some(level) => {
            let fidx = match frame_index(l, t, level.max(0.0) as usize) {
                Some(fidx) => fidx,
                None => {
                    l.push_value(LuaValue::Nil)?;
                    return Ok(HostAction::Return(1));
                }
            };
            frame_info(l, t, fidx)
        }
        None => {
            if !subject.is_function() {
                return Err(l.arg_error(shift + 1, "function or level", &subject));
            }
            function_info(l, subject)
        }
    };
    let info = match info {
        Some(info) => info,
        None => {
            l.push_value(LuaValue::Nil)?;
            return Ok(HostAction::Return(1));
        }
    };

    let out = l.create_table(0, 12)?.as_table().unwrap();
    if let Some(source) = &info.source {
        let v = l.create_string(source)?;
        push_info_field(l, out, "source", v)?;
    }
    if let Some(short) = &info.short_src {
        let v = l.create_string(short)?;
        push_info_field(l, out, "short_src", v)?;
    }
    if let Some(what) = info.what {
        let v = l.create_string(what)?;
        push_info_field(l, out, "what", v)?;
    }
    if let Some(line) = info.current_line {
        push_info_field(l, out, "currentline", LuaValue::Number(line as f64))?;
    }
    if let Some(line) = info.line_defined {
        push_info_field(l, out, "linedefined", LuaValue::Number(line as f64))?;
    }
    if let Some(line) = info.last_line_defined {
        push_info_field(l, out, "lastlinedefined", LuaValue::Number(line as f64))?;
    }
    if let Some(nups) = info.nups {
        push_info_field(l, out, "nups", LuaValue::Number(nups as f64))?;
    }
    if let Some(nparams) = info.nparams {
        push_info_field(l, out, "nparams", LuaValue::Number(nparams as f64))?;
    }
    if let Some(vararg) = info.is_vararg {
        push_info_field(l, out, "isvararg", LuaValue::Boolean(vararg))?;
    }
    if let Some(name) = &info.name {
        let v = l.create_string(name)?;
        push_info_field(l, out, "name", v)?;
    }
    if let Some(tail) = info.is_tail_call {
        push_info_field(l, out, "istailcall", LuaValue::Boolean(tail))?;
    }
    if let Some(func) = info.func {
        push_info_field(l, out, "func", func)?;
    }
    l.push_value(LuaValue::Table(out))?;
    Ok(HostAction::Return(1))
}

/// getinfo on a function value rather than a stack level.
fn function_info(
    l: &LuaState,
    func: LuaValue,
) -> Option<crate::lua_vm::debug_info::DebugInfo> {
    use crate::lua_vm::debug_info::DebugInfo;
    use crate::lua_vm::LuaFunction;
    let id = func.as_function()?;
    let mut info = DebugInfo {
        func: Some(func),
        ..DebugInfo::default()
    };
    match l.heap.function(id) {
        LuaFunction::Lua(closure) => {
            let proto = &closure.proto;
            info.source = Some(proto.source.to_string());
            info.short_src = Some(proto.short_src());
            info.line_defined = Some(proto.line_defined);
            info.last_line_defined = Some(proto.last_line_defined);
            info.what = Some(if proto.is_main_chunk() { "main" } else { "Lua" });
            info.nups = Some(closure.upvalues.len() as u8);
            info.nparams = Some(proto.num_params);
            info.is_vararg = Some(proto.is_vararg);
        }
        LuaFunction::Host(host) => {
            info.source = Some("=[C]".to_string());
            info.short_src = Some("[C]".to_string());
            info.what = Some("C");
            info.name = Some(host.func.name.to_string());
        }
    }
    Some(info)
}

fn debug_getlocal(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, shift) = thread_and_shift(l);
    let level = match l.arg(shift + 1).as_number() {
        Some(n) => n.max(0.0) as usize,
        None => {
            let v = l.arg(shift + 1);
            return Err(l.arg_error(shift + 1, "number", &v));
        }
    };
    let n = l.arg(shift + 2).as_number().unwrap_or(0.0) as usize;
    let fidx = match frame_index(l, t, level) {
        Some(fidx) => fidx,
        None => return Err(l.rt_error("level out of range")),
    };
    match get_local(l, t, fidx, n) {
        Some((name, value)) => {
            let name_val = l.create_string(&name)?;
            l.push_value(name_val)?;
            l.push_value(value)?;
            Ok(HostAction::Return(2))
        }
        None => {
            l.push_value(LuaValue::Nil)?;
            Ok(HostAction::Return(1))
        }
    }
}

fn debug_setlocal(l: &mut LuaState) -> LuaResult<HostAction> {
    let (t, shift) = thread_and_shift(l);
    let level = l.arg(shift + 1).as_number().unwrap_or(0.0).max(0.0) as usize;
    let n = l.arg(shift + 2).as_number().unwrap_or(0.0) as usize;
    let value = l.arg(shift + 3);
    let fidx = match frame_index(l, t, level) {
        Some(fidx) => fidx,
        None => return Err(l.rt_error("level out of range")),
    };
    match set_local(l, t, fidx, n, value) {
        Some(name) => {
            let name_val = l.create_string(&name)?;
            l.push_value(name_val)?;
            Ok(HostAction::Return(1))
        }
        None => {
            l.push_value(LuaValue::Nil)?;
            Ok(HostAction::Return(1))
        }
    }
}

fn debug_getupvalue(l: &mut LuaState) -> LuaResult<HostAction> {
    let func = l.arg(1);
    let n = l.arg(2).as_number().unwrap_or(0.0) as usize;
    match get_upvalue(l, func, n) {
        Some((name, value)) => {
            let name_val = l.create_string(&name)?;
            l.push_value(name_val)?;
            l.push_value(value)?;
            Ok(HostAction::Return(2))
        }
        None => {
            l.push_value(LuaValue::Nil)?;
            Ok(HostAction::Return(1))
        }
    }
}

fn debug_setupvalue(l: &mut LuaState) -> LuaResult<HostAction> {
    let func = l.arg(1);
    let n = l.arg(2).as_number().unwrap_or(0.0) as usize;
    let value = l.arg(3);
    match set_upvalue(l, func, n, value) {
        Some(name) => {
            let name_val = l.create_string(&name)?;
            l.push_value(name_val)?;
            Ok(HostAction::Return(1))
        }
        None => {
            l.push_value(LuaValue::Nil)?;
            Ok(HostAction::Return(1))
        }
    }
}

/// Raw metatable read: ignores __metatable shielding.
fn debug_getmetatable(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    let out = match get_metatable(l, &v) {
        Some(mt) => LuaValue::Table(mt),
        None => LuaValue::Nil,
    };
    l.push_value(out)?;
    Ok(HostAction::Return(1))
}

/// Raw metatable write: ignores __metatable shielding.
fn debug_setmetatable(l: &mut LuaState) -> LuaResult<HostAction> {
    let v = l.arg(1);
    let mt = match l.arg(2) {
        LuaValue::Nil => None,
        LuaValue::Table(id) => Some(id),
        other => return Err(l.arg_error(2, "nil or table", &other)),
    };
    match v {
        LuaValue::Table(id) => l.heap.table_mut(id).metatable = mt,
        LuaValue::Userdata(id) => l.heap.userdata_mut(id).metatable = mt,
        other => l.type_metatables[other.type_tag()] = mt,
    }
    l.push_value(v)?;
    Ok(HostAction::Return(1))
}

fn debug_getregistry(l: &mut LuaState) -> LuaResult<HostAction> {
    let registry = l.registry_value();
    l.push_value(registry)?;
    Ok(HostAction::Return(1))
}
