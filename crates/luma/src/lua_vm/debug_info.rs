// Frame introspection, hooks and tracebacks.
//
// Mirrors the C `lua_Debug` surface: a DebugInfo snapshot per frame,
// local/upvalue access by index, and traceback assembly. This is the whole
// observability surface of the runtime; error messages borrow its
// source:line formatting.

use crate::heap::ThreadId;
use crate::lua_value::{hook_mask, LuaValue};
use crate::lua_vm::frame::{frame_flags, LuaFunction};
use crate::lua_vm::LuaState;

/// Snapshot of one frame (or one function) for `debug.getinfo`.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    /// Full chunk name (`=text`, `@path`, or the source itself).
    pub source: Option<String>,
    /// Display form, truncated to 60 bytes.
    pub short_src: Option<String>,
    /// Line of the function definition (0 for a main chunk).
    pub line_defined: Option<u32>,
    pub last_line_defined: Option<u32>,
    /// "Lua", "main", or "C".
    pub what: Option<&'static str>,
    pub current_line: Option<u32>,
    pub nups: Option<u8>,
    pub nparams: Option<u8>,
    pub is_vararg: Option<bool>,
    /// Host function name, when known.
    pub name: Option<String>,
    pub is_tail_call: Option<bool>,
    pub func: Option<LuaValue>,
}

/// Frame index for `level`: 0 is the running function, 1 its caller.
pub fn frame_index(state: &LuaState, t: ThreadId, level: usize) -> Option<usize> {
    let depth = state.thread(t).frames.len();
    depth.checked_sub(level + 1)
}

/// Fill a DebugInfo from the frame at `fidx`.
pub fn frame_info(state: &LuaState, t: ThreadId, fidx: usize) -> Option<DebugInfo> {
    let frame = state.thread(t).frames.get(fidx)?;
    let mut info = DebugInfo {
        func: Some(frame.func),
        is_tail_call: Some(frame.has_flag(frame_flags::FLAG_TAIL)),
        ..DebugInfo::default()
    };
    match frame.func.as_function().map(|id| state.heap.function(id)) {
        Some(LuaFunction::Lua(closure)) => {
            let proto = &closure.proto;
            info.source = Some(proto.source.to_string());
            info.short_src = Some(proto.short_src());
            info.line_defined = Some(proto.line_defined);
            info.last_line_defined = Some(proto.last_line_defined);
            info.what = Some(if proto.is_main_chunk() { "main" } else { "Lua" });
            info.current_line = Some(proto.line_at(frame.pc.saturating_sub(1)));
            info.nups = Some(closure.upvalues.len() as u8);
            info.nparams = Some(proto.num_params);
            info.is_vararg = Some(proto.is_vararg);
        }
        Some(LuaFunction::Host(host)) => {
            info.source = Some("=[C]".to_string());
            info.short_src = Some("[C]".to_string());
            info.what = Some("C");
            info.name = Some(host.func.name.to_string());
        }
        None => return None,
    }
    Some(info)
}

/// One `\tsource:line: in ...` traceback line for the frame at `fidx`.
fn frame_line(state: &LuaState, t: ThreadId, fidx: usize) -> String {
    let info = match frame_info(state, t, fidx) {
        Some(info) => info,
        None => return "\t?: in ?".to_string(),
    };
    let src = info.short_src.as_deref().unwrap_or("?");
    match info.what {
        Some("C") => format!(
            "\t[C]: in function '{}'",
            info.name.as_deref().unwrap_or("?")
        ),
        Some("main") => format!(
            "\t{}:{}: in main chunk",
            src,
            info.current_line.unwrap_or(0)
        ),
        _ => format!(
            "\t{}:{}: in function <{}:{}>",
            src,
            info.current_line.unwrap_or(0),
            src,
            info.line_defined.unwrap_or(0)
        ),
    }
}

/// Assemble a traceback of `t` starting at `level`, prefixed by `msg`.
pub fn traceback(state: &LuaState, t: ThreadId, msg: Option<&str>, level: usize) -> String {
    let mut out = String::new();
    if let Some(msg) = msg {
        out.push_str(msg);
        out.push('\n');
    }
    out.push_str("stack traceback:");
    let depth = state.thread(t).frames.len();
    for fidx in (0..depth.saturating_sub(level)).rev() {
        out.push('\n');
        out.push_str(&frame_line(state, t, fidx));
        if state.thread(t).frames[fidx].has_flag(frame_flags::FLAG_TAIL) {
            out.push_str("\n\t(...tail calls...)");
        }
    }
    out
}

/// Read local `n` (1-based) of the frame at `fidx`: its name from the locvar
/// table and its current value.
pub fn get_local(
    state: &LuaState,
    t: ThreadId,
    fidx: usize,
    n: usize,
) -> Option<(String, LuaValue)> {
    let frame = state.thread(t).frames.get(fidx)?;
    let name = local_name(state, t, fidx, n)?;
    let value = state.thread(t).registers[frame.base as usize + n - 1];
    Some((name, value))
}

/// Write local `n` of the frame at `fidx`; returns its name on success.
pub fn set_local(
    state: &mut LuaState,
    t: ThreadId,
    fidx: usize,
    n: usize,
    value: LuaValue,
) -> Option<String> {
    let name = local_name(state, t, fidx, n)?;
    let base = state.thread(t).frames.get(fidx)?.base;
    state.thread_mut(t).registers[base as usize + n - 1] = value;
    Some(name)
}

fn local_name(state: &LuaState, t: ThreadId, fidx: usize, n: usize) -> Option<String> {
    let frame = state.thread(t).frames.get(fidx)?;
    let id = frame.func.as_function()?;
    let closure = state.heap.function(id).as_lua()?;
    closure
        .proto
        .local_name(n, frame.pc.saturating_sub(1))
        .map(|s| s.to_string())
}

/// Read upvalue `n` (1-based) of a closure value.
pub fn get_upvalue(state: &LuaState, func: LuaValue, n: usize) -> Option<(String, LuaValue)> {
    let id = func.as_function()?;
    let closure = state.heap.function(id).as_lua()?;
    let cell = *closure.upvalues.get(n - 1)?;
    let name = closure
        .proto
        .upvalues
        .get(n - 1)
        .map(|d| d.name.to_string())
        .unwrap_or_default();
    Some((name, state.read_upvalue(cell)))
}

/// Write upvalue `n` of a closure value; returns its name on success.
pub fn set_upvalue(
    state: &mut LuaState,
    func: LuaValue,
    n: usize,
    value: LuaValue,
) -> Option<String> {
    let id = func.as_function()?;
    let closure = state.heap.function(id).as_lua()?;
    let cell = *closure.upvalues.get(n - 1)?;
    let name = closure
        .proto
        .upvalues
        .get(n - 1)
        .map(|d| d.name.to_string())
        .unwrap_or_default();
    state.write_upvalue(cell, value);
    Some(name)
}

/// Install (or clear, with a nil function) the debug hook of thread `t`.
pub fn set_hook(state: &mut LuaState, t: ThreadId, func: LuaValue, mask: u8, count: u32) {
    let hook = &mut state.thread_mut(t).hook;
    if func.is_nil() || mask == 0 {
        hook.func = LuaValue::Nil;
        hook.mask = 0;
        hook.count = 0;
    } else {
        hook.func = func;
        hook.mask = mask;
        hook.count = count;
    }
    hook.counter = count.max(1);
    hook.last_line = 0;
    hook.fired_at = None;
}

/// Parse a `"crl"` mask string (plus a nonzero count for COUNT hooks).
pub fn parse_hook_mask(mask: &str, count: u32) -> u8 {
    let mut bits = 0;
    for c in mask.chars() {
        match c {
            'c' => bits |= hook_mask::CALL,
            'r' => bits |= hook_mask::RETURN,
            'l' => bits |= hook_mask::LINE,
            _ => {}
        }
    }
    if count > 0 {
        bits |= hook_mask::COUNT;
    }
    bits
}
