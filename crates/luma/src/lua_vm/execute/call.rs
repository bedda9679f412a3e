// Call and return protocol.
//
// CALL pushes a frame and hands control back to the dispatch loop; nothing
// here re-enters the interpreter, so the native stack never deepens with the
// Lua stack. TAILCALL replaces the running frame in place. RETURN moves the
// results to the callee slot, honours the caller's expected count, and routes
// them to whichever continuation the parent frame parked.

use crate::heap::ThreadId;
use crate::lua_value::{hook_mask, LuaValue, Varargs};
use crate::lua_vm::execute::metamethod::{get_metamethod, TmKind};
use crate::lua_vm::frame::{frame_flags::*, DebugFrame, LuaFunction};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Longest `__call` metamethod chain before "'__call' chain too long".
const MAX_CALL_CHAIN: u32 = 16;

/// Where control goes after a return.
pub enum ReturnFlow {
    /// Keep running the new top frame.
    Continue,
    /// The frame stack emptied; final results are in `thread.transfer`.
    ThreadDone,
}

/// Resolve the callable at `func_idx` (following `__call`) and push its
/// frame. `nargs` values sit above the callable; `want` is the caller's
/// expected result count (-1 for all).
pub fn push_call(
    state: &mut LuaState,
    t: ThreadId,
    func_idx: u32,
    mut nargs: u32,
    want: i32,
    extra_flags: u8,
) -> LuaResult<()> {
    if state.thread(t).frames.len() + 1 > state.options.max_frames {
        return Err(LuaError::StackOverflow);
    }

    let mut chain = 0;
    loop {
        let func = state.thread(t).registers[func_idx as usize];
        if let Some(id) = func.as_function() {
            match state.heap.function(id) {
                LuaFunction::Lua(closure) => {
                    let num_params = closure.proto.num_params as u32;
                    let is_vararg = closure.proto.is_vararg;
                    let max_stack = closure.proto.max_stack_size as u32;
                    push_lua_frame(
                        state,
                        t,
                        func,
                        func_idx,
                        nargs,
                        want,
                        num_params,
                        is_vararg,
                        max_stack,
                        extra_flags,
                    )?;
                }
                LuaFunction::Host(_) => {
                    push_host_frame(state, t, func, func_idx, nargs, want, extra_flags)?;
                }
            }
            fire_call_hook(state, t)?;
            return Ok(());
        }

        // Not a function: route through __call with the original value as
        // the first argument.
        chain += 1;
        if chain > MAX_CALL_CHAIN {
            return Err(state.rt_error("'__call' chain too long"));
        }
        let mm = get_metamethod(state, &func, TmKind::Call);
        if mm.is_nil() {
            return Err(state.type_error(&func, "call"));
        }
        let th = state.thread_mut(t);
        let first_arg = func_idx + 1;
        th.ensure_registers((first_arg + nargs + 1) as usize);
        for i in (0..nargs).rev() {
            let v = th.registers[(first_arg + i) as usize];
            th.registers[(first_arg + i + 1) as usize] = v;
        }
        th.registers[first_arg as usize] = func;
        th.registers[func_idx as usize] = mm;
        nargs += 1;
        if th.top < first_arg + nargs {
            th.top = first_arg + nargs;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn push_lua_frame(
    state: &mut LuaState,
    t: ThreadId,
    func: LuaValue,
    func_idx: u32,
    nargs: u32,
    want: i32,
    num_params: u32,
    is_vararg: bool,
    max_stack: u32,
    extra_flags: u8,
) -> LuaResult<()> {
    let base = func_idx + 1;
    if (base + max_stack) as usize > state.options.max_registers {
        return Err(LuaError::StackOverflow);
    }
    state.heap.charge(max_stack as usize * 16)?;

    let th = state.thread_mut(t);
    th.ensure_registers((base + max_stack.max(nargs)) as usize);

    // Extra arguments of a vararg function move off the register file into
    // the frame's vararg tuple.
    let varargs = if is_vararg && nargs > num_params {
        Varargs::from_slice(
            &th.registers[(base + num_params) as usize..(base + nargs) as usize],
        )
    } else {
        Varargs::None
    };

    // Clear everything past the fixed parameters: stale values from earlier
    // frames must not leak into fresh registers.
    for i in num_params.min(nargs)..max_stack.max(nargs) {
        th.registers[(base + i) as usize] = LuaValue::Nil;
    }

    let top = base + max_stack;
    th.frames.push(DebugFrame {
        func,
        base,
        ret_base: func_idx,
        top,
        pc: 0,
        want,
        flags: extra_flags,
        state: None,
        varargs,
    });
    th.top = top;
    Ok(())
}

fn push_host_frame(
    state: &mut LuaState,
    t: ThreadId,
    func: LuaValue,
    func_idx: u32,
    nargs: u32,
    want: i32,
    extra_flags: u8,
) -> LuaResult<()> {
    let base = func_idx + 1;
    let top = base + nargs;
    if top as usize > state.options.max_registers {
        return Err(LuaError::StackOverflow);
    }
    let th = state.thread_mut(t);
    th.ensure_registers(top as usize);
    th.frames.push(DebugFrame {
        func,
        base,
        ret_base: func_idx,
        top,
        pc: 0,
        want,
        flags: extra_flags | FLAG_HOST | FLAG_FRESH,
        state: None,
        varargs: Varargs::None,
    });
    th.top = top;
    Ok(())
}

/// Replace the running frame with a call to `func_idx`: the callee inherits
/// the caller's result slot and expected count, so the frame stack never
/// grows through tail recursion.
pub fn tail_call(
    state: &mut LuaState,
    t: ThreadId,
    func_idx: u32,
    nargs: u32,
) -> LuaResult<()> {
    let (ret_base, want, old_flags, old_base) = {
        let th = state.thread_mut(t);
        let frame = th.frames.pop().expect("tail call without a frame");
        (frame.ret_base, frame.want, frame.flags, frame.base)
    };
    state.close_upvalues(t, old_base);

    // Slide callee and arguments down into the vacated slot.
    let th = state.thread_mut(t);
    for i in 0..=nargs {
        th.registers[(ret_base + i) as usize] =
            th.registers[(func_idx + i) as usize];
    }
    th.top = ret_base + 1 + nargs;

    let kept = old_flags & (FLAG_HOOKED | FLAG_ERRHANDLER);
    push_call(state, t, ret_base, nargs, want, kept | FLAG_TAIL)
}

/// Return `n` results starting at absolute register `first` from the current
/// frame. Moves them to the callee slot, pads or truncates to the caller's
/// expectation, pops the frame, and parks the results wherever the parent's
/// continuation expects them.
pub fn do_return(
    state: &mut LuaState,
    t: ThreadId,
    first: u32,
    n: u32,
) -> LuaResult<ReturnFlow> {
    let popped = state
        .thread_mut(t)
        .frames
        .pop()
        .expect("return without a frame");

    // Hook frames exist only for their side effects.
    if popped.flags & FLAG_HOOKED != 0 {
        let th = state.thread_mut(t);
        th.hook.in_hook = false;
        th.top = popped.ret_base;
        return Ok(ReturnFlow::Continue);
    }

    let ret_base = popped.ret_base;
    let keep = if popped.want < 0 {
        n
    } else {
        popped.want as u32
    };

    {
        let th = state.thread_mut(t);
        th.ensure_registers((ret_base + keep) as usize);
        for i in 0..keep {
            th.registers[(ret_base + i) as usize] = if i < n {
                th.registers[(first + i) as usize]
            } else {
                LuaValue::Nil
            };
        }
        th.top = ret_base + keep;
    }

    // An error handler's result becomes the error value delivered to the
    // barrier below; the rest of the stack above the barrier goes away.
    if popped.flags & FLAG_ERRHANDLER != 0 {
        let handled = if keep > 0 {
            state.thread(t).registers[ret_base as usize]
        } else {
            LuaValue::Nil
        };
        state.error_value = handled;
        unwind_to_barrier(state, t);
        return Ok(ReturnFlow::Continue);
    }

    let th = state.thread(t);
    if th.frames.is_empty() {
        let results = Varargs::from_slice(
            &th.registers[ret_base as usize..(ret_base + keep) as usize],
        );
        state.thread_mut(t).transfer = results;
        return Ok(ReturnFlow::ThreadDone);
    }

    let parent = th.frames.last().unwrap();
    let wants_transfer = (parent.is_host() && parent.flags & FLAG_FRESH == 0)
        || (parent.is_lua() && parent.state.is_some());
    if wants_transfer {
        let results = Varargs::from_slice(
            &th.registers[ret_base as usize..(ret_base + keep) as usize],
        );
        state.thread_mut(t).transfer = results;
    }
    Ok(ReturnFlow::Continue)
}

/// Discard every frame above the innermost armed protection barrier; the
/// dispatch loop then delivers the error to that frame's `on_error` entry.
pub fn unwind_to_barrier(state: &mut LuaState, t: ThreadId) {
    let p = {
        let th = state.thread(t);
        th.frames
            .iter()
            .rposition(|f| f.flags & FLAG_YPCALL != 0 && f.flags & FLAG_ERROR != 0)
            .expect("no armed barrier to unwind to")
    };
    let barrier_base = state.thread(t).frames[p].base;
    state.close_upvalues(t, barrier_base);
    let th = state.thread_mut(t);
    let mut dropped_hook = false;
    for f in th.frames.drain(p + 1..) {
        if f.flags & FLAG_HOOKED != 0 {
            dropped_hook = true;
        }
    }
    if dropped_hook {
        th.hook.in_hook = false;
    }
    let top = th.frames[p].top;
    th.top = top;
}

/// Fire the call hook for the frame just pushed.
fn fire_call_hook(state: &mut LuaState, t: ThreadId) -> LuaResult<()> {
    let th = state.thread(t);
    if th.hook.mask & hook_mask::CALL == 0 || th.hook.in_hook {
        return Ok(());
    }
    let tail = th
        .current_frame()
        .map_or(false, |f| f.flags & FLAG_TAIL != 0);
    let event = if tail { "tail call" } else { "call" };
    fire_hook(state, t, event, LuaValue::Nil)
}

/// Push the hook function as a FLAG_HOOKED frame; the dispatch loop runs it
/// like any call and discards its results. A hook may yield: its frame takes
/// part in the same unwind/resume protocol as everything else.
pub fn fire_hook(
    state: &mut LuaState,
    t: ThreadId,
    event: &str,
    arg: LuaValue,
) -> LuaResult<()> {
    let hook_fn = state.thread(t).hook.func;
    if hook_fn.is_nil() {
        return Ok(());
    }
    let event_str = state.heap.create_string(event)?;
    let th = state.thread_mut(t);
    th.hook.in_hook = true;
    let scratch = th.top;
    th.ensure_registers((scratch + 3) as usize);
    th.registers[scratch as usize] = hook_fn;
    th.registers[(scratch + 1) as usize] = event_str;
    th.registers[(scratch + 2) as usize] = arg;
    th.top = scratch + 3;
    let pushed = push_call(state, t, scratch, 2, 0, FLAG_HOOKED);
    if pushed.is_err() {
        state.thread_mut(t).hook.in_hook = false;
    }
    pushed
}
