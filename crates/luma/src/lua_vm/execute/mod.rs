/*----------------------------------------------------------------------
  The bytecode dispatch loop.

  One flat loop drives a whole thread: Lua-to-Lua calls push and pop frames
  without touching the native stack, host functions run as state machines
  behind the HostAction protocol, and a yield simply propagates Err(Yield)
  outward — the frame stack, left intact, is the continuation.

  Fetch -> Decode -> Execute, then one of: advance pc, jump, enter a callee
  frame, exit via return, unwind for yield, or unwind for error. Any
  instruction whose metamethod call must run Lua code parks a FrameState
  continuation on its frame and re-enters the loop; when the callee returns,
  finish_op completes the interrupted instruction.
----------------------------------------------------------------------*/

pub mod arith;
pub mod call;
pub mod compare;
pub mod concat;
pub mod metamethod;
pub mod table_ops;

use std::rc::Rc;

use crate::heap::{ThreadId, UpvalueId};
use crate::lua_value::{hook_mask, LuaValue, Varargs};
use crate::lua_vm::frame::{frame_flags::*, FrameState};
use crate::lua_vm::opcode::{fb2int, index_k, is_k, Instruction, OpCode, FIELDS_PER_FLUSH};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

use arith::{apply_arith, arith_values, coerce_number, ArithOutcome};
use call::{do_return, fire_hook, push_call, tail_call};
use compare::{equals, less_equal, less_than, CompareOutcome};
use concat::{do_concat, ConcatStep};
use metamethod::{get_metamethod, TmKind};
use table_ops::{index_value, newindex_value, IndexOutcome, NewIndexOutcome};

/// Run thread `t` until its frame depth drops to `target_depth` (0 = until
/// the thread finishes). Err(Yield) leaves every frame in place; a Lua error
/// with no protection barrier above `target_depth` propagates as
/// Err(RuntimeError); uncatchable signals pass through untouched.
pub(crate) fn run_thread(
    state: &mut LuaState,
    t: ThreadId,
    target_depth: usize,
) -> LuaResult<()> {
    loop {
        let th = state.thread(t);
        if th.frames.len() <= target_depth {
            return Ok(());
        }
        let is_host = th.frames.last().unwrap().is_host();
        let stepped = if is_host {
            host_step(state, t)
        } else {
            lua_dispatch(state, t)
        };
        match stepped {
            Ok(()) => {}
            Err(LuaError::RuntimeError) => recover(state, t, target_depth)?,
            Err(other) => return Err(other),
        }
    }
}

/// Host-side call of `f(args...)` on the current thread, running its frames
/// to completion. A Lua error is reported to this caller even when an outer
/// protected call is active further down the stack.
pub(crate) fn call_value(
    state: &mut LuaState,
    f: LuaValue,
    args: Varargs,
) -> LuaResult<Varargs> {
    let t = state.current;
    let target = state.thread(t).frames.len();
    let nargs = args.count();
    let func_idx = {
        let th = state.thread_mut(t);
        let func_idx = th.top;
        th.ensure_registers((func_idx + 1 + nargs) as usize);
        th.registers[func_idx as usize] = f;
        for i in 0..nargs {
            th.registers[(func_idx + 1 + i) as usize] = args.arg(i + 1);
        }
        th.top = func_idx + 1 + nargs;
        func_idx
    };
    let run = push_call(state, t, func_idx, nargs, -1, 0)
        .and_then(|()| run_thread(state, t, target));
    match run {
        Ok(()) => {
            let th = state.thread(t);
            let results = Varargs::from_slice(
                &th.registers[func_idx as usize..th.top as usize],
            );
            state.thread_mut(t).top = func_idx;
            Ok(results)
        }
        Err(LuaError::RuntimeError) => {
            state.close_upvalues(t, func_idx);
            let th = state.thread_mut(t);
            th.frames.truncate(target);
            th.top = func_idx;
            Err(LuaError::RuntimeError)
        }
        Err(other) => Err(other),
    }
}

// ===== host frames =====

fn host_step(state: &mut LuaState, t: ThreadId) -> LuaResult<()> {
    let (host, flags) = {
        let th = state.thread(t);
        let frame = th.frames.last().unwrap();
        let id = frame.func.as_function().expect("host frame function");
        let host = state
            .heap
            .function(id)
            .as_host()
            .expect("host frame closure")
            .func;
        (host, frame.flags)
    };

    let action = if flags & FLAG_ERROR != 0 && host.on_error.is_some() {
        let err = state.error_value;
        (host.on_error.unwrap())(state, err)?
    } else if flags & FLAG_FRESH != 0 {
        state
            .thread_mut(t)
            .current_frame_mut()
            .unwrap()
            .flags &= !FLAG_FRESH;
        (host.call)(state)?
    } else {
        let args = std::mem::take(&mut state.thread_mut(t).transfer);
        match host.resume {
            Some(resume) => resume(state, args)?,
            None => return Err(state.rt_error("host function is not resumable")),
        }
    };

    match action {
        crate::lua_vm::frame::HostAction::Return(n) => {
            let first = state.thread(t).top - n as u32;
            do_return(state, t, first, n as u32)?;
            Ok(())
        }
        crate::lua_vm::frame::HostAction::Call { func_idx, nargs } => {
            push_call(state, t, func_idx, nargs, -1, 0)
        }
        crate::lua_vm::frame::HostAction::TailCall { func_idx, nargs } => {
            tail_call(state, t, func_idx, nargs)
        }
    }
}

// ===== error recovery =====

/// Handle a raised Lua error: arm the innermost barrier above `target_depth`,
/// run its xpcall handler (at the error site, before anything unwinds), or
/// unwind straight to the barrier for a plain pcall. With no barrier in
/// range the error keeps propagating.
fn recover(state: &mut LuaState, t: ThreadId, target_depth: usize) -> LuaResult<()> {
    let p = {
        let th = state.thread(t);
        th.frames[target_depth..]
            .iter()
            .rposition(|f| f.flags & FLAG_YPCALL != 0 && f.flags & FLAG_ERROR == 0)
            .map(|i| i + target_depth)
    };
    let p = match p {
        Some(p) => p,
        None => return Err(LuaError::RuntimeError),
    };

    let handler = {
        let th = state.thread_mut(t);
        // Barriers above p sit in the extent being abandoned; disarm them so
        // the eventual unwind lands on p and not on a consumed inner pcall.
        for f in th.frames[p + 1..].iter_mut() {
            f.flags &= !FLAG_YPCALL;
        }
        th.frames[p].flags |= FLAG_ERROR;
        match th.frames[p].state {
            Some(FrameState::Protected { handler }) => handler,
            _ => LuaValue::Nil,
        }
    };

    if handler.is_nil() {
        call::unwind_to_barrier(state, t);
        return Ok(());
    }

    // xpcall: the message handler observes the un-unwound stack.
    let err = state.error_value;
    let scratch = {
        let th = state.thread_mut(t);
        let frame_top = th.current_frame().map_or(0, |f| f.top);
        let scratch = th.top.max(frame_top);
        th.ensure_registers((scratch + 2) as usize);
        th.registers[scratch as usize] = handler;
        th.registers[(scratch + 1) as usize] = err;
        th.top = scratch + 2;
        scratch
    };
    push_call(state, t, scratch, 1, 1, FLAG_ERRHANDLER)
}

// ===== metamethod calls from the interpreter =====

/// Park `continuation` on the running frame and push `handler(args...)`
/// above the live registers. When the callee returns, finish_op picks the
/// continuation back up.
fn call_metamethod(
    state: &mut LuaState,
    t: ThreadId,
    handler: LuaValue,
    args: &[LuaValue],
    want: i32,
    continuation: FrameState,
) -> LuaResult<()> {
    let scratch = {
        let th = state.thread_mut(t);
        th.current_frame_mut().unwrap().state = Some(continuation);
        let frame_top = th.current_frame().unwrap().top;
        let scratch = th.top.max(frame_top);
        th.ensure_registers((scratch + 1 + args.len() as u32) as usize);
        th.registers[scratch as usize] = handler;
        for (i, &v) in args.iter().enumerate() {
            th.registers[scratch as usize + 1 + i] = v;
        }
        th.top = scratch + 1 + args.len() as u32;
        scratch
    };
    push_call(state, t, scratch, args.len() as u32, want, 0)
}

/// Complete the instruction whose metamethod call just returned.
fn finish_op(state: &mut LuaState, t: ThreadId) -> LuaResult<()> {
    let ti = t.index();
    let fidx = state.threads[ti].frames.len() - 1;
    let parked = state.threads[ti].frames[fidx]
        .state
        .take()
        .expect("finish_op without parked state");
    let results = std::mem::take(&mut state.threads[ti].transfer);
    let base = state.threads[ti].frames[fidx].base;
    let frame_top = state.threads[ti].frames[fidx].top;

    match parked {
        FrameState::FinishGet { dest }
        | FrameState::FinishBinOp { dest }
        | FrameState::FinishUnOp { dest } => {
            state.threads[ti].registers[(base + dest) as usize] = results.first();
            state.threads[ti].top = frame_top;
        }
        FrameState::FinishSet => {
            state.threads[ti].top = frame_top;
        }
        FrameState::FinishCompare { expect } => {
            if results.first().is_truthy() != expect {
                state.threads[ti].frames[fidx].pc += 1;
            }
            state.threads[ti].top = frame_top;
        }
        FrameState::FinishTForCall { dest, want } => {
            for i in 0..want {
                state.threads[ti].registers[(base + dest + i) as usize] =
                    results.arg(i + 1);
            }
            state.threads[ti].top = frame_top;
        }
        FrameState::FinishConcat { a, first, dest } => {
            state.threads[ti].registers[(base + dest) as usize] = results.first();
            state.threads[ti].top = frame_top;
            match do_concat(state, t, base, a, first, dest)? {
                ConcatStep::Done => {}
                ConcatStep::Call {
                    handler,
                    x,
                    y,
                    dest,
                } => {
                    call_metamethod(
                        state,
                        t,
                        handler,
                        &[x, y],
                        1,
                        FrameState::FinishConcat { a, first, dest },
                    )?;
                }
            }
        }
        FrameState::Protected { .. } | FrameState::Host { .. } => {
            unreachable!("host continuation parked on an interpreted frame")
        }
    }
    Ok(())
}

// ===== hooks =====

/// Pre-instruction hook check. Returns true when a hook frame was pushed and
/// the dispatch loop must re-enter.
fn maybe_fire_hook(
    state: &mut LuaState,
    t: ThreadId,
    depth: usize,
    pc: u32,
    instr: Instruction,
    line: u32,
) -> LuaResult<bool> {
    {
        let hk = &mut state.thread_mut(t).hook;
        if hk.mask == 0 || hk.in_hook || hk.func.is_nil() {
            return Ok(false);
        }
        if hk.fired_at == Some((depth, pc)) {
            // Re-entry after the hook frame returned: run the instruction.
            hk.fired_at = None;
            return Ok(false);
        }
    }

    // COUNT: every `count` instructions.
    let fire_count = {
        let hk = &mut state.thread_mut(t).hook;
        if hk.mask & hook_mask::COUNT != 0 && hk.count > 0 {
            hk.counter = hk.counter.saturating_sub(1);
            if hk.counter == 0 {
                hk.counter = hk.count;
                true
            } else {
                false
            }
        } else {
            false
        }
    };
    if fire_count {
        state.thread_mut(t).hook.fired_at = Some((depth, pc));
        fire_hook(state, t, "count", LuaValue::Nil)?;
        return Ok(true);
    }

    // LINE: on every transition to a new source line.
    let fire_line = {
        let hk = &mut state.thread_mut(t).hook;
        if hk.mask & hook_mask::LINE != 0 && line != 0 && line != hk.last_line {
            hk.last_line = line;
            true
        } else {
            false
        }
    };
    if fire_line {
        state.thread_mut(t).hook.fired_at = Some((depth, pc));
        fire_hook(state, t, "line", LuaValue::Number(line as f64))?;
        return Ok(true);
    }

    // RETURN: fires at the RETURN/TAILCALL site, before the frame is popped.
    let is_return = matches!(
        instr.opcode(),
        Some(OpCode::Return) | Some(OpCode::TailCall)
    );
    if is_return && state.thread(t).hook.mask & hook_mask::RETURN != 0 {
        state.thread_mut(t).hook.fired_at = Some((depth, pc));
        fire_hook(state, t, "return", LuaValue::Nil)?;
        return Ok(true);
    }

    Ok(false)
}

// ===== the interpreter =====

fn lua_dispatch(state: &mut LuaState, t: ThreadId) -> LuaResult<()> {
    let ti = t.index();
    let fidx = state.threads[ti].frames.len() - 1;
    let depth = fidx + 1;

    // A parked continuation means a metamethod call just returned: finish
    // the interrupted instruction first.
    if state.threads[ti].frames[fidx].state.is_some() {
        return finish_op(state, t);
    }

    let (func, base) = {
        let f = &state.threads[ti].frames[fidx];
        (f.func, f.base)
    };
    let (proto, upvals): (Rc<_>, Vec<UpvalueId>) = {
        let closure = state
            .heap
            .function(func.as_function().expect("lua frame function"))
            .as_lua()
            .expect("lua frame closure");
        (Rc::clone(&closure.proto), closure.upvalues.to_vec())
    };
    let mut pc = state.threads[ti].frames[fidx].pc;

    macro_rules! save_pc {
        () => {
            state.threads[ti].frames[fidx].pc = pc;
        };
    }
    macro_rules! reg {
        ($i:expr) => {
            state.threads[ti].registers[(base + $i) as usize]
        };
    }
    macro_rules! rk {
        ($x:expr) => {{
            let x = $x;
            if is_k(x) {
                proto.constants[index_k(x)]
            } else {
                reg!(x)
            }
        }};
    }
    macro_rules! arith_op {
        ($a:expr, $instr:expr, $tm:expr) => {{
            let x = rk!($instr.b());
            let y = rk!($instr.c());
            if let (LuaValue::Number(nx), LuaValue::Number(ny)) = (x, y) {
                reg!($a) = LuaValue::Number(apply_arith($tm, nx, ny));
            } else {
                match arith_values(state, $tm, x, y)? {
                    ArithOutcome::Done(v) => reg!($a) = v,
                    ArithOutcome::Call { handler, a: xa, b: xb } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[xa, xb],
                            1,
                            FrameState::FinishBinOp { dest: $a },
                        )?;
                        return Ok(());
                    }
                }
            }
        }};
    }
    macro_rules! compare_op {
        ($a:expr, $outcome:expr) => {{
            match $outcome {
                CompareOutcome::Done(cond) => {
                    if cond != ($a != 0) {
                        pc += 1;
                    }
                }
                CompareOutcome::Call {
                    handler,
                    a: xa,
                    b: xb,
                    invert,
                } => {
                    let expect = if invert { $a == 0 } else { $a != 0 };
                    call_metamethod(
                        state,
                        t,
                        handler,
                        &[xa, xb],
                        1,
                        FrameState::FinishCompare { expect },
                    )?;
                    return Ok(());
                }
            }
        }};
    }

    loop {
        if state.threads[ti].hook.mask != 0 {
            save_pc!();
            let instr = Instruction(proto.code[pc as usize]);
            let line = proto.line_at(pc);
            if maybe_fire_hook(state, t, depth, pc, instr, line)? {
                return Ok(());
            }
        }

        let instr = Instruction(proto.code[pc as usize]);
        pc += 1;
        // The saved pc always points past the executing instruction, so
        // error locations and resumption agree on "the current line".
        save_pc!();

        let op = match instr.opcode() {
            Some(op) => op,
            None => return Err(state.rt_error("invalid instruction")),
        };
        let a = instr.a();

        match op {
            OpCode::Move => {
                reg!(a) = reg!(instr.b());
            }
            OpCode::LoadK => {
                reg!(a) = proto.constants[instr.bx() as usize];
            }
            OpCode::LoadKx => {
                let extra = Instruction(proto.code[pc as usize]);
                pc += 1;
                save_pc!();
                reg!(a) = proto.constants[extra.ax() as usize];
            }
            OpCode::LoadBool => {
                reg!(a) = LuaValue::Boolean(instr.b() != 0);
                if instr.c() != 0 {
                    pc += 1;
                    save_pc!();
                }
            }
            OpCode::LoadNil => {
                for i in 0..=instr.b() {
                    reg!(a + i) = LuaValue::Nil;
                }
            }
            OpCode::GetUpval => {
                reg!(a) = state.read_upvalue(upvals[instr.b() as usize]);
            }
            OpCode::SetUpval => {
                let v = reg!(a);
                state.write_upvalue(upvals[instr.b() as usize], v);
            }
            OpCode::GetTabUp => {
                let container = state.read_upvalue(upvals[instr.b() as usize]);
                let key = rk!(instr.c());
                match index_value(state, container, key)? {
                    IndexOutcome::Done(v) => reg!(a) = v,
                    IndexOutcome::Call {
                        handler,
                        target,
                        key,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[target, key],
                            1,
                            FrameState::FinishGet { dest: a },
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::GetTable => {
                let container = reg!(instr.b());
                let key = rk!(instr.c());
                match index_value(state, container, key)? {
                    IndexOutcome::Done(v) => reg!(a) = v,
                    IndexOutcome::Call {
                        handler,
                        target,
                        key,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[target, key],
                            1,
                            FrameState::FinishGet { dest: a },
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::SetTabUp => {
                let container = state.read_upvalue(upvals[a as usize]);
                let key = rk!(instr.b());
                let value = rk!(instr.c());
                match newindex_value(state, container, key, value)? {
                    NewIndexOutcome::Done => {}
                    NewIndexOutcome::Call {
                        handler,
                        target,
                        key,
                        value,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[target, key, value],
                            0,
                            FrameState::FinishSet,
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::SetTable => {
                let container = reg!(a);
                let key = rk!(instr.b());
                let value = rk!(instr.c());
                match newindex_value(state, container, key, value)? {
                    NewIndexOutcome::Done => {}
                    NewIndexOutcome::Call {
                        handler,
                        target,
                        key,
                        value,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[target, key, value],
                            0,
                            FrameState::FinishSet,
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::NewTable => {
                let narr = fb2int(instr.b()) as usize;
                let nrec = fb2int(instr.c()) as usize;
                let table = state.heap.create_table(narr, nrec)?;
                reg!(a) = table;
            }
            OpCode::SelfOp => {
                let container = reg!(instr.b());
                reg!(a + 1) = container;
                let key = rk!(instr.c());
                match index_value(state, container, key)? {
                    IndexOutcome::Done(v) => reg!(a) = v,
                    IndexOutcome::Call {
                        handler,
                        target,
                        key,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[target, key],
                            1,
                            FrameState::FinishGet { dest: a },
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::Add => arith_op!(a, instr, TmKind::Add),
            OpCode::Sub => arith_op!(a, instr, TmKind::Sub),
            OpCode::Mul => arith_op!(a, instr, TmKind::Mul),
            OpCode::Div => arith_op!(a, instr, TmKind::Div),
            OpCode::Mod => arith_op!(a, instr, TmKind::Mod),
            OpCode::Pow => arith_op!(a, instr, TmKind::Pow),
            OpCode::Unm => {
                let v = reg!(instr.b());
                if let Some(n) = coerce_number(state, &v) {
                    reg!(a) = LuaValue::Number(-n);
                } else {
                    match arith_values(state, TmKind::Unm, v, v)? {
                        ArithOutcome::Done(res) => reg!(a) = res,
                        ArithOutcome::Call { handler, a: xa, b: xb } => {
                            call_metamethod(
                                state,
                                t,
                                handler,
                                &[xa, xb],
                                1,
                                FrameState::FinishUnOp { dest: a },
                            )?;
                            return Ok(());
                        }
                    }
                }
            }
            OpCode::Not => {
                let v = reg!(instr.b());
                reg!(a) = LuaValue::Boolean(!v.is_truthy());
            }
            OpCode::Len => {
                let v = reg!(instr.b());
                match v {
                    LuaValue::String(id) => {
                        reg!(a) = LuaValue::Number(state.heap.string(id).len() as f64);
                    }
                    LuaValue::Table(id) => {
                        let mm = get_metamethod(state, &v, TmKind::Len);
                        if mm.is_nil() {
                            reg!(a) = LuaValue::Number(state.heap.table_len(id) as f64);
                        } else {
                            call_metamethod(
                                state,
                                t,
                                mm,
                                &[v, v],
                                1,
                                FrameState::FinishUnOp { dest: a },
                            )?;
                            return Ok(());
                        }
                    }
                    _ => {
                        let mm = get_metamethod(state, &v, TmKind::Len);
                        if mm.is_nil() {
                            return Err(state.type_error(&v, "get length of"));
                        }
                        call_metamethod(
                            state,
                            t,
                            mm,
                            &[v, v],
                            1,
                            FrameState::FinishUnOp { dest: a },
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::Concat => {
                match do_concat(state, t, base, a, instr.b(), instr.c())? {
                    ConcatStep::Done => {}
                    ConcatStep::Call {
                        handler,
                        x,
                        y,
                        dest,
                    } => {
                        call_metamethod(
                            state,
                            t,
                            handler,
                            &[x, y],
                            1,
                            FrameState::FinishConcat {
                                a,
                                first: instr.b(),
                                dest,
                            },
                        )?;
                        return Ok(());
                    }
                }
            }
            OpCode::Jmp => {
                pc = (pc as i32 + instr.sbx()) as u32;
                save_pc!();
                if a > 0 {
                    state.close_upvalues(t, base + a - 1);
                }
            }
            OpCode::Eq => {
                let x = rk!(instr.b());
                let y = rk!(instr.c());
                compare_op!(a, equals(state, x, y)?);
            }
            OpCode::Lt => {
                let x = rk!(instr.b());
                let y = rk!(instr.c());
                compare_op!(a, less_than(state, x, y)?);
            }
            OpCode::Le => {
                let x = rk!(instr.b());
                let y = rk!(instr.c());
                compare_op!(a, less_equal(state, x, y)?);
            }
            OpCode::Test => {
                let v = reg!(a);
                if v.is_truthy() != (instr.c() != 0) {
                    pc += 1;
                    save_pc!();
                }
            }
            OpCode::TestSet => {
                let v = reg!(instr.b());
                if v.is_truthy() == (instr.c() != 0) {
                    reg!(a) = v;
                } else {
                    pc += 1;
                    save_pc!();
                }
            }
            OpCode::Call => {
                let func_idx = base + a;
                let b = instr.b();
                let nargs = if b == 0 {
                    state.threads[ti].top - func_idx - 1
                } else {
                    b - 1
                };
                let want = if instr.c() == 0 {
                    -1
                } else {
                    instr.c() as i32 - 1
                };
                push_call(state, t, func_idx, nargs, want, 0)?;
                return Ok(());
            }
            OpCode::TailCall => {
                let func_idx = base + a;
                let b = instr.b();
                let nargs = if b == 0 {
                    state.threads[ti].top - func_idx - 1
                } else {
                    b - 1
                };
                tail_call(state, t, func_idx, nargs)?;
                return Ok(());
            }
            OpCode::Return => {
                let b = instr.b();
                let first = base + a;
                let n = if b == 0 {
                    state.threads[ti].top - first
                } else {
                    b - 1
                };
                state.close_upvalues(t, base);
                do_return(state, t, first, n)?;
                return Ok(());
            }
            OpCode::ForLoop => {
                let step = reg!(a + 2).as_number().unwrap_or(0.0);
                let idx = reg!(a).as_number().unwrap_or(0.0) + step;
                let limit = reg!(a + 1).as_number().unwrap_or(0.0);
                let continues = if step > 0.0 { idx <= limit } else { idx >= limit };
                if continues {
                    pc = (pc as i32 + instr.sbx()) as u32;
                    save_pc!();
                    reg!(a) = LuaValue::Number(idx);
                    reg!(a + 3) = LuaValue::Number(idx);
                }
            }
            OpCode::ForPrep => {
                let init = match coerce_number(state, &reg!(a)) {
                    Some(n) => n,
                    None => return Err(state.rt_error("'for' initial value must be a number")),
                };
                let limit = match coerce_number(state, &reg!(a + 1)) {
                    Some(n) => n,
                    None => return Err(state.rt_error("'for' limit must be a number")),
                };
                let step = match coerce_number(state, &reg!(a + 2)) {
                    Some(n) => n,
                    None => return Err(state.rt_error("'for' step must be a number")),
                };
                reg!(a) = LuaValue::Number(init - step);
                reg!(a + 1) = LuaValue::Number(limit);
                reg!(a + 2) = LuaValue::Number(step);
                pc = (pc as i32 + instr.sbx()) as u32;
                save_pc!();
            }
            OpCode::TForCall => {
                let want = instr.c();
                let f = reg!(a);
                let s = reg!(a + 1);
                let ctrl = reg!(a + 2);
                call_metamethod(
                    state,
                    t,
                    f,
                    &[s, ctrl],
                    want as i32,
                    FrameState::FinishTForCall {
                        dest: a + 3,
                        want,
                    },
                )?;
                return Ok(());
            }
            OpCode::TForLoop => {
                let ctrl = reg!(a + 1);
                if !ctrl.is_nil() {
                    reg!(a) = ctrl;
                    pc = (pc as i32 + instr.sbx()) as u32;
                    save_pc!();
                }
            }
            OpCode::SetList => {
                let b = instr.b();
                let mut c = instr.c();
                if c == 0 {
                    let extra = Instruction(proto.code[pc as usize]);
                    pc += 1;
                    save_pc!();
                    c = extra.ax();
                }
                let n = if b == 0 {
                    state.threads[ti].top - (base + a) - 1
                } else {
                    b
                };
                let table = match reg!(a).as_table() {
                    Some(id) => id,
                    None => return Err(state.rt_error("SETLIST target is not a table")),
                };
                let start = (c - 1) as i64 * FIELDS_PER_FLUSH as i64;
                for i in 1..=n {
                    let v = reg!(a + i);
                    state.heap.table_set_int(table, start + i as i64, v);
                }
                if b == 0 {
                    let frame_top = state.threads[ti].frames[fidx].top;
                    state.threads[ti].top = frame_top;
                }
            }
            OpCode::Closure => {
                let child = Rc::clone(&proto.protos[instr.bx() as usize]);
                let mut cells = Vec::with_capacity(child.upvalues.len());
                for desc in child.upvalues.iter() {
                    let cell = if desc.from_local {
                        state.find_or_create_open_upvalue(t, base + desc.index as u32)?
                    } else {
                        upvals[desc.index as usize]
                    };
                    cells.push(cell);
                }
                let closure = state.create_closure(child, cells.into_boxed_slice())?;
                reg!(a) = closure;
            }
            OpCode::Vararg => {
                let b = instr.b();
                let varargs = state.threads[ti].frames[fidx].varargs.clone();
                let n = varargs.count();
                let want = if b == 0 { n } else { b - 1 };
                let needed = (base + a + want) as usize;
                state.threads[ti].ensure_registers(needed);
                for i in 0..want {
                    reg!(a + i) = varargs.arg(i + 1);
                }
                if b == 0 {
                    state.threads[ti].top = base + a + n;
                }
            }
            OpCode::ExtraArg => {
                return Err(state.rt_error("unexpected EXTRAARG"));
            }
        }
    }
}
