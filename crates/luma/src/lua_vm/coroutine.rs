// Resume side of the coroutine engine.
//
// The yield side is `LuaState::do_yield` plus the Err(Yield) unwind that
// every interpreter and host frame propagates without touching its parked
// state. Resume is the mirror image: flip statuses, hand the arguments to
// the thread, and re-enter the dispatch loop — the top frame's resume entry
// (or an interpreted frame's pc) picks up exactly where the suspension left
// off. Nested resumes nest natively; a thread that is `Normal` is parked in
// some deeper `resume` call and cannot be resumed again.

use crate::heap::ThreadId;
use crate::lua_value::{ThreadStatus, Varargs};
use crate::lua_vm::execute::{call::push_call, run_thread};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

fn status_error(state: &mut LuaState, which: &str) -> LuaError {
    let msg = format!("cannot resume {} coroutine", which);
    match state.heap.create_string(&msg) {
        Ok(v) => state.rt_error_value(v),
        Err(fatal) => fatal,
    }
}

pub(crate) fn resume_thread(
    state: &mut LuaState,
    t: ThreadId,
    args: Varargs,
) -> LuaResult<Varargs> {
    let status = state.thread(t).status;
    match status {
        ThreadStatus::Initial | ThreadStatus::Suspended => {}
        ThreadStatus::Dead => return Err(status_error(state, "dead")),
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Err(status_error(state, "non-suspended"));
        }
    }

    let prev = state.current;
    state.thread_mut(prev).status = ThreadStatus::Normal;
    state.current = t;
    state.thread_mut(t).status = ThreadStatus::Running;

    let setup = if status == ThreadStatus::Initial {
        // First resume: call the entry closure with the resume arguments.
        let entry = state.thread(t).entry;
        let nargs = args.count();
        {
            let th = state.thread_mut(t);
            th.ensure_registers((1 + nargs) as usize);
            th.registers[0] = entry;
            for i in 0..nargs {
                th.registers[(1 + i) as usize] = args.arg(i + 1);
            }
            th.top = 1 + nargs;
        }
        push_call(state, t, 0, nargs, -1, 0)
    } else {
        // Re-entry: the arguments travel to the innermost suspended frame.
        state.thread_mut(t).transfer = args;
        Ok(())
    };

    let outcome = setup.and_then(|()| run_thread(state, t, 0));

    state.current = prev;
    state.thread_mut(prev).status = ThreadStatus::Running;

    match outcome {
        Ok(()) => {
            let th = state.thread_mut(t);
            th.status = ThreadStatus::Dead;
            Ok(std::mem::take(&mut th.transfer))
        }
        Err(LuaError::Yield) => {
            // do_yield already flipped the status and stored the values.
            Ok(std::mem::take(&mut state.thread_mut(t).yield_values))
        }
        Err(err) => {
            // Lua error with no barrier, or an uncatchable signal: the
            // coroutine dies either way. Only the error kind differs for
            // the caller.
            state.close_upvalues(t, 0);
            let th = state.thread_mut(t);
            th.frames.clear();
            th.top = 0;
            th.status = ThreadStatus::Dead;
            th.hook.in_hook = false;
            Err(err)
        }
    }
}
