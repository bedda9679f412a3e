// Coroutine library over the unwind/resume engine.

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, ThreadStatus};
use crate::lua_vm::coroutine::resume_thread;
use crate::lua_vm::{HostAction, HostFunction, LuaError, LuaResult, LuaState};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => HostFunction::plain("create", co_create),
        "resume" => HostFunction::plain("resume", co_resume),
        "yield" => HostFunction::resumable("yield", co_yield, yield_resume),
        "status" => HostFunction::plain("status", co_status),
        "running" => HostFunction::plain("running", co_running),
        "wrap" => HostFunction::plain("wrap", co_wrap),
        "isyieldable" => HostFunction::plain("isyieldable", co_isyieldable),
    })
}

const WRAP_TRAMPOLINE: HostFunction = HostFunction::plain("wrap", wrap_call);

fn co_create(l: &mut LuaState) -> LuaResult<HostAction> {
    let f = l.arg(1);
    if !f.is_function() {
        return Err(l.arg_error(1, "function", &f));
    }
    let thread = l.new_thread(f)?;
    l.push_value(thread)?;
    Ok(HostAction::Return(1))
}

fn co_resume(l: &mut LuaState) -> LuaResult<HostAction> {
    let co = match l.arg(1).as_thread() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "coroutine", &v));
        }
    };
    let args = l.args().subargs(2);
    match resume_thread(l, co, args) {
        Ok(results) => {
            l.push_value(LuaValue::Boolean(true))?;
            let n = results.count();
            for i in 1..=n {
                l.push_value(results.arg(i))?;
            }
            Ok(HostAction::Return(1 + n as usize))
        }
        Err(LuaError::RuntimeError) => {
            // The protected shape of resume: errors become (false, err).
            let err = l.error_value();
            l.push_value(LuaValue::Boolean(false))?;
            l.push_value(err)?;
            Ok(HostAction::Return(2))
        }
        // Uncatchable signals cross the coroutine boundary untouched.
        Err(other) => Err(other),
    }
}

fn co_yield(l: &mut LuaState) -> LuaResult<HostAction> {
    let values = l.args();
    Err(l.do_yield(values))
}

/// Resume values become yield's return values.
fn yield_resume(l: &mut LuaState, args: crate::lua_value::Varargs) -> LuaResult<HostAction> {
    let n = args.count();
    for i in 1..=n {
        l.push_value(args.arg(i))?;
    }
    Ok(HostAction::Return(n as usize))
}

fn co_status(l: &mut LuaState) -> LuaResult<HostAction> {
    let co = match l.arg(1).as_thread() {
        Some(t) => t,
        None => {
            let v = l.arg(1);
            return Err(l.arg_error(1, "coroutine", &v));
        }
    };
    let text = if co == l.current {
        "running"
    } else {
        l.thread(co).status.as_str()
    };
    let s = l.create_string(text)?;
    l.push_value(s)?;
    Ok(HostAction::Return(1))
}

fn co_running(l: &mut LuaState) -> LuaResult<HostAction> {
    let current = l.current_thread_value();
    let is_main = l.current == l.main_thread;
    l.push_value(current)?;
    l.push_value(LuaValue::Boolean(is_main))?;
    Ok(HostAction::Return(2))
}

fn co_isyieldable(l: &mut LuaState) -> LuaResult<HostAction> {
    let yieldable = l.current != l.main_thread;
    l.push_value(LuaValue::Boolean(yieldable))?;
    Ok(HostAction::Return(1))
}

fn co_wrap(l: &mut LuaState) -> LuaResult<HostAction> {
    let f = l.arg(1);
    if !f.is_function() {
        return Err(l.arg_error(1, "function", &f));
    }
    let thread = l.new_thread(f)?;
    let wrapper = l.create_host_closure(WRAP_TRAMPOLINE, thread)?;
    l.push_value(wrapper)?;
    Ok(HostAction::Return(1))
}

/// The callable returned by wrap: resumes its bound thread and re-raises
/// errors at the call site instead of reporting (false, err).
fn wrap_call(l: &mut LuaState) -> LuaResult<HostAction> {
    let co = l
        .bound_value()
        .as_thread()
        .expect("wrap trampoline without a thread");
    let args = l.args();
    let results = resume_thread(l, co, args)?;
    let n = results.count();
    for i in 1..=n {
        l.push_value(results.arg(i))?;
    }
    Ok(HostAction::Return(n as usize))
}

/// Entry used by the thread-status checks in tests.
pub fn status_of(l: &LuaState, co: LuaValue) -> Option<ThreadStatus> {
    co.as_thread().map(|t| l.thread(t).status)
}
