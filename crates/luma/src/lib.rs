// Sandboxed Lua 5.2 interpreter core.
//
// Tagged values over typed-id arenas, a hybrid array/hash table engine, a
// register-based bytecode interpreter, and coroutines built as reified
// continuations: yields unwind to the resume site through a distinguished
// signal while every suspended frame keeps its state for re-entry. The
// source compiler is pluggable; precompiled Lua 5.2 chunks load directly.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod heap;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use compiler::Compiler;
pub use heap::{AllocationTracker, ByteBudgetTracker, Heap, UnboundedTracker};
pub use lib_registry::LibraryRegistry;
pub use lua_value::{LuaStr, LuaTable, LuaThread, Prototype, ThreadStatus, Varargs};
pub use lua_vm::{
    HostAction, HostFunction, Instruction, LuaError, LuaFullError, LuaResult, LuaState, OpCode,
    VmOptions,
};

pub use lua_value::LuaValue;

/// Build a ready-to-use state: core hooks (base subset, coroutine, debug)
/// installed, default limits, unlimited allocation.
pub fn new_state() -> LuaResult<Box<LuaState>> {
    let mut state = LuaState::new();
    stdlib::open_core_libs(&mut state)?;
    Ok(state)
}

/// Like [`new_state`], with an allocation tracker and explicit limits.
pub fn new_state_with(
    tracker: Box<dyn AllocationTracker>,
    options: VmOptions,
) -> LuaResult<Box<LuaState>> {
    let mut state = LuaState::with_tracker(tracker, options);
    stdlib::open_core_libs(&mut state)?;
    Ok(state)
}
