// Core library hooks.
//
// Only the modules the interpreter itself leans on: the base subset
// (protected calls, iteration, metatable surface, conversions), the
// coroutine library over the unwind engine, and the debug subset. The
// full standard libraries live outside this crate.

pub mod basic;
pub mod coroutine;
pub mod debug;

use crate::lib_registry::LibraryRegistry;
use crate::lua_vm::{LuaResult, LuaState};

pub fn open_core_libs(state: &mut LuaState) -> LuaResult<()> {
    LibraryRegistry::new()
        .register(basic::create_base_lib())
        .register(coroutine::create_coroutine_lib())
        .register(debug::create_debug_lib())
        .load_all(state)
}
