// The virtual machine: state, frames, opcodes, dispatch, coroutines, debug.
pub mod coroutine;
pub mod debug_info;
pub mod execute;
mod frame;
mod lua_error;
mod lua_state;
pub mod number;
pub mod opcode;

pub use execute::metamethod::{get_metamethod, get_metatable, TmKind};
pub use frame::{
    frame_flags, DebugFrame, FrameState, HostAction, HostCallFn, HostClosure, HostErrorFn,
    HostFunction, HostResumeFn, LuaClosure, LuaFunction, Upvalue,
};
pub use lua_error::{LuaError, LuaFullError, LuaResult};
pub use lua_state::{LuaState, VmOptions};
pub use opcode::{Instruction, OpCode};
