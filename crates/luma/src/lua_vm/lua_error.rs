/// Lightweight control/error signal — one byte.
///
/// Payloads live on the state to keep `Result` small and the signal `Copy`:
/// a runtime error's Lua value is `LuaState::error_value`, yield values sit
/// on the yielding thread. `Yield` is not an error at all but the
/// distinguished unwind used to suspend a coroutine from arbitrary depth;
/// the last three variants are the uncatchable kinds, invisible to `pcall`
/// and to the coroutine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Lua-level error; the error value is on the state.
    RuntimeError,
    /// Compile/load failure; delivered to `load`'s caller, never raised
    /// into Lua.
    CompileError,
    /// Coroutine unwind; frame continuations are parked on the thread.
    Yield,
    /// Frame stack or register stack limit exceeded.
    StackOverflow,
    /// The allocation tracker refused an allocation.
    OutOfMemory,
    /// Host-initiated interrupt.
    Interrupted,
}

impl LuaError {
    /// Uncatchable signals unwind through `pcall` and through the coroutine
    /// boundary alike; only the host observes them.
    #[inline(always)]
    pub fn is_uncatchable(self) -> bool {
        matches!(
            self,
            LuaError::StackOverflow | LuaError::OutOfMemory | LuaError::Interrupted
        )
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::RuntimeError => write!(f, "runtime error"),
            LuaError::CompileError => write!(f, "compile error"),
            LuaError::Yield => write!(f, "coroutine yield"),
            LuaError::StackOverflow => write!(f, "stack overflow"),
            LuaError::OutOfMemory => write!(f, "out of memory"),
            LuaError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

/// Rich error combining the signal kind with the rendered message, produced
/// at the embedding boundary. Integrates with `?` and `std::error::Error`.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaError,
    pub message: String,
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for LuaFullError {}
