// The source -> prototype seam.
//
// The bytecode compiler is not part of this crate: embedders install any
// implementation of this trait (or load precompiled chunks only). The
// interpreter treats it as opaque — given a byte source and a chunk name it
// yields a prototype or a message, and `load` reports failures to its caller
// instead of raising them into Lua.

use std::rc::Rc;

use crate::lua_value::Prototype;
use crate::lua_vm::LuaState;

pub trait Compiler {
    /// Compile `source` (raw bytes, no encoding assumed) under `chunk_name`.
    /// The state is available for interning constant strings.
    fn compile(
        &mut self,
        state: &mut LuaState,
        source: &[u8],
        chunk_name: &str,
    ) -> Result<Rc<Prototype>, String>;
}
