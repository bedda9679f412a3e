// Library registration.
//
// Host functions are grouped into modules and installed into the globals
// table (the base module installs at top level). The `lib_module!` macro
// keeps the per-module tables declarative.

use crate::lua_vm::{HostFunction, LuaResult, LuaState};

/// A named group of host functions.
pub struct LibraryModule {
    /// Global table name; empty installs entries directly into _G.
    pub name: &'static str,
    pub entries: Vec<(&'static str, HostFunction)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: HostFunction) -> Self {
        self.entries.push((name, func));
        self
    }
}

#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $item));
        )*
        module
    }};
}

/// Ordered collection of modules to install into a state.
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(mut self, module: LibraryModule) -> Self {
        self.modules.push(module);
        self
    }

    pub fn load_all(self, state: &mut LuaState) -> LuaResult<()> {
        for module in self.modules {
            let target = if module.name.is_empty() {
                state.globals_value()
            } else {
                let t = state.create_table(0, module.entries.len())?;
                state.set_global(module.name, t)?;
                t
            };
            let target = target.as_table().expect("library target table");
            for (name, func) in module.entries {
                let key = state.create_string(name)?;
                let value = state.create_host_function(func)?;
                let _ = state.heap.table_set(target, key, value);
            }
        }
        Ok(())
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
