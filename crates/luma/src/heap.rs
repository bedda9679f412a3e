// Object pool for heap-allocated Lua values.
//
// Tables, functions, userdata and upvalue cells live in typed-id arenas owned
// by the state; values refer to them by index instead of pointer. Closures,
// upvalues and frames form reference cycles, which plain `Rc` graphs cannot
// express without leaks, so the arenas are the ownership root and ids are the
// only references. Reclamation is delegated to the host: dropping the
// `LuaState` drops every object at once.

use std::any::Any;

use crate::lua_value::{LuaStr, LuaTable, LuaUserdata, LuaValue, StringPool, TableError};
use crate::lua_vm::{LuaError, LuaFunction, LuaResult, Upvalue};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Index into the string pool.
    StringId
);
define_id!(
    /// Index into the table arena.
    TableId
);
define_id!(
    /// Index into the function arena.
    FunctionId
);
define_id!(
    /// Index into the userdata arena.
    UserdataId
);
define_id!(
    /// Index into the state's thread list.
    ThreadId
);
define_id!(
    /// Index into the upvalue-cell arena.
    UpvalueId
);

/// Byte-accounting hook consulted before every significant allocation.
///
/// Returning `false` refuses the allocation; the interpreter surfaces the
/// refusal as the uncatchable out-of-memory signal, observable only at the
/// host's `resume` call site.
pub trait AllocationTracker {
    fn track(&mut self, bytes: usize) -> bool;
}

/// Default tracker: never refuses.
pub struct UnboundedTracker;

impl AllocationTracker for UnboundedTracker {
    #[inline(always)]
    fn track(&mut self, _bytes: usize) -> bool {
        true
    }
}

/// Tracker with a fixed byte budget. Once the budget is spent every further
/// allocation is refused.
pub struct ByteBudgetTracker {
    remaining: usize,
}

impl ByteBudgetTracker {
    pub fn new(budget: usize) -> Self {
        Self { remaining: budget }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl AllocationTracker for ByteBudgetTracker {
    fn track(&mut self, bytes: usize) -> bool {
        if bytes > self.remaining {
            false
        } else {
            self.remaining -= bytes;
            true
        }
    }
}

/// The arenas behind all heap-typed `LuaValue`s except threads, which live on
/// the state so the interpreter can borrow a thread and the heap disjointly.
pub struct Heap {
    pub(crate) strings: StringPool,
    pub(crate) tables: Vec<LuaTable>,
    pub(crate) functions: Vec<LuaFunction>,
    pub(crate) userdata: Vec<LuaUserdata>,
    pub(crate) upvalues: Vec<Upvalue>,
    tracker: Box<dyn AllocationTracker>,
}

impl Heap {
    pub fn new(tracker: Box<dyn AllocationTracker>) -> Self {
        Self {
            strings: StringPool::new(),
            tables: Vec::new(),
            functions: Vec::new(),
            userdata: Vec::new(),
            upvalues: Vec::new(),
            tracker,
        }
    }

    /// Charge `bytes` to the allocation budget.
    #[inline]
    pub fn charge(&mut self, bytes: usize) -> LuaResult<()> {
        if self.tracker.track(bytes) {
            Ok(())
        } else {
            Err(LuaError::OutOfMemory)
        }
    }

    // ===== strings =====

    pub fn create_string(&mut self, s: &str) -> LuaResult<LuaValue> {
        self.create_string_bytes(s.as_bytes())
    }

    pub fn create_string_bytes(&mut self, bytes: &[u8]) -> LuaResult<LuaValue> {
        let Heap {
            strings, tracker, ..
        } = self;
        let id = strings.intern(bytes, &mut **tracker)?;
        Ok(LuaValue::String(id))
    }

    /// Substring of `id` over the byte range `start..end` (0-based, clamped by
    /// the caller). Aliases the backing bytes when more than half of them stay
    /// visible; copies otherwise.
    pub fn substring(&mut self, id: StringId, start: usize, end: usize) -> LuaResult<LuaValue> {
        let Heap {
            strings, tracker, ..
        } = self;
        let id = strings.substring(id, start, end, &mut **tracker)?;
        Ok(LuaValue::String(id))
    }

    #[inline(always)]
    pub fn string(&self, id: StringId) -> &LuaStr {
        self.strings.get(id)
    }

    #[inline(always)]
    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get(id).as_bytes()
    }

    #[inline]
    pub fn str_eq(&self, a: StringId, b: StringId) -> bool {
        a == b || self.strings.content_eq(a, b)
    }

    /// Raw (metamethod-free) equality. Strings compare by content; numbers by
    /// IEEE `==`; everything else by identity.
    #[inline]
    pub fn raw_equal(&self, a: &LuaValue, b: &LuaValue) -> bool {
        match (a, b) {
            (LuaValue::String(x), LuaValue::String(y)) => self.str_eq(*x, *y),
            _ => a.same_identity(b),
        }
    }

    // ===== tables =====

    pub fn create_table(&mut self, narr: usize, nrec: usize) -> LuaResult<LuaValue> {
        self.charge(std::mem::size_of::<LuaTable>() + (narr + nrec) * 32)?;
        let id = TableId(self.tables.len() as u32);
        self.tables.push(LuaTable::new(narr, nrec));
        Ok(LuaValue::Table(id))
    }

    #[inline(always)]
    pub fn table(&self, id: TableId) -> &LuaTable {
        &self.tables[id.index()]
    }

    #[inline(always)]
    pub fn table_mut(&mut self, id: TableId) -> &mut LuaTable {
        &mut self.tables[id.index()]
    }

    #[inline]
    pub fn table_get(&self, id: TableId, key: &LuaValue) -> LuaValue {
        self.tables[id.index()].raw_get(self.strings.slice(), key)
    }

    #[inline]
    pub fn table_get_int(&self, id: TableId, key: i64) -> LuaValue {
        self.tables[id.index()].raw_get_int(key)
    }

    #[inline]
    pub fn table_set(
        &mut self,
        id: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> Result<(), TableError> {
        let Heap {
            strings, tables, ..
        } = self;
        tables[id.index()].raw_set(strings.slice(), key, value)
    }

    #[inline]
    pub fn table_set_int(&mut self, id: TableId, key: i64, value: LuaValue) {
        let Heap {
            strings, tables, ..
        } = self;
        tables[id.index()].raw_set_int(strings.slice(), key, value)
    }

    #[inline]
    pub fn table_len(&self, id: TableId) -> i64 {
        self.tables[id.index()].raw_len()
    }

    #[inline]
    pub fn table_next(
        &self,
        id: TableId,
        key: &LuaValue,
    ) -> Result<Option<(LuaValue, LuaValue)>, TableError> {
        self.tables[id.index()].next(self.strings.slice(), key)
    }

    // ===== functions =====

    pub fn create_function(&mut self, f: LuaFunction) -> LuaResult<LuaValue> {
        self.charge(std::mem::size_of::<LuaFunction>())?;
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(f);
        Ok(LuaValue::Function(id))
    }

    #[inline(always)]
    pub fn function(&self, id: FunctionId) -> &LuaFunction {
        &self.functions[id.index()]
    }

    // ===== userdata =====

    pub fn create_userdata(&mut self, data: Box<dyn Any>) -> LuaResult<LuaValue> {
        self.charge(std::mem::size_of::<LuaUserdata>())?;
        let id = UserdataId(self.userdata.len() as u32);
        self.userdata.push(LuaUserdata::new(data));
        Ok(LuaValue::Userdata(id))
    }

    #[inline(always)]
    pub fn userdata(&self, id: UserdataId) -> &LuaUserdata {
        &self.userdata[id.index()]
    }

    #[inline(always)]
    pub fn userdata_mut(&mut self, id: UserdataId) -> &mut LuaUserdata {
        &mut self.userdata[id.index()]
    }

    // ===== upvalues =====

    pub fn create_upvalue(&mut self, cell: Upvalue) -> LuaResult<UpvalueId> {
        self.charge(std::mem::size_of::<Upvalue>())?;
        let id = UpvalueId(self.upvalues.len() as u32);
        self.upvalues.push(cell);
        Ok(id)
    }

    #[inline(always)]
    pub fn upvalue(&self, id: UpvalueId) -> &Upvalue {
        &self.upvalues[id.index()]
    }

    #[inline(always)]
    pub fn upvalue_mut(&mut self, id: UpvalueId) -> &mut Upvalue {
        &mut self.upvalues[id.index()]
    }
}
