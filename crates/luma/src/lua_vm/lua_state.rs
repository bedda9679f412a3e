// Global interpreter state.
//
// One LuaState per embedding: it owns the heap (strings, tables, functions,
// userdata, upvalue cells), every thread, the globals and registry tables,
// and the per-type metatables. Exactly one thread is Running at any instant;
// the state is single-threaded and never shared across OS threads.

use std::rc::Rc;

use crate::compiler::Compiler;
use crate::heap::{
    AllocationTracker, Heap, TableId, ThreadId, UnboundedTracker, UpvalueId,
};
use crate::lua_value::{
    undump_chunk, LuaThread, LuaValue, Prototype, ThreadStatus, Varargs,
};
use crate::lua_vm::execute::metamethod::{self, TmKind, TM_COUNT};
use crate::lua_vm::frame::{
    FrameState, HostAction, HostClosure, HostFunction, LuaClosure, LuaFunction, Upvalue,
};
use crate::lua_vm::number::number_to_string;
use crate::lua_vm::{LuaError, LuaFullError, LuaResult};

/// Tunable limits, injected at construction.
#[derive(Clone)]
pub struct VmOptions {
    /// Register-stack slots per thread before the uncatchable overflow.
    pub max_registers: usize,
    /// Call-frame depth per thread before the uncatchable overflow.
    pub max_frames: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_registers: 1_000_000,
            max_frames: 65_536,
        }
    }
}

pub struct LuaState {
    pub(crate) heap: Heap,
    pub(crate) threads: Vec<LuaThread>,
    pub(crate) globals: TableId,
    pub(crate) registry: TableId,
    /// Metatables for nil/boolean/number/string/function/thread; tables and
    /// userdata carry their own.
    pub(crate) type_metatables: [Option<TableId>; 8],
    pub(crate) main_thread: ThreadId,
    pub(crate) current: ThreadId,
    /// Payload of the pending RuntimeError signal.
    pub(crate) error_value: LuaValue,
    /// Message of the pending CompileError signal.
    pub(crate) compile_error: String,
    /// Pre-interned metamethod event names, indexed by TmKind.
    pub(crate) tm_names: [LuaValue; TM_COUNT],
    pub(crate) compiler: Option<Box<dyn Compiler>>,
    pub(crate) options: VmOptions,
}

impl LuaState {
    pub fn new() -> Box<LuaState> {
        Self::with_tracker(Box::new(UnboundedTracker), VmOptions::default())
    }

    pub fn with_tracker(
        tracker: Box<dyn AllocationTracker>,
        options: VmOptions,
    ) -> Box<LuaState> {
        let mut heap = Heap::new(tracker);

        // Pre-intern every metamethod name; charged allocations cannot fail
        // on a fresh heap with a sane budget, but propagate a refusal as an
        // empty-state panic rather than a half-built state.
        let mut tm_names = [LuaValue::Nil; TM_COUNT];
        for (i, name) in metamethod::EVENT_NAMES.iter().enumerate() {
            tm_names[i] = heap
                .create_string(name)
                .expect("allocation budget too small for interpreter bootstrap");
        }

        let globals = heap
            .create_table(0, 20)
            .expect("allocation budget too small for interpreter bootstrap")
            .as_table()
            .unwrap();
        let registry = heap
            .create_table(0, 8)
            .expect("allocation budget too small for interpreter bootstrap")
            .as_table()
            .unwrap();

        let mut state = Box::new(LuaState {
            heap,
            threads: Vec::new(),
            globals,
            registry,
            type_metatables: [None; 8],
            main_thread: ThreadId(0),
            current: ThreadId(0),
            error_value: LuaValue::Nil,
            compile_error: String::new(),
            tm_names,
            compiler: None,
            options,
        });

        let mut main = LuaThread::new(LuaValue::Nil);
        main.status = ThreadStatus::Running;
        state.threads.push(main);

        // _G points at the globals table itself.
        let g = LuaValue::Table(globals);
        state.set_global("_G", g).expect("bootstrap");
        state
    }

    /// Install the source compiler (the black-box source -> prototype seam).
    pub fn set_compiler(&mut self, compiler: Box<dyn Compiler>) {
        self.compiler = Some(compiler);
    }

    // ===== thread plumbing =====

    #[inline(always)]
    pub(crate) fn thread(&self, t: ThreadId) -> &LuaThread {
        &self.threads[t.index()]
    }

    #[inline(always)]
    pub(crate) fn thread_mut(&mut self, t: ThreadId) -> &mut LuaThread {
        &mut self.threads[t.index()]
    }

    #[inline(always)]
    pub(crate) fn cur(&self) -> &LuaThread {
        &self.threads[self.current.index()]
    }

    #[inline(always)]
    pub(crate) fn cur_mut(&mut self) -> &mut LuaThread {
        let id = self.current;
        &mut self.threads[id.index()]
    }

    pub fn main_thread_value(&self) -> LuaValue {
        LuaValue::Thread(self.main_thread)
    }

    pub fn current_thread_value(&self) -> LuaValue {
        LuaValue::Thread(self.current)
    }

    #[inline(always)]
    pub fn is_main(&self, t: ThreadId) -> bool {
        t == self.main_thread
    }

    // ===== value constructors =====

    pub fn create_string(&mut self, s: &str) -> LuaResult<LuaValue> {
        self.heap.create_string(s)
    }

    pub fn create_string_bytes(&mut self, bytes: &[u8]) -> LuaResult<LuaValue> {
        self.heap.create_string_bytes(bytes)
    }

    pub fn create_table(&mut self, narr: usize, nrec: usize) -> LuaResult<LuaValue> {
        self.heap.create_table(narr, nrec)
    }

    pub fn create_closure(
        &mut self,
        proto: Rc<Prototype>,
        upvalues: Box<[UpvalueId]>,
    ) -> LuaResult<LuaValue> {
        self.heap
            .create_function(LuaFunction::Lua(LuaClosure { proto, upvalues }))
    }

    pub fn create_host_function(&mut self, func: HostFunction) -> LuaResult<LuaValue> {
        self.heap.create_function(LuaFunction::Host(HostClosure {
            func,
            bound: LuaValue::Nil,
        }))
    }

    pub fn create_host_closure(
        &mut self,
        func: HostFunction,
        bound: LuaValue,
    ) -> LuaResult<LuaValue> {
        self.heap
            .create_function(LuaFunction::Host(HostClosure { func, bound }))
    }

    /// Wrap a prototype into a closure whose single upvalue (`_ENV` by
    /// convention) is `env`, defaulting to the globals table.
    pub fn closure_with_env(
        &mut self,
        proto: Rc<Prototype>,
        env: Option<LuaValue>,
    ) -> LuaResult<LuaValue> {
        let env = env.unwrap_or(LuaValue::Table(self.globals));
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for _ in proto.upvalues.iter() {
            upvalues.push(self.heap.create_upvalue(Upvalue::Closed(LuaValue::Nil))?);
        }
        if let Some(&first) = upvalues.first() {
            *self.heap.upvalue_mut(first) = Upvalue::Closed(env);
        }
        self.create_closure(proto, upvalues.into_boxed_slice())
    }

    // ===== globals / registry =====

    pub fn globals_value(&self) -> LuaValue {
        LuaValue::Table(self.globals)
    }

    pub fn registry_value(&self) -> LuaValue {
        LuaValue::Table(self.registry)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        let key = self.heap.create_string(name)?;
        let globals = self.globals;
        // Key is a fresh string: cannot be nil/NaN.
        let _ = self.heap.table_set(globals, key, value);
        Ok(())
    }

    pub fn get_global(&mut self, name: &str) -> LuaResult<LuaValue> {
        let key = self.heap.create_string(name)?;
        Ok(self.heap.table_get(self.globals, &key))
    }

    // ===== upvalue cells =====

    pub(crate) fn read_upvalue(&self, id: UpvalueId) -> LuaValue {
        match *self.heap.upvalue(id) {
            Upvalue::Open { thread, slot } => self.threads[thread.index()].registers
                [slot as usize],
            Upvalue::Closed(v) => v,
        }
    }

    pub(crate) fn write_upvalue(&mut self, id: UpvalueId, value: LuaValue) {
        match *self.heap.upvalue(id) {
            Upvalue::Open { thread, slot } => {
                self.threads[thread.index()].registers[slot as usize] = value;
            }
            Upvalue::Closed(_) => *self.heap.upvalue_mut(id) = Upvalue::Closed(value),
        }
    }

    /// Find the open upvalue for `slot` on thread `t`, creating it if absent.
    /// The per-thread list is kept sorted by slot.
    pub(crate) fn find_or_create_open_upvalue(
        &mut self,
        t: ThreadId,
        slot: u32,
    ) -> LuaResult<UpvalueId> {
        let pos = {
            let list = &self.threads[t.index()].open_upvalues;
            match list.binary_search_by_key(&slot, |&(s, _)| s) {
                Ok(i) => return Ok(list[i].1),
                Err(i) => i,
            }
        };
        let id = self
            .heap
            .create_upvalue(Upvalue::Open { thread: t, slot })?;
        self.threads[t.index()].open_upvalues.insert(pos, (slot, id));
        Ok(id)
    }

    /// Close every open upvalue at or above `from_slot`: promote the register
    /// value into the cell and unlink. O(closed count).
    pub(crate) fn close_upvalues(&mut self, t: ThreadId, from_slot: u32) {
        loop {
            let (slot, id) = {
                let list = &self.threads[t.index()].open_upvalues;
                match list.last() {
                    Some(&(slot, id)) if slot >= from_slot => (slot, id),
                    _ => break,
                }
            };
            let value = self.threads[t.index()].registers[slot as usize];
            *self.heap.upvalue_mut(id) = Upvalue::Closed(value);
            self.threads[t.index()].open_upvalues.pop();
        }
    }

    // ===== host-function frame access =====

    /// Number of arguments of the current (host) frame.
    pub fn arg_count(&self) -> u32 {
        self.cur().current_frame().map_or(0, |f| f.arg_count())
    }

    /// Argument `i` (1-based) of the current frame; nil when absent.
    pub fn arg(&self, i: u32) -> LuaValue {
        let th = self.cur();
        match th.current_frame() {
            Some(f) if i >= 1 && i <= f.arg_count() => {
                th.registers[(f.base + i - 1) as usize]
            }
            _ => LuaValue::Nil,
        }
    }

    /// All arguments of the current frame.
    pub fn args(&self) -> Varargs {
        let th = self.cur();
        match th.current_frame() {
            Some(f) => Varargs::from_slice(
                &th.registers[f.base as usize..f.top as usize],
            ),
            None => Varargs::None,
        }
    }

    /// The value bound into the running host closure (nil for plain ones).
    pub fn bound_value(&self) -> LuaValue {
        let th = self.cur();
        th.current_frame()
            .and_then(|f| f.func.as_function())
            .and_then(|id| self.heap.function(id).as_host().map(|h| h.bound))
            .unwrap_or(LuaValue::Nil)
    }

    /// Push a value on the current thread's stack (host result protocol).
    pub fn push_value(&mut self, v: LuaValue) -> LuaResult<()> {
        if self.cur().top as usize + 1 > self.options.max_registers {
            return Err(LuaError::StackOverflow);
        }
        self.cur_mut().push_register(v);
        Ok(())
    }

    /// Park resumable state on the current frame.
    pub fn set_frame_state(&mut self, state: FrameState) {
        if let Some(f) = self.cur_mut().current_frame_mut() {
            f.state = Some(state);
        }
    }

    pub fn set_frame_flag(&mut self, flag: u8) {
        if let Some(f) = self.cur_mut().current_frame_mut() {
            f.flags |= flag;
        }
    }

    /// Take back the state parked on the current (host) frame.
    pub fn take_frame_state(&mut self) -> Option<FrameState> {
        self.cur_mut()
            .current_frame_mut()
            .and_then(|f| f.state.take())
    }

    /// Arrange `f(args...)` above the current top and hand back the
    /// [`HostAction::Call`] describing it.
    pub fn begin_call(&mut self, f: LuaValue, args: &[LuaValue]) -> LuaResult<HostAction> {
        let func_idx = self.cur().top;
        self.push_value(f)?;
        for &a in args {
            self.push_value(a)?;
        }
        Ok(HostAction::Call {
            func_idx,
            nargs: args.len() as u32,
        })
    }

    /// Yield the current thread: record the values, flip the status, and
    /// return the unwind signal for the caller to propagate.
    pub fn do_yield(&mut self, values: Varargs) -> LuaError {
        if self.current == self.main_thread {
            return self.rt_error("attempt to yield from outside a coroutine");
        }
        let th = self.cur_mut();
        th.yield_values = values;
        th.status = ThreadStatus::Suspended;
        LuaError::Yield
    }

    // ===== errors =====

    /// Raise a Lua error with a `source:line:` location prefix taken from the
    /// innermost Lua frame of the current thread.
    pub fn rt_error(&mut self, msg: impl Into<String>) -> LuaError {
        let located = format!("{}{}", self.where_prefix(), msg.into());
        match self.heap.create_string(&located) {
            Ok(v) => {
                self.error_value = v;
                LuaError::RuntimeError
            }
            Err(fatal) => fatal,
        }
    }

    /// Raise a Lua error carrying an arbitrary value (no stringification).
    pub fn rt_error_value(&mut self, value: LuaValue) -> LuaError {
        self.error_value = value;
        LuaError::RuntimeError
    }

    /// `"bad argument #N (<expected> expected, got <actual>)"`; a `__name`
    /// on the actual operand substitutes the type name for tables/userdata.
    pub fn arg_error(&mut self, n: u32, expected: &str, got: &LuaValue) -> LuaError {
        let actual = if got.is_nil() && self.arg_count() < n {
            "no value".to_string()
        } else {
            self.type_name_of(got)
        };
        self.rt_error(format!(
            "bad argument #{} ({} expected, got {})",
            n, expected, actual
        ))
    }

    /// `"attempt to <op> a <type> value"`.
    pub fn type_error(&mut self, value: &LuaValue, op: &str) -> LuaError {
        let tn = self.type_name_of(value);
        self.rt_error(format!("attempt to {} a {} value", op, tn))
    }

    /// Location prefix of the innermost Lua frame, or empty.
    pub(crate) fn where_prefix(&self) -> String {
        let th = self.cur();
        for frame in th.frames.iter().rev() {
            if frame.is_lua() {
                if let Some(id) = frame.func.as_function() {
                    if let Some(closure) = self.heap.function(id).as_lua() {
                        let pc = frame.pc.saturating_sub(1);
                        let line = closure.proto.line_at(pc);
                        return format!("{}:{}: ", closure.proto.short_src(), line);
                    }
                }
            }
        }
        String::new()
    }

    /// Location prefix for `error(msg, level)`: level 1 is the caller of the
    /// running host function, level 2 its caller, and so on.
    pub(crate) fn where_prefix_level(&self, level: u32) -> String {
        let th = self.cur();
        if let Some(idx) = th.frames.len().checked_sub(1 + level as usize) {
            let frame = &th.frames[idx];
            if frame.is_lua() {
                if let Some(id) = frame.func.as_function() {
                    if let Some(closure) = self.heap.function(id).as_lua() {
                        let line = closure.proto.line_at(frame.pc.saturating_sub(1));
                        return format!("{}:{}: ", closure.proto.short_src(), line);
                    }
                }
            }
        }
        String::new()
    }

    /// The value carried by the last RuntimeError signal.
    pub fn error_value(&self) -> LuaValue {
        self.error_value
    }

    /// Render the pending error as text (no `__tostring` dispatch).
    pub fn error_message(&self) -> String {
        self.display_value(&self.error_value)
    }

    /// Expand a signal into a rich error for the embedding boundary.
    pub fn into_full_error(&self, kind: LuaError) -> LuaFullError {
        let message = match kind {
            LuaError::RuntimeError => self.error_message(),
            LuaError::CompileError => self.compile_error.clone(),
            _ => kind.to_string(),
        };
        LuaFullError { kind, message }
    }

    // ===== rendering =====

    /// Raw display form: the `tostring` result before `__tostring` dispatch.
    pub fn display_value(&self, v: &LuaValue) -> String {
        match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(true) => "true".to_string(),
            LuaValue::Boolean(false) => "false".to_string(),
            LuaValue::Number(n) => number_to_string(*n),
            LuaValue::String(id) => self.heap.string(*id).display().into_owned(),
            LuaValue::Table(id) => format!("table: 0x{:08x}", id.0),
            LuaValue::Function(id) => format!("function: 0x{:08x}", id.0),
            LuaValue::Userdata(id) => format!("userdata: 0x{:08x}", id.0),
            LuaValue::Thread(id) => format!("thread: 0x{:08x}", id.0),
        }
    }

    /// Type name with `__name` substitution for tables and userdata.
    pub fn type_name_of(&self, v: &LuaValue) -> String {
        if matches!(v, LuaValue::Table(_) | LuaValue::Userdata(_)) {
            if let Some(mt) = metamethod::get_metatable(self, v) {
                let name_key = self.tm_names[TmKind::Name as usize];
                let named = self.heap.table_get(mt, &name_key);
                if let Some(id) = named.as_string() {
                    return self.heap.string(id).display().into_owned();
                }
            }
        }
        v.type_name().to_string()
    }

    // ===== embedding API =====

    /// Compile or undump a chunk into a closure. Binary chunks need mode to
    /// contain `b`, textual ones `t`. Failures are reported to the caller,
    /// not raised into Lua.
    pub fn load(
        &mut self,
        bytes: &[u8],
        chunk_name: &str,
        mode: &str,
        env: Option<LuaValue>,
    ) -> Result<LuaValue, String> {
        let proto = if bytes.first() == Some(&0x1B) {
            if !mode.contains('b') {
                return Err(format!(
                    "attempt to load a binary chunk (mode is '{}')",
                    mode
                ));
            }
            undump_chunk(&mut self.heap, bytes, chunk_name)?
        } else {
            if !mode.contains('t') {
                return Err(format!("attempt to load a text chunk (mode is '{}')", mode));
            }
            let mut compiler = match self.compiler.take() {
                Some(c) => c,
                None => return Err("no compiler installed".to_string()),
            };
            let result = compiler.compile(self, bytes, chunk_name);
            self.compiler = Some(compiler);
            match result {
                Ok(proto) => proto,
                Err(msg) => {
                    self.compile_error = msg.clone();
                    return Err(msg);
                }
            }
        };
        self.closure_with_env(proto, env)
            .map_err(|e| e.to_string())
    }

    /// Create a coroutine whose entry point is `closure`.
    pub fn new_thread(&mut self, closure: LuaValue) -> LuaResult<LuaValue> {
        self.heap.charge(std::mem::size_of::<LuaThread>())?;
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(LuaThread::new(closure));
        Ok(LuaValue::Thread(id))
    }

    /// Resume a coroutine with `args`, running until it yields, returns, or
    /// fails. Lua errors come back as `Err(RuntimeError)` with the value in
    /// [`error_value`]; uncatchable signals pass through unchanged.
    pub fn resume(&mut self, thread: LuaValue, args: Varargs) -> LuaResult<Varargs> {
        let t = match thread.as_thread() {
            Some(t) => t,
            None => return Err(self.rt_error("cannot resume a non-thread value")),
        };
        crate::lua_vm::coroutine::resume_thread(self, t, args)
    }

    /// Host-side call of `f` on the current thread, running to completion.
    pub fn call(&mut self, f: LuaValue, args: Varargs) -> LuaResult<Varargs> {
        crate::lua_vm::execute::call_value(self, f, args)
    }
}
