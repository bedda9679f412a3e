// Prototype assembler for VM tests.

use std::rc::Rc;

use crate::lua_value::{LocVar, Prototype, UpvalDesc, Varargs};
use crate::lua_vm::opcode::rk_as_k;
use crate::lua_vm::{Instruction, LuaResult, LuaState, OpCode};
use crate::LuaValue;

pub struct ProtoBuilder {
    source: String,
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u8,
    code: Vec<u32>,
    constants: Vec<LuaValue>,
    protos: Vec<Rc<Prototype>>,
    upvalues: Vec<UpvalDesc>,
    line_info: Vec<u32>,
    loc_vars: Vec<LocVar>,
    line_defined: u32,
}

impl ProtoBuilder {
    pub fn new(num_params: u8, max_stack_size: u8) -> Self {
        Self {
            source: "=test".to_string(),
            num_params,
            is_vararg: false,
            max_stack_size,
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            line_info: Vec::new(),
            loc_vars: Vec::new(),
            line_defined: 0,
        }
    }

    pub fn source(mut self, src: &str) -> Self {
        self.source = src.to_string();
        self
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    /// Mark this as a nested function (line_defined > 0).
    pub fn defined_at(mut self, line: u32) -> Self {
        self.line_defined = line;
        self
    }

    pub fn upvalue(mut self, name: &str, from_local: bool, index: u8) -> Self {
        self.upvalues.push(UpvalDesc {
            name: name.into(),
            from_local,
            index,
        });
        self
    }

    pub fn local_var(mut self, name: &str, start_pc: u32, end_pc: u32) -> Self {
        self.loc_vars.push(LocVar {
            name: name.into(),
            start_pc,
            end_pc,
        });
        self
    }

    /// Add a constant, returning its pool index.
    pub fn k(&mut self, v: LuaValue) -> u32 {
        self.constants.push(v);
        (self.constants.len() - 1) as u32
    }

    /// Add a constant, returning its RK-encoded operand.
    pub fn rk(&mut self, v: LuaValue) -> u32 {
        rk_as_k(self.k(v))
    }

    pub fn child(&mut self, proto: Rc<Prototype>) -> u32 {
        self.protos.push(proto);
        (self.protos.len() - 1) as u32
    }

    /// Append an instruction on source line `line`.
    pub fn ins_at(&mut self, i: Instruction, line: u32) -> &mut Self {
        self.code.push(i.0);
        self.line_info.push(line);
        self
    }

    pub fn ins(&mut self, i: Instruction) -> &mut Self {
        let line = self.line_info.last().copied().unwrap_or(1);
        self.ins_at(i, line)
    }

    pub fn build(self) -> Rc<Prototype> {
        Rc::new(Prototype {
            source: self.source.into(),
            line_defined: self.line_defined,
            last_line_defined: self.line_defined,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size,
            code: self.code.into_boxed_slice(),
            constants: self.constants.into_boxed_slice(),
            protos: self.protos.into_boxed_slice(),
            upvalues: self.upvalues.into_boxed_slice(),
            line_info: self.line_info.into_boxed_slice(),
            loc_vars: self.loc_vars.into_boxed_slice(),
        })
    }
}

pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Instruction {
    Instruction::abc(op, a, b, c)
}

pub fn abx(op: OpCode, a: u32, bx: u32) -> Instruction {
    Instruction::abx(op, a, bx)
}

pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Instruction {
    Instruction::asbx(op, a, sbx)
}

pub fn num(n: f64) -> LuaValue {
    LuaValue::Number(n)
}

/// A main-chunk prototype needs one `_ENV` upvalue to see the globals.
pub fn main_proto(max_stack: u8) -> ProtoBuilder {
    ProtoBuilder::new(0, max_stack).upvalue("_ENV", false, 0)
}

/// Wrap `proto` with the globals environment and call it on the main thread.
pub fn run_proto(
    state: &mut LuaState,
    proto: Rc<Prototype>,
    args: &[LuaValue],
) -> LuaResult<Varargs> {
    let f = state.closure_with_env(proto, None)?;
    state.call(f, Varargs::from_slice(args))
}

/// Fetch a global by name, for assembling calls to library functions.
pub fn global(state: &mut LuaState, name: &str) -> LuaValue {
    state.get_global(name).unwrap()
}

pub fn expect_numbers(results: &Varargs) -> Vec<f64> {
    results
        .to_vec()
        .iter()
        .map(|v| v.as_number().expect("number result"))
        .collect()
}

pub fn string_result(state: &LuaState, v: LuaValue) -> String {
    state.display_value(&v)
}
