// CONCAT: fold registers R[first..=last] right to left.
//
// Adjacent string/number runs collapse through one buffer instead of
// repeated pairwise allocation; anything else goes through __concat, one
// pair at a time, with the fold position parked in the caller's
// FinishConcat continuation.

use crate::heap::ThreadId;
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::metamethod::{get_binop_metamethod, TmKind};
use crate::lua_vm::number::number_to_string;
use crate::lua_vm::{LuaResult, LuaState};

pub enum ConcatStep {
    /// Fold complete; the result is in R[a].
    Done,
    /// Call `handler(x, y)` and store the result at relative register
    /// `dest`, then resume the fold from there.
    Call {
        handler: LuaValue,
        x: LuaValue,
        y: LuaValue,
        dest: u32,
    },
}

#[inline]
fn concatable(v: &LuaValue) -> bool {
    v.is_string() || v.is_number()
}

fn value_bytes(state: &LuaState, v: &LuaValue, out: &mut Vec<u8>) {
    match v {
        LuaValue::String(id) => out.extend_from_slice(state.heap.string_bytes(*id)),
        LuaValue::Number(n) => {
            let mut buf = itoa::Buffer::new();
            if n.floor() == *n && n.abs() < 9.007_199_254_740_992e15 && (*n != 0.0 || !n.is_sign_negative())
            {
                out.extend_from_slice(buf.format(*n as i64).as_bytes());
            } else {
                out.extend_from_slice(number_to_string(*n).as_bytes());
            }
        }
        _ => unreachable!("only strings and numbers reach the buffer"),
    }
}

/// Run the fold from `top_reg` down to `first` (relative register indices).
/// Re-entered by the FinishConcat continuation after each __concat call.
pub fn do_concat(
    state: &mut LuaState,
    t: ThreadId,
    base: u32,
    a: u32,
    first: u32,
    mut top_reg: u32,
) -> LuaResult<ConcatStep> {
    loop {
        if top_reg == first {
            let th = state.thread_mut(t);
            let v = th.registers[(base + first) as usize];
            th.registers[(base + a) as usize] = v;
            return Ok(ConcatStep::Done);
        }
        let l = state.thread(t).registers[(base + top_reg - 1) as usize];
        let r = state.thread(t).registers[(base + top_reg) as usize];
        if concatable(&l) && concatable(&r) {
            // Collapse the maximal run of string/number operands in one go.
            let mut k = top_reg - 1;
            while k > first {
                let prev = state.thread(t).registers[(base + k - 1) as usize];
                if !concatable(&prev) {
                    break;
                }
                k -= 1;
            }
            let mut bytes = Vec::new();
            for i in k..=top_reg {
                let v = state.thread(t).registers[(base + i) as usize];
                value_bytes(state, &v, &mut bytes);
            }
            let merged = state.heap.create_string_bytes(&bytes)?;
            state.thread_mut(t).registers[(base + k) as usize] = merged;
            top_reg = k;
        } else {
            let mm = get_binop_metamethod(state, &l, &r, TmKind::Concat);
            if mm.is_nil() {
                let culprit = if concatable(&l) { r } else { l };
                return Err(state.type_error(&culprit, "concatenate"));
            }
            return Ok(ConcatStep::Call {
                handler: mm,
                x: l,
                y: r,
                dest: top_reg - 1,
            });
        }
    }
}
