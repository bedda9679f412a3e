// Arithmetic with coercion and metamethod fallback.
//
// Numbers are IEEE doubles throughout: division by zero gives ±inf/nan
// without error, `%` is the Lua floored modulus, `^` is pow. Strings that
// parse as numerals coerce in arithmetic context, as in PUC-Lua.

use crate::lua_value::LuaValue;
use crate::lua_vm::execute::metamethod::{get_binop_metamethod, TmKind};
use crate::lua_vm::number::str_to_number;
use crate::lua_vm::{LuaResult, LuaState};

/// Apply a numeric binary operator. `Unm` negates `a` (b is ignored).
#[inline]
pub fn apply_arith(tm: TmKind, a: f64, b: f64) -> f64 {
    match tm {
        TmKind::Add => a + b,
        TmKind::Sub => a - b,
        TmKind::Mul => a * b,
        TmKind::Div => a / b,
        // Lua definition: a - floor(a/b)*b, so the result takes b's sign.
        TmKind::Mod => a - (a / b).floor() * b,
        TmKind::Pow => a.powf(b),
        TmKind::Unm => -a,
        _ => unreachable!("not an arithmetic event"),
    }
}

/// Numeric coercion in arithmetic context: numbers pass through, numeral
/// strings parse.
pub fn coerce_number(state: &LuaState, v: &LuaValue) -> Option<f64> {
    match v {
        LuaValue::Number(n) => Some(*n),
        LuaValue::String(id) => {
            let s = state.heap.string(*id).display().into_owned();
            str_to_number(&s)
        }
        _ => None,
    }
}

pub enum ArithOutcome {
    Done(LuaValue),
    Call {
        handler: LuaValue,
        a: LuaValue,
        b: LuaValue,
    },
}

/// Binary (or unary, for `Unm`) arithmetic over raw values: coerce, fall back
/// to the metamethod, or raise the arithmetic type error.
pub fn arith_values(
    state: &mut LuaState,
    tm: TmKind,
    a: LuaValue,
    b: LuaValue,
) -> LuaResult<ArithOutcome> {
    if let (Some(x), Some(y)) = (coerce_number(state, &a), coerce_number(state, &b)) {
        return Ok(ArithOutcome::Done(LuaValue::Number(apply_arith(tm, x, y))));
    }
    let mm = get_binop_metamethod(state, &a, &b, tm);
    if !mm.is_nil() {
        return Ok(ArithOutcome::Call { handler: mm, a, b });
    }
    // Blame the operand that failed to coerce.
    let culprit = if coerce_number(state, &a).is_none() { a } else { b };
    Err(state.type_error(&culprit, "perform arithmetic on"))
}
