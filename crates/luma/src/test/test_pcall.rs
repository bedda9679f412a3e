// Protected calls: catching, error values, handlers, yield-through-pcall,
// uncatchable signals.

use crate::heap::ByteBudgetTracker;
use crate::test::support::*;
use crate::{new_state, new_state_with, LuaError, LuaState, LuaValue, OpCode, Varargs, VmOptions};

/// `function() error("boom") end`
fn erroring_fn(state: &mut LuaState) -> std::rc::Rc<crate::Prototype> {
    let error_name = state.create_string("error").unwrap();
    let boom = state.create_string("boom").unwrap();
    let mut f = crate::test::support::ProtoBuilder::new(0, 3)
        .defined_at(4)
        .upvalue("_ENV", false, 0);
    let kerr = f.rk(error_name);
    let kboom = f.k(boom);
    f.ins(abc(OpCode::GetTabUp, 0, 0, kerr));
    f.ins(abx(OpCode::LoadK, 1, kboom));
    f.ins(abc(OpCode::Call, 0, 2, 1));
    f.ins(abc(OpCode::Return, 0, 1, 0));
    f.build()
}

#[test]
fn pcall_catches_lua_error() {
    let mut state = new_state().unwrap();
    let inner = erroring_fn(&mut state);

    let pcall_name = state.create_string("pcall").unwrap();
    let mut main = main_proto(3);
    let kp = main.rk(pcall_name);
    let p = main.child(inner);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    main.ins(abx(OpCode::Closure, 1, p));
    main.ins(abc(OpCode::Call, 0, 2, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));
    let out = run_proto(&mut state, main.build(), &[]).unwrap().to_vec();

    assert!(matches!(out[0], LuaValue::Boolean(false)));
    let msg = string_result(&state, out[1]);
    assert!(msg.contains("boom"), "got: {}", msg);
    assert!(msg.contains("test:"), "location prefix expected: {}", msg);
}

#[test]
fn pcall_preserves_error_values() {
    // pcall(function() error({code=42}) end) -> false, {code=42}
    let mut state = new_state().unwrap();

    let error_name = state.create_string("error").unwrap();
    let code_name = state.create_string("code").unwrap();
    let mut f = crate::test::support::ProtoBuilder::new(0, 3)
        .defined_at(2)
        .upvalue("_ENV", false, 0);
    let kerr = f.rk(error_name);
    let kcode = f.rk(code_name);
    let k42 = f.rk(num(42.0));
    f.ins(abc(OpCode::GetTabUp, 0, 0, kerr));
    f.ins(abc(OpCode::NewTable, 1, 0, 1));
    f.ins(abc(OpCode::SetTable, 1, kcode, k42));
    f.ins(abc(OpCode::Call, 0, 2, 1));
    f.ins(abc(OpCode::Return, 0, 1, 0));
    let inner = f.build();

    let pcall_name = state.create_string("pcall").unwrap();
    let mut main = main_proto(3);
    let kp = main.rk(pcall_name);
    let p = main.child(inner);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    main.ins(abx(OpCode::Closure, 1, p));
    main.ins(abc(OpCode::Call, 0, 2, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));
    let out = run_proto(&mut state, main.build(), &[]).unwrap().to_vec();

    assert!(matches!(out[0], LuaValue::Boolean(false)));
    let err_table = out[1].as_table().expect("error value is the table");
    let code = state.create_string("code").unwrap();
    assert_eq!(
        state.heap.table_get(err_table, &code).as_number(),
        Some(42.0)
    );
}

#[test]
fn pcall_success_prepends_true() {
    let mut state = new_state().unwrap();

    let mut f = crate::test::support::ProtoBuilder::new(0, 2).defined_at(3);
    let k7 = f.k(num(7.0));
    let k8 = f.k(num(8.0));
    f.ins(abx(OpCode::LoadK, 0, k7));
    f.ins(abx(OpCode::LoadK, 1, k8));
    f.ins(abc(OpCode::Return, 0, 3, 0));
    let inner = f.build();

    let pcall_name = state.create_string("pcall").unwrap();
    let mut main = main_proto(3);
    let kp = main.rk(pcall_name);
    let p = main.child(inner);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    main.ins(abx(OpCode::Closure, 1, p));
    main.ins(abc(OpCode::Call, 0, 2, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));
    let out = run_proto(&mut state, main.build(), &[]).unwrap().to_vec();

    assert!(matches!(out[0], LuaValue::Boolean(true)));
    assert_eq!(out[1].as_number(), Some(7.0));
    assert_eq!(out[2].as_number(), Some(8.0));
}

#[test]
fn pcall_barrier_survives_yield_and_resume() {
    // Inside a coroutine: pcall(function() coroutine.yield() error('x') end)
    // After resuming, pcall still catches the error raised past the yield.
    let mut state = new_state().unwrap();

    let co_name = state.create_string("coroutine").unwrap();
    let yield_name = state.create_string("yield").unwrap();
    let error_name = state.create_string("error").unwrap();
    let x_msg = state.create_string("x").unwrap();

    let mut g = crate::test::support::ProtoBuilder::new(0, 3)
        .defined_at(1)
        .upvalue("_ENV", false, 0);
    let kco = g.rk(co_name);
    let kyield = g.rk(yield_name);
    let kerr = g.rk(error_name);
    let kx = g.k(x_msg);
    g.ins(abc(OpCode::GetTabUp, 0, 0, kco));
    g.ins(abc(OpCode::GetTable, 0, 0, kyield));
    g.ins(abc(OpCode::Call, 0, 1, 1));
    g.ins(abc(OpCode::GetTabUp, 0, 0, kerr));
    g.ins(abx(OpCode::LoadK, 1, kx));
    g.ins(abc(OpCode::Call, 0, 2, 1));
    g.ins(abc(OpCode::Return, 0, 1, 0));
    let g = g.build();

    let pcall_name = state.create_string("pcall").unwrap();
    let mut body = crate::test::support::ProtoBuilder::new(0, 3)
        .defined_at(1)
        .upvalue("_ENV", false, 0);
    let kp = body.rk(pcall_name);
    let p = body.child(g);
    body.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    body.ins(abx(OpCode::Closure, 1, p));
    body.ins(abc(OpCode::Call, 0, 2, 0));
    body.ins(abc(OpCode::Return, 0, 0, 0));
    let body = state.closure_with_env(body.build(), None).unwrap();

    let co = state.new_thread(body).unwrap();
    let first = state.resume(co, Varargs::None).unwrap();
    assert!(first.is_empty(), "plain yield carries no values");

    let out = state.resume(co, Varargs::None).unwrap().to_vec();
    assert!(matches!(out[0], LuaValue::Boolean(false)));
    let msg = string_result(&state, out[1]);
    assert!(msg.ends_with("x"), "got: {}", msg);
}

#[test]
fn xpcall_handler_transforms_the_error() {
    let mut state = new_state().unwrap();
    let inner = erroring_fn(&mut state);

    // handler = function(e) return "H:" .. e end
    let h_prefix = state.create_string("H:").unwrap();
    let mut h = crate::test::support::ProtoBuilder::new(1, 4).defined_at(6);
    let kh = h.k(h_prefix);
    h.ins(abx(OpCode::LoadK, 1, kh));
    h.ins(abc(OpCode::Move, 2, 0, 0));
    h.ins(abc(OpCode::Concat, 1, 1, 2));
    h.ins(abc(OpCode::Return, 1, 2, 0));
    let handler = h.build();

    let xpcall_name = state.create_string("xpcall").unwrap();
    let mut main = main_proto(4);
    let kx = main.rk(xpcall_name);
    let pf = main.child(inner);
    let ph = main.child(handler);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kx));
    main.ins(abx(OpCode::Closure, 1, pf));
    main.ins(abx(OpCode::Closure, 2, ph));
    main.ins(abc(OpCode::Call, 0, 3, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));
    let out = run_proto(&mut state, main.build(), &[]).unwrap().to_vec();

    assert!(matches!(out[0], LuaValue::Boolean(false)));
    let msg = string_result(&state, out[1]);
    assert!(msg.starts_with("H:"), "handler did not run: {}", msg);
    assert!(msg.contains("boom"));
}

#[test]
fn failing_handler_reports_to_outer_pcall() {
    // pcall(function() xpcall(f_err, h_err) end) -> false, <handler error>
    let mut state = new_state().unwrap();
    let f_err = erroring_fn(&mut state);

    let error_name = state.create_string("error").unwrap();
    let h_fail = state.create_string("h-fail").unwrap();
    let mut h = crate::test::support::ProtoBuilder::new(1, 3)
        .defined_at(8)
        .upvalue("_ENV", false, 0);
    let kerr = h.rk(error_name);
    let khf = h.k(h_fail);
    h.ins(abc(OpCode::GetTabUp, 1, 0, kerr));
    h.ins(abx(OpCode::LoadK, 2, khf));
    h.ins(abc(OpCode::Call, 1, 2, 1));
    h.ins(abc(OpCode::Return, 1, 1, 0));
    let h_err = h.build();

    let xpcall_name = state.create_string("xpcall").unwrap();
    let mut body = crate::test::support::ProtoBuilder::new(0, 4)
        .defined_at(1)
        .upvalue("_ENV", false, 0);
    let kx = body.rk(xpcall_name);
    let pf = body.child(f_err);
    let ph = body.child(h_err);
    body.ins(abc(OpCode::GetTabUp, 0, 0, kx));
    body.ins(abx(OpCode::Closure, 1, pf));
    body.ins(abx(OpCode::Closure, 2, ph));
    body.ins(abc(OpCode::Call, 0, 3, 0));
    body.ins(abc(OpCode::Return, 0, 0, 0));
    let body = body.build();

    let pcall_name = state.create_string("pcall").unwrap();
    let mut main = main_proto(3);
    let kp = main.rk(pcall_name);
    let pb = main.child(body);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    main.ins(abx(OpCode::Closure, 1, pb));
    main.ins(abc(OpCode::Call, 0, 2, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));
    let out = run_proto(&mut state, main.build(), &[]).unwrap().to_vec();

    assert!(matches!(out[0], LuaValue::Boolean(false)));
    let msg = string_result(&state, out[1]);
    assert!(msg.contains("h-fail"), "got: {}", msg);
}

#[test]
fn allocation_refusal_bypasses_pcall() {
    // A tight byte budget: the string-building loop inside pcall must
    // surface OutOfMemory at the call boundary, never (false, err).
    let mut state = new_state_with(
        Box::new(ByteBudgetTracker::new(120_000)),
        VmOptions::default(),
    )
    .unwrap();

    let empty = state.create_string("").unwrap();
    let chunk = state.create_string("xxxxxxxx").unwrap();

    // f = function() local s = "" for i = 1, 1e6 do s = s .. "xxxxxxxx" end end
    let mut f = crate::test::support::ProtoBuilder::new(0, 7).defined_at(1);
    let kempty = f.k(empty);
    let k1 = f.k(num(1.0));
    let kn = f.k(num(1_000_000.0));
    let kx = f.k(chunk);
    f.ins(abx(OpCode::LoadK, 0, kempty));
    f.ins(abx(OpCode::LoadK, 1, k1));
    f.ins(abx(OpCode::LoadK, 2, kn));
    f.ins(abx(OpCode::LoadK, 3, k1));
    f.ins(asbx(OpCode::ForPrep, 1, 3));
    f.ins(abc(OpCode::Move, 5, 0, 0));
    f.ins(abx(OpCode::LoadK, 6, kx));
    f.ins(abc(OpCode::Concat, 0, 5, 6));
    f.ins(asbx(OpCode::ForLoop, 1, -4));
    f.ins(abc(OpCode::Return, 0, 1, 0));
    let inner = f.build();

    let pcall_name = state.create_string("pcall").unwrap();
    let mut main = main_proto(3);
    let kp = main.rk(pcall_name);
    let p = main.child(inner);
    main.ins(abc(OpCode::GetTabUp, 0, 0, kp));
    main.ins(abx(OpCode::Closure, 1, p));
    main.ins(abc(OpCode::Call, 0, 2, 0));
    main.ins(abc(OpCode::Return, 0, 0, 0));

    let err = run_proto(&mut state, main.build(), &[]).unwrap_err();
    assert_eq!(err, LuaError::OutOfMemory);
}
