// Debug subsystem: tracebacks, hooks, local and upvalue introspection.

use crate::lua_vm::debug_info::{get_upvalue, parse_hook_mask, set_hook};
use crate::test::support::*;
use crate::{new_state, LuaState, LuaValue, OpCode};

/// Hook body `function(e, l) n = n + 1 end`, counting firings in global n.
fn counting_hook(state: &mut LuaState) -> LuaValue {
    let n_name = state.create_string("n").unwrap();
    let mut h = crate::test::support::ProtoBuilder::new(2, 4)
        .defined_at(1)
        .upvalue("_ENV", false, 0);
    let kn = h.rk(n_name);
    let kn2 = h.rk(n_name);
    let k1 = h.rk(num(1.0));
    h.ins(abc(OpCode::GetTabUp, 2, 0, kn));
    h.ins(abc(OpCode::Add, 2, 2, k1));
    h.ins(abc(OpCode::SetTabUp, 0, kn2, 2));
    h.ins(abc(OpCode::Return, 0, 1, 0));
    state.closure_with_env(h.build(), None).unwrap()
}

/// A busy loop: for i = 1, 50 do end
fn busy_loop() -> crate::test::support::ProtoBuilder {
    let mut main = main_proto(5);
    let k1 = main.k(num(1.0));
    let k50 = main.k(num(50.0));
    main.ins_at(abx(OpCode::LoadK, 0, k1), 1);
    main.ins_at(abx(OpCode::LoadK, 1, k50), 2);
    main.ins_at(abx(OpCode::LoadK, 2, k1), 3);
    main.ins_at(asbx(OpCode::ForPrep, 0, 0), 4);
    main.ins_at(asbx(OpCode::ForLoop, 0, -1), 5);
    main.ins_at(abc(OpCode::Return, 0, 1, 0), 6);
    main
}

#[test]
fn traceback_lists_frames_with_source_and_line() {
    let mut state = new_state().unwrap();

    let debug_name = state.create_string("debug").unwrap();
    let tb_name = state.create_string("traceback").unwrap();
    let msg = state.create_string("msg").unwrap();

    let mut child = crate::test::support::ProtoBuilder::new(0, 3)
        .defined_at(7)
        .upvalue("_ENV", false, 0);
    let kd = child.rk(debug_name);
    let kt = child.rk(tb_name);
    let km = child.k(msg);
    child.ins_at(abc(OpCode::GetTabUp, 0, 0, kd), 8);
    child.ins_at(abc(OpCode::GetTable, 0, 0, kt), 8);
    child.ins_at(abx(OpCode::LoadK, 1, km), 9);
    child.ins_at(abc(OpCode::Call, 0, 2, 2), 9);
    child.ins_at(abc(OpCode::Return, 0, 2, 0), 10);
    let child = child.build();

    let mut main = main_proto(2);
    let p = main.child(child);
    main.ins_at(abx(OpCode::Closure, 0, p), 1);
    main.ins_at(abc(OpCode::Call, 0, 1, 2), 1);
    main.ins_at(abc(OpCode::Return, 0, 2, 0), 2);

    let out = run_proto(&mut state, main.build(), &[]).unwrap();
    let text = string_result(&state, out.first());
    assert!(text.starts_with("msg\nstack traceback:"), "got: {}", text);
    assert!(text.contains("\ttest:"), "frame lines expected: {}", text);
    assert!(text.contains("in main chunk"), "got: {}", text);
    assert!(
        text.contains("in function <test:7>"),
        "nested frame expected: {}",
        text
    );
}

#[test]
fn count_hook_fires_every_n_instructions() {
    let mut state = new_state().unwrap();
    let hook = counting_hook(&mut state);
    state.set_global("n", num(0.0)).unwrap();

    let t = state.main_thread;
    set_hook(&mut state, t, hook, parse_hook_mask("", 5), 5);
    run_proto(&mut state, busy_loop().build(), &[]).unwrap();
    set_hook(&mut state, t, LuaValue::Nil, 0, 0);

    let n = state.get_global("n").unwrap().as_number().unwrap();
    assert!(n >= 10.0, "count hook fired {} times", n);
}

#[test]
fn line_hook_fires_on_line_transitions() {
    let mut state = new_state().unwrap();
    let hook = counting_hook(&mut state);
    state.set_global("n", num(0.0)).unwrap();

    let t = state.main_thread;
    set_hook(&mut state, t, hook, parse_hook_mask("l", 0), 0);
    run_proto(&mut state, busy_loop().build(), &[]).unwrap();
    set_hook(&mut state, t, LuaValue::Nil, 0, 0);

    let n = state.get_global("n").unwrap().as_number().unwrap();
    // Six distinct source lines in the busy loop.
    assert!(n >= 5.0, "line hook fired {} times", n);
}

#[test]
fn call_and_return_hooks_bracket_calls() {
    let mut state = new_state().unwrap();
    let hook = counting_hook(&mut state);
    state.set_global("n", num(0.0)).unwrap();

    let mut inner = crate::test::support::ProtoBuilder::new(0, 1).defined_at(2);
    inner.ins(abc(OpCode::Return, 0, 1, 0));
    let inner = inner.build();

    let mut main = main_proto(2);
    let p = main.child(inner);
    main.ins(abx(OpCode::Closure, 0, p));
    main.ins(abc(OpCode::Move, 1, 0, 0));
    main.ins(abc(OpCode::Call, 1, 1, 1));
    main.ins(abc(OpCode::Return, 0, 1, 0));

    let t = state.main_thread;
    set_hook(&mut state, t, hook, parse_hook_mask("cr", 0), 0);
    run_proto(&mut state, main.build(), &[]).unwrap();
    set_hook(&mut state, t, LuaValue::Nil, 0, 0);

    let n = state.get_global("n").unwrap().as_number().unwrap();
    // At least: call of main, call of inner, return of inner, return of main.
    assert!(n >= 4.0, "call/return hooks fired {} times", n);
}

#[test]
fn getlocal_reads_named_frame_slots() {
    let mut state = new_state().unwrap();

    let debug_name = state.create_string("debug").unwrap();
    let gl_name = state.create_string("getlocal").unwrap();

    // function(x) return debug.getlocal(1, 1) end
    let mut child = crate::test::support::ProtoBuilder::new(1, 5)
        .defined_at(4)
        .upvalue("_ENV", false, 0)
        .local_var("x", 0, 10);
    let kd = child.rk(debug_name);
    let kg = child.rk(gl_name);
    let k1 = child.k(num(1.0));
    child.ins(abc(OpCode::GetTabUp, 1, 0, kd));
    child.ins(abc(OpCode::GetTable, 1, 1, kg));
    child.ins(abx(OpCode::LoadK, 2, k1));
    child.ins(abx(OpCode::LoadK, 3, k1));
    child.ins(abc(OpCode::Call, 1, 3, 3));
    child.ins(abc(OpCode::Return, 1, 3, 0));
    let child = state.closure_with_env(child.build(), None).unwrap();

    let out = state
        .call(child, crate::Varargs::One(num(99.0)))
        .unwrap()
        .to_vec();
    assert_eq!(string_result(&state, out[0]), "x");
    assert_eq!(out[1].as_number(), Some(99.0));
}

#[test]
fn upvalues_are_visible_by_index() {
    let mut state = new_state().unwrap();
    let mut f = main_proto(1);
    f.ins(abc(OpCode::Return, 0, 1, 0));
    let closure = state.closure_with_env(f.build(), None).unwrap();

    let (name, value) = get_upvalue(&state, closure, 1).unwrap();
    assert_eq!(name, "_ENV");
    assert!(value.as_table().is_some());
    assert!(get_upvalue(&state, closure, 2).is_none());
}
