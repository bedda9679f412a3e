// Binary chunk round-trips and load() mode enforcement.

use crate::lua_value::{dump_chunk, undump_chunk};
use crate::test::support::*;
use crate::{new_state, OpCode};

fn sample_proto(state: &mut crate::LuaState) -> std::rc::Rc<crate::Prototype> {
    let greeting = state.create_string("hello").unwrap();

    let mut inner = crate::test::support::ProtoBuilder::new(1, 2)
        .defined_at(3)
        .source("=sample");
    let k2 = inner.rk(num(2.0));
    inner.ins_at(abc(OpCode::Mul, 1, 0, k2), 3);
    inner.ins_at(abc(OpCode::Return, 1, 2, 0), 4);
    let inner = inner.build();

    let mut main = main_proto(3).source("=sample").local_var("x", 0, 5);
    let kg = main.k(greeting);
    let k21 = main.k(num(21.0));
    let p = main.child(inner);
    main.ins_at(abx(OpCode::LoadK, 0, kg), 1);
    main.ins_at(abx(OpCode::Closure, 1, p), 2);
    main.ins_at(abx(OpCode::LoadK, 2, k21), 2);
    main.ins_at(abc(OpCode::Call, 1, 2, 2), 2);
    main.ins_at(abc(OpCode::Return, 1, 2, 0), 5);
    main.build()
}

#[test]
fn dump_then_undump_preserves_structure() {
    let mut state = new_state().unwrap();
    let proto = sample_proto(&mut state);

    let bytes = dump_chunk(&state.heap, &proto, false);
    let loaded = undump_chunk(&mut state.heap, &bytes, "=reloaded").unwrap();

    assert_eq!(loaded.code, proto.code);
    assert_eq!(loaded.num_params, proto.num_params);
    assert_eq!(loaded.max_stack_size, proto.max_stack_size);
    assert_eq!(loaded.constants.len(), proto.constants.len());
    assert_eq!(loaded.protos.len(), 1);
    assert_eq!(loaded.line_info, proto.line_info);
    assert_eq!(loaded.source.as_ref(), "=sample");
    assert_eq!(loaded.loc_vars.len(), 1);
    assert_eq!(loaded.loc_vars[0].name.as_ref(), "x");
    assert_eq!(loaded.upvalues.len(), 1);
    assert_eq!(loaded.upvalues[0].name.as_ref(), "_ENV");

    // And it still runs: 21 * 2 = 42.
    let out = run_proto(&mut state, loaded, &[]).unwrap();
    assert_eq!(out.first().as_number(), Some(42.0));
}

#[test]
fn stripped_chunks_take_the_callers_name() {
    let mut state = new_state().unwrap();
    let proto = sample_proto(&mut state);
    let bytes = dump_chunk(&state.heap, &proto, true);
    let loaded = undump_chunk(&mut state.heap, &bytes, "=given").unwrap();
    assert_eq!(loaded.source.as_ref(), "=given");
    assert!(loaded.line_info.is_empty());
}

#[test]
fn corrupt_headers_are_rejected() {
    let mut state = new_state().unwrap();
    let proto = sample_proto(&mut state);
    let good = dump_chunk(&state.heap, &proto, false);

    let mut wrong_version = good.clone();
    wrong_version[4] = 0x51;
    let err = undump_chunk(&mut state.heap, &wrong_version, "=x").unwrap_err();
    assert!(err.contains("version mismatch"));

    let mut wrong_sig = good.clone();
    wrong_sig[0] = b'X';
    let err = undump_chunk(&mut state.heap, &wrong_sig, "=x").unwrap_err();
    assert!(err.contains("not a precompiled chunk"));

    let truncated = &good[..good.len() / 2];
    assert!(undump_chunk(&mut state.heap, truncated, "=x").is_err());
}

#[test]
fn load_enforces_chunk_mode() {
    let mut state = new_state().unwrap();
    let proto = sample_proto(&mut state);
    let bytes = dump_chunk(&state.heap, &proto, false);

    let err = state.load(&bytes, "=bin", "t", None).unwrap_err();
    assert!(err.contains("attempt to load a binary chunk"));

    let closure = state.load(&bytes, "=bin", "bt", None).unwrap();
    let out = state.call(closure, crate::Varargs::None).unwrap();
    assert_eq!(out.first().as_number(), Some(42.0));

    // Text without a compiler installed reports, not raises.
    let err = state.load(b"return 1", "=src", "t", None).unwrap_err();
    assert!(err.contains("no compiler installed"));
}
