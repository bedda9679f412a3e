// Table engine behaviour through the state: borders, rehash at scale,
// iteration hooks, weak-mode parsing, raw access errors.

use crate::test::support::*;
use crate::{new_state, LuaError, LuaValue, OpCode, Varargs};

#[test]
fn million_sequential_inserts_keep_a_full_border() {
    // for i = 1, 1e6 do t[i] = i end; #t == 1000000
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap().as_table().unwrap();
    for i in 1..=1_000_000i64 {
        state.heap.table_set_int(t, i, num(i as f64));
    }
    assert_eq!(state.heap.table_len(t), 1_000_000);
    assert_eq!(state.heap.table_get_int(t, 567_890).as_number(), Some(567_890.0));
}

#[test]
fn border_satisfies_contract_on_sparse_tables() {
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap().as_table().unwrap();
    for i in [1i64, 2, 3, 7, 8, 100] {
        state.heap.table_set_int(t, i, num(i as f64));
    }
    let n = state.heap.table_len(t);
    // Any border is acceptable: t[n] ~= nil and t[n+1] == nil.
    if n > 0 {
        assert!(!state.heap.table_get_int(t, n).is_nil());
    }
    assert!(state.heap.table_get_int(t, n + 1).is_nil());
}

#[test]
fn next_visits_every_live_entry_once() {
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap().as_table().unwrap();
    for i in 1..=4i64 {
        state.heap.table_set_int(t, i, num((i * 10) as f64));
    }
    let name = state.create_string("name").unwrap();
    let v = state.create_string("zed").unwrap();
    state.heap.table_set(t, name, v).unwrap();

    let mut seen = Vec::new();
    let mut key = LuaValue::Nil;
    while let Some((k, _)) = state.heap.table_next(t, &key).unwrap() {
        seen.push(state.display_value(&k));
        key = k;
    }
    seen.sort();
    assert_eq!(seen, vec!["1", "2", "3", "4", "name"]);
}

#[test]
fn rawset_nil_key_errors_through_the_library() {
    let mut state = new_state().unwrap();
    let rawset = global(&mut state, "rawset");
    let t = state.create_table(0, 0).unwrap();
    let err = state
        .call(
            rawset,
            Varargs::from_slice(&[t, LuaValue::Nil, num(1.0)]),
        )
        .unwrap_err();
    assert_eq!(err, LuaError::RuntimeError);
    assert!(state.error_message().contains("table index is nil"));

    let err = state
        .call(
            rawset,
            Varargs::from_slice(&[t, num(f64::NAN), num(1.0)]),
        )
        .unwrap_err();
    assert!(state.error_message().contains("table index is NaN"));
    assert_eq!(err, LuaError::RuntimeError);
}

#[test]
fn setmetatable_parses_weak_mode() {
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap();
    let mt = state.create_table(0, 1).unwrap();
    let mode_key = state.create_string("__mode").unwrap();
    let kv = state.create_string("kv").unwrap();
    state
        .heap
        .table_set(mt.as_table().unwrap(), mode_key, kv)
        .unwrap();

    let setmetatable = global(&mut state, "setmetatable");
    state.call(setmetatable, Varargs::Pair(t, mt)).unwrap();

    let table = state.heap.table(t.as_table().unwrap());
    assert!(table.weak_keys);
    assert!(table.weak_values);
}

#[test]
fn generic_for_over_pairs_iterates_bytecode_loop() {
    // local n = 0; for k, v in pairs(t) do n = n + v end; return n
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap();
    for i in 1..=3i64 {
        state
            .heap
            .table_set_int(t.as_table().unwrap(), i, num(i as f64));
    }

    let pairs_name = state.create_string("pairs").unwrap();
    let mut main = crate::test::support::ProtoBuilder::new(1, 9).upvalue("_ENV", false, 0);
    let kp = main.rk(pairs_name);
    let k0 = main.k(num(0.0));
    // r0 = t (param), r1 = n, r2..r4 = iterator triple, r5/r6 = k/v
    main.ins(abx(OpCode::LoadK, 1, k0));
    main.ins(abc(OpCode::GetTabUp, 2, 0, kp));
    main.ins(abc(OpCode::Move, 3, 0, 0));
    main.ins(abc(OpCode::Call, 2, 2, 4)); // r2,r3,r4 = pairs(t)
    main.ins(asbx(OpCode::Jmp, 0, 1)); // enter loop at TFORCALL
    main.ins(abc(OpCode::Add, 1, 1, 6)); // n = n + v
    main.ins(abc(OpCode::TForCall, 2, 0, 2));
    main.ins(asbx(OpCode::TForLoop, 4, -3));
    main.ins(abc(OpCode::Return, 1, 2, 0));
    let out = run_proto(&mut state, main.build(), &[t]).unwrap();
    assert_eq!(out.first().as_number(), Some(6.0));
}

#[test]
fn ipairs_observes_a_metatable_index() {
    // A table with values only behind __index: ipairs must see them.
    let mut state = new_state().unwrap();
    let backing = state.create_table(0, 0).unwrap();
    for i in 1..=2i64 {
        state
            .heap
            .table_set_int(backing.as_table().unwrap(), i, num((i * 5) as f64));
    }
    let t = state.create_table(0, 0).unwrap();
    let mt = state.create_table(0, 1).unwrap();
    let index_key = state.create_string("__index").unwrap();
    state
        .heap
        .table_set(mt.as_table().unwrap(), index_key, backing)
        .unwrap();
    state.heap.table_mut(t.as_table().unwrap()).metatable = mt.as_table();

    let ipairs = global(&mut state, "ipairs");
    let triple = state.call(ipairs, Varargs::One(t)).unwrap();
    let iter = triple.arg(1);
    let target = triple.arg(2);
    let mut control = triple.arg(3);

    let mut collected = Vec::new();
    loop {
        let step = state
            .call(iter, Varargs::Pair(target, control))
            .unwrap();
        if step.first().is_nil() {
            break;
        }
        control = step.first();
        collected.push(step.arg(2).as_number().unwrap());
    }
    assert_eq!(collected, vec![5.0, 10.0]);
}

#[test]
fn float_keys_canonicalise_to_integers() {
    let mut state = new_state().unwrap();
    let t = state.create_table(0, 0).unwrap().as_table().unwrap();
    state.heap.table_set(t, num(3.0), num(30.0)).unwrap();
    assert_eq!(state.heap.table_get_int(t, 3).as_number(), Some(30.0));
    // Non-integral floats stay float keys.
    state.heap.table_set(t, num(3.5), num(35.0)).unwrap();
    assert_eq!(state.heap.table_get(t, &num(3.5)).as_number(), Some(35.0));
    assert_eq!(state.heap.table_get_int(t, 3).as_number(), Some(30.0));
}
