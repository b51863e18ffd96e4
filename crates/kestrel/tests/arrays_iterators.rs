//! Arrays, the magic `length`, and the iterator protocol.

mod common;

use common::{function, run_ok};
use kestrel::{HostValue, Opcode};

/// `Array.from({length: 3, 0:'a', 1:'b', 2:'c'})` builds a dense array
/// whose own keys are `["0","1","2","length"]`.
#[test]
fn array_from_array_like() {
    let result = run_ok(|program, b| {
        let array_g = program.intern("Array");
        let object_g = program.intern("Object");
        let from = program.intern("from");
        let names = program.intern("getOwnPropertyNames");
        let length = program.intern("length");
        let r = program.intern("r");
        let a = program.intern("a");
        let bee = program.intern("b");
        let c = program.intern("c");

        // r = Array.from({length: 3, 0: 'a', 1: 'b', 2: 'c'})
        b.get_var(array_g);
        b.str_reg(from);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::NewObjectLit);
        b.load_string(length);
        b.load_int(3);
        b.emit(Opcode::LiteralKeySet);
        b.load_int(0);
        b.load_string(a);
        b.emit(Opcode::LiteralKeySet);
        b.load_int(1);
        b.load_string(bee);
        b.emit(Opcode::LiteralKeySet);
        b.load_int(2);
        b.load_string(c);
        b.emit(Opcode::LiteralKeySet);
        b.call(1);
        b.set_var(r);
        b.emit(Opcode::Pop);

        // [r, r.length, Object.getOwnPropertyNames(r)]
        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        b.get_var(r);
        b.emit(Opcode::LiteralSet);
        b.get_var(r);
        b.get_prop(length);
        b.emit(Opcode::LiteralSet);
        b.get_var(object_g);
        b.str_reg(names);
        b.emit(Opcode::GetPropThis);
        b.get_var(r);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Array(vec![
                HostValue::String("a".to_owned()),
                HostValue::String("b".to_owned()),
                HostValue::String("c".to_owned()),
            ]),
            HostValue::Int(3),
            HostValue::Array(vec![
                HostValue::String("0".to_owned()),
                HostValue::String("1".to_owned()),
                HostValue::String("2".to_owned()),
                HostValue::String("length".to_owned()),
            ]),
        ])
    );
}

#[test]
fn shrinking_length_truncates_elements() {
    let result = run_ok(|program, b| {
        let length = program.intern("length");
        let arr = program.intern("arr");
        // arr = [1, 2, 3]; arr.length = 1; return [arr.length, arr[1]]
        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        for i in 1..=3 {
            b.load_int(i);
            b.emit(Opcode::LiteralSet);
        }
        b.set_var(arr);
        b.emit(Opcode::Pop);

        b.get_var(arr);
        b.load_int(1);
        b.str_reg(length);
        b.emit(Opcode::SetProp);
        b.emit(Opcode::Pop);

        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.get_var(arr);
        b.get_prop(length);
        b.emit(Opcode::LiteralSet);
        b.get_var(arr);
        b.load_int(1);
        b.emit(Opcode::GetElem);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![HostValue::Int(1), HostValue::String("undefined".to_owned())])
    );
}

#[test]
fn writing_past_length_grows_the_array() {
    let result = run_ok(|program, b| {
        let length = program.intern("length");
        let arr = program.intern("arr");
        b.ind_reg(0);
        b.emit(Opcode::NewArrayLit);
        b.set_var(arr);
        b.emit(Opcode::Pop);
        // arr[4] = 9
        b.get_var(arr);
        b.load_int(4);
        b.load_int(9);
        b.emit(Opcode::SetElem);
        b.emit(Opcode::Pop);
        b.get_var(arr);
        b.get_prop(length);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(5));
}

#[test]
fn push_and_join_natives() {
    let result = run_ok(|program, b| {
        let push = program.intern("push");
        let join = program.intern("join");
        let dash = program.intern("-");
        let arr = program.intern("arr");
        b.ind_reg(0);
        b.emit(Opcode::NewArrayLit);
        b.set_var(arr);
        b.emit(Opcode::Pop);
        for i in [3, 4, 5] {
            b.get_var(arr);
            b.str_reg(push);
            b.emit(Opcode::GetPropThis);
            b.load_int(i);
            b.call(1);
            b.emit(Opcode::Pop);
        }
        b.get_var(arr);
        b.str_reg(join);
        b.emit(Opcode::GetPropThis);
        b.load_string(dash);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("3-4-5".to_owned()));
}

#[test]
fn for_of_over_arrays_via_the_iterator_protocol() {
    // sum = 0; for (v of [5, 6, 7]) sum += v;
    let result = run_ok(|program, b| {
        let sum = program.intern("sum");
        b.load_int(0);
        b.set_var(sum);
        b.emit(Opcode::Pop);

        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        for i in [5, 6, 7] {
            b.load_int(i);
            b.emit(Opcode::LiteralSet);
        }
        b.emit(Opcode::CallIterator);

        let loop_start = b.here();
        b.emit(Opcode::IterNext);
        // stack: [iter, value, done]
        let exit = b.emit_jump(Opcode::IfTrue);
        b.get_var(sum);
        b.emit(Opcode::Add);
        b.set_var(sum);
        b.emit(Opcode::Pop);
        b.jump_back(Opcode::Jump, loop_start);

        b.patch_jump(exit);
        // natural exhaustion: drop the undefined value and the iterator
        b.emit(Opcode::Pop);
        b.emit(Opcode::Pop);
        b.get_var(sum);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(18));
}

/// On abrupt loop exit the runtime calls the iterator's `return()`; on
/// natural exhaustion it does not.
#[test]
fn iterator_close_runs_only_on_abrupt_exit() {
    let result = run_ok(|program, b| {
        let closed = program.intern("closed");
        let next = program.intern("next");
        let return_name = program.intern("return");
        let it = program.intern("it");

        // closed = false
        b.emit(Opcode::False);
        b.set_var(closed);
        b.emit(Opcode::Pop);

        // next(): {value: 1, done: false}
        let next_fn = function(program, "next", &[], |program, b| {
            let value = program.intern("value");
            let done = program.intern("done");
            b.emit(Opcode::NewObjectLit);
            b.load_string(value);
            b.load_int(1);
            b.emit(Opcode::LiteralKeySet);
            b.load_string(done);
            b.emit(Opcode::False);
            b.emit(Opcode::LiteralKeySet);
            b.emit(Opcode::Return);
        });
        // return(): closed = true; {done: true}
        let return_fn = function(program, "return", &[], |program, b| {
            let closed = program.intern("closed");
            let done = program.intern("done");
            b.emit(Opcode::True);
            b.set_var(closed);
            b.emit(Opcode::Pop);
            b.emit(Opcode::NewObjectLit);
            b.load_string(done);
            b.emit(Opcode::True);
            b.emit(Opcode::LiteralKeySet);
            b.emit(Opcode::Return);
        });

        // it = {next: ..., return: ...}
        b.emit(Opcode::NewObjectLit);
        b.load_string(next);
        b.ind_reg(next_fn.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralKeySet);
        b.load_string(return_name);
        b.ind_reg(return_fn.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralKeySet);
        b.set_var(it);
        b.emit(Opcode::Pop);

        // Pull one value, then exit the loop abruptly: IterClose runs.
        b.get_var(it);
        b.emit(Opcode::IterNext);
        b.emit(Opcode::Pop);
        b.emit(Opcode::Pop);
        b.emit(Opcode::IterClose);

        b.get_var(closed);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Bool(true));
}

#[test]
fn spread_appends_iterable_elements() {
    let result = run_ok(|_, b| {
        // [1, ...[2, 3], 4]
        b.ind_reg(4);
        b.emit(Opcode::NewArrayLit);
        b.load_int(1);
        b.emit(Opcode::LiteralSet);
        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.load_int(2);
        b.emit(Opcode::LiteralSet);
        b.load_int(3);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Spread);
        b.load_int(4);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Int(1),
            HostValue::Int(2),
            HostValue::Int(3),
            HostValue::Int(4),
        ])
    );
}

#[test]
fn call_spread_expands_argument_arrays() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let inner = function(program, "f", &["a", "b", "c"], |program, b| {
            let a = program.intern("a");
            let bee = program.intern("b");
            let c = program.intern("c");
            b.get_var(a);
            b.get_var(bee);
            b.emit(Opcode::Add);
            b.get_var(c);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        common::define_global_fn(program, b, "f", inner);

        b.name_op(Opcode::GetVarThis, f);
        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        for i in [10, 20, 12] {
            b.load_int(i);
            b.emit(Opcode::LiteralSet);
        }
        b.emit(Opcode::CallSpread);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn sparse_array_literals_leave_holes() {
    let result = run_ok(|program, b| {
        let length = program.intern("length");
        // [1, , 3] - hole at index 1
        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        b.load_int(1);
        b.emit(Opcode::LiteralSet);
        b.ind_reg(2);
        b.emit(Opcode::SparseArrayLit);
        b.load_int(3);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Dup);
        b.get_prop(length);
        b.emit(Opcode::Swap);
        b.load_int(1);
        b.emit(Opcode::GetElem);
        b.emit(Opcode::Typeof);
        // stack: [length, "undefined"]; pack both into the result array
        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.emit(Opcode::Swap);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Swap);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("undefined".to_owned()),
            HostValue::Int(3),
        ])
    );
}

#[test]
fn includes_finds_nan_but_index_of_does_not() {
    let result = run_ok(|program, b| {
        let includes = program.intern("includes");
        let index_of = program.intern("indexOf");
        let arr = program.intern("arr");
        b.ind_reg(1);
        b.emit(Opcode::NewArrayLit);
        b.load_number(f64::NAN);
        b.emit(Opcode::LiteralSet);
        b.set_var(arr);
        b.emit(Opcode::Pop);

        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.get_var(arr);
        b.str_reg(includes);
        b.emit(Opcode::GetPropThis);
        b.load_number(f64::NAN);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.get_var(arr);
        b.str_reg(index_of);
        b.emit(Opcode::GetPropThis);
        b.load_number(f64::NAN);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Bool(true), HostValue::Int(-1)]));
}
