//! Generator creation, suspension, resumption, and delegation.

mod common;

use common::{define_global_fn, function, run, run_ok};
use kestrel::{CodeBuilder, ErrorKind, HostValue, Opcode, Program};

/// Builds `function* g() { yield 1; yield 2; return 3; }`.
fn simple_generator(program: &mut Program) -> kestrel::FunctionId {
    function(program, "g", &[], |_, b: &mut CodeBuilder| {
        b.flags_mut().generator = true;
        b.emit(Opcode::MakeGenerator);
        b.load_int(1);
        b.emit(Opcode::Yield);
        b.emit(Opcode::Pop);
        b.load_int(2);
        b.emit(Opcode::Yield);
        b.emit(Opcode::Pop);
        b.load_int(3);
        b.emit(Opcode::Return);
    })
}

/// Emits `gen.next()` and appends `.value` and `.done` to the array under
/// construction (two `LiteralSet`s).
fn push_next_result(program: &mut Program, b: &mut CodeBuilder, r#gen: kestrel::StringId) {
    let next = program.intern("next");
    let value = program.intern("value");
    let done = program.intern("done");
    let r = program.intern("r");
    b.get_var(r#gen);
    b.str_reg(next);
    b.emit(Opcode::GetPropThis);
    b.call(0);
    b.set_var(r);
    b.emit(Opcode::Pop);
    b.get_var(r);
    b.str_reg(value);
    b.emit(Opcode::GetProp);
    b.emit(Opcode::LiteralSet);
    b.get_var(r);
    b.str_reg(done);
    b.emit(Opcode::GetProp);
    b.emit(Opcode::LiteralSet);
}

/// The `yield 1; yield 2; return 3` sequence: values 1, 2, 3, undefined
/// with `done` flipping at the return and staying true afterwards.
#[test]
fn generator_yield_return_sequence() {
    let result = run_ok(|program, b| {
        let g = program.intern("g");
        let r#gen = program.intern("gen");
        let inner = simple_generator(program);
        define_global_fn(program, b, "g", inner);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);

        b.ind_reg(8);
        b.emit(Opcode::NewArrayLit);
        for _ in 0..4 {
            push_next_result(program, b, r#gen);
        }
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Int(1),
            HostValue::Bool(false),
            HostValue::Int(2),
            HostValue::Bool(false),
            HostValue::Int(3),
            HostValue::Bool(true),
            HostValue::Undefined,
            HostValue::Bool(true),
        ])
    );
}

#[test]
fn generator_next_passes_values_back_in() {
    // function* g() { let got = yield 1; return got + 1; }
    let result = run_ok(|program, b| {
        let g = program.intern("g");
        let r#gen = program.intern("gen");
        let next = program.intern("next");
        let value = program.intern("value");
        let inner = function(program, "g", &[], |_, b| {
            b.flags_mut().generator = true;
            b.emit(Opcode::MakeGenerator);
            b.load_int(1);
            b.emit(Opcode::Yield);
            // resumed value on the stack
            b.load_int(1);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "g", inner);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);

        // gen.next(); gen.next(41).value
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Pop);
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.load_int(41);
        b.call(1);
        b.str_reg(value);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn generator_return_closes_early() {
    let result = run_ok(|program, b| {
        let g = program.intern("g");
        let r#gen = program.intern("gen");
        let next = program.intern("next");
        let ret = program.intern("return");
        let done = program.intern("done");
        let value = program.intern("value");
        let r = program.intern("r");
        let inner = simple_generator(program);
        define_global_fn(program, b, "g", inner);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);

        // start it, then close with return(9)
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Pop);
        b.get_var(r#gen);
        b.str_reg(ret);
        b.emit(Opcode::GetPropThis);
        b.load_int(9);
        b.call(1);
        b.set_var(r);
        b.emit(Opcode::Pop);

        // [r.value, r.done, gen.next().done]
        b.ind_reg(3);
        b.emit(Opcode::NewArrayLit);
        b.get_var(r);
        b.str_reg(value);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::LiteralSet);
        b.get_var(r);
        b.str_reg(done);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::LiteralSet);
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.str_reg(done);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![HostValue::Int(9), HostValue::Bool(true), HostValue::Bool(true)])
    );
}

#[test]
fn generator_throw_propagates_to_the_caller() {
    let err = run(|program, b| {
        let g = program.intern("g");
        let r#gen = program.intern("gen");
        let next = program.intern("next");
        let throw = program.intern("throw");
        let boom = program.intern("boom");
        let inner = simple_generator(program);
        define_global_fn(program, b, "g", inner);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Pop);
        b.get_var(r#gen);
        b.str_reg(throw);
        b.emit(Opcode::GetPropThis);
        b.load_string(boom);
        b.call(1);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "boom");
}

#[test]
fn generator_catches_injected_throws_at_the_yield() {
    // function* g() { try { yield 1; } catch (e) { yield e + '!'; } }
    let result = run_ok(|program, b| {
        let g = program.intern("g");
        let r#gen = program.intern("gen");
        let next = program.intern("next");
        let throw = program.intern("throw");
        let value = program.intern("value");
        let oops = program.intern("oops");

        let inner = function(program, "g", &[], |program, b| {
            let bang = program.intern("!");
            b.flags_mut().generator = true;
            let slot = b.alloc_local();
            b.emit(Opcode::MakeGenerator);
            let try_start = b.here();
            b.load_int(1);
            b.emit(Opcode::Yield);
            b.emit(Opcode::Pop);
            let try_end = b.here();
            let after = b.emit_jump(Opcode::Jump);
            let catch_pc = b.here();
            b.emit_u16(Opcode::LocalLoad, slot);
            b.load_string(bang);
            b.emit(Opcode::Add);
            b.emit(Opcode::Yield);
            b.emit(Opcode::Pop);
            b.patch_jump(after);
            b.emit(Opcode::GeneratorEnd);
            b.add_exception_entry(try_start, try_end, Some(catch_pc), None, slot);
        });
        define_global_fn(program, b, "g", inner);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);
        b.get_var(r#gen);
        b.str_reg(next);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Pop);
        // gen.throw('oops') resumes inside the catch and yields "oops!"
        b.get_var(r#gen);
        b.str_reg(throw);
        b.emit(Opcode::GetPropThis);
        b.load_string(oops);
        b.call(1);
        b.str_reg(value);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("oops!".to_owned()));
}

#[test]
fn yield_star_delegates_and_keeps_the_final_value() {
    // function* inner() { yield 1; yield 2; return 10; }
    // function* outer() { let r = yield* inner(); yield r + 1; }
    let result = run_ok(|program, b| {
        let outer_name = program.intern("outer");
        let r#gen = program.intern("gen");
        let inner_fn = simple_generator(program);
        let outer_fn = function(program, "outer", &[], move |program, b| {
            b.flags_mut().generator = true;
            b.emit(Opcode::MakeGenerator);
            b.ind_reg(inner_fn.operand());
            b.emit(Opcode::MakeFunction);
            b.emit(Opcode::Undef);
            b.call(0);
            b.emit(Opcode::YieldStar);
            // completion value of the delegate (3) on the stack
            b.load_int(1);
            b.emit(Opcode::Add);
            b.emit(Opcode::Yield);
            b.emit(Opcode::Pop);
            b.emit(Opcode::GeneratorEnd);
            let _ = program;
        });
        define_global_fn(program, b, "outer", outer_fn);

        b.name_op(Opcode::GetVarThis, outer_name);
        b.call(0);
        b.set_var(r#gen);
        b.emit(Opcode::Pop);

        b.ind_reg(6);
        b.emit(Opcode::NewArrayLit);
        for _ in 0..3 {
            push_next_result(program, b, r#gen);
        }
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::Int(1),
            HostValue::Bool(false),
            HostValue::Int(2),
            HostValue::Bool(false),
            HostValue::Int(4),
            HostValue::Bool(false),
        ])
    );
}

#[test]
fn generators_are_iterable_with_for_of_protocol() {
    let result = run_ok(|program, b| {
        let g = program.intern("g");
        let sum = program.intern("sum");
        let inner = simple_generator(program);
        define_global_fn(program, b, "g", inner);

        b.load_int(0);
        b.set_var(sum);
        b.emit(Opcode::Pop);

        b.name_op(Opcode::GetVarThis, g);
        b.call(0);
        b.emit(Opcode::CallIterator);
        let loop_start = b.here();
        b.emit(Opcode::IterNext);
        let exit = b.emit_jump(Opcode::IfTrue);
        b.get_var(sum);
        b.emit(Opcode::Add);
        b.set_var(sum);
        b.emit(Opcode::Pop);
        b.jump_back(Opcode::Jump, loop_start);
        b.patch_jump(exit);
        b.emit(Opcode::Pop);
        b.emit(Opcode::Pop);
        b.get_var(sum);
        b.emit(Opcode::Return);
    });
    // for-of sees the yielded 1 and 2; the return value 3 is not iterated.
    assert_eq!(result, HostValue::Int(3));
}
