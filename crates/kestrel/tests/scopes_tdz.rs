//! Scope-chain resolution, the temporal dead zone, and `with` scopes.

mod common;

use common::{define_global_fn, function, run, run_ok};
use kestrel::{ErrorKind, HostValue, Opcode};

/// `(function(){ let x; try { x = x; } catch(e) { return e.name; } return 'ok'; })()`
/// - the read in the binding's own initializer position sees the dead zone.
#[test]
fn tdz_self_read_raises_reference_error() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        let name = program.intern("name");
        let ok = program.intern("ok");

        let inner = function(program, "probe", &[], |_, b| {
            let slot = b.alloc_local();
            b.emit(Opcode::NewBlockScope);
            b.str_reg(x);
            b.emit(Opcode::DeclareLet);

            let try_start = b.here();
            // x = x: the right-hand read fires before the write.
            b.str_reg(x);
            b.emit(Opcode::GetVarTdz);
            b.str_reg(x);
            b.emit(Opcode::SetLetVar);
            b.emit(Opcode::Pop);
            let try_end = b.here();
            let done = b.emit_jump(Opcode::Jump);

            let catch_pc = b.here();
            b.emit_u16(Opcode::LocalLoad, slot);
            b.str_reg(name);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::Return);

            b.patch_jump(done);
            b.load_string(ok);
            b.emit(Opcode::Return);
            b.add_exception_entry(try_start, try_end, Some(catch_pc), None, slot);
        });

        define_global_fn(program, b, "probe", inner);
        let probe = program.intern("probe");
        b.name_op(Opcode::GetVarThis, probe);
        b.call(0);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("ReferenceError".to_owned()));
}

#[test]
fn let_reads_after_initialization_succeed() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        b.emit(Opcode::NewBlockScope);
        b.str_reg(x);
        b.emit(Opcode::DeclareLet);
        b.load_int(7);
        b.str_reg(x);
        b.emit(Opcode::SetLetInit);
        b.emit(Opcode::Pop);
        b.get_var(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(7));
}

#[test]
fn const_rejects_reassignment() {
    let err = run(|program, b| {
        let c = program.intern("c");
        b.emit(Opcode::NewBlockScope);
        b.str_reg(c);
        b.emit(Opcode::DeclareConst);
        b.load_int(1);
        b.str_reg(c);
        b.emit(Opcode::SetConstVar);
        b.emit(Opcode::Pop);
        // c = 2 raises
        b.load_int(2);
        b.set_var(c);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("constant"));
}

#[test]
fn unresolved_names_raise_reference_errors() {
    let err = run(|program, b| {
        let ghost = program.intern("ghost");
        b.get_var(ghost);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert!(err.message.contains("ghost"));
}

#[test]
fn typeof_answers_undefined_for_unresolved_names() {
    let result = run_ok(|program, b| {
        let ghost = program.intern("ghost");
        b.str_reg(ghost);
        b.emit(Opcode::TypeofName);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("undefined".to_owned()));
}

#[test]
fn typeof_still_raises_inside_the_dead_zone() {
    let err = run(|program, b| {
        let x = program.intern("x");
        b.emit(Opcode::NewBlockScope);
        b.str_reg(x);
        b.emit(Opcode::DeclareLet);
        b.str_reg(x);
        b.emit(Opcode::TypeofName);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
}

#[test]
fn sloppy_assignment_creates_globals() {
    let result = run_ok(|program, b| {
        let g = program.intern("implicitGlobal");
        b.load_int(9);
        b.set_var(g);
        b.emit(Opcode::Pop);
        b.get_var(g);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(9));
}

#[test]
fn strict_assignment_to_unresolved_raises() {
    let err = run(|program, b| {
        b.flags_mut().strict = true;
        let g = program.intern("implicitGlobal");
        b.load_int(9);
        b.set_var(g);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
}

#[test]
fn with_scope_reads_and_writes_through_the_object() {
    let result = run_ok(|program, b| {
        let a = program.intern("a");
        // o = {a: 1}; with (o) { a = a + 41; } return o.a;
        b.emit(Opcode::NewObjectLit);
        b.load_string(a);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.emit(Opcode::Dup);
        b.emit(Opcode::EnterWith);
        b.get_var(a);
        b.load_int(41);
        b.emit(Opcode::Add);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.emit(Opcode::LeaveWith);
        b.get_prop(a);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn with_const_scope_rejects_writes() {
    let err = run(|program, b| {
        let a = program.intern("a");
        b.emit(Opcode::NewObjectLit);
        b.load_string(a);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.emit(Opcode::EnterWithConst);
        b.load_int(2);
        b.set_var(a);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn block_scopes_shadow_and_restore() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        // outer let x = 1; { let x = 2; } return x;
        b.emit(Opcode::NewBlockScope);
        b.str_reg(x);
        b.emit(Opcode::DeclareLet);
        b.load_int(1);
        b.str_reg(x);
        b.emit(Opcode::SetLetInit);
        b.emit(Opcode::Pop);

        b.emit(Opcode::NewBlockScope);
        b.str_reg(x);
        b.emit(Opcode::DeclareLet);
        b.load_int(2);
        b.str_reg(x);
        b.emit(Opcode::SetLetInit);
        b.emit(Opcode::Pop);
        b.emit(Opcode::PopBlockScope);

        b.get_var(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(1));
}

#[test]
fn per_iteration_scopes_copy_bindings() {
    // Two closures created in different "iterations" capture different
    // copies of the loop binding.
    let result = run_ok(|program, b| {
        let i = program.intern("i");
        let first = program.intern("first");
        let second = program.intern("second");

        let read_i = function(program, "readI", &[], |program, b| {
            let i = program.intern("i");
            b.get_var(i);
            b.emit(Opcode::Return);
        });

        // let i = 10; first = closure; copy scope; i = 20; second = closure
        b.emit(Opcode::NewBlockScope);
        b.str_reg(i);
        b.emit(Opcode::DeclareLet);
        b.load_int(10);
        b.str_reg(i);
        b.emit(Opcode::SetLetInit);
        b.emit(Opcode::Pop);
        b.ind_reg(read_i.operand());
        b.emit(Opcode::MakeFunction);
        b.set_var(first);
        b.emit(Opcode::Pop);

        b.emit(Opcode::CopyPerIterScope);
        b.load_int(20);
        b.str_reg(i);
        b.emit(Opcode::SetLetVar);
        b.emit(Opcode::Pop);
        b.ind_reg(read_i.operand());
        b.emit(Opcode::MakeFunction);
        b.set_var(second);
        b.emit(Opcode::Pop);

        // [first(), second()]
        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.name_op(Opcode::GetVarThis, first);
        b.call(0);
        b.emit(Opcode::LiteralSet);
        b.name_op(Opcode::GetVarThis, second);
        b.call(0);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Int(10), HostValue::Int(20)]));
}
