//! Function objects: length, closures, call/apply/bind, `arguments`.

mod common;

use common::{define_global_fn, function, run, run_ok};
use kestrel::{ErrorKind, HostValue, Opcode};

/// `(function f(a,b,c){return f.length})(1)` - formal-parameter count,
/// independent of how many arguments the call site passed.
#[test]
fn function_length_reports_formal_count() {
    let result = run_ok(|program, b| {
        let length = program.intern("length");
        let f = program.intern("f");
        let inner = function(program, "f", &["a", "b", "c"], |program, b| {
            let f = program.intern("f");
            let length = program.intern("length");
            b.get_var(f);
            b.str_reg(length);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::Return);
        });
        let _ = length;
        define_global_fn(program, b, "f", inner);
        b.name_op(Opcode::GetVarThis, f);
        b.load_int(1);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(3));
}

#[test]
fn missing_arguments_bind_undefined() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let inner = function(program, "f", &["a", "b"], |program, b| {
            let bname = program.intern("b");
            b.get_var(bname);
            b.emit(Opcode::Typeof);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "f", inner);
        b.name_op(Opcode::GetVarThis, f);
        b.load_int(1);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("undefined".to_owned()));
}

#[test]
fn rest_parameter_collects_overflow() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let inner = function(program, "f", &["first", "rest"], |program, b| {
            b.flags_mut().has_rest = true;
            let rest = program.intern("rest");
            b.get_var(rest);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "f", inner);
        b.name_op(Opcode::GetVarThis, f);
        b.load_int(1);
        b.load_int(2);
        b.load_int(3);
        b.call(3);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Int(2), HostValue::Int(3)]));
}

#[test]
fn closures_capture_their_declaration_scope() {
    let result = run_ok(|program, b| {
        let make = program.intern("make");
        let counter = program.intern("counter");
        // make() { let n = 0; return inc; }  inc() { n = n + 1; return n; }
        let inc = function(program, "inc", &[], |program, b| {
            let n = program.intern("n");
            b.get_var(n);
            b.load_int(1);
            b.emit(Opcode::Add);
            b.str_reg(n);
            b.emit(Opcode::SetLetVar);
            b.emit(Opcode::Return);
        });
        let maker = function(program, "make", &[], move |program, b| {
            let n = program.intern("n");
            b.emit(Opcode::NewBlockScope);
            b.str_reg(n);
            b.emit(Opcode::DeclareLet);
            b.load_int(0);
            b.str_reg(n);
            b.emit(Opcode::SetLetInit);
            b.emit(Opcode::Pop);
            b.ind_reg(inc.operand());
            b.emit(Opcode::MakeFunction);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "make", maker);

        b.name_op(Opcode::GetVarThis, make);
        b.call(0);
        b.set_var(counter);
        b.emit(Opcode::Pop);
        // counter(); counter()
        b.name_op(Opcode::GetVarThis, counter);
        b.call(0);
        b.emit(Opcode::Pop);
        b.name_op(Opcode::GetVarThis, counter);
        b.call(0);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(2));
}

/// Bound-function metadata: `length` is `max(0, target.length - bound)`
/// and `name` carries the `"bound "` prefix.
#[test]
fn bound_function_length_and_name() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let bind = program.intern("bind");
        let bound = program.intern("boundF");
        let length = program.intern("length");
        let name = program.intern("name");
        let inner = function(program, "f", &["a", "b", "c"], |_, b| {
            b.emit(Opcode::ReturnUndef);
        });
        define_global_fn(program, b, "f", inner);

        // boundF = f.bind(undefined, 10)
        b.get_var(f);
        b.str_reg(bind);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::Undef);
        b.load_int(10);
        b.call(2);
        b.set_var(bound);
        b.emit(Opcode::Pop);

        // [boundF.length, boundF.name]
        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.get_var(bound);
        b.str_reg(length);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::LiteralSet);
        b.get_var(bound);
        b.str_reg(name);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![HostValue::Int(2), HostValue::String("bound f".to_owned())])
    );
}

#[test]
fn bound_functions_prepend_arguments_and_fix_this() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let bind = program.intern("bind");
        let bound = program.intern("boundF");
        let inner = function(program, "f", &["a", "b"], |program, b| {
            let a = program.intern("a");
            let bb = program.intern("b");
            b.get_var(a);
            b.get_var(bb);
            b.emit(Opcode::Sub);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "f", inner);

        b.get_var(f);
        b.str_reg(bind);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::Undef);
        b.load_int(100);
        b.call(2);
        b.set_var(bound);
        b.emit(Opcode::Pop);

        b.name_op(Opcode::GetVarThis, bound);
        b.load_int(58);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn call_and_apply_rebind_this() {
    let result = run_ok(|program, b| {
        let f = program.intern("f");
        let x = program.intern("x");
        let call = program.intern("call");
        let apply = program.intern("apply");
        // f() { return this.x; }
        let inner = function(program, "f", &[], |program, b| {
            let x = program.intern("x");
            b.emit(Opcode::LoadThis);
            b.str_reg(x);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "f", inner);

        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        // f.call({x: 1})
        b.get_var(f);
        b.str_reg(call);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        // f.apply({x: 2})
        b.get_var(f);
        b.str_reg(apply);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(2);
        b.emit(Opcode::LiteralKeySet);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Int(1), HostValue::Int(2)]));
}

#[test]
fn arguments_object_materializes_lazily() {
    let result = run_ok(|program, b| {
        // g(7, 8, 9) observed through arguments:
        // return arguments.length + arguments[2]
        let observer = function(program, "g", &["a"], |program, b| {
            let arguments = program.intern("arguments");
            let length = program.intern("length");
            b.get_var(arguments);
            b.str_reg(length);
            b.emit(Opcode::GetProp);
            b.get_var(arguments);
            b.load_int(2);
            b.emit(Opcode::GetElem);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "g", observer);
        let g = program.intern("g");
        b.name_op(Opcode::GetVarThis, g);
        b.load_int(7);
        b.load_int(8);
        b.load_int(9);
        b.call(3);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(12));
}

#[test]
fn arrow_functions_read_this_lexically() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        let m = program.intern("m");
        let o = program.intern("o");
        // arrow body: return this.x (walks out to the enclosing method)
        let arrow = function(program, "", &[], |program, b| {
            b.flags_mut().arrow = true;
            let x = program.intern("x");
            b.emit(Opcode::LoadThis);
            b.str_reg(x);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::Return);
        });
        // method body: return (arrow)()
        let method = function(program, "m", &[], move |_, b| {
            b.ind_reg(arrow.operand());
            b.emit(Opcode::MakeFunction);
            b.emit(Opcode::Undef);
            b.call(0);
            b.emit(Opcode::Return);
        });

        // o = {x: 5, m: method}; return o.m();
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(5);
        b.emit(Opcode::LiteralKeySet);
        b.load_string(m);
        b.ind_reg(method.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralKeySet);
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.get_var(o);
        b.str_reg(m);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(5));
}

#[test]
fn arrows_are_not_constructors() {
    let err = run(|program, b| {
        let arrow = function(program, "", &[], |_, b| {
            b.flags_mut().arrow = true;
            b.emit(Opcode::ReturnUndef);
        });
        b.ind_reg(arrow.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::New, 0);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn tail_calls_reuse_the_frame() {
    // A deep self-recursive countdown via TailCall must not overflow the
    // frame stack even past the recursion limit.
    let result = run_ok(|program, b| {
        let f = program.intern("down");
        let inner = function(program, "down", &["n"], move |program, b| {
            let n = program.intern("n");
            let down = program.intern("down");
            b.get_var(n);
            let recurse = b.emit_jump(Opcode::IfTrue);
            b.load_int(0);
            b.emit(Opcode::Return);
            b.patch_jump(recurse);
            b.name_op(Opcode::GetVarThis, down);
            b.get_var(n);
            b.load_int(1);
            b.emit(Opcode::Sub);
            b.emit_u8(Opcode::TailCall, 1);
            b.emit(Opcode::Return);
        });
        define_global_fn(program, b, "down", inner);
        b.name_op(Opcode::GetVarThis, f);
        b.load_int(10_000);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(0));
}
