//! Class definition, construction protocol, `super`, and private members.

mod common;

use common::{function, run, run_ok};
use kestrel::{CodeBuilder, ErrorKind, FunctionId, HostValue, Opcode, Program, classdef, classmethod};

/// An empty base-class constructor body.
fn empty_ctor(program: &mut Program, name: &str) -> FunctionId {
    function(program, name, &[], |_, b: &mut CodeBuilder| {
        b.flags_mut().is_ctor = true;
        b.emit(Opcode::ReturnUndef);
    })
}

/// `class A{}; class B extends A{ constructor(){ return 42; } }` - the
/// derived constructor returns a primitive without calling `super`, and
/// the this-binding check fires first.
#[test]
fn derived_ctor_without_super_raises_reference_error() {
    let result = run_ok(|program, b| {
        let a = program.intern("A");
        let bee = program.intern("B");
        let name = program.intern("name");

        let a_ctor = empty_ctor(program, "A");
        let b_ctor = function(program, "B", &[], |_, b| {
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.load_int(42);
            b.emit(Opcode::Return);
        });

        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);

        b.get_var(a);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.set_var(bee);
        b.emit(Opcode::Pop);

        // try { new B(); } catch (e) { return e.name; }
        let slot = b.alloc_local();
        let try_start = b.here();
        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.emit(Opcode::Pop);
        let try_end = b.here();
        let ok = b.emit_jump(Opcode::Jump);
        let catch_pc = b.here();
        b.emit_u16(Opcode::LocalLoad, slot);
        b.str_reg(name);
        b.emit(Opcode::GetProp);
        b.emit(Opcode::Return);
        b.patch_jump(ok);
        b.emit(Opcode::ReturnUndef);
        b.add_exception_entry(try_start, try_end, Some(catch_pc), None, slot);
    });
    assert_eq!(result, HostValue::String("ReferenceError".to_owned()));
}

#[test]
fn derived_ctor_with_super_builds_the_instance() {
    let result = run_ok(|program, b| {
        let a = program.intern("A");
        let bee = program.intern("B");
        let x = program.intern("x");

        // class A { constructor() { this.x = 40; } }
        let a_ctor = function(program, "A", &[], |program, b| {
            let x = program.intern("x");
            b.flags_mut().is_ctor = true;
            b.emit(Opcode::LoadThis);
            b.load_int(40);
            b.str_reg(x);
            b.emit(Opcode::SetProp);
            b.emit(Opcode::Pop);
            b.emit(Opcode::ReturnUndef);
        });
        // class B extends A { constructor() { super(); this.x = this.x + 2; } }
        let b_ctor = function(program, "B", &[], |program, b| {
            let x = program.intern("x");
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.emit_u8(Opcode::SuperCall, 0);
            b.emit(Opcode::LoadThis);
            b.emit(Opcode::LoadThis);
            b.str_reg(x);
            b.emit(Opcode::GetProp);
            b.load_int(2);
            b.emit(Opcode::Add);
            b.str_reg(x);
            b.emit(Opcode::SetProp);
            b.emit(Opcode::Pop);
            b.emit(Opcode::CheckThisTdz);
            b.emit(Opcode::ReturnUndef);
        });

        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.get_var(a);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.set_var(bee);
        b.emit(Opcode::Pop);

        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.get_prop(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

/// A base constructor that returns a primitive still produces the
/// constructed instance; the return value is discarded without error.
#[test]
fn base_ctor_primitive_return_is_discarded() {
    let result = run_ok(|program, b| {
        let klass = program.intern("K");
        let x = program.intern("x");
        // class K { constructor() { this.x = 7; return 42; } }
        let ctor = function(program, "K", &[], |program, b| {
            let x = program.intern("x");
            b.flags_mut().is_ctor = true;
            b.emit(Opcode::LoadThis);
            b.load_int(7);
            b.str_reg(x);
            b.emit(Opcode::SetProp);
            b.emit(Opcode::Pop);
            b.load_int(42);
            b.emit(Opcode::Return);
        });
        b.ind_reg(ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(klass);
        b.emit(Opcode::Pop);

        // new K().x is 7, not 42
        b.get_var(klass);
        b.emit_u8(Opcode::New, 0);
        b.get_prop(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(7));
}

/// A derived constructor that called `super()` and then returns a
/// primitive raises `TypeError`: with `this` bound, the return-value rule
/// applies instead of the missing-super `ReferenceError`.
#[test]
fn derived_ctor_primitive_return_after_super_is_a_type_error() {
    let err = run(|program, b| {
        let a = program.intern("A");
        let bee = program.intern("B");
        let a_ctor = empty_ctor(program, "A");
        // class B extends A { constructor() { super(); return 42; } }
        let b_ctor = function(program, "B", &[], |_, b| {
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.emit_u8(Opcode::SuperCall, 0);
            b.load_int(42);
            b.emit(Opcode::Return);
        });
        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.get_var(a);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.set_var(bee);
        b.emit(Opcode::Pop);

        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("object or undefined"));
}

#[test]
fn super_twice_raises_reference_error() {
    let err = run(|program, b| {
        let a = program.intern("A");
        let bee = program.intern("B");
        let a_ctor = empty_ctor(program, "A");
        let b_ctor = function(program, "B", &[], |_, b| {
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.emit_u8(Opcode::SuperCall, 0);
            b.emit_u8(Opcode::SuperCall, 0);
            b.emit(Opcode::ReturnUndef);
        });
        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.get_var(a);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.set_var(bee);
        b.emit(Opcode::Pop);
        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
}

/// `extends null` keeps the derived protocol: the prototype chain ends at
/// null and `super()` raises `TypeError` after argument evaluation.
#[test]
fn extends_null_makes_super_a_type_error() {
    let err = run(|program, b| {
        let bee = program.intern("B");
        let b_ctor = function(program, "B", &[], |_, b| {
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.emit_u8(Opcode::SuperCall, 0);
            b.emit(Opcode::ReturnUndef);
        });
        b.emit(Opcode::LoadNull);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.set_var(bee);
        b.emit(Opcode::Pop);
        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn class_constructors_require_new() {
    let err = run(|program, b| {
        let a = program.intern("A");
        let a_ctor = empty_ctor(program, "A");
        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.name_op(Opcode::GetVarThis, a);
        b.call(0);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("new"));
}

#[test]
fn static_member_named_prototype_is_a_type_error() {
    let err = run(|program, b| {
        let prototype = program.intern("prototype");
        let a_ctor = empty_ctor(program, "A");
        let method = function(program, "m", &[], |_, b| {
            b.emit(Opcode::ReturnUndef);
        });
        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.load_string(prototype);
        b.ind_reg(method.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::ClassMethod, classmethod::STATIC);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn instance_methods_land_on_the_prototype_and_see_super() {
    let result = run_ok(|program, b| {
        let a = program.intern("A");
        let bee = program.intern("B");
        let speak = program.intern("speak");

        // class A { speak() { return "a"; } }
        let a_ctor = empty_ctor(program, "A");
        let a_speak = function(program, "speak", &[], |program, b| {
            let text = program.intern("a");
            b.load_string(text);
            b.emit(Opcode::Return);
        });
        // class B extends A { speak() { return super.speak() + "b"; } }
        let b_ctor = function(program, "B", &[], |_, b| {
            b.flags_mut().is_ctor = true;
            b.flags_mut().derived_ctor = true;
            b.emit(Opcode::DefaultCtorSuperCall);
            b.emit(Opcode::ReturnUndef);
        });
        let b_speak = function(program, "speak", &[], |program, b| {
            let speak = program.intern("speak");
            let suffix = program.intern("b");
            b.emit(Opcode::LoadThis);
            b.str_reg(speak);
            b.emit(Opcode::GetPropSuper);
            b.emit_u8(Opcode::CallOnSuper, 0);
            b.load_string(suffix);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });

        b.ind_reg(a_ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.load_string(speak);
        b.ind_reg(a_speak.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::ClassMethod, 0);
        b.set_var(a);
        b.emit(Opcode::Pop);

        b.get_var(a);
        b.ind_reg(b_ctor.operand());
        b.emit_u8(Opcode::ClassDef, classdef::DERIVED);
        b.load_string(speak);
        b.ind_reg(b_speak.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::ClassMethod, 0);
        b.set_var(bee);
        b.emit(Opcode::Pop);

        // new B().speak()
        b.get_var(bee);
        b.emit_u8(Opcode::New, 0);
        b.str_reg(speak);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("ab".to_owned()));
}

#[test]
fn private_fields_obey_brand_checks() {
    let result = run_ok(|program, b| {
        let counter = program.intern("Counter");
        let bump = program.intern("bump");
        let n = program.intern("n");

        // class Counter { #n = 0-at-ctor; bump() { this.#n += 1; return this.#n } }
        let ctor = function(program, "Counter", &[], |program, b| {
            let n = program.intern("n");
            b.flags_mut().is_ctor = true;
            b.emit(Opcode::ClassStorage);
            b.emit(Opcode::LoadThis);
            b.load_int(0);
            b.str_reg(n);
            b.emit_u8(Opcode::DefinePrivate, 0);
            b.emit(Opcode::ReturnUndef);
        });
        let bump_fn = function(program, "bump", &[], |program, b| {
            let n = program.intern("n");
            b.emit(Opcode::ClassStorage);
            b.emit(Opcode::LoadThis);
            b.emit(Opcode::ClassStorage);
            b.emit(Opcode::LoadThis);
            b.str_reg(n);
            b.emit(Opcode::GetPrivate);
            b.load_int(1);
            b.emit(Opcode::Add);
            b.str_reg(n);
            b.emit(Opcode::SetPrivate);
            b.emit(Opcode::Return);
        });

        b.ind_reg(ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.load_string(bump);
        b.ind_reg(bump_fn.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::ClassMethod, 0);
        b.set_var(counter);
        b.emit(Opcode::Pop);

        // c = new Counter(); c.bump(); c.bump()
        let c = program.intern("c");
        b.get_var(counter);
        b.emit_u8(Opcode::New, 0);
        b.set_var(c);
        b.emit(Opcode::Pop);
        b.get_var(c);
        b.str_reg(bump);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Pop);
        b.get_var(c);
        b.str_reg(bump);
        b.emit(Opcode::GetPropThis);
        b.call(0);
        b.emit(Opcode::Return);
        let _ = n;
    });
    assert_eq!(result, HostValue::Int(2));
}

#[test]
fn private_access_without_the_brand_is_a_type_error() {
    let err = run(|program, b| {
        let klass = program.intern("K");
        let probe = program.intern("probe");
        let secret = program.intern("secret");

        let ctor = function(program, "K", &[], |program, b| {
            let secret = program.intern("secret");
            b.flags_mut().is_ctor = true;
            b.emit(Opcode::ClassStorage);
            b.emit(Opcode::LoadThis);
            b.load_int(1);
            b.str_reg(secret);
            b.emit_u8(Opcode::DefinePrivate, 0);
            b.emit(Opcode::ReturnUndef);
        });
        // probe(o) reads o.#secret with K's storage - a plain object has
        // no brand.
        let probe_fn = function(program, "probe", &["o"], |program, b| {
            let o = program.intern("o");
            let secret = program.intern("secret");
            b.emit(Opcode::ClassStorage);
            b.get_var(o);
            b.str_reg(secret);
            b.emit(Opcode::GetPrivate);
            b.emit(Opcode::Return);
        });

        b.ind_reg(ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.load_string(probe);
        b.ind_reg(probe_fn.operand());
        b.emit(Opcode::MakeFunction);
        b.emit_u8(Opcode::ClassMethod, 0);
        b.set_var(klass);
        b.emit(Opcode::Pop);

        // (new K()).probe({})
        b.get_var(klass);
        b.emit_u8(Opcode::New, 0);
        b.str_reg(probe);
        b.emit(Opcode::GetPropThis);
        b.emit(Opcode::NewObjectLit);
        b.call(1);
        b.emit(Opcode::Return);
        let _ = secret;
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("private"));
}

#[test]
fn class_fields_run_at_construction() {
    let result = run_ok(|program, b| {
        let klass = program.intern("K");
        let x = program.intern("x");
        let ctor = empty_ctor(program, "K");
        // field initializer: this.x = 7
        let init = function(program, "", &[], |program, b| {
            let x = program.intern("x");
            b.emit(Opcode::LoadThis);
            b.load_int(7);
            b.str_reg(x);
            b.emit(Opcode::SetProp);
            b.emit(Opcode::Pop);
            b.emit(Opcode::ReturnUndef);
        });

        b.ind_reg(ctor.operand());
        b.emit_u8(Opcode::ClassDef, 0);
        b.ind_reg(init.operand());
        b.emit(Opcode::ClassFieldInit);
        b.set_var(klass);
        b.emit(Opcode::Pop);

        b.get_var(klass);
        b.emit_u8(Opcode::New, 0);
        b.get_prop(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(7));
}
