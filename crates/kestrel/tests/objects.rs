//! Object model: key order, freeze/seal, prototypes, accessors, proxies.

mod common;

use common::{function, run, run_ok};
use kestrel::{ErrorKind, HostValue, Opcode};

/// Own-key enumeration order: integer indices ascending, then string keys
/// in insertion order.
#[test]
fn own_keys_order_indices_before_strings() {
    let result = run_ok(|program, b| {
        let bkey = program.intern("b");
        let akey = program.intern("a");
        let object_g = program.intern("Object");
        let keys = program.intern("keys");
        // o = {b: 1, 10: 2, 2: 3, a: 4}
        b.emit(Opcode::NewObjectLit);
        b.load_string(bkey);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.load_int(10);
        b.load_int(2);
        b.emit(Opcode::LiteralKeySet);
        b.load_int(2);
        b.load_int(3);
        b.emit(Opcode::LiteralKeySet);
        b.load_string(akey);
        b.load_int(4);
        b.emit(Opcode::LiteralKeySet);
        let o = program.intern("o");
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.get_var(object_g);
        b.str_reg(keys);
        b.emit(Opcode::GetPropThis);
        b.get_var(o);
        b.call(1);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("2".to_owned()),
            HostValue::String("10".to_owned()),
            HostValue::String("b".to_owned()),
            HostValue::String("a".to_owned()),
        ])
    );
}

/// Frozen objects reject writes (silently in sloppy mode) and report
/// frozen.
#[test]
fn freeze_makes_objects_immutable() {
    let result = run_ok(|program, b| {
        let object_g = program.intern("Object");
        let freeze = program.intern("freeze");
        let is_frozen = program.intern("isFrozen");
        let x = program.intern("x");
        let o = program.intern("o");

        // o = {x: 1}; Object.freeze(o); o.x = 2;
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.get_var(object_g);
        b.str_reg(freeze);
        b.emit(Opcode::GetPropThis);
        b.get_var(o);
        b.call(1);
        b.emit(Opcode::Pop);

        b.get_var(o);
        b.load_int(2);
        b.str_reg(x);
        b.emit(Opcode::SetProp);
        b.emit(Opcode::Pop);

        // [o.x, Object.isFrozen(o)]
        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.get_var(o);
        b.get_prop(x);
        b.emit(Opcode::LiteralSet);
        b.get_var(object_g);
        b.str_reg(is_frozen);
        b.emit(Opcode::GetPropThis);
        b.get_var(o);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Int(1), HostValue::Bool(true)]));
}

#[test]
fn frozen_writes_throw_in_strict_mode() {
    let err = run(|program, b| {
        b.flags_mut().strict = true;
        let object_g = program.intern("Object");
        let freeze = program.intern("freeze");
        let x = program.intern("x");
        let o = program.intern("o");

        b.emit(Opcode::NewBlockScope);
        b.str_reg(o);
        b.emit(Opcode::DeclareLet);
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.str_reg(o);
        b.emit(Opcode::SetLetInit);
        b.emit(Opcode::Pop);

        b.get_var(object_g);
        b.str_reg(freeze);
        b.emit(Opcode::GetPropThis);
        b.get_var(o);
        b.call(1);
        b.emit(Opcode::Pop);

        b.get_var(o);
        b.load_int(2);
        b.str_reg(x);
        b.emit(Opcode::SetProp);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

/// `setPrototype` refuses to create cycles.
#[test]
fn prototype_cycles_are_rejected() {
    let err = run(|program, b| {
        let object_g = program.intern("Object");
        let set_proto = program.intern("setPrototypeOf");
        let a = program.intern("a");
        let c = program.intern("c");

        // a = {}; c = Object.create-ish chain: c.__proto__ = a via
        // setPrototypeOf, then a.__proto__ = c must fail.
        b.emit(Opcode::NewObjectLit);
        b.set_var(a);
        b.emit(Opcode::Pop);
        b.emit(Opcode::NewObjectLit);
        b.set_var(c);
        b.emit(Opcode::Pop);

        b.get_var(object_g);
        b.str_reg(set_proto);
        b.emit(Opcode::GetPropThis);
        b.get_var(c);
        b.get_var(a);
        b.call(2);
        b.emit(Opcode::Pop);

        b.get_var(object_g);
        b.str_reg(set_proto);
        b.emit(Opcode::GetPropThis);
        b.get_var(a);
        b.get_var(c);
        b.call(2);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("cyclic"));
}

#[test]
fn getters_run_with_the_receiver() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        let double = program.intern("double");
        let o = program.intern("o");
        // getter: return this.x + this.x
        let getter = function(program, "double", &[], |program, b| {
            let x = program.intern("x");
            b.emit(Opcode::LoadThis);
            b.str_reg(x);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::LoadThis);
            b.str_reg(x);
            b.emit(Opcode::GetProp);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        });

        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(21);
        b.emit(Opcode::LiteralKeySet);
        b.load_string(double);
        b.ind_reg(getter.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralGetter);
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.get_var(o);
        b.get_prop(double);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn setters_receive_the_assigned_value() {
    let result = run_ok(|program, b| {
        let store = program.intern("store");
        let backing = program.intern("backing");
        let o = program.intern("o");
        // setter: this.backing = v * 2
        let setter = function(program, "store", &["v"], |program, b| {
            let v = program.intern("v");
            let backing = program.intern("backing");
            b.emit(Opcode::LoadThis);
            b.get_var(v);
            b.load_int(2);
            b.emit(Opcode::Mul);
            b.str_reg(backing);
            b.emit(Opcode::SetProp);
            b.emit(Opcode::Pop);
            b.emit(Opcode::ReturnUndef);
        });

        b.emit(Opcode::NewObjectLit);
        b.load_string(store);
        b.ind_reg(setter.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralSetter);
        b.set_var(o);
        b.emit(Opcode::Pop);

        // o.store = 21; return o.backing;
        b.get_var(o);
        b.load_int(21);
        b.str_reg(store);
        b.emit(Opcode::SetProp);
        b.emit(Opcode::Pop);
        b.get_var(o);
        b.get_prop(backing);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn define_property_validates_non_configurable_transitions() {
    let err = run(|program, b| {
        let object_g = program.intern("Object");
        let define = program.intern("defineProperty");
        let value = program.intern("value");
        let configurable = program.intern("configurable");
        let writable = program.intern("writable");
        let k = program.intern("k");
        let o = program.intern("o");

        // Object.defineProperty(o, "k", {value: 1, writable: false,
        // configurable: false}) then redefining with value: 2 must throw.
        b.emit(Opcode::NewObjectLit);
        b.set_var(o);
        b.emit(Opcode::Pop);

        for redefine in [1, 2] {
            b.get_var(object_g);
            b.str_reg(define);
            b.emit(Opcode::GetPropThis);
            b.get_var(o);
            b.load_string(k);
            b.emit(Opcode::NewObjectLit);
            b.load_string(value);
            b.load_int(redefine);
            b.emit(Opcode::LiteralKeySet);
            b.load_string(writable);
            b.emit(Opcode::False);
            b.emit(Opcode::LiteralKeySet);
            b.load_string(configurable);
            b.emit(Opcode::False);
            b.emit(Opcode::LiteralKeySet);
            b.call(3);
            b.emit(Opcode::Pop);
        }
        b.emit(Opcode::ReturnUndef);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn proxy_get_trap_intercepts_reads() {
    let result = run_ok(|program, b| {
        let proxy_g = program.intern("Proxy");
        let get = program.intern("get");
        let anything = program.intern("anything");
        // handler.get returns 42 for every key
        let trap = function(program, "get", &["target", "key"], |_, b| {
            b.load_int(42);
            b.emit(Opcode::Return);
        });

        b.get_var(proxy_g);
        b.emit(Opcode::NewObjectLit);
        b.emit(Opcode::NewObjectLit);
        b.load_string(get);
        b.ind_reg(trap.operand());
        b.emit(Opcode::MakeFunction);
        b.emit(Opcode::LiteralKeySet);
        b.emit_u8(Opcode::New, 2);
        b.get_prop(anything);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(42));
}

#[test]
fn trapless_proxy_forwards_to_target() {
    let result = run_ok(|program, b| {
        let proxy_g = program.intern("Proxy");
        let x = program.intern("x");
        // new Proxy({x: 7}, {}).x
        b.get_var(proxy_g);
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(7);
        b.emit(Opcode::LiteralKeySet);
        b.emit(Opcode::NewObjectLit);
        b.emit_u8(Opcode::New, 2);
        b.get_prop(x);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(7));
}

#[test]
fn in_operator_walks_the_prototype_chain() {
    let result = run_ok(|program, b| {
        let has_own = program.intern("hasOwnProperty");
        let o = program.intern("o");
        // "hasOwnProperty" in {} is true (inherited), own check is false.
        b.emit(Opcode::NewObjectLit);
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.ind_reg(2);
        b.emit(Opcode::NewArrayLit);
        b.load_string(has_own);
        b.get_var(o);
        b.emit(Opcode::In);
        b.emit(Opcode::LiteralSet);
        b.get_var(o);
        b.str_reg(has_own);
        b.emit(Opcode::GetPropThis);
        b.load_string(has_own);
        b.call(1);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Array(vec![HostValue::Bool(true), HostValue::Bool(false)]));
}

#[test]
fn instanceof_follows_prototypes_and_bound_targets() {
    let result = run_ok(|program, b| {
        let ctor = program.intern("Ctor");
        let inner = function(program, "Ctor", &[], |_, b| {
            b.emit(Opcode::ReturnUndef);
        });
        common::define_global_fn(program, b, "Ctor", inner);

        // new Ctor() instanceof Ctor
        b.get_var(ctor);
        b.emit_u8(Opcode::New, 0);
        b.get_var(ctor);
        b.emit(Opcode::InstanceOf);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Bool(true));
}

#[test]
fn delete_removes_configurable_properties() {
    let result = run_ok(|program, b| {
        let x = program.intern("x");
        let o = program.intern("o");
        b.emit(Opcode::NewObjectLit);
        b.load_string(x);
        b.load_int(1);
        b.emit(Opcode::LiteralKeySet);
        b.set_var(o);
        b.emit(Opcode::Pop);

        b.get_var(o);
        b.str_reg(x);
        b.emit(Opcode::DeleteProp);
        b.emit(Opcode::Pop);
        b.get_var(o);
        b.get_prop(x);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("undefined".to_owned()));
}
