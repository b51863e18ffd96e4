//! Arithmetic, coercion, and numeric-tower semantics at the opcode level.

mod common;

use common::{run, run_ok};
use kestrel::{ErrorKind, HostValue, Opcode};
use num_bigint::BigInt;

#[test]
fn integer_fast_path_addition() {
    let result = run_ok(|_, b| {
        b.load_int(2);
        b.load_int(3);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(5));
}

#[test]
fn integer_overflow_falls_back_to_float() {
    let result = run_ok(|_, b| {
        b.load_int(i32::MAX);
        b.load_int(1);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(2_147_483_648));
}

#[test]
fn string_concatenation_wins_over_addition() {
    let result = run_ok(|program, b| {
        let hello = program.intern("ab");
        b.load_string(hello);
        b.load_int(3);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::String("ab3".to_owned()));
}

#[test]
fn string_operands_coerce_for_subtraction() {
    let result = run_ok(|program, b| {
        let ten = program.intern("10");
        b.load_string(ten);
        b.load_int(3);
        b.emit(Opcode::Sub);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(7));
}

#[test]
fn division_produces_floats() {
    let result = run_ok(|_, b| {
        b.load_int(1);
        b.load_int(2);
        b.emit(Opcode::Div);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Float(0.5));
}

#[test]
fn bigint_arithmetic_stays_exact() {
    let result = run_ok(|program, b| {
        let big = program.add_bigint(BigInt::from(1) << 100);
        b.load_bigint(big);
        b.load_bigint(big);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::BigInt(BigInt::from(1) << 101));
}

#[test]
fn mixing_bigint_and_number_is_a_type_error() {
    let err = run(|program, b| {
        let big = program.add_bigint(BigInt::from(1));
        b.load_bigint(big);
        b.load_int(1);
        b.emit(Opcode::Add);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn unsigned_shift_rejects_bigints() {
    let err = run(|program, b| {
        let big = program.add_bigint(BigInt::from(8));
        b.load_bigint(big);
        b.load_bigint(big);
        b.emit(Opcode::UShR);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn signed_shift_and_bitwise_use_int32() {
    let result = run_ok(|_, b| {
        b.load_int(-8);
        b.load_int(1);
        b.emit(Opcode::ShR);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(-4));

    let result = run_ok(|_, b| {
        b.load_int(-8);
        b.load_int(1);
        b.emit(Opcode::UShR);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(2_147_483_644));
}

#[test]
fn unary_minus_on_zero_is_negative_zero() {
    let result = run_ok(|_, b| {
        b.load_int(0);
        b.emit(Opcode::Neg);
        b.emit(Opcode::Return);
    });
    // -0 prints as 0 but divides to -Infinity; check via 1/-0.
    assert_eq!(result, HostValue::Int(0));

    let result = run_ok(|_, b| {
        b.load_int(1);
        b.load_int(0);
        b.emit(Opcode::Neg);
        b.emit(Opcode::Div);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Float(f64::NEG_INFINITY));
}

#[test]
fn unary_plus_rejects_bigint() {
    let err = run(|program, b| {
        let big = program.add_bigint(BigInt::from(1));
        b.load_bigint(big);
        b.emit(Opcode::Pos);
        b.emit(Opcode::Return);
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn exponentiation() {
    let result = run_ok(|_, b| {
        b.load_int(2);
        b.load_int(10);
        b.emit(Opcode::Exp);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(1024));
}

#[test]
fn modulo_keeps_dividend_sign() {
    let result = run_ok(|_, b| {
        b.load_int(-7);
        b.load_int(3);
        b.emit(Opcode::Mod);
        b.emit(Opcode::Return);
    });
    assert_eq!(result, HostValue::Int(-1));
}

#[test]
fn typeof_reports_value_classes() {
    let result = run_ok(|program, b| {
        // [typeof undefined, typeof null, typeof 1, typeof "x"]
        b.ind_reg(4);
        b.emit(Opcode::NewArrayLit);
        b.emit(Opcode::Undef);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::LoadNull);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::LiteralSet);
        b.load_int(1);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::LiteralSet);
        let x = program.intern("xy");
        b.load_string(x);
        b.emit(Opcode::Typeof);
        b.emit(Opcode::LiteralSet);
        b.emit(Opcode::Return);
    });
    assert_eq!(
        result,
        HostValue::Array(vec![
            HostValue::String("undefined".to_owned()),
            HostValue::String("object".to_owned()),
            HostValue::String("number".to_owned()),
            HostValue::String("string".to_owned()),
        ])
    );
}
