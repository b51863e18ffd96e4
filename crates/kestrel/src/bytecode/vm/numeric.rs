//! Coercion wrappers and arithmetic/comparison opcode bodies.
//!
//! The pure conversion grammar lives in `crate::coerce`; this module adds
//! the object-aware layer: `ToPrimitive` (which may call `@@toPrimitive`,
//! `valueOf`, and `toString` in script), the numeric tower (`f64` with an
//! i32 fast path, `BigInt` on the heap), and the operator semantics the
//! dispatch loop delegates to.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;

use crate::{
    bytecode::op::Opcode,
    coerce,
    error::{RunError, RunResult},
    heap::HeapData,
    intern::{StaticStrings, StringId, WellKnownSymbol},
    property::PropertyKey,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{JsType, Value, bigint_cmp_number},
};

use super::Vm;

/// Hint passed to `ToPrimitive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveHint {
    Default,
    Number,
    String,
}

impl PrimitiveHint {
    fn name(self) -> StaticStrings {
        match self {
            Self::Default => StaticStrings::Default,
            Self::Number => StaticStrings::Number,
            Self::String => StaticStrings::String,
        }
    }
}

/// Result of `ToNumeric`: the two numeric types stay distinct and never
/// mix implicitly.
#[derive(Debug, Clone)]
pub(crate) enum Numeric {
    Number(f64),
    BigInt(BigInt),
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// True when the value is a real object (not a heap string/bigint).
    pub(crate) fn is_object_value(&self, value: &Value) -> bool {
        match value {
            Value::Ref(id) => matches!(self.realm.heap.get(*id), HeapData::Object(_)),
            _ => false,
        }
    }

    /// Allocates a computed string value.
    pub(crate) fn make_string(&mut self, s: String) -> RunResult<Value> {
        let id = self.realm.heap.alloc_string(s)?;
        Ok(Value::Ref(id))
    }

    /// Allocates a `BigInt` value.
    pub(crate) fn make_bigint(&mut self, b: BigInt) -> RunResult<Value> {
        let id = self.realm.heap.alloc_bigint(b)?;
        Ok(Value::Ref(id))
    }

    /// ToPrimitive. Objects consult `@@toPrimitive`, then the ordinary
    /// `valueOf`/`toString` protocol in hint order; other inputs return
    /// unchanged.
    pub(crate) fn to_primitive(&mut self, value: Value, hint: PrimitiveHint) -> RunResult<Value> {
        if !self.is_object_value(&value) {
            return Ok(value);
        }

        let exotic_key = PropertyKey::Sym(WellKnownSymbol::ToPrimitive.id());
        let exotic = self.get_property_value(value.clone(), &exotic_key)?;
        if !exotic.is_nullish() {
            if !exotic.is_callable(&self.realm.heap) {
                return Err(RunError::type_error("@@toPrimitive is not a function"));
            }
            let hint_arg = Value::Str(StringId::from(hint.name()));
            let result = self.call_value(exotic, value, &[hint_arg])?;
            if self.is_object_value(&result) {
                return Err(RunError::type_error("@@toPrimitive returned an object"));
            }
            return Ok(result);
        }

        let method_order = match hint {
            PrimitiveHint::String => [StaticStrings::ToString, StaticStrings::ValueOf],
            PrimitiveHint::Default | PrimitiveHint::Number => [StaticStrings::ValueOf, StaticStrings::ToString],
        };
        for name in method_order {
            let method = self.get_property_value(value.clone(), &PropertyKey::Str(StringId::from(name)))?;
            if method.is_callable(&self.realm.heap) {
                let result = self.call_value(method, value.clone(), &[])?;
                if !self.is_object_value(&result) {
                    return Ok(result);
                }
            }
        }
        Err(RunError::type_error("cannot convert object to primitive value"))
    }

    /// ToNumber, running `ToPrimitive` on objects first.
    pub(crate) fn to_number(&mut self, value: Value) -> RunResult<f64> {
        let prim = self.to_primitive(value, PrimitiveHint::Number)?;
        coerce::to_number_primitive(&prim, &self.realm.heap, &self.realm.interns, self.realm.legacy_octal())
    }

    /// ToNumeric: numbers stay numbers, bigints stay bigints.
    pub(crate) fn to_numeric(&mut self, value: Value) -> RunResult<Numeric> {
        let prim = self.to_primitive(value, PrimitiveHint::Number)?;
        if let Some(b) = prim.as_bigint(&self.realm.heap) {
            return Ok(Numeric::BigInt(b.clone()));
        }
        let n = coerce::to_number_primitive(&prim, &self.realm.heap, &self.realm.interns, self.realm.legacy_octal())?;
        Ok(Numeric::Number(n))
    }

    /// ToBigInt: numbers are rejected, strings parse with the BigInt
    /// grammar.
    pub(crate) fn to_big_int(&mut self, value: Value) -> RunResult<BigInt> {
        let prim = self.to_primitive(value, PrimitiveHint::Number)?;
        match &prim {
            Value::Bool(b) => Ok(BigInt::from(i32::from(*b))),
            Value::Int(_) | Value::Float(_) => Err(RunError::type_error("cannot convert a number to a BigInt")),
            _ => {
                if let Some(b) = prim.as_bigint(&self.realm.heap) {
                    return Ok(b.clone());
                }
                if let Some(s) = prim.as_str(&self.realm.heap, &self.realm.interns) {
                    return coerce::bigint_from_str(s)
                        .ok_or_else(|| RunError::syntax_error("cannot convert string to a BigInt"));
                }
                Err(RunError::type_error("cannot convert value to a BigInt"))
            }
        }
    }

    /// ToString as an owned Rust string.
    pub(crate) fn to_rust_string(&mut self, value: Value) -> RunResult<String> {
        let prim = self.to_primitive(value, PrimitiveHint::String)?;
        coerce::to_string_primitive(&prim, &self.realm.heap, &self.realm.interns)
    }

    /// Loose equality, lifting objects through `ToPrimitive`.
    pub(crate) fn loose_eq(&mut self, left: Value, right: Value) -> RunResult<bool> {
        let left_is_object = self.is_object_value(&left);
        let right_is_object = self.is_object_value(&right);
        match (left_is_object, right_is_object) {
            (false, false) => coerce::loose_eq_primitive(
                &left,
                &right,
                &self.realm.heap,
                &self.realm.interns,
                self.realm.legacy_octal(),
            ),
            (true, true) => Ok(left.strict_eq(&right, &self.realm.heap, &self.realm.interns)),
            (true, false) => {
                // The scriptable undefined wrapper compares equal to
                // undefined and null without running ToPrimitive.
                if right.is_nullish() {
                    return Ok(left.equal_to_nullish(&self.realm.heap));
                }
                let prim = self.to_primitive(left, PrimitiveHint::Default)?;
                self.loose_eq(prim, right)
            }
            (false, true) => {
                if left.is_nullish() {
                    return Ok(right.equal_to_nullish(&self.realm.heap));
                }
                let prim = self.to_primitive(right, PrimitiveHint::Default)?;
                self.loose_eq(left, prim)
            }
        }
    }

    /// Relational comparison (`left < right` when `swap` is false).
    fn relational(&mut self, left: Value, right: Value, op: Opcode) -> RunResult<Value> {
        let pl = self.to_primitive(left, PrimitiveHint::Number)?;
        let pr = self.to_primitive(right, PrimitiveHint::Number)?;

        let ordering = if let (Some(a), Some(b)) = (
            pl.as_str(&self.realm.heap, &self.realm.interns),
            pr.as_str(&self.realm.heap, &self.realm.interns),
        ) {
            Some(coerce::cmp_strings_code_units(a, b))
        } else {
            let nl = self.to_numeric(pl)?;
            let nr = self.to_numeric(pr)?;
            match (nl, nr) {
                (Numeric::Number(a), Numeric::Number(b)) => a.partial_cmp(&b),
                (Numeric::BigInt(a), Numeric::BigInt(b)) => Some(a.cmp(&b)),
                (Numeric::BigInt(a), Numeric::Number(b)) => bigint_cmp_number(&a, b),
                (Numeric::Number(a), Numeric::BigInt(b)) => bigint_cmp_number(&b, a).map(Ordering::reverse),
            }
        };

        let result = match ordering {
            // NaN participates in no ordering.
            None => false,
            Some(ordering) => match op {
                Opcode::Lt => ordering == Ordering::Less,
                Opcode::Le => ordering != Ordering::Greater,
                Opcode::Gt => ordering == Ordering::Greater,
                Opcode::Ge => ordering != Ordering::Less,
                _ => unreachable!("relational dispatch"),
            },
        };
        Ok(Value::Bool(result))
    }

    /// The shared body of every two-operand operator opcode.
    pub(crate) fn binary_op(&mut self, op: Opcode, left: Value, right: Value) -> RunResult<Value> {
        match op {
            Opcode::Add => self.add_values(left, right),
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Exp => {
                let nl = self.to_numeric(left)?;
                let nr = self.to_numeric(right)?;
                self.arithmetic(op, nl, nr)
            }
            Opcode::ShL | Opcode::ShR | Opcode::UShR | Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor => {
                let nl = self.to_numeric(left)?;
                let nr = self.to_numeric(right)?;
                self.bitwise(op, nl, nr)
            }
            Opcode::Eq => {
                let result = self.loose_eq(left, right)?;
                Ok(Value::Bool(result))
            }
            Opcode::Ne => {
                let result = self.loose_eq(left, right)?;
                Ok(Value::Bool(!result))
            }
            Opcode::StrictEq => Ok(Value::Bool(left.strict_eq(&right, &self.realm.heap, &self.realm.interns))),
            Opcode::StrictNe => Ok(Value::Bool(!left.strict_eq(&right, &self.realm.heap, &self.realm.interns))),
            Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => self.relational(left, right, op),
            _ => Err(RunError::internal("binary_op dispatched a non-binary opcode")),
        }
    }

    /// `+`: string concatenation wins over numeric addition.
    fn add_values(&mut self, left: Value, right: Value) -> RunResult<Value> {
        // Integer fast path before any observable coercion.
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            let sum = i64::from(*a) + i64::from(*b);
            return Ok(match i32::try_from(sum) {
                Ok(small) => Value::Int(small),
                Err(_) => Value::Float(sum as f64),
            });
        }

        let pl = self.to_primitive(left, PrimitiveHint::Default)?;
        let pr = self.to_primitive(right, PrimitiveHint::Default)?;
        let left_is_str = pl.js_type(&self.realm.heap) == JsType::String;
        let right_is_str = pr.js_type(&self.realm.heap) == JsType::String;
        if left_is_str || right_is_str {
            let mut s = self.to_rust_string(pl)?;
            s.push_str(&self.to_rust_string(pr)?);
            return self.make_string(s);
        }
        let nl = self.to_numeric(pl)?;
        let nr = self.to_numeric(pr)?;
        self.arithmetic(Opcode::Add, nl, nr)
    }

    fn arithmetic(&mut self, op: Opcode, left: Numeric, right: Numeric) -> RunResult<Value> {
        match (left, right) {
            (Numeric::Number(a), Numeric::Number(b)) => {
                let result = match op {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    Opcode::Div => a / b,
                    Opcode::Mod => a % b,
                    Opcode::Exp => a.powf(b),
                    _ => unreachable!("arithmetic dispatch"),
                };
                Ok(Value::number(result))
            }
            (Numeric::BigInt(a), Numeric::BigInt(b)) => {
                let result = match op {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    Opcode::Div => {
                        if b.is_zero() {
                            return Err(RunError::range_error("division by zero"));
                        }
                        a / b
                    }
                    Opcode::Mod => {
                        if b.is_zero() {
                            return Err(RunError::range_error("division by zero"));
                        }
                        a % b
                    }
                    Opcode::Exp => {
                        if b.is_negative() {
                            return Err(RunError::range_error("exponent must be non-negative"));
                        }
                        let exp = b
                            .to_u32()
                            .ok_or_else(|| RunError::range_error("BigInt exponent too large"))?;
                        a.pow(exp)
                    }
                    _ => unreachable!("arithmetic dispatch"),
                };
                self.make_bigint(result)
            }
            _ => Err(RunError::type_error("cannot mix BigInt and other types in arithmetic")),
        }
    }

    fn bitwise(&mut self, op: Opcode, left: Numeric, right: Numeric) -> RunResult<Value> {
        match (left, right) {
            (Numeric::Number(a), Numeric::Number(b)) => {
                let result = match op {
                    Opcode::ShL => Value::Int(coerce::to_int32(a) << (coerce::to_uint32(b) & 31)),
                    Opcode::ShR => Value::Int(coerce::to_int32(a) >> (coerce::to_uint32(b) & 31)),
                    Opcode::UShR => Value::number(f64::from(coerce::to_uint32(a) >> (coerce::to_uint32(b) & 31))),
                    Opcode::BitAnd => Value::Int(coerce::to_int32(a) & coerce::to_int32(b)),
                    Opcode::BitOr => Value::Int(coerce::to_int32(a) | coerce::to_int32(b)),
                    Opcode::BitXor => Value::Int(coerce::to_int32(a) ^ coerce::to_int32(b)),
                    _ => unreachable!("bitwise dispatch"),
                };
                Ok(result)
            }
            (Numeric::BigInt(a), Numeric::BigInt(b)) => {
                let result = match op {
                    // >>> has no BigInt form: there is no fixed width to
                    // zero-fill from.
                    Opcode::UShR => {
                        return Err(RunError::type_error("BigInts have no unsigned right shift"));
                    }
                    Opcode::ShL => {
                        let shift = b
                            .to_i64()
                            .ok_or_else(|| RunError::range_error("BigInt shift amount too large"))?;
                        if shift >= 0 { a << shift } else { a >> (-shift) }
                    }
                    Opcode::ShR => {
                        let shift = b
                            .to_i64()
                            .ok_or_else(|| RunError::range_error("BigInt shift amount too large"))?;
                        if shift >= 0 { a >> shift } else { a << (-shift) }
                    }
                    Opcode::BitAnd => a & b,
                    Opcode::BitOr => a | b,
                    Opcode::BitXor => a ^ b,
                    _ => unreachable!("bitwise dispatch"),
                };
                self.make_bigint(result)
            }
            _ => Err(RunError::type_error("cannot mix BigInt and other types in arithmetic")),
        }
    }

    /// `Neg`/`Pos`/`BitNot`.
    pub(crate) fn unary_numeric_op(&mut self, op: Opcode, operand: Value) -> RunResult<Value> {
        match op {
            Opcode::Pos => {
                // Unary plus is ToNumber and rejects BigInt.
                let n = self.to_number(operand)?;
                Ok(Value::number(n))
            }
            Opcode::Neg => match self.to_numeric(operand)? {
                Numeric::Number(n) => Ok(Value::number(-n)),
                Numeric::BigInt(b) => self.make_bigint(-b),
            },
            Opcode::BitNot => match self.to_numeric(operand)? {
                Numeric::Number(n) => Ok(Value::Int(!coerce::to_int32(n))),
                Numeric::BigInt(b) => self.make_bigint(!b),
            },
            _ => Err(RunError::internal("unary dispatch")),
        }
    }
}
