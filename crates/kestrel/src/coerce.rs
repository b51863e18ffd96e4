//! Type coercions and primitive equality.
//!
//! Pure conversion machinery: number formatting and parsing per the
//! ECMAScript grammars, the integer clamping family (`ToInt32`,
//! `ToUint32`, `ToUint16`, `ToLength`, `ToIndex`), string/bigint parsing,
//! and the primitive arms of loose equality and relational comparison.
//!
//! Conversions that can run script (`ToPrimitive` on objects and the
//! object arms of `ToNumber`/`ToString`) live on the VM, which funnels the
//! resulting primitives back through these functions.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::Num;

use crate::{
    error::{RunError, RunResult},
    heap::{Heap, HeapData},
    intern::Interns,
    resource::ResourceTracker,
    value::{Value, bigint_eq_number},
};

/// Whitespace accepted by the numeric-string grammars: ASCII whitespace,
/// line terminators, NBSP, BOM, and the Unicode space separators.
pub(crate) fn is_js_whitespace(c: char) -> bool {
    matches!(
        c,
        '\u{0009}'..='\u{000D}'
            | ' '
            | '\u{00A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}'
            | '\u{FEFF}'
    )
}

/// Number of UTF-16 code units in a string; the `length` every string
/// operation reports.
pub(crate) fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// ToString for numbers, producing the shortest round-trip decimal form.
///
/// Integral values below 10^21 print without fraction or exponent;
/// otherwise ryu's shortest digits are reformatted to the specification's
/// decimal/exponent split (decimal form for exponents in (-7, 21]).
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n == f64::INFINITY {
        return "Infinity".to_owned();
    }
    if n == f64::NEG_INFINITY {
        return "-Infinity".to_owned();
    }
    if n == 0.0 {
        // Both zeros print "0".
        return "0".to_owned();
    }
    if n.trunc() == n && n.abs() < 9_007_199_254_740_992.0 {
        // Fast path: exact small integers.
        return format!("{}", n as i64);
    }

    let mut buffer = ryu::Buffer::new();
    let shortest = buffer.format(n);
    let (sign, rest) = match shortest.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", shortest),
    };

    // Split ryu output into significant digits and a decimal exponent such
    // that the value is 0.digits * 10^point.
    let (mantissa, explicit_exp) = match rest.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().expect("ryu emits valid exponents")),
        None => (rest, 0),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let mut digits: String = format!("{int_part}{frac_part}");
    let mut point = explicit_exp + i32::try_from(int_part.len()).expect("mantissa fits i32");
    // Normalize: strip leading zeros (adjusting the point), then trailing.
    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    point -= i32::try_from(leading).expect("mantissa fits i32");
    while digits.ends_with('0') {
        digits.pop();
    }
    let k = i32::try_from(digits.len()).expect("mantissa fits i32");

    let body = if point >= k && point <= 21 {
        // Integral: digits followed by zeros.
        let mut s = digits;
        s.extend(std::iter::repeat_n('0', (point - k) as usize));
        s
    } else if point > 0 && point <= 21 {
        let mut s = String::with_capacity(digits.len() + 1);
        s.push_str(&digits[..point as usize]);
        s.push('.');
        s.push_str(&digits[point as usize..]);
        s
    } else if point > -6 && point <= 0 {
        let mut s = String::from("0.");
        s.extend(std::iter::repeat_n('0', (-point) as usize));
        s.push_str(&digits);
        s
    } else {
        // Exponent form: d.ddd e±(point-1)
        let exp = point - 1;
        let mut s = String::new();
        s.push_str(&digits[..1]);
        if digits.len() > 1 {
            s.push('.');
            s.push_str(&digits[1..]);
        }
        s.push('e');
        if exp >= 0 {
            s.push('+');
        }
        s.push_str(&exp.to_string());
        s
    };
    format!("{sign}{body}")
}

/// ToNumber for string input, per the StringNumericLiteral grammar.
///
/// Accepts surrounding whitespace, the empty string (0), signed decimal
/// with exponent, `Infinity`, and unsigned `0x`/`0o`/`0b` radix literals.
/// With `legacy_octal`, a leading-zero digit string parses as octal (the
/// pre-ES5 compatibility mode selected by the realm's language version).
pub(crate) fn number_from_str(s: &str, legacy_octal: bool) -> f64 {
    let trimmed = s.trim_matches(is_js_whitespace);
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0x", "0X") {
        return radix_to_f64(rest, 16);
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0o", "0O") {
        return radix_to_f64(rest, 8);
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0b", "0B") {
        return radix_to_f64(rest, 2);
    }

    let (sign, unsigned) = split_sign(trimmed);
    if unsigned == "Infinity" {
        return if sign < 0 { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    if legacy_octal
        && unsigned.len() > 1
        && unsigned.starts_with('0')
        && unsigned.bytes().all(|b| (b'0'..=b'7').contains(&b))
    {
        return sign as f64 * radix_to_f64(unsigned, 8);
    }
    if !is_decimal_literal(unsigned) {
        return f64::NAN;
    }
    match unsigned.parse::<f64>() {
        Ok(v) => sign as f64 * v,
        Err(_) => f64::NAN,
    }
}

fn strip_radix_prefix<'a>(s: &'a str, lower: &str, upper: &str) -> Option<&'a str> {
    s.strip_prefix(lower).or_else(|| s.strip_prefix(upper))
}

fn split_sign(s: &str) -> (i32, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else {
        (1, s)
    }
}

/// Validates the unsigned StrDecimalLiteral grammar so that Rust's float
/// parser never sees its own extensions ("inf", "nan", underscores).
fn is_decimal_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut int_digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        int_digits += 1;
    }
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            frac_digits += 1;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return false;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let mut exp_digits = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            exp_digits += 1;
        }
        if exp_digits == 0 {
            return false;
        }
    }
    i == bytes.len()
}

fn radix_to_f64(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return f64::NAN;
    }
    // Accumulate in f64; rounding past 2^53 matches the grammar's
    // mathematical-value-to-double conversion closely enough for literals.
    let mut result = 0.0f64;
    for c in digits.chars() {
        result = result * f64::from(radix) + f64::from(c.to_digit(radix).expect("digit validated"));
    }
    result
}

/// StringToBigInt: like the number grammar but without fraction, exponent,
/// `Infinity`, or signs on radix forms. Returns `None` on syntax error.
pub(crate) fn bigint_from_str(s: &str) -> Option<BigInt> {
    let trimmed = s.trim_matches(is_js_whitespace);
    if trimmed.is_empty() {
        return Some(BigInt::from(0));
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0x", "0X") {
        return BigInt::from_str_radix(rest, 16).ok();
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0o", "0O") {
        return BigInt::from_str_radix(rest, 8).ok();
    }
    if let Some(rest) = strip_radix_prefix(trimmed, "0b", "0B") {
        return BigInt::from_str_radix(rest, 2).ok();
    }
    let (sign, unsigned) = split_sign(trimmed);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude = BigInt::from_str_radix(unsigned, 10).ok()?;
    Some(if sign < 0 { -magnitude } else { magnitude })
}

/// ToInt32: modular reduction into the signed 32-bit range.
pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32: modular reduction into the unsigned 32-bit range.
pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulus = 4_294_967_296.0;
    let mut m = n.trunc() % modulus;
    if m < 0.0 {
        m += modulus;
    }
    m as u32
}

/// ToUint16: modular reduction into the unsigned 16-bit range.
pub(crate) fn to_uint16(n: f64) -> u16 {
    (to_uint32(n) % 65_536) as u16
}

/// ToLength: clamp into [0, 2^53-1].
pub(crate) fn to_length(n: f64) -> u64 {
    if n.is_nan() || n <= 0.0 {
        return 0;
    }
    let max = 9_007_199_254_740_991.0;
    if n >= max { max as u64 } else { n.trunc() as u64 }
}

/// ToIndex: integral in [0, 2^53-1], `None` when out of range (the caller
/// raises `RangeError`).
pub(crate) fn to_index(n: f64) -> Option<u64> {
    if n == 0.0 || n.is_nan() {
        return Some(0);
    }
    let integral = n.trunc();
    if integral != n || integral < 0.0 || integral > 9_007_199_254_740_991.0 {
        return None;
    }
    Some(integral as u64)
}

/// ToNumber on a non-object value. Symbols and BigInts refuse numeric
/// coercion with `TypeError`.
pub(crate) fn to_number_primitive<T: ResourceTracker>(
    value: &Value,
    heap: &Heap<T>,
    interns: &Interns,
    legacy_octal: bool,
) -> RunResult<f64> {
    match value {
        Value::Undefined => Ok(f64::NAN),
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Int(i) => Ok(f64::from(*i)),
        Value::Float(f) => Ok(*f),
        Value::Str(id) => Ok(number_from_str(interns.get_str(*id), legacy_octal)),
        Value::Symbol(_) => Err(RunError::type_error("cannot convert a Symbol to a number")),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Ok(number_from_str(s, legacy_octal)),
            HeapData::BigInt(_) => Err(RunError::type_error("cannot convert a BigInt to a number")),
            _ => Err(RunError::internal("to_number_primitive received an object")),
        },
        Value::NotFound | Value::Uninit => Err(RunError::internal("sentinel in ToNumber")),
    }
}

/// ToString on a non-object value. Symbols refuse implicit stringification.
pub(crate) fn to_string_primitive<T: ResourceTracker>(
    value: &Value,
    heap: &Heap<T>,
    interns: &Interns,
) -> RunResult<String> {
    match value {
        Value::Undefined => Ok("undefined".to_owned()),
        Value::Null => Ok("null".to_owned()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(number_to_string(*f)),
        Value::Str(id) => Ok(interns.get_str(*id).to_owned()),
        Value::Symbol(_) => Err(RunError::type_error("cannot convert a Symbol to a string")),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Ok(s.clone()),
            HeapData::BigInt(b) => Ok(b.to_string()),
            _ => Err(RunError::internal("to_string_primitive received an object")),
        },
        Value::NotFound | Value::Uninit => Err(RunError::internal("sentinel in ToString")),
    }
}

/// Loose equality (`==`) between non-object values.
///
/// Cross-type rules: `null == undefined`, number<->string via `ToNumber`,
/// boolean via `ToNumber`, BigInt<->string via `StringToBigInt`, and
/// BigInt<->Number by exact mathematical value.
pub(crate) fn loose_eq_primitive<T: ResourceTracker>(
    a: &Value,
    b: &Value,
    heap: &Heap<T>,
    interns: &Interns,
    legacy_octal: bool,
) -> RunResult<bool> {
    use crate::value::JsType;

    let ta = a.js_type(heap);
    let tb = b.js_type(heap);
    if ta == tb {
        return Ok(a.strict_eq(b, heap, interns));
    }
    match (ta, tb) {
        (JsType::Undefined | JsType::Null, JsType::Undefined | JsType::Null) => Ok(true),
        (JsType::Number, JsType::String) | (JsType::String, JsType::Number) => {
            let an = to_number_primitive(a, heap, interns, legacy_octal)?;
            let bn = to_number_primitive(b, heap, interns, legacy_octal)?;
            Ok(an == bn)
        }
        (JsType::Boolean, _) => {
            let an = Value::number(to_number_primitive(a, heap, interns, legacy_octal)?);
            loose_eq_primitive(&an, b, heap, interns, legacy_octal)
        }
        (_, JsType::Boolean) => {
            let bn = Value::number(to_number_primitive(b, heap, interns, legacy_octal)?);
            loose_eq_primitive(a, &bn, heap, interns, legacy_octal)
        }
        (JsType::BigInt, JsType::String) => {
            let text = b.as_str(heap, interns).expect("string value has text");
            match bigint_from_str(text) {
                Some(parsed) => Ok(*a.as_bigint(heap).expect("bigint value") == parsed),
                None => Ok(false),
            }
        }
        (JsType::String, JsType::BigInt) => loose_eq_primitive(b, a, heap, interns, legacy_octal),
        (JsType::BigInt, JsType::Number) => {
            let n = b.as_number().expect("number value");
            Ok(bigint_eq_number(a.as_bigint(heap).expect("bigint value"), n))
        }
        (JsType::Number, JsType::BigInt) => loose_eq_primitive(b, a, heap, interns, legacy_octal),
        _ => Ok(false),
    }
}

/// Relational comparison of two strings by UTF-16 code units.
///
/// Byte order on UTF-8 differs from code-unit order for supplementary
/// characters, so the comparison decodes.
pub(crate) fn cmp_strings_code_units(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_to_string_basic_forms() {
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-7.0), "-7");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn number_to_string_exponent_split() {
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(1e-6), "0.000001");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
    }

    #[test]
    fn number_round_trips_through_string() {
        for &x in &[0.1, 1.5, 123.456, 1e300, 5e-324, 0.3333333333333333, 2.5e21] {
            let s = number_to_string(x);
            assert_eq!(s.parse::<f64>().unwrap(), x, "round trip failed for {s}");
        }
    }

    #[test]
    fn number_from_str_grammar() {
        assert_eq!(number_from_str("", false), 0.0);
        assert_eq!(number_from_str("  \t\n ", false), 0.0);
        assert_eq!(number_from_str("42", false), 42.0);
        assert_eq!(number_from_str("  -1.5e2 ", false), -150.0);
        assert_eq!(number_from_str(".5", false), 0.5);
        assert_eq!(number_from_str("Infinity", false), f64::INFINITY);
        assert_eq!(number_from_str("-Infinity", false), f64::NEG_INFINITY);
        assert_eq!(number_from_str("0x10", false), 16.0);
        assert_eq!(number_from_str("0b101", false), 5.0);
        assert_eq!(number_from_str("0o17", false), 15.0);
        assert!(number_from_str("12px", false).is_nan());
        assert!(number_from_str("inf", false).is_nan());
        assert!(number_from_str("nan", false).is_nan());
        // Signed radix forms are not part of the grammar.
        assert!(number_from_str("-0x10", false).is_nan());
    }

    #[test]
    fn legacy_octal_behind_flag() {
        assert_eq!(number_from_str("010", true), 8.0);
        assert_eq!(number_from_str("010", false), 10.0);
        // Digits 8/9 disqualify the octal interpretation either way.
        assert_eq!(number_from_str("019", true), 19.0);
    }

    #[test]
    fn int_conversions() {
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_uint32(-1.0), 4_294_967_295);
        assert_eq!(to_uint32(4_294_967_296.0 + 7.0), 7);
        assert_eq!(to_uint16(65_537.0), 1);
        assert_eq!(to_length(-5.0), 0);
        assert_eq!(to_length(1e300), 9_007_199_254_740_991);
        assert_eq!(to_index(3.0), Some(3));
        assert_eq!(to_index(-1.0), None);
        assert_eq!(to_index(1.5), None);
    }

    #[test]
    fn uint32_round_trips_for_indices() {
        for i in [0u32, 1, 7, 255, 4_294_967_294] {
            assert_eq!(to_uint32(f64::from(i)), i);
        }
    }

    #[test]
    fn bigint_from_str_grammar() {
        assert_eq!(bigint_from_str(""), Some(BigInt::from(0)));
        assert_eq!(bigint_from_str(" 42 "), Some(BigInt::from(42)));
        assert_eq!(bigint_from_str("-7"), Some(BigInt::from(-7)));
        assert_eq!(bigint_from_str("0xff"), Some(BigInt::from(255)));
        assert_eq!(bigint_from_str("1.5"), None);
        assert_eq!(bigint_from_str("1e3"), None);
        assert_eq!(bigint_from_str("1n"), None);
    }

    #[test]
    fn string_code_unit_ordering() {
        assert_eq!(cmp_strings_code_units("a", "b"), Ordering::Less);
        assert_eq!(cmp_strings_code_units("abc", "abc"), Ordering::Equal);
        // U+10000 encodes as a surrogate pair starting at 0xD800, which
        // sorts below U+E000 in code-unit order despite UTF-8 byte order.
        assert_eq!(cmp_strings_code_units("\u{10000}", "\u{E000}"), Ordering::Less);
    }
}
