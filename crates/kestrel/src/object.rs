//! Host-facing value type.
//!
//! [`HostValue`] is the owned, heap-independent form of a script value:
//! what `Runner::run` returns and what hosts pass in through
//! `set_global`. Unlike the internal `Value`, it owns all its data and can
//! be freely cloned, serialized, and compared.
//!
//! # JSON
//!
//! Natural mappings both ways for `Null`, `Bool`, numbers, `String`,
//! `Array`, and `Object`. Output-only forms for the rest:
//! `Undefined` -> `{"$undefined": true}`, `BigInt` -> `{"$bigint": "..."}`,
//! `Symbol` -> `{"$symbol": ...}`, `Error` -> `{"$error": {...}}`,
//! `Function` and `Repr` -> `{"$repr": "..."}`.

use ahash::AHashSet;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{
    coerce::number_to_string,
    error::ErrorKind,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings, StringId},
    property::{ObjectKind, PropertyKey},
    resource::ResourceTracker,
    value::Value,
};

/// Recursion ceiling for host conversion of deep object graphs.
const MAX_HOST_DEPTH: usize = 64;

/// A script value in owned, host-side form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    #[serde(alias = "undefined")]
    Undefined,
    #[serde(alias = "null")]
    Null,
    #[serde(alias = "bool")]
    Bool(bool),
    /// Integral numbers surface as `Int`; everything else as `Float`.
    #[serde(alias = "int")]
    Int(i64),
    #[serde(alias = "float")]
    Float(f64),
    BigInt(BigInt),
    #[serde(alias = "string")]
    String(String),
    Symbol {
        description: Option<String>,
    },
    #[serde(alias = "array")]
    Array(Vec<HostValue>),
    /// Plain objects as ordered key/value pairs (enumerable string keys).
    #[serde(alias = "object")]
    Object(Vec<(String, HostValue)>),
    Error {
        kind: ErrorKind,
        message: String,
    },
    /// Functions have no owned form; only the name crosses the boundary.
    Function {
        name: String,
    },
    /// Fallback rendering for values with no direct mapping.
    Repr(String),
}

impl HostValue {
    /// Natural JSON rendering (see the module docs).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{Value as Json, json};
        match self {
            Self::Undefined => json!({ "$undefined": true }),
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or_else(|| json!({ "$repr": number_to_string(*f) }), Json::Number),
            Self::BigInt(b) => json!({ "$bigint": b.to_string() }),
            Self::String(s) => Json::String(s.clone()),
            Self::Symbol { description } => json!({ "$symbol": description }),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(pairs) => {
                let mut map = serde_json::Map::new();
                for (key, value) in pairs {
                    map.insert(key.clone(), value.to_json());
                }
                Json::Object(map)
            }
            Self::Error { kind, message } => json!({ "$error": { "kind": kind.name(), "message": message } }),
            Self::Function { name } => json!({ "$repr": format!("function {name}") }),
            Self::Repr(text) => json!({ "$repr": text }),
        }
    }

    /// Reads the natural JSON forms back; `$`-tagged forms are output-only
    /// and round-trip as `Repr`.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

/// Converts a runtime value into its owned host form.
///
/// Object graphs convert recursively with a cycle guard; cycles and
/// excessive depth degrade to `Repr`.
pub(crate) fn to_host_value<T: ResourceTracker>(value: &Value, heap: &Heap<T>, interns: &Interns) -> HostValue {
    let mut seen = AHashSet::new();
    convert(value, heap, interns, &mut seen, 0)
}

fn convert<T: ResourceTracker>(
    value: &Value,
    heap: &Heap<T>,
    interns: &Interns,
    seen: &mut AHashSet<HeapId>,
    depth: usize,
) -> HostValue {
    if depth > MAX_HOST_DEPTH {
        return HostValue::Repr("[deep]".to_owned());
    }
    match value {
        Value::Undefined => HostValue::Undefined,
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Int(i) => HostValue::Int(i64::from(*i)),
        Value::Float(f) => {
            if f.trunc() == *f && f.is_finite() && f.abs() < 9_007_199_254_740_992.0 {
                HostValue::Int(*f as i64)
            } else {
                HostValue::Float(*f)
            }
        }
        Value::Str(id) => HostValue::String(interns.get_str(*id).to_owned()),
        Value::Symbol(id) => HostValue::Symbol {
            description: interns.symbol(*id).description.map(|d| interns.get_str(d).to_owned()),
        },
        Value::Ref(id) => {
            if !seen.insert(*id) {
                return HostValue::Repr("[circular]".to_owned());
            }
            let result = match heap.get(*id) {
                HeapData::Str(s) => HostValue::String(s.clone()),
                HeapData::BigInt(b) => HostValue::BigInt(b.clone()),
                HeapData::Scope(_) => HostValue::Repr("[scope]".to_owned()),
                HeapData::Object(obj) => match &obj.kind {
                    ObjectKind::Array(storage) => {
                        let mut items = Vec::with_capacity(storage.length() as usize);
                        for index in 0..storage.length() {
                            let element = storage.get(index).cloned().unwrap_or(Value::Undefined);
                            items.push(convert(&element, heap, interns, seen, depth + 1));
                        }
                        HostValue::Array(items)
                    }
                    ObjectKind::Error(kind) => {
                        let message_key = PropertyKey::Str(StringId::from(StaticStrings::Message));
                        let message = obj
                            .get_data(&message_key)
                            .and_then(|v| v.as_str(heap, interns))
                            .unwrap_or("")
                            .to_owned();
                        HostValue::Error { kind: *kind, message }
                    }
                    ObjectKind::Function(_) | ObjectKind::Native(_) | ObjectKind::Bound(_) => {
                        let name_key = PropertyKey::Str(StringId::from(StaticStrings::Name));
                        let name = obj
                            .get_data(&name_key)
                            .and_then(|v| v.as_str(heap, interns))
                            .unwrap_or("")
                            .to_owned();
                        HostValue::Function { name }
                    }
                    ObjectKind::Plain | ObjectKind::ArrayIterator { .. } | ObjectKind::AsyncFromSync { .. } => {
                        let mut pairs = Vec::new();
                        for key in obj.own_keys(false, false) {
                            if let Some(slot_value) = obj.get_data(&key) {
                                pairs.push((
                                    key.display(interns),
                                    convert(slot_value, heap, interns, seen, depth + 1),
                                ));
                            }
                        }
                        HostValue::Object(pairs)
                    }
                    other => HostValue::Repr(format!("[object {}]", kind_name(other, obj.class_tag.name()))),
                },
            };
            seen.remove(id);
            result
        }
        Value::NotFound | Value::Uninit => HostValue::Repr("[internal]".to_owned()),
    }
}

fn kind_name(kind: &ObjectKind, tag: &'static str) -> &'static str {
    match kind {
        ObjectKind::Generator(_) => "Generator",
        ObjectKind::AsyncState(_) => "AsyncState",
        ObjectKind::Promise(_) => "Promise",
        ObjectKind::Namespace(_) => "Module",
        ObjectKind::Proxy { .. } => "Proxy",
        ObjectKind::RegExp(_) => "RegExp",
        _ => tag,
    }
}
