/// Isolate wire protocol - defines only semantics, not runtime logic
///
/// The grading host and the `gradebox-worker` isolate exchange exactly one
/// request and one response per process, as JSON over stdin/stdout.
/// Keeping both shapes here ensures the two sides never drift.
///
/// Values use an adjacently tagged encoding (`{"t": "number", "v": 1}`) so
/// `undefined`, `NaN`, `-0`, cycles and opaque values survive the boundary.
/// Object entries travel as `[key, value]` pairs, which keeps keys such as
/// `__proto__` as ordinary data when the isolate rebuilds them.

use crate::types::CompileErrorKind;
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum WireValue {
    Undefined,
    Null,
    Bool(bool),
    /// Finite numbers other than `-0`
    Number(f64),
    /// `"NaN"`, `"Infinity"`, `"-Infinity"` or `"-0"`
    Special(String),
    String(String),
    Array(Vec<WireValue>),
    Object(Vec<(String, WireValue)>),
    Circular,
    Opaque(String),
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => WireValue::Undefined,
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Number(n) => {
                if n.is_nan() {
                    WireValue::Special("NaN".to_string())
                } else if n.is_infinite() {
                    let name = if *n > 0.0 { "Infinity" } else { "-Infinity" };
                    WireValue::Special(name.to_string())
                } else if *n == 0.0 && n.is_sign_negative() {
                    WireValue::Special("-0".to_string())
                } else {
                    WireValue::Number(*n)
                }
            }
            Value::String(s) => WireValue::String(s.clone()),
            Value::Array(items) => WireValue::Array(items.iter().map(WireValue::from).collect()),
            Value::Object(map) => WireValue::Object(
                map.iter().map(|(k, v)| (k.clone(), WireValue::from(v))).collect(),
            ),
            Value::Circular => WireValue::Circular,
            Value::Opaque(desc) => WireValue::Opaque(desc.clone()),
        }
    }
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Undefined => Value::Undefined,
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Number(n) => Value::Number(n),
            WireValue::Special(name) => match name.as_str() {
                "Infinity" => Value::Number(f64::INFINITY),
                "-Infinity" => Value::Number(f64::NEG_INFINITY),
                "-0" => Value::Number(-0.0),
                _ => Value::Number(f64::NAN),
            },
            WireValue::String(s) => Value::String(s),
            WireValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            // Later duplicates win, as with repeated assignment in JavaScript
            WireValue::Object(entries) => Value::Object(
                entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
            WireValue::Circular => Value::Circular,
            WireValue::Opaque(desc) => Value::Opaque(desc),
        }
    }
}

/// Decode one protocol message without serde_json's nesting limit
///
/// Each value level costs two or three JSON levels, so the default limit of
/// 128 rejects ordinary linked lists. Nesting is bounded instead by
/// `IsolateLimits::max_value_depth`; callers decode on a thread with a
/// large stack.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let message = T::deserialize(&mut de)?;
    de.end()?;
    Ok(message)
}

/// Engine limits applied inside the isolate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolateLimits {
    pub recursion_limit: usize,
    pub max_value_depth: usize,
    pub max_console_lines: usize,
    pub allowed_globals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolateRequest {
    pub source: String,
    pub function_name: String,
    /// `None` only checks that the source compiles and defines the function
    pub args: Option<Vec<WireValue>>,
    pub limits: IsolateLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsolateResponse {
    /// Compile check passed
    Ready,
    CompileError {
        error_kind: CompileErrorKind,
        message: String,
        line: Option<u32>,
        column: Option<u32>,
    },
    Returned {
        value: WireValue,
        console: Vec<String>,
    },
    Threw {
        message: String,
        console: Vec<String>,
    },
    /// The isolate could not process the request at all
    Internal { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_encoding_is_tagged() {
        let value = Value::Array(vec![Value::Undefined, Value::Number(1.0), Value::from("x")]);
        let json = serde_json::to_value(WireValue::from(&value)).unwrap();
        assert_eq!(
            json,
            json!({"t": "array", "v": [
                {"t": "undefined"},
                {"t": "number", "v": 1.0},
                {"t": "string", "v": "x"}
            ]})
        );
    }

    #[test]
    fn test_special_numbers_survive() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0] {
            let wire = WireValue::from(&Value::Number(n));
            let text = serde_json::to_string(&wire).unwrap();
            let back: Value = serde_json::from_str::<WireValue>(&text).unwrap().into();
            let Value::Number(m) = back else { panic!("expected number") };
            if n.is_nan() {
                assert!(m.is_nan());
            } else {
                assert_eq!(m, n);
                assert_eq!(m.is_sign_negative(), n.is_sign_negative());
            }
        }
    }

    #[test]
    fn test_object_entries_keep_proto_key() {
        let wire: WireValue = serde_json::from_value(json!(
            {"t": "object", "v": [["__proto__", {"t": "number", "v": 1}]]}
        ))
        .unwrap();
        let Value::Object(map) = Value::from(wire) else { panic!("expected object") };
        assert_eq!(map["__proto__"], Value::Number(1.0));
    }

    #[test]
    fn test_response_shapes() {
        let response: IsolateResponse = serde_json::from_value(json!({
            "kind": "threw",
            "message": "Error: x",
            "console": ["hi"]
        }))
        .unwrap();
        assert_eq!(
            response,
            IsolateResponse::Threw { message: "Error: x".to_string(), console: vec!["hi".to_string()] }
        );

        let ready: IsolateResponse = serde_json::from_str(r#"{"kind":"ready"}"#).unwrap();
        assert_eq!(ready, IsolateResponse::Ready);
    }

    #[test]
    fn test_deeply_nested_response_decodes() {
        let mut value = Value::Null;
        for _ in 0..100 {
            value = Value::Array(vec![value]);
        }
        let response = IsolateResponse::Returned { value: WireValue::from(&value), console: Vec::new() };
        let bytes = serde_json::to_vec(&response).unwrap();

        assert!(serde_json::from_slice::<IsolateResponse>(&bytes).is_err());
        let decoded: IsolateResponse = decode_message(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(decode_message::<IsolateResponse>(br#"{"kind":"ready"} x"#).is_err());
    }
}
