//! Cell value model for the Veil native core.
//!
//! A `CellValue` is the literal-shaped value a state cell can hold: scalar,
//! array, object, or a positional argument placeholder. Placeholders are
//! transparent stand-ins for action arguments resolved at call time on the
//! client; they serialize as `{"__arg": n}`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(Number),
    Str(String),
    Array(Vec<CellValue>),
    Object(Vec<(String, CellValue)>),
    /// Positional action-argument placeholder.
    Arg(usize),
}

impl CellValue {
    /// Build a number, collapsing whole floats to integers so that
    /// `5 + 1` serializes as `6`, not `6.0`.
    pub fn num(n: f64) -> CellValue {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < 9e15 {
            CellValue::Number(Number::from(n as i64))
        } else {
            Number::from_f64(n).map(CellValue::Number).unwrap_or(CellValue::Null)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JavaScript truthiness, mirrored by the generated cell runtime.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Null => false,
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            CellValue::Str(s) => !s.is_empty(),
            CellValue::Array(_) | CellValue::Object(_) => true,
            CellValue::Arg(_) => true,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Number(n) => Value::Number(n.clone()),
            CellValue::Str(s) => Value::String(s.clone()),
            CellValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            CellValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
            CellValue::Arg(index) => {
                let mut map = serde_json::Map::new();
                map.insert("__arg".to_string(), Value::Number(Number::from(*index as u64)));
                Value::Object(map)
            }
        }
    }

    pub fn from_json(value: &Value) -> CellValue {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => CellValue::Number(n.clone()),
            Value::String(s) => CellValue::Str(s.clone()),
            Value::Array(items) => {
                CellValue::Array(items.iter().map(CellValue::from_json).collect())
            }
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::Number(n)) = map.get("__arg") {
                        if let Some(index) = n.as_u64() {
                            return CellValue::Arg(index as usize);
                        }
                    }
                }
                CellValue::Object(
                    map.iter().map(|(k, v)| (k.clone(), CellValue::from_json(v))).collect(),
                )
            }
        }
    }

    /// Emit the value as a JavaScript literal (JSON is a subset).
    pub fn to_client_literal(&self) -> String {
        self.to_json().to_string()
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(CellValue::from_json(&value))
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(Number::from(n))
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::num(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Str(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Str(s)
    }
}

impl<T: Into<CellValue>> From<Vec<T>> for CellValue {
    fn from(items: Vec<T>) -> Self {
        CellValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Resolve argument placeholders against the invocation arguments, deeply.
/// Out-of-range placeholders resolve to null.
pub fn resolve_args(value: &CellValue, args: &[CellValue]) -> CellValue {
    match value {
        CellValue::Arg(index) => args.get(*index).cloned().unwrap_or(CellValue::Null),
        CellValue::Array(items) => {
            CellValue::Array(items.iter().map(|v| resolve_args(v, args)).collect())
        }
        CellValue::Object(fields) => CellValue::Object(
            fields.iter().map(|(k, v)| (k.clone(), resolve_args(v, args))).collect(),
        ),
        other => other.clone(),
    }
}
