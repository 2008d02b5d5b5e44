// src/sandbox/value.rs — Host-side view of sandbox values
//
// Scripts work with rhai::Dynamic. The host snapshots namespace values into
// this tagged variant to detect changes, render answers and write traces.

use std::collections::BTreeMap;

use rhai::{Dynamic, ImmutableString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A value with no host representation (closures, custom types); holds the type name.
    Opaque(String),
}

impl Value {
    pub fn from_dynamic(value: &Dynamic) -> Self {
        if value.is_unit() {
            return Value::Unit;
        }
        if let Ok(b) = value.as_bool() {
            return Value::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return Value::Int(i);
        }
        if let Ok(f) = value.as_float() {
            return Value::Float(f);
        }
        if let Ok(c) = value.as_char() {
            return Value::Text(c.to_string());
        }
        if let Some(s) = value.read_lock::<ImmutableString>() {
            return Value::Text(s.to_string());
        }
        if let Some(arr) = value.read_lock::<rhai::Array>() {
            return Value::List(arr.iter().map(Value::from_dynamic).collect());
        }
        if let Some(map) = value.read_lock::<rhai::Map>() {
            return Value::Map(
                map.iter()
                    .map(|(k, v)| (k.to_string(), Value::from_dynamic(v)))
                    .collect(),
            );
        }
        Value::Opaque(value.type_name().to_string())
    }

    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            Value::Unit => Dynamic::UNIT,
            Value::Bool(b) => Dynamic::from(*b),
            Value::Int(i) => Dynamic::from(*i),
            Value::Float(f) => Dynamic::from(*f),
            Value::Text(s) => Dynamic::from(s.clone()),
            Value::List(items) => {
                let arr: rhai::Array = items.iter().map(Value::to_dynamic).collect();
                Dynamic::from(arr)
            }
            Value::Map(entries) => {
                let mut map = rhai::Map::new();
                for (k, v) in entries {
                    map.insert(k.as_str().into(), v.to_dynamic());
                }
                Dynamic::from(map)
            }
            Value::Opaque(_) => Dynamic::UNIT,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Unit,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Unit
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(arr) => Value::List(arr.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Unit => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Opaque(type_name) => serde_json::Value::String(format!("<{type_name}>")),
        }
    }

    /// Text form used for answers and feedback: strings as-is, everything else as JSON.
    pub fn render(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Unit => String::new(),
            Value::Opaque(type_name) => format!("<{type_name}>"),
            other => other.to_json().to_string(),
        }
    }

    /// True for values that cannot serve as an answer.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Unit => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
