use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type Fields = BTreeMap<String, FieldValue>;

/// 与具体存储无关的字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// base64 编码的二进制
    Bytes(String),
    Reference(String),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<FieldValue>),
    Map(Fields),
}

impl FieldValue {
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::String(s) | FieldValue::Bytes(s) | FieldValue::Reference(s) => {
                Value::String(s.clone())
            }
            FieldValue::Timestamp(t) => {
                Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FieldValue::GeoPoint {
                latitude,
                longitude,
            } => serde_json::json!({ "latitude": latitude, "longitude": longitude }),
            FieldValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            FieldValue::Map(fields) => Value::Object(fields_to_json(fields)),
        }
    }

    /// JSON 到字段值；RFC 3339 字符串保持为字符串，时间戳需显式构造
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => FieldValue::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(t)
    }
}

pub fn fields_to_json(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// 一条存储文档
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// 输出为 JSON 对象，并在不冲突时附带 `id`
    pub fn to_json(&self) -> Value {
        let mut obj = fields_to_json(&self.fields);
        obj.entry("id")
            .or_insert_with(|| Value::String(self.id.clone()));
        Value::Object(obj)
    }
}
