//! JSON view of dynamic messages, following the proto3 JSON mapping:
//! keys are JSON names, 64-bit integers are strings, bytes are base64,
//! enums are member names. Parsing also accepts proto field names, numeric
//! strings for any integer and enum numbers.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use protocache_core::error::CodecError;
use serde_json::{Map, Number, Value as Json};

use crate::codec::{DynamicMessage, Value};
use crate::descriptor::{FieldDefinition, FieldType, ScalarType, TypeDefinition};

impl DynamicMessage {
    /// Render as a JSON object. Unknown fields are omitted.
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        for field in self.descriptor().fields() {
            if let Some(value) = self.get_by_number(field.number()) {
                out.insert(field.json_name().to_string(), field_to_json(&field, value));
            }
        }
        Json::Object(out)
    }
}

impl TypeDefinition {
    /// Build a message of this type from a JSON object.
    pub fn from_json(&self, json: &Json) -> Result<DynamicMessage, CodecError> {
        let mut msg = DynamicMessage::new(self.clone())?;
        let Json::Object(obj) = json else {
            return Err(CodecError::InvalidValue {
                field: self.full_name().to_string(),
                reason: format!("expected JSON object, got {}", json_kind(json)),
            });
        };
        for (key, raw) in obj {
            let field = self.field_by_name(key).ok_or_else(|| CodecError::UnknownField {
                message: self.full_name().to_string(),
                field: key.clone(),
            })?;
            if raw.is_null() {
                continue;
            }
            let value = field_from_json(&field, raw)?;
            msg.set(field.name(), value)?;
        }
        Ok(msg)
    }

    /// `from_json` followed by `encode`.
    pub fn encode_json(&self, json: &Json) -> Result<Vec<u8>, CodecError> {
        self.from_json(json)?.encode()
    }
}

// ─── Message → JSON ──────────────────────────────────────────────────────────

fn field_to_json(field: &FieldDefinition<'_>, value: &Value) -> Json {
    match value {
        Value::List(items) => Json::Array(items.iter().map(|v| single_to_json(field, v)).collect()),
        Value::Map(entries) => {
            let value_field = field
                .message_type()
                .and_then(|entry| entry.field_by_number(2).map(|f| f.field_type()));
            let mut out = Map::new();
            for (k, v) in entries {
                let rendered = match (&value_field, v) {
                    (Some(FieldType::Enum(e)), Value::EnumNumber(n)) => enum_to_json(e, *n),
                    _ => value_to_json(v),
                };
                out.insert(map_key(k), rendered);
            }
            Json::Object(out)
        }
        single => single_to_json(field, single),
    }
}

fn single_to_json(field: &FieldDefinition<'_>, value: &Value) -> Json {
    match (field.enum_type(), value) {
        (Some(e), Value::EnumNumber(n)) => enum_to_json(&e, *n),
        _ => value_to_json(value),
    }
}

fn enum_to_json(def: &TypeDefinition, number: i32) -> Json {
    match def.enum_value_by_number(number) {
        Some(v) => Json::String(v.name.clone()),
        None => Json::from(number),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::I32(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => Json::String(v.to_string()),
        Value::U64(v) => Json::String(v.to_string()),
        Value::F32(v) => float_to_json(f64::from(*v)),
        Value::F64(v) => float_to_json(*v),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(STANDARD.encode(b)),
        Value::EnumNumber(n) => Json::from(*n),
        Value::Message(m) => m.to_json(),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (map_key(k), value_to_json(v)))
                .collect(),
        ),
    }
}

fn float_to_json(v: f64) -> Json {
    if v.is_nan() {
        Json::String("NaN".into())
    } else if v == f64::INFINITY {
        Json::String("Infinity".into())
    } else if v == f64::NEG_INFINITY {
        Json::String("-Infinity".into())
    } else {
        Number::from_f64(v).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn map_key(k: &Value) -> String {
    match k {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

// ─── JSON → message ──────────────────────────────────────────────────────────

fn field_from_json(field: &FieldDefinition<'_>, raw: &Json) -> Result<Value, CodecError> {
    if field.is_map() {
        let Json::Object(obj) = raw else {
            return Err(bad(field, format!("expected object, got {}", json_kind(raw))));
        };
        let entry = field.message_type().ok_or_else(|| bad(field, "map without entry type".into()))?;
        let (Some(key_field), Some(value_field)) = (entry.field_by_number(1), entry.field_by_number(2)) else {
            return Err(bad(field, "map entry without key and value".into()));
        };
        let mut entries = Vec::with_capacity(obj.len());
        for (k, v) in obj {
            let key = single_from_json(&key_field, &Json::String(k.clone()))?;
            let value = single_from_json(&value_field, v)?;
            entries.push((key, value));
        }
        return Ok(Value::Map(entries));
    }
    if field.is_repeated() {
        let Json::Array(items) = raw else {
            return Err(bad(field, format!("expected array, got {}", json_kind(raw))));
        };
        return items
            .iter()
            .map(|item| single_from_json(field, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }
    single_from_json(field, raw)
}

fn single_from_json(field: &FieldDefinition<'_>, raw: &Json) -> Result<Value, CodecError> {
    match field.field_type() {
        FieldType::Scalar(s) => scalar_from_json(field, s, raw),
        FieldType::Enum(e) => match raw {
            Json::String(name) => e
                .enum_value_by_name(name)
                .map(|v| Value::EnumNumber(v.number))
                .ok_or_else(|| CodecError::UnknownEnumValue {
                    enum_name: e.full_name().to_string(),
                    value: name.clone(),
                }),
            Json::Number(_) => Ok(Value::EnumNumber(int_from_json::<i32>(field, raw)?)),
            other => Err(bad(field, format!("expected enum name or number, got {}", json_kind(other)))),
        },
        FieldType::Message(def) | FieldType::Group(def) => def.from_json(raw).map(Value::Message),
    }
}

fn scalar_from_json(field: &FieldDefinition<'_>, s: ScalarType, raw: &Json) -> Result<Value, CodecError> {
    Ok(match s {
        ScalarType::Bool => match raw {
            Json::Bool(b) => Value::Bool(*b),
            Json::String(t) if t == "true" => Value::Bool(true),
            Json::String(t) if t == "false" => Value::Bool(false),
            other => return Err(bad(field, format!("expected bool, got {}", json_kind(other)))),
        },
        ScalarType::String => match raw {
            Json::String(t) => Value::String(t.clone()),
            other => return Err(bad(field, format!("expected string, got {}", json_kind(other)))),
        },
        ScalarType::Bytes => match raw {
            Json::String(t) => Value::Bytes(
                STANDARD
                    .decode(t)
                    .or_else(|_| URL_SAFE.decode(t))
                    .map_err(|e| bad(field, format!("invalid base64: {e}")))?,
            ),
            other => return Err(bad(field, format!("expected base64 string, got {}", json_kind(other)))),
        },
        ScalarType::Double => Value::F64(float_from_json(field, raw)?),
        ScalarType::Float => Value::F32(float_from_json(field, raw)? as f32),
        ScalarType::Int32 | ScalarType::Sint32 | ScalarType::Sfixed32 => Value::I32(int_from_json(field, raw)?),
        ScalarType::Int64 | ScalarType::Sint64 | ScalarType::Sfixed64 => Value::I64(int_from_json(field, raw)?),
        ScalarType::Uint32 | ScalarType::Fixed32 => Value::U32(int_from_json(field, raw)?),
        ScalarType::Uint64 | ScalarType::Fixed64 => Value::U64(int_from_json(field, raw)?),
    })
}

/// Integer from a JSON number or a decimal string, range-checked for `T`.
fn int_from_json<T>(field: &FieldDefinition<'_>, raw: &Json) -> Result<T, CodecError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let out_of_range = || bad(field, format!("{raw} is out of range"));
    match raw {
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                T::try_from(u).map_err(|_| out_of_range())
            } else if let Some(i) = n.as_i64() {
                T::try_from(i).map_err(|_| out_of_range())
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() != 0.0 || !f.is_finite() {
                    return Err(bad(field, format!("{raw} is not an integer")));
                }
                T::try_from(f as i64).map_err(|_| out_of_range())
            }
        }
        Json::String(t) => {
            if let Ok(u) = t.parse::<u64>() {
                T::try_from(u).map_err(|_| out_of_range())
            } else if let Ok(i) = t.parse::<i64>() {
                T::try_from(i).map_err(|_| out_of_range())
            } else {
                Err(bad(field, format!("'{t}' is not an integer")))
            }
        }
        other => Err(bad(field, format!("expected integer, got {}", json_kind(other)))),
    }
}

fn float_from_json(field: &FieldDefinition<'_>, raw: &Json) -> Result<f64, CodecError> {
    match raw {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| bad(field, format!("{raw} is not a float"))),
        Json::String(t) => match t.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => t
                .parse::<f64>()
                .map_err(|_| bad(field, format!("'{t}' is not a float"))),
        },
        other => Err(bad(field, format!("expected number, got {}", json_kind(other)))),
    }
}

fn bad(field: &FieldDefinition<'_>, reason: String) -> CodecError {
    CodecError::InvalidValue {
        field: field.name().to_string(),
        reason,
    }
}
