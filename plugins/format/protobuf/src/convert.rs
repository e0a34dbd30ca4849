use std::cmp::Ordering;
use std::collections::HashMap;

use ingest_api::{Field, FieldType, ScalarType, SchemaError, Value};
use prost_reflect::{MapKey, Value as ProtoValue};

// ═══════════════════════════════════════════════════════════════
//  Validation / canonical form
// ═══════════════════════════════════════════════════════════════

/// Check `value` against `field` and return it in canonical form: the
/// `Value` variant that matches the column type, maps sorted by key,
/// empty collections of nullable columns folded into `Null`.
pub(crate) fn canonical_field(field: &Field, value: Option<&Value>) -> Result<Value, SchemaError> {
    let value = match value {
        None | Some(Value::Null) => {
            return match (&field.field_type, field.nullable) {
                (_, true) => Ok(Value::Null),
                (FieldType::Scalar(_), false) => Err(SchemaError::MissingField {
                    field: field.name.clone(),
                }),
                (FieldType::Array(_), false) => Ok(Value::Array(Vec::new())),
                (FieldType::Map(..), false) => Ok(Value::Map(Vec::new())),
            };
        }
        Some(v) => v,
    };

    match &field.field_type {
        FieldType::Scalar(ty) => canonical_scalar(&field.name, *ty, value),
        FieldType::Array(ty) => {
            let Value::Array(items) = value else {
                return Err(wrong_type(&field.name, &field.field_type, value));
            };
            let items = items
                .iter()
                .map(|v| canonical_scalar(&field.name, *ty, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(fold_empty(field, Value::Array(items)))
        }
        FieldType::Map(key_ty, value_ty) => {
            let Value::Map(entries) = value else {
                return Err(wrong_type(&field.name, &field.field_type, value));
            };
            let mut entries = entries
                .iter()
                .map(|(k, v)| {
                    Ok((
                        canonical_scalar(&field.name, *key_ty, k)?,
                        canonical_scalar(&field.name, *value_ty, v)?,
                    ))
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            entries.sort_by(|a, b| key_cmp(&a.0, &b.0));
            if let Some(pair) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(SchemaError::DuplicateKey {
                    field: field.name.clone(),
                    key: format!("{:?}", pair[0].0),
                });
            }
            Ok(fold_empty(field, Value::Map(entries)))
        }
    }
}

fn fold_empty(field: &Field, value: Value) -> Value {
    let empty = match &value {
        Value::Array(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        _ => false,
    };
    if empty && field.nullable { Value::Null } else { value }
}

fn canonical_scalar(field: &str, ty: ScalarType, value: &Value) -> Result<Value, SchemaError> {
    let out_of_range = |detail: String| SchemaError::OutOfRange {
        field: field.to_string(),
        detail,
    };

    let canonical = match (ty, value) {
        (ScalarType::Bool, Value::Bool(b)) => Value::Bool(*b),

        (ScalarType::Int16, Value::Int16(v)) => Value::Int16(*v),
        (ScalarType::Int16, Value::Int32(v)) => Value::Int16(
            i16::try_from(*v).map_err(|_| out_of_range(format!("{v} does not fit in int16")))?,
        ),
        (ScalarType::Int16, Value::Int64(v)) => Value::Int16(
            i16::try_from(*v).map_err(|_| out_of_range(format!("{v} does not fit in int16")))?,
        ),

        (ScalarType::Int32, Value::Int16(v)) => Value::Int32(i32::from(*v)),
        (ScalarType::Int32, Value::Int32(v)) => Value::Int32(*v),
        (ScalarType::Int32, Value::Int64(v)) => Value::Int32(
            i32::try_from(*v).map_err(|_| out_of_range(format!("{v} does not fit in int32")))?,
        ),

        (ScalarType::Int64, Value::Int16(v)) => Value::Int64(i64::from(*v)),
        (ScalarType::Int64, Value::Int32(v)) => Value::Int64(i64::from(*v)),
        (ScalarType::Int64, Value::Int64(v)) => Value::Int64(*v),

        (ScalarType::Float32, Value::Float32(v)) => Value::Float32(*v),
        (ScalarType::Float32, Value::Float64(v)) => {
            let narrowed = *v as f32;
            if v.is_finite() && narrowed.is_infinite() {
                return Err(out_of_range(format!("{v} does not fit in float32")));
            }
            Value::Float32(narrowed)
        }
        (ScalarType::Float64, Value::Float32(v)) => Value::Float64(f64::from(*v)),
        (ScalarType::Float64, Value::Float64(v)) => Value::Float64(*v),

        (ScalarType::String, Value::String(s)) => Value::String(s.clone()),
        (ScalarType::Varchar { max_len }, Value::String(s)) => {
            let len = s.chars().count();
            if len > max_len as usize {
                return Err(out_of_range(format!("{len} characters exceeds varchar({max_len})")));
            }
            Value::String(s.clone())
        }
        (ScalarType::Bytes, Value::Bytes(b)) => Value::Bytes(b.clone()),

        (ScalarType::Date, Value::Date(d)) => Value::Date(*d),
        (ScalarType::Timestamp, Value::Timestamp(t)) => Value::Timestamp(*t),

        (ty, value) => {
            return Err(SchemaError::WrongType {
                field: field.to_string(),
                expected: ty.to_string(),
                actual: value.type_name(),
            });
        }
    };
    Ok(canonical)
}

fn wrong_type(field: &str, expected: &FieldType, value: &Value) -> SchemaError {
    SchemaError::WrongType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: value.type_name(),
    }
}

/// Total order over canonical map keys.
fn key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int16(a), Value::Int16(b)) => a.cmp(b),
        (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Canonical Value → prost-reflect
// ═══════════════════════════════════════════════════════════════

pub(crate) fn to_proto(value: &Value) -> Option<ProtoValue> {
    let proto = match value {
        Value::Null => return None,
        Value::Bool(b) => ProtoValue::Bool(*b),
        Value::Int16(v) => ProtoValue::I32(i32::from(*v)),
        Value::Int32(v) | Value::Date(v) => ProtoValue::I32(*v),
        Value::Int64(v) | Value::Timestamp(v) => ProtoValue::I64(*v),
        Value::Float32(v) => ProtoValue::F32(*v),
        Value::Float64(v) => ProtoValue::F64(*v),
        Value::String(s) => ProtoValue::String(s.clone()),
        Value::Bytes(b) => ProtoValue::Bytes(bytes::Bytes::from(b.clone())),
        Value::Array(items) => ProtoValue::List(items.iter().filter_map(to_proto).collect()),
        Value::Map(entries) => ProtoValue::Map(
            entries
                .iter()
                .filter_map(|(k, v)| Some((to_map_key(k)?, to_proto(v)?)))
                .collect::<HashMap<_, _>>(),
        ),
    };
    Some(proto)
}

fn to_map_key(value: &Value) -> Option<MapKey> {
    match value {
        Value::Bool(b) => Some(MapKey::Bool(*b)),
        Value::Int16(v) => Some(MapKey::I32(i32::from(*v))),
        Value::Int32(v) | Value::Date(v) => Some(MapKey::I32(*v)),
        Value::Int64(v) | Value::Timestamp(v) => Some(MapKey::I64(*v)),
        Value::String(s) => Some(MapKey::String(s.clone())),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════
//  prost-reflect → Value
// ═══════════════════════════════════════════════════════════════

pub(crate) fn from_proto(field: &str, ty: ScalarType, value: &ProtoValue) -> Result<Value, SchemaError> {
    let mismatch = || SchemaError::Decode(format!("field '{field}': wire value does not match {ty}"));

    let decoded = match ty {
        ScalarType::Bool => Value::Bool(value.as_bool().ok_or_else(mismatch)?),
        ScalarType::Int16 => {
            let v = value.as_i32().ok_or_else(mismatch)?;
            Value::Int16(i16::try_from(v).map_err(|_| mismatch())?)
        }
        ScalarType::Int32 => Value::Int32(value.as_i32().ok_or_else(mismatch)?),
        ScalarType::Date => Value::Date(value.as_i32().ok_or_else(mismatch)?),
        ScalarType::Int64 => Value::Int64(value.as_i64().ok_or_else(mismatch)?),
        ScalarType::Timestamp => Value::Timestamp(value.as_i64().ok_or_else(mismatch)?),
        ScalarType::Float32 => Value::Float32(value.as_f32().ok_or_else(mismatch)?),
        ScalarType::Float64 => Value::Float64(value.as_f64().ok_or_else(mismatch)?),
        ScalarType::String | ScalarType::Varchar { .. } => {
            Value::String(value.as_str().ok_or_else(mismatch)?.to_string())
        }
        ScalarType::Bytes => Value::Bytes(value.as_bytes().ok_or_else(mismatch)?.to_vec()),
    };
    Ok(decoded)
}

pub(crate) fn from_map_key(field: &str, ty: ScalarType, key: &MapKey) -> Result<Value, SchemaError> {
    let value = match key {
        MapKey::Bool(b) => ProtoValue::Bool(*b),
        MapKey::I32(v) => ProtoValue::I32(*v),
        MapKey::I64(v) => ProtoValue::I64(*v),
        MapKey::U32(v) => ProtoValue::U32(*v),
        MapKey::U64(v) => ProtoValue::U64(*v),
        MapKey::String(s) => ProtoValue::String(s.clone()),
    };
    from_proto(field, ty, &value)
}

pub(crate) fn sort_entries(entries: &mut [(Value, Value)]) {
    entries.sort_by(|a, b| key_cmp(&a.0, &b.0));
}
