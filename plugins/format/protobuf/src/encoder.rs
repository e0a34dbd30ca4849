use ingest_api::{EncodedRecord, FieldType, Record, RecordEncoder, RecordSchema, SchemaError, TableDescription, Value};
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};

use crate::convert::{canonical_field, from_map_key, from_proto, sort_entries, to_proto};
use crate::descriptor::build_descriptor;

/// Proto2 encoder for one table schema.
///
/// The descriptor is built once at construction; `encode` and `decode`
/// share it and keep no other state.
pub struct ProtobufRecordEncoder {
    schema: RecordSchema,
    descriptor: MessageDescriptor,
}

impl ProtobufRecordEncoder {
    pub fn new(message_name: &str, schema: RecordSchema) -> Result<Self, SchemaError> {
        let descriptor = build_descriptor(message_name, &schema)?;
        tracing::debug!(
            message = %descriptor.full_name(),
            fields = schema.fields.len(),
            "protobuf descriptor built"
        );
        Ok(Self { schema, descriptor })
    }

    /// Encoder for a catalog table description.
    pub fn from_table(table: &TableDescription) -> Result<Self, SchemaError> {
        Self::new(table.message_name(), table.to_schema()?)
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Validate `record` and return its canonical form: every schema field
    /// present, in schema order, with the value variant of the column type.
    ///
    /// `decode(encode(r))` equals `canonicalize(r)`.
    pub fn canonicalize(&self, record: &Record) -> Result<Record, SchemaError> {
        if let Some((unknown, _)) = record.iter().find(|(name, _)| self.schema.field(name).is_none()) {
            return Err(SchemaError::UnknownField {
                field: unknown.to_string(),
            });
        }

        let mut builder = Record::builder();
        for field in &self.schema.fields {
            let value = canonical_field(field, record.get(&field.name))?;
            builder = builder.field(field.name.clone(), value);
        }
        Ok(builder.build())
    }
}

impl RecordEncoder for ProtobufRecordEncoder {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn encode(&self, record: &Record) -> Result<EncodedRecord, SchemaError> {
        let canonical = self.canonicalize(record)?;
        let mut message = DynamicMessage::new(self.descriptor.clone());

        for (i, (name, value)) in canonical.iter().enumerate() {
            let Some(proto) = to_proto(value) else { continue };
            let field = self
                .descriptor
                .get_field(i as u32 + 1)
                .ok_or_else(|| SchemaError::Invalid(format!("field '{name}' missing from descriptor")))?;
            message
                .try_set_field(&field, proto)
                .map_err(|e| SchemaError::Invalid(format!("field '{name}': {e}")))?;
        }

        Ok(EncodedRecord::from_bytes(message.encode_to_vec()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record, SchemaError> {
        let message = DynamicMessage::decode(self.descriptor.clone(), bytes)
            .map_err(|e| SchemaError::Decode(format!("{}: {e}", self.descriptor.full_name())))?;

        let mut builder = Record::builder();
        for (i, field) in self.schema.fields.iter().enumerate() {
            let desc = self
                .descriptor
                .get_field(i as u32 + 1)
                .ok_or_else(|| SchemaError::Decode(format!("field '{}' missing from descriptor", field.name)))?;
            let present = message.has_field(&desc);
            let raw = message.get_field(&desc);

            let value = match &field.field_type {
                FieldType::Scalar(_) if !present && !field.nullable => {
                    return Err(SchemaError::Decode(format!("required field '{}' is absent", field.name)));
                }
                FieldType::Scalar(_) if !present => Value::Null,
                FieldType::Scalar(ty) => from_proto(&field.name, *ty, &raw)?,

                FieldType::Array(ty) => {
                    let items = raw
                        .as_list()
                        .ok_or_else(|| SchemaError::Decode(format!("field '{}' is not a list", field.name)))?
                        .iter()
                        .map(|v| from_proto(&field.name, *ty, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    match (items.is_empty(), field.nullable) {
                        (true, true) => Value::Null,
                        _ => Value::Array(items),
                    }
                }

                FieldType::Map(key_ty, value_ty) => {
                    let mut entries = raw
                        .as_map()
                        .ok_or_else(|| SchemaError::Decode(format!("field '{}' is not a map", field.name)))?
                        .iter()
                        .map(|(k, v)| {
                            Ok((
                                from_map_key(&field.name, *key_ty, k)?,
                                from_proto(&field.name, *value_ty, v)?,
                            ))
                        })
                        .collect::<Result<Vec<_>, SchemaError>>()?;
                    sort_entries(&mut entries);
                    match (entries.is_empty(), field.nullable) {
                        (true, true) => Value::Null,
                        _ => Value::Map(entries),
                    }
                }
            };
            builder = builder.field(field.name.clone(), value);
        }
        Ok(builder.build())
    }
}

impl std::fmt::Debug for ProtobufRecordEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtobufRecordEncoder")
            .field("message", &self.descriptor.full_name())
            .field("fields", &self.schema.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ingest_api::{Field, ScalarType};

    use super::*;

    fn demo_schema() -> RecordSchema {
        RecordSchema::new(vec![
            Field::scalar("id", ScalarType::Int32),
            Field::scalar_nullable("name", ScalarType::String),
            Field::scalar("submit_counter", ScalarType::Int32),
        ])
    }

    fn wide_schema() -> RecordSchema {
        RecordSchema::new(vec![
            Field::scalar("id", ScalarType::Int64),
            Field::scalar("small", ScalarType::Int16),
            Field::scalar_nullable("ratio", ScalarType::Float32),
            Field::scalar_nullable("score", ScalarType::Float64),
            Field::scalar("active", ScalarType::Bool),
            Field::scalar_nullable("code", ScalarType::Varchar { max_len: 8 }),
            Field::scalar_nullable("blob", ScalarType::Bytes),
            Field::scalar("day", ScalarType::Date),
            Field::scalar("at", ScalarType::Timestamp),
            Field::new("tags", FieldType::Array(ScalarType::String), true),
            Field::new("counts", FieldType::Map(ScalarType::String, ScalarType::Int64), true),
        ])
    }

    #[test]
    fn round_trips_demo_record() {
        let encoder = ProtobufRecordEncoder::new("air_quality", demo_schema()).unwrap();
        let record = Record::builder()
            .field("id", 7)
            .field("name", "sensor-7")
            .field("submit_counter", 3)
            .build();

        let bytes = encoder.encode(&record).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(encoder.decode(bytes.as_bytes()).unwrap(), record);
    }

    #[test]
    fn round_trips_every_column_type() {
        let encoder = ProtobufRecordEncoder::new("wide", wide_schema()).unwrap();
        let record = Record::builder()
            .field("id", 1_i64 << 40)
            .field("small", -12_i16)
            .field("ratio", 0.25_f32)
            .field("score", None::<f64>)
            .field("active", true)
            .field("code", "AB-12")
            .field("blob", vec![0u8, 1, 255])
            .field("day", Value::Date(19_000))
            .field("at", Value::Timestamp(1_700_000_000_000_000))
            .field("tags", Value::Array(vec!["x".into(), "y".into()]))
            .field(
                "counts",
                Value::Map(vec![
                    (Value::String("b".into()), Value::Int64(2)),
                    (Value::String("a".into()), Value::Int64(1)),
                ]),
            )
            .build();

        let bytes = encoder.encode(&record).unwrap();
        let decoded = encoder.decode(bytes.as_bytes()).unwrap();
        assert_eq!(decoded, encoder.canonicalize(&record).unwrap());
        assert_eq!(
            decoded.get("counts"),
            Some(&Value::Map(vec![
                (Value::String("a".into()), Value::Int64(1)),
                (Value::String("b".into()), Value::Int64(2)),
            ]))
        );
        assert_eq!(decoded.get("score"), Some(&Value::Null));
    }

    #[test]
    fn canonical_form_fills_absent_nullable_fields() {
        let encoder = ProtobufRecordEncoder::new("air_quality", demo_schema()).unwrap();
        let record = Record::builder().field("submit_counter", 1).field("id", 2).build();

        let canonical = encoder.canonicalize(&record).unwrap();
        let names: Vec<_> = canonical.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["id", "name", "submit_counter"]);
        assert_eq!(canonical.get("name"), Some(&Value::Null));

        let bytes = encoder.encode(&record).unwrap();
        assert_eq!(encoder.decode(bytes.as_bytes()).unwrap(), canonical);
    }

    #[test]
    fn rejects_invalid_records() {
        let encoder = ProtobufRecordEncoder::new("air_quality", demo_schema()).unwrap();

        let missing = Record::builder().field("name", "x").field("submit_counter", 1).build();
        assert_eq!(
            encoder.encode(&missing).unwrap_err(),
            SchemaError::MissingField { field: "id".into() }
        );

        let unknown = Record::builder()
            .field("id", 1)
            .field("submit_counter", 1)
            .field("colour", "red")
            .build();
        assert!(matches!(
            encoder.encode(&unknown),
            Err(SchemaError::UnknownField { field }) if field == "colour"
        ));

        let wrong = Record::builder().field("id", "one").field("submit_counter", 1).build();
        assert!(matches!(encoder.encode(&wrong), Err(SchemaError::WrongType { .. })));

        let overflow = Record::builder()
            .field("id", i64::from(i32::MAX) + 1)
            .field("submit_counter", 1)
            .build();
        assert!(matches!(encoder.encode(&overflow), Err(SchemaError::OutOfRange { .. })));
    }

    #[test]
    fn rejects_duplicate_map_keys_and_long_varchar() {
        let encoder = ProtobufRecordEncoder::new("wide", wide_schema()).unwrap();
        let base = || {
            Record::builder()
                .field("id", 1_i64)
                .field("small", 1_i16)
                .field("active", false)
                .field("day", Value::Date(0))
                .field("at", Value::Timestamp(0))
        };

        let dup = base()
            .field(
                "counts",
                Value::Map(vec![
                    (Value::String("k".into()), Value::Int64(1)),
                    (Value::String("k".into()), Value::Int64(2)),
                ]),
            )
            .build();
        assert!(matches!(encoder.encode(&dup), Err(SchemaError::DuplicateKey { .. })));

        let long = base().field("code", "much-too-long").build();
        assert!(matches!(encoder.encode(&long), Err(SchemaError::OutOfRange { .. })));
    }

    #[test]
    fn decode_reports_garbage_and_missing_required() {
        let encoder = ProtobufRecordEncoder::new("air_quality", demo_schema()).unwrap();
        assert!(matches!(encoder.decode(&[0xff, 0xff, 0xff]), Err(SchemaError::Decode(_))));

        let empty = DynamicMessage::new(encoder.descriptor().clone()).encode_to_vec();
        assert!(matches!(encoder.decode(&empty), Err(SchemaError::Decode(msg)) if msg.contains("'id'")));
    }

    #[test]
    fn builds_from_table_description() {
        let table = TableDescription::from_json(
            r#"{"name": "main.default.air_quality", "columns": [
                {"name": "id", "type_text": "INT", "nullable": false},
                {"name": "name", "type_text": "STRING", "nullable": true}
            ]}"#,
        )
        .unwrap();
        let encoder = ProtobufRecordEncoder::from_table(&table).unwrap();
        assert_eq!(encoder.descriptor().full_name(), "ingest.air_quality");
        assert_eq!(encoder.schema().fields.len(), 2);
    }
}
