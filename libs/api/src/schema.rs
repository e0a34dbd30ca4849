use serde::{Deserialize, Serialize};

use crate::SchemaError;

// ════════════════════════════════════════════════════════════════
//  Scalar Type
// ════════════════════════════════════════════════════════════════

/// Column types of the target table, as the encoder sees them.
///
/// Each maps onto one proto2 scalar:
/// - `Int16`, `Int32`, `Date` → `int32`
/// - `Int64`, `Timestamp` → `int64`
/// - `String`, `Varchar` → `string`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    /// Bounded string, length counted in characters.
    Varchar { max_len: u32 },
    Bytes,
    /// Days since epoch.
    Date,
    /// Microseconds since epoch.
    Timestamp,
}

impl ScalarType {
    /// Whether the type may be used as a protobuf map key.
    pub fn is_map_key(&self) -> bool {
        matches!(
            self,
            ScalarType::Bool
                | ScalarType::Int16
                | ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::String
                | ScalarType::Varchar { .. }
                | ScalarType::Date
                | ScalarType::Timestamp
        )
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Int16 => write!(f, "int16"),
            ScalarType::Int32 => write!(f, "int32"),
            ScalarType::Int64 => write!(f, "int64"),
            ScalarType::Float32 => write!(f, "float32"),
            ScalarType::Float64 => write!(f, "float64"),
            ScalarType::String => write!(f, "string"),
            ScalarType::Varchar { max_len } => write!(f, "varchar({max_len})"),
            ScalarType::Bytes => write!(f, "bytes"),
            ScalarType::Date => write!(f, "date"),
            ScalarType::Timestamp => write!(f, "timestamp"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Field Type
// ════════════════════════════════════════════════════════════════

/// Field type: a scalar, a repeated scalar or a scalar-to-scalar map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Scalar(ScalarType),
    Array(ScalarType),
    Map(ScalarType, ScalarType),
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Scalar(s) => write!(f, "{s}"),
            FieldType::Array(s) => write!(f, "array<{s}>"),
            FieldType::Map(k, v) => write!(f, "map<{k}, {v}>"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Field & RecordSchema
// ════════════════════════════════════════════════════════════════

/// One column of the target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }

    /// Shortcut: non-nullable scalar field.
    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::Scalar(scalar), false)
    }

    /// Shortcut: nullable scalar field.
    pub fn scalar_nullable(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::Scalar(scalar), true)
    }
}

/// Schema of the target table. Field order is the protobuf field numbering
/// (first field = 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub fields: Vec<Field>,
}

impl RecordSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reject empty schemas, duplicate names and map keys protobuf cannot
    /// represent.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Invalid("schema has no fields".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SchemaError::Invalid(format!("field #{} has an empty name", i + 1)));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::Invalid(format!("duplicate field '{}'", field.name)));
            }
            if let FieldType::Map(key, _) = &field.field_type {
                if !key.is_map_key() {
                    return Err(SchemaError::Invalid(format!(
                        "field '{}': {key} cannot be a map key",
                        field.name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  Catalog table description
// ════════════════════════════════════════════════════════════════

/// Column as reported by the catalog service (`columns[]` of the table JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_text: String,
    #[serde(default)]
    pub nullable: bool,
}

/// Table description saved from the catalog service.
///
/// Fetching it is done out of band; the client only reads the JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescription {
    /// Fully-qualified table name, `catalog.schema.table`.
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableDescription {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Invalid(format!("table description: {e}")))
    }

    /// Protobuf message name: the last segment of the table name.
    pub fn message_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn to_schema(&self) -> Result<RecordSchema, SchemaError> {
        let fields = self
            .columns
            .iter()
            .map(|c| Ok(Field::new(c.name.clone(), parse_type_text(&c.type_text)?, c.nullable)))
            .collect::<Result<Vec<_>, SchemaError>>()?;
        let schema = RecordSchema::new(fields);
        schema.validate()?;
        Ok(schema)
    }
}

/// Parse catalog type text (`INT`, `VARCHAR(32)`, `ARRAY<STRING>`,
/// `MAP<STRING, BIGINT>`) into a field type. Case-insensitive.
pub fn parse_type_text(type_text: &str) -> Result<FieldType, SchemaError> {
    let upper = type_text.trim().to_ascii_uppercase();
    let unsupported = || SchemaError::UnsupportedType {
        type_text: type_text.to_string(),
    };

    if let Some(inner) = strip_wrapped(&upper, "ARRAY<", '>') {
        let element = parse_scalar(inner).ok_or_else(unsupported)?;
        return Ok(FieldType::Array(element));
    }

    if let Some(inner) = strip_wrapped(&upper, "MAP<", '>') {
        let (key, value) = inner.split_once(',').ok_or_else(unsupported)?;
        let key = parse_scalar(key).ok_or_else(unsupported)?;
        let value = parse_scalar(value).ok_or_else(unsupported)?;
        return Ok(FieldType::Map(key, value));
    }

    parse_scalar(&upper).map(FieldType::Scalar).ok_or_else(unsupported)
}

fn strip_wrapped<'a>(s: &'a str, prefix: &str, suffix: char) -> Option<&'a str> {
    s.strip_prefix(prefix)?.strip_suffix(suffix)
}

fn parse_scalar(s: &str) -> Option<ScalarType> {
    let s = s.trim();
    let scalar = match s {
        "SMALLINT" | "SHORT" => ScalarType::Int16,
        "INT" | "INTEGER" => ScalarType::Int32,
        "BIGINT" | "LONG" => ScalarType::Int64,
        "FLOAT" => ScalarType::Float32,
        "DOUBLE" => ScalarType::Float64,
        "BOOLEAN" => ScalarType::Bool,
        "STRING" => ScalarType::String,
        "BINARY" => ScalarType::Bytes,
        "DATE" => ScalarType::Date,
        "TIMESTAMP" => ScalarType::Timestamp,
        "VARCHAR" => ScalarType::String,
        _ => {
            let len = strip_wrapped(s, "VARCHAR(", ')')?;
            ScalarType::Varchar {
                max_len: len.trim().parse().ok()?,
            }
        }
    };
    Some(scalar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_type_text() {
        assert_eq!(parse_type_text("int").unwrap(), FieldType::Scalar(ScalarType::Int32));
        assert_eq!(parse_type_text("SHORT").unwrap(), FieldType::Scalar(ScalarType::Int16));
        assert_eq!(parse_type_text("bigint").unwrap(), FieldType::Scalar(ScalarType::Int64));
        assert_eq!(
            parse_type_text("varchar(12)").unwrap(),
            FieldType::Scalar(ScalarType::Varchar { max_len: 12 })
        );
        assert_eq!(
            parse_type_text("array<string>").unwrap(),
            FieldType::Array(ScalarType::String)
        );
        assert_eq!(
            parse_type_text("MAP<STRING, BIGINT>").unwrap(),
            FieldType::Map(ScalarType::String, ScalarType::Int64)
        );
    }

    #[test]
    fn rejects_unsupported_type_text() {
        for text in ["DECIMAL(10,2)", "ARRAY<ARRAY<INT>>", "MAP<STRING>", "STRUCT<a: INT>"] {
            assert!(
                matches!(parse_type_text(text), Err(SchemaError::UnsupportedType { .. })),
                "{text} should be unsupported"
            );
        }
    }

    #[test]
    fn table_description_to_schema() {
        let json = r#"{
            "name": "main.default.air_quality",
            "columns": [
                {"name": "id", "type_text": "int", "nullable": false},
                {"name": "name", "type_text": "string", "nullable": true},
                {"name": "tags", "type_text": "map<string,int>", "nullable": true}
            ]
        }"#;
        let table = TableDescription::from_json(json).unwrap();
        assert_eq!(table.message_name(), "air_quality");

        let schema = table.to_schema().unwrap();
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields[0], Field::scalar("id", ScalarType::Int32));
        assert!(schema.field("name").unwrap().nullable);
    }

    #[test]
    fn schema_validation_catches_bad_layouts() {
        let dup = RecordSchema::new(vec![
            Field::scalar("id", ScalarType::Int32),
            Field::scalar("id", ScalarType::Int64),
        ]);
        assert!(matches!(dup.validate(), Err(SchemaError::Invalid(_))));

        let float_key = RecordSchema::new(vec![Field::new(
            "m",
            FieldType::Map(ScalarType::Float64, ScalarType::Int32),
            true,
        )]);
        assert!(matches!(float_key.validate(), Err(SchemaError::Invalid(_))));

        assert!(RecordSchema::new(vec![]).validate().is_err());
    }
}
