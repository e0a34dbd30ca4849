use ingest_api::{ColumnInfo, Field, FieldType, Record, RecordSchema, ScalarType, TableDescription, Value};

use super::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  Table description
// ═══════════════════════════════════════════════════════════════

/// Sensor table used when no description file is given.
pub fn demo_table(table: &str) -> TableDescription {
    let column = |name: &str, type_text: &str, nullable: bool| ColumnInfo {
        name: name.to_string(),
        type_text: type_text.to_string(),
        nullable,
    };
    TableDescription {
        name: table.to_string(),
        columns: vec![
            column("id", "INT", false),
            column("name", "STRING", true),
            column("submit_counter", "INT", false),
        ],
    }
}

/// Read the table description JSON at `path`, or fall back to the demo table.
pub fn load_table(path: Option<&str>, table: &str) -> Result<TableDescription, DriverError> {
    let Some(path) = path else {
        return Ok(demo_table(table));
    };
    let content =
        std::fs::read_to_string(path).map_err(|e| DriverError::Config(format!("cannot read schema {path}: {e}")))?;
    let description = TableDescription::from_json(&content)?;
    if description.name != table {
        tracing::warn!(
            described = %description.name,
            table = %table,
            "schema file describes another table"
        );
    }
    Ok(description)
}

// ═══════════════════════════════════════════════════════════════
//  RNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns f64 in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) as f64)
    }

    pub fn next_intn(&mut self, n: usize) -> usize {
        (self.next_u64() % n.max(1) as u64) as usize
    }
}

// ═══════════════════════════════════════════════════════════════
//  Record generator
// ═══════════════════════════════════════════════════════════════

const NAMES: &[&str] = &["john", "maria", "wei", "amara", "lars", "priya"];

/// Days since epoch for 2024-01-01.
const BASE_DATE: i32 = 19_723;
const DAY_US: i64 = 86_400_000_000;

/// Produces records that satisfy a schema.
///
/// Integer columns carry the record's sequence number (starting at 1), so
/// generated rows are easy to find on the endpoint. Nullable columns are
/// null about one time in ten.
pub struct RecordGenerator {
    fields: Vec<Field>,
    rng: Rng,
    seq: u64,
    now_us: i64,
}

impl RecordGenerator {
    pub fn new(schema: &RecordSchema, seed: i64) -> Self {
        let now_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Self {
            fields: schema.fields.clone(),
            rng: Rng::new(seed),
            seq: 0,
            now_us,
        }
    }

    pub fn next_record(&mut self) -> Record {
        self.seq += 1;
        let fields = std::mem::take(&mut self.fields);
        let mut builder = Record::builder();
        for field in &fields {
            builder = builder.field(field.name.clone(), self.field_value(field));
        }
        self.fields = fields;
        builder.build()
    }

    fn field_value(&mut self, field: &Field) -> Value {
        if field.nullable && self.rng.next_intn(10) == 0 {
            return Value::Null;
        }
        match field.field_type {
            FieldType::Scalar(scalar) => self.scalar(scalar),
            FieldType::Array(element) => {
                let len = self.rng.next_intn(4);
                Value::Array((0..len).map(|_| self.scalar(element)).collect())
            }
            FieldType::Map(key, value) => {
                let len = self.rng.next_intn(4).min(key_space(key));
                Value::Map((0..len).map(|j| (map_key(key, j), self.scalar(value))).collect())
            }
        }
    }

    fn scalar(&mut self, scalar: ScalarType) -> Value {
        match scalar {
            ScalarType::Bool => Value::Bool(self.rng.next_intn(2) == 1),
            ScalarType::Int16 => Value::Int16((self.seq % i16::MAX as u64) as i16),
            ScalarType::Int32 => Value::Int32((self.seq % i32::MAX as u64) as i32),
            ScalarType::Int64 => Value::Int64(self.seq as i64),
            ScalarType::Float32 => Value::Float32((self.rng.next_f64() * 100.0) as f32),
            ScalarType::Float64 => Value::Float64(self.rng.next_f64() * 100.0),
            ScalarType::String => Value::String(self.name().to_string()),
            ScalarType::Varchar { max_len } => {
                Value::String(self.name().chars().take(max_len as usize).collect())
            }
            ScalarType::Bytes => Value::Bytes((0..8).map(|_| self.rng.next_intn(256) as u8).collect()),
            ScalarType::Date => Value::Date(BASE_DATE + self.rng.next_intn(1_000) as i32),
            ScalarType::Timestamp => {
                Value::Timestamp(self.now_us - (self.rng.next_f64() * DAY_US as f64) as i64)
            }
        }
    }

    fn name(&mut self) -> &'static str {
        NAMES[self.rng.next_intn(NAMES.len())]
    }
}

/// How many distinct keys `map_key` can produce for `key`.
fn key_space(key: ScalarType) -> usize {
    match key {
        ScalarType::Bool => 2,
        ScalarType::Varchar { max_len: 0 } => 1,
        _ => usize::MAX,
    }
}

/// The `j`-th map key; distinct for distinct `j` below `key_space`.
fn map_key(key: ScalarType, j: usize) -> Value {
    match key {
        ScalarType::Bool => Value::Bool(j == 1),
        ScalarType::Int16 => Value::Int16(j as i16),
        ScalarType::Int32 => Value::Int32(j as i32),
        ScalarType::Int64 => Value::Int64(j as i64),
        ScalarType::Date => Value::Date(BASE_DATE + j as i32),
        ScalarType::Timestamp => Value::Timestamp(j as i64 * DAY_US),
        ScalarType::Varchar { max_len: 0 } => Value::String(String::new()),
        _ => Value::String(j.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use codec_protobuf::ProtobufRecordEncoder;
    use ingest_api::RecordEncoder;

    use super::*;

    #[test]
    fn rng_is_deterministic_for_a_seed() {
        let mut a = Rng::new(42);
        let mut b = Rng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_intn(1_000), b.next_intn(1_000));
        }
        let f = Rng::new(7).next_f64();
        assert!((0.0..1.0).contains(&f));
    }

    #[test]
    fn demo_records_encode() {
        let table = demo_table("main.default.air_quality");
        let encoder = ProtobufRecordEncoder::from_table(&table).unwrap();
        let mut generator = RecordGenerator::new(encoder.schema(), 1);

        for i in 1..=100 {
            let record = generator.next_record();
            assert_eq!(record.get("id"), Some(&Value::Int32(i)));
            encoder.encode(&record).unwrap();
        }
    }

    #[test]
    fn generated_records_satisfy_every_column_type() {
        let json = r#"{
            "name": "main.default.wide",
            "columns": [
                {"name": "flag", "type_text": "BOOLEAN"},
                {"name": "small", "type_text": "SMALLINT"},
                {"name": "big", "type_text": "BIGINT"},
                {"name": "ratio", "type_text": "FLOAT"},
                {"name": "score", "type_text": "DOUBLE"},
                {"name": "code", "type_text": "VARCHAR(3)"},
                {"name": "blob", "type_text": "BINARY", "nullable": true},
                {"name": "day", "type_text": "DATE"},
                {"name": "at", "type_text": "TIMESTAMP"},
                {"name": "tags", "type_text": "ARRAY<STRING>"},
                {"name": "seen", "type_text": "MAP<BOOLEAN, INT>"},
                {"name": "counts", "type_text": "MAP<VARCHAR(2), BIGINT>", "nullable": true}
            ]
        }"#;
        let table = TableDescription::from_json(json).unwrap();
        let encoder = ProtobufRecordEncoder::from_table(&table).unwrap();
        let mut generator = RecordGenerator::new(encoder.schema(), 99);

        for _ in 0..500 {
            let record = generator.next_record();
            encoder.encode(&record).unwrap();
        }
    }

    #[test]
    fn load_table_reads_description_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        std::fs::write(
            &path,
            r#"{"name": "main.default.t", "columns": [{"name": "id", "type_text": "BIGINT"}]}"#,
        )
        .unwrap();

        let table = load_table(path.to_str(), "main.default.t").unwrap();
        assert_eq!(table.columns.len(), 1);

        let demo = load_table(None, "main.default.t").unwrap();
        assert_eq!(demo.columns.len(), 3);

        assert!(load_table(dir.path().join("absent.json").to_str(), "t").is_err());
    }
}
