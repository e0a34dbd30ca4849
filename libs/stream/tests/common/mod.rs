#![allow(dead_code)]

use std::time::Duration;

use codec_protobuf::ProtobufRecordEncoder;
use ingest_api::{EncodedRecord, Field, OpenRequest, Record, RecordEncoder, RecordSchema, ScalarType};
use transport_memory::MemoryTransport;

pub const TABLE: &str = "main.default.air_quality";

/// Upper bound for anything that is expected to happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// Long enough to be sure something is *not* happening.
pub const QUIET: Duration = Duration::from_millis(100);

pub fn schema() -> RecordSchema {
    RecordSchema::new(vec![
        Field::scalar("id", ScalarType::Int32),
        Field::scalar_nullable("name", ScalarType::String),
        Field::scalar("submit_counter", ScalarType::Int32),
    ])
}

pub fn request() -> OpenRequest {
    OpenRequest {
        table: TABLE.to_string(),
        schema: schema(),
    }
}

pub fn encoder() -> ProtobufRecordEncoder {
    ProtobufRecordEncoder::new("air_quality", schema()).expect("demo schema is valid")
}

pub fn record(i: i32) -> Record {
    Record::builder()
        .field("id", i)
        .field("name", format!("sensor-{i}"))
        .field("submit_counter", i)
        .build()
}

pub fn encoded(i: i32) -> EncodedRecord {
    encoder().encode(&record(i)).expect("demo record is valid")
}

/// Wait until the endpoint has received `n` records in total.
pub async fn wait_received(transport: &MemoryTransport, n: u64) {
    tokio::time::timeout(WAIT, async {
        while transport.received() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("records reached the endpoint");
}
