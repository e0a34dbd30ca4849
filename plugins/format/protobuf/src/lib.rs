//! Protobuf (proto2) record encoder.
//!
//! The message descriptor is generated at runtime from a [`RecordSchema`],
//! so tables described by the catalog need no offline `protoc` step.
//!
//! [`RecordSchema`]: ingest_api::RecordSchema

mod convert;
mod descriptor;
mod encoder;

pub use descriptor::build_descriptor;
pub use encoder::ProtobufRecordEncoder;
