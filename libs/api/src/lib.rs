//! Shared types for the ingestion client: record values, table schemas,
//! the transport seam and the encoder seam.
//!
//! Nothing in this crate depends on tokio. Transports and encoders live in
//! their own crates and only implement the traits declared here.

pub mod error;
pub mod schema;
pub mod transport;
pub mod types;
pub mod value;

pub use error::{ErrorKind, SchemaError, TransportError};
pub use schema::{ColumnInfo, Field, FieldType, RecordSchema, ScalarType, TableDescription};
pub use transport::{
    Ack, AckSource, Connection, Framing, OpenRequest, RecordSink, Transport, TransportFuture,
};
pub use types::{EncodedRecord, OverflowPolicy, RecordEncoder};
pub use value::{Record, RecordBuilder, Value};
