use ingest_api::{SchemaError, TransportError};
use ingest_stream::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Stream(#[from] StreamError),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{failed} of {total} records did not become durable")]
    Incomplete { failed: u64, total: u64 },
}
