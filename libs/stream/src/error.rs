use ingest_api::SchemaError;

/// Errors surfaced by an ingestion stream and its submission handles.
///
/// `Clone` so one connection failure can be delivered to every outstanding
/// handle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("open stream for table '{table}': {message}")]
    Connection { table: String, message: String },

    #[error("record rejected by encoder: {0}")]
    SchemaValidation(#[from] SchemaError),

    #[error("in-flight window full ({max_inflight} records)")]
    Backpressure { max_inflight: usize },

    #[error("flush timed out after {timeout_ms}ms, {pending} records still pending")]
    FlushTimeout { timeout_ms: u64, pending: usize },

    #[error("stream is closed")]
    StreamClosed,

    #[error("stream closed with {unacknowledged} records never acknowledged")]
    Close { unacknowledged: usize },

    #[error("connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("record {offset} rejected by endpoint: {reason}")]
    Rejected { offset: u64, reason: String },

    #[error("transport: {message}")]
    Transport { message: String },

    #[error("invalid stream config: {0}")]
    Config(String),
}
