use std::future::Future;
use std::pin::Pin;

use crate::{RecordSchema, TransportError};

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Stream open
// ════════════════════════════════════════════════════════════════

/// Request to open one ingestion stream against one table.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub table: String,
    pub schema: RecordSchema,
}

/// Acknowledgment sent by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Every record with offset <= `up_to_offset` is persisted.
    /// Offsets reported by one stream never decrease.
    Durable { up_to_offset: u64 },
    /// The endpoint refused one record; it will never become durable.
    Rejected { offset: u64, reason: String },
}

/// An open stream: an outbound record path and an inbound ack path.
///
/// The two halves are driven by different tasks.
pub struct Connection {
    /// Identifier assigned by the endpoint.
    pub stream_id: String,
    pub sink: Box<dyn RecordSink>,
    pub acks: Box<dyn AckSource>,
}

// ════════════════════════════════════════════════════════════════
//  Transport traits
// ════════════════════════════════════════════════════════════════

/// Connection factory for one ingestion endpoint.
///
/// Implementations: in-process memory endpoint, TCP endpoint.
pub trait Transport: Send + Sync {
    /// Open a stream. Failure is fatal to this attempt; no retry is implied.
    fn open(&self, request: OpenRequest) -> TransportFuture<'_, Connection>;
}

/// Outbound half of a connection.
pub trait RecordSink: Send {
    /// Hand one record to the endpoint. Returning `Ok` means the bytes left
    /// the client, not that they are durable.
    fn send(&mut self, offset: u64, payload: &[u8]) -> TransportFuture<'_, ()>;

    /// Ask the endpoint to persist everything sent so far.
    fn flush(&mut self) -> TransportFuture<'_, ()>;

    /// Graceful end of stream.
    fn close(&mut self) -> TransportFuture<'_, ()>;
}

/// Inbound half of a connection.
pub trait AckSource: Send {
    /// Next acknowledgment. `None` = the endpoint ended the stream.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Ack, TransportError>>> + Send + '_>>;
}

/// Framing: message boundaries in a byte stream.
///
/// Implementations are stateless: buffering belongs to the caller, so one
/// framing instance can serve both halves of a connection.
pub trait Framing: Send + Sync {
    /// Extract one frame from `buf`.
    /// Returns `(frame, bytes_consumed)` or `None` if the frame is incomplete.
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, TransportError>;

    /// Append one framed payload to `buf`.
    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), TransportError>;
}
