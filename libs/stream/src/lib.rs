//! Bounded-concurrency ingestion stream with two-phase acknowledgment.
//!
//! A record is *accepted* once the session admits it into the in-flight
//! window and *durable* once the endpoint reports it persisted. At most
//! `max_inflight_records` records are between submission and resolution
//! at any time.

pub mod config;
pub mod error;
mod dispatcher;
mod handle;
mod inflight;
mod pending;
mod session;
mod writer;

pub use config::{MAX_INFLIGHT_RECORDS, StreamConfig};
pub use dispatcher::AckEvent;
pub use error::StreamError;
pub use handle::{AcceptedAck, DurableAck, DurableFuture, SubmissionHandle};
pub use inflight::{InflightPermit, InflightTracker};
pub use session::{IngestStream, StreamStats};
