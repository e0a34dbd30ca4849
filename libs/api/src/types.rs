use serde::{Deserialize, Serialize};

use crate::{Record, RecordSchema, SchemaError};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What `submit` does when the in-flight window is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Suspend the caller until a record becomes durable (back-pressure).
    #[default]
    #[serde(alias = "backpressure", alias = "block")]
    BackPressure,
    /// Fail the submission immediately with a backpressure error.
    Reject,
}

// ════════════════════════════════════════════════════════════════
//  EncodedRecord
// ════════════════════════════════════════════════════════════════

/// Wire-ready record bytes, produced by a [`RecordEncoder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedRecord {
    bytes: Vec<u8>,
}

impl EncodedRecord {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ════════════════════════════════════════════════════════════════
//  Encoder seam
// ════════════════════════════════════════════════════════════════

/// Schema-driven record encoder. Stateless: the output depends only on the
/// record and the schema the encoder was built for.
pub trait RecordEncoder: Send + Sync {
    fn schema(&self) -> &RecordSchema;

    /// Validate and serialize one record.
    fn encode(&self, record: &Record) -> Result<EncodedRecord, SchemaError>;

    /// Inverse of `encode`, for inspection and tests.
    fn decode(&self, bytes: &[u8]) -> Result<Record, SchemaError>;
}
