use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use ingest_api::{Ack, AckSource, Connection, OpenRequest, RecordSink, Transport, TransportError, TransportFuture};

// ═══════════════════════════════════════════════════════════════
//  MemoryTransportConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

fn default_ack_every() -> u64 {
    1_000
}

/// When the endpoint reports durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AckMode {
    /// Durable ack after every `every` records and on each flush.
    Auto {
        #[serde(default = "default_ack_every")]
        every: u64,
    },
    /// Only the controller methods produce acks.
    Manual,
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::Auto {
            every: default_ack_every(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryTransportConfig {
    #[serde(default)]
    pub ack_mode: AckMode,
    /// Records kept per table; the oldest are dropped first.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Fail every `open` (connection-failure testing).
    #[serde(default)]
    pub refuse_connections: bool,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::default(),
            max_records: default_max_records(),
            refuse_connections: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransport
// ═══════════════════════════════════════════════════════════════

/// A record the endpoint has stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub stream_id: String,
    pub offset: u64,
    pub payload: Vec<u8>,
}

type AckTx = mpsc::UnboundedSender<Result<Ack, TransportError>>;

struct StreamSlot {
    table: String,
    acks: AckTx,
    highest_received: Option<u64>,
    durable: Option<u64>,
    since_ack: u64,
}

impl StreamSlot {
    /// Report everything received so far as durable, if not already.
    fn ack_received(&mut self) {
        let Some(highest) = self.highest_received else { return };
        if self.durable.is_some_and(|d| d >= highest) {
            return;
        }
        self.durable = Some(highest);
        self.since_ack = 0;
        let _ = self.acks.send(Ok(Ack::Durable { up_to_offset: highest }));
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, VecDeque<StoredRecord>>,
    streams: HashMap<String, StreamSlot>,
}

struct Inner {
    config: MemoryTransportConfig,
    state: Mutex<State>,
    next_stream: AtomicU64,
    received: AtomicU64,
}

/// In-process ingestion endpoint.
///
/// Clones share the same tables and streams, so a test can keep one clone
/// as a controller while the session owns another.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn new(config: MemoryTransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                next_stream: AtomicU64::new(1),
                received: AtomicU64::new(0),
            }),
        }
    }

    /// Endpoint that only acknowledges when told to.
    pub fn manual() -> Self {
        Self::new(MemoryTransportConfig {
            ack_mode: AckMode::Manual,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &MemoryTransportConfig {
        &self.inner.config
    }

    // ── Controller ──

    /// Report every record of `stream_id` with offset <= `up_to_offset` as durable.
    pub async fn ack_durable(&self, stream_id: &str, up_to_offset: u64) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        let slot = open_slot(&mut state, stream_id)?;
        slot.durable = Some(slot.durable.map_or(up_to_offset, |d| d.max(up_to_offset)));
        slot.acks
            .send(Ok(Ack::Durable { up_to_offset }))
            .map_err(|_| TransportError::io(format!("stream {stream_id}: ack receiver dropped")))
    }

    /// Report everything `stream_id` has received as durable.
    pub async fn ack_received(&self, stream_id: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        open_slot(&mut state, stream_id)?.ack_received();
        Ok(())
    }

    /// Refuse one record.
    pub async fn reject(&self, stream_id: &str, offset: u64, reason: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        let slot = open_slot(&mut state, stream_id)?;
        slot.acks
            .send(Ok(Ack::Rejected {
                offset,
                reason: reason.to_string(),
            }))
            .map_err(|_| TransportError::io(format!("stream {stream_id}: ack receiver dropped")))
    }

    /// Drop the stream as if the connection broke.
    pub async fn disconnect(&self, stream_id: &str, message: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        let slot = state
            .streams
            .remove(stream_id)
            .ok_or_else(|| TransportError::new(format!("stream {stream_id} is not open")))?;
        tracing::info!(stream_id, table = %slot.table, "memory endpoint: disconnecting stream");
        let _ = slot.acks.send(Err(TransportError::io(message.to_string())));
        Ok(())
    }

    /// Records stored for `table`, oldest first.
    pub async fn stored(&self, table: &str) -> Vec<StoredRecord> {
        let state = self.inner.state.lock().await;
        state
            .tables
            .get(table)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total records received across every stream.
    pub fn received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    /// Identifiers of the streams currently open.
    pub async fn open_streams(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<String> = state.streams.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryTransportConfig::default())
    }
}

fn open_slot<'a>(state: &'a mut State, stream_id: &str) -> Result<&'a mut StreamSlot, TransportError> {
    state
        .streams
        .get_mut(stream_id)
        .ok_or_else(|| TransportError::new(format!("stream {stream_id} is not open")))
}

impl Transport for MemoryTransport {
    fn open(&self, request: OpenRequest) -> TransportFuture<'_, Connection> {
        Box::pin(async move {
            if self.inner.config.refuse_connections {
                return Err(TransportError::io(format!(
                    "memory endpoint refused connection for table {}",
                    request.table
                )));
            }
            request
                .schema
                .validate()
                .map_err(|e| TransportError::config(format!("table {}: {e}", request.table)))?;

            let stream_id = format!("mem-{}", self.inner.next_stream.fetch_add(1, Ordering::Relaxed));
            let (ack_tx, ack_rx) = mpsc::unbounded_channel();

            let mut state = self.inner.state.lock().await;
            state.tables.entry(request.table.clone()).or_default();
            state.streams.insert(
                stream_id.clone(),
                StreamSlot {
                    table: request.table.clone(),
                    acks: ack_tx,
                    highest_received: None,
                    durable: None,
                    since_ack: 0,
                },
            );
            drop(state);

            tracing::info!(stream_id = %stream_id, table = %request.table, "memory endpoint: stream opened");

            Ok(Connection {
                stream_id: stream_id.clone(),
                sink: Box::new(MemorySink {
                    inner: self.inner.clone(),
                    stream_id,
                    table: request.table,
                }),
                acks: Box::new(MemoryAckSource { rx: ack_rx }),
            })
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Connection halves
// ═══════════════════════════════════════════════════════════════

struct MemorySink {
    inner: Arc<Inner>,
    stream_id: String,
    table: String,
}

impl RecordSink for MemorySink {
    fn send(&mut self, offset: u64, payload: &[u8]) -> TransportFuture<'_, ()> {
        let payload = payload.to_vec();
        Box::pin(async move {
            let mut state = self.inner.state.lock().await;
            let State { tables, streams } = &mut *state;

            let slot = streams
                .get_mut(&self.stream_id)
                .ok_or_else(|| TransportError::io(format!("stream {} is not open", self.stream_id)))?;

            let records = tables.entry(self.table.clone()).or_default();
            if records.len() >= self.inner.config.max_records {
                records.pop_front();
            }
            records.push_back(StoredRecord {
                stream_id: self.stream_id.clone(),
                offset,
                payload,
            });
            self.inner.received.fetch_add(1, Ordering::Relaxed);

            slot.highest_received = Some(offset);
            slot.since_ack += 1;
            if let AckMode::Auto { every } = self.inner.config.ack_mode {
                if slot.since_ack >= every.max(1) {
                    slot.ack_received();
                }
            }
            Ok(())
        })
    }

    fn flush(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.inner.state.lock().await;
            let slot = state
                .streams
                .get_mut(&self.stream_id)
                .ok_or_else(|| TransportError::io(format!("stream {} is not open", self.stream_id)))?;
            if matches!(self.inner.config.ack_mode, AckMode::Auto { .. }) {
                slot.ack_received();
            }
            Ok(())
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.inner.state.lock().await;
            if state.streams.remove(&self.stream_id).is_some() {
                tracing::info!(stream_id = %self.stream_id, table = %self.table, "memory endpoint: stream closed");
            }
            Ok(())
        })
    }
}

struct MemoryAckSource {
    rx: mpsc::UnboundedReceiver<Result<Ack, TransportError>>,
}

impl AckSource for MemoryAckSource {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Ack, TransportError>>> + Send + '_>> {
        Box::pin(self.rx.recv())
    }
}
