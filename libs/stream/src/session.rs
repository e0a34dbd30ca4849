use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::{EncodedRecord, OpenRequest, OverflowPolicy, Record, RecordEncoder, Transport};

use crate::StreamError;
use crate::config::StreamConfig;
use crate::dispatcher::{AckEvent, spawn_dispatcher};
use crate::handle::{AcceptedAck, SubmissionHandle};
use crate::inflight::{InflightPermit, InflightTracker};
use crate::pending::PendingTable;
use crate::writer::{Outbound, spawn_writer};

// ═══════════════════════════════════════════════════════════════
//  Shared state (session + writer + dispatcher)
// ═══════════════════════════════════════════════════════════════

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;
const FAILED: u8 = 3;

pub(crate) struct StreamState {
    phase: AtomicU8,
    failure: OnceLock<String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(OPEN),
            failure: OnceLock::new(),
        }
    }

    /// Error for an operation that needs an open stream, if it is not.
    fn check_open(&self) -> Result<(), StreamError> {
        match self.phase.load(Ordering::Acquire) {
            OPEN => Ok(()),
            FAILED => Err(self.lost()),
            _ => Err(StreamError::StreamClosed),
        }
    }

    pub(crate) fn lost(&self) -> StreamError {
        StreamError::ConnectionLost {
            message: self.failure.get().cloned().unwrap_or_default(),
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.phase.load(Ordering::Acquire) == FAILED
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CLOSED
    }

    fn transition(&self, from: &[u8], to: u8) -> bool {
        self.phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |phase| {
                from.contains(&phase).then_some(to)
            })
            .is_ok()
    }
}

#[derive(Default)]
pub(crate) struct Stats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    durable: AtomicU64,
    failed: AtomicU64,
}

impl Stats {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_durable(&self, n: usize) {
        self.durable.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, n: usize) {
        self.failed.fetch_add(n as u64, Ordering::Relaxed);
    }
}

pub(crate) struct Shared {
    pub(crate) stream_id: String,
    pub(crate) table: String,
    pub(crate) state: StreamState,
    pub(crate) pending: PendingTable,
    pub(crate) tracker: InflightTracker,
    pub(crate) stats: Stats,
}

impl Shared {
    /// The connection is gone: mark the stream failed, wake blocked
    /// submitters and fail every outstanding record.
    pub(crate) async fn fail(&self, message: String) -> StreamError {
        let _ = self.state.failure.set(message);
        if self.state.transition(&[OPEN, CLOSING], FAILED) {
            tracing::error!(stream_id = %self.stream_id, table = %self.table, "stream failed");
        }
        self.tracker.close();

        let err = self.state.lost();
        let failed = self.pending.fail_all(err.clone()).await;
        self.stats.record_failed(failed);
        if failed > 0 {
            tracing::warn!(stream_id = %self.stream_id, pending = failed, "outstanding records failed");
        }
        err
    }
}

// ═══════════════════════════════════════════════════════════════
//  IngestStream
// ═══════════════════════════════════════════════════════════════

/// Counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub submitted: u64,
    pub accepted: u64,
    pub durable: u64,
    pub failed: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

/// One open ingestion session against one table.
///
/// `submit` may be called concurrently through `&self`. Records reach the
/// transport in offset order. `close` consumes the stream, so it runs once.
pub struct IngestStream {
    shared: Arc<Shared>,
    config: StreamConfig,
    next_offset: Mutex<u64>,
    outbound: mpsc::Sender<Outbound>,
    token: CancellationToken,
    writer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl IngestStream {
    /// Open a stream. A connection failure is final for this attempt.
    pub async fn open(
        transport: &dyn Transport,
        request: OpenRequest,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        Self::open_inner(transport, request, config, None).await
    }

    /// Like [`open`](Self::open), delivering every acknowledgment to `listener`.
    ///
    /// The channel is unbounded so a slow listener never stalls ack processing.
    pub async fn open_with_listener(
        transport: &dyn Transport,
        request: OpenRequest,
        config: StreamConfig,
        listener: mpsc::UnboundedSender<AckEvent>,
    ) -> Result<Self, StreamError> {
        Self::open_inner(transport, request, config, Some(listener)).await
    }

    async fn open_inner(
        transport: &dyn Transport,
        request: OpenRequest,
        config: StreamConfig,
        listener: Option<mpsc::UnboundedSender<AckEvent>>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let table = request.table.clone();

        let conn = transport
            .open(request)
            .await
            .map_err(|e| StreamError::Connection {
                table: table.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(
            stream_id = %conn.stream_id,
            table = %table,
            max_inflight = config.max_inflight_records,
            overflow = ?config.overflow,
            "stream opened"
        );

        let shared = Arc::new(Shared {
            stream_id: conn.stream_id,
            table,
            state: StreamState::new(),
            pending: PendingTable::new(),
            tracker: InflightTracker::new(config.max_inflight_records),
            stats: Stats::default(),
        });

        // Every queued record holds a permit; the extra room is for flush and close.
        let (outbound, rx) = mpsc::channel(config.max_inflight_records.saturating_add(2));
        let token = CancellationToken::new();
        let writer = spawn_writer(conn.sink, rx, shared.clone(), token.clone());
        let dispatcher = spawn_dispatcher(conn.acks, shared.clone(), listener, token.clone());

        Ok(Self {
            shared,
            config,
            next_offset: Mutex::new(0),
            outbound,
            token,
            writer: Some(writer),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    pub fn table(&self) -> &str {
        &self.shared.table
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.shared.tracker.in_flight()
    }

    pub fn stats(&self) -> StreamStats {
        let stats = &self.shared.stats;
        StreamStats {
            submitted: stats.submitted.load(Ordering::Relaxed),
            accepted: stats.accepted.load(Ordering::Relaxed),
            durable: stats.durable.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            in_flight: self.shared.tracker.in_flight(),
            peak_in_flight: self.shared.tracker.peak(),
        }
    }

    // ── Submission ──

    /// Submit one encoded record.
    ///
    /// With `OverflowPolicy::BackPressure` this waits for capacity; with
    /// `Reject` a full window fails with `Backpressure`.
    pub async fn submit(&self, record: EncodedRecord) -> Result<SubmissionHandle, StreamError> {
        match self.config.overflow {
            OverflowPolicy::BackPressure => {
                self.shared.state.check_open()?;
                let permit = self
                    .shared
                    .tracker
                    .acquire()
                    .await
                    .map_err(|_| self.closed_error())?;
                self.enqueue(record, permit).await
            }
            OverflowPolicy::Reject => self.try_submit(record).await,
        }
    }

    /// Submit without waiting for capacity, whatever the overflow policy.
    pub async fn try_submit(&self, record: EncodedRecord) -> Result<SubmissionHandle, StreamError> {
        self.shared.state.check_open()?;
        let permit = self.shared.tracker.try_acquire().map_err(|e| match e {
            StreamError::Backpressure { .. } => e,
            _ => self.closed_error(),
        })?;
        self.enqueue(record, permit).await
    }

    /// Encode `record` with `encoder`, then submit it. An invalid record
    /// fails here and never takes capacity.
    pub async fn submit_record(
        &self,
        encoder: &dyn RecordEncoder,
        record: &Record,
    ) -> Result<SubmissionHandle, StreamError> {
        let encoded = encoder.encode(record)?;
        self.submit(encoded).await
    }

    async fn enqueue(&self, record: EncodedRecord, permit: InflightPermit) -> Result<SubmissionHandle, StreamError> {
        let mut next_offset = self.next_offset.lock().await;
        let offset = *next_offset;

        let (accepted_tx, accepted_rx) = oneshot::channel();
        let (durable_tx, durable_rx) = oneshot::channel();
        self.shared.pending.insert(offset, durable_tx, permit).await;

        // A failure racing with the insert may have missed this record.
        if let Err(e) = self.shared.state.check_open() {
            self.shared.pending.fail(offset, e.clone()).await;
            return Err(e);
        }

        let msg = Outbound::Record {
            offset,
            payload: record.into_bytes(),
        };
        if self.outbound.send(msg).await.is_err() {
            let e = self.closed_error();
            self.shared.pending.fail(offset, e.clone()).await;
            return Err(e);
        }

        // Admitted: capacity held, offset assigned, queued for the writer.
        let _ = accepted_tx.send(Ok(AcceptedAck { offset }));
        *next_offset += 1;
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.record_accepted();
        tracing::trace!(stream_id = %self.shared.stream_id, offset, "record submitted");
        Ok(SubmissionHandle::new(offset, accepted_rx, durable_rx))
    }

    // ── Flush / close ──

    /// Wait until every record submitted before this call is durable or
    /// failed. A second flush with nothing new submitted returns at once.
    pub async fn flush(&self) -> Result<(), StreamError> {
        if self.shared.state.is_failed() {
            return Err(self.shared.state.lost());
        }
        if self.shared.state.is_closed() {
            return Err(StreamError::StreamClosed);
        }

        let Some(target) = self.next_offset.lock().await.checked_sub(1) else {
            return Ok(());
        };
        if self.shared.pending.count_through(target).await == 0 {
            return Ok(());
        }

        tracing::debug!(stream_id = %self.shared.stream_id, through = target, "flushing");
        let (done_tx, done_rx) = oneshot::channel();
        self.outbound
            .send(Outbound::Flush { done: done_tx })
            .await
            .map_err(|_| self.closed_error())?;

        let drain = async {
            done_rx.await.unwrap_or(Err(StreamError::StreamClosed))?;
            self.shared.pending.wait_drained_through(target).await;
            Ok::<(), StreamError>(())
        };

        match tokio::time::timeout(self.config.flush_timeout(), drain).await {
            Ok(result) => result?,
            Err(_) => {
                let pending = self.shared.pending.count_through(target).await;
                tracing::warn!(stream_id = %self.shared.stream_id, pending, "flush timed out");
                return Err(StreamError::FlushTimeout {
                    timeout_ms: self.config.flush_timeout_ms,
                    pending,
                });
            }
        }

        if self.shared.state.is_failed() {
            return Err(self.shared.state.lost());
        }
        Ok(())
    }

    /// Drain and release the stream.
    ///
    /// Outstanding records get one flush, bounded by the flush timeout.
    /// Whatever is still pending after that fails with `StreamClosed` and
    /// the call returns `Close { unacknowledged }`.
    pub async fn close(mut self) -> Result<(), StreamError> {
        let was_open = self.shared.state.transition(&[OPEN], CLOSING);
        let drained = if was_open { self.flush().await } else { Ok(()) };
        if let Err(e) = &drained {
            tracing::warn!(stream_id = %self.shared.stream_id, error = %e, "drain before close failed");
        }

        let unacknowledged = self.shared.pending.fail_all(StreamError::StreamClosed).await;
        self.shared.stats.record_failed(unacknowledged);

        let failed = self.shared.state.is_failed();
        self.shared.state.transition(&[OPEN, CLOSING], CLOSED);

        let (done_tx, done_rx) = oneshot::channel();
        let closed = if failed {
            Ok(())
        } else {
            let handshake = async {
                if self.outbound.send(Outbound::Close { done: done_tx }).await.is_err() {
                    return Ok(());
                }
                done_rx.await.unwrap_or(Ok(()))
            };
            tokio::time::timeout(self.config.flush_timeout(), handshake)
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(stream_id = %self.shared.stream_id, "transport close timed out");
                    Err(StreamError::Transport {
                        message: "close: timed out".into(),
                    })
                })
        };

        self.shared.tracker.close();
        self.token.cancel();
        for task in [self.writer.take(), self.dispatcher.take()].into_iter().flatten() {
            let _ = task.await;
        }

        let stats = self.stats();
        tracing::info!(
            stream_id = %self.shared.stream_id,
            table = %self.shared.table,
            submitted = stats.submitted,
            durable = stats.durable,
            failed = stats.failed,
            peak_in_flight = stats.peak_in_flight,
            "stream closed"
        );

        if failed {
            return Err(self.shared.state.lost());
        }
        if unacknowledged > 0 {
            return Err(StreamError::Close { unacknowledged });
        }
        closed
    }

    fn closed_error(&self) -> StreamError {
        self.shared.state.check_open().err().unwrap_or(StreamError::StreamClosed)
    }
}

impl Drop for IngestStream {
    fn drop(&mut self) {
        // Dropped without `close`: stop both tasks. Their handles resolve
        // with `StreamClosed` once the pending table is dropped.
        if !self.token.is_cancelled() {
            tracing::debug!(stream_id = %self.shared.stream_id, "stream dropped without close");
            self.shared.tracker.close();
            self.token.cancel();
        }
    }
}

impl std::fmt::Debug for IngestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestStream")
            .field("stream_id", &self.shared.stream_id)
            .field("table", &self.shared.table)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
