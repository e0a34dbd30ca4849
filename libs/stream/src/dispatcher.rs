use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::{Ack, AckSource};

use crate::StreamError;
use crate::session::Shared;

/// Acknowledgment notification delivered to the stream's listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckEvent {
    /// Everything up to `up_to_offset` is durable; `records` handles were
    /// resolved by this acknowledgment.
    Durable { up_to_offset: u64, records: usize },
    /// One record was refused by the endpoint.
    Rejected { offset: u64, reason: String },
}

// ═══════════════════════════════════════════════════════════════
//  Dispatcher task: ack source → pending table → listener
// ═══════════════════════════════════════════════════════════════

/// Spawn the task that owns the inbound half of the connection.
///
/// For each durable ack, in arrival order: resolve the handles, notify the
/// listener, then release their capacity.
pub(crate) fn spawn_dispatcher(
    mut acks: Box<dyn AckSource>,
    shared: Arc<Shared>,
    listener: Option<mpsc::UnboundedSender<AckEvent>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_durable: Option<u64> = None;

        loop {
            let next = tokio::select! {
                next = acks.recv() => next,
                _ = token.cancelled() => break,
            };

            match next {
                Some(Ok(Ack::Durable { up_to_offset })) => {
                    if last_durable.is_some_and(|last| up_to_offset < last) {
                        tracing::warn!(
                            stream_id = %shared.stream_id,
                            up_to_offset,
                            last = ?last_durable,
                            "durable offset went backwards, ignoring"
                        );
                        continue;
                    }
                    last_durable = Some(up_to_offset);

                    let permits = shared.pending.resolve_through(up_to_offset).await;
                    let records = permits.len();
                    shared.stats.record_durable(records);
                    tracing::debug!(stream_id = %shared.stream_id, up_to_offset, records, "durable up to offset");

                    if let Some(listener) = &listener {
                        let _ = listener.send(AckEvent::Durable { up_to_offset, records });
                    }
                    drop(permits);
                }
                Some(Ok(Ack::Rejected { offset, reason })) => {
                    tracing::warn!(stream_id = %shared.stream_id, offset, %reason, "record rejected");
                    let error = StreamError::Rejected {
                        offset,
                        reason: reason.clone(),
                    };
                    if !shared.pending.fail(offset, error).await {
                        tracing::debug!(stream_id = %shared.stream_id, offset, "rejection for a settled record, ignoring");
                        continue;
                    }
                    shared.stats.record_failed(1);
                    if let Some(listener) = &listener {
                        let _ = listener.send(AckEvent::Rejected { offset, reason });
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(stream_id = %shared.stream_id, kind = %e.kind(), error = %e, "ack stream error");
                    shared.fail(e.to_string()).await;
                    break;
                }
                None => {
                    if !shared.state.is_closed() {
                        shared.fail("endpoint ended the acknowledgment stream".to_string()).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!(stream_id = %shared.stream_id, "dispatcher stopped");
    })
}
