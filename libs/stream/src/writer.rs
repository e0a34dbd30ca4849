use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ingest_api::RecordSink;

use crate::StreamError;
use crate::session::Shared;

/// Work for the writer task, in submission order.
pub(crate) enum Outbound {
    Record { offset: u64, payload: Vec<u8> },
    Flush {
        done: oneshot::Sender<Result<(), StreamError>>,
    },
    Close {
        done: oneshot::Sender<Result<(), StreamError>>,
    },
}

// ═══════════════════════════════════════════════════════════════
//  Writer task: outbound queue → sink.send()
// ═══════════════════════════════════════════════════════════════

/// Spawn the task that owns the outbound half of the connection.
///
/// Records reach the sink in offset order. The first send failure marks the
/// stream failed. Once the stream has failed, queued records never reach the
/// sink; their durable slots were already failed by `Shared::fail`.
pub(crate) fn spawn_writer(
    mut sink: Box<dyn RecordSink>,
    mut rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = token.cancelled() => break,
            };

            match msg {
                Outbound::Record { offset, payload } => {
                    if shared.state.is_failed() {
                        drain_failed(&mut rx, shared.state.lost());
                        break;
                    }
                    let sent = tokio::select! {
                        sent = sink.send(offset, &payload) => sent,
                        _ = token.cancelled() => break,
                    };
                    if let Err(e) = sent {
                        tracing::error!(stream_id = %shared.stream_id, offset, kind = %e.kind(), error = %e, "send error");
                        let err = shared.fail(format!("send offset {offset}: {e}")).await;
                        drain_failed(&mut rx, err);
                        break;
                    }
                }
                Outbound::Flush { done } => {
                    let result = sink.flush().await.map_err(|e| StreamError::Transport {
                        message: format!("flush: {e}"),
                    });
                    if let Err(e) = &result {
                        tracing::warn!(stream_id = %shared.stream_id, error = %e, "flush error");
                    }
                    let _ = done.send(result);
                }
                Outbound::Close { done } => {
                    let result = sink.close().await.map_err(|e| StreamError::Transport {
                        message: format!("close: {e}"),
                    });
                    let _ = done.send(result);
                    break;
                }
            }
        }
        tracing::debug!(stream_id = %shared.stream_id, "writer stopped");
    })
}

fn drain_failed(rx: &mut mpsc::Receiver<Outbound>, err: StreamError) {
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Flush { done } | Outbound::Close { done } = msg {
            let _ = done.send(Err(err.clone()));
        }
    }
}
