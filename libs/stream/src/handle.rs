use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::StreamError;

/// The session admitted the record: it holds in-flight capacity, has its
/// offset and is queued for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedAck {
    pub offset: u64,
}

/// The endpoint persisted the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableAck {
    pub offset: u64,
}

pub(crate) type DurableTx = oneshot::Sender<Result<DurableAck, StreamError>>;

enum Accepted {
    Pending(oneshot::Receiver<Result<AcceptedAck, StreamError>>),
    Done(Result<AcceptedAck, StreamError>),
}

/// Per-record completion: an "accepted" signal and a "durable" signal,
/// each resolved at most once.
///
/// A dropped sender (stream torn down) reads as `StreamClosed`.
pub struct SubmissionHandle {
    offset: u64,
    accepted: Accepted,
    durable: DurableFuture,
}

impl SubmissionHandle {
    pub(crate) fn new(
        offset: u64,
        accepted: oneshot::Receiver<Result<AcceptedAck, StreamError>>,
        durable: oneshot::Receiver<Result<DurableAck, StreamError>>,
    ) -> Self {
        Self {
            offset,
            accepted: Accepted::Pending(accepted),
            durable: DurableFuture { offset, rx: durable },
        }
    }

    /// Offset assigned at submission; unique and increasing within a stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Wait until the session has admitted the record. Repeat calls return
    /// the first outcome.
    pub async fn accepted(&mut self) -> Result<AcceptedAck, StreamError> {
        let result = match &mut self.accepted {
            Accepted::Done(result) => return result.clone(),
            Accepted::Pending(rx) => rx.await.unwrap_or(Err(StreamError::StreamClosed)),
        };
        self.accepted = Accepted::Done(result.clone());
        result
    }

    /// Give up the accepted signal and keep only the durable one.
    pub fn into_durable(self) -> DurableFuture {
        self.durable
    }

    pub async fn durable(self) -> Result<DurableAck, StreamError> {
        self.durable.await
    }
}

impl std::fmt::Debug for SubmissionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionHandle").field("offset", &self.offset).finish()
    }
}

/// Resolves once the record is durable or has failed for good.
pub struct DurableFuture {
    offset: u64,
    rx: oneshot::Receiver<Result<DurableAck, StreamError>>,
}

impl DurableFuture {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Future for DurableFuture {
    type Output = Result<DurableAck, StreamError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StreamError::StreamClosed)))
    }
}

impl std::fmt::Debug for DurableFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableFuture").field("offset", &self.offset).finish()
    }
}
