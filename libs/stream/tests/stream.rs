mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ingest_api::{
    Ack, AckSource, Connection, OpenRequest, OverflowPolicy, Record, RecordEncoder, RecordSink, Transport,
    TransportError, TransportFuture,
};
use ingest_stream::{AcceptedAck, AckEvent, DurableAck, IngestStream, StreamConfig, StreamError};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;
use transport_memory::{AckMode, MemoryTransport, MemoryTransportConfig};

use common::{QUIET, WAIT, encoded, encoder, record, request, wait_received};

fn auto_transport(every: u64) -> MemoryTransport {
    MemoryTransport::new(MemoryTransportConfig {
        ack_mode: AckMode::Auto { every },
        ..Default::default()
    })
}

#[tokio::test]
async fn third_submission_waits_for_capacity() {
    let transport = MemoryTransport::manual();
    let config = StreamConfig::default().with_max_inflight_records(2);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();
    let id = stream.stream_id().to_string();

    let first = stream.submit(encoded(0)).await.unwrap();
    let _second = stream.submit(encoded(1)).await.unwrap();
    assert_eq!(stream.in_flight(), 2);

    let third = {
        let submit = stream.submit(encoded(2));
        tokio::pin!(submit);
        assert!(timeout(QUIET, &mut submit).await.is_err(), "third submit should be suspended");

        transport.ack_durable(&id, 0).await.unwrap();
        timeout(WAIT, submit).await.unwrap().unwrap()
    };
    assert_eq!(third.offset(), 2);
    assert_eq!(first.durable().await, Ok(DurableAck { offset: 0 }));
    assert_eq!(stream.in_flight(), 2);

    transport.ack_durable(&id, 2).await.unwrap();
    stream.flush().await.unwrap();
    assert_eq!(stream.in_flight(), 0);
    stream.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ten_thousand_records_become_durable() {
    let transport = auto_transport(100);
    let config = StreamConfig::default().with_max_inflight_records(1_000);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let mut durables = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let mut handle = stream.submit(encoded(i)).await.unwrap();
        handle.accepted().await.unwrap();
        durables.push(handle.into_durable());
    }
    stream.flush().await.unwrap();

    for (i, durable) in durables.into_iter().enumerate() {
        assert_eq!(durable.await, Ok(DurableAck { offset: i as u64 }));
    }

    let stats = stream.stats();
    assert_eq!(stats.submitted, 10_000);
    assert_eq!(stats.accepted, 10_000);
    assert_eq!(stats.durable, 10_000);
    assert_eq!(stats.failed, 0);
    assert!(stats.peak_in_flight <= 1_000);

    stream.close().await.unwrap();
    assert_eq!(transport.received(), 10_000);
    assert_eq!(transport.stored(common::TABLE).await.len(), 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_flight_never_exceeds_capacity() {
    let transport = auto_transport(3);
    let config = StreamConfig::default().with_max_inflight_records(8);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let mut durables = Vec::new();
    for i in 0..500 {
        durables.push(stream.submit(encoded(i)).await.unwrap().into_durable());
        assert!(stream.in_flight() <= 8);
    }
    stream.flush().await.unwrap();
    for durable in durables {
        durable.await.unwrap();
    }

    let stats = stream.stats();
    assert!(stats.peak_in_flight <= 8, "peak was {}", stats.peak_in_flight);
    assert_eq!(stats.durable, 500);
    stream.close().await.unwrap();
}

#[tokio::test]
async fn second_flush_is_a_no_op() {
    let transport = MemoryTransport::manual();
    let stream = IngestStream::open(&transport, request(), StreamConfig::default())
        .await
        .unwrap();
    let id = stream.stream_id().to_string();

    let handle = stream.submit(encoded(1)).await.unwrap();
    let acker = async {
        wait_received(&transport, 1).await;
        transport.ack_received(&id).await.unwrap();
    };
    let (flushed, ()) = tokio::join!(stream.flush(), acker);
    flushed.unwrap();
    assert_eq!(handle.durable().await, Ok(DurableAck { offset: 0 }));

    // Nothing new submitted and nobody acking: must return at once.
    timeout(QUIET, stream.flush()).await.unwrap().unwrap();
    stream.close().await.unwrap();
}

#[tokio::test]
async fn rejection_fails_only_that_record() {
    let transport = MemoryTransport::manual();
    let (listener, mut events) = mpsc::unbounded_channel();
    let stream = IngestStream::open_with_listener(&transport, request(), StreamConfig::default(), listener)
        .await
        .unwrap();
    let id = stream.stream_id().to_string();

    let mut handles = Vec::new();
    for i in 0..3 {
        let mut handle = stream.submit(encoded(i)).await.unwrap();
        handle.accepted().await.unwrap();
        handles.push(handle.into_durable());
    }

    transport.reject(&id, 1, "constraint violated").await.unwrap();
    transport.ack_durable(&id, 2).await.unwrap();

    let results: Vec<_> = futures_results(handles).await;
    assert_eq!(results[0], Ok(DurableAck { offset: 0 }));
    assert_eq!(
        results[1],
        Err(StreamError::Rejected {
            offset: 1,
            reason: "constraint violated".into()
        })
    );
    assert_eq!(results[2], Ok(DurableAck { offset: 2 }));

    assert_eq!(
        events.recv().await,
        Some(AckEvent::Rejected {
            offset: 1,
            reason: "constraint violated".into()
        })
    );
    assert_eq!(
        events.recv().await,
        Some(AckEvent::Durable {
            up_to_offset: 2,
            records: 2
        })
    );

    let stats = stream.stats();
    assert_eq!((stats.durable, stats.failed), (2, 1));
    stream.close().await.unwrap();
}

#[tokio::test]
async fn regressing_durable_offset_is_ignored() {
    let transport = MemoryTransport::manual();
    let (listener, mut events) = mpsc::unbounded_channel();
    let stream = IngestStream::open_with_listener(&transport, request(), StreamConfig::default(), listener)
        .await
        .unwrap();
    let id = stream.stream_id().to_string();

    for i in 0..3 {
        stream.submit(encoded(i)).await.unwrap();
    }
    transport.ack_durable(&id, 1).await.unwrap();
    transport.ack_durable(&id, 0).await.unwrap();
    transport.ack_durable(&id, 2).await.unwrap();

    assert_eq!(
        events.recv().await,
        Some(AckEvent::Durable {
            up_to_offset: 1,
            records: 2
        })
    );
    assert_eq!(
        events.recv().await,
        Some(AckEvent::Durable {
            up_to_offset: 2,
            records: 1
        })
    );
    stream.close().await.unwrap();
}

#[tokio::test]
async fn disconnect_fails_every_outstanding_record() {
    let transport = MemoryTransport::manual();
    let stream = IngestStream::open(&transport, request(), StreamConfig::default())
        .await
        .unwrap();
    let id = stream.stream_id().to_string();

    let mut durables = Vec::new();
    for i in 0..3 {
        let mut handle = stream.submit(encoded(i)).await.unwrap();
        handle.accepted().await.unwrap();
        durables.push(handle.into_durable());
    }
    wait_received(&transport, 3).await;
    transport.disconnect(&id, "link down").await.unwrap();

    let lost = StreamError::ConnectionLost {
        message: "link down".into(),
    };
    for durable in durables {
        assert_eq!(timeout(WAIT, durable).await.unwrap(), Err(lost.clone()));
    }
    assert_eq!(stream.submit(encoded(9)).await.unwrap_err(), lost);
    assert_eq!(stream.flush().await.unwrap_err(), lost);
    assert_eq!(stream.stats().failed, 3);
    assert_eq!(stream.close().await.unwrap_err(), lost);
}

#[tokio::test]
async fn close_reports_unacknowledged_records() {
    let transport = MemoryTransport::manual();
    let config = StreamConfig::default().with_flush_timeout_ms(50);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let first = stream.submit(encoded(0)).await.unwrap();
    let second = stream.submit(encoded(1)).await.unwrap();

    assert_eq!(
        stream.close().await.unwrap_err(),
        StreamError::Close { unacknowledged: 2 }
    );
    assert_eq!(first.durable().await, Err(StreamError::StreamClosed));
    assert_eq!(second.durable().await, Err(StreamError::StreamClosed));
    assert!(transport.open_streams().await.is_empty());
}

#[tokio::test]
async fn flush_times_out_when_nothing_is_acknowledged() {
    let transport = MemoryTransport::manual();
    let config = StreamConfig::default().with_flush_timeout_ms(50);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();
    let id = stream.stream_id().to_string();

    let handle = stream.submit(encoded(0)).await.unwrap();
    assert_eq!(
        stream.flush().await.unwrap_err(),
        StreamError::FlushTimeout {
            timeout_ms: 50,
            pending: 1
        }
    );

    transport.ack_durable(&id, 0).await.unwrap();
    assert_eq!(handle.durable().await, Ok(DurableAck { offset: 0 }));
    stream.close().await.unwrap();
}

#[tokio::test]
async fn invalid_record_never_reaches_the_tracker() {
    let transport = MemoryTransport::manual();
    let config = StreamConfig::default().with_max_inflight_records(1);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();
    let encoder = encoder();

    let missing_id = Record::builder().field("name", "x").field("submit_counter", 1).build();
    let err = stream.submit_record(&encoder, &missing_id).await.unwrap_err();
    assert!(matches!(err, StreamError::SchemaValidation(_)), "{err:?}");

    assert_eq!(stream.in_flight(), 0);
    assert_eq!(stream.stats().submitted, 0);
    assert_eq!(transport.received(), 0);

    // The single slot is still free.
    let mut handle = timeout(QUIET, stream.submit_record(&encoder, &record(1)))
        .await
        .unwrap()
        .unwrap();
    handle.accepted().await.unwrap();
    wait_received(&transport, 1).await;
}

#[tokio::test]
async fn reject_policy_fails_fast_when_full() {
    let transport = MemoryTransport::manual();
    let config = StreamConfig::default()
        .with_max_inflight_records(1)
        .with_overflow(OverflowPolicy::Reject);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let _first = stream.submit(encoded(0)).await.unwrap();
    assert_eq!(
        stream.submit(encoded(1)).await.unwrap_err(),
        StreamError::Backpressure { max_inflight: 1 }
    );
    assert_eq!(stream.stats().submitted, 1);
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let transport = MemoryTransport::new(MemoryTransportConfig {
        refuse_connections: true,
        ..Default::default()
    });
    let err = IngestStream::open(&transport, request(), StreamConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Connection { ref table, .. } if table == common::TABLE));

    let err = IngestStream::open(
        &MemoryTransport::manual(),
        request(),
        StreamConfig::default().with_max_inflight_records(0),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StreamError::Config(_)));
}

// ═══════════════════════════════════════════════════════════════
//  Gated endpoint: sends wait on a gate, acks come from the test
// ═══════════════════════════════════════════════════════════════

type AckResult = Result<Ack, TransportError>;

/// Endpoint whose `send` completes only when the test opens the gate.
struct GatedTransport {
    gate: Arc<Semaphore>,
    sent: Arc<AtomicUsize>,
    acks: std::sync::Mutex<Option<mpsc::UnboundedReceiver<AckResult>>>,
}

impl GatedTransport {
    fn new() -> (Self, mpsc::UnboundedSender<AckResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            gate: Arc::new(Semaphore::new(0)),
            sent: Arc::new(AtomicUsize::new(0)),
            acks: std::sync::Mutex::new(Some(rx)),
        };
        (transport, tx)
    }

    fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Transport for GatedTransport {
    fn open(&self, _request: OpenRequest) -> TransportFuture<'_, Connection> {
        Box::pin(async move {
            let rx = self
                .acks
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TransportError::new("gated endpoint opens once"))?;
            Ok(Connection {
                stream_id: "gated-1".into(),
                sink: Box::new(GatedSink {
                    gate: self.gate.clone(),
                    sent: self.sent.clone(),
                }),
                acks: Box::new(ChannelAcks { rx }),
            })
        })
    }
}

struct GatedSink {
    gate: Arc<Semaphore>,
    sent: Arc<AtomicUsize>,
}

impl RecordSink for GatedSink {
    fn send(&mut self, _offset: u64, _payload: &[u8]) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.gate.acquire().await.unwrap().forget();
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn flush(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

struct ChannelAcks {
    rx: mpsc::UnboundedReceiver<AckResult>,
}

impl AckSource for ChannelAcks {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<AckResult>> + Send + '_>> {
        Box::pin(self.rx.recv())
    }
}

#[tokio::test]
async fn accepted_resolves_on_admission_even_when_send_stalls() {
    let (transport, _acks) = GatedTransport::new();
    let config = StreamConfig::default()
        .with_max_inflight_records(4)
        .with_flush_timeout_ms(50);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let mut durables = Vec::new();
    for i in 0..4 {
        let mut handle = stream.submit(encoded(i)).await.unwrap();
        let accepted = timeout(QUIET, handle.accepted()).await.expect("accepted without a send");
        assert_eq!(accepted, Ok(AcceptedAck { offset: i as u64 }));
        durables.push(handle.into_durable());
    }
    assert_eq!(stream.in_flight(), 4);
    assert_eq!(stream.stats().accepted, 4);
    assert_eq!(transport.sent(), 0);

    // A stuck transport must not hang close.
    let closed = timeout(WAIT, stream.close()).await.expect("close finished");
    assert_eq!(closed, Err(StreamError::Close { unacknowledged: 4 }));
    for durable in durables {
        assert_eq!(durable.await, Err(StreamError::StreamClosed));
    }
}

#[tokio::test]
async fn failed_stream_stops_sending_queued_records() {
    let (transport, acks) = GatedTransport::new();
    let config = StreamConfig::default().with_max_inflight_records(4);
    let stream = IngestStream::open(&transport, request(), config).await.unwrap();

    let mut durables = Vec::new();
    for i in 0..3 {
        durables.push(stream.submit(encoded(i)).await.unwrap().into_durable());
    }
    // The writer is now parked inside the first send.
    tokio::time::sleep(QUIET).await;

    acks.send(Err(TransportError::io("link down"))).unwrap();
    let lost = StreamError::ConnectionLost {
        message: "link down".into(),
    };
    for durable in durables {
        assert_eq!(timeout(WAIT, durable).await.unwrap(), Err(lost.clone()));
    }

    // Let the send already in progress finish; nothing queued behind it may follow.
    transport.gate.add_permits(10);
    tokio::time::sleep(QUIET).await;
    assert_eq!(transport.sent(), 1);
    assert_eq!(stream.stats().failed, 3);
    assert_eq!(stream.close().await.unwrap_err(), lost);
}

#[tokio::test]
async fn rejection_of_a_durable_record_is_not_reported() {
    let transport = MemoryTransport::manual();
    let (listener, mut events) = mpsc::unbounded_channel();
    let stream = IngestStream::open_with_listener(&transport, request(), StreamConfig::default(), listener)
        .await
        .unwrap();
    let id = stream.stream_id().to_string();

    let first = stream.submit(encoded(0)).await.unwrap();
    let second = stream.submit(encoded(1)).await.unwrap();
    transport.ack_durable(&id, 0).await.unwrap();
    transport.reject(&id, 0, "too late").await.unwrap();
    transport.reject(&id, 1, "bad row").await.unwrap();

    assert_eq!(
        events.recv().await,
        Some(AckEvent::Durable {
            up_to_offset: 0,
            records: 1
        })
    );
    assert_eq!(
        events.recv().await,
        Some(AckEvent::Rejected {
            offset: 1,
            reason: "bad row".into()
        })
    );
    assert_eq!(first.durable().await, Ok(DurableAck { offset: 0 }));
    assert!(matches!(second.durable().await, Err(StreamError::Rejected { offset: 1, .. })));
    assert_eq!(stream.stats().failed, 1);
    stream.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_share_the_window() {
    const TASKS: usize = 16;
    const PER_TASK: usize = 250;
    const WINDOW: usize = 32;

    let transport = auto_transport(7);
    let config = StreamConfig::default().with_max_inflight_records(WINDOW);
    let stream = Arc::new(IngestStream::open(&transport, request(), config).await.unwrap());

    let encoder = encoder();
    let mut tasks = Vec::new();
    for t in 0..TASKS {
        let stream = stream.clone();
        let records: Vec<_> = (0..PER_TASK)
            .map(|i| encoder.encode(&record((t * PER_TASK + i) as i32)).unwrap())
            .collect();
        tasks.push(tokio::spawn(async move {
            let mut durables = Vec::with_capacity(records.len());
            for record in records {
                let mut handle = stream.submit(record).await.unwrap();
                handle.accepted().await.unwrap();
                assert!(stream.in_flight() <= WINDOW);
                durables.push(handle.into_durable());
            }
            durables
        }));
    }

    let mut durables = Vec::new();
    for task in tasks {
        durables.extend(timeout(WAIT, task).await.unwrap().unwrap());
    }
    stream.flush().await.unwrap();

    let mut offsets: Vec<u64> = durables.iter().map(|d| d.offset()).collect();
    offsets.sort_unstable();
    assert_eq!(offsets, (0..(TASKS * PER_TASK) as u64).collect::<Vec<_>>());

    let (mut durable, mut failed) = (0, 0);
    for future in durables {
        match timeout(WAIT, future).await.unwrap() {
            Ok(_) => durable += 1,
            Err(_) => failed += 1,
        }
    }
    assert_eq!(durable + failed, TASKS * PER_TASK);
    assert_eq!(durable, TASKS * PER_TASK);

    let stats = stream.stats();
    assert_eq!(stats.submitted, (TASKS * PER_TASK) as u64);
    assert_eq!(stats.durable, (TASKS * PER_TASK) as u64);
    assert!(stats.peak_in_flight <= WINDOW, "peak was {}", stats.peak_in_flight);

    let stream = Arc::into_inner(stream).expect("submitters finished");
    stream.close().await.unwrap();
    assert_eq!(transport.received(), (TASKS * PER_TASK) as u64);
}

async fn futures_results<F, T>(futures: Vec<F>) -> Vec<T>
where
    F: std::future::Future<Output = T>,
{
    let mut out = Vec::with_capacity(futures.len());
    for future in futures {
        out.push(timeout(WAIT, future).await.expect("handle resolved"));
    }
    out
}
