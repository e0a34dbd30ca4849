use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use codec_protobuf::ProtobufRecordEncoder;
use ingest_api::{OpenRequest, RecordEncoder, Transport};
use ingest_stream::{AckEvent, IngestStream, StreamError};

use super::config::Effective;
use super::domain::{RecordGenerator, load_table};
use super::endpoint::build_transport;
use super::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  Report
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub stream_id: String,
    pub records: u64,
    pub durable: u64,
    pub failed: u64,
    /// From the first submission to the end of the flush.
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.records as f64 / secs } else { 0.0 }
    }

    /// Success only when every record became durable.
    pub fn check(&self) -> Result<(), DriverError> {
        if self.failed > 0 || self.durable < self.records {
            return Err(DriverError::Incomplete {
                failed: self.records - self.durable,
                total: self.records,
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Run
// ═══════════════════════════════════════════════════════════════

pub async fn run(eff: &Effective) -> Result<(), DriverError> {
    let table = load_table(eff.schema.as_deref(), &eff.table)?;
    let encoder = ProtobufRecordEncoder::from_table(&table)?;
    let transport = build_transport(eff)?;

    tracing::info!(
        table = %eff.table,
        endpoint = %eff.endpoint,
        records = eff.records,
        columns = table.columns.len(),
        "ingest-driver starting"
    );

    let report = ingest(eff, transport.as_ref(), &encoder).await?;
    report.check()
}

/// Submit `eff.records` generated records, one at a time: each submission
/// waits for "accepted" before the next, and its durable future is kept.
/// Then flush, wait for every durable future and close.
pub async fn ingest(
    eff: &Effective,
    transport: &dyn Transport,
    encoder: &ProtobufRecordEncoder,
) -> Result<IngestReport, DriverError> {
    let request = OpenRequest {
        table: eff.table.clone(),
        schema: encoder.schema().clone(),
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let stream = IngestStream::open_with_listener(transport, request, eff.stream.clone(), events_tx).await?;
    let stream_id = stream.stream_id().to_string();
    let ack_logger = tokio::spawn(log_acks(stream_id.clone(), events_rx));

    let mut generator = RecordGenerator::new(encoder.schema(), eff.seed);
    let mut durables = Vec::with_capacity(eff.records.min(1 << 20) as usize);
    let mut failed = 0u64;
    let started = Instant::now();

    for i in 1..=eff.records {
        let record = generator.next_record();
        let mut handle = match stream.submit_record(encoder, &record).await {
            Ok(handle) => handle,
            Err(e @ (StreamError::SchemaValidation(_) | StreamError::Backpressure { .. })) => {
                tracing::warn!(record = i, error = %e, "record not submitted");
                failed += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        handle.accepted().await?;
        durables.push(handle.into_durable());

        if eff.progress_every > 0 && i % eff.progress_every == 0 {
            tracing::info!(
                stream_id = %stream_id,
                submitted = i,
                in_flight = stream.in_flight(),
                "progress"
            );
        }
    }

    let flushed = stream.flush().await;
    let elapsed = started.elapsed();
    if let Err(e) = flushed {
        tracing::error!(stream_id = %stream_id, error = %e, "flush failed");
        if let Err(close_err) = stream.close().await {
            tracing::warn!(stream_id = %stream_id, error = %close_err, "close after failed flush");
        }
        return Err(e.into());
    }

    let mut durable = 0u64;
    for future in durables {
        let offset = future.offset();
        match future.await {
            Ok(_) => durable += 1,
            Err(e) => {
                tracing::debug!(stream_id = %stream_id, offset, error = %e, "record failed");
                failed += 1;
            }
        }
    }

    let stats = stream.stats();
    stream.close().await?;
    let _ = ack_logger.await;

    let report = IngestReport {
        stream_id,
        records: eff.records,
        durable,
        failed,
        elapsed,
    };
    tracing::info!(
        stream_id = %report.stream_id,
        records = report.records,
        durable = report.durable,
        failed = report.failed,
        peak_in_flight = stats.peak_in_flight,
        elapsed_ms = report.elapsed.as_millis() as u64,
        rate = %format_args!("{:.1} records/sec", report.records_per_sec()),
        "ingest finished"
    );
    Ok(report)
}

async fn log_acks(stream_id: String, mut events: mpsc::UnboundedReceiver<AckEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AckEvent::Durable { up_to_offset, records } => {
                tracing::debug!(stream_id = %stream_id, up_to_offset, records, "durable up to offset");
            }
            AckEvent::Rejected { offset, reason } => {
                tracing::warn!(stream_id = %stream_id, offset, %reason, "record rejected by endpoint");
            }
        }
    }
}
