use std::collections::BTreeMap;

use tokio::sync::{Mutex, watch};

use crate::StreamError;
use crate::handle::{DurableAck, DurableTx};
use crate::inflight::InflightPermit;

struct PendingRecord {
    durable: DurableTx,
    permit: InflightPermit,
}

/// Records submitted but not yet durable, keyed by offset.
///
/// Removing an entry resolves its durable slot; the caller decides when the
/// returned permits are dropped.
pub(crate) struct PendingTable {
    records: Mutex<BTreeMap<u64, PendingRecord>>,
    // Bumped on every removal; `wait_drained_through` re-checks on change.
    removals: watch::Sender<u64>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        let (removals, _) = watch::channel(0);
        Self {
            records: Mutex::new(BTreeMap::new()),
            removals,
        }
    }

    pub(crate) async fn insert(&self, offset: u64, durable: DurableTx, permit: InflightPermit) {
        self.records
            .lock()
            .await
            .insert(offset, PendingRecord { durable, permit });
    }

    /// Resolve every record with offset <= `up_to_offset` as durable.
    pub(crate) async fn resolve_through(&self, up_to_offset: u64) -> Vec<InflightPermit> {
        let done = {
            let mut records = self.records.lock().await;
            let rest = match up_to_offset.checked_add(1) {
                Some(next) => records.split_off(&next),
                None => BTreeMap::new(),
            };
            std::mem::replace(&mut *records, rest)
        };

        let permits = done
            .into_iter()
            .map(|(offset, record)| {
                let _ = record.durable.send(Ok(DurableAck { offset }));
                record.permit
            })
            .collect::<Vec<_>>();
        if !permits.is_empty() {
            self.removals.send_modify(|n| *n += 1);
        }
        permits
    }

    /// Fail one record. Returns false if it was already resolved.
    pub(crate) async fn fail(&self, offset: u64, error: StreamError) -> bool {
        let removed = self.records.lock().await.remove(&offset);
        let Some(record) = removed else { return false };
        let _ = record.durable.send(Err(error));
        drop(record.permit);
        self.removals.send_modify(|n| *n += 1);
        true
    }

    /// Fail every outstanding record with `error`. Returns how many there were.
    pub(crate) async fn fail_all(&self, error: StreamError) -> usize {
        let drained = std::mem::take(&mut *self.records.lock().await);
        let count = drained.len();
        for (_, record) in drained {
            let _ = record.durable.send(Err(error.clone()));
        }
        if count > 0 {
            self.removals.send_modify(|n| *n += 1);
        }
        count
    }

    /// Outstanding records with offset <= `offset`.
    pub(crate) async fn count_through(&self, offset: u64) -> usize {
        self.records.lock().await.range(..=offset).count()
    }

    pub(crate) async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Wait until no record with offset <= `offset` is outstanding.
    pub(crate) async fn wait_drained_through(&self, offset: u64) {
        let mut changes = self.removals.subscribe();
        loop {
            if self.count_through(offset).await == 0 {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}
