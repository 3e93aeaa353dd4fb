use crate::{Error, Record, TopicPartition};
use alert_backend::{Backend, IdentifiedAlert};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedSemaphorePermit};

/// Batch is a set of alerts read from a contiguous run of partition offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub partition: TopicPartition,
    /// Sequence number of the batch within its partition's processor.
    pub seq: u64,
    /// Greatest offset of the batch's records, including skipped records.
    pub max_offset: i64,
    pub alerts: Vec<IdentifiedAlert>,
}

/// PartitionProcessor tracks the writes of a single assigned partition, and
/// derives the offset through which the partition may be committed.
///
/// Writes may complete in any order, but an offset becomes commitable only
/// once its own batch and every earlier batch of the partition are confirmed.
#[derive(Clone)]
pub struct PartitionProcessor {
    partition: TopicPartition,
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    // Batches in offset order which are written or being written,
    // and which have not yet been promoted to `commitable`.
    outstanding: VecDeque<Outstanding>,
    commitable: Option<i64>,
    next_seq: u64,
}

struct Outstanding {
    seq: u64,
    max_offset: i64,
    confirmed: bool,
}

impl PartitionProcessor {
    pub fn new(partition: TopicPartition) -> Self {
        Self {
            partition,
            state: Default::default(),
        }
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Begin a batch of `records`, registering it as outstanding.
    /// Records which failed to decode are skipped, but their offsets are
    /// still covered by the batch. Returns None if there are no records.
    pub fn begin(&self, mut records: Vec<Record>) -> Option<Batch> {
        records.sort_by_key(|record| record.offset);
        let max_offset = records.last()?.offset;

        let alerts = records
            .into_iter()
            .filter_map(|Record { offset, alert, .. }| {
                let alert = alert?;
                Some(IdentifiedAlert::from_log(
                    &self.partition.topic,
                    self.partition.partition,
                    offset,
                    alert,
                ))
            })
            .collect();

        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.outstanding.push_back(Outstanding {
            seq,
            max_offset,
            confirmed: false,
        });

        Some(Batch {
            partition: self.partition.clone(),
            seq,
            max_offset,
            alerts,
        })
    }

    /// Confirm the durable write of the batch with sequence number `seq`.
    pub fn confirm(&self, seq: u64) {
        let mut state = self.state.lock().unwrap();

        if let Some(entry) = state
            .outstanding
            .iter_mut()
            .find(|entry| entry.seq == seq)
        {
            entry.confirmed = true;
        }

        while state.outstanding.front().map_or(false, |e| e.confirmed) {
            let promoted = state.outstanding.pop_front().map(|e| e.max_offset);
            state.commitable = promoted;
        }
    }

    /// Take the offset through which the partition may be committed, if any
    /// has become commitable since it was last taken.
    pub fn take_commitable(&self) -> Option<i64> {
        self.state.lock().unwrap().commitable.take()
    }

    /// Max offset of the earliest unconfirmed batch, which must be confirmed
    /// before the commitable offset can advance.
    pub fn expected_offset(&self) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .outstanding
            .front()
            .map(|entry| entry.max_offset)
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().outstanding.len()
    }

    /// Write `batch` to `backend` in the background. `permit` is held until
    /// the write completes, and a failed write is sent to `failures`.
    pub fn spawn_write(
        &self,
        batch: Batch,
        backend: Arc<dyn Backend>,
        permit: OwnedSemaphorePermit,
        failures: mpsc::UnboundedSender<Error>,
    ) {
        let Batch {
            partition,
            seq,
            max_offset,
            alerts,
        } = batch;

        if alerts.is_empty() {
            self.confirm(seq);
            return;
        }
        let this = self.clone();

        tokio::spawn(async move {
            let count = alerts.len();

            match backend.write(alerts).await {
                Ok(()) => {
                    tracing::debug!(%partition, max_offset, count, "wrote batch");
                    this.confirm(seq);
                }
                Err(source) => {
                    tracing::error!(%partition, max_offset, count, error = %source, "failed to write batch");
                    let _ = failures.send(Error::Write {
                        partition,
                        offset: max_offset,
                        source,
                    });
                }
            }
            std::mem::drop(permit);
        });
    }
}
