use crate::{Error, KafkaConfig, LogConsumer, PartitionProcessor, Polled, Record, StateListener, TopicPartition};
use alert_backend::Backend;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// TaskState is the lifecycle state of a StoreTask.
/// Failed and Closed are terminal: once entered, they're never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotRunning,
    Running,
    Failed,
    Closed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// StoreTask drives a single consumer: it polls records, dispatches them as
/// batched writes to the backend, and periodically commits the offsets
/// through which writes have been confirmed.
pub struct StoreTask<C: LogConsumer> {
    id: usize,
    config: KafkaConfig,
    consumer: C,
    backend: Arc<dyn Backend>,
    listener: Arc<dyn StateListener>,
    state: TaskState,

    processors: BTreeMap<TopicPartition, PartitionProcessor>,
    // Confirmed offsets which are yet to be committed.
    pending: BTreeMap<TopicPartition, i64>,
    // Offsets which were last committed, by partition.
    committed: BTreeMap<TopicPartition, i64>,
    last_commit: Instant,

    permits: Arc<Semaphore>,
    write_slots: usize,
    failures_tx: mpsc::UnboundedSender<Error>,
    failures_rx: mpsc::UnboundedReceiver<Error>,
    wakeups: u32,
}

impl<C: LogConsumer + 'static> StoreTask<C> {
    pub fn new(
        id: usize,
        config: KafkaConfig,
        consumer: C,
        backend: Arc<dyn Backend>,
        listener: Arc<dyn StateListener>,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let write_slots = config.write_slots_per_task();
        let permits = Arc::new(Semaphore::new(write_slots));

        Self {
            id,
            config,
            consumer,
            backend,
            listener,
            state: TaskState::NotRunning,
            processors: BTreeMap::new(),
            pending: BTreeMap::new(),
            committed: BTreeMap::new(),
            last_commit: Instant::now(),
            permits,
            write_slots,
            failures_tx,
            failures_rx,
            wakeups: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Run the task until it fails or `cancel` is signaled,
    /// returning its terminal state.
    #[tracing::instrument(skip_all, fields(task_id = self.id))]
    pub async fn run(mut self, cancel: CancellationToken) -> TaskState {
        self.set_state(TaskState::Running);

        let clean = match self.serve(&cancel).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = ?anyhow::Error::from(err), "store task failed");
                self.set_state(TaskState::Failed);
                false
            }
        };
        self.shutdown(clean).await;
        self.set_state(TaskState::Closed);

        self.state
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        while !cancel.is_cancelled() {
            let Polled {
                revoked,
                assigned,
                records,
            } = self.poll().await?;

            self.rebalance(revoked, assigned);
            self.dispatch(records).await?;
            self.check_failures()?;
            self.checkpoint(false).await;
        }
        tracing::info!("store task was cancelled");
        Ok(())
    }

    // Poll the consumer, abandoning polls which overrun the wakeup timeout.
    async fn poll(&mut self) -> Result<Polled, Error> {
        let KafkaConfig {
            poll_timeout,
            wakeup_timeout,
            max_wakeups,
            ..
        } = self.config;

        match tokio::time::timeout(wakeup_timeout, self.consumer.poll(poll_timeout)).await {
            Ok(polled) => {
                self.wakeups = 0;
                polled
            }
            Err(_) => {
                self.wakeups += 1;
                tracing::warn!(
                    wakeups = self.wakeups,
                    max_wakeups,
                    ?wakeup_timeout,
                    "consumer poll overran its deadline and was abandoned"
                );
                if self.wakeups >= max_wakeups {
                    return Err(Error::WatchdogExhausted {
                        wakeups: self.wakeups,
                        timeout: wakeup_timeout,
                    });
                }
                Ok(Polled::default())
            }
        }
    }

    fn rebalance(&mut self, revoked: Vec<TopicPartition>, assigned: Vec<TopicPartition>) {
        for partition in revoked {
            // In-flight writes of the partition may still complete,
            // but they update a processor which is no longer reachable.
            if let Some(processor) = self.processors.remove(&partition) {
                tracing::info!(%partition, outstanding = processor.outstanding(), "partition revoked");
            }
            self.pending.remove(&partition);
            self.committed.remove(&partition);
        }
        for partition in assigned {
            tracing::info!(%partition, "partition assigned");
            self.processors
                .insert(partition.clone(), PartitionProcessor::new(partition));
        }
    }

    async fn dispatch(&mut self, records: Vec<Record>) -> Result<(), Error> {
        let mut grouped: BTreeMap<TopicPartition, Vec<Record>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.partition.clone())
                .or_default()
                .push(record);
        }

        for (partition, records) in grouped {
            let processor = self
                .processors
                .entry(partition.clone())
                .or_insert_with(|| {
                    tracing::debug!(%partition, "records of partition preceded its assignment");
                    PartitionProcessor::new(partition)
                })
                .clone();

            let Some(batch) = processor.begin(records) else {
                continue;
            };

            // Wait for a write slot, which applies backpressure to polling.
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::Consumer("write permits were closed".to_string()))?;

            processor.spawn_write(batch, self.backend.clone(), permit, self.failures_tx.clone());
        }
        Ok(())
    }

    fn check_failures(&mut self) -> Result<(), Error> {
        match self.failures_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }

    // Gather commitable offsets into the pending set, and commit them
    // if the commit interval has elapsed (or if `force`).
    async fn checkpoint(&mut self, force: bool) {
        for (partition, processor) in &self.processors {
            let Some(offset) = processor.take_commitable() else {
                continue;
            };
            let floor = self.committed.get(partition).copied().unwrap_or(-1);
            let pending = self.pending.entry(partition.clone()).or_insert(floor);
            *pending = (*pending).max(offset);
        }
        self.pending
            .retain(|partition, offset| self.committed.get(partition) != Some(offset));

        if self.pending.is_empty()
            || (!force && self.last_commit.elapsed() < self.config.commit_interval)
        {
            return;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.consumer.commit(&self.pending).await {
                Ok(()) => {
                    tracing::info!(offsets = ?self.pending, "committed offsets");
                    self.committed.append(&mut self.pending);
                    break;
                }
                Err(err) if attempt > self.config.max_commit_retries => {
                    tracing::error!(
                        error = %err,
                        attempts = attempt,
                        offsets = ?self.pending,
                        "failed to commit offsets (will try again next interval)"
                    );
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, "failed to commit offsets (will retry)");
                    tokio::time::sleep(self.config.commit_backoff).await;
                }
            }
        }
        self.last_commit = Instant::now();
    }

    async fn shutdown(&mut self, clean: bool) {
        if clean {
            // Allow in-flight writes to finish, so their offsets may be committed.
            let all = self.write_slots as u32;
            if tokio::time::timeout(self.config.close_timeout, self.permits.acquire_many(all))
                .await
                .is_err()
            {
                tracing::warn!("in-flight writes did not finish before the close timeout");
            }
            if let Err(err) = self.check_failures() {
                tracing::error!(error = ?anyhow::Error::from(err), "write failed while closing");
                self.set_state(TaskState::Failed);
            }
            self.checkpoint(true).await;
        }

        match tokio::time::timeout(self.config.close_timeout, self.consumer.close()).await {
            Ok(Ok(())) => tracing::info!("closed consumer"),
            Ok(Err(err)) => tracing::warn!(error = %err, "failed to close consumer"),
            Err(_) => tracing::warn!(timeout = ?self.config.close_timeout, "consumer did not close in time"),
        }
    }

    fn set_state(&mut self, state: TaskState) {
        if self.state.is_terminal() || self.state == state {
            return;
        }
        tracing::info!(from = ?self.state, to = ?state, "store task state changed");

        self.state = state;
        self.listener.on_change(self.id, state);
    }
}
