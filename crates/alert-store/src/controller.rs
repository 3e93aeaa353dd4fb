use crate::{Error, KafkaConfig, LogConsumer, StateListener, StoreTask, TaskState};
use alert_backend::Backend;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Controller runs a set of StoreTasks which share a backend.
pub struct Controller {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<TaskState>>,
}

impl Controller {
    /// Start `stream_threads` tasks, each with a consumer built by
    /// `make_consumer` from its task id. State transitions of every task
    /// are reported to `listener`.
    pub fn start<C, F>(
        config: &KafkaConfig,
        backend: Arc<dyn Backend>,
        listener: Arc<dyn StateListener>,
        mut make_consumer: F,
    ) -> Result<Self, Error>
    where
        C: LogConsumer + 'static,
        F: FnMut(usize) -> Result<C, Error>,
    {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(config.stream_threads);

        for id in 0..config.stream_threads {
            let consumer = match make_consumer(id) {
                Ok(consumer) => consumer,
                Err(err) => {
                    // Stop tasks which were already started.
                    cancel.cancel();
                    return Err(err);
                }
            };
            let task = StoreTask::new(
                id,
                config.clone(),
                consumer,
                backend.clone(),
                listener.clone(),
            );
            tasks.push(tokio::spawn(run_task(
                id,
                task,
                listener.clone(),
                cancel.child_token(),
            )));
        }
        tracing::info!(tasks = tasks.len(), topic = %config.topic, "started store tasks");

        Ok(Self { cancel, tasks })
    }

    /// Token which, when cancelled, stops all tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for all tasks to exit, returning their terminal states.
    pub async fn join(self) -> Vec<TaskState> {
        let mut states = Vec::with_capacity(self.tasks.len());

        for (id, task) in self.tasks.into_iter().enumerate() {
            let state = match task.await {
                Ok(state) => state,
                Err(err) => {
                    tracing::error!(task_id = id, error = %err, "store task was aborted");
                    TaskState::Failed
                }
            };
            states.push(state);
        }
        states
    }

    /// Signal all tasks to stop. Tasks are awaited in the background,
    /// through the returned handle.
    pub fn close(self) -> JoinHandle<Vec<TaskState>> {
        tracing::info!("closing store tasks");
        self.cancel.cancel();
        tokio::spawn(self.join())
    }
}

// Run `task`, reporting a panic to `listener` as a Failed task.
async fn run_task<C: LogConsumer + 'static>(
    id: usize,
    task: StoreTask<C>,
    listener: Arc<dyn StateListener>,
    cancel: CancellationToken,
) -> TaskState {
    match AssertUnwindSafe(task.run(cancel)).catch_unwind().await {
        Ok(state) => state,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(task_id = id, %message, "store task panicked");

            listener.on_change(id, TaskState::Failed);
            TaskState::Failed
        }
    }
}
