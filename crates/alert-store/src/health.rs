use crate::{Error, TaskState};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const HEALTHY: &str = "healthy";
pub const UNHEALTHY: &str = "unhealthy";

/// StateListener observes the state transitions of store tasks.
pub trait StateListener: Send + Sync {
    fn on_change(&self, task_id: usize, state: TaskState);
}

/// HealthFile publishes the aggregate health of store tasks as a status
/// file, which is rewritten on every task state transition. The store is
/// unhealthy if any task has failed.
pub struct HealthFile {
    path: PathBuf,
    states: Mutex<Vec<TaskState>>,
}

impl HealthFile {
    pub fn new(path: impl Into<PathBuf>, tasks: usize) -> Self {
        Self {
            path: path.into(),
            states: Mutex::new(vec![TaskState::NotRunning; tasks]),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the store as healthy, as it begins serving.
    pub fn set_healthy(&self) -> Result<(), Error> {
        let _guard = self.states.lock().unwrap();
        self.write(HEALTHY)
    }

    pub fn status(&self) -> &'static str {
        status(&self.states.lock().unwrap())
    }

    fn write(&self, status: &str) -> Result<(), Error> {
        std::fs::write(&self.path, status).map_err(|source| Error::Health {
            path: self.path.clone(),
            source,
        })
    }
}

fn status(states: &[TaskState]) -> &'static str {
    if states.contains(&TaskState::Failed) {
        UNHEALTHY
    } else {
        HEALTHY
    }
}

impl StateListener for HealthFile {
    fn on_change(&self, task_id: usize, state: TaskState) {
        let mut states = self.states.lock().unwrap();

        if task_id >= states.len() {
            states.resize(task_id + 1, TaskState::NotRunning);
        }
        states[task_id] = state;

        let status = status(&states);
        if let Err(err) = self.write(status) {
            tracing::error!(error = ?anyhow::Error::from(err), "failed to update health status");
        } else {
            tracing::debug!(task_id, ?state, status, "updated health status");
        }
    }
}
