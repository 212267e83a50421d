use std::collections::HashMap;

use lightrail_core::task::MAX_DEPENDENCIES;
use lightrail_core::{Result, SchedulerError, Task, TaskId, TaskState};
use tracing::{debug, info};

/// Status table for every task the scheduler has accepted.
///
/// Holds the latest copy of each task so submitters can poll it, and the
/// bookkeeping the scheduler loop needs (queued flag, retries). Finished
/// tasks are kept until there are more than `max_terminal` of them.
pub struct TaskTable {
    tasks: HashMap<TaskId, TaskEntry>,
    max_terminal: usize,
    finish_seq: u64,
}

struct TaskEntry {
    task: Task,
    /// Sitting in the ingestion queue.
    queued: bool,
    retries: u32,
    last_error: Option<SchedulerError>,
    /// Order in which the task reached a terminal state.
    finished: Option<u64>,
}

impl TaskTable {
    pub fn new(max_terminal: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            max_terminal,
            finish_seq: 0,
        }
    }

    /// Accept a task for queueing. A task still Pending and not queued
    /// (its scheduling failed) may be submitted again under the same id.
    pub fn admit(&mut self, task: Task) -> Result<()> {
        if task.state != TaskState::Pending {
            return Err(SchedulerError::InvalidTask(format!(
                "{} is {}, only pending tasks can be submitted",
                task.id, task.state
            )));
        }
        if task.dependencies.len() > MAX_DEPENDENCIES {
            return Err(SchedulerError::InvalidTask(format!(
                "{} has {} dependencies (max {})",
                task.id,
                task.dependencies.len(),
                MAX_DEPENDENCIES
            )));
        }
        if let Some(existing) = self.tasks.get(&task.id) {
            if existing.queued || existing.task.state != TaskState::Pending {
                return Err(SchedulerError::InvalidTask(format!(
                    "{} already submitted ({})",
                    task.id, existing.task.state
                )));
            }
        }

        self.tasks.insert(
            task.id,
            TaskEntry {
                task,
                queued: true,
                retries: 0,
                last_error: None,
                finished: None,
            },
        );
        Ok(())
    }

    /// Undo an `admit` whose enqueue failed.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id).map(|e| e.task)
    }

    /// Hand a dequeued task to the scheduler. `None` if it is gone or no
    /// longer pending.
    pub fn take_for_scheduling(&mut self, id: TaskId) -> Option<Task> {
        let entry = self.tasks.get_mut(&id)?;
        entry.queued = false;
        if entry.task.state != TaskState::Pending {
            return None;
        }
        Some(entry.task.clone())
    }

    /// Store the scheduler's copy after a successful decision.
    pub fn record_scheduled(&mut self, task: &Task) {
        if let Some(entry) = self.tasks.get_mut(&task.id) {
            entry.task = task.clone();
            entry.last_error = None;
        }
    }

    /// Note a failed attempt. Returns true if the task should be queued again.
    pub fn record_failure(&mut self, id: TaskId, error: SchedulerError, max_retries: u32) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        entry.last_error = Some(error);
        if entry.retries < max_retries {
            entry.retries += 1;
            entry.queued = true;
            info!("Task {} re-queued (retry {}/{})", id, entry.retries, max_retries);
            true
        } else {
            false
        }
    }

    pub fn set_queued(&mut self, id: TaskId, queued: bool) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.queued = queued;
        }
    }

    /// Apply a state change reported by the execution layer.
    ///
    /// Only the scheduler itself may move a task to Scheduled. Going from
    /// Preempted back to Pending clears the assignment and retry count and
    /// marks the task queued; the caller must push it or clear the flag.
    pub fn transition(&mut self, id: TaskId, next: TaskState) -> Result<Task> {
        let entry = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        let current = entry.task.state;

        if next == TaskState::Scheduled || !current.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        entry.task.state = next;
        if next == TaskState::Pending {
            entry.task.assignment = None;
            entry.queued = true;
            entry.retries = 0;
            entry.last_error = None;
        }
        if next.is_terminal() {
            self.finish_seq += 1;
            entry.finished = Some(self.finish_seq);
        }
        debug!("Task {}: {} -> {}", id, current, next);

        let task = entry.task.clone();
        if next.is_terminal() {
            self.prune_terminal();
        }
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|e| e.task.clone())
    }

    pub fn last_error(&self, id: TaskId) -> Option<SchedulerError> {
        self.tasks.get(&id).and_then(|e| e.last_error.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove the oldest finished tasks beyond `max_terminal`.
    fn prune_terminal(&mut self) {
        let mut terminal: Vec<(TaskId, u64)> = self
            .tasks
            .iter()
            .filter_map(|(id, e)| e.finished.map(|seq| (*id, seq)))
            .collect();

        if terminal.len() <= self.max_terminal {
            return;
        }
        terminal.sort_by_key(|(_, seq)| *seq);

        let to_remove = terminal.len() - self.max_terminal;
        for (id, _) in terminal.into_iter().take(to_remove) {
            self.tasks.remove(&id);
        }
        debug!("Pruned {} finished tasks", to_remove);
    }
}
