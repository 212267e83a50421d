//! The scheduler service: one owned instance tying the registry, routing,
//! policy engine and ingestion queue together, plus the background loop
//! that drains the queue.
//!
//! Locking: the task table, the device registry and the route cache each
//! have their own lock. The loop releases the task table before touching
//! the registry, and only nests registry-read -> route-cache.

use std::sync::Arc;

use lightrail_core::{
    Assignment, Device, DeviceId, DeviceStatePatch, Objective, Result, Route, SchedulerConfig,
    SchedulerError, Task, TaskId, TaskState,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::{Decision, PolicyEngine};
use crate::queue::TaskQueue;
use crate::registry::DeviceRegistry;
use crate::routing::RoutingEngine;
use crate::stats::{SchedulerStats, StatsSnapshot};
use crate::tasks::TaskTable;

/// Outcome of one scheduling attempt made by the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingEvent {
    Scheduled {
        task_id: TaskId,
        assignment: Assignment,
    },
    Failed {
        task_id: TaskId,
        error: SchedulerError,
        /// The task went back on the queue.
        will_retry: bool,
    },
}

impl SchedulingEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Scheduled { task_id, .. } | Self::Failed { task_id, .. } => *task_id,
        }
    }
}

/// Result of [`LightrailScheduler::submit_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSubmission {
    /// Ids queued before the first failure, in order.
    pub accepted: Vec<TaskId>,
    /// Why the batch stopped early, if it did.
    pub error: Option<SchedulerError>,
}

struct SchedulerCore {
    config: SchedulerConfig,
    registry: DeviceRegistry,
    routes: RoutingEngine,
    policy: PolicyEngine,
    stats: SchedulerStats,
    tasks: Mutex<TaskTable>,
    queue: TaskQueue,
    events: broadcast::Sender<SchedulingEvent>,
}

impl SchedulerCore {
    fn schedule(&self, task: &mut Task) -> Result<Decision> {
        let result = self
            .policy
            .schedule(&self.registry, &self.routes, &self.config, &self.stats, task);
        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    /// One loop iteration: schedule the dequeued task and publish the result.
    fn process(&self, id: TaskId) {
        let Some(mut task) = self.tasks.lock().take_for_scheduling(id) else {
            debug!("Task {} no longer pending, skipping", id);
            return;
        };

        let event = match self.schedule(&mut task) {
            Ok(decision) => {
                self.tasks.lock().record_scheduled(&task);
                info!(
                    "Scheduled task {} on device {} ({})",
                    id, decision.assignment.device_id, decision.strategy
                );
                SchedulingEvent::Scheduled {
                    task_id: id,
                    assignment: decision.assignment,
                }
            }
            Err(error) => {
                warn!("Failed to schedule task {}: {}", id, error);
                let retry = self.tasks.lock().record_failure(
                    id,
                    error.clone(),
                    self.config.retry.max_retries,
                );
                let will_retry = retry && self.requeue(id);
                SchedulingEvent::Failed {
                    task_id: id,
                    error,
                    will_retry,
                }
            }
        };

        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn requeue(&self, id: TaskId) -> bool {
        match self.queue.push(id) {
            Ok(()) => {
                self.stats.record_retry();
                true
            }
            Err(e) => {
                warn!("Dropping retry of task {}: {}", id, e);
                self.tasks.lock().set_queued(id, false);
                false
            }
        }
    }
}

struct LoopHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<mpsc::Receiver<TaskId>>,
}

/// Mathematical task scheduler and router for a pool of heterogeneous
/// devices.
///
/// Owns all of its state; several independent instances can coexist.
pub struct LightrailScheduler {
    core: Arc<SchedulerCore>,
    running: Mutex<Option<LoopHandle>>,
}

impl LightrailScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let core = SchedulerCore {
            registry: DeviceRegistry::new(config.max_devices),
            routes: RoutingEngine::new(config.route_cache_enabled),
            policy: PolicyEngine::new(config.algorithm),
            stats: SchedulerStats::new(),
            tasks: Mutex::new(TaskTable::new(config.max_terminal_tasks)),
            queue: TaskQueue::new(config.queue_capacity),
            events,
            config,
        };

        info!(
            "Scheduler created: algorithm={:?}, objective={:?}, queue={}",
            core.config.algorithm, core.config.objective, core.config.queue_capacity
        );

        Ok(Self {
            core: Arc::new(core),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    // --- Device registry ---

    pub fn register_device(&self, device: Device) -> Result<DeviceId> {
        self.core.registry.register(device)
    }

    pub fn unregister_device(&self, id: DeviceId) -> Result<Device> {
        self.core.registry.unregister(id)
    }

    pub fn update_device_state(&self, id: DeviceId, patch: &DeviceStatePatch) -> Result<()> {
        self.core.registry.update_state(id, patch)
    }

    pub fn device(&self, id: DeviceId) -> Option<Device> {
        self.core.registry.get(id)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.core.registry.snapshot()
    }

    pub fn device_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Largest deviation of any device's utilization from the mean.
    pub fn load_imbalance(&self) -> f64 {
        self.core.registry.load_imbalance()
    }

    // --- Routing ---

    pub fn shortest_path(
        &self,
        from: DeviceId,
        to: DeviceId,
        objective: Objective,
    ) -> Result<Route> {
        let table = self.core.registry.read();
        self.core.routes.route(&table, from, to, objective)
    }

    /// Fill the route cache for every device pair. Returns the number of
    /// connected pairs.
    pub fn precompute_routes(&self, objective: Objective) -> usize {
        let table = self.core.registry.read();
        self.core.routes.precompute(&table, objective)
    }

    // --- Scheduling ---

    /// Place `task` right away, bypassing the queue. The task is not
    /// recorded in the status table.
    pub fn schedule_now(&self, task: &mut Task) -> Result<Decision> {
        self.core.schedule(task)
    }

    /// Queue a task for the scheduler loop. Never waits.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let id = task.id;
        self.core.tasks.lock().admit(task)?;

        if let Err(e) = self.core.queue.push(id) {
            self.core.tasks.lock().remove(id);
            warn!("Rejected task {}: {}", id, e);
            return Err(e);
        }

        self.core.stats.record_submitted();
        debug!("Task {} queued ({} waiting)", id, self.core.queue.len());
        Ok(id)
    }

    /// Submit tasks in order, stopping at the first one that is refused.
    pub fn submit_batch(&self, tasks: impl IntoIterator<Item = Task>) -> BatchSubmission {
        let mut accepted = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(id) => accepted.push(id),
                Err(e) => {
                    return BatchSubmission {
                        accepted,
                        error: Some(e),
                    }
                }
            }
        }
        BatchSubmission {
            accepted,
            error: None,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.core.queue.len()
    }

    /// Latest copy of a submitted task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.core.tasks.lock().get(id)
    }

    /// Why the last scheduling attempt for `id` failed, if it did.
    pub fn task_error(&self, id: TaskId) -> Option<SchedulerError> {
        self.core.tasks.lock().last_error(id)
    }

    /// State change reported by the execution layer. A preempted task
    /// moved back to Pending is queued again.
    pub fn report_task_state(&self, id: TaskId, state: TaskState) -> Result<Task> {
        let task = self.core.tasks.lock().transition(id, state)?;

        match state {
            TaskState::Completed => self.core.stats.record_completed(),
            TaskState::Pending => {
                if let Err(e) = self.core.queue.push(id) {
                    self.core.tasks.lock().set_queued(id, false);
                    warn!("Could not re-queue preempted task {}: {}", id, e);
                    return Err(e);
                }
                info!("Task {} re-queued after preemption", id);
            }
            _ => {}
        }
        Ok(task)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulingEvent> {
        self.core.events.subscribe()
    }

    // --- Statistics ---

    pub fn statistics(&self) -> StatsSnapshot {
        self.core.stats.snapshot(self.core.registry.load_imbalance())
    }

    pub fn reset_statistics(&self) {
        self.core.stats.reset();
    }

    // --- Lifecycle ---

    /// Spawn the scheduler loop on the current Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let rx = self
            .core
            .queue
            .take_receiver()
            .ok_or(SchedulerError::AlreadyRunning)?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.core), rx, shutdown.clone()));
        *running = Some(LoopHandle { shutdown, handle });

        info!(
            "Scheduler loop started ({})",
            self.core.policy.strategy_name()
        );
        Ok(())
    }

    /// Stop the loop after the task in flight, if any. Tasks still queued
    /// stay queued for the next `start`.
    pub async fn stop(&self) {
        let Some(LoopHandle { shutdown, handle }) = self.running.lock().take() else {
            return;
        };
        shutdown.cancel();

        match handle.await {
            Ok(rx) => self.core.queue.restore_receiver(rx),
            Err(e) => warn!("Scheduler loop ended abnormally: {}", e),
        }
        info!("Scheduler loop stopped ({} tasks queued)", self.core.queue.len());
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for LightrailScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.shutdown.cancel();
        }
    }
}

async fn run_loop(
    core: Arc<SchedulerCore>,
    mut rx: mpsc::Receiver<TaskId>,
    shutdown: CancellationToken,
) -> mpsc::Receiver<TaskId> {
    debug!("Scheduler loop running");
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("Scheduler loop received stop");
                break;
            }

            Some(id) = rx.recv() => {
                core.process(id);
            }
        }
    }
    rx
}
