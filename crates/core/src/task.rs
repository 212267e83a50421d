use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, DeviceType, TaskId};

/// Maximum number of dependency ids a task may carry.
pub const MAX_DEPENDENCIES: usize = 16;

/// Lifecycle of a task.
///
/// Transitions are monotonic except `Preempted -> Pending`, which re-admits a
/// preempted task for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskState {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Preempted,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Running)
                | (Scheduled, Failed)
                | (Scheduled, Preempted)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Preempted)
                | (Preempted, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    #[default]
    Fp16,
    Int8,
}

/// What the task consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ResourceDemand {
    /// Floating point operations required.
    pub compute_ops: f64,
    pub memory_required_bytes: u64,
    pub memory_bandwidth_gbps: f64,
    pub batch_size: u32,
}

/// Hard and soft limits on placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TaskConstraints {
    /// Carried for the execution layer; never enforced by the scheduler.
    pub deadline_ms: Option<u64>,
    pub preferred_device_type: Option<DeviceType>,
    pub min_memory_bytes: u64,
    /// `None` means no power cap.
    pub max_power_watts: Option<f64>,
    pub precision: Precision,
}

/// Hint from the cache layer: state this task needs already lives on `device_id`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CacheAffinity {
    pub device_id: DeviceId,
    pub size_bytes: u64,
}

/// Scheduling output. Written only by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub device_id: DeviceId,
    /// Unix milliseconds.
    pub estimated_start_ms: u64,
    pub estimated_duration_ms: f64,
    pub estimated_power_watts: f64,
    pub estimated_cost: f64,
    /// Time spent moving cached state to the device, zero on a cache hit.
    pub transfer_time_ms: f64,
    pub cache_hit: bool,
    /// Strategy score of the chosen device (higher is better).
    pub score: f64,
    /// Weighted latency/power/cost objective of this placement.
    pub objective_value: f64,
}

/// One unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub id: TaskId,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub demand: ResourceDemand,
    #[serde(default)]
    pub constraints: TaskConstraints,
    #[serde(default)]
    pub cache: Option<CacheAffinity>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Higher = more important.
    #[serde(default)]
    pub priority: u32,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub assignment: Option<Assignment>,
}

impl Task {
    pub fn new(compute_ops: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Pending,
            demand: ResourceDemand {
                compute_ops,
                ..Default::default()
            },
            constraints: TaskConstraints::default(),
            cache: None,
            dependencies: Vec::new(),
            priority: 0,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            assignment: None,
        }
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.demand.memory_required_bytes = bytes;
        self
    }

    pub fn with_min_memory(mut self, bytes: u64) -> Self {
        self.constraints.min_memory_bytes = bytes;
        self
    }

    pub fn with_max_power(mut self, watts: f64) -> Self {
        self.constraints.max_power_watts = Some(watts);
        self
    }

    pub fn with_cache(mut self, device_id: DeviceId, size_bytes: u64) -> Self {
        self.cache = Some(CacheAffinity {
            device_id,
            size_bytes,
        });
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.constraints.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn with_dependency(mut self, task_id: TaskId) -> Self {
        self.dependencies.push(task_id);
        self
    }

    /// Memory a device must offer to be eligible.
    pub fn required_memory_bytes(&self) -> u64 {
        self.demand
            .memory_required_bytes
            .max(self.constraints.min_memory_bytes)
    }

    pub fn assigned_device(&self) -> Option<DeviceId> {
        self.assignment.as_ref().map(|a| a.device_id)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Preempted => write!(f, "preempted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use TaskState::*;

        assert!(Pending.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Preempted));
        assert!(Preempted.can_transition_to(Pending));

        // Only Preempted may go back to Pending
        assert!(!Scheduled.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Running));
    }

    #[test]
    fn test_required_memory_takes_larger_bound() {
        let task = Task::new(1e9).with_memory(4096).with_min_memory(8192);
        assert_eq!(task.required_memory_bytes(), 8192);

        let task = Task::new(1e9).with_memory(16384);
        assert_eq!(task.required_memory_bytes(), 16384);
    }

    #[test]
    fn test_task_from_toml_defaults() {
        let task: Task = toml::from_str(
            r#"
            priority = 3

            [demand]
            compute_ops = 2e12

            [cache]
            device_id = 1
            size_bytes = 1048576
            "#,
        )
        .unwrap();

        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.demand.compute_ops, 2e12);
        assert_eq!(task.cache.map(|c| c.device_id), Some(1));
        assert!(task.assignment.is_none());
        assert!(!task.id.is_nil());
    }
}
