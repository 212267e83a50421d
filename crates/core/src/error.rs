use thiserror::Error;

use crate::task::TaskState;
use crate::types::{DeviceId, TaskId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Device registry full ({limit} devices)")]
    CapacityExceeded { limit: usize },

    #[error("Task queue full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    #[error("No path from device {from} to device {to}")]
    NoPath { from: DeviceId, to: DeviceId },

    #[error("No eligible device for task {0}")]
    NoEligibleDevice(TaskId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Scheduler loop already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
