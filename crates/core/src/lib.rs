pub mod config;
pub mod error;
pub mod route;
pub mod task;
pub mod types;

pub use config::{Algorithm, LightrailConfig, Objective, RetryPolicy, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use route::Route;
pub use task::{Assignment, CacheAffinity, Task, TaskState};
pub use types::{Device, DeviceId, DeviceState, DeviceStatePatch, DeviceType, Link, TaskId};
