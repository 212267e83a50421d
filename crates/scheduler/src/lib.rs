pub mod cache_affinity;
pub mod least_loaded;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod service;
pub mod stats;
pub mod tasks;

#[cfg(test)]
pub(crate) mod tests_common;

pub use cache_affinity::{cache_benefit, cache_transfer, CacheAffinityStrategy, CacheTransfer};
pub use least_loaded::LeastLoadedStrategy;
pub use policy::{Decision, PolicyEngine, SchedulingContext, SchedulingStrategy, Selection};
pub use registry::{DeviceRegistry, DeviceTable};
pub use routing::{shortest_path, RoutingEngine};
pub use service::{BatchSubmission, LightrailScheduler, SchedulingEvent};
pub use stats::{SchedulerStats, StatsSnapshot};
