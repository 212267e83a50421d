use lightrail_core::{Device, Result, SchedulerError, Task};
use tracing::{debug, warn};

use crate::cache_affinity::cache_transfer;
use crate::policy::{estimated_exec_time_ms, SchedulingContext, SchedulingStrategy, Selection};

/// Fast fallback: the eligible device with the lowest utilization.
/// Ignores cache affinity and routing cost when choosing.
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for LeastLoadedStrategy {
    fn select_device(
        &self,
        ctx: &SchedulingContext<'_>,
        task: &Task,
        eligible: &[&Device],
    ) -> Result<Selection> {
        let mut best: Option<&Device> = None;
        for device in eligible {
            if best.map_or(true, |b| device.state.utilization_pct < b.state.utilization_pct) {
                best = Some(device);
            }
        }
        let device = best.ok_or(SchedulerError::NoEligibleDevice(task.id))?;

        // Only for the estimate; an unreachable cache does not block the choice
        let transfer = cache_transfer(ctx, task, device.id);
        if !transfer.is_reachable() {
            if let Some(cache) = task.cache {
                warn!(
                    "Task {}: no route from cache device {} to device {}, rebuilding state",
                    task.id, cache.device_id, device.id
                );
            }
        }

        debug!(
            "Least loaded: selected device {} ({:.1}%)",
            device.id, device.state.utilization_pct
        );
        Ok(Selection {
            device_id: device.id,
            score: 100.0 - device.state.utilization_pct,
            exec_time_ms: estimated_exec_time_ms(task, device),
            transfer_time_ms: transfer.time_ms(),
            moved_bytes: transfer.moved_bytes(),
        })
    }

    fn name(&self) -> &str {
        "greedy-least-loaded"
    }
}
