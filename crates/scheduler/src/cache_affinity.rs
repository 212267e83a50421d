use lightrail_core::{Device, DeviceId, Result, SchedulerError, Task};
use tracing::{debug, warn};

use crate::policy::{
    estimated_exec_time_ms, utilization_penalty, SchedulingContext, SchedulingStrategy, Selection,
};

/// Bonus for running `task` on `candidate`: the full `bonus` on the device
/// holding the task's cached state, zero everywhere else.
pub fn cache_benefit(task: &Task, candidate: DeviceId, bonus: f64) -> f64 {
    match task.cache {
        Some(cache) if cache.device_id == candidate => bonus,
        _ => 0.0,
    }
}

/// How a task's cached state gets to a candidate device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheTransfer {
    /// Nothing moves: no affinity, a cache hit, or the cache device is gone.
    Local,
    /// The state is copied over the shortest route from the cache device.
    Routed { time_ms: f64, bytes: u64 },
    /// No route from the cache device. The candidate rebuilds the state.
    Unreachable,
}

impl CacheTransfer {
    pub fn time_ms(&self) -> f64 {
        match self {
            CacheTransfer::Routed { time_ms, .. } => *time_ms,
            _ => 0.0,
        }
    }

    pub fn moved_bytes(&self) -> u64 {
        match self {
            CacheTransfer::Routed { bytes, .. } => *bytes,
            _ => 0,
        }
    }

    pub fn is_reachable(&self) -> bool {
        !matches!(self, CacheTransfer::Unreachable)
    }
}

/// Transfer of the task's cached state to `candidate`, routed under the
/// configured objective.
pub fn cache_transfer(
    ctx: &SchedulingContext<'_>,
    task: &Task,
    candidate: DeviceId,
) -> CacheTransfer {
    let Some(cache) = task.cache else {
        return CacheTransfer::Local;
    };
    if cache.device_id == candidate {
        return CacheTransfer::Local;
    }
    if !ctx.devices.contains(cache.device_id) {
        debug!(
            "Task {}: cache device {} is not registered, ignoring affinity",
            task.id, cache.device_id
        );
        return CacheTransfer::Local;
    }

    match ctx
        .routes
        .route(ctx.devices, cache.device_id, candidate, ctx.config.objective)
    {
        Ok(route) => CacheTransfer::Routed {
            time_ms: route.transfer_time_ms(cache.size_bytes),
            bytes: cache.size_bytes,
        },
        Err(e) => {
            debug!(
                "Task {}: no route {} -> {}: {}",
                task.id, cache.device_id, candidate, e
            );
            CacheTransfer::Unreachable
        }
    }
}

/// Cache-aware strategy. Scores every eligible device with
///
///   score = cache_benefit - exec_time_ms - transfer_time_ms - utilization / 10
///
/// and takes the maximum. Devices the cached state cannot reach rank below
/// every reachable one, scored without a transfer term. Each task is placed
/// greedily on its own; there is no joint optimisation across the queue.
pub struct CacheAffinityStrategy;

impl CacheAffinityStrategy {
    pub fn new() -> Self {
        Self
    }

    fn score(ctx: &SchedulingContext<'_>, task: &Task, device: &Device) -> (Selection, bool) {
        let transfer = cache_transfer(ctx, task, device.id);
        let exec = estimated_exec_time_ms(task, device);
        let score = cache_benefit(task, device.id, ctx.config.cache_hit_bonus)
            - exec
            - transfer.time_ms()
            - utilization_penalty(device);

        let selection = Selection {
            device_id: device.id,
            score,
            exec_time_ms: exec,
            transfer_time_ms: transfer.time_ms(),
            moved_bytes: transfer.moved_bytes(),
        };
        (selection, transfer.is_reachable())
    }
}

impl Default for CacheAffinityStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingStrategy for CacheAffinityStrategy {
    fn select_device(
        &self,
        ctx: &SchedulingContext<'_>,
        task: &Task,
        eligible: &[&Device],
    ) -> Result<Selection> {
        let mut best: Option<Selection> = None;
        let mut best_unreachable: Option<Selection> = None;

        for device in eligible {
            let (candidate, reachable) = Self::score(ctx, task, device);
            debug!(
                "Cache-affinity score for device {}: {:.2}{}",
                device.id,
                candidate.score,
                if reachable { "" } else { " (unreachable)" }
            );

            let slot = if reachable {
                &mut best
            } else {
                &mut best_unreachable
            };
            // Strict: the lowest id keeps a tie
            if slot.as_ref().map_or(true, |b| candidate.score > b.score) {
                *slot = Some(candidate);
            }
        }

        if best.is_none() {
            if let (Some(s), Some(cache)) = (&best_unreachable, task.cache) {
                warn!(
                    "Task {}: cache device {} reaches no eligible device, rebuilding state on {}",
                    task.id, cache.device_id, s.device_id
                );
            }
        }
        best.or(best_unreachable)
            .ok_or(SchedulerError::NoEligibleDevice(task.id))
    }

    fn name(&self) -> &str {
        "cache-affinity"
    }

    fn is_cache_aware(&self) -> bool {
        true
    }
}
