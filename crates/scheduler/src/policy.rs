use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lightrail_core::{
    Algorithm, Assignment, Device, DeviceId, Result, SchedulerConfig, SchedulerError, Task,
    TaskState,
};
use tracing::{debug, warn};

use crate::cache_affinity::CacheAffinityStrategy;
use crate::least_loaded::LeastLoadedStrategy;
use crate::registry::{DeviceRegistry, DeviceTable};
use crate::routing::RoutingEngine;
use crate::stats::SchedulerStats;

/// Read-only view a strategy scores against.
pub struct SchedulingContext<'a> {
    pub devices: &'a DeviceTable,
    pub routes: &'a RoutingEngine,
    pub config: &'a SchedulerConfig,
}

/// A strategy's pick, plus the estimates it computed on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub device_id: DeviceId,
    pub score: f64,
    pub exec_time_ms: f64,
    pub transfer_time_ms: f64,
    /// Cached bytes copied to the device. Zero on a hit or when the state
    /// cannot be routed there.
    pub moved_bytes: u64,
}

/// Device selection algorithm.
pub trait SchedulingStrategy: Send + Sync {
    /// Pick one of `eligible` (ascending id, never empty) for `task`.
    fn select_device(
        &self,
        ctx: &SchedulingContext<'_>,
        task: &Task,
        eligible: &[&Device],
    ) -> Result<Selection>;

    /// Name of the scheduling algorithm.
    fn name(&self) -> &str;

    /// Whether decisions from this strategy count towards cache-aware stats.
    fn is_cache_aware(&self) -> bool {
        false
    }
}

pub fn strategy_for(algorithm: Algorithm) -> Box<dyn SchedulingStrategy> {
    match algorithm {
        Algorithm::OptimalShortestPath => Box::new(CacheAffinityStrategy::new()),
        Algorithm::GreedyLeastLoaded => Box::new(LeastLoadedStrategy::new()),
    }
}

/// Hard constraints: memory, power cap, saturation ceiling, and some
/// compute throughput if the task needs any.
pub fn is_eligible(device: &Device, task: &Task, config: &SchedulerConfig) -> bool {
    if device.capabilities.memory_capacity_bytes < task.required_memory_bytes() {
        return false;
    }
    if let Some(cap) = task.constraints.max_power_watts {
        if device.state.power_draw_watts > cap {
            return false;
        }
    }
    if device.state.utilization_pct >= config.saturation_ceiling_pct {
        return false;
    }
    if task.demand.compute_ops > 0.0 && device.capabilities.peak_performance_tflops <= 0.0 {
        return false;
    }
    true
}

/// `compute_ops / (peak * (1 - utilization))`, in milliseconds.
pub fn estimated_exec_time_ms(task: &Task, device: &Device) -> f64 {
    let ops = task.demand.compute_ops;
    if ops <= 0.0 {
        return 0.0;
    }
    let available = 1.0 - device.state.utilization_pct / 100.0;
    let flops = device.capabilities.peak_performance_tflops * available * 1e12;
    if flops <= 0.0 {
        return f64::INFINITY;
    }
    ops / flops * 1000.0
}

pub fn utilization_penalty(device: &Device) -> f64 {
    device.state.utilization_pct / 10.0
}

/// Result of one successful scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub assignment: Assignment,
    pub strategy: String,
    /// Utilization of the chosen device after the added load.
    pub device_utilization_pct: f64,
}

/// Applies the configured strategy to a task and commits the result.
pub struct PolicyEngine {
    strategy: Box<dyn SchedulingStrategy>,
}

impl PolicyEngine {
    pub fn new(algorithm: Algorithm) -> Self {
        Self::with_strategy(strategy_for(algorithm))
    }

    pub fn with_strategy(strategy: Box<dyn SchedulingStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Choose a device for `task`, fill in its assignment and mark it
    /// Scheduled. On error the task is left untouched.
    pub fn schedule(
        &self,
        registry: &DeviceRegistry,
        routes: &RoutingEngine,
        config: &SchedulerConfig,
        stats: &SchedulerStats,
        task: &mut Task,
    ) -> Result<Decision> {
        let started = Instant::now();

        let (selection, device) = {
            let table = registry.read();
            let eligible: Vec<&Device> = table
                .iter()
                .filter(|d| is_eligible(d, task, config))
                .collect();

            if eligible.is_empty() {
                debug!(
                    "Task {}: none of {} devices eligible",
                    task.id,
                    table.len()
                );
                return Err(SchedulerError::NoEligibleDevice(task.id));
            }

            let ctx = SchedulingContext {
                devices: &table,
                routes,
                config,
            };
            let selection = self.strategy.select_device(&ctx, task, &eligible)?;
            let device = table
                .get(selection.device_id)
                .cloned()
                .ok_or(SchedulerError::DeviceNotFound(selection.device_id))?;
            (selection, device)
        };

        // Registry write section. The device may have gone since the read.
        let load = task.demand.compute_ops / 1e12 * config.load_per_tflop_pct;
        let device_utilization_pct = registry.add_load(selection.device_id, load)?;

        let cache_hit = task
            .cache
            .is_some_and(|c| c.device_id == selection.device_id);
        let duration_ms = selection.exec_time_ms + selection.transfer_time_ms;
        let estimated_cost = device.economics.cost_per_hour * duration_ms / 3_600_000.0
            + device.economics.cost_per_inference;
        let estimated_power_watts = device.state.power_draw_watts;

        let assignment = Assignment {
            device_id: selection.device_id,
            estimated_start_ms: now_ms()
                .saturating_add(selection.transfer_time_ms.max(0.0) as u64),
            estimated_duration_ms: duration_ms,
            estimated_power_watts,
            estimated_cost,
            transfer_time_ms: selection.transfer_time_ms,
            cache_hit,
            score: selection.score,
            objective_value: config.weighted_objective(
                duration_ms,
                estimated_power_watts,
                estimated_cost,
            ),
        };

        task.assignment = Some(assignment.clone());
        task.state = TaskState::Scheduled;

        stats.record_decision(
            started.elapsed(),
            self.strategy.is_cache_aware() && cache_hit,
            selection.moved_bytes,
            estimated_cost,
        );

        debug!(
            "Task {} -> device {} via {} (score={:.2}, exec={:.2}ms, transfer={:.2}ms)",
            task.id,
            selection.device_id,
            self.strategy.name(),
            selection.score,
            selection.exec_time_ms,
            selection.transfer_time_ms
        );

        let imbalance = registry.load_imbalance();
        if imbalance > config.load_imbalance_threshold_pct {
            warn!(
                "Load imbalance {:.1}% exceeds threshold {:.1}%",
                imbalance, config.load_imbalance_threshold_pct
            );
        }

        Ok(Decision {
            assignment,
            strategy: self.strategy.name().to_string(),
            device_utilization_pct,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
