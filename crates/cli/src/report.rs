use std::fmt::Write;

use serde::Serialize;

use lightrail_core::{Assignment, Route, TaskId, TaskState};
use lightrail_scheduler::{BatchSubmission, LightrailScheduler, StatsSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub state: TaskState,
    pub assignment: Option<Assignment>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    /// Why submission stopped early, if it did.
    pub submit_error: Option<String>,
    pub statistics: StatsSnapshot,
}

impl RunReport {
    pub fn collect(scheduler: &LightrailScheduler, batch: &BatchSubmission) -> Self {
        let tasks = batch
            .accepted
            .iter()
            .filter_map(|id| {
                let task = scheduler.task(*id)?;
                Some(TaskReport {
                    id: task.id,
                    state: task.state,
                    error: scheduler.task_error(*id).map(|e| e.to_string()),
                    assignment: task.assignment,
                })
            })
            .collect();

        Self {
            tasks,
            submit_error: batch.error.as_ref().map(|e| e.to_string()),
            statistics: scheduler.statistics(),
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.assignment.is_some()).count()
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<10} {:<10} {:>6} {:>12} {:>12} {:>6} {:>10}",
            "TASK", "STATE", "DEVICE", "DURATION_MS", "TRANSFER_MS", "CACHE", "COST"
        );
        for t in &self.tasks {
            let id = t.id.to_string();
            let short = &id[..8];
            match &t.assignment {
                Some(a) => {
                    let _ = writeln!(
                        out,
                        "{:<10} {:<10} {:>6} {:>12.3} {:>12.3} {:>6} {:>10.6}",
                        short,
                        t.state.to_string(),
                        a.device_id,
                        a.estimated_duration_ms,
                        a.transfer_time_ms,
                        if a.cache_hit { "hit" } else { "-" },
                        a.estimated_cost
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{:<10} {:<10} {}",
                        short,
                        t.state.to_string(),
                        t.error.as_deref().unwrap_or("not scheduled")
                    );
                }
            }
        }
        if let Some(e) = &self.submit_error {
            let _ = writeln!(out, "submission stopped: {}", e);
        }

        let s = &self.statistics;
        let _ = writeln!(
            out,
            "\nscheduled={} failed={} cache_aware={} moved={}B avg_decision={:.1}us \
             imbalance={:.1}%",
            s.tasks_scheduled,
            s.scheduling_failures,
            s.cache_aware_decisions,
            s.data_movement_bytes,
            s.avg_decision_time_us,
            s.load_imbalance_pct
        );
        out
    }
}

pub fn render_route(route: &Route) -> String {
    let path: Vec<String> = route.path.iter().map(|id| id.to_string()).collect();
    let mut out = String::new();
    let _ = writeln!(out, "path:       {}", path.join(" -> "));
    let _ = writeln!(out, "hops:       {}", route.hops());
    let _ = writeln!(out, "latency:    {:.3} us", route.total_latency_us);
    let _ = writeln!(out, "bandwidth:  {} Gbps", route.bandwidth_gbps);
    let _ = writeln!(out, "cost:       {:.6} /s", route.total_cost);
    let _ = writeln!(out, "objective:  {:?} ({})", route.objective, route.search_cost);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterFile;
    use lightrail_core::{Algorithm, Objective, SchedulerConfig};

    const DEMO: &str = include_str!("../../../demos/cluster.toml");

    #[test]
    fn test_report_for_demo_cluster() {
        let cluster = ClusterFile::parse(DEMO).unwrap();
        let config = SchedulerConfig {
            algorithm: Algorithm::OptimalShortestPath,
            ..Default::default()
        };
        let scheduler = LightrailScheduler::new(config).unwrap();
        cluster.register_devices(&scheduler).unwrap();

        // Place synchronously, bypassing the queue
        let mut tasks = cluster.tasks.clone();
        for task in &mut tasks {
            scheduler.schedule_now(task).unwrap();
        }
        // The cached task lands on its cache device
        assert_eq!(tasks[0].assigned_device(), Some(1));
        // The 40 GiB task under a 300 W cap only fits gpu-0
        assert_eq!(tasks[2].assigned_device(), Some(0));

        let batch = BatchSubmission {
            accepted: Vec::new(),
            error: None,
        };
        let report = RunReport::collect(&scheduler, &batch);
        assert_eq!(report.statistics.tasks_scheduled, 3);
        assert!(report.render_table().contains("scheduled=3"));
    }

    #[test]
    fn test_render_route() {
        let route = Route::local(4, Objective::MinimizeLatency);
        let text = render_route(&route);
        assert!(text.contains("path:       4"));
        assert!(text.contains("hops:       0"));
    }
}
