use serde::{Deserialize, Serialize};

use crate::config::Objective;
use crate::types::DeviceId;

/// Path computed between two devices for one transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub source: DeviceId,
    pub dest: DeviceId,
    /// Every device on the path, `source` first and `dest` last.
    pub path: Vec<DeviceId>,
    pub total_latency_us: f64,
    /// Bottleneck (minimum) bandwidth along the path. Infinite for a
    /// zero-hop route.
    pub bandwidth_gbps: f64,
    /// Sum of each hop's per-second cost contribution.
    pub total_cost: f64,
    /// Reserved; always 1.0 (uncongested).
    pub congestion_factor: f64,
    pub objective: Objective,
    /// Summed edge cost the search minimised for `objective`.
    pub search_cost: f64,
}

impl Route {
    /// A device routing to itself.
    pub fn local(device: DeviceId, objective: Objective) -> Self {
        Self {
            source: device,
            dest: device,
            path: vec![device],
            total_latency_us: 0.0,
            bandwidth_gbps: f64::INFINITY,
            total_cost: 0.0,
            congestion_factor: 1.0,
            objective,
            search_cost: 0.0,
        }
    }

    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    /// Bottleneck bandwidth in bytes per second.
    pub fn bandwidth_bytes_per_sec(&self) -> f64 {
        self.bandwidth_gbps * 1e9 / 8.0
    }

    /// Time to move `bytes` along this route: path latency plus
    /// serialisation at the bottleneck bandwidth.
    pub fn transfer_time_ms(&self, bytes: u64) -> f64 {
        let latency_ms = self.total_latency_us / 1000.0;
        let bps = self.bandwidth_bytes_per_sec();
        if bps <= 0.0 {
            return f64::INFINITY;
        }
        latency_ms + bytes as f64 / bps * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_route_moves_data_for_free() {
        let route = Route::local(3, Objective::MinimizeLatency);
        assert_eq!(route.hops(), 0);
        assert_eq!(route.transfer_time_ms(1 << 30), 0.0);
    }

    #[test]
    fn test_transfer_time() {
        let route = Route {
            source: 0,
            dest: 1,
            path: vec![0, 1],
            total_latency_us: 2000.0,
            // 8 Gbit/s = 1e9 bytes/s
            bandwidth_gbps: 8.0,
            total_cost: 0.0,
            congestion_factor: 1.0,
            objective: Objective::MinimizeLatency,
            search_cost: 2000.0,
        };

        // 2 ms latency + 1e9 bytes at 1e9 B/s = 1000 ms
        let t = route.transfer_time_ms(1_000_000_000);
        assert!((t - 1002.0).abs() < 1e-9);
    }
}
