//! Least-cost paths over the device graph.
//!
//! Devices are nodes, their outgoing links are directed edges. The scalar
//! weight of an edge depends on the [`Objective`]:
//!
//! | objective            | edge cost                          |
//! |----------------------|------------------------------------|
//! | `MinimizeLatency`    | link latency (µs)                  |
//! | `MinimizePower`      | power draw of the *source* device  |
//! | `MinimizeCost`       | cost per hour of the source device |
//! | `MaximizeThroughput` | 1 / link bandwidth                 |
//! | `Balanced`           | 1 (fewest hops)                    |
//!
//! Equal-cost paths are not canonicalised: relaxation only replaces a
//! predecessor on a strictly cheaper path, so the first path discovered
//! (following link declaration order) wins.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use lightrail_core::{Device, DeviceId, Link, Objective, Result, Route, SchedulerError};
use parking_lot::Mutex;
use tracing::debug;

use crate::registry::DeviceTable;

/// Cost of traversing `link` out of `device`. `None` if the link is unusable.
pub fn edge_cost(objective: Objective, device: &Device, link: &Link) -> Option<f64> {
    let cost = match objective {
        Objective::MinimizeLatency => link.latency_us,
        Objective::MinimizePower => device.state.power_draw_watts,
        Objective::MinimizeCost => device.economics.cost_per_hour,
        Objective::MaximizeThroughput => {
            if link.bandwidth_gbps <= 0.0 {
                return None;
            }
            1.0 / link.bandwidth_gbps
        }
        Objective::Balanced => 1.0,
    };
    if cost.is_nan() {
        return None;
    }
    // Dijkstra needs non-negative weights.
    Some(cost.max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f64,
    device: DeviceId,
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, lower id first among equals
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.device.cmp(&self.device))
    }
}

/// Dijkstra from `from` to `to`, stopping once `to` is settled.
pub fn shortest_path(
    table: &DeviceTable,
    from: DeviceId,
    to: DeviceId,
    objective: Objective,
) -> Result<Route> {
    if !table.contains(from) {
        return Err(SchedulerError::DeviceNotFound(from));
    }
    if !table.contains(to) {
        return Err(SchedulerError::DeviceNotFound(to));
    }
    if from == to {
        return Ok(Route::local(from, objective));
    }

    let mut dist: HashMap<DeviceId, f64> = HashMap::new();
    // device -> (predecessor, index of the link used in predecessor.links)
    let mut prev: HashMap<DeviceId, (DeviceId, usize)> = HashMap::new();
    let mut settled: HashSet<DeviceId> = HashSet::new();
    let mut heap = BinaryHeap::new();

    dist.insert(from, 0.0);
    heap.push(Frontier {
        cost: 0.0,
        device: from,
    });

    while let Some(Frontier { cost, device }) = heap.pop() {
        if !settled.insert(device) {
            continue;
        }
        if device == to {
            break;
        }
        let Some(current) = table.get(device) else {
            continue;
        };

        for (idx, link) in current.links.iter().enumerate() {
            let neighbor = link.neighbor;
            if settled.contains(&neighbor) || !table.contains(neighbor) {
                continue;
            }
            let Some(weight) = edge_cost(objective, current, link) else {
                continue;
            };

            let alt = cost + weight;
            let known = dist.get(&neighbor).copied().unwrap_or(f64::INFINITY);
            if alt < known {
                dist.insert(neighbor, alt);
                prev.insert(neighbor, (device, idx));
                heap.push(Frontier {
                    cost: alt,
                    device: neighbor,
                });
            }
        }
    }

    if !settled.contains(&to) {
        debug!("No route from {} to {} ({:?})", from, to, objective);
        return Err(SchedulerError::NoPath { from, to });
    }

    // Walk predecessors back from the destination
    let mut hops: Vec<(DeviceId, usize)> = Vec::new();
    let mut cursor = to;
    while cursor != from {
        let Some(&(p, idx)) = prev.get(&cursor) else {
            return Err(SchedulerError::NoPath { from, to });
        };
        hops.push((p, idx));
        cursor = p;
    }
    hops.reverse();

    let mut route = Route {
        source: from,
        dest: to,
        path: Vec::with_capacity(hops.len() + 1),
        total_latency_us: 0.0,
        bandwidth_gbps: f64::INFINITY,
        total_cost: 0.0,
        congestion_factor: 1.0,
        objective,
        search_cost: dist.get(&to).copied().unwrap_or(0.0),
    };
    route.path.push(from);

    for (device_id, idx) in hops {
        let Some(device) = table.get(device_id) else {
            return Err(SchedulerError::DeviceNotFound(device_id));
        };
        let link = &device.links[idx];
        route.path.push(link.neighbor);
        route.total_latency_us += link.latency_us;
        route.bandwidth_gbps = route.bandwidth_gbps.min(link.bandwidth_gbps);
        route.total_cost += device.economics.cost_per_hour / 3600.0;
    }

    debug!(
        "Route {} -> {} ({:?}): {:?}, {:.1}us, {:.1}Gbps",
        from, to, objective, route.path, route.total_latency_us, route.bandwidth_gbps
    );
    Ok(route)
}

#[derive(Default)]
struct RouteCache {
    generation: u64,
    routes: HashMap<(DeviceId, DeviceId, Objective), Route>,
}

/// Shortest-path queries with a route cache keyed by (source, dest, objective).
///
/// Entries are stamped with the registry generation they were computed
/// against; the first lookup that sees a newer generation drops the whole
/// cache. Lock order: callers hold the registry read lock, then this cache.
pub struct RoutingEngine {
    cache: Mutex<RouteCache>,
    enabled: bool,
}

impl RoutingEngine {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache: Mutex::new(RouteCache::default()),
            enabled: cache_enabled,
        }
    }

    pub fn route(
        &self,
        table: &DeviceTable,
        from: DeviceId,
        to: DeviceId,
        objective: Objective,
    ) -> Result<Route> {
        if !self.enabled {
            return shortest_path(table, from, to, objective);
        }

        let key = (from, to, objective);
        {
            let mut cache = self.cache.lock();
            if cache.generation != table.generation() {
                cache.routes.clear();
                cache.generation = table.generation();
            } else if let Some(route) = cache.routes.get(&key) {
                return Ok(route.clone());
            }
        }

        let route = shortest_path(table, from, to, objective)?;

        let mut cache = self.cache.lock();
        if cache.generation == table.generation() {
            cache.routes.insert(key, route.clone());
        }
        Ok(route)
    }

    /// Compute and cache routes for every ordered pair of devices.
    /// Returns how many pairs are connected.
    pub fn precompute(&self, table: &DeviceTable, objective: Objective) -> usize {
        let ids: Vec<DeviceId> = table.iter().map(|d| d.id).collect();
        let mut reachable = 0;
        for &from in &ids {
            for &to in &ids {
                if from != to && self.route(table, from, to, objective).is_ok() {
                    reachable += 1;
                }
            }
        }
        debug!("Precomputed {} routes ({:?})", reachable, objective);
        reachable
    }

    pub fn cached_routes(&self) -> usize {
        self.cache.lock().routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::tests_common::*;

    /// One device per entry, each declaring its outgoing links up front.
    fn build(links: &[Vec<Link>]) -> DeviceRegistry {
        let registry = DeviceRegistry::new(None);
        for (i, out) in links.iter().enumerate() {
            let mut device = make_gpu(&format!("d{}", i), 0.0);
            device.links = out.clone();
            registry.register(device).unwrap();
        }
        registry
    }

    fn link(to: DeviceId, bw: f64, lat: f64) -> Link {
        Link::new(to, bw, lat)
    }

    #[test]
    fn test_bottleneck_bandwidth() {
        // 0 -> 1 -> 2 -> 3 with bandwidths 10, 4, 8
        let registry = build(&[
            vec![link(1, 10.0, 1.0)],
            vec![link(2, 4.0, 1.0)],
            vec![link(3, 8.0, 1.0)],
            vec![],
        ]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 3, Objective::MinimizeLatency).unwrap();

        assert_eq!(route.path, vec![0, 1, 2, 3]);
        assert_eq!(route.hops(), 3);
        assert_eq!(route.bandwidth_gbps, 4.0);
        assert_eq!(route.total_latency_us, 3.0);
        assert_eq!(route.congestion_factor, 1.0);
    }

    #[test]
    fn test_picks_cheaper_multi_hop_path() {
        // Direct 0->2 costs 10us, 0->1->2 costs 2us
        let registry = build(&[
            vec![link(2, 100.0, 10.0), link(1, 100.0, 1.0)],
            vec![link(2, 100.0, 1.0)],
            vec![],
        ]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 2, Objective::MinimizeLatency).unwrap();

        assert_eq!(route.path, vec![0, 1, 2]);
        assert_eq!(route.search_cost, 2.0);
    }

    #[test]
    fn test_throughput_prefers_wide_links() {
        // Direct link is fast but narrow; the detour is wide
        let registry = build(&[
            vec![link(2, 1.0, 1.0), link(1, 400.0, 50.0)],
            vec![link(2, 400.0, 50.0)],
            vec![],
        ]);
        let table = registry.read();

        let fast = shortest_path(&table, 0, 2, Objective::MinimizeLatency).unwrap();
        assert_eq!(fast.path, vec![0, 2]);

        let wide = shortest_path(&table, 0, 2, Objective::MaximizeThroughput).unwrap();
        assert_eq!(wide.path, vec![0, 1, 2]);
        assert_eq!(wide.bandwidth_gbps, 400.0);
    }

    #[test]
    fn test_power_objective_charges_source_device() {
        // 0 -> {1, 2} -> 3; device 1 draws far more power than device 2
        let registry = DeviceRegistry::new(None);
        registry
            .register(
                make_gpu("src", 0.0)
                    .with_link(link(1, 100.0, 1.0))
                    .with_link(link(2, 100.0, 5.0)),
            )
            .unwrap();
        registry
            .register(make_gpu("hot", 0.0).with_power_draw(700.0).with_link(link(3, 100.0, 1.0)))
            .unwrap();
        registry
            .register(make_gpu("cool", 0.0).with_power_draw(50.0).with_link(link(3, 100.0, 5.0)))
            .unwrap();
        registry.register(make_gpu("dst", 0.0)).unwrap();
        let table = registry.read();

        let by_latency = shortest_path(&table, 0, 3, Objective::MinimizeLatency).unwrap();
        assert_eq!(by_latency.path, vec![0, 1, 3]);

        let by_power = shortest_path(&table, 0, 3, Objective::MinimizePower).unwrap();
        assert_eq!(by_power.path, vec![0, 2, 3]);
        // source (300W) + cool (50W)
        assert_eq!(by_power.search_cost, 350.0);
    }

    #[test]
    fn test_route_cost_is_per_second() {
        let registry = build(&[vec![link(1, 100.0, 1.0)], vec![link(2, 100.0, 1.0)], vec![]]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 2, Objective::MinimizeCost).unwrap();

        // Two hops out of devices costing 3.6/h = 0.001/s each
        assert!((route.total_cost - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_equal_cost_paths_keep_first_discovered() {
        // 0 -> 1 -> 3 and 0 -> 2 -> 3 both cost 2 hops; link to 1 is declared first.
        // This documents the tie-break, it is not a canonical minimum.
        let registry = build(&[
            vec![link(1, 100.0, 1.0), link(2, 100.0, 1.0)],
            vec![link(3, 100.0, 1.0)],
            vec![link(3, 100.0, 1.0)],
            vec![],
        ]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 3, Objective::Balanced).unwrap();
        assert_eq!(route.path, vec![0, 1, 3]);
    }

    #[test]
    fn test_parallel_links_use_the_cheaper_one() {
        let registry = build(&[vec![link(1, 10.0, 9.0), link(1, 25.0, 2.0)], vec![]]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 1, Objective::MinimizeLatency).unwrap();

        assert_eq!(route.total_latency_us, 2.0);
        assert_eq!(route.bandwidth_gbps, 25.0);
    }

    #[test]
    fn test_no_path_and_unknown_devices() {
        // Links are directed: 1 cannot reach 0
        let registry = build(&[vec![link(1, 10.0, 1.0)], vec![]]);
        let table = registry.read();

        assert_eq!(
            shortest_path(&table, 1, 0, Objective::MinimizeLatency).unwrap_err(),
            SchedulerError::NoPath { from: 1, to: 0 }
        );
        assert_eq!(
            shortest_path(&table, 0, 9, Objective::MinimizeLatency).unwrap_err(),
            SchedulerError::DeviceNotFound(9)
        );
    }

    #[test]
    fn test_route_to_self() {
        let registry = build(&[vec![]]);
        let table = registry.read();
        let route = shortest_path(&table, 0, 0, Objective::MinimizeLatency).unwrap();
        assert_eq!(route.path, vec![0]);
        assert_eq!(route.hops(), 0);
    }

    #[test]
    fn test_dangling_links_are_ignored() {
        // Device 0 links to 1 (exists) and 7 (never registered)
        let registry = DeviceRegistry::new(None);
        registry
            .register(make_gpu("a", 0.0).with_link(link(1, 100.0, 1.0)))
            .unwrap();
        registry
            .register(
                make_gpu("b", 0.0)
                    .with_link(link(7, 100.0, 1.0))
                    .with_link(link(2, 100.0, 1.0)),
            )
            .unwrap();
        registry.register(make_gpu("c", 0.0)).unwrap();
        let table = registry.read();

        let route = shortest_path(&table, 0, 2, Objective::MinimizeLatency).unwrap();
        assert_eq!(route.path, vec![0, 1, 2]);
    }

    /// Exhaustive minimum over all simple paths, for cross-checking.
    fn brute_force_min(
        table: &DeviceTable,
        from: DeviceId,
        to: DeviceId,
        objective: Objective,
    ) -> Option<f64> {
        fn walk(
            table: &DeviceTable,
            at: DeviceId,
            to: DeviceId,
            objective: Objective,
            seen: &mut Vec<DeviceId>,
            acc: f64,
            best: &mut Option<f64>,
        ) {
            if at == to {
                *best = Some(best.map_or(acc, |b: f64| b.min(acc)));
                return;
            }
            let Some(device) = table.get(at) else { return };
            for link in &device.links {
                if seen.contains(&link.neighbor) || !table.contains(link.neighbor) {
                    continue;
                }
                let Some(w) = edge_cost(objective, device, link) else { continue };
                seen.push(link.neighbor);
                walk(table, link.neighbor, to, objective, seen, acc + w, best);
                seen.pop();
            }
        }

        let mut best = None;
        walk(table, from, to, objective, &mut vec![from], 0.0, &mut best);
        best
    }

    #[test]
    fn test_matches_exhaustive_search_on_cyclic_graph() {
        let registry = DeviceRegistry::new(None);
        let layout: Vec<(f64, f64, Vec<Link>)> = vec![
            (300.0, 1.0, vec![link(1, 40.0, 3.0), link(2, 10.0, 1.0)]),
            (120.0, 4.0, vec![link(0, 40.0, 3.0), link(3, 25.0, 2.0), link(4, 5.0, 9.0)]),
            (450.0, 2.0, vec![link(1, 80.0, 1.0), link(4, 100.0, 6.0)]),
            (90.0, 0.5, vec![link(4, 60.0, 1.0), link(2, 20.0, 2.0)]),
            (200.0, 3.0, vec![link(0, 15.0, 4.0)]),
        ];
        for (i, (power, cost, links)) in layout.into_iter().enumerate() {
            let mut device = make_gpu(&format!("d{}", i), 0.0)
                .with_power_draw(power)
                .with_cost_per_hour(cost);
            device.links = links;
            registry.register(device).unwrap();
        }
        let table = registry.read();

        let objectives = [
            Objective::MinimizeLatency,
            Objective::MinimizePower,
            Objective::MinimizeCost,
            Objective::MaximizeThroughput,
            Objective::Balanced,
        ];
        for objective in objectives {
            for from in 0..5 {
                for to in 0..5 {
                    let expected = brute_force_min(&table, from, to, objective);
                    match shortest_path(&table, from, to, objective) {
                        Ok(route) => {
                            let best = expected.expect("dijkstra found a path brute force did not");
                            assert!(
                                (route.search_cost - best).abs() < 1e-9,
                                "{:?} {}->{}: {} vs {}",
                                objective,
                                from,
                                to,
                                route.search_cost,
                                best
                            );
                        }
                        Err(e) => {
                            assert!(expected.is_none(), "{:?} {}->{}: {}", objective, from, to, e);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let registry = build(&[vec![link(1, 10.0, 5.0)], vec![]]);
        let engine = RoutingEngine::new(true);

        {
            let table = registry.read();
            engine.route(&table, 0, 1, Objective::MinimizeLatency).unwrap();
            engine.route(&table, 0, 1, Objective::MinimizeLatency).unwrap();
            assert_eq!(engine.cached_routes(), 1);
        }

        // Any registry change makes the next lookup recompute
        registry.register(make_gpu("late", 0.0)).unwrap();
        let table = registry.read();
        engine.route(&table, 0, 1, Objective::MaximizeThroughput).unwrap();
        assert_eq!(engine.cached_routes(), 1);
    }

    #[test]
    fn test_utilization_changes_keep_cache() {
        let registry = build(&[vec![link(1, 10.0, 5.0)], vec![]]);
        let engine = RoutingEngine::new(true);
        engine
            .route(&registry.read(), 0, 1, Objective::MinimizeLatency)
            .unwrap();

        registry.add_load(0, 30.0).unwrap();
        registry
            .update_state(
                1,
                &lightrail_core::DeviceStatePatch {
                    utilization_pct: Some(75.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let table = registry.read();
        assert!(engine.route(&table, 1, 0, Objective::MinimizeLatency).is_err());
        // The 0 -> 1 entry survived; failed lookups are not cached
        assert_eq!(engine.cached_routes(), 1);
    }

    #[test]
    fn test_cached_route_reflects_new_state() {
        let registry = DeviceRegistry::new(None);
        registry
            .register(
                make_gpu("a", 0.0)
                    .with_link(link(1, 100.0, 1.0))
                    .with_link(link(2, 100.0, 1.0)),
            )
            .unwrap();
        registry
            .register(make_gpu("b", 0.0).with_power_draw(100.0).with_link(link(3, 100.0, 1.0)))
            .unwrap();
        registry
            .register(make_gpu("c", 0.0).with_power_draw(200.0).with_link(link(3, 100.0, 1.0)))
            .unwrap();
        registry.register(make_gpu("d", 0.0)).unwrap();
        let engine = RoutingEngine::new(true);

        let first = engine
            .route(&registry.read(), 0, 3, Objective::MinimizePower)
            .unwrap();
        assert_eq!(first.path, vec![0, 1, 3]);

        registry
            .update_state(
                1,
                &lightrail_core::DeviceStatePatch {
                    power_draw_watts: Some(900.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let second = engine
            .route(&registry.read(), 0, 3, Objective::MinimizePower)
            .unwrap();
        assert_eq!(second.path, vec![0, 2, 3]);
    }

    #[test]
    fn test_precompute_counts_reachable_pairs() {
        // 0 <-> 1, 2 isolated
        let registry = build(&[vec![link(1, 10.0, 1.0)], vec![link(0, 10.0, 1.0)], vec![]]);
        let engine = RoutingEngine::new(true);
        let table = registry.read();

        assert_eq!(engine.precompute(&table, Objective::MinimizeLatency), 2);
        assert_eq!(engine.cached_routes(), 2);
    }
}
