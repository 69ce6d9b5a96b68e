//! Route computation over the currently available links.

use crate::topology::Topology;
use petgraph::algo::{all_simple_paths, astar};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// A path through the network
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Node indices from source to destination
    pub nodes: Vec<usize>,
    /// Link indices, one per hop
    pub links: Vec<usize>,
    /// Sum of link delays (seconds)
    pub delay_secs: f64,
    /// Product of link reliabilities
    pub reliability: f64,
}

impl Route {
    /// First hop as `(link, next_node)`
    pub fn next_hop(&self) -> Option<(usize, usize)> {
        Some((*self.links.first()?, *self.nodes.get(1)?))
    }

    pub fn hop_count(&self) -> usize {
        self.links.len()
    }

    /// Ranking score; lower is better
    pub fn score(&self) -> f64 {
        self.delay_secs / self.reliability
    }

    /// Render as `a -> b -> c`
    pub fn describe(&self, topology: &Topology) -> String {
        self.nodes
            .iter()
            .map(|&n| topology.node_id(n))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Route table keyed by `(from, to)`
pub type RouteTable = BTreeMap<(usize, usize), Option<Route>>;

/// Graph view of a topology restricted to the links that are up
pub struct Router<'a> {
    topology: &'a Topology,
    graph: UnGraph<usize, usize>,
}

impl<'a> Router<'a> {
    /// Build a router over the links for which `link_up` returns true.
    ///
    /// `endpoints` must come from `topology.endpoints()`.
    pub fn new<F>(topology: &'a Topology, endpoints: &[(usize, usize)], link_up: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        let mut graph = UnGraph::with_capacity(topology.nodes.len(), endpoints.len());
        for index in 0..topology.nodes.len() {
            graph.add_node(index);
        }
        for (link, &(a, b)) in endpoints.iter().enumerate() {
            if link_up(link) {
                graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), link);
            }
        }

        Self { topology, graph }
    }

    /// Router over every link, ignoring disruptions
    pub fn full(topology: &'a Topology, endpoints: &[(usize, usize)]) -> Self {
        Self::new(topology, endpoints, |_| true)
    }

    /// Lowest-delay route from `from` to `to`, if one exists
    pub fn best_route(&self, from: usize, to: usize) -> Option<Route> {
        if from == to {
            return None;
        }
        let goal = NodeIndex::new(to);
        let (_, path) = astar(
            &self.graph,
            NodeIndex::new(from),
            |n| n == goal,
            |e| self.topology.links[*e.weight()].delay_secs,
            |_| 0.0,
        )?;
        self.route_from_path(&path)
    }

    /// Up to `max` loop-free routes ranked by delay over reliability
    pub fn alternative_routes(&self, from: usize, to: usize, max: usize) -> Vec<Route> {
        if from == to {
            return Vec::new();
        }
        let mut routes: Vec<Route> = all_simple_paths::<Vec<NodeIndex>, _>(
            &self.graph,
            NodeIndex::new(from),
            NodeIndex::new(to),
            0,
            None,
        )
        .filter_map(|path| self.route_from_path(&path))
        .collect();

        routes.sort_by(|a, b| {
            a.score()
                .total_cmp(&b.score())
                .then_with(|| a.nodes.cmp(&b.nodes))
        });
        routes.truncate(max);
        routes
    }

    /// Best routes for every requested pair, computed in parallel
    pub fn route_table(&self, pairs: &BTreeSet<(usize, usize)>) -> RouteTable {
        let pairs: Vec<(usize, usize)> = pairs.iter().copied().collect();
        pairs
            .par_iter()
            .map(|&(from, to)| ((from, to), self.best_route(from, to)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    fn route_from_path(&self, path: &[NodeIndex]) -> Option<Route> {
        let mut links = Vec::with_capacity(path.len().saturating_sub(1));
        let mut delay_secs = 0.0;
        let mut reliability = 1.0;

        for pair in path.windows(2) {
            let edge = self.graph.find_edge(pair[0], pair[1])?;
            let link = self.graph[edge];
            let spec = &self.topology.links[link];
            delay_secs += spec.delay_secs;
            reliability *= spec.reliability();
            links.push(link);
        }

        Some(Route {
            nodes: path.iter().map(|n| n.index()).collect(),
            links,
            delay_secs,
            reliability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Topology, Vec<(usize, usize)>) {
        let topology = Topology::mars_earth();
        let endpoints = topology.endpoints().unwrap();
        (topology, endpoints)
    }

    fn idx(topology: &Topology, id: &str) -> usize {
        topology.node_index(id).unwrap()
    }

    #[test]
    fn test_best_route_uses_relay() {
        let (topology, endpoints) = setup();
        let router = Router::full(&topology, &endpoints);

        let route = router
            .best_route(idx(&topology, "mars_rover_1"), idx(&topology, "earth_station_1"))
            .unwrap();

        assert_eq!(
            route.describe(&topology),
            "mars_rover_1 -> mars_orbiter_1 -> relay_satellite -> earth_station_1"
        );
        assert_eq!(route.hop_count(), 3);
        assert!((route.delay_secs - 751.06).abs() < 1e-9);
    }

    #[test]
    fn test_disrupted_link_forces_detour() {
        let (topology, endpoints) = setup();
        let relay_to_earth = topology
            .links
            .iter()
            .position(|l| l.source == "relay_satellite" && l.target == "earth_station_1")
            .unwrap();

        let router = Router::new(&topology, &endpoints, |link| link != relay_to_earth);
        let route = router
            .best_route(idx(&topology, "mars_rover_1"), idx(&topology, "earth_station_1"))
            .unwrap();

        assert_eq!(*route.nodes.last().unwrap(), idx(&topology, "earth_station_1"));
        assert!(!route.links.contains(&relay_to_earth));
    }

    #[test]
    fn test_no_route_when_isolated() {
        let (topology, endpoints) = setup();
        let rover = idx(&topology, "mars_rover_1");
        let router = Router::new(&topology, &endpoints, |link| {
            let (a, b) = endpoints[link];
            a != rover && b != rover
        });

        assert!(router
            .best_route(rover, idx(&topology, "earth_station_1"))
            .is_none());
    }

    #[test]
    fn test_alternative_routes_ranked() {
        let (topology, endpoints) = setup();
        let router = Router::full(&topology, &endpoints);

        let routes = router.alternative_routes(
            idx(&topology, "mars_rover_1"),
            idx(&topology, "earth_station_1"),
            3,
        );

        assert_eq!(routes.len(), 3);
        assert!(routes.windows(2).all(|w| w[0].score() <= w[1].score()));
        assert_eq!(routes[0].next_hop().unwrap().1, idx(&topology, "mars_orbiter_1"));
    }

    #[test]
    fn test_route_table_matches_single_queries() {
        let (topology, endpoints) = setup();
        let router = Router::full(&topology, &endpoints);
        let dest = idx(&topology, "earth_station_2");
        let pairs: BTreeSet<_> = (0..topology.nodes.len())
            .filter(|&n| n != dest)
            .map(|n| (n, dest))
            .collect();

        let table = router.route_table(&pairs);

        assert_eq!(table.len(), pairs.len());
        for (&(from, to), route) in &table {
            assert_eq!(route, &router.best_route(from, to));
        }
    }
}
