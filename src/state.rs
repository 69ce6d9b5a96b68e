//! Network state and the step rule.
//!
//! `SimulationState::step` is a pure function of the current state and the
//! configuration: it validates its input, clones it, and advances the copy by
//! one step. The RNG is part of the state so equal seeds give equal runs.

use crate::bundle::{arrival_time, Bundle, BundleId, Transit};
use crate::config::Config;
use crate::routing::{Route, Router};
use crate::stats::{NetworkStats, StepTally};
use crate::topology::TopologyError;
use log::{debug, trace};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

/// A state that violates the model's invariants
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("traffic flow references unknown node '{0}'")]
    UnknownNode(String),

    #[error("state has {found} {what}, topology defines {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("clock at {time_secs}s after {steps_taken} steps, expected {expected}s")]
    ClockMismatch {
        steps_taken: u64,
        time_secs: u64,
        expected: u64,
    },

    #[error("node '{node}' stores {stored} bundles, capacity is {capacity}")]
    Overflow {
        node: String,
        stored: usize,
        capacity: usize,
    },

    #[error("bundle {bundle} in transit: {reason}")]
    BadTransit { bundle: BundleId, reason: String },

    #[error("{created} bundles created but {accounted} accounted for")]
    Conservation { created: u64, accounted: u64 },

    #[error("statistic '{0}' is not finite")]
    NonFinite(&'static str),
}

/// Custody storage of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Bundles held, oldest first
    pub storage: VecDeque<Bundle>,
    /// Highest occupancy seen
    pub peak_storage: usize,
}

/// Availability of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Up,
    /// Down until the given simulated time
    Disrupted { until: u64 },
}

/// Runtime state of one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub status: LinkStatus,
    /// Disruptions suffered so far
    pub disruptions: u64,
}

impl LinkState {
    fn up() -> Self {
        Self {
            status: LinkStatus::Up,
            disruptions: 0,
        }
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.status == LinkStatus::Up
    }
}

/// Complete simulation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    /// Steps completed
    pub steps_taken: u64,
    /// Simulated clock (seconds)
    pub time_secs: u64,
    /// One entry per topology node
    pub nodes: Vec<NodeState>,
    /// One entry per topology link
    pub links: Vec<LinkState>,
    /// Bundles currently on a link
    pub transits: Vec<Transit>,
    pub stats: NetworkStats,
    /// Seed the run was started with
    pub seed: u64,
    pub next_bundle_id: BundleId,
    rng: ChaCha8Rng,
}

/// Traffic flow with node names resolved to indices
struct ResolvedFlow {
    source: usize,
    destination: usize,
    interval_steps: u64,
    payload_bytes: u32,
}

/// Index view of the configured network, rebuilt for every step
struct Network {
    endpoints: Vec<(usize, usize)>,
    flows: Vec<ResolvedFlow>,
}

impl Network {
    fn resolve(config: &Config) -> Result<Self, StateError> {
        let topology = &config.topology;
        let endpoints = topology.endpoints()?;
        let lookup = |id: &str| {
            topology
                .node_index(id)
                .ok_or_else(|| StateError::UnknownNode(id.to_string()))
        };

        let flows = config
            .traffic
            .flows
            .iter()
            .map(|flow| {
                Ok(ResolvedFlow {
                    source: lookup(&flow.source)?,
                    destination: lookup(&flow.destination)?,
                    interval_steps: flow.interval_steps.max(1),
                    payload_bytes: flow.payload_bytes,
                })
            })
            .collect::<Result<Vec<_>, StateError>>()?;

        Ok(Self { endpoints, flows })
    }
}

impl SimulationState {
    /// Build the step-0 state: empty storage, every link up
    pub fn initialize(config: &Config, seed: u64) -> Result<Self, StateError> {
        Network::resolve(config)?;

        let state = Self {
            steps_taken: 0,
            time_secs: 0,
            nodes: vec![NodeState::default(); config.topology.nodes.len()],
            links: vec![LinkState::up(); config.topology.links.len()],
            transits: Vec::new(),
            stats: NetworkStats::new(),
            seed,
            next_bundle_id: 1,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        state.validate(config)?;
        Ok(state)
    }

    /// Produce the next state. `self` is left untouched.
    pub fn step(&self, config: &Config) -> Result<Self, StateError> {
        let network = Network::resolve(config)?;
        self.check(config, &network)?;

        let mut next = self.clone();
        next.advance(config, &network);
        Ok(next)
    }

    /// Check every invariant of the state against the configuration
    pub fn validate(&self, config: &Config) -> Result<(), StateError> {
        let network = Network::resolve(config)?;
        self.check(config, &network)
    }

    /// Bundles held in custody across all nodes
    pub fn stored_bundles(&self) -> usize {
        self.nodes.iter().map(|n| n.storage.len()).sum()
    }

    pub fn disrupted_links(&self) -> usize {
        self.links.iter().filter(|l| !l.is_up()).count()
    }

    fn check(&self, config: &Config, network: &Network) -> Result<(), StateError> {
        let topology = &config.topology;

        if self.nodes.len() != topology.nodes.len() {
            return Err(StateError::ShapeMismatch {
                what: "nodes",
                expected: topology.nodes.len(),
                found: self.nodes.len(),
            });
        }
        if self.links.len() != topology.links.len() {
            return Err(StateError::ShapeMismatch {
                what: "links",
                expected: topology.links.len(),
                found: self.links.len(),
            });
        }

        let expected = self.steps_taken.saturating_mul(config.simulation.step_secs);
        if self.time_secs != expected || self.stats.steps != self.steps_taken {
            return Err(StateError::ClockMismatch {
                steps_taken: self.steps_taken,
                time_secs: self.time_secs,
                expected,
            });
        }

        for (node, spec) in self.nodes.iter().zip(&topology.nodes) {
            if node.storage.len() > spec.buffer_capacity {
                return Err(StateError::Overflow {
                    node: spec.id.clone(),
                    stored: node.storage.len(),
                    capacity: spec.buffer_capacity,
                });
            }
        }

        for transit in &self.transits {
            let bad = |reason: &str| StateError::BadTransit {
                bundle: transit.bundle.id,
                reason: reason.to_string(),
            };
            let &(a, b) = network
                .endpoints
                .get(transit.link)
                .ok_or_else(|| bad("unknown link"))?;
            if (transit.from, transit.to) != (a, b) && (transit.from, transit.to) != (b, a) {
                return Err(bad("endpoints do not match its link"));
            }
            if !self.links[transit.link].is_up() {
                return Err(bad("link is disrupted"));
            }
            if transit.arrives_at <= self.time_secs {
                return Err(bad("arrival time has already passed"));
            }
        }

        let accounted =
            self.stats.resolved() + self.stored_bundles() as u64 + self.transits.len() as u64;
        if self.stats.created != accounted {
            return Err(StateError::Conservation {
                created: self.stats.created,
                accounted,
            });
        }

        if !self.stats.mean_delay_secs.is_finite() {
            return Err(StateError::NonFinite("mean_delay_secs"));
        }
        if !self.stats.delivery_ratio.is_finite() {
            return Err(StateError::NonFinite("delivery_ratio"));
        }

        Ok(())
    }

    fn advance(&mut self, config: &Config, network: &Network) {
        let step_index = self.steps_taken;
        self.steps_taken += 1;
        self.time_secs += config.simulation.step_secs;

        let mut tally = StepTally::default();
        self.update_links(config, &mut tally);
        self.deliver_arrivals(config, &mut tally);
        self.generate_traffic(config, network, step_index, &mut tally);
        self.expire_bundles(&mut tally);
        self.note_peaks();
        self.forward(config, network, &mut tally);
        self.note_peaks();

        let stored = self.stored_bundles();
        let disrupted = self.disrupted_links();
        self.stats.record_step(
            &tally,
            stored,
            self.transits.len(),
            disrupted,
            self.time_secs,
        );

        trace!(
            "step {}: created {} delivered {} forwarded {}",
            step_index,
            tally.created,
            tally.delivered,
            tally.forwarded
        );
    }

    /// Recover expired disruptions, roll new ones, and pull bundles off
    /// links that just went down.
    fn update_links(&mut self, config: &Config, tally: &mut StepTally) {
        let now = self.time_secs;
        let model = &config.disruptions;
        let mut downed = BTreeSet::new();

        for (index, (link, spec)) in self.links.iter_mut().zip(&config.topology.links).enumerate() {
            if let LinkStatus::Disrupted { until } = link.status {
                if now >= until {
                    link.status = LinkStatus::Up;
                    tally.recoveries += 1;
                    debug!("Link {} <-> {} restored", spec.source, spec.target);
                }
                continue;
            }
            if !model.enabled {
                continue;
            }

            let probability = if spec.is_deep_space() {
                model.deep_space_probability
            } else {
                model.local_probability
            };
            if self.rng.gen::<f64>() < probability {
                let low = model.min_duration_secs.min(model.max_duration_secs);
                let high = model.min_duration_secs.max(model.max_duration_secs);
                let duration = self.rng.gen_range(low..=high);
                link.status = LinkStatus::Disrupted {
                    until: now + duration.max(1),
                };
                link.disruptions += 1;
                tally.disruptions += 1;
                downed.insert(index);
                debug!(
                    "Link {} <-> {} disrupted for {}s",
                    spec.source, spec.target, duration
                );
            }
        }

        if downed.is_empty() {
            return;
        }

        let (lost, kept): (Vec<Transit>, Vec<Transit>) = std::mem::take(&mut self.transits)
            .into_iter()
            .partition(|t| downed.contains(&t.link));
        self.transits = kept;

        // Reverse so the earliest departure ends up first in line
        for transit in lost.into_iter().rev() {
            let mut bundle = transit.bundle;
            bundle.retransmissions = bundle.retransmissions.saturating_add(1);
            tally.retransmissions += 1;

            let capacity = config.topology.nodes[transit.from].buffer_capacity;
            let sender = &mut self.nodes[transit.from];
            if sender.storage.len() < capacity {
                sender.storage.push_front(bundle);
            } else {
                tally.dropped += 1;
            }
        }
    }

    fn deliver_arrivals(&mut self, config: &Config, tally: &mut StepTally) {
        let now = self.time_secs;
        let (arrived, pending): (Vec<Transit>, Vec<Transit>) = std::mem::take(&mut self.transits)
            .into_iter()
            .partition(|t| t.arrives_at <= now);
        self.transits = pending;

        for transit in arrived {
            let mut bundle = transit.bundle;
            bundle.hops = bundle.hops.saturating_add(1);

            if transit.to == bundle.destination {
                tally.delivered_after(bundle.age(now));
                continue;
            }

            let capacity = config.topology.nodes[transit.to].buffer_capacity;
            let receiver = &mut self.nodes[transit.to];
            if receiver.storage.len() < capacity {
                receiver.storage.push_back(bundle);
            } else {
                tally.dropped += 1;
            }
        }
    }

    fn generate_traffic(
        &mut self,
        config: &Config,
        network: &Network,
        step_index: u64,
        tally: &mut StepTally,
    ) {
        for flow in &network.flows {
            if step_index % flow.interval_steps != 0 {
                continue;
            }

            let bundle = Bundle::new(
                self.next_bundle_id,
                flow.source,
                flow.destination,
                flow.payload_bytes,
                self.time_secs,
                config.traffic.bundle_ttl_secs,
            );
            self.next_bundle_id += 1;
            tally.created += 1;

            let capacity = config.topology.nodes[flow.source].buffer_capacity;
            let node = &mut self.nodes[flow.source];
            if node.storage.len() < capacity {
                node.storage.push_back(bundle);
            } else {
                tally.dropped += 1;
            }
        }
    }

    fn expire_bundles(&mut self, tally: &mut StepTally) {
        let now = self.time_secs;
        for node in &mut self.nodes {
            let before = node.storage.len();
            node.storage.retain(|b| !b.is_expired(now));
            tally.expired += (before - node.storage.len()) as u64;
        }
    }

    fn note_peaks(&mut self) {
        for node in &mut self.nodes {
            node.peak_storage = node.peak_storage.max(node.storage.len());
        }
    }

    /// Send stored bundles along their current best route, FIFO per node,
    /// within each link direction's bandwidth.
    fn forward(&mut self, config: &Config, network: &Network, tally: &mut StepTally) {
        let pairs: BTreeSet<(usize, usize)> = self
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(index, node)| node.storage.iter().map(move |b| (index, b.destination)))
            .collect();
        if pairs.is_empty() {
            return;
        }

        let links = &self.links;
        let router = Router::new(&config.topology, &network.endpoints, |l| links[l].is_up());
        let table = router.route_table(&pairs);

        let now = self.time_secs;
        let step_secs = config.simulation.step_secs;
        let mut used = vec![[0usize; 2]; self.links.len()];

        for (index, node) in self.nodes.iter_mut().enumerate() {
            let mut held = VecDeque::with_capacity(node.storage.len());

            while let Some(bundle) = node.storage.pop_front() {
                let hop = table
                    .get(&(index, bundle.destination))
                    .and_then(|route| route.as_ref())
                    .and_then(Route::next_hop);

                let Some((link, next)) = hop else {
                    held.push_back(bundle);
                    continue;
                };

                let direction = usize::from(network.endpoints[link].0 != index);
                let spec = &config.topology.links[link];
                if used[link][direction] >= spec.bandwidth {
                    held.push_back(bundle);
                    continue;
                }
                used[link][direction] += 1;

                self.transits.push(Transit {
                    bundle,
                    link,
                    from: index,
                    to: next,
                    departed_at: now,
                    arrives_at: arrival_time(now, spec.delay_secs, step_secs),
                });
                tally.forwarded += 1;
            }

            node.storage = held;
        }
    }
}
