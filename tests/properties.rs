//! Property tests over random seeds and disruption settings

use dtnsim::{Config, SimulationState};
use proptest::prelude::*;

fn config(probability: f64, capacity: usize, ttl_secs: u64) -> Config {
    let mut config = Config::default();
    config.disruptions.local_probability = probability;
    config.disruptions.deep_space_probability = probability;
    config.traffic.bundle_ttl_secs = ttl_secs;
    for node in &mut config.topology.nodes {
        node.buffer_capacity = capacity;
    }
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bundles_are_conserved(
        seed in any::<u64>(),
        probability in 0.0f64..0.5,
        capacity in 1usize..40,
        ttl_secs in 60u64..7200,
        steps in 1u64..80,
    ) {
        let config = config(probability, capacity, ttl_secs);
        let mut state = SimulationState::initialize(&config, seed).unwrap();

        for k in 0..steps {
            state = state.step(&config).unwrap();
            prop_assert!(state.validate(&config).is_ok());

            let stats = &state.stats;
            prop_assert_eq!(
                stats.created,
                stats.resolved() + stats.stored as u64 + stats.in_transit as u64
            );
            prop_assert_eq!(stats.stored, state.stored_bundles());
            prop_assert_eq!(stats.in_transit, state.transits.len());
            prop_assert_eq!(state.time_secs, (k + 1) * config.simulation.step_secs);
            for (node, spec) in state.nodes.iter().zip(&config.topology.nodes) {
                prop_assert!(node.storage.len() <= spec.buffer_capacity);
            }
        }
    }

    #[test]
    fn same_seed_same_trajectory(seed in any::<u64>(), steps in 1u64..60) {
        let config = config(0.2, 50, 3600);
        let mut a = SimulationState::initialize(&config, seed).unwrap();
        let mut b = SimulationState::initialize(&config, seed).unwrap();

        for _ in 0..steps {
            a = a.step(&config).unwrap();
            b = b.step(&config).unwrap();
        }

        prop_assert_eq!(&a.stats, &b.stats);
        prop_assert_eq!(a.next_bundle_id, b.next_bundle_id);
        prop_assert_eq!(a.disrupted_links(), b.disrupted_links());
        prop_assert_eq!(a.transits, b.transits);
    }
}
