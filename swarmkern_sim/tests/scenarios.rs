use proptest::prelude::*;
use swarmkern_sim::scenarios::ScenarioId;
use swarmkern_sim::{ScenarioRunner, SimConfig, SimWorld};

#[test]
fn test_all_scenarios_pass_on_both_launchers() {
    for parallel in [true, false] {
        let runner = ScenarioRunner::new(42, 64).with_steps(5).with_parallel(parallel);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} (parallel={}) failed: {:?}",
                scenario, parallel, result.failure_reason
            );
        }
    }
}

#[test]
fn test_small_populations() {
    // Two agents is the smallest ring where a collision leaves a gap
    let runner = ScenarioRunner::new(1, 2).with_steps(2);
    for scenario in ScenarioId::all() {
        assert!(runner.run(scenario).passed, "{} failed", scenario);
    }
}

#[test]
fn test_wide_radius_wraps_the_ring() {
    let runner = ScenarioRunner::new(8, 5).with_radius(4);
    assert!(runner.run(ScenarioId::Neighbourhood).passed);
    assert!(runner.run(ScenarioId::RingDiffusion).passed);
}

#[test]
fn test_worlds_replay_from_seed() {
    let run = || {
        let mut world = SimWorld::new(SimConfig {
            seed: 1234,
            agent_count: 20,
            // Id hand-out order follows scheduling on the rayon pool
            parallel: false,
            ..Default::default()
        })
        .unwrap()
        .with_birth_probability(0.3);
        world.run().unwrap();
        (world.values().unwrap(), world.newborns().to_vec())
    };
    assert_eq!(run(), run());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_diffusion_conserves_total(seed in any::<u64>(), agents in 3u32..48, radius in 1u32..4) {
        let runner = ScenarioRunner::new(seed, agents).with_steps(3).with_radius(radius);
        let result = runner.run(ScenarioId::RingDiffusion);
        prop_assert!(result.passed, "{:?}", result.failure_reason);
    }
}
