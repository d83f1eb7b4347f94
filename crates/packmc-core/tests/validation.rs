//! End-to-end NpT validation against known equations of state.
//!
//! These runs take minutes in release mode and are therefore ignored by
//! default; run them with `cargo test --release -- --ignored`.

mod common;

use packmc_core::core::interaction::{Polysphere, ShapeModel, Sphere, SpherePotential, Spherocylinder};
use packmc_core::engine::observables::DensityCollector;
use packmc_core::engine::scalers::DeltaVolumeScaler;
use packmc_core::engine::simulation::Simulation;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

struct Scenario {
    model: Arc<dyn ShapeModel>,
    count: usize,
    volume: f64,
    temperature: f64,
    pressure: f64,
    relax_first: bool,
    seed: u64,
    expected_density: f64,
    relative_error_cap: f64,
}

fn run(scenario: Scenario) {
    let packing = common::lattice_packing(scenario.model, scenario.count, scenario.volume);
    let mut simulation = Simulation::new(
        packing,
        0.5,
        0.5,
        scenario.volume / 20.0,
        scenario.seed,
        Box::new(DeltaVolumeScaler),
        [1, 1, 1],
    )
    .unwrap();

    let interrupt = AtomicBool::new(false);
    let mut collector = DensityCollector::new();
    if scenario.relax_first {
        simulation
            .relax_overlaps(
                scenario.temperature,
                scenario.pressure,
                100_000,
                &mut collector,
                &interrupt,
                0,
            )
            .unwrap();
    }
    simulation
        .integrate(
            scenario.temperature,
            scenario.pressure,
            5000,
            10000,
            100,
            100_000,
            &mut collector,
            &interrupt,
            0,
        )
        .unwrap();

    let mean = collector.mean_density().unwrap();
    let error = collector.density_error().unwrap();
    let relative_error = error / mean;
    assert!(
        relative_error < scenario.relative_error_cap,
        "relative error {relative_error:.4} above {:.4}",
        scenario.relative_error_cap
    );

    let expected = scenario.expected_density;
    let tolerance = 3.0 * error + 0.01 * expected;
    assert!(
        (mean - expected).abs() < tolerance,
        "density {mean:.6} +- {error:.6} outside {expected:.6} +- {tolerance:.6}"
    );
}

#[test]
#[ignore = "long-running statistical validation"]
fn dilute_hard_spheres_follow_carnahan_starling() {
    run(Scenario {
        model: Arc::new(Sphere::hard(0.05)),
        count: 50,
        volume: 5000.0,
        temperature: 10.0,
        pressure: 1.0,
        relax_first: false,
        seed: 1234,
        expected_density: 0.0999791,
        relative_error_cap: 0.03,
    });
}

#[test]
#[ignore = "long-running statistical validation"]
fn degenerate_hard_spheres_follow_carnahan_starling() {
    run(Scenario {
        model: Arc::new(Sphere::hard(0.5)),
        count: 50,
        volume: 200.0,
        temperature: 1.0,
        pressure: 1.0,
        relax_first: false,
        seed: 1234,
        expected_density: 0.398574,
        relative_error_cap: 0.03,
    });
}

#[test]
#[ignore = "long-running statistical validation"]
fn hard_spherocylinder_gas_follows_boublik() {
    run(Scenario {
        model: Arc::new(Spherocylinder::new(0.5, 0.2)),
        count: 50,
        volume: 200.0,
        temperature: 10.0,
        pressure: 1.0,
        relax_first: false,
        seed: 1234,
        expected_density: 0.0956448,
        relative_error_cap: 0.03,
    });
}

#[test]
#[ignore = "long-running statistical validation"]
fn degenerate_lennard_jones_matches_the_reference_density() {
    run(Scenario {
        model: Arc::new(Sphere::new(
            0.5,
            SpherePotential::LennardJones { epsilon: 1.0, sigma: 0.5 },
        )),
        count: 64,
        volume: 200.0,
        temperature: 100.0,
        pressure: 200.0,
        relax_first: false,
        seed: 1234,
        expected_density: 1.66371,
        relative_error_cap: 0.03,
    });
}

#[test]
#[ignore = "long-running statistical validation"]
fn hard_dumbbells_follow_tildesley_streett() {
    run(Scenario {
        model: Arc::new(Polysphere::dumbbell(0.5, 1.0, SpherePotential::Hard)),
        count: 50,
        volume: 500.0,
        temperature: 1.0,
        pressure: 2.0,
        // The cubic starting lattice leaves chain ends touching.
        relax_first: true,
        seed: 1234,
        expected_density: 0.304332,
        relative_error_cap: 0.01,
    });
}

#[test]
#[ignore = "long-running statistical validation"]
fn wca_dumbbells_match_the_reference_density() {
    run(Scenario {
        model: Arc::new(Polysphere::dumbbell(
            0.5,
            1.0,
            SpherePotential::Wca { epsilon: 1.0, sigma: 1.0 },
        )),
        count: 50,
        volume: 500.0,
        temperature: 1.0,
        pressure: 7.5,
        relax_first: false,
        seed: 1234,
        expected_density: 0.43451,
        relative_error_cap: 0.01,
    });
}
