use crate::cli::CasinoArgs;
use crate::config::RunConfig;
use crate::error::{CliError, Result};
use packmc_core::core::io::ramsnap::RamsnapFile;
use packmc_core::core::io::{AuxInfo, SnapshotFile};
use packmc_core::engine::observables::DensityCollector;
use packmc_core::engine::packing::Packing;
use packmc_core::engine::scalers::scaler_from_spec;
use packmc_core::engine::simulation::Simulation;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

/// Step sizes and the cycle offset restored from a continued run.
struct Continuation {
    translation_step: f64,
    rotation_step: f64,
    scaling_step: f64,
    cycle_offset: usize,
}

fn parse_aux_f64(aux: &AuxInfo, key: &str) -> Result<f64> {
    aux.get(key)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| CliError::State(format!("snapshot lacks a valid '{key}' entry")))
}

fn continuation_from(aux: &AuxInfo, config: &RunConfig) -> Result<Continuation> {
    let cycle_offset = aux
        .get("cycles")
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| CliError::State("snapshot lacks a valid 'cycles' entry".into()))?;
    if cycle_offset >= config.run.thermalisation_cycles {
        return Err(CliError::State(format!(
            "thermalisation already finished after {cycle_offset} cycles; nothing to continue"
        )));
    }
    Ok(Continuation {
        translation_step: parse_aux_f64(aux, "translationStep")?,
        rotation_step: parse_aux_f64(aux, "rotationStep")?,
        scaling_step: parse_aux_f64(aux, "scalingStep")?,
        cycle_offset,
    })
}

pub fn execute(args: &CasinoArgs) -> Result<()> {
    let config = RunConfig::load(&args.input)?;
    let model = config.shape.build()?;

    let mut continuation = None;
    let snapshot = if let Some(path) = &args.continue_from {
        let data = RamsnapFile::read_from_path(path)?;
        continuation = Some(continuation_from(&data.aux, &config)?);
        Some(data)
    } else if let Some(path) = &args.start_from {
        Some(RamsnapFile::read_from_path(path)?)
    } else {
        None
    };

    let (simulation_box, shapes) = match snapshot {
        Some(data) => (data.simulation_box, data.shapes),
        None => {
            let initial = config.initial.as_ref().ok_or_else(|| {
                CliError::Config(
                    "no [initial] section and no --start-from/--continue snapshot".into(),
                )
            })?;
            initial.build()?
        }
    };

    let packing = Packing::new(simulation_box, shapes, Arc::clone(&model), config.walls)?;
    info!(
        particles = packing.size(),
        volume = packing.simulation_box().volume(),
        density = packing.number_density(),
        "packing prepared"
    );

    let (translation_step, rotation_step, scaling_step, cycle_offset, thermalisation_cycles) =
        match &continuation {
            Some(resumed) => (
                resumed.translation_step,
                resumed.rotation_step,
                resumed.scaling_step,
                resumed.cycle_offset,
                config.run.thermalisation_cycles - resumed.cycle_offset,
            ),
            None => (
                config.moves.translation_step,
                config.moves.rotation_step,
                config.moves.scaling_step,
                0,
                config.run.thermalisation_cycles,
            ),
        };

    let scaler = scaler_from_spec(&config.moves.scaler)?;
    let mut simulation = Simulation::new(
        packing,
        translation_step,
        rotation_step,
        scaling_step,
        config.seed,
        scaler,
        config.moves.domain_divisions,
    )?;

    let interrupt = AtomicBool::new(false);
    let mut collector = DensityCollector::new();

    if config.run.relax_overlaps {
        simulation.relax_overlaps(
            config.thermodynamics.temperature,
            config.thermodynamics.pressure,
            config.run.snapshot_every,
            &mut collector,
            &interrupt,
            cycle_offset,
        )?;
    }

    simulation.integrate(
        config.thermodynamics.temperature,
        config.thermodynamics.pressure,
        thermalisation_cycles,
        config.run.averaging_cycles,
        config.run.averaging_every,
        config.run.snapshot_every,
        &mut collector,
        &interrupt,
        cycle_offset,
    )?;

    if simulation.was_interrupted() {
        info!(cycle = simulation.total_cycles(), "run interrupted; storing last committed state");
    } else if let (Some(mean), Some(error)) = (collector.mean_density(), collector.density_error())
    {
        info!(
            mean_density = mean,
            density_error = error,
            move_acceptance = simulation.move_acceptance_rate(),
            scaling_acceptance = simulation.scaling_acceptance_rate(),
            move_us = simulation.move_microseconds(),
            scaling_us = simulation.scaling_microseconds(),
            "run finished"
        );
        println!("mean number density: {mean} +- {error}");
    }

    let aux = AuxInfo::from([
        ("cycles".to_string(), simulation.total_cycles().to_string()),
        (
            "translationStep".to_string(),
            simulation.current_translation_step().to_string(),
        ),
        (
            "rotationStep".to_string(),
            simulation.current_rotation_step().to_string(),
        ),
        (
            "scalingStep".to_string(),
            simulation.current_scaling_step().to_string(),
        ),
    ]);
    let data = simulation.packing().snapshot(aux);
    RamsnapFile::write_to_path(&data, &config.output.packing)?;
    info!(path = %config.output.packing, "packing stored");
    Ok(())
}
