//! The Metropolis driver.
//!
//! Actual state changes are carried out by the packing; this layer composes
//! moves, checks the Metropolis criterion, self-tunes step sizes during
//! thermalisation and feeds the observables collector. One cycle is N
//! combined particle moves (in parallel over domain regions when a domain
//! division is configured) followed by a single box move.

use crate::engine::domain::{DomainDecomposition, DomainMoveOutcome, DomainSandbox};
use crate::engine::error::SimulationError;
use crate::engine::observables::ObservablesCollector;
use crate::engine::packing::Packing;
use crate::engine::scalers::TriclinicBoxScaler;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Acceptance tallies for one move kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counter {
    moves_since_evaluation: u64,
    accepted_since_evaluation: u64,
    total_moves: u64,
    total_accepted: u64,
}

impl Counter {
    fn increment(&mut self, accepted: bool) {
        self.moves_since_evaluation += 1;
        self.total_moves += 1;
        if accepted {
            self.accepted_since_evaluation += 1;
            self.total_accepted += 1;
        }
    }

    fn merge(&mut self, shard: &Counter) {
        self.moves_since_evaluation += shard.moves_since_evaluation;
        self.accepted_since_evaluation += shard.accepted_since_evaluation;
        self.total_moves += shard.total_moves;
        self.total_accepted += shard.total_accepted;
    }

    fn reset(&mut self) {
        *self = Counter::default();
    }

    fn reset_current(&mut self) {
        self.moves_since_evaluation = 0;
        self.accepted_since_evaluation = 0;
    }

    pub fn moves_since_evaluation(&self) -> u64 {
        self.moves_since_evaluation
    }

    /// Acceptance rate since the last step-size evaluation.
    pub fn current_rate(&self) -> f64 {
        self.accepted_since_evaluation as f64 / self.moves_since_evaluation as f64
    }

    /// Acceptance rate over the whole run.
    pub fn rate(&self) -> f64 {
        self.total_accepted as f64 / self.total_moves as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    NotStarted,
    Thermalisation,
    Averaging,
    Finished,
    Interrupted,
}

pub struct Simulation {
    packing: Packing,
    translation_step: f64,
    rotation_step: f64,
    scaling_step: f64,
    box_scaler: Box<dyn TriclinicBoxScaler>,
    domain_divisions: [usize; 3],
    num_domains: usize,
    rngs: Vec<StdRng>,

    temperature: f64,
    pressure: f64,
    should_adjust_step_size: bool,
    state: SimulationState,
    was_interrupted: bool,
    performed_cycles: usize,
    total_cycles: usize,

    move_counter: Counter,
    scaling_counter: Counter,
    move_microseconds: f64,
    scaling_microseconds: f64,
    decomposition_microseconds: f64,
    total_microseconds: f64,
}

impl Simulation {
    /// Takes exclusive ownership of a packing for the duration of a run.
    ///
    /// One RNG per domain region is seeded with `seed + region index`, which
    /// makes runs reproducible for a fixed `(seed, domain_divisions)` pair
    /// regardless of how worker tasks are scheduled.
    pub fn new(
        packing: Packing,
        translation_step: f64,
        rotation_step: f64,
        scaling_step: f64,
        seed: u64,
        box_scaler: Box<dyn TriclinicBoxScaler>,
        domain_divisions: [usize; 3],
    ) -> Result<Self, SimulationError> {
        if translation_step <= 0.0 || rotation_step <= 0.0 || scaling_step <= 0.0 {
            return Err(SimulationError::InvalidParameter(
                "step sizes must be positive".into(),
            ));
        }
        if domain_divisions.iter().any(|&d| d == 0) {
            return Err(SimulationError::InvalidParameter(
                "domain divisions must be at least 1 in every direction".into(),
            ));
        }
        let num_domains = domain_divisions.iter().product();
        let rngs = (0..num_domains as u64)
            .map(|i| StdRng::seed_from_u64(seed + i))
            .collect();

        Ok(Self {
            packing,
            translation_step,
            rotation_step,
            scaling_step,
            box_scaler,
            domain_divisions,
            num_domains,
            rngs,
            temperature: 0.0,
            pressure: 0.0,
            should_adjust_step_size: false,
            state: SimulationState::NotStarted,
            was_interrupted: false,
            performed_cycles: 0,
            total_cycles: 0,
            move_counter: Counter::default(),
            scaling_counter: Counter::default(),
            move_microseconds: 0.0,
            scaling_microseconds: 0.0,
            decomposition_microseconds: 0.0,
            total_microseconds: 0.0,
        })
    }

    /// Standard NpT Monte Carlo integration: a thermalisation phase with
    /// step-size self-tuning followed by an averaging phase with frozen
    /// steps, during which the collector accumulates averaging values.
    ///
    /// The cancellation flag is polled once per cycle; the running cycle
    /// always completes, after which the run returns with
    /// [`Simulation::was_interrupted`] set.
    #[instrument(skip_all, name = "integrate")]
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &mut self,
        temperature: f64,
        pressure: f64,
        thermalisation_cycles: usize,
        averaging_cycles: usize,
        averaging_every: usize,
        snapshot_every: usize,
        collector: &mut dyn ObservablesCollector,
        interrupt: &AtomicBool,
        cycle_offset: usize,
    ) -> Result<(), SimulationError> {
        if temperature <= 0.0 {
            return Err(SimulationError::InvalidParameter("temperature must be positive".into()));
        }
        if pressure <= 0.0 {
            return Err(SimulationError::InvalidParameter("pressure must be positive".into()));
        }
        if thermalisation_cycles == 0 || averaging_cycles == 0 {
            return Err(SimulationError::InvalidParameter("cycle counts must be positive".into()));
        }
        if averaging_every == 0 || averaging_every >= averaging_cycles {
            return Err(SimulationError::InvalidParameter(
                "averaging frequency must be positive and below the averaging cycle count".into(),
            ));
        }
        if snapshot_every == 0 {
            return Err(SimulationError::InvalidParameter(
                "snapshot frequency must be positive".into(),
            ));
        }
        self.packing.set_overlap_counting(false);
        // Wall violations count as overlaps, so soft systems with walls are
        // validated as well.
        if self.packing.model().has_hard_part() || self.packing.model().has_wall_part() {
            let overlaps = self.packing.count_overlaps_full();
            if overlaps > 0 {
                return Err(SimulationError::InitialOverlaps(overlaps));
            }
        }

        let run_start = Instant::now();
        self.temperature = temperature;
        self.pressure = pressure;
        self.reset_run(cycle_offset);

        self.state = SimulationState::Thermalisation;
        self.should_adjust_step_size = true;
        info!(cycles = thermalisation_cycles, "starting thermalisation");
        for cycle in 0..thermalisation_cycles {
            if interrupt.load(Ordering::Relaxed) {
                return self.interrupt(run_start);
            }
            self.perform_cycle()?;
            if (cycle + 1) % snapshot_every == 0 {
                collector.add_snapshot(&self.packing, self.total_cycles);
            }
            if (cycle + 1) % 100 == 0 {
                info!(
                    cycle = cycle + 1,
                    density = self.packing.number_density(),
                    "thermalisation progress"
                );
            }
        }

        self.state = SimulationState::Averaging;
        self.should_adjust_step_size = false;
        info!(cycles = averaging_cycles, "starting averaging");
        for cycle in 0..averaging_cycles {
            if interrupt.load(Ordering::Relaxed) {
                return self.interrupt(run_start);
            }
            self.perform_cycle()?;
            if (cycle + 1) % snapshot_every == 0 {
                collector.add_snapshot(&self.packing, self.total_cycles);
            }
            if (cycle + 1) % averaging_every == 0 {
                collector.add_averaging_value(&self.packing);
            }
            if (cycle + 1) % 100 == 0 {
                info!(
                    cycle = cycle + 1,
                    density = self.packing.number_density(),
                    "averaging progress"
                );
            }
        }

        self.state = SimulationState::Finished;
        self.total_microseconds = run_start.elapsed().as_secs_f64() * 1e6;
        Ok(())
    }

    /// Overlap reduction: overlap counting is switched on and cycles run
    /// until the cached overlap count reaches zero. Particle moves see the
    /// signed overlap change as their energy delta, so overlap-reducing
    /// moves are always accepted.
    #[instrument(skip_all, name = "relax_overlaps")]
    pub fn relax_overlaps(
        &mut self,
        temperature: f64,
        pressure: f64,
        snapshot_every: usize,
        collector: &mut dyn ObservablesCollector,
        interrupt: &AtomicBool,
        cycle_offset: usize,
    ) -> Result<(), SimulationError> {
        if temperature <= 0.0 {
            return Err(SimulationError::InvalidParameter("temperature must be positive".into()));
        }
        if pressure <= 0.0 {
            return Err(SimulationError::InvalidParameter("pressure must be positive".into()));
        }
        if snapshot_every == 0 {
            return Err(SimulationError::InvalidParameter(
                "snapshot frequency must be positive".into(),
            ));
        }

        let run_start = Instant::now();
        self.temperature = temperature;
        self.pressure = pressure;
        self.reset_run(cycle_offset);
        self.packing.set_overlap_counting(true);

        self.state = SimulationState::Thermalisation;
        self.should_adjust_step_size = true;
        info!(
            overlaps = self.packing.overlap_count(),
            "starting overlap reduction"
        );
        let mut cycle = 0usize;
        while self.packing.overlap_count() > 0 {
            if interrupt.load(Ordering::Relaxed) {
                return self.interrupt(run_start);
            }
            self.perform_cycle()?;
            cycle += 1;
            if cycle % snapshot_every == 0 {
                collector.add_snapshot(&self.packing, self.total_cycles);
            }
            if cycle % 100 == 0 {
                info!(
                    cycle,
                    overlaps = self.packing.overlap_count(),
                    "overlap reduction progress"
                );
            }
        }

        self.packing.set_overlap_counting(false);
        self.state = SimulationState::Finished;
        self.total_microseconds = run_start.elapsed().as_secs_f64() * 1e6;
        info!(cycles = cycle, "all overlaps eliminated");
        Ok(())
    }

    fn interrupt(&mut self, run_start: Instant) -> Result<(), SimulationError> {
        self.state = SimulationState::Interrupted;
        self.was_interrupted = true;
        self.total_microseconds = run_start.elapsed().as_secs_f64() * 1e6;
        info!(cycle = self.total_cycles, "run interrupted");
        Ok(())
    }

    fn reset_run(&mut self, cycle_offset: usize) {
        self.move_counter.reset();
        self.scaling_counter.reset();
        self.performed_cycles = 0;
        self.total_cycles = cycle_offset;
        self.was_interrupted = false;
        self.move_microseconds = 0.0;
        self.scaling_microseconds = 0.0;
        self.decomposition_microseconds = 0.0;
        self.total_microseconds = 0.0;
    }

    fn perform_cycle(&mut self) -> Result<(), SimulationError> {
        let start = Instant::now();
        if self.num_domains == 1 {
            let n = self.packing.size();
            for _ in 0..n {
                let accepted = self.single_domain_move();
                self.move_counter.increment(accepted);
            }
        } else {
            self.domain_division_moves()?;
        }
        self.move_microseconds += start.elapsed().as_secs_f64() * 1e6;

        let start = Instant::now();
        let scaled = self.scaling_move();
        self.scaling_counter.increment(scaled);
        self.scaling_microseconds += start.elapsed().as_secs_f64() * 1e6;

        if self.should_adjust_step_size {
            self.evaluate_counters();
        }
        self.performed_cycles += 1;
        self.total_cycles += 1;
        Ok(())
    }

    fn single_domain_move(&mut self) -> bool {
        let size = self.packing.size();
        let (translation, rotation, particle, threshold) = {
            let rng = &mut self.rngs[0];
            let translation = sample_translation(rng, self.translation_step);
            let rotation = sample_rotation(rng, self.rotation_step);
            let particle = rng.gen_range(0..size);
            let threshold: f64 = rng.gen_range(0.0..1.0);
            (translation, rotation, particle, threshold)
        };

        let delta = self.packing.try_move(particle, &translation, &rotation, None);
        if metropolis_accepts(delta, self.temperature, threshold) {
            self.packing.accept_move();
            true
        } else {
            self.packing.revert_move();
            false
        }
    }

    fn domain_division_moves(&mut self) -> Result<(), SimulationError> {
        let start = Instant::now();
        let origin = {
            let rng = &mut self.rngs[0];
            Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>())
        };
        let decomposition = DomainDecomposition::new(&self.packing, self.domain_divisions, &origin)?;
        self.decomposition_microseconds += start.elapsed().as_secs_f64() * 1e6;

        let moves_per_region = self.packing.size() / self.num_domains;
        let temperature = self.temperature;
        let translation_step = self.translation_step;
        let rotation_step = self.rotation_step;
        let packing = &self.packing;
        let decomposition = &decomposition;

        let run_region = |region_index: usize, rng: &mut StdRng| -> (DomainMoveOutcome, Counter) {
            let mut counter = Counter::default();
            let mut sandbox = DomainSandbox::new(packing, decomposition, region_index);
            let particles = decomposition.regions()[region_index].particles();
            if !particles.is_empty() {
                for _ in 0..moves_per_region {
                    let translation = sample_translation(rng, translation_step);
                    let rotation = sample_rotation(rng, rotation_step);
                    let particle = particles[rng.gen_range(0..particles.len())];
                    let threshold: f64 = rng.gen_range(0.0..1.0);

                    let delta = sandbox.try_move(particle, &translation, &rotation);
                    if metropolis_accepts(delta, temperature, threshold) {
                        sandbox.accept_move();
                        counter.increment(true);
                    } else {
                        sandbox.revert_move();
                        counter.increment(false);
                    }
                }
            }
            (sandbox.into_outcome(), counter)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = self
            .rngs
            .par_iter_mut()
            .enumerate()
            .map(|(region_index, rng)| run_region(region_index, rng))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = self
            .rngs
            .iter_mut()
            .enumerate()
            .map(|(region_index, rng)| run_region(region_index, rng))
            .collect();

        for (outcome, shard) in results {
            self.packing
                .commit_domain_results(outcome.moved, outcome.delta_energy, outcome.delta_overlaps);
            self.move_counter.merge(&shard);
        }
        Ok(())
    }

    fn scaling_move(&mut self) -> bool {
        let size = self.packing.size();
        let old_volume = self.packing.simulation_box().volume();
        let (transform, threshold) = {
            let rng = &mut self.rngs[0];
            let transform = self.box_scaler.sample_transform(
                self.packing.simulation_box(),
                self.scaling_step,
                rng,
            );
            let threshold: f64 = rng.gen_range(0.0..1.0);
            (transform, threshold)
        };

        let delta = self.packing.try_scaling(&transform);
        if !delta.is_finite() {
            self.packing.revert_scaling();
            return false;
        }

        let delta_v = self.packing.simulation_box().volume() - old_volume;
        let exponent = self.box_scaler.log_jacobian(&transform, size)
            - delta / self.temperature
            - self.pressure * delta_v / self.temperature;
        if threshold <= exponent.exp() {
            self.packing.accept_scaling();
            true
        } else {
            self.packing.revert_scaling();
            false
        }
    }

    /// Step-size self-tuning: acceptance above 0.2 grows the step by 1.1
    /// (translation capped at the shortest box height), below 0.1 shrinks
    /// it; rates in between leave the step alone, so it can oscillate around
    /// a threshold. Translation and rotation steps move together to keep
    /// their configured ratio.
    fn evaluate_counters(&mut self) {
        let size = self.packing.size() as u64;
        if self.move_counter.moves_since_evaluation() >= 100 * size {
            let rate = self.move_counter.current_rate();
            self.move_counter.reset_current();
            if rate > 0.2 {
                let min_height = self.packing.simulation_box().heights().min();
                if self.translation_step * 1.1 <= min_height {
                    self.translation_step *= 1.1;
                    self.rotation_step *= 1.1;
                    info!(
                        rate,
                        translation_step = self.translation_step,
                        rotation_step = self.rotation_step,
                        "increased particle move steps"
                    );
                }
            } else if rate < 0.1 {
                self.translation_step /= 1.1;
                self.rotation_step /= 1.1;
                info!(
                    rate,
                    translation_step = self.translation_step,
                    rotation_step = self.rotation_step,
                    "decreased particle move steps"
                );
            }
        }

        if self.scaling_counter.moves_since_evaluation() >= 100 {
            let rate = self.scaling_counter.current_rate();
            self.scaling_counter.reset_current();
            if rate > 0.2 {
                self.scaling_step *= 1.1;
                info!(rate, scaling_step = self.scaling_step, "increased scaling step");
            } else if rate < 0.1 {
                self.scaling_step /= 1.1;
                info!(rate, scaling_step = self.scaling_step, "decreased scaling step");
            }
        }
    }

    pub fn packing(&self) -> &Packing {
        &self.packing
    }

    /// Hands the packing back after a run.
    pub fn into_packing(self) -> Packing {
        self.packing
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn was_interrupted(&self) -> bool {
        self.was_interrupted
    }

    pub fn current_translation_step(&self) -> f64 {
        self.translation_step
    }

    pub fn current_rotation_step(&self) -> f64 {
        self.rotation_step
    }

    pub fn current_scaling_step(&self) -> f64 {
        self.scaling_step
    }

    pub fn move_acceptance_rate(&self) -> f64 {
        self.move_counter.rate()
    }

    pub fn scaling_acceptance_rate(&self) -> f64 {
        self.scaling_counter.rate()
    }

    /// Cycles performed by this driver in the current run.
    pub fn performed_cycles(&self) -> usize {
        self.performed_cycles
    }

    /// Total cycle number including the continuation offset.
    pub fn total_cycles(&self) -> usize {
        self.total_cycles
    }

    pub fn move_microseconds(&self) -> f64 {
        self.move_microseconds
    }

    pub fn scaling_microseconds(&self) -> f64 {
        self.scaling_microseconds
    }

    pub fn decomposition_microseconds(&self) -> f64 {
        self.decomposition_microseconds
    }

    pub fn total_microseconds(&self) -> f64 {
        self.total_microseconds
    }
}

fn metropolis_accepts(delta: f64, temperature: f64, threshold: f64) -> bool {
    delta.is_finite() && threshold <= (-delta / temperature).exp()
}

fn sample_translation(rng: &mut StdRng, step: f64) -> Vector3<f64> {
    Vector3::new(
        rng.gen_range(-1.0..1.0) * step,
        rng.gen_range(-1.0..1.0) * step,
        rng.gen_range(-1.0..1.0) * step,
    )
}

/// A rotation by a uniform angle in `[-min(step, pi), min(step, pi))` about
/// an axis drawn uniformly on the sphere by accept-reject in the unit cube.
fn sample_rotation(rng: &mut StdRng, step: f64) -> UnitQuaternion<f64> {
    let mut axis = Vector3::zeros();
    loop {
        axis.x = rng.gen_range(-1.0..1.0);
        axis.y = rng.gen_range(-1.0..1.0);
        axis.z = rng.gen_range(-1.0..1.0);
        let norm2 = axis.norm_squared();
        if norm2 <= 1.0 && norm2 > 1e-12 {
            break;
        }
    }
    let angle = rng.gen_range(-1.0..1.0) * step.min(PI);
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle)
}
