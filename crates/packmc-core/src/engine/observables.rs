//! Hooks through which a simulation reports state to the outside world.

use crate::engine::packing::Packing;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Injected collector driven by the simulation: snapshots every
/// `snapshot_every` cycles, averaging values during the averaging phase.
pub trait ObservablesCollector {
    fn add_snapshot(&mut self, packing: &Packing, cycle: usize);

    fn add_averaging_value(&mut self, packing: &Packing);
}

/// Collector for headless runs; records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCollector;

impl ObservablesCollector for NullCollector {
    fn add_snapshot(&mut self, _packing: &Packing, _cycle: usize) {}

    fn add_averaging_value(&mut self, _packing: &Packing) {}
}

/// Everything an external trajectory writer needs to reproduce one frame.
#[derive(Debug, Clone)]
pub struct PackingSnapshot {
    pub cycle: usize,
    pub box_matrix: Matrix3<f64>,
    pub positions: Vec<Vector3<f64>>,
    pub orientations: Vec<UnitQuaternion<f64>>,
}

impl PackingSnapshot {
    pub fn capture(packing: &Packing, cycle: usize) -> Self {
        Self {
            cycle,
            box_matrix: *packing.simulation_box().matrix(),
            positions: packing.shapes().iter().map(|s| *s.position()).collect(),
            orientations: packing.shapes().iter().map(|s| *s.orientation()).collect(),
        }
    }
}

/// Accumulates number-density samples and light-weight snapshots.
#[derive(Debug, Default)]
pub struct DensityCollector {
    densities: Vec<f64>,
    snapshots: Vec<PackingSnapshot>,
}

impl DensityCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[f64] {
        &self.densities
    }

    pub fn snapshots(&self) -> &[PackingSnapshot] {
        &self.snapshots
    }

    pub fn mean_density(&self) -> Option<f64> {
        if self.densities.is_empty() {
            return None;
        }
        Some(self.densities.iter().sum::<f64>() / self.densities.len() as f64)
    }

    /// Standard error of the mean over the collected samples.
    pub fn density_error(&self) -> Option<f64> {
        let n = self.densities.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean_density()?;
        let variance = self
            .densities
            .iter()
            .map(|sample| (sample - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        Some((variance / n as f64).sqrt())
    }

    pub fn clear(&mut self) {
        self.densities.clear();
        self.snapshots.clear();
    }
}

impl ObservablesCollector for DensityCollector {
    fn add_snapshot(&mut self, packing: &Packing, cycle: usize) {
        self.snapshots.push(PackingSnapshot::capture(packing, cycle));
    }

    fn add_averaging_value(&mut self, packing: &Packing) {
        self.densities.push(packing.number_density());
    }
}
