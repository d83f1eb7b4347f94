//! The packing: particles, box, spatial index and interaction bookkeeping.
//!
//! All mutation goes through transactional try/accept/revert pairs. A `try`
//! computes the energy delta of a tentative change against the *committed*
//! state (the neighbour grid never sees tentative data) and stashes the
//! change; `accept` commits it and updates the caches incrementally;
//! `revert` simply drops it. `f64::INFINITY` is the sentinel for a hard
//! rejection. In overlap-counting mode the returned delta is instead the
//! signed change of the overlap count (plus any soft energy change), which
//! lets a Metropolis test drive the overlap count down.

use crate::core::geometry::TriclinicBox;
use crate::core::interaction::ShapeModel;
use crate::core::models::shape::Shape;
use crate::engine::domain::ActiveDomain;
use crate::engine::error::PackingError;
use crate::engine::neighbour_grid::NeighbourGrid;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use std::mem;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on neighbour-grid cells per axis.
const MAX_CELLS_PER_AXIS: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
struct ConfigStats {
    energy: f64,
    overlaps: i64,
}

#[derive(Debug)]
struct PendingMove {
    particle: usize,
    new_shape: Shape,
    delta_energy: f64,
    delta_overlaps: i64,
}

#[derive(Debug)]
struct PendingScaling {
    old_box: TriclinicBox,
    old_shapes: Vec<Shape>,
    old_centres: Vec<Vector3<f64>>,
    old_grid: Option<NeighbourGrid>,
    old_energy: f64,
    old_overlaps: i64,
}

pub struct Packing {
    simulation_box: TriclinicBox,
    shapes: Vec<Shape>,
    model: Arc<dyn ShapeModel>,
    walls: [bool; 3],
    centre_stride: usize,
    centres: Vec<Vector3<f64>>,
    centre_ids: Vec<usize>,
    grid: Option<NeighbourGrid>,
    total_energy: f64,
    overlap_count: i64,
    overlap_counting: bool,
    pending_move: Option<PendingMove>,
    pending_scaling: Option<PendingScaling>,
    scratch: Vec<usize>,
}

impl Packing {
    /// Builds a packing and its spatial index from a starting configuration.
    ///
    /// Fails when the configuration violates a structural invariant: no
    /// particles, a species index unknown to the model, or a box face height
    /// below twice the total interaction range. A box too small to support
    /// the neighbour grid is not an error here: the packing falls back to
    /// brute-force neighbour enumeration.
    pub fn new(
        simulation_box: TriclinicBox,
        shapes: Vec<Shape>,
        model: Arc<dyn ShapeModel>,
        walls: [bool; 3],
    ) -> Result<Self, PackingError> {
        if shapes.is_empty() {
            return Err(PackingError::Empty);
        }
        let available = model.num_species();
        if let Some(shape) = shapes.iter().find(|s| s.species() >= available) {
            return Err(PackingError::UnknownSpecies {
                species: shape.species(),
                available,
            });
        }

        let required = 2.0 * model.total_range_radius();
        let min_height = simulation_box.heights().min();
        if min_height < required {
            return Err(PackingError::FaceHeightTooSmall {
                height: min_height,
                required,
            });
        }

        let centre_stride = (0..available)
            .map(|species| model.interaction_centres(species).len())
            .max()
            .unwrap_or(1)
            .max(1);

        let mut packing = Self {
            simulation_box,
            shapes,
            model,
            walls,
            centre_stride,
            centres: Vec::new(),
            centre_ids: Vec::new(),
            grid: None,
            total_energy: 0.0,
            overlap_count: 0,
            overlap_counting: false,
            pending_move: None,
            pending_scaling: None,
            scratch: Vec::new(),
        };
        packing.rebuild_centres();
        packing.rebuild_grid();

        let mut scratch = Vec::new();
        let (energy, _, _) = packing.recompute_stats(false, &mut scratch);
        packing.total_energy = energy;
        Ok(packing)
    }

    pub fn size(&self) -> usize {
        self.shapes.len()
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn shape(&self, particle: usize) -> &Shape {
        &self.shapes[particle]
    }

    pub fn simulation_box(&self) -> &TriclinicBox {
        &self.simulation_box
    }

    pub fn model(&self) -> &Arc<dyn ShapeModel> {
        &self.model
    }

    pub fn walls(&self) -> [bool; 3] {
        self.walls
    }

    pub fn grid(&self) -> Option<&NeighbourGrid> {
        self.grid.as_ref()
    }

    /// The committed configuration together with auxiliary data, ready for
    /// persisting.
    pub fn snapshot(&self, aux: crate::core::io::AuxInfo) -> crate::core::io::SnapshotData {
        crate::core::io::SnapshotData {
            simulation_box: self.simulation_box.clone(),
            shapes: self.shapes.clone(),
            aux,
        }
    }

    /// Cached total soft energy of the committed state.
    pub fn total_energy(&self) -> f64 {
        self.total_energy
    }

    /// Cached overlap count; meaningful only in overlap-counting mode.
    pub fn overlap_count(&self) -> i64 {
        self.overlap_count
    }

    pub fn is_overlap_counting(&self) -> bool {
        self.overlap_counting
    }

    pub fn number_density(&self) -> f64 {
        self.size() as f64 / self.simulation_box.volume()
    }

    pub fn packing_fraction(&self) -> f64 {
        let particle_volume: f64 = self
            .shapes
            .iter()
            .map(|shape| self.model.volume(shape.species()))
            .sum();
        particle_volume / self.simulation_box.volume()
    }

    pub(crate) fn centre_stride(&self) -> usize {
        self.centre_stride
    }

    pub(crate) fn centre_position(&self, particle: usize, centre: usize) -> Vector3<f64> {
        self.centres[particle * self.centre_stride + centre]
    }

    pub(crate) fn decode_centre(&self, id: usize) -> (usize, usize) {
        (id / self.centre_stride, id % self.centre_stride)
    }

    /// Enables or disables overlap counting, recomputing the cached count
    /// from scratch when turning it on.
    pub fn set_overlap_counting(&mut self, enabled: bool) {
        if enabled == self.overlap_counting {
            return;
        }
        self.overlap_counting = enabled;
        self.overlap_count = if enabled {
            self.count_overlaps_full() as i64
        } else {
            0
        };
    }

    /// Full overlap count of the committed state, ignoring the cache.
    pub fn count_overlaps_full(&self) -> u64 {
        let mut scratch = Vec::new();
        let (_, overlaps, _) = self.recompute_stats(false, &mut scratch);
        overlaps as u64
    }

    /// Proposes translating a particle; see [`Packing::try_move`].
    pub fn try_translation(
        &mut self,
        particle: usize,
        translation: &Vector3<f64>,
        domain: Option<&ActiveDomain>,
    ) -> f64 {
        let new_shape = self.shapes[particle].translated(translation, &self.simulation_box);
        self.try_shape_change(particle, new_shape, domain)
    }

    /// Proposes rotating a particle in place; see [`Packing::try_move`].
    pub fn try_rotation(&mut self, particle: usize, rotation: &UnitQuaternion<f64>) -> f64 {
        let new_shape = self.shapes[particle].rotated(rotation);
        self.try_shape_change(particle, new_shape, None)
    }

    /// Proposes a combined translation and rotation as one atomic change.
    ///
    /// Returns the energy delta of the proposal, `f64::INFINITY` when it is
    /// hard-rejected (overlap in normal mode, or a new position outside the
    /// active domain). The proposal stays pending until [`Packing::accept_move`]
    /// or [`Packing::revert_move`] is called.
    pub fn try_move(
        &mut self,
        particle: usize,
        translation: &Vector3<f64>,
        rotation: &UnitQuaternion<f64>,
        domain: Option<&ActiveDomain>,
    ) -> f64 {
        let new_shape = self.shapes[particle]
            .translated(translation, &self.simulation_box)
            .rotated(rotation);
        self.try_shape_change(particle, new_shape, domain)
    }

    fn try_shape_change(
        &mut self,
        particle: usize,
        new_shape: Shape,
        domain: Option<&ActiveDomain>,
    ) -> f64 {
        debug_assert!(self.pending_move.is_none(), "move transaction already outstanding");
        debug_assert!(self.pending_scaling.is_none(), "scaling transaction outstanding");
        self.pending_move = None;

        if let Some(domain) = domain {
            if !domain.contains(&self.simulation_box.relative(new_shape.position())) {
                return f64::INFINITY;
            }
        }

        let mut scratch = mem::take(&mut self.scratch);
        let new_stats = self.evaluate_against_others(particle, &new_shape, &mut scratch);
        if !self.overlap_counting && new_stats.overlaps > 0 {
            self.scratch = scratch;
            return f64::INFINITY;
        }

        let old_stats = if self.model.has_soft_part() || self.overlap_counting {
            let old_shape = self.shapes[particle].clone();
            self.evaluate_against_others(particle, &old_shape, &mut scratch)
        } else {
            ConfigStats::default()
        };
        self.scratch = scratch;

        let delta_energy = new_stats.energy - old_stats.energy;
        let delta_overlaps = new_stats.overlaps - old_stats.overlaps;
        self.pending_move = Some(PendingMove {
            particle,
            new_shape,
            delta_energy,
            delta_overlaps,
        });

        if self.overlap_counting {
            delta_energy + delta_overlaps as f64
        } else {
            delta_energy
        }
    }

    /// Commits the pending particle move.
    pub fn accept_move(&mut self) {
        let pending = self
            .pending_move
            .take()
            .expect("accept_move without an outstanding transaction");
        self.apply_shape(pending.particle, pending.new_shape);
        self.total_energy += pending.delta_energy;
        self.overlap_count += pending.delta_overlaps;
    }

    /// Drops the pending particle move, if any.
    pub fn revert_move(&mut self) {
        self.pending_move = None;
    }

    /// Proposes replacing the box matrix `B` with `transform * B`.
    ///
    /// Returns `f64::INFINITY` immediately (with nothing to revert) when the
    /// transform would invert the box or bring a face height below twice the
    /// total interaction range. Otherwise particle positions follow the
    /// affine map (fractional coordinates are preserved), the grid is
    /// re-dimensioned and energy and overlaps are recomputed in full.
    pub fn try_scaling(&mut self, transform: &Matrix3<f64>) -> f64 {
        debug_assert!(self.pending_move.is_none(), "move transaction outstanding");
        debug_assert!(self.pending_scaling.is_none(), "scaling transaction already outstanding");

        let Some(new_box) = self.simulation_box.scaled(transform) else {
            return f64::INFINITY;
        };
        let required = 2.0 * self.model.total_range_radius();
        if new_box.heights().min() < required {
            return f64::INFINITY;
        }

        self.pending_scaling = Some(PendingScaling {
            old_box: self.simulation_box.clone(),
            old_shapes: self.shapes.clone(),
            old_centres: self.centres.clone(),
            old_grid: self.grid.take(),
            old_energy: self.total_energy,
            old_overlaps: self.overlap_count,
        });

        self.simulation_box = new_box;
        for shape in &mut self.shapes {
            shape.set_position(transform * shape.position());
        }
        self.rebuild_centres();
        self.rebuild_grid();

        let mut scratch = mem::take(&mut self.scratch);
        let (energy, overlaps, aborted) = self.recompute_stats(!self.overlap_counting, &mut scratch);
        self.scratch = scratch;
        if aborted {
            // Overlapping proposal in normal mode; caches are only restored
            // by the mandatory revert_scaling.
            return f64::INFINITY;
        }

        let pending = self.pending_scaling.as_ref().unwrap();
        let delta_energy = energy - pending.old_energy;
        let delta_overlaps = overlaps - pending.old_overlaps;
        self.total_energy = energy;
        self.overlap_count = if self.overlap_counting { overlaps } else { 0 };

        if self.overlap_counting {
            delta_energy + delta_overlaps as f64
        } else {
            delta_energy
        }
    }

    /// Commits the pending box scaling.
    pub fn accept_scaling(&mut self) {
        debug_assert!(
            self.pending_scaling.is_some(),
            "accept_scaling without an outstanding transaction"
        );
        self.pending_scaling = None;
    }

    /// Rolls the packing back to the state before the pending scaling.
    pub fn revert_scaling(&mut self) {
        if let Some(saved) = self.pending_scaling.take() {
            self.simulation_box = saved.old_box;
            self.shapes = saved.old_shapes;
            self.centres = saved.old_centres;
            self.grid = saved.old_grid;
            self.total_energy = saved.old_energy;
            self.overlap_count = saved.old_overlaps;
        }
    }

    /// Applies externally evaluated per-domain moves and cache deltas after
    /// a parallel particle-move phase.
    pub(crate) fn commit_domain_results(
        &mut self,
        moved: impl IntoIterator<Item = (usize, Shape)>,
        delta_energy: f64,
        delta_overlaps: i64,
    ) {
        debug_assert!(self.pending_move.is_none() && self.pending_scaling.is_none());
        for (particle, shape) in moved {
            self.apply_shape(particle, shape);
        }
        self.total_energy += delta_energy;
        self.overlap_count += delta_overlaps;
    }

    fn apply_shape(&mut self, particle: usize, new_shape: Shape) {
        let offsets = self.model.interaction_centres(new_shape.species());
        for (centre, offset) in offsets.iter().enumerate() {
            let id = particle * self.centre_stride + centre;
            let new_pos = new_shape.body_point(offset);
            if let Some(grid) = &mut self.grid {
                grid.relocate(
                    id,
                    &self.simulation_box.relative(&self.centres[id]),
                    &self.simulation_box.relative(&new_pos),
                );
            }
            self.centres[id] = new_pos;
        }
        self.shapes[particle] = new_shape;
    }

    fn rebuild_centres(&mut self) {
        self.centres.clear();
        self.centres
            .resize(self.shapes.len() * self.centre_stride, Vector3::zeros());
        self.centre_ids.clear();
        for (particle, shape) in self.shapes.iter().enumerate() {
            let offsets = self.model.interaction_centres(shape.species());
            for (centre, offset) in offsets.iter().enumerate() {
                let id = particle * self.centre_stride + centre;
                self.centres[id] = shape.body_point(offset);
                self.centre_ids.push(id);
            }
        }
    }

    fn rebuild_grid(&mut self) {
        let heights = self.simulation_box.heights();
        // Very dilute systems would otherwise blow up the cell array; cells
        // coarser than the interaction range stay correct, just less tight.
        let cell_edge = self
            .model
            .total_range_radius()
            .max(heights.max() / MAX_CELLS_PER_AXIS as f64);
        match NeighbourGrid::new(&heights, cell_edge) {
            Ok(mut grid) => {
                for &id in &self.centre_ids {
                    grid.add(id, &self.simulation_box.relative(&self.centres[id]));
                }
                self.grid = Some(grid);
            }
            Err(reason) => {
                debug!(%reason, "falling back to brute-force neighbour enumeration");
                self.grid = None;
            }
        }
    }

    /// Inward-pointing wall planes as (origin, unit normal) pairs.
    pub(crate) fn wall_planes(&self) -> Vec<(Vector3<f64>, Vector3<f64>)> {
        let mut planes = Vec::new();
        let matrix = self.simulation_box.matrix();
        for axis in 0..3 {
            if !self.walls[axis] {
                continue;
            }
            let edge = matrix.column(axis).into_owned();
            let other1 = matrix.column((axis + 1) % 3).into_owned();
            let other2 = matrix.column((axis + 2) % 3).into_owned();
            let mut normal = other1.cross(&other2).normalize();
            if normal.dot(&edge) < 0.0 {
                normal = -normal;
            }
            planes.push((Vector3::zeros(), normal));
            planes.push((edge, -normal));
        }
        planes
    }

    /// Energy and overlaps of one particle configuration against all other
    /// committed particles (and the walls). With overlap counting off the
    /// scan stops at the first overlap.
    fn evaluate_against_others(
        &self,
        particle: usize,
        shape: &Shape,
        scratch: &mut Vec<usize>,
    ) -> ConfigStats {
        let model = &*self.model;
        let hard = model.has_hard_part();
        let soft = model.has_soft_part();
        let walls = if model.has_wall_part() {
            self.wall_planes()
        } else {
            Vec::new()
        };

        let mut stats = ConfigStats::default();
        let offsets = model.interaction_centres(shape.species());
        for (centre, offset) in offsets.iter().enumerate() {
            let pos = shape.body_point(offset);

            for (wall_origin, wall_normal) in &walls {
                if model.overlap_with_wall(
                    &pos,
                    shape.orientation(),
                    shape.species(),
                    centre,
                    wall_origin,
                    wall_normal,
                ) {
                    stats.overlaps += 1;
                    if !self.overlap_counting {
                        return stats;
                    }
                }
            }

            scratch.clear();
            match &self.grid {
                Some(grid) => {
                    grid.neighbours_into(&self.simulation_box.relative(&pos), scratch)
                }
                None => scratch.extend_from_slice(&self.centre_ids),
            }

            for &id in scratch.iter() {
                let (other, other_centre) = self.decode_centre(id);
                if other == particle {
                    continue;
                }
                let other_shape = &self.shapes[other];
                let other_pos = &self.centres[id];
                if hard
                    && model.overlap_between(
                        &pos,
                        shape.orientation(),
                        shape.species(),
                        centre,
                        other_pos,
                        other_shape.orientation(),
                        other_shape.species(),
                        other_centre,
                        &self.simulation_box,
                    )
                {
                    stats.overlaps += 1;
                    if !self.overlap_counting {
                        return stats;
                    }
                }
                if soft {
                    stats.energy += model.energy_between(
                        &pos,
                        shape.orientation(),
                        shape.species(),
                        centre,
                        other_pos,
                        other_shape.orientation(),
                        other_shape.species(),
                        other_centre,
                        &self.simulation_box,
                    );
                }
            }
        }
        stats
    }

    /// Recomputes total energy and overlap count from the committed state.
    /// Each unordered pair contributes once. Returns `(energy, overlaps,
    /// aborted)`; when `short_circuit` is set the scan stops at the first
    /// overlap with `aborted = true`.
    fn recompute_stats(&self, short_circuit: bool, scratch: &mut Vec<usize>) -> (f64, i64, bool) {
        let model = &*self.model;
        let hard = model.has_hard_part();
        let soft = model.has_soft_part();
        let walls = if model.has_wall_part() {
            self.wall_planes()
        } else {
            Vec::new()
        };

        let mut energy = 0.0;
        let mut overlaps = 0i64;
        for (particle, shape) in self.shapes.iter().enumerate() {
            let offsets = model.interaction_centres(shape.species());
            for (centre, _) in offsets.iter().enumerate() {
                let id = particle * self.centre_stride + centre;
                let pos = self.centres[id];

                for (wall_origin, wall_normal) in &walls {
                    if model.overlap_with_wall(
                        &pos,
                        shape.orientation(),
                        shape.species(),
                        centre,
                        wall_origin,
                        wall_normal,
                    ) {
                        overlaps += 1;
                        if short_circuit {
                            return (energy, overlaps, true);
                        }
                    }
                }

                scratch.clear();
                match &self.grid {
                    Some(grid) => {
                        grid.neighbours_into(&self.simulation_box.relative(&pos), scratch)
                    }
                    None => scratch.extend_from_slice(&self.centre_ids),
                }

                for &other_id in scratch.iter() {
                    let (other, other_centre) = self.decode_centre(other_id);
                    if other <= particle {
                        continue;
                    }
                    let other_shape = &self.shapes[other];
                    let other_pos = &self.centres[other_id];
                    if hard
                        && model.overlap_between(
                            &pos,
                            shape.orientation(),
                            shape.species(),
                            centre,
                            other_pos,
                            other_shape.orientation(),
                            other_shape.species(),
                            other_centre,
                            &self.simulation_box,
                        )
                    {
                        overlaps += 1;
                        if short_circuit {
                            return (energy, overlaps, true);
                        }
                    }
                    if soft {
                        energy += model.energy_between(
                            &pos,
                            shape.orientation(),
                            shape.species(),
                            centre,
                            other_pos,
                            other_shape.orientation(),
                            other_shape.species(),
                            other_centre,
                            &self.simulation_box,
                        );
                    }
                }
            }
        }
        (energy, overlaps, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interaction::{Polysphere, Sphere, SpherePotential};
    use approx::assert_relative_eq;

    fn two_hard_spheres(gap: f64) -> Packing {
        let model = Arc::new(Sphere::hard(0.5));
        let shapes = vec![
            Shape::at(Vector3::new(2.0, 2.0, 2.0)),
            Shape::at(Vector3::new(3.0 + gap, 2.0, 2.0)),
        ];
        Packing::new(TriclinicBox::cubic(10.0), shapes, model, [false; 3]).unwrap()
    }

    #[test]
    fn empty_packing_is_rejected() {
        let model = Arc::new(Sphere::hard(0.5));
        let result = Packing::new(TriclinicBox::cubic(10.0), Vec::new(), model, [false; 3]);
        assert!(matches!(result, Err(PackingError::Empty)));
    }

    #[test]
    fn too_small_box_is_rejected() {
        let model = Arc::new(Sphere::hard(0.5));
        let shapes = vec![Shape::at(Vector3::new(0.5, 0.5, 0.5))];
        let result = Packing::new(TriclinicBox::cubic(1.5), shapes, model, [false; 3]);
        assert!(matches!(result, Err(PackingError::FaceHeightTooSmall { .. })));
    }

    #[test]
    fn unknown_species_is_rejected() {
        let model = Arc::new(Sphere::hard(0.5));
        let shapes = vec![Shape::new(Vector3::new(1.0, 1.0, 1.0), UnitQuaternion::identity(), 3)];
        let result = Packing::new(TriclinicBox::cubic(10.0), shapes, model, [false; 3]);
        assert!(matches!(result, Err(PackingError::UnknownSpecies { species: 3, .. })));
    }

    #[test]
    fn overlapping_translation_returns_infinity() {
        let mut packing = two_hard_spheres(0.5);
        let delta = packing.try_translation(0, &Vector3::new(1.3, 0.0, 0.0), None);
        assert!(delta.is_infinite());
        packing.revert_move();
        assert_relative_eq!(packing.shape(0).position()[0], 2.0);
    }

    #[test]
    fn accepted_translation_moves_the_particle_and_the_grid_entry() {
        let mut packing = two_hard_spheres(0.5);
        let delta = packing.try_translation(0, &Vector3::new(-1.0, 0.0, 0.0), None);
        assert_eq!(delta, 0.0);
        packing.accept_move();
        assert_relative_eq!(packing.shape(0).position()[0], 1.0);

        let frac = packing
            .simulation_box()
            .relative(packing.shape(0).position());
        let grid = packing.grid().unwrap();
        assert!(grid.cell_of(&frac).contains(&0));
    }

    #[test]
    fn translation_through_the_boundary_wraps() {
        let mut packing = two_hard_spheres(0.5);
        let delta = packing.try_translation(0, &Vector3::new(-3.0, 0.0, 0.0), None);
        assert_eq!(delta, 0.0);
        packing.accept_move();
        assert_relative_eq!(packing.shape(0).position()[0], 9.0);
    }

    #[test]
    fn overlap_counting_returns_signed_deltas() {
        let mut packing = two_hard_spheres(0.5);
        packing.set_overlap_counting(true);
        assert_eq!(packing.overlap_count(), 0);

        let delta = packing.try_translation(0, &Vector3::new(1.3, 0.0, 0.0), None);
        assert_relative_eq!(delta, 1.0);
        packing.accept_move();
        assert_eq!(packing.overlap_count(), 1);

        let delta = packing.try_translation(0, &Vector3::new(-1.3, 0.0, 0.0), None);
        assert_relative_eq!(delta, -1.0);
        packing.accept_move();
        assert_eq!(packing.overlap_count(), 0);
    }

    #[test]
    fn soft_energy_cache_tracks_accepted_moves() {
        let model = Arc::new(Sphere::new(0.5, SpherePotential::LennardJones { epsilon: 1.0, sigma: 1.0 }));
        let shapes = vec![
            Shape::at(Vector3::new(5.0, 5.0, 5.0)),
            Shape::at(Vector3::new(6.2, 5.0, 5.0)),
        ];
        let mut packing = Packing::new(TriclinicBox::cubic(12.0), shapes, model, [false; 3]).unwrap();
        let initial = packing.total_energy();

        let delta = packing.try_translation(1, &Vector3::new(0.4, 0.0, 0.0), None);
        packing.accept_move();
        assert_relative_eq!(packing.total_energy(), initial + delta, epsilon = 1e-12);

        let mut scratch = Vec::new();
        let (direct, _, _) = packing.recompute_stats(false, &mut scratch);
        assert_relative_eq!(packing.total_energy(), direct, epsilon = 1e-9);
    }

    #[test]
    fn scaling_preserves_fractional_coordinates() {
        let mut packing = two_hard_spheres(0.5);
        let old_frac = packing
            .simulation_box()
            .relative(packing.shape(1).position());
        let transform = Matrix3::from_diagonal(&Vector3::new(1.1, 1.1, 1.1));
        let delta = packing.try_scaling(&transform);
        assert_eq!(delta, 0.0);
        packing.accept_scaling();

        assert_relative_eq!(packing.simulation_box().volume(), 1331.0, epsilon = 1e-9);
        let new_frac = packing
            .simulation_box()
            .relative(packing.shape(1).position());
        assert_relative_eq!(new_frac, old_frac, epsilon = 1e-12);
    }

    #[test]
    fn rejected_scaling_restores_the_exact_state() {
        let mut packing = two_hard_spheres(0.01);
        let old_box = packing.simulation_box().clone();
        let old_shapes = packing.shapes().to_vec();

        // Strong compression makes the pair overlap.
        let transform = Matrix3::from_diagonal(&Vector3::new(0.3, 0.3, 0.3));
        let delta = packing.try_scaling(&transform);
        assert!(delta.is_infinite());
        packing.revert_scaling();

        assert_eq!(packing.simulation_box(), &old_box);
        assert_eq!(packing.shapes(), old_shapes.as_slice());
        assert_eq!(packing.count_overlaps_full(), 0);
    }

    #[test]
    fn scaling_below_the_height_floor_is_rejected_outright() {
        let mut packing = two_hard_spheres(0.5);
        let transform = Matrix3::from_diagonal(&Vector3::new(0.15, 1.0, 1.0));
        assert!(packing.try_scaling(&transform).is_infinite());
        // Nothing pending: revert is a no-op and the box is untouched.
        packing.revert_scaling();
        assert_relative_eq!(packing.simulation_box().volume(), 1000.0);
    }

    #[test]
    fn brute_force_fallback_still_detects_overlaps() {
        // Heights fit only two grid cells, so the packing runs gridless.
        let model = Arc::new(Sphere::hard(0.5));
        let shapes = vec![
            Shape::at(Vector3::new(0.6, 1.25, 1.25)),
            Shape::at(Vector3::new(1.9, 1.25, 1.25)),
        ];
        let mut packing = Packing::new(TriclinicBox::cubic(2.5), shapes, model, [false; 3]).unwrap();
        assert!(packing.grid().is_none());

        let delta = packing.try_translation(0, &Vector3::new(0.4, 0.0, 0.0), None);
        assert!(delta.is_infinite());
        // Through the periodic boundary as well: 0.6 -> 0.2, image distance to
        // 1.9 is 0.8 < 1.
        packing.revert_move();
        assert!(packing
            .try_translation(0, &Vector3::new(-0.4, 0.0, 0.0), None)
            .is_infinite());
    }

    #[test]
    fn walls_block_protruding_moves() {
        let model = Arc::new(Sphere::hard(0.5));
        let shapes = vec![Shape::at(Vector3::new(2.0, 2.0, 2.0))];
        let mut packing =
            Packing::new(TriclinicBox::cubic(8.0), shapes, model, [false, false, true]).unwrap();

        assert!(packing
            .try_translation(0, &Vector3::new(0.0, 0.0, -1.7), None)
            .is_infinite());
        packing.revert_move();
        assert_eq!(packing.try_translation(0, &Vector3::new(0.0, 0.0, -1.3), None), 0.0);
    }

    #[test]
    fn walls_constrain_soft_potentials_too() {
        let model = Arc::new(Sphere::new(0.5, SpherePotential::Wca { epsilon: 1.0, sigma: 1.0 }));
        let shapes = vec![Shape::at(Vector3::new(4.0, 4.0, 4.0))];
        let mut packing =
            Packing::new(TriclinicBox::cubic(8.0), shapes, model, [false, false, true]).unwrap();

        assert!(packing
            .try_translation(0, &Vector3::new(0.0, 0.0, -3.7), None)
            .is_infinite());
        packing.revert_move();
        assert_eq!(packing.try_translation(0, &Vector3::new(0.0, 0.0, -3.3), None), 0.0);
    }

    #[test]
    fn multi_centre_shapes_register_every_centre_in_the_grid() {
        let model = Arc::new(Polysphere::dumbbell(0.5, 1.0, SpherePotential::Hard));
        let shapes = vec![
            Shape::at(Vector3::new(3.0, 3.0, 3.0)),
            Shape::at(Vector3::new(7.0, 7.0, 7.0)),
        ];
        let packing = Packing::new(TriclinicBox::cubic(12.0), shapes, model, [false; 3]).unwrap();
        let grid = packing.grid().unwrap();

        for particle in 0..2 {
            for centre in 0..2 {
                let id = particle * packing.centre_stride() + centre;
                let frac = packing
                    .simulation_box()
                    .relative(&packing.centre_position(particle, centre));
                assert!(grid.cell_of(&frac).contains(&id));
            }
        }
    }

    #[test]
    fn dumbbell_end_overlap_is_detected() {
        let model = Arc::new(Polysphere::dumbbell(0.5, 1.0, SpherePotential::Hard));
        let shapes = vec![
            Shape::at(Vector3::new(3.0, 3.0, 3.0)),
            // End centres sit at z +- 0.5; these chains almost touch tip to tip.
            Shape::at(Vector3::new(3.0, 3.0, 5.1)),
        ];
        let mut packing = Packing::new(TriclinicBox::cubic(12.0), shapes, model, [false; 3]).unwrap();
        assert!(packing
            .try_translation(1, &Vector3::new(0.0, 0.0, -0.2), None)
            .is_infinite());
    }
}
