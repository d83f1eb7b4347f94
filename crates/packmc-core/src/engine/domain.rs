//! Domain decomposition for parallel particle moves.
//!
//! The box is cut by three families of parallel planes through a random
//! fractional origin, snapped to neighbour-grid cell edges. Each of the
//! resulting regions is shrunk by a ghost margin of half the total
//! interaction range per face, so that the interiors of any two active
//! regions stay at least one full interaction range apart: moves confined
//! to different active regions can never interact, which is what makes the
//! per-region workers safe to run in parallel against a frozen committed
//! state. Particles caught in the ghost layer rest for one cycle; the fresh
//! random origin of the next cycle sets them free again.

use crate::core::models::shape::Shape;
use crate::engine::error::PackingError;
use crate::engine::packing::Packing;
use nalgebra::{UnitQuaternion, Vector3};
use std::collections::HashMap;

/// One region of the decomposition in fractional coordinates; per axis the
/// interval may wrap around the periodic boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDomain {
    begin: Vector3<f64>,
    end: Vector3<f64>,
}

impl ActiveDomain {
    pub(crate) fn new(begin: Vector3<f64>, end: Vector3<f64>) -> Self {
        Self { begin, end }
    }

    /// Fractional lower bounds of the region, one per axis.
    pub fn begin(&self) -> &Vector3<f64> {
        &self.begin
    }

    /// Fractional upper bounds of the region; below `begin` on an axis the
    /// interval wraps around the periodic boundary.
    pub fn end(&self) -> &Vector3<f64> {
        &self.end
    }

    /// Whether a fractional position lies inside the region.
    pub fn contains(&self, frac: &Vector3<f64>) -> bool {
        (0..3).all(|axis| {
            let coord = frac[axis] - frac[axis].floor();
            let begin = self.begin[axis];
            let end = self.end[axis];
            if begin <= end {
                coord >= begin && coord < end
            } else {
                coord >= begin || coord < end
            }
        })
    }
}

#[derive(Debug)]
pub struct Region {
    bounds: ActiveDomain,
    particles: Vec<usize>,
}

impl Region {
    pub fn bounds(&self) -> &ActiveDomain {
        &self.bounds
    }

    pub fn particles(&self) -> &[usize] {
        &self.particles
    }
}

/// A wrapped fractional interval `[begin, end)`.
#[derive(Debug, Clone, Copy)]
struct AxisInterval {
    begin: f64,
    end: f64,
}

impl AxisInterval {
    fn contains(&self, coord: f64) -> bool {
        if self.begin <= self.end {
            coord >= self.begin && coord < self.end
        } else {
            coord >= self.begin || coord < self.end
        }
    }
}

#[derive(Debug)]
pub struct DomainDecomposition {
    divisions: [usize; 3],
    regions: Vec<Region>,
    owner: Vec<Option<usize>>,
}

impl DomainDecomposition {
    /// Decomposes the packing for the given divisions and fractional origin.
    ///
    /// Fails with `DomainsTooFine` when the packing has no neighbour grid to
    /// align with, or when some region could not keep an extent of at least
    /// twice the total interaction range on a divided axis.
    pub fn new(
        packing: &Packing,
        divisions: [usize; 3],
        origin: &Vector3<f64>,
    ) -> Result<Self, PackingError> {
        let too_fine = PackingError::DomainsTooFine { divisions };
        let grid = packing.grid().ok_or_else(|| too_fine.clone())?;
        let cells = grid.cells_per_axis();
        let heights = packing.simulation_box().heights();
        let total_range = packing.model().total_range_radius();

        let mut intervals: [Vec<AxisInterval>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for axis in 0..3 {
            let count = divisions[axis];
            if count <= 1 {
                intervals[axis].push(AxisInterval { begin: 0.0, end: 1.0 });
                continue;
            }

            let cells_f = cells[axis] as f64;
            let mut planes = Vec::with_capacity(count);
            for i in 0..count {
                let raw = origin[axis] + i as f64 / count as f64;
                let raw = raw - raw.floor();
                let snapped = (raw * cells_f).round() / cells_f;
                planes.push(snapped - snapped.floor());
            }

            let margin = total_range / 2.0 / heights[axis];
            for i in 0..count {
                let begin = planes[i];
                let end = planes[(i + 1) % count];
                // Wrapped plane separation; two planes snapped onto the same
                // cell edge leave an empty region.
                let mut width = end - begin;
                if width <= 0.0 {
                    width += 1.0;
                }
                if end == begin || width * heights[axis] < 2.0 * total_range {
                    return Err(too_fine);
                }
                intervals[axis].push(AxisInterval {
                    begin: wrap_unit(begin + margin),
                    end: wrap_unit(end - margin),
                });
            }
        }

        let mut regions = Vec::with_capacity(divisions.iter().product());
        for ix in 0..divisions[0].max(1) {
            for iy in 0..divisions[1].max(1) {
                for iz in 0..divisions[2].max(1) {
                    let begin = Vector3::new(
                        intervals[0][ix].begin,
                        intervals[1][iy].begin,
                        intervals[2][iz].begin,
                    );
                    let end = Vector3::new(
                        intervals[0][ix].end,
                        intervals[1][iy].end,
                        intervals[2][iz].end,
                    );
                    regions.push(Region {
                        bounds: ActiveDomain::new(begin, end),
                        particles: Vec::new(),
                    });
                }
            }
        }

        let mut owner = vec![None; packing.size()];
        for (particle, shape) in packing.shapes().iter().enumerate() {
            let frac = packing.simulation_box().relative(shape.position());
            let coords = [
                locate(&intervals[0], frac[0]),
                locate(&intervals[1], frac[1]),
                locate(&intervals[2], frac[2]),
            ];
            if let (Some(cx), Some(cy), Some(cz)) = (coords[0], coords[1], coords[2]) {
                let index =
                    (cx * divisions[1].max(1) + cy) * divisions[2].max(1) + cz;
                regions[index].particles.push(particle);
                owner[particle] = Some(index);
            }
        }

        Ok(Self {
            divisions,
            regions,
            owner,
        })
    }

    pub fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region index of each particle; `None` for ghost-layer particles.
    pub fn owner(&self) -> &[Option<usize>] {
        &self.owner
    }
}

fn wrap_unit(coord: f64) -> f64 {
    coord - coord.floor()
}

fn locate(intervals: &[AxisInterval], coord: f64) -> Option<usize> {
    let coord = wrap_unit(coord);
    intervals.iter().position(|interval| interval.contains(coord))
}

#[derive(Debug)]
pub(crate) struct DomainMoveOutcome {
    pub moved: Vec<(usize, Shape)>,
    pub delta_energy: f64,
    pub delta_overlaps: i64,
}

#[derive(Debug)]
struct SandboxPending {
    particle: usize,
    new_shape: Shape,
    delta_energy: f64,
    delta_overlaps: i64,
}

/// A per-region overlay over a frozen committed packing.
///
/// The sandbox owns the current (possibly moved) shapes of its region's
/// particles together with a local cell map keyed by global grid cell
/// indices; everything else is read from the committed packing. Offering
/// the same try/accept/revert surface as the packing itself, it lets one
/// worker run its region's move sequence without touching shared state.
pub(crate) struct DomainSandbox<'a> {
    packing: &'a Packing,
    owner: &'a [Option<usize>],
    region_index: usize,
    bounds: &'a ActiveDomain,
    shapes: HashMap<usize, Shape>,
    cells: HashMap<usize, Vec<usize>>,
    walls: Vec<(Vector3<f64>, Vector3<f64>)>,
    accepted: Vec<usize>,
    delta_energy: f64,
    delta_overlaps: i64,
    pending: Option<SandboxPending>,
    scratch: Vec<usize>,
    cell_scratch: Vec<usize>,
}

impl<'a> DomainSandbox<'a> {
    pub fn new(
        packing: &'a Packing,
        decomposition: &'a DomainDecomposition,
        region_index: usize,
    ) -> Self {
        let region = &decomposition.regions()[region_index];
        let model = packing.model();
        let grid = packing.grid().expect("domain moves require a neighbour grid");

        let mut shapes = HashMap::with_capacity(region.particles().len());
        let mut cells: HashMap<usize, Vec<usize>> = HashMap::new();
        for &particle in region.particles() {
            let shape = packing.shape(particle).clone();
            for centre in 0..model.interaction_centres(shape.species()).len() {
                let id = particle * packing.centre_stride() + centre;
                let frac = packing
                    .simulation_box()
                    .relative(&packing.centre_position(particle, centre));
                cells.entry(grid.cell_index_of(&frac)).or_default().push(id);
            }
            shapes.insert(particle, shape);
        }

        let walls = if model.has_wall_part() {
            packing.wall_planes()
        } else {
            Vec::new()
        };

        Self {
            packing,
            owner: decomposition.owner(),
            region_index,
            bounds: region.bounds(),
            shapes,
            cells,
            walls,
            accepted: Vec::new(),
            delta_energy: 0.0,
            delta_overlaps: 0,
            pending: None,
            scratch: Vec::new(),
            cell_scratch: Vec::new(),
        }
    }

    /// Mirrors [`Packing::try_move`] against the overlay state.
    pub fn try_move(
        &mut self,
        particle: usize,
        translation: &Vector3<f64>,
        rotation: &UnitQuaternion<f64>,
    ) -> f64 {
        debug_assert!(self.pending.is_none());
        let bc = self.packing.simulation_box();
        let old_shape = self.shapes[&particle].clone();
        let new_shape = old_shape.translated(translation, bc).rotated(rotation);

        if !self.bounds.contains(&bc.relative(new_shape.position())) {
            return f64::INFINITY;
        }

        let counting = self.packing.is_overlap_counting();
        let new_stats = self.evaluate(particle, &new_shape);
        if !counting && new_stats.1 > 0 {
            return f64::INFINITY;
        }
        let old_stats = if self.packing.model().has_soft_part() || counting {
            self.evaluate(particle, &old_shape)
        } else {
            (0.0, 0)
        };

        let delta_energy = new_stats.0 - old_stats.0;
        let delta_overlaps = new_stats.1 - old_stats.1;
        self.pending = Some(SandboxPending {
            particle,
            new_shape,
            delta_energy,
            delta_overlaps,
        });

        if counting {
            delta_energy + delta_overlaps as f64
        } else {
            delta_energy
        }
    }

    pub fn accept_move(&mut self) {
        let pending = self.pending.take().expect("no outstanding sandbox move");
        let model = self.packing.model().clone();
        let grid = self.packing.grid().expect("domain moves require a neighbour grid");
        let bc = self.packing.simulation_box();
        let stride = self.packing.centre_stride();

        let old_shape = &self.shapes[&pending.particle];
        let offsets = model.interaction_centres(pending.new_shape.species());
        for (centre, offset) in offsets.iter().enumerate() {
            let id = pending.particle * stride + centre;
            let old_cell = grid.cell_index_of(&bc.relative(&old_shape.body_point(offset)));
            let new_cell = grid.cell_index_of(&bc.relative(&pending.new_shape.body_point(offset)));
            if old_cell != new_cell {
                let bucket = self.cells.get_mut(&old_cell).expect("sandbox cell out of sync");
                let found = bucket.iter().position(|&entry| entry == id).unwrap();
                bucket.swap_remove(found);
                self.cells.entry(new_cell).or_default().push(id);
            }
        }

        self.accepted.push(pending.particle);
        self.shapes.insert(pending.particle, pending.new_shape);
        self.delta_energy += pending.delta_energy;
        self.delta_overlaps += pending.delta_overlaps;
    }

    pub fn revert_move(&mut self) {
        self.pending = None;
    }

    pub fn into_outcome(mut self) -> DomainMoveOutcome {
        self.accepted.sort_unstable();
        self.accepted.dedup();
        let moved = self
            .accepted
            .iter()
            .map(|&particle| (particle, self.shapes.remove(&particle).unwrap()))
            .collect();
        DomainMoveOutcome {
            moved,
            delta_energy: self.delta_energy,
            delta_overlaps: self.delta_overlaps,
        }
    }

    /// Energy and overlaps of a tentative shape against the overlay (own
    /// region, current) plus the committed remainder (frozen for the phase).
    fn evaluate(&mut self, particle: usize, shape: &Shape) -> (f64, i64) {
        let packing = self.packing;
        let model = &**packing.model();
        let bc = packing.simulation_box();
        let grid = packing.grid().expect("domain moves require a neighbour grid");
        let stride = packing.centre_stride();
        let counting = packing.is_overlap_counting();
        let hard = model.has_hard_part();
        let soft = model.has_soft_part();

        let mut energy = 0.0;
        let mut overlaps = 0i64;
        let offsets = model.interaction_centres(shape.species());
        for (centre, offset) in offsets.iter().enumerate() {
            let pos = shape.body_point(offset);

            for (wall_origin, wall_normal) in &self.walls {
                if model.overlap_with_wall(
                    &pos,
                    shape.orientation(),
                    shape.species(),
                    centre,
                    wall_origin,
                    wall_normal,
                ) {
                    overlaps += 1;
                    if !counting {
                        return (energy, overlaps);
                    }
                }
            }

            let frac = bc.relative(&pos);

            // Committed particles of other regions and the ghost layer.
            self.scratch.clear();
            grid.neighbours_into(&frac, &mut self.scratch);
            for &id in &self.scratch {
                let (other, other_centre) = (id / stride, id % stride);
                if other == particle || self.owner[other] == Some(self.region_index) {
                    continue;
                }
                let other_shape = packing.shape(other);
                let other_pos = packing.centre_position(other, other_centre);
                if hard
                    && model.overlap_between(
                        &pos,
                        shape.orientation(),
                        shape.species(),
                        centre,
                        &other_pos,
                        other_shape.orientation(),
                        other_shape.species(),
                        other_centre,
                        bc,
                    )
                {
                    overlaps += 1;
                    if !counting {
                        return (energy, overlaps);
                    }
                }
                if soft {
                    energy += model.energy_between(
                        &pos,
                        shape.orientation(),
                        shape.species(),
                        centre,
                        &other_pos,
                        other_shape.orientation(),
                        other_shape.species(),
                        other_centre,
                        bc,
                    );
                }
            }

            // Own-region particles at their current overlay positions.
            self.cell_scratch.clear();
            grid.neighbour_cells_into(&frac, &mut self.cell_scratch);
            for &cell in &self.cell_scratch {
                let Some(bucket) = self.cells.get(&cell) else {
                    continue;
                };
                for &id in bucket {
                    let (other, other_centre) = (id / stride, id % stride);
                    if other == particle {
                        continue;
                    }
                    let other_shape = &self.shapes[&other];
                    let other_offset = &model.interaction_centres(other_shape.species())[other_centre];
                    let other_pos = other_shape.body_point(other_offset);
                    if hard
                        && model.overlap_between(
                            &pos,
                            shape.orientation(),
                            shape.species(),
                            centre,
                            &other_pos,
                            other_shape.orientation(),
                            other_shape.species(),
                            other_centre,
                            bc,
                        )
                    {
                        overlaps += 1;
                        if !counting {
                            return (energy, overlaps);
                        }
                    }
                    if soft {
                        energy += model.energy_between(
                            &pos,
                            shape.orientation(),
                            shape.species(),
                            centre,
                            &other_pos,
                            other_shape.orientation(),
                            other_shape.species(),
                            other_centre,
                            bc,
                        );
                    }
                }
            }
        }
        (energy, overlaps)
    }
}
