//! Spatial hash of interaction centres with a periodic halo.
//!
//! The grid covers the box in fractional coordinates with `n_k >= 3` cells
//! per axis, each at least one interaction range wide, plus an explicit
//! one-cell halo on every face. A halo cell is an alias of the interior
//! cell it mirrors through the periodic boundary: both resolve to the same
//! bucket, which makes periodicity completely transparent to callers of
//! [`NeighbourGrid::neighbours_into`].

use crate::engine::error::PackingError;
use nalgebra::Vector3;

#[derive(Debug, Clone)]
pub struct NeighbourGrid {
    cells_per_axis: [usize; 3],
    dims: [usize; 3],
    cells: Vec<Vec<usize>>,
    alias: Vec<usize>,
    neighbour_offsets: [isize; 27],
}

impl NeighbourGrid {
    /// Builds a grid for a box with the given face heights so that each
    /// cell is at least `cell_edge` wide along every axis.
    pub fn new(heights: &Vector3<f64>, cell_edge: f64) -> Result<Self, PackingError> {
        let cells_per_axis = Self::cell_counts(heights, cell_edge)?;
        Ok(Self::with_cell_counts(cells_per_axis))
    }

    /// Re-dimensions the grid for new box heights. When the cell counts are
    /// unchanged only the buckets are cleared; otherwise halo aliases and
    /// neighbour offsets are rebuilt. All entries are dropped either way.
    pub fn resize(&mut self, heights: &Vector3<f64>, cell_edge: f64) -> Result<(), PackingError> {
        let cells_per_axis = Self::cell_counts(heights, cell_edge)?;
        if cells_per_axis == self.cells_per_axis {
            self.clear();
        } else {
            *self = Self::with_cell_counts(cells_per_axis);
        }
        Ok(())
    }

    fn cell_counts(heights: &Vector3<f64>, cell_edge: f64) -> Result<[usize; 3], PackingError> {
        let mut counts = [0; 3];
        for axis in 0..3 {
            let cells = (heights[axis] / cell_edge).floor() as usize;
            if cells < 3 {
                return Err(PackingError::GridTooCoarse { axis, cells });
            }
            counts[axis] = cells;
        }
        Ok(counts)
    }

    fn with_cell_counts(cells_per_axis: [usize; 3]) -> Self {
        let dims = [
            cells_per_axis[0] + 2,
            cells_per_axis[1] + 2,
            cells_per_axis[2] + 2,
        ];
        let num_cells = dims[0] * dims[1] * dims[2];

        let mut alias = vec![0; num_cells];
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let canonical = [
                        Self::mirror(x, cells_per_axis[0]),
                        Self::mirror(y, cells_per_axis[1]),
                        Self::mirror(z, cells_per_axis[2]),
                    ];
                    alias[Self::flatten(&dims, [x, y, z])] = Self::flatten(&dims, canonical);
                }
            }
        }

        // Offsets are position-independent, so compute them once from a cell
        // in the middle; applied to any interior cell they stay in range.
        let middle = [dims[0] / 2, dims[1] / 2, dims[2] / 2];
        let middle_flat = Self::flatten(&dims, middle) as isize;
        let mut neighbour_offsets = [0; 27];
        let mut offset_idx = 0;
        for dz in -1..=1isize {
            for dy in -1..=1isize {
                for dx in -1..=1isize {
                    let neighbour = [
                        (middle[0] as isize + dx) as usize,
                        (middle[1] as isize + dy) as usize,
                        (middle[2] as isize + dz) as usize,
                    ];
                    neighbour_offsets[offset_idx] = Self::flatten(&dims, neighbour) as isize - middle_flat;
                    offset_idx += 1;
                }
            }
        }

        Self {
            cells_per_axis,
            dims,
            cells: vec![Vec::new(); num_cells],
            alias,
            neighbour_offsets,
        }
    }

    /// The periodic mirror of a halo coordinate; identity for interior ones.
    fn mirror(coord: usize, cells: usize) -> usize {
        if coord == 0 {
            cells
        } else if coord == cells + 1 {
            1
        } else {
            coord
        }
    }

    fn flatten(dims: &[usize; 3], coords: [usize; 3]) -> usize {
        (coords[2] * dims[1] + coords[1]) * dims[0] + coords[0]
    }

    pub fn cells_per_axis(&self) -> [usize; 3] {
        self.cells_per_axis
    }

    /// Flat index of the interior cell containing a fractional position.
    ///
    /// The position is wrapped into `[0, 1)` first; a coordinate that lands
    /// exactly on a cell boundary belongs to the cell starting there, and
    /// the top box edge is clamped into the last cell.
    pub fn cell_index_of(&self, frac: &Vector3<f64>) -> usize {
        let mut coords = [0; 3];
        for axis in 0..3 {
            let wrapped = frac[axis] - frac[axis].floor();
            let cells = self.cells_per_axis[axis];
            let cell = ((wrapped * cells as f64) as usize).min(cells - 1);
            coords[axis] = cell + 1;
        }
        Self::flatten(&self.dims, coords)
    }

    pub fn add(&mut self, id: usize, frac: &Vector3<f64>) {
        let cell = self.cell_index_of(frac);
        self.cells[cell].push(id);
    }

    pub fn remove(&mut self, id: usize, frac: &Vector3<f64>) {
        let cell = self.cell_index_of(frac);
        let bucket = &mut self.cells[cell];
        if let Some(found) = bucket.iter().position(|&entry| entry == id) {
            bucket.swap_remove(found);
        }
    }

    pub fn relocate(&mut self, id: usize, old_frac: &Vector3<f64>, new_frac: &Vector3<f64>) {
        let old_cell = self.cell_index_of(old_frac);
        let new_cell = self.cell_index_of(new_frac);
        if old_cell == new_cell {
            return;
        }
        if let Some(found) = self.cells[old_cell].iter().position(|&entry| entry == id) {
            self.cells[old_cell].swap_remove(found);
        }
        self.cells[new_cell].push(id);
    }

    /// Entries of the cell containing the position (halo-transparent).
    pub fn cell_of(&self, frac: &Vector3<f64>) -> &[usize] {
        &self.cells[self.alias[self.cell_index_of(frac)]]
    }

    /// Appends all entries of the 3x3x3 cell neighbourhood of the position.
    ///
    /// With at least 3 cells per axis the 27 aliased cells are pairwise
    /// distinct, so every entry appears exactly once.
    pub fn neighbours_into(&self, frac: &Vector3<f64>, out: &mut Vec<usize>) {
        let centre = self.cell_index_of(frac) as isize;
        for &offset in &self.neighbour_offsets {
            let cell = self.alias[(centre + offset) as usize];
            out.extend_from_slice(&self.cells[cell]);
        }
    }

    /// Allocating convenience form of [`NeighbourGrid::neighbours_into`].
    pub fn neighbours_of(&self, frac: &Vector3<f64>) -> Vec<usize> {
        let mut out = Vec::new();
        self.neighbours_into(frac, &mut out);
        out
    }

    /// Appends the canonical flat indices of the 3x3x3 neighbourhood.
    pub fn neighbour_cells_into(&self, frac: &Vector3<f64>, out: &mut Vec<usize>) {
        let centre = self.cell_index_of(frac) as isize;
        for &offset in &self.neighbour_offsets {
            out.push(self.alias[(centre + offset) as usize]);
        }
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.cells {
            bucket.clear();
        }
    }
}
