use crate::core::geometry::TriclinicBox;
use nalgebra::{UnitQuaternion, Vector3};

/// A single rigid body instance in a packing.
///
/// The position is stored in absolute coordinates and is kept inside the
/// canonical cell (fractional coordinates in `[0, 1)`); the orientation is a
/// proper rotation stored as a unit quaternion. The species index selects
/// the entry of the packing's shape model used for geometry and interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    position: Vector3<f64>,
    orientation: UnitQuaternion<f64>,
    species: usize,
}

impl Shape {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>, species: usize) -> Self {
        Self {
            position,
            orientation,
            species,
        }
    }

    /// An axis-aligned shape of species 0 at the given position.
    pub fn at(position: Vector3<f64>) -> Self {
        Self::new(position, UnitQuaternion::identity(), 0)
    }

    pub fn position(&self) -> &Vector3<f64> {
        &self.position
    }

    pub fn orientation(&self) -> &UnitQuaternion<f64> {
        &self.orientation
    }

    pub fn species(&self) -> usize {
        self.species
    }

    /// The shape translated by `delta` and wrapped back into the box.
    pub fn translated(&self, delta: &Vector3<f64>, bc: &TriclinicBox) -> Self {
        Self {
            position: bc.wrap(&(self.position + delta)),
            orientation: self.orientation,
            species: self.species,
        }
    }

    /// The shape rotated by `rotation` about its own position.
    pub fn rotated(&self, rotation: &UnitQuaternion<f64>) -> Self {
        Self {
            position: self.position,
            orientation: rotation * self.orientation,
            species: self.species,
        }
    }

    /// The absolute position of a body-frame point of this shape.
    pub fn body_point(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        self.position + self.orientation.transform_vector(offset)
    }

    pub(crate) fn set_position(&mut self, position: Vector3<f64>) {
        self.position = position;
    }
}
