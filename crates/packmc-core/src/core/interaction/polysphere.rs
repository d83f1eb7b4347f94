use super::{ShapeModel, SpherePotential};
use crate::core::geometry::TriclinicBox;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::PI;

/// A rigid linear chain of equal spheres (a k-mer), one interaction centre
/// per sphere, spaced `bond_length` apart along the body-frame z axis and
/// centred on the body origin.
#[derive(Debug, Clone)]
pub struct Polysphere {
    sphere_radius: f64,
    bond_length: f64,
    potential: SpherePotential,
    centres: Vec<Vector3<f64>>,
}

impl Polysphere {
    pub fn new(count: usize, sphere_radius: f64, bond_length: f64, potential: SpherePotential) -> Self {
        assert!(count >= 1, "a polysphere needs at least one sphere");
        assert!(sphere_radius > 0.0, "sphere radius must be positive");
        assert!(bond_length > 0.0, "bond length must be positive");
        let centres = (0..count)
            .map(|i| Vector3::new(0.0, 0.0, (i as f64 - (count as f64 - 1.0) / 2.0) * bond_length))
            .collect();
        Self {
            sphere_radius,
            bond_length,
            potential,
            centres,
        }
    }

    /// A tangent or overlapping dumbbell of two spheres.
    pub fn dumbbell(sphere_radius: f64, bond_length: f64, potential: SpherePotential) -> Self {
        Self::new(2, sphere_radius, bond_length, potential)
    }

    fn max_centre_offset(&self) -> f64 {
        (self.centres.len() as f64 - 1.0) / 2.0 * self.bond_length
    }
}

impl ShapeModel for Polysphere {
    fn volume(&self, _species: usize) -> f64 {
        // Union of the chain: full spheres minus the lens shared by each
        // consecutive pair (spheres further apart than one bond are assumed
        // disjoint, which holds for bond_length >= radius).
        let sphere = 4.0 / 3.0 * PI * self.sphere_radius.powi(3);
        let count = self.centres.len() as f64;
        count * sphere - (count - 1.0) * lens_volume(self.sphere_radius, self.bond_length)
    }

    fn interaction_centres(&self, _species: usize) -> &[Vector3<f64>] {
        &self.centres
    }

    fn range_radius(&self) -> f64 {
        self.potential.range_radius(self.sphere_radius)
    }

    fn total_range_radius(&self) -> f64 {
        self.range_radius() + 2.0 * self.max_centre_offset()
    }

    fn has_hard_part(&self) -> bool {
        self.potential.is_hard()
    }

    fn has_soft_part(&self) -> bool {
        !self.potential.is_hard()
    }

    // The wall test is purely geometric, so it applies to soft chains too.
    fn has_wall_part(&self) -> bool {
        true
    }

    fn overlap_between(
        &self,
        pos1: &Vector3<f64>,
        _orientation1: &UnitQuaternion<f64>,
        _species1: usize,
        _centre1: usize,
        pos2: &Vector3<f64>,
        _orientation2: &UnitQuaternion<f64>,
        _species2: usize,
        _centre2: usize,
        bc: &TriclinicBox,
    ) -> bool {
        if !self.potential.is_hard() {
            return false;
        }
        let diameter = 2.0 * self.sphere_radius;
        bc.closest_image_vector(pos1, pos2).norm_squared() < diameter * diameter
    }

    fn energy_between(
        &self,
        pos1: &Vector3<f64>,
        _orientation1: &UnitQuaternion<f64>,
        _species1: usize,
        _centre1: usize,
        pos2: &Vector3<f64>,
        _orientation2: &UnitQuaternion<f64>,
        _species2: usize,
        _centre2: usize,
        bc: &TriclinicBox,
    ) -> f64 {
        self.potential
            .energy(bc.closest_image_vector(pos1, pos2).norm())
    }

    fn overlap_with_wall(
        &self,
        pos: &Vector3<f64>,
        _orientation: &UnitQuaternion<f64>,
        _species: usize,
        _centre: usize,
        wall_origin: &Vector3<f64>,
        wall_normal: &Vector3<f64>,
    ) -> bool {
        (pos - wall_origin).dot(wall_normal) < self.sphere_radius
    }
}

/// Volume of the lens shared by two equal spheres of radius `r` whose
/// centres are `d` apart; zero when they do not intersect.
fn lens_volume(r: f64, d: f64) -> f64 {
    if d >= 2.0 * r {
        return 0.0;
    }
    PI * (2.0 * r - d).powi(2) * (d * d + 4.0 * d * r) / (12.0 * d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn centres_are_symmetric_about_the_origin() {
        let model = Polysphere::new(3, 0.5, 1.0, SpherePotential::Hard);
        let centres = model.interaction_centres(0);
        assert_eq!(centres.len(), 3);
        assert_relative_eq!(centres[0][2], -1.0);
        assert_relative_eq!(centres[1][2], 0.0);
        assert_relative_eq!(centres[2][2], 1.0);
    }

    #[test]
    fn tangent_dumbbell_volume_is_two_spheres() {
        let model = Polysphere::dumbbell(0.5, 1.0, SpherePotential::Hard);
        assert_relative_eq!(model.volume(0), PI / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn overlapping_dumbbell_volume_subtracts_the_lens() {
        let model = Polysphere::dumbbell(0.5, 0.8, SpherePotential::Hard);
        assert!(model.volume(0) < PI / 3.0);
        assert!(model.volume(0) > 4.0 / 3.0 * PI * 0.125);
    }

    #[test]
    fn total_range_extends_over_the_chain_ends() {
        let model = Polysphere::dumbbell(0.5, 1.0, SpherePotential::Hard);
        assert_relative_eq!(model.range_radius(), 1.0);
        assert_relative_eq!(model.total_range_radius(), 2.0);
    }

    #[test]
    fn wca_dumbbell_has_no_hard_part_but_keeps_the_wall_part() {
        let model = Polysphere::dumbbell(0.5, 1.0, SpherePotential::Wca { epsilon: 1.0, sigma: 1.0 });
        assert!(!model.has_hard_part());
        assert!(model.has_soft_part());
        assert!(model.has_wall_part());
        assert!(model.total_range_radius() > model.range_radius());
    }
}
