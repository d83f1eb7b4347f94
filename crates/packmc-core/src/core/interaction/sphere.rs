use super::ShapeModel;
use crate::core::geometry::TriclinicBox;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::PI;

/// Cutoff of the truncated Lennard-Jones potential, in units of sigma.
const LENNARD_JONES_CUTOFF_FACTOR: f64 = 3.0;

/// Pairwise interaction carried by sphere-based models.
///
/// `Hard` is a pure excluded-volume interaction; the two soft variants have
/// no hard core, so overlapping configurations are legal and penalized only
/// energetically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpherePotential {
    Hard,
    LennardJones { epsilon: f64, sigma: f64 },
    /// Purely repulsive Lennard-Jones cut and shifted at its minimum
    /// (Weeks-Chandler-Andersen).
    Wca { epsilon: f64, sigma: f64 },
}

impl SpherePotential {
    pub(crate) fn is_hard(&self) -> bool {
        matches!(self, SpherePotential::Hard)
    }

    /// Centre-to-centre cutoff for spheres of the given radius.
    pub(crate) fn range_radius(&self, radius: f64) -> f64 {
        match *self {
            SpherePotential::Hard => 2.0 * radius,
            SpherePotential::LennardJones { sigma, .. } => LENNARD_JONES_CUTOFF_FACTOR * sigma,
            SpherePotential::Wca { sigma, .. } => wca_cutoff(sigma),
        }
    }

    pub(crate) fn energy(&self, dist: f64) -> f64 {
        match *self {
            SpherePotential::Hard => 0.0,
            SpherePotential::LennardJones { epsilon, sigma } => {
                if dist >= LENNARD_JONES_CUTOFF_FACTOR * sigma {
                    0.0
                } else {
                    lennard_jones(dist, epsilon, sigma)
                }
            }
            SpherePotential::Wca { epsilon, sigma } => {
                if dist >= wca_cutoff(sigma) {
                    0.0
                } else {
                    lennard_jones(dist, epsilon, sigma) + epsilon
                }
            }
        }
    }
}

fn wca_cutoff(sigma: f64) -> f64 {
    2f64.powf(1.0 / 6.0) * sigma
}

#[inline]
fn lennard_jones(dist: f64, epsilon: f64, sigma: f64) -> f64 {
    let rho6 = (sigma / dist).powi(6);
    4.0 * epsilon * (rho6 * rho6 - rho6)
}

/// A single sphere with one interaction centre at the body origin.
#[derive(Debug, Clone)]
pub struct Sphere {
    radius: f64,
    potential: SpherePotential,
    centres: [Vector3<f64>; 1],
}

impl Sphere {
    pub fn new(radius: f64, potential: SpherePotential) -> Self {
        assert!(radius > 0.0, "sphere radius must be positive");
        Self {
            radius,
            potential,
            centres: [Vector3::zeros()],
        }
    }

    pub fn hard(radius: f64) -> Self {
        Self::new(radius, SpherePotential::Hard)
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

impl ShapeModel for Sphere {
    fn volume(&self, _species: usize) -> f64 {
        4.0 / 3.0 * PI * self.radius.powi(3)
    }

    fn interaction_centres(&self, _species: usize) -> &[Vector3<f64>] {
        &self.centres
    }

    fn range_radius(&self) -> f64 {
        self.potential.range_radius(self.radius)
    }

    fn total_range_radius(&self) -> f64 {
        self.range_radius()
    }

    fn has_hard_part(&self) -> bool {
        self.potential.is_hard()
    }

    fn has_soft_part(&self) -> bool {
        !self.potential.is_hard()
    }

    // The wall test is purely geometric, so it applies to soft spheres too.
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
        let diameter = 2.0 * self.radius;
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
        (pos - wall_origin).dot(wall_normal) < self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bc() -> TriclinicBox {
        TriclinicBox::cubic(100.0)
    }

    fn pair_energy(model: &Sphere, dist: f64) -> f64 {
        let identity = UnitQuaternion::identity();
        model.energy_between(
            &Vector3::zeros(),
            &identity,
            0,
            0,
            &Vector3::new(dist, 0.0, 0.0),
            &identity,
            0,
            0,
            &bc(),
        )
    }

    fn pair_overlap(model: &Sphere, dist: f64) -> bool {
        let identity = UnitQuaternion::identity();
        model.overlap_between(
            &Vector3::zeros(),
            &identity,
            0,
            0,
            &Vector3::new(dist, 0.0, 0.0),
            &identity,
            0,
            0,
            &bc(),
        )
    }

    #[test]
    fn hard_spheres_overlap_below_the_diameter() {
        let model = Sphere::hard(0.5);
        assert!(pair_overlap(&model, 0.99));
        assert!(!pair_overlap(&model, 1.01));
    }

    #[test]
    fn hard_spheres_overlap_through_the_periodic_boundary() {
        let model = Sphere::hard(0.5);
        let identity = UnitQuaternion::identity();
        let overlapping = model.overlap_between(
            &Vector3::new(0.2, 50.0, 50.0),
            &identity,
            0,
            0,
            &Vector3::new(99.5, 50.0, 50.0),
            &identity,
            0,
            0,
            &bc(),
        );
        assert!(overlapping);
    }

    #[test]
    fn lennard_jones_minimum_sits_at_the_expected_distance() {
        let model = Sphere::new(0.5, SpherePotential::LennardJones { epsilon: 2.0, sigma: 1.0 });
        let minimum = 2f64.powf(1.0 / 6.0);
        assert_relative_eq!(pair_energy(&model, minimum), -2.0, epsilon = 1e-12);
        assert!(pair_energy(&model, 0.9) > pair_energy(&model, minimum));
    }

    #[test]
    fn lennard_jones_vanishes_beyond_the_cutoff() {
        let model = Sphere::new(0.5, SpherePotential::LennardJones { epsilon: 1.0, sigma: 1.0 });
        assert_eq!(pair_energy(&model, 3.0), 0.0);
        assert!(pair_energy(&model, 2.99).abs() > 0.0);
    }

    #[test]
    fn wca_is_purely_repulsive_and_continuous_at_the_cutoff() {
        let model = Sphere::new(0.5, SpherePotential::Wca { epsilon: 1.0, sigma: 1.0 });
        let cutoff = 2f64.powf(1.0 / 6.0);
        assert_relative_eq!(pair_energy(&model, cutoff - 1e-9), 0.0, epsilon = 1e-6);
        assert_eq!(pair_energy(&model, cutoff + 1e-9), 0.0);
        assert!(pair_energy(&model, 0.95) > 0.0);
    }

    #[test]
    fn soft_spheres_never_report_hard_overlaps() {
        let model = Sphere::new(0.5, SpherePotential::Wca { epsilon: 1.0, sigma: 1.0 });
        assert!(!pair_overlap(&model, 0.1));
        assert!(!model.has_hard_part());
        assert!(model.has_soft_part());
    }

    #[test]
    fn soft_spheres_keep_the_wall_constraint() {
        let model = Sphere::new(0.5, SpherePotential::LennardJones { epsilon: 1.0, sigma: 1.0 });
        assert!(model.has_wall_part());
        let identity = UnitQuaternion::identity();
        let protruding = model.overlap_with_wall(
            &Vector3::new(0.4, 1.0, 1.0),
            &identity,
            0,
            0,
            &Vector3::zeros(),
            &Vector3::x(),
        );
        assert!(protruding);
    }

    #[test]
    fn wall_overlap_uses_the_signed_distance() {
        let model = Sphere::hard(0.5);
        let origin = Vector3::zeros();
        let normal = Vector3::x();
        let identity = UnitQuaternion::identity();
        assert!(model.overlap_with_wall(&Vector3::new(0.4, 1.0, 1.0), &identity, 0, 0, &origin, &normal));
        assert!(!model.overlap_with_wall(&Vector3::new(0.6, 1.0, 1.0), &identity, 0, 0, &origin, &normal));
    }

    #[test]
    fn sphere_volume_matches_the_closed_form() {
        let model = Sphere::hard(0.5);
        assert_relative_eq!(model.volume(0), PI / 6.0, epsilon = 1e-12);
    }
}
