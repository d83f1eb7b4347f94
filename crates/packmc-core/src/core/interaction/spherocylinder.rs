use super::ShapeModel;
use crate::core::geometry::TriclinicBox;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::PI;

/// A hard spherocylinder: a cylinder of the given length capped by two
/// hemispheres, aligned with the body-frame z axis.
#[derive(Debug, Clone)]
pub struct Spherocylinder {
    length: f64,
    radius: f64,
    centres: [Vector3<f64>; 1],
}

impl Spherocylinder {
    pub fn new(length: f64, radius: f64) -> Self {
        assert!(length >= 0.0, "spherocylinder length must be non-negative");
        assert!(radius > 0.0, "spherocylinder radius must be positive");
        Self {
            length,
            radius,
            centres: [Vector3::zeros()],
        }
    }

    fn half_axis(&self, orientation: &UnitQuaternion<f64>) -> Vector3<f64> {
        orientation.transform_vector(&(Vector3::z() * (self.length / 2.0)))
    }
}

impl ShapeModel for Spherocylinder {
    fn volume(&self, _species: usize) -> f64 {
        PI * self.radius * self.radius * self.length + 4.0 / 3.0 * PI * self.radius.powi(3)
    }

    fn interaction_centres(&self, _species: usize) -> &[Vector3<f64>] {
        &self.centres
    }

    fn range_radius(&self) -> f64 {
        self.length + 2.0 * self.radius
    }

    fn total_range_radius(&self) -> f64 {
        self.range_radius()
    }

    fn has_hard_part(&self) -> bool {
        true
    }

    fn has_soft_part(&self) -> bool {
        false
    }

    fn has_wall_part(&self) -> bool {
        true
    }

    fn overlap_between(
        &self,
        pos1: &Vector3<f64>,
        orientation1: &UnitQuaternion<f64>,
        _species1: usize,
        _centre1: usize,
        pos2: &Vector3<f64>,
        orientation2: &UnitQuaternion<f64>,
        _species2: usize,
        _centre2: usize,
        bc: &TriclinicBox,
    ) -> bool {
        let separation = bc.closest_image_vector(pos1, pos2);
        let diameter = 2.0 * self.radius;
        let distance2 = segment_distance_squared(
            &separation,
            &self.half_axis(orientation1),
            &self.half_axis(orientation2),
        );
        distance2 < diameter * diameter
    }

    fn overlap_with_wall(
        &self,
        pos: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        _species: usize,
        _centre: usize,
        wall_origin: &Vector3<f64>,
        wall_normal: &Vector3<f64>,
    ) -> bool {
        let half_axis = self.half_axis(orientation);
        let cap1 = (pos + half_axis - wall_origin).dot(wall_normal);
        let cap2 = (pos - half_axis - wall_origin).dot(wall_normal);
        cap1.min(cap2) < self.radius
    }
}

/// Squared minimum distance between segments `[-u, u]` (at the origin) and
/// `[s - v, s + v]`.
fn segment_distance_squared(s: &Vector3<f64>, u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    // Closest points parametrized as t1*u and s + t2*v with t in [-1, 1];
    // clamp the unconstrained stationary point, then re-optimize each
    // parameter against the other (Ericson, Real-Time Collision Detection).
    let uu = u.dot(u);
    let vv = v.dot(v);
    let uv = u.dot(v);
    let su = s.dot(u);
    let sv = s.dot(v);

    let denom = uu * vv - uv * uv;
    let mut t1 = if denom.abs() > 1e-12 * uu * vv {
        ((su * vv - sv * uv) / denom).clamp(-1.0, 1.0)
    } else if uu > 0.0 {
        // Nearly parallel axes; start from the projection of the midpoint.
        (su / uu).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let mut t2 = if vv > 0.0 {
        ((t1 * uv - sv) / vv).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    if uu > 0.0 {
        t1 = ((su + t2 * uv) / uu).clamp(-1.0, 1.0);
    }

    (s + v * t2 - u * t1).norm_squared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn overlap(model: &Spherocylinder, pos2: Vector3<f64>, orientation2: UnitQuaternion<f64>) -> bool {
        model.overlap_between(
            &Vector3::zeros(),
            &UnitQuaternion::identity(),
            0,
            0,
            &pos2,
            &orientation2,
            0,
            0,
            &TriclinicBox::cubic(100.0),
        )
    }

    #[test]
    fn parallel_side_by_side_overlap_below_the_diameter() {
        let model = Spherocylinder::new(1.0, 0.25);
        assert!(overlap(&model, Vector3::new(0.49, 0.0, 0.0), UnitQuaternion::identity()));
        assert!(!overlap(&model, Vector3::new(0.51, 0.0, 0.0), UnitQuaternion::identity()));
    }

    #[test]
    fn end_to_end_overlap_accounts_for_the_caps() {
        let model = Spherocylinder::new(1.0, 0.25);
        assert!(overlap(&model, Vector3::new(0.0, 0.0, 1.49), UnitQuaternion::identity()));
        assert!(!overlap(&model, Vector3::new(0.0, 0.0, 1.51), UnitQuaternion::identity()));
    }

    #[test]
    fn crossed_spherocylinders_see_the_axis_gap() {
        let model = Spherocylinder::new(1.0, 0.25);
        let crossed = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        assert!(overlap(&model, Vector3::new(0.0, 0.49, 0.0), crossed));
        assert!(!overlap(&model, Vector3::new(0.0, 0.51, 0.0), crossed));
    }

    #[test]
    fn segment_distance_handles_degenerate_points() {
        let d2 = segment_distance_squared(
            &Vector3::new(3.0, 4.0, 0.0),
            &Vector3::zeros(),
            &Vector3::zeros(),
        );
        assert_relative_eq!(d2, 25.0, epsilon = 1e-12);
    }

    #[test]
    fn volume_matches_cylinder_plus_sphere() {
        let model = Spherocylinder::new(0.5, 0.2);
        let expected = PI * 0.04 * 0.5 + 4.0 / 3.0 * PI * 0.008;
        assert_relative_eq!(model.volume(0), expected, epsilon = 1e-12);
    }
}
