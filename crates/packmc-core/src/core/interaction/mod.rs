//! The shape-model contract consumed by the engine, plus built-in models.
//!
//! The engine is parametric over shape geometry and interactions: everything
//! it needs from a species is gathered behind the narrow [`ShapeModel`]
//! trait. Pair predicates are evaluated between *interaction centres* - a
//! shape may carry several, so that chain-like bodies can reuse the
//! neighbour grid without inflating its cell size. No dispatch beyond a
//! single vtable call happens in the inner loop.

pub mod polysphere;
pub mod sphere;
pub mod spherocylinder;

pub use polysphere::Polysphere;
pub use sphere::{Sphere, SpherePotential};
pub use spherocylinder::Spherocylinder;

use crate::core::geometry::TriclinicBox;
use nalgebra::{UnitQuaternion, Vector3};

/// Geometry and interaction supplied per species to the packing engine.
///
/// Implementations must be cheap to query: `interaction_centres` is called
/// on every move proposal and should return a borrowed slice. The two range
/// accessors bound the interaction: `range_radius` is the largest
/// centre-to-centre distance at which any pair predicate can fire, and
/// `total_range_radius` extends it by twice the largest centre offset so
/// that particle positions can be used for pruning instead of per-centre
/// positions.
pub trait ShapeModel: Send + Sync {
    /// Number of species this model describes; species indices on shapes
    /// must stay below this.
    fn num_species(&self) -> usize {
        1
    }

    /// Volume of one body of the given species.
    fn volume(&self, species: usize) -> f64;

    /// Body-frame offsets of the interaction centres of the given species.
    fn interaction_centres(&self, species: usize) -> &[Vector3<f64>];

    /// The body-frame primary axis of the given species.
    fn primary_axis(&self, _species: usize) -> Vector3<f64> {
        Vector3::z()
    }

    /// Largest centre-to-centre interaction cutoff over all species pairs.
    fn range_radius(&self) -> f64;

    /// `range_radius` extended by the circumsphere contribution of the
    /// interaction centres, so that particle-position distance tests are a
    /// valid pruning criterion.
    fn total_range_radius(&self) -> f64;

    fn has_hard_part(&self) -> bool;

    fn has_soft_part(&self) -> bool;

    /// Whether walled box faces constrain this model. The wall predicate is
    /// geometric, so models that implement it should return `true` here even
    /// when their pair interaction is purely soft.
    fn has_wall_part(&self) -> bool {
        self.has_hard_part()
    }

    /// Hard-core overlap test between two interaction centres.
    ///
    /// `pos1`/`pos2` are absolute centre positions; the implementation is
    /// responsible for applying the minimum-image convention through `bc`.
    #[allow(clippy::too_many_arguments)]
    fn overlap_between(
        &self,
        pos1: &Vector3<f64>,
        orientation1: &UnitQuaternion<f64>,
        species1: usize,
        centre1: usize,
        pos2: &Vector3<f64>,
        orientation2: &UnitQuaternion<f64>,
        species2: usize,
        centre2: usize,
        bc: &TriclinicBox,
    ) -> bool;

    /// Soft interaction energy between two interaction centres; `0` for
    /// models without a soft part.
    #[allow(clippy::too_many_arguments)]
    fn energy_between(
        &self,
        _pos1: &Vector3<f64>,
        _orientation1: &UnitQuaternion<f64>,
        _species1: usize,
        _centre1: usize,
        _pos2: &Vector3<f64>,
        _orientation2: &UnitQuaternion<f64>,
        _species2: usize,
        _centre2: usize,
        _bc: &TriclinicBox,
    ) -> f64 {
        0.0
    }

    /// Overlap test between an interaction centre and a planar wall.
    ///
    /// `wall_normal` is the unit normal pointing towards the inside of the
    /// box; a centre overlaps when the body protrudes through the plane.
    fn overlap_with_wall(
        &self,
        _pos: &Vector3<f64>,
        _orientation: &UnitQuaternion<f64>,
        _species: usize,
        _centre: usize,
        _wall_origin: &Vector3<f64>,
        _wall_normal: &Vector3<f64>,
    ) -> bool {
        false
    }
}
