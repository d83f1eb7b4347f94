//! Triclinic box geometry and periodic boundary conditions.
//!
//! The box is a fully general parallelepiped described by a 3x3 matrix whose
//! columns are the three edge vectors. Periodic boundary conditions operate
//! on fractional coordinates; the minimum-image correction maps a vector to
//! its representative with fractional coordinates in `[-1/2, 1/2)`.

use nalgebra::{Matrix3, Vector3};

/// A fully general parallelepiped simulation box.
///
/// Invariant: the determinant of the edge-vector matrix (and thus the box
/// volume) is strictly positive. All scaling and shearing is performed by
/// left-multiplying the matrix by a transform, see [`TriclinicBox::scaled`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriclinicBox {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl TriclinicBox {
    /// Creates a box from its edge-vector matrix (edge vectors in columns),
    /// returning `None` when the determinant is not strictly positive.
    pub fn try_new(matrix: Matrix3<f64>) -> Option<Self> {
        if matrix.determinant() > 0.0 {
            let inverse = matrix.try_inverse()?;
            Some(Self { matrix, inverse })
        } else {
            None
        }
    }

    /// Creates a box from its edge-vector matrix (edge vectors in columns).
    ///
    /// # Panics
    ///
    /// Panics if the determinant is not strictly positive. Use
    /// [`TriclinicBox::try_new`] when the matrix comes from external input.
    pub fn new(matrix: Matrix3<f64>) -> Self {
        Self::try_new(matrix).expect("box matrix must have a positive determinant")
    }

    /// Creates an axis-aligned orthorhombic box with the given side lengths.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)))
    }

    /// Creates a cubic box with the given side length.
    pub fn cubic(side: f64) -> Self {
        Self::orthorhombic(side, side, side)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub(crate) fn inverse_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// Box volume, `det B`; strictly positive by the class invariant.
    pub fn volume(&self) -> f64 {
        self.matrix.determinant()
    }

    /// Perpendicular distances between the three pairs of opposite faces.
    ///
    /// `heights()[k]` is the volume divided by the area of the face spanned
    /// by the other two edge vectors.
    pub fn heights(&self) -> Vector3<f64> {
        let volume = self.volume();
        let e0 = self.matrix.column(0);
        let e1 = self.matrix.column(1);
        let e2 = self.matrix.column(2);
        Vector3::new(
            volume / e1.cross(&e2).norm(),
            volume / e2.cross(&e0).norm(),
            volume / e0.cross(&e1).norm(),
        )
    }

    /// Converts an absolute position to fractional (box) coordinates.
    pub fn relative(&self, pos: &Vector3<f64>) -> Vector3<f64> {
        self.inverse * pos
    }

    /// Converts fractional (box) coordinates to an absolute position.
    pub fn absolute(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * frac
    }

    /// Maps a position into the canonical cell (fractional in `[0, 1)`).
    pub fn wrap(&self, pos: &Vector3<f64>) -> Vector3<f64> {
        let frac = self.relative(pos);
        self.absolute(&(frac - frac.map(f64::floor)))
    }

    /// The lattice translation bringing `pos` to fractional `[-1/2, 1/2)`.
    pub fn image_correction(&self, pos: &Vector3<f64>) -> Vector3<f64> {
        let frac = self.relative(pos);
        self.absolute(&frac.map(|c| -c.round()))
    }

    /// Minimum-image separation vector from `p` to `q`.
    pub fn closest_image_vector(&self, p: &Vector3<f64>, q: &Vector3<f64>) -> Vector3<f64> {
        let diff = q - p;
        diff + self.image_correction(&diff)
    }

    /// The box obtained by left-multiplying the matrix by `transform`.
    ///
    /// Returns `None` when the transformed matrix would have a non-positive
    /// determinant; face-height floors are enforced by the packing, not here.
    pub fn scaled(&self, transform: &Matrix3<f64>) -> Option<Self> {
        Self::try_new(transform * self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sheared_box() -> TriclinicBox {
        TriclinicBox::new(Matrix3::new(
            4.0, 1.0, 0.0, //
            0.0, 5.0, 0.5, //
            0.0, 0.0, 6.0,
        ))
    }

    #[test]
    fn volume_of_cubic_box_is_side_cubed() {
        let cell = TriclinicBox::cubic(3.0);
        assert_relative_eq!(cell.volume(), 27.0);
    }

    #[test]
    fn heights_of_orthorhombic_box_are_side_lengths() {
        let cell = TriclinicBox::orthorhombic(2.0, 3.0, 4.0);
        assert_relative_eq!(cell.heights(), Vector3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn heights_of_sheared_box_shrink_below_side_lengths() {
        let cell = sheared_box();
        let heights = cell.heights();
        assert!(heights[0] < 4.0 + 1e-12);
        assert!(heights[1] < 5.0 + 1e-12);
        // Shear in the xy plane leaves the x-edge orthogonal to face yz.
        assert_relative_eq!(cell.volume(), 120.0, epsilon = 1e-10);
    }

    #[test]
    fn relative_and_absolute_are_inverse() {
        let cell = sheared_box();
        let pos = Vector3::new(1.3, -2.7, 8.1);
        let roundtrip = cell.absolute(&cell.relative(&pos));
        assert_relative_eq!(roundtrip, pos, epsilon = 1e-12);
    }

    #[test]
    fn wrap_maps_into_canonical_cell() {
        let cell = TriclinicBox::orthorhombic(2.0, 3.0, 4.0);
        let wrapped = cell.wrap(&Vector3::new(2.5, -0.5, 9.0));
        assert_relative_eq!(wrapped, Vector3::new(0.5, 2.5, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn wrap_is_identity_inside_the_cell() {
        let cell = sheared_box();
        let pos = cell.absolute(&Vector3::new(0.25, 0.5, 0.75));
        assert_relative_eq!(cell.wrap(&pos), pos, epsilon = 1e-12);
    }

    #[test]
    fn closest_image_crosses_the_periodic_boundary() {
        let cell = TriclinicBox::cubic(10.0);
        let p = Vector3::new(0.5, 5.0, 5.0);
        let q = Vector3::new(9.5, 5.0, 5.0);
        assert_relative_eq!(
            cell.closest_image_vector(&p, &q),
            Vector3::new(-1.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn image_correction_yields_half_open_interval() {
        let cell = TriclinicBox::cubic(1.0);
        // Fractional 0.5 rounds away from zero, landing on -0.5 which is
        // inside [-1/2, 1/2).
        let corrected = Vector3::new(0.5, 0.0, 0.0) + cell.image_correction(&Vector3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(corrected[0], -0.5);
    }

    #[test]
    fn try_new_rejects_non_positive_determinants() {
        let flipped = Matrix3::from_diagonal(&Vector3::new(-2.0, 2.0, 2.0));
        assert!(TriclinicBox::try_new(flipped).is_none());
        let singular = Matrix3::from_diagonal(&Vector3::new(2.0, 0.0, 2.0));
        assert!(TriclinicBox::try_new(singular).is_none());
        let nan = Matrix3::from_diagonal(&Vector3::new(f64::NAN, 2.0, 2.0));
        assert!(TriclinicBox::try_new(nan).is_none());
    }

    #[test]
    fn scaled_rejects_inverting_transforms() {
        let cell = TriclinicBox::cubic(2.0);
        let flip = Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0));
        assert!(cell.scaled(&flip).is_none());
    }

    #[test]
    fn scaled_applies_left_multiplication() {
        let cell = sheared_box();
        let transform = Matrix3::from_diagonal(&Vector3::new(1.1, 0.9, 1.0));
        let scaled = cell.scaled(&transform).unwrap();
        assert_relative_eq!(scaled.matrix(), &(transform * cell.matrix()), epsilon = 1e-12);
        assert_relative_eq!(scaled.volume(), cell.volume() * 1.1 * 0.9, epsilon = 1e-9);
    }
}
