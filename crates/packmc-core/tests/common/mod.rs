use nalgebra::Vector3;
use packmc_core::core::geometry::TriclinicBox;
use packmc_core::core::interaction::ShapeModel;
use packmc_core::core::models::shape::Shape;
use packmc_core::engine::packing::Packing;
use std::sync::Arc;

/// The first `count` sites of a simple cubic lattice filling a cubic box.
pub fn cubic_lattice(count: usize, side: f64) -> Vec<Shape> {
    let per_axis = (count as f64).cbrt().ceil() as usize;
    let spacing = side / per_axis as f64;
    let mut shapes = Vec::with_capacity(count);
    'fill: for x in 0..per_axis {
        for y in 0..per_axis {
            for z in 0..per_axis {
                if shapes.len() == count {
                    break 'fill;
                }
                shapes.push(Shape::at(Vector3::new(
                    (x as f64 + 0.5) * spacing,
                    (y as f64 + 0.5) * spacing,
                    (z as f64 + 0.5) * spacing,
                )));
            }
        }
    }
    shapes
}

pub fn lattice_packing(model: Arc<dyn ShapeModel>, count: usize, volume: f64) -> Packing {
    let side = volume.cbrt();
    Packing::new(TriclinicBox::cubic(side), cubic_lattice(count, side), model, [false; 3]).unwrap()
}
