//! The TOML run-configuration file.

use crate::error::{CliError, Result};
use nalgebra::{Matrix3, Vector3};
use packmc_core::core::geometry::TriclinicBox;
use packmc_core::core::interaction::{
    Polysphere, ShapeModel, Sphere, SpherePotential, Spherocylinder,
};
use packmc_core::core::models::shape::Shape;
use packmc_core::engine::error::PackingError;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PotentialConfig {
    Hard,
    LennardJones { epsilon: f64, sigma: f64 },
    Wca { epsilon: f64, sigma: f64 },
}

impl Default for PotentialConfig {
    fn default() -> Self {
        PotentialConfig::Hard
    }
}

impl PotentialConfig {
    fn build(&self) -> SpherePotential {
        match *self {
            PotentialConfig::Hard => SpherePotential::Hard,
            PotentialConfig::LennardJones { epsilon, sigma } => {
                SpherePotential::LennardJones { epsilon, sigma }
            }
            PotentialConfig::Wca { epsilon, sigma } => SpherePotential::Wca { epsilon, sigma },
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShapeConfig {
    Sphere {
        radius: f64,
        #[serde(default)]
        potential: PotentialConfig,
    },
    Spherocylinder {
        length: f64,
        radius: f64,
    },
    Polysphere {
        count: usize,
        sphere_radius: f64,
        bond_length: f64,
        #[serde(default)]
        potential: PotentialConfig,
    },
}

impl ShapeConfig {
    pub fn build(&self) -> Result<Arc<dyn ShapeModel>> {
        match self {
            ShapeConfig::Sphere { radius, potential } => {
                if *radius <= 0.0 {
                    return Err(CliError::Config("sphere radius must be positive".into()));
                }
                Ok(Arc::new(Sphere::new(*radius, potential.build())))
            }
            ShapeConfig::Spherocylinder { length, radius } => {
                if *length < 0.0 || *radius <= 0.0 {
                    return Err(CliError::Config(
                        "spherocylinder needs a non-negative length and a positive radius".into(),
                    ));
                }
                Ok(Arc::new(Spherocylinder::new(*length, *radius)))
            }
            ShapeConfig::Polysphere {
                count,
                sphere_radius,
                bond_length,
                potential,
            } => {
                if *count == 0 || *sphere_radius <= 0.0 || *bond_length <= 0.0 {
                    return Err(CliError::Config(
                        "polysphere needs a positive sphere count, radius and bond length".into(),
                    ));
                }
                Ok(Arc::new(Polysphere::new(
                    *count,
                    *sphere_radius,
                    *bond_length,
                    potential.build(),
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Thermodynamics {
    pub temperature: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunPhases {
    pub thermalisation_cycles: usize,
    pub averaging_cycles: usize,
    pub averaging_every: usize,
    pub snapshot_every: usize,
    #[serde(default)]
    pub relax_overlaps: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MovesConfig {
    pub translation_step: f64,
    pub rotation_step: f64,
    pub scaling_step: f64,
    pub scaler: String,
    #[serde(default = "default_divisions")]
    pub domain_divisions: [usize; 3],
}

fn default_divisions() -> [usize; 3] {
    [1, 1, 1]
}

/// Fresh-start configuration: the first `particles` sites of a simple cubic
/// lattice in a cubic box.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InitialConfig {
    pub particles: usize,
    pub box_side: f64,
}

impl InitialConfig {
    /// Validates the section and builds the box together with the lattice.
    pub fn build(&self) -> Result<(TriclinicBox, Vec<Shape>)> {
        if self.particles == 0 {
            return Err(CliError::Config(
                "initial particle count must be positive".into(),
            ));
        }
        if !self.box_side.is_finite() || self.box_side <= 0.0 {
            return Err(CliError::Config("initial box side must be positive".into()));
        }
        let matrix = Matrix3::from_diagonal(&Vector3::repeat(self.box_side));
        let simulation_box = TriclinicBox::try_new(matrix).ok_or(PackingError::InvalidBox)?;
        Ok((simulation_box, self.lattice_shapes()))
    }

    fn lattice_shapes(&self) -> Vec<Shape> {
        let per_axis = (self.particles as f64).cbrt().ceil() as usize;
        let spacing = self.box_side / per_axis as f64;
        let mut shapes = Vec::with_capacity(self.particles);
        'fill: for x in 0..per_axis {
            for y in 0..per_axis {
                for z in 0..per_axis {
                    if shapes.len() == self.particles {
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
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub packing: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub seed: u64,
    pub shape: ShapeConfig,
    pub thermodynamics: Thermodynamics,
    pub run: RunPhases,
    pub moves: MovesConfig,
    #[serde(default)]
    pub initial: Option<InitialConfig>,
    pub output: OutputConfig,
    #[serde(default)]
    pub walls: [bool; 3],
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|source| CliError::ConfigParsing {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        seed = 1234

        [shape]
        type = "polysphere"
        count = 2
        sphere_radius = 0.5
        bond_length = 1.0
        potential = { type = "wca", epsilon = 1.0, sigma = 1.0 }

        [thermodynamics]
        temperature = 1.0
        pressure = 7.5

        [run]
        thermalisation_cycles = 5000
        averaging_cycles = 10000
        averaging_every = 100
        snapshot_every = 1000

        [moves]
        translation_step = 0.5
        rotation_step = 0.5
        scaling_step = 10.0
        scaler = "delta V"

        [initial]
        particles = 50
        box_side = 7.937

        [output]
        packing = "dumbbells.ramsnap"
    "#;

    #[test]
    fn sample_config_parses() {
        let config: RunConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.seed, 1234);
        assert_eq!(config.moves.domain_divisions, [1, 1, 1]);
        assert!(!config.run.relax_overlaps);
        assert!(matches!(config.shape, ShapeConfig::Polysphere { count: 2, .. }));
        config.shape.build().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let broken = SAMPLE.replace("seed = 1234", "seed = 1234\nunknown_knob = true");
        let result: std::result::Result<RunConfig, _> = toml::from_str(&broken);
        assert!(result.is_err());
    }

    #[test]
    fn lattice_initializer_yields_the_requested_count() {
        let initial = InitialConfig { particles: 50, box_side: 8.0 };
        let (simulation_box, shapes) = initial.build().unwrap();
        assert_eq!(shapes.len(), 50);
        assert_eq!(simulation_box.volume(), 512.0);
        // All positions inside the box.
        assert!(shapes.iter().all(|shape| {
            (0..3).all(|axis| {
                let coord = shape.position()[axis];
                coord > 0.0 && coord < 8.0
            })
        }));
    }

    #[test]
    fn degenerate_initial_boxes_are_rejected_without_panicking() {
        let zero = InitialConfig { particles: 10, box_side: 0.0 };
        assert!(matches!(zero.build(), Err(CliError::Config(_))));
        let negative = InitialConfig { particles: 10, box_side: -3.0 };
        assert!(matches!(negative.build(), Err(CliError::Config(_))));
        let nan = InitialConfig { particles: 10, box_side: f64::NAN };
        assert!(matches!(nan.build(), Err(CliError::Config(_))));
        let empty = InitialConfig { particles: 0, box_side: 8.0 };
        assert!(matches!(empty.build(), Err(CliError::Config(_))));
    }

    #[test]
    fn invalid_shape_parameters_are_rejected_at_build() {
        let shape = ShapeConfig::Sphere { radius: -1.0, potential: PotentialConfig::Hard };
        assert!(matches!(shape.build(), Err(CliError::Config(_))));
    }
}
