//! Triclinic box scalers: proposal distributions for volume and shape moves.
//!
//! A scaler is a pure function of the current box, a step size and an RNG;
//! it returns the 3x3 transform to left-multiply the box matrix with. The
//! accompanying log-Jacobian enters the Metropolis weight of the box move.

use crate::core::geometry::TriclinicBox;
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScalerError {
    #[error("malformed scaling type '{0}'; available: 'delta V', '[independent] linear <dir>', '[independent] log <dir>', '[independent] delta triclinic'")]
    UnknownScaling(String),

    #[error("malformed scaling direction '{spec}': {reason}")]
    MalformedDirection { spec: String, reason: String },
}

/// Proposal distribution for box transforms.
pub trait TriclinicBoxScaler: Send + Sync {
    /// Samples a box transform for the current box and step size.
    fn sample_transform(&self, current: &TriclinicBox, step: f64, rng: &mut StdRng) -> Matrix3<f64>;

    /// Logarithm of the configurational Jacobian of the proposal, entering
    /// the Metropolis exponent of the box move.
    fn log_jacobian(&self, transform: &Matrix3<f64>, num_particles: usize) -> f64 {
        num_particles as f64 * transform.determinant().ln()
    }
}

/// How an axis participates in an anisotropic scaling move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisHandling {
    Frozen,
    Group(u8),
}

/// A direction mask assigning each axis to a scaling-factor group.
///
/// Grammar: the tokens `x`, `y`, `z` each appear exactly once; adjacent
/// tokens (optionally separated by `|`) draw independent factors,
/// parentheses couple the factors of the axes inside, and brackets freeze
/// them. Examples: `xyz`, `x|yz`, `(xy)z`, `[x]yz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingDirection {
    axes: [AxisHandling; 3],
    num_groups: u8,
}

impl ScalingDirection {
    /// All three axes coupled into a single factor.
    pub fn isotropic() -> Self {
        Self {
            axes: [AxisHandling::Group(0); 3],
            num_groups: 1,
        }
    }

    /// Three independently drawn factors.
    pub fn independent() -> Self {
        Self {
            axes: [
                AxisHandling::Group(0),
                AxisHandling::Group(1),
                AxisHandling::Group(2),
            ],
            num_groups: 3,
        }
    }

    /// One independent axis, the other two coupled.
    pub fn axis_against_coupled_rest(axis: usize) -> Self {
        let mut axes = [AxisHandling::Group(1); 3];
        axes[axis] = AxisHandling::Group(0);
        Self { axes, num_groups: 2 }
    }

    pub fn parse(spec: &str) -> Result<Self, ScalerError> {
        let malformed = |reason: &str| ScalerError::MalformedDirection {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        #[derive(PartialEq)]
        enum Mode {
            Independent,
            Coupled,
            Frozen,
        }

        let mut axes = [None; 3];
        let mut num_groups: u8 = 0;
        let mut mode = Mode::Independent;
        // In coupled mode every axis until the closing paren shares the
        // group opened by the paren.
        let mut coupled_group = 0;
        let mut group_members = 0;

        for token in spec.chars() {
            match token {
                'x' | 'y' | 'z' => {
                    let axis = token as usize - 'x' as usize;
                    if axes[axis].is_some() {
                        return Err(malformed(&format!("duplicated axis '{token}'")));
                    }
                    group_members += 1;
                    axes[axis] = Some(match mode {
                        Mode::Frozen => AxisHandling::Frozen,
                        Mode::Coupled => AxisHandling::Group(coupled_group),
                        Mode::Independent => {
                            num_groups += 1;
                            AxisHandling::Group(num_groups - 1)
                        }
                    });
                }
                '(' => {
                    if mode != Mode::Independent {
                        return Err(malformed("nested '(' or '(' inside '[...]'"));
                    }
                    coupled_group = num_groups;
                    num_groups += 1;
                    group_members = 0;
                    mode = Mode::Coupled;
                }
                ')' => {
                    if mode != Mode::Coupled {
                        return Err(malformed("unmatched ')'"));
                    }
                    if group_members == 0 {
                        return Err(malformed("empty '(...)' group"));
                    }
                    mode = Mode::Independent;
                }
                '[' => {
                    if mode != Mode::Independent {
                        return Err(malformed("nested '[' or '[' inside '(...)'"));
                    }
                    group_members = 0;
                    mode = Mode::Frozen;
                }
                ']' => {
                    if mode != Mode::Frozen {
                        return Err(malformed("unmatched ']'"));
                    }
                    if group_members == 0 {
                        return Err(malformed("empty '[...]' group"));
                    }
                    mode = Mode::Independent;
                }
                '|' | ' ' => {}
                other => return Err(malformed(&format!("unexpected character '{other}'"))),
            }
        }
        if mode != Mode::Independent {
            return Err(malformed("unterminated group"));
        }
        let axes = [
            axes[0].ok_or_else(|| malformed("axis 'x' not accounted for"))?,
            axes[1].ok_or_else(|| malformed("axis 'y' not accounted for"))?,
            axes[2].ok_or_else(|| malformed("axis 'z' not accounted for"))?,
        ];
        Ok(Self { axes, num_groups })
    }

    /// Per-axis factors: one draw per group, `1` for frozen axes.
    fn factors(
        &self,
        sampler: FactorSampler,
        independent: bool,
        step: f64,
        rng: &mut StdRng,
    ) -> Vector3<f64> {
        let mut group_factors = [1.0; 3];
        let shared = if independent {
            None
        } else {
            Some(sampler.sample(step, rng))
        };
        // Every non-empty group carries at least one axis, so there are at
        // most three of them.
        for factor in group_factors.iter_mut().take(self.num_groups as usize) {
            *factor = shared.unwrap_or_else(|| sampler.sample(step, rng));
        }
        Vector3::from_fn(|axis, _| match self.axes[axis] {
            AxisHandling::Frozen => 1.0,
            AxisHandling::Group(group) => group_factors[group as usize],
        })
    }
}

/// How a single scaling factor is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorSampler {
    /// Uniform in `[1 - step, 1 + step)`.
    Linear,
    /// `exp(u)` with `u` uniform in `[-step, step)`.
    Log,
}

impl FactorSampler {
    fn sample(&self, step: f64, rng: &mut StdRng) -> f64 {
        match self {
            FactorSampler::Linear => rng.gen_range(1.0 - step..1.0 + step),
            FactorSampler::Log => rng.gen_range(-step..step).exp(),
        }
    }
}

/// Samples a volume change uniform in `[-step, step)` and converts it to an
/// isotropic transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaVolumeScaler;

impl TriclinicBoxScaler for DeltaVolumeScaler {
    fn sample_transform(&self, current: &TriclinicBox, step: f64, rng: &mut StdRng) -> Matrix3<f64> {
        let volume = current.volume();
        let delta_v = rng.gen_range(-step..step);
        // A negative target volume yields a negative factor and the box move
        // is rejected downstream as an invalid box.
        let factor = ((volume + delta_v) / volume).cbrt();
        Matrix3::from_diagonal(&Vector3::repeat(factor))
    }
}

/// Per-axis scaling factors drawn through a direction mask.
#[derive(Debug, Clone, Copy)]
pub struct AnisotropicScaler {
    sampler: FactorSampler,
    direction: ScalingDirection,
    independent: bool,
}

impl AnisotropicScaler {
    pub fn new(sampler: FactorSampler, direction: ScalingDirection, independent: bool) -> Self {
        Self {
            sampler,
            direction,
            independent,
        }
    }
}

impl TriclinicBoxScaler for AnisotropicScaler {
    fn sample_transform(&self, _current: &TriclinicBox, step: f64, rng: &mut StdRng) -> Matrix3<f64> {
        let factors = self
            .direction
            .factors(self.sampler, self.independent, step, rng);
        Matrix3::from_diagonal(&factors)
    }
}

/// Additive perturbation of the box matrix: the three diagonal elements
/// (together or independently) plus one of the six off-diagonal elements,
/// each by a delta uniform in `[-step, step)`.
#[derive(Debug, Clone, Copy)]
pub struct TriclinicDeltaScaler {
    independent: bool,
}

impl TriclinicDeltaScaler {
    pub fn new(independent: bool) -> Self {
        Self { independent }
    }
}

impl TriclinicBoxScaler for TriclinicDeltaScaler {
    fn sample_transform(&self, current: &TriclinicBox, step: f64, rng: &mut StdRng) -> Matrix3<f64> {
        let mut target = *current.matrix();
        if self.independent {
            for axis in 0..3 {
                target[(axis, axis)] += rng.gen_range(-step..step);
            }
        } else {
            let delta = rng.gen_range(-step..step);
            for axis in 0..3 {
                target[(axis, axis)] += delta;
            }
        }

        const OFF_DIAGONALS: [(usize, usize); 6] = [(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)];
        let element = OFF_DIAGONALS[rng.gen_range(0..OFF_DIAGONALS.len())];
        target[element] += rng.gen_range(-step..step);

        // The transform reproducing the target matrix by left-multiplication.
        target * current.inverse_matrix()
    }
}

/// Builds a scaler from its textual description.
///
/// Accepted forms: `delta V`, `[independent] linear <dir>`,
/// `[independent] log <dir>` and `[independent] delta triclinic`, where
/// `<dir>` is `isotropic`, `anisotropic x|y|z|xyz`, or a raw direction mask
/// such as `(xy)z` or `[x]yz`.
pub fn scaler_from_spec(spec: &str) -> Result<Box<dyn TriclinicBoxScaler>, ScalerError> {
    let trimmed = spec.trim();
    if trimmed == "delta V" {
        return Ok(Box::new(DeltaVolumeScaler));
    }

    let (independent, rest) = match trimmed.strip_prefix("independent ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };

    if rest == "delta triclinic" {
        return Ok(Box::new(TriclinicDeltaScaler::new(independent)));
    }

    let (sampler, direction_spec) = if let Some(direction) = rest.strip_prefix("linear ") {
        (FactorSampler::Linear, direction.trim())
    } else if let Some(direction) = rest.strip_prefix("log ") {
        (FactorSampler::Log, direction.trim())
    } else {
        return Err(ScalerError::UnknownScaling(spec.to_string()));
    };

    let direction = match direction_spec {
        "isotropic" => ScalingDirection::isotropic(),
        "anisotropic x" => ScalingDirection::axis_against_coupled_rest(0),
        "anisotropic y" => ScalingDirection::axis_against_coupled_rest(1),
        "anisotropic z" => ScalingDirection::axis_against_coupled_rest(2),
        "anisotropic xyz" => ScalingDirection::independent(),
        mask => ScalingDirection::parse(mask)?,
    };
    Ok(Box::new(AnisotropicScaler::new(sampler, direction, independent)))
}
