use thiserror::Error;

/// Structural errors raised while building or reshaping a packing.
///
/// These are fatal when returned from a constructor. During a run the same
/// conditions surface as routine Metropolis rejections (an infinite energy
/// delta), never as errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PackingError {
    #[error("box matrix has a non-positive determinant")]
    InvalidBox,

    #[error("box face height {height:.6} is below the minimum {required:.6} required by the interaction range")]
    FaceHeightTooSmall { height: f64, required: f64 },

    #[error("neighbour grid would have only {cells} cells along axis {axis}; at least 3 are required")]
    GridTooCoarse { axis: usize, cells: usize },

    #[error("domain division {divisions:?} cannot keep active regions separated by the interaction range")]
    DomainsTooFine { divisions: [usize; 3] },

    #[error("packing must contain at least one particle")]
    Empty,

    #[error("species index {species} is out of range for a shape model with {available} species")]
    UnknownSpecies { species: usize, available: usize },
}

/// Fatal errors raised by the Metropolis driver.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid simulation parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Packing(#[from] PackingError),

    #[error("initial configuration contains {0} overlapping pairs; run overlap relaxation first")]
    InitialOverlaps(u64),
}
