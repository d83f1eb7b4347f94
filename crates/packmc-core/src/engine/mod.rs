pub mod domain;
pub mod error;
pub mod neighbour_grid;
pub mod observables;
pub mod packing;
pub mod scalers;
pub mod simulation;
