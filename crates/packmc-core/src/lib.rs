//! # packmc Core Library
//!
//! A Monte Carlo engine for evolving packings of anisotropic rigid bodies in
//! a deformable triclinic box under the isothermal-isobaric (NpT) ensemble,
//! with hard (overlap-only) and soft (pairwise energy) interactions, wall
//! constraints, step-size self-tuning and overlap-reduction relaxation.
//!
//! ## Architectural Philosophy
//!
//! The library is split into two layers with a strict dependency direction:
//!
//! - **[`core`]: The Foundation.** Stateless building blocks: triclinic box
//!   geometry and periodic boundary conditions, the shape instance data
//!   model, the [`core::interaction::ShapeModel`] contract together with the
//!   built-in sphere/spherocylinder/polysphere models, and snapshot I/O.
//!
//! - **[`engine`]: The Logic Core.** Stateful orchestration: the
//!   [`engine::packing::Packing`] with its neighbour grid and incremental
//!   energy/overlap bookkeeping, triclinic box scalers, domain decomposition
//!   for parallel particle moves, and the [`engine::simulation::Simulation`]
//!   Metropolis driver exposing `integrate` and `relax_overlaps`.

pub mod core;
pub mod engine;
