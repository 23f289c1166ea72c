//! Symbolic threshold analysis for compartmental disease models.
//!
//! Describe a model by its compartments and the flows between them, then
//! derive the disease-free equilibrium and basic reproduction number as
//! algebraic expressions via the next-generation-matrix method:
//!
//! ```
//! use rnought::{epi, OdeModel, Transition};
//!
//! let sir = OdeModel::new(&["S", "I", "R"], &["beta", "gamma", "N"])
//!     .with_transition(Transition::new("S", "I", "beta*S*I/N".parse()?))
//!     .with_transition(Transition::new("I", "R", "gamma*I".parse()?));
//!
//! let (f, v) = epi::disease_progression_matrices(&sir, &["I"], true)?;
//! let r0 = epi::r0_from_matrices(&f, &v, None)?;
//! assert_eq!(r0.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod epi;
mod equations;
mod expr;
pub mod matrix;
mod model;
pub mod ops;
mod parse;
mod solve;

pub use crate::{
    epi::{EpiError, ReproductionNumber},
    equations::{Equation, SystemOfEquations},
    expr::{BinaryOperation, Expression, Parameter},
    matrix::{Matrix, MatrixError},
    model::{ModelError, OdeModel, Transition},
    parse::{parse, ParseError, TokenKind},
    solve::{Solution, SolveError},
};
