//! # bart-math
//!
//! Mathematical collaborators of the BART sampler: the Mersenne-Twister
//! RNG with deterministic state recovery, normal/chi-square distribution
//! functions (via statrs), indexed mean/variance reductions with optional
//! thread-pool dispatch, and the small dense linear algebra used by the
//! linear-regression end node (over nalgebra).

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod distributions;
pub mod linalg;
pub mod rng;
pub mod stats;
