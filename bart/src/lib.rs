//! # bart
//!
//! A Rust implementation of Bayesian Additive Regression Trees (BART):
//! a sum-of-trees ensemble fit by Markov-chain Monte Carlo, for
//! continuous and probit-binary responses.
//!
//! This crate is a **façade** that re-exports the workspace crates.
//! Application code should depend on this crate rather than the
//! individual `bart-*` crates.
//!
//! ## Quick start
//!
//! ```rust
//! use bart::sampler::{BartFit, Control, Data, Model, VariableType};
//!
//! // y ≈ x over a handful of points
//! let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
//! let y: Vec<f64> = x.iter().map(|v| 0.5 * v).collect();
//! let data = Data::new(y, x, vec![VariableType::Ordinal], vec![100], 1.0).unwrap();
//! let control = Control {
//!     num_trees: 10,
//!     num_burn_in: 20,
//!     num_samples: 10,
//!     ..Control::default()
//! };
//! let mut fit = BartFit::new(control, Model::default(), data).unwrap();
//! let results = fit.run_sampler();
//! assert_eq!(results.sigma_samples.len(), 10);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Core types, aliases, and error definitions.
pub use bart_core as core;

/// RNG, distributions, reductions, and linear algebra.
pub use bart_math as math;

/// The MCMC sampler: fits, priors, trees, results, persistence.
pub use bart_sampler as sampler;
