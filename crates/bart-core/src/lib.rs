//! # bart-core
//!
//! Core types and error definitions for bart-rs.
//!
//! This crate provides the foundational building blocks shared across all
//! other crates in the workspace – type aliases, the error taxonomy, and
//! the `ensure!` / `fail!` convenience macros.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod errors;

/// Floating-point type used throughout the library.
pub type Real = f64;

/// Alias used for array sizes / indices.
pub type Size = usize;

/// Index of a training or test observation (row of X).
pub type ObsIndex = u32;
