//! Error types for bart-rs.
//!
//! A single `thiserror`-derived enum covers the four failure classes the
//! sampler distinguishes: configuration errors (fatal at the API
//! boundary), compatibility errors (predictor replacement would
//! invalidate fitted trees), I/O errors (state-file persistence), and
//! resource errors (degradable, e.g. thread-pool construction).
//!
//! A rejected Metropolis-Hastings proposal is never an error.

use thiserror::Error;

/// The top-level error type used throughout bart-rs.
#[derive(Debug, Error)]
pub enum Error {
    /// Out-of-range hyperparameter, mismatched array length, or other
    /// invalid construction argument. Fatal at the API boundary; no
    /// partial fit is created.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A replacement predictor column is incompatible with the fitted
    /// ensemble (fewer cut points than existing splits require).
    #[error("incompatible update: {0}")]
    Compatibility(String),

    /// File open, read, or write failure during save/load.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed or version-mismatched state file.
    #[error("corrupt state file: {0}")]
    CorruptState(String),

    /// A resource could not be acquired (e.g. thread pool). Callers
    /// degrade rather than abort on this class.
    #[error("resource unavailable: {0}")]
    Resource(String),
}

/// Shorthand `Result` type used throughout bart-rs.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns `Err(Error::Configuration(...))` if `$cond` is false.
///
/// # Example
/// ```
/// use bart_core::ensure;
/// fn positive(x: f64) -> bart_core::errors::Result<f64> {
///     ensure!(x > 0.0, "x must be positive, got {x}");
///     Ok(x)
/// }
/// assert!(positive(1.0).is_ok());
/// assert!(positive(-1.0).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            return Err($crate::errors::Error::Configuration(
                format!($($msg)*)
            ));
        }
    };
}

/// Returns `Err(Error::Configuration(...))` immediately.
///
/// # Example
/// ```
/// use bart_core::fail;
/// fn always_err() -> bart_core::errors::Result<()> {
///     fail!("something went wrong");
/// }
/// assert!(always_err().is_err());
/// ```
#[macro_export]
macro_rules! fail {
    ($($msg:tt)*) => {
        return Err($crate::errors::Error::Configuration(format!($($msg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = Error::Configuration("numTrees must be at least 1".into());
        assert_eq!(
            e.to_string(),
            "invalid configuration: numTrees must be at least 1"
        );
        let e = Error::Compatibility("column 3 lost cut points".into());
        assert!(e.to_string().starts_with("incompatible update"));
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
