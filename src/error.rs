//! This module defines the custom error types for the library.
//!
//! Every failure that can surface from a public entry point is funnelled into a single
//! error type, [`DlaError`]. Precondition violations (malformed distributions, non-square
//! blocks, too few communicator pipelines) are reported at call entry; communication
//! failures and panics inside scheduled tasks are collected by the executor, which aborts
//! the whole run on the first one.
//!
//! Numerical degeneracy of a reflector column is *not* an error: it is encoded as
//! `tau = 0` by the reflector kernel.
use thiserror::Error;

/// Represents all possible errors that can occur in a tiled factorization run.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct DlaError(#[from] DlaErrorKind);

/// Private enum containing the distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum DlaErrorKind {
    #[error("Matrix must be square, got {rows}x{cols}.")]
    NonSquareMatrix { rows: usize, cols: usize },

    #[error("Block size must be square, got {rows}x{cols}.")]
    NonSquareBlock { rows: usize, cols: usize },

    /// The band size must be positive and divide the block size.
    #[error("Band size {band} is not compatible with block size {block}.")]
    InvalidBandSize { band: usize, block: usize },

    #[error("Distribution mismatch: {0}")]
    DistributionMismatch(String),

    #[error("At least {required} communicator pipelines are required, the grid provides {available}.")]
    InsufficientPipelines { required: usize, available: usize },

    #[error("Only the lower triangular variant is implemented.")]
    UnsupportedUplo,

    /// A rank map describing neither a row-major nor a column-major grid.
    #[error("Rank {rank} is placed at grid position ({row}, {col}), which matches neither row-major nor column-major ordering.")]
    UnsupportedGridMap { rank: usize, row: usize, col: usize },

    #[error("Matrix is not positive definite: factorization failed on diagonal tile {tile}.")]
    NotPositiveDefinite { tile: usize },

    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Run aborted because another rank failed.")]
    Aborted,

    #[error("Task `{task}` panicked: {message}")]
    TaskPanicked { task: String, message: String },

    #[error("Invalid input parameter: {0}")]
    InputError(String),
}

impl PartialEq for DlaError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl DlaError {
    /// Returns `true` if this error was caused by another rank aborting the run.
    pub fn is_abort(&self) -> bool {
        self.0 == DlaErrorKind::Aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_size_error_message() {
        let error = DlaError(DlaErrorKind::InvalidBandSize { band: 4, block: 6 });
        assert_eq!(
            error.to_string(),
            "Band size 4 is not compatible with block size 6."
        );
    }

    #[test]
    fn test_pipelines_error_message() {
        let error = DlaError(DlaErrorKind::InsufficientPipelines {
            required: 2,
            available: 1,
        });
        assert_eq!(
            error.to_string(),
            "At least 2 communicator pipelines are required, the grid provides 1."
        );
    }

    #[test]
    fn test_grid_map_error_message() {
        let error = DlaError::from(DlaErrorKind::UnsupportedGridMap {
            rank: 3,
            row: 0,
            col: 1,
        });
        assert_eq!(
            error.to_string(),
            "Rank 3 is placed at grid position (0, 1), which matches neither row-major nor column-major ordering."
        );
    }

    #[test]
    fn test_task_panicked_message() {
        let error = DlaError(DlaErrorKind::TaskPanicked {
            task: "her2k".to_string(),
            message: "boom".to_string(),
        });
        assert_eq!(error.to_string(), "Task `her2k` panicked: boom");
    }

    #[test]
    fn test_abort_detection() {
        assert!(DlaError(DlaErrorKind::Aborted).is_abort());
        assert!(!DlaError(DlaErrorKind::UnsupportedUplo).is_abort());
    }
}
