//! This module provides the public entry points of the library: the reduction of a
//! hermitian matrix to band form and the Cholesky factorization, each for a local matrix
//! and for a matrix distributed over a process grid.
//!
//! All of them validate their inputs before scheduling any work, so a malformed call
//! returns an error without touching the matrix.

use crate::{
    algorithms::{
        cholesky::{check_cholesky_preconditions, cholesky_distributed, cholesky_local},
        reduction_to_band::{
            check_band_preconditions, reduction_to_band_distributed as red2band_distributed,
            reduction_to_band_local,
        },
    },
    comm::CommunicatorGrid,
    error::{DlaError, DlaErrorKind},
    matrix::{Distribution, Matrix, RankIndex, Size2D},
    runtime::Runtime,
    types::{Scalar, Uplo},
};

/// Number of independent row (and column) communicators the distributed reduction needs:
/// one for the broadcasts and reductions of the trailing update, one reserved for the
/// panel computation.
const RED2BAND_REQUIRED_PIPELINES: usize = 2;

fn check_local(dist: &Distribution) -> Result<(), DlaError> {
    if dist.grid_size() != Size2D::new(1, 1) {
        return Err(DlaErrorKind::DistributionMismatch(format!(
            "a local matrix must be distributed over a 1x1 grid, got {}x{}",
            dist.grid_size().rows,
            dist.grid_size().cols
        ))
        .into());
    }
    Ok(())
}

fn check_grid(grid: &CommunicatorGrid, dist: &Distribution) -> Result<(), DlaError> {
    if dist.grid_size() != grid.size() {
        return Err(DlaErrorKind::DistributionMismatch(format!(
            "matrix is distributed over a {}x{} grid, the communicator grid is {}x{}",
            dist.grid_size().rows,
            dist.grid_size().cols,
            grid.size().rows,
            grid.size().cols
        ))
        .into());
    }
    if dist.rank_index() != grid.rank() {
        let RankIndex { row, col } = dist.rank_index();
        return Err(DlaErrorKind::DistributionMismatch(format!(
            "matrix belongs to rank ({row}, {col}), the calling rank is ({}, {})",
            grid.rank().row,
            grid.rank().col
        ))
        .into());
    }
    Ok(())
}

fn check_uplo(uplo: Uplo) -> Result<(), DlaError> {
    match uplo {
        Uplo::Lower => Ok(()),
        Uplo::Upper => Err(DlaErrorKind::UnsupportedUplo.into()),
    }
}

/// Reduces the hermitian matrix `mat_a`, stored on the calling process, to band form.
///
/// On exit the lower triangle of `mat_a` holds the band matrix `B = Q^H A Q` in its `band`
/// sub-diagonals and the Householder reflectors defining `Q` below them. The upper
/// triangle is not referenced.
///
/// # Arguments
/// * `runtime`: Thread pool size and tuning parameters.
/// * `mat_a`: The matrix, with square blocks, distributed over a 1x1 grid.
/// * `band`: Number of sub-diagonals of the result. Must be positive and divide the block
///   size.
///
/// # Returns
/// The `tau` factors of the reflectors, as a `max(0, n - band - 1) x 1` matrix with blocks
/// of `nb x 1`, or a `DlaError`.
pub fn reduction_to_band<T: Scalar>(
    runtime: &Runtime,
    mat_a: &mut Matrix<T>,
    band: usize,
) -> Result<Matrix<T>, DlaError> {
    let dist = *mat_a.distribution();
    check_local(&dist)?;
    check_band_preconditions(&dist, band)?;
    log::info!(
        "reduction to band: n = {}, nb = {}, band = {band}, {} compute threads",
        dist.size().rows,
        dist.block_size().rows,
        runtime.compute_threads()
    );
    reduction_to_band_local(runtime, mat_a, band)
}

/// Reduces the hermitian matrix `mat_a`, distributed over `grid`, to band form.
///
/// Every rank of the grid must call this collectively with its part of the matrix. The
/// result has the same layout as for [`reduction_to_band`]; the `tau` factors of each panel
/// are held by every rank of the grid column owning the panel.
///
/// # Arguments
/// * `runtime`: Thread pool size and tuning parameters of this rank.
/// * `grid`: The calling rank's view of the process grid. It must provide at least two
///   communicator pipelines.
/// * `mat_a`: The local part of the matrix, distributed over `grid`.
/// * `band`: Number of sub-diagonals of the result.
///
/// # Returns
/// The local part of the `tau` factors, or a `DlaError`. An error on any rank aborts the
/// run on all ranks.
pub fn reduction_to_band_distributed<T: Scalar>(
    runtime: &Runtime,
    grid: &CommunicatorGrid,
    mat_a: &mut Matrix<T>,
    band: usize,
) -> Result<Matrix<T>, DlaError> {
    let dist = *mat_a.distribution();
    check_grid(grid, &dist)?;
    check_band_preconditions(&dist, band)?;
    if grid.num_pipelines() < RED2BAND_REQUIRED_PIPELINES {
        return Err(DlaErrorKind::InsufficientPipelines {
            required: RED2BAND_REQUIRED_PIPELINES,
            available: grid.num_pipelines(),
        }
        .into());
    }
    if runtime.compute_threads() < 2 && grid.size().linear_size() > 1 {
        log::warn!(
            "Distributed reduction to band with a single compute thread: the trailing update cannot overlap the panel computation."
        );
    }
    log::info!(
        "reduction to band: n = {}, nb = {}, band = {band}, grid {}x{}, rank {:?}",
        dist.size().rows,
        dist.block_size().rows,
        grid.size().rows,
        grid.size().cols,
        grid.rank()
    );
    red2band_distributed(runtime, grid, mat_a, band)
}

/// Computes the Cholesky factorization `A = L L^H` of the hermitian positive definite
/// matrix `mat_a`, stored on the calling process.
///
/// # Arguments
/// * `runtime`: Thread pool size and tuning parameters.
/// * `uplo`: Triangle holding the matrix. Only [`Uplo::Lower`] is supported.
/// * `mat_a`: The matrix, with square blocks, distributed over a 1x1 grid. On exit its
///   lower triangle holds `L`.
pub fn cholesky_factorization<T: Scalar>(
    runtime: &Runtime,
    uplo: Uplo,
    mat_a: &mut Matrix<T>,
) -> Result<(), DlaError> {
    check_uplo(uplo)?;
    let dist = *mat_a.distribution();
    check_local(&dist)?;
    check_cholesky_preconditions(&dist)?;
    log::info!(
        "cholesky: n = {}, nb = {}, {} compute threads",
        dist.size().rows,
        dist.block_size().rows,
        runtime.compute_threads()
    );
    cholesky_local(runtime, mat_a)
}

/// Distributed counterpart of [`cholesky_factorization`]. Every rank of `grid` must call
/// this collectively.
pub fn cholesky_factorization_distributed<T: Scalar>(
    runtime: &Runtime,
    grid: &CommunicatorGrid,
    uplo: Uplo,
    mat_a: &mut Matrix<T>,
) -> Result<(), DlaError> {
    check_uplo(uplo)?;
    let dist = *mat_a.distribution();
    check_grid(grid, &dist)?;
    check_cholesky_preconditions(&dist)?;
    log::info!(
        "cholesky: n = {}, nb = {}, grid {}x{}, rank {:?}",
        dist.size().rows,
        dist.block_size().rows,
        grid.size().rows,
        grid.size().cols,
        grid.rank()
    );
    cholesky_distributed(runtime, grid, mat_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::GridOrdering;

    #[test]
    fn test_local_rejects_grid_distribution() {
        let dist = Distribution::new(
            Size2D::new(4, 4),
            Size2D::new(2, 2),
            Size2D::new(1, 2),
            RankIndex::new(0, 0),
            RankIndex::new(0, 0),
        );
        let mut mat = Matrix::<f64>::new(dist);
        let err = reduction_to_band(&Runtime::new(1), &mut mat, 1).unwrap_err();
        assert!(err.to_string().starts_with("Distribution mismatch"));
    }

    #[test]
    fn test_distributed_requires_two_pipelines() {
        let grid = CommunicatorGrid::solo(1);
        let mut mat = Matrix::<f64>::new(grid.distribution(Size2D::new(4, 4), Size2D::new(2, 2)));
        let err = reduction_to_band_distributed(&Runtime::new(2), &grid, &mut mat, 2).unwrap_err();
        assert_eq!(
            err,
            DlaErrorKind::InsufficientPipelines {
                required: 2,
                available: 1
            }
            .into()
        );
    }

    #[test]
    fn test_distributed_rejects_foreign_distribution() {
        let world = CommunicatorGrid::world(1, 2, GridOrdering::RowMajor, 2);
        let dist = world[1].distribution(Size2D::new(4, 4), Size2D::new(2, 2));
        let mut mat = Matrix::<f64>::new(dist);
        let err = reduction_to_band_distributed(&Runtime::new(2), &world[0], &mut mat, 2).unwrap_err();
        assert!(err.to_string().starts_with("Distribution mismatch"));
    }

    #[test]
    fn test_upper_cholesky_is_rejected() {
        let mut mat = Matrix::<f64>::local(Size2D::new(2, 2), Size2D::new(2, 2));
        let err = cholesky_factorization(&Runtime::new(1), Uplo::Upper, &mut mat).unwrap_err();
        assert_eq!(err, DlaErrorKind::UnsupportedUplo.into());
    }

    #[test]
    fn test_invalid_band_leaves_matrix_untouched() {
        let mut mat = Matrix::from_global_fn(
            Distribution::local(Size2D::new(6, 6), Size2D::new(3, 3)),
            |i, j| (i + j) as f64,
        );
        let before = mat.to_dense();
        assert!(reduction_to_band(&Runtime::new(1), &mut mat, 2).is_err());
        assert_eq!(mat.to_dense(), before);
    }
}
