//! Integration test suite verifying the reduction to band.
//!
//! # Test Methodology
//!
//! A random hermitian matrix `A0` is reduced to `B = Q^H A0 Q`, and the output is checked
//! in two ways:
//! 1.  **Residual:** `Q` is rebuilt from the reflectors left below the band and their `tau`
//!     factors, and `||A0 - Q B Q^H|| / ||A0||` must be of the order of the machine
//!     precision.
//! 2.  **Consistency:** runs that must perform the very same operations (local versus a
//!     1x1 grid, in-place versus staged panels) must agree bit for bit; runs on larger
//!     grids must agree with the local run up to rounding.

use anyhow::{Result, bail, ensure};
use faer::{Mat, c64};
use std::sync::mpsc;
use std::time::Duration;
use tiledla::{
    DlaError, Scalar, reduction_to_band, reduction_to_band_distributed,
    comm::{CommunicatorGrid, GridOrdering},
    matrix::{Distribution, Size2D},
    runtime::Runtime,
    tune::{PanelStrategy, TuneParameters},
    types::RealScalar,
    utils::check::{
        distribute, gather, random_hermitian, reduction_to_band_residual, run_on_world, tolerance,
    },
};

const RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Output of a reduction: the dense matrix holding `B` and the reflectors, and the taus.
struct Reduced<T> {
    a: Mat<T>,
    taus: Mat<T>,
}

fn reduce_local<T: Scalar>(a0: &Mat<T>, nb: usize, band: usize, runtime: &Runtime) -> Result<Reduced<T>> {
    let n = a0.nrows();
    let mut mat = distribute(Distribution::local(Size2D::new(n, n), Size2D::new(nb, nb)), a0.as_ref());
    let taus = reduction_to_band(runtime, &mut mat, band)?;
    Ok(Reduced {
        a: mat.to_dense(),
        taus: taus.to_dense(),
    })
}

fn reduce_on_grid<T: Scalar>(
    a0: &Mat<T>,
    nb: usize,
    band: usize,
    rows: usize,
    cols: usize,
) -> Result<Reduced<T>> {
    reduce_on_grid_with(a0, nb, band, rows, cols, &Runtime::new(3))
}

fn reduce_on_grid_with<T: Scalar>(
    a0: &Mat<T>,
    nb: usize,
    band: usize,
    rows: usize,
    cols: usize,
    runtime: &Runtime,
) -> Result<Reduced<T>> {
    let n = a0.nrows();
    let world = CommunicatorGrid::world(rows, cols, GridOrdering::RowMajor, 2);
    let outputs = run_on_world(&world, |grid| -> Result<_, DlaError> {
        let dist = grid.distribution(Size2D::new(n, n), Size2D::new(nb, nb));
        let mut mat = distribute(dist, a0.as_ref());
        let taus = reduction_to_band_distributed(runtime, grid, &mut mat, band)?;
        Ok((mat.local_tiles(), taus.local_tiles()))
    });
    let (a_parts, tau_parts): (Vec<_>, Vec<_>) =
        outputs.into_iter().collect::<Result<Vec<_>, _>>()?.into_iter().unzip();
    let nrefls = n.saturating_sub(band + 1);
    Ok(Reduced {
        a: gather(Size2D::new(n, n), Size2D::new(nb, nb), &a_parts),
        taus: gather(Size2D::new(nrefls, 1), Size2D::new(nb, 1), &tau_parts),
    })
}

/// Runs [`reduce_on_grid_with`] on a separate thread and gives up after `RUN_TIMEOUT`, so
/// that a scheduling deadlock fails the test instead of hanging it.
fn reduce_on_grid_timed<T: Scalar>(
    a0: &Mat<T>,
    nb: usize,
    band: usize,
    rows: usize,
    cols: usize,
    runtime: &Runtime,
) -> Result<Reduced<T>> {
    let (tx, rx) = mpsc::channel();
    let a0 = a0.clone();
    let runtime = runtime.clone();
    std::thread::spawn(move || {
        let _ = tx.send(reduce_on_grid_with(&a0, nb, band, rows, cols, &runtime));
    });
    match rx.recv_timeout(RUN_TIMEOUT) {
        Ok(result) => result,
        Err(_) => bail!(
            "{rows}x{cols} grid, nb = {nb}, band = {band}: no result after {RUN_TIMEOUT:?}"
        ),
    }
}

fn check_residual<T: Scalar>(a0: &Mat<T>, reduced: &Reduced<T>, band: usize) -> Result<()> {
    let residual =
        reduction_to_band_residual(a0.as_ref(), reduced.a.as_ref(), reduced.taus.as_ref(), band);
    let tol = tolerance::<T>(a0.nrows());
    ensure!(residual < tol, "residual {residual:e} above tolerance {tol:e}");
    Ok(())
}

fn max_abs_diff<T: Scalar>(a: &Mat<T>, b: &Mat<T>) -> f64 {
    let mut max: f64 = 0.0;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            max = max.max((a[(i, j)] - b[(i, j)]).abs_squared().to_f64().sqrt());
        }
    }
    max
}

#[test]
fn test_nine_by_nine_to_tridiagonal() -> Result<()> {
    let a0 = random_hermitian::<f64>(9, 42, 0.0);
    let reduced = reduce_local(&a0, 3, 1, &Runtime::new(2))?;
    ensure!(reduced.taus.nrows() == 7, "expected 7 reflectors");
    check_residual(&a0, &reduced, 1)?;
    // The upper triangle is not referenced.
    for j in 1..9 {
        for i in 0..j {
            ensure!(reduced.a[(i, j)] == a0[(i, j)], "upper entry ({i}, {j}) modified");
        }
    }
    Ok(())
}

#[test]
fn test_no_reflectors_leaves_matrix_unchanged() -> Result<()> {
    let a0 = random_hermitian::<f64>(3, 1, 0.0);
    let reduced = reduce_local(&a0, 2, 2, &Runtime::new(2))?;
    ensure!(reduced.taus.nrows() == 0, "no reflector expected");
    ensure!(reduced.a == a0, "matrix modified");
    Ok(())
}

#[test]
fn test_complex_band_two() -> Result<()> {
    let a0 = random_hermitian::<c64>(10, 3, 0.0);
    let reduced = reduce_local(&a0, 4, 2, &Runtime::new(2))?;
    check_residual(&a0, &reduced, 2)
}

#[test]
fn test_incomplete_last_panel() -> Result<()> {
    // 6 reflectors: a full panel of 4 followed by a panel of 2.
    let a0 = random_hermitian::<f64>(11, 5, 0.0);
    let reduced = reduce_local(&a0, 4, 4, &Runtime::new(4))?;
    ensure!(reduced.taus.nrows() == 6, "expected 6 reflectors");
    check_residual(&a0, &reduced, 4)
}

#[test]
fn test_single_precision() -> Result<()> {
    let a0 = random_hermitian::<f32>(16, 8, 0.0);
    let reduced = reduce_local(&a0, 4, 2, &Runtime::new(2))?;
    check_residual(&a0, &reduced, 2)
}

#[test]
fn test_local_matches_single_rank_grid_bitwise() -> Result<()> {
    let a0 = random_hermitian::<f64>(13, 11, 0.0);
    let local = reduce_local(&a0, 3, 3, &Runtime::new(3))?;
    let grid = reduce_on_grid(&a0, 3, 3, 1, 1)?;
    ensure!(local.a == grid.a, "reduced matrices differ");
    ensure!(local.taus == grid.taus, "taus differ");
    Ok(())
}

#[test]
fn test_staged_panels_match_in_place_bitwise() -> Result<()> {
    let a0 = random_hermitian::<c64>(12, 9, 0.0);
    let in_place = reduce_local(&a0, 4, 2, &Runtime::new(3))?;
    let staged_runtime = Runtime::new(3).with_tune(TuneParameters {
        panel_strategy: PanelStrategy::Staged,
        ..TuneParameters::default()
    });
    let staged = reduce_local(&a0, 4, 2, &staged_runtime)?;
    ensure!(in_place.a == staged.a, "reduced matrices differ");
    ensure!(in_place.taus == staged.taus, "taus differ");
    Ok(())
}

#[test]
fn test_panel_worker_count_does_not_change_result() -> Result<()> {
    let a0 = random_hermitian::<f64>(20, 13, 0.0);
    let tune = |threads| TuneParameters {
        red2band_panel_num_threads: threads,
        ..TuneParameters::default()
    };
    let one = reduce_local(&a0, 4, 4, &Runtime::new(4).with_tune(tune(1)))?;
    let three = reduce_local(&a0, 4, 4, &Runtime::new(4).with_tune(tune(3)))?;
    check_residual(&a0, &one, 4)?;
    let diff = max_abs_diff(&one.a, &three.a);
    ensure!(diff < 1e-12, "results differ by {diff:e}");
    Ok(())
}

#[test]
fn test_two_by_two_grid_matches_local() -> Result<()> {
    let a0 = random_hermitian::<f64>(14, 21, 0.0);
    let local = reduce_local(&a0, 3, 3, &Runtime::new(3))?;
    let dist = reduce_on_grid(&a0, 3, 3, 2, 2)?;
    check_residual(&a0, &dist, 3)?;
    let diff = max_abs_diff(&local.taus, &dist.taus);
    ensure!(diff < 1e-10, "taus differ by {diff:e}");
    Ok(())
}

#[test]
fn test_two_by_two_grid_band_smaller_than_block() -> Result<()> {
    let a0 = random_hermitian::<c64>(12, 22, 0.0);
    let dist = reduce_on_grid(&a0, 4, 2, 2, 2)?;
    check_residual(&a0, &dist, 2)
}

#[test]
fn test_two_by_three_grid() -> Result<()> {
    let a0 = random_hermitian::<f64>(17, 23, 0.0);
    let local = reduce_local(&a0, 3, 1, &Runtime::new(3))?;
    let dist = reduce_on_grid(&a0, 3, 1, 2, 3)?;
    check_residual(&a0, &dist, 1)?;
    let diff = max_abs_diff(&local.a, &dist.a);
    ensure!(diff < 1e-10, "reduced matrices differ by {diff:e}");
    Ok(())
}

#[test]
fn test_invalid_band_is_rejected() -> Result<()> {
    let a0 = random_hermitian::<f64>(8, 0, 0.0);
    let result = reduce_local(&a0, 4, 3, &Runtime::new(1));
    ensure!(result.is_err(), "band 3 does not divide block size 4");
    Ok(())
}

#[test]
fn test_single_compute_thread_on_grids() -> Result<()> {
    // With one compute thread per rank, a panel blocked in its collectives holds the only
    // thread: the next panel must not start before the current step's communication.
    let runtime = Runtime::new(1);
    for (n, nb, band, rows, cols, seed) in [
        (12, 4, 2, 2, 2, 31),
        (12, 4, 1, 2, 2, 32),
        (24, 4, 2, 3, 2, 33),
        (13, 3, 3, 2, 2, 34),
    ] {
        let a0 = random_hermitian::<f64>(n, seed, 0.0);
        let reduced = reduce_on_grid_timed(&a0, nb, band, rows, cols, &runtime)?;
        check_residual(&a0, &reduced, band)?;
    }
    Ok(())
}

#[test]
fn test_staged_panels_on_grid_match_in_place() -> Result<()> {
    let a0 = random_hermitian::<c64>(14, 35, 0.0);
    let staged_tune = TuneParameters {
        panel_strategy: PanelStrategy::Staged,
        ..TuneParameters::default()
    };
    for threads in [1, 3] {
        let in_place = reduce_on_grid_timed(&a0, 4, 2, 2, 2, &Runtime::new(threads))?;
        let staged_runtime = Runtime::new(threads).with_tune(staged_tune.clone());
        let staged = reduce_on_grid_timed(&a0, 4, 2, 2, 2, &staged_runtime)?;
        check_residual(&a0, &staged, 2)?;
        let diff = max_abs_diff(&in_place.a, &staged.a);
        ensure!(diff < 1e-12, "{threads} threads: reduced matrices differ by {diff:e}");
        let diff = max_abs_diff(&in_place.taus, &staged.taus);
        ensure!(diff < 1e-12, "{threads} threads: taus differ by {diff:e}");
    }
    Ok(())
}
