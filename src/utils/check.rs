//! Test matrices and residual checks.
//!
//! The residuals are computed on dense copies gathered on one process, with the reflectors
//! applied one at a time: they are meant for validation, not for speed.

use crate::blas::{self, Op};
use crate::comm::CommunicatorGrid;
use crate::matrix::{Distribution, GlobalTileIndex, Matrix, Size2D, assemble};
use crate::types::{RealScalar, Scalar};
use faer::{Mat, MatRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random hermitian `n x n` matrix with entries in `[-1, 1]` and `shift` added to the
/// diagonal. A shift larger than `n` makes it positive definite.
pub fn random_hermitian<T: Scalar>(n: usize, seed: u64, shift: f64) -> Mat<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::<T>::zeros(n, n);
    for j in 0..n {
        a[(j, j)] = T::from_parts(rng.random_range(-1.0..=1.0) + shift, 0.0);
        for i in j + 1..n {
            let value = T::from_parts(rng.random_range(-1.0..=1.0), rng.random_range(-1.0..=1.0));
            a[(i, j)] = value;
            a[(j, i)] = value.conjugate();
        }
    }
    a
}

/// The local part, according to `dist`, of the dense matrix `dense`.
pub fn distribute<T: Scalar>(dist: Distribution, dense: MatRef<'_, T>) -> Matrix<T> {
    Matrix::from_global_fn(dist, |i, j| dense[(i, j)])
}

/// Local tiles of one rank, tagged with their global index, ready for [`gather`].
pub type LocalPart<T> = Vec<(GlobalTileIndex, Mat<T>)>;

/// Dense matrix assembled from the local parts of all ranks. Tiles replicated on several
/// ranks must hold the same values.
pub fn gather<T: Scalar>(size: Size2D, block: Size2D, parts: &[LocalPart<T>]) -> Mat<T> {
    assemble(size, block, parts)
}

/// Runs `f` on every rank of `world`, each in its own thread, and returns the results in
/// rank order.
///
/// # Panics
/// If `f` panics on any rank.
pub fn run_on_world<R: Send>(
    world: &[CommunicatorGrid],
    f: impl Fn(&CommunicatorGrid) -> R + Sync,
) -> Vec<R> {
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = world.iter().map(|grid| s.spawn(move || f(grid))).collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}

fn frobenius<T: Scalar>(a: MatRef<'_, T>) -> f64 {
    let mut sum = 0.0;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            sum += a[(i, j)].abs_squared().to_f64();
        }
    }
    sum.sqrt()
}

/// Full hermitian matrix from the lower triangle of `a`, keeping only `band`
/// sub-diagonals.
pub fn hermitian_band_from_lower<T: Scalar>(a: MatRef<'_, T>, band: usize) -> Mat<T> {
    let n = a.nrows();
    Mat::from_fn(n, n, |i, j| {
        if i >= j && i - j <= band {
            a[(i, j)]
        } else if j > i && j - i <= band {
            a[(j, i)].conjugate()
        } else {
            T::zero()
        }
    })
}

/// Applies `H = I - tau v v^H` from the left and `H^H` from the right: `m <- H m H^H`.
fn apply_reflector_both_sides<T: Scalar>(m: &mut Mat<T>, v: MatRef<'_, T>, tau: T) {
    let n = m.nrows();
    // m <- m - tau v (v^H m)
    let mut vh_m = Mat::<T>::zeros(1, n);
    blas::gemm(Op::ConjTrans, Op::NoTrans, T::one(), v, m.as_ref(), vh_m.as_mut());
    blas::gemm(Op::NoTrans, Op::NoTrans, -tau, v, vh_m.as_ref(), m.as_mut());
    // m <- m - conj(tau) (m v) v^H
    let mut m_v = Mat::<T>::zeros(n, 1);
    blas::gemm(Op::NoTrans, Op::NoTrans, T::one(), m.as_ref(), v, m_v.as_mut());
    blas::gemm(
        Op::NoTrans,
        Op::ConjTrans,
        -tau.conjugate(),
        m_v.as_ref(),
        v,
        m.as_mut(),
    );
}

/// `||A0 - Q B Q^H||_F / ||A0||_F` for the output `reduced` of a reduction to band of
/// `a0`, with `taus` the `k x 1` factors of its reflectors.
pub fn reduction_to_band_residual<T: Scalar>(
    a0: MatRef<'_, T>,
    reduced: MatRef<'_, T>,
    taus: MatRef<'_, T>,
    band: usize,
) -> f64 {
    let n = a0.nrows();
    let mut m = hermitian_band_from_lower(reduced, band);
    // Q B Q^H = H_0 (H_1 (... B ...) H_1^H) H_0^H
    for r in (0..taus.nrows()).rev() {
        let head = r + band;
        let v = Mat::from_fn(n, 1, |i, _| match i.cmp(&head) {
            std::cmp::Ordering::Less => T::zero(),
            std::cmp::Ordering::Equal => T::one(),
            std::cmp::Ordering::Greater => reduced[(i, r)],
        });
        apply_reflector_both_sides(&mut m, v.as_ref(), taus[(r, 0)]);
    }
    let diff = Mat::from_fn(n, n, |i, j| a0[(i, j)] - m[(i, j)]);
    frobenius(diff.as_ref()) / frobenius(a0)
}

/// `||A0 - L L^H||_F / ||A0||_F` for the Cholesky factor stored in the lower triangle of
/// `factor`.
pub fn cholesky_residual<T: Scalar>(a0: MatRef<'_, T>, factor: MatRef<'_, T>) -> f64 {
    let n = a0.nrows();
    let l = Mat::from_fn(n, n, |i, j| if i >= j { factor[(i, j)] } else { T::zero() });
    let mut diff = a0.to_owned();
    blas::gemm(Op::NoTrans, Op::ConjTrans, -T::one(), l.as_ref(), l.as_ref(), diff.as_mut());
    frobenius(diff.as_ref()) / frobenius(a0)
}

/// Residual tolerance for element type `T` and order `n`.
pub fn tolerance<T: Scalar>(n: usize) -> f64 {
    100.0 * (n.max(1) as f64) * <T::Base as RealScalar>::epsilon().to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::c64;

    #[test]
    fn test_random_hermitian_is_hermitian() {
        let a = random_hermitian::<c64>(5, 7, 0.0);
        for i in 0..5 {
            assert_eq!(a[(i, i)].im, 0.0);
            for j in 0..5 {
                assert_eq!(a[(i, j)], a[(j, i)].conjugate());
            }
        }
        assert_eq!(random_hermitian::<c64>(5, 7, 0.0), a);
    }

    #[test]
    fn test_untouched_matrix_has_zero_residual() {
        let a = random_hermitian::<f64>(6, 1, 0.0);
        // No reflectors: the band part of a full-band matrix is the matrix itself.
        let taus = Mat::<f64>::zeros(0, 1);
        assert_eq!(reduction_to_band_residual(a.as_ref(), a.as_ref(), taus.as_ref(), 5), 0.0);
    }

    #[test]
    fn test_zero_tau_is_identity() {
        let a = random_hermitian::<f64>(4, 2, 0.0);
        let mut tri = hermitian_band_from_lower(a.as_ref(), 1);
        let taus = Mat::<f64>::zeros(2, 1);
        let residual = reduction_to_band_residual(tri.as_ref(), tri.as_ref(), taus.as_ref(), 1);
        assert_eq!(residual, 0.0);
        tri[(3, 0)] = 1.0;
        assert_eq!(hermitian_band_from_lower(tri.as_ref(), 1)[(0, 3)], 0.0);
    }
}
