//! Tile-level BLAS/LAPACK kernels.
//!
//! These are thin wrappers over faer's dense routines with the argument conventions of the
//! reference BLAS: every routine takes the output tile last, accumulates into it unless
//! stated otherwise, and runs sequentially (`Par::Seq`). Parallelism comes from running
//! many tile kernels concurrently, not from inside a kernel.

use crate::types::Scalar;
use faer::linalg::matmul::matmul;
use faer::linalg::matmul::triangular::{self, BlockStructure};
use faer::linalg::triangular_solve::solve_lower_triangular_in_place_with_conj;
use faer::prelude::{Reborrow, ReborrowMut};
use faer::{Accum, Conj, MatMut, MatRef, Par, Side};

/// Operand transformation for [`gemm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    NoTrans,
    ConjTrans,
}

/// `c <- c + alpha * op(a) * op(b)`.
pub fn gemm<T: Scalar>(
    op_a: Op,
    op_b: Op,
    alpha: T,
    a: MatRef<'_, T>,
    b: MatRef<'_, T>,
    c: MatMut<'_, T>,
) {
    match (op_a, op_b) {
        (Op::NoTrans, Op::NoTrans) => matmul(c, Accum::Add, a, b, alpha, Par::Seq),
        (Op::NoTrans, Op::ConjTrans) => matmul(c, Accum::Add, a, b.adjoint(), alpha, Par::Seq),
        (Op::ConjTrans, Op::NoTrans) => matmul(c, Accum::Add, a.adjoint(), b, alpha, Par::Seq),
        (Op::ConjTrans, Op::ConjTrans) => {
            matmul(c, Accum::Add, a.adjoint(), b.adjoint(), alpha, Par::Seq)
        }
    }
}

/// `c <- c + alpha * A * b`, with `A` hermitian and only its lower triangle referenced.
pub fn hemm_lower<T: Scalar>(alpha: T, a: MatRef<'_, T>, b: MatRef<'_, T>, mut c: MatMut<'_, T>) {
    triangular::matmul(
        c.rb_mut(),
        BlockStructure::Rectangular,
        Accum::Add,
        a,
        BlockStructure::TriangularLower,
        b,
        BlockStructure::Rectangular,
        alpha,
        Par::Seq,
    );
    triangular::matmul(
        c,
        BlockStructure::Rectangular,
        Accum::Add,
        a.adjoint(),
        BlockStructure::StrictTriangularUpper,
        b,
        BlockStructure::Rectangular,
        alpha,
        Par::Seq,
    );
}

/// `lower(c) <- lower(c) + alpha * a * b^H + conj(alpha) * b * a^H`.
pub fn her2k_lower<T: Scalar>(alpha: T, a: MatRef<'_, T>, b: MatRef<'_, T>, mut c: MatMut<'_, T>) {
    triangular::matmul(
        c.rb_mut(),
        BlockStructure::TriangularLower,
        Accum::Add,
        a,
        BlockStructure::Rectangular,
        b.adjoint(),
        BlockStructure::Rectangular,
        alpha,
        Par::Seq,
    );
    triangular::matmul(
        c,
        BlockStructure::TriangularLower,
        Accum::Add,
        b,
        BlockStructure::Rectangular,
        a.adjoint(),
        BlockStructure::Rectangular,
        alpha.conjugate(),
        Par::Seq,
    );
}

/// `lower(c) <- lower(c) + alpha * a * a^H`, alpha real.
pub fn herk_lower<T: Scalar>(alpha: T::Base, a: MatRef<'_, T>, c: MatMut<'_, T>) {
    triangular::matmul(
        c,
        BlockStructure::TriangularLower,
        Accum::Add,
        a,
        BlockStructure::Rectangular,
        a.adjoint(),
        BlockStructure::Rectangular,
        T::from_base(alpha),
        Par::Seq,
    );
}

/// `b <- alpha * b * t`, with `t` upper triangular (right side, no transpose).
pub fn trmm_right_upper<T: Scalar>(alpha: T, t: MatRef<'_, T>, b: MatMut<'_, T>) {
    let v = b.rb().to_owned();
    triangular::matmul(
        b,
        BlockStructure::Rectangular,
        Accum::Replace,
        v.as_ref(),
        BlockStructure::Rectangular,
        t,
        BlockStructure::TriangularUpper,
        alpha,
        Par::Seq,
    );
}

/// `b <- b * l^{-H}`, with `l` lower triangular (right side, conjugate transpose).
pub fn trsm_right_lower_conj_trans<T: Scalar>(l: MatRef<'_, T>, b: MatMut<'_, T>) {
    // X l^H = B  <=>  conj(l) X^T = B^T
    solve_lower_triangular_in_place_with_conj(l, Conj::Yes, b.transpose_mut(), Par::Seq);
}

/// Cholesky factorization of the lower triangle of `a` in place. The strictly upper
/// triangle is left untouched. Returns `false` if `a` is not positive definite.
pub fn potrf_lower<T: Scalar>(mut a: MatMut<'_, T>) -> bool {
    let llt = match a.rb().llt(Side::Lower) {
        Ok(llt) => llt,
        Err(_) => return false,
    };
    let l = llt.L();
    for j in 0..a.ncols() {
        for i in j..a.nrows() {
            a[(i, j)] = l[(i, j)];
        }
    }
    true
}

/// Sets the strictly upper triangle of `a` to `offdiag` and its diagonal to `diag`.
pub fn laset_upper<T: Scalar>(offdiag: T, diag: T, mut a: MatMut<'_, T>) {
    for j in 0..a.ncols() {
        for i in 0..j.min(a.nrows()) {
            a[(i, j)] = offdiag;
        }
        if j < a.nrows() {
            a[(j, j)] = diag;
        }
    }
}

pub fn set0<T: Scalar>(mut a: MatMut<'_, T>) {
    a.fill(T::zero());
}

pub fn copy<T: Scalar>(src: MatRef<'_, T>, mut dst: MatMut<'_, T>) {
    dst.copy_from(src);
}
