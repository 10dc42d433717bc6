//! Column kernels of the panel reduction.
//!
//! A panel is a list of tiles stacked vertically, all with the same columns. When
//! `has_head` is set, the first tile holds the pivot of column `j` at element `(j, j)`;
//! the reflector of column `j` then spans rows `j..` of that tile and all rows of the
//! other tiles. Without the head, every tile contributes all of its rows.
//!
//! Reflectors follow the LAPACK convention: `H = I - tau v v^H` with `v[0] = 1` implicit,
//! and `H^H x = y e_0`.

use crate::blas::{self, Op};
use crate::types::{RealScalar, Scalar};
use faer::prelude::{Reborrow, ReborrowMut};
use faer::{Mat, MatMut};
use parking_lot::Mutex;

pub(crate) type PanelTiles<'a, T> = [Mutex<MatMut<'a, T>>];

/// Returns `[x0, sum of squares]` of the local part of column `j`. `x0` is zero on ranks
/// not holding the head, so that a sum over ranks yields the pivot.
pub(crate) fn compute_x0_and_squares<T: Scalar>(
    has_head: bool,
    panel: &PanelTiles<'_, T>,
    j: usize,
) -> [T; 2] {
    let mut x0 = T::zero();
    let mut squares = T::Base::zero();
    for (k, tile) in panel.iter().enumerate() {
        let guard = tile.lock();
        let tile = guard.rb();
        let first = if has_head && k == 0 {
            x0 = tile[(j, j)];
            j
        } else {
            0
        };
        for i in first..tile.nrows() {
            squares = squares + tile[(i, j)].abs_squared();
        }
    }
    [x0, T::from_base(squares)]
}

/// Turns column `j` into the reflector `v` and returns its `tau`.
///
/// A column whose sum of squares is exactly zero needs no reflection: it is left
/// untouched and `tau = 0` is returned.
pub(crate) fn compute_reflector_and_tau<T: Scalar>(
    has_head: bool,
    panel: &PanelTiles<'_, T>,
    j: usize,
    x0_and_squares: [T; 2],
) -> T {
    let [x0, squares] = x0_and_squares;
    let squares = squares.real_part();
    if squares == T::Base::zero() {
        return T::zero();
    }
    let norm = squares.sqrt();
    let y = T::from_base(if x0.real_part().is_sign_negative() { norm } else { -norm });
    let tau = (y - x0) / y;
    let factor = T::one() / (x0 - y);

    for (k, tile) in panel.iter().enumerate() {
        let mut guard = tile.lock();
        let mut tile = guard.rb_mut();
        let first = if has_head && k == 0 {
            tile[(j, j)] = y;
            j + 1
        } else {
            0
        };
        for i in first..tile.nrows() {
            tile[(i, j)] = tile[(i, j)] * factor;
        }
    }
    tau
}

/// Accumulates `w += Pt^H v` over tiles `begin..end`, where `Pt` are the `pt_cols`
/// columns right of `j`.
pub(crate) fn compute_w_trailing_panel<T: Scalar>(
    has_head: bool,
    panel: &PanelTiles<'_, T>,
    mut w: MatMut<'_, T>,
    j: usize,
    pt_cols: usize,
    begin: usize,
    end: usize,
) {
    if pt_cols == 0 {
        return;
    }
    let mut has_first_component = has_head;
    for tile in &panel[begin..end] {
        let guard = tile.lock();
        let tile = guard.rb();
        let mut first = 0;
        if has_first_component {
            // The pivot row, with v[0] = 1.
            for c in 0..pt_cols {
                w[(c, 0)] = w[(c, 0)] + tile[(j, j + 1 + c)].conjugate();
            }
            first = j + 1;
            has_first_component = false;
        }
        if first < tile.nrows() {
            let rows = tile.nrows() - first;
            let pt = tile.submatrix(first, j + 1, rows, pt_cols);
            let v = tile.submatrix(first, j, rows, 1);
            blas::gemm(Op::ConjTrans, Op::NoTrans, T::one(), pt, v, w.rb_mut());
        }
    }
}

/// Applies `Pt -= conj(tau) v w^H` over tiles `begin..end`.
pub(crate) fn update_trailing_panel<T: Scalar>(
    has_head: bool,
    panel: &PanelTiles<'_, T>,
    j: usize,
    w: &Mat<T>,
    tau: T,
    begin: usize,
    end: usize,
) {
    let alpha = -tau.conjugate();
    let pt_cols = w.nrows();
    let mut has_first_component = has_head;
    for tile in &panel[begin..end] {
        let mut guard = tile.lock();
        let tile = guard.rb_mut();
        let (left, mut right) = tile.split_at_col_mut(j + 1);
        let mut first = 0;
        if has_first_component {
            for c in 0..pt_cols {
                right[(j, c)] = right[(j, c)] + alpha * w[(c, 0)].conjugate();
            }
            first = j + 1;
            has_first_component = false;
        }
        let nrows = left.nrows();
        if first < nrows {
            let rows = nrows - first;
            let v = left.rb().submatrix(first, j, rows, 1);
            let pt = right.rb_mut().submatrix_mut(first, 0, rows, pt_cols);
            blas::gemm(Op::NoTrans, Op::ConjTrans, alpha, v, w.as_ref(), pt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::c64;

    fn as_panel<'a, T: Scalar>(tiles: &'a mut [Mat<T>]) -> Vec<Mutex<MatMut<'a, T>>> {
        tiles.iter_mut().map(|t| Mutex::new(t.as_mut())).collect()
    }

    #[test]
    fn test_reflector_annihilates_column() {
        let mut tiles = vec![
            Mat::from_fn(3, 2, |i, j| (i + 2 * j) as f64 + 1.0),
            Mat::from_fn(2, 2, |i, j| (i * j) as f64 - 1.0),
        ];
        let original: Vec<f64> = tiles
            .iter()
            .flat_map(|t| (0..t.nrows()).map(move |i| t[(i, 0)]))
            .collect();
        let panel = as_panel(&mut tiles);
        let x = compute_x0_and_squares(true, &panel, 0);
        let tau = compute_reflector_and_tau(true, &panel, 0, x);
        drop(panel);

        // v = [1, tiles[0][1..,0], tiles[1][..,0]], y stored at the pivot.
        let y = tiles[0][(0, 0)];
        let mut v = vec![1.0];
        v.extend((1..3).map(|i| tiles[0][(i, 0)]));
        v.extend((0..2).map(|i| tiles[1][(i, 0)]));
        let dot: f64 = v.iter().zip(&original).map(|(a, b)| a * b).sum();
        for (k, (&vk, &xk)) in v.iter().zip(&original).enumerate() {
            let expected = if k == 0 { y } else { 0.0 };
            assert!((xk - tau * vk * dot - expected).abs() < 1e-12);
        }
        let norm: f64 = original.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((y.abs() - norm).abs() < 1e-12);
        assert!(y < 0.0, "y takes the opposite sign of x0");
    }

    #[test]
    fn test_zero_column_gives_zero_tau() {
        let mut tiles = vec![Mat::<f32>::zeros(3, 2)];
        tiles[0][(0, 1)] = 5.0;
        let panel = as_panel(&mut tiles);
        let x = compute_x0_and_squares(true, &panel, 0);
        assert_eq!(compute_reflector_and_tau(true, &panel, 0, x), 0.0);
        drop(panel);
        assert_eq!(tiles[0][(0, 1)], 5.0);
    }

    #[test]
    fn test_complex_reflector_produces_real_beta_direction() {
        let mut tiles = vec![Mat::from_fn(3, 1, |i, _| c64::new(i as f64 + 1.0, 1.0 - i as f64))];
        let original: Vec<c64> = (0..3).map(|i| tiles[0][(i, 0)]).collect();
        let panel = as_panel(&mut tiles);
        let x = compute_x0_and_squares(true, &panel, 0);
        let tau = compute_reflector_and_tau(true, &panel, 0, x);
        drop(panel);

        let y = tiles[0][(0, 0)];
        assert_eq!(y.im, 0.0);
        let v = [c64::new(1.0, 0.0), tiles[0][(1, 0)], tiles[0][(2, 0)]];
        // H^H x = x - conj(tau) v (v^H x)
        let vhx: c64 = v.iter().zip(&original).map(|(a, b)| a.conj() * b).sum();
        for k in 0..3 {
            let hx = original[k] - tau.conj() * v[k] * vhx;
            let expected = if k == 0 { y } else { c64::new(0.0, 0.0) };
            assert!((hx - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn test_trailing_update_applies_reflector() {
        let mut tiles = vec![Mat::from_fn(4, 3, |i, j| ((i + 1) * (j + 2)) as f64 + (i * i) as f64)];
        let original = tiles[0].clone();
        let panel = as_panel(&mut tiles);
        let x = compute_x0_and_squares(true, &panel, 0);
        let tau = compute_reflector_and_tau(true, &panel, 0, x);
        let mut w = Mat::<f64>::zeros(2, 1);
        compute_w_trailing_panel(true, &panel, w.as_mut(), 0, 2, 0, 1);
        update_trailing_panel(true, &panel, 0, &w, tau, 0, 1);
        drop(panel);

        let v: Vec<f64> = (0..4).map(|i| if i == 0 { 1.0 } else { tiles[0][(i, 0)] }).collect();
        for c in 1..3 {
            let vtx: f64 = (0..4).map(|i| v[i] * original[(i, c)]).sum();
            for i in 0..4 {
                let expected = original[(i, c)] - tau * v[i] * vtx;
                assert!((tiles[0][(i, c)] - expected).abs() < 1e-10);
            }
        }
    }
}
