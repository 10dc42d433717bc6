//! Reduction of a hermitian matrix to band form.
//!
//! The lower triangle of `A` is transformed in place to `B = Q^H A Q`, where `B` is
//! hermitian with `band` sub-diagonals. `Q = H_0 H_1 ... H_{k-1}` is a product of
//! `k = max(0, n - band - 1)` Householder reflectors stored below the band of `A`, one per
//! column, with implicit unit leading element; their `tau` factors are returned in a
//! separate `k x 1` matrix.
//!
//! Each iteration of the outer loop processes a panel of `band` columns:
//!
//! 1. the reflectors of the panel are computed by a pool of workers (see [`workers`]);
//! 2. `V` is prepared with an explicit unit head, and `T` with `Q_panel = I - V T V^H`;
//! 3. `W = V T` and `X = A W - 1/2 V (W^H A W)` are formed;
//! 4. the trailing matrix is updated with `A -= X V^H + V X^H`.
//!
//! The distributed variant additionally broadcasts `V`, `W` and `X` together with their
//! transposed copies, and reduces the partial products of `X` over the grid.

mod distributed;
mod kernels;
mod local;
mod strategy;
mod tfactor;
mod workers;

pub(crate) use distributed::reduction_to_band_distributed;
pub(crate) use local::reduction_to_band_local;

use crate::blas::{self, Op};
use crate::error::{DlaError, DlaErrorKind};
use crate::matrix::{
    Distribution, GlobalTileIndex, Matrix, Panel, RankIndex, ReadTile, Size2D, SubPanelView,
    SubTileSpec, TileElementIndex, WorkTile, WriteTile,
};
use crate::runtime::{Priority, Task, TaskGraph};
use crate::types::{Coord, Scalar};

/// Checks the preconditions shared by the local and distributed variants.
pub(crate) fn check_band_preconditions(dist: &Distribution, band: usize) -> Result<(), DlaError> {
    let size = dist.size();
    if size.rows != size.cols {
        return Err(DlaErrorKind::NonSquareMatrix {
            rows: size.rows,
            cols: size.cols,
        }
        .into());
    }
    let block = dist.block_size();
    if block.rows != block.cols {
        return Err(DlaErrorKind::NonSquareBlock {
            rows: block.rows,
            cols: block.cols,
        }
        .into());
    }
    if band == 0 || block.cols % band != 0 {
        return Err(DlaErrorKind::InvalidBandSize {
            band,
            block: block.cols,
        }
        .into());
    }
    Ok(())
}

/// Number of reflectors of the reduction of a matrix of order `n`.
pub(crate) fn number_of_reflectors(n: usize, band: usize) -> usize {
    n.saturating_sub(band + 1)
}

/// The `nrefls x 1` matrix of the `tau` factors: its tiles are `nb x 1` and distributed over
/// the grid columns, so that each rank of a panel's column holds the factors of the panel.
fn taus_distribution(dist: &Distribution, nrefls: usize) -> Distribution {
    Distribution::new(
        Size2D::new(nrefls, 1),
        Size2D::new(dist.block_size().cols, 1),
        Size2D::new(dist.grid_size().cols, 1),
        RankIndex::new(dist.rank_index().col, 0),
        RankIndex::new(dist.source_rank_index().col, 0),
    )
}

/// Factors of the reflectors `j_sub * band ..` of the panel `j_sub`.
fn taus_tile<T: Scalar>(taus: &mut Matrix<T>, j_sub: usize, band: usize) -> WriteTile<T> {
    let dist = *taus.distribution();
    let first = j_sub * band;
    let nrefls = band.min(dist.size().rows - first);
    let tile = dist.global_tile_from_global_element(Coord::Row, first);
    let origin = dist.tile_element_from_global_element(Coord::Row, first);
    let index = dist.local_tile_index(GlobalTileIndex::new(tile, 0));
    taus.readwrite(index).split(SubTileSpec::new(
        TileElementIndex::new(origin, 0),
        Size2D::new(nrefls, 1),
    ))
}

/// Makes `v` hold the first `nrefls` reflectors of the panel `view` of `mat_a`.
///
/// The head tile is always copied, with its strict upper triangle zeroed and ones on the
/// diagonal. The other tiles are linked to the matrix unless `force_copy` is set, which is
/// needed when the panel shares its tiles with the trailing matrix (band smaller than the
/// block size).
fn setup_reflector_panel_v<T: Scalar>(
    graph: &mut TaskGraph,
    has_head: bool,
    view: &SubPanelView,
    nrefls: usize,
    v: &mut Panel<T>,
    mat_a: &Matrix<T>,
    force_copy: bool,
) {
    for (k, index) in view.iter_local().enumerate() {
        let mut spec = view.spec(index);
        spec.size.cols = spec.size.cols.min(nrefls);
        let tile = mat_a.read(index).split(spec);
        let is_head = has_head && k == 0;
        if is_head || force_copy {
            let dst = v.readwrite(index);
            graph.spawn(
                Task::new("setup_v")
                    .priority(Priority::High)
                    .reads(&tile)
                    .writes(&dst),
                move || {
                    let mut dst = dst.lock();
                    blas::copy(tile.lock().view(), dst.view_mut());
                    if is_head {
                        blas::laset_upper(T::zero(), T::one(), dst.view_mut());
                    }
                    Ok(())
                },
            );
        } else {
            v.set_tile(index, tile);
        }
    }
}

/// `W = V T`, one task per local tile.
fn trmm_compute_w<T: Scalar>(graph: &mut TaskGraph, w: &mut Panel<T>, v: &Panel<T>, t: ReadTile<T>) {
    for index in w.iter_local() {
        let tile_v = v.read(index);
        let tile_w = w.readwrite(index);
        let t = t.clone();
        graph.spawn(
            Task::new("trmm_w")
                .priority(Priority::High)
                .reads(&tile_v)
                .reads(&t)
                .writes(&tile_w),
            move || {
                let mut tile_w = tile_w.lock();
                blas::copy(tile_v.lock().view(), tile_w.view_mut());
                blas::trmm_right_upper(T::one(), t.lock().view(), tile_w.view_mut());
                Ok(())
            },
        );
    }
}

/// `W2 = W^H X` summed over the local tiles.
fn gemm_compute_w2<T: Scalar>(graph: &mut TaskGraph, w2: &mut WorkTile<T>, w: &Panel<T>, x: &Panel<T>) {
    let zero = w2.readwrite();
    graph.spawn(
        Task::new("set0_w2").priority(Priority::High).writes(&zero),
        move || {
            blas::set0(zero.lock().view_mut());
            Ok(())
        },
    );
    for index in w.iter_local() {
        let tile_w = w.read(index);
        let tile_x = x.read(index);
        let w2 = w2.readwrite();
        graph.spawn(
            Task::new("gemm_w2")
                .priority(Priority::High)
                .reads(&tile_w)
                .reads(&tile_x)
                .writes(&w2),
            move || {
                blas::gemm(
                    Op::ConjTrans,
                    Op::NoTrans,
                    T::one(),
                    tile_w.lock().view(),
                    tile_x.lock().view(),
                    w2.lock().view_mut(),
                );
                Ok(())
            },
        );
    }
}

/// `X -= 1/2 V W2`.
fn gemm_update_x<T: Scalar>(graph: &mut TaskGraph, x: &mut Panel<T>, w2: ReadTile<T>, v: &Panel<T>) {
    let minus_half = -T::from_f64(0.5);
    for index in v.iter_local() {
        let tile_v = v.read(index);
        let tile_x = x.readwrite(index);
        let w2 = w2.clone();
        graph.spawn(
            Task::new("gemm_update_x")
                .priority(Priority::High)
                .reads(&tile_v)
                .reads(&w2)
                .writes(&tile_x),
            move || {
                blas::gemm(
                    Op::NoTrans,
                    Op::NoTrans,
                    minus_half,
                    tile_v.lock().view(),
                    w2.lock().view(),
                    tile_x.lock().view_mut(),
                );
                Ok(())
            },
        );
    }
}

/// Zeroes every local tile of a panel.
fn set0_panel<T: Scalar>(graph: &mut TaskGraph, panel: &mut Panel<T>) {
    for index in panel.iter_local() {
        let tile = panel.readwrite(index);
        graph.spawn(
            Task::new("set0").priority(Priority::High).writes(&tile),
            move || {
                blas::set0(tile.lock().view_mut());
                Ok(())
            },
        );
    }
}
