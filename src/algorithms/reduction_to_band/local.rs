use super::strategy::{PanelContext, panel_strategy};
use super::tfactor::compute_t_factor;
use super::{
    gemm_compute_w2, gemm_update_x, number_of_reflectors, set0_panel, setup_reflector_panel_v,
    taus_distribution, taus_tile, trmm_compute_w,
};
use crate::blas::{self, Op};
use crate::error::DlaError;
use crate::matrix::{
    GlobalElementIndex, LocalTileIndex, Matrix, Panel, SubMatrixView, SubPanelView, WorkTile,
};
use crate::runtime::{Priority, RoundRobin, Runtime, Task, TaskGraph};
use crate::tune::red2band_panel_max_workers;
use crate::types::{Coord, Scalar};

/// `X = A W` on the lower triangle of the hermitian trailing matrix `view`.
fn hemm_compute_x<T: Scalar>(
    graph: &mut TaskGraph,
    x: &mut Panel<T>,
    view: &SubMatrixView,
    mat_a: &Matrix<T>,
    w: &Panel<T>,
) {
    set0_panel(graph, x);

    let dist = *mat_a.distribution();
    let at = view.begin();
    let end = view.end();
    for i in at.row..end.row {
        let limit = i + 1;
        for j in (at.col..limit).rev() {
            let ij = LocalTileIndex::new(i, j);
            let tile_a = mat_a.read(ij).split(view.spec(ij));
            let is_diag = dist.global_tile_index(ij).row == dist.global_tile_index(ij).col;
            if is_diag {
                let tile_w = w.read(ij);
                let tile_x = x.readwrite(ij);
                graph.spawn(
                    Task::new("hemm_x")
                        .priority(Priority::High)
                        .reads(&tile_a)
                        .reads(&tile_w)
                        .writes(&tile_x),
                    move || {
                        blas::hemm_lower(
                            T::one(),
                            tile_a.lock().view(),
                            tile_w.lock().view(),
                            tile_x.lock().view_mut(),
                        );
                        Ok(())
                    },
                );
            } else {
                // A(i, j) W(j) contributes to X(i), A(i, j)^H W(i) to X(j).
                let index_j = LocalTileIndex::new(j, 0);
                let tile_w = w.read(index_j);
                let tile_x = x.readwrite(ij);
                let a = tile_a.clone();
                graph.spawn(
                    Task::new("gemm_x")
                        .priority(Priority::High)
                        .reads(&a)
                        .reads(&tile_w)
                        .writes(&tile_x),
                    move || {
                        blas::gemm(
                            Op::NoTrans,
                            Op::NoTrans,
                            T::one(),
                            a.lock().view(),
                            tile_w.lock().view(),
                            tile_x.lock().view_mut(),
                        );
                        Ok(())
                    },
                );

                let tile_w = w.read(ij);
                let tile_x = x.readwrite(index_j);
                graph.spawn(
                    Task::new("gemm_x")
                        .priority(Priority::High)
                        .reads(&tile_a)
                        .reads(&tile_w)
                        .writes(&tile_x),
                    move || {
                        blas::gemm(
                            Op::ConjTrans,
                            Op::NoTrans,
                            T::one(),
                            tile_a.lock().view(),
                            tile_w.lock().view(),
                            tile_x.lock().view_mut(),
                        );
                        Ok(())
                    },
                );
            }
        }
    }
}

/// `A -= X V^H + V X^H` on the lower triangle of the trailing matrix `view`.
fn her2k_update_trailing_matrix<T: Scalar>(
    graph: &mut TaskGraph,
    view: &SubMatrixView,
    mat_a: &mut Matrix<T>,
    x: &Panel<T>,
    v: &Panel<T>,
) {
    let dist = *mat_a.distribution();
    let at = view.begin();
    let end = view.end();
    for i in at.row..end.row {
        let row = dist.global_tile_from_local_tile(Coord::Row, i);
        let limit = dist.next_local_tile_from_global_tile(Coord::Col, row + 1);
        for j in at.col..limit {
            let ij = LocalTileIndex::new(i, j);
            let priority = if j == at.col {
                Priority::High
            } else {
                Priority::Normal
            };
            let is_diag = dist.global_tile_index(ij).col == row;
            if is_diag {
                let tile_a = mat_a.readwrite(ij).split(view.spec(ij));
                let tile_v = v.read(ij);
                let tile_x = x.read(ij);
                graph.spawn(
                    Task::new("her2k_trailing")
                        .priority(priority)
                        .reads(&tile_v)
                        .reads(&tile_x)
                        .writes(&tile_a),
                    move || {
                        blas::her2k_lower(
                            -T::one(),
                            tile_v.lock().view(),
                            tile_x.lock().view(),
                            tile_a.lock().view_mut(),
                        );
                        Ok(())
                    },
                );
            } else {
                let index_j = LocalTileIndex::new(j, 0);
                for (left, right) in [(x.read(ij), v.read(index_j)), (v.read(ij), x.read(index_j))] {
                    let tile_a = mat_a.readwrite(ij).split(view.spec(ij));
                    graph.spawn(
                        Task::new("gemm_trailing")
                            .priority(priority)
                            .reads(&left)
                            .reads(&right)
                            .writes(&tile_a),
                        move || {
                            blas::gemm(
                                Op::NoTrans,
                                Op::ConjTrans,
                                -T::one(),
                                left.lock().view(),
                                right.lock().view(),
                                tile_a.lock().view_mut(),
                            );
                            Ok(())
                        },
                    );
                }
            }
        }
    }
}

/// Reduction to band of a matrix stored on a single process. Returns the `tau` factors.
pub(crate) fn reduction_to_band_local<T: Scalar>(
    runtime: &Runtime,
    mat_a: &mut Matrix<T>,
    band: usize,
) -> Result<Matrix<T>, DlaError> {
    let dist = *mat_a.distribution();
    let n = dist.size().rows;
    let nb = dist.block_size().cols;
    let nrefls = number_of_reflectors(n, band);
    let mut mat_taus = Matrix::new(taus_distribution(&dist, nrefls));
    if nrefls == 0 {
        log::debug!("red2band: nothing to do for n = {n}, band = {band}");
        return Ok(mat_taus);
    }

    let is_full_band = band == nb;
    let nblocks = (nrefls - 1) / band + 1;
    let ctx = PanelContext {
        max_workers: red2band_panel_max_workers(runtime.tune(), runtime.compute_threads()),
        busy_wait: runtime.tune().red2band_barrier_busy_wait(),
        collective: None,
    };
    let mut strategy = panel_strategy::<T>(runtime.tune().panel_strategy, &dist);

    let mut panels_v = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_w = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_x = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));

    let mut graph = TaskGraph::new();
    for j_sub in 0..nblocks {
        let i_sub = j_sub + 1;
        let ij_offset = GlobalElementIndex::new(i_sub * band, j_sub * band);
        let nrefls_block = band.min(nrefls - j_sub * band);
        log::debug!("red2band: panel {j_sub} at {ij_offset:?} with {nrefls_block} reflectors");

        let panel_view = SubPanelView::new(&dist, ij_offset, band);
        let v = panels_v.next_resource();
        v.set_range_start(ij_offset);
        v.set_width(nrefls_block);

        let taus = taus_tile(&mut mat_taus, j_sub, band);
        strategy.compute_panel(&mut graph, mat_a, &panel_view, taus, &ctx);
        setup_reflector_panel_v(
            &mut graph,
            true,
            &panel_view,
            nrefls_block,
            v,
            mat_a,
            !is_full_band,
        );
        let mut t = WorkTile::zeros(nrefls_block, nrefls_block);
        let taus = taus_tile(&mut mat_taus, j_sub, band).into_read();
        compute_t_factor(&mut graph, v, taus, t.readwrite(), None);

        let at_offset = GlobalElementIndex::new(i_sub * band, i_sub * band);
        if !dist.size().contains(at_offset) {
            break;
        }
        let view = SubMatrixView::new(&dist, at_offset);

        let w = panels_w.next_resource();
        w.set_range_start(at_offset);
        w.set_width(nrefls_block);
        trmm_compute_w(&mut graph, w, v, t.read());

        let x = panels_x.next_resource();
        x.set_range_start(at_offset);
        x.set_width(nrefls_block);
        hemm_compute_x(&mut graph, x, &view, mat_a, w);

        let mut w2 = WorkTile::zeros(nrefls_block, nrefls_block);
        gemm_compute_w2(&mut graph, &mut w2, w, x);
        gemm_update_x(&mut graph, x, w2.read(), v);

        her2k_update_trailing_matrix(&mut graph, &view, mat_a, x, v);

        x.reset();
        w.reset();
        v.reset();
    }

    log::debug!("red2band: scheduled {} tasks", graph.len());
    runtime.execute(graph)?;
    Ok(mat_taus)
}
