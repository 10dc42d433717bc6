//! Tiled Cholesky factorization, `A = L L^H`, of the lower triangle of a hermitian
//! positive definite matrix.
//!
//! Right-looking variant: for each tile column `k`, the diagonal tile is factorized, the
//! tiles below it are solved against it, and the trailing matrix is updated with the panel.
//! The distributed variant moves the diagonal tile down its grid column and the panel
//! across the grid with the same transposed broadcast used by the reduction to band.

use crate::blas::{self, Op};
use crate::comm::{CommunicatorGrid, broadcast_transposed, schedule_bcast_recv, schedule_bcast_send};
use crate::error::{DlaError, DlaErrorKind};
use crate::matrix::{
    Distribution, GlobalElementIndex, GlobalTileIndex, LocalTileIndex, Matrix, Panel, ReadTile,
    WorkTile, WriteTile,
};
use crate::runtime::{Priority, RoundRobin, Runtime, Task, TaskGraph};
use crate::types::{Coord, Scalar};

pub(crate) fn check_cholesky_preconditions(dist: &Distribution) -> Result<(), DlaError> {
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
    Ok(())
}

fn potrf<T: Scalar>(graph: &mut TaskGraph, k: usize, tile: WriteTile<T>) {
    graph.spawn(
        Task::new("potrf").priority(Priority::High).writes(&tile),
        move || {
            if blas::potrf_lower(tile.lock().view_mut()) {
                Ok(())
            } else {
                Err(DlaErrorKind::NotPositiveDefinite { tile: k }.into())
            }
        },
    );
}

fn trsm<T: Scalar>(graph: &mut TaskGraph, diag: ReadTile<T>, tile: WriteTile<T>) {
    graph.spawn(
        Task::new("trsm")
            .priority(Priority::High)
            .reads(&diag)
            .writes(&tile),
        move || {
            blas::trsm_right_lower_conj_trans(diag.lock().view(), tile.lock().view_mut());
            Ok(())
        },
    );
}

fn herk<T: Scalar>(graph: &mut TaskGraph, priority: Priority, panel: ReadTile<T>, tile: WriteTile<T>) {
    graph.spawn(
        Task::new("herk")
            .priority(priority)
            .reads(&panel)
            .writes(&tile),
        move || {
            blas::herk_lower(
                -<T::Base as Scalar>::one(),
                panel.lock().view(),
                tile.lock().view_mut(),
            );
            Ok(())
        },
    );
}

fn gemm<T: Scalar>(
    graph: &mut TaskGraph,
    priority: Priority,
    left: ReadTile<T>,
    right: ReadTile<T>,
    tile: WriteTile<T>,
) {
    graph.spawn(
        Task::new("gemm")
            .priority(priority)
            .reads(&left)
            .reads(&right)
            .writes(&tile),
        move || {
            blas::gemm(
                Op::NoTrans,
                Op::ConjTrans,
                -T::one(),
                left.lock().view(),
                right.lock().view(),
                tile.lock().view_mut(),
            );
            Ok(())
        },
    );
}

/// Cholesky factorization of a matrix stored on a single process.
pub(crate) fn cholesky_local<T: Scalar>(
    runtime: &Runtime,
    mat_a: &mut Matrix<T>,
) -> Result<(), DlaError> {
    let nt = mat_a.distribution().nr_tiles().rows;
    let mut graph = TaskGraph::new();

    for k in 0..nt {
        let kk = LocalTileIndex::new(k, k);
        potrf(&mut graph, k, mat_a.readwrite(kk));
        for i in k + 1..nt {
            let diag = mat_a.read(kk);
            trsm(&mut graph, diag, mat_a.readwrite(LocalTileIndex::new(i, k)));
        }

        for j in k + 1..nt {
            let priority = if j == k + 1 {
                Priority::High
            } else {
                Priority::Normal
            };
            let panel_j = mat_a.read(LocalTileIndex::new(j, k));
            herk(&mut graph, priority, panel_j.clone(), mat_a.readwrite(LocalTileIndex::new(j, j)));
            for i in j + 1..nt {
                let panel_i = mat_a.read(LocalTileIndex::new(i, k));
                gemm(
                    &mut graph,
                    priority,
                    panel_i,
                    panel_j.clone(),
                    mat_a.readwrite(LocalTileIndex::new(i, j)),
                );
            }
        }
    }

    log::debug!("cholesky: scheduled {} tasks", graph.len());
    runtime.execute(graph)
}

/// Cholesky factorization of a matrix distributed over `grid`.
pub(crate) fn cholesky_distributed<T: Scalar>(
    runtime: &Runtime,
    grid: &CommunicatorGrid,
    mat_a: &mut Matrix<T>,
) -> Result<(), DlaError> {
    let dist = *mat_a.distribution();
    let rank = dist.rank_index();
    let nt = dist.nr_tiles().rows;
    let nb = dist.block_size().rows;

    let row_chain = grid.row_communicator_pipeline();
    let col_chain = grid.col_communicator_pipeline();

    let mut panels = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_t = RoundRobin::new(2, || Panel::<T>::new(Coord::Row, dist));

    let mut graph = TaskGraph::new();
    graph.on_abort(grid.abort_flag());

    for k in 0..nt {
        let kk = GlobalTileIndex::new(k, k);
        let owner = dist.rank_global_tile_index(kk);

        if rank.col == owner.col {
            // Factorize the diagonal tile and hand it to the rest of the grid column.
            let diag = if rank.row == owner.row {
                let local = dist.local_tile_index(kk);
                potrf(&mut graph, k, mat_a.readwrite(local));
                if col_chain.size() > 1 {
                    schedule_bcast_send(&mut graph, &col_chain, mat_a.read(local));
                }
                mat_a.read(local)
            } else {
                let size = dist.tile_size_of(kk);
                let mut work = WorkTile::zeros(size.rows, size.cols);
                schedule_bcast_recv(&mut graph, &col_chain, owner.row, work.readwrite());
                work.read()
            };

            let local_col = dist.next_local_tile_from_global_tile(Coord::Col, k);
            let first = dist.next_local_tile_from_global_tile(Coord::Row, k + 1);
            for i in first..dist.local_nr_tiles().rows {
                trsm(
                    &mut graph,
                    diag.clone(),
                    mat_a.readwrite(LocalTileIndex::new(i, local_col)),
                );
            }
        }

        if k + 1 == nt {
            break;
        }

        let at = GlobalElementIndex::new((k + 1) * nb, (k + 1) * nb);
        let panel = panels.next_resource();
        let panel_t = panels_t.next_resource();
        panel.set_range_start(at);
        panel_t.set_range_start(at);

        if rank.col == owner.col {
            let local_col = dist.next_local_tile_from_global_tile(Coord::Col, k);
            for index in panel.iter_local() {
                let tile = mat_a.read(LocalTileIndex::new(index.row, local_col));
                panel.set_tile(index, tile);
            }
        }
        broadcast_transposed(&mut graph, owner.col, panel, panel_t, &row_chain, &col_chain);

        let begin_row = dist.next_local_tile_from_global_tile(Coord::Row, k + 1);
        let begin_col = dist.next_local_tile_from_global_tile(Coord::Col, k + 1);
        for i in begin_row..dist.local_nr_tiles().rows {
            let row = dist.global_tile_from_local_tile(Coord::Row, i);
            let limit = dist.next_local_tile_from_global_tile(Coord::Col, row + 1);
            for j in begin_col..limit {
                let ij = LocalTileIndex::new(i, j);
                let priority = if j == begin_col {
                    Priority::High
                } else {
                    Priority::Normal
                };
                if dist.global_tile_from_local_tile(Coord::Col, j) == row {
                    herk(&mut graph, priority, panel.read(ij), mat_a.readwrite(ij));
                } else {
                    gemm(
                        &mut graph,
                        priority,
                        panel.read(ij),
                        panel_t.read(ij),
                        mat_a.readwrite(ij),
                    );
                }
            }
        }

        panel_t.reset();
        panel.reset();
    }

    log::debug!("cholesky: scheduled {} tasks", graph.len());
    runtime.execute(graph)
}
