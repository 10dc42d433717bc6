//! Distributed reduction to band.
//!
//! Only the ranks of the grid column holding the current panel compute its reflectors
//! and its `T` factor. `V`, `W = V T` and `X` are then broadcast along the grid rows, and
//! their transposed copies (`Vt`, `Wt`, `Xt`) along the grid columns, so that every rank
//! has the data needed by the tiles of the trailing matrix it owns. `X = A W` is computed
//! as partial sums on every rank and reduced onto the ranks owning the corresponding rows
//! of the panel column.
//!
//! The panel computation blocks its compute thread in collectives with the other ranks of
//! the panel column. Scheduled too early, it can take the thread needed by the trailing
//! update a sibling rank is waiting for. Each panel therefore waits for a trigger, armed
//! at every step on every rank of the next panel's grid column: it runs after all the
//! communication tasks this rank has submitted so far, and after the arrival of the tile
//! of `Xt` (or `X`) of the next panel's first column.

use super::strategy::{PanelCollective, PanelContext, panel_strategy};
use super::tfactor::compute_t_factor;
use super::{
    gemm_compute_w2, gemm_update_x, number_of_reflectors, set0_panel, setup_reflector_panel_v,
    taus_distribution, taus_tile, trmm_compute_w,
};
use crate::blas::{self, Op};
use crate::comm::{
    CommunicatorGrid, CommunicatorPipeline, broadcast_transposed, schedule_all_reduce_in_place,
    schedule_reduce_recv_in_place, schedule_reduce_send,
};
use crate::error::DlaError;
use crate::matrix::{
    GlobalElementIndex, GlobalTileIndex, LocalTileIndex, Matrix, Panel, RankIndex, ReadTile,
    SubMatrixView, SubPanelView, WorkTile, WriteTile,
};
use crate::runtime::{Priority, RoundRobin, Runtime, Task, TaskGraph, TaskId};
use crate::tune::red2band_panel_max_workers;
use crate::types::{Coord, Scalar};

/// Restricts a transposed panel to `[at_offset, last diagonal tile)`, or to an empty range
/// starting at `at_offset` when `at_offset` lies in the last tile.
fn set_range_panel_t<T: Scalar>(panel_t: &mut Panel<T>, at_offset: GlobalElementIndex) {
    let dist = *panel_t.distribution();
    let nr = dist.nr_tiles().get(Coord::Col);
    let first = dist.global_tile_from_global_element(Coord::Col, at_offset.col);
    let end = if first + 1 >= nr { first.min(nr) } else { nr - 1 };
    panel_t.set_range(at_offset, end);
}

fn gemm_into<T: Scalar>(
    graph: &mut TaskGraph,
    op_a: Op,
    a: ReadTile<T>,
    b: ReadTile<T>,
    c: WriteTile<T>,
    priority: Priority,
) {
    graph.spawn(
        Task::new("gemm_x")
            .priority(priority)
            .reads(&a)
            .reads(&b)
            .writes(&c),
        move || {
            blas::gemm(
                op_a,
                Op::NoTrans,
                T::one(),
                a.lock().view(),
                b.lock().view(),
                c.lock().view_mut(),
            );
            Ok(())
        },
    );
}

struct Chains<'a> {
    row: &'a CommunicatorPipeline,
    col: &'a CommunicatorPipeline,
}

/// `X = A W` for the hermitian trailing matrix `view`, reduced onto the ranks of grid column
/// `rank_root`.
///
/// The contributions `A(i, j)^H W(i)` belong to row `j` of `X`: they are accumulated in
/// `X` directly by the ranks owning that row, and in `Xt` by the others, then reduced along
/// the grid columns. The partial rows of `X` are finally reduced along the grid rows.
#[allow(clippy::too_many_arguments)]
fn hemm_compute_x<T: Scalar>(
    graph: &mut TaskGraph,
    rank_root: usize,
    x: &mut Panel<T>,
    xt: &mut Panel<T>,
    view: &SubMatrixView,
    mat_a: &Matrix<T>,
    w: &Panel<T>,
    wt: &Panel<T>,
    chains: &Chains<'_>,
) {
    set0_panel(graph, x);
    set0_panel(graph, xt);

    let dist = *mat_a.distribution();
    let rank = dist.rank_index();
    let at = view.begin();
    let end = view.end();
    for i in at.row..end.row {
        let row = dist.global_tile_from_local_tile(Coord::Row, i);
        let limit = dist.next_local_tile_from_global_tile(Coord::Col, row + 1);
        for j in (at.col..limit).rev() {
            let ij = LocalTileIndex::new(i, j);
            let col = dist.global_tile_from_local_tile(Coord::Col, j);
            let tile_a = mat_a.read(ij).split(view.spec(ij));

            if col == row {
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
                continue;
            }

            gemm_into(
                graph,
                Op::NoTrans,
                tile_a.clone(),
                wt.read(ij),
                x.readwrite(ij),
                Priority::High,
            );

            let dst = if dist.rank_global_tile(Coord::Row, col) == rank.row {
                let local = dist.next_local_tile_from_global_tile(Coord::Row, col);
                x.readwrite(LocalTileIndex::new(local, 0))
            } else {
                xt.readwrite(ij)
            };
            gemm_into(graph, Op::ConjTrans, tile_a, w.read(ij), dst, Priority::High);
        }
    }

    if chains.col.size() > 1 {
        for index_xt in xt.iter_local() {
            let col = dist.global_tile_from_local_tile(Coord::Col, index_xt.col);
            let owner = dist.rank_global_tile(Coord::Row, col);
            if owner == rank.row {
                let local = dist.next_local_tile_from_global_tile(Coord::Row, col);
                schedule_reduce_recv_in_place(
                    graph,
                    chains.col,
                    x.readwrite(LocalTileIndex::new(local, 0)),
                );
            } else {
                schedule_reduce_send(graph, chains.col, owner, xt.read(index_xt));
            }
        }
    }

    if chains.row.size() > 1 {
        for index_x in x.iter_local() {
            if rank.col == rank_root {
                schedule_reduce_recv_in_place(graph, chains.row, x.readwrite(index_x));
            } else {
                schedule_reduce_send(graph, chains.row, rank_root, x.read(index_x));
            }
        }
    }
}

/// `A -= X V^H + V X^H` on the lower triangle of the trailing matrix `view`, using the
/// transposed copies for the column contributions.
fn her2k_update_trailing_matrix<T: Scalar>(
    graph: &mut TaskGraph,
    view: &SubMatrixView,
    mat_a: &mut Matrix<T>,
    x: &Panel<T>,
    vt: &Panel<T>,
    v: &Panel<T>,
    xt: &Panel<T>,
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
            if dist.global_tile_from_local_tile(Coord::Col, j) == row {
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
                continue;
            }
            for (left, right) in [(x.read(ij), vt.read(ij)), (v.read(ij), xt.read(ij))] {
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

fn spawn_trigger(graph: &mut TaskGraph, task: Task) -> TaskId {
    graph.spawn(task.priority(Priority::High), || Ok(()))
}

/// Reduction to band of a matrix distributed over `grid`. Returns the `tau` factors.
pub(crate) fn reduction_to_band_distributed<T: Scalar>(
    runtime: &Runtime,
    grid: &CommunicatorGrid,
    mat_a: &mut Matrix<T>,
    band: usize,
) -> Result<Matrix<T>, DlaError> {
    let dist = *mat_a.distribution();
    let rank = dist.rank_index();
    let n = dist.size().rows;
    let nb = dist.block_size().cols;
    let nrefls = number_of_reflectors(n, band);
    let mut mat_taus = Matrix::new(taus_distribution(&dist, nrefls));
    if nrefls == 0 {
        log::debug!("red2band: nothing to do for n = {n}, band = {band}");
        return Ok(mat_taus);
    }

    let mpi_row_chain = grid.row_communicator_pipeline();
    let mpi_col_chain = grid.col_communicator_pipeline();
    let mpi_col_chain_panel = grid.col_communicator_pipeline();
    let chains = Chains {
        row: &mpi_row_chain,
        col: &mpi_col_chain,
    };

    let is_full_band = band == nb;
    let nblocks = (nrefls - 1) / band + 1;
    let nr_tiles = dist.nr_tiles().cols;
    let max_workers = red2band_panel_max_workers(runtime.tune(), runtime.compute_threads());
    let busy_wait = runtime.tune().red2band_barrier_busy_wait();
    let mut strategy = panel_strategy::<T>(runtime.tune().panel_strategy, &dist);

    let mut panels_v = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_vt = RoundRobin::new(2, || Panel::<T>::new(Coord::Row, dist));
    let mut panels_w = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_wt = RoundRobin::new(2, || Panel::<T>::new(Coord::Row, dist));
    let mut panels_x = RoundRobin::new(2, || Panel::<T>::new(Coord::Col, dist));
    let mut panels_xt = RoundRobin::new(2, || Panel::<T>::new(Coord::Row, dist));

    let mut graph = TaskGraph::new();
    graph.on_abort(grid.abort_flag());
    let mut trigger: Option<TaskId> = None;

    for j_sub in 0..nblocks {
        let i_sub = j_sub + 1;
        let ij_offset = GlobalElementIndex::new(i_sub * band, j_sub * band);
        let at_offset = GlobalElementIndex::new(i_sub * band, i_sub * band);
        let nrefls_block = band.min(nrefls - j_sub * band);

        let rank_v0 = RankIndex::new(
            dist.rank_global_tile(
                Coord::Row,
                dist.global_tile_from_global_element(Coord::Row, ij_offset.row),
            ),
            dist.rank_global_tile(
                Coord::Col,
                dist.global_tile_from_global_element(Coord::Col, ij_offset.col),
            ),
        );
        let is_panel_rank_col = rank.col == rank_v0.col;
        log::debug!(
            "red2band: panel {j_sub} at {ij_offset:?} with {nrefls_block} reflectors, owned by {rank_v0:?}"
        );

        let v = panels_v.next_resource();
        let vt = panels_vt.next_resource();
        v.set_range_start(at_offset);
        set_range_panel_t(vt, at_offset);
        v.set_width(nrefls_block);
        vt.set_width(nrefls_block);

        let mut t = WorkTile::zeros(nrefls_block, nrefls_block);
        if is_panel_rank_col {
            let has_head = rank.row == rank_v0.row;
            let panel_view = SubPanelView::new(&dist, ij_offset, band);
            let ctx = PanelContext {
                max_workers,
                busy_wait,
                collective: Some(PanelCollective {
                    rank_has_head: has_head,
                    chain: mpi_col_chain_panel.clone(),
                    trigger,
                }),
            };
            let taus = taus_tile(&mut mat_taus, j_sub, band);
            strategy.compute_panel(&mut graph, mat_a, &panel_view, taus, &ctx);
            setup_reflector_panel_v(
                &mut graph,
                has_head,
                &panel_view,
                nrefls_block,
                v,
                mat_a,
                !is_full_band,
            );
            let taus = taus_tile(&mut mat_taus, j_sub, band).into_read();
            compute_t_factor(&mut graph, v, taus, t.readwrite(), Some(&mpi_col_chain));
        }

        if !dist.size().contains(at_offset) {
            break;
        }
        let view = SubMatrixView::new(&dist, at_offset);

        broadcast_transposed(&mut graph, rank_v0.col, v, vt, &mpi_row_chain, &mpi_col_chain);

        let w = panels_w.next_resource();
        let wt = panels_wt.next_resource();
        w.set_range_start(at_offset);
        set_range_panel_t(wt, at_offset);
        w.set_width(nrefls_block);
        wt.set_width(nrefls_block);
        if is_panel_rank_col {
            trmm_compute_w(&mut graph, w, v, t.read());
        }
        broadcast_transposed(&mut graph, rank_v0.col, w, wt, &mpi_row_chain, &mpi_col_chain);

        let x = panels_x.next_resource();
        let xt = panels_xt.next_resource();
        x.set_range_start(at_offset);
        set_range_panel_t(xt, at_offset);
        x.set_width(nrefls_block);
        xt.set_width(nrefls_block);
        hemm_compute_x(&mut graph, rank_v0.col, x, xt, &view, mat_a, w, wt, &chains);

        if is_panel_rank_col {
            let mut w2 = WorkTile::zeros(nrefls_block, nrefls_block);
            gemm_compute_w2(&mut graph, &mut w2, w, x);
            if mpi_col_chain.size() > 1 {
                schedule_all_reduce_in_place(&mut graph, &mpi_col_chain, w2.readwrite());
            }
            gemm_update_x(&mut graph, x, w2.read(), v);
        }

        // Xt was used for the partial sums: start over before linking/receiving X.
        xt.reset();
        set_range_panel_t(xt, at_offset);
        xt.set_width(nrefls_block);
        broadcast_transposed(&mut graph, rank_v0.col, x, xt, &mpi_row_chain, &mpi_col_chain);

        // Every rank of the next panel's grid column gets a trigger, holding both lanes so
        // that it runs only once the communication this rank owes to the current step is
        // done. On top of that it waits for the tile of X heading the next panel.
        trigger = None;
        let j_tile_current = ij_offset.col / nb;
        let j_tile_next = at_offset.col / nb;
        let rank_next_col = if j_tile_current == j_tile_next {
            rank_v0.col
        } else {
            (rank_v0.col + 1) % dist.grid_size().cols
        };
        if rank.col == rank_next_col {
            let task = Task::new("trigger")
                .writes(&mpi_row_chain)
                .writes(&mpi_col_chain);
            let task = if j_tile_next == nr_tiles - 1 {
                // The last diagonal tile has no transposed copy.
                let diag = GlobalTileIndex::new(j_tile_next, j_tile_next);
                if dist.is_local(diag) {
                    let local = dist.local_tile_index(diag);
                    task.reads(&x.read(LocalTileIndex::new(local.row, 0)))
                } else {
                    task
                }
            } else if strategy.is_staged() && rank.row == rank_v0.row {
                let i = dist.next_local_tile_from_global_element(Coord::Row, at_offset.row);
                task.writes(&x.readwrite(LocalTileIndex::new(i, 0)))
            } else {
                let j = dist.next_local_tile_from_global_element(Coord::Col, at_offset.col);
                task.reads(&xt.read(LocalTileIndex::new(0, j)))
            };
            trigger = Some(spawn_trigger(&mut graph, task));
        }

        her2k_update_trailing_matrix(&mut graph, &view, mat_a, x, vt, v, xt);

        xt.reset();
        x.reset();
        wt.reset();
        w.reset();
        vt.reset();
        v.reset();
    }

    log::debug!("red2band: scheduled {} tasks", graph.len());
    runtime.execute(graph)?;
    Ok(mat_taus)
}
