//! Broadcast of workspace panels across the process grid.
//!
//! A column panel computed on one process column is needed by every rank of the grid row
//! (to update the tiles of those rows), and, in transposed form, by every rank of the grid
//! column (to update the tiles of the mirrored columns of a hermitian matrix). The
//! transposed copy is obtained without a transpose communication: the rank on the
//! diagonal, which holds row `k` and column `k` of the parent at the same time, links the
//! tile it already has and forwards it along its column.

use super::grid::CommunicatorPipeline;
use super::{schedule_bcast_recv, schedule_bcast_send};
use crate::matrix::{LocalTileIndex, Panel};
use crate::runtime::TaskGraph;
use crate::types::{Coord, Scalar};

/// Broadcasts `panel` from the rank with grid coordinate `rank_root` (along the panel's
/// axis) to the other ranks of `chain`.
///
/// Every rank must call this with panels of identical range. Nothing is scheduled when
/// the grid has a single rank along the panel's axis.
pub fn broadcast<T: Scalar>(
    graph: &mut TaskGraph,
    rank_root: usize,
    panel: &mut Panel<T>,
    chain: &CommunicatorPipeline,
) {
    let comm_coord = panel.axis();
    let dist = *panel.distribution();
    if dist.grid_size().get(comm_coord) <= 1 {
        return;
    }
    let rank = dist.rank_index().get(comm_coord);
    for index in panel.iter_local() {
        if rank == rank_root {
            schedule_bcast_send(graph, chain, panel.read(index));
        } else {
            schedule_bcast_recv(graph, chain, rank_root, panel.readwrite(index));
        }
    }
}

/// Broadcasts `panel` as [`broadcast`] does, then fills `panel_t` so that its tile at
/// global index `k` holds `panel`'s tile `k`.
///
/// `panel_t`'s tile at the parent's last diagonal index is never filled: that position is
/// only used through `panel` by the consumers of the transposed copy.
///
/// # Panics
/// If the panels do not share their parent distribution and range start, have the same
/// axis, or if the parent matrix or its blocks are not square.
pub fn broadcast_transposed<T: Scalar>(
    graph: &mut TaskGraph,
    rank_root: usize,
    panel: &mut Panel<T>,
    panel_t: &mut Panel<T>,
    row_chain: &CommunicatorPipeline,
    col_chain: &CommunicatorPipeline,
) {
    assert_ne!(panel.axis(), panel_t.axis(), "panels must have orthogonal axes");
    assert_eq!(
        panel.distribution(),
        panel_t.distribution(),
        "panels must refer to the same matrix"
    );
    let dist = *panel.distribution();
    assert_eq!(dist.size().rows, dist.size().cols, "parent matrix must be square");
    assert_eq!(
        dist.block_size().rows,
        dist.block_size().cols,
        "parent blocks must be square"
    );
    assert_eq!(
        panel.range_start(),
        panel_t.range_start(),
        "panels must start on the same diagonal element"
    );
    assert_eq!(panel.width(), panel_t.width(), "panels must have the same width");

    if panel.is_empty() && panel_t.is_empty() {
        return;
    }

    let (chain_step1, chain_step2) = match panel.axis() {
        Coord::Col => (row_chain, col_chain),
        Coord::Row => (col_chain, row_chain),
    };

    broadcast(graph, rank_root, panel, chain_step1);

    let coord = panel.coord();
    let coord_t = panel_t.coord();
    // Step 2 communicates along the grid dimension of `coord`.
    let comm_size = dist.grid_size().get(coord);
    let last_diag = dist.nr_tiles().get(coord_t).saturating_sub(1);
    let indices: Vec<LocalTileIndex> = panel_t.iter_local().collect();
    for index_t in indices {
        let index_diag = dist.global_tile_from_local_tile(coord_t, index_t.get(coord_t));
        if index_diag == last_diag {
            continue;
        }
        let owner_diag = dist.rank_global_tile(coord, index_diag);
        match dist.local_tile_from_global_tile(coord, index_diag) {
            Some(local_diag) => {
                let source = panel.read(LocalTileIndex::from_coord(coord, local_diag, 0));
                panel_t.set_tile(index_t, source);
                if comm_size > 1 {
                    schedule_bcast_send(graph, chain_step2, panel_t.read(index_t));
                }
            }
            None => {
                if comm_size > 1 {
                    schedule_bcast_recv(graph, chain_step2, owner_diag, panel_t.readwrite(index_t));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{CommunicatorGrid, GridOrdering};
    use crate::matrix::{GlobalElementIndex, Matrix, Size2D};
    use crate::runtime::Runtime;

    #[test]
    fn test_single_rank_links_transposed_tiles() {
        let grid = CommunicatorGrid::solo(2);
        let dist = grid.distribution(Size2D::new(6, 6), Size2D::new(2, 2));
        let mat = Matrix::from_global_fn(dist, |i, j| (10 * i + j) as f64);
        let mut panel = Panel::new(Coord::Col, dist);
        let mut panel_t = Panel::new(Coord::Row, dist);
        for index in panel.iter_local() {
            let tile = mat.read(LocalTileIndex::new(index.row, 0));
            panel.set_tile(index, tile);
        }

        let mut graph = TaskGraph::new();
        let row = grid.row_communicator_pipeline();
        let col = grid.col_communicator_pipeline();
        broadcast_transposed(&mut graph, 0, &mut panel, &mut panel_t, &row, &col);
        assert!(graph.is_empty());
        Runtime::new(1).execute(graph).unwrap();

        let linked = panel_t.read(LocalTileIndex::new(0, 1)).to_mat();
        assert_eq!(linked[(1, 0)], 30.0);
        // The last diagonal position stays in the panel's own storage.
        assert_eq!(panel_t.read(LocalTileIndex::new(0, 2)).to_mat()[(1, 0)], 0.0);
    }

    #[test]
    fn test_broadcast_over_a_row_of_ranks() {
        let world = CommunicatorGrid::world(1, 3, GridOrdering::RowMajor, 2);
        let received: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|grid| {
                    s.spawn(move || {
                        let dist = grid.distribution(Size2D::new(4, 4), Size2D::new(2, 2));
                        let mut panel = Panel::<f64>::new(Coord::Col, dist);
                        panel.set_range_start(GlobalElementIndex::new(2, 2));
                        if grid.rank().col == 1 {
                            for index in panel.iter_local() {
                                panel.readwrite(index).lock().view_mut()[(1, 1)] = 7.0;
                            }
                        }
                        let mut graph = TaskGraph::new();
                        broadcast(&mut graph, 1, &mut panel, &grid.row_communicator_pipeline());
                        Runtime::new(1).execute(graph).unwrap();
                        panel.read(LocalTileIndex::new(1, 0)).to_mat()[(1, 1)]
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(received, vec![7.0; 3]);
    }
}
