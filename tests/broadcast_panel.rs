//! Integration tests for the broadcast of workspace panels over process grids.
//!
//! A column panel filled on one grid column must be readable on every rank after the
//! broadcast, and its transposed copy must expose, at column `k`, the panel's tile `k`,
//! whatever the grid shape, the source rank and the (possibly mid-tile) range start.

use anyhow::{Result, ensure};
use tiledla::{
    comm::{CommunicatorGrid, GridOrdering, broadcast_transposed},
    matrix::{Distribution, GlobalElementIndex, Panel, Size2D},
    runtime::{Runtime, TaskGraph},
    types::Coord,
    utils::check::run_on_world,
};

const N: usize = 11;
const NB: usize = 3;
const WIDTH: usize = 2;

/// Value of element `(r, c)` of the panel tile whose first row is the global row `row0`.
fn expected(row0: usize, r: usize, c: usize) -> f64 {
    (100 * (row0 + r) + c) as f64
}

/// First global row exposed by tile `k` of a panel starting at element `start`.
fn first_row(k: usize, start: usize) -> usize {
    (k * NB).max(start)
}

/// Runs the broadcast on a `rows x cols` grid and returns, per rank, the number of tiles
/// checked.
fn run_broadcast(rows: usize, cols: usize, root: usize, start: usize) -> Result<Vec<usize>> {
    let world = CommunicatorGrid::world(rows, cols, GridOrdering::ColumnMajor, 1);
    let outcomes = run_on_world(&world, |grid| -> Result<usize> {
        let dist: Distribution = grid.distribution(Size2D::new(N, N), Size2D::new(NB, NB));
        let offset = GlobalElementIndex::new(start, start);
        let mut panel = Panel::<f64>::new(Coord::Col, dist);
        let mut panel_t = Panel::<f64>::new(Coord::Row, dist);
        panel.set_range_start(offset);
        panel_t.set_range_start(offset);
        panel.set_width(WIDTH);
        panel_t.set_width(WIDTH);

        if grid.rank().col == root {
            for index in panel.iter_local() {
                let k = dist.global_tile_from_local_tile(Coord::Row, index.row);
                let tile = panel.readwrite(index);
                let mut guard = tile.lock();
                let mut view = guard.view_mut();
                for c in 0..view.ncols() {
                    for r in 0..view.nrows() {
                        view[(r, c)] = expected(first_row(k, start), r, c);
                    }
                }
            }
        }

        let mut graph = TaskGraph::new();
        let row = grid.row_communicator_pipeline();
        let col = grid.col_communicator_pipeline();
        broadcast_transposed(&mut graph, root, &mut panel, &mut panel_t, &row, &col);
        Runtime::new(2).execute(graph)?;

        let mut checked = 0;
        for index in panel.iter_local() {
            let k = dist.global_tile_from_local_tile(Coord::Row, index.row);
            let tile = panel.read(index).to_mat();
            ensure!(tile.ncols() == WIDTH, "panel width not preserved");
            for c in 0..tile.ncols() {
                for r in 0..tile.nrows() {
                    ensure!(tile[(r, c)] == expected(first_row(k, start), r, c), "panel tile {k}");
                }
            }
            checked += 1;
        }
        let last = dist.nr_tiles().cols - 1;
        for index in panel_t.iter_local() {
            let k = dist.global_tile_from_local_tile(Coord::Col, index.col);
            if k == last {
                continue;
            }
            let tile = panel_t.read(index).to_mat();
            for c in 0..tile.ncols() {
                for r in 0..tile.nrows() {
                    ensure!(
                        tile[(r, c)] == expected(first_row(k, start), r, c),
                        "transposed panel tile {k} on rank {:?}",
                        grid.rank()
                    );
                }
            }
            checked += 1;
        }
        Ok(checked)
    });
    outcomes.into_iter().collect()
}

#[test]
fn test_single_rank() -> Result<()> {
    let checked = run_broadcast(1, 1, 0, 0)?;
    // 4 tiles in the panel, 3 in the transposed copy (the last diagonal one is skipped).
    ensure!(checked == vec![7], "unexpected tile count {checked:?}");
    Ok(())
}

#[test]
fn test_row_of_ranks() -> Result<()> {
    run_broadcast(1, 3, 2, 4)?;
    Ok(())
}

#[test]
fn test_column_of_ranks() -> Result<()> {
    run_broadcast(3, 1, 0, 3)?;
    Ok(())
}

#[test]
fn test_square_grid_mid_tile_start() -> Result<()> {
    let checked = run_broadcast(2, 2, 1, 5)?;
    ensure!(checked.iter().sum::<usize>() > 0, "nothing checked");
    Ok(())
}

#[test]
fn test_rectangular_grid() -> Result<()> {
    run_broadcast(3, 2, 1, 1)?;
    run_broadcast(2, 3, 0, 7)?;
    Ok(())
}
