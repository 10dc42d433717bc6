//! Communication between ranks.
//!
//! The [`Communicator`] type moves tiles between the ranks of an in-process world, and a
//! [`CommunicatorGrid`] arranges the ranks in two dimensions. Algorithms never call a
//! communicator directly from the task that computes on a tile: they go through the
//! `schedule_*` helpers below, which add one task to the graph on the lane of a
//! [`CommunicatorPipeline`], so every operation on a communicator runs alone and in
//! submission order.

pub mod broadcast_panel;
pub mod communicator;
pub mod grid;

pub use broadcast_panel::{broadcast, broadcast_transposed};
pub use communicator::Communicator;
pub use grid::{CommunicatorGrid, CommunicatorPipeline, GridOrdering};

use crate::matrix::{ReadTile, WriteTile};
use crate::runtime::{TaskGraph, TaskId};
use crate::types::Scalar;
use std::sync::Arc;

fn register_abort(graph: &mut TaskGraph, pipeline: &CommunicatorPipeline) {
    graph.on_abort(Arc::clone(pipeline.communicator().abort_flag()));
}

/// Sends `tile` from this rank to all the other ranks of `pipeline`.
pub fn schedule_bcast_send<T: Scalar>(
    graph: &mut TaskGraph,
    pipeline: &CommunicatorPipeline,
    tile: ReadTile<T>,
) -> TaskId {
    register_abort(graph, pipeline);
    let chain = pipeline.clone();
    graph.spawn(pipeline.task("bcast_send").reads(&tile), move || {
        let guard = tile.lock();
        chain.communicator().bcast_send(guard.view())
    })
}

/// Receives into `tile` the data broadcast by rank `root` of `pipeline`.
pub fn schedule_bcast_recv<T: Scalar>(
    graph: &mut TaskGraph,
    pipeline: &CommunicatorPipeline,
    root: usize,
    tile: WriteTile<T>,
) -> TaskId {
    register_abort(graph, pipeline);
    let chain = pipeline.clone();
    graph.spawn(pipeline.task("bcast_recv").writes(&tile), move || {
        let mut guard = tile.lock();
        chain.communicator().bcast_recv(root, guard.view_mut())
    })
}

/// Contributes `tile` to a sum reduction onto rank `root`.
pub fn schedule_reduce_send<T: Scalar>(
    graph: &mut TaskGraph,
    pipeline: &CommunicatorPipeline,
    root: usize,
    tile: ReadTile<T>,
) -> TaskId {
    register_abort(graph, pipeline);
    let chain = pipeline.clone();
    graph.spawn(pipeline.task("reduce_send").reads(&tile), move || {
        let guard = tile.lock();
        chain.communicator().reduce_send(root, guard.view())
    })
}

/// Root side of a sum reduction: `tile` is replaced by the sum over all ranks.
pub fn schedule_reduce_recv_in_place<T: Scalar>(
    graph: &mut TaskGraph,
    pipeline: &CommunicatorPipeline,
    tile: WriteTile<T>,
) -> TaskId {
    register_abort(graph, pipeline);
    let chain = pipeline.clone();
    graph.spawn(pipeline.task("reduce_recv").writes(&tile), move || {
        let mut guard = tile.lock();
        chain.communicator().reduce_recv_in_place(guard.view_mut())
    })
}

pub fn schedule_all_reduce_in_place<T: Scalar>(
    graph: &mut TaskGraph,
    pipeline: &CommunicatorPipeline,
    tile: WriteTile<T>,
) -> TaskId {
    register_abort(graph, pipeline);
    let chain = pipeline.clone();
    graph.spawn(pipeline.task("all_reduce").writes(&tile), move || {
        let mut guard = tile.lock();
        chain.communicator().all_reduce_in_place(guard.view_mut())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::WorkTile;
    use crate::runtime::Runtime;

    #[test]
    fn test_scheduled_reduce_and_bcast() {
        let world = CommunicatorGrid::world(1, 3, GridOrdering::RowMajor, 1);
        let results: Vec<(f64, f64)> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|grid| {
                    s.spawn(move || {
                        let chain = grid.row_communicator_pipeline();
                        let rank = chain.rank();
                        let mut sum = WorkTile::<f64>::zeros(1, 1);
                        let mut copy = WorkTile::<f64>::zeros(1, 1);
                        sum.readwrite().lock().view_mut()[(0, 0)] = (rank + 1) as f64;
                        if rank == 2 {
                            copy.readwrite().lock().view_mut()[(0, 0)] = 42.0;
                        }

                        let mut graph = TaskGraph::new();
                        if rank == 0 {
                            schedule_reduce_recv_in_place(&mut graph, &chain, sum.readwrite());
                        } else {
                            schedule_reduce_send(&mut graph, &chain, 0, sum.read());
                        }
                        if rank == 2 {
                            schedule_bcast_send(&mut graph, &chain, copy.read());
                        } else {
                            schedule_bcast_recv(&mut graph, &chain, 2, copy.readwrite());
                        }
                        Runtime::new(2).execute(graph).unwrap();
                        (sum.read().to_mat()[(0, 0)], copy.read().to_mat()[(0, 0)])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], (6.0, 42.0));
        assert_eq!(results[1], (2.0, 42.0));
        assert_eq!(results[2].1, 42.0);
    }

    #[test]
    fn test_scheduled_all_reduce() {
        let world = CommunicatorGrid::world(2, 1, GridOrdering::RowMajor, 1);
        let results: Vec<f32> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|grid| {
                    s.spawn(move || {
                        let chain = grid.col_communicator_pipeline();
                        let mut tile = WorkTile::<f32>::zeros(2, 2);
                        tile.readwrite().lock().view_mut()[(1, 0)] = 1.5;
                        let mut graph = TaskGraph::new();
                        schedule_all_reduce_in_place(&mut graph, &chain, tile.readwrite());
                        Runtime::new(1).execute(graph).unwrap();
                        tile.read().to_mat()[(1, 0)]
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![3.0, 3.0]);
    }
}
