//! 2D process grids.

use super::communicator::Communicator;
use crate::error::{DlaError, DlaErrorKind};
use crate::matrix::{Distribution, RankIndex, Resource, ResourceId, Size2D};
use crate::runtime::Task;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mapping between the rank in the full communicator and the position in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridOrdering {
    /// `rank = row * cols + col`
    RowMajor,
    /// `rank = col * rows + row`
    ColumnMajor,
}

impl GridOrdering {
    pub fn rank_of(self, grid: Size2D, position: RankIndex) -> usize {
        match self {
            GridOrdering::RowMajor => position.row * grid.cols + position.col,
            GridOrdering::ColumnMajor => position.col * grid.rows + position.row,
        }
    }

    pub fn position_of(self, grid: Size2D, rank: usize) -> RankIndex {
        match self {
            GridOrdering::RowMajor => RankIndex::new(rank / grid.cols, rank % grid.cols),
            GridOrdering::ColumnMajor => RankIndex::new(rank % grid.rows, rank / grid.rows),
        }
    }

    /// Classifies an explicit `rank -> grid position` map.
    ///
    /// Maps which are neither row-major nor column-major (arbitrary process maps) are
    /// rejected with an error instead of guessing an ordering. Grids with a single row or
    /// column match both orderings and are reported as row-major.
    pub fn detect(grid: Size2D, map: &[RankIndex]) -> Result<GridOrdering, DlaError> {
        if map.len() != grid.linear_size() {
            return Err(DlaErrorKind::InputError(format!(
                "rank map has {} entries for a {}x{} grid",
                map.len(),
                grid.rows,
                grid.cols
            ))
            .into());
        }
        let matches = |ordering: GridOrdering| {
            map.iter()
                .enumerate()
                .all(|(rank, &pos)| ordering.position_of(grid, rank) == pos)
        };
        if matches(GridOrdering::RowMajor) {
            Ok(GridOrdering::RowMajor)
        } else if matches(GridOrdering::ColumnMajor) {
            Ok(GridOrdering::ColumnMajor)
        } else {
            let (rank, pos) = map
                .iter()
                .enumerate()
                .find(|&(rank, &pos)| GridOrdering::RowMajor.position_of(grid, rank) != pos)
                .map(|(rank, &pos)| (rank, pos))
                .unwrap_or((0, map[0]));
            Err(DlaErrorKind::UnsupportedGridMap {
                rank,
                row: pos.row,
                col: pos.col,
            }
            .into())
        }
    }
}

/// Handle on a communicator whose operations are serialized on one scheduling lane.
#[derive(Clone)]
pub struct CommunicatorPipeline {
    comm: Arc<Communicator>,
    id: ResourceId,
}

impl CommunicatorPipeline {
    pub fn new(comm: Communicator) -> Self {
        Self {
            comm: Arc::new(comm),
            id: ResourceId::fresh(),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }

    /// A task scheduled on this pipeline's lane.
    pub fn task(&self, name: &'static str) -> Task {
        Task::on_lane(name, self.id)
    }
}

impl Resource for CommunicatorPipeline {
    fn resource_id(&self) -> ResourceId {
        self.id
    }
}

/// The calling rank's view of a 2D process grid.
pub struct CommunicatorGrid {
    rank: RankIndex,
    size: Size2D,
    ordering: GridOrdering,
    full: CommunicatorPipeline,
    row_pipelines: Vec<CommunicatorPipeline>,
    col_pipelines: Vec<CommunicatorPipeline>,
    next_row: AtomicUsize,
    next_col: AtomicUsize,
    abort: Arc<AtomicBool>,
}

impl CommunicatorGrid {
    /// Creates all ranks of an in-process `rows x cols` world. Element `k` of the result
    /// belongs to the rank with index `k` in the full communicator.
    ///
    /// Each rank gets `num_pipelines` independent copies of its row and column
    /// communicators (at least one).
    pub fn world(
        rows: usize,
        cols: usize,
        ordering: GridOrdering,
        num_pipelines: usize,
    ) -> Vec<CommunicatorGrid> {
        assert!(rows > 0 && cols > 0, "grid dimensions must be positive");
        let size = Size2D::new(rows, cols);
        let nranks = size.linear_size();
        let abort = Arc::new(AtomicBool::new(false));

        let mut row_pipes: Vec<Vec<CommunicatorPipeline>> = (0..nranks).map(|_| Vec::new()).collect();
        let mut col_pipes: Vec<Vec<CommunicatorPipeline>> = (0..nranks).map(|_| Vec::new()).collect();
        for _ in 0..num_pipelines.max(1) {
            for r in 0..rows {
                for (c, comm) in Communicator::group(cols, &abort).into_iter().enumerate() {
                    row_pipes[ordering.rank_of(size, RankIndex::new(r, c))]
                        .push(CommunicatorPipeline::new(comm));
                }
            }
            for c in 0..cols {
                for (r, comm) in Communicator::group(rows, &abort).into_iter().enumerate() {
                    col_pipes[ordering.rank_of(size, RankIndex::new(r, c))]
                        .push(CommunicatorPipeline::new(comm));
                }
            }
        }

        Communicator::group(nranks, &abort)
            .into_iter()
            .zip(row_pipes.into_iter().zip(col_pipes))
            .enumerate()
            .map(|(rank, (full, (row_pipelines, col_pipelines)))| CommunicatorGrid {
                rank: ordering.position_of(size, rank),
                size,
                ordering,
                full: CommunicatorPipeline::new(full),
                row_pipelines,
                col_pipelines,
                next_row: AtomicUsize::new(0),
                next_col: AtomicUsize::new(0),
                abort: Arc::clone(&abort),
            })
            .collect()
    }

    /// Like [`CommunicatorGrid::world`], with the ordering inferred from an explicit rank
    /// map (entry `k` is the grid position of rank `k`).
    pub fn world_from_map(
        size: Size2D,
        map: &[RankIndex],
        num_pipelines: usize,
    ) -> Result<Vec<CommunicatorGrid>, DlaError> {
        let ordering = GridOrdering::detect(size, map)?;
        Ok(Self::world(size.rows, size.cols, ordering, num_pipelines))
    }

    /// A 1x1 grid for the calling process alone.
    pub fn solo(num_pipelines: usize) -> CommunicatorGrid {
        let mut world = Self::world(1, 1, GridOrdering::RowMajor, num_pipelines);
        world.remove(0)
    }

    pub fn rank(&self) -> RankIndex {
        self.rank
    }

    pub fn size(&self) -> Size2D {
        self.size
    }

    pub fn ordering(&self) -> GridOrdering {
        self.ordering
    }

    pub fn num_pipelines(&self) -> usize {
        self.row_pipelines.len()
    }

    pub fn full_communicator_pipeline(&self) -> CommunicatorPipeline {
        self.full.clone()
    }

    /// Next row communicator pipeline, in round-robin order.
    pub fn row_communicator_pipeline(&self) -> CommunicatorPipeline {
        let k = self.next_row.fetch_add(1, Ordering::Relaxed) % self.row_pipelines.len();
        self.row_pipelines[k].clone()
    }

    /// Next column communicator pipeline, in round-robin order.
    pub fn col_communicator_pipeline(&self) -> CommunicatorPipeline {
        let k = self.next_col.fetch_add(1, Ordering::Relaxed) % self.col_pipelines.len();
        self.col_pipelines[k].clone()
    }

    /// Flag raised when any rank of the world fails.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Block-cyclic distribution of a matrix over this grid, starting at rank (0, 0).
    pub fn distribution(&self, size: Size2D, block: Size2D) -> Distribution {
        Distribution::new(size, block, self.size, self.rank, RankIndex::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn test_ordering_roundtrip() {
        let grid = Size2D::new(2, 3);
        for ordering in [GridOrdering::RowMajor, GridOrdering::ColumnMajor] {
            for rank in 0..6 {
                let pos = ordering.position_of(grid, rank);
                assert_eq!(ordering.rank_of(grid, pos), rank);
            }
        }
        assert_eq!(
            GridOrdering::ColumnMajor.position_of(grid, 3),
            RankIndex::new(1, 1)
        );
    }

    #[test]
    fn test_detect_ordering() {
        let grid = Size2D::new(2, 2);
        let row_major: Vec<_> = (0..4).map(|r| RankIndex::new(r / 2, r % 2)).collect();
        let col_major: Vec<_> = (0..4).map(|r| RankIndex::new(r % 2, r / 2)).collect();
        assert_eq!(GridOrdering::detect(grid, &row_major), Ok(GridOrdering::RowMajor));
        assert_eq!(GridOrdering::detect(grid, &col_major), Ok(GridOrdering::ColumnMajor));

        let custom = vec![
            RankIndex::new(1, 1),
            RankIndex::new(0, 0),
            RankIndex::new(0, 1),
            RankIndex::new(1, 0),
        ];
        let err = GridOrdering::detect(grid, &custom).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Rank 0 is placed at grid position (1, 1), which matches neither row-major nor column-major ordering."
        );
        assert!(CommunicatorGrid::world_from_map(grid, &custom, 2).is_err());
    }

    #[test]
    fn test_world_row_and_column_communicators() {
        let world = CommunicatorGrid::world(2, 3, GridOrdering::ColumnMajor, 2);
        assert_eq!(world.len(), 6);
        assert_eq!(world[3].rank(), RankIndex::new(1, 1));

        let sums: Vec<(f64, f64)> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|grid| {
                    s.spawn(move || {
                        let value = (grid.rank().row * 10 + grid.rank().col) as f64;
                        let row = grid.row_communicator_pipeline();
                        let col = grid.col_communicator_pipeline();
                        assert_eq!(row.rank(), grid.rank().col);
                        assert_eq!(col.rank(), grid.rank().row);
                        let mut a = Mat::from_fn(1, 1, |_, _| value);
                        row.communicator().all_reduce_in_place(a.as_mut()).unwrap();
                        let mut b = Mat::from_fn(1, 1, |_, _| value);
                        col.communicator().all_reduce_in_place(b.as_mut()).unwrap();
                        (a[(0, 0)], b[(0, 0)])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (grid, (row_sum, col_sum)) in world.iter().zip(sums) {
            let r = grid.rank().row as f64;
            let c = grid.rank().col as f64;
            assert_eq!(row_sum, 3.0 * 10.0 * r + 3.0);
            assert_eq!(col_sum, 10.0 + 2.0 * c);
        }
    }

    #[test]
    fn test_pipelines_round_robin() {
        let grid = CommunicatorGrid::solo(2);
        assert_eq!(grid.num_pipelines(), 2);
        let a = grid.col_communicator_pipeline();
        let b = grid.col_communicator_pipeline();
        let c = grid.col_communicator_pipeline();
        assert_ne!(a.resource_id(), b.resource_id());
        assert_eq!(a.resource_id(), c.resource_id());
    }
}
