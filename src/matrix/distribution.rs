//! 2D block-cyclic distribution of a matrix over a process grid.
//!
//! A matrix of `size` elements is cut into tiles of `block` elements (the last tile along
//! each axis may be smaller). Tile `(i, j)` is owned by the rank at grid position
//! `((i + source.row) % grid.rows, (j + source.col) % grid.cols)`, and each rank stores
//! its tiles in a dense local tile grid, preserving the global order.

use super::index::{GlobalElementIndex, GlobalTileIndex, LocalTileIndex, RankIndex, Size2D};
use crate::types::Coord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Distribution {
    size: Size2D,
    block: Size2D,
    grid: Size2D,
    rank: RankIndex,
    source: RankIndex,
}

impl Distribution {
    /// # Panics
    /// If a block dimension or a grid dimension is zero, or `rank`/`source` lie outside
    /// the grid.
    pub fn new(
        size: Size2D,
        block: Size2D,
        grid: Size2D,
        rank: RankIndex,
        source: RankIndex,
    ) -> Self {
        assert!(block.rows > 0 && block.cols > 0, "block size must be positive");
        assert!(grid.rows > 0 && grid.cols > 0, "grid size must be positive");
        assert!(rank.row < grid.rows && rank.col < grid.cols, "rank outside the grid");
        assert!(source.row < grid.rows && source.col < grid.cols, "source rank outside the grid");
        Self {
            size,
            block,
            grid,
            rank,
            source,
        }
    }

    /// Distribution of a matrix held entirely by one process.
    pub fn local(size: Size2D, block: Size2D) -> Self {
        Self::new(
            size,
            block,
            Size2D::new(1, 1),
            RankIndex::new(0, 0),
            RankIndex::new(0, 0),
        )
    }

    pub fn size(&self) -> Size2D {
        self.size
    }

    pub fn block_size(&self) -> Size2D {
        self.block
    }

    pub fn grid_size(&self) -> Size2D {
        self.grid
    }

    pub fn rank_index(&self) -> RankIndex {
        self.rank
    }

    pub fn source_rank_index(&self) -> RankIndex {
        self.source
    }

    /// Number of global tiles along each axis.
    pub fn nr_tiles(&self) -> Size2D {
        Size2D::new(
            self.size.rows.div_ceil(self.block.rows),
            self.size.cols.div_ceil(self.block.cols),
        )
    }

    /// Number of tiles stored by this rank along each axis.
    pub fn local_nr_tiles(&self) -> Size2D {
        let nr = self.nr_tiles();
        Size2D::new(
            self.next_local_tile_from_global_tile(Coord::Row, nr.rows),
            self.next_local_tile_from_global_tile(Coord::Col, nr.cols),
        )
    }

    /// Offset of this rank from the source rank along `coord`.
    fn rank_offset(&self, coord: Coord) -> usize {
        let grid = self.grid.get(coord);
        (self.rank.get(coord) + grid - self.source.get(coord)) % grid
    }

    pub fn global_tile_from_global_element(&self, coord: Coord, element: usize) -> usize {
        element / self.block.get(coord)
    }

    pub fn tile_element_from_global_element(&self, coord: Coord, element: usize) -> usize {
        element % self.block.get(coord)
    }

    pub fn global_element_from_global_tile(&self, coord: Coord, tile: usize) -> usize {
        tile * self.block.get(coord)
    }

    /// Grid coordinate (along `coord`) of the rank owning global tile `tile`.
    pub fn rank_global_tile(&self, coord: Coord, tile: usize) -> usize {
        (tile + self.source.get(coord)) % self.grid.get(coord)
    }

    /// Local index of global tile `tile`, or `None` if this rank does not own it.
    pub fn local_tile_from_global_tile(&self, coord: Coord, tile: usize) -> Option<usize> {
        if self.rank_global_tile(coord, tile) == self.rank.get(coord) {
            Some(tile / self.grid.get(coord))
        } else {
            None
        }
    }

    pub fn global_tile_from_local_tile(&self, coord: Coord, local: usize) -> usize {
        local * self.grid.get(coord) + self.rank_offset(coord)
    }

    /// Number of local tiles whose global index is strictly smaller than `tile`, i.e. the
    /// local index of the first local tile at or after global tile `tile`.
    pub fn next_local_tile_from_global_tile(&self, coord: Coord, tile: usize) -> usize {
        let offset = self.rank_offset(coord);
        if tile <= offset {
            0
        } else {
            (tile - offset).div_ceil(self.grid.get(coord))
        }
    }

    /// Local index of the first local tile containing or following global element `element`.
    pub fn next_local_tile_from_global_element(&self, coord: Coord, element: usize) -> usize {
        self.next_local_tile_from_global_tile(
            coord,
            self.global_tile_from_global_element(coord, element),
        )
    }

    /// Size along `coord` of global tile `tile`.
    pub fn tile_extent(&self, coord: Coord, tile: usize) -> usize {
        let block = self.block.get(coord);
        let size = self.size.get(coord);
        block.min(size.saturating_sub(tile * block))
    }

    pub fn tile_size_of(&self, index: GlobalTileIndex) -> Size2D {
        Size2D::new(
            self.tile_extent(Coord::Row, index.row),
            self.tile_extent(Coord::Col, index.col),
        )
    }

    pub fn global_tile_index(&self, local: LocalTileIndex) -> GlobalTileIndex {
        GlobalTileIndex::new(
            self.global_tile_from_local_tile(Coord::Row, local.row),
            self.global_tile_from_local_tile(Coord::Col, local.col),
        )
    }

    /// # Panics
    /// If the tile is not owned by this rank.
    pub fn local_tile_index(&self, global: GlobalTileIndex) -> LocalTileIndex {
        let row = self.local_tile_from_global_tile(Coord::Row, global.row);
        let col = self.local_tile_from_global_tile(Coord::Col, global.col);
        match (row, col) {
            (Some(row), Some(col)) => LocalTileIndex::new(row, col),
            _ => panic!("tile {global:?} is not stored by rank {:?}", self.rank),
        }
    }

    pub fn rank_global_tile_index(&self, global: GlobalTileIndex) -> RankIndex {
        RankIndex::new(
            self.rank_global_tile(Coord::Row, global.row),
            self.rank_global_tile(Coord::Col, global.col),
        )
    }

    pub fn is_local(&self, global: GlobalTileIndex) -> bool {
        self.rank_global_tile_index(global) == self.rank
    }

    pub fn global_tile_of_element(&self, element: GlobalElementIndex) -> GlobalTileIndex {
        GlobalTileIndex::new(
            self.global_tile_from_global_element(Coord::Row, element.row),
            self.global_tile_from_global_element(Coord::Col, element.col),
        )
    }

    /// Global element index of element `(row, col)` of global tile `tile`.
    pub fn global_element_index(
        &self,
        tile: GlobalTileIndex,
        row: usize,
        col: usize,
    ) -> GlobalElementIndex {
        GlobalElementIndex::new(tile.row * self.block.rows + row, tile.col * self.block.cols + col)
    }

    /// Same distribution with its axes swapped (size, block, grid and ranks).
    pub fn transposed(&self) -> Self {
        Self::new(
            self.size.transposed(),
            self.block.transposed(),
            self.grid.transposed(),
            self.rank.transposed(),
            self.source.transposed(),
        )
    }
}
