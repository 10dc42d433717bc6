//! Distributed tiled matrices and the views built on top of them.
//!
//! - [`Distribution`] maps global tiles to ranks and local storage slots.
//! - [`Matrix`] stores the tiles owned by the current rank.
//! - [`Panel`] is a one-tile-wide workspace slice aligned with a parent distribution.
//! - [`SubPanelView`] / [`SubMatrixView`] describe element windows starting mid-tile.

pub mod distribution;
pub mod index;
pub mod panel;
pub mod tile;
pub mod views;

pub use distribution::Distribution;
pub use index::{
    GlobalElementIndex, GlobalTileIndex, LocalTileIndex, RankIndex, Size2D, SubTileSpec,
    TileElementIndex,
};
pub use panel::Panel;
pub use tile::{ReadTile, Resource, ResourceId, WorkTile, WriteTile};
pub use views::{SubMatrixView, SubPanelView};

use crate::types::{Coord, Scalar};
use faer::Mat;
use std::sync::Arc;
use tile::TileCell;

/// The tiles of a distributed matrix owned by the current rank.
pub struct Matrix<T> {
    dist: Distribution,
    tiles: Vec<Arc<TileCell<T>>>,
}

impl<T> std::fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("dist", &self.dist)
            .field("local_tiles", &self.tiles.len())
            .finish()
    }
}

impl<T: Scalar> Matrix<T> {
    /// Allocates the local tiles of `dist`, zero initialized.
    pub fn new(dist: Distribution) -> Self {
        Self::from_global_fn(dist, |_, _| T::zero())
    }

    /// Allocates a matrix held entirely by one process.
    pub fn local(size: Size2D, block: Size2D) -> Self {
        Self::new(Distribution::local(size, block))
    }

    /// Allocates the local tiles of `dist`, setting element `(i, j)` of the global matrix
    /// to `f(i, j)`.
    pub fn from_global_fn(dist: Distribution, f: impl Fn(usize, usize) -> T) -> Self {
        let local = dist.local_nr_tiles();
        let mut tiles = Vec::with_capacity(local.linear_size());
        for j in 0..local.cols {
            for i in 0..local.rows {
                let global = dist.global_tile_index(LocalTileIndex::new(i, j));
                let size = dist.tile_size_of(global);
                let origin = dist.global_element_index(global, 0, 0);
                let data = Mat::from_fn(size.rows, size.cols, |r, c| {
                    f(origin.row + r, origin.col + c)
                });
                tiles.push(TileCell::from_mat(data));
            }
        }
        Self { dist, tiles }
    }

    pub fn distribution(&self) -> &Distribution {
        &self.dist
    }

    pub fn size(&self) -> Size2D {
        self.dist.size()
    }

    pub fn block_size(&self) -> Size2D {
        self.dist.block_size()
    }

    fn cell(&self, index: LocalTileIndex) -> &Arc<TileCell<T>> {
        let local = self.dist.local_nr_tiles();
        assert!(
            index.row < local.rows && index.col < local.cols,
            "local tile {index:?} out of range {local:?}"
        );
        &self.tiles[index.row + index.col * local.rows]
    }

    fn full_spec(&self, index: LocalTileIndex) -> SubTileSpec {
        SubTileSpec::full(self.dist.tile_size_of(self.dist.global_tile_index(index)))
    }

    pub fn read(&self, index: LocalTileIndex) -> ReadTile<T> {
        ReadTile::new(Arc::clone(self.cell(index)), self.full_spec(index))
    }

    pub fn readwrite(&mut self, index: LocalTileIndex) -> WriteTile<T> {
        WriteTile::new(Arc::clone(self.cell(index)), self.full_spec(index))
    }

    /// Local tile indices in column-major order.
    pub fn iter_local(&self) -> impl Iterator<Item = LocalTileIndex> + use<T> {
        let local = self.dist.local_nr_tiles();
        (0..local.cols).flat_map(move |j| (0..local.rows).map(move |i| LocalTileIndex::new(i, j)))
    }

    /// Copies of all local tiles, tagged with their global index.
    pub fn local_tiles(&self) -> Vec<(GlobalTileIndex, Mat<T>)> {
        self.iter_local()
            .map(|idx| (self.dist.global_tile_index(idx), self.read(idx).to_mat()))
            .collect()
    }

    /// Dense copy of a matrix stored on a single process.
    ///
    /// # Panics
    /// If the matrix is distributed over more than one rank.
    pub fn to_dense(&self) -> Mat<T> {
        let grid = self.dist.grid_size();
        assert!(
            grid.rows == 1 && grid.cols == 1,
            "to_dense requires a matrix stored on a single rank"
        );
        assemble(self.dist.size(), self.dist.block_size(), &[self.local_tiles()])
    }
}

/// Assembles a global dense matrix from per-rank tile lists.
pub fn assemble<T: Scalar>(
    size: Size2D,
    block: Size2D,
    parts: &[Vec<(GlobalTileIndex, Mat<T>)>],
) -> Mat<T> {
    let mut dense = Mat::zeros(size.rows, size.cols);
    for (global, tile) in parts.iter().flatten() {
        let row0 = global.get(Coord::Row) * block.rows;
        let col0 = global.get(Coord::Col) * block.cols;
        dense
            .as_mut()
            .submatrix_mut(row0, col0, tile.nrows(), tile.ncols())
            .copy_from(tile.as_ref());
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_global_fn_local() {
        let mat = Matrix::from_global_fn(
            Distribution::local(Size2D::new(5, 4), Size2D::new(2, 3)),
            |i, j| (i * 10 + j) as f64,
        );
        let tile = mat.read(LocalTileIndex::new(2, 1)).to_mat();
        assert_eq!((tile.nrows(), tile.ncols()), (1, 1));
        assert_eq!(tile[(0, 0)], 43.0);
        let dense = mat.to_dense();
        assert_eq!(dense[(4, 3)], 43.0);
        assert_eq!(dense[(1, 2)], 12.0);
    }

    #[test]
    fn test_distributed_tiles_assemble() {
        let size = Size2D::new(7, 7);
        let block = Size2D::new(2, 2);
        let grid = Size2D::new(2, 2);
        let mut parts = Vec::new();
        for r in 0..2 {
            for c in 0..2 {
                let dist =
                    Distribution::new(size, block, grid, RankIndex::new(r, c), RankIndex::new(1, 0));
                let mat = Matrix::from_global_fn(dist, |i, j| (i + 100 * j) as f32);
                parts.push(mat.local_tiles());
            }
        }
        let dense = assemble(size, block, &parts);
        for i in 0..7 {
            for j in 0..7 {
                assert_eq!(dense[(i, j)], (i + 100 * j) as f32);
            }
        }
    }

    #[test]
    fn test_readwrite_updates_storage() {
        let mut mat = Matrix::<f64>::local(Size2D::new(3, 3), Size2D::new(2, 2));
        let tile = mat.readwrite(LocalTileIndex::new(1, 0));
        tile.lock().view_mut()[(0, 1)] = 5.0;
        assert_eq!(mat.to_dense()[(2, 1)], 5.0);
    }
}
