//! Element windows over a distributed matrix.

use super::distribution::Distribution;
use super::index::{GlobalElementIndex, GlobalTileIndex, LocalTileIndex, Size2D, SubTileSpec, TileElementIndex};
use crate::types::Coord;

/// The part of a matrix below and right of `offset`.
#[derive(Clone, Debug)]
pub struct SubMatrixView {
    dist: Distribution,
    offset: GlobalElementIndex,
}

impl SubMatrixView {
    pub fn new(dist: &Distribution, offset: GlobalElementIndex) -> Self {
        assert!(
            offset.row <= dist.size().rows && offset.col <= dist.size().cols,
            "view offset {offset:?} outside the matrix"
        );
        Self {
            dist: *dist,
            offset,
        }
    }

    pub fn offset(&self) -> GlobalElementIndex {
        self.offset
    }

    /// First local tile (possibly cut) of the view.
    pub fn begin(&self) -> LocalTileIndex {
        LocalTileIndex::new(
            self.dist
                .next_local_tile_from_global_element(Coord::Row, self.offset.row),
            self.dist
                .next_local_tile_from_global_element(Coord::Col, self.offset.col),
        )
    }

    /// One past the last local tile of the view.
    pub fn end(&self) -> LocalTileIndex {
        let local = self.dist.local_nr_tiles();
        LocalTileIndex::new(local.rows, local.cols)
    }

    /// Window of the local tile `index` that lies inside the view.
    pub fn spec(&self, index: LocalTileIndex) -> SubTileSpec {
        let global = self.dist.global_tile_index(index);
        let size = self.dist.tile_size_of(global);
        let origin = TileElementIndex::new(
            self.cut(Coord::Row, global.row),
            self.cut(Coord::Col, global.col),
        );
        SubTileSpec::new(origin, Size2D::new(size.rows - origin.row, size.cols - origin.col))
    }

    fn cut(&self, coord: Coord, tile: usize) -> usize {
        let first = self
            .dist
            .global_tile_from_global_element(coord, self.offset.get(coord));
        assert!(tile >= first, "tile {tile} lies before the view along {coord:?}");
        if tile == first {
            self.dist
                .tile_element_from_global_element(coord, self.offset.get(coord))
        } else {
            0
        }
    }
}

/// A window `width` columns wide starting at `offset`, contained in a single tile column.
#[derive(Clone, Debug)]
pub struct SubPanelView {
    dist: Distribution,
    offset: GlobalElementIndex,
    col_tile: usize,
    col_origin: usize,
    cols: usize,
}

impl SubPanelView {
    pub fn new(dist: &Distribution, offset: GlobalElementIndex, width: usize) -> Self {
        assert!(
            offset.row <= dist.size().rows && offset.col < dist.size().cols,
            "panel offset {offset:?} outside the matrix"
        );
        let col_tile = dist.global_tile_from_global_element(Coord::Col, offset.col);
        let col_origin = dist.tile_element_from_global_element(Coord::Col, offset.col);
        let cols = width.min(dist.tile_extent(Coord::Col, col_tile) - col_origin);
        Self {
            dist: *dist,
            offset,
            col_tile,
            col_origin,
            cols,
        }
    }

    pub fn offset(&self) -> GlobalElementIndex {
        self.offset
    }

    /// Width of the view, clipped to the matrix.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Local tiles covered by the view on this rank (empty if the rank does not own the
    /// tile column).
    pub fn iter_local(&self) -> impl Iterator<Item = LocalTileIndex> + use<> {
        let (begin, end, col) = match self
            .dist
            .local_tile_from_global_tile(Coord::Col, self.col_tile)
        {
            Some(col) => (
                self.dist
                    .next_local_tile_from_global_element(Coord::Row, self.offset.row),
                self.dist.local_nr_tiles().rows,
                col,
            ),
            None => (0, 0, 0),
        };
        (begin..end.max(begin)).map(move |i| LocalTileIndex::new(i, col))
    }

    pub fn spec(&self, index: LocalTileIndex) -> SubTileSpec {
        let global = self.dist.global_tile_index(index);
        assert_eq!(global.col, self.col_tile, "tile outside the panel column");
        let first_row = self
            .dist
            .global_tile_from_global_element(Coord::Row, self.offset.row);
        assert!(global.row >= first_row, "tile above the panel view");
        let row_origin = if global.row == first_row {
            self.dist
                .tile_element_from_global_element(Coord::Row, self.offset.row)
        } else {
            0
        };
        let rows = self.dist.tile_extent(Coord::Row, global.row) - row_origin;
        SubTileSpec::new(
            TileElementIndex::new(row_origin, self.col_origin),
            Size2D::new(rows, self.cols),
        )
    }

    /// Global index of the tile holding the first element of the view.
    pub fn first_tile(&self) -> GlobalTileIndex {
        self.dist.global_tile_of_element(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::RankIndex;

    #[test]
    fn test_sub_panel_view_mid_tile() {
        let dist = Distribution::local(Size2D::new(9, 9), Size2D::new(3, 3));
        let view = SubPanelView::new(&dist, GlobalElementIndex::new(2, 1), 1);
        assert_eq!(view.cols(), 1);
        let tiles: Vec<_> = view.iter_local().collect();
        assert_eq!(tiles.len(), 3);
        assert_eq!(
            view.spec(tiles[0]),
            SubTileSpec::new(TileElementIndex::new(2, 1), Size2D::new(1, 1))
        );
        assert_eq!(
            view.spec(tiles[2]),
            SubTileSpec::new(TileElementIndex::new(0, 1), Size2D::new(3, 1))
        );
    }

    #[test]
    fn test_sub_panel_view_clipped_width() {
        let dist = Distribution::local(Size2D::new(7, 7), Size2D::new(4, 4));
        let view = SubPanelView::new(&dist, GlobalElementIndex::new(6, 4), 4);
        assert_eq!(view.cols(), 3);
        assert_eq!(view.iter_local().count(), 1);
    }

    #[test]
    fn test_sub_panel_view_on_other_column() {
        let dist = Distribution::new(
            Size2D::new(8, 8),
            Size2D::new(2, 2),
            Size2D::new(1, 2),
            RankIndex::new(0, 1),
            RankIndex::new(0, 0),
        );
        let view = SubPanelView::new(&dist, GlobalElementIndex::new(2, 0), 2);
        assert_eq!(view.iter_local().count(), 0);
        let view = SubPanelView::new(&dist, GlobalElementIndex::new(3, 2), 2);
        let tiles: Vec<_> = view.iter_local().collect();
        assert_eq!(tiles.first(), Some(&LocalTileIndex::new(1, 0)));
        assert_eq!(tiles.len(), 3);
    }

    #[test]
    fn test_sub_matrix_view() {
        let dist = Distribution::local(Size2D::new(9, 9), Size2D::new(3, 3));
        let view = SubMatrixView::new(&dist, GlobalElementIndex::new(4, 4));
        assert_eq!(view.begin(), LocalTileIndex::new(1, 1));
        assert_eq!(view.end(), LocalTileIndex::new(3, 3));
        assert_eq!(
            view.spec(LocalTileIndex::new(1, 1)),
            SubTileSpec::new(TileElementIndex::new(1, 1), Size2D::new(2, 2))
        );
        assert_eq!(
            view.spec(LocalTileIndex::new(2, 1)),
            SubTileSpec::new(TileElementIndex::new(0, 1), Size2D::new(3, 2))
        );
    }
}
