//! One-tile-wide workspace slices aligned with a parent distribution.
//!
//! A column panel (`axis == Coord::Col`) has one tile per tile-row of the parent matrix;
//! a row panel (`axis == Coord::Row`) has one tile per tile-column and stores each tile
//! transposed, so both kinds share the same tile shape: `extent x width`, where `extent`
//! runs along the parent's rows (column panel) or columns (row panel).
//!
//! Only the tiles belonging to the current rank exist. Each of them either lives in the
//! panel's own storage or is a read-only link to a tile of another object (`set_tile`).

use super::distribution::Distribution;
use super::index::{GlobalElementIndex, LocalTileIndex, Size2D, SubTileSpec, TileElementIndex};
use super::tile::{ReadTile, TileCell, WriteTile};
use crate::types::{Coord, Scalar};
use std::sync::Arc;

pub struct Panel<T> {
    axis: Coord,
    dist: Distribution,
    start_element: usize,
    end_tile: usize,
    width: usize,
    internal: Vec<Arc<TileCell<T>>>,
    external: Vec<Option<ReadTile<T>>>,
}

impl<T: Scalar> Panel<T> {
    /// Creates a panel spanning the whole parent range along its running axis.
    pub fn new(axis: Coord, dist: Distribution) -> Self {
        let coord = axis.orthogonal();
        let nlocal = dist.local_nr_tiles().get(coord);
        let storage = Size2D::new(dist.block_size().get(coord), dist.block_size().get(axis));
        Self {
            axis,
            dist,
            start_element: 0,
            end_tile: dist.nr_tiles().get(coord),
            width: dist.block_size().get(axis),
            internal: (0..nlocal).map(|_| TileCell::zeros(storage)).collect(),
            external: (0..nlocal).map(|_| None).collect(),
        }
    }

    pub fn axis(&self) -> Coord {
        self.axis
    }

    /// The parent coordinate along which the panel's tiles are laid out.
    pub fn coord(&self) -> Coord {
        self.axis.orthogonal()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.dist
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Global element offset (along [`Panel::coord`]) where the range starts.
    pub fn range_start(&self) -> usize {
        self.start_element
    }

    pub fn range_start_tile(&self) -> usize {
        self.dist
            .global_tile_from_global_element(self.coord(), self.start_element)
    }

    pub fn range_end_tile(&self) -> usize {
        self.end_tile
    }

    /// Moves the start of the range to the given element offset, which may fall inside a
    /// tile: the first tile of the range is then cut accordingly.
    pub fn set_range_start(&mut self, offset: GlobalElementIndex) {
        let coord = self.coord();
        let start = offset.get(coord);
        assert!(
            start <= self.dist.size().get(coord),
            "panel range start {start} outside parent extent"
        );
        self.start_element = start;
    }

    /// Sets the (exclusive) global end tile of the range.
    pub fn set_range_end(&mut self, end_tile: usize) {
        assert!(
            end_tile <= self.dist.nr_tiles().get(self.coord()),
            "panel range end {end_tile} outside parent tile range"
        );
        self.end_tile = end_tile;
    }

    pub fn set_range(&mut self, start: GlobalElementIndex, end_tile: usize) {
        self.set_range_start(start);
        self.set_range_end(end_tile);
    }

    /// Restricts the panel width (the height, for a row panel).
    pub fn set_width(&mut self, width: usize) {
        assert!(
            width <= self.dist.block_size().get(self.axis),
            "panel width {width} larger than the block size"
        );
        self.width = width;
    }

    /// Local indices of the tiles inside the current range.
    pub fn iter_local(&self) -> impl Iterator<Item = LocalTileIndex> + use<T> {
        let coord = self.coord();
        let begin = self
            .dist
            .next_local_tile_from_global_tile(coord, self.range_start_tile());
        let end = self.dist.next_local_tile_from_global_tile(coord, self.end_tile);
        (begin..end.max(begin)).map(move |k| LocalTileIndex::from_coord(coord, k, 0))
    }

    pub fn is_empty(&self) -> bool {
        self.iter_local().next().is_none()
    }

    fn local_slot(&self, index: LocalTileIndex) -> usize {
        let coord = self.coord();
        let k = index.get(coord);
        let global = self.dist.global_tile_from_local_tile(coord, k);
        assert!(
            global >= self.range_start_tile() && global < self.end_tile,
            "panel tile {global} outside range [{}, {})",
            self.range_start_tile(),
            self.end_tile
        );
        k
    }

    /// Window of the storage tile that the panel tile at local index `k` exposes.
    fn spec(&self, k: usize) -> SubTileSpec {
        let coord = self.coord();
        let global = self.dist.global_tile_from_local_tile(coord, k);
        let cut = if global == self.range_start_tile() {
            self.dist
                .tile_element_from_global_element(coord, self.start_element)
        } else {
            0
        };
        let extent = self.dist.tile_extent(coord, global) - cut;
        SubTileSpec::new(TileElementIndex::new(cut, 0), Size2D::new(extent, self.width))
    }

    /// Size of the panel tile at `index`.
    pub fn tile_size(&self, index: LocalTileIndex) -> Size2D {
        self.spec(self.local_slot(index)).size
    }

    pub fn read(&self, index: LocalTileIndex) -> ReadTile<T> {
        let k = self.local_slot(index);
        match &self.external[k] {
            Some(tile) => tile.clone(),
            None => ReadTile::new(Arc::clone(&self.internal[k]), self.spec(k)),
        }
    }

    /// # Panics
    /// If the tile is a link set with [`Panel::set_tile`].
    pub fn readwrite(&mut self, index: LocalTileIndex) -> WriteTile<T> {
        let k = self.local_slot(index);
        assert!(
            self.external[k].is_none(),
            "cannot write a panel tile linked to external storage"
        );
        WriteTile::new(Arc::clone(&self.internal[k]), self.spec(k))
    }

    /// Makes the panel tile at `index` a read-only alias of `tile`.
    pub fn set_tile(&mut self, index: LocalTileIndex, tile: ReadTile<T>) {
        let k = self.local_slot(index);
        let expected = self.spec(k).size;
        assert_eq!(tile.size(), expected, "linked tile has the wrong size");
        self.external[k] = Some(tile);
    }

    /// Drops all links and restores the full range and default width. The panel's own
    /// storage is kept for the next use.
    pub fn reset(&mut self) {
        for link in &mut self.external {
            *link = None;
        }
        self.start_element = 0;
        self.end_tile = self.dist.nr_tiles().get(self.coord());
        self.width = self.dist.block_size().get(self.axis);
    }
}
