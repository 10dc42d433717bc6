//! Strongly typed 2D indices and sizes.
//!
//! Tile and element coordinates live in different index spaces (global tiles, local tiles,
//! global elements, elements inside one tile, process ranks in a grid). Each space gets its
//! own type so that a local tile index can never be passed where a global one is expected.

use crate::types::Coord;

macro_rules! index_2d {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            pub row: usize,
            pub col: usize,
        }

        impl $name {
            pub const fn new(row: usize, col: usize) -> Self {
                Self { row, col }
            }

            /// Builds an index from its component along `coord` and the orthogonal one.
            pub fn from_coord(coord: Coord, along: usize, other: usize) -> Self {
                match coord {
                    Coord::Row => Self::new(along, other),
                    Coord::Col => Self::new(other, along),
                }
            }

            pub fn get(&self, coord: Coord) -> usize {
                match coord {
                    Coord::Row => self.row,
                    Coord::Col => self.col,
                }
            }

            pub fn set(&mut self, coord: Coord, value: usize) {
                match coord {
                    Coord::Row => self.row = value,
                    Coord::Col => self.col = value,
                }
            }

            pub fn transposed(self) -> Self {
                Self::new(self.col, self.row)
            }
        }

        impl From<(usize, usize)> for $name {
            fn from((row, col): (usize, usize)) -> Self {
                Self::new(row, col)
            }
        }
    };
}

index_2d!(
    /// Index of a tile in the global tile grid.
    GlobalTileIndex
);
index_2d!(
    /// Index of a tile among the tiles stored by the current rank.
    LocalTileIndex
);
index_2d!(
    /// Index of an element of the global matrix.
    GlobalElementIndex
);
index_2d!(
    /// Index of an element inside a tile.
    TileElementIndex
);
index_2d!(
    /// Position of a process in the 2D process grid.
    RankIndex
);

/// Size of a 2D object: a matrix, a tile, a block or a process grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size2D {
    pub rows: usize,
    pub cols: usize,
}

impl Size2D {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn get(&self, coord: Coord) -> usize {
        match coord {
            Coord::Row => self.rows,
            Coord::Col => self.cols,
        }
    }

    pub fn set(&mut self, coord: Coord, value: usize) {
        match coord {
            Coord::Row => self.rows = value,
            Coord::Col => self.cols = value,
        }
    }

    pub fn transposed(self) -> Self {
        Self::new(self.cols, self.rows)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn linear_size(&self) -> usize {
        self.rows * self.cols
    }

    /// `true` if `index` lies inside a region of this size.
    pub fn contains(&self, index: GlobalElementIndex) -> bool {
        index.row < self.rows && index.col < self.cols
    }
}

/// Rectangular sub-region of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubTileSpec {
    pub origin: TileElementIndex,
    pub size: Size2D,
}

impl SubTileSpec {
    pub const fn new(origin: TileElementIndex, size: Size2D) -> Self {
        Self { origin, size }
    }

    /// Window covering a whole tile of the given size.
    pub const fn full(size: Size2D) -> Self {
        Self::new(TileElementIndex::new(0, 0), size)
    }
}
