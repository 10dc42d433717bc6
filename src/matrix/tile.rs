//! Tile storage and capability handles.
//!
//! A tile's data lives in a [`TileCell`]: a `faer::Mat` behind a `parking_lot::RwLock`
//! together with a process-unique [`ResourceId`]. Algorithms never touch cells directly;
//! they obtain a [`ReadTile`] or a [`WriteTile`] from a matrix or a panel and hand it to a
//! task. The handle type declares the access mode to the task graph, the `ResourceId`
//! identifies the dependency edge, and the [`SubTileSpec`] restricts the handle to a
//! rectangular window of the tile without copying.

use super::index::{Size2D, SubTileSpec, TileElementIndex};
use crate::types::Scalar;
use faer::{Mat, MatMut, MatRef};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a schedulable resource (a tile or a communicator pipeline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ResourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Anything a task can declare an access to.
pub trait Resource {
    fn resource_id(&self) -> ResourceId;
}

pub(crate) struct TileCell<T> {
    id: ResourceId,
    data: RwLock<Mat<T>>,
}

impl<T: Scalar> TileCell<T> {
    pub(crate) fn zeros(size: Size2D) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::fresh(),
            data: RwLock::new(Mat::zeros(size.rows, size.cols)),
        })
    }

    pub(crate) fn from_mat(data: Mat<T>) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::fresh(),
            data: RwLock::new(data),
        })
    }

    pub(crate) fn size(&self) -> Size2D {
        let data = self.data.read();
        Size2D::new(data.nrows(), data.ncols())
    }
}

fn compose(outer: SubTileSpec, inner: SubTileSpec) -> SubTileSpec {
    assert!(
        inner.origin.row + inner.size.rows <= outer.size.rows
            && inner.origin.col + inner.size.cols <= outer.size.cols,
        "sub-tile {inner:?} does not fit in {outer:?}"
    );
    SubTileSpec::new(
        TileElementIndex::new(
            outer.origin.row + inner.origin.row,
            outer.origin.col + inner.origin.col,
        ),
        inner.size,
    )
}

/// Read-only handle on (a window of) a tile.
pub struct ReadTile<T> {
    cell: Arc<TileCell<T>>,
    spec: SubTileSpec,
}

/// Exclusive read-write handle on (a window of) a tile.
pub struct WriteTile<T> {
    cell: Arc<TileCell<T>>,
    spec: SubTileSpec,
}

impl<T> Clone for ReadTile<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            spec: self.spec,
        }
    }
}

impl<T: Scalar> ReadTile<T> {
    pub(crate) fn new(cell: Arc<TileCell<T>>, spec: SubTileSpec) -> Self {
        Self { cell, spec }
    }

    pub fn size(&self) -> Size2D {
        self.spec.size
    }

    /// Restricts the handle to `spec`, relative to the current window.
    pub fn split(self, spec: SubTileSpec) -> Self {
        Self {
            spec: compose(self.spec, spec),
            cell: self.cell,
        }
    }

    pub fn lock(&self) -> TileReadGuard<'_, T> {
        TileReadGuard {
            guard: self.cell.data.read(),
            spec: self.spec,
        }
    }

    /// Copy of the window contents.
    pub fn to_mat(&self) -> Mat<T> {
        self.lock().view().to_owned()
    }
}

impl<T: Scalar> WriteTile<T> {
    pub(crate) fn new(cell: Arc<TileCell<T>>, spec: SubTileSpec) -> Self {
        Self { cell, spec }
    }

    pub fn size(&self) -> Size2D {
        self.spec.size
    }

    /// Restricts the handle to `spec`, relative to the current window.
    pub fn split(self, spec: SubTileSpec) -> Self {
        Self {
            spec: compose(self.spec, spec),
            cell: self.cell,
        }
    }

    /// Downgrades to a read handle on the same window.
    pub fn into_read(self) -> ReadTile<T> {
        ReadTile {
            cell: self.cell,
            spec: self.spec,
        }
    }

    pub fn lock(&self) -> TileWriteGuard<'_, T> {
        TileWriteGuard {
            guard: self.cell.data.write(),
            spec: self.spec,
        }
    }
}

impl<T> Resource for ReadTile<T> {
    fn resource_id(&self) -> ResourceId {
        self.cell.id
    }
}

impl<T> Resource for WriteTile<T> {
    fn resource_id(&self) -> ResourceId {
        self.cell.id
    }
}

impl<T> Resource for Arc<TileCell<T>> {
    fn resource_id(&self) -> ResourceId {
        self.id
    }
}

pub struct TileReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, Mat<T>>,
    spec: SubTileSpec,
}

impl<T: Scalar> TileReadGuard<'_, T> {
    pub fn view(&self) -> MatRef<'_, T> {
        let SubTileSpec { origin, size } = self.spec;
        let data: &Mat<T> = &self.guard;
        data.as_ref()
            .submatrix(origin.row, origin.col, size.rows, size.cols)
    }
}

pub struct TileWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, Mat<T>>,
    spec: SubTileSpec,
}

impl<T: Scalar> TileWriteGuard<'_, T> {
    pub fn view(&self) -> MatRef<'_, T> {
        let SubTileSpec { origin, size } = self.spec;
        let data: &Mat<T> = &self.guard;
        data.as_ref()
            .submatrix(origin.row, origin.col, size.rows, size.cols)
    }

    pub fn view_mut(&mut self) -> MatMut<'_, T> {
        let SubTileSpec { origin, size } = self.spec;
        let data: &mut Mat<T> = &mut self.guard;
        data.as_mut()
            .submatrix_mut(origin.row, origin.col, size.rows, size.cols)
    }
}

/// A standalone tile not belonging to any matrix (T factors, W2, Cholesky diagonal copies).
pub struct WorkTile<T> {
    cell: Arc<TileCell<T>>,
}

impl<T: Scalar> WorkTile<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            cell: TileCell::zeros(Size2D::new(rows, cols)),
        }
    }

    pub fn size(&self) -> Size2D {
        self.cell.size()
    }

    pub fn read(&self) -> ReadTile<T> {
        ReadTile::new(Arc::clone(&self.cell), SubTileSpec::full(self.size()))
    }

    pub fn readwrite(&mut self) -> WriteTile<T> {
        WriteTile::new(Arc::clone(&self.cell), SubTileSpec::full(self.size()))
    }
}
