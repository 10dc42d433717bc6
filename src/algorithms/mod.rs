//! Tiled algorithms.
//!
//! Each algorithm comes in a local flavour, for a matrix stored entirely on the calling
//! process, and a distributed flavour, for a matrix spread over a [`crate::comm::CommunicatorGrid`].
//! Both describe their work as a task graph; the public entry points are in [`crate::solvers`].

pub(crate) mod cholesky;
pub(crate) mod reduction_to_band;
