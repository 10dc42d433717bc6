//! Tiled, task-parallel dense linear algebra on 2D block-cyclic distributed matrices.
//!
//! Matrices are split in square tiles spread over a grid of ranks ([`matrix::Distribution`]).
//! Each algorithm describes its work as a graph of tile tasks ([`runtime::TaskGraph`]), whose
//! dependencies follow from the tiles every task reads and writes, and runs it on a pool of
//! compute threads. Communication between ranks ([`comm`]) is scheduled in the same graph,
//! on dedicated lanes, so that it overlaps with computation.
//!
//! ## Algorithms
//!
//! **Reduction to band** ([`reduction_to_band`], [`reduction_to_band_distributed`]): reduces
//! a hermitian matrix `A` to a band matrix `B = Q^H A Q` with `band` sub-diagonals. `Q` is
//! returned implicitly as Householder reflectors stored below the band, plus their `tau`
//! factors. This is the first stage of a two-stage hermitian eigensolver.
//!
//! **Cholesky factorization** ([`cholesky_factorization`],
//! [`cholesky_factorization_distributed`]): `A = L L^H` for a hermitian positive definite `A`.
//!
//! Both run on `f32`, `f64`, [`faer::c32`] and [`faer::c64`] matrices.
//!
//! ## Ranks
//!
//! The distributed variants run within a single process: [`comm::CommunicatorGrid::world`]
//! creates one grid handle per rank, and each rank calls the algorithm from its own thread
//! with its own [`runtime::Runtime`].
//!
//! ```rust
//! use tiledla::matrix::{Distribution, Matrix, Size2D};
//! use tiledla::runtime::Runtime;
//! use tiledla::reduction_to_band;
//!
//! let dist = Distribution::local(Size2D::new(8, 8), Size2D::new(4, 4));
//! let mut a = Matrix::from_global_fn(dist, |i, j| 1.0 / (1.0 + i as f64 + j as f64));
//! let taus = reduction_to_band(&Runtime::new(2), &mut a, 2).unwrap();
//! assert_eq!(taus.size(), Size2D::new(5, 1));
//!
//! // Below the band, the lower triangle now holds the reflectors.
//! let b = a.to_dense();
//! assert!(b[(3, 0)].abs() > 0.0);
//! ```

pub mod algorithms;
pub mod blas;
pub mod comm;
pub mod error;
pub mod matrix;
pub mod runtime;
pub mod solvers;
pub mod tune;
pub mod types;
pub mod utils;

pub use error::DlaError;
pub use solvers::{
    cholesky_factorization, cholesky_factorization_distributed, reduction_to_band,
    reduction_to_band_distributed,
};
pub use types::{Scalar, Uplo};
