//! Barrier-synchronized worker pool computing the reflectors of one panel.
//!
//! The local tiles of the panel are split in contiguous batches, one per worker. For each
//! column `j`, worker 0 computes the reflector (after an all-reduce of the column norm when
//! the panel spans several ranks), every worker accumulates its share of `w = Pt^H v`,
//! worker 0 sums the shares, and every worker updates its batch of the trailing panel.
//! Barriers separate the steps, so each step only sees results of the previous one.

use super::kernels::{
    compute_reflector_and_tau, compute_w_trailing_panel, compute_x0_and_squares,
    update_trailing_panel,
};
use crate::comm::Communicator;
use crate::error::DlaError;
use crate::runtime::SpinBarrier;
use crate::types::Scalar;
use faer::{Mat, MatMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub(crate) struct PanelWorkers<'c> {
    pub(crate) nworkers: usize,
    pub(crate) busy_wait: Duration,
    /// Communicator spanning the ranks holding a part of the panel, if more than one.
    pub(crate) comm: Option<&'c Communicator>,
}

struct Shared<'a, 'c, T> {
    panel: Vec<Mutex<MatMut<'a, T>>>,
    taus: Mutex<MatMut<'a, T>>,
    w: Vec<Mutex<Mat<T>>>,
    barrier: SpinBarrier,
    failed: AtomicBool,
    error: Mutex<Option<DlaError>>,
    comm: Option<&'c Communicator>,
    has_head: bool,
    cols: usize,
    batch: usize,
}

impl<T: Scalar> Shared<'_, '_, T> {
    fn fail(&self, error: DlaError) {
        self.error.lock().get_or_insert(error);
        self.failed.store(true, Ordering::Release);
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn reflector(&self, j: usize) -> Result<T, DlaError> {
        let x0_and_squares = compute_x0_and_squares(self.has_head, &self.panel, j);
        let x0_and_squares = match self.comm {
            Some(comm) => {
                let mut buffer = Mat::from_fn(2, 1, |i, _| x0_and_squares[i]);
                comm.all_reduce_in_place(buffer.as_mut())?;
                [buffer[(0, 0)], buffer[(1, 0)]]
            }
            None => x0_and_squares,
        };
        Ok(compute_reflector_and_tau(self.has_head, &self.panel, j, x0_and_squares))
    }

    fn reduce_w(&self) -> Result<(), DlaError> {
        let mut w0 = self.w[0].lock();
        for w in &self.w[1..] {
            let w = w.lock();
            for i in 0..w0.nrows() {
                w0[(i, 0)] = w0[(i, 0)] + w[(i, 0)];
            }
        }
        if let Some(comm) = self.comm {
            comm.all_reduce_in_place(w0.as_mut())?;
        }
        Ok(())
    }

    fn work(&self, index: usize) {
        let nrefls = self.taus.lock().nrows();
        let begin = (index * self.batch).min(self.panel.len());
        let end = ((index + 1) * self.batch).min(self.panel.len());
        let has_head = self.has_head && index == 0;

        for j in 0..nrefls {
            if index == 0 {
                match self.reflector(j) {
                    Ok(tau) => self.taus.lock()[(j, 0)] = tau,
                    Err(e) => self.fail(e),
                }
            }
            self.barrier.wait();
            if self.failed() {
                break;
            }

            let pt_cols = self.cols - (j + 1);
            if pt_cols == 0 {
                break;
            }

            let mut w = Mat::zeros(pt_cols, 1);
            compute_w_trailing_panel(has_head, &self.panel, w.as_mut(), j, pt_cols, begin, end);
            *self.w[index].lock() = w;
            self.barrier.wait();

            if index == 0 {
                if let Err(e) = self.reduce_w() {
                    self.fail(e);
                }
            }
            self.barrier.wait();
            if self.failed() {
                break;
            }

            let tau = self.taus.lock()[(j, 0)];
            let w = self.w[0].lock().clone();
            update_trailing_panel(has_head, &self.panel, j, &w, tau, begin, end);
            self.barrier.wait();
        }
    }
}

impl PanelWorkers<'_> {
    /// Computes the reflectors of the first `taus.nrows()` columns of the panel formed by
    /// `tiles`, storing them in place and their `tau` factors in `taus`.
    ///
    /// `cols` is the number of columns of the panel; `has_head` tells whether `tiles[0]`
    /// holds the pivots.
    pub(crate) fn compute_panel<T: Scalar>(
        &self,
        tiles: Vec<MatMut<'_, T>>,
        taus: MatMut<'_, T>,
        cols: usize,
        has_head: bool,
    ) -> Result<(), DlaError> {
        let nworkers = self.nworkers.max(1);
        let ntiles = tiles.len();
        let shared = Shared {
            panel: tiles.into_iter().map(Mutex::new).collect(),
            taus: Mutex::new(taus),
            w: (0..nworkers).map(|_| Mutex::new(Mat::zeros(0, 1))).collect(),
            barrier: SpinBarrier::new(nworkers, self.busy_wait),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            comm: self.comm,
            has_head,
            cols,
            batch: ntiles.div_ceil(nworkers),
        };

        std::thread::scope(|s| {
            for index in 1..nworkers {
                let shared = &shared;
                s.spawn(move || shared.work(index));
            }
            shared.work(0);
        });

        match shared.error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
