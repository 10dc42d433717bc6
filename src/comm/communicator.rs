//! In-process communicators.
//!
//! A communicator connects `size` ranks with one FIFO channel per ordered pair of ranks.
//! Messages are whole `faer::Mat` values, so every transfer is an explicit copy, as it
//! would be across address spaces. All ranks of a group must issue the collectives of a
//! communicator in the same order; the task graph guarantees this by running every
//! operation of a communicator on one lane, in submission order.

use crate::error::{DlaError, DlaErrorKind};
use crate::types::Scalar;
use faer::prelude::{Reborrow, ReborrowMut};
use faer::{Mat, MatMut, MatRef};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

type Envelope = Box<dyn Any + Send>;

/// How often a blocked receive checks whether the run was aborted.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(2);

pub struct Communicator {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Envelope>>,
    receivers: Vec<Mutex<Receiver<Envelope>>>,
    abort: Arc<AtomicBool>,
}

impl Communicator {
    /// Creates the `size` endpoints of a new group. Endpoint `r` has rank `r`.
    pub(crate) fn group(size: usize, abort: &Arc<AtomicBool>) -> Vec<Communicator> {
        let mut senders: Vec<Vec<Sender<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Mutex<Receiver<Envelope>>>> =
            (0..size).map(|_| Vec::new()).collect();
        // Channel (src -> dst): src keeps the sender at slot dst, dst the receiver at slot src.
        for src_senders in senders.iter_mut() {
            for dst_receivers in receivers.iter_mut() {
                let (tx, rx) = mpsc::channel();
                src_senders.push(tx);
                dst_receivers.push(Mutex::new(rx));
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Communicator {
                rank,
                size,
                senders,
                receivers,
                abort: Arc::clone(abort),
            })
            .collect()
    }

    /// A communicator containing only the calling rank.
    pub fn solo() -> Communicator {
        let abort = Arc::new(AtomicBool::new(false));
        Self::group(1, &abort).remove(0)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn abort_flag(&self) -> &Arc<AtomicBool> {
        &self.abort
    }

    pub fn send<T: Scalar>(&self, dest: usize, data: Mat<T>) -> Result<(), DlaError> {
        self.senders[dest].send(Box::new(data)).map_err(|_| {
            DlaErrorKind::Communication(format!("rank {dest} is no longer reachable")).into()
        })
    }

    pub fn recv<T: Scalar>(&self, source: usize) -> Result<Mat<T>, DlaError> {
        let receiver = self.receivers[source].lock();
        loop {
            match receiver.recv_timeout(ABORT_POLL_INTERVAL) {
                Ok(message) => {
                    return message.downcast::<Mat<T>>().map(|m| *m).map_err(|_| {
                        DlaErrorKind::Communication(format!(
                            "unexpected message type received from rank {source}"
                        ))
                        .into()
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.abort.load(Ordering::Acquire) {
                        return Err(DlaErrorKind::Aborted.into());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DlaErrorKind::Communication(format!(
                        "rank {source} hung up"
                    ))
                    .into());
                }
            }
        }
    }

    fn recv_into<T: Scalar>(&self, source: usize, mut dst: MatMut<'_, T>) -> Result<(), DlaError> {
        let data = self.recv::<T>(source)?;
        if data.nrows() != dst.nrows() || data.ncols() != dst.ncols() {
            return Err(DlaErrorKind::Communication(format!(
                "received a {}x{} block from rank {source}, expected {}x{}",
                data.nrows(),
                data.ncols(),
                dst.nrows(),
                dst.ncols()
            ))
            .into());
        }
        dst.copy_from(data.as_ref());
        Ok(())
    }

    /// Root side of a broadcast: sends `data` to every other rank.
    pub fn bcast_send<T: Scalar>(&self, data: MatRef<'_, T>) -> Result<(), DlaError> {
        for dest in (0..self.size).filter(|&r| r != self.rank) {
            self.send(dest, data.to_owned())?;
        }
        Ok(())
    }

    /// Receiving side of a broadcast from `root`.
    pub fn bcast_recv<T: Scalar>(&self, root: usize, dst: MatMut<'_, T>) -> Result<(), DlaError> {
        self.recv_into(root, dst)
    }

    /// Contribution of a non-root rank to a sum reduction.
    pub fn reduce_send<T: Scalar>(&self, root: usize, data: MatRef<'_, T>) -> Result<(), DlaError> {
        self.send(root, data.to_owned())
    }

    /// Root side of a sum reduction: replaces `data` with the sum of all contributions,
    /// accumulated in ascending rank order.
    pub fn reduce_recv_in_place<T: Scalar>(&self, mut data: MatMut<'_, T>) -> Result<(), DlaError> {
        let (nrows, ncols) = (data.nrows(), data.ncols());
        let mut acc = Mat::<T>::zeros(nrows, ncols);
        for source in 0..self.size {
            let contribution = if source == self.rank {
                data.rb().to_owned()
            } else {
                let m = self.recv::<T>(source)?;
                if m.nrows() != nrows || m.ncols() != ncols {
                    return Err(DlaErrorKind::Communication(format!(
                        "reduction block from rank {source} has the wrong shape"
                    ))
                    .into());
                }
                m
            };
            for j in 0..ncols {
                for i in 0..nrows {
                    acc[(i, j)] = acc[(i, j)] + contribution[(i, j)];
                }
            }
        }
        data.copy_from(acc.as_ref());
        Ok(())
    }

    /// Sum all-reduction. Every rank ends up with bitwise identical data.
    pub fn all_reduce_in_place<T: Scalar>(&self, mut data: MatMut<'_, T>) -> Result<(), DlaError> {
        if self.size == 1 {
            return Ok(());
        }
        if self.rank == 0 {
            self.reduce_recv_in_place(data.rb_mut())?;
            self.bcast_send(data.rb())
        } else {
            self.reduce_send(0, data.rb())?;
            self.bcast_recv(0, data)
        }
    }
}
