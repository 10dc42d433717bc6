//! Counting barrier that spins for a bounded time before blocking.
//!
//! The panel worker pool crosses a barrier four times per reflector, with very little work
//! in between for narrow panels. Parking and unparking a thread on every crossing would
//! dominate the run time there, so arriving threads first poll the generation counter for
//! up to `busy_wait` and only then sleep on the condition variable.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct SpinBarrier {
    nthreads: usize,
    busy_wait: Duration,
    generation: AtomicUsize,
    arrived: Mutex<usize>,
    cvar: Condvar,
}

impl SpinBarrier {
    pub fn new(nthreads: usize, busy_wait: Duration) -> Self {
        assert!(nthreads > 0, "barrier needs at least one participant");
        Self {
            nthreads,
            busy_wait,
            generation: AtomicUsize::new(0),
            arrived: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    pub fn participants(&self) -> usize {
        self.nthreads
    }

    /// Blocks until all participants have called `wait` for the current generation.
    pub fn wait(&self) {
        let generation = {
            let mut arrived = self.arrived.lock();
            let generation = self.generation.load(Ordering::Acquire);
            *arrived += 1;
            if *arrived == self.nthreads {
                *arrived = 0;
                self.generation.store(generation.wrapping_add(1), Ordering::Release);
                self.cvar.notify_all();
                return;
            }
            generation
        };

        let start = Instant::now();
        while start.elapsed() < self.busy_wait {
            if self.generation.load(Ordering::Acquire) != generation {
                return;
            }
            std::hint::spin_loop();
        }

        let mut arrived = self.arrived.lock();
        while self.generation.load(Ordering::Acquire) == generation {
            self.cvar.wait(&mut arrived);
        }
    }
}
