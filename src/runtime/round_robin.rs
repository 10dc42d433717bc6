//! Fixed-capacity pool of reusable resources handed out cyclically.

pub struct RoundRobin<R> {
    items: Vec<R>,
    next: usize,
}

impl<R> RoundRobin<R> {
    /// Builds a pool of `capacity` resources using `make`.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize, make: impl FnMut() -> R) -> Self {
        assert!(capacity > 0, "round robin capacity must be positive");
        Self {
            items: std::iter::repeat_with(make).take(capacity).collect(),
            next: 0,
        }
    }

    /// Returns the next resource in the cycle.
    pub fn next_resource(&mut self) -> &mut R {
        let idx = self.next;
        self.next = (self.next + 1) % self.items.len();
        &mut self.items[idx]
    }

    /// The resource returned by the latest call to `next_resource`.
    pub fn current_resource(&mut self) -> &mut R {
        let idx = (self.next + self.items.len() - 1) % self.items.len();
        &mut self.items[idx]
    }

    pub fn capacity(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_through_items() {
        let mut counter = 0;
        let mut rr = RoundRobin::new(2, || {
            counter += 1;
            counter
        });
        assert_eq!(rr.capacity(), 2);
        assert_eq!(*rr.next_resource(), 1);
        assert_eq!(*rr.current_resource(), 1);
        assert_eq!(*rr.next_resource(), 2);
        assert_eq!(*rr.next_resource(), 1);
        *rr.current_resource() = 10;
        assert_eq!(*rr.next_resource(), 2);
        assert_eq!(*rr.next_resource(), 10);
    }
}
