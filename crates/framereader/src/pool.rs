//! Bounded pull-based image pool behind the reader's acquire API.

use std::collections::VecDeque;

/// Raised when a consumer tries to hold more images than configured. A
/// caller-contract violation, never retried internally; recycle first.
#[derive(Debug, thiserror::Error)]
#[error("{acquired} images already acquired (maximum {max})")]
pub struct CapacityError {
    pub acquired: usize,
    pub max: usize,
}

/// One produced frame owned by the pool or, temporarily, by a consumer.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Monotonic production counter, starting at 1.
    pub sequence: u64,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
            sequence: 0,
        }
    }
}

/// Fixed-budget pool with three image states: free (writable), pending
/// (produced, not yet acquired) and acquired (held by the consumer).
///
/// `max` bounds the total images in existence, so a consumer sitting on
/// every image starves the producer instead of growing memory, and the
/// acquire side never blocks: over-budget acquires fail immediately.
pub struct AcquisitionPool<T> {
    max: usize,
    free: Vec<T>,
    pending: VecDeque<T>,
    acquired: usize,
    allocated: usize,
}

impl<T> AcquisitionPool<T> {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            free: Vec::new(),
            pending: VecDeque::new(),
            acquired: 0,
            allocated: 0,
        }
    }

    /// Hands out a writable image for the producer: a free one if any, a
    /// fresh allocation while under budget, else the oldest unconsumed
    /// pending image. `None` means every image is acquired and the frame
    /// must be dropped.
    pub fn writable_or(&mut self, make: impl FnOnce() -> T) -> Option<T> {
        if let Some(image) = self.free.pop() {
            return Some(image);
        }
        if self.allocated < self.max {
            self.allocated += 1;
            return Some(make());
        }
        if let Some(image) = self.pending.pop_front() {
            tracing::debug!("reusing oldest unconsumed image");
            return Some(image);
        }
        None
    }

    /// Publishes a produced image for acquisition.
    pub fn deposit(&mut self, image: T) {
        self.pending.push_back(image);
    }

    /// Takes the newest pending image, recycling every older one. `Ok(None)`
    /// when nothing is pending.
    pub fn acquire_latest(&mut self) -> Result<Option<T>, CapacityError> {
        self.check_capacity()?;
        while self.pending.len() > 1 {
            if let Some(old) = self.pending.pop_front() {
                self.free.push(old);
            }
        }
        match self.pending.pop_back() {
            Some(image) => {
                self.acquired += 1;
                Ok(Some(image))
            }
            None => Ok(None),
        }
    }

    /// Takes the oldest pending image, in production order.
    pub fn acquire_next(&mut self) -> Result<Option<T>, CapacityError> {
        self.check_capacity()?;
        match self.pending.pop_front() {
            Some(image) => {
                self.acquired += 1;
                Ok(Some(image))
            }
            None => Ok(None),
        }
    }

    /// Returns a writable image the producer did not end up filling.
    pub fn restore(&mut self, image: T) {
        self.free.push(image);
    }

    /// Returns an acquired image to the free list.
    pub fn recycle(&mut self, image: T) {
        if self.acquired == 0 {
            tracing::warn!("recycled an image the pool never handed out");
        } else {
            self.acquired -= 1;
        }
        self.free.push(image);
    }

    pub fn acquired(&self) -> usize {
        self.acquired
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    fn check_capacity(&self) -> Result<(), CapacityError> {
        if self.acquired >= self.max {
            return Err(CapacityError {
                acquired: self.acquired,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_pending(max: usize, frames: &[u64]) -> AcquisitionPool<Image> {
        let mut pool = AcquisitionPool::new(max);
        for &sequence in frames {
            let mut image = pool
                .writable_or(|| Image::new(1, 1))
                .expect("pool should have a writable image");
            image.sequence = sequence;
            pool.deposit(image);
        }
        pool
    }

    #[test]
    fn acquire_latest_drains_older_pending_images() {
        let mut pool = pool_with_pending(3, &[1, 2, 3]);
        let image = pool.acquire_latest().unwrap().unwrap();
        assert_eq!(image.sequence, 3);
        // Frames 1 and 2 were recycled, not left pending.
        assert_eq!(pool.pending_len(), 0);
        assert!(pool.acquire_latest().unwrap().is_none());
    }

    #[test]
    fn acquire_next_preserves_production_order() {
        let mut pool = pool_with_pending(4, &[1, 2, 3]);
        assert_eq!(pool.acquire_next().unwrap().unwrap().sequence, 1);
        assert_eq!(pool.acquire_next().unwrap().unwrap().sequence, 2);
        assert_eq!(pool.acquire_next().unwrap().unwrap().sequence, 3);
        assert!(pool.acquire_next().unwrap().is_none());
    }

    #[test]
    fn acquiring_past_the_budget_is_a_capacity_error() {
        let mut pool = pool_with_pending(2, &[1, 2]);
        let first = pool.acquire_next().unwrap().unwrap();
        let _second = pool.acquire_next().unwrap().unwrap();
        let err = pool.acquire_next().unwrap_err();
        assert_eq!(err.acquired, 2);
        assert_eq!(err.max, 2);
        assert!(pool.acquire_latest().is_err());
        // Recycling reopens the budget.
        pool.recycle(first);
        assert!(pool.acquire_next().unwrap().is_none());
    }

    #[test]
    fn single_image_budget_round_trips() {
        let mut pool = pool_with_pending(1, &[1]);
        let image = pool.acquire_latest().unwrap().unwrap();
        assert!(pool.acquire_latest().is_err());
        pool.recycle(image);
        // The recycled image becomes writable again.
        let mut image = pool.writable_or(|| Image::new(1, 1)).unwrap();
        image.sequence = 2;
        pool.deposit(image);
        assert_eq!(pool.acquire_latest().unwrap().unwrap().sequence, 2);
    }

    #[test]
    fn producer_evicts_oldest_pending_when_out_of_free_images() {
        let mut pool = pool_with_pending(2, &[1, 2]);
        // No free images and budget exhausted: the oldest pending frame is
        // sacrificed for the writer.
        let image = pool.writable_or(|| Image::new(1, 1)).unwrap();
        assert_eq!(image.sequence, 1);
        assert_eq!(pool.pending_len(), 1);
    }

    #[test]
    fn producer_starves_only_when_everything_is_acquired() {
        let mut pool = pool_with_pending(1, &[1]);
        let held = pool.acquire_latest().unwrap().unwrap();
        assert!(pool.writable_or(|| Image::new(1, 1)).is_none());
        pool.recycle(held);
        assert!(pool.writable_or(|| Image::new(1, 1)).is_some());
    }

    #[test]
    fn pool_never_exceeds_its_budget() {
        let mut pool: AcquisitionPool<Image> = AcquisitionPool::new(2);
        for sequence in 1..=10u64 {
            if let Some(mut image) = pool.writable_or(|| Image::new(1, 1)) {
                image.sequence = sequence;
                pool.deposit(image);
            }
        }
        assert_eq!(pool.pending_len(), 2);
        assert_eq!(pool.allocated, 2);
    }

    #[test]
    fn foreign_recycle_is_tolerated() {
        let mut pool: AcquisitionPool<Image> = AcquisitionPool::new(1);
        pool.recycle(Image::new(1, 1));
        assert_eq!(pool.acquired(), 0);
    }
}
