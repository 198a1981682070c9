//! Single-producer/single-consumer record ring over a shared region.
//!
//! Each slot holds one fixed 8-byte record. The two `u32` cursors are
//! free-running: they increment monotonically, wrap modulo 2^32, and the slot
//! index is `cursor & (capacity - 1)`. The cursors are the sole cross-domain
//! synchronization points — a record is stored before the write cursor is
//! published (release) and read only after observing the advanced cursor
//! (acquire). No locks: the outbound ring has exactly one producer (the local
//! endpoint) and the inbound ring exactly one producer (the peer).

use crate::{RingError, RingResult, RingSpec, SharedRegion, RECORD_SIZE};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One direction of the shared message window.
///
/// Cloning yields another handle onto the same cursors and slots; the
/// single-producer/single-consumer discipline is upheld by the endpoint
/// layer, not by this type.
#[derive(Clone, Debug)]
pub struct Ring {
    region: Arc<SharedRegion>,
    spec: RingSpec,
}

impl Ring {
    /// Binds a ring view onto `region` as described by `spec`.
    pub fn new(region: Arc<SharedRegion>, spec: RingSpec) -> RingResult<Self> {
        if spec.capacity == 0 || !spec.capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity {
                requested: spec.capacity,
            });
        }
        region.check_range(spec.base, spec.capacity as usize * RECORD_SIZE, RECORD_SIZE)?;
        region.check_range(spec.read_at, 4, 4)?;
        region.check_range(spec.write_at, 4, 4)?;

        Ok(Self { region, spec })
    }

    /// Record capacity of the ring.
    pub fn capacity(&self) -> u32 {
        self.spec.capacity
    }

    /// Number of records currently buffered.
    pub fn depth(&self) -> u32 {
        let write = self.write_cursor().load(Ordering::Acquire);
        let read = self.read_cursor().load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Current `(write, read)` cursor values, for diagnostics.
    pub fn cursors(&self) -> (u32, u32) {
        (
            self.write_cursor().load(Ordering::Relaxed),
            self.read_cursor().load(Ordering::Relaxed),
        )
    }

    /// Appends one record without blocking.
    ///
    /// Returns `false` when the ring is full. The record bytes are stored
    /// before the write cursor advances, so a consumer that observes the new
    /// cursor value is guaranteed to read the record intact.
    pub fn try_push(&self, record: u64) -> bool {
        let write = self.write_cursor().load(Ordering::Relaxed);
        let read = self.read_cursor().load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.spec.capacity {
            return false;
        }

        self.slot(write).store(record, Ordering::Relaxed);
        self.write_cursor()
            .store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Removes the oldest record without blocking.
    ///
    /// Returns `None` when the ring is empty. Advancing the read cursor with
    /// release ordering publishes the slot back to the producer.
    pub fn try_pop(&self) -> Option<u64> {
        let read = self.read_cursor().load(Ordering::Relaxed);
        let write = self.write_cursor().load(Ordering::Acquire);
        if write == read {
            return None;
        }

        let record = self.slot(read).load(Ordering::Relaxed);
        self.read_cursor()
            .store(read.wrapping_add(1), Ordering::Release);
        Some(record)
    }

    fn slot(&self, cursor: u32) -> &AtomicU64 {
        let index = (cursor & (self.spec.capacity - 1)) as usize;
        self.region
            .atomic_u64_at(self.spec.base + index * RECORD_SIZE)
    }

    fn read_cursor(&self) -> &AtomicU32 {
        self.region.atomic_u32_at(self.spec.read_at)
    }

    fn write_cursor(&self) -> &AtomicU32 {
        self.region.atomic_u32_at(self.spec.write_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use std::collections::VecDeque;
    use std::thread;

    fn ring(capacity: u32) -> Ring {
        let bytes = capacity as usize * RECORD_SIZE + 8;
        let region = Arc::new(SharedRegion::new_zeroed(bytes, 64).expect("region"));
        let spec = RingSpec {
            base: 0,
            read_at: capacity as usize * RECORD_SIZE,
            write_at: capacity as usize * RECORD_SIZE + 4,
            capacity,
        };
        Ring::new(region, spec).expect("ring")
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let region = Arc::new(SharedRegion::new_zeroed(256, 64).expect("region"));
        let spec = RingSpec {
            base: 0,
            read_at: 240,
            write_at: 244,
            capacity: 24,
        };
        assert!(Ring::new(region, spec).is_err());
    }

    /// Pushed records come back out in the order they went in.
    #[test]
    fn fifo_order_is_preserved() {
        let ring = ring(16);
        for value in 0u64..12 {
            assert!(ring.try_push(value));
        }
        for value in 0u64..12 {
            assert_eq!(ring.try_pop(), Some(value));
        }
        assert_eq!(ring.try_pop(), None);
    }

    /// After `capacity` pushes the next push fails; one pop frees one slot.
    #[test]
    fn push_fails_only_when_full() {
        let ring = ring(8);
        for value in 0u64..8 {
            assert!(ring.try_push(value));
        }
        assert!(!ring.try_push(99));
        assert_eq!(ring.depth(), 8);

        assert_eq!(ring.try_pop(), Some(0));
        assert!(ring.try_push(99));
        assert!(!ring.try_push(100));
    }

    /// Free-running cursors stay correct across many wraps of the slot index.
    #[test]
    fn cursors_survive_index_wrap() {
        let ring = ring(4);
        for round in 0u64..1_000 {
            assert!(ring.try_push(round));
            assert_eq!(ring.try_pop(), Some(round));
        }
        let (write, read) = ring.cursors();
        assert_eq!(write, 1_000);
        assert_eq!(read, 1_000);
    }

    /// Two handles onto one region observe each other's records.
    #[test]
    fn peer_handle_sees_producer_records() {
        let producer = ring(8);
        let consumer = producer.clone();

        assert!(producer.try_push(7));
        assert_eq!(consumer.try_pop(), Some(7));
        assert_eq!(consumer.try_pop(), None);
    }

    /// Randomised producer/consumer threads: order and content survive
    /// backpressure and wraparound.
    #[test]
    fn spsc_stress_keeps_order() {
        let ring = ring(32);
        let consumer = ring.clone();

        let mut rng = StdRng::seed_from_u64(0x51BC);
        let mut payloads = VecDeque::new();
        for _ in 0..10_000 {
            payloads.push_back(rng.gen::<u64>());
        }
        let expected: Vec<u64> = payloads.iter().copied().collect();

        let producer_thread = thread::spawn(move || {
            while let Some(value) = payloads.pop_front() {
                while !ring.try_push(value) {
                    thread::yield_now();
                }
            }
        });

        let mut seen = Vec::with_capacity(expected.len());
        while seen.len() < expected.len() {
            match consumer.try_pop() {
                Some(value) => seen.push(value),
                None => thread::yield_now(),
            }
        }

        producer_thread.join().unwrap();
        assert_eq!(seen, expected);
        assert_eq!(consumer.try_pop(), None);
    }
}
