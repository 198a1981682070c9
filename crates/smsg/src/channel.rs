//! Per-channel local record cache and receive-side waiting.
//!
//! The demultiplexer fans inbound records into this cache from notification
//! context; `recv` callers drain it in FIFO order. The cache is bounded and
//! local-processor-only: overflow is an explicit, counted drop, never
//! wraparound corruption.

use crate::msg::Smsg;
use crate::{SmsgError, SmsgResult};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Depth of each channel's local record cache. Power of two.
pub const CACHE_DEPTH: u32 = 32;

struct Cache {
    records: [Smsg; CACHE_DEPTH as usize],
    rd: u32,
    wr: u32,
}

impl Cache {
    fn new() -> Self {
        Self {
            records: [Smsg::new(0, crate::SmsgKind::None, 0, 0); CACHE_DEPTH as usize],
            rd: 0,
            wr: 0,
        }
    }

    fn len(&self) -> u32 {
        self.wr.wrapping_sub(self.rd)
    }

    fn push(&mut self, msg: Smsg) -> bool {
        if self.len() >= CACHE_DEPTH {
            return false;
        }
        self.records[(self.wr & (CACHE_DEPTH - 1)) as usize] = msg;
        self.wr = self.wr.wrapping_add(1);
        true
    }

    fn pop(&mut self) -> Option<Smsg> {
        if self.len() == 0 {
            return None;
        }
        let msg = self.records[(self.rd & (CACHE_DEPTH - 1)) as usize];
        self.rd = self.rd.wrapping_add(1);
        Some(msg)
    }
}

/// Runtime state of one open channel.
pub(crate) struct Channel {
    cache: Mutex<Cache>,
    rxwait: Condvar,
    /// Serialises concurrent `recv` callers.
    rxlock: Mutex<()>,
    dropped: AtomicU32,
    delivered: AtomicU32,
}

impl Channel {
    pub(crate) fn new() -> Self {
        Self {
            cache: Mutex::new(Cache::new()),
            rxwait: Condvar::new(),
            rxlock: Mutex::new(()),
            dropped: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
        }
    }

    /// Delivers one inbound record and wakes any blocked receiver.
    ///
    /// Returns `false` when the cache was full and the record was dropped.
    pub(crate) fn deliver(&self, msg: Smsg) -> bool {
        let mut cache = self.cache.lock();
        let stored = cache.push(msg);
        if stored {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // Notify while still holding the cache lock so a receiver between
        // its predicate check and its park cannot miss the wakeup.
        self.rxwait.notify_all();
        stored
    }

    /// Wakes every blocked receiver so it can observe a lifecycle change.
    pub(crate) fn wake_all(&self) {
        let _cache = self.cache.lock();
        self.rxwait.notify_all();
    }

    /// Non-blocking receive. `Busy` when another receiver holds the channel,
    /// `NoData` when the cache is empty.
    pub(crate) fn try_recv(&self, channel_id: u8) -> SmsgResult<Smsg> {
        let guard = self.rxlock.try_lock().ok_or(SmsgError::Busy)?;
        let msg = self.cache.lock().pop().ok_or(SmsgError::NoData);
        drop(guard);
        tracing::trace!(channel = channel_id, ok = msg.is_ok(), "try_recv");
        msg
    }

    /// Blocking receive with an optional deadline.
    ///
    /// `is_free` reports whether the channel has entered its draining state;
    /// a positive answer wins over buffered records and yields `Closed`.
    pub(crate) fn recv_blocking<F>(
        &self,
        deadline: Option<Instant>,
        is_free: F,
    ) -> SmsgResult<Smsg>
    where
        F: Fn() -> bool,
    {
        let _guard = self.rxlock.lock();
        let mut cache = self.cache.lock();
        loop {
            if is_free() {
                return Err(SmsgError::Closed);
            }
            if let Some(msg) = cache.pop() {
                return Ok(msg);
            }
            match deadline {
                Some(deadline) => {
                    if self.rxwait.wait_until(&mut cache, deadline).timed_out() {
                        return Err(SmsgError::Timeout);
                    }
                }
                None => self.rxwait.wait(&mut cache),
            }
        }
    }

    /// Records dropped because the cache was full.
    pub(crate) fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records successfully placed into the cache.
    pub(crate) fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Records currently buffered.
    pub(crate) fn depth(&self) -> u32 {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn overflow_drops_exactly_the_excess() {
        let ch = Channel::new();
        for value in 0..CACHE_DEPTH + 1 {
            ch.deliver(Smsg::data(7, value));
        }
        assert_eq!(ch.dropped(), 1);
        assert_eq!(ch.depth(), CACHE_DEPTH);

        for value in 0..CACHE_DEPTH {
            assert_eq!(ch.try_recv(7).unwrap().value, value);
        }
        assert_eq!(ch.try_recv(7), Err(SmsgError::NoData));
    }

    #[test]
    fn bounded_wait_times_out_on_empty_cache() {
        let ch = Channel::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(
            ch.recv_blocking(Some(deadline), || false),
            Err(SmsgError::Timeout)
        );
    }

    #[test]
    fn delivery_wakes_a_blocked_receiver() {
        let ch = Arc::new(Channel::new());
        let rx = Arc::clone(&ch);
        let handle = thread::spawn(move || rx.recv_blocking(None, || false));

        // Give the receiver a moment to park before delivering.
        thread::sleep(Duration::from_millis(10));
        ch.deliver(Smsg::data(3, 42));
        assert_eq!(handle.join().unwrap().unwrap().value, 42);
    }

    #[test]
    fn free_state_wins_over_buffered_records() {
        let ch = Channel::new();
        ch.deliver(Smsg::data(3, 1));
        assert_eq!(ch.recv_blocking(None, || true), Err(SmsgError::Closed));
    }

    proptest! {
        /// The cache behaves as a bounded FIFO: arbitrary interleavings of
        /// deliveries and receives match a queue model that drops at depth.
        #[test]
        fn cache_matches_bounded_queue_model(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let ch = Channel::new();
            let mut model: VecDeque<u32> = VecDeque::new();
            let mut next = 0u32;
            let mut model_dropped = 0u32;

            for push in ops {
                if push {
                    let stored = ch.deliver(Smsg::data(1, next));
                    if model.len() < CACHE_DEPTH as usize {
                        prop_assert!(stored);
                        model.push_back(next);
                    } else {
                        prop_assert!(!stored);
                        model_dropped += 1;
                    }
                    next += 1;
                } else {
                    match (ch.try_recv(1), model.pop_front()) {
                        (Ok(msg), Some(expected)) => prop_assert_eq!(msg.value, expected),
                        (Err(SmsgError::NoData), None) => {}
                        (got, want) => prop_assert!(false, "cache {:?} vs model {:?}", got, want),
                    }
                }
            }
            prop_assert_eq!(ch.dropped(), model_dropped);
            prop_assert_eq!(ch.depth() as usize, model.len());
        }
    }
}
