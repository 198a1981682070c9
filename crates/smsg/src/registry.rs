//! Fixed channel table and the busy-pin discipline.
//!
//! One slot exists per channel id configured at endpoint construction; ids
//! outside the table are rejected up front. The busy counter pins a slot's
//! channel against concurrent teardown: the demultiplexer and `recv` hold a
//! [`BusyGuard`] while touching the channel, and the close path parks on the
//! counter until the last guard drops. The channel itself is `Arc`-owned, so
//! memory safety never rests on the counter alone; the counter preserves the
//! protocol guarantee that a slot is not recycled mid-delivery.

use crate::channel::Channel;
use crate::msg::Smsg;
use parking_lot::Mutex;
use smsg_ring::wait;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

const INVALID_INDEX: u8 = 0xFF;

/// Lifecycle state of one channel slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChanState {
    /// Initial and terminal state.
    Unused = 0,
    /// Local open sent, awaiting the peer's OPEN.
    HostOpened = 1,
    /// Peer's OPEN arrived before the local open call; a legitimate race.
    ClientOpened = 2,
    /// Fully established.
    Opened = 3,
    /// Close initiated, draining waiters.
    Free = 4,
}

impl ChanState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ChanState::HostOpened,
            2 => ChanState::ClientOpened,
            3 => ChanState::Opened,
            4 => ChanState::Free,
            _ => ChanState::Unused,
        }
    }
}

/// Synchronous per-channel delivery callback, invoked from notification
/// context for every inbound record addressed to the channel.
pub type SmsgCallback = Arc<dyn Fn(&Smsg) + Send + Sync>;

/// Runtime slot for one registered channel id.
pub(crate) struct Slot {
    pub(crate) id: u8,
    state: AtomicU8,
    busy: AtomicU32,
    pub(crate) chan: Mutex<Option<Arc<Channel>>>,
    pub(crate) callback: Mutex<Option<SmsgCallback>>,
}

impl Slot {
    fn new(id: u8) -> Self {
        Self {
            id,
            state: AtomicU8::new(ChanState::Unused as u8),
            busy: AtomicU32::new(0),
            chan: Mutex::new(None),
            callback: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ChanState {
        ChanState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ChanState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Clone of the slot's channel, if one is allocated.
    pub(crate) fn channel(&self) -> Option<Arc<Channel>> {
        self.chan.lock().clone()
    }

    /// Pins the slot against teardown for the guard's lifetime.
    pub(crate) fn pin(&self) -> BusyGuard<'_> {
        self.busy.fetch_add(1, Ordering::AcqRel);
        BusyGuard { slot: self }
    }

    /// Parks until every pin has been released.
    pub(crate) fn wait_idle(&self) {
        loop {
            let pinned = self.busy.load(Ordering::Acquire);
            if pinned == 0 {
                return;
            }
            wait::wait_u32(&self.busy, pinned);
        }
    }

    #[cfg(test)]
    pub(crate) fn busy_count(&self) -> u32 {
        self.busy.load(Ordering::Acquire)
    }
}

/// RAII busy pin; the release happens strictly after every touch of the
/// pinned channel.
pub(crate) struct BusyGuard<'a> {
    slot: &'a Slot,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.slot.busy.fetch_sub(1, Ordering::AcqRel) == 1 {
            wait::wake_all(&self.slot.busy);
        }
    }
}

/// Fixed table mapping channel ids to slots.
pub(crate) struct Registry {
    slots: Vec<Slot>,
    index: [u8; 256],
}

impl Registry {
    /// Builds the table from the configured channel list. Duplicate ids
    /// collapse onto one slot.
    pub(crate) fn new(channels: &[u8]) -> Self {
        let mut index = [INVALID_INDEX; 256];
        let mut slots = Vec::with_capacity(channels.len());
        for &id in channels {
            if index[id as usize] != INVALID_INDEX {
                continue;
            }
            index[id as usize] = slots.len() as u8;
            slots.push(Slot::new(id));
        }
        Self { slots, index }
    }

    pub(crate) fn slot(&self, channel: u8) -> Option<&Slot> {
        let idx = self.index[channel as usize];
        if idx == INVALID_INDEX {
            return None;
        }
        Some(&self.slots[idx as usize])
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
