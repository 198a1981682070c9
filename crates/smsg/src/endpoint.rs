//! One endpoint of an inter-processor message link.
//!
//! The [`Endpoint`] owns the shared window, both ring views, the channel
//! table, and everything needed to run the protocol: the open/close
//! handshake, the send path, blocking receives, and the receive
//! demultiplexer invoked from notification context.

use crate::channel::Channel;
use crate::hooks::{Doorbell, PowerControl};
use crate::msg::{Smsg, SmsgKind, Timeout, HIGH_OFFSET_MAGIC, OPEN_MAGIC};
use crate::registry::{BusyGuard, ChanState, Registry, Slot, SmsgCallback};
use crate::{SmsgError, SmsgResult};
use parking_lot::Mutex;
use smsg_ring::{wait, Ring, Role, SharedRegion, ShmLayout};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long delivered records keep the processor out of low-power idle.
const RX_HOLD: Duration = Duration::from_millis(500);

/// Static description of one endpoint, built by the subsystem initialiser.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Link name used in diagnostics.
    pub name: String,
    /// Which end of the shared window this endpoint plays.
    pub role: Role,
    /// Channel ids traffic is accepted for; everything else is rejected.
    pub channels: Vec<u8>,
    /// Address correction announced to the peer at startup when nonzero.
    /// Only meaningful for the host role.
    pub dst_high_offset: u32,
}

/// Snapshot of one channel's delivery counters.
#[derive(Clone, Copy, Debug)]
pub struct ChannelStats {
    pub channel: u8,
    pub state: ChanState,
    pub delivered: u32,
    pub dropped: u32,
    pub depth: u32,
}

/// Snapshot of the whole endpoint, successor to the old debugfs dump.
#[derive(Clone, Debug)]
pub struct EndpointStats {
    pub tx_depth: u32,
    pub rx_depth: u32,
    pub invalid: u32,
    pub channels: Vec<ChannelStats>,
}

/// Local view of one remote-processor link.
pub struct Endpoint {
    name: String,
    tx: Ring,
    rx: Ring,
    /// Serialises ring pushes and the doorbell that follows them.
    tx_lock: Mutex<()>,
    registry: Registry,
    doorbell: Arc<dyn Doorbell>,
    power: Arc<dyn PowerControl>,
    /// 1 while the endpoint is suspended; senders park on this word.
    suspended: AtomicU32,
    /// Address correction announced by the peer.
    high_offset: AtomicU32,
    /// Inbound records that could not be routed.
    invalid: AtomicU32,
    announce: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Builds an endpoint over `region` and, for a host configured with a
    /// nonzero offset, spawns the one-shot high-offset announcement.
    pub fn new(
        config: EndpointConfig,
        region: Arc<SharedRegion>,
        doorbell: Arc<dyn Doorbell>,
        power: Arc<dyn PowerControl>,
    ) -> SmsgResult<Arc<Self>> {
        let layout = ShmLayout::for_role(config.role, &region).map_err(|err| {
            warn!(name = %config.name, %err, "shared window rejected");
            SmsgError::NoDevice
        })?;
        let tx = Ring::new(Arc::clone(&region), layout.tx).map_err(|_| SmsgError::NoDevice)?;
        let rx = Ring::new(region, layout.rx).map_err(|_| SmsgError::NoDevice)?;

        let endpoint = Arc::new(Self {
            name: config.name,
            tx,
            rx,
            tx_lock: Mutex::new(()),
            registry: Registry::new(&config.channels),
            doorbell,
            power,
            suspended: AtomicU32::new(0),
            high_offset: AtomicU32::new(0),
            invalid: AtomicU32::new(0),
            announce: Mutex::new(None),
        });
        info!(name = %endpoint.name, role = ?config.role, "endpoint created");

        if config.role == Role::Host && config.dst_high_offset != 0 {
            endpoint.spawn_announce(config.dst_high_offset);
        }

        Ok(endpoint)
    }

    fn spawn_announce(self: &Arc<Self>, offset: u32) {
        let endpoint = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("smsg-announce-{}", self.name))
            .spawn(move || {
                match endpoint.push_control(Smsg::high_offset(offset), Timeout::None) {
                    Ok(()) => debug!(name = %endpoint.name, offset, "sent high offset to peer"),
                    Err(err) => warn!(name = %endpoint.name, %err, "high offset announce failed"),
                }
            });
        match spawned {
            Ok(handle) => *self.announce.lock() = Some(handle),
            Err(err) => warn!(name = %self.name, %err, "could not spawn announce thread"),
        }
    }

    /// Joins background work. Call once at subsystem teardown.
    pub fn shutdown(&self) {
        if let Some(handle) = self.announce.lock().take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "announce thread panicked");
            }
        }
    }

    /// Address correction announced by the peer, zero until received.
    pub fn high_offset(&self) -> u32 {
        self.high_offset.load(Ordering::Acquire)
    }

    /// Marks the endpoint suspended; subsequent sends park until resume.
    pub fn suspend(&self) {
        self.suspended.store(1, Ordering::Release);
    }

    /// Clears the suspend flag and wakes parked senders.
    pub fn resume(&self) {
        self.suspended.store(0, Ordering::Release);
        wait::wake_all(&self.suspended);
    }

    fn wait_resumed(&self) {
        while self.suspended.load(Ordering::Acquire) == 1 {
            wait::wait_u32(&self.suspended, 1);
        }
    }

    /// Registers the synchronous delivery callback for `channel`.
    pub fn register_callback<F>(&self, channel: u8, callback: F) -> SmsgResult<()>
    where
        F: Fn(&Smsg) + Send + Sync + 'static,
    {
        let slot = self.slot(channel)?;
        *slot.callback.lock() = Some(Arc::new(callback) as SmsgCallback);
        Ok(())
    }

    /// Removes the delivery callback for `channel`.
    pub fn unregister_callback(&self, channel: u8) -> SmsgResult<()> {
        let slot = self.slot(channel)?;
        *slot.callback.lock() = None;
        Ok(())
    }

    /// Drops the pending receive-side activity hold for `channel`.
    pub fn wake_unlock(&self, channel: u8) -> SmsgResult<()> {
        let slot = self.slot(channel)?;
        slot.channel().ok_or(SmsgError::InvalidState(channel))?;
        self.power.release();
        Ok(())
    }

    /// Opens `channel` with the two-phase handshake.
    ///
    /// Succeeds immediately when the peer's OPEN already arrived
    /// (`ClientOpened`); otherwise sends OPEN and waits, bounded by
    /// `timeout`, for the peer's matching OPEN. Every failure rolls the
    /// slot back to `Unused` and releases the channel.
    pub fn open(&self, channel: u8, timeout: Timeout) -> SmsgResult<()> {
        let slot = self.slot(channel)?;
        {
            let mut chan = slot.chan.lock();
            if chan.is_some() {
                return Err(SmsgError::InvalidState(channel));
            }
            *chan = Some(Arc::new(Channel::new()));
        }
        let pin = slot.pin();

        info!(name = %self.name, channel, "sending open");
        if let Err(err) = self.send(Smsg::open(channel), timeout) {
            warn!(name = %self.name, channel, %err, "open send failed");
            self.abort_open(slot, pin);
            return Err(err);
        }

        // The peer's OPEN may have raced ahead of ours; the demultiplexer
        // then already advanced the slot.
        if slot.state() != ChanState::ClientOpened {
            slot.set_state(ChanState::HostOpened);
            loop {
                match self.recv(channel, timeout) {
                    Ok(msg) if msg.kind == SmsgKind::Open && msg.flag == OPEN_MAGIC => break,
                    Ok(other) => {
                        debug!(name = %self.name, channel, ?other, "ignoring pre-open record");
                    }
                    Err(err) => {
                        warn!(name = %self.name, channel, %err, "open handshake failed");
                        self.abort_open(slot, pin);
                        return Err(err);
                    }
                }
            }
        }

        slot.set_state(ChanState::Opened);
        info!(name = %self.name, channel, "channel opened");
        Ok(())
    }

    fn abort_open(&self, slot: &Slot, pin: BusyGuard<'_>) {
        slot.set_state(ChanState::Unused);
        *slot.chan.lock() = None;
        drop(pin);
        // The channel must not be recycled while a notification is
        // mid-flight on it.
        slot.wait_idle();
    }

    /// Closes `channel`: best-effort CLOSE notification, wake every blocked
    /// receiver, drain the busy pins, then release the slot.
    pub fn close(&self, channel: u8, timeout: Timeout) -> SmsgResult<()> {
        let slot = self.slot(channel)?;
        let Some(chan) = slot.channel() else {
            return Ok(());
        };

        if let Err(err) = self.send(Smsg::close(channel), timeout) {
            info!(name = %self.name, channel, %err, "close notify failed, ignoring");
        }

        slot.set_state(ChanState::Free);
        chan.wake_all();
        slot.wait_idle();

        *slot.chan.lock() = None;
        slot.set_state(ChanState::Unused);
        info!(name = %self.name, channel, "channel closed");
        Ok(())
    }

    /// Writes one record onto the outbound ring and rings the doorbell.
    ///
    /// Non-control records require the channel to be fully `Opened`. A full
    /// ring fails immediately with `RingFull`; retry policy belongs to the
    /// caller. The only bounded wait here is acquiring the send permit.
    pub fn send(&self, msg: Smsg, timeout: Timeout) -> SmsgResult<()> {
        let slot = self.slot(msg.channel)?;
        if slot.channel().is_none() {
            return Err(SmsgError::InvalidState(msg.channel));
        }
        if slot.state() != ChanState::Opened
            && !matches!(msg.kind, SmsgKind::Open | SmsgKind::Close)
        {
            return Err(SmsgError::InvalidState(msg.channel));
        }

        self.wait_resumed();
        self.push_control(msg, timeout)
    }

    /// Informs the peer of abnormal shutdown. Failures are logged and
    /// swallowed; shutdown must not itself fail.
    pub fn send_die(&self, timeout: Timeout) {
        if let Err(err) = self.push_control(Smsg::die(), timeout) {
            warn!(name = %self.name, %err, "die notify failed, ignoring");
        } else {
            info!(name = %self.name, "sent die");
        }
    }

    /// Raw push + doorbell, skipping channel lifecycle checks. Used by the
    /// control plane (DIE, HIGH_OFFSET) and by `send` after validation.
    fn push_control(&self, msg: Smsg, timeout: Timeout) -> SmsgResult<()> {
        self.power.request_tx(timeout)?;
        let result = {
            let _tx = self.tx_lock.lock();
            if self.tx.try_push(msg.to_bits()) {
                debug!(name = %self.name, channel = msg.channel, kind = ?msg.kind, "sent record");
                self.doorbell.ring();
                Ok(())
            } else {
                warn!(name = %self.name, channel = msg.channel, "outbound ring full");
                Err(SmsgError::RingFull)
            }
        };
        self.power.release_tx();
        result
    }

    /// Pops one record from `channel`'s local cache.
    ///
    /// `Timeout::None` never blocks (`Busy` on receiver contention,
    /// `NoData` on an empty cache); the blocking variants return `Closed`
    /// as soon as the channel enters `Free`, or `Timeout` at the deadline.
    pub fn recv(&self, channel: u8, timeout: Timeout) -> SmsgResult<Smsg> {
        let slot = self.slot(channel)?;
        let _pin = slot.pin();

        let chan = slot.channel().ok_or(SmsgError::InvalidState(channel))?;
        match timeout {
            Timeout::None => chan.try_recv(channel),
            Timeout::Infinite => chan.recv_blocking(None, || slot.state() == ChanState::Free),
            Timeout::Bounded(wait) => chan.recv_blocking(Some(Instant::now() + wait), || {
                slot.state() == ChanState::Free
            }),
        }
    }

    /// Receive demultiplexer; the notification upcall. Drains the inbound
    /// ring and fans records into their channels without unbounded blocking.
    pub fn on_notified(&self) {
        while let Some(bits) = self.rx.try_pop() {
            match Smsg::from_bits(bits) {
                Some(msg) => self.dispatch(msg),
                None => {
                    self.invalid.fetch_add(1, Ordering::Relaxed);
                    info!(name = %self.name, bits, "dropping record with invalid kind");
                }
            }
        }
    }

    fn dispatch(&self, msg: Smsg) {
        debug!(
            name = %self.name,
            channel = msg.channel,
            kind = ?msg.kind,
            flag = msg.flag,
            value = msg.value,
            "inbound record"
        );

        if msg.kind == SmsgKind::HighOffset && msg.flag == HIGH_OFFSET_MAGIC {
            self.high_offset.store(msg.value, Ordering::Release);
            info!(name = %self.name, offset = msg.value, "peer announced high offset");
            return;
        }

        let Some(slot) = self.registry.slot(msg.channel) else {
            self.invalid.fetch_add(1, Ordering::Relaxed);
            info!(name = %self.name, channel = msg.channel, "dropping record for unknown channel");
            return;
        };

        // Pin the slot so a concurrent close cannot recycle it before this
        // delivery finishes; the guard drops strictly last.
        let _pin = slot.pin();

        let Some(chan) = slot.channel() else {
            if slot.state() == ChanState::Unused
                && msg.kind == SmsgKind::Open
                && msg.flag == OPEN_MAGIC
            {
                // Peer connected first; the local open call will find the
                // handshake already half done.
                slot.set_state(ChanState::ClientOpened);
                info!(name = %self.name, channel = msg.channel, "peer opened first");
            } else {
                self.invalid.fetch_add(1, Ordering::Relaxed);
                info!(
                    name = %self.name,
                    channel = msg.channel,
                    kind = ?msg.kind,
                    "dropping record for unopened channel"
                );
            }
            return;
        };

        if !chan.deliver(msg) {
            info!(
                name = %self.name,
                channel = msg.channel,
                kind = ?msg.kind,
                "receive cache full, record dropped"
            );
        }

        let callback = slot.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&msg);
        }

        self.power.hold(RX_HOLD);
    }

    /// Counters for one channel.
    pub fn channel_stats(&self, channel: u8) -> SmsgResult<ChannelStats> {
        let slot = self.slot(channel)?;
        Ok(Self::snapshot_slot(slot))
    }

    /// Endpoint-wide snapshot for diagnostics.
    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            tx_depth: self.tx.depth(),
            rx_depth: self.rx.depth(),
            invalid: self.invalid.load(Ordering::Relaxed),
            channels: self
                .registry
                .slots()
                .iter()
                .map(Self::snapshot_slot)
                .collect(),
        }
    }

    fn snapshot_slot(slot: &Slot) -> ChannelStats {
        let (delivered, dropped, depth) = match slot.channel() {
            Some(chan) => (chan.delivered(), chan.dropped(), chan.depth()),
            None => (0, 0, 0),
        };
        ChannelStats {
            channel: slot.id,
            state: slot.state(),
            delivered,
            dropped,
            depth,
        }
    }

    fn slot(&self, channel: u8) -> SmsgResult<&Slot> {
        self.registry
            .slot(channel)
            .ok_or(SmsgError::NotFound(channel))
    }
}
