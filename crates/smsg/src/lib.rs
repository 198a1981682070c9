//! Shared-memory message channels between two independently scheduled
//! processors.
//!
//! An [`Endpoint`] is the local view of one remote-processor link: a pair of
//! single-producer/single-consumer record rings in a shared window, a table
//! of logical channels with an open/close handshake, and blocking send and
//! receive entry points layered over a non-blocking doorbell.
//!
//! The flow: a sender writes an 8-byte [`Smsg`] record onto the outbound
//! ring and rings the [`Doorbell`]; the peer's notification upcall drains
//! its inbound ring through [`Endpoint::on_notified`], which fans records
//! into per-channel caches and wakes blocked receivers. Overflow on either
//! the ring or a cache is an explicit, counted drop — the protocol is
//! best-effort under overload, never fatal.

mod channel;
mod endpoint;
mod error;
mod hooks;
mod msg;
mod registry;

pub use channel::CACHE_DEPTH;
pub use endpoint::{ChannelStats, Endpoint, EndpointConfig, EndpointStats};
pub use error::{SmsgError, SmsgResult};
pub use hooks::{Doorbell, NoopDoorbell, NoopPower, PowerControl};
pub use msg::{
    Smsg, SmsgKind, Timeout, CLOSE_MAGIC, CTRL_CHANNEL, HIGH_OFFSET_MAGIC, OPEN_MAGIC,
};
pub use registry::ChanState;
pub use smsg_ring::{Role, SharedRegion, SHM_WINDOW_SIZE};
