//! Shared-memory primitives for the smsg inter-processor messaging core.
//!
//! This crate knows nothing about channels or lifecycle; it provides the
//! pieces the protocol layer is built on:
//! * [`SharedRegion`] – aligned, zeroed backing memory with typed atomic
//!   accessors, the only sanctioned way to touch bytes shared with the peer.
//! * [`Ring`] – single-producer/single-consumer queue of fixed 8-byte
//!   records driven by two free-running `u32` cursors.
//! * [`ShmLayout`] – the fixed carve-up of the shared window into TX/RX
//!   buffers and their cursor header, including the host/client role swap.
//! * [`wait`] – futex-style wait/notify shims used by the upper layer.

mod error;
mod layout;
mod region;
mod ring;
pub mod wait;

pub use error::{RingError, RingResult};
pub use layout::{Role, RingSpec, ShmLayout, RECORD_SIZE, RING_CAPACITY, SHM_WINDOW_SIZE};
pub use region::SharedRegion;
pub use ring::Ring;
