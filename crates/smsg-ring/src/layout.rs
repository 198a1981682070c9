//! Fixed carve-up of the shared message window.
//!
//! ```text
//! +-------------------+-------------------+----------------------------+
//! | host TX buffer    | host RX buffer    | cursor header              |
//! | 1 KiB, offset 0   | 1 KiB, offset 1K  | tx_rd tx_wr rx_rd rx_wr    |
//! +-------------------+-------------------+----------------------------+
//! ```
//!
//! Both processors agree on this map; a client-role endpoint simply swaps
//! the TX and RX views (its TX buffer is the host's RX buffer, and it
//! produces onto the cursor pair the host consumes from).

use crate::{RingError, RingResult, SharedRegion};

/// Size of one fixed-width message record.
pub const RECORD_SIZE: usize = 8;

const TXBUF_ADDR: usize = 0;
const TXBUF_SIZE: usize = 1024;
const RXBUF_ADDR: usize = TXBUF_SIZE;
const RXBUF_SIZE: usize = 1024;

const RING_HDR: usize = TXBUF_SIZE + RXBUF_SIZE;
const TXBUF_RDPTR: usize = RING_HDR;
const TXBUF_WRPTR: usize = RING_HDR + 4;
const RXBUF_RDPTR: usize = RING_HDR + 8;
const RXBUF_WRPTR: usize = RING_HDR + 12;

/// Record capacity of each direction's ring.
pub const RING_CAPACITY: u32 = (TXBUF_SIZE / RECORD_SIZE) as u32;

/// Minimum region size able to hold both buffers and the cursor header.
pub const SHM_WINDOW_SIZE: usize = RING_HDR + 16;

/// Which end of the link this endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Owns the window layout as drawn above; zeroes it at cold init.
    Host,
    /// Boots later than the host and attaches with TX/RX swapped.
    Client,
}

/// Placement of one ring inside the shared window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingSpec {
    /// Byte offset of the slot array.
    pub base: usize,
    /// Byte offset of the read cursor.
    pub read_at: usize,
    /// Byte offset of the write cursor.
    pub write_at: usize,
    /// Record capacity; must be a power of two.
    pub capacity: u32,
}

/// Resolved TX/RX ring placements for one endpoint role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmLayout {
    /// Ring this endpoint produces onto.
    pub tx: RingSpec,
    /// Ring this endpoint consumes from.
    pub rx: RingSpec,
}

impl ShmLayout {
    /// Computes the ring placements for `role` and validates them against the
    /// region they will live in.
    pub fn for_role(role: Role, region: &SharedRegion) -> RingResult<Self> {
        if region.len() < SHM_WINDOW_SIZE {
            return Err(RingError::BadLayout {
                offset: 0,
                len: SHM_WINDOW_SIZE,
            });
        }

        let host_tx = RingSpec {
            base: TXBUF_ADDR,
            read_at: TXBUF_RDPTR,
            write_at: TXBUF_WRPTR,
            capacity: RING_CAPACITY,
        };
        let host_rx = RingSpec {
            base: RXBUF_ADDR,
            read_at: RXBUF_RDPTR,
            write_at: RXBUF_WRPTR,
            capacity: (RXBUF_SIZE / RECORD_SIZE) as u32,
        };

        let layout = match role {
            Role::Host => Self {
                tx: host_tx,
                rx: host_rx,
            },
            Role::Client => Self {
                tx: host_rx,
                rx: host_tx,
            },
        };

        for spec in [&layout.tx, &layout.rx] {
            region.check_range(spec.base, spec.capacity as usize * RECORD_SIZE, RECORD_SIZE)?;
            region.check_range(spec.read_at, 4, 4)?;
            region.check_range(spec.write_at, 4, 4)?;
        }

        Ok(layout)
    }
}
