//! Fixed-width message records and control magics.
//!
//! Every record occupies one 8-byte ring slot:
//!
//! ```text
//! byte 0      1      2..=3        4..=7
//!      channel kind   flag (LE)   value (LE)
//! ```
//!
//! Records are copied by value into and out of the rings, never referenced
//! across the shared boundary.

use std::time::Duration;

/// Channel id reserved for link-level control records (DIE, HIGH_OFFSET).
pub const CTRL_CHANNEL: u8 = 0;

/// Flag value that authenticates an OPEN control record.
pub const OPEN_MAGIC: u16 = 0xBEEE;
/// Flag value that authenticates a CLOSE control record.
pub const CLOSE_MAGIC: u16 = 0xEDDD;
/// Flag value that authenticates a HIGH_OFFSET control record.
pub const HIGH_OFFSET_MAGIC: u16 = 0xFEFE;

/// Wait policy for blocking entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately instead of waiting.
    None,
    /// Wait up to the given duration.
    Bounded(Duration),
    /// Wait until the condition holds or the channel closes.
    Infinite,
}

/// Discriminant carried in byte 1 of every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SmsgKind {
    None = 0,
    /// Channel open handshake; must carry [`OPEN_MAGIC`].
    Open = 1,
    /// Channel close notification; carries [`CLOSE_MAGIC`].
    Close = 2,
    Data = 3,
    Event = 4,
    Cmd = 5,
    Done = 6,
    /// Abnormal shutdown notice, no payload.
    Die = 7,
    /// Address correction; `value` holds the offset, flag is
    /// [`HIGH_OFFSET_MAGIC`].
    HighOffset = 8,
}

impl SmsgKind {
    fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => SmsgKind::None,
            1 => SmsgKind::Open,
            2 => SmsgKind::Close,
            3 => SmsgKind::Data,
            4 => SmsgKind::Event,
            5 => SmsgKind::Cmd,
            6 => SmsgKind::Done,
            7 => SmsgKind::Die,
            8 => SmsgKind::HighOffset,
            _ => return None,
        })
    }
}

/// One fixed-width message record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Smsg {
    pub channel: u8,
    pub kind: SmsgKind,
    pub flag: u16,
    pub value: u32,
}

impl Smsg {
    pub const fn new(channel: u8, kind: SmsgKind, flag: u16, value: u32) -> Self {
        Self {
            channel,
            kind,
            flag,
            value,
        }
    }

    /// OPEN handshake record for `channel`.
    pub const fn open(channel: u8) -> Self {
        Self::new(channel, SmsgKind::Open, OPEN_MAGIC, 0)
    }

    /// CLOSE notification record for `channel`.
    pub const fn close(channel: u8) -> Self {
        Self::new(channel, SmsgKind::Close, CLOSE_MAGIC, 0)
    }

    /// Abnormal-shutdown notice on the control channel.
    pub const fn die() -> Self {
        Self::new(CTRL_CHANNEL, SmsgKind::Die, 0, 0)
    }

    /// Address-correction announcement on the control channel.
    pub const fn high_offset(offset: u32) -> Self {
        Self::new(CTRL_CHANNEL, SmsgKind::HighOffset, HIGH_OFFSET_MAGIC, offset)
    }

    /// Data record carrying a 32-bit payload.
    pub const fn data(channel: u8, value: u32) -> Self {
        Self::new(channel, SmsgKind::Data, 0, value)
    }

    /// Packs the record into its ring-slot representation.
    ///
    /// The returned word's in-memory bytes follow the wire layout regardless
    /// of host endianness.
    pub fn to_bits(self) -> u64 {
        let flag = self.flag.to_le_bytes();
        let value = self.value.to_le_bytes();
        u64::from_ne_bytes([
            self.channel,
            self.kind as u8,
            flag[0],
            flag[1],
            value[0],
            value[1],
            value[2],
            value[3],
        ])
    }

    /// Unpacks a ring slot. Returns `None` for an out-of-range kind byte;
    /// the demultiplexer drops such records with a diagnostic.
    pub fn from_bits(bits: u64) -> Option<Self> {
        let bytes = bits.to_ne_bytes();
        let kind = SmsgKind::from_raw(bytes[1])?;
        Some(Self {
            channel: bytes[0],
            kind,
            flag: u16::from_le_bytes([bytes[2], bytes[3]]),
            value: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_follow_the_record_layout() {
        let msg = Smsg::new(5, SmsgKind::Data, 0xABCD, 0x1122_3344);
        let bytes = msg.to_bits().to_ne_bytes();
        assert_eq!(bytes, [5, 3, 0xCD, 0xAB, 0x44, 0x33, 0x22, 0x11]);
        assert_eq!(Smsg::from_bits(msg.to_bits()), Some(msg));
    }

    #[test]
    fn control_constructors_carry_their_magics() {
        assert_eq!(Smsg::open(9).flag, OPEN_MAGIC);
        assert_eq!(Smsg::close(9).flag, CLOSE_MAGIC);
        let hi = Smsg::high_offset(0x1000);
        assert_eq!(hi.channel, CTRL_CHANNEL);
        assert_eq!(hi.flag, HIGH_OFFSET_MAGIC);
        assert_eq!(hi.value, 0x1000);
    }

    #[test]
    fn out_of_range_kind_is_rejected() {
        let bits = u64::from_ne_bytes([1, 0x7F, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Smsg::from_bits(bits), None);
    }
}
