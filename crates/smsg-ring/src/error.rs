//! Error handling helpers for the primitives crate.
//!
//! The surface is intentionally small: allocation failures and layout
//! validation. The protocol layer above translates ring-full/empty into its
//! own error taxonomy rather than threading errors through here.

use std::fmt;

/// Convenience result alias for fallible primitive operations.
pub type RingResult<T, E = RingError> = Result<T, E>;

#[derive(Debug)]
/// Errors surfaced by the shared-memory primitives.
pub enum RingError {
    /// Ring capacity is zero or not a power of two.
    InvalidCapacity { requested: u32 },
    /// A cursor or slot range falls outside the region or is misaligned.
    BadLayout { offset: usize, len: usize },
    /// Allocation of a shared region failed for the given size/alignment pair.
    AllocationFailed { size: usize, alignment: usize },
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::InvalidCapacity { requested } => {
                write!(f, "ring capacity {requested} must be a nonzero power of two")
            }
            RingError::BadLayout { offset, len } => {
                write!(
                    f,
                    "range at offset {offset} (len {len}) is misaligned or outside the region"
                )
            }
            RingError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate shared region of {size} bytes aligned to {alignment}"
                )
            }
        }
    }
}

impl std::error::Error for RingError {}
