//! Backing memory for the shared message window.
//!
//! The original transport maps a physical window shared with the remote
//! processor; here the window is an anonymous `mmap` (with a heap fallback
//! when the mapping is not suitably aligned) so both halves of a link can be
//! driven inside one process. Bytes that the peer also writes are only ever
//! touched through the typed atomic accessors; plain slice access is reserved
//! for cold initialisation before the peer is attached.

use crate::{RingError, RingResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64};

#[derive(Debug)]
enum Backing {
    Native(memmap2::MmapMut),
    Owned { ptr: NonNull<u8>, layout: Layout },
}

impl Backing {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Backing::Native(map) => map.as_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }
}

/// Aligned, zero-initialised memory window shared between the two ring ends.
#[derive(Debug)]
pub struct SharedRegion {
    len: usize,
    alignment: usize,
    backing: Backing,
}

// SAFETY: concurrent access to the region goes exclusively through the
// `&AtomicU32`/`&AtomicU64` views handed out below; the raw pointer itself is
// never exposed mutably after construction.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocates a zeroed region of `len` bytes aligned to `alignment`.
    ///
    /// An anonymous `mmap` is tried first (page aligned); if the returned
    /// pointer does not satisfy the requested alignment the allocation falls
    /// back to the heap.
    pub fn new_zeroed(len: usize, alignment: usize) -> RingResult<Self> {
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(RingError::AllocationFailed {
                size: len,
                alignment,
            });
        }

        if let Some(backing) = Self::mmap_backed(len, alignment)? {
            return Ok(Self {
                len,
                alignment,
                backing,
            });
        }

        let layout = Layout::from_size_align(len, alignment).map_err(|_| {
            RingError::AllocationFailed {
                size: len,
                alignment,
            }
        })?;
        // SAFETY: `layout` has nonzero size, validated above.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(RingError::AllocationFailed {
            size: len,
            alignment,
        })?;

        Ok(Self {
            len,
            alignment,
            backing: Backing::Owned { ptr, layout },
        })
    }

    fn mmap_backed(len: usize, alignment: usize) -> RingResult<Option<Backing>> {
        let mut map = memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| RingError::AllocationFailed {
                size: len,
                alignment,
            })?;

        let ptr = map.as_mut_ptr();
        if ptr as usize % alignment != 0 {
            return Ok(None);
        }

        // Anonymous mappings are already zero-filled; make that explicit for
        // the cold-init contract.
        unsafe {
            // SAFETY: the mapping exposes exactly `len` writable bytes.
            ptr::write_bytes(ptr, 0, len);
        }

        Ok(Some(Backing::Native(map)))
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the alignment the region was allocated with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Validates that `[offset, offset + len)` lies inside the region and is
    /// aligned to `align`.
    pub fn check_range(&self, offset: usize, len: usize, align: usize) -> RingResult<()> {
        let end = offset
            .checked_add(len)
            .ok_or(RingError::BadLayout { offset, len })?;
        if end > self.len || offset % align != 0 {
            return Err(RingError::BadLayout { offset, len });
        }
        Ok(())
    }

    /// Atomic `u32` view of the word at `offset`.
    ///
    /// # Panics
    /// Panics when the offset is misaligned or out of bounds; callers are
    /// expected to have validated their layout with [`Self::check_range`]
    /// at construction time.
    pub fn atomic_u32_at(&self, offset: usize) -> &AtomicU32 {
        self.check_range(offset, size_of::<AtomicU32>(), align_of::<AtomicU32>())
            .unwrap_or_else(|err| panic!("atomic_u32_at: {err}"));
        // SAFETY: range and alignment checked above; all concurrent access to
        // shared words goes through these atomic views.
        unsafe { &*(self.backing.as_ptr().add(offset) as *const AtomicU32) }
    }

    /// Atomic `u64` view of the word at `offset`.
    ///
    /// # Panics
    /// Same contract as [`Self::atomic_u32_at`].
    pub fn atomic_u64_at(&self, offset: usize) -> &AtomicU64 {
        self.check_range(offset, size_of::<AtomicU64>(), align_of::<AtomicU64>())
            .unwrap_or_else(|err| panic!("atomic_u64_at: {err}"));
        // SAFETY: range and alignment checked above.
        unsafe { &*(self.backing.as_ptr().add(offset) as *const AtomicU64) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Owned { ptr, layout } = &self.backing {
            // SAFETY: pointer and layout come from the matching `alloc_zeroed`.
            unsafe {
                dealloc(ptr.as_ptr(), *layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn region_is_zeroed_and_aligned() {
        let region = SharedRegion::new_zeroed(4096, 64).expect("create region");
        assert_eq!(region.len(), 4096);
        assert_eq!(region.backing.as_ptr() as usize % 64, 0);
        for offset in (0..4096).step_by(8) {
            assert_eq!(region.atomic_u64_at(offset).load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn range_validation_rejects_overflow_and_misalignment() {
        let region = SharedRegion::new_zeroed(64, 8).expect("create region");
        assert!(region.check_range(0, 64, 4).is_ok());
        assert!(region.check_range(62, 4, 4).is_err());
        assert!(region.check_range(2, 4, 4).is_err());
        assert!(region.check_range(usize::MAX, 8, 8).is_err());
    }

    #[test]
    fn zero_length_region_is_rejected() {
        assert!(SharedRegion::new_zeroed(0, 8).is_err());
        assert!(SharedRegion::new_zeroed(64, 3).is_err());
    }
}
