//! Virtual-address ranges and huge-page alignment.

use crate::status::MapError;

/// Huge page size on the reference platform (x86-64 2 MiB THP).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Round `addr` down to a huge-page boundary.
#[inline]
pub(crate) const fn align_down(addr: usize) -> usize {
    addr & !(HUGE_PAGE_SIZE - 1)
}

/// Round `addr` up to a huge-page boundary.
#[inline]
pub(crate) const fn align_up(addr: usize) -> usize {
    align_down(addr.wrapping_add(HUGE_PAGE_SIZE - 1))
}

/// Half-open virtual-address interval `[from, to)`.
///
/// After [`MemRange::align_to_huge_pages`] + [`MemRange::validate`] succeed,
/// both bounds are huge-page aligned, `from < to`, and the range covers at
/// least one huge page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub from: usize,
    pub to: usize,
}

impl MemRange {
    pub const fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// Length in bytes; zero for inverted bounds.
    pub const fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrink the range inward to huge-page boundaries: `from` rounds up,
    /// `to` rounds down. Idempotent.
    pub const fn align_to_huge_pages(self) -> Self {
        Self {
            from: align_up(self.from),
            to: align_down(self.to),
        }
    }

    /// Check the invariants required before remapping, in order: both bounds
    /// non-null and not inverted, then minimum size of one huge page.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.from == 0 || self.to == 0 || self.from > self.to {
            return Err(MapError::InvalidBounds);
        }
        if self.to - self.from < HUGE_PAGE_SIZE {
            return Err(MapError::RegionTooSmall);
        }
        Ok(())
    }

    /// Number of whole huge pages covered by an aligned range.
    pub const fn huge_pages(&self) -> usize {
        self.len() / HUGE_PAGE_SIZE
    }
}
