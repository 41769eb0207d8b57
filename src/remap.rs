//! The transactional core: swap a live code range onto anonymous memory
//! advised to use huge pages.
//!
//! # Self-exclusion invariant
//!
//! [`move_region_to_huge_pages`] replaces the mapping that may hold its own
//! caller's instructions. Between the `MAP_FIXED` replacement and the
//! copy-back, the target addresses hold zero pages, so nothing executing in
//! that window may live there:
//!
//! - the function is placed in a dedicated `.lpstub` linker section so the
//!   locator's `.text` scan never selects it, and is `#[inline(never)]` so
//!   the optimizer cannot fold it back into a caller inside the target;
//! - every helper it uses is `#[inline(always)]` so no call leaves the stub;
//! - the only outward calls are `libc` symbols, which resolve through the
//!   PLT into libc's own mapping, never into the range being replaced.

use core::ffi::c_void;
use core::ptr;

use crate::region::MemRange;
use crate::status::{MapError, RemapStep, Rollback};

/// Read errno without calling back into this binary's code.
#[inline(always)]
unsafe fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Release still-open regions in reverse acquisition order and fold any
/// secondary failure into the returned status, preserving the two-level
/// (failed step × rollback outcome) taxonomy.
///
/// Null pointers mark regions that were never acquired.
#[inline(always)]
unsafe fn unwind(
    step: RemapStep,
    errno: i32,
    target: *mut c_void,
    scratch: *mut c_void,
    len: usize,
) -> MapError {
    let mut rollback = Rollback::Clean;
    if !target.is_null() && unsafe { libc::munmap(target, len) } != 0 {
        rollback = Rollback::TargetLeaked;
    }
    if !scratch.is_null() && unsafe { libc::munmap(scratch, len) } != 0 {
        rollback = match rollback {
            Rollback::TargetLeaked => Rollback::BothLeaked,
            _ => Rollback::ScratchLeaked,
        };
    }
    MapError::Remap {
        step,
        errno,
        rollback,
    }
}

/// Remap `r` onto anonymous huge-page-advised memory, preserving its bytes
/// and ending with read+execute protection at the same virtual addresses.
///
/// `r` must already be aligned and validated. The caller must guarantee that
/// no other thread executes inside `r` for the duration of the call.
#[link_section = ".lpstub"]
#[inline(never)]
pub(crate) fn move_region_to_huge_pages(r: &MemRange) -> Result<(), MapError> {
    let start = r.from as *mut c_void;
    let len = r.len();

    unsafe {
        // Step 1: scratch copy of the original bytes. Nothing to roll back
        // if this fails.
        let scratch = libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if scratch == libc::MAP_FAILED {
            return Err(MapError::Remap {
                step: RemapStep::MapScratch,
                errno: last_errno(),
                rollback: Rollback::Clean,
            });
        }
        ptr::copy_nonoverlapping(r.from as *const u8, scratch.cast::<u8>(), len);

        // Step 2: replace the live mapping in place. Irreversible; from here
        // on the original bytes exist only in scratch.
        let target = libc::mmap(
            start,
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
            -1,
            0,
        );
        if target == libc::MAP_FAILED {
            return Err(unwind(
                RemapStep::MapFixed,
                last_errno(),
                ptr::null_mut(),
                scratch,
                len,
            ));
        }

        // Step 3: ask for huge-page backing before faulting the pages in.
        if libc::madvise(target, len, libc::MADV_HUGEPAGE) != 0 {
            return Err(unwind(
                RemapStep::AdviseHuge,
                last_errno(),
                target,
                scratch,
                len,
            ));
        }

        // Step 4: restore the instructions and drop write permission.
        ptr::copy_nonoverlapping(scratch.cast::<u8>(), start.cast::<u8>(), len);
        if libc::mprotect(start, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
            return Err(unwind(
                RemapStep::Protect,
                last_errno(),
                target,
                scratch,
                len,
            ));
        }

        // Step 5: the region is live again; only the scratch copy remains.
        if libc::munmap(scratch, len) != 0 {
            return Err(MapError::ReleaseScratch {
                errno: last_errno(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{HUGE_PAGE_SIZE, MemRange};

    /// Map a RW arena big enough to carve an aligned huge page out of the
    /// middle, so the remap exercises the full transaction without touching
    /// the test binary's live code.
    fn aligned_arena() -> (MemRange, *mut c_void, usize) {
        let arena_len = 3 * HUGE_PAGE_SIZE;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                arena_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED, "arena mmap failed");
        let from = crate::region::align_up(base as usize);
        (MemRange::new(from, from + HUGE_PAGE_SIZE), base, arena_len)
    }

    fn fill(r: &MemRange) {
        for (i, addr) in (r.from..r.to).enumerate() {
            unsafe { *(addr as *mut u8) = (i % 251) as u8 };
        }
    }

    fn verify(r: &MemRange) {
        for (i, addr) in (r.from..r.to).enumerate() {
            let got = unsafe { *(addr as *const u8) };
            assert_eq!(got, (i % 251) as u8, "byte {i} changed across remap");
        }
    }

    #[test]
    fn synthetic_region_survives_remap_byte_for_byte() {
        let (r, base, arena_len) = aligned_arena();
        fill(&r);
        match move_region_to_huge_pages(&r) {
            Ok(()) => verify(&r),
            // Kernels built without THP refuse the advice; the rollback
            // path is still exercised and must report cleanly.
            Err(MapError::Remap {
                step: RemapStep::AdviseHuge,
                rollback,
                ..
            }) => assert_eq!(rollback, Rollback::Clean),
            Err(other) => panic!("unexpected remap failure {other:?}"),
        }
        unsafe { libc::munmap(base, arena_len) };
    }

    #[test]
    fn remapped_region_ends_up_read_execute() {
        let (r, base, arena_len) = aligned_arena();
        fill(&r);
        if move_region_to_huge_pages(&r).is_ok() {
            // Reading must still work after the protection change.
            let first = unsafe { *(r.from as *const u8) };
            assert_eq!(first, 0);
        }
        unsafe { libc::munmap(base, arena_len) };
    }

    #[test]
    fn stub_lives_outside_the_text_section() {
        // The locator selects `.text*`; the remap stub must not be inside
        // the range it replaces.
        let range = crate::locate::find_text_region(None).unwrap();
        let stub = move_region_to_huge_pages as usize;
        assert!(
            stub < range.from || stub >= range.to,
            "remap stub at {stub:#x} placed inside .text {:#x}-{:#x}",
            range.from,
            range.to
        );
    }
}
