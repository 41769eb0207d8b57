//! Remap the hot code of a running process onto transparent huge pages.
//!
//! Large code footprints thrash the instruction TLB; backing the `.text`
//! section with 2 MiB pages instead of 4 KiB ones cuts iTLB misses on hot
//! paths. This crate performs that relocation once, early in process life:
//! it finds the code range of the main executable (or a named shared
//! object) from its ELF section headers, aligns the range to huge-page
//! boundaries, and atomically-as-possible swaps the backing pages for
//! anonymous huge-page-advised memory without losing a byte of the original
//! instructions.
//!
//! # Usage
//!
//! Call before spawning threads; no other thread may execute inside the
//! target range while the swap is in flight. Failures are reported, never
//! fatal: skip the optimization and carry on.
//!
//! ```no_run
//! match hugetext::thp_enabled() {
//!     Ok(true) => {
//!         if let Err(e) = hugetext::map_text_region() {
//!             eprintln!("huge-page remap skipped: {e}");
//!         }
//!     }
//!     Ok(false) => eprintln!(
//!         "transparent huge pages disabled; set \
//!          /sys/kernel/mm/transparent_hugepage/enabled to madvise or always"
//!     ),
//!     Err(e) => eprintln!("huge-page probe failed: {e}"),
//! }
//! ```
//!
//! The remap is attempted at most once per region per process lifetime;
//! there is no retry and no undo.

mod elf;
#[cfg(target_os = "linux")]
mod locate;
mod probe;
mod region;
#[cfg(target_os = "linux")]
mod remap;
mod status;

pub use probe::thp_enabled;
pub use region::{MemRange, HUGE_PAGE_SIZE};
pub use status::{MapError, RemapStep, Rollback};

#[cfg(target_os = "linux")]
use tracing::info;

/// Remap the `.text` section of the main executable onto huge pages.
///
/// # Safety contract
///
/// Not `unsafe` to call, but the caller must ensure no other thread is
/// executing inside the executable's code section for the duration of the
/// call; invoke it from startup code before worker threads exist.
pub fn map_text_region() -> Result<(), MapError> {
    #[cfg(target_os = "linux")]
    {
        align_and_remap(locate::find_text_region(None)?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(MapError::UnsupportedPlatform)
    }
}

/// Remap the `.text` section of a loaded shared object whose path name
/// matches `pattern` (regex). The first matching module wins; loader
/// iteration order is implementation-defined.
///
/// Same threading contract as [`map_text_region`], applied to the matched
/// module's code.
pub fn map_module_text(pattern: &str) -> Result<(), MapError> {
    if pattern.is_empty() {
        return Err(MapError::EmptyPattern);
    }
    #[cfg(target_os = "linux")]
    {
        align_and_remap(locate::find_text_region(Some(pattern))?)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(MapError::UnsupportedPlatform)
    }
}

/// Remap an explicitly supplied virtual-address range, skipping discovery.
/// The range is aligned inward and validated before any mapping happens.
///
/// Useful when the hot region is known from a linker script or symbols
/// (e.g. `__hot_start`/`__hot_end`). Same threading contract as
/// [`map_text_region`].
pub fn map_address_range(from: usize, to: usize) -> Result<(), MapError> {
    #[cfg(target_os = "linux")]
    {
        align_and_remap(MemRange::new(from, to))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (from, to);
        Err(MapError::UnsupportedPlatform)
    }
}

/// Shared tail of every entry point: log the raw range, shrink it to
/// huge-page boundaries, check the invariants, then hand off to the
/// transactional remapper.
#[cfg(target_os = "linux")]
fn align_and_remap(raw: MemRange) -> Result<(), MapError> {
    info!("found code region {:#016x} - {:#016x}", raw.from, raw.to);
    let aligned = raw.align_to_huge_pages();
    info!(
        "aligned to {:#016x} - {:#016x} ({} huge pages)",
        aligned.from,
        aligned.to,
        aligned.huge_pages()
    );
    aligned.validate()?;
    remap::move_region_to_huge_pages(&aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    fn init_diagnostics() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn empty_pattern_fails_fast() {
        assert_eq!(map_module_text(""), Err(MapError::EmptyPattern));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unmatched_module_performs_no_mapping() {
        assert_eq!(
            map_module_text("no_such_shared_object_zzz"),
            Err(MapError::ModuleNotFound)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn zero_length_range_is_too_small() {
        let at = 2 * HUGE_PAGE_SIZE;
        assert_eq!(map_address_range(at, at), Err(MapError::RegionTooSmall));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sub_page_range_never_reaches_the_remapper() {
        // Collapses to nothing after inward alignment.
        assert_eq!(
            map_address_range(HUGE_PAGE_SIZE + 4096, 2 * HUGE_PAGE_SIZE),
            Err(MapError::RegionTooSmall)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn null_bounds_are_rejected() {
        assert_eq!(map_address_range(0, 0), Err(MapError::InvalidBounds));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn explicit_range_end_to_end_on_synthetic_region() {
        init_diagnostics();
        let arena_len = 3 * HUGE_PAGE_SIZE;
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                arena_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(base, libc::MAP_FAILED);
        // Hand the facade a deliberately unaligned range; it must align
        // inward itself.
        let raw_from = base as usize + 1;
        let raw_to = base as usize + arena_len - 1;

        match map_address_range(raw_from, raw_to) {
            Ok(()) => {}
            // Kernels built without THP refuse the advice.
            Err(MapError::Remap {
                step: RemapStep::AdviseHuge,
                rollback: Rollback::Clean,
                ..
            }) => {}
            Err(other) => panic!("unexpected failure {other:?}"),
        }
        unsafe { libc::munmap(base, arena_len) };
    }
}
