//! Outcome catalog for the huge-page remapping pipeline.
//!
//! Every component reports through [`MapError`]; success is an ordinary
//! `Ok(..)`. Remap failures carry a second level of detail: which mutable
//! step failed, and whether the rollback unmaps themselves succeeded.

use core::fmt;

use thiserror::Error;

/// Mutable step of the remap transaction (§ remap module) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapStep {
    /// Mapping the anonymous scratch region that preserves the original bytes.
    MapScratch,
    /// The `MAP_FIXED` replacement of the live code mapping.
    MapFixed,
    /// `madvise(MADV_HUGEPAGE)` on the replacement mapping.
    AdviseHuge,
    /// Tightening the replacement mapping back to read+execute.
    Protect,
}

impl fmt::Display for RemapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MapScratch => "scratch mapping",
            Self::MapFixed => "fixed-address mapping",
            Self::AdviseHuge => "huge-page advice",
            Self::Protect => "protection change",
        })
    }
}

/// Outcome of the rollback unmaps performed after a failed remap step.
///
/// "Leaked" means the corresponding `munmap` failed and the region is still
/// mapped; the caller can distinguish a cleanly restored failure from one
/// where recovery itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// All rollback unmaps succeeded.
    Clean,
    /// Unmapping the scratch region failed.
    ScratchLeaked,
    /// Unmapping the fixed-address replacement failed.
    TargetLeaked,
    /// Both rollback unmaps failed.
    BothLeaked,
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clean => "clean",
            Self::ScratchLeaked => "scratch region leaked",
            Self::TargetLeaked => "target region leaked",
            Self::BothLeaked => "scratch and target regions leaked",
        })
    }
}

/// Failure classes of discovery, validation, probing, and remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    /// `stat`/`fstat` of the module's backing file failed.
    #[error("failed to stat module file (errno {errno})")]
    ExeStat { errno: i32 },

    /// Opening the module's backing file failed.
    #[error("failed to open module file (errno {errno})")]
    ExeOpen { errno: i32 },

    /// The scratch read-only mapping of the module file failed.
    #[error("failed to map module file (errno {errno})")]
    ExeMap { errno: i32 },

    /// Releasing the scratch mapping of the module file failed.
    #[error("failed to unmap module file (errno {errno})")]
    ExeUnmap { errno: i32 },

    /// Closing the module file descriptor failed.
    #[error("failed to close module file (errno {errno})")]
    ExeClose { errno: i32 },

    /// The module file is truncated or is not a little-endian ELF64 image.
    #[error("module image is truncated or not valid ELF64")]
    BadImage,

    /// The module image has no section whose name starts with `.text`.
    #[error("failed to find text section")]
    TextNotFound,

    /// No loaded module matched the selector.
    #[error("no loaded module matched the selector")]
    ModuleNotFound,

    /// The module name pattern is not valid regex syntax.
    #[error("invalid module name pattern")]
    InvalidPattern,

    /// The module name pattern was empty.
    #[error("module name pattern is empty")]
    EmptyPattern,

    /// A region bound is null or the bounds are inverted.
    #[error("invalid region boundaries")]
    InvalidBounds,

    /// The aligned region is smaller than one huge page.
    #[error("region too small to map onto huge pages")]
    RegionTooSmall,

    /// The THP enablement status file could not be opened.
    #[error("failed to open thp enablement status file (errno {errno})")]
    ThpFileOpen { errno: i32 },

    /// The THP enablement status file did not hold exactly three tokens.
    #[error("malformed thp enablement status file")]
    MalformedThpFile,

    /// Huge-page-backed code mappings are not available on this target.
    #[error("mapping code to huge pages is not supported on this platform")]
    UnsupportedPlatform,

    /// A remap step failed; `rollback` records whether the unwind unmaps
    /// succeeded.
    #[error("remap failed at {step} (errno {errno}); rollback: {rollback}")]
    Remap {
        step: RemapStep,
        errno: i32,
        rollback: Rollback,
    },

    /// The remap itself succeeded but the scratch copy could not be released.
    #[error("remap succeeded but releasing the scratch copy failed (errno {errno})")]
    ReleaseScratch { errno: i32 },
}

impl MapError {
    /// Short machine-oriented label, stable across releases. The full
    /// human-readable text is the `Display` impl.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExeStat { .. } => "stat_failed",
            Self::ExeOpen { .. } => "open_failed",
            Self::ExeMap { .. } => "map_exe_failed",
            Self::ExeUnmap { .. } => "unmap_exe_failed",
            Self::ExeClose { .. } => "close_failed",
            Self::BadImage => "bad_image",
            Self::TextNotFound => "text_not_found",
            Self::ModuleNotFound => "module_not_found",
            Self::InvalidPattern => "invalid_pattern",
            Self::EmptyPattern => "empty_pattern",
            Self::InvalidBounds => "invalid_bounds",
            Self::RegionTooSmall => "region_too_small",
            Self::ThpFileOpen { .. } => "thp_open_failed",
            Self::MalformedThpFile => "thp_malformed",
            Self::UnsupportedPlatform => "unsupported_platform",
            Self::Remap { step, rollback, .. } => remap_label(*step, *rollback),
            Self::ReleaseScratch { .. } => "scratch_release_failed",
        }
    }
}

/// One label per (step, rollback) pair so the two-level taxonomy survives
/// into log lines that only carry the short form.
fn remap_label(step: RemapStep, rollback: Rollback) -> &'static str {
    use {RemapStep as S, Rollback as R};
    match (step, rollback) {
        (S::MapScratch, _) => "mmap_scratch_failed",
        (S::MapFixed, R::Clean) => "mmap_fixed_failed",
        (S::MapFixed, _) => "mmap_fixed_failed_scratch_leaked",
        (S::AdviseHuge, R::Clean) => "madvise_failed",
        (S::AdviseHuge, R::ScratchLeaked) => "madvise_failed_scratch_leaked",
        (S::AdviseHuge, R::TargetLeaked) => "madvise_failed_target_leaked",
        (S::AdviseHuge, R::BothLeaked) => "madvise_failed_both_leaked",
        (S::Protect, R::Clean) => "mprotect_failed",
        (S::Protect, R::ScratchLeaked) => "mprotect_failed_scratch_leaked",
        (S::Protect, R::TargetLeaked) => "mprotect_failed_target_leaked",
        (S::Protect, R::BothLeaked) => "mprotect_failed_both_leaked",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct_per_rollback_outcome() {
        let clean = MapError::Remap {
            step: RemapStep::Protect,
            errno: 22,
            rollback: Rollback::Clean,
        };
        let leaked = MapError::Remap {
            step: RemapStep::Protect,
            errno: 22,
            rollback: Rollback::BothLeaked,
        };
        assert_ne!(clean.label(), leaked.label());
        assert_eq!(clean.label(), "mprotect_failed");
        assert_eq!(leaked.label(), "mprotect_failed_both_leaked");
    }

    #[test]
    fn display_carries_errno_and_rollback() {
        let err = MapError::Remap {
            step: RemapStep::AdviseHuge,
            errno: 12,
            rollback: Rollback::ScratchLeaked,
        };
        let text = err.to_string();
        assert!(text.contains("huge-page advice"), "{text}");
        assert!(text.contains("errno 12"), "{text}");
        assert!(text.contains("scratch region leaked"), "{text}");
    }

    #[test]
    fn short_and_full_forms_differ() {
        assert_eq!(MapError::ModuleNotFound.label(), "module_not_found");
        assert_eq!(
            MapError::ModuleNotFound.to_string(),
            "no loaded module matched the selector"
        );
    }
}
