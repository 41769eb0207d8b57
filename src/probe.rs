//! Transparent-huge-page capability probe.
//!
//! The kernel reports the THP policy as three tokens with the active one
//! bracket-wrapped, e.g. `always [madvise] never`. Anything other than
//! exactly three whitespace-separated tokens is a malformed file.

use crate::status::MapError;

#[cfg(target_os = "linux")]
const THP_ENABLED_PATH: &str = "/sys/kernel/mm/transparent_hugepage/enabled";

/// Whether the kernel will back anonymous mappings with huge pages, either
/// always or on `madvise` request.
///
/// Returns `Ok(false)` when the policy is `never`; probe failures (missing
/// or malformed status file, unsupported platform) are reported separately
/// so callers can tell "disabled" from "could not tell".
pub fn thp_enabled() -> Result<bool, MapError> {
    #[cfg(target_os = "linux")]
    {
        thp_enabled_at(THP_ENABLED_PATH)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(MapError::UnsupportedPlatform)
    }
}

#[cfg(target_os = "linux")]
fn thp_enabled_at(path: &str) -> Result<bool, MapError> {
    let text = std::fs::read_to_string(path).map_err(|e| MapError::ThpFileOpen {
        errno: e.raw_os_error().unwrap_or(0),
    })?;
    parse_thp_policy(&text)
}

/// Parse the three-token policy line. Exactly one token is expected to be
/// bracket-marked as active.
fn parse_thp_policy(text: &str) -> Result<bool, MapError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(MapError::MalformedThpFile);
    }
    // Only the token count is a hard format check; an unrecognized marking
    // conservatively reads as disabled.
    Ok(tokens[0] == "[always]" || tokens[1] == "[madvise]")
}
