//! Code-region discovery via the dynamic loader.
//!
//! Walks the modules the loader has mapped into the process with
//! `dl_iterate_phdr`, picks the one matching the selector, then maps that
//! module's on-disk ELF image read-only just long enough to find its `.text`
//! section header. The runtime range is the section's link-time address plus
//! the module's load base.

use std::ffi::{c_int, c_void, CStr, CString};

use regex::Regex;

use crate::elf;
use crate::region::MemRange;
use crate::status::MapError;

/// Selector state threaded through the `dl_iterate_phdr` callback.
struct FindState<'a> {
    /// `None` selects the main executable (empty load name).
    pattern: Option<&'a Regex>,
    /// Set by the callback for the first matching module, success or failure.
    result: Option<Result<MemRange, MapError>>,
}

/// Locate the `.text` range of the selected module.
///
/// `pattern` of `None` selects the main executable; otherwise the pattern is
/// matched against loaded module path names. The first matching module wins;
/// iteration order is the dynamic loader's and is implementation-defined.
pub(crate) fn find_text_region(pattern: Option<&str>) -> Result<MemRange, MapError> {
    let compiled = match pattern {
        Some(p) => Some(Regex::new(p).map_err(|_| MapError::InvalidPattern)?),
        None => None,
    };
    let mut state = FindState {
        pattern: compiled.as_ref(),
        result: None,
    };
    unsafe {
        libc::dl_iterate_phdr(
            Some(scan_module),
            (&mut state as *mut FindState<'_>).cast::<c_void>(),
        );
    }
    state.result.unwrap_or(Err(MapError::ModuleNotFound))
}

/// `dl_iterate_phdr` callback: return 0 to keep iterating, nonzero to stop.
/// The first module matching the selector short-circuits the walk.
unsafe extern "C" fn scan_module(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> c_int {
    let state = unsafe { &mut *data.cast::<FindState<'_>>() };
    let info = unsafe { &*info };
    let name = if info.dlpi_name.is_null() {
        ""
    } else {
        unsafe { CStr::from_ptr(info.dlpi_name) }
            .to_str()
            .unwrap_or("")
    };

    let matched = match state.pattern {
        Some(re) => re.is_match(name),
        // The main executable is the entry whose load name is empty.
        None => name.is_empty(),
    };
    if !matched {
        return 0;
    }

    state.result = Some(read_text_range(name, info.dlpi_addr as usize));
    1
}

/// Map the module's backing file and pull the `.text` range out of its
/// section headers. The file mapping is scratch-only and released before
/// returning; cleanup failures are reported, not swallowed.
fn read_text_range(name: &str, load_base: usize) -> Result<MemRange, MapError> {
    // The main executable has no path in its loader entry; resolve it
    // through the kernel's self-reference instead.
    let path = if name.is_empty() { "/proc/self/exe" } else { name };
    let c_path = CString::new(path).map_err(|_| MapError::ExeOpen { errno: 0 })?;

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(c_path.as_ptr(), &mut st) } != 0 {
        return Err(MapError::ExeStat { errno: last_errno() });
    }
    let file_len = st.st_size as usize;

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd == -1 {
        return Err(MapError::ExeOpen { errno: last_errno() });
    }

    let image = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            file_len,
            libc::PROT_READ,
            libc::MAP_PRIVATE,
            fd,
            0,
        )
    };
    if image == libc::MAP_FAILED {
        let errno = last_errno();
        unsafe { libc::close(fd) };
        return Err(MapError::ExeMap { errno });
    }

    let bytes = unsafe { std::slice::from_raw_parts(image.cast::<u8>(), file_len) };
    let section = elf::find_section(bytes, ".text");

    if unsafe { libc::munmap(image, file_len) } != 0 {
        let errno = last_errno();
        unsafe { libc::close(fd) };
        return Err(MapError::ExeUnmap { errno });
    }
    if unsafe { libc::close(fd) } == -1 {
        return Err(MapError::ExeClose { errno: last_errno() });
    }

    match section {
        Err(()) => Err(MapError::BadImage),
        Ok(None) => Err(MapError::TextNotFound),
        Ok(Some(sec)) => {
            let from = load_base.wrapping_add(sec.vaddr as usize);
            Ok(MemRange::new(from, from.wrapping_add(sec.size as usize)))
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
