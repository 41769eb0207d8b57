//! Minimal ELF64 section scan.
//!
//! Parses just enough of an ELF64 image to find the virtual address and size
//! of its code section: file header, section header table, and the
//! section-name string table. Safe field extraction via `from_le_bytes`; no
//! unsafe code, no allocations.

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// Minimum size of an ELF64 file header.
const ELF64_EHDR_SIZE: usize = 64;

/// Size of an ELF64 section header entry.
const ELF64_SHDR_SIZE: usize = 64;

fn le_u16(data: &[u8], off: usize) -> Option<u16> {
    data.get(off..off + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(data: &[u8], off: usize) -> Option<u32> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_u64(data: &[u8], off: usize) -> Option<u64> {
    data.get(off..off + 8).map(|b| {
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

/// Location of a section within the process image, as declared by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionAddr {
    /// Link-time virtual address (`sh_addr`); add the module's load base to
    /// get the runtime address.
    pub vaddr: u64,
    /// Section size in bytes (`sh_size`).
    pub size: u64,
}

/// Scan the section header table of `image` for the section whose name
/// starts with `name_prefix`, typically `.text`.
///
/// Returns `Err(())` for a truncated or non-ELF64 image and `Ok(None)` when
/// no section matches. When several sections match, the last one in header
/// order wins.
pub(crate) fn find_section(image: &[u8], name_prefix: &str) -> Result<Option<SectionAddr>, ()> {
    if image.len() < ELF64_EHDR_SIZE
        || image[..4] != ELF_MAGIC
        || image[4] != ELFCLASS64
        || image[5] != ELFDATA2LSB
    {
        return Err(());
    }

    let e_shoff = le_u64(image, 0x28).ok_or(())? as usize;
    let e_shentsize = le_u16(image, 0x3a).ok_or(())? as usize;
    let e_shnum = le_u16(image, 0x3c).ok_or(())? as usize;
    let e_shstrndx = le_u16(image, 0x3e).ok_or(())? as usize;

    if e_shentsize < ELF64_SHDR_SIZE || e_shstrndx >= e_shnum {
        return Err(());
    }
    let table_len = e_shnum.checked_mul(e_shentsize).ok_or(())?;
    let table = image
        .get(e_shoff..e_shoff.checked_add(table_len).ok_or(())?)
        .ok_or(())?;

    // Offset of the section-name string table within the file.
    let strtab_off = le_u64(table, e_shstrndx * e_shentsize + 0x18).ok_or(())? as usize;
    let strtab_size = le_u64(table, e_shstrndx * e_shentsize + 0x20).ok_or(())? as usize;
    let strtab = image
        .get(strtab_off..strtab_off.checked_add(strtab_size).ok_or(())?)
        .ok_or(())?;

    let mut found = None;
    for idx in 0..e_shnum {
        let base = idx * e_shentsize;
        let sh_name = le_u32(table, base).ok_or(())? as usize;
        if section_name(strtab, sh_name).is_some_and(|n| n.starts_with(name_prefix)) {
            found = Some(SectionAddr {
                vaddr: le_u64(table, base + 0x10).ok_or(())?,
                size: le_u64(table, base + 0x20).ok_or(())?,
            });
        }
    }
    Ok(found)
}

/// Null-terminated name at `off` within the string table.
fn section_name(strtab: &[u8], off: usize) -> Option<&str> {
    let tail = strtab.get(off..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..end]).ok()
}
