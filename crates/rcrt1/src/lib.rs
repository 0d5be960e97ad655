// SPDX-License-Identifier: Apache-2.0

//! relocate dynamic symbols
//!
//! Applies the relative relocations of a static PIE image which has already
//! been placed in memory. Unlike the classic `_dyn_reloc` of a C runtime, the
//! image is handled as a byte slice: every header, every table and every
//! relocation target is checked against the bounds of the image before it is
//! read or written.
//!
//! Has to be included with
//!
//! ```toml
//! [profile.dev.package.rcrt1]
//! opt-level = 3
//! ```
//!
//! C version: https://git.musl-libc.org/cgit/musl/tree/ldso/dlstart.c

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all)]
#![deny(missing_docs)]

use core::fmt;
use core::mem::size_of;
use core::ops::Range;

use goblin::elf::dynamic::dyn64::Dyn;
use goblin::elf::dynamic::{
    DT_NULL, DT_REL, DT_RELA, DT_RELAENT, DT_RELASZ, DT_RELENT, DT_RELSZ,
};
use goblin::elf::header::header64::Header;
use goblin::elf::header::{EI_CLASS, EI_DATA, ELFCLASS64, ELFDATA2LSB, ELFMAG, ET_DYN, SELFMAG};
use goblin::elf::reloc::reloc64::{Rel, Rela};
use goblin::elf::reloc::{R_X86_64_NONE, R_X86_64_RELATIVE};
use goblin::elf64::program_header::{ProgramHeader, PT_DYNAMIC};

// Not (yet) exported by goblin.
const DT_RELRSZ: u64 = 35;
const DT_RELR: u64 = 36;
const DT_RELRENT: u64 = 37;

// Field offsets in the 64-bit ELF header.
const E_TYPE: u64 = 16;
const E_PHOFF: u64 = 32;
const E_PHENTSIZE: u64 = 54;
const E_PHNUM: u64 = 56;

// Field offsets in the 64-bit program header.
const P_VADDR: u64 = 16;
const P_MEMSZ: u64 = 40;

const WORD: u64 = size_of::<u64>() as u64;

/// Reasons a payload image cannot be relocated
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The image does not start with a 64-bit little-endian ELF header
    Header,

    /// The image is not position independent (`e_type != ET_DYN`)
    NotPie,

    /// The given range lies (partly) outside of the image
    OutOfBounds {
        /// Offset into the image
        offset: u64,
        /// Length of the access
        len: u64,
    },

    /// The dynamic section is not terminated by `DT_NULL`
    Unterminated,

    /// The table announced by the given dynamic tag is malformed
    Malformed(u64),

    /// The relocation type is not supported in a static PIE
    Unsupported(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Header => write!(f, "not a 64-bit little-endian ELF image"),
            Error::NotPie => write!(f, "image is not position independent"),
            Error::OutOfBounds { offset, len } => {
                write!(f, "access of {len} bytes at offset {offset:#x} is out of bounds")
            }
            Error::Unterminated => write!(f, "dynamic section is not terminated"),
            Error::Malformed(tag) => write!(f, "malformed relocation table (tag {tag})"),
            Error::Unsupported(kind) => write!(f, "unsupported relocation type {kind}"),
        }
    }
}

type Result<T> = core::result::Result<T, Error>;

/// An in-memory image, addressed by offsets relative to its first byte
struct Image<'a>(&'a mut [u8]);

impl Image<'_> {
    fn range(&self, offset: u64, len: u64) -> Result<Range<usize>> {
        let oob = Error::OutOfBounds { offset, len };
        let end = offset.checked_add(len).ok_or(oob)?;
        if end > self.0.len() as u64 {
            return Err(oob);
        }
        Ok(offset as usize..end as usize)
    }

    fn bytes<const N: usize>(&self, offset: u64) -> Result<[u8; N]> {
        let range = self.range(offset, N as u64)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.0[range]);
        Ok(buf)
    }

    fn u16(&self, offset: u64) -> Result<u16> {
        self.bytes(offset).map(u16::from_le_bytes)
    }

    fn u32(&self, offset: u64) -> Result<u32> {
        self.bytes(offset).map(u32::from_le_bytes)
    }

    fn u64(&self, offset: u64) -> Result<u64> {
        self.bytes(offset).map(u64::from_le_bytes)
    }

    fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        let range = self.range(offset, WORD)?;
        self.0[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Validates the ELF identity and returns the `PT_DYNAMIC` range, if any
    fn dynamic(&self) -> Result<Option<(u64, u64)>> {
        if self.0.len() < size_of::<Header>() || self.0[..SELFMAG] != ELFMAG[..] {
            return Err(Error::Header);
        }

        if self.0[EI_CLASS] != ELFCLASS64 || self.0[EI_DATA] != ELFDATA2LSB {
            return Err(Error::Header);
        }

        if self.u16(E_TYPE)? != ET_DYN {
            return Err(Error::NotPie);
        }

        let phoff = self.u64(E_PHOFF)?;
        let phentsize = u64::from(self.u16(E_PHENTSIZE)?);
        let phnum = u64::from(self.u16(E_PHNUM)?);

        if phnum > 0 && phentsize != size_of::<ProgramHeader>() as u64 {
            return Err(Error::Header);
        }

        for i in 0..phnum {
            let phdr = phoff
                .checked_add(i * phentsize)
                .ok_or(Error::OutOfBounds {
                    offset: phoff,
                    len: phnum * phentsize,
                })?;
            self.range(phdr, phentsize)?;

            if self.u32(phdr)? == PT_DYNAMIC {
                let vaddr = self.u64(phdr + P_VADDR)?;
                let memsz = self.u64(phdr + P_MEMSZ)?;
                return Ok(Some((vaddr, memsz)));
            }
        }

        Ok(None)
    }
}

/// A relocation table announced by the dynamic section
#[derive(Default)]
struct Table {
    addr: Option<u64>,
    size: u64,
    entsize: Option<u64>,
}

impl Table {
    /// Returns the number of entries, checking the table against the image
    fn entries(&self, image: &Image<'_>, entsize: usize, tag: u64) -> Result<Option<(u64, u64)>> {
        let addr = match self.addr {
            Some(addr) => addr,
            None => return Ok(None),
        };

        let entsize = entsize as u64;
        if self.entsize.unwrap_or(entsize) != entsize || self.size % entsize != 0 {
            return Err(Error::Malformed(tag));
        }

        image.range(addr, self.size)?;
        Ok(Some((addr, self.size / entsize)))
    }
}

#[derive(Default)]
struct Dynamic {
    rela: Table,
    rel: Table,
    relr: Table,
}

impl Dynamic {
    fn parse(image: &Image<'_>, offset: u64, size: u64) -> Result<Self> {
        let mut dynamic = Dynamic::default();
        let entsize = size_of::<Dyn>() as u64;

        image.range(offset, size)?;
        for i in 0..size / entsize {
            let entry = offset + i * entsize;
            let tag = image.u64(entry)?;
            let val = image.u64(entry + WORD)?;

            match tag {
                DT_NULL => return Ok(dynamic),
                DT_RELA => dynamic.rela.addr = Some(val),
                DT_RELASZ => dynamic.rela.size = val,
                DT_RELAENT => dynamic.rela.entsize = Some(val),
                DT_REL => dynamic.rel.addr = Some(val),
                DT_RELSZ => dynamic.rel.size = val,
                DT_RELENT => dynamic.rel.entsize = Some(val),
                DT_RELR => dynamic.relr.addr = Some(val),
                DT_RELRSZ => dynamic.relr.size = val,
                DT_RELRENT => dynamic.relr.entsize = Some(val),
                _ => {}
            }
        }

        Err(Error::Unterminated)
    }
}

fn relocate_rela(image: &mut Image<'_>, table: &Table, base: u64) -> Result<usize> {
    let (addr, count) = match table.entries(image, size_of::<Rela>(), DT_RELASZ)? {
        Some(entries) => entries,
        None => return Ok(0),
    };

    let mut applied = 0;
    for i in 0..count {
        let rela = addr + i * size_of::<Rela>() as u64;
        let r_offset = image.u64(rela)?;
        let r_info = image.u64(rela + WORD)?;
        let r_addend = image.u64(rela + 2 * WORD)?;

        match r_info as u32 {
            R_X86_64_NONE => {}
            R_X86_64_RELATIVE => {
                image.write_u64(r_offset, base.wrapping_add(r_addend))?;
                applied += 1;
            }
            kind => return Err(Error::Unsupported(kind)),
        }
    }

    Ok(applied)
}

fn relocate_rel(image: &mut Image<'_>, table: &Table, base: u64) -> Result<usize> {
    let (addr, count) = match table.entries(image, size_of::<Rel>(), DT_RELSZ)? {
        Some(entries) => entries,
        None => return Ok(0),
    };

    let mut applied = 0;
    for i in 0..count {
        let rel = addr + i * size_of::<Rel>() as u64;
        let r_offset = image.u64(rel)?;
        let r_info = image.u64(rel + WORD)?;

        match r_info as u32 {
            R_X86_64_NONE => {}
            R_X86_64_RELATIVE => {
                let value = image.u64(r_offset)?;
                image.write_u64(r_offset, value.wrapping_add(base))?;
                applied += 1;
            }
            kind => return Err(Error::Unsupported(kind)),
        }
    }

    Ok(applied)
}

fn relocate_relr(image: &mut Image<'_>, table: &Table, base: u64) -> Result<usize> {
    let (addr, count) = match table.entries(image, WORD as usize, DT_RELRSZ)? {
        Some(entries) => entries,
        None => return Ok(0),
    };

    let mut applied = 0;
    let mut next: Option<u64> = None;
    for i in 0..count {
        let entry = image.u64(addr + i * WORD)?;

        if entry & 1 == 0 {
            // An address entry relocates one word and starts a new run.
            let value = image.u64(entry)?;
            image.write_u64(entry, value.wrapping_add(base))?;
            applied += 1;
            next = Some(entry + WORD);
        } else {
            // A bitmap entry covers the 63 words following the current run.
            let start = next.ok_or(Error::Malformed(DT_RELR))?;
            let mut bits = entry >> 1;
            let mut offset = start;
            while bits != 0 {
                if bits & 1 == 1 {
                    let value = image.u64(offset)?;
                    image.write_u64(offset, value.wrapping_add(base))?;
                    applied += 1;
                }
                bits >>= 1;
                offset += WORD;
            }
            next = Some(start + 63 * WORD);
        }
    }

    Ok(applied)
}

/// Relocates `image` as if it was loaded at `base`
///
/// Returns the number of relocations applied. An image without a
/// `PT_DYNAMIC` segment has nothing to relocate.
pub fn relocate_at(image: &mut [u8], base: u64) -> Result<usize> {
    let mut image = Image(image);

    let (offset, size) = match image.dynamic()? {
        Some(dynamic) => dynamic,
        None => return Ok(0),
    };

    let dynamic = Dynamic::parse(&image, offset, size)?;

    let rela = relocate_rela(&mut image, &dynamic.rela, base)?;
    let rel = relocate_rel(&mut image, &dynamic.rel, base)?;
    let relr = relocate_relr(&mut image, &dynamic.relr, base)?;
    Ok(rela + rel + relr)
}

/// Relocates `image` in place, at the address it currently occupies
pub fn relocate(image: &mut [u8]) -> Result<usize> {
    let base = image.as_ptr() as u64;
    relocate_at(image, base)
}
