// SPDX-License-Identifier: Apache-2.0

//! Resolving and entering the payload entry point

use crate::host::Host;
use crate::merge::MergedExecBuffer;

#[cfg(target_arch = "x86_64")]
use std::arch::asm;
use std::ffi::c_int;
use std::fmt::{self, Debug, Formatter};
use std::mem::size_of;
use std::process::abort;
use std::ptr::{copy_nonoverlapping, null_mut};
use std::slice;

use goblin::elf::header::{ELFCLASS64, ELFDATA2LSB, EI_CLASS, EI_DATA};
use goblin::elf::Elf;
#[cfg(target_arch = "x86_64")]
use log::debug;
use log::error;

/// Size of the stack the payload starts on
pub const STACK_SIZE: usize = 8 << 20;

/// An absolute entry address inside the payload image
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EntryPoint(usize);

impl EntryPoint {
    /// The entry address
    pub fn addr(&self) -> usize {
        self.0
    }
}

impl Debug for EntryPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "EntryPoint({:#x})", self.0)
    }
}

/// A validated view of the ELF header at the start of a payload image
///
/// A `Header` only exists for a 64-bit little-endian image whose entry
/// offset is non-zero and lies inside the image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    base: usize,
    entry: usize,
}

impl Header {
    /// Validates the header of `image`
    pub fn new(image: &[u8]) -> Option<Self> {
        let header = Elf::parse_header(image).ok()?;

        if header.e_ident[EI_CLASS] != ELFCLASS64 || header.e_ident[EI_DATA] != ELFDATA2LSB {
            return None;
        }

        let entry = usize::try_from(header.e_entry).ok()?;
        if entry == 0 || entry >= image.len() {
            return None;
        }

        Some(Self {
            base: image.as_ptr() as usize,
            entry,
        })
    }

    /// Absolute address of the entry point
    pub fn entry(&self) -> EntryPoint {
        EntryPoint(self.base + self.entry)
    }
}

/// Resolves the absolute entry address of a relocated payload image
///
/// Panics if the image does not have a valid header with a non-zero entry
/// offset. Such an image was either never loaded or never relocated.
pub fn resolve_entry(image: &[u8]) -> EntryPoint {
    match Header::new(image) {
        Some(header) => header.entry(),
        None => panic!("payload image at {:p} has no valid entry point", image.as_ptr()),
    }
}

/// Enters the payload with its argument block
pub struct Trampoline {
    args: MergedExecBuffer,
}

impl Trampoline {
    /// Creates a trampoline passing `args` to the payload
    pub fn new(args: MergedExecBuffer) -> Self {
        Self { args }
    }

    /// The arguments passed to the payload
    pub fn args(&self) -> &MergedExecBuffer {
        &self.args
    }

    /// Enters the payload at `entry` through `host`
    ///
    /// # Safety
    ///
    /// See [`Host::enter`].
    pub unsafe fn invoke(&self, host: &mut impl Host, entry: EntryPoint) -> c_int {
        let stack = self.args.stack();
        host.enter(entry, &stack)
    }
}

/// Maps a fresh stack of [`STACK_SIZE`] bytes for the payload
///
/// The mapping is never released. Aborts if it cannot be created.
pub fn map_stack() -> &'static mut [u8] {
    // Safety: a fresh anonymous mapping does not alias anything.
    let map = unsafe {
        libc::mmap(
            null_mut(),
            STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
            -1,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        error!("failed to map the payload stack");
        abort();
    }

    // Safety: the mapping is readable, writable and owned by nobody else.
    unsafe { slice::from_raw_parts_mut(map.cast(), STACK_SIZE) }
}

/// Switches to a new stack holding `stack` and jumps to `entry`
///
/// The words of `stack` are placed at the 16-byte aligned top of a freshly
/// mapped stack, which is what a native process finds on entry.
///
/// # Safety
///
/// `entry` has to be the entry point of a relocated payload and `stack`
/// has to follow the native process entry layout.
pub unsafe fn invoke(entry: EntryPoint, stack: &[usize]) -> ! {
    let bytes = stack.len().saturating_mul(size_of::<usize>());
    if bytes > STACK_SIZE / 2 {
        error!("{} initial stack words do not fit the payload stack", stack.len());
        abort();
    }

    let map = map_stack();
    let top = map.as_mut_ptr() as usize + map.len();
    let sp = (top - bytes) & !0xf;
    copy_nonoverlapping(stack.as_ptr(), sp as *mut usize, stack.len());

    jump(entry, sp)
}

/// Loads `sp` into the stack pointer and jumps to `entry`
///
/// # Safety
///
/// `sp` has to point to a native process entry layout on a stack the
/// payload may use, and `entry` has to be the entry point of a relocated
/// payload.
#[cfg(target_arch = "x86_64")]
pub unsafe fn jump(entry: EntryPoint, sp: usize) -> ! {
    debug!("entering payload at {entry:?} with stack at {sp:#x}");

    asm!(
        "mov rsp, rdi",
        "xor ebp, ebp",
        "xor edx, edx",
        "jmp rsi",
        in("rdi") sp,
        in("rsi") entry.addr(),
        options(noreturn)
    )
}

/// Loads `sp` into the stack pointer and jumps to `entry`
///
/// # Safety
///
/// Entering a payload is only supported on x86_64, everywhere else this
/// aborts the process.
#[cfg(not(target_arch = "x86_64"))]
pub unsafe fn jump(entry: EntryPoint, sp: usize) -> ! {
    error!("cannot enter payload at {entry:?} with stack at {sp:#x} on this architecture");
    abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ehdr(entry: u64, len: usize) -> Vec<u8> {
        let mut image = vec![0u8; len];
        image[..4].copy_from_slice(b"\x7fELF");
        image[EI_CLASS] = ELFCLASS64;
        image[EI_DATA] = ELFDATA2LSB;
        image[6] = 1;
        image[16..18].copy_from_slice(&goblin::elf::header::ET_DYN.to_le_bytes());
        image[18..20].copy_from_slice(&goblin::elf::header::EM_X86_64.to_le_bytes());
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[24..32].copy_from_slice(&entry.to_le_bytes());
        image[52..54].copy_from_slice(&64u16.to_le_bytes());
        image
    }

    #[test]
    fn entry() {
        let image = ehdr(0x80, 0x100);
        let header = Header::new(&image).unwrap();
        assert_eq!(header.entry().addr(), image.as_ptr() as usize + 0x80);
        assert_eq!(resolve_entry(&image), header.entry());
    }

    #[test]
    fn zero_entry() {
        assert_eq!(Header::new(&ehdr(0, 0x100)), None);
    }

    #[test]
    #[should_panic(expected = "no valid entry point")]
    fn resolve_zero_entry() {
        resolve_entry(&ehdr(0, 0x100));
    }

    #[test]
    fn entry_out_of_bounds() {
        assert_eq!(Header::new(&ehdr(0x100, 0x100)), None);
    }

    #[test]
    fn not_elf() {
        let mut image = ehdr(0x80, 0x100);
        image[0] = 0;
        assert_eq!(Header::new(&image), None);
        assert_eq!(Header::new(&ehdr(0x20, 0x100)[..0x30]), None);
    }

    #[test]
    fn wrong_class() {
        let mut image = ehdr(0x80, 0x100);
        image[EI_DATA] = goblin::elf::header::ELFDATA2MSB;
        assert_eq!(Header::new(&image), None);
    }
}
