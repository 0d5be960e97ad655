// SPDX-License-Identifier: Apache-2.0

//! A host without isolation
//!
//! The nil host runs the bootstrap inside an ordinary Linux process. The
//! payload is mapped into anonymous memory, the host filesystem already is
//! the process filesystem, and the host modules have nothing to load.
//!
//! The payload is entered like a process started by the kernel: the
//! reserved auxiliary slots of the argument block are replaced by the
//! auxiliary vector a libc start routine expects.

use super::{Host, Module, Native, Status};
use crate::entry::{jump, map_stack, EntryPoint};
use crate::import::HostArgs;
use crate::tls::ReservedTls;

use std::ffi::{c_char, c_int, c_ulong, CStr, CString};
use std::io;
use std::ops::Range;
use std::ptr::{null, null_mut};
use std::slice;

use anyhow::{anyhow, ensure, Context, Result};
use crt0stack::{Builder, Entry, Handle, OutOfSpace};
use goblin::elf::header::ET_DYN;
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use goblin::elf::Elf;
use log::{debug, error, info};

const PAGE_SIZE: usize = 4096;

fn page_up(addr: usize) -> Option<usize> {
    Some(addr.checked_add(PAGE_SIZE - 1)? / PAGE_SIZE * PAGE_SIZE)
}

fn errno() -> Status {
    io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

/// Hands `strings` to the rest of the process as a null-terminated array
fn leak(strings: Vec<CString>) -> &'static [*const c_char] {
    let strings: &'static [CString] = strings.leak();
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain([null()])
        .collect::<Vec<_>>()
        .leak()
}

/// Reads the strings of a null-terminated section of an argument block
///
/// Returns the strings and the words following the terminator.
///
/// # Safety
///
/// Every word before the terminator has to point to a C string that stays
/// valid for the rest of the process.
unsafe fn section(words: &[usize]) -> Result<(Vec<&'static str>, &[usize])> {
    let len = words
        .iter()
        .position(|word| *word == 0)
        .ok_or_else(|| anyhow!("unterminated argument block section"))?;

    let mut strings = Vec::with_capacity(len);
    for word in &words[..len] {
        let string = CStr::from_ptr(*word as *const c_char)
            .to_str()
            .context("the payload strings are not UTF-8")?;
        strings.push(string);
    }

    Ok((strings, &words[len + 1..]))
}

fn build<'a>(
    crt0: &'a mut [u8],
    argv: &[&str],
    envp: &[&str],
    auxv: &[Entry<'_>],
) -> Result<Handle<'a>, OutOfSpace> {
    let mut builder = Builder::new(crt0);
    for arg in argv {
        builder.push(arg)?;
    }

    let mut builder = builder.done()?;
    for env in envp {
        builder.push(env)?;
    }

    let mut builder = builder.done()?;
    for aux in auxv {
        builder.push(aux)?;
    }

    builder.done()
}

struct Segment {
    range: Range<usize>,
    flags: u32,
}

impl Segment {
    fn prot(&self) -> c_int {
        let mut prot = libc::PROT_NONE;
        if self.flags & PF_R != 0 {
            prot |= libc::PROT_READ;
        }
        if self.flags & PF_W != 0 {
            prot |= libc::PROT_WRITE;
        }
        if self.flags & PF_X != 0 {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// A host running the payload in the current process
pub struct NilHost {
    image: *mut u8,
    size: usize,
    segments: Vec<Segment>,
    phdr: usize,
    phent: usize,
    phnum: usize,
    argv: &'static [*const c_char],
    envp: &'static [*const c_char],
}

impl NilHost {
    /// Maps the static PIE `payload` and prepares its arguments and environment
    ///
    /// The strings stay allocated for the rest of the process.
    pub fn new(payload: &[u8], argv: Vec<CString>, envp: Vec<CString>) -> Result<Self> {
        let elf = Elf::parse(payload).context("failed to parse the payload")?;
        ensure!(
            elf.header.e_type == ET_DYN,
            "the payload is not position independent"
        );

        let loads: Vec<_> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .collect();
        ensure!(
            loads.iter().any(|ph| ph.p_offset == 0 && ph.p_vaddr == 0),
            "the payload does not load its ELF header at offset 0"
        );

        let mut segments = Vec::new();
        let mut end = 0;
        for ph in &loads {
            let vaddr = usize::try_from(ph.p_vaddr)?;
            let memsz = usize::try_from(ph.p_memsz)?;
            ensure!(ph.p_filesz <= ph.p_memsz, "segment at {vaddr:#x} is truncated");

            let end_vaddr = vaddr
                .checked_add(memsz)
                .ok_or_else(|| anyhow!("segment at {vaddr:#x} overflows"))?;
            let range = vaddr..end_vaddr;
            end = end.max(range.end);
            segments.push(Segment {
                range,
                flags: ph.p_flags,
            });
        }

        let size = page_up(end).ok_or_else(|| anyhow!("payload too large"))?;
        ensure!(size > 0, "the payload has nothing to load");

        let phdr = usize::try_from(elf.header.e_phoff)?;
        let phent = usize::from(elf.header.e_phentsize);
        let phnum = usize::from(elf.header.e_phnum);
        ensure!(
            phent
                .checked_mul(phnum)
                .and_then(|len| len.checked_add(phdr))
                .map_or(false, |end| end <= size),
            "the payload program headers are not loaded"
        );

        // Safety: a fresh anonymous mapping does not alias anything.
        let image = unsafe {
            libc::mmap(
                null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if image == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).context("failed to map the payload");
        }

        let mut host = Self {
            image: image.cast(),
            size,
            segments,
            phdr,
            phent,
            phnum,
            argv: leak(argv),
            envp: leak(envp),
        };

        let memory = host.payload();
        for ph in &loads {
            let end = ph
                .p_offset
                .checked_add(ph.p_filesz)
                .ok_or_else(|| anyhow!("segment at {:#x} overflows", ph.p_vaddr))?;
            let src = usize::try_from(ph.p_offset)?..usize::try_from(end)?;
            let bytes = payload
                .get(src)
                .ok_or_else(|| anyhow!("segment at {:#x} exceeds the file", ph.p_vaddr))?;
            let vaddr = usize::try_from(ph.p_vaddr)?;
            memory[vaddr..][..bytes.len()].copy_from_slice(bytes);
        }

        info!("mapped {size:#x} payload bytes at {:p}", host.image);
        Ok(host)
    }

    /// Number of payload arguments
    pub fn argc(&self) -> usize {
        self.argv.len() - 1
    }

    /// Number of environment entries
    pub fn envc(&self) -> usize {
        self.envp.len() - 1
    }

    /// Lays out the initial stack of a native process in `crt0`
    ///
    /// The arguments and environment are taken from the argument block
    /// `stack`, its reserved auxiliary slots are replaced by a complete
    /// auxiliary vector for a payload entered at `entry`.
    ///
    /// # Safety
    ///
    /// The argument and environment words of `stack` have to point to C
    /// strings that stay valid for the rest of the process.
    unsafe fn crt0setup<'a>(
        &self,
        crt0: &'a mut [u8],
        entry: EntryPoint,
        stack: &[usize],
    ) -> Result<Handle<'a>> {
        let words = stack
            .get(1..)
            .ok_or_else(|| anyhow!("empty argument block"))?;
        let (argv, words) = section(words)?;
        let (envp, _) = section(words)?;
        ensure!(
            argv.len() == stack[0],
            "argument count {} does not match {} arguments",
            stack[0],
            argv.len()
        );

        let rand: [u8; 16] = rand::random();
        let base = self.image as usize;
        let auxv = [
            Entry::ExecFilename(argv.first().copied().unwrap_or_default()),
            Entry::Platform("x86_64"),
            Entry::Uid(libc::getuid() as _),
            Entry::EUid(libc::geteuid() as _),
            Entry::Gid(libc::getgid() as _),
            Entry::EGid(libc::getegid() as _),
            Entry::PageSize(PAGE_SIZE),
            Entry::Secure(false),
            Entry::ClockTick(100),
            Entry::Flags(0),
            Entry::PHdr(base + self.phdr),
            Entry::PHent(self.phent),
            Entry::PHnum(self.phnum),
            Entry::Entry(entry.addr()),
            Entry::Random(rand),
        ];

        let len = crt0.len();
        build(crt0, &argv, &envp, &auxv)
            .map_err(|_| anyhow!("the initial stack does not fit {len} bytes"))
    }

    fn raw_args(&self) -> HostArgs {
        HostArgs {
            argc: self.argc() as c_int,
            argv: self.argv.as_ptr(),
            envc: self.envc() as c_int,
            envp: self.envp.as_ptr(),
        }
    }
}

impl Drop for NilHost {
    fn drop(&mut self) {
        // Safety: the mapping is owned by `self` and nothing borrows it anymore.
        unsafe { libc::munmap(self.image.cast(), self.size) };
    }
}

impl Host for NilHost {
    type Platform = Native;

    fn platform(&self) -> &Native {
        &Native
    }

    fn load_module(&mut self, module: Module) -> Status {
        debug!("the {module} host module is native");
        0
    }

    fn reserved_tls(&self) -> Option<ReservedTls> {
        None
    }

    fn environ(&self) -> *const *const c_char {
        self.envp.as_ptr()
    }

    fn mount(&mut self, source: &CStr, target: &CStr, fstype: &CStr, flags: c_ulong) -> Status {
        debug!("{fstype:?} {source:?} at {target:?} (flags {flags:#x}) is the native filesystem");
        0
    }

    fn memfs(&mut self, name: &CStr) -> Status {
        debug!("memfs {name:?} is the native filesystem");
        0
    }

    fn host_args(&mut self, args: &mut HostArgs) -> Status {
        *args = self.raw_args();
        0
    }

    fn premain(&mut self, argc: &mut c_int, argv: &mut *const *const c_char) {
        *argc = self.argc() as c_int;
        *argv = self.argv.as_ptr();
    }

    fn chdir(&mut self, path: &CStr) -> Status {
        // Safety: `path` is a valid C string.
        match unsafe { libc::chdir(path.as_ptr()) } {
            0 => 0,
            _ => errno(),
        }
    }

    fn payload(&mut self) -> &mut [u8] {
        // Safety: the mapping is owned by `self` and readable and writable
        // until `enter()`.
        unsafe { slice::from_raw_parts_mut(self.image, self.size) }
    }

    unsafe fn enter(&mut self, entry: EntryPoint, stack: &[usize]) -> c_int {
        let handle = match self.crt0setup(map_stack(), entry, stack) {
            Ok(handle) => handle,
            Err(e) => {
                error!("failed to prepare the payload stack: {e:#}");
                return libc::E2BIG;
            }
        };

        for segment in &self.segments {
            let start = segment.range.start / PAGE_SIZE * PAGE_SIZE;
            let end = page_up(segment.range.end).unwrap_or(self.size);
            let addr = self.image.add(start);

            if libc::mprotect(addr.cast(), end - start, segment.prot()) != 0 {
                let status = errno();
                error!("failed to protect the payload segment at {addr:p}: {status}");
                return status;
            }
        }

        jump(entry, &*handle as *const _ as usize)
    }
}
