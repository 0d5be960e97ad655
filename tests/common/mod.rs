// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use keep_bootstrap::entry::EntryPoint;
use keep_bootstrap::host::{Host, Module, Native, Status};
use keep_bootstrap::import::HostArgs;
use keep_bootstrap::merge::AUX_RESERVED;
use keep_bootstrap::tls::ReservedTls;

use std::ffi::{c_char, c_int, c_ulong, CStr, CString};
use std::ptr::null;

pub const ENTRY: u64 = 0x80;
pub const DYNAMIC: u64 = 0x100;
pub const TABLE: u64 = 0x200;
pub const DATA: u64 = 0x300;
pub const ADDEND: u64 = 0x1234;

pub const R_X86_64_RELATIVE: u32 = 8;
pub const R_X86_64_COPY: u32 = 5;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const ET_DYN: u16 = 3;
const DT_RELA: u64 = 7;
const DT_RELASZ: u64 = 8;
const DT_RELAENT: u64 = 9;

fn put(image: &mut [u8], offset: u64, bytes: &[u8]) {
    let offset = offset as usize;
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

pub fn word(image: &[u8], offset: u64) -> u64 {
    let offset = offset as usize;
    u64::from_le_bytes(image[offset..offset + 8].try_into().unwrap())
}

/// A static PIE with a single relocation of kind `kind` at `DATA`
pub fn payload(entry: u64, kind: u32) -> Vec<u8> {
    let mut image = vec![0u8; 0x400];

    put(&mut image, 0, b"\x7fELF\x02\x01\x01");
    put(&mut image, 16, &ET_DYN.to_le_bytes());
    put(&mut image, 18, &62u16.to_le_bytes());
    put(&mut image, 20, &1u32.to_le_bytes());
    put(&mut image, 24, &entry.to_le_bytes());
    put(&mut image, 32, &64u64.to_le_bytes());
    put(&mut image, 52, &64u16.to_le_bytes());
    put(&mut image, 54, &56u16.to_le_bytes());
    put(&mut image, 56, &2u16.to_le_bytes());

    // PT_LOAD covering the whole image
    put(&mut image, 64, &PT_LOAD.to_le_bytes());
    put(&mut image, 68, &5u32.to_le_bytes());
    put(&mut image, 96, &0x400u64.to_le_bytes());
    put(&mut image, 104, &0x400u64.to_le_bytes());

    // PT_DYNAMIC
    put(&mut image, 120, &PT_DYNAMIC.to_le_bytes());
    put(&mut image, 124, &6u32.to_le_bytes());
    put(&mut image, 128, &DYNAMIC.to_le_bytes());
    put(&mut image, 136, &DYNAMIC.to_le_bytes());
    put(&mut image, 152, &0x100u64.to_le_bytes());
    put(&mut image, 160, &0x100u64.to_le_bytes());

    for (i, (tag, val)) in [(DT_RELA, TABLE), (DT_RELASZ, 24), (DT_RELAENT, 24)]
        .iter()
        .enumerate()
    {
        put(&mut image, DYNAMIC + i as u64 * 16, &tag.to_le_bytes());
        put(&mut image, DYNAMIC + i as u64 * 16 + 8, &val.to_le_bytes());
    }

    put(&mut image, TABLE, &DATA.to_le_bytes());
    put(&mut image, TABLE + 8, &u64::from(kind).to_le_bytes());
    put(&mut image, TABLE + 16, &ADDEND.to_le_bytes());

    image
}

/// A null-terminated string array
pub struct Strings {
    owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl Strings {
    pub fn new(strings: &[&str]) -> Self {
        let owned: Vec<_> = strings.iter().map(|s| CString::new(*s).unwrap()).collect();
        let ptrs = owned.iter().map(|s| s.as_ptr()).chain([null()]).collect();
        Self { owned, ptrs }
    }

    pub fn count(&self) -> c_int {
        self.owned.len() as c_int
    }

    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

impl Default for Strings {
    fn default() -> Self {
        Self::new(&[])
    }
}

fn strings(slots: &[usize]) -> Vec<String> {
    slots
        .iter()
        .map(|ptr| unsafe { CStr::from_ptr(*ptr as *const c_char) })
        .map(|s| s.to_str().unwrap().to_owned())
        .collect()
}

/// A boundary call observed by [`MockHost`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Module(Module),
    Mount {
        source: String,
        target: String,
        fstype: String,
        flags: c_ulong,
    },
    Memfs(String),
    HostArgs,
    Premain,
    Chdir(String),
    Enter {
        entry: usize,
        argv: Vec<String>,
        envp: Vec<String>,
    },
}

/// A host recording every boundary call
pub struct MockHost {
    pub events: Vec<Event>,
    pub image: Vec<u8>,
    pub environ: Strings,
    pub host_argv: Strings,
    pub host_envp: Strings,
    pub host_argc: Option<c_int>,
    pub premain_argv: Strings,
    pub premain_argc: Option<c_int>,
    pub premain_null_argv: bool,
    pub tls: Option<ReservedTls>,
    pub fail_module: Option<Module>,
    pub mount_status: Status,
    pub memfs_status: Status,
    pub host_args_status: Status,
    pub chdir_status: Status,
    pub entered_argv: Vec<usize>,
}

impl MockHost {
    pub fn new(environ: &[&str]) -> Self {
        Self {
            events: Vec::new(),
            image: payload(ENTRY, R_X86_64_RELATIVE),
            environ: Strings::new(environ),
            host_argv: Strings::default(),
            host_envp: Strings::default(),
            host_argc: None,
            premain_argv: Strings::default(),
            premain_argc: None,
            premain_null_argv: false,
            tls: None,
            fail_module: None,
            mount_status: 0,
            memfs_status: 0,
            host_args_status: 0,
            chdir_status: 0,
            entered_argv: Vec::new(),
        }
    }

    pub fn with_host_args(mut self, argv: &[&str], envp: &[&str]) -> Self {
        self.host_argv = Strings::new(argv);
        self.host_envp = Strings::new(envp);
        self
    }

    pub fn with_premain(mut self, argv: &[&str]) -> Self {
        self.premain_argv = Strings::new(argv);
        self
    }

    pub fn base(&self) -> usize {
        self.image.as_ptr() as usize
    }

    pub fn relocated(&self) -> bool {
        word(&self.image, DATA) != 0
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }

    pub fn mounted(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, Event::Mount { .. } | Event::Memfs(_)))
    }

    pub fn entered(&self) -> bool {
        self.events.iter().any(|e| matches!(e, Event::Enter { .. }))
    }
}

impl Host for MockHost {
    type Platform = Native;

    fn platform(&self) -> &Native {
        &Native
    }

    fn load_module(&mut self, module: Module) -> Status {
        self.events.push(Event::Module(module));
        match self.fail_module {
            Some(failing) if failing == module => libc::ENOSYS,
            _ => 0,
        }
    }

    fn reserved_tls(&self) -> Option<ReservedTls> {
        self.tls
    }

    fn environ(&self) -> *const *const c_char {
        self.environ.as_ptr()
    }

    fn mount(&mut self, source: &CStr, target: &CStr, fstype: &CStr, flags: c_ulong) -> Status {
        self.events.push(Event::Mount {
            source: source.to_str().unwrap().into(),
            target: target.to_str().unwrap().into(),
            fstype: fstype.to_str().unwrap().into(),
            flags,
        });
        self.mount_status
    }

    fn memfs(&mut self, name: &CStr) -> Status {
        self.events.push(Event::Memfs(name.to_str().unwrap().into()));
        self.memfs_status
    }

    fn host_args(&mut self, args: &mut HostArgs) -> Status {
        self.events.push(Event::HostArgs);
        *args = HostArgs {
            argc: self.host_argc.unwrap_or_else(|| self.host_argv.count()),
            argv: self.host_argv.as_ptr(),
            envc: self.host_envp.count(),
            envp: self.host_envp.as_ptr(),
        };
        self.host_args_status
    }

    fn premain(&mut self, argc: &mut c_int, argv: &mut *const *const c_char) {
        self.events.push(Event::Premain);
        *argc = self.premain_argc.unwrap_or_else(|| self.premain_argv.count());
        *argv = match self.premain_null_argv {
            true => null(),
            false => self.premain_argv.as_ptr(),
        };
    }

    fn chdir(&mut self, path: &CStr) -> Status {
        self.events.push(Event::Chdir(path.to_str().unwrap().into()));
        self.chdir_status
    }

    fn payload(&mut self) -> &mut [u8] {
        &mut self.image
    }

    unsafe fn enter(&mut self, entry: EntryPoint, stack: &[usize]) -> c_int {
        let argc = stack[0];
        let slots = &stack[1..];
        assert_eq!(slots[argc], 0);

        let envc = slots[argc + 1..].iter().position(|s| *s == 0).unwrap();
        let aux = &slots[argc + 1 + envc + 1..];
        assert_eq!(aux, &[0; AUX_RESERVED + 1][..]);

        self.entered_argv = slots[..argc].to_vec();
        self.events.push(Event::Enter {
            entry: entry.addr(),
            argv: strings(&slots[..argc]),
            envp: strings(&slots[argc + 1..][..envc]),
        });
        0
    }
}

pub fn modules() -> Vec<Event> {
    Module::ALL.iter().copied().map(Event::Module).collect()
}

pub fn strs(strings: &[&str]) -> Vec<String> {
    strings.iter().map(|s| s.to_string()).collect()
}
