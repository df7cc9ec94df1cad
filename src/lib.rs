// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human68k user-mode emulator.
//!
//! This crate interprets M68000 machine code and emulates the Human68k
//! system-call surface (`DOS _xxxx`, `IOCS _xxxx` and the `FEFUNC` floating
//! point pack) so that Human68k `.x`/`.r` console programs run directly on
//! the host. The guest lives in a simulated 24-bit address space; system
//! calls are translated into host operations through the [`host::Host`]
//! trait.
//!
//! # How to use
//!
//! ```no_run
//! use x68run::{Emulator, Settings};
//! use x68run::host::LocalHost;
//!
//! let mut emu = Emulator::new(Settings::default(), Box::new(LocalHost::new())).unwrap();
//! let code = emu.run_program("command.x", &["arg1".to_string()]).unwrap();
//! std::process::exit(code);
//! ```

pub mod addressing;
pub mod conditions;
pub mod disassembler;
pub mod dos;
pub mod exception;
pub mod fefunc;
pub mod history;
pub mod host;
pub mod human68k;
pub mod hupair;
pub mod interpreter;
pub mod iocs;
pub mod loader;
pub mod machine;
pub mod memory;
pub mod status_register;
pub mod utils;

pub use exception::{Fault, Vector};
pub use machine::Settings;
pub use memory::AddressSpace;
pub use status_register::StatusRegister;

use dos::file::FileInfo;
use dos::memory::AllocArea;
use history::{History, OpInfo};
use host::Host;
use human68k::{FILE_MAX, NEST_MAX};

/// The whole machine: CPU register file, guest memory and the Human68k
/// personality state, bundled into one record so that several instances can
/// coexist and tests can build throwaway machines.
pub struct Emulator {
    /// Data registers.
    pub d: [u32; 8],
    /// Address registers. `a[7]` is the active stack pointer.
    pub a: [u32; 8],
    /// Shadow user stack pointer, live while the supervisor bit is set.
    pub usp: u32,
    /// Program counter.
    pub pc: u32,
    /// Status register.
    pub sr: StatusRegister,
    /// Guest address space.
    pub mem: AddressSpace,
    /// Process-wide settings.
    pub settings: Settings,

    pub(crate) host: Box<dyn Host>,
    pub(crate) files: [FileInfo; FILE_MAX],
    pub(crate) psp: [u32; NEST_MAX],
    pub(crate) nest_pc: [u32; NEST_MAX],
    pub(crate) nest_sp: [u32; NEST_MAX],
    pub(crate) nest_cnt: usize,
    pub(crate) alloc_area: AllocArea,
    /// Return address of a running DOS _SUPER_JSR, 0 when none.
    pub(crate) superjsr_ret: u32,
    pub(crate) history: History,
    pub(crate) op_info: OpInfo,
    /// PC of the instruction currently being executed.
    pub(crate) op_pc: u32,
    /// Boot-time content of the low vectors, for default-handler detection.
    pub(crate) default_vectors: [u32; exception::VECTOR_COUNT],
    /// FEFUNC _RND state.
    pub(crate) rng_state: u32,
}

impl Emulator {
    /// Sets the lower 8 bits of a data register, leaving the rest untouched.
    pub fn d_byte(&mut self, reg: usize, value: u8) {
        self.d[reg] = (self.d[reg] & 0xFFFF_FF00) | value as u32;
    }

    /// Sets the lower 16 bits of a data register, leaving the rest untouched.
    pub fn d_word(&mut self, reg: usize, value: u16) {
        self.d[reg] = (self.d[reg] & 0xFFFF_0000) | value as u32;
    }

    /// The PSP of the currently running process.
    pub fn current_psp(&self) -> u32 {
        self.psp[self.nest_cnt]
    }
}
