// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exception vectors, the fault channel and exception delivery.
//!
//! Faults replace the original non-local abort jump: every memory, CPU and
//! OS operation that can fail returns `Result<_, Fault>` and the runner
//! turns an escaped fault into the diagnostic report.

use thiserror::Error;

use crate::Emulator;

/// Exception vectors of the 68000 used by the Human68k personality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vector {
    BusError = 2,
    AddressError = 3,
    IllegalInstruction = 4,
    ZeroDivide = 5,
    ChkInstruction = 6,
    TrapVInstruction = 7,
    PrivilegeViolation = 8,
    Trace = 9,
    LineAEmulator = 10,
    LineFEmulator = 11,
    Trap0 = 32,
}

/// Number of low vectors whose boot-time default is tracked.
pub const VECTOR_COUNT: usize = 48;

/// A fatal condition escaping to the process-scoped abort channel.
///
/// Faults that correspond to guest CPU exceptions are only raised when the
/// guest has not installed its own handler over the default vector.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("バスエラーが発生しました")]
    Bus { adr: u32, write: bool },
    #[error("アドレスエラーが発生しました")]
    Address { adr: u32 },
    #[error("おかしな命令を実行しました")]
    IllegalInstruction { opcode: u16 },
    #[error("0で除算しました")]
    ZeroDivide,
    #[error("trap #{no}命令を実行しました")]
    Trap { no: u8 },
    #[error("{0}")]
    Abort(&'static str),
}

impl Fault {
    pub fn bus_read(adr: u32) -> Self {
        Fault::Bus { adr, write: false }
    }

    pub fn bus_write(adr: u32) -> Self {
        Fault::Bus { adr, write: true }
    }

    /// The faulting guest address, when the fault names one.
    pub fn address(&self) -> Option<u32> {
        match *self {
            Fault::Bus { adr, .. } | Fault::Address { adr } => Some(adr),
            _ => None,
        }
    }
}

impl Emulator {
    /// Pushes PC and SR, enters supervisor mode and jumps to the handler
    /// installed in the given vector.
    ///
    /// `return_pc` is what an RTE in the handler will resume at.
    pub(crate) fn deliver_exception(&mut self, vecno: u8, return_pc: u32) -> Result<(), Fault> {
        let sr_word = self.sr.word();
        self.sr.s = true;

        let handler = self.mem.read_u32_super(vecno as u32 * 4)?;
        self.a[7] = self.a[7].wrapping_sub(4);
        self.mem.write_u32_super(self.a[7], return_pc)?;
        self.a[7] = self.a[7].wrapping_sub(2);
        self.mem.write_u16_super(self.a[7], sr_word)?;
        self.pc = handler;
        Ok(())
    }

    /// Boot-time content of a low vector; 0 for vectors never initialized.
    pub(crate) fn default_vector(&self, vecno: u8) -> u32 {
        self.default_vectors.get(vecno as usize).copied().unwrap_or(0)
    }

    /// True while the vector still holds its boot-time default handler.
    pub(crate) fn vector_is_default(&self, vecno: u8) -> Result<bool, Fault> {
        let handler = self.mem.read_u32_super(vecno as u32 * 4)?;
        Ok(handler == self.default_vector(vecno))
    }

    /// Delivers the exception when the guest has claimed the vector,
    /// otherwise raises `fault` through the abort channel.
    pub(crate) fn deliver_or_fault(&mut self, vecno: u8, return_pc: u32, fault: Fault) -> Result<(), Fault> {
        if self.vector_is_default(vecno)? {
            Err(fault)
        } else {
            self.deliver_exception(vecno, return_pc)
        }
    }
}
