// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Control flow: branches, jumps, returns, condition set and the trap
//! instructions.

use crate::addressing::{Size, EA_CONTROL, EA_VARIABLE_DATA};
use crate::exception::Fault;
use crate::status_register::{CCR_MASK, SR_UPPER_MASK};
use crate::utils::bits;
use crate::Emulator;
use crate::StatusRegister;

impl Emulator {
    /// Line 5: ADDQ/SUBQ, Scc, DBcc.
    pub(super) fn line5(&mut self, op: u16) -> Result<(), Fault> {
        if op & 0x00C0 != 0x00C0 {
            return self.addq_subq(op);
        }
        if bits(op, 3, 5) == 1 {
            self.dbcc(op)
        } else {
            self.scc(op)
        }
    }

    /// Line 6: BRA, BSR, Bcc.
    pub(super) fn line6(&mut self, op: u16) -> Result<(), Fault> {
        let cond = bits(op, 8, 11) as u8;
        let disp8 = op as u8;
        let base = self.pc;
        let target = if disp8 == 0 {
            base.wrapping_add(self.fetch_word()? as i16 as u32)
        } else {
            base.wrapping_add(disp8 as i8 as u32)
        };

        match cond {
            1 => {
                // BSR
                self.push_long(self.pc)?;
                self.pc = target;
            }
            0 => self.pc = target, // BRA
            _ => {
                if self.sr.condition(cond) {
                    self.pc = target;
                }
            }
        }
        Ok(())
    }

    fn dbcc(&mut self, op: u16) -> Result<(), Fault> {
        let base = self.pc;
        let disp = self.fetch_word()? as i16 as u32;
        if self.sr.condition(bits(op, 8, 11) as u8) {
            return Ok(());
        }

        let reg = bits(op, 0, 2) as usize;
        let counter = (self.d[reg] as u16).wrapping_sub(1);
        self.d_word(reg, counter);
        if counter != 0xFFFF {
            self.pc = base.wrapping_add(disp);
        }
        Ok(())
    }

    fn scc(&mut self, op: u16) -> Result<(), Fault> {
        let data = if self.sr.condition(bits(op, 8, 11) as u8) { 0xFF } else { 0x00 };
        self.ea_write(EA_VARIABLE_DATA, bits(op, 3, 5), bits(op, 0, 2), Size::Byte, data)
    }

    pub(super) fn jmp(&mut self, mode: u16, reg: u16) -> Result<(), Fault> {
        self.pc = self.ea_control_address(EA_CONTROL, mode, reg)?;
        Ok(())
    }

    pub(super) fn jsr(&mut self, mode: u16, reg: u16) -> Result<(), Fault> {
        let target = self.ea_control_address(EA_CONTROL, mode, reg)?;
        self.push_long(self.pc)?;
        self.pc = target;
        Ok(())
    }

    pub(super) fn rts(&mut self) -> Result<(), Fault> {
        self.pc = self.pop_long()?;
        Ok(())
    }

    pub(super) fn rte(&mut self) -> Result<(), Fault> {
        if !self.sr.s {
            return self.deliver_exception(8, self.pc);
        }
        let sr = self.pop_word()?;
        self.pc = self.pop_long()?;
        self.sr = StatusRegister::from(sr & (SR_UPPER_MASK | CCR_MASK));
        Ok(())
    }

    pub(super) fn rtr(&mut self) -> Result<(), Fault> {
        let ccr = self.pop_word()?;
        self.sr.set_ccr(ccr & CCR_MASK);
        self.pc = self.pop_long()?;
        Ok(())
    }

    pub(super) fn trapv(&mut self) -> Result<(), Fault> {
        if !self.sr.v {
            return Ok(());
        }
        self.deliver_or_fault(7, self.pc, Fault::Abort("TRAPV命令を実行しました"))
    }

    /// TRAP #n. #15 enters the IOCS dispatcher; #0..#8 jump to a handler
    /// the guest installed over the default marker, the rest abort.
    pub(super) fn trap(&mut self, no: u8) -> Result<(), Fault> {
        if no == 15 {
            return self.iocs_call();
        }

        if no <= 8 && !self.vector_is_default(32 + no)? {
            return self.deliver_exception(32 + no, self.pc);
        }

        Err(Fault::Trap { no })
    }

    pub(super) fn reset_instruction(&mut self) -> Result<(), Fault> {
        if !self.sr.s {
            return self.deliver_exception(8, self.pc);
        }
        // Nothing to reset: there is no external device state.
        Ok(())
    }

    pub(super) fn stop(&mut self) -> Result<(), Fault> {
        let _imm = self.fetch_word()?;
        if !self.sr.s {
            return self.deliver_exception(8, self.pc);
        }
        Err(Fault::Abort("STOP命令を実行しました"))
    }
}
