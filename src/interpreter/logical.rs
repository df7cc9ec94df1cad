// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boolean operations, bit manipulation and the shift/rotate group.

use crate::addressing::{Size, EA_DATA, EA_VARIABLE_DATA, EA_VARIABLE_MEMORY};
use crate::conditions::msb;
use crate::exception::Fault;
use crate::status_register::{CCR_MASK, SR_UPPER_MASK};
use crate::utils::bits;
use crate::Emulator;
use crate::StatusRegister;

/// The four boolean operations shared by the register and immediate forms.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BoolOp {
    And,
    Or,
    Eor,
}

impl BoolOp {
    fn apply(self, dest: u32, src: u32) -> u32 {
        match self {
            BoolOp::And => dest & src,
            BoolOp::Or => dest | src,
            BoolOp::Eor => dest ^ src,
        }
    }
}

impl Emulator {
    /// Line 0: immediate operations, bit manipulation, MOVEP.
    pub(super) fn line0(&mut self, op: u16) -> Result<(), Fault> {
        if op & 0x0100 != 0 {
            if bits(op, 3, 5) == 1 {
                return self.movep(op);
            }
            // Dynamic bit number in a data register.
            let bitno = self.d[bits(op, 9, 11) as usize];
            return self.bit_op(op, bitno);
        }

        match bits(op, 9, 11) {
            0 => self.booli(op, BoolOp::Or),
            1 => self.booli(op, BoolOp::And),
            2 => self.subi(op),
            3 => self.addi(op),
            4 => {
                let bitno = self.fetch_word()? as u32;
                self.bit_op(op, bitno)
            }
            5 => self.booli(op, BoolOp::Eor),
            6 => self.cmpi(op),
            _ => Err(Fault::IllegalInstruction { opcode: op }),
        }
    }

    /// ANDI/ORI/EORI, including the CCR and SR destination forms.
    fn booli(&mut self, op: u16, bool_op: BoolOp) -> Result<(), Fault> {
        let mode = bits(op, 3, 5);
        let reg = bits(op, 0, 2);

        // Immediate to CCR (byte size) or SR (word size).
        if mode == 7 && reg == 4 {
            return match bits(op, 6, 7) {
                0 => {
                    let imm = self.fetch_word()? as u16 & CCR_MASK;
                    let ccr = bool_op.apply(self.sr.ccr() as u32, imm as u32);
                    self.sr.set_ccr(ccr as u16);
                    Ok(())
                }
                1 => {
                    let imm = self.fetch_word()?;
                    if !self.sr.s {
                        return self.deliver_exception(8, self.pc);
                    }
                    let word = bool_op.apply(self.sr.word() as u32, imm as u32) as u16;
                    self.sr = StatusRegister::from(word & (SR_UPPER_MASK | CCR_MASK));
                    Ok(())
                }
                _ => Err(Fault::IllegalInstruction { opcode: op }),
            };
        }

        let size = Size::from_bits(bits(op, 6, 7)).ok_or(Fault::IllegalInstruction { opcode: op })?;
        let imm = self.fetch_sized(size)?;
        let place = self.ea_place(EA_VARIABLE_DATA, mode, reg, size)?;
        let dest = self.place_read(place, size)?;
        let result = bool_op.apply(dest, imm);
        self.general_conditions(result, size);
        self.place_store(place, size, result)
    }

    /// BTST/BCHG/BCLR/BSET. A data register operand is a 32-bit field,
    /// memory is a single byte.
    fn bit_op(&mut self, op: u16, bitno: u32) -> Result<(), Fault> {
        let kind = bits(op, 6, 7);
        let mode = bits(op, 3, 5);
        let reg = bits(op, 0, 2);

        if mode == 0 {
            let reg = reg as usize;
            let bit = 1u32 << (bitno & 31);
            self.sr.z = self.d[reg] & bit == 0;
            match kind {
                0 => {}
                1 => self.d[reg] ^= bit,
                2 => self.d[reg] &= !bit,
                _ => self.d[reg] |= bit,
            }
            return Ok(());
        }

        let bit = 1u32 << (bitno & 7);
        if kind == 0 {
            // BTST reads through any data addressing mode.
            let allowed = if op & 0x0100 != 0 { EA_DATA } else { EA_DATA & !(1 << 11) };
            let data = self.ea_read(allowed, mode, reg, Size::Byte)?;
            self.sr.z = data & bit == 0;
            return Ok(());
        }

        let place = self.ea_place(EA_VARIABLE_DATA, mode, reg, Size::Byte)?;
        let data = self.place_read(place, Size::Byte)?;
        self.sr.z = data & bit == 0;
        let result = match kind {
            1 => data ^ bit,
            2 => data & !bit,
            _ => data | bit,
        };
        self.place_store(place, Size::Byte, result)
    }

    /// AND/OR with a register operand, both directions (lines 8 and C).
    fn bool_reg(&mut self, op: u16, bool_op: BoolOp) -> Result<(), Fault> {
        let size = Size::from_bits(bits(op, 6, 7)).ok_or(Fault::IllegalInstruction { opcode: op })?;
        let reg = bits(op, 9, 11) as usize;
        let mode = bits(op, 3, 5);
        let ea_reg = bits(op, 0, 2);

        if op & 0x0100 != 0 {
            let place = self.ea_place(EA_VARIABLE_MEMORY, mode, ea_reg, size)?;
            let dest = self.place_read(place, size)?;
            let result = bool_op.apply(dest, self.d[reg] & size.mask());
            self.general_conditions(result, size);
            self.place_store(place, size, result)
        } else {
            let src = self.ea_read(EA_DATA, mode, ea_reg, size)?;
            let result = bool_op.apply(self.d[reg] & size.mask(), src);
            self.general_conditions(result, size);
            Emulator::place_write_reg(&mut self.d, reg, size, result);
            Ok(())
        }
    }

    pub(super) fn and(&mut self, op: u16) -> Result<(), Fault> {
        self.bool_reg(op, BoolOp::And)
    }

    pub(super) fn or(&mut self, op: u16) -> Result<(), Fault> {
        self.bool_reg(op, BoolOp::Or)
    }

    /// EOR always stores into the effective address.
    pub(super) fn eor(&mut self, op: u16) -> Result<(), Fault> {
        let size = Size::from_bits(bits(op, 6, 7)).ok_or(Fault::IllegalInstruction { opcode: op })?;
        let reg = bits(op, 9, 11) as usize;
        let place = self.ea_place(EA_VARIABLE_DATA, bits(op, 3, 5), bits(op, 0, 2), size)?;
        let dest = self.place_read(place, size)?;
        let result = dest ^ (self.d[reg] & size.mask());
        self.general_conditions(result, size);
        self.place_store(place, size, result)
    }

    pub(super) fn not(&mut self, op: u16, mode: u16, reg: u16) -> Result<(), Fault> {
        let size = Size::from_bits(bits(op, 6, 7)).ok_or(Fault::IllegalInstruction { opcode: op })?;
        let place = self.ea_place(EA_VARIABLE_DATA, mode, reg, size)?;
        let result = !self.place_read(place, size)?;
        self.general_conditions(result, size);
        self.place_store(place, size, result)
    }

    /// Line E: shifts and rotates, register and single-bit memory forms.
    pub(super) fn line_e(&mut self, op: u16) -> Result<(), Fault> {
        let left = op & 0x0100 != 0;

        if op & 0x00C0 == 0x00C0 {
            // Memory form: word, one bit.
            let kind = bits(op, 9, 10);
            let place = self.ea_place(EA_VARIABLE_MEMORY, bits(op, 3, 5), bits(op, 0, 2), Size::Word)?;
            let data = self.place_read(place, Size::Word)?;
            let result = self.shift(kind, left, data, 1, Size::Word);
            return self.place_store(place, Size::Word, result);
        }

        let kind = bits(op, 3, 4);
        let size = Size::from_bits(bits(op, 6, 7)).ok_or(Fault::IllegalInstruction { opcode: op })?;
        let reg = bits(op, 0, 2) as usize;
        let count = if op & 0x0020 != 0 {
            self.d[bits(op, 9, 11) as usize] % 64
        } else {
            match bits(op, 9, 11) {
                0 => 8,
                n => n as u32,
            }
        };

        let data = self.d[reg] & size.mask();
        let result = self.shift(kind, left, data, count, size);
        Emulator::place_write_reg(&mut self.d, reg, size, result);
        Ok(())
    }

    /// One shift/rotate with the documented CCR rules per kind:
    /// 0=arithmetic, 1=logical, 2=rotate with extend, 3=rotate.
    fn shift(&mut self, kind: u16, left: bool, data: u32, count: u32, size: Size) -> u32 {
        let width = size.bytes() * 8;
        let mask = size.mask();
        let mut value = data & mask;

        if count == 0 {
            self.sr.v = false;
            self.sr.c = if kind == 2 { self.sr.x } else { false };
            self.sr.z = value == 0;
            self.sr.n = msb(value, size);
            return value;
        }

        let mut carry = false;
        let mut overflow = false;

        for _ in 0..count {
            let out = if left { msb(value, size) } else { value & 1 != 0 };
            match kind {
                0 => {
                    // Arithmetic: left tracks sign changes for V, right
                    // replicates the sign bit.
                    if left {
                        value = value << 1 & mask;
                        if msb(value, size) != out {
                            overflow = true;
                        }
                    } else {
                        let sign = if msb(value, size) { 1 << (width - 1) } else { 0 };
                        value = value >> 1 | sign;
                    }
                    carry = out;
                    self.sr.x = out;
                }
                1 => {
                    value = if left { value << 1 & mask } else { value >> 1 };
                    carry = out;
                    self.sr.x = out;
                }
                2 => {
                    // Rotate through the extend bit.
                    let in_bit = self.sr.x as u32;
                    value = if left {
                        value << 1 & mask | in_bit
                    } else {
                        value >> 1 | in_bit << (width - 1)
                    };
                    carry = out;
                    self.sr.x = out;
                }
                _ => {
                    // Plain rotate: X stays.
                    let in_bit = out as u32;
                    value = if left {
                        value << 1 & mask | in_bit
                    } else {
                        value >> 1 | in_bit << (width - 1)
                    };
                    carry = out;
                }
            }
        }

        self.sr.c = carry;
        self.sr.v = kind == 0 && left && overflow;
        self.sr.z = value == 0;
        self.sr.n = msb(value, size);
        value
    }
}
