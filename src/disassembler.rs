// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instruction rendering for the execution-history dump.
//!
//! The decoder mirrors the interpreter's dispatch but only produces text;
//! unreadable memory decodes as `????`.

use crate::memory::AddressSpace;
use crate::utils::bits;

const CONDITIONS: [&str; 16] = [
    "T", "F", "HI", "LS", "CC", "CS", "NE", "EQ", "VC", "VS", "PL", "MI", "GE", "LT", "GT", "LE",
];

struct Dasm<'a> {
    mem: &'a AddressSpace,
    pc: u32,
}

impl Dasm<'_> {
    fn word(&mut self) -> u16 {
        let w = self.mem.read_u16_super(self.pc).unwrap_or(0);
        self.pc = self.pc.wrapping_add(2);
        w
    }

    fn long(&mut self) -> u32 {
        let high = self.word() as u32;
        high << 16 | self.word() as u32
    }

    fn imm(&mut self, size: char) -> String {
        match size {
            'L' => format!("#${:X}", self.long()),
            _ => format!("#${:X}", self.word()),
        }
    }

    fn index_register(ext: u16) -> String {
        let kind = if ext & 0x8000 != 0 { 'A' } else { 'D' };
        let reg = ext >> 12 & 7;
        let size = if ext & 0x0800 != 0 { 'L' } else { 'W' };
        format!("{kind}{reg}.{size}")
    }

    fn ea(&mut self, mode: u16, reg: u16, size: char) -> String {
        match mode {
            0 => format!("D{reg}"),
            1 => format!("A{reg}"),
            2 => format!("(A{reg})"),
            3 => format!("(A{reg})+"),
            4 => format!("-(A{reg})"),
            5 => format!("({}, A{reg})", self.word() as i16),
            6 => {
                let ext = self.word();
                format!("({}, A{reg}, {})", ext as u8 as i8, Self::index_register(ext))
            }
            _ => match reg {
                0 => format!("(${:X}).W", self.word()),
                1 => format!("(${:X}).L", self.long()),
                2 => format!("({}, PC)", self.word() as i16),
                3 => {
                    let ext = self.word();
                    format!("({}, PC, {})", ext as u8 as i8, Self::index_register(ext))
                }
                4 => self.imm(size),
                _ => "????".to_string(),
            },
        }
    }
}

fn size_char(sz: u16) -> char {
    match sz {
        0 => 'B',
        1 => 'W',
        _ => 'L',
    }
}

/// Disassembles the instruction at `adr`, returning the text and the
/// address of the following instruction.
pub fn disassemble(mem: &AddressSpace, adr: u32) -> (String, u32) {
    let mut d = Dasm { mem, pc: adr };
    let op = d.word();
    let mode = bits(op, 3, 5);
    let reg = bits(op, 0, 2);
    let reg9 = bits(op, 9, 11);

    let text = match op >> 12 {
        0x0 => line0(&mut d, op, mode, reg, reg9),
        0x1 | 0x2 | 0x3 => {
            let sz = match op >> 12 {
                1 => 'B',
                3 => 'W',
                _ => 'L',
            };
            let src = d.ea(mode, reg, sz);
            let dst_mode = bits(op, 6, 8);
            let dst = d.ea(dst_mode, reg9, sz);
            if dst_mode == 1 {
                format!("MOVEA.{sz} {src}, {dst}")
            } else {
                format!("MOVE.{sz} {src}, {dst}")
            }
        }
        0x4 => line4(&mut d, op, mode, reg, reg9),
        0x5 => {
            if op & 0x00C0 == 0x00C0 {
                let cc = CONDITIONS[bits(op, 8, 11) as usize];
                if mode == 1 {
                    let disp = d.word() as i16;
                    format!("DB{cc} D{reg}, *{:+}", disp as i32 + 2)
                } else {
                    format!("S{cc}.B {}", d.ea(mode, reg, 'B'))
                }
            } else {
                let n = if reg9 == 0 { 8 } else { reg9 as u32 };
                let sz = size_char(bits(op, 6, 7));
                let name = if op & 0x0100 != 0 { "SUBQ" } else { "ADDQ" };
                format!("{name}.{sz} #{n}, {}", d.ea(mode, reg, sz))
            }
        }
        0x6 => {
            let cc = bits(op, 8, 11);
            let name = match cc {
                0 => "BRA".to_string(),
                1 => "BSR".to_string(),
                _ => format!("B{}", CONDITIONS[cc as usize]),
            };
            let disp8 = op as u8;
            if disp8 == 0 {
                let disp = d.word() as i16;
                format!("{name}.W *{:+}", disp as i32 + 2)
            } else {
                format!("{name}.S *{:+}", disp8 as i8 as i32 + 2)
            }
        }
        0x7 => format!("MOVEQ #{}, D{reg9}", op as u8 as i8),
        0x8 => {
            if op & 0x01C0 == 0x00C0 {
                format!("DIVU.W {}, D{reg9}", d.ea(mode, reg, 'W'))
            } else if op & 0x01C0 == 0x01C0 {
                format!("DIVS.W {}, D{reg9}", d.ea(mode, reg, 'W'))
            } else if op & 0x01F0 == 0x0100 {
                bcd("SBCD", op, reg, reg9)
            } else {
                dyadic(&mut d, "OR", op, mode, reg, reg9)
            }
        }
        0x9 => {
            if op & 0x00C0 == 0x00C0 {
                adda(&mut d, "SUBA", op, mode, reg, reg9)
            } else if op & 0x0130 == 0x0100 {
                extend_op("SUBX", op, reg, reg9)
            } else {
                dyadic(&mut d, "SUB", op, mode, reg, reg9)
            }
        }
        0xA => "LINE-A".to_string(),
        0xB => {
            let sz = size_char(bits(op, 6, 7));
            if op & 0x00C0 == 0x00C0 {
                adda(&mut d, "CMPA", op, mode, reg, reg9)
            } else if op & 0x0138 == 0x0108 {
                format!("CMPM.{sz} (A{reg})+, (A{reg9})+")
            } else if op & 0x0100 != 0 {
                format!("EOR.{sz} D{reg9}, {}", d.ea(mode, reg, sz))
            } else {
                format!("CMP.{sz} {}, D{reg9}", d.ea(mode, reg, sz))
            }
        }
        0xC => {
            if op & 0x01C0 == 0x00C0 {
                format!("MULU.W {}, D{reg9}", d.ea(mode, reg, 'W'))
            } else if op & 0x01C0 == 0x01C0 {
                format!("MULS.W {}, D{reg9}", d.ea(mode, reg, 'W'))
            } else if op & 0x01F0 == 0x0100 {
                bcd("ABCD", op, reg, reg9)
            } else if op & 0x01F8 == 0x0140 {
                format!("EXG D{reg9}, D{reg}")
            } else if op & 0x01F8 == 0x0148 {
                format!("EXG A{reg9}, A{reg}")
            } else if op & 0x01F8 == 0x0188 {
                format!("EXG D{reg9}, A{reg}")
            } else {
                dyadic(&mut d, "AND", op, mode, reg, reg9)
            }
        }
        0xD => {
            if op & 0x00C0 == 0x00C0 {
                adda(&mut d, "ADDA", op, mode, reg, reg9)
            } else if op & 0x0130 == 0x0100 {
                extend_op("ADDX", op, reg, reg9)
            } else {
                dyadic(&mut d, "ADD", op, mode, reg, reg9)
            }
        }
        0xE => line_e(&mut d, op, mode, reg, reg9),
        _ => match op >> 8 {
            0xFF => format!("DOS (${op:04X})"),
            0xFE => format!("FEFUNC (${op:04X})"),
            _ => "LINE-F".to_string(),
        },
    };

    (text, d.pc)
}

fn dyadic(d: &mut Dasm, name: &str, op: u16, mode: u16, reg: u16, reg9: u16) -> String {
    let sz = size_char(bits(op, 6, 7));
    if op & 0x0100 != 0 {
        format!("{name}.{sz} D{reg9}, {}", d.ea(mode, reg, sz))
    } else {
        format!("{name}.{sz} {}, D{reg9}", d.ea(mode, reg, sz))
    }
}

fn adda(d: &mut Dasm, name: &str, op: u16, mode: u16, reg: u16, reg9: u16) -> String {
    let sz = if op & 0x0100 != 0 { 'L' } else { 'W' };
    format!("{name}.{sz} {}, A{reg9}", d.ea(mode, reg, sz))
}

fn bcd(name: &str, op: u16, reg: u16, reg9: u16) -> String {
    if op & 0x0008 != 0 {
        format!("{name} -(A{reg}), -(A{reg9})")
    } else {
        format!("{name} D{reg}, D{reg9}")
    }
}

fn extend_op(name: &str, op: u16, reg: u16, reg9: u16) -> String {
    let sz = size_char(bits(op, 6, 7));
    if op & 0x0008 != 0 {
        format!("{name}.{sz} -(A{reg}), -(A{reg9})")
    } else {
        format!("{name}.{sz} D{reg}, D{reg9}")
    }
}

fn line0(d: &mut Dasm, op: u16, mode: u16, reg: u16, reg9: u16) -> String {
    if op & 0x0100 != 0 {
        if mode == 1 {
            let dir = if op & 0x0080 != 0 { "reg-to-mem" } else { "mem-to-reg" };
            let sz = if op & 0x0040 != 0 { 'L' } else { 'W' };
            let disp = d.word() as i16;
            return format!("MOVEP.{sz} D{reg9}, ({disp}, A{reg}) ; {dir}");
        }
        let name = ["BTST", "BCHG", "BCLR", "BSET"][bits(op, 6, 7) as usize];
        return format!("{name} D{reg9}, {}", d.ea(mode, reg, 'B'));
    }

    match reg9 {
        4 => {
            let bitno = d.word();
            let name = ["BTST", "BCHG", "BCLR", "BSET"][bits(op, 6, 7) as usize];
            format!("{name} #{bitno}, {}", d.ea(mode, reg, 'B'))
        }
        0 | 1 | 5 => {
            let name = ["ORI", "ANDI", "", "", "", "EORI"][reg9 as usize];
            let sz = size_char(bits(op, 6, 7));
            let imm = d.imm(sz);
            if mode == 7 && reg == 4 {
                let target = if sz == 'B' { "CCR" } else { "SR" };
                format!("{name} {imm}, {target}")
            } else {
                format!("{name}.{sz} {imm}, {}", d.ea(mode, reg, sz))
            }
        }
        2 | 3 | 6 => {
            let name = ["", "", "SUBI", "ADDI", "", "", "CMPI"][reg9 as usize];
            let sz = size_char(bits(op, 6, 7));
            let imm = d.imm(sz);
            format!("{name}.{sz} {imm}, {}", d.ea(mode, reg, sz))
        }
        _ => "????".to_string(),
    }
}

fn line4(d: &mut Dasm, op: u16, mode: u16, reg: u16, reg9: u16) -> String {
    match op {
        0x4E70 => return "RESET".to_string(),
        0x4E71 => return "NOP".to_string(),
        0x4E72 => return format!("STOP #${:04X}", d.word()),
        0x4E73 => return "RTE".to_string(),
        0x4E75 => return "RTS".to_string(),
        0x4E76 => return "TRAPV".to_string(),
        0x4E77 => return "RTR".to_string(),
        0x4AFC => return "ILLEGAL".to_string(),
        _ => {}
    }
    if op & 0xFFF0 == 0x4E40 {
        return format!("TRAP #{}", op & 0x000F);
    }
    if op & 0xFFF8 == 0x4E50 {
        return format!("LINK A{reg}, #{}", d.word() as i16);
    }
    if op & 0xFFF8 == 0x4E58 {
        return format!("UNLK A{reg}");
    }
    if op & 0xFFF0 == 0x4E60 {
        return if op & 0x0008 != 0 {
            format!("MOVE USP, A{reg}")
        } else {
            format!("MOVE A{reg}, USP")
        };
    }
    if op & 0xFFC0 == 0x4E80 {
        return format!("JSR {}", d.ea(mode, reg, 'L'));
    }
    if op & 0xFFC0 == 0x4EC0 {
        return format!("JMP {}", d.ea(mode, reg, 'L'));
    }
    if op & 0x01C0 == 0x0180 {
        return format!("CHK.W {}, D{reg9}", d.ea(mode, reg, 'W'));
    }
    if op & 0x01C0 == 0x01C0 {
        return format!("LEA {}, A{reg9}", d.ea(mode, reg, 'L'));
    }

    match op & 0x0FC0 {
        0x0000 | 0x0040 | 0x0080 => {
            let sz = size_char(bits(op, 6, 7));
            format!("NEGX.{sz} {}", d.ea(mode, reg, sz))
        }
        0x00C0 => format!("MOVE SR, {}", d.ea(mode, reg, 'W')),
        0x0200 | 0x0240 | 0x0280 => {
            let sz = size_char(bits(op, 6, 7));
            format!("CLR.{sz} {}", d.ea(mode, reg, sz))
        }
        0x0400 | 0x0440 | 0x0480 => {
            let sz = size_char(bits(op, 6, 7));
            format!("NEG.{sz} {}", d.ea(mode, reg, sz))
        }
        0x04C0 => format!("MOVE {}, CCR", d.ea(mode, reg, 'W')),
        0x0600 | 0x0640 | 0x0680 => {
            let sz = size_char(bits(op, 6, 7));
            format!("NOT.{sz} {}", d.ea(mode, reg, sz))
        }
        0x06C0 => format!("MOVE {}, SR", d.ea(mode, reg, 'W')),
        0x0800 => format!("NBCD {}", d.ea(mode, reg, 'B')),
        0x0840 => {
            if mode == 0 {
                format!("SWAP D{reg}")
            } else {
                format!("PEA {}", d.ea(mode, reg, 'L'))
            }
        }
        0x0880 | 0x08C0 => {
            if mode == 0 {
                let sz = if op & 0x0040 != 0 { 'L' } else { 'W' };
                format!("EXT.{sz} D{reg}")
            } else {
                let sz = if op & 0x0040 != 0 { 'L' } else { 'W' };
                let mask = d.word();
                format!("MOVEM.{sz} #${mask:04X}, {}", d.ea(mode, reg, sz))
            }
        }
        0x0A00 | 0x0A40 | 0x0A80 => {
            let sz = size_char(bits(op, 6, 7));
            format!("TST.{sz} {}", d.ea(mode, reg, sz))
        }
        0x0AC0 => format!("TAS {}", d.ea(mode, reg, 'B')),
        0x0C80 | 0x0CC0 => {
            let sz = if op & 0x0040 != 0 { 'L' } else { 'W' };
            let mask = d.word();
            format!("MOVEM.{sz} {}, #${mask:04X}", d.ea(mode, reg, sz))
        }
        _ => "????".to_string(),
    }
}

fn line_e(d: &mut Dasm, op: u16, mode: u16, reg: u16, reg9: u16) -> String {
    let dir = if op & 0x0100 != 0 { 'L' } else { 'R' };
    if op & 0x00C0 == 0x00C0 {
        let name = ["AS", "LS", "ROX", "RO"][bits(op, 9, 10) as usize];
        return format!("{name}{dir}.W {}", d.ea(mode, reg, 'W'));
    }

    let name = ["AS", "LS", "ROX", "RO"][bits(op, 3, 4) as usize];
    let sz = size_char(bits(op, 6, 7));
    if op & 0x0020 != 0 {
        format!("{name}{dir}.{sz} D{reg9}, D{reg}")
    } else {
        let n = if reg9 == 0 { 8 } else { reg9 as u32 };
        format!("{name}{dir}.{sz} #{n}, D{reg}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dasm_words(words: &[u16]) -> String {
        let mut mem = AddressSpace::new(0x1000, 0);
        let mut adr = 0x100;
        for &w in words {
            mem.write_u16_super(adr, w).unwrap();
            adr += 2;
        }
        disassemble(&mem, 0x100).0
    }

    #[test]
    fn common_instructions() {
        assert_eq!(dasm_words(&[0x4E71]), "NOP");
        assert_eq!(dasm_words(&[0x7005]), "MOVEQ #5, D0");
        assert_eq!(dasm_words(&[0x2F08]), "MOVE.L A0, -(A7)");
        assert_eq!(dasm_words(&[0xD081]), "ADD.L D1, D0");
        assert_eq!(dasm_words(&[0x4E40]), "TRAP #0");
        assert_eq!(dasm_words(&[0xFF00]), "DOS ($FF00)");
    }

    #[test]
    fn extension_words_advance_next_address() {
        let mut mem = AddressSpace::new(0x1000, 0);
        mem.write_u16_super(0x100, 0x41F9).unwrap(); // LEA (abs).L, A0
        mem.write_u32_super(0x102, 0x0002_0000).unwrap();
        let (text, next) = disassemble(&mem, 0x100);
        assert_eq!(text, "LEA ($20000).L, A0");
        assert_eq!(next, 0x106);
    }
}
